//! Background deletion of rooms nobody has used for a while.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use super::session::Coordinator;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy)]
pub struct CleanupConfig {
    pub interval: Duration,
    pub inactive_room_days: u32,
}

/// Start of the inactivity window, in unix millis.
pub fn cutoff(now_millis: i64, inactive_room_days: u32) -> i64 {
    now_millis - i64::from(inactive_room_days) * MILLIS_PER_DAY
}

#[instrument(skip_all, name = "rooms.cleanup")]
pub async fn run_cleanup_task(
    coordinator: Arc<Coordinator>,
    config: CleanupConfig,
    cancel_token: CancellationToken,
) {
    info!(
        interval_seconds = config.interval.as_secs(),
        inactive_room_days = config.inactive_room_days,
        "starting inactive room cleanup"
    );

    let mut interval = tokio::time::interval(config.interval);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match coordinator.remove_inactive_rooms(config.inactive_room_days).await {
                    Ok(0) => {}
                    Ok(deleted) => info!(deleted, "removed inactive rooms"),
                    Err(e) => error!(error = %e, "inactive room cleanup failed"),
                }
            }
            _ = cancel_token.cancelled() => break,
        }
    }

    info!("inactive room cleanup stopped");
}
