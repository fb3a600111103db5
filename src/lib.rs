pub mod config;
pub mod db;
pub mod error;
pub mod rooms;

use std::{path::Path, sync::Arc};

use axum::{
    debug_handler,
    extract::{FromRef, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use rooms::{Coordinator, Hub};

pub use error::{ChatError, ChatResult};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub coordinator: Arc<Coordinator>,
}

impl AppState {
    pub fn new(db_pool: SqlitePool) -> AppState {
        let coordinator = Arc::new(Coordinator::new(db_pool.clone(), Arc::new(Hub::new())));
        AppState { db_pool, coordinator }
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Failure of a plain HTTP route. Logged in full, answered with a bare 500.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "ok": false, "error": "An internal error occurred" })),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

pub fn app(state: AppState, static_dir: Option<&Path>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .merge(rooms::router());

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[debug_handler]
async fn health(State(db_pool): State<SqlitePool>) -> AppResult<Json<Value>> {
    sqlx::query("SELECT 1").execute(&db_pool).await?;
    Ok(Json(json!({ "ok": true })))
}
