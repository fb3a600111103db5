use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    path::PathBuf,
    str::FromStr,
};

use thiserror::Error;

const DEFAULT_DATABASE_URL: &str = "sqlite://chat.db";
const DEFAULT_BIND_ADDRESS: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 3000));
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 16;
const DEFAULT_INACTIVE_ROOM_DAYS: u32 = 30;
const DEFAULT_CLEANUP_INTERVAL_SECONDS: u64 = 3600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: SocketAddr,
    pub db_max_connections: u32,
    /// Directory served for every path the router does not know.
    pub static_dir: Option<PathBuf>,
    pub inactive_room_days: u32,
    /// 0 turns the cleanup task off.
    pub cleanup_interval_seconds: u64,
}

impl Config {
    /// Reads `.env` (if any) and then the process environment.
    pub fn from_env() -> Result<Config, ConfigError> {
        dotenv::dotenv().ok();
        Config::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
        Ok(Config {
            database_url: lookup("DATABASE_URL").unwrap_or(DEFAULT_DATABASE_URL.to_owned()),
            bind_address: parse(&lookup, "BIND_ADDRESS", DEFAULT_BIND_ADDRESS)?,
            db_max_connections: parse(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
            static_dir: lookup("STATIC_DIR")
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
            inactive_room_days: parse(&lookup, "INACTIVE_ROOM_DAYS", DEFAULT_INACTIVE_ROOM_DAYS)?,
            cleanup_interval_seconds: parse(
                &lookup,
                "CLEANUP_INTERVAL_SECONDS",
                DEFAULT_CLEANUP_INTERVAL_SECONDS,
            )?,
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
