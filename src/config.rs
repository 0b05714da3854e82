use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::{EngineSettings, PricePolicy};

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// JSON array of rooms to load at startup.
    pub catalog_path: Option<PathBuf>,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub lock_timeout: Duration,
    pub price_policy: PricePolicy,
}

impl Config {
    /// Read `ROOMLET_*` from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Missing or unparsable values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|s| s.trim().parse().ok())
        }

        Self {
            bind: lookup("ROOMLET_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "ROOMLET_PORT").unwrap_or(7878),
            data_dir: lookup("ROOMLET_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            catalog_path: lookup("ROOMLET_CATALOG").map(PathBuf::from),
            max_connections: parsed(&lookup, "ROOMLET_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parsed(&lookup, "ROOMLET_COMPACT_THRESHOLD").unwrap_or(1000),
            metrics_port: parsed(&lookup, "ROOMLET_METRICS_PORT"),
            lock_timeout: Duration::from_millis(
                parsed(&lookup, "ROOMLET_LOCK_TIMEOUT_MS").unwrap_or(5000),
            ),
            price_policy: parsed(&lookup, "ROOMLET_PRICE_POLICY").unwrap_or_default(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            lock_timeout: self.lock_timeout,
            price_policy: self.price_policy,
        }
    }
}
