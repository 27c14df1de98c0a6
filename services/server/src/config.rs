use std::env;
use std::time::Duration;

use tracing::warn;

/// Feature flags and tunables, read once at startup. Mirrors the teacher's
/// `DATABASE_URL`/`BIND_ADDR`/`LOG_LEVEL` env-var convention in `main.rs`,
/// extended with every flag named in `spec.md` §6.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub kv_url: Option<String>,
    pub log_level: String,
    pub ws_enabled: bool,
    pub allow_multi_device: bool,
    pub snapshot_edge_max_age: u32,
    pub ws_channel_capacity: usize,
    pub ws_ping_interval_seconds: u64,
    pub ws_metrics_log_interval: u64,
    pub build_lock_ttl: Duration,
    pub bump_lock_ttl: Duration,
    pub debug: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let build_lock_ttl = Duration::from_millis(env_u32("BUILD_LOCK_TTL_MS", 10_000) as u64);
        let snapshot_edge_max_age = clamp_edge_max_age(env_u32("SNAPSHOT_EDGE_MAX_AGE", 10), build_lock_ttl);

        Self {
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8080"),
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            kv_url: env::var("KV_URL").ok(),
            log_level: env_or("LOG_LEVEL", "info"),
            ws_enabled: env_bool("WS_ENABLED", true),
            allow_multi_device: env_bool("ALLOW_MULTI_DEVICE", false),
            snapshot_edge_max_age,
            ws_channel_capacity: env_u32("WS_CHANNEL_CAPACITY", 2000) as usize,
            ws_ping_interval_seconds: env_u32("WS_PING_INTERVAL_SECONDS", 30) as u64,
            ws_metrics_log_interval: env_u32("WS_METRICS_LOG_INTERVAL", 60) as u64,
            build_lock_ttl,
            bump_lock_ttl: Duration::from_millis(env_u32("BUMP_LOCK_TTL_MS", 2_000) as u64),
            debug: env_bool("DEBUG", false),
        }
    }
}

/// The edge cache must never promise freshness beyond what the internal
/// build-lock TTL can actually guarantee (`spec.md` §9 open question);
/// clamp down rather than let a misconfigured env var serve a snapshot
/// the authoritative cache has already moved past.
fn clamp_edge_max_age(requested_seconds: u32, build_lock_ttl: Duration) -> u32 {
    let ceiling = build_lock_ttl.as_secs() as u32;
    if requested_seconds > ceiling {
        warn!(
            requested_seconds,
            ceiling, "SNAPSHOT_EDGE_MAX_AGE exceeds the build lock TTL; clamping down"
        );
        ceiling
    } else {
        requested_seconds
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.trim(), "1" | "true" | "TRUE" | "yes"),
        Err(_) => default,
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
impl Config {
    /// Fixed tunables for unit/integration tests, bypassing the
    /// environment entirely so test runs never depend on ambient env vars.
    pub fn from_env_for_test() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_owned(),
            database_url: "postgres://unused".to_owned(),
            kv_url: None,
            log_level: "debug".to_owned(),
            ws_enabled: true,
            allow_multi_device: false,
            snapshot_edge_max_age: 10,
            ws_channel_capacity: 2000,
            ws_ping_interval_seconds: 30,
            ws_metrics_log_interval: 60,
            build_lock_ttl: Duration::from_millis(10_000),
            bump_lock_ttl: Duration::from_millis(2_000),
            debug: true,
        }
    }
}
