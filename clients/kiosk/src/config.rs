use std::env;

/// Kiosk process configuration, read once at startup. Mirrors the
/// server's `env_or`/`env_bool` convention rather than reaching for a
/// config-file crate neither side of this workspace otherwise uses.
#[derive(Clone, Debug)]
pub struct KioskConfig {
    pub base_url: String,
    pub token: String,
    pub device_id: String,
    pub log_level: String,
    pub lite_mode: bool,
    pub debug: bool,
}

impl KioskConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_or("DISPLAY_SERVER_URL", "http://127.0.0.1:8080"),
            token: env::var("DISPLAY_TOKEN").expect("DISPLAY_TOKEN must be set"),
            device_id: env::var("DISPLAY_DEVICE_ID").expect("DISPLAY_DEVICE_ID must be set"),
            log_level: env_or("LOG_LEVEL", "info"),
            lite_mode: env_bool("LITE_MODE", false),
            debug: env_bool("DEBUG", false),
        }
    }

    pub fn status_url(&self, known_revision: i64) -> String {
        format!(
            "{}/api/display/status/{}/?v={}&dk={}",
            self.base_url, self.token, known_revision, self.device_id
        )
    }

    pub fn snapshot_url(&self) -> String {
        format!(
            "{}/api/display/snapshot/{}/?dk={}",
            self.base_url, self.token, self.device_id
        )
    }

    /// Derives the `ws://`/`wss://` push endpoint from `base_url`, since
    /// the server exposes both surfaces behind the same host.
    pub fn ws_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!(
            "{ws_base}/ws/display/?token={}&dk={}",
            self.token, self.device_id
        )
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

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> KioskConfig {
        KioskConfig {
            base_url: "http://example.com".to_owned(),
            token: "TOK".to_owned(),
            device_id: "DEV".to_owned(),
            log_level: "info".to_owned(),
            lite_mode: false,
            debug: false,
        }
    }

    #[test]
    fn status_and_snapshot_urls_carry_the_device_key() {
        let cfg = sample();
        assert_eq!(
            cfg.status_url(7),
            "http://example.com/api/display/status/TOK/?v=7&dk=DEV"
        );
        assert_eq!(
            cfg.snapshot_url(),
            "http://example.com/api/display/snapshot/TOK/?dk=DEV"
        );
    }

    #[test]
    fn ws_url_rewrites_the_scheme() {
        let cfg = sample();
        assert_eq!(
            cfg.ws_url(),
            "ws://example.com/ws/display/?token=TOK&dk=DEV"
        );

        let https = KioskConfig {
            base_url: "https://example.com".to_owned(),
            ..sample()
        };
        assert_eq!(
            https.ws_url(),
            "wss://example.com/ws/display/?token=TOK&dk=DEV"
        );
    }
}
