use async_trait::async_trait;
use display_protocol::{HttpErrorEnvelope, SnapshotDoc, StatusResponse};
use thiserror::Error;

use crate::config::KioskConfig;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("per-device request rate exceeded")]
    RateLimited,
    #[error("screen is bound to a different device")]
    ScreenBound,
    #[error("device id is required")]
    DeviceRequired,
    #[error("unknown or inactive screen token")]
    ScreenUnknown,
    #[error("server error: {0}")]
    Server(String),
}

pub struct StatusOutcome {
    pub fetch_required: bool,
    pub schedule_revision: i64,
    pub server_time_ms: i64,
}

pub enum SnapshotOutcome {
    Fresh {
        doc: SnapshotDoc,
        etag: String,
        server_time_ms: i64,
    },
    NotModified {
        server_time_ms: i64,
    },
}

/// Abstracts the HTTP surface the poll loop drives, so its state machine
/// can be exercised against an in-memory double instead of a live server,
/// the same pattern `services/server` uses for its upstream dependencies.
#[async_trait]
pub trait DisplayApi: Send + Sync {
    async fn status(
        &self,
        known_revision: i64,
        timeout: std::time::Duration,
    ) -> Result<StatusOutcome, ApiError>;
    async fn snapshot(
        &self,
        if_none_match: Option<&str>,
        timeout: std::time::Duration,
    ) -> Result<SnapshotOutcome, ApiError>;
}

pub struct ReqwestDisplayApi {
    client: reqwest::Client,
    config: KioskConfig,
}

impl ReqwestDisplayApi {
    pub fn new(config: KioskConfig) -> Self {
        let client = reqwest::Client::builder()
            .build()
            .expect("reqwest client builds with a static configuration");
        Self { client, config }
    }
}

fn server_time_ms(headers: &reqwest::header::HeaderMap) -> i64 {
    headers
        .get("x-server-time-ms")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

async fn error_for_status(response: reqwest::Response) -> ApiError {
    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return ApiError::RateLimited;
    }
    let body = response.text().await.unwrap_or_default();
    let code = serde_json::from_str::<HttpErrorEnvelope>(&body)
        .map(|e| e.code)
        .unwrap_or_default();
    match code.as_str() {
        "screen_bound" => ApiError::ScreenBound,
        "device_required" => ApiError::DeviceRequired,
        "screen_unknown" => ApiError::ScreenUnknown,
        _ => ApiError::Server(format!("{status}: {body}")),
    }
}

#[async_trait]
impl DisplayApi for ReqwestDisplayApi {
    async fn status(
        &self,
        known_revision: i64,
        timeout: std::time::Duration,
    ) -> Result<StatusOutcome, ApiError> {
        let response = self
            .client
            .get(self.config.status_url(known_revision))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let headers = response.headers().clone();
        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            return Ok(StatusOutcome {
                fetch_required: false,
                schedule_revision: headers
                    .get("x-schedule-revision")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
                server_time_ms: server_time_ms(&headers),
            });
        }
        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }

        let server_time_ms = server_time_ms(&headers);
        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(StatusOutcome {
            fetch_required: body.fetch_required,
            schedule_revision: body.schedule_revision,
            server_time_ms,
        })
    }

    async fn snapshot(
        &self,
        if_none_match: Option<&str>,
        timeout: std::time::Duration,
    ) -> Result<SnapshotOutcome, ApiError> {
        let mut request = self.client.get(self.config.snapshot_url()).timeout(timeout);
        if let Some(etag) = if_none_match {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let headers = response.headers().clone();
        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            return Ok(SnapshotOutcome::NotModified {
                server_time_ms: server_time_ms(&headers),
            });
        }
        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }

        let etag = headers
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        let server_time_ms = server_time_ms(&headers);
        let doc: SnapshotDoc = response
            .json()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(SnapshotOutcome::Fresh {
            doc,
            etag,
            server_time_ms,
        })
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct ScriptedApi {
        pub status_script: Mutex<Vec<Result<StatusOutcome, ApiError>>>,
        pub snapshot_script: Mutex<Vec<Result<SnapshotOutcome, ApiError>>>,
    }

    #[async_trait]
    impl DisplayApi for ScriptedApi {
        async fn status(
            &self,
            _known_revision: i64,
            _timeout: std::time::Duration,
        ) -> Result<StatusOutcome, ApiError> {
            self.status_script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ApiError::Network("scripted-api: no more responses".into())))
        }

        async fn snapshot(
            &self,
            _if_none_match: Option<&str>,
            _timeout: std::time::Duration,
        ) -> Result<SnapshotOutcome, ApiError> {
            self.snapshot_script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ApiError::Network("scripted-api: no more responses".into())))
        }
    }
}
