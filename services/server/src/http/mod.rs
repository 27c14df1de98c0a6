pub mod response;
pub mod snapshot;
pub mod status;
pub mod ws_metrics;

use axum::response::Response;

use crate::binding::{bind_atomic, BindError};
use crate::repo::display_screens::DisplayScreenRow;
use crate::state::AppState;
use response::{device_required, internal_error, rate_limited, screen_bound, screen_unknown};

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Shared auth path for Status and Snapshot (`spec.md` §4.4): resolve the
/// token, validate the device binding, and apply the per-`(token,
/// device_id)` rate limit. Returns the bound screen on success or the
/// typed error response the caller should return as-is.
pub(crate) async fn authenticate_and_rate_limit(
    state: &AppState,
    token: &str,
    device_id: &str,
) -> Result<DisplayScreenRow, Response> {
    if device_id.is_empty() {
        return Err(device_required("dk query parameter is required"));
    }

    let screen = bind_atomic(
        state.screens.as_ref(),
        token,
        device_id,
        state.config.allow_multi_device,
    )
    .await
    .map_err(|e| match e {
        BindError::ScreenUnknown => screen_unknown("unknown or inactive screen token"),
        BindError::ScreenBound => screen_bound("screen is bound to a different device"),
        BindError::DeviceRequired => device_required("dk query parameter is required"),
    })?;

    match state.rate_limiter.check(token, device_id).await {
        Ok(true) => Ok(screen),
        Ok(false) => Err(rate_limited("per-device request rate exceeded")),
        Err(_) => Err(internal_error("rate limiter unavailable")),
    }
}
