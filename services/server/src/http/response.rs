use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use display_protocol::HttpErrorEnvelope;

pub type HttpResult<T> = Result<T, Response>;

pub(crate) fn json_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(HttpErrorEnvelope {
            code: code.to_owned(),
            message: message.into(),
            details: None,
        }),
    )
        .into_response()
}

pub fn screen_unknown(message: impl Into<String>) -> Response {
    json_error(
        StatusCode::FORBIDDEN,
        display_protocol::error_codes::SCREEN_UNKNOWN,
        message,
    )
}

pub fn screen_bound(message: impl Into<String>) -> Response {
    json_error(
        StatusCode::FORBIDDEN,
        display_protocol::error_codes::SCREEN_BOUND,
        message,
    )
}

pub fn device_required(message: impl Into<String>) -> Response {
    json_error(
        StatusCode::FORBIDDEN,
        display_protocol::error_codes::DEVICE_REQUIRED,
        message,
    )
}

pub fn rate_limited(message: impl Into<String>) -> Response {
    let mut response = json_error(
        StatusCode::TOO_MANY_REQUESTS,
        display_protocol::error_codes::RATE_LIMITED,
        message,
    );
    response
        .headers_mut()
        .insert(axum::http::header::RETRY_AFTER, axum::http::HeaderValue::from_static("1"));
    response
}

pub fn build_unavailable(message: impl Into<String>) -> Response {
    json_error(
        StatusCode::SERVICE_UNAVAILABLE,
        display_protocol::error_codes::BUILD_UNAVAILABLE,
        message,
    )
}

pub fn bad_request(message: impl Into<String>) -> Response {
    json_error(
        StatusCode::BAD_REQUEST,
        display_protocol::error_codes::BAD_REQUEST,
        message,
    )
}

pub fn internal_error(message: impl Into<String>) -> Response {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
}
