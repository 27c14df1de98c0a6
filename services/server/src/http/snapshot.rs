use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use kv_store::CacheError;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::state::AppState;

use super::{authenticate_and_rate_limit, now_ms, response::build_unavailable};

#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    /// The client's last-known revision. Not consulted for the 304 decision
    /// — `If-None-Match` is authoritative — but accepted so older clients
    /// relying on the query param alone still get a well-formed response.
    #[serde(default)]
    #[allow(dead_code)]
    rev: Option<i64>,
    #[serde(default)]
    dk: String,
    /// Accepted for wire compatibility with kiosk clients signalling a
    /// mid-transition poll; the snapshot content itself never changes on
    /// account of it.
    #[serde(default)]
    #[allow(dead_code)]
    transition: Option<u8>,
    #[serde(default)]
    nocache: Option<u8>,
}

/// `GET /api/display/snapshot/<token>/?rev=<client_rev>&dk=<device_id>`
/// (`spec.md` §4.3). `transition` is accepted so clients can signal they are
/// mid-transition; the snapshot content never changes on account of it —
/// only the kiosk renderer reacts.
pub async fn get_snapshot(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(query): Query<SnapshotQuery>,
    headers: HeaderMap,
) -> Response {
    let screen = match authenticate_and_rate_limit(&state, &token, &query.dk).await {
        Ok(screen) => screen,
        Err(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
            // Unlike Status and the typed 403s, a rate-limited snapshot
            // reply carries no body, just the Retry-After guidance.
            let mut empty = no_store(response);
            *empty.body_mut() = Body::empty();
            return empty;
        }
        Err(response) => return no_store(response),
    };

    let bypass_cache = query.nocache == Some(1) && state.config.debug;

    let cached = if bypass_cache {
        match state.registry.get(screen.school_id).await {
            Ok(revision) => {
                match state.builder.build(screen.school_id, revision).await {
                    Ok(body) => {
                        let etag = strong_etag(&body);
                        kv_store::CachedSnapshot {
                            body,
                            etag,
                            revision,
                            is_stale: false,
                        }
                    }
                    Err(e) => {
                        return no_store(build_unavailable(e.to_string()));
                    }
                }
            }
            Err(e) => return no_store(build_unavailable(e.to_string())),
        }
    } else {
        match state
            .cache
            .get_or_build(screen.school_id, &state.registry, state.builder.as_ref())
            .await
        {
            Ok(cached) => cached,
            Err(CacheError::Unavailable) => {
                return no_store(build_unavailable("no snapshot available and build is in progress"));
            }
            Err(e) => return no_store(build_unavailable(e.to_string())),
        }
    };

    let patched = if cached.is_stale {
        patch_stale(&cached)
    } else {
        cached
    };

    let if_none_match = headers
        .get(axum::http::header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == patched.etag)
        .unwrap_or(false);
    if if_none_match {
        return with_common_headers(
            StatusCode::NOT_MODIFIED.into_response(),
            &patched,
            max_age_header(&state, bypass_cache),
        );
    }

    let mut response = (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        Body::from(patched.body.clone()),
    )
        .into_response();
    response = with_common_headers(response, &patched, max_age_header(&state, bypass_cache));
    response
}

fn max_age_header(state: &AppState, bypass_cache: bool) -> HeaderValue {
    if bypass_cache {
        HeaderValue::from_static("no-store")
    } else {
        HeaderValue::from_str(&format!(
            "public, max-age=0, s-maxage={}",
            state.config.snapshot_edge_max_age
        ))
        .unwrap_or_else(|_| HeaderValue::from_static("no-store"))
    }
}

fn with_common_headers(
    mut response: Response,
    cached: &kv_store::CachedSnapshot,
    cache_control: HeaderValue,
) -> Response {
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&cached.etag) {
        headers.insert(axum::http::header::ETAG, v);
    }
    if let Ok(v) = HeaderValue::from_str(&cached.revision.to_string()) {
        headers.insert("X-Schedule-Revision", v);
    }
    if let Ok(v) = HeaderValue::from_str(&now_ms().to_string()) {
        headers.insert("X-Server-Time-MS", v);
    }
    headers.insert(axum::http::header::CACHE_CONTROL, cache_control);
    response
}

fn no_store(mut response: Response) -> Response {
    let headers: &mut HeaderMap = response.headers_mut();
    headers.insert(axum::http::header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn strong_etag(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!("\"{digest:x}\"")
}

/// The bytes cached by `SnapshotCache` were built while fresh, so their
/// embedded `meta.is_stale` is absent. Serving a stale fallback (`spec.md`
/// §4.3) means rewriting that flag into the body before it reaches the
/// client — and recomputing the ETag from the patched bytes, since the
/// cached ETag was computed before staleness was known and would otherwise
/// mismatch what is actually sent.
fn patch_stale(cached: &kv_store::CachedSnapshot) -> kv_store::CachedSnapshot {
    let Ok(mut doc) = serde_json::from_slice::<display_protocol::SnapshotDoc>(&cached.body) else {
        return cached.clone();
    };
    doc.meta.is_stale = Some(true);
    doc.meta.stale_warning = Some("serving the last known-good snapshot; a rebuild is in progress".to_owned());
    let Ok(body) = serde_json::to_vec(&doc) else {
        return cached.clone();
    };
    let etag = strong_etag(&body);
    kv_store::CachedSnapshot {
        body,
        etag,
        revision: cached.revision,
        is_stale: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use display_protocol::{DateInfo, DutyPanel, ScheduleState, Settings, SnapshotMeta, StateType};

    fn sample_doc() -> display_protocol::SnapshotDoc {
        display_protocol::SnapshotDoc {
            settings: Settings {
                name: "Test".to_owned(),
                logo_url: String::new(),
                theme: String::new(),
                school_type: String::new(),
                display_accent_color: "#2563eb".to_owned(),
                refresh_interval_sec: 30,
                standby_scroll_speed: 1.0,
                periods_scroll_speed: 1.0,
                featured_panel: "excellence".to_owned(),
            },
            state: ScheduleState {
                state_type: StateType::Off,
                label: "off".to_owned(),
                from: "00:00".to_owned(),
                to: "23:59".to_owned(),
                remaining_seconds: 0,
            },
            current_period: None,
            next_period: None,
            day_path: vec![],
            standby: vec![],
            period_classes: vec![],
            duty: DutyPanel { items: vec![] },
            announcements: vec![],
            excellence: vec![],
            date_info: DateInfo {
                gregorian: serde_json::json!({}),
                hijri: serde_json::Value::Null,
            },
            now: chrono::Utc::now(),
            meta: SnapshotMeta {
                schedule_revision: 3,
                ws_enabled: true,
                is_stale: None,
                stale_warning: None,
                local_date: "2026-07-26".to_owned(),
            },
        }
    }

    #[test]
    fn patch_stale_sets_the_flag_and_recomputes_the_etag() {
        let body = serde_json::to_vec(&sample_doc()).unwrap();
        let fresh_etag = strong_etag(&body);
        let cached = kv_store::CachedSnapshot {
            body,
            etag: fresh_etag.clone(),
            revision: 3,
            is_stale: true,
        };

        let patched = patch_stale(&cached);
        assert_ne!(patched.etag, fresh_etag);

        let doc: display_protocol::SnapshotDoc = serde_json::from_slice(&patched.body).unwrap();
        assert_eq!(doc.meta.is_stale, Some(true));
        assert!(doc.meta.stale_warning.is_some());
    }
}
