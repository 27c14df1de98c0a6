use std::sync::Arc;
use std::time::Instant;

use display_fabric_kiosk::api::{DisplayApi, ReqwestDisplayApi};
use display_fabric_kiosk::config::KioskConfig;
use display_fabric_kiosk::render::terminal::TerminalRenderer;
use display_fabric_kiosk::render::{build_view, Renderer};
use display_fabric_kiosk::runtime::{PollLoop, StepOutcome, WsClient};
use display_protocol::StateType;
use tokio::sync::mpsc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// Default poll base before the first snapshot tells us the school's own
/// `refresh_interval_sec`.
const DEFAULT_REFRESH_SECONDS: f64 = 30.0;

/// `spec.md` §4.8's anti-stampede offset is `schoolId mod 30`, but the wire
/// `SnapshotMeta` carries no school id for the client to read. Derived
/// instead from the configured token, which is equally stable per screen
/// and just as effective at staggering a fleet (see DESIGN.md).
fn anti_stampede_offset_seconds(token: &str) -> u64 {
    let hash = token.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
    hash % 30
}

#[tokio::main]
async fn main() {
    let config = KioskConfig::from_env();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let offset = anti_stampede_offset_seconds(&config.token);
    let ws_url = config.ws_url();
    let api: Arc<dyn DisplayApi> = Arc::new(ReqwestDisplayApi::new(config.clone()));
    let mut poll_loop = PollLoop::new(api, DEFAULT_REFRESH_SECONDS, offset);

    let mut renderer = match TerminalRenderer::new(config.lite_mode) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "failed to initialize the terminal renderer");
            return;
        }
    };
    let _ = renderer.render_loading();

    let (invalidate_tx, mut invalidate_rx) = mpsc::unbounded_channel();
    let mut ws_task: Option<tokio::task::JoinHandle<()>> = None;
    let booted_at = Instant::now();

    loop {
        tokio::select! {
            outcome = poll_loop.step() => {
                match outcome {
                    StepOutcome::Render { doc, next_poll } => {
                        poll_loop.set_base_refresh_seconds(doc.settings.refresh_interval_sec as f64);
                        if doc.meta.ws_enabled && ws_task.is_none() {
                            ws_task = Some(tokio::spawn(WsClient::new(ws_url.clone()).run(invalidate_tx.clone())));
                        }

                        let view = build_view(&doc, poll_loop.clock.synced_now_ms(), booted_at.elapsed().as_millis() as i64);
                        let countdown_hit_zero = view.countdown_seconds == 0 && !matches!(doc.state.state_type, StateType::After);
                        if let Err(e) = renderer.render(&view) {
                            warn!(error = %e, "render failed; continuing the poll loop");
                        }

                        if countdown_hit_zero {
                            let delay = poll_loop.anti_stampede_delay();
                            tokio::time::sleep(delay).await;
                            poll_loop.enter_transition_window();
                            continue;
                        }
                        tokio::time::sleep(next_poll).await;
                    }
                    StepOutcome::NoChange { next_poll } | StepOutcome::Retrying { next_poll } => {
                        tokio::time::sleep(next_poll).await;
                    }
                    StepOutcome::Blocked(reason) => {
                        if let Err(e) = renderer.render_blocked(reason) {
                            error!(error = %e, "failed to render the blocked state");
                        }
                        if let Some(task) = ws_task.take() {
                            task.abort();
                        }
                        return;
                    }
                }
            }
            Some(invalidation) = invalidate_rx.recv() => {
                poll_loop.note_invalidate(invalidation.revision);
            }
        }
    }
}
