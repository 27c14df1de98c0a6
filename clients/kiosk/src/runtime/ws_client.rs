use std::time::Duration;

use display_protocol::{close_codes, WsMessage};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{info, warn};

const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const MAX_BACKOFF_SECONDS: f64 = 60.0;
const CLIENT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// An invalidation pushed over the WS channel, destined for
/// [`crate::runtime::PollLoop::note_invalidate`].
#[derive(Debug, Clone, Copy)]
pub struct Invalidation {
    pub school_id: i64,
    pub revision: i64,
}

enum CloseOutcome {
    Permanent,
    /// Transient drop; carries whether the handshake itself succeeded, so
    /// `run` only resets the backoff ladder once a connection actually held.
    Transient { connected: bool },
}

fn is_permanent_close(code: u16) -> bool {
    matches!(
        code,
        close_codes::BAD_PARAMS | close_codes::UNKNOWN_TOKEN | close_codes::DEVICE_BOUND_ELSEWHERE
    )
}

/// Doubling reconnect backoff (1s, 2s, 4s, ... capped at 60s) with ±25%
/// jitter, mirroring the growth shape of [`crate::runtime::backoff`] but
/// kept separate since the base and ceiling differ.
fn reconnect_delay(attempt: u32) -> Duration {
    let raw = 2f64.powi(attempt as i32 - 1).min(MAX_BACKOFF_SECONDS);
    let mut rng = rand::thread_rng();
    let jitter = rng.gen_range(0.75..=1.25);
    Duration::from_secs_f64((raw * jitter).min(MAX_BACKOFF_SECONDS))
}

/// Push-invalidation WS client (`spec.md` §4.6). Connects, forwards
/// `invalidate` frames onto `tx` until the socket closes, then reconnects
/// with exponential backoff — unless the close code is one of the frozen
/// permanent codes (4400/4403/4408), in which case the client gives up:
/// the server has told it this screen/device pairing will never work.
pub struct WsClient {
    url: String,
}

impl WsClient {
    pub fn new(url: String) -> Self {
        Self { url }
    }

    pub async fn run(self, tx: mpsc::UnboundedSender<Invalidation>) {
        let mut attempt: u32 = 0;
        loop {
            match self.connect_and_forward(&tx).await {
                CloseOutcome::Permanent => {
                    info!(url = %self.url, "display ws: permanent close, giving up");
                    return;
                }
                CloseOutcome::Transient { connected } => {
                    attempt = if connected { 1 } else { attempt + 1 };
                    if attempt > MAX_RECONNECT_ATTEMPTS {
                        warn!(url = %self.url, attempt, "display ws: exhausted reconnect attempts");
                        return;
                    }
                    let delay = reconnect_delay(attempt);
                    warn!(
                        url = %self.url,
                        attempt,
                        delay_s = delay.as_secs_f64(),
                        "display ws: reconnecting after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn connect_and_forward(&self, tx: &mpsc::UnboundedSender<Invalidation>) -> CloseOutcome {
        let (mut ws, _response) = match tokio_tungstenite::connect_async(&self.url).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(url = %self.url, error = %e, "display ws: connect failed");
                return CloseOutcome::Transient { connected: false };
            }
        };

        info!(url = %self.url, "display ws connected");
        let mut ping_ticker = tokio::time::interval(CLIENT_PING_INTERVAL);
        ping_ticker.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                _ = ping_ticker.tick() => {
                    let ping = serde_json::to_string(&WsMessage::Ping).unwrap_or_default();
                    if ws.send(Message::Text(ping.into())).await.is_err() {
                        return CloseOutcome::Transient { connected: true };
                    }
                }
                frame = ws.next() => match frame {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<WsMessage>(&text) {
                        Ok(WsMessage::Invalidate { school_id, revision, .. }) => {
                            if tx.send(Invalidation { school_id, revision }).is_err() {
                                return CloseOutcome::Permanent;
                            }
                        }
                        Ok(WsMessage::Ping) => {
                            let pong = serde_json::to_string(&WsMessage::Pong).unwrap_or_default();
                            if ws.send(Message::Text(pong.into())).await.is_err() {
                                return CloseOutcome::Transient { connected: true };
                            }
                        }
                        Ok(WsMessage::Pong) => {}
                        Err(e) => {
                            warn!(error = %e, "display ws: ignoring malformed frame");
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(close_frame))) => {
                        return match close_frame {
                            Some(f) if is_permanent_close(f.code.into()) => CloseOutcome::Permanent,
                            _ => CloseOutcome::Transient { connected: true },
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "display ws: socket error");
                        return CloseOutcome::Transient { connected: true };
                    }
                    None => return CloseOutcome::Transient { connected: true },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_doubles_then_clamps_at_sixty_seconds() {
        let d1 = reconnect_delay(1).as_secs_f64();
        let d2 = reconnect_delay(2).as_secs_f64();
        assert!((0.75..=1.25).contains(&d1));
        assert!((1.5..=2.5).contains(&d2));
        let d_big = reconnect_delay(20).as_secs_f64();
        assert!(d_big <= MAX_BACKOFF_SECONDS * 1.25 + 1e-9);
    }

    #[test]
    fn permanent_close_codes_match_the_frozen_set() {
        assert!(is_permanent_close(4400));
        assert!(is_permanent_close(4403));
        assert!(is_permanent_close(4408));
        assert!(!is_permanent_close(1006));
    }
}
