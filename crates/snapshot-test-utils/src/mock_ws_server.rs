use std::net::SocketAddr;
use std::sync::Arc;

use display_protocol::WsMessage;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tokio_tungstenite::tungstenite::protocol::Message;

/// A minimal WS server standing in for the push invalidation plane in
/// client-side tests: replies `pong` to `ping` and fans out whatever is
/// passed to [`broadcast_invalidate`] to every connected socket. Does not
/// implement auth/binding — that is exercised against the real server in
/// `services/server`'s own integration tests.
///
/// [`broadcast_invalidate`]: MockWsServer::broadcast_invalidate
pub struct MockWsServer {
    addr: SocketAddr,
    tx: broadcast::Sender<WsMessage>,
    shutdown: Arc<Mutex<Option<tokio::sync::oneshot::Sender<()>>>>,
}

impl MockWsServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, _rx) = broadcast::channel(256);
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();

        let accept_tx = tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _peer)) = accepted else { break };
                        let conn_rx = accept_tx.subscribe();
                        tokio::spawn(handle_connection(stream, conn_rx));
                    }
                }
            }
        });

        Ok(Self {
            addr,
            tx,
            shutdown: Arc::new(Mutex::new(Some(shutdown_tx))),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn broadcast_invalidate(&self, school_id: i64, revision: i64, ts: i64) {
        let _ = self.tx.send(WsMessage::Invalidate {
            school_id,
            revision,
            ts,
        });
    }

    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown.lock().await.take() {
            let _ = tx.send(());
        }
    }
}

async fn handle_connection(stream: tokio::net::TcpStream, mut events: broadcast::Receiver<WsMessage>) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    loop {
        tokio::select! {
            incoming = ws.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(WsMessage::Ping) = serde_json::from_str::<WsMessage>(&text) {
                            let reply = serde_json::to_string(&WsMessage::Pong).unwrap();
                            if ws.send(Message::Text(reply.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            event = events.recv() => {
                match event {
                    Ok(msg) => {
                        let text = serde_json::to_string(&msg).unwrap();
                        if ws.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}
