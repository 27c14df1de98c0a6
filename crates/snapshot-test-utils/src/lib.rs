// Mock WebSocket client/server pair used by `services/server`'s and
// `clients/kiosk`'s integration tests to exercise the push invalidation
// plane without a real Redis pub/sub backend.

pub mod mock_ws_client;
pub mod mock_ws_server;

pub use mock_ws_client::MockWsClient;
pub use mock_ws_server::MockWsServer;

#[cfg(test)]
mod tests {
    use super::*;
    use display_protocol::WsMessage;

    #[tokio::test]
    async fn server_replies_pong_to_ping() {
        let server = MockWsServer::start().await.unwrap();
        let url = format!("ws://{}", server.local_addr());
        let mut client = MockWsClient::connect(&url).await.unwrap();

        client.send_message(&WsMessage::Ping).await.unwrap();
        let reply = client.recv_message().await;
        assert_eq!(reply, Some(WsMessage::Pong));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn broadcast_invalidate_reaches_all_connected_clients() {
        let server = MockWsServer::start().await.unwrap();
        let url = format!("ws://{}", server.local_addr());
        let mut a = MockWsClient::connect(&url).await.unwrap();
        let mut b = MockWsClient::connect(&url).await.unwrap();

        // Give both accept loops a moment to register before broadcasting.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        server.broadcast_invalidate(42, 7, 1_700_000_000);

        let msg_a = a.recv_message().await;
        let msg_b = b.recv_message().await;
        let expected = WsMessage::Invalidate {
            school_id: 42,
            revision: 7,
            ts: 1_700_000_000,
        };
        assert_eq!(msg_a, Some(expected.clone()));
        assert_eq!(msg_b, Some(expected));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn closing_the_client_does_not_panic_the_server() {
        let server = MockWsServer::start().await.unwrap();
        let url = format!("ws://{}", server.local_addr());
        let mut client = MockWsClient::connect(&url).await.unwrap();
        client.close().await;

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        server.broadcast_invalidate(1, 1, 0);
        server.shutdown().await;
    }
}
