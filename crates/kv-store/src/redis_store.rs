use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tracing::warn;

use crate::store::{KvError, KvStore};

/// Production [`KvStore`] implementation backed by Redis (or a
/// Redis-protocol-compatible service). Holds a multiplexed connection that
/// Redis' client reconnects transparently; pub/sub subscriptions each get
/// their own dedicated connection, since a subscribed connection cannot
/// also issue regular commands.
pub struct RedisKvStore {
    client: redis::Client,
    commands: ConnectionManager,
}

impl RedisKvStore {
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client =
            redis::Client::open(url).map_err(|e| KvError::Unavailable(e.to_string()))?;
        let commands = client
            .get_connection_manager()
            .await
            .map_err(|e| KvError::Unavailable(e.to_string()))?;
        Ok(Self { client, commands })
    }
}

fn map_err(e: redis::RedisError) -> KvError {
    KvError::Unavailable(e.to_string())
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let mut conn = self.commands.clone();
        conn.get(key).await.map_err(map_err)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError> {
        let mut conn = self.commands.clone();
        match ttl {
            Some(ttl) => conn
                .set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                .await
                .map_err(map_err),
            None => conn.set::<_, _, ()>(key, value).await.map_err(map_err),
        }
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, KvError> {
        let mut conn = self.commands.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(reply.is_some())
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        let mut conn = self.commands.clone();
        conn.incr(key, 1).await.map_err(map_err)
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.commands.clone();
        conn.del::<_, ()>(key).await.map_err(map_err)
    }

    /// Cursor-based `SCAN`, not `KEYS`: `KEYS` walks the whole keyspace in
    /// one blocking call on Redis' single-threaded event loop, which is
    /// exactly the wrong thing to do from `serve_stale_or_wait`'s
    /// stale-fallback lookup, the one path meant to survive a stampede.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let mut conn = self.commands.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(map_err)?;
            keys.extend(batch);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }
        Ok(keys)
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), KvError> {
        let mut conn = self.commands.clone();
        conn.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(map_err)
    }

    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<Vec<u8>>, KvError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(map_err)?;
        pubsub.subscribe(channel).await.map_err(map_err)?;

        let (tx, rx) = broadcast::channel(256);
        let channel = channel.to_owned();
        tokio::spawn(async move {
            use futures_util::StreamExt;
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: Vec<u8> = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "dropping undecodable pubsub message");
                        continue;
                    }
                };
                if tx.send(payload).is_err() {
                    // No subscribers left; keep draining so redis doesn't
                    // back up, the task exits once the stream ends.
                    continue;
                }
            }
        });
        Ok(rx)
    }
}
