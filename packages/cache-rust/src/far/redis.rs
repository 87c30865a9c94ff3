//! Redis-backed [`FarStore`] implementation.
//!
//! All commands flow through one shared multiplexed
//! [`ConnectionManager`]; pub/sub runs on a dedicated connection per
//! subscription with bounded, backed-off reconnection. The mutex primitives
//! use server-side Lua for compare-and-delete / compare-and-expire, since a
//! naive get-then-delete would race with expiry and takeover.

use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tokio::sync::watch;

use super::{FarResult, FarStore, FarStoreError, MessageHandler, Subscription};

/// Reconnection attempts before a subscription task gives up.
const RECONNECT_MAX_ATTEMPTS: u32 = 10;
/// Base delay between reconnection attempts; doubles per attempt.
const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(500);
/// Ceiling on the reconnection backoff.
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

const COMPARE_AND_DELETE_SCRIPT: &str =
    r#"if redis.call("get", KEYS[1]) == ARGV[1] then return redis.call("del", KEYS[1]) else return 0 end"#;

const COMPARE_AND_EXPIRE_SCRIPT: &str =
    r#"if redis.call("get", KEYS[1]) == ARGV[1] then return redis.call("pexpire", KEYS[1], ARGV[2]) else return 0 end"#;

fn classify(err: redis::RedisError) -> FarStoreError {
    if err.is_timeout() {
        return FarStoreError::Timeout(err.to_string());
    }
    if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
        return FarStoreError::Connection(err.to_string());
    }
    match err.kind() {
        redis::ErrorKind::IoError => FarStoreError::Connection(err.to_string()),
        _ => FarStoreError::Response(err.to_string()),
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    RECONNECT_BASE_DELAY
        .saturating_mul(factor)
        .min(RECONNECT_MAX_DELAY)
}

/// Far store over a Redis-compatible server.
pub struct RedisFarStore {
    client: redis::Client,
    connection: ConnectionManager,
}

impl RedisFarStore {
    /// Connects to the server at `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> FarResult<Self> {
        let client = redis::Client::open(url).map_err(classify)?;
        let connection = ConnectionManager::new(client.clone())
            .await
            .map_err(classify)?;
        Ok(Self { client, connection })
    }

    fn conn(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

#[async_trait]
impl FarStore for RedisFarStore {
    async fn get(&self, key: &str) -> FarResult<Option<Bytes>> {
        let mut conn = self.conn();
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(classify)?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> FarResult<()> {
        let mut conn = self.conn();
        match ttl {
            Some(ttl) => {
                let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
                let _: () = conn
                    .pset_ex(key, &value[..], millis)
                    .await
                    .map_err(classify)?;
            }
            None => {
                let _: () = conn.set(key, &value[..]).await.map_err(classify)?;
            }
        }
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> FarResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        let removed: u64 = conn.del(keys.to_vec()).await.map_err(classify)?;
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> FarResult<bool> {
        let mut conn = self.conn();
        let millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1);
        let set: bool = conn.pexpire(key, millis).await.map_err(classify)?;
        Ok(set)
    }

    async fn hash_set(&self, key: &str, field: &str, value: Bytes) -> FarResult<()> {
        let mut conn = self.conn();
        let _: () = conn.hset(key, field, &value[..]).await.map_err(classify)?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> FarResult<Option<Bytes>> {
        let mut conn = self.conn();
        let value: Option<Vec<u8>> = conn.hget(key, field).await.map_err(classify)?;
        Ok(value.map(Bytes::from))
    }

    async fn hash_get_all(&self, key: &str) -> FarResult<Vec<(String, Bytes)>> {
        let mut conn = self.conn();
        let all: Vec<(String, Vec<u8>)> = conn.hgetall(key).await.map_err(classify)?;
        Ok(all
            .into_iter()
            .map(|(field, value)| (field, Bytes::from(value)))
            .collect())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> FarResult<bool> {
        let mut conn = self.conn();
        let removed: i64 = conn.hdel(key, field).await.map_err(classify)?;
        Ok(removed > 0)
    }

    async fn list_push_back(&self, key: &str, value: Bytes) -> FarResult<u64> {
        let mut conn = self.conn();
        let len: u64 = conn.rpush(key, &value[..]).await.map_err(classify)?;
        Ok(len)
    }

    async fn list_pop_front(&self, key: &str) -> FarResult<Option<Bytes>> {
        let mut conn = self.conn();
        let value: Option<Vec<u8>> = conn
            .lpop(key, None::<NonZeroUsize>)
            .await
            .map_err(classify)?;
        Ok(value.map(Bytes::from))
    }

    async fn list_len(&self, key: &str) -> FarResult<u64> {
        let mut conn = self.conn();
        let len: u64 = conn.llen(key).await.map_err(classify)?;
        Ok(len)
    }

    async fn set_add(&self, key: &str, member: Bytes) -> FarResult<bool> {
        let mut conn = self.conn();
        let added: i64 = conn.sadd(key, &member[..]).await.map_err(classify)?;
        Ok(added > 0)
    }

    async fn set_remove(&self, key: &str, member: Bytes) -> FarResult<bool> {
        let mut conn = self.conn();
        let removed: i64 = conn.srem(key, &member[..]).await.map_err(classify)?;
        Ok(removed > 0)
    }

    async fn set_members(&self, key: &str) -> FarResult<Vec<Bytes>> {
        let mut conn = self.conn();
        let members: Vec<Vec<u8>> = conn.smembers(key).await.map_err(classify)?;
        Ok(members.into_iter().map(Bytes::from).collect())
    }

    async fn sorted_set_add(&self, key: &str, member: Bytes, score: f64) -> FarResult<bool> {
        let mut conn = self.conn();
        let added: i64 = conn.zadd(key, &member[..], score).await.map_err(classify)?;
        Ok(added > 0)
    }

    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> FarResult<Vec<Bytes>> {
        let mut conn = self.conn();
        let members: Vec<Vec<u8>> = conn.zrangebyscore(key, min, max).await.map_err(classify)?;
        Ok(members.into_iter().map(Bytes::from).collect())
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> FarResult<u64> {
        let mut conn = self.conn();
        let receivers: u64 = conn.publish(channel, &payload[..]).await.map_err(classify)?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> FarResult<Subscription> {
        let client = self.client.clone();
        let channel_name = channel.to_string();

        // Establish the first subscription eagerly so immediate failures
        // surface to the caller instead of dying silently in the task.
        let mut pubsub = client.get_async_pubsub().await.map_err(classify)?;
        pubsub.subscribe(&channel_name).await.map_err(classify)?;

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut current = Some(pubsub);
            let mut attempts = 0u32;
            loop {
                let mut pubsub = match current.take() {
                    Some(pubsub) => pubsub,
                    None => {
                        attempts += 1;
                        if attempts > RECONNECT_MAX_ATTEMPTS {
                            tracing::error!(
                                channel = %channel_name,
                                attempts,
                                "giving up on pub/sub reconnection"
                            );
                            return;
                        }
                        tokio::select! {
                            _ = shutdown_rx.changed() => return,
                            () = tokio::time::sleep(backoff_delay(attempts)) => {}
                        }
                        let reconnected = match client.get_async_pubsub().await {
                            Ok(mut pubsub) => match pubsub.subscribe(&channel_name).await {
                                Ok(()) => Some(pubsub),
                                Err(err) => {
                                    tracing::warn!(
                                        channel = %channel_name,
                                        error = %err,
                                        "pub/sub resubscribe failed"
                                    );
                                    None
                                }
                            },
                            Err(err) => {
                                tracing::warn!(
                                    channel = %channel_name,
                                    error = %err,
                                    "pub/sub reconnect failed"
                                );
                                None
                            }
                        };
                        match reconnected {
                            Some(pubsub) => {
                                attempts = 0;
                                pubsub
                            }
                            None => continue,
                        }
                    }
                };

                let mut stream = pubsub.on_message();
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => return,
                        message = stream.next() => match message {
                            Some(message) => match message.get_payload::<Vec<u8>>() {
                                Ok(payload) => handler(Bytes::from(payload)),
                                Err(err) => {
                                    tracing::warn!(error = %err, "undecodable pub/sub payload");
                                }
                            },
                            // Stream ended: the connection dropped.
                            None => break,
                        },
                    }
                }
            }
        });

        Ok(Subscription::new(shutdown_tx, task))
    }

    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> FarResult<bool> {
        let mut conn = self.conn();
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&value[..])
            .arg("NX")
            .arg("PX")
            .arg(millis)
            .query_async(&mut conn)
            .await
            .map_err(classify)?;
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: Bytes) -> FarResult<bool> {
        let mut conn = self.conn();
        let deleted: i64 = Script::new(COMPARE_AND_DELETE_SCRIPT)
            .key(key)
            .arg(&expected[..])
            .invoke_async(&mut conn)
            .await
            .map_err(classify)?;
        Ok(deleted > 0)
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: Bytes,
        ttl: Duration,
    ) -> FarResult<bool> {
        let mut conn = self.conn();
        let millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1);
        let extended: i64 = Script::new(COMPARE_AND_EXPIRE_SCRIPT)
            .key(key)
            .arg(&expected[..])
            .arg(millis)
            .invoke_async(&mut conn)
            .await
            .map_err(classify)?;
        Ok(extended > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_classify_as_connection() {
        let err = redis::RedisError::from((redis::ErrorKind::IoError, "broken pipe"));
        assert!(matches!(classify(err), FarStoreError::Connection(_)));
    }

    #[test]
    fn response_errors_classify_as_response() {
        let err = redis::RedisError::from((redis::ErrorKind::ResponseError, "WRONGTYPE"));
        assert!(matches!(classify(err), FarStoreError::Response(_)));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_secs(1));
        assert_eq!(backoff_delay(3), Duration::from_secs(2));
        assert_eq!(backoff_delay(30), Duration::from_secs(30));
    }
}
