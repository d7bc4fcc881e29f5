use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

use super::keys::{self, SCHEDULE_INDEX};
use super::traits::{DistributedLock, RecordFields, ScheduleStore};
use crate::error::StoreResult;

const LOCK_VALUE: &str = "locked";

/// Redis-backed store shared by dispatchers across processes and hosts.
///
/// Records are hashes under `message:{id}`, the delivery index is the sorted
/// set `scheduled_messages`, and locks are `SET lock:{id} locked NX PX ttl`.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to the Redis server at `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(url, "connected to redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl ScheduleStore for RedisStore {
    async fn insert(&self, id: &str, fields: &RecordFields, score: i64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let pairs: Vec<(&str, &str)> = fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let () = redis::pipe()
            .atomic()
            .hset_multiple(keys::record_key(id), &pairs)
            .ignore()
            .zadd(SCHEDULE_INDEX, id, score)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn range_by_score(&self, min: i64, max: i64) -> StoreResult<Vec<String>> {
        if min > max {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.zrangebyscore(SCHEDULE_INDEX, min, max).await?;
        Ok(ids)
    }

    async fn get_records(&self, ids: &[String]) -> StoreResult<Vec<Option<RecordFields>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for id in ids {
            pipe.hgetall(keys::record_key(id));
        }
        let hashes: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;
        // HGETALL on a missing key yields an empty hash.
        Ok(hashes
            .into_iter()
            .map(|hash| if hash.is_empty() { None } else { Some(hash) })
            .collect())
    }

    async fn remove(&self, id: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let () = redis::pipe()
            .atomic()
            .zrem(SCHEDULE_INDEX, id)
            .ignore()
            .del(keys::record_key(id))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DistributedLock for RedisStore {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(LOCK_VALUE)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}

/// These tests need a live server. They return early unless `REDIS_URL` is
/// set, e.g. `REDIS_URL=redis://127.0.0.1:6379 cargo test --features redis`.
#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn test_store() -> Option<RedisStore> {
        let url = std::env::var("REDIS_URL").ok().filter(|u| !u.is_empty())?;
        Some(RedisStore::connect(&url).await.unwrap())
    }

    fn unique(prefix: &str) -> String {
        format!("{prefix}-{}", Uuid::now_v7())
    }

    /// A score window no other test or producer writes to.
    fn unique_score() -> i64 {
        -(Uuid::now_v7().as_u128() as i64 & 0x0000_ffff_ffff_ffff) - 1_000_000
    }

    fn fields(message: &str, timestamp: i64) -> RecordFields {
        RecordFields::from([
            ("message".to_string(), message.to_string()),
            ("timestamp".to_string(), timestamp.to_string()),
        ])
    }

    #[tokio::test]
    async fn lock_is_conditional_on_absence() {
        let Some(store) = test_store().await else {
            return;
        };
        let a = keys::lock_key(unique("a"));
        let b = keys::lock_key(unique("b"));
        let ttl = Duration::from_secs(5);

        assert!(store.try_acquire(&a, ttl).await.unwrap());
        assert!(!store.try_acquire(&a, ttl).await.unwrap());
        assert!(store.try_acquire(&b, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_can_be_taken() {
        let Some(store) = test_store().await else {
            return;
        };
        let key = keys::lock_key(unique("ttl"));

        assert!(store
            .try_acquire(&key, Duration::from_millis(50))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store
            .try_acquire(&key, Duration::from_secs(5))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn range_and_get_records_round_the_index() {
        let Some(store) = test_store().await else {
            return;
        };
        let base = unique_score();
        let early = unique("early");
        let late = unique("late");
        store.insert(&late, &fields("late", base + 2), base + 2).await.unwrap();
        store.insert(&early, &fields("early", base + 1), base + 1).await.unwrap();

        let ids = store.range_by_score(base, base + 2).await.unwrap();
        assert_eq!(ids, vec![early.clone(), late.clone()]);
        assert!(store.range_by_score(base + 3, base).await.unwrap().is_empty());

        let missing = unique("missing");
        let records = store
            .get_records(&[late.clone(), missing, early.clone()])
            .await
            .unwrap();
        assert_eq!(records[0].as_ref().unwrap()["message"], "late");
        assert!(records[1].is_none());
        assert_eq!(records[2].as_ref().unwrap()["message"], "early");

        store.remove(&early).await.unwrap();
        store.remove(&late).await.unwrap();
    }

    #[tokio::test]
    async fn remove_clears_both_structures_and_is_idempotent() {
        let Some(store) = test_store().await else {
            return;
        };
        let score = unique_score();
        let id = unique("gone");
        store.insert(&id, &fields("x", score), score).await.unwrap();
        assert_eq!(store.range_by_score(score, score).await.unwrap(), vec![id.clone()]);

        store.remove(&id).await.unwrap();
        assert!(store.range_by_score(score, score).await.unwrap().is_empty());
        let records = store.get_records(std::slice::from_ref(&id)).await.unwrap();
        assert!(records[0].is_none());

        store.remove(&id).await.unwrap();
    }
}
