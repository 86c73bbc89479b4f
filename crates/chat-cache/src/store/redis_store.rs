//! Redis-backed shared state store.
//!
//! Batches are sent as a single `MULTI`/`EXEC` pipeline so the registry's
//! multi-key updates are applied without interleaving. Guarded batches
//! `WATCH` the guard key, check it, and retry when `EXEC` is aborted by a
//! concurrent write.

use async_trait::async_trait;
use chat_core::{StateStore, StoreBatch, StoreError, StoreGuard, StoreOp, StoreResult};
use redis::AsyncCommands;
use std::collections::HashMap;

use crate::pool::{RedisPool, RedisPoolError};

/// `StateStore` over a pooled Redis connection
#[derive(Debug, Clone)]
pub struct RedisStateStore {
    pool: RedisPool,
}

impl RedisStateStore {
    #[must_use]
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }

    async fn conn(&self) -> StoreResult<deadpool_redis::Connection> {
        self.pool.get().await.map_err(|e| store_error(e, ""))
    }

    /// Evaluate a guard on a connection that is already watching its key
    async fn guard_holds(conn: &mut deadpool_redis::Connection, guard: &StoreGuard) -> StoreResult<bool> {
        let key = guard.key();
        match guard {
            StoreGuard::Exists(_) => conn.exists(key).await.map_err(|e| store_error(e, key)),
            StoreGuard::Missing(_) => conn
                .exists(key)
                .await
                .map(|exists: bool| !exists)
                .map_err(|e| store_error(e, key)),
            StoreGuard::NotInList { value, .. } => {
                let position: Option<i64> = redis::cmd("LPOS")
                    .arg(key)
                    .arg(value)
                    .query_async(conn)
                    .await
                    .map_err(|e| store_error(e, key))?;
                Ok(position.is_none())
            }
        }
    }
}

/// Optimistic transaction retries before giving up
const MAX_GUARDED_ATTEMPTS: usize = 16;

/// Translate a pool/Redis failure into the port's error type
fn store_error(err: impl Into<RedisPoolError>, key: &str) -> StoreError {
    let err = err.into();
    if err.is_connection_error() {
        return StoreError::Unavailable(err.to_string());
    }
    match &err {
        RedisPoolError::Redis(e) if e.code() == Some("WRONGTYPE") => StoreError::WrongType {
            key: key.to_string(),
        },
        _ => StoreError::Command(err.to_string()),
    }
}

/// Append one op to an atomic pipeline
fn push_op(pipe: &mut redis::Pipeline, op: &StoreOp) {
    match op {
        StoreOp::SetAdd { key, member } => {
            pipe.sadd(key, member).ignore();
        }
        StoreOp::SetRemove { key, member } => {
            pipe.srem(key, member).ignore();
        }
        StoreOp::HashSetAll { key, fields } => {
            if !fields.is_empty() {
                pipe.hset_multiple(key, fields.as_slice()).ignore();
            }
        }
        StoreOp::Delete { key } => {
            pipe.del(key).ignore();
        }
        StoreOp::Increment { key } => {
            pipe.incr(key, 1).ignore();
        }
        StoreOp::Decrement { key } => {
            pipe.decr(key, 1).ignore();
        }
        StoreOp::Set { key, value, ttl } => match ttl {
            Some(ttl) => {
                let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
                pipe.pset_ex(key, value, millis).ignore();
            }
            None => {
                pipe.set(key, value).ignore();
            }
        },
        StoreOp::ListPush { key, value } => {
            pipe.rpush(key, value).ignore();
        }
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn apply(&self, batch: StoreBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in batch.ops() {
            push_op(&mut pipe, op);
        }

        let mut conn = self.conn().await?;
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| store_error(e, "<batch>"))?;

        tracing::trace!(ops = batch.len(), "Applied state batch");
        Ok(())
    }

    async fn apply_if(&self, guard: StoreGuard, batch: StoreBatch) -> StoreResult<bool> {
        let key = guard.key();
        let mut conn = self.conn().await?;

        for attempt in 1..=MAX_GUARDED_ATTEMPTS {
            redis::cmd("WATCH")
                .arg(key)
                .query_async::<()>(&mut conn)
                .await
                .map_err(|e| store_error(e, key))?;

            if !Self::guard_holds(&mut conn, &guard).await? {
                redis::cmd("UNWATCH")
                    .query_async::<()>(&mut conn)
                    .await
                    .map_err(|e| store_error(e, key))?;
                return Ok(false);
            }

            let mut pipe = redis::pipe();
            pipe.atomic();
            for op in batch.ops() {
                push_op(&mut pipe, op);
            }
            // EXEC replies nil when the watched key changed underneath us
            let applied: Option<()> = pipe
                .query_async(&mut conn)
                .await
                .map_err(|e| store_error(e, "<batch>"))?;
            if applied.is_some() {
                tracing::trace!(ops = batch.len(), key, "Applied guarded state batch");
                return Ok(true);
            }
            tracing::debug!(key, attempt, "Guarded batch raced a concurrent write, retrying");
        }

        Err(StoreError::Command(format!(
            "guarded batch on {key} aborted {MAX_GUARDED_ATTEMPTS} times"
        )))
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn().await?;
        conn.smembers(key).await.map_err(|e| store_error(e, key))
    }

    async fn scard(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        conn.scard(key).await.map_err(|e| store_error(e, key))
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        conn.sismember(key, member)
            .await
            .map_err(|e| store_error(e, key))
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.conn().await?;
        conn.hgetall(key).await.map_err(|e| store_error(e, key))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        conn.get(key).await.map_err(|e| store_error(e, key))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        conn.exists(key).await.map_err(|e| store_error(e, key))
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        let mut conn = self.conn().await?;
        conn.lrange(key, start as isize, stop as isize)
            .await
            .map_err(|e| store_error(e, key))
    }

    async fn ping(&self) -> StoreResult<()> {
        self.pool.health_check().await.map_err(|e| store_error(e, ""))
    }
}
