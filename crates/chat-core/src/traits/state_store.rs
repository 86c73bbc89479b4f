//! Shared state store port
//!
//! All cross-instance facts (who is connected where, who is online) live
//! behind this trait. Mutations are expressed as a [`StoreBatch`] and applied
//! atomically by the adapter; reads are individual commands.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::StoreError;

/// Result type for state store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A single mutation inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    SetAdd { key: String, member: String },
    SetRemove { key: String, member: String },
    HashSetAll { key: String, fields: Vec<(String, String)> },
    Delete { key: String },
    Increment { key: String },
    Decrement { key: String },
    Set { key: String, value: String, ttl: Option<Duration> },
    ListPush { key: String, value: String },
}

/// Precondition checked atomically with a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreGuard {
    /// The key holds a live value
    Exists(String),
    /// The key is absent or expired
    Missing(String),
    /// The list at the key does not contain the value
    NotInList { key: String, value: String },
}

impl StoreGuard {
    pub fn exists(key: impl Into<String>) -> Self {
        Self::Exists(key.into())
    }

    pub fn missing(key: impl Into<String>) -> Self {
        Self::Missing(key.into())
    }

    pub fn not_in_list(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::NotInList {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Key the guard reads
    pub fn key(&self) -> &str {
        match self {
            Self::Exists(key) | Self::Missing(key) | Self::NotInList { key, .. } => key,
        }
    }
}

/// Ordered list of mutations applied as one unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreBatch {
    ops: Vec<StoreOp>,
}

impl StoreBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sadd(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.ops.push(StoreOp::SetAdd {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn srem(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.ops.push(StoreOp::SetRemove {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn hset_all(mut self, key: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        self.ops.push(StoreOp::HashSetAll {
            key: key.into(),
            fields,
        });
        self
    }

    pub fn del(mut self, key: impl Into<String>) -> Self {
        self.ops.push(StoreOp::Delete { key: key.into() });
        self
    }

    pub fn incr(mut self, key: impl Into<String>) -> Self {
        self.ops.push(StoreOp::Increment { key: key.into() });
        self
    }

    pub fn decr(mut self, key: impl Into<String>) -> Self {
        self.ops.push(StoreOp::Decrement { key: key.into() });
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(StoreOp::Set {
            key: key.into(),
            value: value.into(),
            ttl: None,
        });
        self
    }

    /// Set a string value that expires after `ttl`
    pub fn set_ex(mut self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) -> Self {
        self.ops.push(StoreOp::Set {
            key: key.into(),
            value: value.into(),
            ttl: Some(ttl),
        });
        self
    }

    pub fn rpush(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(StoreOp::ListPush {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<StoreOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Apply every op in the batch atomically (all or nothing, no interleaving)
    async fn apply(&self, batch: StoreBatch) -> StoreResult<()>;

    /// Apply the batch atomically only if `guard` holds at that moment.
    /// Returns whether it was applied; a failed guard writes nothing.
    async fn apply_if(&self, guard: StoreGuard, batch: StoreBatch) -> StoreResult<bool>;

    /// Members of a set; empty when the key does not exist
    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Cardinality of a set; 0 when the key does not exist
    async fn scard(&self, key: &str) -> StoreResult<u64>;

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// All fields of a hash; empty when the key does not exist
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Inclusive range of a list, negative indexes count from the end
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>>;

    /// Round-trip to the store; used by readiness checks
    async fn ping(&self) -> StoreResult<()>;
}
