//! In-process state store.
//!
//! Mirrors the Redis semantics the registry and presence tracker rely on
//! (empty sets disappear, counters start at zero, expiring strings) so the
//! whole delivery path can run without a Redis server. Expiry is driven by
//! the injected [`Clock`].

use async_trait::async_trait;
use chat_core::{
    Clock, StateStore, StoreBatch, StoreError, StoreGuard, StoreOp, StoreResult, SystemClock,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(BTreeSet<String>),
    Hash(HashMap<String, String>),
    List(Vec<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }
}

type Data = HashMap<String, Entry>;

/// `StateStore` held entirely in memory
#[derive(Debug, Clone)]
pub struct InMemoryStateStore {
    data: Arc<Mutex<Data>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            data: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Remaining time to live of a key, if it has one
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        let mut data = self.data.lock();
        purge_expired(&mut data, key, now);
        let expires_at = data.get(key)?.expires_at?;
        (expires_at - now).to_std().ok()
    }

    /// Number of live keys
    pub fn key_count(&self) -> usize {
        let now = self.clock.now();
        let data = self.data.lock();
        data.values()
            .filter(|e| !e.expires_at.is_some_and(|at| at <= now))
            .count()
    }

    fn read<T>(&self, key: &str, f: impl FnOnce(Option<&Value>) -> StoreResult<T>) -> StoreResult<T> {
        let now = self.clock.now();
        let mut data = self.data.lock();
        purge_expired(&mut data, key, now);
        f(data.get(key).map(|e| &e.value))
    }
}

fn purge_expired(data: &mut Data, key: &str, now: DateTime<Utc>) {
    let expired = data
        .get(key)
        .and_then(|e| e.expires_at)
        .is_some_and(|at| at <= now);
    if expired {
        data.remove(key);
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
    }
}

fn set_mut<'a>(data: &'a mut Data, key: &str) -> StoreResult<&'a mut BTreeSet<String>> {
    let entry = data
        .entry(key.to_string())
        .or_insert_with(|| Entry::new(Value::Set(BTreeSet::new())));
    match &mut entry.value {
        Value::Set(set) => Ok(set),
        _ => Err(wrong_type(key)),
    }
}

fn add_to_counter(data: &mut Data, key: &str, delta: i64) -> StoreResult<()> {
    let entry = data
        .entry(key.to_string())
        .or_insert_with(|| Entry::new(Value::Str("0".to_string())));
    let Value::Str(raw) = &mut entry.value else {
        return Err(wrong_type(key));
    };
    let current: i64 = raw.parse().map_err(|_| StoreError::Corrupt {
        key: key.to_string(),
        reason: "value is not an integer".to_string(),
    })?;
    *raw = (current + delta).to_string();
    Ok(())
}

fn apply_op(data: &mut Data, op: &StoreOp, now: DateTime<Utc>) -> StoreResult<()> {
    match op {
        StoreOp::SetAdd { key, member } => {
            purge_expired(data, key, now);
            set_mut(data, key)?.insert(member.clone());
        }
        StoreOp::SetRemove { key, member } => {
            purge_expired(data, key, now);
            let now_empty = match data.get_mut(key).map(|e| &mut e.value) {
                None => false,
                Some(Value::Set(set)) => {
                    set.remove(member);
                    set.is_empty()
                }
                Some(_) => return Err(wrong_type(key)),
            };
            if now_empty {
                data.remove(key);
            }
        }
        StoreOp::HashSetAll { key, fields } => {
            purge_expired(data, key, now);
            if fields.is_empty() {
                return Ok(());
            }
            let entry = data
                .entry(key.clone())
                .or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));
            let Value::Hash(hash) = &mut entry.value else {
                return Err(wrong_type(key));
            };
            for (field, value) in fields {
                hash.insert(field.clone(), value.clone());
            }
        }
        StoreOp::Delete { key } => {
            data.remove(key);
        }
        StoreOp::Increment { key } => {
            purge_expired(data, key, now);
            add_to_counter(data, key, 1)?;
        }
        StoreOp::Decrement { key } => {
            purge_expired(data, key, now);
            add_to_counter(data, key, -1)?;
        }
        StoreOp::Set { key, value, ttl } => {
            let expires_at = match ttl {
                Some(ttl) => {
                    let ttl = chrono::Duration::from_std(*ttl)
                        .map_err(|_| StoreError::Command(format!("ttl out of range for {key}")))?;
                    Some(now + ttl)
                }
                None => None,
            };
            data.insert(
                key.clone(),
                Entry {
                    value: Value::Str(value.clone()),
                    expires_at,
                },
            );
        }
        StoreOp::ListPush { key, value } => {
            purge_expired(data, key, now);
            let entry = data
                .entry(key.clone())
                .or_insert_with(|| Entry::new(Value::List(Vec::new())));
            let Value::List(list) = &mut entry.value else {
                return Err(wrong_type(key));
            };
            list.push(value.clone());
        }
    }
    Ok(())
}

fn guard_holds(data: &mut Data, guard: &StoreGuard, now: DateTime<Utc>) -> StoreResult<bool> {
    purge_expired(data, guard.key(), now);
    let value = data.get(guard.key()).map(|e| &e.value);
    match guard {
        StoreGuard::Exists(_) => Ok(value.is_some()),
        StoreGuard::Missing(_) => Ok(value.is_none()),
        StoreGuard::NotInList { key, value: wanted } => match value {
            None => Ok(true),
            Some(Value::List(list)) => Ok(!list.contains(wanted)),
            Some(_) => Err(wrong_type(key)),
        },
    }
}

fn apply_all(data: &mut Data, batch: &StoreBatch, now: DateTime<Utc>) -> StoreResult<()> {
    // All or nothing: apply to a scratch copy and swap on success
    let mut scratch = data.clone();
    for op in batch.ops() {
        apply_op(&mut scratch, op, now)?;
    }
    *data = scratch;
    Ok(())
}

/// Resolve Redis-style inclusive, possibly negative, list bounds
fn list_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = i64::try_from(len).ok()?;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn apply(&self, batch: StoreBatch) -> StoreResult<()> {
        let now = self.clock.now();
        let mut data = self.data.lock();
        apply_all(&mut data, &batch, now)
    }

    async fn apply_if(&self, guard: StoreGuard, batch: StoreBatch) -> StoreResult<bool> {
        let now = self.clock.now();
        let mut data = self.data.lock();
        if !guard_holds(&mut data, &guard, now)? {
            return Ok(false);
        }
        apply_all(&mut data, &batch, now)?;
        Ok(true)
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.read(key, |value| match value {
            None => Ok(Vec::new()),
            Some(Value::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn scard(&self, key: &str) -> StoreResult<u64> {
        self.read(key, |value| match value {
            None => Ok(0),
            Some(Value::Set(set)) => Ok(set.len() as u64),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.read(key, |value| match value {
            None => Ok(false),
            Some(Value::Set(set)) => Ok(set.contains(member)),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.read(key, |value| match value {
            None => Ok(HashMap::new()),
            Some(Value::Hash(hash)) => Ok(hash.clone()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.read(key, |value| match value {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.read(key, |value| Ok(value.is_some()))
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        self.read(key, |value| match value {
            None => Ok(Vec::new()),
            Some(Value::List(list)) => Ok(list_range(list.len(), start, stop)
                .map(|(from, to)| list[from..=to].to_vec())
                .unwrap_or_default()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
