//! `StateStore` adapters.

mod memory_store;
mod redis_store;

pub use memory_store::InMemoryStateStore;
pub use redis_store::RedisStateStore;
