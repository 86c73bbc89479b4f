//! Cross-instance event distribution

mod broadcaster;

pub use broadcaster::{BroadcastEnvelope, ClusterBroadcaster};
