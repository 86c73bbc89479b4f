//! Ports - interfaces the domain needs from infrastructure

mod clock;
mod emitter;
mod state_store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use emitter::{EmitTarget, EventEmitter};
pub use state_store::{StateStore, StoreBatch, StoreGuard, StoreOp, StoreResult};
