//! Test doubles shared by unit and integration tests

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chat_core::{ConnectionId, EmitError, EmitTarget, EventEmitter, ServerEvent};
use parking_lot::Mutex;

/// `EventEmitter` that records every emit instead of sending it
#[derive(Debug, Default)]
pub struct RecordingEmitter {
    emitted: Mutex<Vec<(EmitTarget, ServerEvent)>>,
    fail_remaining: AtomicUsize,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` emits with a transport error
    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub fn emitted(&self) -> Vec<(EmitTarget, ServerEvent)> {
        self.emitted.lock().clone()
    }

    /// Connections that received an event named `event`
    pub fn connections_for(&self, event: &str) -> Vec<ConnectionId> {
        self.emitted
            .lock()
            .iter()
            .filter(|(_, e)| e.name() == event)
            .filter_map(|(target, _)| match target {
                EmitTarget::Connection { connection_id } => Some(connection_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.emitted.lock().clear();
    }
}

#[async_trait]
impl EventEmitter for RecordingEmitter {
    async fn emit(&self, target: EmitTarget, event: ServerEvent) -> Result<(), EmitError> {
        let failing = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(EmitError::Transport("injected failure".to_string()));
        }
        self.emitted.lock().push((target, event));
        Ok(())
    }
}
