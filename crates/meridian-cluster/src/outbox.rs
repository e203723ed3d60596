//! Per-worker command outbox.
//!
//! Commands are sequence-numbered per worker and redelivered on every
//! heartbeat acknowledgement until the worker acks them. A newer `Assign`
//! replaces a still-pending `Assign` for the same resource, and a `Revoke`
//! replaces anything pending for it. A pending `Revoke` is never replaced
//! by a later `Assign`, so a delete-then-recreate is seen in order.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::proto::{Command, CommandAction};

#[derive(Debug, Default)]
struct WorkerQueue {
    last_seq: u64,
    pending: BTreeMap<u64, CommandAction>,
}

/// Queued coordinator → worker commands.
#[derive(Debug, Default)]
pub struct Outbox {
    queues: Mutex<HashMap<String, WorkerQueue>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a command. Returns its sequence number.
    pub fn push(&self, worker_id: &str, action: CommandAction) -> u64 {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = queues.entry(worker_id.to_string()).or_default();

        let name = action.resource().to_string();
        let new_is_revoke = matches!(action, CommandAction::Revoke { .. });
        queue.pending.retain(|_, existing| {
            if existing.resource() != name {
                return true;
            }
            let existing_is_assign = matches!(existing, CommandAction::Assign(_));
            // Keep the older command unless the new one fully supersedes it.
            !(new_is_revoke || existing_is_assign)
        });

        queue.last_seq += 1;
        let seq = queue.last_seq;
        queue.pending.insert(seq, action);
        debug!(%worker_id, seq, resource = %name, "command queued");
        seq
    }

    /// Drop every command with `seq <= through`.
    pub fn ack(&self, worker_id: &str, through: u64) {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(queue) = queues.get_mut(worker_id) {
            queue.pending.retain(|seq, _| *seq > through);
        }
    }

    /// Unacknowledged commands in sequence order.
    pub fn pending(&self, worker_id: &str) -> Vec<Command> {
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues
            .get(worker_id)
            .map(|q| {
                q.pending
                    .iter()
                    .map(|(seq, action)| Command {
                        seq: *seq,
                        action: action.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn pending_count(&self, worker_id: &str) -> usize {
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues.get(worker_id).map_or(0, |q| q.pending.len())
    }

    /// Discard pending commands after a full-state handoff. The sequence
    /// counter keeps counting; the returned value is the new ack baseline.
    pub fn reset(&self, worker_id: &str) -> u64 {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = queues.entry(worker_id.to_string()).or_default();
        queue.pending.clear();
        queue.last_seq
    }

    /// Forget a worker entirely.
    pub fn drop_worker(&self, worker_id: &str) -> usize {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues.remove(worker_id).map_or(0, |q| q.pending.len())
    }
}
