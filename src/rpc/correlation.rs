//! Correlation table: pending RPC calls by correlation id.
//!
//! Each call opens a single-use wait slot. The slot is removed exactly once:
//! by the reply that resolves it, or by the [`PendingReply`] guard when the
//! call times out, fails to publish, or is dropped.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::message::Params;

#[derive(Clone, Default)]
pub struct CorrelationTable {
    slots: Arc<DashMap<String, oneshot::Sender<Params>>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a wait slot for `id`. Returns `None` if one is already open.
    pub fn open(&self, id: impl Into<String>) -> Option<PendingReply> {
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        match self.slots.entry(id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(tx);
                Some(PendingReply {
                    id,
                    rx,
                    table: self.clone(),
                })
            }
        }
    }

    /// Hand `reply` to the waiter for `id`. Returns false when no one is
    /// waiting (late, duplicate, or unknown reply).
    pub fn resolve(&self, id: &str, reply: Params) -> bool {
        match self.slots.remove(id) {
            Some((_, tx)) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// Remove the slot for `id`. Idempotent.
    pub fn remove(&self, id: &str) {
        self.slots.remove(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// The waiting side of one slot. Dropping it removes the slot.
pub struct PendingReply {
    id: String,
    rx: oneshot::Receiver<Params>,
    table: CorrelationTable,
}

impl PendingReply {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the reply. `None` on timeout.
    pub async fn wait(mut self, timeout: Duration) -> Option<Params> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(reply)) => Some(reply),
            _ => None,
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}
