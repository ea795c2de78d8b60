use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::{CancelSignal, CorrelationId, Result, RpcError};

/// Tracks calls waiting for a reply.
///
/// Maps correlation IDs to oneshot channels. Delivering a reply, cancelling
/// or abandoning a call all remove the entry, so an ID is answered at most
/// once. Cancellation signals attached to a call are tracked alongside so a
/// signal that already fired can be honored at registration time.
#[derive(Default)]
pub(super) struct PendingCalls {
    // ---
    calls: HashMap<CorrelationId, oneshot::Sender<Bytes>>,
    cancellations: HashMap<CorrelationId, CancelSignal>,
}

impl PendingCalls {
    // ---

    /// Register a call waiting for a reply.
    ///
    /// If a cancellation signal attached to `id` already fired, the returned
    /// receiver is closed and nothing is registered.
    pub fn register(&mut self, id: &CorrelationId) -> Result<oneshot::Receiver<Bytes>> {
        // ---
        if self.calls.contains_key(id) {
            return Err(RpcError::DuplicateCorrelation(id.to_string()));
        }

        let (tx, rx) = oneshot::channel();

        let cancelled = self
            .cancellations
            .get(id)
            .is_some_and(CancelSignal::is_cancelled);

        if !cancelled {
            self.calls.insert(id.clone(), tx);
        }
        Ok(rx)
    }

    /// Complete a call with its reply payload.
    ///
    /// Returns true if the ID was pending and the waiter was still listening.
    pub fn complete(&mut self, id: &CorrelationId, payload: Bytes) -> bool {
        // ---
        match self.calls.remove(id) {
            Some(tx) => tx.send(payload).is_ok(),
            None => false,
        }
    }

    /// Remove a call without delivering a reply; its waiter observes a
    /// closed channel.
    pub fn remove(&mut self, id: &CorrelationId) -> bool {
        self.calls.remove(id).is_some()
    }

    pub fn attach_cancellation(&mut self, id: CorrelationId, signal: CancelSignal) {
        self.cancellations.insert(id, signal);
    }

    pub fn detach_cancellation(&mut self, id: &CorrelationId) {
        self.cancellations.remove(id);
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.calls.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }
}
