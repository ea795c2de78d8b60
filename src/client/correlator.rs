// src/client/correlator.rs

//! Reply correlation.
//!
//! Every client owns one reply queue. Outgoing requests carry the queue's
//! address in `reply_to` and a fresh correlation ID; replies arriving on the
//! queue are routed back to the waiting call by that ID.
//!
//! The registry is a plain map guarded by a std mutex. Operations are a
//! single insert or remove, so the lock is never held across an await.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::pending::PendingCalls;
use crate::transport::runner::{self, TransportConsumer};
use crate::{
    // ---
    log_debug,
    log_warn,
    Address,
    CancelSignal,
    ConsumeOptions,
    CorrelationId,
    Delivery,
    QueueDeclaration,
    Result,
    TransportPtr,
};

/// Acquire a mutex guard, ignoring poisoning.
///
/// The registry holds no invariants spanning entries; the worst outcome of
/// a panic mid-update is one orphaned reply.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Receiving end of a registered call.
pub type Awaiter = oneshot::Receiver<Bytes>;

/// Matches replies on the client's reply queue to waiting calls.
pub struct ResponseCorrelator {
    // ---
    reply_to: Address,
    pending: Mutex<PendingCalls>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl ResponseCorrelator {
    // ---
    /// Declare the reply queue on `transport` and start listening on it.
    ///
    /// With `reply_queue` unset the broker names the queue. Either way the
    /// queue is exclusive to this channel and consumed with automatic
    /// acknowledgement.
    pub async fn start(transport: &TransportPtr, reply_queue: Option<&str>) -> Result<Arc<Self>> {
        // ---
        let decl = match reply_queue {
            Some(name) => QueueDeclaration {
                name: Some(Address::from(name)),
                ..QueueDeclaration::transient()
            },
            None => QueueDeclaration::transient(),
        };
        let reply_to = transport.declare_queue(decl).await?;

        let correlator = Arc::new(Self::detached(reply_to.clone()));

        let listener = ReplyListener {
            queue: reply_to,
            correlator: Arc::downgrade(&correlator),
        };
        let handle = runner::run(transport.clone(), listener).await?;
        *lock_ignore_poison(&correlator.listener) = Some(handle);

        log_debug!(
            "{}: listening for replies on {}",
            transport.transport_id(),
            correlator.reply_to
        );
        Ok(correlator)
    }

    /// A correlator with no listener attached; replies are fed through
    /// [`on_reply_delivered`](Self::on_reply_delivered).
    pub fn detached(reply_to: Address) -> Self {
        Self {
            reply_to,
            pending: Mutex::new(PendingCalls::default()),
            listener: Mutex::new(None),
        }
    }

    /// Address of the reply queue.
    pub fn reply_to(&self) -> &Address {
        &self.reply_to
    }

    /// Register a call and return the receiver its reply is delivered to.
    ///
    /// Fails with `DuplicateCorrelation` if `id` is already pending. If a
    /// cancellation registered for `id` already fired, the receiver is
    /// returned closed.
    pub fn create_awaiter(&self, id: &CorrelationId) -> Result<Awaiter> {
        lock_ignore_poison(&self.pending).register(id)
    }

    /// Route a reply to its waiting call.
    ///
    /// Replies for unknown or already-completed IDs are dropped. Returns
    /// whether a waiter received the payload.
    pub fn on_reply_delivered(&self, id: &CorrelationId, payload: Bytes) -> bool {
        // ---
        let delivered = lock_ignore_poison(&self.pending).complete(id, payload);
        if !delivered {
            log_debug!("dropping reply for unknown or abandoned call (correlation_id: {id})");
        }
        delivered
    }

    /// Abandon a pending call. Its waiter fails with `CallCanceled`.
    pub fn cancel(&self, id: &CorrelationId) -> bool {
        lock_ignore_poison(&self.pending).remove(id)
    }

    /// Tie `signal` to the call identified by `id`.
    ///
    /// When the signal fires the call is cancelled. The association lasts
    /// until the returned registration is dropped.
    pub fn register_cancellation(
        self: &Arc<Self>,
        id: CorrelationId,
        signal: CancelSignal,
    ) -> CancellationRegistration {
        // ---
        lock_ignore_poison(&self.pending).attach_cancellation(id.clone(), signal.clone());

        let weak = Arc::downgrade(self);
        let watched = id.clone();
        let watcher = tokio::spawn(async move {
            signal.cancelled().await;
            if let Some(correlator) = weak.upgrade() {
                correlator.cancel(&watched);
            }
        });

        CancellationRegistration {
            correlator: Arc::downgrade(self),
            id,
            watcher,
        }
    }

    /// Whether `id` is still waiting for a reply.
    pub fn is_pending(&self, id: &CorrelationId) -> bool {
        lock_ignore_poison(&self.pending).contains(id)
    }

    /// Number of calls waiting for a reply.
    pub fn pending_count(&self) -> usize {
        lock_ignore_poison(&self.pending).len()
    }
}

impl Drop for ResponseCorrelator {
    fn drop(&mut self) {
        if let Some(handle) = lock_ignore_poison(&self.listener).take() {
            handle.abort();
        }
    }
}

/// Keeps a cancellation signal tied to a call. Dropping it detaches the
/// signal.
pub struct CancellationRegistration {
    // ---
    correlator: Weak<ResponseCorrelator>,
    id: CorrelationId,
    watcher: JoinHandle<()>,
}

impl Drop for CancellationRegistration {
    fn drop(&mut self) {
        // ---
        self.watcher.abort();
        if let Some(correlator) = self.correlator.upgrade() {
            lock_ignore_poison(&correlator.pending).detach_cancellation(&self.id);
        }
    }
}

/// Reply queue consumer feeding the correlator.
///
/// Holds a weak reference so the listener never keeps a dropped client alive.
struct ReplyListener {
    queue: Address,
    correlator: Weak<ResponseCorrelator>,
}

#[async_trait::async_trait]
impl TransportConsumer for ReplyListener {
    // ---
    fn queue(&self) -> Address {
        self.queue.clone()
    }

    fn consume_options(&self) -> ConsumeOptions {
        ConsumeOptions { auto_ack: true }
    }

    async fn handle_delivery(&self, delivery: Delivery) -> Result<()> {
        // ---
        let Some(correlator) = self.correlator.upgrade() else {
            return Ok(());
        };

        let env = delivery.envelope;
        match env.correlation_id {
            Some(id) => {
                correlator.on_reply_delivered(&CorrelationId::from(id), env.payload);
            }
            None => log_warn!("reply on {} without correlation id dropped", self.queue),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::RpcError;
    use std::time::Duration;

    fn correlator() -> Arc<ResponseCorrelator> {
        Arc::new(ResponseCorrelator::detached(Address::from("amq.gen-test")))
    }

    #[tokio::test]
    async fn test_reply_reaches_awaiter() {
        // ---
        let correlator = correlator();
        let id = CorrelationId::generate();

        let awaiter = correlator.create_awaiter(&id).unwrap();
        assert!(correlator.on_reply_delivered(&id, Bytes::from("42")));

        assert_eq!(awaiter.await.unwrap(), Bytes::from("42"));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_second_reply_is_ignored() {
        // ---
        let correlator = correlator();
        let id = CorrelationId::generate();

        let _awaiter = correlator.create_awaiter(&id).unwrap();
        assert!(correlator.on_reply_delivered(&id, Bytes::from("1")));
        assert!(!correlator.on_reply_delivered(&id, Bytes::from("2")));
    }

    #[tokio::test]
    async fn test_duplicate_awaiter_rejected() {
        // ---
        let correlator = correlator();
        let id = CorrelationId::generate();

        let _awaiter = correlator.create_awaiter(&id).unwrap();
        assert!(matches!(
            correlator.create_awaiter(&id),
            Err(RpcError::DuplicateCorrelation(_))
        ));
    }

    #[tokio::test]
    async fn test_signal_cancels_pending_call() {
        // ---
        let correlator = correlator();
        let id = CorrelationId::generate();
        let signal = CancelSignal::new();

        let _registration = correlator.register_cancellation(id.clone(), signal.clone());
        let awaiter = correlator.create_awaiter(&id).unwrap();

        signal.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), awaiter)
            .await
            .expect("awaiter not released");
        assert!(result.is_err());
        assert!(!correlator.is_pending(&id));

        // Late reply after cancellation goes nowhere
        assert!(!correlator.on_reply_delivered(&id, Bytes::from("late")));
    }

    #[tokio::test]
    async fn test_signal_fired_before_registration() {
        // ---
        let correlator = correlator();
        let id = CorrelationId::generate();
        let signal = CancelSignal::new();
        signal.cancel();

        let _registration = correlator.register_cancellation(id.clone(), signal);
        let awaiter = correlator.create_awaiter(&id).unwrap();

        assert!(awaiter.await.is_err());
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_registration_detaches_signal() {
        // ---
        let correlator = correlator();
        let id = CorrelationId::generate();
        let signal = CancelSignal::new();

        let registration = correlator.register_cancellation(id.clone(), signal.clone());
        drop(registration);

        let _awaiter = correlator.create_awaiter(&id).unwrap();
        signal.cancel();
        tokio::task::yield_now().await;

        assert!(correlator.is_pending(&id));
    }
}
