//! In-memory transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `Connection` and `Transport` traits. It is intended primarily for testing,
//! local execution, and as a reference for transport semantics.
//!
//! ## Reference Semantics
//!
//! The in-memory transport defines the **reference behavior** for the transport
//! layer. Broker-backed transports are expected to approximate this behavior and
//! to document any unavoidable deviations. It models a queue broker reached
//! through the default exchange:
//!
//! - Publishing routes an envelope to the queue whose name equals its address.
//!   Publishing to an undeclared queue silently drops the envelope.
//! - A queue with several consumers hands each message to exactly one of them
//!   (round-robin). Messages published while no consumer is attached wait in
//!   the queue's backlog.
//! - Deliveries from a manual-ack consumer stay outstanding until acknowledged.
//!   When the consuming channel closes, outstanding deliveries are requeued and
//!   flagged as redelivered.
//! - Exclusive queues belong to the declaring channel and disappear with it.
//!
//! ## Non-Goals
//!
//! Persistence, network failure simulation, prefetch limits, exchanges other
//! than the default one.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    // ---
    log_debug,
    log_info,
    Acknowledge,
    Address,
    Connection,
    ConnectionPtr,
    ConsumeOptions,
    Delivery,
    Envelope,
    QueueDeclaration,
    Result,
    RpcError,
    SubscriptionHandle,
    Transport,
    TransportPtr,
};

/// Acquire mutex guard, ignoring poisoning.
///
/// The hub state has no invariants that a panicking holder could leave half
/// applied in a way worse than a dropped message.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct Consumer {
    channel: u64,
    auto_ack: bool,
    tx: mpsc::UnboundedSender<Delivery>,
}

struct Outstanding {
    channel: u64,
    envelope: Envelope,
}

#[derive(Default)]
struct Queue {
    exclusive_owner: Option<u64>,
    auto_delete: bool,
    consumers: Vec<Consumer>,
    cursor: usize,
    backlog: VecDeque<(Envelope, bool)>,
    unacked: HashMap<u64, Outstanding>,
}

#[derive(Default)]
struct HubState {
    queues: HashMap<Arc<str>, Queue>,
    next_tag: u64,
}

/// Hand `env` to the next live consumer of `queue`, or park it in the backlog.
fn dispatch(
    hub: &Weak<MemoryHub>,
    name: &Arc<str>,
    queue: &mut Queue,
    next_tag: &mut u64,
    env: Envelope,
    redelivered: bool,
) {
    // ---
    loop {
        if queue.consumers.is_empty() {
            queue.backlog.push_back((env, redelivered));
            return;
        }

        let idx = queue.cursor % queue.consumers.len();
        queue.cursor = idx + 1;

        let consumer = &queue.consumers[idx];
        *next_tag += 1;
        let tag = *next_tag;

        let acker: Option<Box<dyn Acknowledge>> = if consumer.auto_ack {
            None
        } else {
            Some(Box::new(MemoryAcker {
                hub: hub.clone(),
                queue: name.clone(),
                tag,
            }))
        };

        let channel = consumer.channel;
        let auto_ack = consumer.auto_ack;

        match consumer.tx.send(Delivery::new(env.clone(), redelivered, acker)) {
            Ok(()) => {
                if !auto_ack {
                    queue.unacked.insert(
                        tag,
                        Outstanding {
                            channel,
                            envelope: env,
                        },
                    );
                }
                return;
            }
            Err(_) => {
                // SubscriptionHandle dropped; detach and try the next consumer.
                queue.consumers.remove(idx);
            }
        }
    }
}

/// Shared message bus for the in-memory transport.
///
/// Simulates a queue broker within a single process. All channels opened from
/// connections sharing a `MemoryHub` can publish to and consume from the same
/// queues, exactly as clients connected to a real broker would.
///
/// The inspection helpers (`has_queue`, `consumer_count`, ...) exist for tests.
///
/// ```
/// # use queue_rpc::{MemoryHub, create_memory_connection_with_hub};
/// # async fn example() -> queue_rpc::Result<()> {
/// let hub = MemoryHub::new();
/// let server_conn = create_memory_connection_with_hub("server", hub.clone());
/// let client_conn = create_memory_connection_with_hub("client", hub.clone());
/// # Ok(())
/// # }
/// ```
pub struct MemoryHub {
    // ---
    state: Mutex<HubState>,
    next_channel: AtomicU64,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether a queue with this name is currently declared.
    pub fn has_queue(&self, name: &str) -> bool {
        lock_ignore_poison(&self.state).queues.contains_key(name)
    }

    /// Names of all declared queues.
    pub fn queue_names(&self) -> Vec<String> {
        let state = lock_ignore_poison(&self.state);
        let mut names: Vec<String> = state.queues.keys().map(|k| k.to_string()).collect();
        names.sort();
        names
    }

    /// Number of live consumers attached to a queue.
    pub fn consumer_count(&self, name: &str) -> usize {
        let state = lock_ignore_poison(&self.state);
        state
            .queues
            .get(name)
            .map(|q| q.consumers.iter().filter(|c| !c.tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Number of delivered but not yet acknowledged messages on a queue.
    pub fn unacked_count(&self, name: &str) -> usize {
        let state = lock_ignore_poison(&self.state);
        state.queues.get(name).map(|q| q.unacked.len()).unwrap_or(0)
    }

    /// Number of messages waiting for a consumer.
    pub fn queue_depth(&self, name: &str) -> usize {
        let state = lock_ignore_poison(&self.state);
        state.queues.get(name).map(|q| q.backlog.len()).unwrap_or(0)
    }

    fn open_channel(&self) -> u64 {
        self.next_channel.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn publish(self: &Arc<Self>, transport_id: &str, env: Envelope) {
        // ---
        let weak = Arc::downgrade(self);
        let mut state = lock_ignore_poison(&self.state);
        let HubState { queues, next_tag } = &mut *state;

        let name = env.address.0.clone();
        let Some(queue) = queues.get_mut(&name) else {
            log_debug!("{transport_id}: no queue {name}, dropping envelope");
            return;
        };

        log_debug!("{transport_id}: publish to {name}");
        dispatch(&weak, &name, queue, next_tag, env, false);
    }

    fn declare(&self, channel: u64, decl: QueueDeclaration) -> Result<Address> {
        // ---
        let name: Arc<str> = match decl.name {
            Some(address) => address.0,
            None => Arc::from(format!("amq.gen-{}", Uuid::new_v4().simple())),
        };

        let mut state = lock_ignore_poison(&self.state);

        if let Some(existing) = state.queues.get(&name) {
            if let Some(owner) = existing.exclusive_owner {
                if owner != channel {
                    return Err(RpcError::Transport(format!(
                        "memory: queue {name} is exclusive to another channel"
                    )));
                }
            }
            return Ok(Address(name));
        }

        state.queues.insert(
            name.clone(),
            Queue {
                exclusive_owner: decl.exclusive.then_some(channel),
                auto_delete: decl.auto_delete,
                ..Queue::default()
            },
        );

        Ok(Address(name))
    }

    fn consume(
        self: &Arc<Self>,
        channel: u64,
        queue_addr: &Address,
        opts: ConsumeOptions,
    ) -> Result<SubscriptionHandle> {
        // ---
        let weak = Arc::downgrade(self);
        let mut state = lock_ignore_poison(&self.state);
        let HubState { queues, next_tag } = &mut *state;

        let name = queue_addr.0.clone();
        let Some(queue) = queues.get_mut(&name) else {
            return Err(RpcError::Transport(format!(
                "memory: no queue {name} to consume from"
            )));
        };

        let (tx, rx) = mpsc::unbounded_channel();
        queue.consumers.push(Consumer {
            channel,
            auto_ack: opts.auto_ack,
            tx,
        });

        let parked: Vec<_> = queue.backlog.drain(..).collect();
        for (env, redelivered) in parked {
            dispatch(&weak, &name, queue, next_tag, env, redelivered);
        }

        Ok(SubscriptionHandle { inbox: rx })
    }

    fn ack(&self, queue: &str, tag: u64) -> Result<()> {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        let removed = state
            .queues
            .get_mut(queue)
            .and_then(|q| q.unacked.remove(&tag));

        match removed {
            Some(_) => Ok(()),
            None => Err(RpcError::Transport(format!(
                "memory: unknown delivery tag {tag} on {queue}"
            ))),
        }
    }

    fn close_channel(self: &Arc<Self>, transport_id: &str, channel: u64) {
        // ---
        log_debug!("{transport_id}: closing channel...");

        let weak = Arc::downgrade(self);
        let mut state = lock_ignore_poison(&self.state);
        let HubState { queues, next_tag } = &mut *state;

        let mut dead = Vec::new();

        for (name, queue) in queues.iter_mut() {
            let had_consumers = !queue.consumers.is_empty();
            queue.consumers.retain(|c| c.channel != channel);

            if queue.exclusive_owner == Some(channel)
                || (queue.auto_delete && had_consumers && queue.consumers.is_empty())
            {
                dead.push(name.clone());
                continue;
            }

            let mut returned: Vec<(u64, Envelope)> = Vec::new();
            queue.unacked.retain(|tag, outstanding| {
                if outstanding.channel == channel {
                    returned.push((*tag, outstanding.envelope.clone()));
                    false
                } else {
                    true
                }
            });
            returned.sort_by_key(|(tag, _)| *tag);

            for (_, env) in returned {
                dispatch(&weak, name, queue, next_tag, env, true);
            }
        }

        for name in dead {
            log_debug!("{transport_id}: deleting queue {name}");
            queues.remove(&name);
        }
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        // ---
        Self {
            state: Mutex::new(HubState::default()),
            next_channel: AtomicU64::new(0),
        }
    }
}

struct MemoryAcker {
    hub: Weak<MemoryHub>,
    queue: Arc<str>,
    tag: u64,
}

#[async_trait::async_trait]
impl Acknowledge for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        match self.hub.upgrade() {
            Some(hub) => hub.ack(&self.queue, self.tag),
            None => Err(RpcError::Transport("memory: hub dropped".into())),
        }
    }
}

/// Process-global hub used by [`create_memory_connection`].
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// One channel on a [`MemoryHub`].
struct MemoryTransport {
    // ---
    transport_id: String,
    channel: u64,
    hub: Arc<MemoryHub>,
    closed: AtomicBool,
}

impl MemoryTransport {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::Transport(format!(
                "memory: channel {} is closed",
                self.transport_id
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn transport_id(&self) -> &str {
        &self.transport_id
    }

    async fn publish(&self, env: Envelope) -> Result<()> {
        self.ensure_open()?;
        self.hub.publish(&self.transport_id, env);
        Ok(())
    }

    async fn declare_queue(&self, decl: QueueDeclaration) -> Result<Address> {
        self.ensure_open()?;
        self.hub.declare(self.channel, decl)
    }

    async fn consume(&self, queue: &Address, opts: ConsumeOptions) -> Result<SubscriptionHandle> {
        self.ensure_open()?;
        log_debug!("{}: consume {queue} (auto_ack: {})", self.transport_id, opts.auto_ack);
        self.hub.consume(self.channel, queue, opts)
    }

    /// Close the channel.
    ///
    /// Detaches this channel's consumers, requeues its unacknowledged
    /// deliveries and deletes the queues it exclusively owns.
    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.hub.close_channel(&self.transport_id, self.channel);
        }
        Ok(())
    }
}

/// A channel dropped without `close()` is closed by its last owner, like a
/// broker reclaiming the channel of a vanished client.
impl Drop for MemoryTransport {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.hub.close_channel(&self.transport_id, self.channel);
        }
    }
}

/// In-memory broker connection.
///
/// Tracks its channels weakly; owners decide how long a channel lives.
struct MemoryConnection {
    // ---
    name: String,
    hub: Arc<MemoryHub>,
    channels: Mutex<Vec<Weak<MemoryTransport>>>,
}

#[async_trait::async_trait]
impl Connection for MemoryConnection {
    async fn create_channel(&self) -> Result<TransportPtr> {
        // ---
        let channel = self.hub.open_channel();
        let transport = Arc::new(MemoryTransport {
            transport_id: format!("{}#{channel}", self.name),
            channel,
            hub: self.hub.clone(),
            closed: AtomicBool::new(false),
        });

        log_debug!("{}: channel opened", transport.transport_id);
        let mut channels = lock_ignore_poison(&self.channels);
        channels.retain(|c| c.strong_count() > 0);
        channels.push(Arc::downgrade(&transport));
        drop(channels);

        Ok(transport)
    }

    async fn close(&self) -> Result<()> {
        // ---
        let channels: Vec<_> = lock_ignore_poison(&self.channels)
            .drain(..)
            .filter_map(|c| c.upgrade())
            .collect();
        for channel in channels {
            channel.close().await?;
        }
        log_info!("{}: memory connection closed", self.name);
        Ok(())
    }
}

/// Create an in-memory connection on the process-global hub.
///
/// All connections created with this function share a single message bus,
/// matching the semantics of clients connected to one broker. For isolated
/// parallel testing, use [`create_memory_connection_with_hub`].
pub fn create_memory_connection(name: impl Into<String>) -> ConnectionPtr {
    create_memory_connection_with_hub(name, global_hub())
}

/// Create an in-memory connection on the provided hub.
pub fn create_memory_connection_with_hub(
    name: impl Into<String>,
    hub: Arc<MemoryHub>,
) -> ConnectionPtr {
    // ---
    let name = name.into();
    log_debug!("{name}: create memory connection");

    Arc::new(MemoryConnection {
        name,
        hub,
        channels: Mutex::new(Vec::new()),
    })
}
