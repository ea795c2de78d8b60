// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! This module defines the broker-facing interface used by the client and
//! server layers. It intentionally avoids any reference to concrete
//! protocols, brokers, or client libraries.
//!
//! The model follows queue-oriented brokers (AMQP 0-9-1 being the reference):
//!
//! - A [`Connection`] hands out independent channels ([`Transport`]).
//! - Messages are published to a named queue via the default exchange.
//! - Queues are declared explicitly, either by name or broker-named.
//! - Consumers receive [`Delivery`] values and acknowledge them explicitly
//!   unless they asked for automatic acknowledgement.
//!
//! Higher-level semantics such as correlation, method dispatch and timeouts
//! are handled elsewhere. Concrete implementations live under
//! `src/transport/`.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::Result;

/// Content type stamped on every RPC envelope.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A transport address.
///
/// An `Address` names a queue. For the RPC layer it is either a method
/// request queue (`{contract}.{method}`) or a reply queue.
///
/// Addresses are immutable, cheap to clone, and safe to share across threads.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address(pub Arc<str>);

impl Address {
    /// Borrow the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T> From<T> for Address
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Address(value.into())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message envelope.
///
/// An `Envelope` is the unit of transport between producers and consumers.
/// It carries an opaque payload along with the metadata used for reply
/// routing and correlation.
///
/// # Examples
///
/// ## Creating a request envelope
///
/// ```
/// # use queue_rpc::{Envelope, Address};
/// # use bytes::Bytes;
/// # use std::sync::Arc;
/// let envelope = Envelope::request(
///     Address::from("sample.Calculator.sum"),
///     Bytes::from_static(b"[4,3]"),
///     Arc::from("correlation-123"),
///     Address::from("amq.gen-reply"),
/// );
/// assert!(envelope.reply_to.is_some());
/// ```
///
/// ## Creating a response envelope
///
/// ```
/// # use queue_rpc::{Envelope, Address};
/// # use bytes::Bytes;
/// # use std::sync::Arc;
/// let envelope = Envelope::response(
///     Address::from("amq.gen-reply"),
///     Bytes::from_static(b"7"),
///     Arc::from("correlation-123"),
/// );
/// assert!(envelope.reply_to.is_none());
/// ```
#[derive(Clone, Debug)]
pub struct Envelope {
    // ---
    /// Queue the envelope is routed to (routing key on the default exchange).
    pub address: Address,

    /// Opaque payload bytes.
    pub payload: Bytes,

    /// Correlation identifier used to associate requests with responses.
    pub correlation_id: Option<Arc<str>>,

    /// Optional response address.
    ///
    /// When present on a request envelope, the server publishes its reply
    /// to this address.
    pub reply_to: Option<Address>,

    /// Optional content type metadata (e.g., "application/json").
    pub content_type: Option<Arc<str>>,
}

impl Envelope {
    // ---
    /// Create a request envelope.
    pub fn request(
        address: Address,
        payload: Bytes,
        correlation_id: Arc<str>,
        reply_to: Address,
    ) -> Self {
        // ---
        Self {
            address,
            payload,
            correlation_id: Some(correlation_id),
            reply_to: Some(reply_to),
            content_type: Some(Arc::from(JSON_CONTENT_TYPE)),
        }
    }

    /// Create a response envelope.
    pub fn response(address: Address, payload: Bytes, correlation_id: Arc<str>) -> Self {
        // ---
        Self {
            address,
            payload,
            correlation_id: Some(correlation_id),
            reply_to: None,
            content_type: Some(Arc::from(JSON_CONTENT_TYPE)),
        }
    }
}

/// Queue declaration parameters.
///
/// Mirrors the AMQP `queue.declare` flags. A declaration without a name asks
/// the broker to generate a unique one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueDeclaration {
    /// Queue name; `None` lets the broker pick a unique name.
    pub name: Option<Address>,
    /// Survive broker restarts.
    pub durable: bool,
    /// Owned by the declaring channel; removed when it closes.
    pub exclusive: bool,
    /// Removed once the last consumer goes away.
    pub auto_delete: bool,
}

impl QueueDeclaration {
    /// Broker-named, exclusive, auto-deleting queue used for replies.
    pub fn transient() -> Self {
        Self {
            name: None,
            durable: false,
            exclusive: true,
            auto_delete: true,
        }
    }

    /// Named request queue: lives as long as the broker process, shared by
    /// every server instance, never auto-deleted.
    pub fn shared(name: impl Into<Address>) -> Self {
        Self {
            name: Some(name.into()),
            durable: false,
            exclusive: false,
            auto_delete: false,
        }
    }
}

/// Options applied when attaching a consumer to a queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// Deliveries count as acknowledged as soon as they are handed out.
    pub auto_ack: bool,
}

/// Acknowledges a single delivery back to the broker.
#[async_trait::async_trait]
pub trait Acknowledge: Send + Sync {
    /// Confirm successful processing of the delivery.
    async fn ack(&self) -> Result<()>;
}

/// A message delivered to a consumer.
///
/// Deliveries obtained from a consumer created without `auto_ack` remain
/// outstanding until [`ack`](Delivery::ack) is called. Dropping a delivery
/// without acknowledging it leaves the message with the broker, which
/// redelivers it once the consuming channel closes.
pub struct Delivery {
    // ---
    /// The delivered envelope.
    pub envelope: Envelope,

    /// Whether the broker delivered this message before.
    pub redelivered: bool,

    acker: Option<Box<dyn Acknowledge>>,
}

impl Delivery {
    /// Create a delivery. `acker` is `None` for auto-acknowledged consumers.
    pub fn new(envelope: Envelope, redelivered: bool, acker: Option<Box<dyn Acknowledge>>) -> Self {
        Self {
            envelope,
            redelivered,
            acker,
        }
    }

    /// Acknowledge the delivery. A no-op for auto-acknowledged deliveries.
    pub async fn ack(self) -> Result<()> {
        // ---
        match self.acker {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("envelope", &self.envelope)
            .field("redelivered", &self.redelivered)
            .field("manual_ack", &self.acker.is_some())
            .finish()
    }
}

/// Handle returned from a successful `consume()`.
///
/// The consumer remains attached until the handle is dropped or the channel
/// is closed, at which point `inbox.recv()` returns `None`.
pub struct SubscriptionHandle {
    // ---
    /// Receiver for deliveries from the consumed queue.
    pub inbox: mpsc::UnboundedReceiver<Delivery>,
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("closed", &self.inbox.is_closed())
            .finish()
    }
}

/// A broker channel.
///
/// Implementations must ensure that:
/// - Once `consume()` returns successfully, messages published to that queue
///   afterwards are deliverable to the returned inbox.
/// - `publish()` does not wait on consumers.
/// - Publishing to a queue nobody declared is not an error (the message is
///   dropped, as with the AMQP default exchange).
///
/// The in-memory transport serves as the reference implementation of these
/// semantics.
///
/// # Notes
///
/// This trait uses `async_trait`; consumers should treat methods as normal
/// `async fn`s.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Identifier used in log output.
    fn transport_id(&self) -> &str;

    /// Publish an envelope to the queue named by `env.address`.
    async fn publish(&self, env: Envelope) -> Result<()>;

    /// Declare a queue and return its (possibly broker-generated) address.
    async fn declare_queue(&self, decl: QueueDeclaration) -> Result<Address>;

    /// Attach a consumer to a declared queue.
    async fn consume(&self, queue: &Address, opts: ConsumeOptions) -> Result<SubscriptionHandle>;

    /// Close the channel and release any associated resources.
    async fn close(&self) -> Result<()>;
}

/// Shared transport pointer.
///
/// `.clone()` only bumps a reference count; clones share one channel.
pub type TransportPtr = Arc<dyn Transport>;

/// A broker connection able to open independent channels.
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    // ---
    /// Open a new channel on this connection.
    async fn create_channel(&self) -> Result<TransportPtr>;

    /// Close the connection and every channel opened on it.
    async fn close(&self) -> Result<()>;
}

/// Shared connection pointer.
pub type ConnectionPtr = Arc<dyn Connection>;
