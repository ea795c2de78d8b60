//! Transport execution runner.
//!
//! This module provides the glue between a [`Transport`](crate::Transport)
//! channel and the roles consuming from it: per-method request consumers on
//! the server, the reply listener on the client.
//!
//! The runner is responsible for:
//! - attaching a consumer to the queue the role names
//! - driving a receive loop over the consumer inbox
//! - consolidating logging and error handling for inbound deliveries
//!
//! It does not define RPC semantics or acknowledgement policy; consumers
//! decide when (and whether) to ack a delivery.
//!
//! ## Receive loop
//!
//! [`run`] spawns a task that waits for incoming deliveries. When the channel
//! closes or the consumer is cancelled, the inbox ends and the loop exits.
//!
//! ## Error handling
//!
//! Errors returned by [`TransportConsumer::handle_delivery`] are logged and
//! do not terminate the loop. One bad message must not stop a queue.

use tokio::task::JoinHandle;

use crate::{
    // ---
    log_debug,
    log_warn,
    Address,
    ConsumeOptions,
    Delivery,
    Result,
    TransportPtr,
};

/// A consumer of queue deliveries.
#[async_trait::async_trait]
pub(crate) trait TransportConsumer: Send + Sync {
    /// The (already declared) queue to consume from.
    fn queue(&self) -> Address;

    fn consume_options(&self) -> ConsumeOptions {
        ConsumeOptions::default()
    }

    /// Handle a single delivery.
    ///
    /// Returning an error does not terminate the receive loop.
    async fn handle_delivery(&self, delivery: Delivery) -> Result<()>;
}

/// Attach `consumer` to its queue and start the receive loop.
///
/// Returns once the consumer is attached, so anything published to the
/// queue afterwards reaches it. Aborting the returned handle stops the loop.
pub(crate) async fn run<T>(transport: TransportPtr, consumer: T) -> Result<JoinHandle<()>>
where
    T: TransportConsumer + 'static,
{
    // ---
    let queue = consumer.queue();
    let mut handle = transport
        .consume(&queue, consumer.consume_options())
        .await?;

    let transport_id = transport.transport_id().to_string();

    let join = tokio::spawn(async move {
        // ---
        while let Some(delivery) = handle.inbox.recv().await {
            if let Err(_err) = consumer.handle_delivery(delivery).await {
                log_warn!("{transport_id}: consumer error on {queue}: {_err}");
            }
        }
        log_debug!("{transport_id}: consumer on {queue} stopped");
    });

    Ok(join)
}
