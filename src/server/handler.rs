use std::sync::Arc;

use crate::transport::runner::TransportConsumer;
use crate::{
    // ---
    log_debug,
    log_error,
    Address,
    CommandDescriptor,
    Contract,
    Delivery,
    Envelope,
    Result,
    RpcError,
    TransportPtr,
};

/// Consumer bound to one method's request queue.
///
/// Every delivery is processed in its own task, so a slow call does not hold
/// up the queue.
pub(super) struct MethodConsumer<C: ?Sized> {
    // ---
    pub queue: Address,
    pub transport: TransportPtr,
    pub implementation: Arc<C>,
}

#[async_trait::async_trait]
impl<C: ?Sized + Contract> TransportConsumer for MethodConsumer<C> {
    // ---
    fn queue(&self) -> Address {
        self.queue.clone()
    }

    async fn handle_delivery(&self, delivery: Delivery) -> Result<()> {
        // ---
        let transport = self.transport.clone();
        let implementation = self.implementation.clone();

        tokio::spawn(async move {
            let address = delivery.envelope.address.clone();
            if let Err(_err) = handle_request(transport, implementation, delivery).await {
                log_error!("request on {address} failed and was left unacknowledged: {_err}");
            }
        });
        Ok(())
    }
}

/// Execute one request: dispatch to the implementation, publish the reply
/// when the caller asked for one, then acknowledge.
///
/// On any error the delivery is dropped without acknowledgement and no reply
/// is sent.
pub(super) async fn handle_request<C>(
    transport: TransportPtr,
    implementation: Arc<C>,
    delivery: Delivery,
) -> Result<()>
where
    C: ?Sized + Contract,
{
    // ---
    let env = delivery.envelope.clone();

    let command = CommandDescriptor::from_address::<C>(&env.address)?;
    let reply = implementation.dispatch(&command, env.payload).await?;

    match env.reply_to {
        Some(reply_to) => {
            let correlation_id = env.correlation_id.ok_or_else(|| {
                RpcError::InvalidEnvelope(format!(
                    "request on {} has reply_to but no correlation id",
                    env.address
                ))
            })?;
            transport
                .publish(Envelope::response(reply_to, reply, correlation_id))
                .await?;
        }
        None => log_debug!("request on {} expects no reply", env.address),
    }

    delivery.ack().await
}
