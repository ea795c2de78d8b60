// src/client/proxy.rs

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::correlator::ResponseCorrelator;
use crate::{
    // ---
    log_warn,
    CommandDescriptor,
    Contract,
    CorrelationId,
    Envelope,
    Result,
    RpcError,
    TransportPtr,
};

/// Client-side stand-in for a contract.
///
/// A proxy is created per call by [`RpcClient::call`](crate::RpcClient::call)
/// and carries that call's correlation ID. Contracts declared with
/// [`rpc_contract!`](crate::rpc_contract) implement their trait for
/// `CallProxy<dyn Trait>`, so methods are invoked as on a local object.
pub struct CallProxy<C: ?Sized> {
    // ---
    transport: TransportPtr,
    correlator: Arc<ResponseCorrelator>,
    correlation_id: CorrelationId,
    _contract: PhantomData<fn(&C)>,
}

/// Cancels the pending entry if the call does not run to completion,
/// including when the calling future is dropped mid-await.
struct PendingGuard<'a> {
    correlator: &'a ResponseCorrelator,
    id: &'a CorrelationId,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.correlator.cancel(self.id);
        }
    }
}

impl<C: ?Sized + Contract> CallProxy<C> {
    // ---
    pub(crate) fn new(
        transport: TransportPtr,
        correlator: Arc<ResponseCorrelator>,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            transport,
            correlator,
            correlation_id,
            _contract: PhantomData,
        }
    }

    /// Correlation ID stamped on this call's request.
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Send `method` with `args` (a tuple in parameter order) and wait for
    /// the reply.
    ///
    /// The call is registered with the correlator before the request is
    /// built, so a reply can never outrun its registration. A call that is
    /// cancelled before publishing never reaches the server.
    ///
    /// # Errors
    ///
    /// - `Resolution` if the contract has no such method
    /// - `DuplicateCorrelation` if this proxy already has a call in flight
    /// - `Serialization` if the arguments or the reply cannot be (de)serialized
    /// - `Transport` if publishing the request fails
    /// - `CallCanceled` if the call is cancelled before a reply arrives
    pub async fn invoke<A, R>(&self, method: &str, args: A) -> Result<R>
    where
        A: Serialize + Send,
        R: DeserializeOwned,
    {
        // ---
        let awaiter = self.correlator.create_awaiter(&self.correlation_id)?;
        let mut guard = PendingGuard {
            correlator: &self.correlator,
            id: &self.correlation_id,
            armed: true,
        };

        let command = CommandDescriptor::for_method::<C>(method)?;
        let payload = command.serialize_request(&args)?;

        let env = Envelope::request(
            command.address().clone(),
            payload,
            self.correlation_id.as_shared(),
            self.correlator.reply_to().clone(),
        );

        // Not registered (or already abandoned): the request must not go out.
        if !self.correlator.is_pending(&self.correlation_id) {
            return Err(RpcError::CallCanceled);
        }

        if let Err(err) = self.transport.publish(env).await {
            log_warn!(
                "{}: publishing {} failed: {err}",
                self.transport.transport_id(),
                command.address()
            );
            return Err(err);
        }

        let reply = awaiter.await;
        guard.disarm();

        let body = reply.map_err(|_| RpcError::CallCanceled)?;
        command.decode_reply(&body)
    }
}

impl<C: ?Sized> fmt::Debug for CallProxy<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallProxy")
            .field("transport", &self.transport.transport_id())
            .field("correlation_id", &self.correlation_id)
            .field("reply_to", self.correlator.reply_to())
            .finish()
    }
}
