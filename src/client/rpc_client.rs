// src/client/rpc_client.rs
//! RPC client implementation.
//!
//! [`RpcClient`] sends calls for one contract over a single channel and
//! receives replies on a private reply queue.
//!
//! # Architecture
//!
//! On construction the client declares an exclusive reply queue and starts a
//! [`ResponseCorrelator`] listening on it. Each call gets a fresh
//! [`CallProxy`] carrying a new correlation ID; the proxy registers the call,
//! publishes the request to `{contract}.{method}` and waits for the
//! correlator to hand back the matching reply.
//!
//! # Concurrency
//!
//! Multiple calls can be in flight on one client. Each call owns its own
//! proxy, so correlation IDs never collide.
//!
//! # Timeouts
//!
//! Calls wait indefinitely unless [`RpcConfig::call_timeout`] is set or the
//! caller cancels them with a [`CancelSignal`].

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use tokio::time;

use super::correlator::ResponseCorrelator;
use super::proxy::CallProxy;
use crate::{
    // ---
    Address,
    CancelSignal,
    ConnectionPtr,
    Contract,
    CorrelationId,
    Result,
    RpcConfig,
    RpcError,
    TransportPtr,
};

/// Client for contract `C`.
///
/// Cheap to clone (internally `Arc`-backed); clones share the channel and
/// the reply queue. Dropping the last clone closes the channel, which
/// removes the reply queue.
pub struct RpcClient<C: ?Sized> {
    inner: Arc<Inner>,
    _contract: PhantomData<fn(&C)>,
}

struct Inner {
    // ---
    transport: TransportPtr,
    correlator: Arc<ResponseCorrelator>,
    config: RpcConfig,
}

impl<C: ?Sized + Contract> RpcClient<C> {
    // ---
    /// Create a client on an explicitly provided channel.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Transport` if the reply queue cannot be declared
    /// or consumed.
    pub async fn with_transport(transport: TransportPtr, config: RpcConfig) -> Result<Self> {
        // ---
        let correlator =
            ResponseCorrelator::start(&transport, config.reply_queue_name.as_deref()).await?;

        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                correlator,
                config,
            }),
            _contract: PhantomData,
        })
    }

    /// Open a new channel on `connection` and create a client on it.
    pub async fn connect(connection: &ConnectionPtr, config: RpcConfig) -> Result<Self> {
        // ---
        let transport = connection.create_channel().await?;
        Self::with_transport(transport, config).await
    }

    /// A proxy for a single call, with a fresh correlation ID.
    pub fn proxy(&self) -> CallProxy<C> {
        CallProxy::new(
            self.inner.transport.clone(),
            self.inner.correlator.clone(),
            CorrelationId::generate(),
        )
    }

    /// Perform one call through a fresh proxy.
    ///
    /// ```ignore
    /// let sum = client.call(|calc| async move { calc.sum(4, 3).await }).await?;
    /// ```
    ///
    /// # Errors
    ///
    /// Whatever the call returns, or `RpcError::Timeout` when
    /// [`RpcConfig::call_timeout`] elapses first. Without a timeout the call
    /// waits for as long as no reply arrives.
    pub async fn call<F, Fut, R>(&self, call: F) -> Result<R>
    where
        F: FnOnce(CallProxy<C>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        // ---
        let proxy = self.proxy();
        self.bounded(call(proxy)).await
    }

    /// Like [`call`](Self::call), but abandoned with `RpcError::CallCanceled`
    /// as soon as `signal` fires.
    pub async fn call_with_cancel<F, Fut, R>(&self, call: F, signal: &CancelSignal) -> Result<R>
    where
        F: FnOnce(CallProxy<C>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        // ---
        let proxy = self.proxy();
        let _registration = self
            .inner
            .correlator
            .register_cancellation(proxy.correlation_id().clone(), signal.clone());

        self.bounded(call(proxy)).await
    }

    async fn bounded<Fut, R>(&self, fut: Fut) -> Result<R>
    where
        Fut: Future<Output = Result<R>>,
    {
        // ---
        match self.inner.config.call_timeout {
            Some(limit) => time::timeout(limit, fut)
                .await
                .map_err(|_| RpcError::Timeout)?,
            None => fut.await,
        }
    }

    /// The correlator routing replies for this client.
    pub fn correlator(&self) -> &Arc<ResponseCorrelator> {
        &self.inner.correlator
    }

    /// Address of this client's reply queue.
    pub fn reply_to(&self) -> &Address {
        self.inner.correlator.reply_to()
    }

    /// Number of calls waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    /// Close the client's channel. The reply queue goes away with it.
    pub async fn close(&self) -> Result<()> {
        self.inner.transport.close().await
    }
}

impl<C: ?Sized> Clone for RpcClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _contract: PhantomData,
        }
    }
}

impl<C: ?Sized> fmt::Debug for RpcClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("transport", &self.inner.transport.transport_id())
            .field("reply_to", self.inner.correlator.reply_to())
            .field("config", &self.inner.config)
            .finish()
    }
}
