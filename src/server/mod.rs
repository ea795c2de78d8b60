// src/server/mod.rs
//! RPC server implementation.
//!
//! An [`RpcServer`] exposes one implementation of contract `C`. Starting it
//! declares one shared request queue per contract method
//! (`{contract}.{method}`) and attaches a consumer to each.
//!
//! Requests are processed concurrently; each one is dispatched to the
//! implementation, answered on the caller's `reply_to` queue with the
//! request's correlation ID, and acknowledged only after the reply went out.
//! A request that fails anywhere along the way stays unacknowledged and no
//! reply is sent.
//!
//! Several servers (in one process or many) may serve the same contract; the
//! broker distributes requests among them.

mod handler;

use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;

use crate::transport::runner;
use crate::{
    // ---
    log_info,
    Address,
    CommandDescriptor,
    ConnectionPtr,
    Contract,
    QueueDeclaration,
    Result,
    RpcError,
    TransportPtr,
};
use handler::MethodConsumer;

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Server for contract `C`.
pub struct RpcServer<C: ?Sized> {
    // ---
    transport: TransportPtr,
    implementation: Arc<C>,
    started: AtomicBool,
    consumers: Mutex<Vec<JoinHandle<()>>>,
    _contract: PhantomData<fn(&C)>,
}

impl<C: ?Sized + Contract> RpcServer<C> {
    // ---
    /// Create a server on an explicitly provided channel.
    pub fn with_transport(transport: TransportPtr, implementation: Arc<C>) -> Self {
        Self {
            transport,
            implementation,
            started: AtomicBool::new(false),
            consumers: Mutex::new(Vec::new()),
            _contract: PhantomData,
        }
    }

    /// Open a new channel on `connection` and create a server on it.
    pub async fn connect(connection: &ConnectionPtr, implementation: Arc<C>) -> Result<Self> {
        // ---
        let transport = connection.create_channel().await?;
        Ok(Self::with_transport(transport, implementation))
    }

    /// Descriptors for every method of `C`.
    ///
    /// # Errors
    ///
    /// `RpcError::DuplicateAddress` if two methods map to the same address.
    pub fn commands() -> Result<Vec<CommandDescriptor>> {
        // ---
        let mut seen = HashSet::new();
        let mut commands = Vec::with_capacity(C::METHODS.len());

        for method in C::METHODS {
            let command = CommandDescriptor::from_spec::<C>(method);
            if !seen.insert(command.address().clone()) {
                return Err(RpcError::DuplicateAddress(command.address().to_string()));
            }
            commands.push(command);
        }
        Ok(commands)
    }

    /// Request queue addresses served by this server.
    pub fn addresses() -> Result<Vec<Address>> {
        Ok(Self::commands()?
            .into_iter()
            .map(|command| command.address().clone())
            .collect())
    }

    /// Declare the request queues and begin consuming.
    ///
    /// Method addresses are validated before anything is declared, so a
    /// contract with duplicate method names leaves the broker untouched.
    ///
    /// # Errors
    ///
    /// - `RpcError::DuplicateAddress` for an invalid contract
    /// - `RpcError::AlreadyStarted` if the server is already running
    /// - `RpcError::Transport` if declaring or consuming a queue fails; any
    ///   consumers attached so far are stopped and the server can be started
    ///   again
    pub async fn start(&self) -> Result<()> {
        // ---
        let commands = Self::commands()?;

        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RpcError::AlreadyStarted);
        }

        let mut consumers = Vec::with_capacity(commands.len());
        for command in &commands {
            match self.bind(command).await {
                Ok(handle) => consumers.push(handle),
                Err(err) => {
                    for handle in consumers {
                        handle.abort();
                    }
                    self.started.store(false, Ordering::Release);
                    return Err(err);
                }
            }
        }
        lock_ignore_poison(&self.consumers).extend(consumers);

        log_info!(
            "{}: serving {} ({} methods)",
            self.transport.transport_id(),
            C::NAME,
            commands.len()
        );
        Ok(())
    }

    async fn bind(&self, command: &CommandDescriptor) -> Result<JoinHandle<()>> {
        // ---
        let queue = self
            .transport
            .declare_queue(QueueDeclaration::shared(command.address().clone()))
            .await?;

        let consumer = MethodConsumer {
            queue,
            transport: self.transport.clone(),
            implementation: self.implementation.clone(),
        };
        runner::run(self.transport.clone(), consumer).await
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// The served implementation.
    pub fn implementation(&self) -> &Arc<C> {
        &self.implementation
    }

    /// Stop consuming and close the server's channel.
    ///
    /// Requests received but not yet acknowledged go back to the queue.
    pub async fn shutdown(&self) -> Result<()> {
        // ---
        self.abort_consumers();
        self.started.store(false, Ordering::Release);
        self.transport.close().await?;

        log_info!("{}: stopped serving {}", self.transport.transport_id(), C::NAME);
        Ok(())
    }
}

impl<C: ?Sized> RpcServer<C> {
    fn abort_consumers(&self) {
        for handle in lock_ignore_poison(&self.consumers).drain(..) {
            handle.abort();
        }
    }
}

impl<C: ?Sized> Drop for RpcServer<C> {
    fn drop(&mut self) {
        self.abort_consumers();
    }
}

impl<C: ?Sized + Contract> fmt::Debug for RpcServer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcServer")
            .field("contract", &C::NAME)
            .field("transport", &self.transport.transport_id())
            .field("started", &self.is_started())
            .finish()
    }
}
