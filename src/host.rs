//! Process-level hosting of servers and clients on one connection.
//!
//! An [`RpcHost`] owns a broker connection, hands out clients on fresh
//! channels and keeps started servers alive until shutdown.
//!
//! ```
//! use queue_rpc::{ConnectionBuilder, RpcHost};
//!
//! # async fn example() -> queue_rpc::Result<()> {
//! let connection = ConnectionBuilder::new().uri("memory://host").build().await?;
//! let host = RpcHost::new(connection);
//! // host.start_server::<dyn MyContract>(Arc::new(MyService)).await?;
//! host.run_until(async { /* e.g. ctrl-c */ }).await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::{
    // ---
    log_info,
    log_warn,
    ConnectionPtr,
    Contract,
    Result,
    RpcClient,
    RpcConfig,
    RpcServer,
};

/// Type-erased view of a running server.
#[async_trait::async_trait]
trait HostedServer: Send + Sync {
    fn contract(&self) -> &'static str;

    async fn shutdown(&self) -> Result<()>;
}

#[async_trait::async_trait]
impl<C: ?Sized + Contract> HostedServer for RpcServer<C> {
    fn contract(&self) -> &'static str {
        C::NAME
    }

    async fn shutdown(&self) -> Result<()> {
        RpcServer::shutdown(self).await
    }
}

/// Owns a connection and the servers running on it.
pub struct RpcHost {
    // ---
    connection: ConnectionPtr,
    servers: Vec<Box<dyn HostedServer>>,
}

impl RpcHost {
    // ---
    pub fn new(connection: ConnectionPtr) -> Self {
        Self {
            connection,
            servers: Vec::new(),
        }
    }

    pub fn connection(&self) -> &ConnectionPtr {
        &self.connection
    }

    /// Open a channel, start a server for `implementation` on it and keep
    /// it running until the host shuts down.
    pub async fn start_server<C>(&mut self, implementation: Arc<C>) -> Result<()>
    where
        C: ?Sized + Contract,
    {
        // ---
        let server = RpcServer::<C>::connect(&self.connection, implementation).await?;
        server.start().await?;
        self.servers.push(Box::new(server));
        Ok(())
    }

    /// Open a channel and create a client for contract `C` on it.
    pub async fn client<C>(&self, config: RpcConfig) -> Result<RpcClient<C>>
    where
        C: ?Sized + Contract,
    {
        RpcClient::connect(&self.connection, config).await
    }

    /// Names of the contracts being served, in start order.
    pub fn servers(&self) -> Vec<&'static str> {
        self.servers.iter().map(|server| server.contract()).collect()
    }

    /// Wait for `shutdown` to resolve, then shut the host down.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        // ---
        log_info!("host running {} server(s)", self.servers.len());
        shutdown.await;
        self.shutdown().await
    }

    /// Stop every server, then close the connection.
    ///
    /// All servers are stopped even if one fails; the first error is
    /// returned.
    pub async fn shutdown(self) -> Result<()> {
        // ---
        let mut first_err = None;
        for server in &self.servers {
            if let Err(err) = server.shutdown().await {
                log_warn!("stopping {} failed: {err}", server.contract());
                first_err.get_or_insert(err);
            }
        }

        let closed = self.connection.close().await;
        match first_err {
            Some(err) => Err(err),
            None => closed,
        }
    }
}

impl fmt::Debug for RpcHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcHost")
            .field("servers", &self.servers())
            .finish()
    }
}
