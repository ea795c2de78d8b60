//! Typed contract RPC over message-queue brokers with automatic
//! request/response correlation.
//!
//! A contract is declared once with [`rpc_contract!`]. Servers expose an
//! implementation by consuming one request queue per method
//! (`{contract}.{method}`); clients call through a proxy that publishes the
//! JSON-encoded arguments with a fresh correlation ID and waits for the
//! matching reply on a private reply queue.
//!
//! ```
//! use std::sync::Arc;
//! use queue_rpc::{rpc_contract, ConnectionBuilder, RpcClient, RpcConfig, RpcServer};
//!
//! rpc_contract! {
//!     pub trait Calculator = "doc.Calculator" {
//!         fn sum(a: i32, b: i32) -> i32;
//!     }
//! }
//!
//! struct Service;
//!
//! #[queue_rpc::async_trait]
//! impl Calculator for Service {
//!     async fn sum(&self, a: i32, b: i32) -> queue_rpc::Result<i32> {
//!         Ok(a + b)
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> queue_rpc::Result<()> {
//! let connection = ConnectionBuilder::new().uri("memory://doc").build().await?;
//!
//! let server = RpcServer::<dyn Calculator>::connect(&connection, Arc::new(Service)).await?;
//! server.start().await?;
//!
//! let client = RpcClient::<dyn Calculator>::connect(&connection, RpcConfig::default()).await?;
//! let sum = client.call(|calc| async move { calc.sum(4, 3).await }).await?;
//! assert_eq!(sum, 7);
//! # Ok(())
//! # }
//! ```

// Import all sub modules once...
mod macros;

mod cancel;
mod client;
mod command;
mod connection_builder;
mod correlation;
mod domain;
mod error;
mod host;
mod rpc_config;
mod server;
mod transport;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use client::{Awaiter, CallProxy, CancellationRegistration, ResponseCorrelator, RpcClient};
pub use command::{BoxFuture, CommandDescriptor, Contract, MethodSpec};
pub use host::RpcHost;
pub use server::RpcServer;

pub use connection_builder::ConnectionBuilder;
pub use rpc_config::{ConnectionConfig, RpcConfig};

pub use cancel::CancelSignal;
pub use correlation::CorrelationId;
pub use error::{Result, RpcError};

pub use transport::{
    //
    create_lapin_connection,
    create_memory_connection,
    create_memory_connection_with_hub,
    MemoryHub,
};

// --- public re-exports
pub use domain::{
    //
    Acknowledge,
    Address,
    Connection,
    ConnectionPtr,
    ConsumeOptions,
    Delivery,
    Envelope,
    QueueDeclaration,
    SubscriptionHandle,
    Transport,
    TransportPtr,
    JSON_CONTENT_TYPE,
};

// Used by `rpc_contract!` expansions.
pub use async_trait::async_trait;
pub use bytes::Bytes;
