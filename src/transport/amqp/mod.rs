//! AMQP protocol transports.
//!
//! This module contains transport implementations for AMQP-based brokers.
//! Currently supports:
//! - lapin - AMQP 0-9-1 (RabbitMQ)

#[cfg(feature = "transport_lapin")]
mod lapin;

#[cfg(feature = "transport_lapin")]
pub use self::lapin::create_connection as create_lapin_connection;

/// Null-object stand-in used when the `transport_lapin` feature is off.
#[cfg(not(feature = "transport_lapin"))]
pub async fn create_lapin_connection(
    config: crate::ConnectionConfig,
) -> crate::Result<crate::ConnectionPtr> {
    Err(crate::RpcError::Transport(format!(
        "cannot connect to {}: built without the transport_lapin feature",
        config.uri
    )))
}
