//! Transport implementations.
//!
//! This module provides concrete implementations of the domain-level
//! `Connection` and `Transport` traits. Broker transports are hidden behind
//! feature flags and exposed only through constructor functions.
//!
//! Domain code must not depend on transport-specific types.

mod amqp;
mod memory;

pub(crate) mod runner;

pub use amqp::create_lapin_connection;

pub use memory::{
    //
    create_memory_connection,
    create_memory_connection_with_hub,
    MemoryHub,
};
