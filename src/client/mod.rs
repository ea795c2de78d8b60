//! Client side: reply correlation, call proxies and the contract client.

mod correlator;
mod pending;
mod proxy;
mod rpc_client;

pub use correlator::{Awaiter, CancellationRegistration, ResponseCorrelator};
pub use proxy::CallProxy;
pub use rpc_client::RpcClient;
