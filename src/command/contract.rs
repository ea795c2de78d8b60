//! Contract schema and the `rpc_contract!` generator.
//!
//! A contract is a named set of remotely invokable methods. Instead of
//! discovering methods at runtime, every contract carries a static schema
//! ([`Contract::NAME`] and [`Contract::METHODS`]) plus a dispatch adapter that
//! decodes arguments and calls the concrete implementation.
//!
//! [`rpc_contract!`](crate::rpc_contract) generates all of it from a trait-like
//! declaration:
//!
//! - the contract trait itself (async methods returning [`Result`](crate::Result)),
//! - `impl Contract for dyn Trait` (schema + server dispatch),
//! - `impl Trait for CallProxy<dyn Trait>` (client side).

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use super::CommandDescriptor;
use crate::Result;

/// Boxed, sendable future used by type-erased dispatch.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Static description of one contract method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSpec {
    /// Method name; last segment of the method's queue address.
    pub name: &'static str,
    /// Parameter names in wire order.
    pub params: &'static [&'static str],
    /// Name of the declared result type, `None` for methods without a result.
    pub returns: Option<&'static str>,
}

impl MethodSpec {
    /// Number of parameters.
    pub const fn arity(&self) -> usize {
        self.params.len()
    }

    /// Whether the method declares a result.
    pub const fn has_result(&self) -> bool {
        self.returns.is_some()
    }
}

/// A typed RPC contract.
///
/// Usually implemented for `dyn Trait` by [`rpc_contract!`](crate::rpc_contract);
/// hand-written implementations are possible for unusual setups.
pub trait Contract: Send + Sync + 'static {
    /// Fully qualified contract name, used as the address prefix.
    const NAME: &'static str;

    /// Every method of the contract, in declaration order.
    const METHODS: &'static [MethodSpec];

    /// Decode `body` for `command`, invoke the matching method on `self` and
    /// return the serialized result.
    fn dispatch<'a>(
        &'a self,
        command: &'a CommandDescriptor,
        body: Bytes,
    ) -> BoxFuture<'a, Result<Bytes>>;
}

/// Declare an RPC contract.
///
/// ```
/// use queue_rpc::rpc_contract;
///
/// rpc_contract! {
///     /// Basic arithmetic.
///     pub trait Calculator = "sample.Calculator" {
///         fn sum(a: i32, b: i32) -> i32;
///         fn reset();
///     }
/// }
///
/// use queue_rpc::Contract;
/// assert_eq!(<dyn Calculator as Contract>::METHODS.len(), 2);
/// assert_eq!(<dyn Calculator as Contract>::METHODS[0].arity(), 2);
/// assert!(!<dyn Calculator as Contract>::METHODS[1].has_result());
/// ```
///
/// Implementations use `#[queue_rpc::async_trait]`:
///
/// ```ignore
/// struct Service;
///
/// #[queue_rpc::async_trait]
/// impl Calculator for Service {
///     async fn sum(&self, a: i32, b: i32) -> queue_rpc::Result<i32> {
///         Ok(a + b)
///     }
///     async fn reset(&self) -> queue_rpc::Result<()> {
///         Ok(())
///     }
/// }
/// ```
#[macro_export]
macro_rules! rpc_contract {
    (
        $(#[$meta:meta])*
        $vis:vis trait $name:ident = $full:literal {
            $(
                $(#[$method_meta:meta])*
                fn $method:ident ( $( $arg:ident : $ty:ty ),* $(,)? ) $( -> $ret:ty )? ;
            )*
        }
    ) => {
        $(#[$meta])*
        #[$crate::async_trait]
        $vis trait $name: ::core::marker::Send + ::core::marker::Sync + 'static {
            $(
                $(#[$method_meta])*
                async fn $method(&self $(, $arg: $ty)*)
                    -> $crate::Result<$crate::__rpc_return_type!($($ret)?)>;
            )*
        }

        impl $crate::Contract for dyn $name {
            const NAME: &'static str = $full;

            const METHODS: &'static [$crate::MethodSpec] = &[
                $(
                    $crate::MethodSpec {
                        name: ::core::stringify!($method),
                        params: &[$(::core::stringify!($arg)),*],
                        returns: $crate::__rpc_return_name!($($ret)?),
                    },
                )*
            ];

            #[allow(clippy::let_unit_value, unused_variables)]
            fn dispatch<'a>(
                &'a self,
                command: &'a $crate::CommandDescriptor,
                body: $crate::Bytes,
            ) -> $crate::BoxFuture<'a, $crate::Result<$crate::Bytes>> {
                ::std::boxed::Box::pin(async move {
                    match command.method_name() {
                        $(
                            ::core::stringify!($method) => {
                                let ($($arg,)*): ($($ty,)*) = command.decode_arguments(&body)?;
                                let value = self.$method($($arg),*).await?;
                                command.serialize_response(&value)
                            }
                        )*
                        other => ::core::result::Result::Err($crate::RpcError::Resolution(
                            ::std::format!("{}.{}", $full, other),
                        )),
                    }
                })
            }
        }

        #[$crate::async_trait]
        impl $name for $crate::CallProxy<dyn $name> {
            $(
                async fn $method(&self $(, $arg: $ty)*)
                    -> $crate::Result<$crate::__rpc_return_type!($($ret)?)>
                {
                    self.invoke(::core::stringify!($method), ($($arg,)*)).await
                }
            )*
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __rpc_return_type {
    () => { () };
    ($ret:ty) => { $ret };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __rpc_return_name {
    () => {
        ::core::option::Option::None
    };
    ($ret:ty) => {
        ::core::option::Option::Some(::core::stringify!($ret))
    };
}
