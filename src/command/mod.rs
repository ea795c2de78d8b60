//! Method descriptors and wire serialization.
//!
//! A [`CommandDescriptor`] binds one contract method to its queue address
//! (`{contract}.{method}`) and owns the JSON conventions used on the wire:
//!
//! - Requests are a JSON array holding the arguments in declaration order.
//!   A method without parameters sends an empty body.
//! - Responses are the JSON encoding of the result value. Methods without a
//!   result, or returning a null value, send an empty body.

mod contract;

pub use contract::{BoxFuture, Contract, MethodSpec};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::{Address, Result, RpcError};

/// A resolved contract method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    address: Address,
    method: &'static MethodSpec,
}

impl CommandDescriptor {
    /// Descriptor for a method of contract `C`.
    pub fn from_spec<C: ?Sized + Contract>(method: &'static MethodSpec) -> Self {
        // ---
        Self {
            address: Address::from(format!("{}.{}", C::NAME, method.name)),
            method,
        }
    }

    /// Resolve a method of contract `C` by name.
    pub fn for_method<C: ?Sized + Contract>(name: &str) -> Result<Self> {
        // ---
        C::METHODS
            .iter()
            .find(|method| method.name == name)
            .map(Self::from_spec::<C>)
            .ok_or_else(|| RpcError::Resolution(format!("{}.{name}", C::NAME)))
    }

    /// Resolve the method of contract `C` served on `address`.
    ///
    /// Only the last dot-separated segment is considered.
    pub fn from_address<C: ?Sized + Contract>(address: &Address) -> Result<Self> {
        // ---
        let name = match address.as_str().rsplit_once('.') {
            Some((_, name)) => name,
            None => address.as_str(),
        };
        Self::for_method::<C>(name)
    }

    /// Request queue address of the method.
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn method_name(&self) -> &'static str {
        self.method.name
    }

    /// Declared result type name, if any.
    pub fn result_type(&self) -> Option<&'static str> {
        self.method.returns
    }

    pub fn arity(&self) -> usize {
        self.method.arity()
    }

    /// Encode call arguments. `args` is normally a tuple.
    pub fn serialize_request<A: Serialize + ?Sized>(&self, args: &A) -> Result<Bytes> {
        // ---
        let value = serde_json::to_value(args)?;
        match &value {
            Value::Null => Ok(Bytes::new()),
            Value::Array(items) if items.is_empty() => Ok(Bytes::new()),
            _ => Ok(Bytes::from(serde_json::to_vec(&value)?)),
        }
    }

    /// Decode call arguments.
    ///
    /// Returns `None` for a parameterless method with an empty body.
    pub fn deserialize_request<A: DeserializeOwned>(&self, body: &[u8]) -> Result<Option<A>> {
        // ---
        let expected = self.arity();

        if expected == 0 {
            if !body.is_empty() {
                return Err(RpcError::UnexpectedBody(self.address.to_string()));
            }
            return Ok(None);
        }

        if body.is_empty() {
            return Err(RpcError::ArgumentCountMismatch {
                expected,
                actual: 0,
            });
        }

        let items: Vec<Value> = serde_json::from_slice(body)?;
        if items.len() != expected {
            return Err(RpcError::ArgumentCountMismatch {
                expected,
                actual: items.len(),
            });
        }

        Ok(Some(serde_json::from_value(Value::Array(items))?))
    }

    /// Decode call arguments into the parameter tuple, `()` for none.
    pub fn decode_arguments<A: DeserializeOwned>(&self, body: &[u8]) -> Result<A> {
        match self.deserialize_request(body)? {
            Some(args) => Ok(args),
            None => Ok(serde_json::from_value(Value::Null)?),
        }
    }

    /// Encode a method result.
    pub fn serialize_response<R: Serialize + ?Sized>(&self, value: &R) -> Result<Bytes> {
        // ---
        if !self.method.has_result() {
            return Ok(Bytes::new());
        }
        let value = serde_json::to_value(value)?;
        if value.is_null() {
            return Ok(Bytes::new());
        }
        Ok(Bytes::from(serde_json::to_vec(&value)?))
    }

    /// Decode a reply body. `None` when the body is empty or the method
    /// declares no result.
    pub fn deserialize_response<R: DeserializeOwned>(&self, body: &[u8]) -> Result<Option<R>> {
        // ---
        if body.is_empty() || !self.method.has_result() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(body)?))
    }

    /// Decode a reply body into the caller's result type; an empty reply
    /// decodes as JSON `null` (unit, `None`).
    pub fn decode_reply<R: DeserializeOwned>(&self, body: &[u8]) -> Result<R> {
        match self.deserialize_response(body)? {
            Some(value) => Ok(value),
            None => Ok(serde_json::from_value(Value::Null)?),
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct SampleRequest {
        a: i32,
        b: String,
        recursive: Option<Vec<SampleRequest>>,
    }

    struct Sample;

    impl Contract for Sample {
        const NAME: &'static str = "sample.contract.Sample";
        const METHODS: &'static [MethodSpec] = &[
            MethodSpec {
                name: "sum",
                params: &["a", "b"],
                returns: Some("i32"),
            },
            MethodSpec {
                name: "complex",
                params: &["request"],
                returns: Some("SampleRequest"),
            },
            MethodSpec {
                name: "ping",
                params: &[],
                returns: None,
            },
        ];

        fn dispatch<'a>(
            &'a self,
            _command: &'a CommandDescriptor,
            _body: Bytes,
        ) -> BoxFuture<'a, Result<Bytes>> {
            Box::pin(async { Ok(Bytes::new()) })
        }
    }

    fn nested() -> SampleRequest {
        SampleRequest {
            a: 1,
            b: "outer".into(),
            recursive: Some(vec![
                SampleRequest {
                    a: 2,
                    b: "inner".into(),
                    recursive: None,
                },
                SampleRequest {
                    a: 3,
                    b: "leaf".into(),
                    recursive: Some(Vec::new()),
                },
            ]),
        }
    }

    #[test]
    fn test_address_is_contract_dot_method() {
        // ---
        let a = CommandDescriptor::for_method::<Sample>("sum").unwrap();
        let b = CommandDescriptor::for_method::<Sample>("sum").unwrap();

        assert_eq!(a.address().as_str(), "sample.contract.Sample.sum");
        assert_eq!(a, b);
        assert_eq!(a.arity(), 2);
        assert_eq!(a.result_type(), Some("i32"));
    }

    #[test]
    fn test_unknown_method_fails_resolution() {
        // ---
        let err = CommandDescriptor::for_method::<Sample>("missing").unwrap_err();
        assert!(matches!(err, RpcError::Resolution(_)));
    }

    #[test]
    fn test_from_address_uses_last_segment() {
        // ---
        let cmd =
            CommandDescriptor::from_address::<Sample>(&Address::from("anything.at.all.complex"))
                .unwrap();
        assert_eq!(cmd.method_name(), "complex");
    }

    #[test]
    fn test_request_round_trip_with_nested_values() {
        // ---
        let cmd = CommandDescriptor::for_method::<Sample>("complex").unwrap();
        let body = cmd.serialize_request(&(nested(),)).unwrap();

        let (decoded,): (SampleRequest,) = cmd.decode_arguments(&body).unwrap();
        assert_eq!(decoded, nested());
    }

    #[test]
    fn test_request_is_json_array() {
        // ---
        let cmd = CommandDescriptor::for_method::<Sample>("sum").unwrap();
        let body = cmd.serialize_request(&(4, "x")).unwrap();
        assert_eq!(&body[..], br#"[4,"x"]"#);
    }

    #[test]
    fn test_parameterless_request_is_empty() {
        // ---
        let cmd = CommandDescriptor::for_method::<Sample>("ping").unwrap();
        let body = cmd.serialize_request(&()).unwrap();
        assert!(body.is_empty());

        let decoded: Option<()> = cmd.deserialize_request(&body).unwrap();
        assert!(decoded.is_none());
        let () = cmd.decode_arguments(&body).unwrap();
    }

    #[test]
    fn test_argument_count_mismatch() {
        // ---
        let cmd = CommandDescriptor::for_method::<Sample>("sum").unwrap();

        let err = cmd.deserialize_request::<(i32, i32)>(b"[1]").unwrap_err();
        assert!(matches!(
            err,
            RpcError::ArgumentCountMismatch {
                expected: 2,
                actual: 1
            }
        ));

        let err = cmd.deserialize_request::<(i32, i32)>(b"").unwrap_err();
        assert!(matches!(
            err,
            RpcError::ArgumentCountMismatch {
                expected: 2,
                actual: 0
            }
        ));
    }

    #[test]
    fn test_unexpected_body_for_parameterless_method() {
        // ---
        let cmd = CommandDescriptor::for_method::<Sample>("ping").unwrap();
        let err = cmd.deserialize_request::<()>(b"[1]").unwrap_err();
        assert!(matches!(err, RpcError::UnexpectedBody(_)));
    }

    #[test]
    fn test_malformed_request_is_serialization_error() {
        // ---
        let cmd = CommandDescriptor::for_method::<Sample>("sum").unwrap();
        let err = cmd.deserialize_request::<(i32, i32)>(b"{nope").unwrap_err();
        assert!(matches!(err, RpcError::Serialization(_)));
    }

    #[test]
    fn test_response_encoding() {
        // ---
        let sum = CommandDescriptor::for_method::<Sample>("sum").unwrap();
        let body = sum.serialize_response(&7).unwrap();
        assert_eq!(&body[..], b"7");
        assert_eq!(sum.deserialize_response::<i32>(&body).unwrap(), Some(7));

        let complex = CommandDescriptor::for_method::<Sample>("complex").unwrap();
        let body = complex.serialize_response(&None::<SampleRequest>).unwrap();
        assert!(body.is_empty());
        let reply: Option<SampleRequest> = complex.decode_reply(&body).unwrap();
        assert!(reply.is_none());

        let ping = CommandDescriptor::for_method::<Sample>("ping").unwrap();
        assert!(ping.serialize_response(&()).unwrap().is_empty());
        let () = ping.decode_reply(b"").unwrap();
    }
}
