use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Unique correlation identifier used to match RPC requests and responses.
///
/// Generated from a random UUID v4 rather than a counter, so ids stay unique
/// across process restarts and concurrent callers sharing one channel.
/// Correlation IDs travel in the envelope metadata and are opaque to the
/// transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// Generate a new unique correlation ID.
    pub fn generate() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    /// Borrow the correlation ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shared string form, as carried by [`Envelope`](crate::Envelope).
    pub fn as_shared(&self) -> Arc<str> {
        self.0.clone()
    }
}

impl From<Arc<str>> for CorrelationId {
    fn from(value: Arc<str>) -> Self {
        Self(value)
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_generate_unique() {
        // ---
        let id1 = CorrelationId::generate();
        let id2 = CorrelationId::generate();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_format() {
        // ---
        let id = CorrelationId::generate();
        let s = id.to_string();
        assert_eq!(s.len(), 36); // Standard UUID format
    }

    #[test]
    fn test_shared_form_matches() {
        // ---
        let id = CorrelationId::from("abc");
        assert_eq!(&*id.as_shared(), "abc");
        assert_eq!(CorrelationId::from(id.as_shared()), id);
    }
}
