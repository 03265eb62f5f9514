//! Operation identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Correlates one logical sync operation across its lock, retry, and state
/// lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Generate a fresh random operation id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Build an operation id from an existing string.
    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(OperationId::generate(), OperationId::generate());
    }

    #[test]
    fn from_string_roundtrip() {
        let id = OperationId::from_string("op-1");
        assert_eq!(id.as_str(), "op-1");
        assert_eq!(format!("{}", id), "op-1");
    }
}
