//! Type-safe wrappers for domain identifiers
//!
//! These newtypes prevent mixing a provider-native event id with the
//! cross-provider `SyncId` correlation key at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A provider-native event id, opaque to everyone except the adapter that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EventId {
    fn from(id: String) -> Self {
        EventId(id)
    }
}

impl From<&str> for EventId {
    fn from(id: &str) -> Self {
        EventId(id.to_string())
    }
}

/// `SyncId` is the stable correlation key between a source event and its sink copy.
/// It is always the decimal rendering of `FNV1a64(source_event_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncId(pub String);

impl SyncId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SyncId {
    fn from(id: String) -> Self {
        SyncId(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_display_roundtrip() {
        let id = EventId::new("abc123");
        assert_eq!(id.to_string(), "abc123");
        assert_eq!(id.as_str(), "abc123");
    }

    #[test]
    fn sync_id_serializes_transparently() {
        let id = SyncId::from("1234567890".to_string());
        let yaml = serde_yaml::to_string(&id).unwrap();
        assert!(yaml.contains("1234567890"));
    }
}
