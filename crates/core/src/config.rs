//! The sync config file schema and loader.
//!
//! Mirrors the original YAML shape field-for-field so existing config
//! files keep working unmodified.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Adapter-specific configuration: arbitrary key-value pairs whose shape
/// is owned by whichever adapter consumes them.
pub type CustomMap = BTreeMap<String, serde_yaml::Value>;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct File {
    #[serde(skip)]
    pub path: PathBuf,
    #[serde(default)]
    pub auth: AuthStorage,
    pub source: Source,
    pub sink: Sink,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub transformations: Vec<Transformer>,
    pub sync: Sync,
    #[serde(default, rename = "updateConcurrency")]
    pub update_concurrency: Option<usize>,
}

impl File {
    /// Loads and parses a config file from disk. I/O and parse errors are
    /// always fatal before any adapter connects.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut file: File = serde_yaml::from_str(&contents)?;
        file.path = path.to_path_buf();
        Ok(file)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthStorage {
    #[serde(default, rename = "storage_mode")]
    pub storage_mode: String,
    #[serde(default)]
    pub config: CustomMap,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Source {
    pub adapter: Adapter,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Sink {
    pub adapter: Adapter,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Adapter {
    #[serde(rename = "type")]
    pub kind: String,
    pub calendar: String,
    #[serde(default)]
    pub config: CustomMap,
    #[serde(default, rename = "oAuth")]
    pub oauth: OAuth,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OAuth {
    #[serde(default, rename = "clientId")]
    pub client_id: String,
    #[serde(default, rename = "clientKey")]
    pub client_key: String,
    #[serde(default, rename = "tenantId")]
    pub tenant_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Transformer {
    pub name: String,
    #[serde(default)]
    pub config: CustomMap,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Filter {
    pub name: String,
    #[serde(default)]
    pub config: CustomMap,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Sync {
    pub start: SyncTime,
    pub end: SyncTime,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncTime {
    pub identifier: String,
    #[serde(default)]
    pub offset: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
source:
  adapter:
    type: google
    calendar: primary
    config:
      credentialsPath: /tmp/creds.json
    oAuth:
      clientId: abc
      clientKey: secret
sink:
  adapter:
    type: caldav
    calendar: work
filters:
  - name: DeclinedEvents
  - name: RegexTitle
    config:
      pattern: '^Focus'
transformations:
  - name: KeepTitle
  - name: KeepAttendees
sync:
  start:
    identifier: MonthStart
    offset: -1
  end:
    identifier: MonthEnd
    offset: 1
";

    #[test]
    fn parses_a_representative_config() {
        let file: File = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(file.source.adapter.kind, "google");
        assert_eq!(file.sink.adapter.kind, "caldav");
        assert_eq!(file.filters.len(), 2);
        assert_eq!(file.transformations.len(), 2);
        assert_eq!(file.sync.start.identifier, "MonthStart");
        assert_eq!(file.sync.start.offset, -1);
        assert_eq!(file.sync.end.offset, 1);
        assert_eq!(file.source.adapter.oauth.client_id, "abc");
    }

    #[test]
    fn filters_and_transformations_default_to_empty() {
        let minimal = r"
source:
  adapter:
    type: google
    calendar: primary
sink:
  adapter:
    type: caldav
    calendar: work
sync:
  start:
    identifier: MonthStart
  end:
    identifier: MonthEnd
";
        let file: File = serde_yaml::from_str(minimal).unwrap();
        assert!(file.filters.is_empty());
        assert!(file.transformations.is_empty());
        assert_eq!(file.sync.start.offset, 0);
    }

    #[test]
    fn unreadable_path_is_a_config_error() {
        let result = File::load("/nonexistent/path/to/config.yaml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
