//! The adapter contract the controller depends on. Provider adapters live
//! in a separate crate; this crate only knows the shape of the port.

use crate::error::ConfigError;
use crate::model::Event;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Identifies an adapter implementation in logs and config (`"google"`,
/// `"caldav"`, `"outlook_http"`, `"ics"`).
pub trait NamedComponent {
    fn name(&self) -> &str;
}

/// Arbitrary adapter-specific parameters, read once during setup.
pub type AdapterConfig = std::collections::BTreeMap<String, serde_yaml::Value>;

/// Shared by both ends of a sync: every adapter reports the fingerprint of
/// the calendar it talks to, stable across runs.
pub trait CalendarAdapter: NamedComponent + Send + Sync {
    /// `CalendarFingerprint` for this adapter's calendar.
    fn calendar_fingerprint(&self) -> &str;
}

/// Read-only calendar: lists events in a window.
#[async_trait]
pub trait Source: CalendarAdapter {
    async fn events_in_timeframe(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, AdapterError>;
}

/// Read-write calendar: everything a `Source` does, plus mutation.
#[async_trait]
pub trait Sink: CalendarAdapter {
    async fn events_in_timeframe(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, AdapterError>;

    async fn create_event(&self, event: &Event) -> Result<(), AdapterError>;
    async fn update_event(&self, event: &Event) -> Result<(), AdapterError>;
    async fn delete_event(&self, event: &Event) -> Result<(), AdapterError>;
}

/// Errors an adapter can surface to the controller.
///
/// `NotFound` is special: on update/delete it is treated as success
/// (idempotent convergence), since the desired end state — "this event is
/// gone" or "this event no longer needs this change" — is already true.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("event not found")]
    NotFound,

    #[error("rate limited, retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("adapter configuration invalid: {0}")]
    Config(#[from] ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

impl AdapterError {
    /// Whether this failure on an update/delete call should be treated as
    /// a no-op success rather than propagated.
    pub fn is_idempotent_convergence(&self) -> bool {
        matches!(self, AdapterError::NotFound)
    }
}
