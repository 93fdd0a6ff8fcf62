//! Domain types and pure logic for CalendarSync: event model, identity and
//! equality rules, filter/transformer pipelines, config schema, and the
//! adapter port. No I/O lives in this crate.

pub mod config;
pub mod error;
pub mod filter;
pub mod metadata;
pub mod model;
pub mod port;
pub mod time;
pub mod transform;
pub mod types;

pub use error::{ConfigError, ConfigResult, TransformError};
pub use metadata::{Metadata, calendar_fingerprint};
pub use model::{Attendee, Event, Reminder, ReminderAction};
pub use port::{AdapterError, CalendarAdapter, NamedComponent, Sink, Source};
pub use types::{EventId, SyncId};
