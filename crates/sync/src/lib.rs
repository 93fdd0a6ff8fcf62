//! The reconciliation engine: worker pool and controller. No provider I/O
//! lives here - adapters are injected as `calendarsync_core::{Source, Sink}`.

pub mod controller;
pub mod worker;

pub use controller::{Controller, ControllerError, RunSummary};
pub use worker::{JoinedError, Task};
