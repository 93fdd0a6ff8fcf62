//! Concrete `Source`/`Sink` implementations for the calendar providers this
//! engine talks to, plus the retry/backoff and rate-limiting plumbing they
//! share.

pub mod caldav;
pub mod google;
pub mod ics;
pub mod outlook;
mod retry;

pub use caldav::CalDavAdapter;
pub use google::GoogleAdapter;
pub use ics::IcsAdapter;
pub use outlook::OutlookAdapter;
