//! Ambient bootstrap shared by the `calendarsync` binary: environment and
//! tracing initialization. No domain logic lives here.

pub mod bootstrap;

pub use bootstrap::{init_env, init_tracing};
