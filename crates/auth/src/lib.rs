//! OAuth2 authorization-code flow and the encrypted on-disk token store.
//!
//! Kept as a collaborator the CLI wires up rather than something the
//! reconciliation engine itself depends on, so `calendarsync-core` and
//! `calendarsync-sync` stay free of network and filesystem concerns.

pub mod error;
pub mod oauth;
pub mod storage;

pub use error::{AuthError, OAuthError};
pub use oauth::OAuthHandler;
pub use storage::{CalendarAuth, OAuth2Token, StaticAccessToken, TokenStore, YamlTokenStore};
