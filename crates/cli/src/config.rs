//! Command-line surface: flags and the environment variables that can
//! override them.

use clap::Parser;

/// One-shot calendar replication: load a sync config, diff source against
/// sink, and apply the difference.
#[derive(Debug, Parser)]
#[command(name = "calendarsync", version, about)]
pub struct Cli {
    /// Path to the sync config YAML file.
    #[arg(long, default_value = "config.yaml")]
    pub config: String,

    /// `tracing_subscriber::EnvFilter` directive, e.g. "info" or "debug".
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Delete every sink event this source owns, instead of syncing.
    #[arg(long)]
    pub clean: bool,

    /// Compute the diff and log what would happen, without writing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Launch the system browser on the OAuth2 consent URL automatically.
    #[arg(long)]
    pub open_browser: bool,

    /// Port the local OAuth2 redirect listener binds to. 0 asks the OS for
    /// an ephemeral port.
    #[arg(long, default_value_t = 0)]
    pub port: u16,

    /// Passphrase for the encrypted token store. `CALENDARSYNC_ENCRYPTION_KEY`
    /// takes precedence over this flag when both are set.
    #[arg(long)]
    pub encryption_key: Option<String>,
}

impl Cli {
    /// Resolves the token store passphrase, preferring the environment
    /// variable over the flag so a passphrase never has to be committed
    /// to a shell history or a process list alongside the config path.
    pub fn encryption_key(&self) -> Option<String> {
        std::env::var("CALENDARSYNC_ENCRYPTION_KEY").ok().or_else(|| self.encryption_key.clone())
    }
}
