// API key commands

use clap::Subcommand;
use keypanel_core::{ActionOutcome, PanelController};

#[derive(Subcommand)]
pub enum KeysCommand {
    /// List API keys (the listing is refreshed on every run)
    List,

    /// Issue a new API key
    Generate,

    /// Extend an API key's expiry
    Renew {
        /// API key ID
        key_id: i64,
    },

    /// Revoke an API key
    Revoke {
        /// API key ID
        key_id: i64,
    },
}

pub async fn run(panel: &PanelController, command: KeysCommand) -> ActionOutcome {
    match command {
        // init() already replaced the collection with the gateway's
        KeysCommand::List => ActionOutcome::Applied,
        KeysCommand::Generate => panel.generate().await,
        KeysCommand::Renew { key_id } => panel.renew(key_id).await,
        KeysCommand::Revoke { key_id } => panel.revoke(key_id).await,
    }
}
