use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::push::Owner;

/// Connection settings for a DataHub deployment and the pushing user.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_url: String,
    pub owner_id: String,
    pub owner: String,
    /// Long-lived user token; exchanged for per-service tokens on every push.
    #[serde(default, skip_serializing)]
    pub token: String,
}

impl Config {
    pub fn owner(&self) -> Owner {
        Owner {
            id: self.owner_id.clone(),
            name: self.owner.clone(),
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            api_url = %self.api_url,
            owner = %self.owner,
            token_len = self.token.len(),
            "Loaded Config"
        );
        debug!(?self, "Config loaded (full debug)");
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_url", &self.api_url)
            .field("owner_id", &self.owner_id)
            .field("owner", &self.owner)
            .field("token", &"<redacted>")
            .finish()
    }
}
