use std::fs;
use std::path::Path;

use anyhow::Result;
use datahub_core::config::Config;
use serde::Deserialize;
use tracing::{error, info};

pub const TOKEN_ENV: &str = "DATAHUB_TOKEN";
pub const API_URL_ENV: &str = "DATAHUB_API_URL";

#[derive(Deserialize)]
struct StaticConfig {
    api_url: String,
    owner_id: String,
    owner: String,
}

/// Loads a static YAML config file (no secrets) and injects the user token
/// from the environment. `DATAHUB_API_URL`, when set, overrides `api_url`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let static_conf: StaticConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let token = match std::env::var(TOKEN_ENV) {
        Ok(token) if !token.trim().is_empty() => {
            info!("{TOKEN_ENV} found in env");
            token
        }
        Ok(_) => {
            error!("{TOKEN_ENV} environment variable is empty");
            anyhow::bail!("{TOKEN_ENV} environment variable not set: empty value");
        }
        Err(e) => {
            error!(error = ?e, "{TOKEN_ENV} environment variable not set");
            return Err(anyhow::anyhow!("{TOKEN_ENV} environment variable not set: {e}"));
        }
    };

    let api_url = match std::env::var(API_URL_ENV) {
        Ok(url) if !url.trim().is_empty() => {
            info!(api_url = %url, "API URL overridden from env");
            url
        }
        _ => static_conf.api_url,
    };

    let config = Config {
        api_url,
        owner_id: static_conf.owner_id,
        owner: static_conf.owner,
        token,
    };
    config.trace_loaded();
    Ok(config)
}
