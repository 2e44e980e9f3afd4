//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The seed renewal token comes from SESSION_REFRESH_TOKEN or
//! refresh_token_file and is never stored in the TOML directly.

use auth_pipeline::Endpoints;
use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub proxy: ProxyConfig,
    pub api: ApiConfig,
    pub credentials: CredentialsConfig,
}

/// Local listener settings
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// The protected API and its special endpoints
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_renewal_path")]
    pub renewal_path: String,
    #[serde(default = "default_sign_in_paths")]
    pub sign_in_paths: Vec<String>,
    #[serde(default = "default_session_paths")]
    pub session_paths: Vec<String>,
}

/// Credential persistence
#[derive(Debug, Deserialize)]
pub struct CredentialsConfig {
    pub path: PathBuf,
    /// File holding a renewal token to seed an empty store with
    #[serde(default)]
    pub refresh_token_file: Option<PathBuf>,
    #[serde(skip)]
    pub seed_refresh_token: Option<Secret<String>>,
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_renewal_path() -> String {
    session_auth::DEFAULT_RENEWAL_PATH.to_string()
}

fn default_sign_in_paths() -> Vec<String> {
    session_auth::DEFAULT_SIGN_IN_PATHS
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_session_paths() -> Vec<String> {
    session_auth::DEFAULT_SESSION_PATHS
        .iter()
        .map(|p| p.to_string())
        .collect()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Seed token resolution order:
    /// 1. SESSION_REFRESH_TOKEN env var
    /// 2. refresh_token_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.api.base_url.starts_with("http://")
            && !config.api.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.api.base_url
            )));
        }

        if config.proxy.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.proxy.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.api.renewal_path.trim().is_empty() {
            return Err(common::Error::Config("renewal_path must not be empty".into()));
        }

        let env_token = std::env::var("SESSION_REFRESH_TOKEN")
            .ok()
            .map(|token| token.trim().to_owned())
            .filter(|token| !token.is_empty());
        if let Some(token) = env_token {
            config.credentials.seed_refresh_token = Some(Secret::new(token));
        } else if let Some(ref token_file) = config.credentials.refresh_token_file {
            let token = std::fs::read_to_string(token_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read refresh_token_file {}: {e}",
                    token_file.display()
                ))
            })?;
            let token = token.trim().to_owned();
            if !token.is_empty() {
                config.credentials.seed_refresh_token = Some(Secret::new(token));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("session-proxy.toml")
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints::new(&self.api.base_url)
            .with_renewal_path(&self.api.renewal_path)
            .with_sign_in_paths(&self.api.sign_in_paths)
            .with_session_paths(&self.api.session_paths)
    }
}
