use anyhow::Result;
use std::env;
use std::path::PathBuf;

/// Runtime configuration, read from the environment.
#[derive(Clone)]
pub struct Config {
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    /// Base URL of the external badge issuer API.
    pub badge_api_url: String,
    /// Optional bearer token for the badge issuer API.
    /// If not set, catalog sync is expected to run against a public catalog.
    pub badge_api_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let state_dir = env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let badge_api_url = env::var("BADGE_API_URL")
            .unwrap_or_else(|_| "https://api.badgr.io/v2".to_string());
        if badge_api_url.trim().is_empty() {
            anyhow::bail!("BADGE_API_URL must not be empty");
        }

        let badge_api_token = parse_optional_token(env::var("BADGE_API_TOKEN").ok());

        Ok(Config {
            state_dir,
            badge_api_url,
            badge_api_token,
        })
    }

    /// Path of the SQLite database inside the state directory.
    pub fn database_path(&self) -> PathBuf {
        self.state_dir.join("proctor.db")
    }
}

/// Parse an optional token value.
///
/// Returns None if the value is missing, empty, or contains only whitespace,
/// so an empty environment variable never masquerades as a credential.
pub fn parse_optional_token(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
