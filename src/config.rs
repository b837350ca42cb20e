//! Runtime configuration
//!
//! Values come from `SILEX_*` environment variables; a `.env` file in the
//! working directory is honoured through `dotenvy`.

use crate::error::{ExplorerError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_OUTPUT_DIR: &str = "temp_files";

#[derive(Debug, Clone, PartialEq)]
pub struct ExplorerConfig {
    /// Base URL of the REST API, e.g. `http://host/rest`
    pub rest_url: String,

    /// GraphQL endpoint URL
    pub graphql_url: String,

    /// Records requested per page
    pub page_size: usize,

    pub connect_timeout: Duration,

    /// Overall per-request deadline; none by default
    pub request_timeout: Option<Duration>,

    /// Where CSV exports land when no explicit path is given
    pub output_dir: PathBuf,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        ExplorerConfig {
            rest_url: String::new(),
            graphql_url: String::new(),
            page_size: DEFAULT_PAGE_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: None,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

impl ExplorerConfig {
    /// Read the process environment (and `.env`)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| dotenvy::var(key).ok())
    }

    /// Build a configuration from any key lookup; unset keys keep defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ExplorerConfig::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = get("SILEX_REST_URL") {
            config.rest_url = url;
        }
        if let Some(url) = get("SILEX_GRAPHQL_URL") {
            config.graphql_url = url;
        }
        if let Some(raw) = get("SILEX_PAGE_SIZE") {
            config.page_size = parse_number("SILEX_PAGE_SIZE", &raw)?;
        }
        if let Some(raw) = get("SILEX_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = Duration::from_secs(parse_number("SILEX_CONNECT_TIMEOUT_SECS", &raw)?);
        }
        if let Some(raw) = get("SILEX_TIMEOUT_SECS") {
            config.request_timeout = Some(Duration::from_secs(parse_number("SILEX_TIMEOUT_SECS", &raw)?));
        }
        if let Some(dir) = get("SILEX_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    /// Check that the configuration can drive a session
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [("REST", &self.rest_url), ("GraphQL", &self.graphql_url)] {
            if url.is_empty() {
                return Err(ExplorerError::validation(format!("{} URL is not configured", name)));
            }
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ExplorerError::validation(format!(
                    "{} URL must start with http:// or https://, got '{}'",
                    name, url
                )));
            }
        }
        if self.page_size == 0 {
            return Err(ExplorerError::validation("page size must be at least 1"));
        }
        Ok(())
    }
}

fn parse_number<N: FromStr>(key: &str, raw: &str) -> Result<N> {
    raw.parse()
        .map_err(|_| ExplorerError::validation(format!("{} must be a non-negative integer, got '{}'", key, raw)))
}
