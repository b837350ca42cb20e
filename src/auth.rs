use crate::error::{ExplorerError, Result};
use crate::fetch::transport::Transport;
use crate::types::SessionContext;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

pub const AUTHENTICATE_ROUTE: &str = "/security/authenticate";

/// Login identifier and password
#[derive(Clone, Serialize)]
pub struct Credentials {
    identifier: String,
    password: String,
}

impl Credentials {
    pub fn new(identifier: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            identifier: identifier.into(),
            password: password.into(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Exchange credentials for a bearer token and build the session
pub fn login<T: Transport + ?Sized>(
    transport: &T,
    credentials: &Credentials,
    url_rest: &str,
    url_graphql: &str,
) -> Result<SessionContext> {
    if credentials.identifier.is_empty() || credentials.password.is_empty() {
        return Err(ExplorerError::validation("identifier and password are both required"));
    }
    if url_rest.trim().is_empty() || url_graphql.trim().is_empty() {
        return Err(ExplorerError::validation("REST and GraphQL URLs are both required"));
    }

    let url = format!("{}{}", url_rest.trim_end_matches('/'), AUTHENTICATE_ROUTE);
    let body = serde_json::to_value(credentials)
        .map_err(|e| ExplorerError::validation(format!("cannot encode credentials: {}", e)))?;

    let payload = transport.post_json(&url, &body, &BTreeMap::new())?.into_json(&url)?;
    let token = payload
        .pointer("/result/token")
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ExplorerError::schema(&url, "'result.token' is missing"))?;

    info!(identifier = %credentials.identifier, "authenticated");
    Ok(SessionContext::from_token(token, url_rest, url_graphql))
}
