//! Request descriptor: URI and option parsing

use crate::{ExecError, OptionMap, Result, SystemOptions};
use url::Url;

/// Validated description of a request for an execution system.
///
/// Parsing happens before any connection is attempted; a scheme mismatch
/// or missing coordinates never reaches the transport.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    scheme: String,
    host: String,
    port: u16,
    user: Option<String>,
    path: String,
    options: SystemOptions,
}

/// Normalized identity of a shareable host context.
///
/// Two requests with equal identity keys share one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    host: String,
    port: u16,
    user: Option<String>,
}

impl ExecRequest {
    /// Default port when the URI does not carry one
    pub const DEFAULT_PORT: u16 = 22;

    /// Parse and validate a URI plus option map.
    ///
    /// Options may arrive both in the URI query string and in the explicit
    /// map; the map takes precedence on key collision. Fails with
    /// `MalformedRequest` when the scheme does not match `expected_scheme`
    /// or required coordinates are absent.
    pub fn parse(uri: &str, expected_scheme: &str, options: &OptionMap) -> Result<Self> {
        let url = Url::parse(uri)
            .map_err(|e| ExecError::MalformedRequest(format!("invalid URI '{uri}': {e}")))?;

        if url.scheme() != expected_scheme {
            return Err(ExecError::MalformedRequest(format!(
                "scheme '{}' does not match registered scheme '{expected_scheme}'",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ExecError::MalformedRequest(format!("URI '{uri}' has no host")))?
            .to_ascii_lowercase();

        let user = match url.username() {
            "" => None,
            name => Some(name.to_string()),
        };

        let mut merged: OptionMap = url.query_pairs().into_owned().collect();
        merged.extend(options.iter().map(|(k, v)| (k.clone(), v.clone())));
        let options = SystemOptions::from_map(&merged)?;

        Ok(Self {
            scheme: url.scheme().to_string(),
            host,
            port: url.port().unwrap_or(Self::DEFAULT_PORT),
            user,
            path: url.path().to_string(),
            options,
        })
    }

    /// URI scheme this request was validated against
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Remote hostname, lowercased
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Remote port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// User component, if the URI carried one
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Path component of the URI
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Resolved system options
    pub fn options(&self) -> &SystemOptions {
        &self.options
    }

    /// Identity key for connection sharing
    pub fn identity(&self) -> IdentityKey {
        IdentityKey {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
        }
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.user {
            Some(user) => write!(f, "{}@{}:{}", user, self.host, self.port),
            None => write!(f, "{}:{}", self.host, self.port),
        }
    }
}
