//! Registry connection settings

use crate::error::{WheelsmithError, WheelsmithResult};
use std::fmt;
use std::time::Duration;
use url::Url;

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on a downloaded artifact
pub const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 512 * 1024 * 1024;

/// Bearer token that never shows up in `Debug` output
#[derive(Clone, PartialEq, Eq)]
pub struct SecretToken(String);

impl SecretToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for the Authorization header only
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretToken(***)")
    }
}

/// Where the registry lives and how to talk to it
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    endpoint: Url,
    auth_token: Option<SecretToken>,
    namespace: String,
    timeout: Duration,
    max_download_bytes: u64,
}

impl RegistryConfig {
    /// Create a config for an http(s) endpoint and namespace
    pub fn new(endpoint: &str, namespace: &str) -> WheelsmithResult<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            WheelsmithError::User(format!("Invalid registry endpoint '{}': {}", endpoint, e))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") || endpoint.cannot_be_a_base() {
            return Err(WheelsmithError::User(format!(
                "Registry endpoint must be an http(s) URL: {}",
                endpoint
            )));
        }

        let namespace = namespace.trim_matches('/');
        if namespace.is_empty()
            || !namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(WheelsmithError::User(format!(
                "Invalid registry namespace: '{}'",
                namespace
            )));
        }

        Ok(Self {
            endpoint,
            auth_token: None,
            namespace: namespace.to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(SecretToken::new(token));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_download_bytes(mut self, bytes: u64) -> Self {
        self.max_download_bytes = bytes;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn auth_token(&self) -> Option<&SecretToken> {
        self.auth_token.as_ref()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_download_bytes(&self) -> u64 {
        self.max_download_bytes
    }

    /// `{endpoint}/{namespace}/{segments...}`, each segment percent-encoded
    pub fn url_for(&self, segments: &[&str]) -> WheelsmithResult<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| WheelsmithError::Internal("registry endpoint cannot be a base".to_string()))?
            .pop_if_empty()
            .push(&self.namespace)
            .extend(segments);
        Ok(url)
    }
}
