//! HTTP registry transport
//!
//! Wire layout under `{endpoint}/{namespace}`:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | exists | `HEAD records/{digest}` |
//! | upload | `PUT blobs/{digest}`, `PUT packages/{name}/{version}`, `PUT sources/{fingerprint}`, `PUT records/{digest}` |
//! | resolve | `GET records/{digest}`, `GET packages/{name}/{version}` or `GET sources/{fingerprint}` |
//! | download | `GET blobs/{digest}` |
//!
//! `records/{digest}` is written last and marks the upload complete; an
//! interrupted upload leaves no record and is redone by the next push.
//!
//! ureq is blocking, so every request runs on the blocking pool.

use crate::error::{WheelsmithError, WheelsmithResult};
use crate::hash::Digest;
use crate::registry::config::RegistryConfig;
use crate::registry::transport::RegistryTransport;
use crate::registry::types::{normalize_name, ArtifactId, RegistryRecord};
use async_trait::async_trait;
use tracing::debug;
use ureq::Agent;

/// Upper bound on a JSON record body
const MAX_RECORD_BYTES: u64 = 1024 * 1024;

const USER_AGENT: &str = concat!("wheelsmith/", env!("CARGO_PKG_VERSION"));

/// Registry reached over HTTP(S) with optional bearer auth
pub struct HttpTransport {
    config: RegistryConfig,
    agent: Agent,
}

impl HttpTransport {
    pub fn new(config: RegistryConfig) -> Self {
        let agent_config = Agent::config_builder()
            .timeout_global(Some(config.timeout()))
            .http_status_as_error(false)
            .build();
        Self {
            agent: Agent::new_with_config(agent_config),
            config,
        }
    }

    async fn run<T, F>(&self, f: F) -> WheelsmithResult<T>
    where
        F: FnOnce(&Agent, &RegistryConfig) -> WheelsmithResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let agent = self.agent.clone();
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || f(&agent, &config))
            .await
            .map_err(|e| WheelsmithError::Internal(format!("registry request task failed: {}", e)))?
    }
}

fn authorize<B>(request: ureq::RequestBuilder<B>, config: &RegistryConfig) -> ureq::RequestBuilder<B> {
    let request = request.header("User-Agent", USER_AGENT);
    match config.auth_token() {
        Some(token) => request.header("Authorization", format!("Bearer {}", token.expose())),
        None => request,
    }
}

fn transport_error(config: &RegistryConfig, op: &str, err: ureq::Error) -> WheelsmithError {
    match err {
        ureq::Error::BodyExceedsLimit(limit) => {
            WheelsmithError::RegistryProtocol(format!("{}: response exceeds {} bytes", op, limit))
        }
        other => WheelsmithError::registry_unavailable(
            config.endpoint().as_str(),
            format!("{}: {}", op, other),
        ),
    }
}

/// Map an unexpected status to retryable or protocol errors
fn status_error(config: &RegistryConfig, op: &str, status: u16) -> WheelsmithError {
    match status {
        401 | 403 => WheelsmithError::registry_unavailable(
            config.endpoint().as_str(),
            format!("{}: credentials rejected (HTTP {})", op, status),
        ),
        408 | 429 | 500..=599 => WheelsmithError::registry_unavailable(
            config.endpoint().as_str(),
            format!("{}: HTTP {}", op, status),
        ),
        _ => WheelsmithError::RegistryProtocol(format!("{}: unexpected HTTP {}", op, status)),
    }
}

fn put_bytes(
    agent: &Agent,
    config: &RegistryConfig,
    op: &str,
    segments: &[&str],
    content_type: &str,
    body: &[u8],
) -> WheelsmithResult<()> {
    let url = config.url_for(segments)?;
    debug!(url = %url, bytes = body.len(), "PUT");
    let response = authorize(agent.put(url.as_str()), config)
        .header("Content-Type", content_type)
        .send(body)
        .map_err(|e| transport_error(config, op, e))?;

    match response.status().as_u16() {
        200..=299 | 409 => Ok(()),
        status => Err(status_error(config, op, status)),
    }
}

fn get_record(
    agent: &Agent,
    config: &RegistryConfig,
    segments: &[&str],
) -> WheelsmithResult<Option<RegistryRecord>> {
    let url = config.url_for(segments)?;
    debug!(url = %url, "GET record");
    let mut response = authorize(agent.get(url.as_str()), config)
        .header("Accept", "application/json")
        .call()
        .map_err(|e| transport_error(config, "resolve", e))?;

    match response.status().as_u16() {
        200 => {
            let body = response
                .body_mut()
                .with_config()
                .limit(MAX_RECORD_BYTES)
                .read_to_vec()
                .map_err(|e| transport_error(config, "resolve", e))?;
            let record = serde_json::from_slice(&body).map_err(|e| {
                WheelsmithError::RegistryProtocol(format!("malformed registry record: {}", e))
            })?;
            Ok(Some(record))
        }
        404 => Ok(None),
        status => Err(status_error(config, "resolve", status)),
    }
}

#[async_trait]
impl RegistryTransport for HttpTransport {
    async fn contains(&self, digest: &Digest) -> WheelsmithResult<bool> {
        let digest = digest.to_string();
        self.run(move |agent, config| {
            let url = config.url_for(&["records", &digest])?;
            debug!(url = %url, "HEAD");
            let response = authorize(agent.head(url.as_str()), config)
                .call()
                .map_err(|e| transport_error(config, "exists", e))?;
            match response.status().as_u16() {
                200..=299 => Ok(true),
                404 => Ok(false),
                status => Err(status_error(config, "exists", status)),
            }
        })
        .await
    }

    async fn upload(&self, record: &RegistryRecord, bytes: &[u8]) -> WheelsmithResult<()> {
        let record = record.clone();
        let body = bytes.to_vec();
        self.run(move |agent, config| {
            let digest = record.digest.to_string();
            let json = serde_json::to_vec(&record)?;
            let name = normalize_name(&record.name);

            put_bytes(agent, config, "upload blob", &["blobs", &digest], "application/octet-stream", &body)?;
            put_bytes(
                agent,
                config,
                "upload record",
                &["packages", &name, &record.version],
                "application/json",
                &json,
            )?;
            if ArtifactId::source(&record.source_spec_hash).is_ok() {
                put_bytes(
                    agent,
                    config,
                    "upload record",
                    &["sources", &record.source_spec_hash],
                    "application/json",
                    &json,
                )?;
            }
            put_bytes(agent, config, "upload record", &["records", &digest], "application/json", &json)
        })
        .await
    }

    async fn resolve(&self, id: &ArtifactId) -> WheelsmithResult<Option<RegistryRecord>> {
        let id = id.clone();
        self.run(move |agent, config| match &id {
            ArtifactId::Digest(d) => get_record(agent, config, &["records", d.as_str()]),
            ArtifactId::Package { name, version } => {
                get_record(agent, config, &["packages", &normalize_name(name), version])
            }
            ArtifactId::Source(fp) => get_record(agent, config, &["sources", fp]),
        })
        .await
    }

    async fn download(&self, digest: &Digest, max_bytes: u64) -> WheelsmithResult<Option<Vec<u8>>> {
        let digest = digest.to_string();
        self.run(move |agent, config| {
            let url = config.url_for(&["blobs", &digest])?;
            debug!(url = %url, "GET blob");
            let mut response = authorize(agent.get(url.as_str()), config)
                .call()
                .map_err(|e| transport_error(config, "download", e))?;

            match response.status().as_u16() {
                200 => response
                    .body_mut()
                    .with_config()
                    .limit(max_bytes)
                    .read_to_vec()
                    .map(Some)
                    .map_err(|e| transport_error(config, "download", e)),
                404 => Ok(None),
                status => Err(status_error(config, "download", status)),
            }
        })
        .await
    }

    fn transport_name(&self) -> &'static str {
        "http"
    }
}
