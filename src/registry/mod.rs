//! Remote wheel registry
//!
//! Pushes cached artifacts to a shared registry and pulls them back into
//! the local cache. The registry is untrusted: every pulled artifact is
//! re-hashed and validated, and network failures degrade to local builds.

pub mod client;
pub mod config;
pub mod http;
pub mod transport;
pub mod types;

pub use client::WheelRegistry;
pub use config::{RegistryConfig, SecretToken};
pub use http::HttpTransport;
pub use transport::{MemoryTransport, RegistryTransport};
pub use types::{normalize_name, ArtifactId, PulledArtifact, PushOutcome, RegistryRecord};
