//! Build engine
//!
//! A build run resolves its inputs, consults the local cache and the
//! registry, and only then invokes the backend. Every run is tracked
//! through an explicit state machine.

pub mod builder;
pub mod engine;
pub mod source;
pub mod state;

pub use builder::{find_built_wheel, ArtifactBuilder, CommandBuilder, DEFAULT_BUILD_COMMAND};
pub use engine::{ArtifactOrigin, BuildEngine, BuildOptions, BuildRequest, BuildResult};
pub use source::{ProjectMetadata, ResolvedSource};
pub use state::{BuildState, BuildTracker};
