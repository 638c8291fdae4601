//! Build inputs: project identity and resolved source

use crate::error::{WheelsmithError, WheelsmithResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const PYPROJECT_FILE: &str = "pyproject.toml";

/// Project name and version, as reported by project metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMetadata {
    pub name: String,
    pub version: String,
}

#[derive(Deserialize)]
struct PyProject {
    project: Option<ProjectTable>,
}

#[derive(Deserialize)]
struct ProjectTable {
    name: Option<String>,
    version: Option<String>,
}

impl ProjectMetadata {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Read `[project].name` and `[project].version` from `pyproject.toml`
    pub fn from_pyproject(source_dir: &Path) -> WheelsmithResult<Self> {
        let path = source_dir.join(PYPROJECT_FILE);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| WheelsmithError::io(format!("reading {}", path.display()), e))?;

        let invalid = |reason: &str| WheelsmithError::ProjectMetadata {
            path: path.clone(),
            reason: reason.to_string(),
        };

        let parsed: PyProject = toml::from_str(&content).map_err(|e| invalid(&e.to_string()))?;
        let project = parsed.project.ok_or_else(|| invalid("missing [project] table"))?;
        let name = project
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| invalid("missing project.name"))?;
        let version = project
            .version
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| invalid("missing project.version (dynamic versions need --version)"))?;

        Ok(Self { name, version })
    }
}

/// Filesystem location to build from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub path: PathBuf,
    /// Pre-computed content hash; when absent the tree is hashed
    pub content_hash: Option<String>,
    /// VCS revision, informational
    pub revision: Option<String>,
}

impl ResolvedSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            content_hash: None,
            revision: None,
        }
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }
}
