//! Build backend invocation

use crate::build::source::{ProjectMetadata, ResolvedSource};
use crate::error::{WheelsmithError, WheelsmithResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Default backend command; `{out_dir}` and `{source_dir}` are substituted
pub const DEFAULT_BUILD_COMMAND: &[&str] = &[
    "python",
    "-m",
    "build",
    "--wheel",
    "--outdir",
    "{out_dir}",
    "{source_dir}",
];

/// Lines of backend stderr kept in a failure message
const STDERR_TAIL_LINES: usize = 20;

/// Produces one wheel from a source tree
#[async_trait]
pub trait ArtifactBuilder: Send + Sync {
    /// Build into `out_dir` and return the wheel path
    async fn build(
        &self,
        source: &ResolvedSource,
        project: &ProjectMetadata,
        out_dir: &Path,
    ) -> WheelsmithResult<PathBuf>;

    /// Identity of the backend, part of the build fingerprint
    fn builder_id(&self) -> String;
}

/// Runs an external command to build the wheel
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    argv: Vec<String>,
}

impl CommandBuilder {
    pub fn new(argv: Vec<String>) -> WheelsmithResult<Self> {
        if argv.is_empty() || argv[0].trim().is_empty() {
            return Err(WheelsmithError::User(
                "Build command must not be empty".to_string(),
            ));
        }
        Ok(Self { argv })
    }

    fn expand(&self, source_dir: &Path, out_dir: &Path) -> Vec<String> {
        let source_dir = source_dir.display().to_string();
        let out_dir = out_dir.display().to_string();
        self.argv
            .iter()
            .map(|arg| {
                arg.replace("{source_dir}", &source_dir)
                    .replace("{out_dir}", &out_dir)
            })
            .collect()
    }
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self {
            argv: DEFAULT_BUILD_COMMAND.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl ArtifactBuilder for CommandBuilder {
    async fn build(
        &self,
        source: &ResolvedSource,
        project: &ProjectMetadata,
        out_dir: &Path,
    ) -> WheelsmithResult<PathBuf> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| WheelsmithError::io(format!("creating {}", out_dir.display()), e))?;

        let argv = self.expand(&source.path, out_dir);
        let command_line = argv.join(" ");
        info!(name = %project.name, version = %project.version, "Building wheel");
        debug!("Executing: {}", command_line);

        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .current_dir(&source.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| WheelsmithError::command_failed(command_line.clone(), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            return Err(WheelsmithError::BuildFailed {
                reason: format!(
                    "`{}` exited with {}\n{}",
                    command_line,
                    output
                        .status
                        .code()
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "a signal".to_string()),
                    tail
                ),
            });
        }

        find_built_wheel(out_dir)
    }

    fn builder_id(&self) -> String {
        format!("command:{}", self.argv.join(" "))
    }
}

/// The single `.whl` file in a fresh output directory
pub fn find_built_wheel(out_dir: &Path) -> WheelsmithResult<PathBuf> {
    let entries = std::fs::read_dir(out_dir)
        .map_err(|e| WheelsmithError::io(format!("reading {}", out_dir.display()), e))?;

    let mut wheels: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "whl"))
        .collect();

    match wheels.len() {
        1 => Ok(wheels.remove(0)),
        0 => Err(WheelsmithError::BuildFailed {
            reason: format!("no wheel produced in {}", out_dir.display()),
        }),
        n => Err(WheelsmithError::BuildFailed {
            reason: format!("{} wheels produced in {}, expected one", n, out_dir.display()),
        }),
    }
}
