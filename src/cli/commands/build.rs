//! Build command - produce a wheel, reusing cached artifacts

use crate::audit::AuditLog;
use crate::build::{
    ArtifactOrigin, BuildEngine, BuildOptions, BuildRequest, BuildResult, CommandBuilder,
    ProjectMetadata, ResolvedSource,
};
use crate::cache::format_bytes;
use crate::cli::args::{BuildArgs, OutputFormat};
use crate::cli::commands::{open_cache, open_registry};
use crate::config::Config;
use crate::error::{WheelsmithError, WheelsmithResult};
use crate::ui::{self, TaskSpinner, UiContext};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config) -> WheelsmithResult<()> {
    let ctx = UiContext::detect().plain_if(args.format != OutputFormat::Table);

    let project_dir = match &args.path {
        Some(p) => p.clone(),
        None => std::env::current_dir()
            .map_err(|e| WheelsmithError::io("getting current directory", e))?,
    };
    let project_dir = project_dir
        .canonicalize()
        .map_err(|_| WheelsmithError::SourceNotFound(project_dir.clone()))?;

    let project = match (&args.name, &args.project_version) {
        (Some(name), Some(version)) => ProjectMetadata::new(name, version),
        _ => ProjectMetadata::from_pyproject(&project_dir)?,
    };
    let output_dir = resolve_output_dir(&project_dir, args.output.as_deref(), config);

    let options = BuildOptions {
        fingerprint: config.build.fingerprint.clone(),
        clean_output: args.clean || config.build.clean_output,
        publish: args.publish || config.build.publish,
        pull: !args.no_pull && config.build.pull,
        push_attempts: config.registry.push_retries,
    };

    let wants_registry = options.publish || options.pull;
    let registry = if wants_registry && config.registry_config()?.is_some() {
        Some(open_registry(config)?)
    } else {
        if args.publish {
            ui::step_warn_hint(
                &ctx,
                "No registry configured",
                "the wheel will only be cached locally",
            );
        }
        None
    };

    let cache = Arc::new(open_cache(config).await?);
    let builder = Arc::new(CommandBuilder::new(config.build.command.clone())?);
    let mut engine = BuildEngine::new(cache, builder, options).with_audit(AuditLog::new(config));
    if let Some(registry) = registry {
        debug!(transport = registry.transport_name(), "Registry enabled");
        engine = engine.with_registry(registry);
    }

    let request = BuildRequest {
        source: ResolvedSource::new(&project_dir),
        project,
        output_dir,
    };

    let mut spinner = TaskSpinner::new(&ctx);
    if args.format == OutputFormat::Table {
        spinner.start(&format!(
            "Building {} {}...",
            request.project.name, request.project.version
        ));
    }

    let result = match engine.build(&request).await {
        Ok(result) => result,
        Err(e) => {
            if args.format == OutputFormat::Table {
                spinner.stop_error("Build failed");
            }
            return Err(e);
        }
    };

    match args.format {
        OutputFormat::Table => {
            let summary = match result.origin {
                ArtifactOrigin::LocalCache => "Reused cached wheel",
                ArtifactOrigin::Registry => "Fetched wheel from registry",
                ArtifactOrigin::Built => "Built wheel",
            };
            if result.degraded {
                spinner.stop_warn(summary);
                ui::step_warn_hint(
                    &ctx,
                    "Registry unavailable during this build",
                    "the result was produced locally",
                );
            } else {
                spinner.stop(summary);
            }
            print_result(&ctx, &result);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Plain => println!("{}", result.artifact_path.display()),
    }

    Ok(())
}

/// `--output`, else `build.output_dir` relative to the project
fn resolve_output_dir(project_dir: &Path, cli: Option<&Path>, config: &Config) -> PathBuf {
    match cli {
        Some(path) => path.to_path_buf(),
        None if config.build.output_dir.is_absolute() => config.build.output_dir.clone(),
        None => project_dir.join(&config.build.output_dir),
    }
}

fn print_result(ctx: &UiContext, result: &BuildResult) {
    ui::key_value(ctx, "artifact", &result.artifact_path.display().to_string());
    ui::key_value(ctx, "digest", result.digest.as_str());
    if let Ok(meta) = std::fs::metadata(&result.artifact_path) {
        ui::key_value(ctx, "size", &format_bytes(meta.len()));
    }
    ui::key_value(ctx, "duration", &format!("{} ms", result.duration_ms));
    ui::key_value(ctx, "build id", &result.build_id.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn output_dir_resolution() {
        let mut config = Config::default();
        let project = Path::new("/work/demo");

        assert_eq!(
            resolve_output_dir(project, None, &config),
            PathBuf::from("/work/demo/dist")
        );
        assert_eq!(
            resolve_output_dir(project, Some(Path::new("out")), &config),
            PathBuf::from("out")
        );

        config.build.output_dir = PathBuf::from("/var/wheels/demo");
        assert_eq!(
            resolve_output_dir(project, None, &config),
            PathBuf::from("/var/wheels/demo")
        );
    }
}
