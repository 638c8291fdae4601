//! Registry command - publish and fetch wheels

use crate::cache::ArtifactCache;
use crate::cli::args::{RegistryAction, RegistryArgs};
use crate::cli::commands::{find_entry, open_cache, open_registry};
use crate::config::Config;
use crate::error::{WheelsmithError, WheelsmithResult};
use crate::registry::{ArtifactId, PushOutcome, WheelRegistry};
use crate::ui::{self, TaskSpinner, UiContext};
use std::path::Path;

/// Execute the registry command
pub async fn execute(args: RegistryArgs, config: &Config) -> WheelsmithResult<()> {
    let registry = open_registry(config)?;
    let cache = open_cache(config).await?;

    let result = match args.action {
        RegistryAction::Push { digests, retries } => {
            let attempts = retries.unwrap_or(config.registry.push_retries);
            push(&registry, &cache, &digests, attempts).await
        }
        RegistryAction::Pull { id, output } => pull(&registry, &cache, &id, output.as_deref()).await,
    };

    cache.close().await?;
    result
}

async fn push(
    registry: &WheelRegistry,
    cache: &ArtifactCache,
    queries: &[String],
    attempts: u32,
) -> WheelsmithResult<()> {
    let ctx = UiContext::detect();
    ui::intro(&ctx, &format!("Publishing to {}", registry.config().endpoint()));

    let mut failed = 0;
    for query in queries {
        let entry = find_entry(cache, query).await?;
        let Some(artifact) = cache.lease(&entry.digest).await? else {
            return Err(WheelsmithError::EntryNotFound(entry.digest.to_string()));
        };
        let bytes = artifact.read().await?;

        match registry.push_with_retries(artifact.entry(), &bytes, attempts).await {
            Ok(PushOutcome::Uploaded) => {
                ui::step_ok_detail(&ctx, &entry.display_name(), "uploaded")
            }
            Ok(PushOutcome::AlreadyPresent) => {
                ui::step_ok_detail(&ctx, &entry.display_name(), "already present")
            }
            Err(e) if e.is_retryable() => {
                ui::step_error_detail(&ctx, &entry.display_name(), &e.to_string());
                failed += 1;
            }
            Err(e) => return Err(e),
        }
    }

    if failed > 0 {
        return Err(WheelsmithError::registry_unavailable(
            registry.config().endpoint().as_str(),
            format!("{} of {} push(es) failed", failed, queries.len()),
        ));
    }
    ui::outro_success(&ctx, &format!("Published {} wheel(s)", queries.len()));
    Ok(())
}

async fn pull(
    registry: &WheelRegistry,
    cache: &ArtifactCache,
    id: &str,
    output: Option<&Path>,
) -> WheelsmithResult<()> {
    let ctx = UiContext::detect();
    let id = ArtifactId::parse(id)?;

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Pulling {}...", id));
    let entry = match registry.pull_into(&id, cache).await {
        Ok(Some(entry)) => entry,
        Ok(None) => {
            spinner.stop_error(&format!("{} not found in registry", id));
            return Err(WheelsmithError::User(format!("Registry has no artifact {}", id)));
        }
        Err(e) => {
            spinner.stop_error("Pull failed");
            return Err(e);
        }
    };
    spinner.stop(&format!("Cached {}", entry.display_name()));
    ui::key_value(&ctx, "digest", entry.digest.as_str());

    if let Some(dir) = output {
        let artifact = cache
            .lease(&entry.digest)
            .await?
            .ok_or_else(|| WheelsmithError::EntryNotFound(entry.digest.to_string()))?;
        let path = artifact.copy_to(dir).await?;
        ui::key_value(&ctx, "artifact", &path.display().to_string());
    }

    cache.evict_if_over_budget().await?;
    Ok(())
}
