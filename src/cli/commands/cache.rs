//! Cache command - inspect and maintain the local artifact cache

use crate::cache::{format_bytes, ArtifactCache, CacheEntry, CacheSizeStatus};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::cli::commands::{find_entry, open_cache};
use crate::config::Config;
use crate::error::WheelsmithResult;
use crate::hash::Digest;
use crate::ui::{self, ItemProgress, UiContext};
use chrono::Utc;
use console::style;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> WheelsmithResult<()> {
    let cache = open_cache(config).await?;

    let result = match args.action {
        CacheAction::Stats { format } => show_stats(&cache, format).await,
        CacheAction::List { format } => list_entries(&cache, format).await,
        CacheAction::Verify { digest } => verify(&cache, digest.as_deref()).await,
        CacheAction::Gc { days, dry_run } => gc(&cache, days, dry_run).await,
        CacheAction::Insert { wheel, source_hash } => {
            insert(&cache, &wheel, source_hash.as_deref().unwrap_or("")).await
        }
        CacheAction::Purge { digest } => purge(&cache, &digest).await,
        CacheAction::Clear { yes } => clear(&cache, yes).await,
    };

    cache.close().await?;
    result
}

async fn show_stats(cache: &ArtifactCache, format: OutputFormat) -> WheelsmithResult<()> {
    let stats = cache.stats().await;
    let limit = cache.limits().max_total_bytes;

    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "root": cache.root().display().to_string(),
                "stats": stats,
                "max_total_bytes": limit,
                "max_entries": cache.limits().max_entries,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Plain => {
            println!("{} {}", stats.entry_count, stats.total_size_bytes);
        }
        OutputFormat::Table => {
            let ctx = UiContext::detect();
            ui::key_value(&ctx, "root", &cache.root().display().to_string());
            ui::key_value(&ctx, "entries", &stats.entry_count.to_string());

            let status = CacheSizeStatus::from_usage(stats.total_size_bytes, limit);
            let size = if limit == 0 {
                format!("{} (unlimited)", format_bytes(stats.total_size_bytes))
            } else {
                format!(
                    "{} of {} ({:.0}%)",
                    format_bytes(stats.total_size_bytes),
                    format_bytes(limit),
                    CacheSizeStatus::percentage(stats.total_size_bytes, limit)
                )
            };
            ui::key_value_status(&ctx, "size", &size, status == CacheSizeStatus::Ok);
        }
    }
    Ok(())
}

async fn list_entries(cache: &ArtifactCache, format: OutputFormat) -> WheelsmithResult<()> {
    let entries = cache.entries().await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{}", entry.digest);
            }
        }
        OutputFormat::Table => {
            if entries.is_empty() {
                println!("Cache is empty.");
                return Ok(());
            }
            print_table(&entries);
        }
    }
    Ok(())
}

fn print_table(entries: &[CacheEntry]) {
    println!(
        "{:<14} {:<36} {:>10} {:<17}",
        "DIGEST", "PACKAGE", "SIZE", "LAST USED"
    );
    println!("{}", "-".repeat(80));

    for entry in entries {
        println!(
            "{:<14} {:<36} {:>10} {:<17}",
            entry.digest.short(),
            truncate(&entry.display_name(), 36),
            format_bytes(entry.size_bytes),
            entry.last_accessed_at.format("%Y-%m-%d %H:%M")
        );
    }

    let total: u64 = entries.iter().map(|e| e.size_bytes).sum();
    println!();
    println!("Total: {} wheel(s), {}", entries.len(), format_bytes(total));
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        return s.to_string();
    }
    let kept: String = s.chars().take(width.saturating_sub(3)).collect();
    format!("{}...", kept)
}

async fn verify(cache: &ArtifactCache, digest: Option<&str>) -> WheelsmithResult<()> {
    let ctx = UiContext::detect();
    let entries = match digest {
        Some(query) => vec![find_entry(cache, query).await?],
        None => cache.entries().await,
    };

    let progress = ItemProgress::new(&ctx, "Verifying", entries.len() as u64);
    let mut corrupt = Vec::new();
    for entry in &entries {
        progress.tick(entry.digest.short());
        if !cache.verify_integrity(entry).await? {
            corrupt.push(entry);
        }
    }
    progress.finish();

    if corrupt.is_empty() {
        ui::step_ok(&ctx, &format!("{} wheel(s) verified", entries.len()));
        return Ok(());
    }

    for entry in &corrupt {
        ui::step_error_detail(&ctx, "Corrupt, evicted", &entry.display_name());
    }
    ui::outro_warn(
        &ctx,
        &format!(
            "{} of {} wheel(s) failed verification",
            corrupt.len(),
            entries.len()
        ),
    );
    Ok(())
}

async fn gc(cache: &ArtifactCache, days: Option<u32>, dry_run: bool) -> WheelsmithResult<()> {
    let ctx = UiContext::detect();

    let idle: Vec<CacheEntry> = match days {
        Some(days) => cache
            .entries()
            .await
            .into_iter()
            .filter(|e| e.is_idle_for_days(days))
            .collect(),
        None => Vec::new(),
    };
    let idle_digests: HashSet<Digest> = idle.iter().map(|e| e.digest.clone()).collect();
    let over_budget = cache.eviction_plan(&idle_digests).await?;

    if dry_run {
        if idle.is_empty() && over_budget.is_empty() {
            println!("Nothing to remove.");
            return Ok(());
        }
        for entry in &idle {
            let age = (Utc::now() - entry.last_accessed_at).num_days();
            println!(
                "  {} {} (unused for {} days)",
                style("•").red(),
                entry.display_name(),
                age
            );
        }
        for entry in &over_budget {
            println!(
                "  {} {} (over budget, {})",
                style("•").red(),
                entry.display_name(),
                format_bytes(entry.size_bytes)
            );
        }
        println!();
        println!("Dry run - nothing removed.");
        return Ok(());
    }

    let sweep = cache.sweep().await?;
    if !sweep.is_clean() {
        ui::step_info(
            &ctx,
            &format!(
                "Reconciled storage: {} missing, {} adopted, {} orphan(s) deleted, {} stale staging item(s)",
                sweep.missing_dropped,
                sweep.orphans_adopted,
                sweep.orphans_deleted,
                sweep.stale_staging_removed
            ),
        );
    }

    let mut removed = 0;
    let mut freed = 0;
    for entry in &idle {
        debug!(digest = %entry.digest.short(), "Removing idle entry");
        match cache.purge(&entry.digest).await {
            Ok(purged) => {
                removed += 1;
                freed += purged.size_bytes;
            }
            Err(e) => ui::step_warn(&ctx, &format!("{}: {}", entry.display_name(), e)),
        }
    }

    let report = cache.evict_if_over_budget().await?;
    removed += report.evicted.len();
    freed += report.bytes_freed;

    ui::step_ok(
        &ctx,
        &format!("Removed {} wheel(s), freed {}", removed, format_bytes(freed)),
    );
    Ok(())
}

async fn insert(cache: &ArtifactCache, wheel: &Path, source_hash: &str) -> WheelsmithResult<()> {
    let ctx = UiContext::detect();
    let entry = cache.insert(wheel, source_hash).await?;
    cache.evict_if_over_budget().await?;
    ui::step_ok_detail(&ctx, &format!("Cached {}", entry.display_name()), entry.digest.as_str());
    Ok(())
}

async fn purge(cache: &ArtifactCache, query: &str) -> WheelsmithResult<()> {
    let ctx = UiContext::detect();
    let entry = find_entry(cache, query).await?;
    let purged = cache.purge(&entry.digest).await?;
    ui::step_ok_detail(
        &ctx,
        &format!("Purged {}", purged.display_name()),
        &format_bytes(purged.size_bytes),
    );
    Ok(())
}

async fn clear(cache: &ArtifactCache, yes: bool) -> WheelsmithResult<()> {
    let ctx = UiContext::detect().with_auto_yes(yes);
    let stats = cache.stats().await;

    if stats.entry_count == 0 {
        println!("Cache is already empty.");
        return Ok(());
    }

    let question = format!(
        "Remove {} cached wheel(s) ({})?",
        stats.entry_count,
        format_bytes(stats.total_size_bytes)
    );
    if !ui::confirm(&ctx, &question, false).await? {
        ui::remark(&ctx, "Aborted. Pass --yes to clear without prompting.");
        return Ok(());
    }

    let removed = cache.clear().await?;
    ui::step_ok(&ctx, &format!("Cleared {} wheel(s)", removed));
    Ok(())
}
