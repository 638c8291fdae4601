//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager, LOCAL_CONFIG_FILE};
use crate::error::{WheelsmithError, WheelsmithResult};
use crate::ui::{self, UiContext};
use std::path::Path;
use tokio::fs;

/// Keys that default to unset and therefore do not appear in a serialized default config
const OPTIONAL_KEYS: &[&str] = &["cache.root", "registry.endpoint"];

/// Execute the config command
pub async fn execute(
    args: ConfigArgs,
    config: &Config,
    manager: &ConfigManager,
) -> WheelsmithResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => println!("{}", toml::to_string_pretty(config)?),
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value, local }) => {
            let path = if local {
                std::env::current_dir()
                    .map_err(|e| WheelsmithError::io("getting current directory", e))?
                    .join(LOCAL_CONFIG_FILE)
            } else {
                manager.path().to_path_buf()
            };
            set_value(&path, &key, &value).await?;
            ui::step_ok(
                &UiContext::detect(),
                &format!("Set {} = {} in {}", key, value, path.display()),
            );
        }
    }

    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> WheelsmithResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            &ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok_detail(&ctx, "Configuration initialized", &path.display().to_string());
    Ok(())
}

/// TOML type a key holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Bool,
    Integer,
    String,
    List,
}

/// Look up a dotted key in the schema
fn key_kind(key: &str) -> WheelsmithResult<ValueKind> {
    if OPTIONAL_KEYS.contains(&key) {
        return Ok(ValueKind::String);
    }

    let unknown = || WheelsmithError::ConfigKeyUnknown(key.to_string());
    let defaults = toml::Value::try_from(Config::default())?;
    let mut current = &defaults;
    for part in key.split('.') {
        current = current.get(part).ok_or_else(unknown)?;
    }

    match current {
        toml::Value::Boolean(_) => Ok(ValueKind::Bool),
        toml::Value::Integer(_) => Ok(ValueKind::Integer),
        toml::Value::String(_) => Ok(ValueKind::String),
        toml::Value::Array(_) => Ok(ValueKind::List),
        _ => Err(unknown()),
    }
}

fn typed_value(kind: ValueKind, raw: &str) -> WheelsmithResult<toml_edit::Item> {
    let item = match kind {
        ValueKind::Bool => toml_edit::value(parse_bool(raw)?),
        ValueKind::Integer => toml_edit::value(
            raw.trim()
                .parse::<i64>()
                .map_err(|_| WheelsmithError::User(format!("Invalid number: {}", raw)))?,
        ),
        ValueKind::String => toml_edit::value(raw),
        ValueKind::List => {
            let items: toml_edit::Array = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            toml_edit::value(items)
        }
    };
    Ok(item)
}

/// Set `key` in the file at `path`, keeping the rest of the file as written
async fn set_value(path: &Path, key: &str, raw: &str) -> WheelsmithResult<()> {
    let item = typed_value(key_kind(key)?, raw)?;

    let content = if path.exists() {
        fs::read_to_string(path)
            .await
            .map_err(|e| WheelsmithError::io(format!("reading {}", path.display()), e))?
    } else {
        String::new()
    };

    let mut doc: toml_edit::DocumentMut = content.parse()?;
    let parts: Vec<&str> = key.split('.').collect();
    let (leaf, parents) = parts
        .split_last()
        .ok_or_else(|| WheelsmithError::ConfigKeyUnknown(key.to_string()))?;

    let mut table = doc.as_table_mut();
    for part in parents {
        table = table
            .entry(part)
            .or_insert(toml_edit::table())
            .as_table_mut()
            .ok_or_else(|| WheelsmithError::ConfigInvalid {
                path: path.to_path_buf(),
                reason: format!("'{}' is not a table", part),
            })?;
    }
    table[*leaf] = item;

    let updated = doc.to_string();
    toml::from_str::<Config>(&updated).map_err(|e| WheelsmithError::ConfigInvalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| WheelsmithError::ConfigDirCreate {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }
    fs::write(path, updated)
        .await
        .map_err(|e| WheelsmithError::io(format!("writing {}", path.display()), e))
}

fn parse_bool(value: &str) -> WheelsmithResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(WheelsmithError::User(format!(
            "Invalid boolean value: {}. Use true/false",
            value
        ))),
    }
}
