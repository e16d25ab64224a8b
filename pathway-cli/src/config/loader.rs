use anyhow::{Context, Result};
use directories::ProjectDirs;
use pathway_core::OrchestratorConfig;
use std::path::{Path, PathBuf};
use toml::{Table, Value};
use tracing::debug;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (defaults, user config, then `explicit`)
    pub fn load(explicit: Option<&Path>) -> Result<OrchestratorConfig> {
        Self::load_layers(Self::user_config_path().as_deref(), explicit)
    }

    /// Get user config path (platform-specific)
    /// Can be overridden with PATHWAY_CONFIG_DIR env var (useful for isolated e2e tests)
    pub fn user_config_path() -> Option<PathBuf> {
        if let Ok(dir) = std::env::var("PATHWAY_CONFIG_DIR") {
            return Some(PathBuf::from(dir).join("config.toml"));
        }
        ProjectDirs::from("", "", "pathway").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    fn load_layers(user: Option<&Path>, explicit: Option<&Path>) -> Result<OrchestratorConfig> {
        let mut merged = Table::new();

        // Layer 1: User config, skipped when absent
        if let Some(user_path) = user
            && user_path.exists()
        {
            debug!(path = %user_path.display(), "Loading user config");
            merge_tables(&mut merged, read_table(user_path)?);
        }

        // Layer 2: Explicit config, which must exist
        if let Some(path) = explicit {
            debug!(path = %path.display(), "Loading explicit config");
            merge_tables(&mut merged, read_table(path)?);
        }

        let config: OrchestratorConfig = Value::Table(merged)
            .try_into()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }
}

fn read_table(path: &Path) -> Result<Table> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("Failed to parse config {}", path.display()))
}

/// Overlay keys replace base keys; nested tables merge key by key.
fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        if let Value::Table(incoming) = value {
            if let Some(Value::Table(existing)) = base.get_mut(&key) {
                merge_tables(existing, incoming);
                continue;
            }
            base.insert(key, Value::Table(incoming));
        } else {
            base.insert(key, value);
        }
    }
}
