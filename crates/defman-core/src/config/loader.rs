//! Layered configuration loading
//!
//! Layers, later overriding earlier:
//! 1. User-global `<config_dir>/defman/config.toml`
//! 2. Project `defman.toml`
//!
//! Tables are merged key by key. The `sources` and `profiles` arrays are
//! merged by `name`, so a project can override one source without restating
//! the others. Missing layers are skipped.

use std::path::PathBuf;

use defman_fs::ConfigStore;
use serde_json::Value;

use super::EngineConfig;
use crate::{Error, Result};

/// File name of the project configuration layer.
pub const PROJECT_CONFIG_FILE: &str = "defman.toml";

const NAMED_ARRAYS: [&str; 2] = ["sources", "profiles"];

/// Loads [`EngineConfig`] for a project.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    project_root: PathBuf,
    global_config_dir_override: Option<PathBuf>,
    explicit: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            global_config_dir_override: None,
            explicit: None,
        }
    }

    /// Use a custom global config directory instead of the platform one.
    pub fn with_global_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.global_config_dir_override = Some(dir.into());
        self
    }

    /// Load this file as the project layer instead of `defman.toml`.
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit = Some(path.into());
        self
    }

    fn global_config_path(&self) -> Option<PathBuf> {
        match &self.global_config_dir_override {
            Some(dir) => Some(dir.join("config.toml")),
            None => dirs::config_dir().map(|d| d.join("defman").join("config.toml")),
        }
    }

    fn project_config_path(&self) -> PathBuf {
        self.explicit
            .clone()
            .unwrap_or_else(|| self.project_root.join(PROJECT_CONFIG_FILE))
    }

    pub fn load(&self) -> Result<EngineConfig> {
        let store = ConfigStore::new();
        let mut merged = Value::Object(Default::default());

        if let Some(global) = self.global_config_path() {
            if global.is_file() {
                tracing::debug!(path = %global.display(), "Loading global config");
                merge(&mut merged, store.load::<Value>(&global)?);
            } else {
                tracing::debug!(path = %global.display(), "No global config, skipping");
            }
        }

        let project = self.project_config_path();
        if project.is_file() {
            tracing::debug!(path = %project.display(), "Loading project config");
            merge(&mut merged, store.load::<Value>(&project)?);
        } else if self.explicit.is_some() {
            return Err(Error::NotFound(format!(
                "config file {}",
                project.display()
            )));
        }

        let config: EngineConfig =
            serde_json::from_value(merged).map_err(|e| Error::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

fn merge(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base), Value::Object(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) if NAMED_ARRAYS.contains(&key.as_str()) => {
                        merge_named(existing, value)
                    }
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

fn merge_named(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Array(base), Value::Array(layer)) => {
            for item in layer {
                let name = item.get("name").and_then(Value::as_str).map(str::to_string);
                let existing = name.and_then(|name| {
                    base.iter_mut()
                        .find(|b| b.get("name").and_then(Value::as_str) == Some(name.as_str()))
                });
                match existing {
                    Some(slot) => merge(slot, item),
                    None => base.push(item),
                }
            }
        }
        (base, layer) => *base = layer,
    }
}
