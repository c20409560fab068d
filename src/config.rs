//! Compiler configuration, loaded from TOML.
//!
//! Every field has a default so an empty file (or no file) is a valid config.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompilerConfig {
    /// Stamped into cache manifests and build metadata.
    pub tool_version: String,
    /// Written as the `#compiler` line of cache manifests.
    pub compiler_id: Option<String>,
    pub view_extensions: Vec<String>,
    /// Types from these assemblies are never hashed or forwarded through.
    pub framework_assemblies: Vec<String>,
    pub framework_template_type: String,
    pub content_control_type: String,
    pub items_control_type: String,
    pub baseline_imports: Vec<String>,
    pub runtime_module: String,
    pub references: ReferenceConfig,
    pub emit: EmitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReferenceConfig {
    pub runtime_name: String,
    pub package_cache: Option<PathBuf>,
    pub sdk_root: Option<PathBuf>,
    /// Command that installs the runtime reference pack into the package cache.
    pub acquire_command: Vec<String>,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmitConfig {
    pub base_address: u64,
    pub file_alignment: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum BuildConfiguration {
    #[default]
    Debug,
    Release,
}

impl fmt::Display for BuildConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildConfiguration::Debug => f.write_str("Debug"),
            BuildConfiguration::Release => f.write_str("Release"),
        }
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            compiler_id: Some("oxc".to_string()),
            view_extensions: vec!["view".to_string(), "xml".to_string()],
            framework_assemblies: vec![
                "System.Runtime".to_string(),
                "System.Private.CoreLib".to_string(),
                "Ui.Framework".to_string(),
            ],
            framework_template_type: "Ui.FrameworkTemplate".to_string(),
            content_control_type: "Ui.ContentControl".to_string(),
            items_control_type: "Ui.ItemsControl".to_string(),
            baseline_imports: vec!["@views/runtime".to_string(), "System".to_string()],
            runtime_module: "@views/runtime".to_string(),
            references: ReferenceConfig::default(),
            emit: EmitConfig::default(),
        }
    }
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            runtime_name: "Views.Runtime.Ref".to_string(),
            package_cache: None,
            sdk_root: None,
            acquire_command: Vec::new(),
            acquire_timeout_secs: 120,
        }
    }
}

impl Default for EmitConfig {
    fn default() -> Self {
        Self {
            base_address: 0x0040_0000,
            file_alignment: 0x200,
        }
    }
}

impl CompilerConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn framework_set(&self) -> HashSet<String> {
        self.framework_assemblies.iter().cloned().collect()
    }

    pub fn is_view_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map_or(false, |ext| {
                self.view_extensions
                    .iter()
                    .any(|v| v.eq_ignore_ascii_case(ext))
            })
    }
}
