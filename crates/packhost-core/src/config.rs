//! Host configuration.
//!
//! Defaults, environment variable names and the TOML-backed [`HostConfig`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::culture::Culture;

/// Default values
pub mod defaults {
    /// Packages directory, relative to the working directory
    pub const PACKAGES_DIR: &str = "packages";
    /// Whether package contexts release their libraries on unload
    pub const COLLECTIBLE: bool = true;
}

/// Environment variable names
pub mod env_vars {
    pub const PACKAGES_DIR: &str = "PACKHOST_PACKAGES_DIR";
    /// Comma-separated list
    pub const SHARED_LIBRARIES: &str = "PACKHOST_SHARED_LIBRARIES";
    pub const CULTURE: &str = "PACKHOST_CULTURE";
    pub const COLLECTIBLE: &str = "PACKHOST_COLLECTIBLE";
    /// Emit JSON logs from the CLI
    pub const LOG_JSON: &str = "PACKHOST_LOG_JSON";

    fn non_empty(var: &str) -> Option<String> {
        std::env::var(var)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    /// Packages directory from the environment, if set
    pub fn packages_dir() -> Option<std::path::PathBuf> {
        non_empty(PACKAGES_DIR).map(Into::into)
    }

    /// Shared library names from the environment, if set
    pub fn shared_libraries() -> Option<Vec<String>> {
        non_empty(SHARED_LIBRARIES).map(|value| super::split_list(&value))
    }

    /// Culture from the environment, if set
    pub fn culture() -> Option<String> {
        non_empty(CULTURE)
    }

    /// Collectible flag from the environment, if set to a recognised value
    pub fn collectible() -> Option<bool> {
        non_empty(COLLECTIBLE).and_then(|value| super::parse_bool(&value))
    }

    /// Whether JSON logging was requested
    pub fn log_json() -> bool {
        non_empty(LOG_JSON)
            .and_then(|value| super::parse_bool(&value))
            .unwrap_or(false)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Host configuration.
///
/// ```toml
/// packages_dir = "packages"
/// shared_libraries = ["contracts"]
/// host_library_dirs = ["/opt/app/lib"]
/// culture = "en-US"
/// collectible = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directory holding one subdirectory per package
    pub packages_dir: PathBuf,

    /// Libraries resolved from the host scope instead of the package
    pub shared_libraries: Vec<String>,

    /// Where shared libraries are searched; empty means the executable's directory
    pub host_library_dirs: Vec<PathBuf>,

    /// Culture for localized resources; `None` uses the process locale
    pub culture: Option<String>,

    /// Whether package contexts release their libraries on unload
    pub collectible: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            packages_dir: PathBuf::from(defaults::PACKAGES_DIR),
            shared_libraries: Vec::new(),
            host_library_dirs: Vec::new(),
            culture: None,
            collectible: defaults::COLLECTIBLE,
        }
    }
}

impl HostConfig {
    /// Load a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `PACKHOST_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = env_vars::packages_dir() {
            self.packages_dir = dir;
        }
        if let Some(names) = env_vars::shared_libraries() {
            self.shared_libraries = names;
        }
        if let Some(culture) = env_vars::culture() {
            self.culture = Some(culture);
        }
        if let Some(collectible) = env_vars::collectible() {
            self.collectible = collectible;
        }
        self
    }

    /// Culture to load packages with.
    pub fn culture(&self) -> Culture {
        match &self.culture {
            Some(name) => Culture::new(name.clone()),
            None => Culture::from_env(),
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
