//! Culture names and localization directory lookup.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::env_vars;

/// Directory used when no better localization directory matches.
pub const DEFAULT_CULTURE_DIR: &str = "en";

/// A culture name in `ll-CC` form (`en-US`, `de`). Empty is the invariant culture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Culture(String);

impl Culture {
    /// Create a culture from a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The invariant culture.
    pub fn invariant() -> Self {
        Self::default()
    }

    /// Culture name.
    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn is_invariant(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert a POSIX locale (`en_US.UTF-8`, `sr_RS@latin`) to a culture.
    pub fn from_locale(locale: &str) -> Self {
        let name = locale
            .split(['.', '@'])
            .next()
            .unwrap_or_default()
            .trim();

        match name {
            "" | "C" | "POSIX" => Self::invariant(),
            name => Self(name.replace('_', "-")),
        }
    }

    /// Culture of the current process.
    ///
    /// `PACKHOST_CULTURE` wins, then the usual locale variables.
    pub fn from_env() -> Self {
        if let Some(culture) = env_vars::culture() {
            return Self(culture);
        }

        ["LC_ALL", "LC_MESSAGES", "LANG"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|value| !value.trim().is_empty())
            .map(|value| Self::from_locale(&value))
            .unwrap_or_default()
    }
}

impl fmt::Display for Culture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invariant() {
            write!(f, "(invariant)")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<&str> for Culture {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Find the localization directory of a package.
///
/// Prefers a subdirectory named exactly like the culture, then the first
/// subdirectory (in name order) whose name is contained in the culture name,
/// then [`DEFAULT_CULTURE_DIR`].
pub fn resolve_culture_dir(root: &Path, culture: &Culture) -> Option<PathBuf> {
    let mut names: Vec<String> = std::fs::read_dir(root)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    let wanted = culture.name();
    names
        .iter()
        .find(|name| name.as_str() == wanted)
        .or_else(|| names.iter().find(|name| wanted.contains(name.as_str())))
        .or_else(|| names.iter().find(|name| name.as_str() == DEFAULT_CULTURE_DIR))
        .map(|name| root.join(name))
}
