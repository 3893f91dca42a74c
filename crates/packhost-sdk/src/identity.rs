//! Versioned identities for packages and module types.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{IdentityError, IdentityResult};

/// A name and a version.
///
/// Used both for module types (the identities a factory supports) and for
/// packages (package id plus package version). Equality, hashing and
/// ordering are structural: by name first, then by version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId {
    /// Entity name
    pub name: String,

    /// Entity version
    pub version: Version,
}

impl EntityId {
    /// Create a new identity.
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Create an identity from a name and a lenient version string (`"1.0"`).
    pub fn parse_parts(name: impl Into<String>, version: &str) -> IdentityResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(IdentityError::EmptyName);
        }
        Ok(Self::new(name, parse_version(version)?))
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

impl FromStr for EntityId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, version) = s
            .rsplit_once('@')
            .ok_or_else(|| IdentityError::InvalidFormat(s.to_string()))?;
        Self::parse_parts(name.trim(), version)
    }
}

/// Parse a version leniently.
///
/// Accepts one to four numeric components with an optional semver
/// pre-release or build suffix. Missing components are zero, so `"1"`,
/// `"1.0"` and `"1.0.0"` all parse to `1.0.0`. A fourth (revision)
/// component moves into build metadata: `"1.0.0.7"` parses to `1.0.0+7`.
pub fn parse_version(input: &str) -> IdentityResult<Version> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| c == '-' || c == '+')
        .unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(split);

    let components: Vec<&str> = core.split('.').collect();
    let normalized = match components.as_slice() {
        [_] => format!("{}.0.0{}", core, suffix),
        [_, _] => format!("{}.0{}", core, suffix),
        [major, minor, patch, revision]
            if !revision.is_empty() && revision.bytes().all(|b| b.is_ascii_digit()) =>
        {
            let (pre, build) = match suffix.split_once('+') {
                Some((pre, build)) => (pre, format!("+{}.{}", revision, build)),
                None => (suffix, format!("+{}", revision)),
            };
            format!("{}.{}.{}{}{}", major, minor, patch, pre, build)
        }
        _ => trimmed.to_string(),
    };

    Version::parse(&normalized).map_err(|source| IdentityError::InvalidVersion {
        input: input.to_string(),
        source,
    })
}

/// A lookup template: an exact identity, a name with any version, or anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct EntityIdTemplate {
    /// Requested name, `None` for any
    pub name: Option<String>,

    /// Requested version, `None` for any
    pub version: Option<Version>,
}

impl EntityIdTemplate {
    /// Template matching exactly one identity.
    pub fn exact(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: Some(name.into()),
            version: Some(version),
        }
    }

    /// Template matching a name with any version.
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            version: None,
        }
    }

    /// Template matching anything.
    pub fn any() -> Self {
        Self::default()
    }

    /// Whether both name and version are given.
    pub fn is_exact(&self) -> bool {
        self.name.is_some() && self.version.is_some()
    }

    /// The exact identity, if this template names one.
    pub fn as_exact(&self) -> Option<EntityId> {
        match (&self.name, &self.version) {
            (Some(name), Some(version)) => Some(EntityId::new(name.clone(), version.clone())),
            _ => None,
        }
    }
}

impl From<EntityId> for EntityIdTemplate {
    fn from(id: EntityId) -> Self {
        Self {
            name: Some(id.name),
            version: Some(id.version),
        }
    }
}

impl From<&EntityId> for EntityIdTemplate {
    fn from(id: &EntityId) -> Self {
        id.clone().into()
    }
}

impl Display for EntityIdTemplate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = self.name.as_deref().unwrap_or("*");
        match &self.version {
            Some(version) => write!(f, "{}@{}", name, version),
            None => write!(f, "{}@*", name),
        }
    }
}
