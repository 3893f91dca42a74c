//! Package descriptor (`package.json`).
//!
//! A descriptor is a flat JSON object. Three properties are required:
//!
//! ```json
//! {
//!     "PackageId": "demo",
//!     "Version": "1.0",
//!     "RootAssembly": "libdemo.so"
//! }
//! ```
//!
//! Every other property is kept in the property bag. `Dependencies` and
//! `NativeDependencies`, when present, list libraries the root library
//! needs and are resolved right after it is opened.

use std::path::{Path, PathBuf};

use packhost_sdk::{parse_version, EntityId, IdentityError, Version};
use serde::Serialize;
use serde_json::{Map, Value};

/// Descriptor file name inside a package directory.
pub const PACKAGE_FILE_NAME: &str = "package.json";

/// Property holding the package id.
pub const PACKAGE_ID_PROPERTY: &str = "PackageId";

/// Property holding the package version.
pub const PACKAGE_VERSION_PROPERTY: &str = "Version";

/// Property holding the root library path, relative to the package directory.
pub const ROOT_LIBRARY_PROPERTY: &str = "RootAssembly";

/// Optional list of module libraries the root library depends on.
pub const DEPENDENCIES_PROPERTY: &str = "Dependencies";

/// Optional list of native libraries the root library depends on.
pub const NATIVE_DEPENDENCIES_PROPERTY: &str = "NativeDependencies";

/// Descriptor errors.
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("failed to read package.json: {0}")]
    Read(#[source] std::io::Error),

    #[error("malformed package.json: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("missing required property '{0}'")]
    MissingField(&'static str),

    #[error("invalid property '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("invalid version '{value}': {source}")]
    InvalidVersion {
        value: String,
        #[source]
        source: IdentityError,
    },
}

/// Parsed package metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageDescriptor {
    /// Package id
    pub package_id: String,

    /// Package version
    pub version: Version,

    /// Root library, relative to the package directory
    pub root_library: PathBuf,

    /// Module libraries to resolve after the root library
    pub dependencies: Vec<String>,

    /// Native libraries to resolve after the root library
    pub native_dependencies: Vec<String>,

    /// Every property of the descriptor, required ones included
    pub properties: Map<String, Value>,
}

impl PackageDescriptor {
    /// Read the descriptor of the package in `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self, DescriptorError> {
        Self::from_file(&dir.join(PACKAGE_FILE_NAME))
    }

    /// Read a descriptor file.
    pub fn from_file(path: &Path) -> Result<Self, DescriptorError> {
        let contents = std::fs::read_to_string(path).map_err(DescriptorError::Read)?;
        Self::parse(&contents)
    }

    /// Parse descriptor JSON.
    pub fn parse(contents: &str) -> Result<Self, DescriptorError> {
        let value: Value = serde_json::from_str(contents).map_err(DescriptorError::Parse)?;
        let Value::Object(properties) = value else {
            return Err(DescriptorError::InvalidField {
                field: PACKAGE_FILE_NAME,
                reason: "expected a JSON object".to_string(),
            });
        };

        let package_id = required_string(&properties, PACKAGE_ID_PROPERTY)?;

        let raw_version = required_string(&properties, PACKAGE_VERSION_PROPERTY)?;
        let version =
            parse_version(&raw_version).map_err(|source| DescriptorError::InvalidVersion {
                value: raw_version.clone(),
                source,
            })?;

        let root_library = PathBuf::from(required_string(&properties, ROOT_LIBRARY_PROPERTY)?);
        if root_library.is_absolute() {
            return Err(DescriptorError::InvalidField {
                field: ROOT_LIBRARY_PROPERTY,
                reason: "must be relative to the package directory".to_string(),
            });
        }

        let dependencies = optional_strings(&properties, DEPENDENCIES_PROPERTY)?;
        let native_dependencies = optional_strings(&properties, NATIVE_DEPENDENCIES_PROPERTY)?;

        Ok(Self {
            package_id,
            version,
            root_library,
            dependencies,
            native_dependencies,
            properties,
        })
    }

    /// Package identity: the package id as name plus the package version.
    pub fn identity(&self) -> EntityId {
        EntityId::new(self.package_id.clone(), self.version.clone())
    }

    /// Look up a property.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

fn required_string(
    properties: &Map<String, Value>,
    field: &'static str,
) -> Result<String, DescriptorError> {
    match properties.get(field) {
        None | Some(Value::Null) => Err(DescriptorError::MissingField(field)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(DescriptorError::InvalidField {
            field,
            reason: "must not be empty".to_string(),
        }),
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(other) => Err(DescriptorError::InvalidField {
            field,
            reason: format!("expected a string, found {}", other),
        }),
    }
}

fn optional_strings(
    properties: &Map<String, Value>,
    field: &'static str,
) -> Result<Vec<String>, DescriptorError> {
    let invalid = || DescriptorError::InvalidField {
        field,
        reason: "expected an array of strings".to_string(),
    };

    match properties.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(invalid))
            .collect(),
        Some(_) => Err(invalid()),
    }
}
