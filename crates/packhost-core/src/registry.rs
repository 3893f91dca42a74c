//! Package registry.
//!
//! Loads every package below one directory and answers factory lookups
//! across all of them.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use packhost_sdk::{EntityId, EntityIdTemplate};
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::HostConfig;
use crate::culture::Culture;
use crate::error::{PackageError, Result};
use crate::loader::{DylibLoader, LibraryLoader};
use crate::package::{FactoryRef, Package, PackageLoadOptions};
use crate::shared::SharedScope;

/// Outcome of one [`PackageRegistry::load_all`] pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    /// Packages added to the registry
    pub loaded: Vec<EntityId>,

    /// Directories whose package was already loaded
    pub duplicates: Vec<PathBuf>,

    /// Directories that failed to load
    pub failed: Vec<LoadFailure>,
}

/// A package directory that failed to load.
#[derive(Debug, Clone, Serialize)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Registry of loaded packages.
pub struct PackageRegistry {
    packages_dir: PathBuf,
    shared: Arc<SharedScope>,
    loader: Arc<dyn LibraryLoader>,
    collectible: bool,
    packages: RwLock<IndexMap<EntityId, Arc<Package>>>,
}

impl PackageRegistry {
    /// Registry over `packages_dir`, resolved against the working directory.
    pub fn new(packages_dir: impl AsRef<Path>) -> Self {
        let packages_dir = packages_dir.as_ref();
        Self {
            packages_dir: std::path::absolute(packages_dir)
                .unwrap_or_else(|_| packages_dir.to_path_buf()),
            shared: Arc::new(SharedScope::empty()),
            loader: Arc::new(DylibLoader::new()),
            collectible: true,
            packages: RwLock::new(IndexMap::new()),
        }
    }

    /// Build a registry from host configuration.
    pub fn from_config(config: &HostConfig) -> Self {
        let mut shared = SharedScope::new(config.shared_libraries.iter().cloned());
        if !config.host_library_dirs.is_empty() {
            shared = shared.with_search_dirs(config.host_library_dirs.iter().cloned());
        }

        Self::new(&config.packages_dir)
            .with_shared_scope(Arc::new(shared))
            .with_collectible(config.collectible)
    }

    /// Resolve the named libraries from the host scope.
    pub fn with_shared_libraries<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_shared_scope(Arc::new(SharedScope::new(names)))
    }

    pub fn with_shared_scope(mut self, shared: Arc<SharedScope>) -> Self {
        self.shared = shared;
        self
    }

    /// Use a different library loader.
    pub fn with_loader(mut self, loader: Arc<dyn LibraryLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_collectible(mut self, collectible: bool) -> Self {
        self.collectible = collectible;
        self
    }

    pub fn packages_dir(&self) -> &Path {
        &self.packages_dir
    }

    pub fn shared_scope(&self) -> &Arc<SharedScope> {
        &self.shared
    }

    pub fn is_collectible(&self) -> bool {
        self.collectible
    }

    /// Load every package directory below the packages directory.
    ///
    /// Directories are processed in name order. A package that fails to
    /// load is logged and skipped; a package whose identity is already
    /// loaded is disposed. Only a missing packages directory is an error.
    pub fn load_all(&self, culture: &Culture) -> Result<LoadReport> {
        if !self.packages_dir.is_dir() {
            return Err(PackageError::PackagesDirMissing(self.packages_dir.clone()));
        }

        let entries = std::fs::read_dir(&self.packages_dir).map_err(|source| PackageError::Io {
            path: self.packages_dir.clone(),
            source,
        })?;
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();

        let options = PackageLoadOptions::new(culture.clone()).with_collectible(self.collectible);
        let mut report = LoadReport::default();
        let mut packages = self.packages.write();

        for dir in dirs {
            let package = match Package::load(
                &dir,
                &options,
                Arc::clone(&self.shared),
                Arc::clone(&self.loader),
            ) {
                Ok(package) => package,
                Err(e) => {
                    tracing::warn!(path = %dir.display(), error = %e, "Failed to load package");
                    report.failed.push(LoadFailure {
                        path: dir,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let identity = package.identity().clone();
            if packages.contains_key(&identity) {
                tracing::debug!(
                    package = %identity,
                    path = %dir.display(),
                    "Package already loaded, discarding duplicate"
                );
                package.dispose();
                report.duplicates.push(dir);
                continue;
            }

            tracing::info!(
                package = %identity.name,
                version = %identity.version,
                factories = package.factory_count(),
                "Package loaded"
            );
            packages.insert(identity.clone(), Arc::new(package));
            report.loaded.push(identity);
        }

        Ok(report)
    }

    /// [`load_all`](Self::load_all) on the blocking thread pool.
    pub async fn load_all_async(self: &Arc<Self>, culture: Culture) -> Result<LoadReport> {
        let registry = Arc::clone(self);
        tokio::task::spawn_blocking(move || registry.load_all(&culture)).await?
    }

    /// Snapshot of loaded packages, in load order.
    pub fn packages(&self) -> Vec<Arc<Package>> {
        self.packages.read().values().cloned().collect()
    }

    /// Package with exactly this identity.
    pub fn package(&self, identity: &EntityId) -> Option<Arc<Package>> {
        self.packages.read().get(identity).cloned()
    }

    /// All loaded versions of package `id`, lowest version first.
    pub fn get_packages_by_id(&self, id: &str) -> Vec<Arc<Package>> {
        let mut found: Vec<Arc<Package>> = self
            .packages
            .read()
            .values()
            .filter(|package| package.package_id() == id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.version().cmp(b.version()));
        found
    }

    pub fn len(&self) -> usize {
        self.packages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.read().is_empty()
    }

    /// Find a factory.
    ///
    /// An exact template matches a module identity in the first package
    /// that has it. A name-only template matches the first factory whose
    /// factory id equals the name. A template without a name returns the
    /// first factory of the first package that has any.
    pub fn find_factory(&self, template: &EntityIdTemplate) -> Option<FactoryRef> {
        let packages = self.packages.read();

        if let Some(id) = template.as_exact() {
            return packages.values().find_map(|package| package.factory(&id));
        }

        match &template.name {
            Some(name) => packages.values().find_map(|package| {
                let factories = package.factories();
                let found = factories
                    .values()
                    .find(|factory| factory.factory_id() == name)
                    .cloned();
                found
            }),
            None => packages.values().find_map(|package| {
                let factories = package.factories();
                let first = factories.values().next().cloned();
                first
            }),
        }
    }

    /// Dispose every package and empty the registry.
    ///
    /// A package whose teardown panics is logged and the rest are still
    /// disposed.
    pub fn dispose(&self) {
        let mut packages = self.packages.write();

        for (identity, package) in packages.iter() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| package.dispose()));
            if let Err(panic) = result {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(package = %identity, error = %message, "Package disposal panicked");
            }
        }

        packages.clear();
    }
}

impl Drop for PackageRegistry {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for PackageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageRegistry")
            .field("packages_dir", &self.packages_dir)
            .field("collectible", &self.collectible)
            .field("packages", &self.packages.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_packages_dir() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PackageRegistry::new(dir.path().join("missing"));
        let err = registry.load_all(&Culture::invariant()).unwrap_err();
        assert!(matches!(err, PackageError::PackagesDirMissing(_)));
    }

    #[test]
    fn test_relative_dir_is_made_absolute() {
        let registry = PackageRegistry::new("packages");
        assert!(registry.packages_dir().is_absolute());
        assert!(registry.packages_dir().ends_with("packages"));
    }

    #[test]
    fn test_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stray-file.txt"), b"ignored").unwrap();

        let registry = PackageRegistry::new(dir.path());
        let report = registry.load_all(&Culture::invariant()).unwrap();
        assert!(report.loaded.is_empty());
        assert!(report.failed.is_empty());
        assert!(registry.is_empty());
        assert!(registry.find_factory(&EntityIdTemplate::any()).is_none());

        registry.dispose();
        registry.dispose();
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_from_config() {
        let config = HostConfig {
            packages_dir: PathBuf::from("/srv/packages"),
            shared_libraries: vec!["contracts".to_string()],
            host_library_dirs: vec![PathBuf::from("/opt/host/lib")],
            culture: None,
            collectible: false,
        };

        let registry = PackageRegistry::from_config(&config);
        assert!(!registry.is_collectible());
        assert!(registry.shared_scope().contains("contracts"));
        assert_eq!(
            registry.shared_scope().search_dirs(),
            &[PathBuf::from("/opt/host/lib")]
        );
    }
}
