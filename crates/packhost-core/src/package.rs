//! A loaded package.
//!
//! [`Package::load`] turns one package directory into a loaded unit: it
//! reads the descriptor, sets up a [`ResolutionContext`], opens the root
//! library, runs the registration export of every module library that ends
//! up in the context, and indexes the resulting factories by the module
//! identities they support.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use packhost_sdk::{EntityId, LibraryHandle, Module, ModuleFactory, Version};
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::context::{ProbePaths, ResolutionContext};
use crate::culture::{self, Culture};
use crate::descriptor::PackageDescriptor;
use crate::error::{PackageError, Result};
use crate::loader::{LibraryLoader, LoadedLibrary};
use crate::platform;
use crate::shared::SharedScope;

/// Module identity to factory, in registration order.
pub type FactoryMap = IndexMap<EntityId, FactoryRef>;

/// Options for loading a package.
#[derive(Debug, Clone)]
pub struct PackageLoadOptions {
    /// Culture used to pick the localization directory
    pub culture: Culture,

    /// Whether the package's libraries are released on dispose
    pub collectible: bool,
}

impl PackageLoadOptions {
    pub fn new(culture: Culture) -> Self {
        Self {
            culture,
            collectible: true,
        }
    }

    pub fn with_collectible(mut self, collectible: bool) -> Self {
        self.collectible = collectible;
        self
    }
}

impl Default for PackageLoadOptions {
    fn default() -> Self {
        Self::new(Culture::invariant())
    }
}

/// A factory together with the library its code lives in.
///
/// Holding a `FactoryRef` keeps that library mapped, even after the
/// package that registered it has been disposed.
#[derive(Clone)]
pub struct FactoryRef {
    factory: Arc<dyn ModuleFactory>,
    library: Arc<LoadedLibrary>,
}

impl FactoryRef {
    pub fn factory(&self) -> &Arc<dyn ModuleFactory> {
        &self.factory
    }

    pub fn factory_id(&self) -> &str {
        self.factory.factory_id()
    }

    pub fn supported_modules(&self) -> Vec<EntityId> {
        self.factory.supported_modules()
    }

    /// Name of the library that registered this factory.
    pub fn library_name(&self) -> &str {
        self.library.name()
    }

    /// Create a module instance.
    pub fn create(&self, id: &EntityId) -> Option<ModuleInstance> {
        let module = self.factory.create_module(id)?;
        Some(ModuleInstance {
            module,
            _library: Arc::clone(&self.library),
        })
    }
}

impl std::fmt::Debug for FactoryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryRef")
            .field("factory_id", &self.factory.factory_id())
            .field("library", &self.library.name())
            .finish()
    }
}

/// A module created by a package factory.
///
/// Derefs to the module; keeps the library that created it mapped.
pub struct ModuleInstance {
    // Dropped before the library that holds its code.
    module: Box<dyn Module>,
    _library: Arc<LoadedLibrary>,
}

impl Deref for ModuleInstance {
    type Target = dyn Module;

    fn deref(&self) -> &Self::Target {
        self.module.as_ref()
    }
}

impl DerefMut for ModuleInstance {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.module.as_mut()
    }
}

impl std::fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("module_id", &self.module.module_id())
            .finish()
    }
}

/// One loaded package directory.
pub struct Package {
    identity: EntityId,
    descriptor: PackageDescriptor,
    root_library: PathBuf,
    // Declared before the context so the factory map is released first.
    factories: RwLock<Arc<FactoryMap>>,
    context: ResolutionContext,
    loaded_at: DateTime<Utc>,
    disposed: AtomicBool,
}

impl Package {
    /// Load the package in `dir`.
    ///
    /// Fails if the descriptor is missing or invalid, or if the root library
    /// cannot be opened. Missing dependencies are logged, never fatal.
    pub fn load(
        dir: &Path,
        options: &PackageLoadOptions,
        shared: Arc<SharedScope>,
        loader: Arc<dyn LibraryLoader>,
    ) -> Result<Self> {
        let root = dir.to_path_buf();
        tracing::info!(path = %root.display(), "Loading package");

        let runtimes = root.join(platform::RUNTIMES_DIR);
        let paths = ProbePaths {
            culture_dir: culture::resolve_culture_dir(&root, &options.culture),
            native_dir: existing_dir(
                runtimes.join(platform::runtime_identifier()).join("native"),
            ),
            library_dir: existing_dir(runtimes.join(platform::os_library_dir_name()).join("lib")),
            root: root.clone(),
        };

        let descriptor =
            PackageDescriptor::from_dir(&root).map_err(|source| PackageError::Descriptor {
                path: root.clone(),
                source,
            })?;
        let identity = descriptor.identity();
        let root_library = root.join(&descriptor.root_library);

        // Dropping the context on an early return unloads whatever it opened.
        let context = ResolutionContext::new(
            format!("{} {}", identity.name, identity.version),
            options.collectible,
            paths,
            shared,
            loader,
        );

        let root_handle =
            context
                .load_root(&root_library)
                .map_err(|source| PackageError::RootLibrary {
                    path: root.clone(),
                    source,
                })?;

        for dependency in &descriptor.dependencies {
            context.resolve_library(dependency);
        }
        for native in &descriptor.native_dependencies {
            context.resolve_native(root_handle.name(), native);
        }
        drop(root_handle);

        let factories = collect_factories(&context);

        Ok(Self {
            identity,
            descriptor,
            root_library,
            factories: RwLock::new(Arc::new(factories)),
            context,
            loaded_at: Utc::now(),
            disposed: AtomicBool::new(false),
        })
    }

    /// Package identity (package id and version).
    pub fn identity(&self) -> &EntityId {
        &self.identity
    }

    pub fn package_id(&self) -> &str {
        &self.identity.name
    }

    pub fn version(&self) -> &Version {
        &self.identity.version
    }

    pub fn descriptor(&self) -> &PackageDescriptor {
        &self.descriptor
    }

    /// Descriptor property bag.
    pub fn properties(&self) -> &Map<String, Value> {
        &self.descriptor.properties
    }

    pub fn root_dir(&self) -> &Path {
        &self.context.paths().root
    }

    pub fn root_library_path(&self) -> &Path {
        &self.root_library
    }

    pub fn culture_dir(&self) -> Option<&Path> {
        self.context.paths().culture_dir.as_deref()
    }

    pub fn native_dir(&self) -> Option<&Path> {
        self.context.paths().native_dir.as_deref()
    }

    pub fn library_dir(&self) -> Option<&Path> {
        self.context.paths().library_dir.as_deref()
    }

    /// Module libraries loaded into the package, in load order.
    pub fn library_names(&self) -> Vec<String> {
        self.context.library_names()
    }

    /// Number of native handles currently held.
    pub fn native_handle_count(&self) -> usize {
        self.context.native_count()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn is_collectible(&self) -> bool {
        self.context.is_collectible()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Snapshot of the factory map. Empty once disposed.
    pub fn factories(&self) -> Arc<FactoryMap> {
        Arc::clone(&self.factories.read())
    }

    /// Factory registered for `id`.
    pub fn factory(&self, id: &EntityId) -> Option<FactoryRef> {
        self.factories.read().get(id).cloned()
    }

    pub fn factory_count(&self) -> usize {
        self.factories.read().len()
    }

    /// Release the package's factories, native handles and (when
    /// collectible) its libraries. Later calls do nothing.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        *self.factories.write() = Arc::new(FactoryMap::new());
        self.context.unload();
    }
}

impl Drop for Package {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("identity", &self.identity)
            .field("root", &self.root_dir())
            .field("factories", &self.factory_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Register every module library in the context, including libraries
/// loaded while an earlier one was registering.
fn collect_factories(context: &ResolutionContext) -> FactoryMap {
    let mut factories = FactoryMap::new();
    let mut index = 0;

    while let Some(library) = context.library_at(index) {
        index += 1;

        for factory in context.register_library(&library) {
            for module in factory.supported_modules() {
                let entry = FactoryRef {
                    factory: Arc::clone(&factory),
                    library: Arc::clone(&library),
                };
                if let Some(previous) = factories.insert(module.clone(), entry) {
                    tracing::debug!(
                        context = %context.name(),
                        module = %module,
                        previous = %previous.factory_id(),
                        replacement = %factory.factory_id(),
                        "Duplicate module identity, later factory wins"
                    );
                }
            }
        }
    }

    factories
}

fn existing_dir(path: PathBuf) -> Option<PathBuf> {
    path.is_dir().then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::StaticLoader;
    use packhost_sdk::{Registrar, REGISTER_OK};
    use std::env::consts::DLL_EXTENSION;
    use std::fs;

    struct Echo(EntityId);

    impl Module for Echo {
        fn module_id(&self) -> EntityId {
            self.0.clone()
        }

        fn description(&self) -> String {
            format!("echo {}", self.0)
        }
    }

    struct EchoFactory {
        id: &'static str,
        modules: &'static [&'static str],
    }

    impl ModuleFactory for EchoFactory {
        fn factory_id(&self) -> &str {
            self.id
        }

        fn supported_modules(&self) -> Vec<EntityId> {
            self.modules.iter().map(|m| m.parse().unwrap()).collect()
        }

        fn create_module(&self, id: &EntityId) -> Option<Box<dyn Module>> {
            self.supports(id).then(|| Box::new(Echo(id.clone())) as Box<dyn Module>)
        }
    }

    unsafe extern "C" fn register_overlapping(registrar: *mut Registrar<'_>) -> i32 {
        let registrar = unsafe { &mut *registrar };
        registrar.register(EchoFactory {
            id: "first",
            modules: &["Echo@1.0", "Shared@1.0"],
        });
        registrar.register(EchoFactory {
            id: "second",
            modules: &["Shared@1.0"],
        });
        REGISTER_OK
    }

    unsafe extern "C" fn register_with_dependency(registrar: *mut Registrar<'_>) -> i32 {
        let registrar = unsafe { &mut *registrar };
        if registrar.resolve_library("addon").is_none() {
            return packhost_sdk::REGISTER_FAILED;
        }
        REGISTER_OK
    }

    unsafe extern "C" fn register_addon(registrar: *mut Registrar<'_>) -> i32 {
        let registrar = unsafe { &mut *registrar };
        registrar.register(EchoFactory {
            id: "addon",
            modules: &["Addon@2.0"],
        });
        REGISTER_OK
    }

    fn write_package(dir: &Path, id: &str, version: &str, root: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join("package.json"),
            format!(
                r#"{{"PackageId":"{}","Version":"{}","RootAssembly":"{}"}}"#,
                id, version, root
            ),
        )
        .unwrap();
        fs::write(dir.join(root), b"").unwrap();
    }

    fn load(dir: &Path, loader: StaticLoader) -> Result<Package> {
        Package::load(
            dir,
            &PackageLoadOptions::default(),
            Arc::new(SharedScope::empty()),
            Arc::new(loader),
        )
    }

    #[test]
    fn test_duplicate_module_identity_last_wins() {
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path(), "echo", "1.0", "root.lib");

        let package = load(
            dir.path(),
            StaticLoader::new().with_entry("root", register_overlapping),
        )
        .unwrap();

        let factories = package.factories();
        assert_eq!(factories.len(), 2);
        let keys: Vec<String> = factories.keys().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["Echo@1.0.0", "Shared@1.0.0"]);

        let shared = package.factory(&"Shared@1.0".parse().unwrap()).unwrap();
        assert_eq!(shared.factory_id(), "second");
        assert_eq!(shared.library_name(), "root");
    }

    #[test]
    fn test_libraries_loaded_during_registration_are_scanned() {
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path(), "host", "3.0", "root.lib");
        fs::write(dir.path().join(format!("addon.{}", DLL_EXTENSION)), b"").unwrap();

        let loader = StaticLoader::new()
            .with_entry("root", register_with_dependency)
            .with_entry("addon", register_addon);
        let package = load(dir.path(), loader).unwrap();

        assert_eq!(package.library_names(), vec!["root", "addon"]);
        let factory = package.factory(&"Addon@2.0".parse().unwrap()).unwrap();
        assert_eq!(factory.library_name(), "addon");

        let module = factory.create(&"Addon@2.0".parse().unwrap()).unwrap();
        assert_eq!(module.description(), "echo Addon@2.0.0");
    }

    #[test]
    fn test_failed_registration_discards_factories() {
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path(), "host", "3.0", "root.lib");

        let package = load(
            dir.path(),
            StaticLoader::new().with_entry("root", register_with_dependency),
        )
        .unwrap();
        assert!(package.factories().is_empty());
    }

    #[test]
    fn test_missing_root_library() {
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path(), "broken", "1.0", "root.lib");
        fs::remove_file(dir.path().join("root.lib")).unwrap();

        let err = load(dir.path(), StaticLoader::new()).unwrap_err();
        assert!(matches!(err, PackageError::RootLibrary { .. }));
        assert!(err.to_string().contains(&dir.path().display().to_string()));
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path(), "echo", "1.0", "root.lib");
        let loader = Arc::new(StaticLoader::new().with_entry("root", register_overlapping));

        let package = Package::load(
            dir.path(),
            &PackageLoadOptions::default(),
            Arc::new(SharedScope::empty()),
            loader.clone(),
        )
        .unwrap();
        assert_eq!(package.identity().to_string(), "echo@1.0.0");
        assert!(package.loaded_at() <= Utc::now());

        package.dispose();
        package.dispose();
        drop(package);

        assert!(loader.stats().closed.len() == 1);
        assert_eq!(loader.stats().live(), 0);
    }

    #[test]
    fn test_module_keeps_library_after_dispose() {
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path(), "echo", "1.0", "root.lib");
        let loader = Arc::new(StaticLoader::new().with_entry("root", register_overlapping));

        let package = Package::load(
            dir.path(),
            &PackageLoadOptions::default(),
            Arc::new(SharedScope::empty()),
            loader.clone(),
        )
        .unwrap();

        let module = package
            .factory(&"Echo@1.0".parse().unwrap())
            .and_then(|factory| factory.create(&"Echo@1.0".parse().unwrap()))
            .unwrap();

        package.dispose();
        assert!(package.is_disposed());
        assert!(package.factories().is_empty());
        assert_eq!(module.module_id().to_string(), "Echo@1.0.0");
        assert!(loader.stats().closed.is_empty());
    }
}
