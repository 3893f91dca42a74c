//! Explicit registration of factories and dependency resolution callbacks.

use std::ffi::c_void;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::module::ModuleFactory;

/// Signature of the `packhost_abi_version` export.
pub type AbiVersionFn = unsafe extern "C" fn() -> u32;

/// Signature of the `packhost_register` export.
pub type RegisterFn = for<'a> unsafe extern "C" fn(registrar: *mut Registrar<'a>) -> i32;

/// A library opened by the host on behalf of a package.
pub trait LibraryHandle: Send + Sync {
    /// Name the library was requested under.
    fn name(&self) -> &str;

    /// File the library was opened from.
    fn path(&self) -> &Path;

    /// Look up the address of an exported symbol.
    ///
    /// # Safety
    /// The address is only valid while the handle is alive, and the caller
    /// must cast it to the symbol's real type.
    unsafe fn symbol(&self, name: &str) -> Option<*const c_void>;
}

/// Resolves dependencies of a library that is being registered.
///
/// Implemented by the host's resolution context for each package.
pub trait DependencyResolver {
    /// Resolve a module library by name.
    fn resolve_library(&mut self, name: &str) -> Option<Arc<dyn LibraryHandle>>;

    /// Resolve a native library `name` needed by library `requesting`.
    fn resolve_native(&mut self, requesting: &str, name: &str) -> Option<Arc<dyn LibraryHandle>>;
}

/// Collects the factories a library exports.
///
/// The host creates one registrar per library and passes it to the
/// library's `packhost_register` export.
pub struct Registrar<'a> {
    library: &'a str,
    resolver: Option<&'a mut dyn DependencyResolver>,
    factories: Vec<Arc<dyn ModuleFactory>>,
}

impl<'a> Registrar<'a> {
    /// Create a registrar for `library` that resolves dependencies through `resolver`.
    pub fn new(library: &'a str, resolver: &'a mut dyn DependencyResolver) -> Self {
        Self {
            library,
            resolver: Some(resolver),
            factories: Vec::new(),
        }
    }

    /// Create a registrar without dependency resolution.
    pub fn detached(library: &'a str) -> Self {
        Self {
            library,
            resolver: None,
            factories: Vec::new(),
        }
    }

    /// Name of the library being registered.
    pub fn library_name(&self) -> &str {
        self.library
    }

    /// Register a factory.
    pub fn register<F: ModuleFactory + 'static>(&mut self, factory: F) -> &mut Self {
        self.factories.push(Arc::new(factory));
        self
    }

    /// Register an already shared factory.
    pub fn register_shared(&mut self, factory: Arc<dyn ModuleFactory>) -> &mut Self {
        self.factories.push(factory);
        self
    }

    /// Resolve a module library through the host.
    pub fn resolve_library(&mut self, name: &str) -> Option<Arc<dyn LibraryHandle>> {
        self.resolver.as_mut()?.resolve_library(name)
    }

    /// Resolve a native library through the host on behalf of this library.
    pub fn resolve_native(&mut self, name: &str) -> Option<Arc<dyn LibraryHandle>> {
        let library = self.library;
        self.resolver.as_mut()?.resolve_native(library, name)
    }

    /// Factories registered so far.
    pub fn factories(&self) -> &[Arc<dyn ModuleFactory>] {
        &self.factories
    }

    /// Consume the registrar, returning the registered factories.
    pub fn into_factories(self) -> Vec<Arc<dyn ModuleFactory>> {
        self.factories
    }
}

impl fmt::Debug for Registrar<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registrar")
            .field("library", &self.library)
            .field("has_resolver", &self.resolver.is_some())
            .field("factories", &self.factories.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::EntityId;
    use crate::module::Module;

    #[derive(Default)]
    struct RecordingResolver {
        calls: Vec<String>,
    }

    impl DependencyResolver for RecordingResolver {
        fn resolve_library(&mut self, name: &str) -> Option<Arc<dyn LibraryHandle>> {
            self.calls.push(format!("library:{}", name));
            None
        }

        fn resolve_native(
            &mut self,
            requesting: &str,
            name: &str,
        ) -> Option<Arc<dyn LibraryHandle>> {
            self.calls.push(format!("native:{}:{}", requesting, name));
            None
        }
    }

    struct NullFactory;

    impl ModuleFactory for NullFactory {
        fn factory_id(&self) -> &str {
            "null"
        }

        fn supported_modules(&self) -> Vec<EntityId> {
            Vec::new()
        }

        fn create_module(&self, _id: &EntityId) -> Option<Box<dyn Module>> {
            None
        }
    }

    #[test]
    fn test_registrar_forwards_requesting_library() {
        let mut resolver = RecordingResolver::default();
        {
            let mut registrar = Registrar::new("root", &mut resolver);
            assert!(registrar.resolve_library("helpers").is_none());
            assert!(registrar.resolve_native("sqlite3").is_none());
        }
        assert_eq!(resolver.calls, vec!["library:helpers", "native:root:sqlite3"]);
    }

    #[test]
    fn test_detached_registrar_collects_factories() {
        let mut registrar = Registrar::detached("root");
        registrar.register(NullFactory).register(NullFactory);
        assert!(registrar.resolve_native("anything").is_none());
        assert_eq!(registrar.factories().len(), 2);
        assert_eq!(registrar.into_factories()[0].factory_id(), "null");
    }
}
