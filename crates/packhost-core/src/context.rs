//! Per-package resolution context.
//!
//! A [`ResolutionContext`] owns every library opened on behalf of one
//! package. It answers the two questions raised while a package is being
//! loaded: where a module library comes from (the shared scope or the
//! package directory) and which file backs a native library. On unload it
//! closes the native handles it opened and, when collectible, lets go of
//! its module libraries.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use packhost_sdk::{
    DependencyResolver, LibraryHandle, ModuleFactory, Registrar, PACKHOST_ABI_VERSION, REGISTER_OK,
};
use parking_lot::Mutex;

use crate::loader::{LibraryLoader, LoadError, LoadResult, LoadedLibrary};
use crate::platform;
use crate::shared::SharedScope;

/// Suffix of localized resource libraries.
const RESOURCES_SUFFIX: &str = ".resources";

/// Directories a context probes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbePaths {
    /// Package root directory
    pub root: PathBuf,

    /// Localized resources
    pub culture_dir: Option<PathBuf>,

    /// `runtimes/<rid>/native`
    pub native_dir: Option<PathBuf>,

    /// `runtimes/<os>/lib`
    pub library_dir: Option<PathBuf>,
}

type LibraryList = Mutex<Vec<(String, Arc<LoadedLibrary>)>>;

/// Isolated loading scope of one package.
pub struct ResolutionContext {
    name: String,
    collectible: bool,
    paths: ProbePaths,
    shared: Arc<SharedScope>,
    loader: Arc<dyn LibraryLoader>,
    libraries: LibraryList,
    natives: LibraryList,
    unloaded: AtomicBool,
}

impl ResolutionContext {
    pub fn new(
        name: impl Into<String>,
        collectible: bool,
        paths: ProbePaths,
        shared: Arc<SharedScope>,
        loader: Arc<dyn LibraryLoader>,
    ) -> Self {
        Self {
            name: name.into(),
            collectible,
            paths,
            shared,
            loader,
            libraries: Mutex::new(Vec::new()),
            natives: Mutex::new(Vec::new()),
            unloaded: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_collectible(&self) -> bool {
        self.collectible
    }

    pub fn paths(&self) -> &ProbePaths {
        &self.paths
    }

    pub fn is_unloaded(&self) -> bool {
        self.unloaded.load(Ordering::SeqCst)
    }

    /// Open the package's root library into this context.
    pub fn load_root(&self, path: &Path) -> LoadResult<Arc<LoadedLibrary>> {
        if self.is_unloaded() {
            return Err(LoadError::Unloaded(self.name.clone()));
        }

        let name = platform::library_name(path);
        let library = Arc::new(self.loader.open(&name, path)?);
        self.libraries.lock().push((name, Arc::clone(&library)));
        Ok(library)
    }

    /// Resolve a module library by name.
    ///
    /// Shared libraries come from the host scope. Anything else is probed
    /// in the package: the localization directory for `*.resources`, else
    /// the package root outside `runtimes/`, then the platform library
    /// directory. A miss is logged and returns `None`.
    pub fn resolve_library(&self, name: &str) -> Option<Arc<LoadedLibrary>> {
        if self.is_unloaded() {
            tracing::debug!(context = %self.name, library = %name, "Resolution after unload ignored");
            return None;
        }

        tracing::trace!(context = %self.name, library = %name, "Resolving library");

        if self.shared.contains(name) {
            return match self.shared.load(name, self.loader.as_ref()) {
                Ok(library) => Some(library),
                Err(e) => {
                    tracing::warn!(context = %self.name, library = %name, error = %e, "Shared library not found");
                    None
                }
            };
        }

        let mut libraries = self.libraries.lock();
        if let Some((_, library)) = libraries.iter().find(|(loaded, _)| loaded == name) {
            return Some(Arc::clone(library));
        }

        let Some(path) = self.probe_library(name) else {
            tracing::warn!(context = %self.name, library = %name, "Library not found");
            return None;
        };

        match self.loader.open(name, &path) {
            Ok(library) => {
                let library = Arc::new(library);
                libraries.push((name.to_string(), Arc::clone(&library)));
                Some(library)
            }
            Err(e) => {
                tracing::warn!(context = %self.name, library = %name, error = %e, "Failed to load library");
                None
            }
        }
    }

    /// Resolve a native library `name` needed by library `requesting`.
    ///
    /// Looks for `name.*` in the native directory and then anywhere under
    /// the package root. When several files match, the first is used and a
    /// warning lists all of them.
    pub fn resolve_native(&self, requesting: &str, name: &str) -> Option<Arc<LoadedLibrary>> {
        if self.is_unloaded() {
            tracing::debug!(context = %self.name, library = %name, "Resolution after unload ignored");
            return None;
        }

        tracing::trace!(context = %self.name, requesting = %requesting, library = %name, "Resolving native library");

        let mut natives = self.natives.lock();
        if let Some((_, handle)) = natives.iter().find(|(loaded, _)| loaded == name) {
            return Some(Arc::clone(handle));
        }

        let candidates = self.probe_native(name);
        let Some(path) = candidates.first() else {
            tracing::warn!(context = %self.name, requesting = %requesting, library = %name, "Native library not found");
            return None;
        };

        if candidates.len() > 1 {
            tracing::warn!(
                context = %self.name,
                library = %name,
                candidates = ?candidates,
                chosen = %path.display(),
                "Multiple native library candidates found, using the first"
            );
        }

        match self.loader.open_native(name, path) {
            Ok(handle) => {
                let handle = Arc::new(handle);
                natives.push((name.to_string(), Arc::clone(&handle)));
                Some(handle)
            }
            Err(e) => {
                tracing::warn!(context = %self.name, library = %name, error = %e, "Failed to load native library");
                None
            }
        }
    }

    /// Call a library's registration export and collect its factories.
    ///
    /// Libraries without the export, built for another ABI, or whose
    /// registration fails contribute nothing.
    pub fn register_library(&self, library: &Arc<LoadedLibrary>) -> Vec<Arc<dyn ModuleFactory>> {
        let Some(entry) = library.entry() else {
            tracing::debug!(context = %self.name, library = %library.name(), "Library has no registration entry point");
            return Vec::new();
        };

        if library.abi_version() != Some(PACKHOST_ABI_VERSION) {
            tracing::warn!(
                context = %self.name,
                library = %library.name(),
                expected = PACKHOST_ABI_VERSION,
                found = ?library.abi_version(),
                "ABI version mismatch, skipping library"
            );
            return Vec::new();
        }

        let mut resolver = ContextResolver { context: self };
        let mut registrar = Registrar::new(library.name(), &mut resolver);

        // SAFETY: the entry point was exported by a library built against the same ABI
        let status = unsafe { entry(&mut registrar) };
        if status != REGISTER_OK {
            tracing::warn!(
                context = %self.name,
                library = %library.name(),
                status,
                "Library registration failed, discarding its factories"
            );
            return Vec::new();
        }

        registrar.into_factories()
    }

    /// Module library at `index`, in load order.
    pub fn library_at(&self, index: usize) -> Option<Arc<LoadedLibrary>> {
        self.libraries
            .lock()
            .get(index)
            .map(|(_, library)| Arc::clone(library))
    }

    /// Names of module libraries loaded so far, in load order.
    pub fn library_names(&self) -> Vec<String> {
        self.libraries.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    /// Names of native libraries opened so far, in open order.
    pub fn native_names(&self) -> Vec<String> {
        self.natives.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn native_count(&self) -> usize {
        self.natives.lock().len()
    }

    /// Tear the context down. Runs once; later calls do nothing.
    pub fn unload(&self) {
        if self.unloaded.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::debug!(context = %self.name, collectible = self.collectible, "Unloading resolution context");

        let natives = std::mem::take(&mut *self.natives.lock());
        for (name, handle) in natives.into_iter().rev() {
            self.release(&name, handle);
        }

        let libraries = std::mem::take(&mut *self.libraries.lock());
        if self.collectible {
            for (name, library) in libraries.into_iter().rev() {
                self.release(&name, library);
            }
        } else {
            // Non-collectible code stays mapped for the life of the process.
            for (_, library) in libraries {
                std::mem::forget(library);
            }
        }
    }

    fn release(&self, name: &str, library: Arc<LoadedLibrary>) {
        match Arc::try_unwrap(library) {
            Ok(library) => {
                if let Err(e) = self.loader.close(library) {
                    tracing::warn!(context = %self.name, library = %name, error = %e, "Failed to close library");
                }
            }
            Err(_) => {
                tracing::debug!(context = %self.name, library = %name, "Library still referenced, it closes when released");
            }
        }
    }

    fn probe_library(&self, name: &str) -> Option<PathBuf> {
        let file_names = platform::library_file_names(name);

        let direct = match &self.paths.culture_dir {
            Some(culture_dir) if name.ends_with(RESOURCES_SUFFIX) => file_names
                .iter()
                .map(|file| culture_dir.join(file))
                .find(|path| path.is_file()),
            _ => {
                let runtimes = self.paths.root.join(platform::RUNTIMES_DIR);
                find_any(&self.paths.root, &file_names)
                    .into_iter()
                    .find(|path| !path.starts_with(&runtimes))
            }
        };
        if direct.is_some() {
            return direct;
        }

        let library_dir = self.paths.library_dir.as_ref()?;
        let mut candidates = find_any(library_dir, &file_names);
        platform::sort_by_target_priority(&mut candidates, library_dir);
        candidates.into_iter().next()
    }

    fn probe_native(&self, name: &str) -> Vec<PathBuf> {
        let escaped = platform::escape(name);
        let exact = format!("{}.*", escaped);
        let prefixed = format!("lib{}.*", escaped);

        self.paths
            .native_dir
            .iter()
            .chain(std::iter::once(&self.paths.root))
            .map(|dir| {
                let found = platform::find_files(dir, &exact, true);
                if found.is_empty() && cfg!(unix) {
                    platform::find_files(dir, &prefixed, false)
                } else {
                    found
                }
            })
            .find(|found| !found.is_empty())
            .unwrap_or_default()
    }
}

impl Drop for ResolutionContext {
    fn drop(&mut self) {
        self.unload();
    }
}

impl std::fmt::Debug for ResolutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionContext")
            .field("name", &self.name)
            .field("collectible", &self.collectible)
            .field("paths", &self.paths)
            .field("libraries", &self.library_names())
            .field("natives", &self.native_names())
            .field("unloaded", &self.is_unloaded())
            .finish()
    }
}

/// Files named any of `file_names` anywhere under `dir`, sorted.
fn find_any(dir: &Path, file_names: &[String]) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = file_names
        .iter()
        .flat_map(|file| platform::find_files(dir, &platform::escape(file), true))
        .collect();
    found.sort();
    found.dedup();
    found
}

/// Routes a registrar's dependency requests into its context.
struct ContextResolver<'a> {
    context: &'a ResolutionContext,
}

impl DependencyResolver for ContextResolver<'_> {
    fn resolve_library(&mut self, name: &str) -> Option<Arc<dyn LibraryHandle>> {
        self.context
            .resolve_library(name)
            .map(|library| library as Arc<dyn LibraryHandle>)
    }

    fn resolve_native(&mut self, requesting: &str, name: &str) -> Option<Arc<dyn LibraryHandle>> {
        self.context
            .resolve_native(requesting, name)
            .map(|handle| handle as Arc<dyn LibraryHandle>)
    }
}
