//! Library loader.
//!
//! This module opens package libraries (.so on Linux, .dylib on macOS, .dll
//! on Windows) and reads their registration exports.

use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::path::{Path, PathBuf};

use libloading::Library;
use packhost_sdk::{
    AbiVersionFn, LibraryHandle, RegisterFn, ABI_VERSION_SYMBOL, PACKHOST_ABI_VERSION,
    REGISTER_SYMBOL,
};
use parking_lot::Mutex;

use crate::platform;

/// Library loading errors.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Library not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to load library {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("Failed to close library {}: {source}", .path.display())]
    Close {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("Library '{0}' is not a shared library")]
    NotShared(String),

    #[error("Shared library '{0}' not found in host search paths")]
    SharedNotFound(String),

    #[error("Resolution context '{0}' has been unloaded")]
    Unloaded(String),
}

/// Result type for loader operations.
pub type LoadResult<T> = std::result::Result<T, LoadError>;

/// A library opened into a resolution context or the shared scope.
pub struct LoadedLibrary {
    name: String,
    path: PathBuf,
    abi_version: Option<u32>,
    entry: Option<RegisterFn>,
    library: Option<Library>,
}

impl LoadedLibrary {
    /// Wrap a dynamically opened library and read its registration exports.
    pub fn from_library(name: impl Into<String>, path: impl Into<PathBuf>, library: Library) -> Self {
        // SAFETY: the symbol types are fixed by the SDK both sides are built against
        let abi_version = unsafe { library.get::<AbiVersionFn>(ABI_VERSION_SYMBOL) }
            .ok()
            .map(|version| unsafe { (*version)() });
        let entry = unsafe { library.get::<RegisterFn>(REGISTER_SYMBOL) }
            .ok()
            .map(|symbol| *symbol);

        Self {
            name: name.into(),
            path: path.into(),
            abi_version,
            entry,
            library: Some(library),
        }
    }

    /// A library whose code is linked into the host process.
    pub fn in_process(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        entry: Option<RegisterFn>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            abi_version: entry.map(|_| PACKHOST_ABI_VERSION),
            entry,
            library: None,
        }
    }

    /// Value of the `packhost_abi_version` export, if present.
    pub fn abi_version(&self) -> Option<u32> {
        self.abi_version
    }

    /// The `packhost_register` export, if present.
    pub fn entry(&self) -> Option<RegisterFn> {
        self.entry
    }

    /// Whether this library has no OS handle of its own.
    pub fn is_in_process(&self) -> bool {
        self.library.is_none()
    }

    /// Close the OS handle, reporting failures.
    pub fn close(mut self) -> LoadResult<()> {
        self.entry = None;
        match self.library.take() {
            Some(library) => library.close().map_err(|source| LoadError::Close {
                path: self.path.clone(),
                source,
            }),
            None => Ok(()),
        }
    }
}

impl LibraryHandle for LoadedLibrary {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.path
    }

    unsafe fn symbol(&self, name: &str) -> Option<*const c_void> {
        let library = self.library.as_ref()?;
        unsafe { library.get::<*const c_void>(name.as_bytes()) }
            .ok()
            .map(|symbol| *symbol)
    }
}

impl fmt::Debug for LoadedLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedLibrary")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("abi_version", &self.abi_version)
            .field("has_entry", &self.entry.is_some())
            .field("in_process", &self.library.is_none())
            .finish()
    }
}

/// Opens and closes libraries on behalf of resolution contexts.
pub trait LibraryLoader: Send + Sync {
    /// Open a module library.
    fn open(&self, name: &str, path: &Path) -> LoadResult<LoadedLibrary>;

    /// Open a native library.
    fn open_native(&self, name: &str, path: &Path) -> LoadResult<LoadedLibrary> {
        self.open(name, path)
    }

    /// Close a library previously returned by this loader.
    fn close(&self, library: LoadedLibrary) -> LoadResult<()> {
        library.close()
    }
}

/// Loader backed by the platform's dynamic linker.
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibLoader;

impl DylibLoader {
    /// Create a new loader.
    pub fn new() -> Self {
        Self
    }
}

impl LibraryLoader for DylibLoader {
    fn open(&self, name: &str, path: &Path) -> LoadResult<LoadedLibrary> {
        if !path.is_file() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }

        // SAFETY: running the library's initialisers is inherent to loading a package
        let library = unsafe { Library::new(path) }.map_err(|source| LoadError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(LoadedLibrary::from_library(name, path, library))
    }

    #[cfg(windows)]
    fn open_native(&self, name: &str, path: &Path) -> LoadResult<LoadedLibrary> {
        use libloading::os::windows::{
            Library as WindowsLibrary, LOAD_LIBRARY_SEARCH_DEFAULT_DIRS,
            LOAD_LIBRARY_SEARCH_DLL_LOAD_DIR,
        };

        if !path.is_file() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }

        // Dependencies of a native library are looked up next to it first.
        let library = unsafe {
            WindowsLibrary::load_with_flags(
                path,
                LOAD_LIBRARY_SEARCH_DLL_LOAD_DIR | LOAD_LIBRARY_SEARCH_DEFAULT_DIRS,
            )
        }
        .map_err(|source| LoadError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(LoadedLibrary::from_library(name, path, library.into()))
    }
}

/// What a [`StaticLoader`] has opened and closed so far.
#[derive(Debug, Clone, Default)]
pub struct LoaderStats {
    /// Paths in open order
    pub opened: Vec<PathBuf>,

    /// Paths in close order
    pub closed: Vec<PathBuf>,
}

impl LoaderStats {
    /// How many times `path` was opened.
    pub fn open_count(&self, path: &Path) -> usize {
        self.opened.iter().filter(|opened| opened.as_path() == path).count()
    }

    /// How many times `path` was closed.
    pub fn close_count(&self, path: &Path) -> usize {
        self.closed.iter().filter(|closed| closed.as_path() == path).count()
    }

    /// Libraries opened and not yet closed.
    pub fn live(&self) -> usize {
        self.opened.len().saturating_sub(self.closed.len())
    }
}

/// Loader for packages whose code is linked into the host.
///
/// Library files must still exist on disk so the normal probing rules
/// apply; opening one binds it to the registration function registered
/// under its library name (`libfoo.so` and `foo.dll` are both `foo`).
#[derive(Default)]
pub struct StaticLoader {
    entries: HashMap<String, RegisterFn>,
    stats: Mutex<LoaderStats>,
}

impl StaticLoader {
    /// Create an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the library named `library` to a registration function.
    pub fn with_entry(mut self, library: impl Into<String>, entry: RegisterFn) -> Self {
        self.entries.insert(library.into(), entry);
        self
    }

    /// Snapshot of open/close activity.
    pub fn stats(&self) -> LoaderStats {
        self.stats.lock().clone()
    }
}

impl LibraryLoader for StaticLoader {
    fn open(&self, name: &str, path: &Path) -> LoadResult<LoadedLibrary> {
        if !path.is_file() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }

        let entry = self.entries.get(&platform::library_name(path)).copied();
        self.stats.lock().opened.push(path.to_path_buf());
        Ok(LoadedLibrary::in_process(name, path, entry))
    }

    fn close(&self, library: LoadedLibrary) -> LoadResult<()> {
        self.stats.lock().closed.push(library.path().to_path_buf());
        library.close()
    }
}

impl fmt::Debug for StaticLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticLoader")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
