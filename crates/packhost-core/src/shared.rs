//! The host's shared library scope.
//!
//! Shared libraries carry the contract between the host and its packages.
//! They are loaded at most once for the whole process, from the host's own
//! library directories, and every package that asks for one gets the same
//! handle.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::loader::{LibraryLoader, LoadError, LoadResult, LoadedLibrary};
use crate::platform;

/// Libraries resolved through the host's default scope.
#[derive(Debug)]
pub struct SharedScope {
    names: BTreeSet<String>,
    in_process: HashSet<String>,
    search_dirs: Vec<PathBuf>,
    loaded: Mutex<HashMap<String, Arc<LoadedLibrary>>>,
}

impl SharedScope {
    /// Scope sharing the given libraries, searched next to the executable.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            in_process: HashSet::new(),
            search_dirs: default_search_dirs(),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Scope that shares nothing.
    pub fn empty() -> Self {
        Self::new(Vec::<String>::new())
    }

    /// Replace the directories shared libraries are searched in.
    pub fn with_search_dirs<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.search_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    /// Add a directory to search.
    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dirs.push(dir.into());
        self
    }

    /// Share a library that is linked into the host binary itself.
    pub fn with_in_process(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.names.insert(name.clone());
        self.in_process.insert(name);
        self
    }

    /// Whether `name` is resolved through this scope.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Shared library names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// Load a shared library, or return the already loaded one.
    pub fn load(&self, name: &str, loader: &dyn LibraryLoader) -> LoadResult<Arc<LoadedLibrary>> {
        if !self.contains(name) {
            return Err(LoadError::NotShared(name.to_string()));
        }

        let mut loaded = self.loaded.lock();
        if let Some(library) = loaded.get(name) {
            return Ok(Arc::clone(library));
        }

        let library = if self.in_process.contains(name) {
            let path = std::env::current_exe().unwrap_or_default();
            LoadedLibrary::in_process(name, path, None)
        } else {
            let path = self
                .probe(name)
                .ok_or_else(|| LoadError::SharedNotFound(name.to_string()))?;
            tracing::debug!(library = %name, path = %path.display(), "Loading shared library");
            loader.open(name, &path)?
        };

        let library = Arc::new(library);
        loaded.insert(name.to_string(), Arc::clone(&library));
        Ok(library)
    }

    /// Names of shared libraries loaded so far, sorted.
    pub fn loaded(&self) -> Vec<String> {
        let mut names: Vec<String> = self.loaded.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.lock().contains_key(name)
    }

    fn probe(&self, name: &str) -> Option<PathBuf> {
        let file_names = platform::library_file_names(name);
        self.search_dirs.iter().find_map(|dir| {
            file_names
                .iter()
                .map(|file| dir.join(file))
                .find(|path| path.is_file())
        })
    }
}

impl Default for SharedScope {
    fn default() -> Self {
        Self::empty()
    }
}

fn default_search_dirs() -> Vec<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::StaticLoader;
    use std::env::consts::DLL_EXTENSION;

    #[test]
    fn test_not_shared() {
        let scope = SharedScope::new(["contracts"]);
        let loader = StaticLoader::new();
        assert!(scope.contains("contracts"));
        assert!(matches!(
            scope.load("other", &loader),
            Err(LoadError::NotShared(_))
        ));
    }

    #[test]
    fn test_loads_once_from_search_dir() {
        let host = tempfile::tempdir().unwrap();
        let path = host.path().join(format!("contracts.{}", DLL_EXTENSION));
        std::fs::write(&path, b"").unwrap();

        let scope = SharedScope::new(["contracts"]).with_search_dirs([host.path()]);
        let loader = StaticLoader::new();

        let first = scope.load("contracts", &loader).unwrap();
        let second = scope.load("contracts", &loader).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.stats().open_count(&path), 1);
        assert_eq!(scope.loaded(), vec!["contracts"]);
    }

    #[test]
    fn test_missing_shared_library() {
        let host = tempfile::tempdir().unwrap();
        let scope = SharedScope::new(["contracts"]).with_search_dirs([host.path()]);
        let result = scope.load("contracts", &StaticLoader::new());
        assert!(matches!(result, Err(LoadError::SharedNotFound(_))));
        assert!(!scope.is_loaded("contracts"));
    }

    #[test]
    fn test_in_process_library_needs_no_file() {
        let scope = SharedScope::empty()
            .with_search_dirs(Vec::<PathBuf>::new())
            .with_in_process("packhost_sdk");
        let library = scope.load("packhost_sdk", &StaticLoader::new()).unwrap();
        assert!(library.is_in_process());
        assert_eq!(scope.names().collect::<Vec<_>>(), vec!["packhost_sdk"]);
    }
}
