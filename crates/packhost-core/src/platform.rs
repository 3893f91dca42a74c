//! Platform naming conventions and file probing.

use std::env::consts::{ARCH, DLL_EXTENSION, DLL_PREFIX, OS};
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};

/// Package subdirectory holding platform-specific libraries.
pub const RUNTIMES_DIR: &str = "runtimes";

/// OS component of runtime identifiers, also the name of the
/// `runtimes/<os>/lib` directory.
pub fn os_library_dir_name() -> &'static str {
    match OS {
        "linux" => "linux",
        "macos" => "osx",
        "windows" => "win",
        other => other,
    }
}

/// Architecture component of runtime identifiers.
pub fn arch_name() -> &'static str {
    match ARCH {
        "x86_64" => "x64",
        "x86" => "x86",
        "aarch64" => "arm64",
        "arm" => "arm",
        other => other,
    }
}

/// Runtime identifier of the host, e.g. `linux-x64` or `osx-arm64`.
pub fn runtime_identifier() -> String {
    format!("{}-{}", os_library_dir_name(), arch_name())
}

/// File names a module library called `name` may have on this platform.
pub fn library_file_names(name: &str) -> Vec<String> {
    let mut names = vec![format!("{}.{}", name, DLL_EXTENSION)];
    if !DLL_PREFIX.is_empty() && !name.starts_with(DLL_PREFIX) {
        names.push(format!("{}{}.{}", DLL_PREFIX, name, DLL_EXTENSION));
    }
    names
}

/// Library name of a file: the file name without the platform extension
/// and library prefix (`libfoo.so` -> `foo`).
pub fn library_name(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let stem = match file_name.strip_suffix(&format!(".{}", DLL_EXTENSION)) {
        Some(stem) => stem.to_string(),
        None => path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or(file_name),
    };

    match stem.strip_prefix(DLL_PREFIX) {
        Some(rest) if !DLL_PREFIX.is_empty() && !rest.is_empty() => rest.to_string(),
        _ => stem,
    }
}

/// Escape a literal for use in a [`find_files`] pattern.
pub fn escape(literal: &str) -> String {
    Pattern::escape(literal)
}

/// Files in `dir` matching the glob `file_pattern`, in lexicographic order.
///
/// With `recursive` the pattern is matched in `dir` and every directory
/// below it. Matching is case-insensitive on Windows.
pub fn find_files(dir: &Path, file_pattern: &str, recursive: bool) -> Vec<PathBuf> {
    let base = escape(&dir.to_string_lossy());
    let pattern = if recursive {
        format!("{}/**/{}", base, file_pattern)
    } else {
        format!("{}/{}", base, file_pattern)
    };

    let options = MatchOptions {
        case_sensitive: !cfg!(windows),
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    let paths = match glob::glob_with(&pattern, options) {
        Ok(paths) => paths,
        Err(e) => {
            tracing::trace!(pattern = %pattern, error = %e, "Invalid probe pattern");
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = paths
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    files.dedup();
    files
}

/// Order library candidates found under `lib_dir` by how specifically they
/// target the host: architecture-specific directories first, then
/// architecture-neutral ones (`any`, or directly in `lib_dir`), then the
/// rest. The sort is stable within each tier.
pub fn sort_by_target_priority(candidates: &mut [PathBuf], lib_dir: &Path) {
    candidates.sort_by_key(|path| target_tier(path, lib_dir));
}

fn target_tier(path: &Path, lib_dir: &Path) -> u8 {
    let relative = path.strip_prefix(lib_dir).unwrap_or(path);
    let dirs: Vec<String> = relative
        .parent()
        .map(|parent| {
            parent
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_ascii_lowercase())
                .collect()
        })
        .unwrap_or_default();

    if dirs.iter().any(|d| d == arch_name() || d == ARCH) {
        0
    } else if dirs.is_empty() || dirs.iter().any(|d| d == "any") {
        1
    } else {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_runtime_identifier_shape() {
        let rid = runtime_identifier();
        let (os, arch) = rid.split_once('-').unwrap();
        assert_eq!(os, os_library_dir_name());
        assert_eq!(arch, arch_name());
    }

    #[test]
    fn test_library_file_names() {
        let names = library_file_names("foo");
        assert_eq!(names[0], format!("foo.{}", DLL_EXTENSION));
        if DLL_PREFIX.is_empty() {
            assert_eq!(names.len(), 1);
        } else {
            assert_eq!(names[1], format!("{}foo.{}", DLL_PREFIX, DLL_EXTENSION));
        }
    }

    #[test]
    fn test_library_name() {
        assert_eq!(library_name(Path::new("root.lib")), "root");
        assert_eq!(
            library_name(&PathBuf::from(format!("a/{}demo.{}", DLL_PREFIX, DLL_EXTENSION))),
            "demo"
        );
        assert_eq!(
            library_name(&PathBuf::from(format!("Strings.resources.{}", DLL_EXTENSION))),
            "Strings.resources"
        );
    }

    #[test]
    fn test_find_files_recursive_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("foo.b"));
        touch(&dir.path().join("foo.a"));
        touch(&dir.path().join("nested/deeper/foo.c"));
        touch(&dir.path().join("nested/bar.a"));
        fs::create_dir_all(dir.path().join("foo.dir")).unwrap();

        let found = find_files(dir.path(), "foo.*", true);
        assert_eq!(
            found,
            vec![
                dir.path().join("foo.a"),
                dir.path().join("foo.b"),
                dir.path().join("nested/deeper/foo.c"),
            ]
        );

        let top_level = find_files(dir.path(), "foo.*", false);
        assert_eq!(top_level.len(), 2);
    }

    #[test]
    fn test_find_files_escapes_literals() {
        let dir = tempfile::tempdir().unwrap();
        let odd = dir.path().join("odd[1]");
        touch(&odd.join("x[y].bin"));
        touch(&odd.join("xy.bin"));

        let found = find_files(&odd, &format!("{}.*", escape("x[y]")), true);
        assert_eq!(found, vec![odd.join("x[y].bin")]);
    }

    #[test]
    fn test_find_files_missing_dir() {
        assert!(find_files(Path::new("/nonexistent/packhost"), "*", true).is_empty());
    }

    #[test]
    fn test_sort_by_target_priority() {
        let lib = PathBuf::from("/pkg/runtimes/linux/lib");
        let mut candidates = vec![
            lib.join("net6.0/a.so"),
            lib.join("any/b.so"),
            lib.join(arch_name()).join("c.so"),
            lib.join("d.so"),
        ];
        sort_by_target_priority(&mut candidates, &lib);

        assert_eq!(candidates[0], lib.join(arch_name()).join("c.so"));
        assert_eq!(candidates[1], lib.join("any/b.so"));
        assert_eq!(candidates[2], lib.join("d.so"));
        assert_eq!(candidates[3], lib.join("net6.0/a.so"));
    }
}
