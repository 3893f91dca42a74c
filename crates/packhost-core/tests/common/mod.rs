//! Shared helpers for packhost-core integration tests.

#![allow(dead_code)]

use std::env::consts::DLL_EXTENSION;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use packhost_core::StaticLoader;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

/// Platform file name of module library `name`.
pub fn lib_file(name: &str) -> String {
    format!("{}.{}", name, DLL_EXTENSION)
}

/// Create an empty file, including parent directories.
pub fn touch(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"").unwrap();
}

/// Write a package directory with a descriptor and an empty root library.
pub fn write_package(parent: &Path, dir_name: &str, id: &str, version: &str) -> PathBuf {
    write_package_with(parent, dir_name, id, version, "")
}

/// Like [`write_package`], with extra descriptor properties (`"Key": value, ...`).
pub fn write_package_with(
    parent: &Path,
    dir_name: &str,
    id: &str,
    version: &str,
    extra: &str,
) -> PathBuf {
    let dir = parent.join(dir_name);
    fs::create_dir_all(&dir).unwrap();

    let extra = if extra.is_empty() {
        String::new()
    } else {
        format!(", {}", extra)
    };
    fs::write(
        dir.join("package.json"),
        format!(
            r#"{{"PackageId":"{}","Version":"{}","RootAssembly":"root.lib"{}}}"#,
            id, version, extra
        ),
    )
    .unwrap();
    fs::write(dir.join("root.lib"), b"").unwrap();
    dir
}

/// Loader binding every `root.lib` to the demo package's registration export.
pub fn demo_loader() -> StaticLoader {
    StaticLoader::new().with_entry("root", packhost_demo_package::packhost_register)
}

/// Same as [`demo_loader`], shared.
pub fn shared_demo_loader() -> Arc<StaticLoader> {
    Arc::new(demo_loader())
}

/// Captured log event.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: Level,
    pub message: String,
    pub fields: String,
}

/// Collects events emitted while a closure runs.
#[derive(Clone, Default)]
pub struct CaptureLayer {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        self.entries.lock().unwrap().push(LogEntry {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: String,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push_str(&format!("{}={:?} ", field.name(), value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push_str(&format!("{}={} ", field.name(), value));
        }
    }
}

/// Run `f` with a capturing subscriber installed on this thread.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, Vec<LogEntry>) {
    let layer = CaptureLayer::default();
    let entries = Arc::clone(&layer.entries);
    let subscriber = tracing_subscriber::registry().with(layer);

    let result = tracing::subscriber::with_default(subscriber, f);
    let captured = entries.lock().unwrap().clone();
    (result, captured)
}

/// Entries at `level` whose message contains `needle`.
pub fn find_logs<'a>(logs: &'a [LogEntry], level: Level, needle: &str) -> Vec<&'a LogEntry> {
    logs.iter()
        .filter(|entry| entry.level == level && entry.message.contains(needle))
        .collect()
}
