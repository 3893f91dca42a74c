//! packhost core
//!
//! Discovers packages on disk, loads each one into its own resolution
//! context and indexes the module factories they register.
//!
//! ```rust,ignore
//! use packhost_core::{Culture, EntityIdTemplate, PackageRegistry};
//!
//! let registry = PackageRegistry::new("packages").with_shared_libraries(["contracts"]);
//! registry.load_all(&Culture::from_env())?;
//!
//! let template = EntityIdTemplate::exact("Module", "1.0".parse()?);
//! if let Some(factory) = registry.find_factory(&template) {
//!     let module = factory.create(&template.as_exact().unwrap());
//! }
//! ```
//!
//! ## Package layout
//!
//! ```text
//! <package>/
//!   package.json              PackageId, Version, RootAssembly
//!   <root library>
//!   <culture>/                localized resource libraries
//!   runtimes/<rid>/native/    native libraries for this platform
//!   runtimes/<os>/lib/        module libraries for this OS
//! ```

pub mod config;
pub mod context;
pub mod culture;
pub mod descriptor;
pub mod error;
pub mod loader;
pub mod package;
pub mod platform;
pub mod registry;
pub mod shared;

pub use config::{ConfigError, HostConfig};
pub use context::{ProbePaths, ResolutionContext};
pub use culture::Culture;
pub use descriptor::{DescriptorError, PackageDescriptor};
pub use error::{PackageError, Result};
pub use loader::{DylibLoader, LibraryLoader, LoadError, LoadedLibrary, LoaderStats, StaticLoader};
pub use package::{FactoryMap, FactoryRef, ModuleInstance, Package, PackageLoadOptions};
pub use registry::{LoadFailure, LoadReport, PackageRegistry};
pub use shared::SharedScope;

pub use packhost_sdk as sdk;
pub use packhost_sdk::{EntityId, EntityIdTemplate, Module, ModuleFactory, Version};
