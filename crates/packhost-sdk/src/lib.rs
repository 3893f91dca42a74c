//! packhost SDK
//!
//! The contract shared between the packhost loader and the packages it loads.
//! A package's root library depends on this crate, implements [`ModuleFactory`]
//! for each kind of module it provides, and exports its factories with
//! [`export_factories!`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use packhost_sdk::prelude::*;
//!
//! #[derive(Default)]
//! struct GreeterFactory;
//!
//! impl ModuleFactory for GreeterFactory {
//!     fn factory_id(&self) -> &str {
//!         "greeter"
//!     }
//!
//!     fn supported_modules(&self) -> Vec<EntityId> {
//!         vec![EntityId::new("Greeter", Version::new(1, 0, 0))]
//!     }
//!
//!     fn create_module(&self, _id: &EntityId) -> Option<Box<dyn Module>> {
//!         Some(Box::new(Greeter))
//!     }
//! }
//!
//! export_factories!(GreeterFactory);
//! ```
//!
//! # FFI Exports
//!
//! Packages export these symbols for dynamic loading:
//! - `packhost_abi_version()` -> u32 (must equal [`PACKHOST_ABI_VERSION`])
//! - `packhost_register(*mut Registrar)` -> i32 ([`REGISTER_OK`] on success)

pub mod error;
pub mod identity;
#[macro_use]
pub mod macros;
pub mod module;
pub mod registrar;

pub use error::IdentityError;
pub use identity::{parse_version, EntityId, EntityIdTemplate};
pub use module::{Module, ModuleFactory};
pub use registrar::{AbiVersionFn, DependencyResolver, LibraryHandle, RegisterFn, Registrar};
pub use semver::Version;

/// Registration ABI version. Packages built against a different version are skipped.
pub const PACKHOST_ABI_VERSION: u32 = 1;

/// Symbol name of the ABI version export.
pub const ABI_VERSION_SYMBOL: &[u8] = b"packhost_abi_version\0";

/// Symbol name of the registration export.
pub const REGISTER_SYMBOL: &[u8] = b"packhost_register\0";

/// Registration completed.
pub const REGISTER_OK: i32 = 0;

/// The host passed a null registrar.
pub const REGISTER_NULL_REGISTRAR: i32 = 1;

/// The package rejected registration; anything it registered is discarded.
pub const REGISTER_FAILED: i32 = 2;

/// Prelude module with common imports
pub mod prelude {
    pub use crate::identity::{parse_version, EntityId, EntityIdTemplate};
    pub use crate::module::{Module, ModuleFactory};
    pub use crate::registrar::{DependencyResolver, LibraryHandle, Registrar};
    pub use crate::{PACKHOST_ABI_VERSION, REGISTER_FAILED, REGISTER_OK};
    pub use crate::export_factories;
    pub use semver::Version;
}
