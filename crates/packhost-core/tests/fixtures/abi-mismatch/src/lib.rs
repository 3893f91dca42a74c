//! Package library that reports a registration ABI the host does not speak.
//!
//! The entry points are written by hand instead of through
//! `export_factories!` so the exported ABI version can differ from
//! [`PACKHOST_ABI_VERSION`]. A host that ignored the version would pick up
//! [`FutureFactory`].

use packhost_sdk::prelude::*;
use packhost_sdk::REGISTER_NULL_REGISTRAR;

/// ABI version this library claims.
pub const FUTURE_ABI_VERSION: u32 = PACKHOST_ABI_VERSION + 1;

#[derive(Debug, Default)]
pub struct FutureModule;

impl Module for FutureModule {
    fn module_id(&self) -> EntityId {
        EntityId::new("Module", Version::new(2, 0, 0))
    }

    fn description(&self) -> String {
        "Built for a newer host".to_string()
    }
}

#[derive(Debug, Default)]
pub struct FutureFactory;

impl ModuleFactory for FutureFactory {
    fn factory_id(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn supported_modules(&self) -> Vec<EntityId> {
        vec![EntityId::new("Module", Version::new(2, 0, 0))]
    }

    fn create_module(&self, _id: &EntityId) -> Option<Box<dyn Module>> {
        Some(Box::new(FutureModule))
    }
}

#[no_mangle]
pub extern "C" fn packhost_abi_version() -> u32 {
    FUTURE_ABI_VERSION
}

#[no_mangle]
#[allow(improper_ctypes_definitions)]
pub unsafe extern "C" fn packhost_register(registrar: *mut Registrar<'_>) -> i32 {
    // SAFETY: the host passes either null or a registrar that outlives this call
    match unsafe { registrar.as_mut() } {
        Some(registrar) => {
            registrar.register(FutureFactory);
            REGISTER_OK
        }
        None => REGISTER_NULL_REGISTRAR,
    }
}
