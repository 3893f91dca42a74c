//! Demo Package
//!
//! A minimal package root library. Its factory provides `Module@1.0`.
//!
//! Built as a cdylib it can be dropped into a package directory next to a
//! `package.json` such as:
//!
//! ```json
//! {"PackageId": "demo", "Version": "1.0", "RootAssembly": "libpackhost_demo_package.so"}
//! ```

use packhost_sdk::prelude::*;

/// Module name provided by this package.
pub const MODULE_NAME: &str = "Module";

/// Identity of the demo module.
pub fn module_id() -> EntityId {
    EntityId::new(MODULE_NAME, Version::new(1, 0, 0))
}

/// The demo module.
#[derive(Debug, Default)]
pub struct DemoModule;

impl Module for DemoModule {
    fn module_id(&self) -> EntityId {
        module_id()
    }

    fn description(&self) -> String {
        "Description".to_string()
    }
}

/// Factory for [`DemoModule`].
#[derive(Debug, Default)]
pub struct DemoFactory;

impl ModuleFactory for DemoFactory {
    fn factory_id(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn supported_modules(&self) -> Vec<EntityId> {
        vec![module_id()]
    }

    fn create_module(&self, _id: &EntityId) -> Option<Box<dyn Module>> {
        Some(Box::new(DemoModule))
    }
}

export_factories!(DemoFactory);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_metadata() {
        let factory = DemoFactory;
        assert_eq!(factory.factory_id(), "packhost_demo_package::DemoFactory");
        assert_eq!(factory.supported_modules(), vec![module_id()]);
        assert!(factory.supports(&"Module@1.0".parse().unwrap()));
    }

    #[test]
    fn test_create_module() {
        let module = DemoFactory.create_module(&module_id()).unwrap();
        assert_eq!(module.module_id().to_string(), "Module@1.0.0");
        assert_eq!(module.description(), "Description");
    }

    #[test]
    fn test_exports() {
        assert_eq!(packhost_abi_version(), PACKHOST_ABI_VERSION);

        let mut registrar = Registrar::detached("packhost_demo_package");
        let status = unsafe { packhost_register(&mut registrar) };
        assert_eq!(status, REGISTER_OK);
        assert_eq!(registrar.factories().len(), 1);
    }
}
