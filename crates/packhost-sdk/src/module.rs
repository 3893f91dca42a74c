//! Module and factory contracts.

use std::thread::JoinHandle;

use crate::identity::EntityId;

/// A capability object handed to the host application.
///
/// The loader never looks inside a module; hosts usually downcast through
/// their own richer traits layered on top of this one.
pub trait Module: Send + Sync {
    /// Identity of this module type.
    fn module_id(&self) -> EntityId;

    /// Human readable description.
    fn description(&self) -> String;

    /// Background worker started by the module, if any.
    ///
    /// Ownership of the handle moves to the caller; later calls return `None`.
    fn take_worker(&mut self) -> Option<JoinHandle<()>> {
        None
    }
}

/// Produces modules for one or more identities.
pub trait ModuleFactory: Send + Sync {
    /// Stable identifier of the factory itself.
    fn factory_id(&self) -> &str;

    /// Module identities this factory can create.
    fn supported_modules(&self) -> Vec<EntityId>;

    /// Create a module for `id`, or `None` if the identity is not supported.
    fn create_module(&self, id: &EntityId) -> Option<Box<dyn Module>>;

    /// Whether `id` is one of the supported identities.
    fn supports(&self, id: &EntityId) -> bool {
        self.supported_modules().iter().any(|supported| supported == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;

    struct Echo;

    impl Module for Echo {
        fn module_id(&self) -> EntityId {
            EntityId::new("Echo", Version::new(1, 0, 0))
        }

        fn description(&self) -> String {
            "echo".to_string()
        }
    }

    struct EchoFactory;

    impl ModuleFactory for EchoFactory {
        fn factory_id(&self) -> &str {
            "echo-factory"
        }

        fn supported_modules(&self) -> Vec<EntityId> {
            vec![EntityId::new("Echo", Version::new(1, 0, 0))]
        }

        fn create_module(&self, id: &EntityId) -> Option<Box<dyn Module>> {
            self.supports(id).then(|| Box::new(Echo) as Box<dyn Module>)
        }
    }

    #[test]
    fn test_factory_supports() {
        let factory = EchoFactory;
        let echo = EntityId::new("Echo", Version::new(1, 0, 0));
        assert!(factory.supports(&echo));
        assert!(!factory.supports(&EntityId::new("Echo", Version::new(2, 0, 0))));

        let mut module = factory.create_module(&echo).unwrap();
        assert_eq!(module.module_id(), echo);
        assert!(module.take_worker().is_none());
    }
}
