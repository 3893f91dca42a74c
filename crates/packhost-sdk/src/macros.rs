//! Declarative macros for package development.

/// Export the registration entry points of a package library.
///
/// The list form registers one default-constructed instance of every
/// factory type given:
///
/// ```rust,ignore
/// use packhost_sdk::prelude::*;
///
/// export_factories!(GreeterFactory, ClockFactory);
/// ```
///
/// The function form hands the registrar to a custom function, which may
/// also resolve the library's dependencies:
///
/// ```rust,ignore
/// use packhost_sdk::prelude::*;
///
/// fn register(registrar: &mut Registrar<'_>) -> i32 {
///     if registrar.resolve_native("sqlite3").is_none() {
///         return REGISTER_FAILED;
///     }
///     registrar.register(StoreFactory::default());
///     REGISTER_OK
/// }
///
/// export_factories!(fn register);
/// ```
#[macro_export]
macro_rules! export_factories {
    (fn $register:path) => {
        #[no_mangle]
        pub extern "C" fn packhost_abi_version() -> u32 {
            $crate::PACKHOST_ABI_VERSION
        }

        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub unsafe extern "C" fn packhost_register(registrar: *mut $crate::Registrar<'_>) -> i32 {
            // SAFETY: the host passes either null or a registrar that outlives this call
            match unsafe { registrar.as_mut() } {
                Some(registrar) => $register(registrar),
                None => $crate::REGISTER_NULL_REGISTRAR,
            }
        }
    };
    ($($factory:ty),+ $(,)?) => {
        $crate::export_factories!(fn __packhost_register_defaults);

        fn __packhost_register_defaults(registrar: &mut $crate::Registrar<'_>) -> i32 {
            $(
                registrar.register(<$factory as ::core::default::Default>::default());
            )+
            $crate::REGISTER_OK
        }
    };
}
