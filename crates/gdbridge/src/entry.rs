//! Extension entry point and initialization levels.
//!
//! The engine loads the library, calls the exported entry symbol with its
//! `get_proc_address`, and later drives the extension through the
//! initialization levels in ascending order (and back down on unload).
//! [`bootstrap`] installs the runtime during the entry call; deinitializing
//! the `Core` level shuts it down again.
//!
//! ```rust,ignore
//! fn ready(level: InitLevel) {
//!     if level == InitLevel::Scene {
//!         gdbridge::classdb::register_class::<Spinner>().ok();
//!     }
//! }
//!
//! gdbridge::entry_point!(spinner_library_init, Extension::new(ready, |_| {}));
//! ```

use crate::config::Config;
use crate::error::Error;
use crate::runtime;
use crate::sys::{self, ClassLibraryPtr, GetProcAddress, InitializationRaw};
use gdbridge_log::{error, info, warn};
use std::ffi::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Engine initialization stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum InitLevel {
    Core = 0,
    Servers = 1,
    Scene = 2,
    Editor = 3,
}

impl InitLevel {
    pub const fn from_raw(raw: u32) -> Option<InitLevel> {
        match raw {
            0 => Some(InitLevel::Core),
            1 => Some(InitLevel::Servers),
            2 => Some(InitLevel::Scene),
            3 => Some(InitLevel::Editor),
            _ => None,
        }
    }
}

/// Callbacks and settings of one extension library.
#[derive(Debug, Clone, Copy)]
pub struct Extension {
    /// Lowest level the engine should report.
    pub min_level: InitLevel,
    /// Produces the runtime configuration at load.
    pub config: fn() -> Config,
    pub initialize: fn(InitLevel),
    pub deinitialize: fn(InitLevel),
}

impl Extension {
    /// An extension starting at the `Scene` level, configured from the
    /// environment.
    pub const fn new(initialize: fn(InitLevel), deinitialize: fn(InitLevel)) -> Self {
        Extension {
            min_level: InitLevel::Scene,
            config: config_from_env,
            initialize,
            deinitialize,
        }
    }

    pub const fn with_min_level(mut self, level: InitLevel) -> Self {
        self.min_level = level;
        self
    }

    pub const fn with_config(mut self, config: fn() -> Config) -> Self {
        self.config = config;
        self
    }
}

fn config_from_env() -> Config {
    Config::from_env().unwrap_or_else(|err| {
        warn!("{}; using the default configuration", err);
        Config::default()
    })
}

/// Body of the exported entry symbol.
///
/// Returns `TRUE` once the runtime is installed and `initialization` is
/// filled; `FALSE` (after logging why) otherwise.
///
/// # Safety
///
/// The arguments must be the ones the engine passed to the entry symbol,
/// and `initialization` must be valid for writes.
pub unsafe fn bootstrap(
    get_proc_address: GetProcAddress,
    library: ClassLibraryPtr,
    initialization: *mut InitializationRaw,
    extension: &'static Extension,
) -> sys::Bool {
    if initialization.is_null() {
        error!("entry point called without an initialization struct");
        return sys::FALSE;
    }
    let config = (extension.config)();
    match unsafe { runtime::init(get_proc_address, library, config) } {
        Ok(()) => {}
        Err(err) => {
            error!("extension failed to load: {}", err);
            return sys::FALSE;
        }
    }

    unsafe {
        initialization.write(InitializationRaw {
            minimum_initialization_level: extension.min_level as u32,
            userdata: (extension as *const Extension).cast_mut().cast(),
            initialize: Some(initialize),
            deinitialize: Some(deinitialize),
        })
    };
    sys::TRUE
}

fn run_level(userdata: *mut c_void, raw: u32, deinit: bool) {
    let Some(level) = InitLevel::from_raw(raw) else {
        warn!("ignoring unknown initialization level {}", raw);
        return;
    };
    let extension = unsafe { &*userdata.cast_const().cast::<Extension>() };
    let callback = if deinit {
        extension.deinitialize
    } else {
        extension.initialize
    };
    if catch_unwind(AssertUnwindSafe(|| callback(level))).is_err() {
        error!("panic while handling {:?} level (deinit: {})", level, deinit);
    }
}

unsafe extern "C" fn initialize(userdata: *mut c_void, level: u32) {
    info!("initialize level {}", level);
    run_level(userdata, level, false);
}

unsafe extern "C" fn deinitialize(userdata: *mut c_void, level: u32) {
    info!("deinitialize level {}", level);
    run_level(userdata, level, true);
    if level == InitLevel::Core as u32 {
        match runtime::shutdown() {
            Ok(()) | Err(Error::NotInitialized) => {}
            Err(err) => error!("shutdown failed: {}", err),
        }
    }
}

/// Exports the C entry symbol the engine looks up by name.
#[macro_export]
macro_rules! entry_point {
    ($symbol:ident, $extension:expr) => {
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $symbol(
            get_proc_address: $crate::sys::GetProcAddress,
            library: $crate::sys::ClassLibraryPtr,
            initialization: *mut $crate::sys::InitializationRaw,
        ) -> $crate::sys::Bool {
            static EXTENSION: $crate::entry::Extension = $extension;
            unsafe {
                $crate::entry::bootstrap(get_proc_address, library, initialization, &EXTENSION)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn test_levels_are_ordered() {
        assert!(InitLevel::Core < InitLevel::Servers);
        assert!(InitLevel::Scene < InitLevel::Editor);
        assert_eq!(InitLevel::from_raw(2), Some(InitLevel::Scene));
        assert_eq!(InitLevel::from_raw(4), None);
    }

    static QUIET: Extension = Extension::new(|_| {}, |_| {}).with_min_level(InitLevel::Core);

    #[test]
    fn test_second_bootstrap_is_refused() {
        let _runtime = test_support::runtime();
        let mut init = InitializationRaw {
            minimum_initialization_level: 99,
            userdata: std::ptr::null_mut(),
            initialize: None,
            deinitialize: None,
        };
        let loaded = unsafe {
            bootstrap(
                gdbridge_headless::get_proc_address,
                gdbridge_headless::library(),
                &mut init,
                &QUIET,
            )
        };
        assert_eq!(loaded, sys::FALSE);
        assert_eq!(init.minimum_initialization_level, 99);
    }
}
