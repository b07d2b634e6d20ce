//! Process-wide runtime state.
//!
//! The engine hands the extension a function table once, at load time. This
//! module turns that table into a [`Runtime`]:
//!
//! - the typed [`Interface`](crate::sys::Interface);
//! - per-type constructor and destructor tables indexed by
//!   [`VariantType`];
//! - the method-bind resolver caches;
//! - the registry of host classes.
//!
//! # Lifecycle
//!
//! There is exactly one barrier: [`init`] installs the runtime behind a
//! global `RwLock`, [`shutdown`] takes it out again and tears down engine
//! resources held by the caches. Everything else reaches the runtime through
//! [`get`], which fails with [`Error::NotInitialized`] outside that window.
//! Re-initializing after a shutdown is supported.
//!
//! # Thread Safety
//!
//! `Runtime` is `Send + Sync`. Handles that must release engine memory from
//! `Drop` look the runtime up through [`get`]; a handle dropped after
//! shutdown cannot be released and is reported as a leak.

use crate::builtin::StringName;
use crate::classdb::ClassRegistry;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::ownership::Transfer;
use crate::resolver::Resolver;
use crate::sys::{
    self, ClassLibraryPtr, GetProcAddress, Interface, PtrConstructor, PtrDestructor,
    TypeFromVariantConstructorFunc, TypePtr, VariantFromTypeConstructorFunc,
};
use crate::variant::VariantType;
use gdbridge_log::{Level, debug, info, warn};
use std::ffi::{CStr, CString};
use std::fmt::{self, Arguments};
use std::sync::{Arc, PoisonError, RwLock};

static RUNTIME: RwLock<Option<Arc<Runtime>>> = RwLock::new(None);

/// Engine version reported at load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub label: String,
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.label.is_empty() {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        } else {
            f.write_str(&self.label)
        }
    }
}

/// Constructor and destructor entry points for every builtin kind.
struct TypeTables {
    from_type: [VariantFromTypeConstructorFunc; VariantType::COUNT],
    to_type: [TypeFromVariantConstructorFunc; VariantType::COUNT],
    destructors: [PtrDestructor; VariantType::COUNT],
    copy: [PtrConstructor; VariantType::COUNT],
}

impl TypeTables {
    /// # Safety
    ///
    /// `interface` must come from a live engine.
    unsafe fn load(interface: &Interface) -> Self {
        let mut tables = TypeTables {
            from_type: [None; VariantType::COUNT],
            to_type: [None; VariantType::COUNT],
            destructors: [None; VariantType::COUNT],
            copy: [None; VariantType::COUNT],
        };

        for &ty in &VariantType::ALL[1..] {
            let i = ty.index();
            unsafe {
                tables.from_type[i] = (interface.get_variant_from_type_constructor)(ty.raw());
                tables.to_type[i] = (interface.get_variant_to_type_constructor)(ty.raw());
                if !ty.is_pod() && ty != VariantType::Object {
                    tables.destructors[i] = (interface.variant_get_ptr_destructor)(ty.raw());
                    tables.copy[i] = (interface.variant_get_ptr_constructor)(ty.raw(), 1);
                }
            }
        }

        tables
    }
}

/// Everything the core needs from one loaded engine.
pub struct Runtime {
    interface: Interface,
    library: usize,
    version: EngineVersion,
    config: Config,
    types: TypeTables,
    pub(crate) resolver: Resolver,
    pub(crate) classes: ClassRegistry,
}

impl Runtime {
    /// The raw function table.
    pub fn interface(&self) -> &Interface {
        &self.interface
    }

    pub fn version(&self) -> &EngineVersion {
        &self.version
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Library token the engine passed to the entry point.
    pub fn library(&self) -> ClassLibraryPtr {
        self.library as ClassLibraryPtr
    }

    pub(crate) fn from_type_constructor(
        &self,
        ty: VariantType,
    ) -> Result<unsafe extern "C" fn(sys::UninitVariantPtr, TypePtr)> {
        self.types.from_type[ty.index()].ok_or(Error::UnsupportedValue { ty })
    }

    pub(crate) fn to_type_constructor(
        &self,
        ty: VariantType,
    ) -> Result<unsafe extern "C" fn(sys::UninitTypePtr, sys::VariantPtr)> {
        self.types.to_type[ty.index()].ok_or(Error::UnsupportedValue { ty })
    }

    pub(crate) fn copy_constructor(
        &self,
        ty: VariantType,
    ) -> Result<unsafe extern "C" fn(sys::UninitTypePtr, *const sys::ConstTypePtr)> {
        self.types.copy[ty.index()].ok_or(Error::UnsupportedValue { ty })
    }

    /// Fetches a non-copy pointer constructor, e.g. String from StringName.
    pub(crate) fn ptr_constructor(
        &self,
        ty: VariantType,
        index: i32,
    ) -> Result<unsafe extern "C" fn(sys::UninitTypePtr, *const sys::ConstTypePtr)> {
        unsafe { (self.interface.variant_get_ptr_constructor)(ty.raw(), index) }
            .ok_or(Error::UnsupportedValue { ty })
    }

    /// Runs the engine destructor of a builtin value in place.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live value of kind `ty` that is not used again.
    pub(crate) unsafe fn destroy(&self, ty: VariantType, ptr: TypePtr) {
        if ty == VariantType::Nil || ty.is_pod() {
            return;
        }
        match self.types.destructors[ty.index()] {
            Some(destructor) => unsafe { destructor(ptr) },
            None => warn!("no destructor for {}; value leaked", ty),
        }
    }

    /// Fetches an engine singleton by name.
    pub fn singleton_ptr(&self, name: &str) -> Result<sys::ObjectPtr> {
        let name = StringName::scoped(self, name);
        let ptr = unsafe { (self.interface.global_get_singleton)(name.as_ptr()) };
        if ptr.is_null() {
            return Err(Error::ClassNotFound {
                class: name.text().to_owned(),
            });
        }
        Ok(ptr)
    }

    fn print(&self, level: Level, target: &str, args: &Arguments<'_>) {
        let description = to_c_lossy(&args.to_string());
        let function = to_c_lossy(target);
        let file = c"";
        unsafe {
            match level {
                Level::Error => (self.interface.print_error)(
                    description.as_ptr(),
                    function.as_ptr(),
                    file.as_ptr(),
                    0,
                    sys::FALSE,
                ),
                _ => (self.interface.print_warning)(
                    description.as_ptr(),
                    function.as_ptr(),
                    file.as_ptr(),
                    0,
                    sys::FALSE,
                ),
            }
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("version", &self.version)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn to_c_lossy(text: &str) -> CString {
    CString::new(text.replace('\0', "\u{FFFD}")).unwrap_or_default()
}

/// Log sink installed when `forward_logs_to_engine` is set.
///
/// Errors and warnings go to the engine console; other levels, and anything
/// logged while the runtime lock is held for writing, go to stdout.
fn engine_sink(level: Level, target: &str, args: &Arguments<'_>) {
    if level <= Level::Warn {
        if let Ok(guard) = RUNTIME.try_read() {
            if let Some(runtime) = guard.as_ref() {
                runtime.print(level, target, args);
                return;
            }
        }
    }
    println!("[{}] {target}: {args}", level.as_str());
}

/// Loads the engine function table and installs the global runtime.
///
/// # Errors
///
/// - [`Error::AlreadyInitialized`] if a runtime is active.
/// - [`Error::MissingFunction`] if the table lacks an entry.
/// - [`Error::IncompatibleEngine`] if the engine is older than
///   `config.min_engine_version`.
///
/// # Safety
///
/// `get_proc_address` must be the engine's lookup function (or an
/// equivalent table whose entries have the declared signatures), valid
/// until [`shutdown`].
pub unsafe fn init(
    get_proc_address: GetProcAddress,
    library: ClassLibraryPtr,
    config: Config,
) -> Result<()> {
    let mut slot = RUNTIME.write().unwrap_or_else(PoisonError::into_inner);
    if slot.is_some() {
        return Err(Error::AlreadyInitialized);
    }

    gdbridge_log::set_level(config.log_level);

    let interface = unsafe { Interface::load(get_proc_address)? };
    let version = unsafe { read_version(&interface) };
    let (major, minor) = config.min_engine_version;
    if (version.major, version.minor) < (major, minor) {
        return Err(Error::IncompatibleEngine {
            found: (version.major, version.minor),
            required: (major, minor),
        });
    }

    let types = unsafe { TypeTables::load(&interface) };
    let forward_logs = config.forward_logs_to_engine;
    let runtime = Runtime {
        interface,
        library: library as usize,
        version,
        config,
        types,
        resolver: Resolver::new(),
        classes: ClassRegistry::new(),
    };
    let label = runtime.version.to_string();
    *slot = Some(Arc::new(runtime));
    drop(slot);

    if forward_logs {
        gdbridge_log::set_sink(Some(engine_sink));
    }
    info!("runtime initialized against engine {}", label);
    Ok(())
}

unsafe fn read_version(interface: &Interface) -> EngineVersion {
    let mut raw = sys::EngineVersionRaw {
        major: 0,
        minor: 0,
        patch: 0,
        string: std::ptr::null(),
    };
    unsafe { (interface.get_godot_version)(&mut raw) };
    let label = if raw.string.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(raw.string) }
            .to_string_lossy()
            .into_owned()
    };
    EngineVersion {
        major: raw.major,
        minor: raw.minor,
        patch: raw.patch,
        label,
    }
}

/// Tears down the global runtime.
///
/// Host classes are unregistered in reverse registration order and the
/// resolver releases the engine names it cached. Handles still alive after
/// this point can no longer be released.
///
/// # Errors
///
/// [`Error::NotInitialized`] if no runtime is active.
pub fn shutdown() -> Result<()> {
    let runtime = RUNTIME
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .ok_or(Error::NotInitialized)?;

    if runtime.config.forward_logs_to_engine {
        gdbridge_log::set_sink(None);
    }

    runtime.classes.unregister_all(&runtime);
    runtime.resolver.clear(&runtime);

    let outstanding = Arc::strong_count(&runtime) - 1;
    if outstanding > 0 {
        warn!(
            "runtime shut down with {} live references; their handles will leak",
            outstanding
        );
    }
    debug!("runtime caches cleared");
    info!("runtime shut down");
    Ok(())
}

/// Returns the active runtime.
pub fn get() -> Result<Arc<Runtime>> {
    RUNTIME
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .ok_or(Error::NotInitialized)
}

pub fn is_initialized() -> bool {
    RUNTIME
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .is_some()
}

/// Releases a transferred value through the active runtime, or logs a leak.
pub(crate) fn release_or_leak<T: Transfer>(value: &mut T, what: &str) {
    match get() {
        Ok(runtime) => unsafe { value.release(&runtime) },
        Err(_) => gdbridge_log::error!("{} dropped after runtime shutdown; leaked", what),
    }
}
