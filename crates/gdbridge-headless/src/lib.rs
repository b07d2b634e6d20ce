//! `gdbridge-headless`: an in-process engine for testing `gdbridge`.
//!
//! Implements the engine side of the function table in plain Rust: strings,
//! names and paths, Variants, arrays, dictionaries, packed arrays, objects
//! with reference counts, a class database with a few engine classes,
//! extension class registration, Variant-argument calls and host-implemented
//! callables. Everything is observable from tests, so they can check that
//! each engine allocation is released exactly once.
//!
//! # Classes
//!
//! | Class        | Parent       | Memory      |
//! |--------------|--------------|-------------|
//! | `Object`     |              | manual      |
//! | `RefCounted` | `Object`     | counted     |
//! | `Node`       | `Object`     | manual      |
//! | `Resource`   | `RefCounted` | counted     |
//! | `Engine`     | `Object`     | singleton   |
//! | `Fixture`    | `Node`       | manual      |
//!
//! `Fixture` carries the methods listed in [`fixture`]. `Object` also has the
//! vararg methods `call` and `emit_signal`, and the utility functions `absi`
//! and `maxi` are available.
//!
//! # Example
//!
//! ```rust,ignore
//! unsafe {
//!     gdbridge::runtime::init(
//!         gdbridge_headless::get_proc_address,
//!         gdbridge_headless::library(),
//!         gdbridge::Config::default(),
//!     )?;
//! }
//! let word = gdbridge::GString::owned("hi")?.raw_word();
//! assert!(gdbridge_headless::string_is_live(word));
//! ```
//!
//! Releasing a handle twice panics inside an `extern "C"` entry, which aborts
//! the test process.

mod calls;
mod engine;
pub mod kinds;
mod objects;
mod strings;
mod table;
mod values;

pub use calls::{
    CALL_ERROR_INSTANCE_IS_NULL, CALL_ERROR_INVALID_ARGUMENT, CALL_ERROR_INVALID_METHOD, CALL_ERROR_TOO_FEW_ARGUMENTS,
    CALL_ERROR_TOO_MANY_ARGUMENTS, CALL_OK,
};
pub use engine::{CallError, Stats};
pub use objects::{call_virtual, fixture};
pub use table::{EngineVersion, GetProcAddress, InterfaceFunction, VERSION, engine_messages, get_proc_address};

use engine::with_engine;
use std::ffi::c_void;

static LIBRARY: u8 = 0;

/// The library token to pass alongside [`get_proc_address`].
pub fn library() -> *mut c_void {
    std::ptr::addr_of!(LIBRARY).cast_mut().cast()
}

/// Whether the engine string with token `word` is still allocated.
pub fn string_is_live(word: u64) -> bool {
    with_engine(|engine| engine.string_is_live(word))
}

/// Contents of a live engine string.
pub fn string_text(word: u64) -> Option<String> {
    with_engine(|engine| {
        engine
            .string_is_live(word)
            .then(|| engine.string_text(word).to_owned())
    })
}

/// Allocates an engine string and returns its token word.
pub fn new_string(text: &str) -> u64 {
    with_engine(|engine| engine.new_string(text.to_owned()))
}

/// Releases a string made with [`new_string`].
pub fn free_string(word: u64) {
    with_engine(|engine| engine.release_string(word));
}

/// Whether the object with instance id `id` is alive.
pub fn is_alive(id: u64) -> bool {
    with_engine(|engine| engine.objects.contains_key(&id))
}

/// How many times the object `id` was destroyed.
pub fn destroy_count(id: u64) -> u32 {
    with_engine(|engine| engine.destroyed.get(&id).copied().unwrap_or(0))
}

/// Native reference count of `id`; `None` if it is dead or not refcounted.
pub fn reference_count(id: u64) -> Option<i64> {
    with_engine(|engine| engine.objects.get(&id).and_then(|object| object.refcount))
}

/// Engine class of a live object.
pub fn class_of(id: u64) -> Option<String> {
    with_engine(|engine| engine.objects.get(&id).map(|object| object.class.clone()))
}

/// Signals `id` emitted so far, as (signal, argument count), oldest first.
pub fn emitted_signals(id: u64) -> Vec<(String, usize)> {
    with_engine(|engine| {
        engine
            .emitted
            .iter()
            .filter(|(object, _, _)| *object == id)
            .map(|(_, signal, count)| (signal.clone(), *count))
            .collect()
    })
}

/// Live allocation counts.
pub fn stats() -> Stats {
    with_engine(|engine| engine.stats())
}

/// Filled by an extension entry point.
#[repr(C)]
pub struct Initialization {
    pub minimum_initialization_level: u32,
    pub userdata: *mut c_void,
    pub initialize: Option<unsafe extern "C" fn(*mut c_void, u32)>,
    pub deinitialize: Option<unsafe extern "C" fn(*mut c_void, u32)>,
}

/// Highest initialization level.
const EDITOR_LEVEL: u32 = 3;

/// An extension whose entry point accepted the load.
pub struct LoadedExtension {
    init: Initialization,
}

impl LoadedExtension {
    pub fn minimum_level(&self) -> u32 {
        self.init.minimum_initialization_level
    }

    /// Runs every level from the minimum up, the way the engine starts.
    pub fn initialize(&mut self) {
        let Some(initialize) = self.init.initialize else {
            return;
        };
        for level in self.init.minimum_initialization_level..=EDITOR_LEVEL {
            unsafe { initialize(self.init.userdata, level) };
        }
    }

    /// Runs every level from the top down to the minimum.
    pub fn deinitialize(&mut self) {
        let Some(deinitialize) = self.init.deinitialize else {
            return;
        };
        for level in (self.init.minimum_initialization_level..=EDITOR_LEVEL).rev() {
            unsafe { deinitialize(self.init.userdata, level) };
        }
    }
}

/// Loads an extension through its entry point.
///
/// `entry` receives the lookup function, the library token and a pointer to
/// an [`Initialization`] block, and returns the entry point's boolean.
/// Returns `None` if the entry point refused.
///
/// # Safety
///
/// `entry` must treat the third argument as an `Initialization` pointer.
pub unsafe fn load_extension(
    entry: impl FnOnce(GetProcAddress, *mut c_void, *mut c_void) -> u8,
) -> Option<LoadedExtension> {
    let mut init = Initialization {
        minimum_initialization_level: 0,
        userdata: std::ptr::null_mut(),
        initialize: None,
        deinitialize: None,
    };
    let accepted = entry(get_proc_address, library(), (&mut init as *mut Initialization).cast());
    (accepted != 0).then_some(LoadedExtension { init })
}
