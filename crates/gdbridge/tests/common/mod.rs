// Shared fixtures for the gdbridge integration tests.
//
// Every test binary talks to the in-process headless engine. The runtime is
// process-wide, so `runtime()` installs it once and hands out the shared
// handle.

#![allow(dead_code)]

use gdbridge::runtime::{self, Runtime};
use gdbridge::{Config, ManualMemory, Object, RefCounted, RefCountedMemory, engine_class};
use gdbridge_log::Level;
use std::sync::{Arc, Once};

engine_class! {
    /// Scene node.
    pub struct Node: Object = "Node", ManualMemory;
}

engine_class! {
    /// Fixture class carrying the fixture methods.
    pub struct Fixture: Node = "Fixture", ManualMemory;
}

engine_class! {
    pub struct Resource: RefCounted = "Resource", RefCountedMemory;
}

/// Configuration used by every shared runtime.
pub fn test_config() -> Config {
    Config::default()
        .with_log_level(Level::Warn)
        .with_verify_refcounts(true)
}

static INIT: Once = Once::new();

/// The shared headless runtime, installed on first use.
pub fn runtime() -> Arc<Runtime> {
    INIT.call_once(|| {
        unsafe {
            runtime::init(
                gdbridge_headless::get_proc_address,
                gdbridge_headless::library(),
                test_config(),
            )
        }
        .expect("headless runtime");
    });
    runtime::get().expect("runtime installed")
}

/// Instance id the headless engine assigned to `object`.
pub fn instance_id(runtime: &Runtime, object: &impl gdbridge::Class) -> u64 {
    object.as_object().instance_id(runtime)
}
