//! The function table handed to the extension, plus the entries that need
//! no engine state: version, raw memory and console output.

use crate::engine::with_engine;
use crate::{calls, objects, strings, values};
use std::alloc::{Layout, alloc, dealloc};
use std::ffi::{CStr, c_char, c_void};
use std::sync::{Mutex, PoisonError};

/// Untyped table entry, as the extension receives it.
pub type InterfaceFunction = unsafe extern "C" fn();

/// Lookup function passed to the extension's entry point.
pub type GetProcAddress = unsafe extern "C" fn(*const c_char) -> Option<InterfaceFunction>;

/// Version block written by `get_godot_version`.
#[repr(C)]
pub struct EngineVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub string: *const c_char,
}

pub const VERSION: (u32, u32, u32) = (4, 3, 0);
const VERSION_LABEL: &CStr = c"4.3.stable.headless";

unsafe extern "C" fn get_godot_version(out: *mut EngineVersion) {
    let (major, minor, patch) = VERSION;
    unsafe {
        out.write(EngineVersion {
            major,
            minor,
            patch,
            string: VERSION_LABEL.as_ptr(),
        })
    };
}

/// Every block carries its size in a 16-byte header.
const HEADER: usize = 16;

fn block_layout(size: usize) -> Option<Layout> {
    Layout::from_size_align(size.checked_add(HEADER)?, HEADER).ok()
}

unsafe extern "C" fn mem_alloc(size: usize) -> *mut c_void {
    let Some(layout) = block_layout(size) else {
        return std::ptr::null_mut();
    };
    let base = unsafe { alloc(layout) };
    if base.is_null() {
        return std::ptr::null_mut();
    }
    with_engine(|engine| engine.raw_allocations += 1);
    unsafe {
        base.cast::<usize>().write(size);
        base.add(HEADER).cast()
    }
}

unsafe extern "C" fn mem_free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    unsafe {
        let base = ptr.cast::<u8>().sub(HEADER);
        let size = base.cast::<usize>().read();
        if let Some(layout) = block_layout(size) {
            dealloc(base, layout);
        }
    }
    with_engine(|engine| engine.raw_allocations -= 1);
}

static MESSAGES: Mutex<Vec<String>> = Mutex::new(Vec::new());

unsafe fn c_text(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

/// Records a console message. Kept apart from the engine lock, since the
/// extension may forward its own logging here while holding it.
fn console(kind: &str, description: *const c_char, function: *const c_char) {
    let (description, function) = unsafe { (c_text(description), c_text(function)) };
    let line = format!("{kind}: {description} ({function})");
    eprintln!("{line}");
    MESSAGES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(line);
}

unsafe extern "C" fn print_error(
    description: *const c_char,
    function: *const c_char,
    _file: *const c_char,
    _line: i32,
    _notify: u8,
) {
    console("ERROR", description, function);
}

unsafe extern "C" fn print_warning(
    description: *const c_char,
    function: *const c_char,
    _file: *const c_char,
    _line: i32,
    _notify: u8,
) {
    console("WARNING", description, function);
}

/// Console lines printed so far.
pub fn engine_messages() -> Vec<String> {
    MESSAGES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Builds the name → function match of `get_proc_address`.
macro_rules! function_table {
    ($name:expr; $($entry:literal => $func:expr,)*) => {
        match $name {
            $($entry => Some(unsafe {
                std::mem::transmute::<*const (), InterfaceFunction>($func as *const ())
            }),)*
            _ => None,
        }
    };
}

/// Looks up one entry of the headless function table.
///
/// # Safety
///
/// `name` must be a NUL-terminated string.
pub unsafe extern "C" fn get_proc_address(name: *const c_char) -> Option<InterfaceFunction> {
    if name.is_null() {
        return None;
    }
    let name = unsafe { CStr::from_ptr(name) }.to_bytes();
    function_table! { name;
        b"get_godot_version" => get_godot_version,
        b"mem_alloc" => mem_alloc,
        b"mem_free" => mem_free,
        b"print_error" => print_error,
        b"print_warning" => print_warning,
        b"variant_new_copy" => values::variant_new_copy,
        b"variant_new_nil" => values::variant_new_nil,
        b"variant_destroy" => values::variant_destroy,
        b"variant_get_type" => values::variant_get_type,
        b"get_variant_from_type_constructor" => values::get_variant_from_type_constructor,
        b"get_variant_to_type_constructor" => values::get_variant_to_type_constructor,
        b"variant_get_ptr_constructor" => values::variant_get_ptr_constructor,
        b"variant_get_ptr_destructor" => values::variant_get_ptr_destructor,
        b"variant_get_ptr_builtin_method" => values::variant_get_ptr_builtin_method,
        b"variant_get_ptr_utility_function" => calls::variant_get_ptr_utility_function,
        b"variant_call" => calls::variant_call,
        b"string_new_with_utf8_chars_and_len" => strings::string_new_with_utf8_chars_and_len,
        b"string_to_utf8_chars" => strings::string_to_utf8_chars,
        b"string_name_new_with_utf8_chars_and_len" => strings::string_name_new_with_utf8_chars_and_len,
        b"packed_byte_array_operator_index" => values::packed_operator_index::<29>,
        b"packed_int32_array_operator_index" => values::packed_operator_index::<30>,
        b"packed_int64_array_operator_index" => values::packed_operator_index::<31>,
        b"packed_float32_array_operator_index" => values::packed_operator_index::<32>,
        b"packed_float64_array_operator_index" => values::packed_operator_index::<33>,
        b"packed_string_array_operator_index" => values::packed_operator_index::<34>,
        b"packed_vector2_array_operator_index" => values::packed_operator_index::<35>,
        b"packed_vector3_array_operator_index" => values::packed_operator_index::<36>,
        b"packed_color_array_operator_index" => values::packed_operator_index::<37>,
        b"packed_vector4_array_operator_index" => values::packed_operator_index::<38>,
        b"array_operator_index" => values::array_operator_index,
        b"dictionary_operator_index" => values::dictionary_operator_index,
        b"object_method_bind_ptrcall" => objects::object_method_bind_ptrcall,
        b"object_method_bind_call" => calls::object_method_bind_call,
        b"callable_custom_create" => calls::callable_custom_create,
        b"object_destroy" => objects::object_destroy,
        b"global_get_singleton" => objects::global_get_singleton,
        b"object_set_instance" => objects::object_set_instance,
        b"object_cast_to" => objects::object_cast_to,
        b"object_get_instance_from_id" => objects::object_get_instance_from_id,
        b"object_get_instance_id" => objects::object_get_instance_id,
        b"classdb_construct_object" => objects::classdb_construct_object,
        b"classdb_get_method_bind" => objects::classdb_get_method_bind,
        b"classdb_get_class_tag" => objects::classdb_get_class_tag,
        b"classdb_register_extension_class" => objects::classdb_register_extension_class,
        b"classdb_unregister_extension_class" => objects::classdb_unregister_extension_class,
    }
}
