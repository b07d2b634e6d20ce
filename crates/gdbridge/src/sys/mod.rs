//! Raw ABI surface shared with the engine.
//!
//! Everything here mirrors the engine's C header one to one: opaque pointer
//! aliases, callback signatures and the few `#[repr(C)]` structs exchanged at
//! load and registration time. Nothing in this module owns memory.

#![allow(non_camel_case_types)]

mod interface;

pub use interface::Interface;

use std::ffi::{c_char, c_int, c_void};

pub type VariantPtr = *mut c_void;
pub type ConstVariantPtr = *const c_void;
pub type UninitVariantPtr = *mut c_void;
pub type TypePtr = *mut c_void;
pub type ConstTypePtr = *const c_void;
pub type UninitTypePtr = *mut c_void;
pub type StringPtr = *mut c_void;
pub type ConstStringPtr = *const c_void;
pub type UninitStringPtr = *mut c_void;
pub type StringNamePtr = *mut c_void;
pub type ConstStringNamePtr = *const c_void;
pub type UninitStringNamePtr = *mut c_void;
pub type ObjectPtr = *mut c_void;
pub type ConstObjectPtr = *const c_void;
pub type MethodBindPtr = *const c_void;
pub type ClassLibraryPtr = *mut c_void;
pub type ClassInstancePtr = *mut c_void;
pub type ClassTag = *mut c_void;

/// Engine integer discriminant of a Variant type.
pub type VariantTypeRaw = u32;
/// Engine boolean: 0 or 1.
pub type Bool = u8;
pub type Int = i64;
pub type InstanceId = u64;

pub const TRUE: Bool = 1;
pub const FALSE: Bool = 0;

/// Untyped function pointer returned by [`GetProcAddress`].
pub type InterfaceFunctionPtr = Option<unsafe extern "C" fn()>;

/// Looks up one entry of the function table by its NUL-terminated name.
pub type GetProcAddress =
    unsafe extern "C" fn(p_function_name: *const c_char) -> InterfaceFunctionPtr;

pub type VariantFromTypeConstructorFunc =
    Option<unsafe extern "C" fn(r_variant: UninitVariantPtr, p_value: TypePtr)>;
pub type TypeFromVariantConstructorFunc =
    Option<unsafe extern "C" fn(r_value: UninitTypePtr, p_variant: VariantPtr)>;
pub type PtrConstructor =
    Option<unsafe extern "C" fn(r_base: UninitTypePtr, p_args: *const ConstTypePtr)>;
pub type PtrDestructor = Option<unsafe extern "C" fn(p_base: TypePtr)>;
pub type PtrBuiltInMethod = Option<
    unsafe extern "C" fn(
        p_base: TypePtr,
        p_args: *const ConstTypePtr,
        r_return: TypePtr,
        p_argument_count: c_int,
    ),
>;

pub type PtrUtilityFunction = Option<
    unsafe extern "C" fn(r_return: TypePtr, p_args: *const ConstTypePtr, p_argument_count: c_int),
>;

/// `CallError::error` values.
pub const CALL_OK: i32 = 0;
pub const CALL_ERROR_INVALID_METHOD: i32 = 1;
pub const CALL_ERROR_INVALID_ARGUMENT: i32 = 2;
pub const CALL_ERROR_TOO_MANY_ARGUMENTS: i32 = 3;
pub const CALL_ERROR_TOO_FEW_ARGUMENTS: i32 = 4;
pub const CALL_ERROR_INSTANCE_IS_NULL: i32 = 5;
pub const CALL_ERROR_METHOD_NOT_CONST: i32 = 6;

/// Outcome of a Variant-argument call.
///
/// `argument` and `expected` are meaningful for argument errors only:
/// the failing index and, for a type error, the expected type discriminant
/// or, for a count error, the expected count.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallError {
    pub error: i32,
    pub argument: i32,
    pub expected: i32,
}

pub type CallableCustomCall = Option<
    unsafe extern "C" fn(
        callable_userdata: *mut c_void,
        p_args: *const ConstVariantPtr,
        p_argument_count: Int,
        r_return: VariantPtr,
        r_error: *mut CallError,
    ),
>;
pub type CallableCustomIsValid = Option<unsafe extern "C" fn(callable_userdata: *mut c_void) -> Bool>;
pub type CallableCustomFree = Option<unsafe extern "C" fn(callable_userdata: *mut c_void)>;
pub type CallableCustomHash = Option<unsafe extern "C" fn(callable_userdata: *mut c_void) -> u32>;
pub type CallableCustomEqual =
    Option<unsafe extern "C" fn(callable_userdata_a: *mut c_void, callable_userdata_b: *mut c_void) -> Bool>;
pub type CallableCustomLessThan =
    Option<unsafe extern "C" fn(callable_userdata_a: *mut c_void, callable_userdata_b: *mut c_void) -> Bool>;
pub type CallableCustomToString = Option<
    unsafe extern "C" fn(callable_userdata: *mut c_void, r_is_valid: *mut Bool, r_out: StringPtr),
>;

/// Describes a host-implemented callable to `callable_custom_create`.
///
/// Only `call_func` is required. Without `hash_func` and `equal_func` the
/// engine compares custom callables by userdata pointer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CallableCustomInfo {
    pub callable_userdata: *mut c_void,
    /// The library pointer the extension was loaded with.
    pub token: *mut c_void,
    /// Object the callable is tied to, or 0.
    pub object_id: InstanceId,
    pub call_func: CallableCustomCall,
    pub is_valid_func: CallableCustomIsValid,
    pub free_func: CallableCustomFree,
    pub hash_func: CallableCustomHash,
    pub equal_func: CallableCustomEqual,
    pub less_than_func: CallableCustomLessThan,
    pub to_string_func: CallableCustomToString,
}

pub type ClassCreateInstance = Option<unsafe extern "C" fn(p_class_userdata: *mut c_void) -> ObjectPtr>;
pub type ClassFreeInstance =
    Option<unsafe extern "C" fn(p_class_userdata: *mut c_void, p_instance: ClassInstancePtr)>;
pub type ClassGetVirtualCallData = Option<
    unsafe extern "C" fn(p_class_userdata: *mut c_void, p_name: ConstStringNamePtr) -> *mut c_void,
>;
pub type ClassCallVirtualWithData = Option<
    unsafe extern "C" fn(
        p_instance: ClassInstancePtr,
        p_name: ConstStringNamePtr,
        p_virtual_call_userdata: *mut c_void,
        p_args: *const ConstTypePtr,
        r_ret: TypePtr,
    ),
>;

/// Describes a host-implemented class to `classdb_register_extension_class`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ClassCreationInfo {
    pub is_virtual: Bool,
    pub is_abstract: Bool,
    pub is_exposed: Bool,
    pub create_instance_func: ClassCreateInstance,
    pub free_instance_func: ClassFreeInstance,
    pub get_virtual_call_data_func: ClassGetVirtualCallData,
    pub call_virtual_with_data_func: ClassCallVirtualWithData,
    pub class_userdata: *mut c_void,
}

/// Version block filled by `get_godot_version`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EngineVersionRaw {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub string: *const c_char,
}

pub type InitializeCallback = Option<unsafe extern "C" fn(userdata: *mut c_void, p_level: u32)>;

/// Filled by the extension's entry point to tell the engine when to call it.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InitializationRaw {
    pub minimum_initialization_level: u32,
    pub userdata: *mut c_void,
    pub initialize: InitializeCallback,
    pub deinitialize: InitializeCallback,
}

/// Signature of the symbol the engine calls when loading the extension.
pub type EntryPoint = unsafe extern "C" fn(
    p_get_proc_address: GetProcAddress,
    p_library: ClassLibraryPtr,
    r_initialization: *mut InitializationRaw,
) -> Bool;
