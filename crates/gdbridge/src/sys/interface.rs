//! The engine function table.

use super::*;
use crate::error::{Error, Result};

macro_rules! interface {
    ($(
        $(#[$meta:meta])*
        $field:ident: unsafe extern "C" fn($($arg:ty),* $(,)?) $(-> $ret:ty)?;
    )*) => {
        /// Typed entries of the engine's function table.
        ///
        /// Loaded once per process by [`Interface::load`]; every entry is
        /// required, so a table missing any of them is rejected at load time
        /// rather than at first call.
        #[derive(Clone, Copy)]
        pub struct Interface {
            $(
                $(#[$meta])*
                pub $field: unsafe extern "C" fn($($arg),*) $(-> $ret)?,
            )*
        }

        impl Interface {
            /// Names of every entry, in declaration order.
            pub const NAMES: &'static [&'static str] = &[$(stringify!($field)),*];

            /// Resolves every entry through `get_proc_address`.
            ///
            /// # Errors
            ///
            /// Returns [`Error::MissingFunction`] naming the first entry the
            /// engine does not provide.
            ///
            /// # Safety
            ///
            /// `get_proc_address` must return, for each name, either `None` or
            /// a function whose real signature matches the declared field.
            pub unsafe fn load(get_proc_address: GetProcAddress) -> Result<Self> {
                Ok(Self {
                    $(
                        $field: {
                            let name = concat!(stringify!($field), "\0");
                            // SAFETY: `name` is NUL-terminated.
                            let raw = unsafe { get_proc_address(name.as_ptr().cast()) };
                            let Some(raw) = raw else {
                                return Err(Error::MissingFunction { name: stringify!($field) });
                            };
                            // SAFETY: guaranteed by the caller's contract.
                            unsafe {
                                std::mem::transmute::<
                                    unsafe extern "C" fn(),
                                    unsafe extern "C" fn($($arg),*) $(-> $ret)?,
                                >(raw)
                            }
                        },
                    )*
                })
            }
        }
    };
}

interface! {
    get_godot_version: unsafe extern "C" fn(*mut EngineVersionRaw);

    mem_alloc: unsafe extern "C" fn(usize) -> *mut c_void;
    mem_free: unsafe extern "C" fn(*mut c_void);
    /// `(description, function, file, line, editor_notify)`.
    print_error: unsafe extern "C" fn(*const c_char, *const c_char, *const c_char, i32, Bool);
    print_warning: unsafe extern "C" fn(*const c_char, *const c_char, *const c_char, i32, Bool);

    variant_new_copy: unsafe extern "C" fn(UninitVariantPtr, ConstVariantPtr);
    variant_new_nil: unsafe extern "C" fn(UninitVariantPtr);
    variant_destroy: unsafe extern "C" fn(VariantPtr);
    variant_get_type: unsafe extern "C" fn(ConstVariantPtr) -> VariantTypeRaw;
    get_variant_from_type_constructor:
        unsafe extern "C" fn(VariantTypeRaw) -> VariantFromTypeConstructorFunc;
    get_variant_to_type_constructor:
        unsafe extern "C" fn(VariantTypeRaw) -> TypeFromVariantConstructorFunc;
    variant_get_ptr_constructor: unsafe extern "C" fn(VariantTypeRaw, i32) -> PtrConstructor;
    variant_get_ptr_destructor: unsafe extern "C" fn(VariantTypeRaw) -> PtrDestructor;
    /// `(type, method name, hash)`; `None` when unknown or the hash differs.
    variant_get_ptr_builtin_method:
        unsafe extern "C" fn(VariantTypeRaw, ConstStringNamePtr, i64) -> PtrBuiltInMethod;
    /// `(function name, hash)`; `None` when unknown or the hash differs.
    variant_get_ptr_utility_function: unsafe extern "C" fn(ConstStringNamePtr, i64) -> PtrUtilityFunction;
    /// `(self, method, args, count, return, error)`; the return Variant is
    /// uninitialized on entry and always written.
    variant_call: unsafe extern "C" fn(
        VariantPtr,
        ConstStringNamePtr,
        *const ConstVariantPtr,
        Int,
        UninitVariantPtr,
        *mut CallError,
    );

    string_new_with_utf8_chars_and_len: unsafe extern "C" fn(UninitStringPtr, *const c_char, i64);
    /// Writes at most `max` bytes and returns the full UTF-8 length.
    string_to_utf8_chars: unsafe extern "C" fn(ConstStringPtr, *mut c_char, i64) -> i64;
    string_name_new_with_utf8_chars_and_len:
        unsafe extern "C" fn(UninitStringNamePtr, *const c_char, i64);

    packed_byte_array_operator_index: unsafe extern "C" fn(TypePtr, i64) -> *mut u8;
    packed_int32_array_operator_index: unsafe extern "C" fn(TypePtr, i64) -> *mut i32;
    packed_int64_array_operator_index: unsafe extern "C" fn(TypePtr, i64) -> *mut i64;
    packed_float32_array_operator_index: unsafe extern "C" fn(TypePtr, i64) -> *mut f32;
    packed_float64_array_operator_index: unsafe extern "C" fn(TypePtr, i64) -> *mut f64;
    packed_string_array_operator_index: unsafe extern "C" fn(TypePtr, i64) -> StringPtr;
    packed_vector2_array_operator_index: unsafe extern "C" fn(TypePtr, i64) -> TypePtr;
    packed_vector3_array_operator_index: unsafe extern "C" fn(TypePtr, i64) -> TypePtr;
    packed_color_array_operator_index: unsafe extern "C" fn(TypePtr, i64) -> TypePtr;
    packed_vector4_array_operator_index: unsafe extern "C" fn(TypePtr, i64) -> TypePtr;
    array_operator_index: unsafe extern "C" fn(TypePtr, i64) -> VariantPtr;
    /// Inserts a nil entry when `key` is absent.
    dictionary_operator_index: unsafe extern "C" fn(TypePtr, ConstVariantPtr) -> VariantPtr;

    object_method_bind_ptrcall:
        unsafe extern "C" fn(MethodBindPtr, ObjectPtr, *const ConstTypePtr, TypePtr);
    /// Variant-argument form of `object_method_bind_ptrcall`; the only form
    /// vararg methods accept.
    object_method_bind_call: unsafe extern "C" fn(
        MethodBindPtr,
        ObjectPtr,
        *const ConstVariantPtr,
        Int,
        UninitVariantPtr,
        *mut CallError,
    );
    object_destroy: unsafe extern "C" fn(ObjectPtr);
    global_get_singleton: unsafe extern "C" fn(ConstStringNamePtr) -> ObjectPtr;
    object_set_instance: unsafe extern "C" fn(ObjectPtr, ConstStringNamePtr, ClassInstancePtr);
    object_cast_to: unsafe extern "C" fn(ConstObjectPtr, ClassTag) -> ObjectPtr;
    object_get_instance_from_id: unsafe extern "C" fn(InstanceId) -> ObjectPtr;
    object_get_instance_id: unsafe extern "C" fn(ConstObjectPtr) -> InstanceId;

    classdb_construct_object: unsafe extern "C" fn(ConstStringNamePtr) -> ObjectPtr;
    classdb_get_method_bind:
        unsafe extern "C" fn(ConstStringNamePtr, ConstStringNamePtr, i64) -> MethodBindPtr;
    classdb_get_class_tag: unsafe extern "C" fn(ConstStringNamePtr) -> ClassTag;
    classdb_register_extension_class: unsafe extern "C" fn(
        ClassLibraryPtr,
        ConstStringNamePtr,
        ConstStringNamePtr,
        *const ClassCreationInfo,
    );
    classdb_unregister_extension_class: unsafe extern "C" fn(ClassLibraryPtr, ConstStringNamePtr);

    callable_custom_create: unsafe extern "C" fn(UninitTypePtr, *mut CallableCustomInfo);
}

impl std::fmt::Debug for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interface")
            .field("entries", &Self::NAMES.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    unsafe extern "C" fn nothing(_name: *const c_char) -> InterfaceFunctionPtr {
        None
    }

    #[test]
    fn test_missing_entry_is_reported_by_name() {
        let err = unsafe { Interface::load(nothing) }.unwrap_err();
        assert_eq!(err, Error::MissingFunction { name: "get_godot_version" });
    }

    unsafe extern "C" fn stub() {}

    unsafe extern "C" fn all_but_destroy(name: *const c_char) -> InterfaceFunctionPtr {
        let name = unsafe { CStr::from_ptr(name) };
        if name.to_bytes() == b"object_destroy" {
            None
        } else {
            Some(stub)
        }
    }

    #[test]
    fn test_first_missing_entry_wins() {
        let err = unsafe { Interface::load(all_but_destroy) }.unwrap_err();
        assert_eq!(err, Error::MissingFunction { name: "object_destroy" });
    }

    #[test]
    fn test_names_are_unique() {
        let mut names = Interface::NAMES.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Interface::NAMES.len());
    }
}
