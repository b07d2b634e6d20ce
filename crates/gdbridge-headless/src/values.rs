//! Variants, pointer constructors, destructors and builtin methods.
//!
//! Per-kind entry points are const-generic `extern "C"` functions; the
//! lookup functions pick the instantiation for a runtime kind through
//! `by_kind!`.

use crate::engine::{self, Packed, Slot, read_token, with_engine, write_token};
use crate::kinds::{self, ARRAY, CALLABLE, DICTIONARY, NODE_PATH, OBJECT, SIGNAL, STRING, STRING_NAME};
use crate::strings;
use gdbridge_log::{error, trace, warn};
use std::ffi::{c_int, c_void};

pub(crate) type FromTypeFn = unsafe extern "C" fn(*mut c_void, *mut c_void);
pub(crate) type ToTypeFn = unsafe extern "C" fn(*mut c_void, *mut c_void);
pub(crate) type PtrCtorFn = unsafe extern "C" fn(*mut c_void, *const *const c_void);
pub(crate) type PtrDtorFn = unsafe extern "C" fn(*mut c_void);
pub(crate) type BuiltinMethodFn = unsafe extern "C" fn(*mut c_void, *const *const c_void, *mut c_void, c_int);

/// Picks `$f::<kind>` for a runtime kind, or `None`.
macro_rules! by_kind {
    ($ty:expr, $f:ident as $fty:ty) => {
        by_kind!(@arms $ty, $f, $fty; 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16 17 18 19 20
            21 22 23 24 25 26 27 28 29 30 31 32 33 34 35 36 37 38)
    };
    (@arms $ty:expr, $f:ident, $fty:ty; $($kind:literal)*) => {
        match $ty {
            $($kind => Some($f::<$kind> as $fty),)*
            _ => None,
        }
    };
}

/// Same as `by_kind!`, restricted to the packed array kinds.
macro_rules! by_packed_kind {
    ($ty:expr, $f:ident as $fty:ty) => {
        by_kind!(@arms $ty, $f, $fty; 29 30 31 32 33 34 35 36 37 38)
    };
}

pub(crate) unsafe fn read_slot(ptr: *const c_void) -> Slot {
    unsafe { ptr.cast::<Slot>().read() }
}

pub(crate) unsafe fn write_slot(ptr: *mut c_void, slot: Slot) {
    unsafe { ptr.cast::<Slot>().write(slot) }
}

pub(crate) unsafe extern "C" fn variant_new_copy(dst: *mut c_void, src: *const c_void) {
    let source = unsafe { read_slot(src) };
    let copy = with_engine(|engine| engine.copy_variant(source));
    unsafe { write_slot(dst, copy) };
}

pub(crate) unsafe extern "C" fn variant_new_nil(dst: *mut c_void) {
    unsafe { write_slot(dst, [0; 3]) };
}

pub(crate) unsafe extern "C" fn variant_destroy(variant: *mut c_void) {
    let slot = unsafe { read_slot(variant) };
    with_engine(|engine| engine.release_variant(slot));
}

pub(crate) unsafe extern "C" fn variant_get_type(variant: *const c_void) -> u32 {
    (unsafe { read_slot(variant) })[0] as u32
}

unsafe extern "C" fn from_type<const T: u32>(out: *mut c_void, value: *mut c_void) {
    let slot = with_engine(|engine| unsafe { engine.variant_from_value(T, value.cast_const().cast()) });
    unsafe { write_slot(out, slot) };
}

unsafe extern "C" fn to_type<const T: u32>(out: *mut c_void, variant: *mut c_void) {
    let slot = unsafe { read_slot(variant) };
    if slot[0] as u32 != T {
        error!("to-type constructor of kind {} applied to kind {}", T, slot[0]);
        return;
    }
    with_engine(|engine| unsafe { engine.value_from_variant(slot, out.cast()) });
}

pub(crate) unsafe extern "C" fn get_variant_from_type_constructor(ty: u32) -> Option<FromTypeFn> {
    by_kind!(ty, from_type as FromTypeFn)
}

pub(crate) unsafe extern "C" fn get_variant_to_type_constructor(ty: u32) -> Option<ToTypeFn> {
    by_kind!(ty, to_type as ToTypeFn)
}

/// Constructor 0: the empty value.
unsafe extern "C" fn construct_empty<const T: u32>(out: *mut c_void, _args: *const *const c_void) {
    let id = match T {
        ARRAY => with_engine(|engine| engine.new_array(Vec::new())),
        DICTIONARY => with_engine(|engine| engine.new_dictionary()),
        _ => 0,
    };
    let size = kinds::pod_size(T).unwrap_or(kinds::token_words(T) * 8);
    unsafe {
        std::ptr::write_bytes(out.cast::<u8>(), 0, size);
        if id != 0 {
            write_token(T, out.cast(), [id, 0]);
        }
    }
}

/// Constructor 1: a copy of the argument.
unsafe extern "C" fn construct_copy<const T: u32>(out: *mut c_void, args: *const *const c_void) {
    let token = unsafe { read_token(T, (*args).cast()) };
    let copy = with_engine(|engine| engine.copy_token(T, token));
    unsafe { write_token(T, out.cast(), copy) };
}

/// Constructor 2 of Callable and Signal: `(Object, StringName)`.
unsafe extern "C" fn construct_bound<const T: u32>(out: *mut c_void, args: *const *const c_void) {
    let (object, name) = unsafe {
        let object = (*args).cast::<*const c_void>().read();
        let [name, _] = read_token(STRING_NAME, (*args.add(1)).cast());
        (engine::object_id(object), name)
    };
    let name = with_engine(|engine| engine.copy_token(STRING_NAME, [name, 0])[0]);
    unsafe { write_token(T, out.cast(), [object, name]) };
}

pub(crate) unsafe extern "C" fn variant_get_ptr_constructor(ty: u32, index: i32) -> Option<PtrCtorFn> {
    match (ty, index) {
        (_, 0) if ty != OBJECT => by_kind!(ty, construct_empty as PtrCtorFn),
        (_, 1) if kinds::pod_size(ty).is_none() && ty != OBJECT => {
            by_kind!(ty, construct_copy as PtrCtorFn)
        }
        (STRING, 2) => Some(strings::string_from_string_name as PtrCtorFn),
        (STRING, 3) => Some(strings::string_from_node_path as PtrCtorFn),
        (STRING_NAME, 2) => Some(strings::string_name_from_string as PtrCtorFn),
        (NODE_PATH, 2) => Some(strings::node_path_from_string as PtrCtorFn),
        (CALLABLE, 2) => Some(construct_bound::<CALLABLE> as PtrCtorFn),
        (SIGNAL, 2) => Some(construct_bound::<SIGNAL> as PtrCtorFn),
        _ => None,
    }
}

unsafe extern "C" fn destroy<const T: u32>(value: *mut c_void) {
    let token = unsafe { read_token(T, value.cast()) };
    with_engine(|engine| engine.release_token(T, token));
}

pub(crate) unsafe extern "C" fn variant_get_ptr_destructor(ty: u32) -> Option<PtrDtorFn> {
    if kinds::pod_size(ty).is_some() || ty == OBJECT {
        return None;
    }
    by_kind!(ty, destroy as PtrDtorFn)
}

// Builtin methods.

unsafe fn write_int(ret: *mut c_void, value: i64) {
    unsafe { ret.cast::<i64>().write(value) }
}

unsafe fn int_arg(args: *const *const c_void, index: usize) -> i64 {
    unsafe { (*args.add(index)).cast::<i64>().read() }
}

unsafe extern "C" fn array_size(base: *mut c_void, _args: *const *const c_void, ret: *mut c_void, _argc: c_int) {
    let [id, _] = unsafe { read_token(ARRAY, base.cast()) };
    let len = with_engine(|engine| engine.arrays.get(&id).map_or(0, |a| a.data.len()));
    unsafe { write_int(ret, len as i64) };
}

unsafe extern "C" fn array_resize(base: *mut c_void, args: *const *const c_void, ret: *mut c_void, _argc: c_int) {
    let len = unsafe { int_arg(args, 0) };
    if len < 0 {
        // ERR_INVALID_PARAMETER
        unsafe { write_int(ret, 31) };
        return;
    }
    let [mut id, _] = unsafe { read_token(ARRAY, base.cast()) };
    with_engine(|engine| {
        if id == 0 {
            id = engine.new_array(Vec::new());
        }
        engine.resize_array(id, len as usize);
    });
    unsafe {
        write_token(ARRAY, base.cast(), [id, 0]);
        write_int(ret, 0);
    }
}

unsafe extern "C" fn dictionary_size(base: *mut c_void, _args: *const *const c_void, ret: *mut c_void, _argc: c_int) {
    let [id, _] = unsafe { read_token(DICTIONARY, base.cast()) };
    let len = with_engine(|engine| engine.dictionaries.get(&id).map_or(0, |d| d.data.len()));
    unsafe { write_int(ret, len as i64) };
}

unsafe extern "C" fn dictionary_keys(base: *mut c_void, _args: *const *const c_void, ret: *mut c_void, _argc: c_int) {
    let [id, _] = unsafe { read_token(DICTIONARY, base.cast()) };
    let keys = with_engine(|engine| {
        let keys: Vec<Slot> = engine
            .dictionaries
            .get(&id)
            .map(|d| d.data.iter().map(|(key, _)| *key).collect())
            .unwrap_or_default();
        let copies = keys.into_iter().map(|key| engine.copy_variant(key)).collect();
        engine.new_array(copies)
    });
    unsafe { write_token(ARRAY, ret.cast(), [keys, 0]) };
}

unsafe extern "C" fn packed_size<const T: u32>(
    base: *mut c_void,
    _args: *const *const c_void,
    ret: *mut c_void,
    _argc: c_int,
) {
    let [id, _] = unsafe { read_token(T, base.cast()) };
    let len = with_engine(|engine| engine.packed.get(&id).map_or(0, |p| p.data.len()));
    unsafe { write_int(ret, len as i64) };
}

unsafe extern "C" fn packed_resize<const T: u32>(
    base: *mut c_void,
    args: *const *const c_void,
    ret: *mut c_void,
    _argc: c_int,
) {
    let len = unsafe { int_arg(args, 0) };
    if len < 0 {
        unsafe { write_int(ret, 31) };
        return;
    }
    let [id, _] = unsafe { read_token(T, base.cast()) };
    let id = with_engine(|engine| {
        let id = if id == 0 { engine.new_packed(T) } else { engine.make_unique(id) };
        engine.resize_packed(id, len as usize);
        id
    });
    unsafe {
        write_token(T, base.cast(), [id, 0]);
        write_int(ret, 0);
    }
}

/// `get_method` of Callable and `get_name` of Signal. Custom callables have
/// no method name.
unsafe extern "C" fn bound_name(base: *mut c_void, _args: *const *const c_void, ret: *mut c_void, _argc: c_int) {
    let [_, name] = unsafe { read_token(CALLABLE, base.cast()) };
    let name = with_engine(|engine| {
        if engine.is_custom_callable(name) {
            0
        } else {
            engine.copy_token(STRING_NAME, [name, 0])[0]
        }
    });
    unsafe { write_token(STRING_NAME, ret.cast(), [name, 0]) };
}

unsafe extern "C" fn bound_object_id(base: *mut c_void, _args: *const *const c_void, ret: *mut c_void, _argc: c_int) {
    let [object, _] = unsafe { read_token(CALLABLE, base.cast()) };
    unsafe { write_int(ret, object as i64) };
}

pub(crate) unsafe extern "C" fn variant_get_ptr_builtin_method(
    ty: u32,
    name: *const c_void,
    hash: i64,
) -> Option<BuiltinMethodFn> {
    let [name_id, _] = unsafe { read_token(STRING_NAME, name.cast()) };
    let name = with_engine(|engine| engine.name_text(name_id).to_owned());
    let method = match (ty, name.as_str(), hash) {
        (ARRAY, "size", 3173160232) => Some(array_size as BuiltinMethodFn),
        (ARRAY, "resize", 848867239) => Some(array_resize as BuiltinMethodFn),
        (DICTIONARY, "size", 3161995436) => Some(dictionary_size as BuiltinMethodFn),
        (DICTIONARY, "keys", 4144163970) => Some(dictionary_keys as BuiltinMethodFn),
        (CALLABLE, "get_method", 1825232092) | (SIGNAL, "get_name", 1825232092) => {
            Some(bound_name as BuiltinMethodFn)
        }
        (CALLABLE | SIGNAL, "get_object_id", 3905245786) => Some(bound_object_id as BuiltinMethodFn),
        (_, "size", 3173160232) => by_packed_kind!(ty, packed_size as BuiltinMethodFn),
        (_, "resize", 848867239) => by_packed_kind!(ty, packed_resize as BuiltinMethodFn),
        _ => None,
    };
    if method.is_none() {
        warn!("no builtin method {} of kind {} with hash {}", name, ty, hash);
    }
    method
}

// Element access.

/// Element `index` of a packed array, after making its buffer unique.
pub(crate) unsafe extern "C" fn packed_operator_index<const T: u32>(array: *mut c_void, index: i64) -> *mut c_void {
    let [id, _] = unsafe { read_token(T, array.cast()) };
    if id == 0 || index < 0 {
        return std::ptr::null_mut();
    }
    let index = index as usize;
    let (id, slot) = with_engine(|engine| {
        let id = engine.make_unique(id);
        let slot = match engine.packed.get_mut(&id).map(|p| &mut p.data) {
            Some(Packed::Pod { elem, len, words }) if index < *len => {
                let bytes = words.as_mut_ptr().cast::<u8>();
                unsafe { bytes.add(index * *elem).cast::<c_void>() }
            }
            Some(Packed::Strings(ids)) if index < ids.len() => {
                (&mut ids[index] as *mut u64).cast::<c_void>()
            }
            _ => std::ptr::null_mut(),
        };
        (id, slot)
    });
    unsafe { write_token(T, array.cast(), [id, 0]) };
    if slot.is_null() {
        error!("packed index {} out of bounds", index);
    }
    slot
}

pub(crate) unsafe extern "C" fn array_operator_index(array: *mut c_void, index: i64) -> *mut c_void {
    let [id, _] = unsafe { read_token(ARRAY, array.cast()) };
    with_engine(|engine| {
        let slot = engine
            .arrays
            .get_mut(&id)
            .and_then(|a| usize::try_from(index).ok().and_then(|i| a.data.get_mut(i)));
        match slot {
            Some(slot) => (slot as *mut Slot).cast(),
            None => {
                error!("array index {} out of bounds", index);
                std::ptr::null_mut()
            }
        }
    })
}

pub(crate) unsafe extern "C" fn dictionary_operator_index(dict: *mut c_void, key: *const c_void) -> *mut c_void {
    let [id, _] = unsafe { read_token(DICTIONARY, dict.cast()) };
    let key = unsafe { read_slot(key) };
    with_engine(|engine| {
        let Some(entries) = engine.dictionaries.get(&id) else {
            error!("index into released dictionary {}", id);
            return std::ptr::null_mut();
        };
        let found = entries.data.iter().position(|(k, _)| engine.variants_equal(k, &key));
        let index = match found {
            Some(index) => index,
            None => {
                let key = engine.copy_variant(key);
                trace!("dictionary {} gains key of kind {}", id, key[0]);
                let Some(entries) = engine.dictionaries.get_mut(&id) else {
                    return std::ptr::null_mut();
                };
                entries.data.push((key, [0; 3]));
                entries.data.len() - 1
            }
        };
        match engine.dictionaries.get_mut(&id) {
            Some(entries) => (&mut entries.data[index].1 as *mut Slot).cast(),
            None => std::ptr::null_mut(),
        }
    })
}
