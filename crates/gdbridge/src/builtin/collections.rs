//! `Array` and `Dictionary`: engine containers of Variants.
//!
//! Both are shared by reference on the engine side; copying a token with the
//! copy constructor yields a second handle to the same storage.

use super::{Builtin, builtin_handle};
use crate::error::{EngineError, Result};
use crate::frame::{BuiltinFrame, Param, Signature};
use crate::lifetime::{Lifetime, Local};
use crate::ownership::{Owned, Transfer};
use crate::resolver::BuiltinSpec;
use crate::runtime::Runtime;
use crate::variant::{Variant, VariantType};

builtin_handle!(
    /// An ordered list of Variants.
    Array,
    Array,
    1
);

builtin_handle!(
    /// An insertion-ordered map from Variant to Variant.
    Dictionary,
    Dictionary,
    1
);

static ARRAY_SIZE: BuiltinSpec = BuiltinSpec::new(
    VariantType::Array,
    "size",
    3173160232,
    Signature::new(&[], Some(Param::Typed(VariantType::Int))),
);

static ARRAY_RESIZE: BuiltinSpec = BuiltinSpec::new(
    VariantType::Array,
    "resize",
    848867239,
    Signature::new(
        &[Param::Typed(VariantType::Int)],
        Some(Param::Typed(VariantType::Int)),
    ),
);

static DICTIONARY_SIZE: BuiltinSpec = BuiltinSpec::new(
    VariantType::Dictionary,
    "size",
    3161995436,
    Signature::new(&[], Some(Param::Typed(VariantType::Int))),
);

static DICTIONARY_KEYS: BuiltinSpec = BuiltinSpec::new(
    VariantType::Dictionary,
    "keys",
    4144163970,
    Signature::new(&[], Some(Param::Typed(VariantType::Array))),
);

/// Replaces the Variant at `slot` with a copy of `value`.
unsafe fn assign(runtime: &Runtime, slot: *mut std::ffi::c_void, value: &Variant) {
    let interface = runtime.interface();
    unsafe {
        (interface.variant_destroy)(slot);
        (interface.variant_new_copy)(slot, value.type_ptr());
    }
}

/// Copies the Variant at `slot` into a new owned handle.
unsafe fn copy_out(runtime: &Runtime, slot: *const std::ffi::c_void) -> Owned<Variant> {
    let mut out = Variant::empty();
    unsafe {
        (runtime.interface().variant_new_copy)(out.type_ptr_mut(), slot);
        Owned::from_raw(out)
    }
}

fn engine_size(
    runtime: &Runtime,
    spec: &'static BuiltinSpec,
    base: *const std::ffi::c_void,
) -> Result<usize> {
    let frame = BuiltinFrame::<0>::open(runtime.resolve_builtin(spec)?)?;
    let len: i64 = unsafe { frame.invoke_on(base.cast_mut())? };
    Ok(len.max(0) as usize)
}

impl Array {
    /// An empty array in `lifetime`.
    pub fn new(lifetime: &Lifetime) -> Result<Local<'_, Array>> {
        lifetime.register(Self::new_raw(lifetime.runtime())?)
    }

    /// An empty unmanaged array. The caller must release it.
    pub fn new_raw(runtime: &Runtime) -> Result<Array> {
        // Constructor 0 allocates the shared storage; a zeroed token is only
        // a valid destination.
        let ctor = runtime.ptr_constructor(VariantType::Array, 0)?;
        let mut out = Array::empty();
        unsafe { ctor(out.type_ptr_mut(), std::ptr::null()) };
        Ok(out)
    }

    pub fn len(&self, runtime: &Runtime) -> Result<usize> {
        engine_size(runtime, &ARRAY_SIZE, self.type_ptr())
    }

    pub fn is_empty(&self, runtime: &Runtime) -> Result<bool> {
        Ok(self.len(runtime)? == 0)
    }

    pub fn resize(&mut self, runtime: &Runtime, len: usize) -> Result<()> {
        let mut frame = BuiltinFrame::<1>::open(runtime.resolve_builtin(&ARRAY_RESIZE)?)?;
        frame.push(&(len as i64))?;
        let status: std::result::Result<(), EngineError> =
            unsafe { frame.invoke_on(self.type_ptr_mut())? };
        Ok(status?)
    }

    /// Appends a copy of `value`.
    pub fn push(&mut self, runtime: &Runtime, value: &Variant) -> Result<()> {
        let len = self.len(runtime)?;
        self.resize(runtime, len + 1)?;
        unsafe {
            let slot = (runtime.interface().array_operator_index)(self.type_ptr_mut(), len as i64);
            assign(runtime, slot, value);
        }
        Ok(())
    }

    /// A copy of element `index`, or `None` past the end.
    pub fn get(&self, runtime: &Runtime, index: usize) -> Result<Option<Owned<Variant>>> {
        if index >= self.len(runtime)? {
            return Ok(None);
        }
        let slot = unsafe {
            (runtime.interface().array_operator_index)(self.type_ptr().cast_mut(), index as i64)
        };
        Ok(Some(unsafe { copy_out(runtime, slot) }))
    }

    /// Copies every element into `lifetime`.
    pub fn to_locals<'l>(&self, lifetime: &'l Lifetime) -> Result<Vec<Local<'l, Variant>>> {
        let runtime = lifetime.runtime();
        let len = self.len(runtime)?;
        let mut items = Vec::with_capacity(len);
        for i in 0..len {
            if let Some(item) = self.get(runtime, i)? {
                items.push(lifetime.adopt(item)?);
            }
        }
        Ok(items)
    }
}

impl Dictionary {
    /// An empty dictionary in `lifetime`.
    pub fn new(lifetime: &Lifetime) -> Result<Local<'_, Dictionary>> {
        lifetime.register(Self::new_raw(lifetime.runtime())?)
    }

    /// An empty unmanaged dictionary. The caller must release it.
    pub fn new_raw(runtime: &Runtime) -> Result<Dictionary> {
        let ctor = runtime.ptr_constructor(VariantType::Dictionary, 0)?;
        let mut out = Dictionary::empty();
        unsafe { ctor(out.type_ptr_mut(), std::ptr::null()) };
        Ok(out)
    }

    pub fn len(&self, runtime: &Runtime) -> Result<usize> {
        engine_size(runtime, &DICTIONARY_SIZE, self.type_ptr())
    }

    pub fn is_empty(&self, runtime: &Runtime) -> Result<bool> {
        Ok(self.len(runtime)? == 0)
    }

    /// Inserts or replaces the entry for `key`.
    pub fn set(&mut self, runtime: &Runtime, key: &Variant, value: &Variant) -> Result<()> {
        unsafe {
            let slot = (runtime.interface().dictionary_operator_index)(
                self.type_ptr_mut(),
                key.type_ptr(),
            );
            assign(runtime, slot, value);
        }
        Ok(())
    }

    /// The keys, in insertion order.
    pub fn keys(&self, runtime: &Runtime) -> Result<Owned<Array>> {
        let frame = BuiltinFrame::<0>::open(runtime.resolve_builtin(&DICTIONARY_KEYS)?)?;
        unsafe { frame.invoke_on(self.type_ptr().cast_mut()) }
    }

    /// Copies every entry out, in insertion order.
    pub fn entries(&self, runtime: &Runtime) -> Result<Vec<(Owned<Variant>, Owned<Variant>)>> {
        let keys = self.keys(runtime)?;
        let len = keys.len(runtime)?;
        let mut entries = Vec::with_capacity(len);
        for i in 0..len {
            let Some(key) = keys.get(runtime, i)? else {
                break;
            };
            // The key exists, so indexing reads it without inserting.
            let value = unsafe {
                let slot = (runtime.interface().dictionary_operator_index)(
                    self.type_ptr().cast_mut(),
                    key.type_ptr(),
                );
                copy_out(runtime, slot)
            };
            entries.push((key, value));
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use crate::variant::{Decode, Encode};

    #[test]
    fn test_array_push_and_get() {
        let runtime = test_support::runtime();
        let lifetime = Lifetime::with_runtime(runtime.clone());
        let mut array = Array::new(&lifetime).unwrap();
        for i in 0..3i64 {
            let item = (i * 10).encode(&lifetime).unwrap();
            array.push(&runtime, &item).unwrap();
        }
        assert_eq!(array.len(&runtime).unwrap(), 3);

        let second = lifetime.adopt(array.get(&runtime, 1).unwrap().unwrap()).unwrap();
        assert_eq!(i64::decode(&second, &lifetime), Ok(10));
        assert!(array.get(&runtime, 3).unwrap().is_none());
    }

    #[test]
    fn test_array_copies_share_storage() {
        let runtime = test_support::runtime();
        let lifetime = Lifetime::with_runtime(runtime.clone());
        let mut array = Array::new(&lifetime).unwrap();
        let alias = array.duplicate(&lifetime).unwrap();
        let item = true.encode(&lifetime).unwrap();
        array.push(&runtime, &item).unwrap();
        assert_eq!(alias.len(&runtime).unwrap(), 1);
    }

    #[test]
    fn test_dictionary_set_and_entries() {
        let runtime = test_support::runtime();
        let lifetime = Lifetime::with_runtime(runtime.clone());
        let mut dict = Dictionary::new(&lifetime).unwrap();
        let k1 = "one".encode(&lifetime).unwrap();
        let k2 = 2i64.encode(&lifetime).unwrap();
        dict.set(&runtime, &k1, &1.5f64.encode(&lifetime).unwrap()).unwrap();
        dict.set(&runtime, &k2, &false.encode(&lifetime).unwrap()).unwrap();
        dict.set(&runtime, &k1, &2.5f64.encode(&lifetime).unwrap()).unwrap();
        assert_eq!(dict.len(&runtime).unwrap(), 2);

        let entries = dict.entries(&runtime).unwrap();
        let (key, value) = &entries[0];
        assert_eq!(String::decode(key, &lifetime).unwrap(), "one");
        assert_eq!(f64::decode(value, &lifetime), Ok(2.5));
        let (key, value) = &entries[1];
        assert_eq!(i64::decode(key, &lifetime), Ok(2));
        assert_eq!(bool::decode(value, &lifetime), Ok(false));
    }
}
