//! Packed arrays: contiguous, copy-on-write engine buffers of one element
//! kind.
//!
//! All ten kinds share one generic token, [`PackedArray<E>`]; the element
//! marker `E` picks the engine type, the element accessor and the host
//! representation of an element.

use super::{Builtin, Color, GString, Vector2, Vector3, Vector4};
use crate::error::{EngineError, Result};
use crate::frame::{BuiltinFrame, Param, PtrArg, Signature};
use crate::lifetime::{Lifetime, Local};
use crate::ownership::Transfer;
use crate::resolver::BuiltinSpec;
use crate::runtime::Runtime;
use crate::sys::TypePtr;
use crate::variant::VariantType;
use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;

/// Hash of `size() -> int` on every packed array kind.
const SIZE_HASH: i64 = 3173160232;
/// Hash of `resize(int) -> int` on every packed array kind.
const RESIZE_HASH: i64 = 848867239;

const SIZE_SIGNATURE: Signature = Signature::new(&[], Some(Param::Typed(VariantType::Int)));
const RESIZE_SIGNATURE: Signature = Signature::new(
    &[Param::Typed(VariantType::Int)],
    Some(Param::Typed(VariantType::Int)),
);

/// Element kind of a packed array.
///
/// # Safety
///
/// `element_ptr` must return the engine's accessor result for `ARRAY_TYPE`,
/// and `read`/`write` must match the element's native layout.
pub unsafe trait PackedElement: Sized + 'static {
    /// Host-side value of one element.
    type Host;

    const ARRAY_TYPE: VariantType;
    const SIZE_SPEC: &'static BuiltinSpec;
    const RESIZE_SPEC: &'static BuiltinSpec;

    /// Pointer to element `index`, after the engine made the buffer unique.
    ///
    /// # Safety
    ///
    /// `array` must point to a live array of `ARRAY_TYPE` and `index` must be
    /// in bounds.
    unsafe fn element_ptr(runtime: &Runtime, array: TypePtr, index: i64) -> *mut c_void;

    /// # Safety
    ///
    /// `slot` comes from `element_ptr`.
    unsafe fn read(runtime: &Runtime, slot: *const c_void) -> Self::Host;

    /// # Safety
    ///
    /// `slot` comes from `element_ptr`.
    unsafe fn write(runtime: &Runtime, slot: *mut c_void, value: &Self::Host);
}

macro_rules! packed_specs {
    ($variant:ident) => {
        const ARRAY_TYPE: VariantType = VariantType::$variant;
        const SIZE_SPEC: &'static BuiltinSpec =
            &BuiltinSpec::new(VariantType::$variant, "size", SIZE_HASH, SIZE_SIGNATURE);
        const RESIZE_SPEC: &'static BuiltinSpec =
            &BuiltinSpec::new(VariantType::$variant, "resize", RESIZE_HASH, RESIZE_SIGNATURE);
    };
}

macro_rules! pod_element {
    ($($elem:ty => $variant:ident, $index_fn:ident;)*) => {$(
        unsafe impl PackedElement for $elem {
            type Host = $elem;

            packed_specs!($variant);

            unsafe fn element_ptr(runtime: &Runtime, array: TypePtr, index: i64) -> *mut c_void {
                unsafe { (runtime.interface().$index_fn)(array, index).cast() }
            }

            unsafe fn read(_runtime: &Runtime, slot: *const c_void) -> $elem {
                unsafe { slot.cast::<$elem>().read() }
            }

            unsafe fn write(_runtime: &Runtime, slot: *mut c_void, value: &$elem) {
                unsafe { slot.cast::<$elem>().write(*value) }
            }
        }
    )*};
}

pod_element! {
    u8 => PackedByteArray, packed_byte_array_operator_index;
    i32 => PackedInt32Array, packed_int32_array_operator_index;
    i64 => PackedInt64Array, packed_int64_array_operator_index;
    f32 => PackedFloat32Array, packed_float32_array_operator_index;
    f64 => PackedFloat64Array, packed_float64_array_operator_index;
    Vector2 => PackedVector2Array, packed_vector2_array_operator_index;
    Vector3 => PackedVector3Array, packed_vector3_array_operator_index;
    Color => PackedColorArray, packed_color_array_operator_index;
    Vector4 => PackedVector4Array, packed_vector4_array_operator_index;
}

unsafe impl PackedElement for GString {
    type Host = String;

    packed_specs!(PackedStringArray);

    unsafe fn element_ptr(runtime: &Runtime, array: TypePtr, index: i64) -> *mut c_void {
        unsafe { (runtime.interface().packed_string_array_operator_index)(array, index) }
    }

    unsafe fn read(runtime: &Runtime, slot: *const c_void) -> String {
        unsafe { (*slot.cast::<GString>()).to_rust(runtime) }
    }

    unsafe fn write(runtime: &Runtime, slot: *mut c_void, value: &String) {
        let slot = slot.cast::<GString>();
        unsafe {
            (*slot).release(runtime);
            slot.write(GString::new_raw(runtime, value));
        }
    }
}

/// A packed array of `E`.
#[repr(transparent)]
pub struct PackedArray<E: PackedElement> {
    opaque: [u64; 2],
    _element: PhantomData<E>,
}

pub type PackedByteArray = PackedArray<u8>;
pub type PackedInt32Array = PackedArray<i32>;
pub type PackedInt64Array = PackedArray<i64>;
pub type PackedFloat32Array = PackedArray<f32>;
pub type PackedFloat64Array = PackedArray<f64>;
pub type PackedStringArray = PackedArray<GString>;
pub type PackedVector2Array = PackedArray<Vector2>;
pub type PackedVector3Array = PackedArray<Vector3>;
pub type PackedColorArray = PackedArray<Color>;
pub type PackedVector4Array = PackedArray<Vector4>;

impl<E: PackedElement> PackedArray<E> {
    /// Builds an array from host elements in `lifetime`.
    pub fn from_slice<'l>(lifetime: &'l Lifetime, items: &[E::Host]) -> Result<Local<'l, Self>> {
        let array = Self::new_raw(lifetime.runtime(), items)?;
        lifetime.register(array)
    }

    /// Builds an unmanaged array. The caller must release it.
    pub fn new_raw(runtime: &Runtime, items: &[E::Host]) -> Result<Self> {
        let mut array = Self::empty();
        if let Err(err) = array.fill(runtime, items) {
            unsafe { array.release(runtime) };
            return Err(err);
        }
        Ok(array)
    }

    fn fill(&mut self, runtime: &Runtime, items: &[E::Host]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        self.resize(runtime, items.len())?;
        let base = self.type_ptr_mut();
        for (i, item) in items.iter().enumerate() {
            unsafe {
                let slot = E::element_ptr(runtime, base, i as i64);
                E::write(runtime, slot, item);
            }
        }
        Ok(())
    }

    pub fn len(&self, runtime: &Runtime) -> Result<usize> {
        let method = runtime.resolve_builtin(E::SIZE_SPEC)?;
        let frame = BuiltinFrame::<0>::open(method)?;
        let len: i64 = unsafe { frame.invoke_on(self.type_ptr().cast_mut())? };
        Ok(len.max(0) as usize)
    }

    pub fn is_empty(&self, runtime: &Runtime) -> Result<bool> {
        Ok(self.len(runtime)? == 0)
    }

    pub fn resize(&mut self, runtime: &Runtime, len: usize) -> Result<()> {
        let method = runtime.resolve_builtin(E::RESIZE_SPEC)?;
        let mut frame = BuiltinFrame::<1>::open(method)?;
        frame.push(&(len as i64))?;
        let status: std::result::Result<(), EngineError> =
            unsafe { frame.invoke_on(self.type_ptr_mut())? };
        Ok(status?)
    }

    /// Copies every element out to the host.
    pub fn to_vec(&self, runtime: &Runtime) -> Result<Vec<E::Host>> {
        let len = self.len(runtime)?;
        if len == 0 {
            return Ok(Vec::new());
        }
        // The accessor makes the buffer unique before returning a pointer;
        // read through a copy so this handle's buffer is left shared.
        let mut copy = unsafe { self.copy_in(runtime)? };
        let base = copy.type_ptr_mut();
        let items = (0..len)
            .map(|i| unsafe {
                let slot = E::element_ptr(runtime, base, i as i64);
                E::read(runtime, slot)
            })
            .collect();
        unsafe { copy.release(runtime) };
        Ok(items)
    }
}

unsafe impl<E: PackedElement> Transfer for PackedArray<E> {
    unsafe fn release(&mut self, runtime: &Runtime) {
        unsafe { runtime.destroy(E::ARRAY_TYPE, self.type_ptr_mut()) };
        self.opaque = [0; 2];
    }
}

unsafe impl<E: PackedElement> Builtin for PackedArray<E> {
    const TYPE: VariantType = E::ARRAY_TYPE;
}

unsafe impl<E: PackedElement> PtrArg for PackedArray<E> {
    const PARAM: Param = Param::Typed(E::ARRAY_TYPE);
    const SIZE: usize = 16;

    unsafe fn write_arg(&self, dst: *mut u8) {
        unsafe { dst.cast::<[u64; 2]>().write(self.opaque) }
    }
}

impl<E: PackedElement> fmt::Debug for PackedArray<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:#x?})", E::ARRAY_TYPE.name(), self.opaque)
    }
}
