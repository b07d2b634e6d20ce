//! Host value ↔ Variant conversion.
//!
//! Dispatch is static: each host type names the [`VariantType`] it encodes
//! to and decodes from. Plain values go through the engine's from-type and
//! to-type constructor tables. Handle values (strings, arrays, objects) are
//! built as engine tokens first and every temporary token is registered with
//! the [`Lifetime`], so nothing produced during a conversion outlives it.

use super::{Variant, VariantType};
use crate::builtin::{
    Aabb, Array, Basis, Builtin, Callable, Color, Dictionary, GString, NodePath, PackedArray,
    PackedElement, Plane, Projection, Quaternion, Rect2, Rect2i, Rid, Signal, StringName,
    Transform2D, Transform3D, Vector2, Vector2i, Vector3, Vector3i, Vector4, Vector4i,
};
use crate::error::{Error, Result};
use crate::lifetime::{Lifetime, Local};
use crate::object::{Class, ManualMemory, Object, ObjectRef, RefCountedMemory};
use crate::ownership::Owned;
use crate::refcount::{Ref, RefCounted};
use crate::runtime::Runtime;
use crate::sys::ObjectPtr;
use gdbridge_log::warn;

/// A host value that can be written into a Variant.
pub trait Encode {
    /// Builds a Variant holding `self`, registered with `lifetime`.
    fn encode<'l>(&self, lifetime: &'l Lifetime) -> Result<Local<'l, Variant>>;
}

/// A host value that can be read back out of a Variant.
pub trait Decode<'l>: Sized {
    /// The Variant kind this type accepts.
    const EXPECTED: VariantType;

    /// Reads `variant`, registering any produced handle with `lifetime`.
    ///
    /// # Errors
    ///
    /// [`Error::TypeMismatch`] if the Variant holds another kind.
    fn decode(variant: &Variant, lifetime: &'l Lifetime) -> Result<Self>;
}

/// Wraps the raw value at `value` (a `T` of kind `ty`) into a new Variant.
///
/// # Safety
///
/// `value` must point to a live value of kind `ty`.
unsafe fn variant_from<'l>(
    lifetime: &'l Lifetime,
    ty: VariantType,
    value: *const u8,
) -> Result<Local<'l, Variant>> {
    let ctor = lifetime.runtime().from_type_constructor(ty)?;
    let mut out = Variant::empty();
    unsafe { ctor(out.type_ptr_mut(), value.cast_mut().cast()) };
    lifetime.register(out)
}

/// Checks the held kind against `expected`.
pub(crate) fn expect_type(
    runtime: &Runtime,
    variant: &Variant,
    expected: VariantType,
) -> Result<()> {
    let got = variant.variant_type(runtime)?;
    if got == expected {
        return Ok(());
    }
    let err = Error::TypeMismatch { expected, got };
    if runtime.config().panic_on_type_mismatch {
        panic!("variant decode failed: {err}");
    }
    warn!("{}", err);
    Err(err)
}

/// Reads the payload of `variant` into a `T`, after the kind check.
///
/// # Safety
///
/// `T` must be the host layout of `expected`, and the all-zero pattern must
/// be a valid `T`.
unsafe fn value_from<T>(
    lifetime: &Lifetime,
    variant: &Variant,
    expected: VariantType,
) -> Result<T> {
    let runtime = lifetime.runtime();
    expect_type(runtime, variant, expected)?;
    let ctor = runtime.to_type_constructor(expected)?;
    let mut out = std::mem::MaybeUninit::<T>::zeroed();
    unsafe {
        ctor(out.as_mut_ptr().cast(), variant.type_ptr().cast_mut());
        Ok(out.assume_init())
    }
}

macro_rules! pod_codec {
    ($($ty:ty => $variant:ident;)*) => {$(
        impl Encode for $ty {
            fn encode<'l>(&self, lifetime: &'l Lifetime) -> Result<Local<'l, Variant>> {
                unsafe {
                    variant_from(lifetime, VariantType::$variant, (self as *const $ty).cast())
                }
            }
        }

        impl<'l> Decode<'l> for $ty {
            const EXPECTED: VariantType = VariantType::$variant;

            fn decode(variant: &Variant, lifetime: &'l Lifetime) -> Result<Self> {
                unsafe { value_from(lifetime, variant, VariantType::$variant) }
            }
        }
    )*};
}

pod_codec! {
    i64 => Int;
    f64 => Float;
    Vector2 => Vector2;
    Vector2i => Vector2i;
    Rect2 => Rect2;
    Rect2i => Rect2i;
    Vector3 => Vector3;
    Vector3i => Vector3i;
    Transform2D => Transform2D;
    Vector4 => Vector4;
    Vector4i => Vector4i;
    Plane => Plane;
    Quaternion => Quaternion;
    Aabb => Aabb;
    Basis => Basis;
    Transform3D => Transform3D;
    Projection => Projection;
    Color => Color;
    Rid => Rid;
}

impl Encode for bool {
    fn encode<'l>(&self, lifetime: &'l Lifetime) -> Result<Local<'l, Variant>> {
        let raw = u8::from(*self);
        unsafe { variant_from(lifetime, VariantType::Bool, &raw) }
    }
}

impl<'l> Decode<'l> for bool {
    const EXPECTED: VariantType = VariantType::Bool;

    fn decode(variant: &Variant, lifetime: &'l Lifetime) -> Result<Self> {
        let raw: u8 = unsafe { value_from(lifetime, variant, VariantType::Bool)? };
        Ok(raw != 0)
    }
}

/// Integers travel as the engine's int64. Decoding checks the range of the
/// narrower host type; encoding checks it for unsigned types wider than
/// `i64::MAX`.
macro_rules! int_codec {
    ($($ty:ty;)*) => {$(
        impl Encode for $ty {
            fn encode<'l>(&self, lifetime: &'l Lifetime) -> Result<Local<'l, Variant>> {
                let wide = i64::try_from(*self).map_err(|_| Error::ValueOutOfRange {
                    ty: "int",
                    value: self.to_string(),
                })?;
                wide.encode(lifetime)
            }
        }

        impl<'l> Decode<'l> for $ty {
            const EXPECTED: VariantType = VariantType::Int;

            fn decode(variant: &Variant, lifetime: &'l Lifetime) -> Result<Self> {
                let wide = i64::decode(variant, lifetime)?;
                <$ty>::try_from(wide).map_err(|_| Error::ValueOutOfRange {
                    ty: stringify!($ty),
                    value: wide.to_string(),
                })
            }
        }
    )*};
}

int_codec! {
    i8;
    i16;
    i32;
    u8;
    u16;
    u32;
    u64;
    isize;
    usize;
}

impl Encode for f32 {
    fn encode<'l>(&self, lifetime: &'l Lifetime) -> Result<Local<'l, Variant>> {
        f64::from(*self).encode(lifetime)
    }
}

impl<'l> Decode<'l> for f32 {
    const EXPECTED: VariantType = VariantType::Float;

    fn decode(variant: &Variant, lifetime: &'l Lifetime) -> Result<Self> {
        crate::frame::narrow_f64(f64::decode(variant, lifetime)?)
    }
}

/// Encodes any builtin handle through its from-type constructor.
fn encode_handle<'l, T: Builtin>(value: &T, lifetime: &'l Lifetime) -> Result<Local<'l, Variant>> {
    unsafe { variant_from(lifetime, T::TYPE, value.type_ptr().cast()) }
}

/// Decodes any builtin handle into a new token registered with `lifetime`.
fn decode_handle<'l, T: Builtin>(variant: &Variant, lifetime: &'l Lifetime) -> Result<Local<'l, T>> {
    let token: T = unsafe { value_from(lifetime, variant, T::TYPE)? };
    lifetime.register(token)
}

macro_rules! handle_codec {
    ($($ty:ty;)*) => {$(
        impl Encode for $ty {
            fn encode<'l>(&self, lifetime: &'l Lifetime) -> Result<Local<'l, Variant>> {
                encode_handle(self, lifetime)
            }
        }

        impl<'l> Decode<'l> for Local<'l, $ty> {
            const EXPECTED: VariantType = <$ty as Builtin>::TYPE;

            fn decode(variant: &Variant, lifetime: &'l Lifetime) -> Result<Self> {
                decode_handle(variant, lifetime)
            }
        }
    )*};
}

handle_codec! {
    GString;
    StringName;
    NodePath;
    Array;
    Dictionary;
    Callable;
    Signal;
}

impl<E: PackedElement> Encode for PackedArray<E> {
    fn encode<'l>(&self, lifetime: &'l Lifetime) -> Result<Local<'l, Variant>> {
        encode_handle(self, lifetime)
    }
}

impl<'l, E: PackedElement> Decode<'l> for Local<'l, PackedArray<E>> {
    const EXPECTED: VariantType = E::ARRAY_TYPE;

    fn decode(variant: &Variant, lifetime: &'l Lifetime) -> Result<Self> {
        decode_handle(variant, lifetime)
    }
}

macro_rules! packed_codec {
    ($($elem:ty => $marker:ty;)*) => {$(
        impl Encode for [$elem] {
            fn encode<'l>(&self, lifetime: &'l Lifetime) -> Result<Local<'l, Variant>> {
                let array = PackedArray::<$marker>::from_slice(lifetime, self)?;
                array.encode(lifetime)
            }
        }

        impl<'l> Decode<'l> for Vec<$elem> {
            const EXPECTED: VariantType = <$marker as PackedElement>::ARRAY_TYPE;

            fn decode(variant: &Variant, lifetime: &'l Lifetime) -> Result<Self> {
                let array = decode_handle::<PackedArray<$marker>>(variant, lifetime)?;
                array.to_vec(lifetime.runtime())
            }
        }
    )*};
}

packed_codec! {
    u8 => u8;
    i32 => i32;
    i64 => i64;
    f32 => f32;
    f64 => f64;
    String => GString;
    Vector2 => Vector2;
    Vector3 => Vector3;
    Color => Color;
    Vector4 => Vector4;
}

impl<T> Encode for Vec<T>
where
    [T]: Encode,
{
    fn encode<'l>(&self, lifetime: &'l Lifetime) -> Result<Local<'l, Variant>> {
        self.as_slice().encode(lifetime)
    }
}

impl Encode for str {
    fn encode<'l>(&self, lifetime: &'l Lifetime) -> Result<Local<'l, Variant>> {
        let string = GString::new(lifetime, self)?;
        encode_handle(&*string, lifetime)
    }
}

impl Encode for String {
    fn encode<'l>(&self, lifetime: &'l Lifetime) -> Result<Local<'l, Variant>> {
        self.as_str().encode(lifetime)
    }
}

impl<'l> Decode<'l> for String {
    const EXPECTED: VariantType = VariantType::String;

    fn decode(variant: &Variant, lifetime: &'l Lifetime) -> Result<Self> {
        let string = decode_handle::<GString>(variant, lifetime)?;
        Ok(string.to_rust(lifetime.runtime()))
    }
}

impl<T: Encode + ?Sized> Encode for &T {
    fn encode<'l>(&self, lifetime: &'l Lifetime) -> Result<Local<'l, Variant>> {
        (**self).encode(lifetime)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode<'l>(&self, lifetime: &'l Lifetime) -> Result<Local<'l, Variant>> {
        match self {
            Some(value) => value.encode(lifetime),
            None => Variant::nil(lifetime),
        }
    }
}

/// Nil, and an Object Variant holding null, decode as `None`.
impl<'l, T: Decode<'l>> Decode<'l> for Option<T> {
    const EXPECTED: VariantType = T::EXPECTED;

    fn decode(variant: &Variant, lifetime: &'l Lifetime) -> Result<Self> {
        if variant.is_nil(lifetime.runtime()) {
            return Ok(None);
        }
        match T::decode(variant, lifetime) {
            Ok(value) => Ok(Some(value)),
            Err(Error::NullObject) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl Encode for Variant {
    fn encode<'l>(&self, lifetime: &'l Lifetime) -> Result<Local<'l, Variant>> {
        let copy = unsafe { self.copy_in(lifetime.runtime())? };
        lifetime.register(copy)
    }
}

/// Any Variant decodes as a copy of itself.
impl<'l> Decode<'l> for Local<'l, Variant> {
    const EXPECTED: VariantType = VariantType::Nil;

    fn decode(variant: &Variant, lifetime: &'l Lifetime) -> Result<Self> {
        variant.encode(lifetime)
    }
}

impl<T: Builtin> Encode for Owned<T>
where
    T: Encode,
{
    fn encode<'l>(&self, lifetime: &'l Lifetime) -> Result<Local<'l, Variant>> {
        (**self).encode(lifetime)
    }
}

impl<T: Builtin> Encode for Local<'_, T>
where
    T: Encode,
{
    fn encode<'l>(&self, lifetime: &'l Lifetime) -> Result<Local<'l, Variant>> {
        (**self).encode(lifetime)
    }
}

impl Encode for Object {
    fn encode<'l>(&self, lifetime: &'l Lifetime) -> Result<Local<'l, Variant>> {
        let ptr = self.ptr();
        unsafe {
            variant_from(
                lifetime,
                VariantType::Object,
                (&ptr as *const ObjectPtr).cast(),
            )
        }
    }
}

impl<T: Class<Memory = RefCountedMemory>> Encode for Ref<T> {
    fn encode<'l>(&self, lifetime: &'l Lifetime) -> Result<Local<'l, Variant>> {
        self.as_object().encode(lifetime)
    }
}

impl<T: Class> Encode for ObjectRef<T> {
    fn encode<'l>(&self, lifetime: &'l Lifetime) -> Result<Local<'l, Variant>> {
        self.get_with(lifetime.runtime())?
            .as_object()
            .encode(lifetime)
    }
}

fn object_ptr_from(variant: &Variant, lifetime: &Lifetime) -> Result<ObjectPtr> {
    let ptr: ObjectPtr = unsafe { value_from(lifetime, variant, VariantType::Object)? };
    if ptr.is_null() {
        return Err(Error::NullObject);
    }
    Ok(ptr)
}

/// Refcounted objects decode by taking a new reference.
impl<'l, T: Class<Memory = RefCountedMemory>> Decode<'l> for Ref<T> {
    const EXPECTED: VariantType = VariantType::Object;

    fn decode(variant: &Variant, lifetime: &'l Lifetime) -> Result<Self> {
        let ptr = object_ptr_from(variant, lifetime)?;
        unsafe { Ref::acquire(lifetime.runtime(), ptr) }
    }
}

/// Manually managed objects decode as a borrowed, id-checked reference.
///
/// `ObjectRef<Object>` accepts any class statically, so refcounted
/// instances are turned away at runtime; they must go through [`Ref`].
impl<'l, T: Class<Memory = ManualMemory>> Decode<'l> for ObjectRef<T> {
    const EXPECTED: VariantType = VariantType::Object;

    fn decode(variant: &Variant, lifetime: &'l Lifetime) -> Result<Self> {
        let runtime = lifetime.runtime();
        let ptr = object_ptr_from(variant, lifetime)?;
        let refcounted = runtime.class_tag(RefCounted::NAME)?;
        if !unsafe { (runtime.interface().object_cast_to)(ptr, refcounted) }.is_null() {
            return Err(Error::RefCountedObject { class: T::NAME });
        }
        unsafe { ObjectRef::from_ptr(runtime, ptr) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn test_hello_round_trip_releases_every_handle() {
        let runtime = test_support::runtime();
        let mut lifetime = Lifetime::with_runtime(runtime.clone());

        let variant = "hello".encode(&lifetime).unwrap();
        let payload = variant.raw_words()[1];
        assert_eq!(String::decode(&variant, &lifetime).unwrap(), "hello");
        // The source string, the Variant and the decoded copy.
        assert_eq!(lifetime.len(), 3);
        assert!(gdbridge_headless::string_is_live(payload));

        assert_eq!(lifetime.end(), 3);
        assert!(!gdbridge_headless::string_is_live(payload));
        assert_eq!(lifetime.end(), 0);
    }

    #[test]
    fn test_type_mismatch_is_reported() {
        let runtime = test_support::runtime();
        let lifetime = Lifetime::with_runtime(runtime);
        let variant = 7i64.encode(&lifetime).unwrap();
        assert_eq!(
            String::decode(&variant, &lifetime),
            Err(Error::TypeMismatch {
                expected: VariantType::String,
                got: VariantType::Int,
            })
        );
        assert_eq!(
            bool::decode(&variant, &lifetime),
            Err(Error::TypeMismatch {
                expected: VariantType::Bool,
                got: VariantType::Int,
            })
        );
    }

    #[test]
    fn test_scalars_and_math_round_trip() {
        let runtime = test_support::runtime();
        let lifetime = Lifetime::with_runtime(runtime);

        let v = true.encode(&lifetime).unwrap();
        assert_eq!(bool::decode(&v, &lifetime), Ok(true));
        let v = (-3i32).encode(&lifetime).unwrap();
        assert_eq!(i32::decode(&v, &lifetime), Ok(-3));
        let v = 0.25f32.encode(&lifetime).unwrap();
        assert_eq!(f32::decode(&v, &lifetime), Ok(0.25));

        let basis = Basis::default();
        let v = basis.encode(&lifetime).unwrap();
        assert_eq!(Basis::decode(&v, &lifetime), Ok(basis));

        let rect = Rect2i {
            position: Vector2i { x: -1, y: 2 },
            size: Vector2i { x: 30, y: 40 },
        };
        let v = rect.encode(&lifetime).unwrap();
        assert_eq!(Rect2i::decode(&v, &lifetime), Ok(rect));
    }

    #[test]
    fn test_narrow_ints_reject_out_of_range_values() {
        let runtime = test_support::runtime();
        let lifetime = Lifetime::with_runtime(runtime);

        let big = (1i64 << 40).encode(&lifetime).unwrap();
        assert_eq!(
            i32::decode(&big, &lifetime),
            Err(Error::ValueOutOfRange {
                ty: "i32",
                value: "1099511627776".into(),
            })
        );
        assert_eq!(i64::decode(&big, &lifetime), Ok(1 << 40));

        let v = 300i64.encode(&lifetime).unwrap();
        assert!(matches!(
            u8::decode(&v, &lifetime),
            Err(Error::ValueOutOfRange { ty: "u8", .. })
        ));
        let v = (-1i64).encode(&lifetime).unwrap();
        assert!(matches!(
            u32::decode(&v, &lifetime),
            Err(Error::ValueOutOfRange { ty: "u32", .. })
        ));

        assert_eq!(
            u64::MAX.encode(&lifetime).err(),
            Some(Error::ValueOutOfRange {
                ty: "int",
                value: u64::MAX.to_string(),
            })
        );

        let v = 5u8.encode(&lifetime).unwrap();
        assert_eq!(u8::decode(&v, &lifetime), Ok(5));
    }

    #[test]
    fn test_option_nil_is_none() {
        let runtime = test_support::runtime();
        let lifetime = Lifetime::with_runtime(runtime);

        let nil = None::<i64>.encode(&lifetime).unwrap();
        assert_eq!(Option::<i64>::decode(&nil, &lifetime), Ok(None));
        assert!(
            Option::<Ref<RefCounted>>::decode(&nil, &lifetime)
                .unwrap()
                .is_none()
        );

        let some = Some(5i64).encode(&lifetime).unwrap();
        assert_eq!(Option::<i64>::decode(&some, &lifetime), Ok(Some(5)));
    }

    #[test]
    fn test_ref_decode_acquires() {
        let runtime = test_support::runtime();
        let lifetime = Lifetime::with_runtime(runtime.clone());
        let object = Ref::<RefCounted>::new().unwrap();

        let variant = object.encode(&lifetime).unwrap();
        // The Variant holds one reference of its own.
        assert_eq!(object.reference_count(), Ok(2));

        let decoded = Ref::<RefCounted>::decode(&variant, &lifetime).unwrap();
        assert_eq!(object.reference_count(), Ok(3));
        assert_eq!(decoded.object_ptr(), object.object_ptr());
        drop(decoded);
        assert_eq!(object.reference_count(), Ok(2));
    }

    #[test]
    fn test_object_ref_decode() {
        let runtime = test_support::runtime();
        let lifetime = Lifetime::with_runtime(runtime.clone());
        let object = Owned::<Object>::new().unwrap();
        let variant = (*object).encode(&lifetime).unwrap();

        let borrowed = ObjectRef::<Object>::decode(&variant, &lifetime).unwrap();
        assert_eq!(borrowed.instance_id(), object.instance_id(&runtime));
        assert!(borrowed.is_alive());
    }

    #[test]
    fn test_refcounted_object_does_not_decode_as_object_ref() {
        let runtime = test_support::runtime();
        let lifetime = Lifetime::with_runtime(runtime);
        let object = Ref::<RefCounted>::new().unwrap();
        let variant = object.encode(&lifetime).unwrap();

        assert_eq!(
            ObjectRef::<Object>::decode(&variant, &lifetime).err(),
            Some(Error::RefCountedObject { class: "Object" })
        );
        // Only the Variant's own reference was taken.
        assert_eq!(object.reference_count(), Ok(2));
    }

    #[test]
    fn test_packed_vectors_round_trip() {
        let runtime = test_support::runtime();
        let lifetime = Lifetime::with_runtime(runtime);

        let bytes = vec![0u8, 1, 254, 255];
        let v = bytes.encode(&lifetime).unwrap();
        assert_eq!(Vec::<u8>::decode(&v, &lifetime), Ok(bytes));

        let names = vec!["a".to_owned(), "bc".to_owned()];
        let v = names.encode(&lifetime).unwrap();
        assert_eq!(Vec::<String>::decode(&v, &lifetime), Ok(names));

        assert!(matches!(
            Vec::<i32>::decode(&v, &lifetime),
            Err(Error::TypeMismatch {
                expected: VariantType::PackedInt32Array,
                got: VariantType::PackedStringArray,
            })
        ));
    }
}
