//! Host representations of the engine's builtin value kinds.
//!
//! Plain-data kinds (vectors, transforms, colors, `Rid`) are ordinary
//! `#[repr(C)]` structs copied by value. Every other kind is an opaque
//! token: a fixed number of words that only the engine can interpret. Tokens
//! are neither `Clone` nor `Copy`; a token is owned by exactly one
//! [`Local`](crate::lifetime::Local) or [`Owned`] wrapper, and copying one
//! goes through the engine's copy constructor.

mod callable;
mod collections;
mod math;
mod packed;
mod string;

pub use callable::{Callable, Signal};
pub use collections::{Array, Dictionary};
pub use math::{
    Aabb, Basis, Color, Plane, Projection, Quaternion, Rect2, Rect2i, Rid, Transform2D,
    Transform3D, Vector2, Vector2i, Vector3, Vector3i, Vector4, Vector4i,
};
pub use packed::{
    PackedArray, PackedByteArray, PackedColorArray, PackedElement, PackedFloat32Array,
    PackedFloat64Array, PackedInt32Array, PackedInt64Array, PackedStringArray,
    PackedVector2Array, PackedVector3Array, PackedVector4Array,
};
pub use string::{GString, NodePath, ScopedName, StringName};

use crate::error::Result;
use crate::frame::{Param, PtrReturn, pod_ptr_type};
use crate::ownership::{Owned, Transfer};
use crate::runtime::Runtime;
use crate::sys::{ConstTypePtr, TypePtr};
use crate::variant::VariantType;

/// An opaque engine-managed value.
///
/// # Safety
///
/// The implementing type must be `#[repr(transparent)]` (or `#[repr(C)]`)
/// over exactly the engine's token layout for `TYPE`, and the all-zero bit
/// pattern must be the engine's empty value of that kind.
pub unsafe trait Builtin: Transfer + 'static {
    const TYPE: VariantType;

    /// How the value is declared in a method signature.
    const PARAM: Param = Param::Typed(Self::TYPE);

    /// The empty value, ready to be constructed into.
    fn empty() -> Self {
        // SAFETY: guaranteed by the trait contract.
        unsafe { std::mem::zeroed() }
    }

    fn type_ptr(&self) -> ConstTypePtr {
        (self as *const Self).cast()
    }

    fn type_ptr_mut(&mut self) -> TypePtr {
        (self as *mut Self).cast()
    }

    /// Makes an engine-side copy of the value.
    ///
    /// # Safety
    ///
    /// The returned token must be released exactly once.
    unsafe fn copy_in(&self, runtime: &Runtime) -> Result<Self> {
        let copy_ctor = runtime.copy_constructor(Self::TYPE)?;
        let mut out = Self::empty();
        let args = [self.type_ptr()];
        unsafe { copy_ctor(out.type_ptr_mut(), args.as_ptr()) };
        Ok(out)
    }
}

/// Runs pointer constructor `index` of `T` on a single argument.
///
/// # Safety
///
/// `arg` must point to a live value of the kind constructor `index` takes.
pub(crate) unsafe fn construct_from<T: Builtin>(
    runtime: &Runtime,
    index: i32,
    arg: ConstTypePtr,
) -> Result<T> {
    let ctor = runtime.ptr_constructor(T::TYPE, index)?;
    let mut out = T::empty();
    let args = [arg];
    unsafe { ctor(out.type_ptr_mut(), args.as_ptr()) };
    Ok(out)
}

/// Declares an opaque builtin token type.
///
/// Generates the struct, its release path through the engine destructor for
/// the kind, and its ptrcall encoding (a shallow copy of the token words).
macro_rules! builtin_handle {
    ($(#[$meta:meta])* $name:ident, $variant:ident, $words:literal) => {
        $(#[$meta])*
        #[repr(transparent)]
        pub struct $name {
            opaque: [u64; $words],
        }

        unsafe impl $crate::ownership::Transfer for $name {
            unsafe fn release(&mut self, runtime: &$crate::runtime::Runtime) {
                unsafe {
                    runtime.destroy(
                        <Self as $crate::builtin::Builtin>::TYPE,
                        $crate::builtin::Builtin::type_ptr_mut(self),
                    )
                };
                self.opaque = [0; $words];
            }
        }

        unsafe impl $crate::builtin::Builtin for $name {
            const TYPE: $crate::variant::VariantType = $crate::variant::VariantType::$variant;
        }

        unsafe impl $crate::frame::PtrArg for $name {
            const PARAM: $crate::frame::Param =
                $crate::frame::Param::Typed($crate::variant::VariantType::$variant);
            const SIZE: usize = $words * 8;

            unsafe fn write_arg(&self, dst: *mut u8) {
                unsafe { dst.cast::<[u64; $words]>().write(self.opaque) }
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({:#x?})", stringify!($name), self.opaque)
            }
        }
    };
}

pub(crate) use builtin_handle;

/// Handle returns are read as transferred values; wrappers then register
/// them with a Lifetime or keep them owned.
unsafe impl<T: Builtin> PtrReturn for Owned<T> {
    const PARAM: Option<Param> = Some(T::PARAM);

    unsafe fn read_return(src: *const u8) -> Self {
        unsafe { Owned::from_raw(src.cast::<T>().read()) }
    }
}

pod_ptr_type! {
    Vector2 => Vector2,
    Vector2i => Vector2i,
    Rect2 => Rect2,
    Rect2i => Rect2i,
    Vector3 => Vector3,
    Vector3i => Vector3i,
    Transform2D => Transform2D,
    Vector4 => Vector4,
    Vector4i => Vector4i,
    Plane => Plane,
    Quaternion => Quaternion,
    Aabb => Aabb,
    Basis => Basis,
    Transform3D => Transform3D,
    Projection => Projection,
    Color => Color,
    Rid => Rid,
}
