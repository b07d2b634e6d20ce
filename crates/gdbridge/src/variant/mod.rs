//! The engine's tagged union and its host codec.
//!
//! A [`Variant`] is an opaque 24-byte token: a discriminant word followed by
//! a 16-byte payload that is either the value itself or a pointer to
//! engine-owned storage. The host never reads the payload directly; every
//! conversion goes through the engine's per-type constructor tables, which
//! [`Encode`] and [`Decode`] dispatch to by [`VariantType`].

mod codec;
mod types;
mod value;

pub use codec::{Decode, Encode};
pub use types::VariantType;
pub use value::Value;

use crate::builtin::Builtin;
use crate::error::Result;
use crate::frame::{Param, PtrArg};
use crate::lifetime::{Lifetime, Local};
use crate::ownership::Transfer;
use crate::runtime::Runtime;
use std::fmt;

/// An engine Variant.
///
/// As a [`Builtin`], `Variant` reports `Nil` as its `TYPE`; its ptrcall
/// declaration is [`Param::Variant`].
#[repr(C, align(8))]
pub struct Variant {
    opaque: [u64; 3],
}

impl Variant {
    /// A Nil Variant in `lifetime`.
    pub fn nil(lifetime: &Lifetime) -> Result<Local<'_, Variant>> {
        lifetime.register(Variant::empty())
    }

    /// The kind of value held.
    pub fn variant_type(&self, runtime: &Runtime) -> Result<VariantType> {
        let raw = unsafe { (runtime.interface().variant_get_type)(self.type_ptr()) };
        VariantType::from_raw(raw)
    }

    pub fn is_nil(&self, runtime: &Runtime) -> bool {
        matches!(self.variant_type(runtime), Ok(VariantType::Nil))
    }

    /// The token words, for diagnostics.
    pub fn raw_words(&self) -> [u64; 3] {
        self.opaque
    }
}

unsafe impl Transfer for Variant {
    unsafe fn release(&mut self, runtime: &Runtime) {
        unsafe { (runtime.interface().variant_destroy)(self.type_ptr_mut()) };
        self.opaque = [0; 3];
    }
}

unsafe impl Builtin for Variant {
    const TYPE: VariantType = VariantType::Nil;
    const PARAM: Param = Param::Variant;

    unsafe fn copy_in(&self, runtime: &Runtime) -> Result<Self> {
        let mut out = Variant::empty();
        unsafe { (runtime.interface().variant_new_copy)(out.type_ptr_mut(), self.type_ptr()) };
        Ok(out)
    }
}

unsafe impl PtrArg for Variant {
    const PARAM: Param = Param::Variant;
    const SIZE: usize = 24;

    unsafe fn write_arg(&self, dst: *mut u8) {
        unsafe { dst.cast::<[u64; 3]>().write(self.opaque) }
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Variant({:#x?})", self.opaque)
    }
}
