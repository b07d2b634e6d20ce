//! Fixed-arity call frames for ptrcall invocation.
//!
//! A [`CallFrame`] stages the arguments of exactly one native call in the
//! layout the engine's ptrcall convention expects: one pointer per argument,
//! each pointing to the argument's native representation, plus a pointer to
//! storage for the return value.
//!
//! # Architecture
//!
//! - Arity is a const generic, so every wrapper goes through the same
//!   `open` / `push` / `invoke` path regardless of argument count.
//! - Argument bytes live in a word array inside the frame. Each argument
//!   starts on an 8-byte boundary and occupies `ceil(size / 8)` words, in
//!   declaration order.
//! - The pointer table is built at invoke time, so a frame may be moved
//!   freely while it is being filled.
//! - Zero-argument calls receive a shared one-entry sentinel table and void
//!   calls receive the frame's zeroed return slot. The engine never sees a
//!   null table or a null return pointer.
//! - The return slot is zero-initialized. A zeroed token is the empty value
//!   of every handle type, so the engine may assign into it.
//! - Vararg methods have no ptrcall form. They go through a [`VariantFrame`],
//!   which passes every argument as a `Variant` and reports engine-side
//!   argument errors as [`Error::CallFailed`].
//!
//! # Widths
//!
//! The static type of each argument fixes its ABI width:
//!
//! | host type | slot bytes |
//! |---|---|
//! | `bool` | 1 |
//! | every integer type | 8 (widened to `i64`) |
//! | `f32`, `f64` | 8 (widened to `f64`) |
//! | math types, `Rid` | their `#[repr(C)]` size |
//! | builtin handles | their token size, copied shallowly |
//! | objects | one pointer |
//! | `Variant` | 24 |
//!
//! # Example
//!
//! ```rust,ignore
//! static SET_NAME: MethodSpec = MethodSpec::new(
//!     "Node", "set_name", 83702148,
//!     Signature::new(&[Param::Typed(VariantType::String)], None),
//! );
//!
//! let bind = runtime.resolve(&SET_NAME)?;
//! let mut frame = CallFrame::<_, 1>::open(bind)?;
//! frame.push(&*name)?;
//! unsafe { frame.invoke::<()>(node.object_ptr()) }?;
//! ```

use crate::builtin::Builtin;
use crate::error::{Error, Result, check_call};
use crate::lifetime::{Lifetime, Local};
use crate::resolver::{BuiltinMethod, MethodBind, UtilityFunction};
use crate::sys::{self, ConstTypePtr, ConstVariantPtr, ObjectPtr, TypePtr};
use crate::variant::{Variant, VariantType};
use gdbridge_log::trace;
use std::fmt;
use std::marker::PhantomData;

/// Largest supported arity.
pub const MAX_ARGS: usize = 16;

/// Largest single argument or return value (a `Projection`).
pub const SLOT_BYTES: usize = 64;

const SLOT_WORDS: usize = SLOT_BYTES / 8;

/// Declared type of a parameter or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param {
    /// A full `Variant`; the only parameter kind carrying a runtime tag.
    Variant,
    /// A value of one fixed builtin kind, or `Object` for any class.
    Typed(VariantType),
}

/// Arity and layout of a callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub args: &'static [Param],
    /// `None` for void.
    pub ret: Option<Param>,
    /// Accepts any number of Variant arguments after `args`.
    pub vararg: bool,
}

impl Signature {
    pub const fn new(args: &'static [Param], ret: Option<Param>) -> Self {
        Signature {
            args,
            ret,
            vararg: false,
        }
    }

    /// A vararg signature; `args` are the fixed leading parameters.
    pub const fn vararg(args: &'static [Param], ret: Option<Param>) -> Self {
        Signature {
            args,
            ret,
            vararg: true,
        }
    }

    pub const fn arity(&self) -> usize {
        self.args.len()
    }
}

/// Something a frame can be opened against.
pub trait Callee: Copy {
    fn signature(&self) -> &'static Signature;

    /// (owner, method) names for diagnostics.
    fn describe(&self) -> (&'static str, &'static str);
}

/// A value that can be packed into a ptrcall argument slot.
///
/// # Safety
///
/// `write_arg` must write exactly the native representation of the declared
/// `PARAM`, occupying `SIZE` bytes.
pub unsafe trait PtrArg {
    const PARAM: Param;
    const SIZE: usize;

    /// # Safety
    ///
    /// `dst` is 8-byte aligned, zeroed, and valid for `SIZE` bytes.
    unsafe fn write_arg(&self, dst: *mut u8);

    /// Rejects values the native representation cannot hold.
    ///
    /// Called before `write_arg`; the default accepts everything.
    fn check_arg(&self) -> Result<()> {
        Ok(())
    }
}

/// A value that can be read from a ptrcall return slot.
///
/// # Safety
///
/// `read_return` must interpret the slot exactly as the engine writes the
/// declared `PARAM`.
pub unsafe trait PtrReturn: Sized {
    /// `None` for void.
    const PARAM: Option<Param>;

    /// # Safety
    ///
    /// `src` is 8-byte aligned and holds what the engine wrote for `PARAM`,
    /// or zeroes if it wrote nothing.
    unsafe fn read_return(src: *const u8) -> Self;

    /// [`read_return`](PtrReturn::read_return), failing instead of
    /// narrowing a value the host type cannot hold.
    ///
    /// # Safety
    ///
    /// As `read_return`.
    unsafe fn try_read_return(src: *const u8) -> Result<Self> {
        Ok(unsafe { Self::read_return(src) })
    }
}

/// Placement of one staged argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    /// Byte offset from the start of the argument area.
    pub offset: usize,
    /// Bytes written by the argument.
    pub size: usize,
    pub align: usize,
    pub param: Param,
}

impl SlotLayout {
    const EMPTY: SlotLayout = SlotLayout {
        offset: 0,
        size: 0,
        align: 8,
        param: Param::Typed(VariantType::Nil),
    };
}

struct ArgTable([ConstTypePtr; 1]);

// SAFETY: the table holds a single null pointer and is never written.
unsafe impl Sync for ArgTable {}

static EMPTY_ARGS: ArgTable = ArgTable([std::ptr::null()]);

/// Argument and return staging for one call of arity `N`.
///
/// Frames are consumed by their invoke method and never reused.
pub struct CallFrame<C: Callee, const N: usize> {
    callee: C,
    words: [[u64; SLOT_WORDS]; N],
    layout: [SlotLayout; N],
    cursor: usize,
    pushed: usize,
    ret: [u64; SLOT_WORDS],
}

/// Frame for an engine method.
pub type MethodFrame<const N: usize> = CallFrame<MethodBind, N>;

/// Frame for a builtin value-type method.
pub type BuiltinFrame<const N: usize> = CallFrame<BuiltinMethod, N>;

/// Frame for a global utility function.
pub type UtilityFrame<const N: usize> = CallFrame<UtilityFunction, N>;

impl<C: Callee, const N: usize> CallFrame<C, N> {
    /// Opens a frame for `callee`.
    ///
    /// # Errors
    ///
    /// [`Error::ArgumentCountMismatch`] if the callee's arity is not `N`,
    /// and [`Error::VarargMethod`] for a vararg callee.
    pub fn open(callee: C) -> Result<Self> {
        const { assert!(N <= MAX_ARGS, "arity exceeds MAX_ARGS") };

        if callee.signature().vararg {
            let (class, method) = callee.describe();
            return Err(Error::VarargMethod { class, method });
        }
        let arity = callee.signature().arity();
        if arity != N {
            return Err(Error::ArgumentCountMismatch {
                expected: arity,
                got: N,
            });
        }

        Ok(CallFrame {
            callee,
            words: [[0; SLOT_WORDS]; N],
            layout: [SlotLayout::EMPTY; N],
            cursor: 0,
            pushed: 0,
            ret: [0; SLOT_WORDS],
        })
    }

    /// Packs the next argument.
    ///
    /// # Errors
    ///
    /// [`Error::ArgumentCountMismatch`] when all `N` slots are taken, and
    /// [`Error::ValueOutOfRange`] for an integer the engine's int64 cannot
    /// hold.
    ///
    /// # Panics
    ///
    /// In debug builds, if `A` does not match the declared parameter type.
    pub fn push<A: PtrArg>(&mut self, arg: &A) -> Result<&mut Self> {
        const { assert!(A::SIZE <= SLOT_BYTES, "argument wider than a slot") };

        let index = self.pushed;
        if index == N {
            return Err(Error::ArgumentCountMismatch {
                expected: N,
                got: N + 1,
            });
        }

        if cfg!(debug_assertions) {
            let declared = self.callee.signature().args[index];
            let (owner, method) = self.callee.describe();
            assert_eq!(
                declared,
                A::PARAM,
                "argument {index} of {owner}::{method} pushed with the wrong type"
            );
        }

        arg.check_arg()?;

        let words = A::SIZE.div_ceil(8).max(1);
        let start = self.cursor;
        let area = self.words.as_flattened_mut();
        let dst = area[start..start + words].as_mut_ptr().cast::<u8>();
        unsafe { arg.write_arg(dst) };

        self.layout[index] = SlotLayout {
            offset: start * 8,
            size: A::SIZE,
            align: 8,
            param: A::PARAM,
        };
        self.cursor += words;
        self.pushed += 1;
        Ok(self)
    }

    /// Placement of every argument pushed so far.
    pub fn layout(&self) -> &[SlotLayout] {
        &self.layout[..self.pushed]
    }

    /// The staged argument bytes, `8 * words_used` long.
    pub fn arg_bytes(&self) -> &[u8] {
        let used = &self.words.as_flattened()[..self.cursor];
        // SAFETY: any initialized u64 slice is a valid byte slice.
        unsafe { std::slice::from_raw_parts(used.as_ptr().cast::<u8>(), used.len() * 8) }
    }

    pub fn pushed(&self) -> usize {
        self.pushed
    }

    fn check_complete<R: PtrReturn>(&self) -> Result<()> {
        if self.pushed != N {
            return Err(Error::ArgumentCountMismatch {
                expected: N,
                got: self.pushed,
            });
        }
        if cfg!(debug_assertions) {
            if let Some(param) = R::PARAM {
                let (owner, method) = self.callee.describe();
                assert_eq!(
                    self.callee.signature().ret,
                    Some(param),
                    "return of {owner}::{method} read with the wrong type"
                );
            }
        }
        Ok(())
    }

    /// Builds the argument pointer table and the return pointer.
    fn pointers(&mut self) -> ([ConstTypePtr; N], TypePtr) {
        let base = self.words.as_flattened().as_ptr().cast::<u8>();
        let layout = &self.layout;
        let table = std::array::from_fn(|i| base.wrapping_add(layout[i].offset).cast());
        (table, self.ret.as_mut_ptr().cast())
    }

    fn table_ptr(table: &[ConstTypePtr; N]) -> *const ConstTypePtr {
        if N == 0 {
            EMPTY_ARGS.0.as_ptr()
        } else {
            table.as_ptr()
        }
    }
}

impl<const N: usize> CallFrame<MethodBind, N> {
    /// Calls the method on `target` and reads the return slot as `R`.
    ///
    /// `target` is null for static methods; see [`invoke_static`].
    ///
    /// # Errors
    ///
    /// [`Error::ArgumentCountMismatch`] if fewer than `N` arguments were
    /// pushed.
    ///
    /// # Safety
    ///
    /// `target` must be a live object of the bind's class (or null for a
    /// static method), and the bind's [`Signature`] must describe the
    /// engine method truthfully.
    ///
    /// [`invoke_static`]: CallFrame::invoke_static
    pub unsafe fn invoke<R: PtrReturn>(mut self, target: ObjectPtr) -> Result<R> {
        self.check_complete::<R>()?;
        let (table, ret) = self.pointers();
        let (owner, method) = self.callee.describe();
        trace!("ptrcall {}::{} with {} args", owner, method, N);

        unsafe {
            self.callee.ptrcall(target, Self::table_ptr(&table), ret);
            R::try_read_return(ret.cast_const().cast())
        }
    }

    /// [`invoke`](CallFrame::invoke) with a null target.
    ///
    /// # Safety
    ///
    /// As `invoke`; the method must be static.
    pub unsafe fn invoke_static<R: PtrReturn>(self) -> Result<R> {
        unsafe { self.invoke(std::ptr::null_mut()) }
    }
}

impl<const N: usize> CallFrame<BuiltinMethod, N> {
    /// Calls the builtin method on the value at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to a live value of the method's builtin type, and
    /// the method's declared signature must be truthful.
    pub unsafe fn invoke_on<R: PtrReturn>(mut self, base: TypePtr) -> Result<R> {
        self.check_complete::<R>()?;
        let (table, ret) = self.pointers();
        let (owner, method) = self.callee.describe();
        trace!("builtin call {}::{} with {} args", owner, method, N);

        unsafe {
            self.callee.call(base, Self::table_ptr(&table), ret, N);
            R::try_read_return(ret.cast_const().cast())
        }
    }
}

impl<const N: usize> CallFrame<UtilityFunction, N> {
    /// Calls the utility function.
    ///
    /// # Safety
    ///
    /// The function's declared signature must be truthful.
    pub unsafe fn invoke_utility<R: PtrReturn>(mut self) -> Result<R> {
        self.check_complete::<R>()?;
        let (table, ret) = self.pointers();
        let (_, name) = self.callee.describe();
        trace!("utility call {} with {} args", name, N);

        unsafe {
            self.callee.call(ret, Self::table_ptr(&table), N);
            R::try_read_return(ret.cast_const().cast())
        }
    }
}

/// Variant arguments for one call through the engine's Variant calling
/// convention.
///
/// Each argument is passed as a pointer to a borrowed [`Variant`]. A vararg
/// callee takes its fixed parameters plus up to [`MAX_ARGS`] in total; any
/// other callee takes exactly its arity. The result is a new Variant
/// registered in the caller's [`Lifetime`].
///
/// ```rust,ignore
/// static EMIT_SIGNAL: MethodSpec = MethodSpec::new(
///     "Object", "emit_signal", 4047867050,
///     Signature::vararg(&[Param::Typed(VariantType::StringName)], Some(Param::Typed(VariantType::Int))),
/// );
///
/// let signal = "changed".encode(&lifetime)?;
/// let mut frame = VariantFrame::open(runtime.resolve(&EMIT_SIGNAL)?);
/// frame.push(&signal)?.push(&value)?;
/// let status = unsafe { frame.call(node.object_ptr(), &lifetime) }?;
/// ```
pub struct VariantFrame<'a, C: Callee> {
    callee: C,
    args: [ConstVariantPtr; MAX_ARGS],
    pushed: usize,
    _args: PhantomData<&'a Variant>,
}

impl<'a, C: Callee> VariantFrame<'a, C> {
    pub fn open(callee: C) -> Self {
        VariantFrame {
            callee,
            args: [std::ptr::null(); MAX_ARGS],
            pushed: 0,
            _args: PhantomData,
        }
    }

    /// Borrows the next argument.
    ///
    /// # Errors
    ///
    /// [`Error::ArgumentCountMismatch`] past the callee's arity, or past
    /// [`MAX_ARGS`] for a vararg callee.
    pub fn push(&mut self, arg: &'a Variant) -> Result<&mut Self> {
        let signature = self.callee.signature();
        let limit = if signature.vararg {
            MAX_ARGS
        } else {
            signature.arity()
        };
        if self.pushed == limit {
            return Err(Error::ArgumentCountMismatch {
                expected: limit,
                got: limit + 1,
            });
        }
        self.args[self.pushed] = (arg as *const Variant).cast();
        self.pushed += 1;
        Ok(self)
    }

    pub fn pushed(&self) -> usize {
        self.pushed
    }

    fn check_complete(&self) -> Result<()> {
        let arity = self.callee.signature().arity();
        if self.pushed < arity {
            return Err(Error::ArgumentCountMismatch {
                expected: arity,
                got: self.pushed,
            });
        }
        Ok(())
    }

    fn table_ptr(&self) -> *const ConstVariantPtr {
        if self.pushed == 0 {
            EMPTY_ARGS.0.as_ptr()
        } else {
            self.args.as_ptr()
        }
    }
}

impl VariantFrame<'_, MethodBind> {
    /// Calls the method on `target`, returning its result in `lifetime`.
    ///
    /// # Errors
    ///
    /// - [`Error::ArgumentCountMismatch`] below the callee's fixed arity.
    /// - [`Error::CallFailed`] when the engine rejects the call.
    /// - [`Error::LifetimeEnded`] if `lifetime` has ended; the result is
    ///   released.
    ///
    /// # Safety
    ///
    /// `target` must be a live object of the bind's class, or null for a
    /// static method.
    pub unsafe fn call<'l>(self, target: ObjectPtr, lifetime: &'l Lifetime) -> Result<Local<'l, Variant>> {
        self.check_complete()?;
        let runtime = lifetime.runtime();
        let (owner, method) = self.callee.describe();
        trace!("variant call {}::{} with {} args", owner, method, self.pushed);

        let mut ret = Variant::empty();
        let mut status = sys::CallError::default();
        unsafe {
            (runtime.interface().object_method_bind_call)(
                self.callee.as_ptr(),
                target,
                self.table_ptr(),
                self.pushed as sys::Int,
                ret.type_ptr_mut(),
                &mut status,
            )
        };
        let ret = lifetime.register(ret)?;
        check_call(owner, method, status)?;
        Ok(ret)
    }
}

// Argument and return encodings for primitive and plain-data types.

unsafe impl<T: PtrArg> PtrArg for &T {
    const PARAM: Param = T::PARAM;
    const SIZE: usize = T::SIZE;

    unsafe fn write_arg(&self, dst: *mut u8) {
        unsafe { (**self).write_arg(dst) }
    }

    fn check_arg(&self) -> Result<()> {
        (**self).check_arg()
    }
}

unsafe impl PtrReturn for () {
    const PARAM: Option<Param> = None;

    unsafe fn read_return(_src: *const u8) -> Self {}
}

unsafe impl PtrArg for bool {
    const PARAM: Param = Param::Typed(VariantType::Bool);
    const SIZE: usize = 1;

    unsafe fn write_arg(&self, dst: *mut u8) {
        unsafe { dst.write(u8::from(*self)) }
    }
}

unsafe impl PtrReturn for bool {
    const PARAM: Option<Param> = Some(Param::Typed(VariantType::Bool));

    unsafe fn read_return(src: *const u8) -> Self {
        unsafe { src.read() != 0 }
    }
}

fn out_of_range(ty: &'static str, value: impl fmt::Display) -> Error {
    Error::ValueOutOfRange {
        ty,
        value: value.to_string(),
    }
}

macro_rules! int_ptr_type {
    ($($ty:ty),*) => {$(
        unsafe impl PtrArg for $ty {
            const PARAM: Param = Param::Typed(VariantType::Int);
            const SIZE: usize = 8;

            unsafe fn write_arg(&self, dst: *mut u8) {
                unsafe { dst.cast::<i64>().write(*self as i64) }
            }

            fn check_arg(&self) -> Result<()> {
                i64::try_from(*self).map(drop).map_err(|_| out_of_range("int", self))
            }
        }

        unsafe impl PtrReturn for $ty {
            const PARAM: Option<Param> = Some(Param::Typed(VariantType::Int));

            unsafe fn read_return(src: *const u8) -> Self {
                unsafe { src.cast::<i64>().read() as $ty }
            }

            unsafe fn try_read_return(src: *const u8) -> Result<Self> {
                let wide = unsafe { src.cast::<i64>().read() };
                <$ty>::try_from(wide).map_err(|_| out_of_range(stringify!($ty), wide))
            }
        }
    )*};
}

int_ptr_type!(i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);

unsafe impl PtrArg for f64 {
    const PARAM: Param = Param::Typed(VariantType::Float);
    const SIZE: usize = 8;

    unsafe fn write_arg(&self, dst: *mut u8) {
        unsafe { dst.cast::<f64>().write(*self) }
    }
}

unsafe impl PtrReturn for f64 {
    const PARAM: Option<Param> = Some(Param::Typed(VariantType::Float));

    unsafe fn read_return(src: *const u8) -> Self {
        unsafe { src.cast::<f64>().read() }
    }
}

unsafe impl PtrArg for f32 {
    const PARAM: Param = Param::Typed(VariantType::Float);
    const SIZE: usize = 8;

    unsafe fn write_arg(&self, dst: *mut u8) {
        unsafe { dst.cast::<f64>().write(f64::from(*self)) }
    }
}

unsafe impl PtrReturn for f32 {
    const PARAM: Option<Param> = Some(Param::Typed(VariantType::Float));

    unsafe fn read_return(src: *const u8) -> Self {
        unsafe { src.cast::<f64>().read() as f32 }
    }

    unsafe fn try_read_return(src: *const u8) -> Result<Self> {
        narrow_f64(unsafe { src.cast::<f64>().read() })
    }
}

/// Narrows a double, rejecting finite values beyond `f32`'s range.
/// Infinities and NaN carry over unchanged.
pub(crate) fn narrow_f64(wide: f64) -> Result<f32> {
    let narrow = wide as f32;
    if wide.is_finite() && narrow.is_infinite() {
        return Err(out_of_range("f32", wide));
    }
    Ok(narrow)
}

/// Implements both traits for a `Copy` type stored verbatim.
macro_rules! pod_ptr_type {
    ($($ty:ty => $variant:ident),* $(,)?) => {$(
        unsafe impl $crate::frame::PtrArg for $ty {
            const PARAM: $crate::frame::Param =
                $crate::frame::Param::Typed($crate::variant::VariantType::$variant);
            const SIZE: usize = std::mem::size_of::<$ty>();

            unsafe fn write_arg(&self, dst: *mut u8) {
                unsafe { dst.cast::<$ty>().write(*self) }
            }
        }

        unsafe impl $crate::frame::PtrReturn for $ty {
            const PARAM: Option<$crate::frame::Param> =
                Some($crate::frame::Param::Typed($crate::variant::VariantType::$variant));

            unsafe fn read_return(src: *const u8) -> Self {
                unsafe { src.cast::<$ty>().read() }
            }
        }
    )*};
}

pub(crate) use pod_ptr_type;

/// Engine status codes returned as `int`.
unsafe impl PtrReturn for std::result::Result<(), crate::error::EngineError> {
    const PARAM: Option<Param> = Some(Param::Typed(VariantType::Int));

    unsafe fn read_return(src: *const u8) -> Self {
        crate::error::EngineError::check(unsafe { src.cast::<i64>().read() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{Color, Vector2, Vector3};

    static TWO_INTS: Signature = Signature::new(
        &[
            Param::Typed(VariantType::Int),
            Param::Typed(VariantType::Int),
        ],
        Some(Param::Typed(VariantType::Int)),
    );

    static MIXED: Signature = Signature::new(
        &[
            Param::Typed(VariantType::Bool),
            Param::Typed(VariantType::Vector3),
            Param::Typed(VariantType::Float),
            Param::Typed(VariantType::Color),
        ],
        None,
    );

    #[derive(Clone, Copy)]
    struct Fake(&'static Signature);

    impl Callee for Fake {
        fn signature(&self) -> &'static Signature {
            self.0
        }

        fn describe(&self) -> (&'static str, &'static str) {
            ("Fake", "call")
        }
    }

    #[test]
    fn test_open_checks_arity() {
        assert!(CallFrame::<_, 2>::open(Fake(&TWO_INTS)).is_ok());
        assert_eq!(
            CallFrame::<_, 3>::open(Fake(&TWO_INTS)).err(),
            Some(Error::ArgumentCountMismatch {
                expected: 2,
                got: 3
            })
        );
    }

    #[test]
    fn test_push_overflow() {
        let mut frame = CallFrame::<_, 2>::open(Fake(&TWO_INTS)).unwrap();
        frame.push(&1i64).unwrap().push(&2i32).unwrap();
        assert_eq!(
            frame.push(&3i64).err(),
            Some(Error::ArgumentCountMismatch {
                expected: 2,
                got: 3
            })
        );
    }

    #[test]
    fn test_incomplete_frame_is_rejected() {
        let mut frame = CallFrame::<_, 2>::open(Fake(&TWO_INTS)).unwrap();
        frame.push(&1i64).unwrap();
        assert_eq!(
            frame.check_complete::<i64>(),
            Err(Error::ArgumentCountMismatch {
                expected: 2,
                got: 1
            })
        );
    }

    #[test]
    fn test_unsigned_args_beyond_int64_are_rejected() {
        let mut frame = CallFrame::<_, 2>::open(Fake(&TWO_INTS)).unwrap();
        assert_eq!(
            frame.push(&u64::MAX).err(),
            Some(Error::ValueOutOfRange {
                ty: "int",
                value: u64::MAX.to_string(),
            })
        );
        assert_eq!(frame.pushed(), 0);
        assert!(frame.push(&(i64::MAX as u64)).is_ok());
        assert!(frame.push(&(usize::MAX >> 1)).is_ok());
    }

    #[test]
    fn test_narrow_returns_are_range_checked() {
        fn read<R: PtrReturn, W>(wide: W) -> Result<R> {
            unsafe { R::try_read_return((&wide as *const W).cast()) }
        }

        assert_eq!(
            read::<i32, _>(1i64 << 40),
            Err(Error::ValueOutOfRange {
                ty: "i32",
                value: (1i64 << 40).to_string(),
            })
        );
        assert!(read::<u8, _>(300i64).is_err());
        assert!(read::<u32, _>(-1i64).is_err());
        assert!(read::<u64, _>(-1i64).is_err());
        assert_eq!(read::<i8, _>(-1i64), Ok(-1));
        assert_eq!(read::<u16, _>(65535i64), Ok(u16::MAX));

        assert!(read::<f32, _>(1.0e300f64).is_err());
        assert_eq!(read::<f32, _>(0.5f64), Ok(0.5));
        assert!(read::<f32, _>(f64::INFINITY).unwrap().is_infinite());
    }

    #[test]
    fn test_mixed_layout() {
        let mut frame = CallFrame::<_, 4>::open(Fake(&MIXED)).unwrap();
        frame
            .push(&true)
            .unwrap()
            .push(&Vector3 { x: 1.0, y: 2.0, z: 3.0 })
            .unwrap()
            .push(&0.5f32)
            .unwrap()
            .push(&Color::rgba(0.0, 0.25, 0.5, 1.0))
            .unwrap();

        let offsets: Vec<_> = frame.layout().iter().map(|s| (s.offset, s.size)).collect();
        assert_eq!(offsets, vec![(0, 1), (8, 12), (24, 8), (32, 16)]);
        assert_eq!(frame.arg_bytes().len(), 48);

        let bytes = frame.arg_bytes();
        assert_eq!(bytes[0], 1);
        assert!(bytes[1..8].iter().all(|&b| b == 0));
        assert_eq!(f32::from_ne_bytes(bytes[12..16].try_into().unwrap()), 2.0);
        assert_eq!(f64::from_ne_bytes(bytes[24..32].try_into().unwrap()), 0.5);
    }

    #[test]
    #[should_panic(expected = "pushed with the wrong type")]
    #[cfg(debug_assertions)]
    fn test_wrong_type_panics_in_debug() {
        let mut frame = CallFrame::<_, 2>::open(Fake(&TWO_INTS)).unwrap();
        let _ = frame.push(&Vector2 { x: 0.0, y: 0.0 });
    }

    static SUM: Signature = Signature::vararg(&[Param::Variant], Some(Param::Variant));

    #[test]
    fn test_vararg_callee_has_no_fixed_frame() {
        assert_eq!(
            CallFrame::<_, 1>::open(Fake(&SUM)).err(),
            Some(Error::VarargMethod {
                class: "Fake",
                method: "call",
            })
        );
    }

    #[test]
    fn test_variant_frame_bounds() {
        let args: [Variant; MAX_ARGS + 1] = std::array::from_fn(|_| Variant::empty());

        let mut fixed = VariantFrame::open(Fake(&TWO_INTS));
        assert!(fixed.check_complete().is_err());
        fixed.push(&args[0]).unwrap().push(&args[1]).unwrap();
        assert!(fixed.check_complete().is_ok());
        assert_eq!(
            fixed.push(&args[2]).err(),
            Some(Error::ArgumentCountMismatch {
                expected: 2,
                got: 3
            })
        );

        let mut vararg = VariantFrame::open(Fake(&SUM));
        assert_eq!(
            vararg.check_complete(),
            Err(Error::ArgumentCountMismatch {
                expected: 1,
                got: 0
            })
        );
        for arg in &args[..MAX_ARGS] {
            vararg.push(arg).unwrap();
        }
        assert!(vararg.push(&args[MAX_ARGS]).is_err());
        assert_eq!(vararg.pushed(), MAX_ARGS);
        assert_eq!(vararg.table_ptr(), vararg.args.as_ptr());
    }

    #[test]
    fn test_zero_arity_uses_sentinel_table() {
        static NONE: Signature = Signature::new(&[], None);
        let mut frame = CallFrame::<_, 0>::open(Fake(&NONE)).unwrap();
        let (table, ret) = frame.pointers();
        let ptr = CallFrame::<Fake, 0>::table_ptr(&table);
        assert!(!ptr.is_null());
        assert!(!ret.is_null());
        assert!(frame.arg_bytes().is_empty());
    }
}
