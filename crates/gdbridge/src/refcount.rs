//! Bridge between host handles and the engine's atomic reference counts.
//!
//! Every live [`Ref`] accounts for exactly one native reference: creating or
//! cloning one calls `RefCounted.reference`, dropping one calls
//! `RefCounted.unreference`, and the drop that takes the count to zero
//! destroys the object. The bridge takes no locks of its own, so a release
//! may re-enter it from engine finalization code.
//!
//! With `Config::verify_refcounts` every release first reads the native
//! count and refuses to decrement past zero, reporting
//! [`Error::UnbalancedRelease`] instead.

use crate::classdb;
use crate::error::{Error, Result};
use crate::frame::{MethodFrame, Param, Signature};
use crate::object::{Class, Object, ObjectRef, RefCountedMemory};
use crate::ownership::{Discipline, Ownership};
use crate::resolver::MethodSpec;
use crate::runtime::{self, Runtime};
use crate::sys::ObjectPtr;
use crate::variant::VariantType;
use gdbridge_log::{error, trace};
use std::fmt;
use std::ops::Deref;

crate::engine_class! {
    /// Base of every reference-counted engine class.
    pub struct RefCounted: Object = "RefCounted", RefCountedMemory;
}

const BOOL_RETURN: Signature = Signature::new(&[], Some(Param::Typed(VariantType::Bool)));

static INIT_REF: MethodSpec = MethodSpec::new("RefCounted", "init_ref", 2240911060, BOOL_RETURN);
static REFERENCE: MethodSpec = MethodSpec::new("RefCounted", "reference", 2240911060, BOOL_RETURN);
static UNREFERENCE: MethodSpec =
    MethodSpec::new("RefCounted", "unreference", 2240911060, BOOL_RETURN);
static GET_REFERENCE_COUNT: MethodSpec = MethodSpec::new(
    "RefCounted",
    "get_reference_count",
    3905245786,
    Signature::new(&[], Some(Param::Typed(VariantType::Int))),
);

fn call_bool(runtime: &Runtime, spec: &'static MethodSpec, target: ObjectPtr) -> Result<bool> {
    let frame = MethodFrame::<0>::open(runtime.resolve(spec)?)?;
    unsafe { frame.invoke::<bool>(target) }
}

/// Current native count of a refcounted object.
pub fn reference_count(runtime: &Runtime, target: ObjectPtr) -> Result<i64> {
    let frame = MethodFrame::<0>::open(runtime.resolve(&GET_REFERENCE_COUNT)?)?;
    unsafe { frame.invoke::<i64>(target) }
}

/// One native increment.
pub(crate) fn increment(runtime: &Runtime, target: ObjectPtr) -> Result<()> {
    call_bool(runtime, &REFERENCE, target)?;
    trace!("reference {:p}", target);
    Ok(())
}

/// One native decrement; destroys the object when it reaches zero.
///
/// Returns true if the object was destroyed.
pub(crate) fn decrement(runtime: &Runtime, target: ObjectPtr) -> Result<bool> {
    if runtime.config().verify_refcounts && reference_count(runtime, target)? <= 0 {
        let instance_id = unsafe { (runtime.interface().object_get_instance_id)(target) };
        return Err(Error::UnbalancedRelease { instance_id });
    }

    let reached_zero = call_bool(runtime, &UNREFERENCE, target)?;
    trace!("unreference {:p}", target);
    if reached_zero {
        unsafe { (runtime.interface().object_destroy)(target) };
        trace!("destroyed {:p}", target);
    }
    Ok(reached_zero)
}

/// A counted reference to a refcounted engine object.
///
/// `Clone` takes one more native reference and `Drop` gives one back. `Ref`
/// is `Send` and `Sync`; the native count is atomic.
pub struct Ref<T: Class<Memory = RefCountedMemory>> {
    object: T,
}

// SAFETY: refcounted engine objects are shared by atomic count, and the
// bridge performs no unsynchronized host-side mutation.
unsafe impl<T: Class<Memory = RefCountedMemory>> Send for Ref<T> {}
unsafe impl<T: Class<Memory = RefCountedMemory>> Sync for Ref<T> {}

impl<T: Class<Memory = RefCountedMemory>> Ref<T> {
    /// Constructs a new object and takes its first reference.
    pub fn new() -> Result<Self> {
        let runtime = runtime::get()?;
        Self::new_with(&runtime)
    }

    pub fn new_with(runtime: &Runtime) -> Result<Self> {
        let ptr = classdb::construct(runtime, T::NAME)?;
        Self::init_constructed(runtime, ptr, |runtime, ptr| call_bool(runtime, &INIT_REF, ptr))
    }

    /// Takes the first reference of a freshly constructed object through
    /// `init_ref`. The object is destroyed if that fails.
    fn init_constructed(
        runtime: &Runtime,
        ptr: ObjectPtr,
        init_ref: impl FnOnce(&Runtime, ObjectPtr) -> Result<bool>,
    ) -> Result<Self> {
        let object = unsafe { Object::from_ptr(ptr) }.ok_or(Error::NullObject)?;
        if let Err(err) = init_ref(runtime, ptr) {
            unsafe { (runtime.interface().object_destroy)(ptr) };
            error!("init_ref of new {} failed, object destroyed: {}", T::NAME, err);
            return Err(err);
        }
        trace!("init_ref {} {:p}", T::NAME, ptr);
        Ok(Ref {
            object: unsafe { T::from_object(object) },
        })
    }

    /// Takes a new reference to an existing object.
    ///
    /// # Errors
    ///
    /// [`Error::NullObject`] for null and [`Error::ClassMismatch`] if the
    /// object is not a `T`.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live object.
    pub unsafe fn acquire(runtime: &Runtime, ptr: ObjectPtr) -> Result<Self> {
        let object = unsafe { crate::object::checked_cast::<T>(runtime, ptr)? };
        increment(runtime, ptr)?;
        Ok(Ref { object })
    }

    /// Adopts a reference the engine already counted for the caller.
    ///
    /// # Safety
    ///
    /// The reference must not be released by anyone else.
    pub unsafe fn from_counted(runtime: &Runtime, ptr: ObjectPtr) -> Result<Self> {
        let object = unsafe { crate::object::checked_cast::<T>(runtime, ptr)? };
        Ok(Ref { object })
    }

    /// Fallible [`Clone`].
    pub fn try_clone(&self) -> Result<Self> {
        let runtime = runtime::get()?;
        increment(&runtime, self.object.object_ptr())?;
        Ok(Ref {
            object: unsafe { T::from_object(self.object.as_object().alias()) },
        })
    }

    /// Current native count, including this reference.
    pub fn reference_count(&self) -> Result<i64> {
        reference_count(&*runtime::get()?, self.object.object_ptr())
    }

    /// A non-owning reference to the same object.
    pub fn downgrade(&self) -> Result<ObjectRef<T>> {
        let runtime = runtime::get()?;
        Ok(ObjectRef::borrow_from(&runtime, &self.object))
    }

    /// Widens to a base class.
    pub fn upcast<B: Class<Memory = RefCountedMemory>>(self) -> Ref<B>
    where
        T: Deref<Target = B>,
    {
        let this = std::mem::ManuallyDrop::new(self);
        Ref {
            object: unsafe { B::from_object(this.object.as_object().alias()) },
        }
    }

    fn release(&mut self) {
        let Ok(runtime) = runtime::get() else {
            error!("Ref<{}> dropped after runtime shutdown; leaked", T::NAME);
            return;
        };
        match decrement(&runtime, self.object.object_ptr()) {
            Ok(_) => {}
            Err(err @ Error::UnbalancedRelease { .. }) => {
                error!("{}", err);
                if !std::thread::panicking() {
                    panic!("{err}");
                }
            }
            Err(err) => error!("release of Ref<{}> failed: {}", T::NAME, err),
        }
    }
}

impl<T: Class<Memory = RefCountedMemory>> Clone for Ref<T> {
    fn clone(&self) -> Self {
        match self.try_clone() {
            Ok(clone) => clone,
            Err(err) => panic!("cannot clone Ref<{}>: {err}", T::NAME),
        }
    }
}

impl<T: Class<Memory = RefCountedMemory>> Drop for Ref<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: Class<Memory = RefCountedMemory>> Deref for Ref<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.object
    }
}

impl<T: Class<Memory = RefCountedMemory>> Discipline for Ref<T> {
    const OWNERSHIP: Ownership = Ownership::RefCounted;
}

impl<T: Class<Memory = RefCountedMemory>> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref<{}>({:p})", T::NAME, self.object.object_ptr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn test_new_starts_at_one() {
        let _runtime = test_support::runtime();
        let object = Ref::<RefCounted>::new().unwrap();
        assert_eq!(object.reference_count(), Ok(1));
    }

    #[test]
    fn test_failed_init_ref_destroys_the_object() {
        let runtime = test_support::runtime();
        let ptr = classdb::construct(&runtime, "RefCounted").unwrap();
        let id = unsafe { (runtime.interface().object_get_instance_id)(ptr) };

        let result = Ref::<RefCounted>::init_constructed(&runtime, ptr, |_, _| {
            Err(Error::Engine(crate::error::EngineError::Failed))
        });
        assert_eq!(
            result.err(),
            Some(Error::Engine(crate::error::EngineError::Failed))
        );
        assert!(!gdbridge_headless::is_alive(id));
        assert_eq!(gdbridge_headless::destroy_count(id), 1);
    }

    #[test]
    fn test_clone_and_drop_are_paired() {
        let runtime = test_support::runtime();
        let first = Ref::<RefCounted>::new().unwrap();
        let id = first.instance_id(&runtime);

        let clones: Vec<_> = (0..5).map(|_| first.clone()).collect();
        assert_eq!(first.reference_count(), Ok(6));
        drop(clones);
        assert_eq!(first.reference_count(), Ok(1));
        assert!(gdbridge_headless::is_alive(id));

        drop(first);
        assert!(!gdbridge_headless::is_alive(id));
        assert_eq!(gdbridge_headless::destroy_count(id), 1);
    }

    #[test]
    fn test_acquire_from_zero_destroys_once() {
        let runtime = test_support::runtime();
        let ptr = classdb::construct(&runtime, "RefCounted").unwrap();
        let id = unsafe { (runtime.interface().object_get_instance_id)(ptr) };
        assert_eq!(gdbridge_headless::reference_count(id), Some(0));

        let refs: Vec<_> = (0..3)
            .map(|_| unsafe { Ref::<RefCounted>::acquire(&runtime, ptr) }.unwrap())
            .collect();
        assert_eq!(gdbridge_headless::reference_count(id), Some(3));
        drop(refs);
        assert!(!gdbridge_headless::is_alive(id));
        assert_eq!(gdbridge_headless::destroy_count(id), 1);
    }

    #[test]
    fn test_unbalanced_release_is_refused() {
        let runtime = test_support::runtime();
        let ptr = classdb::construct(&runtime, "RefCounted").unwrap();
        let id = unsafe { (runtime.interface().object_get_instance_id)(ptr) };
        assert_eq!(
            decrement(&runtime, ptr),
            Err(Error::UnbalancedRelease { instance_id: id })
        );
        assert!(gdbridge_headless::is_alive(id));
        unsafe { (runtime.interface().object_destroy)(ptr) };
    }

    #[test]
    fn test_downgrade_observes_destruction() {
        let _runtime = test_support::runtime();
        let object = Ref::<RefCounted>::new().unwrap();
        let weak = object.downgrade().unwrap();
        assert!(weak.is_alive());
        drop(object);
        assert!(!weak.is_alive());
    }

    #[test]
    fn test_ref_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Ref<RefCounted>>();
    }
}
