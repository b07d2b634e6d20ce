//! Engine objects and the raw (non-owning) object discipline.
//!
//! An [`Object`] is the one-pointer token for any engine object. Typed
//! wrappers implement [`Class`] and are declared with [`engine_class!`]; each
//! is `#[repr(transparent)]` over its base, so a `&Node` is ABI-identical to
//! the object pointer it wraps.
//!
//! Which wrapper a caller holds decides who releases the object:
//!
//! - refcounted classes live in [`Ref`](crate::refcount::Ref);
//! - manually managed objects the caller created or received with ownership
//!   live in [`Owned`];
//! - everything else is borrowed from the engine through [`ObjectRef`],
//!   which re-validates the instance id on every access.
//!
//! [`Owned`]: crate::ownership::Owned

use crate::classdb;
use crate::error::{Error, Result};
use crate::frame::{Param, PtrArg, PtrReturn};
use crate::ownership::{ClassMemory, Discipline, Owned, Ownership, Transfer};
use crate::runtime::{self, Runtime};
use crate::sys::{InstanceId, ObjectPtr};
use crate::variant::VariantType;
use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;

/// Token for a live engine object.
#[repr(transparent)]
#[derive(PartialEq, Eq, Hash)]
pub struct Object {
    ptr: NonNull<c_void>,
}

impl Object {
    /// Wraps a raw object pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point to a live engine object.
    pub unsafe fn from_ptr(ptr: ObjectPtr) -> Option<Object> {
        NonNull::new(ptr).map(|ptr| Object { ptr })
    }

    pub fn ptr(&self) -> ObjectPtr {
        self.ptr.as_ptr()
    }

    /// The engine's instance id of this object.
    pub fn instance_id(&self, runtime: &Runtime) -> InstanceId {
        unsafe { (runtime.interface().object_get_instance_id)(self.ptr()) }
    }

    /// Checked downcast through the engine's class tags.
    ///
    /// # Errors
    ///
    /// [`Error::ClassMismatch`] if the object is not a `T`.
    pub fn cast<T: Class>(&self, runtime: &Runtime) -> Result<&T> {
        let tag = runtime.class_tag(T::NAME)?;
        let cast = unsafe { (runtime.interface().object_cast_to)(self.ptr(), tag) };
        if cast.is_null() {
            return Err(Error::ClassMismatch { expected: T::NAME });
        }
        // SAFETY: `T` is repr(transparent) over `Object`, and the engine
        // confirmed the dynamic class.
        Ok(unsafe { &*(self as *const Object).cast::<T>() })
    }

    /// Duplicates the token. Ownership rules are the caller's problem.
    ///
    /// # Safety
    ///
    /// The copy must not be released through a second discipline.
    pub(crate) unsafe fn alias(&self) -> Object {
        Object { ptr: self.ptr }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({:p})", self.ptr)
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Memory-management kind of a class, fixed at compile time.
pub trait MemoryKind: sealed::Sealed {
    const KIND: ClassMemory;
}

/// Classes inheriting `RefCounted`.
pub enum RefCountedMemory {}

/// Classes whose objects are freed explicitly.
pub enum ManualMemory {}

impl sealed::Sealed for RefCountedMemory {}
impl sealed::Sealed for ManualMemory {}

impl MemoryKind for RefCountedMemory {
    const KIND: ClassMemory = ClassMemory::RefCounted;
}

impl MemoryKind for ManualMemory {
    const KIND: ClassMemory = ClassMemory::Manual;
}

/// A typed view of an engine class.
///
/// # Safety
///
/// The type must be `#[repr(transparent)]` over [`Object`] (directly or
/// through its base), `NAME` must be the engine class name and `Memory` its
/// memory-management kind.
pub unsafe trait Class: Sized + 'static {
    const NAME: &'static str;
    type Memory: MemoryKind;

    /// # Safety
    ///
    /// `object` must be an instance of this class.
    unsafe fn from_object(object: Object) -> Self;

    fn as_object(&self) -> &Object;

    fn object_ptr(&self) -> ObjectPtr {
        self.as_object().ptr()
    }
}

unsafe impl Class for Object {
    const NAME: &'static str = "Object";
    type Memory = ManualMemory;

    unsafe fn from_object(object: Object) -> Self {
        object
    }

    fn as_object(&self) -> &Object {
        self
    }
}

unsafe impl Transfer for Object {
    unsafe fn release(&mut self, runtime: &Runtime) {
        unsafe { (runtime.interface().object_destroy)(self.ptr()) };
    }
}

unsafe impl PtrArg for Object {
    const PARAM: Param = Param::Typed(VariantType::Object);
    const SIZE: usize = 8;

    unsafe fn write_arg(&self, dst: *mut u8) {
        unsafe { dst.cast::<ObjectPtr>().write(self.ptr()) }
    }
}

/// Nullable object parameter.
unsafe impl<T: Class> PtrArg for Option<&T> {
    const PARAM: Param = Param::Typed(VariantType::Object);
    const SIZE: usize = 8;

    unsafe fn write_arg(&self, dst: *mut u8) {
        let ptr = self.map_or(std::ptr::null_mut(), |object| object.object_ptr());
        unsafe { dst.cast::<ObjectPtr>().write(ptr) }
    }
}

/// Object returns are read raw; the caller applies the method's
/// [`ReturnContract`](crate::ownership::ReturnContract).
unsafe impl PtrReturn for Option<Object> {
    const PARAM: Option<Param> = Some(Param::Typed(VariantType::Object));

    unsafe fn read_return(src: *const u8) -> Self {
        unsafe { Object::from_ptr(src.cast::<ObjectPtr>().read()) }
    }
}

/// Converts a raw object to `T` after checking its dynamic class.
///
/// # Safety
///
/// `ptr` must be null or a live object. The result shares the object with
/// whatever discipline already governs it.
pub(crate) unsafe fn checked_cast<T: Class>(runtime: &Runtime, ptr: ObjectPtr) -> Result<T> {
    let object = unsafe { Object::from_ptr(ptr) }.ok_or(Error::NullObject)?;
    object.cast::<T>(runtime)?;
    Ok(unsafe { T::from_object(object) })
}

impl<T: Class<Memory = ManualMemory>> Owned<T>
where
    T: Transfer,
{
    /// Constructs a new object the caller owns outright.
    pub fn new() -> Result<Self> {
        let runtime = runtime::get()?;
        let ptr = classdb::construct(&runtime, T::NAME)?;
        let object = unsafe { Object::from_ptr(ptr) }.ok_or(Error::NullObject)?;
        Ok(unsafe { Owned::from_raw(T::from_object(object)) })
    }

    /// Takes ownership of an object a transferring method returned.
    ///
    /// # Safety
    ///
    /// The method must hand ownership to the caller.
    pub unsafe fn from_returned(runtime: &Runtime, ptr: ObjectPtr) -> Result<Self> {
        let object = unsafe { checked_cast::<T>(runtime, ptr)? };
        Ok(unsafe { Owned::from_raw(object) })
    }
}

/// A non-owning reference to an engine object.
///
/// Stores the instance id taken at creation and checks it against the
/// engine on every [`get`](ObjectRef::get), so a freed object is reported as
/// [`Error::ObjectFreed`] instead of being read.
pub struct ObjectRef<T: Class> {
    object: T,
    instance_id: InstanceId,
}

// SAFETY: the pointer is only handed out after the engine confirms the
// instance id still maps to it.
unsafe impl<T: Class> Send for ObjectRef<T> {}
unsafe impl<T: Class> Sync for ObjectRef<T> {}

impl<T: Class> ObjectRef<T> {
    /// Borrows the object at `ptr`, checking its class.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live object.
    pub unsafe fn from_ptr(runtime: &Runtime, ptr: ObjectPtr) -> Result<Self> {
        let object = unsafe { checked_cast::<T>(runtime, ptr)? };
        let instance_id = object.as_object().instance_id(runtime);
        Ok(ObjectRef {
            object,
            instance_id,
        })
    }

    /// Borrows an object the caller already holds under another discipline.
    pub fn borrow_from(runtime: &Runtime, owner: &T) -> Self {
        let object = unsafe { T::from_object(owner.as_object().alias()) };
        let instance_id = owner.as_object().instance_id(runtime);
        ObjectRef {
            object,
            instance_id,
        }
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// The object, if it is still alive.
    ///
    /// # Errors
    ///
    /// [`Error::ObjectFreed`] once the engine destroyed it.
    pub fn get(&self) -> Result<&T> {
        let runtime = runtime::get()?;
        self.get_with(&runtime)
    }

    pub fn get_with(&self, runtime: &Runtime) -> Result<&T> {
        let current = unsafe { (runtime.interface().object_get_instance_from_id)(self.instance_id) };
        if current.is_null() || current != self.object.object_ptr() {
            return Err(Error::ObjectFreed {
                instance_id: self.instance_id,
            });
        }
        Ok(&self.object)
    }

    pub fn is_alive(&self) -> bool {
        self.get().is_ok()
    }
}

impl<T: Class> Clone for ObjectRef<T> {
    fn clone(&self) -> Self {
        ObjectRef {
            object: unsafe { T::from_object(self.object.as_object().alias()) },
            instance_id: self.instance_id,
        }
    }
}

impl<T: Class> Discipline for ObjectRef<T> {
    const OWNERSHIP: Ownership = Ownership::Raw;
}

impl<T: Class> fmt::Debug for ObjectRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef<{}>(#{})", T::NAME, self.instance_id)
    }
}

impl Runtime {
    /// Fetches an engine singleton as a borrowed `T`.
    ///
    /// # Errors
    ///
    /// [`Error::ClassNotFound`] if no singleton has this name and
    /// [`Error::ClassMismatch`] if it is not a `T`.
    pub fn singleton<T: Class>(&self, name: &str) -> Result<ObjectRef<T>> {
        let ptr = self.singleton_ptr(name)?;
        unsafe { ObjectRef::from_ptr(self, ptr) }
    }
}

/// Declares a typed wrapper for an engine class.
///
/// ```rust,ignore
/// engine_class! {
///     /// A scene-tree node.
///     pub struct Node: Object = "Node", ManualMemory;
/// }
/// ```
///
/// The wrapper derefs to its base and can be pushed into call frames and
/// encoded into Variants. Manually managed classes can also be held in
/// [`Owned`].
#[macro_export]
macro_rules! engine_class {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident : $base:ty = $engine_name:literal, $memory:ident;
    ) => {
        $(#[$meta])*
        #[repr(transparent)]
        $vis struct $name {
            base: $base,
        }

        unsafe impl $crate::object::Class for $name {
            const NAME: &'static str = $engine_name;
            type Memory = $crate::object::$memory;

            unsafe fn from_object(object: $crate::object::Object) -> Self {
                $name {
                    base: unsafe { <$base as $crate::object::Class>::from_object(object) },
                }
            }

            fn as_object(&self) -> &$crate::object::Object {
                $crate::object::Class::as_object(&self.base)
            }
        }

        impl std::ops::Deref for $name {
            type Target = $base;

            fn deref(&self) -> &$base {
                &self.base
            }
        }

        unsafe impl $crate::frame::PtrArg for $name {
            const PARAM: $crate::frame::Param =
                $crate::frame::Param::Typed($crate::variant::VariantType::Object);
            const SIZE: usize = 8;

            unsafe fn write_arg(&self, dst: *mut u8) {
                unsafe {
                    dst.cast::<$crate::sys::ObjectPtr>()
                        .write($crate::object::Class::object_ptr(self))
                }
            }
        }

        impl $crate::variant::Encode for $name {
            fn encode<'l>(
                &self,
                lifetime: &'l $crate::lifetime::Lifetime,
            ) -> $crate::Result<$crate::lifetime::Local<'l, $crate::variant::Variant>> {
                $crate::variant::Encode::encode($crate::object::Class::as_object(self), lifetime)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({:p})", $engine_name, $crate::object::Class::object_ptr(self))
            }
        }

        $crate::engine_class!(@memory $name, $memory);
    };

    (@memory $name:ident, ManualMemory) => {
        unsafe impl $crate::ownership::Transfer for $name {
            unsafe fn release(&mut self, runtime: &$crate::runtime::Runtime) {
                unsafe {
                    (runtime.interface().object_destroy)($crate::object::Class::object_ptr(self))
                };
            }
        }
    };

    (@memory $name:ident, RefCountedMemory) => {};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refcount::RefCounted;
    use crate::test_support;

    engine_class! {
        /// Scene node fixture.
        pub struct Node: Object = "Node", ManualMemory;
    }

    #[test]
    fn test_owned_node_is_destroyed_on_drop() {
        let runtime = test_support::runtime();
        let node = Owned::<Node>::new().unwrap();
        let id = node.instance_id(&runtime);
        assert!(gdbridge_headless::is_alive(id));
        drop(node);
        assert!(!gdbridge_headless::is_alive(id));
        assert_eq!(gdbridge_headless::destroy_count(id), 1);
    }

    #[test]
    fn test_object_ref_reports_freed_object() {
        let runtime = test_support::runtime();
        let node = Owned::<Node>::new().unwrap();
        let weak = ObjectRef::borrow_from(&runtime, &*node);
        assert!(weak.get().is_ok());

        let id = weak.instance_id();
        drop(node);
        assert_eq!(
            weak.get().err(),
            Some(Error::ObjectFreed { instance_id: id })
        );
        assert!(!weak.is_alive());
    }

    #[test]
    fn test_checked_cast() {
        let runtime = test_support::runtime();
        let node = Owned::<Node>::new().unwrap();
        assert!(node.as_object().cast::<Node>(&runtime).is_ok());
        assert_eq!(
            node.as_object().cast::<RefCounted>(&runtime).err(),
            Some(Error::ClassMismatch {
                expected: "RefCounted"
            })
        );
    }

    #[test]
    fn test_null_object_is_rejected() {
        let runtime = test_support::runtime();
        let result = unsafe { ObjectRef::<Node>::from_ptr(&runtime, std::ptr::null_mut()) };
        assert_eq!(result.err(), Some(Error::NullObject));
    }

    #[test]
    fn test_singleton_lookup() {
        let runtime = test_support::runtime();
        let engine = runtime.singleton::<Object>("Engine").unwrap();
        assert!(engine.get().is_ok());
        assert!(matches!(
            runtime.singleton::<Object>("NoSuchSingleton"),
            Err(Error::ClassNotFound { .. })
        ));
    }

    #[test]
    fn test_discipline_tags() {
        assert_eq!(<ObjectRef<Node> as Discipline>::OWNERSHIP, Ownership::Raw);
        assert_eq!(<Owned<Node> as Discipline>::OWNERSHIP, Ownership::Transferred);
    }
}
