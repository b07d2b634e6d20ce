//! Object construction and host-implemented classes.
//!
//! A host class is a Rust type implementing [`HostClass`]. Registering it
//! hands the engine four trampolines:
//!
//! - `create_instance` constructs the engine-side parent object, builds the
//!   host value with [`HostClass::create`] and attaches it to the object
//!   with `object_set_instance`;
//! - `free_instance` drops the host value when the engine frees the object;
//! - `get_virtual_call_data` maps a virtual method name to an entry of
//!   [`HostClass::VIRTUALS`];
//! - `call_virtual_with_data` runs that entry with the arguments in ptrcall
//!   layout.
//!
//! The engine only ever sees an integer host id for the instance. Host
//! values live in the runtime's [`ClassRegistry`], each behind its own
//! `Mutex`; the registry lock is never held while host code runs. Panics in
//! host code are caught at the trampoline and logged.

use crate::builtin::{Builtin, GString, StringName};
use crate::error::{Error, Result};
use crate::frame::{PtrArg, PtrReturn};
use crate::object::{Object, ObjectRef};
use crate::ownership::Transfer;
use crate::runtime::{self, Runtime};
use crate::sys::{
    self, ClassCreationInfo, ClassInstancePtr, ConstStringNamePtr, ConstTypePtr, InstanceId,
    ObjectPtr, TypePtr,
};
use fxhash::FxHashMap;
use gdbridge_log::{debug, error, info, trace, warn};
use std::any::{Any, TypeId};
use std::ffi::c_void;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

/// Constructs an engine object of `class`.
///
/// The result is governed by no discipline yet; wrap it in `Ref`, `Owned`
/// or `ObjectRef` according to the class.
///
/// # Errors
///
/// [`Error::ClassNotFound`] if the engine does not know `class` or
/// refuses to instantiate it.
pub fn construct(runtime: &Runtime, class: &'static str) -> Result<ObjectPtr> {
    let name = runtime.class_name_ptr(class)?;
    let ptr = unsafe { (runtime.interface().classdb_construct_object)(name) };
    if ptr.is_null() {
        return Err(Error::ClassNotFound {
            class: class.to_owned(),
        });
    }
    trace!("constructed {} {:p}", class, ptr);
    Ok(ptr)
}

/// Attaches a host instance id to an engine object.
///
/// # Safety
///
/// `object` must be a live object whose class is, or derives from, the
/// registered host class `class`.
pub unsafe fn set_instance(
    runtime: &Runtime,
    object: ObjectPtr,
    class: &str,
    host_id: u64,
) {
    let name = StringName::scoped(runtime, class);
    unsafe {
        (runtime.interface().object_set_instance)(object, name.as_ptr(), host_id as ClassInstancePtr)
    };
}

/// Virtual method body of a host class.
pub type VirtualFn<T> = fn(&mut T, &VirtualArgs<'_>, &mut VirtualReturn<'_>);

/// One entry of a host class's virtual method table.
pub struct Virtual<T> {
    /// Engine name of the virtual, e.g. `_ready`.
    pub name: &'static str,
    pub arity: usize,
    pub call: VirtualFn<T>,
}

impl<T> Virtual<T> {
    pub const fn new(name: &'static str, arity: usize, call: VirtualFn<T>) -> Self {
        Virtual { name, arity, call }
    }
}

/// A Rust type exposed to the engine as a class.
///
/// ```rust,ignore
/// struct Spinner {
///     base: ObjectRef<Object>,
///     speed: f64,
/// }
///
/// impl HostClass for Spinner {
///     const NAME: &'static str = "Spinner";
///     const PARENT: &'static str = "Node";
///     const VIRTUALS: &'static [Virtual<Self>] = &[Virtual::new("_process", 1, Spinner::process)];
///
///     fn create(base: ObjectRef<Object>) -> Self {
///         Spinner { base, speed: 1.0 }
///     }
/// }
/// ```
pub trait HostClass: Send + Sized + 'static {
    const NAME: &'static str;
    /// Engine class the instances extend.
    const PARENT: &'static str;
    const VIRTUALS: &'static [Virtual<Self>] = &[];

    /// Builds the host side of a freshly constructed object.
    fn create(base: ObjectRef<Object>) -> Self;
}

/// Arguments of a virtual call, in ptrcall layout.
pub struct VirtualArgs<'a> {
    runtime: &'a Runtime,
    args: *const ConstTypePtr,
    arity: usize,
}

impl<'a> VirtualArgs<'a> {
    pub fn runtime(&self) -> &'a Runtime {
        self.runtime
    }

    pub fn len(&self) -> usize {
        self.arity
    }

    pub fn is_empty(&self) -> bool {
        self.arity == 0
    }

    fn slot(&self, index: usize) -> Result<*const u8> {
        if index >= self.arity {
            return Err(Error::ArgumentCountMismatch {
                expected: self.arity,
                got: index + 1,
            });
        }
        Ok(unsafe { *self.args.add(index) }.cast())
    }

    /// Reads a plain argument by value.
    pub fn get<A: PtrReturn + Copy>(&self, index: usize) -> Result<A> {
        let slot = self.slot(index)?;
        unsafe { A::try_read_return(slot) }
    }

    /// Reads a `String` argument without taking it over.
    pub fn string(&self, index: usize) -> Result<String> {
        let slot = self.slot(index)?;
        let string = unsafe { &*slot.cast::<GString>() };
        Ok(string.to_rust(self.runtime))
    }

    /// Borrows an object argument; `None` for null.
    pub fn object(&self, index: usize) -> Result<Option<ObjectRef<Object>>> {
        let slot = self.slot(index)?;
        let ptr = unsafe { slot.cast::<ObjectPtr>().read() };
        if ptr.is_null() {
            return Ok(None);
        }
        unsafe { ObjectRef::from_ptr(self.runtime, ptr) }.map(Some)
    }
}

/// Return slot of a virtual call.
pub struct VirtualReturn<'a> {
    runtime: &'a Runtime,
    ret: TypePtr,
}

impl VirtualReturn<'_> {
    /// Writes a plain return value.
    ///
    /// A value the engine type cannot hold is logged and leaves the slot
    /// untouched.
    pub fn set<R: PtrArg + Copy>(&mut self, value: R) {
        if self.ret.is_null() {
            return;
        }
        if let Err(err) = value.check_arg() {
            error!("virtual return dropped: {}", err);
            return;
        }
        unsafe { value.write_arg(self.ret.cast()) };
    }

    /// Replaces the engine string in the return slot.
    pub fn set_string(&mut self, text: &str) {
        if self.ret.is_null() {
            return;
        }
        let slot = self.ret.cast::<GString>();
        unsafe {
            (*slot).release(self.runtime);
            slot.write(GString::new_raw(self.runtime, text));
        }
    }
}

/// What the engine's `class_userdata` points at.
struct ClassData {
    class: &'static str,
    parent: &'static str,
    type_id: TypeId,
    name: StringName,
    parent_name: StringName,
}

type SharedInstance = Arc<Mutex<dyn Any + Send>>;

struct HostInstance {
    object_id: InstanceId,
    value: SharedInstance,
}

#[derive(Default)]
struct Instances {
    by_host_id: FxHashMap<u64, HostInstance>,
    by_object: FxHashMap<InstanceId, u64>,
}

/// Registered host classes and their live instances.
pub(crate) struct ClassRegistry {
    classes: Mutex<Vec<Box<ClassData>>>,
    instances: Mutex<Instances>,
    next_id: AtomicU64,
}

impl ClassRegistry {
    pub(crate) fn new() -> Self {
        ClassRegistry {
            classes: Mutex::new(Vec::new()),
            instances: Mutex::new(Instances::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn insert(&self, object_id: InstanceId, value: SharedInstance) -> u64 {
        let host_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        instances.by_host_id.insert(host_id, HostInstance { object_id, value });
        instances.by_object.insert(object_id, host_id);
        host_id
    }

    fn remove(&self, host_id: u64) -> Option<SharedInstance> {
        let mut instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        let instance = instances.by_host_id.remove(&host_id)?;
        instances.by_object.remove(&instance.object_id);
        Some(instance.value)
    }

    fn by_host_id(&self, host_id: u64) -> Option<SharedInstance> {
        let instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        instances.by_host_id.get(&host_id).map(|i| Arc::clone(&i.value))
    }

    fn by_object(&self, object_id: InstanceId) -> Option<SharedInstance> {
        let instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        let host_id = instances.by_object.get(&object_id)?;
        instances.by_host_id.get(host_id).map(|i| Arc::clone(&i.value))
    }

    /// Number of live host instances.
    pub(crate) fn live_instances(&self) -> usize {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_host_id
            .len()
    }

    /// Unregisters every class, most recent first.
    pub(crate) fn unregister_all(&self, runtime: &Runtime) {
        let classes = std::mem::take(&mut *self.classes.lock().unwrap_or_else(PoisonError::into_inner));
        for mut data in classes.into_iter().rev() {
            unsafe {
                (runtime.interface().classdb_unregister_extension_class)(
                    runtime.library(),
                    data.name.type_ptr(),
                );
                data.name.release(runtime);
                data.parent_name.release(runtime);
            }
            debug!("unregistered class {}", data.class);
        }

        let leftover = self.live_instances();
        if leftover > 0 {
            warn!("{} host instances outlived their classes", leftover);
        }
    }
}

impl fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("instances", &self.live_instances())
            .finish_non_exhaustive()
    }
}

/// Registers `T` with the engine through the active runtime.
pub fn register_class<T: HostClass>() -> Result<()> {
    let runtime = runtime::get()?;
    register_class_with::<T>(&runtime)
}

/// Registers `T` with the engine.
///
/// # Errors
///
/// - [`Error::ClassAlreadyRegistered`] if a host class of the same name
///   exists.
/// - [`Error::ClassNotFound`] if the parent class does not exist.
/// - [`Error::InvalidName`] for names that are not plain ASCII.
pub fn register_class_with<T: HostClass>(runtime: &Runtime) -> Result<()> {
    // Held until the class is recorded, so concurrent registrations of the
    // same name cannot both pass the check.
    let mut classes = runtime
        .classes
        .classes
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if classes.iter().any(|data| data.class == T::NAME) {
        return Err(Error::ClassAlreadyRegistered { class: T::NAME });
    }
    if T::NAME.is_empty() || !T::NAME.is_ascii() || T::NAME.contains('\0') {
        return Err(Error::InvalidName {
            name: T::NAME.to_owned(),
        });
    }
    runtime.class_tag(T::PARENT)?;

    let data = Box::new(ClassData {
        class: T::NAME,
        parent: T::PARENT,
        type_id: TypeId::of::<T>(),
        name: StringName::new_raw(runtime, T::NAME),
        parent_name: StringName::new_raw(runtime, T::PARENT),
    });
    let info = ClassCreationInfo {
        is_virtual: sys::FALSE,
        is_abstract: sys::FALSE,
        is_exposed: sys::TRUE,
        create_instance_func: Some(create_instance::<T>),
        free_instance_func: Some(free_instance::<T>),
        get_virtual_call_data_func: Some(get_virtual_call_data::<T>),
        call_virtual_with_data_func: Some(call_virtual_with_data::<T>),
        class_userdata: (&*data as *const ClassData).cast_mut().cast(),
    };
    unsafe {
        (runtime.interface().classdb_register_extension_class)(
            runtime.library(),
            data.name.type_ptr(),
            data.parent_name.type_ptr(),
            &info,
        )
    };

    classes.push(data);
    drop(classes);
    info!("registered class {} extends {}", T::NAME, T::PARENT);
    Ok(())
}

/// Runs `f` on the host value attached to `object`.
///
/// # Errors
///
/// - [`Error::ClassMismatch`] if `object` carries no `T` instance.
/// - [`Error::InstanceBusy`] if the instance is already being accessed,
///   for example from inside one of its own virtual calls.
pub fn with_instance<T: HostClass, R>(
    runtime: &Runtime,
    object: &Object,
    f: impl FnOnce(&mut T) -> R,
) -> Result<R> {
    let shared = runtime
        .classes
        .by_object(object.instance_id(runtime))
        .ok_or(Error::ClassMismatch { expected: T::NAME })?;
    let mut guard = match shared.try_lock() {
        Ok(guard) => guard,
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        Err(TryLockError::WouldBlock) => return Err(Error::InstanceBusy { class: T::NAME }),
    };
    let value = guard
        .downcast_mut::<T>()
        .ok_or(Error::ClassMismatch { expected: T::NAME })?;
    Ok(f(value))
}

/// Number of host instances currently attached to engine objects.
pub fn live_instances(runtime: &Runtime) -> usize {
    runtime.classes.live_instances()
}

pub(crate) fn guarded<R>(what: &str, class: &str, f: impl FnOnce() -> R) -> Option<R> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic".to_owned());
            error!("panic in {} of {}: {}", what, class, message);
            None
        }
    }
}

unsafe extern "C" fn create_instance<T: HostClass>(userdata: *mut c_void) -> ObjectPtr {
    let mut parent: ObjectPtr = std::ptr::null_mut();
    let created = guarded("create_instance", T::NAME, || -> Result<ObjectPtr> {
        let runtime = runtime::get()?;
        let data = unsafe { &*userdata.cast::<ClassData>() };
        debug_assert_eq!(data.type_id, TypeId::of::<T>());

        let object = construct(&runtime, data.parent)?;
        parent = object;
        let base = unsafe { ObjectRef::<Object>::from_ptr(&runtime, object)? };
        let object_id = base.instance_id();
        let value: SharedInstance = Arc::new(Mutex::new(T::create(base)));
        let host_id = runtime.classes.insert(object_id, value);
        unsafe { set_instance(&runtime, object, data.class, host_id) };
        trace!("created {} instance {} on object {}", T::NAME, host_id, object_id);
        Ok(object)
    });
    match created {
        Some(Ok(object)) => return object,
        Some(Err(err)) => error!("cannot create instance of {}: {}", T::NAME, err),
        None => {}
    }
    // The parent object has no host instance attached; nobody else can free it.
    if !parent.is_null() {
        if let Ok(runtime) = runtime::get() {
            unsafe { (runtime.interface().object_destroy)(parent) };
            debug!("destroyed orphaned {} base {:p}", T::NAME, parent);
        }
    }
    std::ptr::null_mut()
}

unsafe extern "C" fn free_instance<T: HostClass>(
    _userdata: *mut c_void,
    instance: ClassInstancePtr,
) {
    let host_id = instance as u64;
    guarded("free_instance", T::NAME, || {
        let Ok(runtime) = runtime::get() else {
            error!("{} instance {} freed after runtime shutdown", T::NAME, host_id);
            return;
        };
        match runtime.classes.remove(host_id) {
            Some(value) => {
                drop(value);
                trace!("freed {} instance {}", T::NAME, host_id);
            }
            None => warn!("free of unknown {} instance {}", T::NAME, host_id),
        }
    });
}

unsafe extern "C" fn get_virtual_call_data<T: HostClass>(
    _userdata: *mut c_void,
    name: ConstStringNamePtr,
) -> *mut c_void {
    let found = guarded("get_virtual_call_data", T::NAME, || {
        let runtime = runtime::get().ok()?;
        let name = unsafe { &*name.cast::<StringName>() };
        let name = name.to_rust(&runtime).ok()?;
        T::VIRTUALS.iter().position(|v| v.name == name)
    });
    match found.flatten() {
        // Index + 1, so entry 0 is not mistaken for "no virtual".
        Some(index) => (index + 1) as *mut c_void,
        None => std::ptr::null_mut(),
    }
}

unsafe extern "C" fn call_virtual_with_data<T: HostClass>(
    instance: ClassInstancePtr,
    _name: ConstStringNamePtr,
    userdata: *mut c_void,
    args: *const ConstTypePtr,
    ret: TypePtr,
) {
    let host_id = instance as u64;
    let Some(entry) = (userdata as usize)
        .checked_sub(1)
        .and_then(|index| T::VIRTUALS.get(index))
    else {
        error!("virtual call on {} with unknown data {:p}", T::NAME, userdata);
        return;
    };

    guarded(entry.name, T::NAME, || {
        let Ok(runtime) = runtime::get() else {
            error!("virtual {} called after runtime shutdown", entry.name);
            return;
        };
        let Some(shared) = runtime.classes.by_host_id(host_id) else {
            error!("virtual {} on unknown {} instance {}", entry.name, T::NAME, host_id);
            return;
        };
        let mut guard = match shared.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                error!("re-entrant virtual {} on {} instance {}", entry.name, T::NAME, host_id);
                return;
            }
        };
        let Some(value) = guard.downcast_mut::<T>() else {
            error!("{} instance {} has the wrong host type", T::NAME, host_id);
            return;
        };

        let args = VirtualArgs {
            runtime: &runtime,
            args,
            arity: entry.arity,
        };
        let mut ret = VirtualReturn {
            runtime: &runtime,
            ret,
        };
        (entry.call)(value, &args, &mut ret);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    struct Counter {
        base: ObjectRef<Object>,
        ticks: i64,
        label: String,
    }

    impl Counter {
        fn tick(&mut self, args: &VirtualArgs<'_>, ret: &mut VirtualReturn<'_>) {
            let step: i64 = args.get(0).unwrap_or(0);
            self.ticks += step;
            ret.set(self.ticks);
        }

        fn rename(&mut self, args: &VirtualArgs<'_>, _ret: &mut VirtualReturn<'_>) {
            if let Ok(label) = args.string(0) {
                self.label = label;
            }
        }
    }

    impl HostClass for Counter {
        const NAME: &'static str = "UnitCounter";
        const PARENT: &'static str = "Node";
        const VIRTUALS: &'static [Virtual<Self>] = &[
            Virtual::new("_tick", 1, Counter::tick),
            Virtual::new("_rename", 1, Counter::rename),
        ];

        fn create(base: ObjectRef<Object>) -> Self {
            Counter {
                base,
                ticks: 0,
                label: String::new(),
            }
        }
    }

    static DOOMED_BASE: AtomicU64 = AtomicU64::new(0);

    /// A host class whose factory always panics.
    struct Doomed;

    impl HostClass for Doomed {
        const NAME: &'static str = "UnitDoomed";
        const PARENT: &'static str = "Node";
        const VIRTUALS: &'static [Virtual<Self>] = &[];

        fn create(base: ObjectRef<Object>) -> Self {
            DOOMED_BASE.store(base.instance_id(), Ordering::SeqCst);
            panic!("refusing to create");
        }
    }

    struct Racer;

    impl HostClass for Racer {
        const NAME: &'static str = "UnitRacer";
        const PARENT: &'static str = "Object";
        const VIRTUALS: &'static [Virtual<Self>] = &[];

        fn create(_base: ObjectRef<Object>) -> Self {
            Racer
        }
    }

    #[test]
    fn test_panicking_factory_destroys_the_base_object() {
        let runtime = test_support::runtime();
        register_class_with::<Doomed>(&runtime).unwrap();

        assert!(construct(&runtime, "UnitDoomed").is_err());
        let base = DOOMED_BASE.load(Ordering::SeqCst);
        assert_ne!(base, 0);
        assert!(!gdbridge_headless::is_alive(base));
        assert_eq!(gdbridge_headless::destroy_count(base), 1);
        assert!(runtime.classes.by_object(base).is_none());
    }

    #[test]
    fn test_concurrent_registration_admits_one() {
        let runtime = test_support::runtime();
        let results: Vec<Result<()>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| register_class_with::<Racer>(&runtime)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().all(|r| match r {
            Ok(()) => true,
            Err(err) => *err == Error::ClassAlreadyRegistered { class: "UnitRacer" },
        }));
    }

    #[test]
    fn test_construct_unknown_class() {
        let runtime = test_support::runtime();
        assert_eq!(
            construct(&runtime, "NoSuchClass"),
            Err(Error::ClassNotFound {
                class: "NoSuchClass".into()
            })
        );
    }

    #[test]
    fn test_host_class_lifecycle() {
        let runtime = test_support::runtime();
        register_class_with::<Counter>(&runtime).unwrap();
        assert_eq!(
            register_class_with::<Counter>(&runtime),
            Err(Error::ClassAlreadyRegistered {
                class: "UnitCounter"
            })
        );

        let ptr = construct(&runtime, "UnitCounter").unwrap();
        let object = unsafe { Object::from_ptr(ptr) }.unwrap();
        let id = object.instance_id(&runtime);

        let step = 5i64;
        let returned: i64 =
            gdbridge_headless::call_virtual(id, "_tick", &[(&step as *const i64).cast()]).unwrap();
        assert_eq!(returned, 5);

        let ticks = with_instance::<Counter, _>(&runtime, &object, |c| {
            assert_eq!(c.base.instance_id(), id);
            c.ticks
        });
        assert_eq!(ticks, Ok(5));
        assert!(gdbridge_headless::call_virtual::<()>(id, "_missing", &[]).is_none());

        let word = gdbridge_headless::new_string("renamed");
        gdbridge_headless::call_virtual::<()>(id, "_rename", &[(&word as *const u64).cast()])
            .unwrap();
        gdbridge_headless::free_string(word);
        let label = with_instance::<Counter, _>(&runtime, &object, |c| c.label.clone());
        assert_eq!(label.as_deref(), Ok("renamed"));

        unsafe { (runtime.interface().object_destroy)(ptr) };
        assert!(!gdbridge_headless::is_alive(id));
        assert!(runtime.classes.by_object(id).is_none());
    }
}
