//! Objects, the class database and method binds.
//!
//! Engine classes ship with a small static method table. `Fixture` is a
//! fixture class whose methods cover every argument width and the ownership
//! contracts of returned objects.

use crate::calls::{self, VarargFn};
use crate::engine::{Engine, Extension, ObjectData, object_id, object_ptr, read_token, with_engine, write_token};
use crate::kinds::{STRING, STRING_NAME};
use gdbridge_log::{debug, error, info, trace, warn};
use std::ffi::c_void;

/// Pointer arguments and return slot of one ptrcall.
pub(crate) struct Call {
    object: u64,
    args: *const *const c_void,
    ret: *mut c_void,
}

impl Call {
    unsafe fn arg<T: Copy>(&self, index: usize) -> T {
        unsafe { (*self.args.add(index)).cast::<T>().read() }
    }

    unsafe fn ret<T>(&self, value: T) {
        unsafe { self.ret.cast::<T>().write(value) }
    }
}

/// How a method body receives its arguments.
#[derive(Clone, Copy)]
pub(crate) enum Invoke {
    /// Native arguments through `object_method_bind_ptrcall`.
    Ptr(unsafe fn(&Call)),
    /// Variant arguments through `object_method_bind_call`; any count.
    Vararg(VarargFn),
}

pub(crate) struct MethodDef {
    pub class: &'static str,
    pub name: &'static str,
    hash: i64,
    pub invoke: Invoke,
}

const REFCOUNT_BOOL_HASH: i64 = 2240911060;
const INT_GETTER_HASH: i64 = 3905245786;
const OBJECT_CALL_HASH: i64 = 3400424181;
const EMIT_SIGNAL_HASH: i64 = 4047867050;

/// Hashes of the `Fixture` class methods.
pub mod fixture {
    /// `mix_N` has hash `MIX_BASE + N`.
    pub const MIX_BASE: i64 = 7000;
    pub const ECHO_STRING: i64 = 7100;
    pub const FAIL_WITH: i64 = 7101;
    pub const CREATE_CHILD: i64 = 7102;
    pub const MAKE_RESOURCE: i64 = 7103;
    /// Vararg: sums int and float arguments into a float.
    pub const SUM_ALL: i64 = 7104;
}

/// Applies `f` to the refcount of the target, if it has one.
fn with_refcount<R: Default>(call: &Call, what: &str, f: impl FnOnce(&mut i64) -> R) -> R {
    with_engine(|engine| match engine.objects.get_mut(&call.object) {
        Some(ObjectData {
            refcount: Some(count),
            ..
        }) => f(count),
        _ => {
            error!("{} on object {} that is not refcounted", what, call.object);
            R::default()
        }
    })
}

unsafe fn init_ref(call: &Call) {
    let done = with_refcount(call, "init_ref", |count| {
        *count = 1;
        true
    });
    unsafe { call.ret(u8::from(done)) };
}

unsafe fn reference(call: &Call) {
    let done = with_refcount(call, "reference", |count| {
        *count += 1;
        true
    });
    unsafe { call.ret(u8::from(done)) };
}

unsafe fn unreference(call: &Call) {
    let object = call.object;
    let zero = with_refcount(call, "unreference", |count| {
        if *count <= 0 {
            panic!("unreference of object {object} at count {count}");
        }
        *count -= 1;
        *count == 0
    });
    unsafe { call.ret(u8::from(zero)) };
}

unsafe fn get_reference_count(call: &Call) {
    let count = with_refcount(call, "get_reference_count", |count| *count);
    unsafe { call.ret(count) };
}

/// Argument `i` of `mix_N` is an int, float, bool or Vector3, by `i % 4`.
unsafe fn mix<const N: usize>(call: &Call) {
    let mut sum = 0.0f64;
    for i in 0..N {
        sum += unsafe {
            match i % 4 {
                0 => call.arg::<i64>(i) as f64,
                1 => call.arg::<f64>(i),
                2 => f64::from(call.arg::<u8>(i)),
                _ => call.arg::<[f32; 3]>(i).iter().map(|&c| f64::from(c)).sum(),
            }
        };
    }
    unsafe { call.ret(sum) };
}

unsafe fn echo_string(call: &Call) {
    let [source, _] = unsafe { read_token(STRING, (*call.args).cast()) };
    let [previous, _] = unsafe { read_token(STRING, call.ret.cast_const().cast()) };
    let copy = with_engine(|engine| {
        engine.release_string(previous);
        let text = engine.string_text(source).to_owned();
        engine.new_string(text)
    });
    unsafe { write_token(STRING, call.ret.cast(), [copy, 0]) };
}

unsafe fn fail_with(call: &Call) {
    let code: i64 = unsafe { call.arg(0) };
    unsafe { call.ret(code) };
}

unsafe fn create_child(call: &Call) {
    let child = with_engine(|engine| engine.new_object("Node"));
    unsafe { call.ret(object_ptr(child)) };
}

unsafe fn make_resource(call: &Call) {
    let resource = with_engine(|engine| {
        let id = engine.new_object("Resource");
        if let Some(object) = engine.objects.get_mut(&id) {
            object.refcount = Some(1);
        }
        id
    });
    unsafe { call.ret(object_ptr(resource)) };
}

macro_rules! mix_methods {
    ($($n:literal)*) => {
        [$(MethodDef {
            class: "Fixture",
            name: concat!("mix_", $n),
            hash: fixture::MIX_BASE + $n,
            invoke: Invoke::Ptr(mix::<$n>),
        },)*]
    };
}

static METHODS: [MethodDef; 11] = [
    MethodDef { class: "RefCounted", name: "init_ref", hash: REFCOUNT_BOOL_HASH, invoke: Invoke::Ptr(init_ref) },
    MethodDef { class: "RefCounted", name: "reference", hash: REFCOUNT_BOOL_HASH, invoke: Invoke::Ptr(reference) },
    MethodDef { class: "RefCounted", name: "unreference", hash: REFCOUNT_BOOL_HASH, invoke: Invoke::Ptr(unreference) },
    MethodDef {
        class: "RefCounted",
        name: "get_reference_count",
        hash: INT_GETTER_HASH,
        invoke: Invoke::Ptr(get_reference_count),
    },
    MethodDef { class: "Fixture", name: "echo_string", hash: fixture::ECHO_STRING, invoke: Invoke::Ptr(echo_string) },
    MethodDef { class: "Fixture", name: "fail_with", hash: fixture::FAIL_WITH, invoke: Invoke::Ptr(fail_with) },
    MethodDef { class: "Fixture", name: "create_child", hash: fixture::CREATE_CHILD, invoke: Invoke::Ptr(create_child) },
    MethodDef { class: "Fixture", name: "make_resource", hash: fixture::MAKE_RESOURCE, invoke: Invoke::Ptr(make_resource) },
    MethodDef { class: "Object", name: "call", hash: OBJECT_CALL_HASH, invoke: Invoke::Vararg(calls::object_call) },
    MethodDef {
        class: "Object",
        name: "emit_signal",
        hash: EMIT_SIGNAL_HASH,
        invoke: Invoke::Vararg(calls::emit_signal),
    },
    MethodDef { class: "Fixture", name: "sum_all", hash: fixture::SUM_ALL, invoke: Invoke::Vararg(calls::sum_all) },
];

static MIX_METHODS: [MethodDef; 14] = mix_methods!(0 1 2 3 4 5 6 7 8 9 10 11 12 13);

/// Finds `name` on `class` or its nearest ancestor; any hash when `hash` is `None`.
pub(crate) fn find_method(engine: &Engine, class: &str, name: &str, hash: Option<i64>) -> Option<&'static MethodDef> {
    engine.class_chain(class).iter().find_map(|class| {
        METHODS.iter().chain(&MIX_METHODS).find(|def| {
            def.class == class.as_str() && def.name == name && hash.is_none_or(|hash| def.hash == hash)
        })
    })
}

unsafe fn name_arg(name: *const c_void) -> u64 {
    if name.is_null() {
        return 0;
    }
    (unsafe { read_token(STRING_NAME, name.cast()) })[0]
}

pub(crate) unsafe extern "C" fn object_method_bind_ptrcall(
    bind: *const c_void,
    object: *mut c_void,
    args: *const *const c_void,
    ret: *mut c_void,
) {
    let method = unsafe { &*bind.cast::<MethodDef>() };
    trace!("ptrcall {}::{}", method.class, method.name);
    let Invoke::Ptr(body) = method.invoke else {
        error!("ptrcall of vararg method {}::{}", method.class, method.name);
        return;
    };
    let call = Call {
        object: object_id(object),
        args,
        ret,
    };
    unsafe { body(&call) };
}

pub(crate) unsafe extern "C" fn object_destroy(object: *mut c_void) {
    if object.is_null() {
        error!("object_destroy on null");
        return;
    }
    with_engine(|engine| engine.destroy_object(object_id(object)));
}

pub(crate) unsafe extern "C" fn global_get_singleton(name: *const c_void) -> *mut c_void {
    let name = unsafe { name_arg(name) };
    with_engine(|engine| {
        let text = engine.name_text(name);
        match engine.singletons.get(text) {
            Some(&id) => object_ptr(id),
            None => std::ptr::null_mut(),
        }
    })
}

pub(crate) unsafe extern "C" fn object_set_instance(object: *mut c_void, class: *const c_void, instance: *mut c_void) {
    let class = unsafe { name_arg(class) };
    let id = object_id(object);
    with_engine(|engine| {
        let class = engine.name_text(class).to_owned();
        let Some(data) = engine.objects.get_mut(&id) else {
            error!("instance attached to dead object {}", id);
            return;
        };
        data.class = class;
        data.instance = Some(instance as usize);
    });
}

pub(crate) unsafe extern "C" fn object_cast_to(object: *const c_void, tag: *mut c_void) -> *mut c_void {
    if object.is_null() || tag.is_null() {
        return std::ptr::null_mut();
    }
    let id = object_id(object);
    with_engine(|engine| {
        let Some(data) = engine.objects.get(&id) else {
            return std::ptr::null_mut();
        };
        let matches = engine
            .class_chain(&data.class)
            .iter()
            .any(|class| engine.classes.get(class).is_some_and(|info| info.tag == tag as usize));
        if matches { object_ptr(id) } else { std::ptr::null_mut() }
    })
}

pub(crate) unsafe extern "C" fn object_get_instance_from_id(id: u64) -> *mut c_void {
    with_engine(|engine| {
        if engine.objects.contains_key(&id) {
            object_ptr(id)
        } else {
            std::ptr::null_mut()
        }
    })
}

pub(crate) unsafe extern "C" fn object_get_instance_id(object: *const c_void) -> u64 {
    object_id(object)
}

pub(crate) unsafe extern "C" fn classdb_construct_object(class: *const c_void) -> *mut c_void {
    let class = unsafe { name_arg(class) };
    enum Plan {
        Host(unsafe extern "C" fn(*mut c_void) -> *mut c_void, usize),
        Native(u64),
        Unknown,
    }
    let plan = with_engine(|engine| {
        let text = engine.name_text(class).to_owned();
        match engine.classes.get(&text).map(|info| info.extension) {
            Some(Some(Extension {
                create: Some(create),
                userdata,
                ..
            })) => Plan::Host(create, userdata),
            Some(Some(_)) => Plan::Unknown,
            Some(None) => Plan::Native(engine.new_object(&text)),
            None => Plan::Unknown,
        }
    });
    match plan {
        Plan::Host(create, userdata) => unsafe { create(userdata as *mut c_void) },
        Plan::Native(id) => object_ptr(id),
        Plan::Unknown => std::ptr::null_mut(),
    }
}

pub(crate) unsafe extern "C" fn classdb_get_method_bind(
    class: *const c_void,
    method: *const c_void,
    hash: i64,
) -> *const c_void {
    let (class, method) = unsafe { (name_arg(class), name_arg(method)) };
    with_engine(|engine| {
        let method = engine.name_text(method);
        match find_method(engine, engine.name_text(class), method, Some(hash)) {
            Some(def) => (def as *const MethodDef).cast(),
            None => {
                debug!("no method bind {}::{} with hash {}", engine.name_text(class), method, hash);
                std::ptr::null()
            }
        }
    })
}

pub(crate) unsafe extern "C" fn classdb_get_class_tag(class: *const c_void) -> *mut c_void {
    let class = unsafe { name_arg(class) };
    with_engine(|engine| {
        let text = engine.name_text(class);
        engine
            .classes
            .get(text)
            .map_or(std::ptr::null_mut(), |info| info.tag as *mut c_void)
    })
}

/// Mirror of the engine's class creation block.
#[repr(C)]
pub(crate) struct ClassCreationInfo {
    is_virtual: u8,
    is_abstract: u8,
    is_exposed: u8,
    create_instance_func: Option<crate::engine::CreateFn>,
    free_instance_func: Option<crate::engine::FreeFn>,
    get_virtual_call_data_func: Option<crate::engine::GetVirtualFn>,
    call_virtual_with_data_func: Option<crate::engine::CallVirtualFn>,
    class_userdata: *mut c_void,
}

pub(crate) unsafe extern "C" fn classdb_register_extension_class(
    _library: *mut c_void,
    class: *const c_void,
    parent: *const c_void,
    info: *const ClassCreationInfo,
) {
    let (class, parent) = unsafe { (name_arg(class), name_arg(parent)) };
    let info = unsafe { &*info };
    with_engine(|engine| {
        let class = engine.name_text(class).to_owned();
        let parent = engine.name_text(parent).to_owned();
        if !engine.classes.contains_key(&parent) {
            error!("cannot register {}: unknown parent {}", class, parent);
            return;
        }
        if engine.classes.contains_key(&class) {
            warn!("class {} registered twice", class);
            return;
        }
        let extension = Extension {
            create: info.create_instance_func,
            free: info.free_instance_func,
            get_virtual: info.get_virtual_call_data_func,
            call_virtual: info.call_virtual_with_data_func,
            userdata: info.class_userdata as usize,
        };
        engine.add_class(&class, Some(&parent), Some(extension));
        info!("engine registered extension class {} extends {}", class, parent);
    });
}

pub(crate) unsafe extern "C" fn classdb_unregister_extension_class(_library: *mut c_void, class: *const c_void) {
    let class = unsafe { name_arg(class) };
    with_engine(|engine| {
        let class = engine.name_text(class).to_owned();
        match engine.classes.get(&class) {
            Some(info) if info.extension.is_some() => {
                engine.classes.remove(&class);
                debug!("engine unregistered class {}", class);
            }
            _ => warn!("unregister of unknown extension class {}", class),
        }
    });
}

/// Calls virtual `name` on the host instance of `object`.
///
/// Returns `None` when the object has no host instance or the class does not
/// implement the virtual. `R` is read from the return slot, which starts
/// zeroed and is 64 bytes wide.
pub fn call_virtual<R: Copy>(object: u64, name: &str, args: &[*const c_void]) -> Option<R> {
    if std::mem::size_of::<R>() > 64 {
        return None;
    }
    let (name_id, target) = with_engine(|engine| {
        let name_id = engine.intern(name);
        let target = engine.objects.get(&object).and_then(|data| {
            let instance = data.instance?;
            let extension = engine.classes.get(&data.class)?.extension?;
            Some((instance, extension))
        });
        (name_id, target)
    });

    let result = target.and_then(|(instance, extension)| {
        let get_virtual = extension.get_virtual?;
        let call = extension.call_virtual?;
        let name_ptr = (&name_id as *const u64).cast::<c_void>();
        let data = unsafe { get_virtual(extension.userdata as *mut c_void, name_ptr) };
        if data.is_null() {
            return None;
        }
        let mut ret = [0u64; 8];
        unsafe {
            call(
                instance as *mut c_void,
                name_ptr,
                data,
                args.as_ptr(),
                ret.as_mut_ptr().cast(),
            );
            Some(ret.as_ptr().cast::<R>().read_unaligned())
        }
    });

    with_engine(|engine| engine.release_name(name_id));
    result
}
