//! `Callable` and `Signal`: an (object, name) pair naming a method or a
//! signal on a live object.
//!
//! A `Callable` can also wrap a host closure through
//! [`Callable::from_fn`]; the engine owns the closure from then on and
//! frees it with its last copy.

use super::{Builtin, StringName, builtin_handle};
use crate::classdb::guarded;
use crate::error::{Result, call_status, check_call};
use crate::frame::{BuiltinFrame, Param, Signature};
use crate::lifetime::{Lifetime, Local};
use crate::object::Class;
use crate::ownership::Owned;
use crate::resolver::BuiltinSpec;
use crate::runtime::{self, Runtime};
use crate::sys::{self, ConstTypePtr, ConstVariantPtr, InstanceId, ObjectPtr, VariantPtr};
use crate::variant::{Encode, Value, Variant, VariantType};
use gdbridge_log::{trace, warn};
use std::ffi::c_void;

/// Constructor taking `(Object, StringName)`, shared by both kinds.
const FROM_OBJECT_AND_NAME: i32 = 2;

builtin_handle!(
    /// A bound method reference.
    Callable,
    Callable,
    2
);

builtin_handle!(
    /// A named signal of an object.
    Signal,
    Signal,
    2
);

const NAME_SIGNATURE: Signature =
    Signature::new(&[], Some(Param::Typed(VariantType::StringName)));
const OBJECT_ID_SIGNATURE: Signature = Signature::new(&[], Some(Param::Typed(VariantType::Int)));

static CALLABLE_GET_METHOD: BuiltinSpec =
    BuiltinSpec::new(VariantType::Callable, "get_method", 1825232092, NAME_SIGNATURE);
static CALLABLE_GET_OBJECT_ID: BuiltinSpec = BuiltinSpec::new(
    VariantType::Callable,
    "get_object_id",
    3905245786,
    OBJECT_ID_SIGNATURE,
);
static SIGNAL_GET_NAME: BuiltinSpec =
    BuiltinSpec::new(VariantType::Signal, "get_name", 1825232092, NAME_SIGNATURE);
static SIGNAL_GET_OBJECT_ID: BuiltinSpec = BuiltinSpec::new(
    VariantType::Signal,
    "get_object_id",
    3905245786,
    OBJECT_ID_SIGNATURE,
);

/// Builds either kind from an object and a name.
fn bind_to<'l, T: Builtin>(
    lifetime: &'l Lifetime,
    object: &impl Class,
    name: &str,
) -> Result<Local<'l, T>> {
    let runtime = lifetime.runtime();
    let ctor = runtime.ptr_constructor(T::TYPE, FROM_OBJECT_AND_NAME)?;
    let target: ObjectPtr = object.object_ptr();
    let name = StringName::scoped(runtime, name);
    let args: [ConstTypePtr; 2] = [(&target as *const ObjectPtr).cast(), name.as_ptr()];
    let mut out = T::empty();
    unsafe { ctor(out.type_ptr_mut(), args.as_ptr()) };
    lifetime.register(out)
}

fn read_name<T: Builtin>(runtime: &Runtime, spec: &'static BuiltinSpec, value: &T) -> Result<String> {
    let frame = BuiltinFrame::<0>::open(runtime.resolve_builtin(spec)?)?;
    let name: Owned<StringName> = unsafe { frame.invoke_on(value.type_ptr().cast_mut())? };
    name.to_rust(runtime)
}

fn read_object_id<T: Builtin>(
    runtime: &Runtime,
    spec: &'static BuiltinSpec,
    value: &T,
) -> Result<InstanceId> {
    let frame = BuiltinFrame::<0>::open(runtime.resolve_builtin(spec)?)?;
    unsafe { frame.invoke_on(value.type_ptr().cast_mut()) }
}

impl Callable {
    /// A callable for `method` on `object`, in `lifetime`.
    pub fn new<'l>(
        lifetime: &'l Lifetime,
        object: &impl Class,
        method: &str,
    ) -> Result<Local<'l, Callable>> {
        bind_to(lifetime, object, method)
    }

    pub fn method_name(&self, runtime: &Runtime) -> Result<String> {
        read_name(runtime, &CALLABLE_GET_METHOD, self)
    }

    /// Instance id of the target object.
    pub fn object_id(&self, runtime: &Runtime) -> Result<InstanceId> {
        read_object_id(runtime, &CALLABLE_GET_OBJECT_ID, self)
    }

    /// A callable that runs `f` whenever the engine calls it.
    ///
    /// `f` gets a scratch lifetime for the duration of the call. An `Err`
    /// is reported to the caller through the engine's call status, as is a
    /// panic, which is caught at the boundary.
    pub fn from_fn<'l, F>(lifetime: &'l Lifetime, f: F) -> Result<Local<'l, Callable>>
    where
        F: Fn(&Lifetime, &[&Variant]) -> Result<Value> + Send + Sync + 'static,
    {
        let runtime = lifetime.runtime();
        let mut info = sys::CallableCustomInfo {
            callable_userdata: Box::into_raw(Box::new(f)).cast(),
            token: runtime.library(),
            object_id: 0,
            call_func: Some(call_custom::<F>),
            is_valid_func: None,
            free_func: Some(free_custom::<F>),
            hash_func: None,
            equal_func: None,
            less_than_func: None,
            to_string_func: None,
        };
        let mut out = Callable::empty();
        unsafe { (runtime.interface().callable_custom_create)(out.type_ptr_mut(), &mut info) };
        lifetime.register(out)
    }

    /// Calls the target with `args`, returning its result in `lifetime`.
    ///
    /// # Errors
    ///
    /// [`Error::CallFailed`](crate::Error::CallFailed) when the engine or
    /// the wrapped closure rejects the call.
    pub fn call<'l>(&self, lifetime: &'l Lifetime, args: &[&Variant]) -> Result<Local<'l, Variant>> {
        let runtime = lifetime.runtime();
        let target = self.encode(lifetime)?;
        let method = StringName::scoped(runtime, "call");
        let mut ret = Variant::empty();
        let mut status = sys::CallError::default();
        unsafe {
            (runtime.interface().variant_call)(
                target.type_ptr().cast_mut(),
                method.as_ptr(),
                args.as_ptr().cast::<ConstVariantPtr>(),
                args.len() as sys::Int,
                ret.type_ptr_mut(),
                &mut status,
            )
        };
        let ret = lifetime.register(ret)?;
        check_call("Callable", "call", status)?;
        Ok(ret)
    }
}

unsafe extern "C" fn call_custom<F>(
    userdata: *mut c_void,
    args: *const ConstVariantPtr,
    count: sys::Int,
    ret: VariantPtr,
    status: *mut sys::CallError,
) where
    F: Fn(&Lifetime, &[&Variant]) -> Result<Value> + Send + Sync + 'static,
{
    let f = unsafe { &*userdata.cast::<F>() };
    let outcome = guarded("call", "Callable", || -> Result<()> {
        let runtime = runtime::get()?;
        let lifetime = Lifetime::with_runtime(runtime.clone());
        let args: &[&Variant] = if count <= 0 || args.is_null() {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(args.cast::<&Variant>(), count as usize) }
        };
        let value = f(&lifetime, args)?;
        let encoded = value.encode(&lifetime)?;
        unsafe { (runtime.interface().variant_new_copy)(ret, encoded.type_ptr()) };
        Ok(())
    });
    let report = match outcome {
        Some(Ok(())) => sys::CallError::default(),
        Some(Err(err)) => {
            warn!("custom callable failed: {}", err);
            call_status(&err)
        }
        None => sys::CallError {
            error: sys::CALL_ERROR_INVALID_METHOD,
            ..Default::default()
        },
    };
    if !status.is_null() {
        unsafe { status.write(report) };
    }
}

unsafe extern "C" fn free_custom<F>(userdata: *mut c_void) {
    trace!("custom callable closure freed");
    drop(unsafe { Box::from_raw(userdata.cast::<F>()) });
}

impl Signal {
    /// The signal `name` of `object`, in `lifetime`.
    pub fn new<'l>(
        lifetime: &'l Lifetime,
        object: &impl Class,
        name: &str,
    ) -> Result<Local<'l, Signal>> {
        bind_to(lifetime, object, name)
    }

    pub fn name(&self, runtime: &Runtime) -> Result<String> {
        read_name(runtime, &SIGNAL_GET_NAME, self)
    }

    pub fn object_id(&self, runtime: &Runtime) -> Result<InstanceId> {
        read_object_id(runtime, &SIGNAL_GET_OBJECT_ID, self)
    }
}
