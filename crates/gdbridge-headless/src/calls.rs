//! Variant-argument calls: vararg method binds, `Variant::call` on callables,
//! utility functions and host-implemented callables.
//!
//! Vararg bodies run with the engine locked and see their arguments as
//! borrowed Variant slots. A custom callable's call function is host code, so
//! it always runs after the lock is released.

use crate::engine::{CallError, CustomCallFn, CustomCallable, CustomFreeFn, Engine, Slot, object_id, read_token, with_engine, write_token};
use crate::kinds::{CALLABLE, FLOAT, INT, STRING, STRING_NAME};
use crate::objects::{Invoke, MethodDef, find_method};
use crate::values::{read_slot, write_slot};
use gdbridge_log::{debug, error, trace, warn};
use std::ffi::{c_int, c_void};

pub const CALL_OK: i32 = 0;
pub const CALL_ERROR_INVALID_METHOD: i32 = 1;
pub const CALL_ERROR_INVALID_ARGUMENT: i32 = 2;
pub const CALL_ERROR_TOO_MANY_ARGUMENTS: i32 = 3;
pub const CALL_ERROR_TOO_FEW_ARGUMENTS: i32 = 4;
pub const CALL_ERROR_INSTANCE_IS_NULL: i32 = 5;

const NIL_SLOT: Slot = [0; 3];

impl CallError {
    pub(crate) const fn new(error: i32, argument: i32, expected: i32) -> Self {
        CallError {
            error,
            argument,
            expected,
        }
    }

    const fn invalid_method() -> Self {
        CallError::new(CALL_ERROR_INVALID_METHOD, 0, 0)
    }

    const fn too_few(expected: i32) -> Self {
        CallError::new(CALL_ERROR_TOO_FEW_ARGUMENTS, 0, expected)
    }
}

/// Body of a vararg method: `(engine, object id, borrowed arguments)`.
///
/// The returned slot is owned by the caller.
pub(crate) type VarargFn = fn(&mut Engine, u64, &[Slot]) -> Result<Slot, CallError>;

/// Text of a StringName or String argument.
fn name_of(engine: &Engine, slot: &Slot, index: usize) -> Result<String, CallError> {
    match slot[0] as u32 {
        STRING_NAME => Ok(engine.name_text(slot[1]).to_owned()),
        STRING => Ok(engine.string_text(slot[1]).to_owned()),
        _ => Err(CallError::new(CALL_ERROR_INVALID_ARGUMENT, index as i32, STRING_NAME as i32)),
    }
}

/// `Fixture.sum_all(...)`: the float sum of every int and float argument.
pub(crate) fn sum_all(_engine: &mut Engine, _object: u64, args: &[Slot]) -> Result<Slot, CallError> {
    let mut total = 0.0f64;
    for (index, arg) in args.iter().enumerate() {
        total += match arg[0] as u32 {
            INT => arg[1] as i64 as f64,
            FLOAT => f64::from_bits(arg[1]),
            _ => return Err(CallError::new(CALL_ERROR_INVALID_ARGUMENT, index as i32, FLOAT as i32)),
        };
    }
    Ok([u64::from(FLOAT), total.to_bits(), 0])
}

/// `Object.call(method, ...)`: forwards to a vararg method of the object.
pub(crate) fn object_call(engine: &mut Engine, object: u64, args: &[Slot]) -> Result<Slot, CallError> {
    let Some((first, rest)) = args.split_first() else {
        return Err(CallError::too_few(1));
    };
    let method = name_of(engine, first, 0)?;
    let body = vararg_body(engine, object, &method).ok_or(CallError::invalid_method())?;
    body(engine, object, rest)
}

/// `Object.emit_signal(signal, ...)`: records the emission.
pub(crate) fn emit_signal(engine: &mut Engine, object: u64, args: &[Slot]) -> Result<Slot, CallError> {
    let Some((first, rest)) = args.split_first() else {
        return Err(CallError::too_few(1));
    };
    let signal = name_of(engine, first, 0)?;
    debug!("object {} emitted {} with {} args", object, signal, rest.len());
    engine.emitted.push((object, signal, rest.len()));
    Ok([u64::from(INT), 0, 0])
}

/// The vararg body of `method` on the class of `object`.
fn vararg_body(engine: &Engine, object: u64, method: &str) -> Option<VarargFn> {
    let class = engine.objects.get(&object)?.class.clone();
    match find_method(engine, &class, method, None)?.invoke {
        Invoke::Vararg(body) => Some(body),
        Invoke::Ptr(_) => None,
    }
}

/// Borrowed copies of the argument slots.
unsafe fn read_args(args: *const *const c_void, count: i64) -> Vec<Slot> {
    let count = usize::try_from(count).unwrap_or(0);
    if args.is_null() {
        return Vec::new();
    }
    (0..count).map(|i| unsafe { read_slot(*args.add(i)) }).collect()
}

unsafe fn write_outcome(ret: *mut c_void, error: *mut CallError, outcome: Result<Slot, CallError>) {
    let (slot, status) = match outcome {
        Ok(slot) => (slot, CallError::default()),
        Err(status) => (NIL_SLOT, status),
    };
    unsafe {
        write_slot(ret, slot);
        if !error.is_null() {
            error.write(status);
        }
    }
}

pub(crate) unsafe extern "C" fn object_method_bind_call(
    bind: *const c_void,
    object: *mut c_void,
    args: *const *const c_void,
    count: i64,
    ret: *mut c_void,
    error: *mut CallError,
) {
    let method = unsafe { &*bind.cast::<MethodDef>() };
    trace!("vararg call {}::{} with {} args", method.class, method.name, count);
    let outcome = match method.invoke {
        _ if object.is_null() => Err(CallError::new(CALL_ERROR_INSTANCE_IS_NULL, 0, 0)),
        Invoke::Vararg(body) => {
            let args = unsafe { read_args(args, count) };
            with_engine(|engine| body(engine, object_id(object), &args))
        }
        Invoke::Ptr(_) => {
            // Fixed-arity bodies read native arguments only.
            warn!("{}::{} has no Variant call form", method.class, method.name);
            Err(CallError::invalid_method())
        }
    };
    unsafe { write_outcome(ret, error, outcome) };
}

/// What `variant_call` of `Callable.call` resolves to.
enum Target {
    Host(CustomCallFn, usize),
    Done(Result<Slot, CallError>),
}

pub(crate) unsafe extern "C" fn variant_call(
    target: *mut c_void,
    method: *const c_void,
    args: *const *const c_void,
    count: i64,
    ret: *mut c_void,
    error: *mut CallError,
) {
    let target = unsafe { read_slot(target) };
    let [method, _] = unsafe { read_token(STRING_NAME, method.cast()) };
    let plan = with_engine(|engine| {
        let method = engine.name_text(method);
        if target[0] as u32 != CALLABLE || method != "call" {
            warn!("no Variant method {} on kind {}", method, target[0]);
            return Target::Done(Err(CallError::invalid_method()));
        }
        let [object, name] = [target[1], target[2]];
        if let Some((call, userdata)) = engine.custom_callable(name) {
            return Target::Host(call, userdata);
        }
        if !engine.objects.contains_key(&object) {
            return Target::Done(Err(CallError::new(CALL_ERROR_INSTANCE_IS_NULL, 0, 0)));
        }
        let method = engine.name_text(name).to_owned();
        let outcome = match vararg_body(engine, object, &method) {
            Some(body) => {
                let args = unsafe { read_args(args, count) };
                body(engine, object, &args)
            }
            None => Err(CallError::invalid_method()),
        };
        Target::Done(outcome)
    });

    match plan {
        Target::Host(call, userdata) => unsafe {
            write_slot(ret, NIL_SLOT);
            let mut status = CallError::default();
            call(userdata as *mut c_void, args, count, ret, &mut status);
            if !error.is_null() {
                error.write(status);
            }
        },
        Target::Done(outcome) => unsafe { write_outcome(ret, error, outcome) },
    }
}

/// Mirror of the engine's custom callable block.
#[repr(C)]
pub(crate) struct CallableCustomInfo {
    callable_userdata: *mut c_void,
    token: *mut c_void,
    object_id: u64,
    call_func: Option<CustomCallFn>,
    is_valid_func: Option<unsafe extern "C" fn(*mut c_void) -> u8>,
    free_func: Option<CustomFreeFn>,
    hash_func: Option<unsafe extern "C" fn(*mut c_void) -> u32>,
    equal_func: Option<unsafe extern "C" fn(*mut c_void, *mut c_void) -> u8>,
    less_than_func: Option<unsafe extern "C" fn(*mut c_void, *mut c_void) -> u8>,
    to_string_func: Option<unsafe extern "C" fn(*mut c_void, *mut u8, *mut c_void)>,
}

pub(crate) unsafe extern "C" fn callable_custom_create(out: *mut c_void, info: *mut CallableCustomInfo) {
    let info = unsafe { &*info };
    let Some(call) = info.call_func else {
        error!("custom callable without a call function");
        unsafe { write_token(CALLABLE, out.cast(), [0, 0]) };
        return;
    };
    let id = with_engine(|engine| {
        engine.new_custom_callable(CustomCallable {
            userdata: info.callable_userdata as usize,
            call,
            free: info.free_func,
        })
    });
    trace!("custom callable {} created", id);
    unsafe { write_token(CALLABLE, out.cast(), [info.object_id, id]) };
}

// Utility functions.

pub(crate) type UtilityFn = unsafe extern "C" fn(*mut c_void, *const *const c_void, c_int);

const ABSI_HASH: i64 = 2157319888;
const MAXI_HASH: i64 = 3133453818;

unsafe fn int_at(args: *const *const c_void, index: usize) -> i64 {
    unsafe { (*args.add(index)).cast::<i64>().read() }
}

unsafe extern "C" fn absi(ret: *mut c_void, args: *const *const c_void, _count: c_int) {
    unsafe { ret.cast::<i64>().write(int_at(args, 0).wrapping_abs()) };
}

unsafe extern "C" fn maxi(ret: *mut c_void, args: *const *const c_void, _count: c_int) {
    unsafe { ret.cast::<i64>().write(int_at(args, 0).max(int_at(args, 1))) };
}

pub(crate) unsafe extern "C" fn variant_get_ptr_utility_function(name: *const c_void, hash: i64) -> Option<UtilityFn> {
    let [name, _] = unsafe { read_token(STRING_NAME, name.cast()) };
    let name = with_engine(|engine| engine.name_text(name).to_owned());
    let function = match (name.as_str(), hash) {
        ("absi", ABSI_HASH) => Some(absi as UtilityFn),
        ("maxi", MAXI_HASH) => Some(maxi as UtilityFn),
        _ => None,
    };
    if function.is_none() {
        warn!("no utility function {} with hash {}", name, hash);
    }
    function
}
