//! Variant-argument calls over the headless engine: utility functions,
//! vararg method binds, and callables, both bound and host-implemented.

mod common;

use common::Fixture;
use gdbridge::{
    CallErrorKind, Callable, Class, Decode, Encode, Error, Lifetime, Local, MethodFrame, MethodSpec,
    Owned, Param, Signature, UtilityFrame, UtilitySpec, Value, Variant, VariantFrame, VariantType,
};
use gdbridge_headless::fixture;
use std::sync::Arc;

static MAXI: UtilitySpec = UtilitySpec::new(
    "maxi",
    3133453818,
    Signature::new(
        &[Param::Typed(VariantType::Int), Param::Typed(VariantType::Int)],
        Some(Param::Typed(VariantType::Int)),
    ),
);

static ABSI: UtilitySpec = UtilitySpec::new(
    "absi",
    2157319888,
    Signature::new(
        &[Param::Typed(VariantType::Int)],
        Some(Param::Typed(VariantType::Int)),
    ),
);

static SUM_ALL: MethodSpec = MethodSpec::new(
    "Fixture",
    "sum_all",
    fixture::SUM_ALL,
    Signature::vararg(&[], Some(Param::Typed(VariantType::Float))),
);

static OBJECT_CALL: MethodSpec = MethodSpec::new(
    "Object",
    "call",
    3400424181,
    Signature::vararg(&[Param::Typed(VariantType::StringName)], Some(Param::Variant)),
);

static EMIT_SIGNAL: MethodSpec = MethodSpec::new(
    "Object",
    "emit_signal",
    4047867050,
    Signature::vararg(&[Param::Typed(VariantType::StringName)], Some(Param::Typed(VariantType::Int))),
);

// ============================================================================
// Utility functions
// ============================================================================

#[test]
fn test_utility_functions_take_native_arguments() {
    let runtime = common::runtime();

    let mut frame = UtilityFrame::<2>::open(runtime.resolve_utility(&MAXI).unwrap()).unwrap();
    frame.push(&3i64).unwrap().push(&9i64).unwrap();
    let max: i64 = unsafe { frame.invoke_utility() }.unwrap();
    assert_eq!(max, 9);

    let mut frame = UtilityFrame::<1>::open(runtime.resolve_utility(&ABSI).unwrap()).unwrap();
    frame.push(&-12i64).unwrap();
    let abs: i64 = unsafe { frame.invoke_utility() }.unwrap();
    assert_eq!(abs, 12);
}

#[test]
fn test_utility_frame_checks_arity() {
    let runtime = common::runtime();
    let mut frame = UtilityFrame::<2>::open(runtime.resolve_utility(&MAXI).unwrap()).unwrap();
    frame.push(&1i64).unwrap();
    assert_eq!(
        unsafe { frame.invoke_utility::<i64>() }.unwrap_err(),
        Error::ArgumentCountMismatch {
            expected: 2,
            got: 1
        }
    );
}

// ============================================================================
// Vararg method binds
// ============================================================================

#[test]
fn test_vararg_method_sums_mixed_arguments() {
    let runtime = common::runtime();
    let lifetime = Lifetime::with_runtime(runtime.clone());
    let fixture = Owned::<Fixture>::new().unwrap();
    let a = 3i64.encode(&lifetime).unwrap();
    let b = 4.5f64.encode(&lifetime).unwrap();
    let c = (-0.5f64).encode(&lifetime).unwrap();

    let mut frame = VariantFrame::open(runtime.resolve(&SUM_ALL).unwrap());
    frame.push(&a).unwrap().push(&b).unwrap().push(&c).unwrap();
    let sum = unsafe { frame.call(fixture.object_ptr(), &lifetime) }.unwrap();
    assert_eq!(f64::decode(&sum, &lifetime).unwrap(), 7.0);

    // No arguments is a valid vararg call.
    let frame = VariantFrame::open(runtime.resolve(&SUM_ALL).unwrap());
    let empty = unsafe { frame.call(fixture.object_ptr(), &lifetime) }.unwrap();
    assert_eq!(f64::decode(&empty, &lifetime).unwrap(), 0.0);
}

#[test]
fn test_vararg_method_reports_the_rejected_argument() {
    let runtime = common::runtime();
    let lifetime = Lifetime::with_runtime(runtime.clone());
    let fixture = Owned::<Fixture>::new().unwrap();
    let number = 1i64.encode(&lifetime).unwrap();
    let text = "two".encode(&lifetime).unwrap();

    let mut frame = VariantFrame::open(runtime.resolve(&SUM_ALL).unwrap());
    frame.push(&number).unwrap().push(&text).unwrap();
    let err = unsafe { frame.call(fixture.object_ptr(), &lifetime) }.unwrap_err();
    assert_eq!(
        err,
        Error::CallFailed {
            class: "Fixture".into(),
            method: "sum_all".into(),
            kind: CallErrorKind::InvalidArgument,
            argument: 1,
            expected: VariantType::Float.raw() as i32,
        }
    );
    assert!(err.to_string().contains("argument 1"));
}

#[test]
fn test_vararg_method_on_null_instance() {
    let runtime = common::runtime();
    let lifetime = Lifetime::with_runtime(runtime.clone());

    let frame = VariantFrame::open(runtime.resolve(&SUM_ALL).unwrap());
    let err = unsafe { frame.call(std::ptr::null_mut(), &lifetime) }.unwrap_err();
    assert!(matches!(
        err,
        Error::CallFailed {
            kind: CallErrorKind::InstanceIsNull,
            ..
        }
    ));
}

#[test]
fn test_object_call_forwards_to_a_vararg_method() {
    let runtime = common::runtime();
    let lifetime = Lifetime::with_runtime(runtime.clone());
    let fixture = Owned::<Fixture>::new().unwrap();
    let method = "sum_all".encode(&lifetime).unwrap();
    let a = 2i64.encode(&lifetime).unwrap();
    let b = 5i64.encode(&lifetime).unwrap();

    let mut frame = VariantFrame::open(runtime.resolve(&OBJECT_CALL).unwrap());
    frame.push(&method).unwrap().push(&a).unwrap().push(&b).unwrap();
    let sum = unsafe { frame.call(fixture.object_ptr(), &lifetime) }.unwrap();
    assert_eq!(f64::decode(&sum, &lifetime).unwrap(), 7.0);
}

#[test]
fn test_emit_signal_records_the_emission() {
    let runtime = common::runtime();
    let lifetime = Lifetime::with_runtime(runtime.clone());
    let fixture = Owned::<Fixture>::new().unwrap();
    let id = common::instance_id(&runtime, &*fixture);
    let signal = "fired".encode(&lifetime).unwrap();
    let payload = 42i64.encode(&lifetime).unwrap();

    let mut frame = VariantFrame::open(runtime.resolve(&EMIT_SIGNAL).unwrap());
    frame.push(&signal).unwrap().push(&payload).unwrap();
    let status = unsafe { frame.call(fixture.object_ptr(), &lifetime) }.unwrap();
    assert_eq!(i64::decode(&status, &lifetime).unwrap(), 0);
    assert_eq!(gdbridge_headless::emitted_signals(id), vec![("fired".to_owned(), 1)]);

    // The signal name is the one required argument.
    let frame = VariantFrame::open(runtime.resolve(&EMIT_SIGNAL).unwrap());
    assert_eq!(
        unsafe { frame.call(fixture.object_ptr(), &lifetime) }.unwrap_err(),
        Error::ArgumentCountMismatch {
            expected: 1,
            got: 0
        }
    );
}

#[test]
fn test_vararg_bind_has_no_ptrcall_frame() {
    let runtime = common::runtime();
    let bind = runtime.resolve(&SUM_ALL).unwrap();
    assert_eq!(
        MethodFrame::<0>::open(bind).err(),
        Some(Error::VarargMethod {
            class: "Fixture",
            method: "sum_all",
        })
    );
}

// ============================================================================
// Callables
// ============================================================================

#[test]
fn test_bound_callable_calls_its_method() {
    let runtime = common::runtime();
    let lifetime = Lifetime::with_runtime(runtime.clone());
    let fixture = Owned::<Fixture>::new().unwrap();
    let a = 1.5f64.encode(&lifetime).unwrap();
    let b = 5.5f64.encode(&lifetime).unwrap();

    let callable = Callable::new(&lifetime, &*fixture, "sum_all").unwrap();
    let sum = callable.call(&lifetime, &[&a, &b]).unwrap();
    assert_eq!(f64::decode(&sum, &lifetime).unwrap(), 7.0);

    let missing = Callable::new(&lifetime, &*fixture, "no_such_method").unwrap();
    assert!(matches!(
        missing.call(&lifetime, &[]).unwrap_err(),
        Error::CallFailed {
            kind: CallErrorKind::InvalidMethod,
            ..
        }
    ));
}

fn double_first(lifetime: &Lifetime, args: &[&Variant]) -> gdbridge::Result<Value> {
    let Some(first) = args.first() else {
        return Err(Error::ArgumentCountMismatch {
            expected: 1,
            got: 0,
        });
    };
    Ok(Value::Int(i64::decode(first, lifetime)? * 2))
}

#[test]
fn test_custom_callable_runs_the_host_closure() {
    let runtime = common::runtime();
    let lifetime = Lifetime::with_runtime(runtime.clone());
    let marker = Arc::new(());
    let held = marker.clone();

    let callable = Callable::from_fn(&lifetime, move |lifetime, args| {
        let _ = &held;
        double_first(lifetime, args)
    })
    .unwrap();
    let input = 21i64.encode(&lifetime).unwrap();
    let doubled = callable.call(&lifetime, &[&input]).unwrap();
    assert_eq!(i64::decode(&doubled, &lifetime).unwrap(), 42);
    assert_eq!(Arc::strong_count(&marker), 2);

    // The engine frees the closure with the last copy of the callable.
    drop(lifetime);
    assert_eq!(Arc::strong_count(&marker), 1);
}

#[test]
fn test_custom_callable_copies_share_the_closure() {
    let runtime = common::runtime();
    let lifetime = Lifetime::with_runtime(runtime.clone());
    let marker = Arc::new(());
    let held = marker.clone();

    let callable = Callable::from_fn(&lifetime, move |_, _| {
        let _ = &held;
        Ok(Value::Nil)
    })
    .unwrap();
    let copy = callable.to_owned_handle().unwrap();
    drop(lifetime);
    assert_eq!(Arc::strong_count(&marker), 2);

    drop(copy);
    assert_eq!(Arc::strong_count(&marker), 1);
}

#[test]
fn test_custom_callable_errors_reach_the_caller() {
    let runtime = common::runtime();
    let lifetime = Lifetime::with_runtime(runtime.clone());
    let callable = Callable::from_fn(&lifetime, double_first).unwrap();

    let text = "x".encode(&lifetime).unwrap();
    assert!(matches!(
        callable.call(&lifetime, &[&text]).unwrap_err(),
        Error::CallFailed {
            kind: CallErrorKind::InvalidArgument,
            argument: 0,
            ..
        }
    ));

    assert!(matches!(
        callable.call(&lifetime, &[]).unwrap_err(),
        Error::CallFailed {
            kind: CallErrorKind::TooFewArguments,
            expected: 1,
            ..
        }
    ));
}

#[test]
fn test_custom_callable_panic_is_contained() {
    let runtime = common::runtime();
    let lifetime = Lifetime::with_runtime(runtime.clone());
    let callable = Callable::from_fn(&lifetime, |_, _| -> gdbridge::Result<Value> {
        panic!("closure exploded")
    })
    .unwrap();

    assert!(matches!(
        callable.call(&lifetime, &[]).unwrap_err(),
        Error::CallFailed {
            kind: CallErrorKind::InvalidMethod,
            ..
        }
    ));
}

#[test]
fn test_custom_callable_survives_variant_round_trip() {
    let runtime = common::runtime();
    let lifetime = Lifetime::with_runtime(runtime.clone());
    let callable = Callable::from_fn(&lifetime, double_first).unwrap();

    let variant = callable.encode(&lifetime).unwrap();
    assert_eq!(variant.variant_type(&runtime), Ok(VariantType::Callable));
    let back = Local::<Callable>::decode(&variant, &lifetime).unwrap();

    let input = 8i64.encode(&lifetime).unwrap();
    let doubled = back.call(&lifetime, &[&input]).unwrap();
    assert_eq!(i64::decode(&doubled, &lifetime).unwrap(), 16);
}
