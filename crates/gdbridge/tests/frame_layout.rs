//! Golden ptrcall layouts for every arity the fixture exposes.
//!
//! `Fixture.mix_N` takes N arguments cycling through `int`, `float`, `bool`
//! and `Vector3`, and returns their sum as a float. The expected offsets and
//! sizes below are written out by hand; a change in slot packing shows up
//! here before it shows up as garbage in the engine.

mod common;

use common::Fixture;
use gdbridge::builtin::Vector3;
use gdbridge::frame::SlotLayout;
use gdbridge::{Class, Error, MethodFrame, MethodSpec, Owned, Param, Signature, VariantType};
use gdbridge_headless::fixture;

static CYCLE: [Param; 13] = [
    Param::Typed(VariantType::Int),
    Param::Typed(VariantType::Float),
    Param::Typed(VariantType::Bool),
    Param::Typed(VariantType::Vector3),
    Param::Typed(VariantType::Int),
    Param::Typed(VariantType::Float),
    Param::Typed(VariantType::Bool),
    Param::Typed(VariantType::Vector3),
    Param::Typed(VariantType::Int),
    Param::Typed(VariantType::Float),
    Param::Typed(VariantType::Bool),
    Param::Typed(VariantType::Vector3),
    Param::Typed(VariantType::Int),
];

const RET: Option<Param> = Some(Param::Typed(VariantType::Float));

macro_rules! mix_specs {
    ($($name:ident = $n:literal;)*) => {$(
        static $name: MethodSpec = MethodSpec::new(
            "Fixture",
            concat!("mix_", $n),
            fixture::MIX_BASE + $n,
            Signature::new(CYCLE.split_at($n).0, RET),
        );
    )*};
}

mix_specs! {
    MIX_0 = 0;
    MIX_1 = 1;
    MIX_2 = 2;
    MIX_3 = 3;
    MIX_4 = 4;
    MIX_5 = 5;
    MIX_6 = 6;
    MIX_7 = 7;
    MIX_8 = 8;
    MIX_9 = 9;
    MIX_10 = 10;
    MIX_11 = 11;
    MIX_12 = 12;
    MIX_13 = 13;
}

/// Offset and size of every slot of `mix_13`.
const GOLDEN: [(usize, usize); 13] = [
    (0, 8),
    (8, 8),
    (16, 1),
    (24, 12),
    (40, 8),
    (48, 8),
    (56, 1),
    (64, 12),
    (80, 8),
    (88, 8),
    (96, 1),
    (104, 12),
    (120, 8),
];

fn vector(i: usize) -> Vector3 {
    let base = i as f32;
    Vector3 {
        x: base,
        y: base * 2.0,
        z: -1.0,
    }
}

/// Opens a frame for `spec`, pushes the cycling arguments and checks the
/// staged layout before invoking it on `fixture`.
fn run<const N: usize>(spec: &'static MethodSpec, fixture: &Fixture) -> f64 {
    let runtime = common::runtime();
    let bind = runtime.resolve(spec).unwrap();
    let mut frame = MethodFrame::<N>::open(bind).unwrap();

    let mut expected = 0.0f64;
    for i in 0..N {
        match i % 4 {
            0 => {
                let value = i as i64 * 10;
                frame.push(&value).unwrap();
                expected += value as f64;
            }
            1 => {
                let value = i as f64 + 0.25;
                frame.push(&value).unwrap();
                expected += value;
            }
            2 => {
                frame.push(&true).unwrap();
                expected += 1.0;
            }
            _ => {
                let value = vector(i);
                frame.push(&value).unwrap();
                expected += f64::from(value.x) + f64::from(value.y) + f64::from(value.z);
            }
        }
    }

    let layout: Vec<(usize, usize)> = frame
        .layout()
        .iter()
        .map(|slot: &SlotLayout| (slot.offset, slot.size))
        .collect();
    assert_eq!(layout, GOLDEN[..N].to_vec(), "layout of mix_{N}");
    assert!(frame.layout().iter().all(|slot| slot.offset % 8 == 0));
    assert_eq!(frame.layout().iter().map(|slot| slot.param).collect::<Vec<_>>(), CYCLE[..N].to_vec());

    let used = GOLDEN[..N]
        .last()
        .map_or(0, |&(offset, size)| offset + size.div_ceil(8) * 8);
    assert_eq!(frame.arg_bytes().len(), used);

    let got: f64 = unsafe { frame.invoke(fixture.object_ptr()) }.unwrap();
    assert_eq!(got, expected, "result of mix_{N}");
    got
}

#[test]
fn test_golden_layouts_for_every_arity() {
    let _runtime = common::runtime();
    let fixture = Owned::<Fixture>::new().unwrap();

    assert_eq!(run::<0>(&MIX_0, &fixture), 0.0);
    run::<1>(&MIX_1, &fixture);
    run::<2>(&MIX_2, &fixture);
    run::<3>(&MIX_3, &fixture);
    run::<4>(&MIX_4, &fixture);
    run::<5>(&MIX_5, &fixture);
    run::<6>(&MIX_6, &fixture);
    run::<7>(&MIX_7, &fixture);
    run::<8>(&MIX_8, &fixture);
    run::<9>(&MIX_9, &fixture);
    run::<10>(&MIX_10, &fixture);
    run::<11>(&MIX_11, &fixture);
    run::<12>(&MIX_12, &fixture);
    run::<13>(&MIX_13, &fixture);
}

#[test]
fn test_staged_bytes_are_native_encodings() {
    let runtime = common::runtime();
    let bind = runtime.resolve(&MIX_4).unwrap();
    let mut frame = MethodFrame::<4>::open(bind).unwrap();
    frame
        .push(&-3i64)
        .unwrap()
        .push(&1.5f64)
        .unwrap()
        .push(&false)
        .unwrap()
        .push(&Vector3 {
            x: 1.0,
            y: 2.0,
            z: 3.0,
        })
        .unwrap();

    let bytes = frame.arg_bytes();
    assert_eq!(&bytes[0..8], &(-3i64).to_ne_bytes());
    assert_eq!(&bytes[8..16], &1.5f64.to_ne_bytes());
    assert_eq!(bytes[16], 0);
    assert_eq!(&bytes[24..28], &1.0f32.to_ne_bytes());
    assert_eq!(&bytes[28..32], &2.0f32.to_ne_bytes());
    assert_eq!(&bytes[32..36], &3.0f32.to_ne_bytes());
    // Padding after the bool and the Vector3 stays zeroed.
    assert!(bytes[17..24].iter().all(|&b| b == 0));
    assert!(bytes[36..40].iter().all(|&b| b == 0));
}

#[test]
fn test_wrong_arity_is_rejected() {
    let runtime = common::runtime();
    let bind = runtime.resolve(&MIX_2).unwrap();
    assert_eq!(
        MethodFrame::<3>::open(bind).err(),
        Some(Error::ArgumentCountMismatch {
            expected: 2,
            got: 3,
        })
    );

    let mut frame = MethodFrame::<2>::open(bind).unwrap();
    frame.push(&1i64).unwrap().push(&2.0f64).unwrap();
    assert!(matches!(
        frame.push(&3i64),
        Err(Error::ArgumentCountMismatch { expected: 2, got: 3 })
    ));

    let short = MethodFrame::<2>::open(bind).unwrap();
    let fixture = Owned::<Fixture>::new().unwrap();
    let result: gdbridge::Result<f64> = unsafe { short.invoke(fixture.object_ptr()) };
    assert_eq!(
        result,
        Err(Error::ArgumentCountMismatch {
            expected: 2,
            got: 0,
        })
    );
}
