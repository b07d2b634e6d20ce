//! Property tests for the Variant codec against the headless engine.

mod common;

use gdbridge::builtin::{Color, PackedArray, Vector2, Vector3};
use gdbridge::{Decode, Encode, GString, Lifetime, NodePath, StringName, Value, VariantType};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn finite_f32() -> impl Strategy<Value = f32> {
    -1.0e6f32..1.0e6f32
}

fn vector2() -> impl Strategy<Value = Vector2> {
    (finite_f32(), finite_f32()).prop_map(|(x, y)| Vector2 { x, y })
}

fn vector3() -> impl Strategy<Value = Vector3> {
    (finite_f32(), finite_f32(), finite_f32()).prop_map(|(x, y, z)| Vector3 { x, y, z })
}

fn color() -> impl Strategy<Value = Color> {
    (0.0f32..1.0, 0.0f32..1.0, 0.0f32..1.0, 0.0f32..1.0).prop_map(|(r, g, b, a)| Color { r, g, b, a })
}

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Nil),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        (-1.0e12f64..1.0e12).prop_map(Value::Float),
        "\\PC{0,24}".prop_map(Value::String),
        vector2().prop_map(Value::Vector2),
        vector3().prop_map(Value::Vector3),
        color().prop_map(Value::Color),
        "[a-z_]{1,12}".prop_map(Value::StringName),
        "[A-Za-z0-9_/]{0,20}".prop_map(Value::NodePath),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::PackedByteArray),
        prop::collection::vec(any::<i32>(), 0..16).prop_map(Value::PackedInt32Array),
        prop::collection::vec(any::<i64>(), 0..16).prop_map(Value::PackedInt64Array),
        prop::collection::vec(finite_f32(), 0..16).prop_map(Value::PackedFloat32Array),
        prop::collection::vec("\\PC{0,8}", 0..6).prop_map(Value::PackedStringArray),
        prop::collection::vec(vector3(), 0..6).prop_map(Value::PackedVector3Array),
        prop::collection::vec(color(), 0..6).prop_map(Value::PackedColorArray),
    ]
}

/// Nested arrays and dictionaries. Dictionary keys are distinct ints, since
/// the engine folds equal keys together.
fn value_tree() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map(any::<i64>(), inner, 0..5).prop_map(|entries| {
                Value::Dictionary(
                    entries
                        .into_iter()
                        .map(|(key, value)| (Value::Int(key), value))
                        .collect(),
                )
            }),
        ]
    })
}

// ============================================================================
// Scalars and strings
// ============================================================================

proptest! {
    #[test]
    fn prop_ints_round_trip(value in any::<i64>()) {
        let lifetime = Lifetime::with_runtime(common::runtime());
        let variant = value.encode(&lifetime).unwrap();
        prop_assert_eq!(variant.variant_type(lifetime.runtime()).unwrap(), VariantType::Int);
        prop_assert_eq!(i64::decode(&variant, &lifetime).unwrap(), value);
    }

    #[test]
    fn prop_narrow_ints_widen(value in any::<i32>()) {
        let lifetime = Lifetime::with_runtime(common::runtime());
        let variant = value.encode(&lifetime).unwrap();
        prop_assert_eq!(i64::decode(&variant, &lifetime).unwrap(), i64::from(value));
        prop_assert_eq!(i32::decode(&variant, &lifetime).unwrap(), value);
    }

    #[test]
    fn prop_floats_round_trip(value in any::<f64>().prop_filter("finite", |v| v.is_finite())) {
        let lifetime = Lifetime::with_runtime(common::runtime());
        let variant = value.encode(&lifetime).unwrap();
        prop_assert_eq!(f64::decode(&variant, &lifetime).unwrap().to_bits(), value.to_bits());
    }

    #[test]
    fn prop_vectors_round_trip(value in vector3()) {
        let lifetime = Lifetime::with_runtime(common::runtime());
        let variant = value.encode(&lifetime).unwrap();
        prop_assert_eq!(Vector3::decode(&variant, &lifetime).unwrap(), value);
    }

    #[test]
    fn prop_strings_round_trip(text in "\\PC{0,64}") {
        let lifetime = Lifetime::with_runtime(common::runtime());
        let runtime = lifetime.runtime();

        let string = GString::new(&lifetime, &text).unwrap();
        prop_assert_eq!(string.to_rust(runtime), text.clone());

        let variant = text.encode(&lifetime).unwrap();
        prop_assert_eq!(String::decode(&variant, &lifetime).unwrap(), text.clone());

        let name = StringName::new(&lifetime, &text).unwrap();
        prop_assert_eq!(name.to_rust(runtime).unwrap(), text.clone());
    }

    #[test]
    fn prop_node_paths_round_trip(text in "[A-Za-z0-9_/.:]{0,32}") {
        let lifetime = Lifetime::with_runtime(common::runtime());
        let path = NodePath::new(&lifetime, &text).unwrap();
        prop_assert_eq!(path.to_rust(lifetime.runtime()).unwrap(), text);
    }
}

// ============================================================================
// Packed arrays
// ============================================================================

proptest! {
    #[test]
    fn prop_packed_ints_round_trip(items in prop::collection::vec(any::<i64>(), 0..64)) {
        let lifetime = Lifetime::with_runtime(common::runtime());
        let runtime = lifetime.runtime();
        let array = PackedArray::<i64>::from_slice(&lifetime, &items).unwrap();
        prop_assert_eq!(array.len(runtime).unwrap(), items.len());
        prop_assert_eq!(array.to_vec(runtime).unwrap(), items.clone());

        let variant = items.as_slice().encode(&lifetime).unwrap();
        prop_assert_eq!(Vec::<i64>::decode(&variant, &lifetime).unwrap(), items);
    }

    #[test]
    fn prop_packed_bytes_resize(items in prop::collection::vec(any::<u8>(), 0..32), grow in 0usize..16) {
        let lifetime = Lifetime::with_runtime(common::runtime());
        let runtime = lifetime.runtime();
        let mut array = PackedArray::<u8>::from_slice(&lifetime, &items).unwrap();
        array.resize(runtime, items.len() + grow).unwrap();

        let mut expected = items.clone();
        expected.resize(items.len() + grow, 0);
        prop_assert_eq!(array.to_vec(runtime).unwrap(), expected);
    }

    #[test]
    fn prop_packed_strings_round_trip(items in prop::collection::vec("\\PC{0,12}", 0..12)) {
        let lifetime = Lifetime::with_runtime(common::runtime());
        let array = PackedArray::<GString>::from_slice(&lifetime, &items).unwrap();
        prop_assert_eq!(array.to_vec(lifetime.runtime()).unwrap(), items);
    }
}

// ============================================================================
// Value trees
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_value_trees_round_trip(value in value_tree()) {
        let lifetime = Lifetime::with_runtime(common::runtime());
        let variant = value.encode(&lifetime).unwrap();
        prop_assert_eq!(variant.variant_type(lifetime.runtime()).unwrap(), value.variant_type());
        prop_assert_eq!(Value::decode(&variant, &lifetime).unwrap(), value);
    }

    #[test]
    fn prop_decoding_the_wrong_kind_fails(value in any::<i64>()) {
        let lifetime = Lifetime::with_runtime(common::runtime());
        let variant = value.encode(&lifetime).unwrap();
        let err = String::decode(&variant, &lifetime).unwrap_err();
        prop_assert_eq!(
            err,
            gdbridge::Error::TypeMismatch {
                expected: VariantType::String,
                got: VariantType::Int,
            }
        );
    }
}
