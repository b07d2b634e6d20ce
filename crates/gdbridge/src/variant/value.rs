//! An owned, host-side mirror of every Variant kind that carries data.
//!
//! [`Value`] is what dynamic content (array elements, dictionary entries,
//! untyped method returns) decodes to when the call site cannot name a
//! static type. Object, Callable and Signal Variants refer to live engine
//! state and have no host-owned form; decoding one fails with
//! [`Error::UnsupportedValue`].

use super::{Decode, Encode, Variant, VariantType};
use crate::builtin::{
    Aabb, Array, Basis, Color, Dictionary, NodePath, Plane, Projection, Quaternion, Rect2,
    Rect2i, Rid, StringName, Transform2D, Transform3D, Vector2, Vector2i, Vector3, Vector3i,
    Vector4, Vector4i,
};
use crate::error::{Error, Result};
use crate::lifetime::{Lifetime, Local};

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Vector2(Vector2),
    Vector2i(Vector2i),
    Rect2(Rect2),
    Rect2i(Rect2i),
    Vector3(Vector3),
    Vector3i(Vector3i),
    Transform2D(Transform2D),
    Vector4(Vector4),
    Vector4i(Vector4i),
    Plane(Plane),
    Quaternion(Quaternion),
    Aabb(Aabb),
    Basis(Basis),
    Transform3D(Transform3D),
    Projection(Projection),
    Color(Color),
    StringName(String),
    NodePath(String),
    Rid(Rid),
    /// Entries in insertion order.
    Dictionary(Vec<(Value, Value)>),
    Array(Vec<Value>),
    PackedByteArray(Vec<u8>),
    PackedInt32Array(Vec<i32>),
    PackedInt64Array(Vec<i64>),
    PackedFloat32Array(Vec<f32>),
    PackedFloat64Array(Vec<f64>),
    PackedStringArray(Vec<String>),
    PackedVector2Array(Vec<Vector2>),
    PackedVector3Array(Vec<Vector3>),
    PackedColorArray(Vec<Color>),
    PackedVector4Array(Vec<Vector4>),
}

impl Value {
    /// The Variant kind this value encodes to.
    pub fn variant_type(&self) -> VariantType {
        match self {
            Value::Nil => VariantType::Nil,
            Value::Bool(_) => VariantType::Bool,
            Value::Int(_) => VariantType::Int,
            Value::Float(_) => VariantType::Float,
            Value::String(_) => VariantType::String,
            Value::Vector2(_) => VariantType::Vector2,
            Value::Vector2i(_) => VariantType::Vector2i,
            Value::Rect2(_) => VariantType::Rect2,
            Value::Rect2i(_) => VariantType::Rect2i,
            Value::Vector3(_) => VariantType::Vector3,
            Value::Vector3i(_) => VariantType::Vector3i,
            Value::Transform2D(_) => VariantType::Transform2D,
            Value::Vector4(_) => VariantType::Vector4,
            Value::Vector4i(_) => VariantType::Vector4i,
            Value::Plane(_) => VariantType::Plane,
            Value::Quaternion(_) => VariantType::Quaternion,
            Value::Aabb(_) => VariantType::Aabb,
            Value::Basis(_) => VariantType::Basis,
            Value::Transform3D(_) => VariantType::Transform3D,
            Value::Projection(_) => VariantType::Projection,
            Value::Color(_) => VariantType::Color,
            Value::StringName(_) => VariantType::StringName,
            Value::NodePath(_) => VariantType::NodePath,
            Value::Rid(_) => VariantType::Rid,
            Value::Dictionary(_) => VariantType::Dictionary,
            Value::Array(_) => VariantType::Array,
            Value::PackedByteArray(_) => VariantType::PackedByteArray,
            Value::PackedInt32Array(_) => VariantType::PackedInt32Array,
            Value::PackedInt64Array(_) => VariantType::PackedInt64Array,
            Value::PackedFloat32Array(_) => VariantType::PackedFloat32Array,
            Value::PackedFloat64Array(_) => VariantType::PackedFloat64Array,
            Value::PackedStringArray(_) => VariantType::PackedStringArray,
            Value::PackedVector2Array(_) => VariantType::PackedVector2Array,
            Value::PackedVector3Array(_) => VariantType::PackedVector3Array,
            Value::PackedColorArray(_) => VariantType::PackedColorArray,
            Value::PackedVector4Array(_) => VariantType::PackedVector4Array,
        }
    }
}

impl Encode for Value {
    fn encode<'l>(&self, lifetime: &'l Lifetime) -> Result<Local<'l, Variant>> {
        match self {
            Value::Nil => Variant::nil(lifetime),
            Value::Bool(v) => v.encode(lifetime),
            Value::Int(v) => v.encode(lifetime),
            Value::Float(v) => v.encode(lifetime),
            Value::String(v) => v.encode(lifetime),
            Value::Vector2(v) => v.encode(lifetime),
            Value::Vector2i(v) => v.encode(lifetime),
            Value::Rect2(v) => v.encode(lifetime),
            Value::Rect2i(v) => v.encode(lifetime),
            Value::Vector3(v) => v.encode(lifetime),
            Value::Vector3i(v) => v.encode(lifetime),
            Value::Transform2D(v) => v.encode(lifetime),
            Value::Vector4(v) => v.encode(lifetime),
            Value::Vector4i(v) => v.encode(lifetime),
            Value::Plane(v) => v.encode(lifetime),
            Value::Quaternion(v) => v.encode(lifetime),
            Value::Aabb(v) => v.encode(lifetime),
            Value::Basis(v) => v.encode(lifetime),
            Value::Transform3D(v) => v.encode(lifetime),
            Value::Projection(v) => v.encode(lifetime),
            Value::Color(v) => v.encode(lifetime),
            Value::StringName(v) => StringName::new(lifetime, v)?.encode(lifetime),
            Value::NodePath(v) => NodePath::new(lifetime, v)?.encode(lifetime),
            Value::Rid(v) => v.encode(lifetime),
            Value::Dictionary(entries) => {
                let runtime = lifetime.runtime();
                let mut dict = Dictionary::new(lifetime)?;
                for (key, value) in entries {
                    let key = key.encode(lifetime)?;
                    let value = value.encode(lifetime)?;
                    dict.set(runtime, &key, &value)?;
                }
                dict.encode(lifetime)
            }
            Value::Array(items) => {
                let runtime = lifetime.runtime();
                let mut array = Array::new(lifetime)?;
                for item in items {
                    let item = item.encode(lifetime)?;
                    array.push(runtime, &item)?;
                }
                array.encode(lifetime)
            }
            Value::PackedByteArray(v) => v.encode(lifetime),
            Value::PackedInt32Array(v) => v.encode(lifetime),
            Value::PackedInt64Array(v) => v.encode(lifetime),
            Value::PackedFloat32Array(v) => v.encode(lifetime),
            Value::PackedFloat64Array(v) => v.encode(lifetime),
            Value::PackedStringArray(v) => v.encode(lifetime),
            Value::PackedVector2Array(v) => v.encode(lifetime),
            Value::PackedVector3Array(v) => v.encode(lifetime),
            Value::PackedColorArray(v) => v.encode(lifetime),
            Value::PackedVector4Array(v) => v.encode(lifetime),
        }
    }
}

/// Accepts every kind except Object, Callable and Signal.
impl<'l> Decode<'l> for Value {
    const EXPECTED: VariantType = VariantType::Nil;

    fn decode(variant: &Variant, lifetime: &'l Lifetime) -> Result<Self> {
        let runtime = lifetime.runtime();
        let ty = variant.variant_type(runtime)?;
        let value = match ty {
            VariantType::Nil => Value::Nil,
            VariantType::Bool => Value::Bool(Decode::decode(variant, lifetime)?),
            VariantType::Int => Value::Int(Decode::decode(variant, lifetime)?),
            VariantType::Float => Value::Float(Decode::decode(variant, lifetime)?),
            VariantType::String => Value::String(Decode::decode(variant, lifetime)?),
            VariantType::Vector2 => Value::Vector2(Decode::decode(variant, lifetime)?),
            VariantType::Vector2i => Value::Vector2i(Decode::decode(variant, lifetime)?),
            VariantType::Rect2 => Value::Rect2(Decode::decode(variant, lifetime)?),
            VariantType::Rect2i => Value::Rect2i(Decode::decode(variant, lifetime)?),
            VariantType::Vector3 => Value::Vector3(Decode::decode(variant, lifetime)?),
            VariantType::Vector3i => Value::Vector3i(Decode::decode(variant, lifetime)?),
            VariantType::Transform2D => Value::Transform2D(Decode::decode(variant, lifetime)?),
            VariantType::Vector4 => Value::Vector4(Decode::decode(variant, lifetime)?),
            VariantType::Vector4i => Value::Vector4i(Decode::decode(variant, lifetime)?),
            VariantType::Plane => Value::Plane(Decode::decode(variant, lifetime)?),
            VariantType::Quaternion => Value::Quaternion(Decode::decode(variant, lifetime)?),
            VariantType::Aabb => Value::Aabb(Decode::decode(variant, lifetime)?),
            VariantType::Basis => Value::Basis(Decode::decode(variant, lifetime)?),
            VariantType::Transform3D => Value::Transform3D(Decode::decode(variant, lifetime)?),
            VariantType::Projection => Value::Projection(Decode::decode(variant, lifetime)?),
            VariantType::Color => Value::Color(Decode::decode(variant, lifetime)?),
            VariantType::StringName => {
                let name = Local::<StringName>::decode(variant, lifetime)?;
                Value::StringName(name.to_rust(runtime)?)
            }
            VariantType::NodePath => {
                let path = Local::<NodePath>::decode(variant, lifetime)?;
                Value::NodePath(path.to_rust(runtime)?)
            }
            VariantType::Rid => Value::Rid(Decode::decode(variant, lifetime)?),
            VariantType::Dictionary => {
                let dict = Local::<Dictionary>::decode(variant, lifetime)?;
                let entries = dict
                    .entries(runtime)?
                    .iter()
                    .map(|(key, value)| {
                        Ok((Value::decode(key, lifetime)?, Value::decode(value, lifetime)?))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Value::Dictionary(entries)
            }
            VariantType::Array => {
                let array = Local::<Array>::decode(variant, lifetime)?;
                let items = array
                    .to_locals(lifetime)?
                    .iter()
                    .map(|item| Value::decode(item, lifetime))
                    .collect::<Result<Vec<_>>>()?;
                Value::Array(items)
            }
            VariantType::PackedByteArray => Value::PackedByteArray(Decode::decode(variant, lifetime)?),
            VariantType::PackedInt32Array => {
                Value::PackedInt32Array(Decode::decode(variant, lifetime)?)
            }
            VariantType::PackedInt64Array => {
                Value::PackedInt64Array(Decode::decode(variant, lifetime)?)
            }
            VariantType::PackedFloat32Array => {
                Value::PackedFloat32Array(Decode::decode(variant, lifetime)?)
            }
            VariantType::PackedFloat64Array => {
                Value::PackedFloat64Array(Decode::decode(variant, lifetime)?)
            }
            VariantType::PackedStringArray => {
                Value::PackedStringArray(Decode::decode(variant, lifetime)?)
            }
            VariantType::PackedVector2Array => {
                Value::PackedVector2Array(Decode::decode(variant, lifetime)?)
            }
            VariantType::PackedVector3Array => {
                Value::PackedVector3Array(Decode::decode(variant, lifetime)?)
            }
            VariantType::PackedColorArray => {
                Value::PackedColorArray(Decode::decode(variant, lifetime)?)
            }
            VariantType::PackedVector4Array => {
                Value::PackedVector4Array(Decode::decode(variant, lifetime)?)
            }
            VariantType::Object | VariantType::Callable | VariantType::Signal => {
                return Err(Error::UnsupportedValue { ty });
            }
        };
        Ok(value)
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident;)*) => {$(
        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        }
    )*};
}

value_from! {
    bool => Bool;
    i64 => Int;
    f64 => Float;
    String => String;
    Vector2 => Vector2;
    Vector3 => Vector3;
    Color => Color;
    Vec<Value> => Array;
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn test_nested_round_trip() {
        let runtime = test_support::runtime();
        let lifetime = Lifetime::with_runtime(runtime);
        let value = Value::Dictionary(vec![
            (Value::from("name"), Value::from("fixture")),
            (
                Value::Int(7),
                Value::Array(vec![
                    Value::Nil,
                    Value::Bool(true),
                    Value::PackedInt32Array(vec![1, 2, 3]),
                    Value::StringName("ready".into()),
                ]),
            ),
        ]);
        let variant = value.encode(&lifetime).unwrap();
        assert_eq!(Value::decode(&variant, &lifetime), Ok(value));
    }

    #[test]
    fn test_object_has_no_host_form() {
        let runtime = test_support::runtime();
        let lifetime = Lifetime::with_runtime(runtime);
        let object = crate::refcount::Ref::<crate::refcount::RefCounted>::new().unwrap();
        let variant = object.encode(&lifetime).unwrap();
        assert_eq!(
            Value::decode(&variant, &lifetime),
            Err(Error::UnsupportedValue {
                ty: VariantType::Object
            })
        );
    }

    #[test]
    fn test_variant_type_matches_encoding() {
        let runtime = test_support::runtime();
        let lifetime = Lifetime::with_runtime(runtime.clone());
        for value in [
            Value::Float(1.5),
            Value::NodePath("a/b".into()),
            Value::PackedColorArray(vec![Color::rgba(1.0, 0.0, 0.0, 1.0)]),
            Value::Rid(Rid(9)),
        ] {
            let variant = value.encode(&lifetime).unwrap();
            assert_eq!(variant.variant_type(&runtime), Ok(value.variant_type()));
        }
    }
}
