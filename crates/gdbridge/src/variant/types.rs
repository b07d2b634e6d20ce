//! The closed enumeration of engine value kinds.
//!
//! Discriminants are the engine's own and change only with an ABI version.
//! Each kind also records its ptrcall payload width on a 64-bit,
//! single-precision build; `builtin` golden tests pin the host types to
//! these numbers.

use crate::error::{Error, Result};
use crate::sys::VariantTypeRaw;

macro_rules! variant_types {
    ($( $variant:ident = $raw:literal, $name:literal, $size:literal, $pod:literal; )*) => {
        /// Engine Variant discriminant.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u32)]
        pub enum VariantType {
            $( $variant = $raw, )*
        }

        impl VariantType {
            /// Every kind, in discriminant order.
            pub const ALL: &'static [VariantType] = &[$(VariantType::$variant),*];

            /// Converts the engine discriminant.
            pub const fn from_raw(raw: VariantTypeRaw) -> Result<VariantType> {
                match raw {
                    $( $raw => Ok(VariantType::$variant), )*
                    _ => Err(Error::UnknownVariantType { raw }),
                }
            }

            /// The engine's display name for the kind.
            pub const fn name(self) -> &'static str {
                match self {
                    $( VariantType::$variant => $name, )*
                }
            }

            /// Bytes the kind occupies in a ptrcall slot.
            pub const fn payload_size(self) -> usize {
                match self {
                    $( VariantType::$variant => $size, )*
                }
            }

            /// True for kinds copied by value with no destructor.
            pub const fn is_pod(self) -> bool {
                match self {
                    $( VariantType::$variant => $pod, )*
                }
            }
        }
    };
}

variant_types! {
    Nil = 0, "Nil", 0, true;
    Bool = 1, "bool", 1, true;
    Int = 2, "int", 8, true;
    Float = 3, "float", 8, true;
    String = 4, "String", 8, false;
    Vector2 = 5, "Vector2", 8, true;
    Vector2i = 6, "Vector2i", 8, true;
    Rect2 = 7, "Rect2", 16, true;
    Rect2i = 8, "Rect2i", 16, true;
    Vector3 = 9, "Vector3", 12, true;
    Vector3i = 10, "Vector3i", 12, true;
    Transform2D = 11, "Transform2D", 24, true;
    Vector4 = 12, "Vector4", 16, true;
    Vector4i = 13, "Vector4i", 16, true;
    Plane = 14, "Plane", 16, true;
    Quaternion = 15, "Quaternion", 16, true;
    Aabb = 16, "AABB", 24, true;
    Basis = 17, "Basis", 36, true;
    Transform3D = 18, "Transform3D", 48, true;
    Projection = 19, "Projection", 64, true;
    Color = 20, "Color", 16, true;
    StringName = 21, "StringName", 8, false;
    NodePath = 22, "NodePath", 8, false;
    Rid = 23, "RID", 8, true;
    Object = 24, "Object", 8, false;
    Callable = 25, "Callable", 16, false;
    Signal = 26, "Signal", 16, false;
    Dictionary = 27, "Dictionary", 8, false;
    Array = 28, "Array", 8, false;
    PackedByteArray = 29, "PackedByteArray", 16, false;
    PackedInt32Array = 30, "PackedInt32Array", 16, false;
    PackedInt64Array = 31, "PackedInt64Array", 16, false;
    PackedFloat32Array = 32, "PackedFloat32Array", 16, false;
    PackedFloat64Array = 33, "PackedFloat64Array", 16, false;
    PackedStringArray = 34, "PackedStringArray", 16, false;
    PackedVector2Array = 35, "PackedVector2Array", 16, false;
    PackedVector3Array = 36, "PackedVector3Array", 16, false;
    PackedColorArray = 37, "PackedColorArray", 16, false;
    PackedVector4Array = 38, "PackedVector4Array", 16, false;
}

impl VariantType {
    /// Number of kinds; sizes the per-type constructor tables.
    pub const COUNT: usize = 39;

    /// The engine discriminant.
    pub const fn raw(self) -> VariantTypeRaw {
        self as VariantTypeRaw
    }

    /// Table index of the kind.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// True for the packed array kinds.
    pub const fn is_packed_array(self) -> bool {
        matches!(self.raw(), 29..=38)
    }
}

impl std::fmt::Display for VariantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminants_are_dense() {
        assert_eq!(VariantType::ALL.len(), VariantType::COUNT);
        for (i, ty) in VariantType::ALL.iter().enumerate() {
            assert_eq!(ty.index(), i);
            assert_eq!(VariantType::from_raw(i as u32), Ok(*ty));
        }
    }

    #[test]
    fn test_unknown_discriminant() {
        assert_eq!(
            VariantType::from_raw(39),
            Err(Error::UnknownVariantType { raw: 39 })
        );
    }

    #[test]
    fn test_engine_fixed_discriminants() {
        assert_eq!(VariantType::String.raw(), 4);
        assert_eq!(VariantType::StringName.raw(), 21);
        assert_eq!(VariantType::Object.raw(), 24);
        assert_eq!(VariantType::PackedVector4Array.raw(), 38);
    }

    #[test]
    fn test_pod_classification() {
        assert!(VariantType::Transform3D.is_pod());
        assert!(!VariantType::String.is_pod());
        assert!(!VariantType::Object.is_pod());
        assert!(VariantType::PackedColorArray.is_packed_array());
        assert!(!VariantType::Array.is_packed_array());
    }
}
