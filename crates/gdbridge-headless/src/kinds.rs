//! Value kinds as the engine numbers them, with their payload widths.

pub const NIL: u32 = 0;
pub const BOOL: u32 = 1;
pub const INT: u32 = 2;
pub const FLOAT: u32 = 3;
pub const STRING: u32 = 4;
pub const STRING_NAME: u32 = 21;
pub const NODE_PATH: u32 = 22;
pub const OBJECT: u32 = 24;
pub const CALLABLE: u32 = 25;
pub const SIGNAL: u32 = 26;
pub const DICTIONARY: u32 = 27;
pub const ARRAY: u32 = 28;
pub const PACKED_BYTE_ARRAY: u32 = 29;
pub const PACKED_STRING_ARRAY: u32 = 34;
pub const PACKED_VECTOR4_ARRAY: u32 = 38;

/// Number of kinds.
pub const COUNT: u32 = 39;

/// Bytes of a plain-data kind, or `None` for handle kinds.
pub const fn pod_size(ty: u32) -> Option<usize> {
    match ty {
        NIL => Some(0),
        BOOL => Some(1),
        INT | FLOAT => Some(8),
        5 | 6 => Some(8),   // Vector2, Vector2i
        7 | 8 => Some(16),  // Rect2, Rect2i
        9 | 10 => Some(12), // Vector3, Vector3i
        11 => Some(24),     // Transform2D
        12..=15 => Some(16), // Vector4, Vector4i, Plane, Quaternion
        16 => Some(24),     // AABB
        17 => Some(36),     // Basis
        18 => Some(48),     // Transform3D
        19 => Some(64),     // Projection
        20 => Some(16),     // Color
        23 => Some(8),      // RID
        _ => None,
    }
}

/// Words in the ptrcall token of a handle kind.
pub const fn token_words(ty: u32) -> usize {
    match ty {
        CALLABLE | SIGNAL => 2,
        PACKED_BYTE_ARRAY..=PACKED_VECTOR4_ARRAY => 2,
        _ => 1,
    }
}

pub const fn is_packed(ty: u32) -> bool {
    matches!(ty, PACKED_BYTE_ARRAY..=PACKED_VECTOR4_ARRAY)
}

/// Element width of a packed kind.
pub const fn packed_element_size(ty: u32) -> usize {
    match ty {
        29 => 1,       // byte
        30 | 32 => 4,  // int32, float32
        31 | 33 => 8,  // int64, float64
        34 => 8,       // string token
        35 => 8,       // Vector2
        36 => 12,      // Vector3
        37 | 38 => 16, // Color, Vector4
        _ => 0,
    }
}

/// Plain data wider than this lives outside the Variant.
pub const INLINE_BYTES: usize = 16;
