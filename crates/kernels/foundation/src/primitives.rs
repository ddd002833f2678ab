//! Element and buffer type descriptors shared across the stack.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Storage class of a single buffer element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 32-bit integer.
    I32,
    /// Signed 64-bit integer.
    I64,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
}

impl ElementType {
    /// Size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            ElementType::U8 => 1,
            ElementType::I32 | ElementType::F32 => 4,
            ElementType::I64 | ElementType::F64 => 8,
        }
    }

    /// Canonical lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            ElementType::U8 => "u8",
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
        }
    }
}

/// Shape of the data flowing across a graph edge or stored in a buffer.
///
/// Dimensions are clamped to at least one, so a descriptor always covers a
/// non-empty region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferType {
    /// Element storage class.
    pub element: ElementType,
    /// Extent along X.
    pub x: usize,
    /// Extent along Y.
    pub y: usize,
    /// Extent along Z.
    pub z: usize,
}

impl BufferType {
    /// One-dimensional descriptor.
    pub fn new_1d(element: ElementType, x: usize) -> Self {
        Self::new_3d(element, x, 1, 1)
    }

    /// Two-dimensional descriptor.
    pub fn new_2d(element: ElementType, x: usize, y: usize) -> Self {
        Self::new_3d(element, x, y, 1)
    }

    /// Three-dimensional descriptor.
    pub fn new_3d(element: ElementType, x: usize, y: usize, z: usize) -> Self {
        Self {
            element,
            x: x.max(1),
            y: y.max(1),
            z: z.max(1),
        }
    }

    /// Total number of elements.
    pub fn element_count(&self) -> usize {
        self.x * self.y * self.z
    }

    /// Total size in bytes.
    pub fn byte_size(&self) -> usize {
        self.element_count() * self.element.size()
    }
}

impl fmt::Display for BufferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}x{}x{}]", self.element.name(), self.x, self.y, self.z)
    }
}
