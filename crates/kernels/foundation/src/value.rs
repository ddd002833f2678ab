use crate::buffer::Buffer;

/// Literal value bound to a closure argument or a script global.
///
/// Scalars are passed by value; buffers are passed as handles, so two
/// `Value::Buffer`s are equal only when they refer to the same allocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean, marshalled as a 4-byte integer.
    Bool(bool),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// Buffer handle.
    Buffer(Buffer),
}

impl Value {
    /// Marshalled size in bytes, or `None` for buffer handles.
    pub fn byte_size(&self) -> Option<usize> {
        match self {
            Value::Bool(_) | Value::Int(_) | Value::Float(_) => Some(4),
            Value::Long(_) | Value::Double(_) => Some(8),
            Value::Buffer(_) => None,
        }
    }

    /// Attempt to get the value as a buffer handle.
    pub fn as_buffer(&self) -> Option<&Buffer> {
        match self {
            Value::Buffer(b) => Some(b),
            _ => None,
        }
    }

    /// Attempt to get the value as a 32-bit float.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Attempt to get the value as a 32-bit integer.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(v) => Some(i32::from(*v)),
            _ => None,
        }
    }

    /// Attempt to get the value as a 64-bit float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Float(v) => Some(f64::from(*v)),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<Buffer> for Value {
    fn from(v: Buffer) -> Self {
        Value::Buffer(v)
    }
}
