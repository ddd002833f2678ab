//! Shared, typed byte buffers.
//!
//! A [`Buffer`] is a cheap handle: cloning it yields another handle to the
//! same allocation. Graph edges rely on this to share one intermediate buffer
//! between every consumer of a producing kernel, and [`Buffer::same_as`] is
//! the identity check used to observe that sharing.

use std::fmt;
use std::sync::{Arc, RwLock};

use bytemuck::Pod;
use thiserror::Error;

use crate::ids::BufferId;
use crate::primitives::BufferType;

/// Errors raised by buffer copy primitives.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Source data does not match the buffer's byte size.
    #[error("buffer {buffer} holds {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Buffer being written.
        buffer: BufferId,
        /// Byte size of the buffer.
        expected: usize,
        /// Byte size of the source data.
        actual: usize,
    },
}

struct BufferInner {
    id: BufferId,
    ty: BufferType,
    data: RwLock<Vec<u8>>,
}

/// Handle to a zero-initialised allocation described by a [`BufferType`].
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

impl Buffer {
    /// Allocate a zeroed buffer of the given type.
    pub fn new(ty: BufferType) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                id: BufferId::next(),
                ty,
                data: RwLock::new(vec![0; ty.byte_size()]),
            }),
        }
    }

    /// Allocate a buffer of the given type and fill it from `data`.
    pub fn from_slice<T: Pod>(ty: BufferType, data: &[T]) -> Result<Self, BufferError> {
        let buffer = Self::new(ty);
        buffer.write_from(data)?;
        Ok(buffer)
    }

    /// Identifier of the underlying allocation.
    pub fn id(&self) -> BufferId {
        self.inner.id
    }

    /// Type descriptor the buffer was allocated with.
    pub fn buffer_type(&self) -> BufferType {
        self.inner.ty
    }

    /// Whether both handles refer to the same allocation.
    pub fn same_as(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Copy the contents out as elements of `T`.
    pub fn read_as<T: Pod>(&self) -> Vec<T> {
        let data = self.inner.data.read().expect("buffer lock poisoned");
        bytemuck::pod_collect_to_vec(&data)
    }

    /// Overwrite the contents from a slice of `T`.
    ///
    /// The slice must cover the buffer exactly.
    pub fn write_from<T: Pod>(&self, values: &[T]) -> Result<(), BufferError> {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let mut data = self.inner.data.write().expect("buffer lock poisoned");
        if bytes.len() != data.len() {
            return Err(BufferError::SizeMismatch {
                buffer: self.inner.id,
                expected: data.len(),
                actual: bytes.len(),
            });
        }
        data.copy_from_slice(bytes);
        Ok(())
    }

    /// Copy the raw bytes out.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.data.read().expect("buffer lock poisoned").clone()
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for Buffer {}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.inner.id)
            .field("type", &self.inner.ty)
            .finish()
    }
}
