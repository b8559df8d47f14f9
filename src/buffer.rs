//! Buffer abstraction for array data storage.

use crate::scalar::Elem;
use crate::DType;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

/// Raw data buffer for array storage.
///
/// Buffers are reference-counted: cloning a buffer (or an array holding it)
/// shares the storage, so a write through one handle is visible through
/// every other. Elements are kept in their dtype's canonical form.
#[derive(Debug, Clone)]
pub struct Buffer {
    data: Arc<RwLock<Vec<Elem>>>,
    dtype: DType,
}

impl Buffer {
    /// Create a new buffer filled with zeros.
    pub fn zeros(len: usize, dtype: DType) -> Self {
        Self::filled(Elem::zero(dtype), len, dtype)
    }

    /// Create a new buffer filled with a specific value.
    pub fn filled(value: Elem, len: usize, dtype: DType) -> Self {
        Self::from_elems_unchecked(vec![value.cast(dtype); len], dtype)
    }

    /// Create a buffer from elements, casting each into `dtype`.
    pub fn from_elems(data: Vec<Elem>, dtype: DType) -> Self {
        let data = data.into_iter().map(|e| e.cast(dtype)).collect();
        Self::from_elems_unchecked(data, dtype)
    }

    /// Create a buffer from elements already in canonical form for `dtype`.
    pub(crate) fn from_elems_unchecked(data: Vec<Elem>, dtype: DType) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
            dtype,
        }
    }

    /// Returns the dtype of the stored elements.
    #[inline]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Shared read access to the elements.
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<Elem>> {
        self.data.read()
    }

    /// Exclusive write access to the elements.
    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<Elem>> {
        self.data.write()
    }

    /// Copies the current contents.
    pub fn snapshot(&self) -> Vec<Elem> {
        self.data.read().clone()
    }

    /// Replaces the contents with `data`, casting into the buffer dtype.
    ///
    /// The length must match; shorter input leaves the tail untouched.
    pub fn overwrite(&self, data: &[Elem]) {
        let dtype = self.dtype;
        let mut guard = self.data.write();
        for (slot, value) in guard.iter_mut().zip(data) {
            *slot = value.cast(dtype);
        }
    }

    /// Returns true if both handles refer to the same storage.
    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}
