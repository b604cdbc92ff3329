//! Strided tensor views.
//!
//! # Tensor model
//!
//! A [`Tensor`] is a view: an `Arc`-shared typed buffer ([`Storage`]) plus a
//! shape, per-dimension strides (in elements), a storage offset and a
//! [`Device`] tag. Views produced by [`Tensor::narrow`], [`Tensor::transpose`]
//! and [`Tensor::reshape`] share the buffer of the tensor they came from.
//!
//! Every constructor checks that the layout stays inside the buffer, so
//! kernels reading through an [accessor](crate::accessor) never need their
//! own range checks beyond the per-dimension bounds.
//!
//! ## Limitations
//! - Strides are non-negative (no flipped views)
//! - No broadcasting
//!
//! ## Example
//!
//! ```rust
//! use lltm::{tensor, Tensor};
//!
//! let t = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
//! assert_eq!(t.shape(), &[2, 3]);
//!
//! let col = t.narrow(1, 1, 1).unwrap();
//! assert_eq!(col.to_vec::<f64>().unwrap(), vec![2.0, 5.0]);
//! ```

use std::sync::Arc;

use half::{bf16, f16};

use crate::accessor::{IndexType, PackedAccessor};
use crate::error::{LltmError, Result};
use crate::scalar::{Element, ScalarType};

/// Where a tensor lives, and therefore which execution substrate runs it.
///
/// Both devices address host memory; the tag selects the sequential loop
/// (`Host`) or the parallel grid launch (`Accelerator`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    #[default]
    Host,
    Accelerator,
}

/// Typed backing buffer of a tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    F32(Vec<f32>),
    F64(Vec<f64>),
    F16(Vec<f16>),
    BF16(Vec<bf16>),
}

impl Storage {
    /// Number of elements in the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
            Self::F16(v) => v.len(),
            Self::BF16(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn scalar_type(&self) -> ScalarType {
        match self {
            Self::F32(_) => ScalarType::F32,
            Self::F64(_) => ScalarType::F64,
            Self::F16(_) => ScalarType::F16,
            Self::BF16(_) => ScalarType::BF16,
        }
    }
}

/// Row-major strides for `shape`.
#[must_use]
pub fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

/// An N-dimensional strided view over a shared typed buffer.
#[derive(Debug, Clone)]
pub struct Tensor {
    storage: Arc<Storage>,
    shape: Vec<usize>,
    strides: Vec<usize>,
    offset: usize,
    device: Device,
}

impl Tensor {
    /// Creates a contiguous host tensor from a shape and row-major data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    pub fn new<T: Element>(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self::from_storage(T::into_storage(data), shape, Device::Host)
    }

    /// Fallible counterpart of [`Tensor::new`].
    ///
    /// # Errors
    /// [`LltmError::InvalidLayout`] if `data` does not hold exactly the shape product.
    pub fn from_vec<T: Element>(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Result<Self> {
        let shape = shape.into();
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(LltmError::layout(format!(
                "shape {shape:?} needs {numel} elements, got {}",
                data.len()
            )));
        }
        Ok(Self::from_storage(T::into_storage(data), shape, Device::Host))
    }

    /// A contiguous tensor filled with `value`.
    pub fn full<T: Element>(shape: impl Into<Vec<usize>>, value: T) -> Self {
        let shape = shape.into();
        let numel = shape.iter().product();
        Self::from_storage(T::into_storage(vec![value; numel]), shape, Device::Host)
    }

    pub fn zeros<T: Element>(shape: impl Into<Vec<usize>>) -> Self {
        Self::full(shape, T::ZERO)
    }

    pub fn ones<T: Element + num_traits::One>(shape: impl Into<Vec<usize>>) -> Self {
        Self::full(shape, T::one())
    }

    pub(crate) fn from_storage(storage: Storage, shape: Vec<usize>, device: Device) -> Self {
        let strides = contiguous_strides(&shape);
        Self {
            storage: Arc::new(storage),
            shape,
            strides,
            offset: 0,
            device,
        }
    }

    /// Builds a view over this tensor's buffer with an explicit layout.
    ///
    /// # Errors
    /// [`LltmError::InvalidLayout`] if ranks differ or the furthest addressed
    /// element lies outside the buffer.
    pub fn as_strided(
        &self,
        shape: impl Into<Vec<usize>>,
        strides: impl Into<Vec<usize>>,
        offset: usize,
    ) -> Result<Self> {
        let shape = shape.into();
        let strides = strides.into();
        if shape.len() != strides.len() {
            return Err(LltmError::layout(format!(
                "shape {shape:?} and strides {strides:?} differ in rank"
            )));
        }
        if let Some(last) = max_offset(&shape, &strides, offset)? {
            if last >= self.storage.len() {
                return Err(LltmError::layout(format!(
                    "shape {shape:?} with strides {strides:?} at offset {offset} reaches element {last}, \
                     buffer holds {}",
                    self.storage.len()
                )));
            }
        }
        Ok(Self {
            storage: Arc::clone(&self.storage),
            shape,
            strides,
            offset,
            device: self.device,
        })
    }

    #[must_use]
    pub fn scalar_type(&self) -> ScalarType {
        self.storage.scalar_type()
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub const fn device(&self) -> Device {
        self.device
    }

    /// Number of dimensions.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.shape.len()
    }

    #[must_use]
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Whether the view is dense and row-major. Size-1 dimensions may carry any stride.
    #[must_use]
    pub fn is_contiguous(&self) -> bool {
        let mut expected = 1;
        for (&size, &stride) in self.shape.iter().zip(&self.strides).rev() {
            if size != 1 && stride != expected {
                return false;
            }
            expected *= size;
        }
        true
    }

    /// Same data, retagged for another device. Shares the buffer.
    #[must_use]
    pub fn to_device(&self, device: Device) -> Self {
        Self {
            device,
            ..self.clone()
        }
    }

    /// Restricts dimension `dim` to `start..start + len`.
    ///
    /// # Errors
    /// [`LltmError::InvalidLayout`] if `dim` or the range is out of bounds.
    pub fn narrow(&self, dim: usize, start: usize, len: usize) -> Result<Self> {
        self.check_dim(dim)?;
        let end = start.checked_add(len).filter(|&end| end <= self.shape[dim]);
        if end.is_none() {
            return Err(LltmError::layout(format!(
                "narrow {start} + {len} exceeds dimension {dim} of size {}",
                self.shape[dim]
            )));
        }
        let mut shape = self.shape.clone();
        shape[dim] = len;
        let offset = if len == 0 {
            self.offset
        } else {
            self.offset + start * self.strides[dim]
        };
        self.as_strided(shape, self.strides.clone(), offset)
    }

    /// Swaps two dimensions without moving data.
    ///
    /// # Errors
    /// [`LltmError::InvalidLayout`] if either dimension is out of bounds.
    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<Self> {
        self.check_dim(dim0)?;
        self.check_dim(dim1)?;
        let mut view = self.clone();
        view.shape.swap(dim0, dim1);
        view.strides.swap(dim0, dim1);
        Ok(view)
    }

    /// Reinterprets a contiguous tensor with a new shape of equal size.
    ///
    /// # Errors
    /// - [`LltmError::NotContiguous`] if the view is strided
    /// - [`LltmError::ShapeMismatch`] if the element counts differ
    pub fn reshape(&self, shape: impl Into<Vec<usize>>) -> Result<Self> {
        let shape = shape.into();
        if !self.is_contiguous() {
            return Err(LltmError::NotContiguous { op: "reshape" });
        }
        if shape.iter().product::<usize>() != self.numel() {
            return Err(LltmError::shape(
                "reshape",
                "self",
                format_args!("{} elements", shape.iter().product::<usize>()),
                &self.shape,
            ));
        }
        let strides = contiguous_strides(&shape);
        self.as_strided(shape, strides, self.offset)
    }

    /// Returns `self` if contiguous, otherwise a dense row-major copy.
    #[must_use]
    pub fn contiguous(&self) -> Self {
        if self.is_contiguous() {
            return self.clone();
        }
        let storage = match &*self.storage {
            Storage::F32(v) => Storage::F32(self.gather(v)),
            Storage::F64(v) => Storage::F64(self.gather(v)),
            Storage::F16(v) => Storage::F16(self.gather(v)),
            Storage::BF16(v) => Storage::BF16(self.gather(v)),
        };
        Self::from_storage(storage, self.shape.clone(), self.device)
    }

    /// Copies the elements out in logical (row-major) order.
    ///
    /// # Errors
    /// [`LltmError::TypeMismatch`] if `T` is not the tensor's element type.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        Ok(self.gather(self.buffer::<T>("to_vec")?))
    }

    /// Borrows the elements of a contiguous tensor.
    ///
    /// # Errors
    /// - [`LltmError::TypeMismatch`] if `T` is not the tensor's element type
    /// - [`LltmError::NotContiguous`] if the view is strided
    pub fn as_slice<T: Element>(&self) -> Result<&[T]> {
        let buffer = self.buffer::<T>("as_slice")?;
        if !self.is_contiguous() {
            return Err(LltmError::NotContiguous { op: "as_slice" });
        }
        Ok(buffer.get(self.offset..self.offset + self.numel()).unwrap_or(&[]))
    }

    /// Reads one element.
    ///
    /// # Errors
    /// [`LltmError::TypeMismatch`] if `T` is not the tensor's element type.
    ///
    /// # Panics
    /// Panics if `index` has the wrong rank or is out of range.
    pub fn get<T: Element>(&self, index: &[usize]) -> Result<T> {
        assert_eq!(index.len(), self.dim(), "index rank mismatch");
        let mut offset = self.offset;
        for (d, (&i, &size)) in index.iter().zip(&self.shape).enumerate() {
            assert!(i < size, "index {i} is out of range for dimension {d} with size {size}");
            offset += i * self.strides[d];
        }
        Ok(self.buffer::<T>("get")?[offset])
    }

    /// Builds a kernel accessor over this tensor.
    ///
    /// # Errors
    /// - [`LltmError::TypeMismatch`] if `T` is not the tensor's element type
    /// - [`LltmError::ShapeMismatch`] if the tensor's rank is not `N`
    /// - [`LltmError::IndexOverflow`] if the extent does not fit in `I`
    pub fn packed_accessor<T: Element, const N: usize, I: IndexType>(
        &self,
    ) -> Result<PackedAccessor<'_, T, N, I>> {
        if self.dim() != N {
            return Err(LltmError::shape(
                "packed_accessor",
                "self",
                format_args!("rank {N}"),
                &self.shape,
            ));
        }
        let buffer = self.buffer::<T>("packed_accessor")?;
        PackedAccessor::new(buffer, self.offset, &self.shape, &self.strides)
    }

    /// Accessor with 32-bit offset arithmetic.
    ///
    /// # Errors
    /// See [`Tensor::packed_accessor`].
    pub fn packed_accessor32<T: Element, const N: usize>(
        &self,
    ) -> Result<PackedAccessor<'_, T, N, i32>> {
        self.packed_accessor()
    }

    /// Accessor with 64-bit offset arithmetic.
    ///
    /// # Errors
    /// See [`Tensor::packed_accessor`].
    pub fn packed_accessor64<T: Element, const N: usize>(
        &self,
    ) -> Result<PackedAccessor<'_, T, N, i64>> {
        self.packed_accessor()
    }

    /// The whole backing buffer as `[T]`.
    pub(crate) fn buffer<T: Element>(&self, op: &'static str) -> Result<&[T]> {
        T::storage_slice(&self.storage).ok_or(LltmError::TypeMismatch {
            op,
            tensor: "self",
            expected: T::SCALAR_TYPE,
            actual: self.scalar_type(),
        })
    }

    fn check_dim(&self, dim: usize) -> Result<()> {
        if dim < self.dim() {
            Ok(())
        } else {
            Err(LltmError::layout(format!(
                "dimension {dim} is out of range for a rank-{} tensor",
                self.dim()
            )))
        }
    }

    /// Visits every element's buffer offset in row-major order.
    fn gather<T: Copy>(&self, buffer: &[T]) -> Vec<T> {
        let numel = self.numel();
        let mut out = Vec::with_capacity(numel);
        if numel == 0 {
            return out;
        }
        let mut index = vec![0usize; self.dim()];
        let mut offset = self.offset;
        loop {
            out.push(buffer[offset]);
            // odometer increment, innermost dimension first
            let mut d = self.dim();
            loop {
                if d == 0 {
                    return out;
                }
                d -= 1;
                index[d] += 1;
                offset += self.strides[d];
                if index[d] < self.shape[d] {
                    break;
                }
                offset -= self.strides[d] * self.shape[d];
                index[d] = 0;
            }
        }
    }
}

impl PartialEq for Tensor {
    /// Logical equality: same type, shape, device and elements. Layout is ignored.
    fn eq(&self, other: &Self) -> bool {
        if self.shape != other.shape || self.device != other.device {
            return false;
        }
        match (&*self.storage, &*other.storage) {
            (Storage::F32(a), Storage::F32(b)) => self.gather(a) == other.gather(b),
            (Storage::F64(a), Storage::F64(b)) => self.gather(a) == other.gather(b),
            (Storage::F16(a), Storage::F16(b)) => self.gather(a) == other.gather(b),
            (Storage::BF16(a), Storage::BF16(b)) => self.gather(a) == other.gather(b),
            _ => false,
        }
    }
}

/// Furthest element offset a layout addresses, or `None` for an empty view.
///
/// # Errors
/// [`LltmError::InvalidLayout`] if the offset arithmetic overflows `usize`.
pub(crate) fn max_offset(shape: &[usize], strides: &[usize], offset: usize) -> Result<Option<usize>> {
    if shape.contains(&0) {
        return Ok(None);
    }
    shape
        .iter()
        .zip(strides)
        .try_fold(offset, |acc, (&size, &stride)| {
            (size - 1).checked_mul(stride).and_then(|step| acc.checked_add(step))
        })
        .map(Some)
        .ok_or_else(|| {
            LltmError::layout(format!(
                "shape {shape:?} with strides {strides:?} at offset {offset} overflows the address space"
            ))
        })
}

/// Checks every named tensor lives on the first one's device.
///
/// Returns that common device.
///
/// # Errors
/// [`LltmError::DeviceMismatch`] naming the first tensor that disagrees.
///
/// # Panics
/// Panics if `tensors` is empty.
pub fn check_same_device(
    op: &'static str,
    tensors: &[(&'static str, &Tensor)],
) -> Result<Device> {
    let expected = tensors[0].1.device();
    for &(name, tensor) in &tensors[1..] {
        if tensor.device() != expected {
            return Err(LltmError::DeviceMismatch {
                op,
                tensor: name,
                expected,
                actual: tensor.device(),
            });
        }
    }
    Ok(expected)
}

/// Defines a host tensor from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
/// Float literals default to `f64`; suffix them (`1.0f32`) for `f32`.
///
/// # Example
/// ```
/// use lltm::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape(), &[2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($($tt:tt)+) => {{
        let (shape, data) = $crate::__tensor_parts!($($tt)+);
        $crate::Tensor::new(shape, data)
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __tensor_parts {
    ($lit:literal) => {
        (::std::vec::Vec::<usize>::new(), ::std::vec![$lit])
    };

    ([ $( $inner:tt ),+ $(,)? ]) => {{
        let children = ::std::vec![ $( $crate::__tensor_parts!($inner) ),+ ];
        let first_shape = children[0].0.clone();
        assert!(children.iter().all(|c| c.0 == first_shape),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut shape = ::std::vec![children.len()];
        shape.extend_from_slice(&first_shape);
        let mut data = ::std::vec::Vec::with_capacity(children.len() * children[0].1.len());
        for c in children { data.extend(c.1); }
        (shape, data)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transpose_is_a_strided_view() {
        let t = Tensor::new(vec![2, 3], vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let tt = t.transpose(0, 1).unwrap();
        assert_eq!(tt.shape(), &[3, 2]);
        assert_eq!(tt.strides(), &[1, 3]);
        assert!(!tt.is_contiguous());
        assert_eq!(tt.to_vec::<f32>().unwrap(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert_eq!(tt.contiguous().strides(), &[2, 1]);
    }

    #[test]
    fn reshape_requires_contiguity() {
        let t = Tensor::zeros::<f64>(vec![2, 3]);
        let tt = t.transpose(0, 1).unwrap();
        assert_eq!(tt.reshape(vec![6]).unwrap_err(), LltmError::NotContiguous { op: "reshape" });
        assert_eq!(t.reshape(vec![3, 2]).unwrap().shape(), &[3, 2]);
        assert!(matches!(
            t.reshape(vec![4]),
            Err(LltmError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn as_strided_rejects_layouts_outside_the_buffer() {
        let t = Tensor::zeros::<f32>(vec![4]);
        assert!(t.as_strided(vec![2, 2], vec![2, 1], 0).is_ok());
        assert!(matches!(
            t.as_strided(vec![2, 2], vec![2, 1], 1),
            Err(LltmError::InvalidLayout { .. })
        ));
        assert!(t.as_strided(vec![0, 9], vec![9, 1], 0).is_ok());
    }

    #[test]
    fn narrow_of_narrow_reads_the_right_elements() {
        let t = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]);
        let inner = t.narrow(0, 1, 2).unwrap().narrow(1, 1, 2).unwrap();
        assert_eq!(inner.to_vec::<f64>().unwrap(), vec![5.0, 6.0, 8.0, 9.0]);
        assert_eq!(inner.get::<f64>(&[1, 0]).unwrap(), 8.0);
    }

    #[test]
    fn to_vec_checks_element_type() {
        let t = Tensor::ones::<f32>(vec![2]);
        assert!(matches!(
            t.to_vec::<f64>(),
            Err(LltmError::TypeMismatch { expected: ScalarType::F64, actual: ScalarType::F32, .. })
        ));
    }

    #[test]
    #[should_panic(expected = "ragged tensor literal")]
    fn ragged_literal_panics() {
        let _ = tensor!([[1.0, 2.0], [3.0]]);
    }

    #[test]
    fn overflowing_stride_is_an_invalid_layout() {
        let t = Tensor::zeros::<f32>(vec![4]);
        assert!(matches!(
            t.as_strided(vec![3], vec![usize::MAX / 2 + 1], 0),
            Err(LltmError::InvalidLayout { .. })
        ));
        assert!(matches!(
            t.as_strided(vec![2], vec![1], usize::MAX),
            Err(LltmError::InvalidLayout { .. })
        ));
    }

    #[test]
    fn overflowing_narrow_range_is_an_invalid_layout() {
        let t = Tensor::zeros::<f32>(vec![4]);
        assert!(matches!(
            t.narrow(0, usize::MAX, 2),
            Err(LltmError::InvalidLayout { .. })
        ));
        assert!(matches!(t.narrow(0, 3, 2), Err(LltmError::InvalidLayout { .. })));
        assert_eq!(t.narrow(0, 4, 0).unwrap().numel(), 0);
    }
}
