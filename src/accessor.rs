//! Packed accessors: copyable, bounds-described views for kernel code.
//!
//! A [`PackedAccessor`] copies a tensor's sizes and strides into fixed-size
//! arrays of an index type `I` and borrows the element buffer. It is `Copy`
//! and `Sync`, so it can be handed to every task of a parallel launch, and its
//! lifetime is tied to the tensor it was built from, so it cannot outlive the
//! buffer.
//!
//! Two widths exist:
//!
//! - [`PackedAccessor32`]: offsets are computed in `i32`. Cheaper per access;
//!   the default for the parallel substrate.
//! - [`PackedAccessor64`]: offsets are computed in `i64`. Needed once a
//!   tensor's extent passes `i32::MAX`; the caller opts in explicitly through
//!   [`LaunchConfig::with_index_width`](crate::LaunchConfig::with_index_width).
//!
//! Construction fails with [`LltmError::IndexOverflow`] if the extent does not
//! fit the chosen width. Indexing out of range panics.

use core::fmt;
use core::ops::{Add, Index, Mul};

use crate::error::{LltmError, Result};
use crate::tensor::max_offset;

/// Addressing width of an accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexWidth {
    /// 32-bit offsets.
    #[default]
    Narrow,
    /// 64-bit offsets.
    Wide,
}

impl fmt::Display for IndexWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Narrow => "32-bit",
            Self::Wide => "64-bit",
        })
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for i32 {}
    impl Sealed for i64 {}
}

/// Integer type an accessor computes offsets in.
pub trait IndexType:
    sealed::Sealed
    + Copy
    + Send
    + Sync
    + fmt::Debug
    + Add<Output = Self>
    + Mul<Output = Self>
    + 'static
{
    const WIDTH: IndexWidth;
    const ZERO: Self;

    /// Converts a size or stride, failing if it does not fit.
    fn try_from_usize(value: usize) -> Option<Self>;

    /// Converts an index already checked against a size that fits.
    fn from_checked(value: usize) -> Self;

    /// Converts a non-negative offset back for slice indexing.
    fn to_usize(self) -> usize;
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]
impl IndexType for i32 {
    const WIDTH: IndexWidth = IndexWidth::Narrow;
    const ZERO: Self = 0;

    fn try_from_usize(value: usize) -> Option<Self> {
        Self::try_from(value).ok()
    }

    #[inline]
    fn from_checked(value: usize) -> Self {
        value as Self
    }

    #[inline]
    fn to_usize(self) -> usize {
        self as usize
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]
impl IndexType for i64 {
    const WIDTH: IndexWidth = IndexWidth::Wide;
    const ZERO: Self = 0;

    fn try_from_usize(value: usize) -> Option<Self> {
        Self::try_from(value).ok()
    }

    #[inline]
    fn from_checked(value: usize) -> Self {
        value as Self
    }

    #[inline]
    fn to_usize(self) -> usize {
        self as usize
    }
}

/// Non-owning N-dimensional view with copied shape/stride metadata.
#[derive(Debug, Clone, Copy)]
pub struct PackedAccessor<'a, T, const N: usize, I: IndexType = i64> {
    data: &'a [T],
    sizes: [I; N],
    strides: [I; N],
}

/// Accessor computing offsets in 32 bits.
pub type PackedAccessor32<'a, T, const N: usize> = PackedAccessor<'a, T, N, i32>;

/// Accessor computing offsets in 64 bits.
pub type PackedAccessor64<'a, T, const N: usize> = PackedAccessor<'a, T, N, i64>;

impl<'a, T, const N: usize, I: IndexType> PackedAccessor<'a, T, N, I> {
    /// Builds an accessor over `buffer` for the layout `(offset, shape, strides)`.
    ///
    /// `shape` and `strides` must have length `N` and describe a layout
    /// inside `buffer`; [`Tensor`](crate::Tensor) guarantees both.
    pub(crate) fn new(
        buffer: &'a [T],
        offset: usize,
        shape: &[usize],
        strides: &[usize],
    ) -> Result<Self> {
        let extent = match max_offset(shape, strides, 0)? {
            Some(last) => last
                .checked_add(1)
                .ok_or_else(|| LltmError::layout("accessor extent overflows usize"))?,
            None => 0,
        };
        let overflow = || LltmError::IndexOverflow {
            extent,
            width: I::WIDTH,
        };
        I::try_from_usize(extent).ok_or_else(overflow)?;

        let mut sizes = [I::ZERO; N];
        let mut packed_strides = [I::ZERO; N];
        for d in 0..N {
            sizes[d] = I::try_from_usize(shape[d]).ok_or_else(overflow)?;
            // a stride on a size-1 dimension is never multiplied by more than zero
            packed_strides[d] = if shape[d] <= 1 {
                I::ZERO
            } else {
                I::try_from_usize(strides[d]).ok_or_else(overflow)?
            };
        }

        Ok(Self {
            data: offset
                .checked_add(extent)
                .and_then(|end| buffer.get(offset..end))
                .unwrap_or(&[]),
            sizes,
            strides: packed_strides,
        })
    }

    /// Size of every dimension.
    #[must_use]
    pub fn sizes(&self) -> [usize; N] {
        self.sizes.map(IndexType::to_usize)
    }

    /// Size of one dimension.
    #[must_use]
    pub fn size(&self, dim: usize) -> usize {
        self.sizes[dim].to_usize()
    }

    /// Stride of every dimension, in elements.
    #[must_use]
    pub fn strides(&self) -> [usize; N] {
        self.strides.map(IndexType::to_usize)
    }

    /// Element offset of `index` relative to the view's first element.
    ///
    /// # Panics
    /// Panics if any component of `index` is out of range.
    #[inline]
    #[must_use]
    pub fn offset_of(&self, index: [usize; N]) -> usize {
        let mut offset = I::ZERO;
        for d in 0..N {
            let size = self.sizes[d].to_usize();
            assert!(
                index[d] < size,
                "index {} is out of range for dimension {d} with size {size}",
                index[d]
            );
            offset = offset + I::from_checked(index[d]) * self.strides[d];
        }
        offset.to_usize()
    }
}

impl<T, const N: usize, I: IndexType> Index<[usize; N]> for PackedAccessor<'_, T, N, I> {
    type Output = T;

    #[inline]
    fn index(&self, index: [usize; N]) -> &T {
        &self.data[self.offset_of(index)]
    }
}
