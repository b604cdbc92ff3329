//! Launch configuration for the fused kernels.

use crate::accessor::IndexWidth;
use crate::error::{LltmError, Result};
use crate::substrate::Strategy;

/// Columns handled by one block of the parallel grid launch.
pub const DEFAULT_TILE_WIDTH: usize = 1024;

/// Tunables of one forward or backward invocation.
///
/// # Example
/// ```
/// use lltm::LaunchConfig;
/// use lltm::accessor::IndexWidth;
///
/// let config = LaunchConfig::default()
///     .with_tile_width(256)
///     .with_index_width(IndexWidth::Wide);
/// assert_eq!(config.tile_width(), 256);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    tile_width: usize,
    index_width: IndexWidth,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LaunchConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tile_width: DEFAULT_TILE_WIDTH,
            index_width: IndexWidth::Narrow,
        }
    }

    /// Sets the column-tile width of the parallel grid.
    #[must_use]
    pub const fn with_tile_width(mut self, tile_width: usize) -> Self {
        self.tile_width = tile_width;
        self
    }

    /// Sets the accessor width used by the parallel grid.
    ///
    /// The sequential substrate always uses wide accessors.
    #[must_use]
    pub const fn with_index_width(mut self, index_width: IndexWidth) -> Self {
        self.index_width = index_width;
        self
    }

    #[must_use]
    pub const fn tile_width(&self) -> usize {
        self.tile_width
    }

    #[must_use]
    pub const fn index_width(&self) -> IndexWidth {
        self.index_width
    }

    /// Returns the config if every field is usable.
    ///
    /// # Errors
    /// [`LltmError::InvalidConfig`] for a zero tile width.
    pub fn validated(self) -> Result<Self> {
        if self.tile_width == 0 {
            return Err(LltmError::InvalidConfig {
                reason: "tile width must be at least 1".into(),
            });
        }
        Ok(self)
    }

    pub(crate) const fn index_width_for(&self, strategy: Strategy) -> IndexWidth {
        match strategy {
            Strategy::Sequential => IndexWidth::Wide,
            Strategy::Parallel => self.index_width,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_launch() {
        let config = LaunchConfig::default();
        assert_eq!(config.tile_width(), 1024);
        assert_eq!(config.index_width_for(Strategy::Parallel), IndexWidth::Narrow);
        assert_eq!(config.index_width_for(Strategy::Sequential), IndexWidth::Wide);
    }

    #[test]
    fn zero_tile_width_is_rejected() {
        assert!(matches!(
            LaunchConfig::default().with_tile_width(0).validated(),
            Err(LltmError::InvalidConfig { .. })
        ));
    }
}
