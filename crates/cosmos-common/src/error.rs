//! Error types shared by the cosmos crates.

use thiserror::Error;

/// Errors raised while constructing geometry primitives.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// A box has a zero or negative extent on some axis.
    #[error("box half-extent on {axis} axis must be positive, got {value}")]
    NonPositiveExtent {
        /// Axis name (`x`, `y` or `z`)
        axis: char,
        /// Offending half-extent
        value: f32,
    },

    /// A sphere has a zero or negative radius.
    #[error("sphere radius must be positive, got {0}")]
    NonPositiveRadius(f32),

    /// A coordinate or size is NaN or infinite.
    #[error("geometry contains a non-finite value")]
    NonFinite,
}

/// Result type alias for geometry construction.
pub type GeometryResult<T> = Result<T, GeometryError>;
