//! # Cosmos Common
//!
//! Common types shared by the cosmos spatial audio crates.
//!
//! This crate provides:
//! - ID types for zones and sound sources, plus a per-registry allocator
//! - Geometry primitives (axis-aligned boxes, spheres) with containment and
//!   point-distance queries
//! - Common error types
//! - Prelude for convenient imports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod geometry;
pub mod ids;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::*;
    pub use crate::geometry::*;
    pub use crate::ids::*;
}

pub use prelude::*;
