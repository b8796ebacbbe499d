//! Audio engine error types.

use cosmos_common::{GeometryError, SourceId, ZoneId};
use thiserror::Error;

/// Errors surfaced by the spatial audio engine.
///
/// Only construction-time validation errors are returned synchronously.
/// Load failures reach callers through [`PlayTicket`](crate::loader::PlayTicket)
/// and the event channel; they never abort a tick.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AudioError {
    /// Zone geometry is degenerate or non-finite.
    #[error("invalid geometry for zone '{zone}': {source}")]
    InvalidGeometry {
        /// Zone name
        zone: String,
        /// Underlying geometry error
        source: GeometryError,
    },

    /// Zone parameters other than geometry are out of range.
    #[error("invalid zone '{zone}': {reason}")]
    InvalidZone {
        /// Zone name
        zone: String,
        /// What was wrong
        reason: String,
    },

    /// Source parameters are out of range.
    #[error("invalid source parameter '{field}': {reason}")]
    InvalidSource {
        /// Name of the offending field
        field: &'static str,
        /// What was wrong
        reason: String,
    },

    /// No source with this id is registered.
    #[error("unknown source {0}")]
    SourceNotFound(SourceId),

    /// No zone with this id is registered.
    #[error("unknown zone {0}")]
    ZoneNotFound(ZoneId),

    /// Payload could not be fetched or decoded.
    #[error("failed to load payload for {source_id}: {message}")]
    LoadFailed {
        /// Source whose payload failed
        source_id: SourceId,
        /// Loader error message
        message: String,
    },

    /// A pending start was cancelled by `stop`, `pause` or removal.
    #[error("playback of {0} was cancelled before its payload loaded")]
    PlaybackCancelled(SourceId),

    /// HRTF table data is malformed.
    #[error("invalid HRTF table: {0}")]
    InvalidHrtf(String),
}

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;

/// Error reported by a [`PayloadLoader`](crate::loader::PayloadLoader).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct LoadError {
    /// Human readable failure description
    pub message: String,
}

impl LoadError {
    /// Creates a load error from any displayable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for LoadError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}
