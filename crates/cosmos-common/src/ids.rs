//! ID types for zones and sound sources.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an acoustic zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneId(u64);

/// Unique identifier for a spatial sound source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(u64);

macro_rules! impl_raw_id {
    ($ty:ident, $prefix:literal) => {
        impl $ty {
            /// Creates an ID from a raw value.
            #[must_use]
            pub const fn from_raw(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw ID value.
            #[must_use]
            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $ty {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

impl_raw_id!(ZoneId, "zone");
impl_raw_id!(SourceId, "source");

/// Monotonic ID allocator owned by a single registry.
///
/// IDs start at 1 and are never reused within one allocator, so a stale ID
/// held by a caller can never alias a newer entry.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: u64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    /// Creates an allocator whose first ID is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 1 }
    }

    /// Allocates the next ID.
    pub fn next_id<T: From<u64>>(&mut self) -> T {
        let id = self.next;
        self.next = self.next.saturating_add(1);
        T::from(id)
    }

    /// Number of IDs handed out so far.
    #[must_use]
    pub const fn issued(&self) -> u64 {
        self.next - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_round_trip() {
        let id = SourceId::from_raw(42);
        assert_eq!(id.raw(), 42);
        assert_eq!(id.to_string(), "source#42");
        assert_eq!(ZoneId::from_raw(7).to_string(), "zone#7");
    }

    #[test]
    fn test_allocator_is_monotonic() {
        let mut ids = IdAllocator::new();
        let a: SourceId = ids.next_id();
        let b: SourceId = ids.next_id();
        assert_eq!(a.raw(), 1);
        assert_eq!(b.raw(), 2);
        assert_eq!(ids.issued(), 2);
    }
}
