//! Physics Error Types
//!
//! Unified error type for the engine. Failures are construction-time
//! (invalid shapes, bad configuration, structural mutation while the world
//! is locked); per-step numeric edge cases never surface as errors — the
//! collision and TOI code reports outcomes through state enums instead.
//!
//! Author: Moroya Sakamoto

use core::fmt;

/// Unified error type for physics operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PhysicsError {
    /// A shape definition failed validation (zero radius, degenerate
    /// polygon, too many vertices).
    InvalidShape {
        /// Human-readable description of the problem
        reason: &'static str,
    },
    /// Structural mutation was attempted while the world was mid-step.
    WorldLocked {
        /// The operation that was rejected
        operation: &'static str,
    },
    /// A handle refers to a destroyed or out-of-range object.
    InvalidHandle {
        /// The invalid slot index
        index: usize,
        /// Current slot count
        count: usize,
    },
    /// A capacity limit was exceeded (too many vertices, particles, etc.).
    CapacityExceeded {
        /// What resource was exhausted
        resource: &'static str,
        /// The limit that was exceeded
        limit: usize,
    },
    /// Invalid configuration parameter.
    InvalidConfiguration {
        /// Description of the invalid configuration
        reason: &'static str,
    },
}

impl fmt::Display for PhysicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidShape { reason } => write!(f, "invalid shape: {reason}"),
            Self::WorldLocked { operation } => {
                write!(f, "world is locked (mid-step): {operation} rejected")
            }
            Self::InvalidHandle { index, count } => {
                write!(f, "handle {index} out of range (count={count})")
            }
            Self::CapacityExceeded { resource, limit } => {
                write!(f, "{resource} capacity exceeded (limit={limit})")
            }
            Self::InvalidConfiguration { reason } => {
                write!(f, "invalid configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for PhysicsError {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = PhysicsError::InvalidHandle { index: 5, count: 3 };
        let s = format!("{}", e);
        assert!(s.contains("5"), "Should contain index");
        assert!(s.contains("3"), "Should contain count");
    }

    #[test]
    fn test_error_variants_distinct() {
        let e1 = PhysicsError::InvalidShape {
            reason: "polygon needs 3 vertices",
        };
        let e2 = PhysicsError::WorldLocked {
            operation: "create_body",
        };
        assert_ne!(e1, e2);
        let s = format!("{}", e2);
        assert!(s.contains("locked"));
        assert!(s.contains("create_body"));
    }

    #[test]
    fn test_capacity_exceeded() {
        let e = PhysicsError::CapacityExceeded {
            resource: "polygon vertices",
            limit: 8,
        };
        let s = format!("{}", e);
        assert!(s.contains("polygon vertices"));
        assert!(s.contains("8"));
    }
}
