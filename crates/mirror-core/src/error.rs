//! # Error Types
//!
//! Domain-specific error types for mirror-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  mirror-core errors (this file)                                        │
//! │  ├── CoreError        - Change store rule violations                   │
//! │  └── ValidationError  - Rejected change drafts                         │
//! │                                                                         │
//! │  mirror-db errors (separate crate)                                     │
//! │  └── DbError          - Persistence failures                           │
//! │                                                                         │
//! │  mirror-sync errors (separate crate)                                   │
//! │  └── SyncError        - Transport / protocol / lifecycle               │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → caller                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Change store errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A change with this id is already pending or confirmed.
    ///
    /// ## When This Occurs
    /// - A caller re-enqueues a change it already tracked
    /// - A persisted pending entry collides with a restored confirmed one
    #[error("Change {0} is already tracked")]
    DuplicateChange(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors raised before a draft becomes a [`Change`].
///
/// [`Change`]: crate::types::Change
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or blank.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format (e.g., blank metadata key).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::DuplicateChange("c-1".to_string());
        assert_eq!(err.to_string(), "Change c-1 is already tracked");

        let err = ValidationError::TooLong {
            field: "entityType".to_string(),
            max: 128,
        };
        assert_eq!(err.to_string(), "entityType must be at most 128 characters");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let err: CoreError = ValidationError::Required {
            field: "entityId".to_string(),
        }
        .into();
        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(err.to_string(), "Validation error: entityId is required");
    }
}
