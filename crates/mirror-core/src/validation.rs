//! # Validation Module
//!
//! Checks a [`ChangeDraft`] before it is turned into a tracked change.
//!
//! ## Usage
//! ```rust
//! use mirror_core::validation::validate_draft;
//! use mirror_core::{ChangeDraft, ChangeKind};
//!
//! let draft = ChangeDraft::new(ChangeKind::Update, "task", "t-1").field("title");
//! assert!(validate_draft(&draft).is_ok());
//!
//! let draft = ChangeDraft::new(ChangeKind::Update, "", "t-1");
//! assert!(validate_draft(&draft).is_err());
//! ```

use crate::error::ValidationError;
use crate::types::ChangeDraft;
use crate::MAX_IDENTIFIER_LEN;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Draft Validators
// =============================================================================

/// Validates every caller-supplied field of a draft.
///
/// ## Rules
/// - `entityType` and `entityId` are required and at most 128 characters
/// - `field`, when present, is non-blank and at most 128 characters
/// - metadata keys are non-blank
pub fn validate_draft(draft: &ChangeDraft) -> ValidationResult<()> {
    validate_identifier("entityType", &draft.entity_type)?;
    validate_identifier("entityId", &draft.entity_id)?;

    if let Some(ref field) = draft.field {
        validate_identifier("field", field)?;
    }

    if draft.metadata.keys().any(|k| k.trim().is_empty()) {
        return Err(ValidationError::InvalidFormat {
            field: "metadata".to_string(),
            reason: "keys must not be blank".to_string(),
        });
    }

    Ok(())
}

/// Validates a required, length-limited identifier.
///
/// ## Example
/// ```rust
/// use mirror_core::validation::validate_identifier;
///
/// assert!(validate_identifier("entityId", "t-1").is_ok());
/// assert!(validate_identifier("entityId", "   ").is_err());
/// assert!(validate_identifier("entityId", &"x".repeat(200)).is_err());
/// ```
pub fn validate_identifier(field: &str, value: &str) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_IDENTIFIER_LEN,
        });
    }

    Ok(())
}
