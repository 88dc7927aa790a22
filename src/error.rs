/// Error taxonomy for MemoGarden operations.
///
/// Every fallible path through the core substrate is translated, at the
/// component boundary, into one of exactly five codes. Nothing upstream of
/// the Verb Dispatcher ever sees a storage-implementation exception type.
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// The wire-level error code. Every `GardenError` maps to exactly one of
/// these; the envelope returned to callers carries the code, a message, and
/// an optional structured `details` object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    LockConflict,
    PermissionDenied,
    InternalError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::NotFound => "not_found",
            ErrorCode::LockConflict => "lock_conflict",
            ErrorCode::PermissionDenied => "permission_denied",
            ErrorCode::InternalError => "internal_error",
        };
        write!(f, "{s}")
    }
}

/// The main error type for MemoGarden operations.
///
/// All fallible operations in the core substrate return `Result<T, GardenError>`.
#[derive(Error, Debug, Clone)]
pub enum GardenError {
    /// Schema or invariant violation in caller input.
    #[error("validation error: {message}")]
    Validation {
        message: String,
        details: Option<JsonValue>,
    },

    /// Identifier unknown, or the object it names has been forgotten.
    #[error("not found: {identifier}")]
    NotFound { identifier: String },

    /// Optimistic hash mismatch, or a storage busy-timeout elapsed.
    #[error("lock conflict: {message}")]
    LockConflict {
        message: String,
        expected_hash: Option<String>,
        actual_hash: Option<String>,
        entity_id: Option<String>,
    },

    /// Actor lacks authority, or the system is in `read_only`/`safe_mode`.
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// Every other fault: I/O errors, panics, summarizer failures.
    #[error("internal error: {message}")]
    Internal {
        message: String,
        diagnostic_id: Option<String>,
    },
}

impl GardenError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GardenError::Validation { .. } => ErrorCode::ValidationError,
            GardenError::NotFound { .. } => ErrorCode::NotFound,
            GardenError::LockConflict { .. } => ErrorCode::LockConflict,
            GardenError::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            GardenError::Internal { .. } => ErrorCode::InternalError,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        GardenError::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn validation_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        let field = field.into();
        let reason = reason.into();
        GardenError::Validation {
            message: format!("{field}: {reason}"),
            details: Some(serde_json::json!({ "field": field, "reason": reason })),
        }
    }

    pub fn not_found(identifier: impl Into<String>) -> Self {
        GardenError::NotFound {
            identifier: identifier.into(),
        }
    }

    pub fn lock_conflict(
        entity_id: impl Into<String>,
        expected_hash: impl Into<String>,
        actual_hash: impl Into<String>,
    ) -> Self {
        let entity_id = entity_id.into();
        let expected_hash = expected_hash.into();
        let actual_hash = actual_hash.into();
        GardenError::LockConflict {
            message: format!(
                "hash mismatch for {entity_id}: expected {expected_hash}, found {actual_hash}"
            ),
            expected_hash: Some(expected_hash),
            actual_hash: Some(actual_hash),
            entity_id: Some(entity_id),
        }
    }

    pub fn busy_timeout(database: impl Into<String>) -> Self {
        GardenError::LockConflict {
            message: format!("writer acquire timed out on {}", database.into()),
            expected_hash: None,
            actual_hash: None,
            entity_id: None,
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        GardenError::PermissionDenied {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        GardenError::Internal {
            message: message.into(),
            diagnostic_id: None,
        }
    }

    pub fn internal_with_diagnostic(
        message: impl Into<String>,
        diagnostic_id: impl Into<String>,
    ) -> Self {
        GardenError::Internal {
            message: message.into(),
            diagnostic_id: Some(diagnostic_id.into()),
        }
    }

    /// The structured `details` object for the response envelope.
    pub fn details(&self) -> Option<JsonValue> {
        match self {
            GardenError::Validation { details, .. } => details.clone(),
            GardenError::NotFound { identifier } => {
                Some(serde_json::json!({ "identifier": identifier }))
            }
            GardenError::LockConflict {
                expected_hash,
                actual_hash,
                entity_id,
                ..
            } => Some(serde_json::json!({
                "expected_hash": expected_hash,
                "actual_hash": actual_hash,
                "entity_id": entity_id,
            })),
            GardenError::PermissionDenied { .. } => None,
            GardenError::Internal { diagnostic_id, .. } => diagnostic_id
                .as_ref()
                .map(|id| serde_json::json!({ "diagnostic_id": id })),
        }
    }
}

impl From<serde_json::Error> for GardenError {
    fn from(e: serde_json::Error) -> Self {
        GardenError::internal(format!("serialization error: {e}"))
    }
}

/// Result type alias for MemoGarden operations.
pub type GardenResult<T> = Result<T, GardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_round_trips_to_wire_string() {
        assert_eq!(ErrorCode::ValidationError.to_string(), "validation_error");
        assert_eq!(ErrorCode::LockConflict.to_string(), "lock_conflict");
    }

    #[test]
    fn lock_conflict_carries_structured_details() {
        let err = GardenError::lock_conflict("core_abc", "H1", "H2");
        let details = err.details().unwrap();
        assert_eq!(details["expected_hash"], "H1");
        assert_eq!(details["actual_hash"], "H2");
        assert_eq!(details["entity_id"], "core_abc");
        assert_eq!(err.code(), ErrorCode::LockConflict);
    }
}
