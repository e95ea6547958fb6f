// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for upkeep-core.
//!
//! Errors carry a stable code so API layers can map them onto bad-request
//! versus internal-error responses.

use thiserror::Error;

use crate::model::DefinitionKind;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by engine operations and persistence backends.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Input validation failed.
    #[error("Validation error for '{field}': {message}")]
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Maintenance definition was not found.
    #[error("Maintenance definition {id} not found")]
    DefinitionNotFound {
        /// The definition ID.
        id: i64,
    },

    /// Entity was not found.
    #[error("Entity {id} not found")]
    EntityNotFound {
        /// The entity ID.
        id: i64,
    },

    /// Task was not found.
    #[error("Task {id} not found")]
    TaskNotFound {
        /// The task ID.
        id: i64,
    },

    /// Checklist was not found.
    #[error("Checklist {id} not found")]
    ChecklistNotFound {
        /// The checklist ID.
        id: i64,
    },

    /// Definition has the wrong tier for the requested operation.
    #[error("Definition {id} is of kind '{actual}', expected '{expected}'")]
    InvalidDefinitionKind {
        /// The definition ID.
        id: i64,
        /// The tier the operation needs.
        expected: DefinitionKind,
        /// The tier found.
        actual: DefinitionKind,
    },

    /// A task would be nested deeper than the supported three levels.
    #[error("Task {parent_task_id} is already at the maximum depth of {max_depth}")]
    TaskDepthExceeded {
        /// The would-be parent.
        parent_task_id: i64,
        /// Maximum supported depth.
        max_depth: usize,
    },

    /// A uniqueness constraint rejected the write.
    #[error("Conflict during '{operation}': {details}")]
    Conflict {
        /// The operation that conflicted.
        operation: String,
        /// Error details.
        details: String,
    },

    /// Database operation failed.
    #[error("Database error during '{operation}': {details}")]
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Shorthand for a validation failure.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::DefinitionNotFound { .. } => "DEFINITION_NOT_FOUND",
            Self::EntityNotFound { .. } => "ENTITY_NOT_FOUND",
            Self::TaskNotFound { .. } => "TASK_NOT_FOUND",
            Self::ChecklistNotFound { .. } => "CHECKLIST_NOT_FOUND",
            Self::InvalidDefinitionKind { .. } => "INVALID_DEFINITION_KIND",
            Self::TaskDepthExceeded { .. } => "TASK_DEPTH_EXCEEDED",
            Self::Conflict { .. } => "CONFLICT",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }

    /// Whether the caller sent a bad request, as opposed to an internal failure.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::DatabaseError { .. })
    }

    /// Whether the error is a uniqueness conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err
            && db_err.is_unique_violation()
        {
            return CoreError::Conflict {
                operation: "query".to_string(),
                details: db_err.message().to_string(),
            };
        }
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for CoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        CoreError::DatabaseError {
            operation: "migrate".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::DatabaseError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}
