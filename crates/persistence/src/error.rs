//! Error types for the persistence layer.
//!
//! This module defines all error types used throughout the persistence layer,
//! following a hierarchy that separates configuration errors, resource errors,
//! constraint errors, transaction errors and backend errors. Every error maps
//! onto one [`ErrorKind`], which is what callers branch on.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// The primary error type for all storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Invalid or incomplete provider configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An operation was attempted before the database was initialized.
    #[error("database not initialized: call ensure_connection() before using the provider")]
    NotInitialized,

    /// Resource state errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Uniqueness and required-field violations
    #[error(transparent)]
    Constraint(#[from] ConstraintError),

    /// Transaction errors
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Malformed query options or identifiers
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A failed initialization attempt, shared by every caller that awaited it.
    #[error(transparent)]
    Initialization(Arc<StorageError>),
}

/// The error taxonomy exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid/missing provider configuration. Fatal at startup.
    Configuration,
    /// The guard has not reached `Ready`.
    NotInitialized,
    /// Transient backend unreachability.
    Connection,
    /// Update/delete referencing a nonexistent id.
    NotFound,
    /// Uniqueness or required-field violation on write.
    ConstraintViolation,
    /// A transaction callback failed and its writes were rolled back.
    TransactionAborted,
    /// Query options referenced invalid identifiers or values.
    InvalidQuery,
    /// Any other backend failure.
    Backend,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::NotInitialized => "not-initialized",
            ErrorKind::Connection => "connection",
            ErrorKind::NotFound => "not-found",
            ErrorKind::ConstraintViolation => "constraint-violation",
            ErrorKind::TransactionAborted => "transaction-aborted",
            ErrorKind::InvalidQuery => "invalid-query",
            ErrorKind::Backend => "backend",
        };
        write!(f, "{}", name)
    }
}

impl StorageError {
    /// Returns the taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Config(_) => ErrorKind::Configuration,
            StorageError::NotInitialized => ErrorKind::NotInitialized,
            StorageError::Resource(_) => ErrorKind::NotFound,
            StorageError::Constraint(_) => ErrorKind::ConstraintViolation,
            StorageError::Transaction(_) => ErrorKind::TransactionAborted,
            StorageError::Query(_) => ErrorKind::InvalidQuery,
            StorageError::Backend(err) if err.is_connection() => ErrorKind::Connection,
            StorageError::Backend(_) => ErrorKind::Backend,
            StorageError::Initialization(inner) => inner.kind(),
        }
    }

    /// Returns true for `NotFound`.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Returns true for `ConstraintViolation`.
    pub fn is_constraint_violation(&self) -> bool {
        self.kind() == ErrorKind::ConstraintViolation
    }

    /// Builds a `NotFound` error for a table row.
    pub fn not_found(table: &str, id: &str) -> Self {
        StorageError::Resource(ResourceError::NotFound {
            table: table.to_string(),
            id: id.to_string(),
        })
    }

    /// Builds an `UnsupportedCapability` backend error.
    pub fn unsupported(backend_name: &str, capability: impl Into<String>) -> Self {
        StorageError::Backend(BackendError::UnsupportedCapability {
            backend_name: backend_name.to_string(),
            capability: capability.into(),
        })
    }
}

/// Errors raised while resolving or validating configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The selected provider is not one of the supported values.
    #[error("unsupported database provider '{value}' (expected one of: sqlite, postgresql, supabase)")]
    UnsupportedProvider { value: String },

    /// Required keys for the selected provider are absent.
    #[error("missing required configuration for {provider}: {}", .keys.join(", "))]
    MissingKeys { provider: String, keys: Vec<String> },

    /// A key is present but its value cannot be used.
    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    /// The provider was not compiled into this build.
    #[error("database provider '{provider}' requires the '{feature}' feature")]
    ProviderNotCompiled { provider: String, feature: String },
}

fn column_suffix(column: &Option<String>) -> String {
    column.as_ref().map(|c| format!(".{}", c)).unwrap_or_default()
}

/// Errors related to row state.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The requested row was not found.
    #[error("record not found: {table}/{id}")]
    NotFound { table: String, id: String },
}

/// Errors raised when a write violates a declared constraint.
#[derive(Error, Debug)]
pub enum ConstraintError {
    /// A unique column already holds the value.
    #[error("unique constraint violated on {table}{}: {message}", column_suffix(.column))]
    UniqueViolation {
        table: String,
        column: Option<String>,
        message: String,
    },

    /// A required column was absent or null.
    #[error("required field missing on {table}{}: {message}", column_suffix(.column))]
    MissingRequiredField {
        table: String,
        column: Option<String>,
        message: String,
    },

    /// A domain invariant enforced by a repository was violated.
    #[error("invariant violated on {table}: {message}")]
    InvariantViolation { table: String, message: String },
}

/// Errors related to transactions.
#[derive(Error, Debug)]
pub enum TransactionError {
    /// The transaction callback failed; all writes were rolled back.
    #[error("transaction aborted and rolled back: {source}")]
    Aborted {
        #[source]
        source: Box<StorageError>,
    },

    /// The backend refused to begin, commit or roll back.
    #[error("transaction failed: {reason}")]
    Failed { reason: String },

    /// Transaction is no longer valid (already committed or rolled back).
    #[error("transaction no longer valid")]
    InvalidTransaction,
}

/// Errors related to query construction.
#[derive(Error, Debug)]
pub enum QueryError {
    /// A table or column name is not a plain identifier.
    #[error("invalid identifier '{identifier}'")]
    InvalidIdentifier { identifier: String },

    /// The value cannot be used in this position.
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    /// The record passed to a write is not a JSON object.
    #[error("expected a JSON object for {table}")]
    NotAnObject { table: String },
}

/// Errors originating from the database backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend is currently unavailable.
    #[error("backend unavailable: {backend_name}: {message}")]
    Unavailable {
        backend_name: String,
        message: String,
    },

    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// A time-bounded operation exceeded its deadline.
    #[error("{operation} on {backend_name} timed out after {timeout_ms}ms")]
    Timeout {
        backend_name: String,
        operation: String,
        timeout_ms: u64,
    },

    /// Connection pool exhausted.
    #[error("connection pool exhausted for {backend_name}")]
    PoolExhausted { backend_name: String },

    /// The requested capability is not supported by this backend.
    #[error("capability '{capability}' not supported by {backend_name}")]
    UnsupportedCapability {
        backend_name: String,
        capability: String,
    },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution error.
    #[error("query execution failed in {backend_name}: {message}")]
    QueryError {
        backend_name: String,
        message: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

impl BackendError {
    /// Returns true when the error signals unreachability rather than a bad request.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            BackendError::Unavailable { .. }
                | BackendError::ConnectionFailed { .. }
                | BackendError::Timeout { .. }
                | BackendError::PoolExhausted { .. }
        )
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for StorageError {
    fn from(err: r2d2::Error) -> Self {
        StorageError::Backend(BackendError::PoolExhausted {
            backend_name: format!("sqlite ({})", err),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::not_found("users", "123");
        assert_eq!(err.to_string(), "record not found: users/123");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_missing_keys_lists_every_key() {
        let err = ConfigError::MissingKeys {
            provider: "supabase".to_string(),
            keys: vec!["SUPABASE_URL".to_string(), "SUPABASE_ANON_KEY".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "missing required configuration for supabase: SUPABASE_URL, SUPABASE_ANON_KEY"
        );
        assert_eq!(StorageError::from(err).kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_constraint_error_display() {
        let err = ConstraintError::UniqueViolation {
            table: "users".to_string(),
            column: Some("email".to_string()),
            message: "duplicate".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unique constraint violated on users.email: duplicate"
        );
    }

    #[test]
    fn test_connection_kinds() {
        let err = StorageError::Backend(BackendError::Timeout {
            backend_name: "postgres".to_string(),
            operation: "connect".to_string(),
            timeout_ms: 5000,
        });
        assert_eq!(err.kind(), ErrorKind::Connection);

        let err = StorageError::unsupported("supabase", "transactions");
        assert_eq!(err.kind(), ErrorKind::Backend);
    }

    #[test]
    fn test_transaction_aborted_wraps_source() {
        let inner = StorageError::not_found("shows", "s1");
        let err = StorageError::Transaction(TransactionError::Aborted {
            source: Box::new(inner),
        });
        assert_eq!(err.kind(), ErrorKind::TransactionAborted);
        assert!(err.to_string().contains("shows/s1"));
    }

    #[test]
    fn test_initialization_keeps_inner_kind() {
        let inner = Arc::new(StorageError::from(ConfigError::UnsupportedProvider {
            value: "mysql".to_string(),
        }));
        let err = StorageError::Initialization(inner);
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("mysql"));
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::ConstraintViolation.to_string(), "constraint-violation");
        assert_eq!(ErrorKind::NotInitialized.to_string(), "not-initialized");
    }
}
