//! Error handling for the dao_insure service
//!
//! One error enum covers the storage, configuration and request failures of
//! the crate. Analytics failures are converted to log lines by the event
//! logger and never reach a caller; everything else propagates with `?`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Main error type for the dao_insure crate
#[derive(Error, Debug)]
pub enum InsureError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage operation failed: {operation} - {source}")]
    Storage {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Authentication required: {message}")]
    Unauthorized { message: String },

    #[error("Mutex lock failed: {resource}")]
    MutexPoisoned { resource: String },

    #[error("I/O operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Result alias used across the crate
pub type InsureResult<T> = Result<T, InsureError>;

impl InsureError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create a serialization error
    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Create an I/O error
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            InsureError::Config { .. }
            | InsureError::Serialization { .. }
            | InsureError::Validation { .. } => StatusCode::BAD_REQUEST,
            InsureError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            InsureError::Storage { .. }
            | InsureError::MutexPoisoned { .. }
            | InsureError::Io { .. }
            | InsureError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrBody {
    error: String,
}

impl IntoResponse for InsureError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (
            status,
            Json(ErrBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Lock a mutex without panicking on poison
pub trait SafeLock<T: ?Sized> {
    fn safe_lock(&self, resource: &str) -> InsureResult<std::sync::MutexGuard<'_, T>>;
}

impl<T: ?Sized> SafeLock<T> for std::sync::Mutex<T> {
    fn safe_lock(&self, resource: &str) -> InsureResult<std::sync::MutexGuard<'_, T>> {
        self.lock().map_err(|_| InsureError::MutexPoisoned {
            resource: resource.to_string(),
        })
    }
}

/// Read half of [`SafeLock`] for `RwLock`
pub trait SafeReadLock<T: ?Sized> {
    fn safe_read(&self, resource: &str) -> InsureResult<std::sync::RwLockReadGuard<'_, T>>;
}

impl<T: ?Sized> SafeReadLock<T> for std::sync::RwLock<T> {
    fn safe_read(&self, resource: &str) -> InsureResult<std::sync::RwLockReadGuard<'_, T>> {
        self.read().map_err(|_| InsureError::MutexPoisoned {
            resource: resource.to_string(),
        })
    }
}

/// Write half of [`SafeLock`] for `RwLock`
pub trait SafeWriteLock<T: ?Sized> {
    fn safe_write(&self, resource: &str) -> InsureResult<std::sync::RwLockWriteGuard<'_, T>>;
}

impl<T: ?Sized> SafeWriteLock<T> for std::sync::RwLock<T> {
    fn safe_write(&self, resource: &str) -> InsureResult<std::sync::RwLockWriteGuard<'_, T>> {
        self.write().map_err(|_| InsureError::MutexPoisoned {
            resource: resource.to_string(),
        })
    }
}

impl From<sled::Error> for InsureError {
    fn from(err: sled::Error) -> Self {
        InsureError::storage("sled_operation", err)
    }
}

impl From<serde_json::Error> for InsureError {
    fn from(err: serde_json::Error) -> Self {
        InsureError::serialization("json_operation", err)
    }
}

impl From<std::io::Error> for InsureError {
    fn from(err: std::io::Error) -> Self {
        InsureError::io("io_operation", err)
    }
}

impl From<figment::Error> for InsureError {
    fn from(err: figment::Error) -> Self {
        InsureError::config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let config_err = InsureError::config("Missing configuration file");
        assert!(config_err.to_string().contains("Configuration error"));

        let val_err = InsureError::validation("port", "must be non-zero");
        assert!(val_err.to_string().contains("port"));
    }

    #[test]
    fn test_error_chaining() {
        use std::error::Error;

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err = InsureError::io("reading config", io_err);

        assert!(err.source().is_some());
        assert!(err.to_string().contains("I/O operation failed"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            InsureError::unauthorized("x").status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            InsureError::validation("a", "b").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            InsureError::internal("boom").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn poisoned_mutex_maps_to_error() {
        use std::sync::{Arc, Mutex};

        let m = Arc::new(Mutex::new(0));
        let m2 = Arc::clone(&m);
        let _ = std::thread::spawn(move || {
            let _g = m2.lock().unwrap();
            panic!("poison");
        })
        .join();

        let err = m.safe_lock("counter").unwrap_err();
        assert!(matches!(err, InsureError::MutexPoisoned { .. }));
    }
}
