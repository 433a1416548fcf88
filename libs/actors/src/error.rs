//! Actor Runtime Error Types
//!
//! Errors surfaced by the scheduler, the actor system and async components.
//! Internal bookkeeping corruption is not represented here: it panics.

use thiserror::Error;

/// Main runtime error type
#[derive(Error, Debug)]
pub enum ActorError {
    /// Operation not allowed in the current system state
    #[error("Operation not supported: {operation}")]
    NotSupported { operation: String },

    /// Explicit lane index out of range
    #[error("Invalid lane {index}: scheduler has {lanes} lanes")]
    InvalidLane { index: usize, lanes: usize },

    /// Unknown actor handle or state type
    #[error("Actor not found: {actor}")]
    ActorNotFound { actor: String },

    /// Async drain tasks did not finish within the stop timeout
    #[error("Drain timeout: {actors:?} still running after {timeout_ms}ms")]
    DrainTimeout {
        actors: Vec<String>,
        timeout_ms: u64,
    },

    /// Failure reported by an actor lifecycle hook
    #[error("Lifecycle error in {actor} during {phase}: {message}")]
    Lifecycle {
        actor: String,
        phase: String,
        message: String,
    },

    /// Async component fault
    #[error("Component error: {message}")]
    Component {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Cancellation observed while waiting
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, ActorError>;

impl ActorError {
    /// Create a not supported error
    pub fn not_supported(operation: impl Into<String>) -> Self {
        Self::NotSupported {
            operation: operation.into(),
        }
    }

    /// Create an actor not found error
    pub fn actor_not_found(actor: impl Into<String>) -> Self {
        Self::ActorNotFound {
            actor: actor.into(),
        }
    }

    /// Create a lifecycle error
    pub fn lifecycle(
        actor: impl Into<String>,
        phase: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Lifecycle {
            actor: actor.into(),
            phase: phase.into(),
            message: message.into(),
        }
    }

    /// Create a component error
    pub fn component(message: impl Into<String>) -> Self {
        Self::Component {
            message: message.into(),
            source: None,
        }
    }

    /// Create a component error with source
    pub fn component_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Component {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an I/O error
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Cancellation is an expected way for async work to end
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ActorError::Cancelled)
    }

    /// Get error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            ActorError::NotSupported { .. } => "not_supported",
            ActorError::InvalidLane { .. } => "invalid_lane",
            ActorError::ActorNotFound { .. } => "actor_not_found",
            ActorError::DrainTimeout { .. } => "drain_timeout",
            ActorError::Lifecycle { .. } => "lifecycle",
            ActorError::Component { .. } => "component",
            ActorError::Cancelled => "cancelled",
            ActorError::Io { .. } => "io",
            ActorError::Configuration { .. } => "configuration",
        }
    }
}

impl From<std::io::Error> for ActorError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = ActorError::not_supported("add while running");
        assert!(matches!(err, ActorError::NotSupported { .. }));
        assert_eq!(err.category(), "not_supported");

        let err = ActorError::configuration("bad lanes", Some("lanes"));
        assert!(matches!(
            err,
            ActorError::Configuration { field: Some(ref f), .. } if f == "lanes"
        ));
    }

    #[test]
    fn test_drain_timeout_names_actors() {
        let err = ActorError::DrainTimeout {
            actors: vec!["Stalled".to_string()],
            timeout_ms: 5_000,
        };
        let msg = err.to_string();
        assert!(msg.contains("Stalled"));
        assert!(msg.contains("5000ms"));
    }

    #[test]
    fn test_cancellation_detection() {
        assert!(ActorError::Cancelled.is_cancellation());
        assert!(!ActorError::component("boom").is_cancellation());
    }
}
