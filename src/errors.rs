// Engine errors
//
// Routing, outcome recording and monitoring never surface errors to the
// caller. The variants below cover the few operations that fail loudly.

use thiserror::Error;

/// Errors returned by the fallible engine operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// Experiment configuration rejected at creation time
    #[error("invalid experiment configuration: {0}")]
    InvalidExperiment(String),

    /// No experiment registered under this id
    #[error("experiment not found: {0}")]
    ExperimentNotFound(String),

    /// Lifecycle transition not allowed from the current status
    #[error("experiment {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    /// Configuration value outside its accepted range
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Background queue already closed by shutdown
    #[error("monitoring queue is closed")]
    QueueClosed,

    /// Engine started outside a tokio runtime
    #[error("engine must be started inside a tokio runtime")]
    NoRuntime,
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
