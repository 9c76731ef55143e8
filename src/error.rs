//! Error handling for the flowgraph engine
//!
//! This module defines custom error types and a Result alias for use
//! throughout the crate.

use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum FlowgraphError {
    /// A host or process could not be reached
    #[error("Connect error: {0}")]
    Connect(String),

    /// A method was missing, uncallable, or invoked on a null handle
    #[error("Call error: {0}")]
    Call(String),

    /// A native exception was raised inside a remote call
    #[error("Exception: {0}")]
    Exception(String),

    /// Two proxies could not be ordered relative to each other
    #[error("Compare error: {0}")]
    Compare(String),

    /// A property expression failed to evaluate
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Errors related to zone/engine configuration loading or content
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<FlowgraphError>,
    },
}

impl FlowgraphError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        FlowgraphError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create an evaluation error from a Rhai error
    pub fn from_rhai_error(err: Box<rhai::EvalAltResult>) -> Self {
        FlowgraphError::Evaluation(err.to_string())
    }
}

impl From<serde_json::Error> for FlowgraphError {
    fn from(err: serde_json::Error) -> Self {
        FlowgraphError::Serialization(err.to_string())
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, FlowgraphError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, Box<rhai::EvalAltResult>> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| FlowgraphError::from_rhai_error(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| FlowgraphError::from_rhai_error(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FlowgraphError::Call("method 'setGain' not found".to_string());
        assert_eq!(err.to_string(), "Call error: method 'setGain' not found");
    }

    #[test]
    fn test_error_with_context() {
        let err = FlowgraphError::Connect("refused".to_string());
        let with_ctx = err.with_context("Failed to reach zone host");
        assert!(with_ctx.to_string().contains("Failed to reach zone host"));
    }

    #[test]
    fn test_compare_error_display() {
        let err = FlowgraphError::Compare("int64 vs array".to_string());
        assert!(err.to_string().contains("int64 vs array"));
    }
}
