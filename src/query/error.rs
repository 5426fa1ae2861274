//! Query error types
//!
//! Structured errors for every stage a sub-query passes through: request
//! validation, statement building, backend execution, row decoding and
//! formula compilation.

use std::fmt;

/// Query error with context
#[derive(Debug)]
pub struct QueryError {
    /// Error kind for programmatic handling
    pub kind: QueryErrorKind,
    /// Human-readable message
    pub message: String,
    /// Optional source error
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl QueryError {
    /// Create a new query error
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Add source error for error chaining
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ParseError, message)
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ValidationError, message)
    }

    /// Create an execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ExecutionError, message)
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Timeout, message)
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::NotFound, message)
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Cancelled, message)
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Internal, message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Categories of query errors for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Expression or payload could not be parsed
    ParseError,
    /// Request is structurally invalid (unknown query type, bad argument)
    ValidationError,
    /// Backend execution failed
    ExecutionError,
    /// Execution exceeded its deadline
    Timeout,
    /// Referenced query or data does not exist
    NotFound,
    /// Execution was cancelled by the caller
    Cancelled,
    /// Internal error (bug, unexpected state)
    Internal,
}

impl QueryErrorKind {
    /// Stable name used in logs and responses
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseError => "ParseError",
            Self::ValidationError => "ValidationError",
            Self::ExecutionError => "ExecutionError",
            Self::Timeout => "Timeout",
            Self::NotFound => "NotFound",
            Self::Cancelled => "Cancelled",
            Self::Internal => "Internal",
        }
    }

    /// Whether the request failed because of the caller's input
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::ParseError | Self::ValidationError | Self::NotFound)
    }
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = QueryError::parse("unexpected token '+' at 3");
        assert_eq!(err.kind, QueryErrorKind::ParseError);
        assert!(err.message.contains("'+'"));
    }

    #[test]
    fn test_error_display() {
        let err = QueryError::validation("unknown query 'B'");
        let display = format!("{}", err);
        assert!(display.contains("ValidationError"));
        assert!(display.contains("'B'"));
    }

    #[test]
    fn test_client_error_kinds() {
        assert!(QueryErrorKind::ValidationError.is_client_error());
        assert!(!QueryErrorKind::Timeout.is_client_error());
        assert!(!QueryErrorKind::Cancelled.is_client_error());
    }

    #[test]
    fn test_error_with_source() {
        use std::error::Error;
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "connection reset");
        let err = QueryError::execution("backend read failed").with_source(io_err);
        assert!(err.source().is_some());
    }
}
