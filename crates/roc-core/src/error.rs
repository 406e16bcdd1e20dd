//! Unified error type for the engine.
//!
//! The original teacher crate (`spark-core::error`) layers `ImplError` ->
//! `DomainError` -> `CoreError`, each adding distributed-system context
//! (trace ids, peer addresses, node ids) that this engine has no use for.
//! `EngineError` collapses that into one struct: a stable category, a
//! human message, and an optional boxed cause — enough to drive the
//! propagation rules in spec.md §7 without carrying unused tiers.

use std::borrow::Cow;
use std::fmt;

/// Drives the automated propagation policy described in spec.md §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Socket read/write failure.
    Io,
    /// Framing, parity, short payload, unexpected message type.
    Protocol,
    /// Unknown client name, HMAC mismatch, or timestamp skew.
    AuthRejected,
    /// Peer advertised an incompatible protocol version byte.
    VersionMismatch,
    /// RequestSet was at capacity; this RoC was evicted.
    TooManyRequests,
    /// An exception escaped a request handler.
    Handler,
    /// The connection is tearing down; delivered to every live RoC once.
    Shutdown,
    /// A deadline elapsed.
    Timeout,
    /// A shared pool or free-list could not satisfy a request.
    ResourceExhausted,
}

impl ErrorCategory {
    /// Whether this category represents an orderly connection teardown
    /// that handlers must propagate rather than swallow.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Io | Self::Protocol | Self::Shutdown)
    }
}

type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The engine's sole error type.
#[derive(Debug)]
pub struct EngineError {
    category: ErrorCategory,
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<Cause>,
}

impl EngineError {
    pub fn new(
        category: ErrorCategory,
        code: &'static str,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            category,
            code,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }

    pub fn io(code: &'static str, err: std::io::Error) -> Self {
        Self::new(ErrorCategory::Io, code, err.to_string()).with_cause(err)
    }

    pub fn protocol(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCategory::Protocol, code, message)
    }

    pub fn auth_rejected(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCategory::AuthRejected, code, message)
    }

    pub fn version_mismatch(local: u8, peer: u8) -> Self {
        Self::new(
            ErrorCategory::VersionMismatch,
            "handshake.version_mismatch",
            format!("local version {local} does not match peer version {peer}"),
        )
    }

    pub fn too_many_requests() -> Self {
        Self::new(
            ErrorCategory::TooManyRequests,
            "request_set.too_many_requests",
            "request set is at capacity; evicted the least recently active request",
        )
    }

    pub fn handler(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCategory::Handler, code, message)
    }

    pub fn shutdown_requested() -> Self {
        Self::new(
            ErrorCategory::Shutdown,
            "connection.shutdown_requested",
            "connection is shutting down",
        )
    }

    pub fn timed_out(code: &'static str) -> Self {
        Self::new(ErrorCategory::Timeout, code, "operation timed out")
    }

    pub fn resource_exhausted(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCategory::ResourceExhausted, code, message)
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause()
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_io_cause_and_exposes_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err = EngineError::io("wire.read", io_err);
        assert_eq!(err.category(), ErrorCategory::Io);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn too_many_requests_is_not_terminal() {
        let err = EngineError::too_many_requests();
        assert!(!err.category().is_terminal());
    }
}
