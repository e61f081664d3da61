//! Coded error type shared across the tunnel data-plane.
//!
//! The core keeps a single taxonomy (this one) rather than pairing a coded
//! error with a parallel retryability-typed error, per the design note in
//! the specification: `retryable`/`alertable` are derived predicates over
//! [`ErrorKind`], not a second type.

use std::collections::HashMap;
use std::fmt;

/// Coded classification of an [`Error`].
///
/// Grouped per the specification's error-handling table (auth/notfound/
/// conflict/request/permission/system/stream/packet, plus the
/// transport/lifecycle kinds the bridge itself raises).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Timeout,
    Cancelled,
    Network,
    Connection,
    ResourceClosed,
    NotConfigured,
    Protocol,
    Cleanup,
    Auth,
    Forbidden,
    Storage,
    Expired,
    NotFound,
    Conflict,
    Request,
    Permission,
    System,
    Stream,
    Packet,
    RateLimited,
    Unavailable,
    Fatal,
}

impl ErrorKind {
    /// Whether an operation that failed with this kind is worth retrying.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::Network
                | ErrorKind::Storage
                | ErrorKind::RateLimited
                | ErrorKind::Unavailable
        )
    }

    /// Whether this kind should page/alert an operator rather than pass
    /// through as routine control flow.
    pub fn alertable(self) -> bool {
        matches!(
            self,
            ErrorKind::Protocol | ErrorKind::Storage | ErrorKind::Auth | ErrorKind::Fatal
        )
    }

    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Network => "network",
            ErrorKind::Connection => "connection",
            ErrorKind::ResourceClosed => "resource-closed",
            ErrorKind::NotConfigured => "not-configured",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Cleanup => "cleanup",
            ErrorKind::Auth => "auth",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Storage => "storage",
            ErrorKind::Expired => "expired",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Request => "request",
            ErrorKind::Permission => "permission",
            ErrorKind::System => "system",
            ErrorKind::Stream => "stream",
            ErrorKind::Packet => "packet",
            ErrorKind::RateLimited => "rate-limited",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named detail value attached to an [`Error`] for structured logging.
#[derive(Debug, Clone, PartialEq)]
pub enum DetailValue {
    Text(String),
    Int(i64),
}

impl From<String> for DetailValue {
    fn from(value: String) -> Self {
        DetailValue::Text(value)
    }
}

impl From<&str> for DetailValue {
    fn from(value: &str) -> Self {
        DetailValue::Text(value.to_string())
    }
}

impl From<i64> for DetailValue {
    fn from(value: i64) -> Self {
        DetailValue::Int(value)
    }
}

/// The coded error type used at every boundary the core crosses.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    details: HashMap<String, DetailValue>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            details: HashMap::new(),
        }
    }

    /// Attach a wrapped cause. Wrapping is additive: the original kind is
    /// kept, the cause is preserved for `Display`/`source()`.
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<DetailValue>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }

    pub fn alertable(&self) -> bool {
        self.kind.alertable()
    }

    pub fn details(&self) -> &HashMap<String, DetailValue> {
        &self.details
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn expired(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Expired, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
