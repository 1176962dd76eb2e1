/// Unified error handling for the backend-connection core
///
/// One enum per concern, converted into the umbrella `PoolError` at the
/// boundaries. Severity drives what the per-session supervisor does with a
/// surfaced error: `Fatal` means the session process must not continue.
use std::fmt;
use std::io;
use thiserror::Error;

/// Socket setup failures from the transport layer.
#[derive(Debug, Error)]
#[error("connection to host \"{host}:{port}\" failed: {source}")]
pub struct ConnectError {
    pub host: String,
    pub port: u16,
    #[source]
    pub source: io::Error,
}

/// Which startup-packet field blew the parameter-block capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupField {
    User,
    Database,
}

/// Wire-framing failures.
#[derive(Debug, Error)]
pub enum FrameError {
    /// A parameter (or the block terminator) would not fit the fixed
    /// startup parameter capacity.
    #[error("startup packet field does not fit: {0:?}")]
    Overflow(StartupField),

    /// A startup packet could not be decoded.
    #[error("malformed startup packet: {0}")]
    Malformed(&'static str),
}

/// Session-build failures. Every variant implies all partially-acquired
/// resources were released before the error surfaced.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to make persistent db connection: {0}")]
    Connect(#[from] ConnectError),

    #[error("failed to make persistent db connection: TLS negotiation failed: {0}")]
    TlsNegotiation(String),

    #[error("failed to make persistent db connection: user name is too long")]
    UserTooLong,

    #[error("failed to make persistent db connection: database name is too long")]
    DatabaseTooLong,

    #[error("failed to make persistent db connection: authentication failed: {0}")]
    AuthenticationRejected(String),

    #[error("failed to make persistent db connection: {0}")]
    Io(#[from] io::Error),
}

impl SessionError {
    /// Create a TLS negotiation error
    pub fn tls<S: Into<String>>(message: S) -> Self {
        SessionError::TlsNegotiation(message.into())
    }

    /// Create an authentication rejection
    pub fn auth_rejected<S: Into<String>>(message: S) -> Self {
        SessionError::AuthenticationRejected(message.into())
    }
}

impl From<FrameError> for SessionError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Overflow(StartupField::User) => SessionError::UserTooLong,
            FrameError::Overflow(StartupField::Database) => SessionError::DatabaseTooLong,
            FrameError::Malformed(detail) => {
                SessionError::Io(io::Error::new(io::ErrorKind::InvalidData, detail))
            }
        }
    }
}

/// Version-probe failures. All of these indicate an incompatible backend
/// and classify as fatal: the caller must terminate the session process.
#[derive(Debug, Error)]
pub enum VersionError {
    #[error("unable to create relcache while getting backend version")]
    CacheCreation,

    #[error("unable to search relcache while getting backend version: {0}")]
    QueryFailed(String),

    #[error("unable to parse the backend version string: {0}")]
    Unparsable(String),

    #[error("wrong {component} version: {value}")]
    OutOfRange {
        component: &'static str,
        value: i32,
    },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Umbrella error for core operations
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Version error: {0}")]
    Version(#[from] VersionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for core operations
pub type PoolResult<T> = Result<T, PoolError>;

impl PoolError {
    /// Check if this error is recoverable (the caller may retry or fall back)
    pub fn is_recoverable(&self) -> bool {
        match self {
            PoolError::Session(SessionError::Connect(_)) => true,
            PoolError::Session(SessionError::Io(_)) => true,
            PoolError::Session(_) => false,
            PoolError::Frame(_) => false,
            PoolError::Version(_) => false,
            PoolError::Config(_) => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PoolError::Version(_) => ErrorSeverity::Fatal,
            PoolError::Config(_) => ErrorSeverity::Critical,
            PoolError::Session(SessionError::Connect(_)) => ErrorSeverity::Warning,
            PoolError::Session(SessionError::Io(_)) => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels for logging and supervision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// The session process must terminate
    Fatal,
    /// Errors that require immediate attention
    Critical,
    /// Errors that affect the session but not the process
    Error,
    /// Recoverable conditions worth reporting
    Warning,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Fatal => write!(f, "FATAL"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
        }
    }
}
