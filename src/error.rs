//! Error types.
//!
//! Mirrors the teacher's `RunError<E>`: a manual `Display`/`Error` impl that
//! distinguishes a user-facing cause from a condition the pool itself raises
//! (timeouts there, a closed pool or failed verify here), rather than pulling
//! in a derive-macro error crate.

use std::error::Error as StdError;
use std::fmt;

/// An error surfaced by the `Transport` collaborator (connect, login, or
/// send failure, or an unexpected end of connection).
#[derive(Debug)]
pub struct TransportError {
    message: String,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl TransportError {
    /// Build a `TransportError` with no underlying cause.
    pub fn new(message: impl Into<String>) -> Self {
        TransportError {
            message: message.into(),
            source: None,
        }
    }

    /// Build a `TransportError` wrapping an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        TransportError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::with_source("i/o error", err)
    }
}

/// The pool's error type, returned to the caller of a single submission or of
/// `verify`/`close`.
///
/// Errors never cross submission boundaries (one `PoolError` belongs to
/// exactly one `send`/`verify` call): the dispatcher never retries a failed
/// submission, it is reported back to the caller that issued it.
#[derive(Debug)]
pub enum PoolError {
    /// Transport or TLS failure before login completed.
    Connect(TransportError),
    /// Login failed, or the server returned an auth-challenge rejection.
    Auth(TransportError),
    /// MAIL/RCPT/DATA rejection, or a mid-transaction socket failure.
    Send(TransportError),
    /// The submission was still queued when `close()` drained the pool.
    ClosedPool,
    /// `verify()` failed to connect or authenticate.
    Verify(TransportError),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Connect(e) => write!(f, "failed to connect: {}", e),
            PoolError::Auth(e) => write!(f, "authentication failed: {}", e),
            PoolError::Send(e) => write!(f, "failed to send message: {}", e),
            PoolError::ClosedPool => write!(f, "pool closed before the message could be sent"),
            PoolError::Verify(e) => write!(f, "verify failed: {}", e),
        }
    }
}

impl StdError for PoolError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            PoolError::Connect(e) | PoolError::Auth(e) | PoolError::Send(e) | PoolError::Verify(e) => {
                Some(e)
            }
            PoolError::ClosedPool => None,
        }
    }
}

/// Error reported while normalizing `Options` (bad URL, unknown well-known
/// service referenced by a caller that requires one, etc). Kept separate from
/// `PoolError` because it belongs to construction, not to a submission.
#[derive(Debug)]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        ConfigError { message: message.into() }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid pool configuration: {}", self.message)
    }
}

impl StdError for ConfigError {}

/// Internal-only signal from a resource actor to the dispatcher. Never
/// returned to a caller; `Exhausted` in particular is explicitly *not*
/// user-visible (§7): it retires the resource but the send that triggered it
/// still reports success to its own caller.
///
/// Carries a rendered message rather than the `TransportError` itself: the
/// same underlying error is also wrapped into the `PoolError` replied to the
/// submission's caller, and `TransportError`'s boxed source isn't `Clone`.
#[derive(Debug)]
pub(crate) enum ResourceFault {
    Connect(String),
    Auth(String),
    Send(String),
    /// The connection ended with nothing in flight (after `Ready`, no send
    /// pending). Not an error: the resource is just retired.
    Retired,
    /// `messages >= max_messages` after a successful send.
    Exhausted,
}
