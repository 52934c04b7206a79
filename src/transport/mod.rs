//! The SMTP wire protocol client: spec §1's "opaque collaborator exposing a
//! `connect/login/send/close` surface plus error/end events". `Transport` is
//! the trait boundary; `smtp::SmtpTransport` is the real implementation.
//!
//! Events are modeled as a channel rather than string-keyed emitter
//! subscriptions (spec §9 DESIGN NOTES: "model each as a typed signal").

mod dot_stuffer;
mod sasl;
mod smtp;
mod stream;

pub use smtp::{SmtpTransport, SmtpTransportManager};

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::mail::Envelope;
use crate::options::ResolvedOptions;

/// A notification from the transport not tied to the call currently in
/// flight: wire traffic (when `debug` is set), a spontaneous error, or the
/// connection ending. The resource actor races these against its current
/// `connect`/`login`/`send` future.
#[derive(Debug)]
pub enum TransportEvent {
    Log(String),
    Error(TransportError),
    End,
}

/// Minimal contract for a pooled SMTP session. One instance is driven by
/// exactly one resource actor at a time; `connect`/`login` run once, `send`
/// runs once per message on the same persistent connection.
#[async_trait]
pub trait Transport: Send {
    /// Establish the transport connection (TCP/TLS). Called once, lazily, on
    /// the resource's first `send`.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Authenticate, if credentials were configured. Called once, right
    /// after a successful `connect`.
    async fn login(&mut self) -> Result<(), TransportError>;

    /// Send one message over the already-established connection.
    async fn send(
        &mut self,
        envelope: &Envelope,
        body: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(), TransportError>;

    /// Force-close the underlying connection. Idempotent.
    async fn close(&mut self);

    /// A short identifier for this transport implementation, folded into
    /// `Pool::version()` (spec §4.4).
    fn version(&self) -> &str;
}

/// Creates fresh `Transport` instances bound to a shared configuration.
/// Analogous to the teacher's `ManageConnection`, generalized from
/// "a connection the pool health-checks on checkout" to "a session the pool
/// authenticates once and then drives through many sequential sends".
#[async_trait]
pub trait TransportManager: Send + Sync + 'static {
    type Transport: Transport + 'static;

    /// Build a not-yet-connected transport, plus the event channel it will
    /// use to report spontaneous log/error/end notifications.
    fn create(&self) -> (Self::Transport, mpsc::UnboundedReceiver<TransportEvent>);
}

/// `TransportManager` for the real, TCP/TLS-backed `SmtpTransport`.
pub(crate) fn smtp_manager(options: std::sync::Arc<ResolvedOptions>) -> SmtpTransportManager {
    SmtpTransportManager::new(options)
}
