//! The Pool Facade (spec §4.4): options normalization, `send`/`verify`/`close`,
//! `is_idle`, and the `log`/`idle` event streams. Delegates all shared
//! mutable state to the Dispatcher actor; `verify` is the one operation that
//! deliberately bypasses it (spec: "does not affect the pool").

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::dispatcher::{self, Handle, LogEvent, PendingSubmission};
use crate::error::{ConfigError, PoolError};
use crate::mail::{Mail, SendInfo};
use crate::options::{Options, PoolConfig, ResolvedOptions};
use crate::transport::{smtp_manager, SmtpTransportManager, Transport, TransportManager};

/// A pooled sender generic over its `Transport` (the real `SmtpTransport`, or
/// a test double). Most callers want the [`Pool`] alias instead.
pub struct GenericPool<TM: TransportManager> {
    manager: Arc<TM>,
    dispatcher: Handle,
}

impl<TM: TransportManager> GenericPool<TM> {
    /// Build a pool directly from a `TransportManager`, bypassing options
    /// normalization. Mainly useful for tests that supply a mock transport.
    pub fn from_manager(manager: TM, max_connections: u32, max_messages: u32, rate_limit: Option<u32>) -> Self {
        let manager = Arc::new(manager);
        let dispatcher = dispatcher::spawn(manager.clone(), max_connections, max_messages, rate_limit);
        GenericPool { manager, dispatcher }
    }

    /// Enqueue one mail for sending. The returned future resolves once the
    /// submission's callback would have fired: on success, on a transport
    /// error, or with `ClosedPool` if the pool closed before dispatch.
    pub async fn send(&self, mail: Mail) -> Result<SendInfo, PoolError> {
        let envelope = mail
            .resolve_envelope()
            .ok_or_else(|| PoolError::Send(crate::error::TransportError::new("mail has no envelope")))?;
        let message_id = mail.message_id();
        let body = mail.message.create_read_stream();

        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        self.dispatcher.enqueue(PendingSubmission { envelope, message_id, body, reply: reply_tx });
        reply_rx.await.unwrap_or(Err(PoolError::ClosedPool))
    }

    /// Connect, log in, and close a one-shot resource, independent of the
    /// pool's own resources (spec §4.4). Closes on both success and failure
    /// (spec §9 open question: the alternative leaks the connection).
    pub async fn verify(&self) -> Result<(), PoolError> {
        let (mut transport, _events) = self.manager.create();

        if let Err(e) = transport.connect().await {
            transport.close().await;
            return Err(PoolError::Verify(e));
        }
        if let Err(e) = transport.login().await {
            transport.close().await;
            return Err(PoolError::Verify(e));
        }
        transport.close().await;
        Ok(())
    }

    /// Close the pool: no further submission is dispatched, any still queued
    /// receive `ClosedPool`. Idempotent.
    pub async fn close(&self) {
        self.dispatcher.close().await;
    }

    /// True iff a `send` called right now would dispatch without waiting.
    pub fn is_idle(&self) -> bool {
        self.dispatcher.is_idle()
    }

    /// Constant per spec §4.4.
    pub fn name(&self) -> &'static str {
        "SMTP (pool)"
    }

    /// Package version combined with the underlying transport's version.
    pub fn version(&self) -> String {
        let (transport, _events) = self.manager.create();
        format!("smtp-pool/{} ({})", env!("CARGO_PKG_VERSION"), transport.version())
    }

    /// Structured log events: `created`, `available`, `close`, `error`, wire
    /// traffic when `debug` is set.
    pub fn subscribe_log(&self) -> broadcast::Receiver<LogEvent> {
        self.dispatcher.subscribe_log()
    }

    /// Edge-triggered, coalesced notifications of `is_idle()` becoming true.
    pub fn subscribe_idle(&self) -> broadcast::Receiver<()> {
        self.dispatcher.subscribe_idle()
    }
}

/// The pool most callers want: a real TCP/TLS SMTP transport underneath.
pub type Pool = GenericPool<SmtpTransportManager>;

/// Build a pool from a URL string or an [`Options`] value (spec §6
/// `create(options) -> pool`).
pub fn create(config: impl Into<PoolConfig>) -> Result<Pool, ConfigError> {
    let options = match config.into() {
        PoolConfig::Url(url) => Options::parse_url(&url)?,
        PoolConfig::Options(options) => options,
    };
    let resolved = ResolvedOptions::normalize(options)?;
    let max_connections = resolved.max_connections;
    let max_messages = resolved.max_messages;
    let rate_limit = resolved.rate_limit;
    let manager = smtp_manager(Arc::new(resolved));
    Ok(GenericPool::from_manager(manager, max_connections, max_messages, rate_limit))
}
