//! The mail envelope/body builder collaborator (spec §1's "mail envelope/body
//! builder" external dependency), and the `Info` success payload (§3).
//!
//! Grounded on the `MailRequest`/`EnvelopData` split used by the mail-smtp
//! reference crate: a request carries an optional explicit envelope plus the
//! underlying message, and the envelope is derived from headers when absent.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::pin::Pin;

use tokio::io::AsyncRead;

/// A single SMTP mailbox address (`local@domain`, or bare `local` for
/// unqualified addresses passed straight through to the server).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address(pub String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Address(addr.into())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Envelope: sender and recipients, independent of message headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: Address,
    pub to: Vec<Address>,
}

/// Success payload returned for a completed submission (spec §3 `Info`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendInfo {
    pub envelope: Envelope,
    pub message_id: String,
}

/// The out-of-scope "mail envelope/body builder" collaborator: yields an
/// optional envelope, a readable body stream, and header lookups.
pub trait MessageBuilder: Send + Sync {
    /// The envelope as derived from message headers (`From`/`To`), if the
    /// caller didn't supply one explicitly on `Mail`.
    fn get_envelope(&self) -> Option<Envelope> {
        None
    }

    /// A fresh read stream over the rendered message body. Called once per
    /// send attempt (a resource may call this again after a rotate-on-error,
    /// since sends are not retried on the same builder instance concurrently).
    fn create_read_stream(&self) -> Pin<Box<dyn AsyncRead + Send>>;

    /// Look up a header by name (case-insensitive), e.g. `"Message-Id"`.
    fn get_header(&self, name: &str) -> Option<String>;
}

/// A `MessageBuilder` over an already-rendered, fully buffered message. Used
/// by callers who hand the pool finished MIME bytes plus headers instead of
/// building them lazily.
pub struct StaticMessage {
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl StaticMessage {
    pub fn new(headers: HashMap<String, String>, body: Vec<u8>) -> Self {
        StaticMessage { headers, body }
    }
}

impl MessageBuilder for StaticMessage {
    fn create_read_stream(&self) -> Pin<Box<dyn AsyncRead + Send>> {
        Box::pin(io::Cursor::new(self.body.clone()))
    }

    fn get_header(&self, name: &str) -> Option<String> {
        let needle = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_ascii_lowercase() == needle)
            .map(|(_, v)| v.clone())
    }
}

/// One mail to send: an optional explicit envelope plus the message builder.
/// Mirrors the `{ data: { envelope? }, message: Builder }` shape of spec §6.
pub struct Mail {
    pub envelope: Option<Envelope>,
    pub message: Box<dyn MessageBuilder>,
}

impl Mail {
    pub fn new(message: impl MessageBuilder + 'static) -> Self {
        Mail { envelope: None, message: Box::new(message) }
    }

    pub fn with_envelope(envelope: Envelope, message: impl MessageBuilder + 'static) -> Self {
        Mail { envelope: Some(envelope), message: Box::new(message) }
    }

    /// Resolve the envelope to send with: explicit if supplied, else derived
    /// from the message builder's headers.
    pub(crate) fn resolve_envelope(&self) -> Option<Envelope> {
        self.envelope.clone().or_else(|| self.message.get_envelope())
    }

    /// Derive `message_id` from the `Message-Id` header, stripping
    /// `< > whitespace`; empty if absent (spec §3).
    pub(crate) fn message_id(&self) -> String {
        self.message
            .get_header("Message-Id")
            .map(|raw| {
                raw.chars()
                    .filter(|c| !matches!(c, '<' | '>') && !c.is_whitespace())
                    .collect()
            })
            .unwrap_or_default()
    }
}
