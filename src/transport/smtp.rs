//! The concrete `Transport`: a persistent SMTP connection driven through
//! connect → EHLO → (STARTTLS → EHLO) → AUTH → many `MAIL`/`RCPT`/`DATA`
//! rounds → QUIT. Request/response only — there is no background reader, so
//! an unsolicited disconnect surfaces as the error of whichever call notices
//! it next rather than as a spontaneous `TransportEvent`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::Duration;

use super::dot_stuffer::DotStuffer;
use super::sasl::{self, Mechanism};
use super::stream::Stream;
use super::{Transport, TransportEvent, TransportManager};
use crate::error::TransportError;
use crate::mail::Envelope;
use crate::options::ResolvedOptions;

/// Races `fut` against `duration`, reporting a timeout as a plain
/// `TransportError` (the resource actor treats it like any other send/connect
/// failure — spec §8 scenario 7 "in-flight timeout").
async fn with_timeout<T>(
    duration: Duration,
    fut: impl std::future::Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::new(format!("timed out after {:?}", duration))),
    }
}

pub struct SmtpTransport {
    options: Arc<ResolvedOptions>,
    conn: Option<BufReader<Stream>>,
    capabilities: Vec<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl SmtpTransport {
    fn new(options: Arc<ResolvedOptions>, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        SmtpTransport { options, conn: None, capabilities: Vec::new(), events }
    }

    fn trace(&self, line: &str) {
        if self.options.debug {
            let _ = self.events.send(TransportEvent::Log(line.to_owned()));
        }
    }

    fn conn_mut(&mut self) -> Result<&mut BufReader<Stream>, TransportError> {
        self.conn.as_mut().ok_or_else(|| TransportError::new("not connected"))
    }

    async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.trace(&format!("C: {}", line));
        let timeout = self.options.socket_timeout;
        let conn = self.conn_mut()?;
        with_timeout(timeout, async {
            conn.write_all(line.as_bytes()).await?;
            conn.write_all(b"\r\n").await?;
            conn.flush().await?;
            Ok(())
        })
        .await
    }

    /// Read one SMTP response, following `-` continuation lines, returning the
    /// status code and the text of each line (continuation marker stripped).
    /// Each line is individually bound by `socket_timeout` (spec §8 scenario 7:
    /// a peer that accepts `RCPT` but never acknowledges `DATA` must fail that
    /// send rather than hang the resource forever).
    async fn read_response(&mut self) -> Result<(u16, Vec<String>), TransportError> {
        let mut lines = Vec::new();
        loop {
            let mut raw = String::new();
            let timeout = self.options.socket_timeout;
            let n = with_timeout(timeout, async { Ok(self.conn_mut()?.read_line(&mut raw).await?) }).await?;
            if n == 0 {
                return Err(TransportError::new("connection closed while awaiting response"));
            }
            let trimmed = raw.trim_end_matches(['\r', '\n']);
            self.trace(&format!("S: {}", trimmed));
            if trimmed.len() < 4 {
                return Err(TransportError::new(format!("malformed response line: {:?}", trimmed)));
            }
            let code: u16 = trimmed[..3]
                .parse()
                .map_err(|_| TransportError::new(format!("malformed response code: {:?}", trimmed)))?;
            let sep = trimmed.as_bytes()[3];
            lines.push(trimmed[4..].to_owned());
            if sep == b' ' {
                return Ok((code, lines));
            }
            if sep != b'-' {
                return Err(TransportError::new(format!("malformed response separator: {:?}", trimmed)));
            }
        }
    }

    async fn expect(&mut self, wanted: u16) -> Result<Vec<String>, TransportError> {
        let (code, lines) = self.read_response().await?;
        if code != wanted {
            return Err(TransportError::new(format!(
                "expected {} response, got {} ({})",
                wanted,
                code,
                lines.join("; ")
            )));
        }
        Ok(lines)
    }

    async fn expect_2xx(&mut self) -> Result<Vec<String>, TransportError> {
        let (code, lines) = self.read_response().await?;
        if code / 100 != 2 {
            return Err(TransportError::new(format!("command rejected: {} ({})", code, lines.join("; "))));
        }
        Ok(lines)
    }

    async fn ehlo(&mut self) -> Result<(), TransportError> {
        let name = self.options.name.clone();
        self.write_line(&format!("EHLO {}", name)).await?;
        let lines = self.expect(250).await?;
        self.capabilities = lines
            .into_iter()
            .skip(1)
            .map(|l| l.to_ascii_uppercase())
            .collect();
        Ok(())
    }

    fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability || c.starts_with(&format!("{} ", capability)))
    }

    fn auth_methods(&self) -> Vec<String> {
        self.capabilities
            .iter()
            .find_map(|c| c.strip_prefix("AUTH "))
            .map(|rest| rest.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let host = self.options.host.as_str();
        let port = self.options.port;

        let connect_timeout = self.options.connection_timeout;
        let stream = with_timeout(connect_timeout, async {
            if self.options.secure {
                Stream::connect_tls(host, port).await
            } else {
                Stream::connect_plain(host, port).await
            }
        })
        .await?;
        self.conn = Some(BufReader::new(stream));

        with_timeout(self.options.greeting_timeout, self.expect(220)).await?;
        self.ehlo().await?;

        if !self.options.secure && !self.options.ignore_tls && self.supports("STARTTLS") {
            self.write_line("STARTTLS").await?;
            self.expect(220).await?;
            let plain = self.conn.take().expect("connected").into_inner();
            let upgraded = plain.upgrade_to_tls(host).await?;
            self.conn = Some(BufReader::new(upgraded));
            self.capabilities.clear();
            self.ehlo().await?;
        }

        Ok(())
    }

    async fn login(&mut self) -> Result<(), TransportError> {
        let auth = match &self.options.auth {
            Some(auth) => auth.clone(),
            None => return Ok(()),
        };

        let server_methods = self.auth_methods();
        let mechanism = Mechanism::select(&auth, self.options.auth_method.as_deref(), &server_methods)?;

        let initial = sasl::initial_response(mechanism, &auth);
        match initial {
            Some(payload) => self.write_line(&format!("AUTH {} {}", mechanism.name(), payload)).await?,
            None => self.write_line(&format!("AUTH {}", mechanism.name())).await?,
        }

        let mut step = 0usize;
        loop {
            let (code, lines) = self.read_response().await?;
            match code {
                235 => return Ok(()),
                334 => {
                    let reply = sasl::respond_to_challenge(mechanism, &auth, step)?;
                    self.write_line(&reply).await?;
                    step += 1;
                }
                other => {
                    return Err(TransportError::new(format!(
                        "AUTH {} rejected: {} ({})",
                        mechanism.name(),
                        other,
                        lines.join("; ")
                    )))
                }
            }
        }
    }

    async fn send(
        &mut self,
        envelope: &Envelope,
        body: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(), TransportError> {
        self.write_line(&format!("MAIL FROM:<{}>", envelope.from)).await?;
        self.expect_2xx().await?;

        for rcpt in &envelope.to {
            self.write_line(&format!("RCPT TO:<{}>", rcpt)).await?;
            self.expect_2xx().await?;
        }

        self.write_line("DATA").await?;
        self.expect(354).await?;

        let mut stuffer = DotStuffer::new();
        let mut read_buf = [0u8; 8192];
        let mut out = Vec::with_capacity(8192);
        loop {
            let n = body
                .read(&mut read_buf)
                .await
                .map_err(|e| TransportError::with_source("failed reading message body", e))?;
            if n == 0 {
                break;
            }
            out.clear();
            stuffer.process_chunk(&read_buf[..n], |chunk| out.extend_from_slice(chunk));
            let timeout = self.options.socket_timeout;
            let conn = self.conn_mut()?;
            with_timeout(timeout, async { Ok(conn.write_all(&out).await?) }).await?;
        }
        out.clear();
        stuffer.end_message(|chunk| out.extend_from_slice(chunk));
        let timeout = self.options.socket_timeout;
        let conn = self.conn_mut()?;
        with_timeout(timeout, async {
            conn.write_all(&out).await?;
            Ok(conn.flush().await?)
        })
        .await?;

        self.expect_2xx().await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            let _ = conn.write_all(b"QUIT\r\n").await;
            let _ = conn.flush().await;
            let _ = conn.shutdown().await;
        }
        self.conn = None;
        let _ = self.events.send(TransportEvent::End);
    }

    fn version(&self) -> &str {
        "smtp"
    }
}

pub struct SmtpTransportManager {
    options: Arc<ResolvedOptions>,
}

impl SmtpTransportManager {
    pub(crate) fn new(options: Arc<ResolvedOptions>) -> Self {
        SmtpTransportManager { options }
    }
}

#[async_trait]
impl TransportManager for SmtpTransportManager {
    type Transport = SmtpTransport;

    fn create(&self) -> (SmtpTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SmtpTransport::new(self.options.clone(), tx), rx)
    }
}
