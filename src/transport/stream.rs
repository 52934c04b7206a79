//! A stream that starts out plain TCP and may be upgraded to TLS in place
//! (STARTTLS), or be TLS from the first byte (implicit TLS).

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::rustls::client::ClientConfig;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::RootCertStore;
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::error::TransportError;

pub(crate) enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    pub(crate) async fn connect_plain(host: &str, port: u16) -> Result<Self, TransportError> {
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| TransportError::with_source(format!("connect to {}:{} failed", host, port), e))?;
        Ok(Stream::Plain(tcp))
    }

    pub(crate) async fn connect_tls(host: &str, port: u16) -> Result<Self, TransportError> {
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| TransportError::with_source(format!("connect to {}:{} failed", host, port), e))?;
        let tls = upgrade(tcp, host).await?;
        Ok(Stream::Tls(Box::new(tls)))
    }

    /// Consume a plain stream and upgrade it to TLS in place (STARTTLS).
    pub(crate) async fn upgrade_to_tls(self, host: &str) -> Result<Self, TransportError> {
        match self {
            Stream::Plain(tcp) => Ok(Stream::Tls(Box::new(upgrade(tcp, host).await?))),
            already_tls => Ok(already_tls),
        }
    }
}

/// Native platform roots, falling back to the bundled Mozilla set when none
/// are found (e.g. a minimal container image with no system trust store).
fn build_root_store() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    if let Ok(certs) = rustls_native_certs::load_native_certs() {
        for cert in certs {
            let _ = root_store.add(cert);
        }
    }
    if root_store.is_empty() {
        root_store.roots = webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
    }
    root_store
}

fn tls_config() -> Arc<ClientConfig> {
    let config = ClientConfig::builder()
        .with_root_certificates(build_root_store())
        .with_no_client_auth();
    Arc::new(config)
}

async fn upgrade(tcp: TcpStream, host: &str) -> Result<TlsStream<TcpStream>, TransportError> {
    let connector = TlsConnector::from(tls_config());
    let server_name = ServerName::try_from(host.to_owned())
        .map_err(|_| TransportError::new(format!("invalid TLS server name: {}", host)))?;
    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| TransportError::with_source("TLS handshake failed", e))
}

impl AsyncRead for Stream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_flush(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
