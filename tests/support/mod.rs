//! A deterministic in-memory `Transport`/`TransportManager` pair used by the
//! integration tests, grounded on the same trait boundary `SmtpTransport`
//! implements — no real sockets, so resource lifecycle/dispatch behavior can
//! be exercised without a live SMTP server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, Notify};

use smtp_pool::{Envelope, Transport, TransportError, TransportEvent, TransportManager};

/// Tests call this first so `RUST_LOG=smtp_pool=debug cargo test -- --nocapture`
/// surfaces the pool's structured log events; harmless if called more than once.
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Shared counters the test inspects after a run.
#[derive(Default)]
pub struct Stats {
    pub messages_per_resource: Mutex<HashMap<u64, u32>>,
    pub connects: AtomicU64,
}

impl Stats {
    pub fn resource_count(&self) -> usize {
        self.messages_per_resource.lock().unwrap().len()
    }

    pub fn total_messages(&self) -> u32 {
        self.messages_per_resource.lock().unwrap().values().sum()
    }
}

pub struct MockTransportManager {
    next_id: AtomicU64,
    stats: Arc<Stats>,
    send_gate: Option<Arc<Notify>>,
    connect_fails: bool,
}

impl MockTransportManager {
    pub fn new() -> Self {
        MockTransportManager {
            next_id: AtomicU64::new(0),
            stats: Arc::new(Stats::default()),
            send_gate: None,
            connect_fails: false,
        }
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    /// Every `send` call blocks on this `Notify` before proceeding, letting a
    /// test pause a resource mid-send.
    pub fn with_send_gate(mut self, gate: Arc<Notify>) -> Self {
        self.send_gate = Some(gate);
        self
    }

    /// `connect` always fails, for `verify()`-against-unreachable-host tests.
    pub fn with_connect_failing() -> Self {
        let mut m = Self::new();
        m.connect_fails = true;
        m
    }
}

pub struct MockTransport {
    id: u64,
    stats: Arc<Stats>,
    send_gate: Option<Arc<Notify>>,
    connect_fails: bool,
    events: mpsc::UnboundedSender<TransportEvent>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.connect_fails {
            return Err(TransportError::new("connection refused"));
        }
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn login(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(
        &mut self,
        envelope: &Envelope,
        body: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(), TransportError> {
        if let Some(gate) = &self.send_gate {
            gate.notified().await;
        }

        let mut buf = Vec::new();
        body.read_to_end(&mut buf).await.map_err(TransportError::from)?;

        if envelope.from.0.contains("invalid") {
            return Err(TransportError::new("mailbox unavailable"));
        }

        *self.stats.messages_per_resource.lock().unwrap().entry(self.id).or_insert(0) += 1;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.events.send(TransportEvent::End);
    }

    fn version(&self) -> &str {
        "mock"
    }
}

#[async_trait]
impl TransportManager for MockTransportManager {
    type Transport = MockTransport;

    fn create(&self) -> (MockTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = MockTransport {
            id,
            stats: self.stats.clone(),
            send_gate: self.send_gate.clone(),
            connect_fails: self.connect_fails,
            events: tx,
        };
        (transport, rx)
    }
}
