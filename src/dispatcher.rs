//! The Queue & Dispatcher (spec §4.2): a single actor task that is the sole
//! mutator of `resources`/`queue`/`closed`/the rate window (spec §5: "the
//! Dispatcher is the sole writer"). Resource actors and timers talk back to
//! it only through `DispatcherEvent`, never by touching its state directly.
//!
//! Grounded on bb8's `SharedPool`/`PoolInternals` (the `Mutex<Vec<Conn>>` plus
//! waiters), generalized from "one mutex guarding a connection list" to "one
//! task owning that list", since resources here run concurrently as their own
//! tasks rather than being checked out synchronously.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::{PoolError, ResourceFault};
use crate::mail::{Envelope, SendInfo};
use crate::rate_limiter::{RateAdmission, RateLimiter};
use crate::resource::{self, ResourceCommand};
use crate::transport::TransportManager;

use std::pin::Pin;
use tokio::io::AsyncRead;

/// A caller's mail, already reduced to what the Dispatcher and resources need
/// (the `Mail`/`MessageBuilder` split is resolved by the Pool Facade before it
/// ever reaches here).
pub(crate) struct PendingSubmission {
    pub(crate) envelope: Envelope,
    pub(crate) message_id: String,
    pub(crate) body: Pin<Box<dyn AsyncRead + Send>>,
    pub(crate) reply: oneshot::Sender<Result<SendInfo, PoolError>>,
}

pub(crate) enum DispatcherCommand {
    Enqueue(PendingSubmission),
    Close(oneshot::Sender<()>),
}

/// Self-addressed notifications: resource lifecycle events and timer fires.
pub(crate) enum DispatcherEvent {
    Available { id: u64 },
    Faulted { id: u64, fault: ResourceFault },
    Log(String),
    RateWindowElapsed,
    Retry,
}

/// One structured log line (spec §4.4/§6: `{type, message}`).
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub kind: LogKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Created,
    Available,
    Close,
    Error,
    Message,
    Wire,
}

struct ResourceEntry {
    id: u64,
    cmd_tx: mpsc::UnboundedSender<ResourceCommand>,
    available: bool,
}

/// Handle held by the Pool Facade to talk to the Dispatcher task.
pub(crate) struct Handle {
    command_tx: mpsc::UnboundedSender<DispatcherCommand>,
    idle: Arc<AtomicBool>,
    log_tx: broadcast::Sender<LogEvent>,
    idle_tx: broadcast::Sender<()>,
}

impl Handle {
    pub(crate) fn enqueue(&self, submission: PendingSubmission) {
        let _ = self.command_tx.send(DispatcherCommand::Enqueue(submission));
    }

    pub(crate) async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.command_tx.send(DispatcherCommand::Close(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Acquire)
    }

    pub(crate) fn subscribe_log(&self) -> broadcast::Receiver<LogEvent> {
        self.log_tx.subscribe()
    }

    pub(crate) fn subscribe_idle(&self) -> broadcast::Receiver<()> {
        self.idle_tx.subscribe()
    }
}

/// Spawn the Dispatcher task and return the handle the Pool Facade uses to
/// talk to it.
pub(crate) fn spawn<TM>(manager: Arc<TM>, max_connections: u32, max_messages: u32, rate_limit: Option<u32>) -> Handle
where
    TM: TransportManager,
{
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (log_tx, _) = broadcast::channel(256);
    let (idle_tx, _) = broadcast::channel(16);
    let idle = Arc::new(AtomicBool::new(true));

    let dispatcher = Dispatcher {
        manager,
        max_connections,
        max_messages,
        resources: Vec::new(),
        queue: VecDeque::new(),
        closed: false,
        next_id: 0,
        rate_limiter: RateLimiter::new(rate_limit),
        was_idle: false,
        idle: idle.clone(),
        log_tx: log_tx.clone(),
        idle_tx: idle_tx.clone(),
        event_tx,
        event_rx,
        command_rx,
    };

    tokio::spawn(dispatcher.run());

    Handle { command_tx, idle, log_tx, idle_tx }
}

struct Dispatcher<TM: TransportManager> {
    manager: Arc<TM>,
    max_connections: u32,
    max_messages: u32,
    resources: Vec<ResourceEntry>,
    queue: VecDeque<PendingSubmission>,
    closed: bool,
    next_id: u64,
    rate_limiter: RateLimiter,
    was_idle: bool,
    idle: Arc<AtomicBool>,
    log_tx: broadcast::Sender<LogEvent>,
    idle_tx: broadcast::Sender<()>,
    event_tx: mpsc::UnboundedSender<DispatcherEvent>,
    event_rx: mpsc::UnboundedReceiver<DispatcherEvent>,
    command_rx: mpsc::UnboundedReceiver<DispatcherCommand>,
}

impl<TM: TransportManager> Dispatcher<TM> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(DispatcherCommand::Enqueue(submission)) => self.on_enqueue(submission),
                        Some(DispatcherCommand::Close(reply)) => {
                            self.on_close();
                            let _ = reply.send(());
                        }
                        None => break,
                    }
                }
                event = self.event_rx.recv() => {
                    match event {
                        Some(DispatcherEvent::Available { id }) => self.on_available(id),
                        Some(DispatcherEvent::Faulted { id, fault }) => self.on_faulted(id, fault),
                        Some(DispatcherEvent::Log(message)) => self.log(LogKind::Wire, message),
                        Some(DispatcherEvent::RateWindowElapsed) => self.on_rate_window_elapsed(),
                        Some(DispatcherEvent::Retry) => self.drain(),
                        None => {}
                    }
                }
            }
        }
    }

    fn log(&self, kind: LogKind, message: impl Into<String>) {
        let message = message.into();
        match kind {
            LogKind::Error => log::warn!("{}", message),
            LogKind::Wire => log::trace!("{}", message),
            _ => log::debug!("{}", message),
        }
        let _ = self.log_tx.send(LogEvent { kind, message });
    }

    fn on_enqueue(&mut self, submission: PendingSubmission) {
        if self.closed {
            let _ = submission.reply.send(Err(PoolError::ClosedPool));
            return;
        }
        self.queue.push_back(submission);
        self.drain();
    }

    /// Idempotent dispatch tick (spec §4.2): assign queued submissions to
    /// available resources, creating new ones up to `max_connections`.
    fn drain(&mut self) {
        if self.closed {
            return;
        }
        loop {
            if self.queue.is_empty() {
                break;
            }
            let idx = if let Some(idx) = self.resources.iter().position(|r| r.available) {
                idx
            } else if (self.resources.len() as u32) < self.max_connections {
                self.spawn_resource()
            } else {
                break;
            };

            let submission = self.queue.pop_front().expect("checked non-empty above");
            self.assign(idx, submission);
        }
        self.update_idle();
    }

    fn spawn_resource(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;

        let (transport, events) = self.manager.create();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        tokio::spawn(resource::run_resource_actor(
            id,
            transport,
            events,
            cmd_rx,
            self.event_tx.clone(),
            self.max_messages,
        ));

        self.log(LogKind::Created, format!("resource {} created", id));
        self.resources.push(ResourceEntry { id, cmd_tx, available: true });
        self.resources.len() - 1
    }

    fn assign(&mut self, idx: usize, submission: PendingSubmission) {
        self.resources[idx].available = false;
        self.rate_limiter.record_dispatch();
        let _ = self.resources[idx].cmd_tx.send(ResourceCommand::Send {
            envelope: submission.envelope,
            message_id: submission.message_id,
            body: submission.body,
            reply: submission.reply,
        });
    }

    fn on_available(&mut self, id: u64) {
        let Some(idx) = self.resources.iter().position(|r| r.id == id) else { return };

        if self.closed {
            let _ = self.resources[idx].cmd_tx.send(ResourceCommand::Close);
            self.resources.remove(idx);
            self.update_idle();
            return;
        }

        match self.rate_limiter.admit(id) {
            RateAdmission::Admitted => {
                self.resources[idx].available = true;
                self.log(LogKind::Available, format!("resource {} available", id));
                self.drain();
            }
            RateAdmission::ClearNow => {
                let ids = self.rate_limiter.clear();
                self.readmit_cleared(ids);
                self.drain();
            }
            RateAdmission::ArmTimer(delay) => {
                let event_tx = self.event_tx.clone();
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = event_tx.send(DispatcherEvent::RateWindowElapsed);
                });
                self.rate_limiter.set_timer(handle);
            }
            RateAdmission::Parked => {}
        }
    }

    fn on_rate_window_elapsed(&mut self) {
        let ids = self.rate_limiter.clear();
        self.readmit_cleared(ids);
        self.drain();
    }

    fn readmit_cleared(&mut self, ids: Vec<u64>) {
        for id in ids {
            let Some(idx) = self.resources.iter().position(|r| r.id == id) else { continue };
            if self.closed {
                let _ = self.resources[idx].cmd_tx.send(ResourceCommand::Close);
                self.resources.remove(idx);
            } else {
                self.resources[idx].available = true;
                self.log(LogKind::Available, format!("resource {} available", id));
            }
        }
    }

    fn on_faulted(&mut self, id: u64, fault: ResourceFault) {
        let Some(idx) = self.resources.iter().position(|r| r.id == id) else { return };
        self.resources.remove(idx);

        match &fault {
            ResourceFault::Connect(msg) => self.log(LogKind::Error, format!("resource {} connect error: {}", id, msg)),
            ResourceFault::Auth(msg) => self.log(LogKind::Error, format!("resource {} auth error: {}", id, msg)),
            ResourceFault::Send(msg) => self.log(LogKind::Error, format!("resource {} send error: {}", id, msg)),
            ResourceFault::Retired => self.log(LogKind::Close, format!("resource {} retired", id)),
            ResourceFault::Exhausted => self.log(LogKind::Close, format!("resource {} exhausted", id)),
        }

        if self.closed {
            self.update_idle();
            return;
        }

        // Avoid a reconnect storm (spec §4.2): reschedule rather than
        // draining synchronously from inside this event handler.
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = event_tx.send(DispatcherEvent::Retry);
        });
        self.update_idle();
    }

    fn on_close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.rate_limiter.cancel();

        let available_ids: Vec<u64> = self.resources.iter().filter(|r| r.available).map(|r| r.id).collect();
        for id in available_ids {
            if let Some(idx) = self.resources.iter().position(|r| r.id == id) {
                let _ = self.resources[idx].cmd_tx.send(ResourceCommand::Close);
                self.resources.remove(idx);
            }
        }

        while let Some(submission) = self.queue.pop_front() {
            let _ = submission.reply.send(Err(PoolError::ClosedPool));
        }

        self.log(LogKind::Close, "pool closed");
        self.update_idle();
    }

    fn update_idle(&mut self) {
        let idle_now = !self.closed
            && (self.resources.iter().any(|r| r.available) || (self.resources.len() as u32) < self.max_connections);
        self.idle.store(idle_now, Ordering::Release);
        if idle_now && !self.was_idle {
            let _ = self.idle_tx.send(());
        }
        self.was_idle = idle_now;
    }
}
