//! Pool Resource: one pooled slot, driven as its own task so that sends on
//! independent resources genuinely run concurrently. The task is the only
//! mutator of its own `Transport`; it talks to the Dispatcher exclusively
//! through `DispatcherEvent`, never by touching shared state directly (spec
//! §5: "a Resource mutates only its own ... state, and notifies the pool via
//! events").
//!
//! Grounded on bb8's `Conn`/checkout-task shape, generalized from "check out,
//! use once, check back in" to "own a persistent connection across many
//! sequential sends, report back in between".

use std::future::Future;
use std::pin::Pin;

use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot};

use crate::dispatcher::DispatcherEvent;
use crate::error::{PoolError, ResourceFault};
use crate::mail::{Envelope, SendInfo};
use crate::transport::{Transport, TransportEvent};

/// A request routed to a specific resource's actor task.
pub(crate) enum ResourceCommand {
    Send {
        envelope: Envelope,
        message_id: String,
        body: Pin<Box<dyn AsyncRead + Send>>,
        reply: oneshot::Sender<Result<SendInfo, PoolError>>,
    },
    /// Force-close, used when the pool closes an `available` resource.
    Close,
}

/// Drive `op` to completion, but bail out early if the transport reports a
/// spontaneous error or end-of-connection first (spec §4.1: "the completion
/// handler must fire at most once even if the Connection emits both `error`
/// and `end`" — here that race is resolved by `select!` rather than by a
/// detachable listener, since ownership already prevents a double reply).
async fn race<T>(
    op: impl Future<Output = Result<T, crate::error::TransportError>>,
    events: &mut mpsc::UnboundedReceiver<TransportEvent>,
    dispatcher: &mpsc::UnboundedSender<DispatcherEvent>,
) -> Result<T, crate::error::TransportError> {
    tokio::pin!(op);
    loop {
        tokio::select! {
            result = &mut op => return result,
            event = events.recv() => match event {
                Some(TransportEvent::Log(line)) => {
                    let _ = dispatcher.send(DispatcherEvent::Log(line));
                }
                Some(TransportEvent::Error(e)) => return Err(e),
                Some(TransportEvent::End) | None => {
                    return Err(crate::error::TransportError::new("connection ended unexpectedly"))
                }
            },
        }
    }
}

/// Run one resource's whole lifetime: connect+login lazily on first send,
/// then sequential sends until exhaustion, a fatal error, or `Close`.
pub(crate) async fn run_resource_actor<T: Transport + 'static>(
    id: u64,
    mut transport: T,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut commands: mpsc::UnboundedReceiver<ResourceCommand>,
    dispatcher: mpsc::UnboundedSender<DispatcherEvent>,
    max_messages: u32,
) {
    let mut connected = false;
    let mut messages: u32 = 0;

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(ResourceCommand::Send { envelope, message_id, mut body, reply }) => {
                        // `Pin<Box<dyn AsyncRead + Send>>` is itself `Unpin` (the
                        // pointee's pinnedness doesn't matter for a `Box`), so it
                        // coerces to the `Transport::send` signature directly.
                        if !connected {
                            if let Err(e) = race(transport.connect(), &mut events, &dispatcher).await {
                                let fault = ResourceFault::Connect(e.to_string());
                                let _ = reply.send(Err(PoolError::Connect(e)));
                                let _ = dispatcher.send(DispatcherEvent::Faulted { id, fault });
                                transport.close().await;
                                return;
                            }
                            if let Err(e) = race(transport.login(), &mut events, &dispatcher).await {
                                let fault = ResourceFault::Auth(e.to_string());
                                let _ = reply.send(Err(PoolError::Auth(e)));
                                let _ = dispatcher.send(DispatcherEvent::Faulted { id, fault });
                                transport.close().await;
                                return;
                            }
                            connected = true;
                        }

                        match race(transport.send(&envelope, &mut body), &mut events, &dispatcher).await {
                            Err(e) => {
                                let fault = ResourceFault::Send(e.to_string());
                                let _ = reply.send(Err(PoolError::Send(e)));
                                let _ = dispatcher.send(DispatcherEvent::Faulted { id, fault });
                                transport.close().await;
                                return;
                            }
                            Ok(()) => {
                                messages += 1;
                                let info = SendInfo { envelope, message_id };
                                let _ = reply.send(Ok(info));

                                if messages >= max_messages {
                                    let _ = dispatcher.send(DispatcherEvent::Faulted { id, fault: ResourceFault::Exhausted });
                                    transport.close().await;
                                    return;
                                }
                                let _ = dispatcher.send(DispatcherEvent::Available { id });
                            }
                        }
                    }
                    Some(ResourceCommand::Close) | None => {
                        transport.close().await;
                        return;
                    }
                }
            }
            event = events.recv(), if connected => {
                match event {
                    Some(TransportEvent::Log(line)) => {
                        let _ = dispatcher.send(DispatcherEvent::Log(line));
                    }
                    Some(TransportEvent::Error(_)) | Some(TransportEvent::End) | None => {
                        // Died while idle: no in-flight submission to fail, just retire
                        // (spec §9 open question: no pool-level error in this case).
                        let _ = dispatcher.send(DispatcherEvent::Faulted { id, fault: ResourceFault::Retired });
                        transport.close().await;
                        return;
                    }
                }
            }
        }
    }
}
