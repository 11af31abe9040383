//! Listener registry and the inbound dispatch path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::correlate::RequestCorrelator;
use crate::frame::{control, Frame, PeerId};
use crate::middleware::MiddlewarePipeline;
use crate::transport::{Channel, Inbound};
use crate::{Result, WeftError};

/// Boxed async listener callback.
///
/// Receives the sender identity (present on the multi-peer side) and the
/// event arguments. The returned value is ignored for plain events and
/// becomes the call result for call targets.
pub type Callback =
    Arc<dyn Fn(Option<PeerId>, Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Handle returned by `on`/`once`, usable for targeted removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle {
    id: u64,
}

struct ListenerEntry {
    id: u64,
    once: bool,
    callback: Callback,
}

/// Event name -> ordered listener sequence. Insertion order is invocation
/// order. Registration under a reserved control tag is rejected.
pub struct ListenerRegistry {
    listeners: DashMap<String, Vec<ListenerEntry>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn add(&self, event: &str, callback: Callback, once: bool) -> Result<ListenerHandle> {
        if control::is_reserved(event) {
            return Err(WeftError::ReservedEvent(event.to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .entry(event.to_string())
            .or_default()
            .push(ListenerEntry { id, once, callback });
        Ok(ListenerHandle { id })
    }

    /// Removes one listener by handle, or every listener for `event` when
    /// no handle is given.
    pub fn remove(&self, event: &str, handle: Option<ListenerHandle>) {
        match handle {
            Some(handle) => {
                if let Some(mut entry) = self.listeners.get_mut(event) {
                    entry.retain(|l| l.id != handle.id);
                    let empty = entry.is_empty();
                    drop(entry);
                    if empty {
                        self.listeners.remove_if(event, |_, v| v.is_empty());
                    }
                }
            }
            None => {
                self.listeners.remove(event);
            }
        }
    }

    pub fn count(&self, event: &str) -> usize {
        self.listeners.get(event).map(|e| e.len()).unwrap_or(0)
    }

    /// Snapshot of every callback for `event` in registration order. `once`
    /// entries are deregistered before the snapshot is returned, so they
    /// run at most once even under concurrent dispatch.
    fn snapshot(&self, event: &str) -> Vec<Callback> {
        let Some(mut entry) = self.listeners.get_mut(event) else {
            return Vec::new();
        };
        let snapshot: Vec<Callback> = entry.iter().map(|l| Arc::clone(&l.callback)).collect();
        entry.retain(|l| !l.once);
        let empty = entry.is_empty();
        drop(entry);
        if empty {
            self.listeners.remove_if(event, |_, v| v.is_empty());
        }
        snapshot
    }

    /// First listener for `event`, deregistering it when it was registered
    /// with `once`. Call semantics are single-responder.
    fn first(&self, event: &str) -> Option<Callback> {
        let mut entry = self.listeners.get_mut(event)?;
        let head = entry.first()?;
        let callback = Arc::clone(&head.callback);
        let id = head.id;
        let once = head.once;
        if once {
            entry.retain(|l| l.id != id);
        }
        let empty = entry.is_empty();
        drop(entry);
        if empty {
            self.listeners.remove_if(event, |_, v| v.is_empty());
        }
        Some(callback)
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Drains one channel's inbound queue and routes each frame: control frames
/// resolve pending calls or invoke the single call responder, application
/// frames fan out to every listener. Listener failures are contained per
/// invocation and never abort the loop.
pub(crate) struct Dispatcher {
    pub registry: Arc<ListenerRegistry>,
    pub correlator: Arc<RequestCorrelator>,
    pub incoming: Arc<MiddlewarePipeline>,
    /// Responses always travel on the reliable channel.
    pub reply_channel: Arc<dyn Channel>,
    pub debug: bool,
}

impl Dispatcher {
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Inbound>) {
        while let Some(inbound) = rx.recv().await {
            self.dispatch(inbound).await;
        }
        debug!("inbound queue closed, dispatch task exiting");
    }

    pub async fn dispatch(&self, inbound: Inbound) {
        let Inbound { sender, frame } = inbound;
        if self.debug {
            debug!(?sender, ?frame, "inbound frame");
        }
        match frame {
            Frame::Application { event, args } => self.dispatch_event(sender, event, args).await,
            Frame::CallRequest {
                event,
                call_id,
                args,
            } => self.dispatch_call(sender, event, call_id, args).await,
            Frame::CallResponse { call_id, result } => {
                if !self.correlator.resolve(call_id, result) {
                    debug!(%call_id, "discarding stray call response");
                }
            }
        }
    }

    async fn dispatch_event(&self, sender: Option<PeerId>, event: String, args: Vec<Value>) {
        let (event, args) = match self.incoming.apply(event, args) {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "incoming middleware rejected event");
                return;
            }
        };

        let callbacks = self.registry.snapshot(&event);
        if callbacks.is_empty() {
            debug!(event = %event, "no listeners for event");
            return;
        }

        for callback in callbacks {
            if let Err(err) = callback(sender.clone(), args.clone()).await {
                let err = WeftError::Callback {
                    event: event.clone(),
                    message: err.to_string(),
                };
                warn!(error = %err, "listener failed, continuing dispatch");
            }
        }
    }

    async fn dispatch_call(
        &self,
        sender: Option<PeerId>,
        event: String,
        call_id: Uuid,
        args: Vec<Value>,
    ) {
        let (event, args) = match self.incoming.apply(event, args) {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, %call_id, "incoming middleware rejected call");
                return;
            }
        };

        let Some(callback) = self.registry.first(&event) else {
            // Non-fatal: the caller observes its timeout.
            let err = WeftError::NoCallHandler(event.clone());
            warn!(error = %err, %call_id, "call target has no handler");
            return;
        };

        match callback(sender.clone(), args).await {
            Ok(result) => {
                let frame = Frame::CallResponse { call_id, result };
                let delivery = match &sender {
                    Some(peer) => self.reply_channel.send_to_one(peer, frame).await,
                    None => self.reply_channel.send_to_remote(frame).await,
                };
                if let Err(err) = delivery {
                    warn!(event = %event, %call_id, error = %err, "failed to deliver call response");
                }
            }
            Err(err) => {
                let err = WeftError::Callback {
                    event: event.clone(),
                    message: err.to_string(),
                };
                warn!(error = %err, %call_id, "call handler failed, caller will time out");
            }
        }
    }
}
