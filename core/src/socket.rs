//! Socket facade: the role-gated public API over the messaging layer.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::correlate::{RequestCorrelator, DEFAULT_CALL_TIMEOUT};
use crate::dispatch::{Callback, Dispatcher, ListenerHandle, ListenerRegistry};
use crate::frame::{control, Frame, PeerId};
use crate::middleware::{Direction, MiddlewarePipeline};
use crate::parallel::{orchestrate, ParallelOp, ParallelOutcome, Strategy};
use crate::rooms::RoomRegistry;
use crate::transport::{Channel, Transport};
use crate::{Result, WeftError};

/// Which side of the link a socket plays. The multi-peer `Server` side owns
/// rooms and targeted broadcasts; the single-peer `Client` side owns calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Server,
    Client,
}

/// Recognized construction options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Extra per-frame diagnostic tracing. No behavioral effect.
    pub debug: bool,
    /// Attempt to establish the optional unreliable channel.
    pub unreliable: bool,
}

/// Skip set for the except-broadcast family.
#[derive(Debug, Clone)]
pub enum Exclude {
    One(PeerId),
    Many(Vec<PeerId>),
}

impl Exclude {
    fn contains(&self, peer: &PeerId) -> bool {
        match self {
            Exclude::One(p) => p == peer,
            Exclude::Many(ps) => ps.contains(peer),
        }
    }
}

/// Cancellable handle to a broadcast armed with
/// [`Socket::schedule_broadcast`].
pub struct ScheduledBroadcast {
    handle: JoinHandle<()>,
}

impl ScheduledBroadcast {
    /// Cancels the broadcast if it has not fired yet.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

struct Inner {
    role: Role,
    config: SocketConfig,
    reliable: Arc<dyn Channel>,
    unreliable: Option<Arc<dyn Channel>>,
    registry: Arc<ListenerRegistry>,
    correlator: Arc<RequestCorrelator>,
    rooms: RoomRegistry,
    outgoing: Arc<MiddlewarePipeline>,
    incoming: Arc<MiddlewarePipeline>,
}

impl Inner {
    fn spawn_dispatch(&self, channel: &Arc<dyn Channel>) -> Result<()> {
        let rx = channel.take_incoming().ok_or_else(|| {
            WeftError::TransportUnavailable("channel receiver already claimed".to_string())
        })?;
        let dispatcher = Arc::new(Dispatcher {
            registry: Arc::clone(&self.registry),
            correlator: Arc::clone(&self.correlator),
            incoming: Arc::clone(&self.incoming),
            reply_channel: Arc::clone(&self.reliable),
            debug: self.config.debug,
        });
        tokio::spawn(dispatcher.run(rx));
        Ok(())
    }
}

/// One messaging endpoint over a paired channel transport.
///
/// Construct with [`Socket::server`] or [`Socket::client`]; the role gates
/// which operations are legal. All registries are owned per instance.
#[derive(Clone)]
pub struct Socket {
    inner: Arc<Inner>,
}

impl Socket {
    /// Builds the multi-peer side. Answers the reserved echo event so
    /// clients can [`Socket::ping`].
    pub async fn server(transport: Arc<dyn Transport>, config: SocketConfig) -> Result<Socket> {
        let socket = Self::build(Role::Server, transport, config).await?;
        socket
            .inner
            .registry
            .add(control::ECHO, echo_callback(), false)?;
        Ok(socket)
    }

    /// Builds the single-peer side.
    pub async fn client(transport: Arc<dyn Transport>, config: SocketConfig) -> Result<Socket> {
        Self::build(Role::Client, transport, config).await
    }

    async fn build(
        role: Role,
        transport: Arc<dyn Transport>,
        config: SocketConfig,
    ) -> Result<Socket> {
        let reliable = transport.open_reliable().await?;
        let unreliable = if config.unreliable {
            match transport.open_unreliable().await {
                Ok(channel) => Some(channel),
                Err(err) => {
                    warn!(error = %err, "unreliable channel unavailable, degrading to reliable only");
                    None
                }
            }
        } else {
            None
        };

        let inner = Arc::new(Inner {
            role,
            reliable,
            unreliable,
            registry: Arc::new(ListenerRegistry::new()),
            correlator: Arc::new(RequestCorrelator::new()),
            rooms: RoomRegistry::new(),
            outgoing: Arc::new(MiddlewarePipeline::new(Direction::Outgoing)),
            incoming: Arc::new(MiddlewarePipeline::new(Direction::Incoming)),
            config,
        });

        inner.spawn_dispatch(&inner.reliable)?;
        if let Some(channel) = inner.unreliable.clone() {
            inner.spawn_dispatch(&channel)?;
        }

        info!(?role, unreliable = inner.unreliable.is_some(), "socket ready");
        Ok(Socket { inner })
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// True when the optional unreliable channel was established.
    pub fn unreliable_enabled(&self) -> bool {
        self.inner.unreliable.is_some()
    }

    fn require(&self, expected: Role, op: &'static str) -> Result<()> {
        if self.inner.role == expected {
            Ok(())
        } else {
            Err(WeftError::RoleViolation {
                role: self.inner.role,
                op,
            })
        }
    }

    fn unreliable_channel(&self) -> Result<Arc<dyn Channel>> {
        self.inner
            .unreliable
            .clone()
            .ok_or(WeftError::UnreliableNotEnabled)
    }

    // ---- subscriptions -------------------------------------------------

    /// Registers a listener for `event`. Returns a handle usable with
    /// [`Socket::off`]. Reserved control tags are rejected.
    pub fn on<F, Fut>(&self, event: &str, callback: F) -> Result<ListenerHandle>
    where
        F: Fn(Option<PeerId>, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.inner.registry.add(event, wrap_callback(callback), false)
    }

    /// Registers a listener that deregisters itself before its first
    /// invocation, guaranteeing at most one run.
    pub fn once<F, Fut>(&self, event: &str, callback: F) -> Result<ListenerHandle>
    where
        F: Fn(Option<PeerId>, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.inner.registry.add(event, wrap_callback(callback), true)
    }

    /// Removes one listener by handle, or every listener for `event` when
    /// no handle is given.
    pub fn off(&self, event: &str, handle: Option<ListenerHandle>) {
        self.inner.registry.remove(event, handle);
    }

    // ---- middleware ----------------------------------------------------

    /// Appends a transform stage to the incoming pipeline.
    pub fn use_incoming<F>(&self, stage: F)
    where
        F: Fn(Direction, &str, Vec<Value>) -> std::result::Result<(String, Vec<Value>), String>
            + Send
            + Sync
            + 'static,
    {
        self.inner.incoming.push(stage);
    }

    /// Appends a transform stage to the outgoing pipeline.
    pub fn use_outgoing<F>(&self, stage: F)
    where
        F: Fn(Direction, &str, Vec<Value>) -> std::result::Result<(String, Vec<Value>), String>
            + Send
            + Sync
            + 'static,
    {
        self.inner.outgoing.push(stage);
    }

    // ---- emit ----------------------------------------------------------

    /// Publishes `event` on the reliable channel: to every peer from the
    /// server role, to the remote side from the client role.
    pub async fn emit(&self, event: &str, args: Vec<Value>) -> Result<()> {
        let (event, args) = self.inner.outgoing.apply(event.to_string(), args)?;
        if self.inner.config.debug {
            debug!(event = %event, "emit");
        }
        let frame = Frame::event(event, args);
        match self.inner.role {
            Role::Server => self.inner.reliable.send_to_all(frame).await,
            Role::Client => self.inner.reliable.send_to_remote(frame).await,
        }
    }

    /// [`Socket::emit`] over the unreliable channel.
    pub async fn emit_unreliable(&self, event: &str, args: Vec<Value>) -> Result<()> {
        let channel = self.unreliable_channel()?;
        let (event, args) = self.inner.outgoing.apply(event.to_string(), args)?;
        let frame = Frame::event(event, args);
        match self.inner.role {
            Role::Server => channel.send_to_all(frame).await,
            Role::Client => channel.send_to_remote(frame).await,
        }
    }

    /// Server-only: reliable send to one specific peer.
    pub async fn emit_to(&self, peer: &PeerId, event: &str, args: Vec<Value>) -> Result<()> {
        self.require(Role::Server, "emit_to")?;
        let (event, args) = self.inner.outgoing.apply(event.to_string(), args)?;
        self.inner
            .reliable
            .send_to_one(peer, Frame::event(event, args))
            .await
    }

    /// Server-only: unreliable send to one specific peer.
    pub async fn emit_to_unreliable(
        &self,
        peer: &PeerId,
        event: &str,
        args: Vec<Value>,
    ) -> Result<()> {
        self.require(Role::Server, "emit_to_unreliable")?;
        let channel = self.unreliable_channel()?;
        let (event, args) = self.inner.outgoing.apply(event.to_string(), args)?;
        channel.send_to_one(peer, Frame::event(event, args)).await
    }

    // ---- calls ---------------------------------------------------------

    /// Client-only request/response call. Suspends until the response
    /// arrives or `timeout` (default 5s) elapses; a timed-out call always
    /// yields [`WeftError::CallTimeout`], never a hang.
    pub async fn call(
        &self,
        event: &str,
        timeout: Option<Duration>,
        args: Vec<Value>,
    ) -> Result<Value> {
        self.require(Role::Client, "call")?;
        let (event, args) = self.inner.outgoing.apply(event.to_string(), args)?;
        self.inner
            .correlator
            .call(&self.inner.reliable, event, args, timeout)
            .await
    }

    /// Latency probe built entirely from [`Socket::call`] against the
    /// reserved echo event.
    pub async fn ping(&self) -> Result<Duration> {
        self.require(Role::Client, "ping")?;
        let started = Instant::now();
        self.call(control::ECHO, None, Vec::new()).await?;
        Ok(started.elapsed())
    }

    // ---- parallel batches ----------------------------------------------

    /// Client-only: issues every call concurrently and aggregates under
    /// `strategy`.
    pub async fn call_parallel(
        &self,
        ops: Vec<ParallelOp>,
        strategy: Strategy,
    ) -> Result<ParallelOutcome> {
        self.require(Role::Client, "call_parallel")?;
        let run = |op: ParallelOp| {
            let inner = Arc::clone(&self.inner);
            async move {
                let ParallelOp {
                    event,
                    args,
                    timeout,
                } = op;
                let result: Result<Value> = async {
                    let (wire_event, args) = inner.outgoing.apply(event.clone(), args)?;
                    inner
                        .correlator
                        .call(&inner.reliable, wire_event, args, timeout)
                        .await
                }
                .await;
                (event, result)
            }
        };
        Ok(orchestrate(ops, strategy, run).await)
    }

    /// Issues every emit concurrently and aggregates under `strategy`.
    /// Success of one operation means its frame was accepted by the
    /// transport within the operation's bound.
    pub async fn emit_parallel(
        &self,
        ops: Vec<ParallelOp>,
        strategy: Strategy,
    ) -> Result<ParallelOutcome> {
        let run = |op: ParallelOp| {
            let inner = Arc::clone(&self.inner);
            async move {
                let ParallelOp {
                    event,
                    args,
                    timeout,
                } = op;
                let bound = timeout.unwrap_or(DEFAULT_CALL_TIMEOUT);
                let result: Result<Value> = async {
                    let (wire_event, args) = inner.outgoing.apply(event.clone(), args)?;
                    let frame = Frame::event(wire_event, args);
                    let send = async {
                        match inner.role {
                            Role::Server => inner.reliable.send_to_all(frame).await,
                            Role::Client => inner.reliable.send_to_remote(frame).await,
                        }
                    };
                    match tokio::time::timeout(bound, send).await {
                        Ok(Ok(())) => Ok(Value::Bool(true)),
                        Ok(Err(err)) => Err(err),
                        Err(_) => Err(WeftError::CallTimeout {
                            event: event.clone(),
                            timeout: bound,
                        }),
                    }
                }
                .await;
                (event, result)
            }
        };
        Ok(orchestrate(ops, strategy, run).await)
    }

    // ---- rooms ---------------------------------------------------------

    /// Server-only: adds `peer` to `room`, creating the room on first use.
    pub fn join_room(&self, peer: PeerId, room: &str) -> Result<()> {
        self.require(Role::Server, "join_room")?;
        self.inner.rooms.join(peer, room);
        Ok(())
    }

    /// Server-only: removes `peer` from `room`; an emptied room is deleted.
    pub fn leave_room(&self, peer: &PeerId, room: &str) -> Result<()> {
        self.require(Role::Server, "leave_room")?;
        self.inner.rooms.leave(peer, room);
        Ok(())
    }

    /// Server-only: reliable multicast to every current member of `room`.
    /// Returns the number of members reached; a missing room yields
    /// [`WeftError::NoRoom`] and performs no sends (non-fatal, callers may
    /// ignore it).
    pub async fn broadcast_to_room(
        &self,
        room: &str,
        event: &str,
        args: Vec<Value>,
    ) -> Result<usize> {
        self.require(Role::Server, "broadcast_to_room")?;
        let channel = Arc::clone(&self.inner.reliable);
        self.room_send(channel, room, event, args).await
    }

    /// [`Socket::broadcast_to_room`] over the unreliable channel.
    pub async fn broadcast_to_room_unreliable(
        &self,
        room: &str,
        event: &str,
        args: Vec<Value>,
    ) -> Result<usize> {
        self.require(Role::Server, "broadcast_to_room_unreliable")?;
        let channel = self.unreliable_channel()?;
        self.room_send(channel, room, event, args).await
    }

    async fn room_send(
        &self,
        channel: Arc<dyn Channel>,
        room: &str,
        event: &str,
        args: Vec<Value>,
    ) -> Result<usize> {
        let Some(members) = self.inner.rooms.members(room) else {
            let err = WeftError::NoRoom(room.to_string());
            warn!(error = %err, "broadcast to unknown room");
            return Err(err);
        };
        let (event, args) = self.inner.outgoing.apply(event.to_string(), args)?;
        let frame = Frame::event(event, args);
        let mut delivered = 0usize;
        for peer in members {
            match channel.send_to_one(&peer, frame.clone()).await {
                Ok(()) => delivered += 1,
                Err(err) => warn!(peer = %peer, error = %err, "room member unreachable"),
            }
        }
        Ok(delivered)
    }

    // ---- targeted broadcasts -------------------------------------------

    /// Server-only: reliable send to every connected peer not in `skip`.
    /// Returns the number of peers reached.
    pub async fn broadcast_except(
        &self,
        skip: Exclude,
        event: &str,
        args: Vec<Value>,
    ) -> Result<usize> {
        self.require(Role::Server, "broadcast_except")?;
        let channel = Arc::clone(&self.inner.reliable);
        self.except_send(channel, skip, event, args).await
    }

    /// [`Socket::broadcast_except`] over the unreliable channel.
    pub async fn broadcast_except_unreliable(
        &self,
        skip: Exclude,
        event: &str,
        args: Vec<Value>,
    ) -> Result<usize> {
        self.require(Role::Server, "broadcast_except_unreliable")?;
        let channel = self.unreliable_channel()?;
        self.except_send(channel, skip, event, args).await
    }

    async fn except_send(
        &self,
        channel: Arc<dyn Channel>,
        skip: Exclude,
        event: &str,
        args: Vec<Value>,
    ) -> Result<usize> {
        let (event, args) = self.inner.outgoing.apply(event.to_string(), args)?;
        let frame = Frame::event(event, args);
        let mut delivered = 0usize;
        for peer in channel.peers() {
            if skip.contains(&peer) {
                continue;
            }
            match channel.send_to_one(&peer, frame.clone()).await {
                Ok(()) => delivered += 1,
                Err(err) => warn!(peer = %peer, error = %err, "peer unreachable"),
            }
        }
        Ok(delivered)
    }

    /// Server-only: arms a one-shot broadcast of `event` to all peers
    /// after `delay`. Outgoing middleware runs at fire time.
    pub fn schedule_broadcast(
        &self,
        delay: Duration,
        event: &str,
        args: Vec<Value>,
    ) -> Result<ScheduledBroadcast> {
        self.require(Role::Server, "schedule_broadcast")?;
        let inner = Arc::clone(&self.inner);
        let event = event.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let (event, args) = match inner.outgoing.apply(event, args) {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err, "scheduled broadcast rejected by middleware");
                    return;
                }
            };
            if let Err(err) = inner.reliable.send_to_all(Frame::event(event, args)).await {
                warn!(error = %err, "scheduled broadcast failed");
            }
        });
        Ok(ScheduledBroadcast { handle })
    }

    /// Server-only: identities currently connected on the reliable channel.
    pub fn peers(&self) -> Result<Vec<PeerId>> {
        self.require(Role::Server, "peers")?;
        Ok(self.inner.reliable.peers())
    }
}

fn wrap_callback<F, Fut>(callback: F) -> Callback
where
    F: Fn(Option<PeerId>, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |sender, args| callback(sender, args).boxed())
}

fn echo_callback() -> Callback {
    Arc::new(|_sender, args| {
        async move { Ok(args.into_iter().next().unwrap_or(Value::Null)) }.boxed()
    })
}
