//! In-process transport pair backed by tokio mpsc queues.
//!
//! This is the binding used by the test suite and demos. Both channels move
//! frames the same way; the "unreliable" one is unreliable by contract
//! only, which keeps tests deterministic.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;

use crate::frame::{Frame, PeerId};
use crate::transport::{Channel, Inbound, Transport};
use crate::{Result, WeftError};

const QUEUE_CAPACITY: usize = 256;

enum Side {
    /// Multi-peer side: fan-out map of peer -> that peer's inbound queue.
    Server {
        remotes: DashMap<PeerId, mpsc::Sender<Inbound>>,
    },
    /// Single-peer side: own identity plus the server's inbound queue.
    Client {
        identity: PeerId,
        uplink: mpsc::Sender<Inbound>,
    },
}

pub struct MemoryChannel {
    side: Side,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Inbound>>>,
}

impl MemoryChannel {
    fn server() -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        Arc::new(Self {
            side: Side::Server {
                remotes: DashMap::new(),
            },
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
        })
    }

    fn client(identity: PeerId, uplink: mpsc::Sender<Inbound>) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        Arc::new(Self {
            side: Side::Client { identity, uplink },
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
        })
    }

    fn attach(&self, peer: PeerId, sender: mpsc::Sender<Inbound>) {
        if let Side::Server { remotes } = &self.side {
            remotes.insert(peer, sender);
        }
    }

    fn detach(&self, peer: &PeerId) {
        if let Side::Server { remotes } = &self.side {
            remotes.remove(peer);
        }
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send_to_all(&self, frame: Frame) -> Result<()> {
        match &self.side {
            Side::Server { remotes } => {
                // Snapshot the fan-out set before awaiting any queue.
                let targets: Vec<(PeerId, mpsc::Sender<Inbound>)> = remotes
                    .iter()
                    .map(|e| (e.key().clone(), e.value().clone()))
                    .collect();
                for (peer, tx) in targets {
                    let inbound = Inbound {
                        sender: None,
                        frame: frame.clone(),
                    };
                    if tx.send(inbound).await.is_err() {
                        warn!(peer = %peer, "peer queue closed, dropping frame");
                        remotes.remove(&peer);
                    }
                }
                Ok(())
            }
            Side::Client { .. } => Err(WeftError::TransportUnavailable(
                "send_to_all is a multi-peer side operation".to_string(),
            )),
        }
    }

    async fn send_to_one(&self, peer: &PeerId, frame: Frame) -> Result<()> {
        match &self.side {
            Side::Server { remotes } => {
                let tx = remotes
                    .get(peer)
                    .map(|e| e.value().clone())
                    .ok_or_else(|| {
                        WeftError::TransportUnavailable(format!("unknown peer {peer}"))
                    })?;
                tx.send(Inbound {
                    sender: None,
                    frame,
                })
                .await
                .map_err(|_| WeftError::ChannelClosed)
            }
            Side::Client { .. } => Err(WeftError::TransportUnavailable(
                "send_to_one is a multi-peer side operation".to_string(),
            )),
        }
    }

    async fn send_to_remote(&self, frame: Frame) -> Result<()> {
        match &self.side {
            Side::Client { identity, uplink } => uplink
                .send(Inbound {
                    sender: Some(identity.clone()),
                    frame,
                })
                .await
                .map_err(|_| WeftError::ChannelClosed),
            Side::Server { .. } => Err(WeftError::TransportUnavailable(
                "send_to_remote is a single-peer side operation".to_string(),
            )),
        }
    }

    fn take_incoming(&self) -> Option<mpsc::Receiver<Inbound>> {
        self.inbound_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    fn peers(&self) -> Vec<PeerId> {
        match &self.side {
            Side::Server { remotes } => remotes.iter().map(|e| e.key().clone()).collect(),
            Side::Client { .. } => Vec::new(),
        }
    }
}

/// One endpoint of an in-process link.
///
/// [`MemoryTransport::server`] creates the multi-peer endpoint; clients
/// attach to it with [`MemoryTransport::connect`], each under its own
/// identity.
pub struct MemoryTransport {
    reliable: Arc<MemoryChannel>,
    unreliable: Option<Arc<MemoryChannel>>,
}

impl MemoryTransport {
    /// Multi-peer endpoint with both channels available.
    pub fn server() -> Arc<Self> {
        Arc::new(Self {
            reliable: MemoryChannel::server(),
            unreliable: Some(MemoryChannel::server()),
        })
    }

    /// Multi-peer endpoint that refuses the unreliable channel; attached
    /// clients refuse it as well. Used to exercise graceful degradation.
    pub fn server_reliable_only() -> Arc<Self> {
        Arc::new(Self {
            reliable: MemoryChannel::server(),
            unreliable: None,
        })
    }

    /// Attaches a new single-peer endpoint under `identity`.
    pub fn connect(&self, identity: impl Into<PeerId>) -> Arc<MemoryTransport> {
        let identity = identity.into();

        let reliable = MemoryChannel::client(identity.clone(), self.reliable.inbound_tx.clone());
        self.reliable
            .attach(identity.clone(), reliable.inbound_tx.clone());

        let unreliable = self.unreliable.as_ref().map(|server_side| {
            let channel =
                MemoryChannel::client(identity.clone(), server_side.inbound_tx.clone());
            server_side.attach(identity.clone(), channel.inbound_tx.clone());
            channel
        });

        Arc::new(MemoryTransport {
            reliable,
            unreliable,
        })
    }

    /// Detaches `peer` from both channels of this multi-peer endpoint.
    pub fn disconnect(&self, peer: &PeerId) {
        self.reliable.detach(peer);
        if let Some(unreliable) = &self.unreliable {
            unreliable.detach(peer);
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open_reliable(&self) -> Result<Arc<dyn Channel>> {
        Ok(Arc::clone(&self.reliable) as Arc<dyn Channel>)
    }

    async fn open_unreliable(&self) -> Result<Arc<dyn Channel>> {
        self.unreliable
            .as_ref()
            .map(|c| Arc::clone(c) as Arc<dyn Channel>)
            .ok_or_else(|| {
                WeftError::TransportUnavailable(
                    "unreliable channel refused by this endpoint".to_string(),
                )
            })
    }
}
