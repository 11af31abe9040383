//! Transport contract consumed by the socket layer.
//!
//! The core never binds a wire itself; it talks to a [`Transport`] that
//! opens up to two channels (reliable ordered, optional unreliable) and a
//! [`Channel`] that moves [`Frame`]s. Serialization of frames to bytes is
//! the transport's concern.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::frame::{Frame, PeerId};
use crate::Result;

/// One inbound frame together with the identity the channel attributes it to.
#[derive(Debug)]
pub struct Inbound {
    /// Present when receiving as the multi-peer side, absent on the
    /// single-peer side.
    pub sender: Option<PeerId>,
    pub frame: Frame,
}

/// One established channel (reliable or unreliable).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Channel: Send + Sync {
    /// Deliver to every connected peer (multi-peer side).
    async fn send_to_all(&self, frame: Frame) -> Result<()>;

    /// Deliver to one specific peer (multi-peer side).
    async fn send_to_one(&self, peer: &PeerId, frame: Frame) -> Result<()>;

    /// Deliver to the remote side (single-peer side).
    async fn send_to_remote(&self, frame: Frame) -> Result<()>;

    /// Hands over the single inbound receiver for this channel. Returns
    /// `None` after the first call.
    fn take_incoming(&self) -> Option<mpsc::Receiver<Inbound>>;

    /// Identities currently reachable through this channel. Empty on the
    /// single-peer side.
    fn peers(&self) -> Vec<PeerId>;
}

/// Factory for the two channels of an endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens the required reliable ordered channel. Failure here is fatal
    /// to socket construction.
    async fn open_reliable(&self) -> Result<Arc<dyn Channel>>;

    /// Opens the optional unreliable channel. Failure degrades the socket
    /// to reliable-only operation; it never aborts construction.
    async fn open_unreliable(&self) -> Result<Arc<dyn Channel>>;
}
