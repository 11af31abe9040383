//! Request/response correlation for the call protocol.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::frame::Frame;
use crate::transport::Channel;
use crate::{Result, WeftError};

/// Applied when a call or parallel operation does not carry its own bound.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

type PendingMap = DashMap<Uuid, oneshot::Sender<Value>>;

/// Tracks one pending-response slot per outstanding call id.
///
/// Each slot is fulfilled at most once: the first matching response removes
/// it, and later responses for the same id find nothing to resolve. A slot
/// is also reclaimed when its call future is dropped (timeout or batch
/// cancellation), so a late response can never fulfill an abandoned call.
pub struct RequestCorrelator {
    pending: Arc<PendingMap>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Number of calls currently awaiting a response.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Fulfills the pending slot for `call_id`. Returns false when no such
    /// slot exists (late or stray response).
    pub fn resolve(&self, call_id: Uuid, result: Value) -> bool {
        match self.pending.remove(&call_id) {
            Some((_, tx)) => tx.send(result).is_ok(),
            None => false,
        }
    }

    fn register(&self) -> (Uuid, oneshot::Receiver<Value>, PendingGuard) {
        let call_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(call_id, tx);
        let guard = PendingGuard {
            call_id,
            pending: Arc::clone(&self.pending),
        };
        (call_id, rx, guard)
    }

    /// Issues one call over `channel` and suspends until the response
    /// arrives or `timeout` (default 5s) elapses. The caller must have run
    /// outgoing middleware already; `event` and `args` go out as-is.
    pub(crate) async fn call(
        &self,
        channel: &Arc<dyn Channel>,
        event: String,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let bound = timeout.unwrap_or(DEFAULT_CALL_TIMEOUT);
        let (call_id, rx, _guard) = self.register();
        debug!(event = %event, %call_id, ?bound, "issuing call");

        channel
            .send_to_remote(Frame::CallRequest {
                event: event.clone(),
                call_id,
                args,
            })
            .await?;

        match tokio::time::timeout(bound, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(WeftError::ChannelClosed),
            Err(_) => Err(WeftError::CallTimeout {
                event,
                timeout: bound,
            }),
        }
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

/// Reclaims the pending slot when the owning call future goes away.
struct PendingGuard {
    call_id: Uuid,
    pending: Arc<PendingMap>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.remove(&self.call_id);
    }
}
