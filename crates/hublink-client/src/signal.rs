//! Client lifecycle signals and the wait-for-first helper.
//!
//! # Purpose
//! One broadcast bus per client carries lifecycle and control notifications;
//! [`wait_for_any`] resolves with the first signal matching a requested set,
//! failing with the timeout kind when a deadline is given and elapses.
use std::time::Duration;
use tokio::sync::broadcast;

use crate::error::{ClientError, Result};

/// Bus capacity; sized well above the named signals a steady-state client
/// produces so slow receivers rarely lag.
pub(crate) const SIGNAL_BUS_CAPACITY: usize = 64;

/// Notification published on a client's signal bus.
#[derive(Debug, Clone)]
pub enum ClientSignal {
    /// Transport opened.
    Connect,
    /// Transport closed; a reconnect is scheduled.
    Disconnect,
    /// The client was destroyed.
    Destroy,
    /// An RPC failed while at least one bus receiver was attached.
    RpcError { message: String },
    /// The hub asked this module to start producing an event.
    SubscriptionAdded { event_name: String },
    /// The hub withdrew interest in an event.
    SubscriptionRemoved { event_name: String },
    /// A peer module appeared on the hub.
    PeerConnected { module_name: String },
    /// A peer module left the hub.
    PeerDisconnected { module_name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Connect,
    Disconnect,
    Destroy,
    RpcError,
    SubscriptionAdded,
    SubscriptionRemoved,
    PeerConnected,
    PeerDisconnected,
}

impl ClientSignal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::Connect => SignalKind::Connect,
            Self::Disconnect => SignalKind::Disconnect,
            Self::Destroy => SignalKind::Destroy,
            Self::RpcError { .. } => SignalKind::RpcError,
            Self::SubscriptionAdded { .. } => SignalKind::SubscriptionAdded,
            Self::SubscriptionRemoved { .. } => SignalKind::SubscriptionRemoved,
            Self::PeerConnected { .. } => SignalKind::PeerConnected,
            Self::PeerDisconnected { .. } => SignalKind::PeerDisconnected,
        }
    }
}

/// Resolve with the first received signal whose kind is in `kinds`.
///
/// A `None` or zero `timeout` arms no timer. On deadline the call fails
/// with [`ClientError::Timeout`] (`code = "TIMEOUT"`); nothing stays
/// registered on the bus either way.
pub async fn wait_for_any(
    rx: &mut broadcast::Receiver<ClientSignal>,
    kinds: &[SignalKind],
    timeout: Option<Duration>,
) -> Result<ClientSignal> {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(signal) if kinds.contains(&signal.kind()) => return Ok(signal),
                Ok(_) => continue,
                // A lagged receiver keeps waiting; only the requested kinds matter.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(ClientError::Destroyed),
            }
        }
    };
    match timeout {
        Some(deadline) if !deadline.is_zero() => tokio::time::timeout(deadline, wait)
            .await
            .map_err(|_| ClientError::Timeout)?,
        _ => wait.await,
    }
}
