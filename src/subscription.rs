use crate::error::{BridgeError, Result};
use crate::types::{ControllerId, DeviceStatus, SourceId, ZoneId};
use tokio::sync::broadcast;

/// A state change that has been fully applied to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateUpdate {
    /// System power state changed
    System(DeviceStatus),

    /// A zone attribute was set
    Zone {
        controller: ControllerId,
        zone: ZoneId,
        attribute: String,
        value: String,
    },

    /// A source attribute was set
    Source {
        source: SourceId,
        attribute: String,
        value: String,
    },
}

/// Receiver for state updates
pub struct StateReceiver {
    rx: broadcast::Receiver<StateUpdate>,
}

impl StateReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<StateUpdate>) -> Self {
        Self { rx }
    }

    /// Receive the next state update
    pub async fn recv(&mut self) -> Result<StateUpdate> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => BridgeError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(n) => {
                BridgeError::ChannelError(format!("Lagged by {} messages", n))
            }
        })
    }

    /// Try to receive a state update without blocking
    ///
    /// Returns `None` if no update is waiting.
    pub fn try_recv(&mut self) -> Result<Option<StateUpdate>> {
        match self.rx.try_recv() {
            Ok(update) => Ok(Some(update)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(BridgeError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                Err(BridgeError::ChannelError(format!("Lagged by {} messages", n)))
            }
        }
    }
}
