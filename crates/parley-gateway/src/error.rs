use thiserror::Error;

use crate::registry::ConnectionId;

/// Failures inside the relay. None of them are fatal to the process; callers
/// log them and move on.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("invalid message: missing {0}")]
    InvalidMessage(&'static str),

    #[error("persistence failed: {0:#}")]
    PersistenceFailure(anyhow::Error),

    #[error("delivery to {0} failed")]
    DeliveryFailure(ConnectionId),
}
