//! Parley gateway: room membership, fan-out, and transcript persistence
//! behind a WebSocket connection loop.

pub mod connection;
pub mod error;
pub mod reconciler;
pub mod registry;
pub mod relay;
pub mod router;

pub use error::RelayError;
pub use reconciler::{RecordOutcome, Reconciler, TranscriptRequest};
pub use registry::{ConnectionId, ConnectionRegistry, Outbound};
pub use relay::{DispatchOutcome, MessageDispatch, Relay, RelayEvent};
pub use router::{BroadcastReport, DeliverySink, RoomRouter};
