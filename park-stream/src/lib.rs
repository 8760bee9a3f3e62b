//! Park Stream - WebSocket client for real-time vehicle events.
//!
//! This crate provides the connection manager for the parking backend's
//! vehicle event stream:
//! - Endpoint discovery over an ordered list of candidate addresses
//! - Automatic reconnection with a linear, capped backoff
//! - Classification of inbound frames into vehicle entry/exit records
//! - Typed publish/subscribe of stream events
//! - A bounded, newest-first history of recent records

pub mod backoff;
pub mod bus;
pub mod classifier;
pub mod endpoint;
pub mod events;
pub mod manager;
pub mod records;

// Re-export key types
pub use backoff::{ReconnectPolicy, ReconnectTimer};
pub use bus::{EventBus, StreamEvent, Subscription, Topic};
pub use classifier::{Classified, MessageClassifier};
pub use endpoint::{
    candidate_urls, Candidate, DiagnosticReport, EndpointResolver, ProbeOutcome, Prober,
    Resolution, WsProber,
};
pub use events::{ConnectionState, Direction, FrameType, VehicleEvent, VehicleKind};
pub use manager::{ConnectionManager, ConnectionStatus};
pub use records::RecordStore;
