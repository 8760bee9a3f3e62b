//! Inbound frame types and the vehicle event domain model.
//!
//! Defines the frame discriminants pushed by the parking backend, the
//! classified `VehicleEvent` record, and the connection state enum.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use park_core::constants::FUEL_PLATE_LEN;

/// Discriminant (`type` field) of an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Vehicle entry/exit notification (`vehicleEvent`).
    VehicleEvent,
    /// Keep-alive from the backend (`heartbeat`).
    Heartbeat,
    /// Handshake acknowledgement sent after the socket opens (`success`).
    Success,
    /// Any other discriminant, or none at all.
    Other(String),
}

impl FrameType {
    /// Parse a discriminant string from the backend.
    pub fn from_str(s: &str) -> Self {
        match s {
            "vehicleEvent" => Self::VehicleEvent,
            "heartbeat" => Self::Heartbeat,
            "success" => Self::Success,
            other => Self::Other(other.to_string()),
        }
    }

    /// Convert back to the wire discriminant.
    pub fn as_str(&self) -> &str {
        match self {
            Self::VehicleEvent => "vehicleEvent",
            Self::Heartbeat => "heartbeat",
            Self::Success => "success",
            Self::Other(s) => s.as_str(),
        }
    }
}

/// Whether a vehicle entered or left the yard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// `carIn`
    Entry,
    /// `carOut`
    Exit,
}

impl Direction {
    /// Map a nested `eventType` to a direction.
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            "carIn" => Some(Self::Entry),
            "carOut" => Some(Self::Exit),
            _ => None,
        }
    }

    /// The wire `eventType` for this direction.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Entry => "carIn",
            Self::Exit => "carOut",
        }
    }

    /// Payload field carrying the direction-specific timestamp.
    pub fn time_field(&self) -> &'static str {
        match self {
            Self::Entry => "enterTime",
            Self::Exit => "exitTime",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entry => write!(f, "entry"),
            Self::Exit => write!(f, "exit"),
        }
    }
}

/// Vehicle classification derived from the plate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VehicleKind {
    /// Conventional fuel vehicle (7-character plate).
    Fuel,
    /// New-energy vehicle (any other plate length).
    NewEnergy,
    /// No plate was reported.
    Unknown,
}

impl VehicleKind {
    /// Classify by plate length, counted in characters, not bytes.
    pub fn from_plate(plate: Option<&str>) -> Self {
        match plate {
            None | Some("") => Self::Unknown,
            Some(p) if p.chars().count() == FUEL_PLATE_LEN => Self::Fuel,
            Some(_) => Self::NewEnergy,
        }
    }
}

impl std::fmt::Display for VehicleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fuel => write!(f, "fuel"),
            Self::NewEnergy => write!(f, "new-energy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A classified vehicle entry or exit. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleEvent {
    /// Process-unique, increasing identifier.
    pub id: u64,
    /// Plate as reported by the backend.
    pub plate_number: Option<String>,
    pub direction: Direction,
    pub vehicle_kind: VehicleKind,
    /// Gate/lane name.
    pub channel: String,
    /// VIP or membership label.
    pub vip_label: String,
    /// Snapshot image, empty when none was sent.
    pub image_url: String,
    pub yard_name: String,
    pub yard_code: String,
    pub occurred_at: DateTime<Utc>,
    /// The `data` object of the inbound frame.
    pub raw: serde_json::Value,
}

impl VehicleEvent {
    /// Plate for display, with a placeholder when missing.
    pub fn plate_or_placeholder(&self) -> &str {
        self.plate_number.as_deref().unwrap_or("-")
    }
}

/// Connection state of the stream client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected and not trying to connect.
    Disconnected,
    /// Resolving an endpoint or opening the socket.
    Connecting,
    /// Connected and receiving events.
    Connected,
    /// Connection lost, waiting for the next reconnect attempt.
    Reconnecting,
    /// Reconnect budget exhausted or no endpoint reachable.
    Failed,
}

impl ConnectionState {
    /// Whether a connection is open or being opened.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
