//! Classification of inbound frames into stream events.
//!
//! Each text frame from the backend is parsed as JSON, routed on its `type`
//! discriminant, and published on the [`EventBus`]. Vehicle frames are also
//! turned into [`VehicleEvent`] records and stored in the [`RecordStore`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use park_core::constants::labels;
use park_core::error::{ParkError, ParkResult};

use crate::bus::{EventBus, StreamEvent};
use crate::events::{Direction, FrameType, VehicleEvent, VehicleKind};
use crate::records::RecordStore;

/// Result of classifying one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// A `vehicleEvent` with a known `eventType`.
    Vehicle(VehicleEvent),
    /// A `vehicleEvent` whose `eventType` is not `carIn`/`carOut`.
    UnknownVehicleEvent { event: String, payload: Value },
    Heartbeat(Value),
    /// Handshake acknowledgement (`success`).
    Handshake(Value),
    /// Any other frame, kept whole.
    Other(Value),
}

/// Turns raw frames into records and bus events.
pub struct MessageClassifier {
    bus: EventBus,
    records: RecordStore,
    next_id: AtomicU64,
}

impl MessageClassifier {
    pub fn new(bus: EventBus, records: RecordStore) -> Self {
        Self {
            bus,
            records,
            next_id: AtomicU64::new(1),
        }
    }

    /// Classify and dispatch one raw frame.
    ///
    /// Malformed frames are logged and dropped. Returns whether the frame
    /// was accepted.
    pub fn handle_frame(&self, raw: &str) -> bool {
        match self.classify(raw) {
            Ok(classified) => {
                self.dispatch(classified);
                true
            }
            Err(e) => {
                warn!("dropping inbound frame: {e}");
                false
            }
        }
    }

    /// Parse and classify a raw frame without publishing anything.
    pub fn classify(&self, raw: &str) -> ParkResult<Classified> {
        let frame: Value = serde_json::from_str(raw)
            .map_err(|e| ParkError::Parse(format!("invalid JSON: {e}")))?;
        self.classify_value(frame)
    }

    /// Classify an already-parsed frame.
    pub fn classify_value(&self, frame: Value) -> ParkResult<Classified> {
        let Value::Object(fields) = frame else {
            return Err(ParkError::Parse("frame is not a JSON object".into()));
        };

        let frame_type = fields
            .get("type")
            .and_then(Value::as_str)
            .map(FrameType::from_str)
            .unwrap_or_else(|| FrameType::Other(String::new()));

        match frame_type {
            FrameType::VehicleEvent => self.classify_vehicle(fields),
            FrameType::Heartbeat => Ok(Classified::Heartbeat(Value::Object(fields))),
            FrameType::Success => Ok(Classified::Handshake(Value::Object(fields))),
            FrameType::Other(_) => Ok(Classified::Other(Value::Object(fields))),
        }
    }

    /// Publish a classified frame. Vehicle records are stored first, then
    /// `CarIn`/`CarOut`, then `RecordAdded`.
    pub fn dispatch(&self, classified: Classified) {
        match classified {
            Classified::Vehicle(event) => {
                let event = Arc::new(event);
                debug!(
                    "vehicle {} #{}: plate={} channel={}",
                    event.direction,
                    event.id,
                    event.plate_or_placeholder(),
                    event.channel
                );
                self.records.append(Arc::clone(&event));
                let directed = match event.direction {
                    Direction::Entry => StreamEvent::CarIn(Arc::clone(&event)),
                    Direction::Exit => StreamEvent::CarOut(Arc::clone(&event)),
                };
                self.bus.emit(directed);
                self.bus.emit(StreamEvent::RecordAdded(event));
            }
            Classified::UnknownVehicleEvent { event, payload } => {
                debug!("unrecognized vehicle event type: {event}");
                self.bus.emit(StreamEvent::Message(serde_json::json!({
                    "event": event,
                    "payload": payload,
                })));
            }
            Classified::Heartbeat(frame) => {
                debug!("heartbeat received");
                self.bus.emit(StreamEvent::Heartbeat(frame));
            }
            Classified::Handshake(frame) => {
                let content = frame.get("content").unwrap_or(&Value::Null);
                debug!("handshake acknowledged: {content}");
                self.bus.emit(StreamEvent::Connected {
                    endpoint: None,
                    ack: Some(frame),
                });
            }
            Classified::Other(frame) => {
                self.bus.emit(StreamEvent::Message(frame));
            }
        }
    }

    fn classify_vehicle(&self, mut fields: Map<String, Value>) -> ParkResult<Classified> {
        let event_type = fields
            .get("eventType")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let payload = fields.remove("data").unwrap_or(Value::Null);

        let Some(direction) = Direction::from_event_type(&event_type) else {
            return Ok(Classified::UnknownVehicleEvent {
                event: event_type,
                payload,
            });
        };
        let Value::Object(data) = &payload else {
            return Err(ParkError::Parse(format!(
                "{event_type} frame without a data object"
            )));
        };

        let plate_number = first_text(data, &["plateNumber", "carNo"]);
        let image_url = first_text(data, &["imageUrl"])
            .or_else(|| {
                data.get("rawData")
                    .and_then(Value::as_object)
                    .and_then(|raw| first_text(raw, &["imageUrl"]))
            })
            .or_else(|| match direction {
                Direction::Exit => first_text(data, &["picpath"]),
                Direction::Entry => None,
            })
            .unwrap_or_default();
        let occurred_at = [direction.time_field(), "createTime", "time"]
            .iter()
            .find_map(|key| data.get(*key).and_then(parse_timestamp))
            .unwrap_or_else(Utc::now);

        let event = VehicleEvent {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            vehicle_kind: VehicleKind::from_plate(plate_number.as_deref()),
            plate_number,
            direction,
            channel: first_text(data, &["channelName", "channel"])
                .unwrap_or_else(|| labels::UNKNOWN_CHANNEL.to_string()),
            vip_label: first_text(data, &["vipName", "vipType"])
                .unwrap_or_else(|| labels::REGULAR_VIP.to_string()),
            image_url,
            yard_name: first_text(data, &["yardName"])
                .unwrap_or_else(|| labels::DEFAULT_YARD_NAME.to_string()),
            yard_code: first_text(data, &["yardCode"])
                .unwrap_or_else(|| labels::DEFAULT_YARD_CODE.to_string()),
            occurred_at,
            raw: payload,
        };
        Ok(Classified::Vehicle(event))
    }
}

/// First non-empty text value among `keys`. Numbers are rendered as text.
fn first_text(data: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match data.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` in local time, and epoch
/// milliseconds (as a number or a digit string).
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                    return Local
                        .from_local_datetime(&naive)
                        .earliest()
                        .map(|dt| dt.with_timezone(&Utc));
                }
            }
            if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                return s
                    .parse::<i64>()
                    .ok()
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
            }
            None
        }
        _ => None,
    }
}
