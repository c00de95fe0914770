use crate::{errors::SchemaError, stream_id::StreamId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One detected object: `bbox` is `[x1, y1, x2, y2]` in frame pixels.
///
/// Serialized as the tuple `[[x1, y1, x2, y2], class_id, confidence]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4],
    pub class_id: u32,
    pub confidence: f32,
}

impl Serialize for Detection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.bbox, self.class_id, self.confidence).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Detection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (bbox, class_id, confidence) = <([f32; 4], u32, f32)>::deserialize(deserializer)?;
        Ok(Self {
            bbox,
            class_id,
            confidence,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Detections,
    Error,
    StreamClosed,
}

/// Unit of output on the shared result channel.
///
/// An empty `detections` list on a `Detections` event means the frame was
/// processed and nothing was found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireEvent", from = "WireEvent")]
pub struct DetectionEvent {
    pub stream_id: StreamId,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub detections: Vec<Detection>,
    pub message: Option<String>,
}

impl DetectionEvent {
    pub fn detections(stream_id: StreamId, detections: Vec<Detection>) -> Self {
        Self {
            stream_id,
            kind: EventKind::Detections,
            timestamp: Utc::now(),
            detections,
            message: None,
        }
    }

    pub fn error(stream_id: StreamId, message: impl Into<String>) -> Self {
        Self {
            stream_id,
            kind: EventKind::Error,
            timestamp: Utc::now(),
            detections: Vec::new(),
            message: Some(message.into()),
        }
    }

    pub fn stream_closed(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            kind: EventKind::StreamClosed,
            timestamp: Utc::now(),
            detections: Vec::new(),
            message: None,
        }
    }

    pub fn to_json(&self) -> Result<String, SchemaError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Serialize, Deserialize)]
struct WireEvent {
    stream_id: StreamId,
    event: EventKind,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Vec<Detection>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    msg: Option<String>,
}

impl From<DetectionEvent> for WireEvent {
    fn from(event: DetectionEvent) -> Self {
        let data = match event.kind {
            EventKind::Detections => Some(event.detections),
            EventKind::Error | EventKind::StreamClosed => None,
        };
        let msg = match event.kind {
            EventKind::Error => event.message,
            EventKind::Detections | EventKind::StreamClosed => None,
        };
        Self {
            stream_id: event.stream_id,
            event: event.kind,
            timestamp: event.timestamp,
            data,
            msg,
        }
    }
}

impl From<WireEvent> for DetectionEvent {
    fn from(wire: WireEvent) -> Self {
        Self {
            stream_id: wire.stream_id,
            kind: wire.event,
            timestamp: wire.timestamp,
            detections: wire.data.unwrap_or_default(),
            message: wire.msg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn cam(id: &str) -> StreamId {
        StreamId::new(id).unwrap()
    }

    #[test]
    fn detection_serializes_as_tuple() {
        let det = Detection {
            bbox: [1.0, 2.0, 30.5, 40.0],
            class_id: 7,
            confidence: 0.5,
        };
        let value = serde_json::to_value(det).unwrap();
        assert_eq!(value, json!([[1.0, 2.0, 30.5, 40.0], 7, 0.5]));
    }

    #[test]
    fn detections_event_carries_data_but_no_msg() {
        let event = DetectionEvent::detections(
            cam("cam1"),
            vec![Detection {
                bbox: [0.0, 0.0, 10.0, 10.0],
                class_id: 0,
                confidence: 0.75,
            }],
        );
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(value["stream_id"], "cam1");
        assert_eq!(value["event"], "detections");
        assert_eq!(value["data"], json!([[[0.0, 0.0, 10.0, 10.0], 0, 0.75]]));
        assert!(value.get("msg").is_none());
        assert!(value.get("timestamp").is_some());
    }

    #[test]
    fn empty_detections_still_emit_data_array() {
        let event = DetectionEvent::detections(cam("cam1"), Vec::new());
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["data"], json!([]));
    }

    #[test]
    fn error_event_carries_msg_only() {
        let event = DetectionEvent::error(cam("cam1"), "read_failed");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["event"], "error");
        assert_eq!(value["msg"], "read_failed");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn stream_closed_event_has_neither_data_nor_msg() {
        let value = serde_json::to_value(DetectionEvent::stream_closed(cam("cam1"))).unwrap();
        assert_eq!(value["event"], "stream_closed");
        assert!(value.get("data").is_none());
        assert!(value.get("msg").is_none());
    }

    #[test]
    fn consumer_can_parse_published_event() {
        let original = DetectionEvent::error(cam("dock-3"), "connect failed");
        let parsed: DetectionEvent =
            serde_json::from_str(&original.to_json().unwrap()).unwrap();
        assert_eq!(parsed, original);
    }
}
