use chrono::{DateTime, Utc};
use probelink_protocol::BasicDeliver;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Where and when a delivery came from. Not part of the downstream JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Arrival {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    pub app_id: Option<String>,
    pub headers: Vec<(String, String)>,
    pub received_at: DateTime<Utc>,
}

/// What the subscriber hands downstream: `{"id": <uuid>, "payload": <body>}`.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub id: Uuid,
    pub payload: Value,
    #[serde(skip)]
    pub arrival: Arrival,
}

impl Envelope {
    /// Bodies that are not JSON are carried as a JSON string.
    pub fn from_delivery(delivery: &BasicDeliver) -> Self {
        let payload = serde_json::from_slice(&delivery.body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&delivery.body).into_owned()));

        Envelope {
            id: Uuid::new_v4(),
            payload,
            arrival: Arrival {
                delivery_tag: delivery.delivery_tag,
                redelivered: delivery.redelivered,
                exchange: delivery.exchange.clone(),
                routing_key: delivery.routing_key.clone(),
                app_id: delivery.properties.app_id.clone(),
                headers: delivery.properties.headers.clone(),
                received_at: Utc::now(),
            },
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({ "id": self.id, "payload": self.payload })
    }
}
