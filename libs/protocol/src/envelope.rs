//! Message envelope - the unit of gateway/backend communication.
//!
//! Envelopes travel as one JSON object per line over the backend channel.
//! A request that expects a reply carries `reply_to` (the sender's
//! route-to-self); the matching reply carries `in_reply_to` with the
//! request id and a `status_code`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The structured message unit exchanged between gateway and backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message id, used for request/reply correlation.
    pub id: String,

    /// Message type (the backend command name, e.g. "search").
    #[serde(rename = "type")]
    pub message_type: String,

    /// When the envelope was built.
    pub date: DateTime<Utc>,

    /// Address peers use to route the reply back to the sender.
    /// Present only on requests that expect a reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,

    /// Id of the request this envelope replies to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,

    /// Target dataset on the backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,

    /// Reply status; absent on requests. A value outside 2xx marks a
    /// backend-reported failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    /// Command-specific payload.
    pub body: serde_json::Value,
}

impl Envelope {
    /// Builds a request envelope expecting a correlated reply.
    pub fn request(
        message_type: impl Into<String>,
        body: serde_json::Value,
        dataset: Option<String>,
        reply_to: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type: message_type.into(),
            date: Utc::now(),
            reply_to: Some(reply_to),
            in_reply_to: None,
            dataset,
            status_code: None,
            body,
        }
    }

    /// Builds a fire-and-forget notification envelope.
    pub fn notification(
        message_type: impl Into<String>,
        body: serde_json::Value,
        dataset: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type: message_type.into(),
            date: Utc::now(),
            reply_to: None,
            in_reply_to: None,
            dataset,
            status_code: None,
            body,
        }
    }

    /// Builds a reply correlated to `request`.
    pub fn reply(request: &Envelope, status_code: u16, body: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type: format!("{}.result", request.message_type),
            date: Utc::now(),
            reply_to: None,
            in_reply_to: Some(request.id.clone()),
            dataset: request.dataset.clone(),
            status_code: Some(status_code),
            body,
        }
    }

    /// Whether a reply envelope reports success (2xx, or no status at all).
    pub fn is_success(&self) -> bool {
        matches!(self.status_code, None | Some(200..=299))
    }
}
