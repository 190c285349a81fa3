//! Bus message format.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// The serialized form of a bus message: event metadata plus the payload
/// exactly as it was written to the outbox, never re-encoded.
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    #[serde(rename = "type")]
    pub event_type: &'a str,
    pub aggregate_type: &'a str,
    pub aggregate_id: &'a str,
    pub payload: &'a serde_json::Value,
    pub created_at: DateTime<Utc>,
}
