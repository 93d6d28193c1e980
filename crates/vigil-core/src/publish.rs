//! Downstream publication interface.
//!
//! The tracker fans state changes out through a [`Publisher`] registry it
//! holds behind `Arc<dyn Publisher>`. The registry is fire-and-forget: a
//! subscriber that cannot keep up is the registry's problem, never the state
//! machine's.

use serde::Serialize;

/// Fan-out registry the tracker pushes serialized payloads to.
pub trait Publisher: Send + Sync {
    fn publish(&self, payload: &[u8]);
}

/// No-op registry for tests and headless runs.
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn publish(&self, _payload: &[u8]) {}
}

#[derive(Serialize)]
struct CountPayload {
    #[serde(rename = "type")]
    kind: &'static str,
    count: u64,
}

/// Serialize the count notification: `{"type":"count","count":<n>}`.
pub fn count_payload(count: u64) -> Vec<u8> {
    serde_json::to_vec(&CountPayload {
        kind: "count",
        count,
    })
    .expect("count payload serialization cannot fail")
}
