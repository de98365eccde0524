//! Queue record, event, and replay types.

use crate::config::QueueDefaults;
use crate::network::Method;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Configuration for the mutation queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Failed replays after which a mutation is discarded.
    pub max_retries: u32,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: QueueDefaults::MAX_RETRIES,
            event_capacity: QueueDefaults::EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// A write waiting to be delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    /// Caller-supplied id; the store key, not part of the persisted record.
    #[serde(skip)]
    pub id: String,
    pub method: Method,
    pub url: String,
    #[serde(with = "crate::store::encoding::hex_bytes")]
    pub payload: Vec<u8>,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
}

/// Why a mutation left the queue undelivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscardReason {
    /// The server refused it with a 4xx.
    Rejected { status: u16 },
    /// Replay failed too many times.
    RetriesExhausted { retry_count: u32 },
    /// The persisted record could not be decoded.
    Unreadable,
}

impl std::fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscardReason::Rejected { status } => write!(f, "rejected with status {}", status),
            DiscardReason::RetriesExhausted { retry_count } => {
                write!(f, "gave up after {} failed replays", retry_count)
            }
            DiscardReason::Unreadable => write!(f, "unreadable record"),
        }
    }
}

/// Queue lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    Enqueued { id: String },
    Delivered { id: String },
    Discarded { id: String, reason: DiscardReason },
    Retained { id: String, retry_count: u32 },
}

/// Outcome of one delivery attempt during replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendVerdict {
    /// 2xx.
    Delivered,
    /// 4xx; never deliverable.
    Rejected { status: u16 },
    /// No response or 5xx after retries.
    Failed { reason: String },
    /// Nothing attempted, e.g. the circuit is open.
    Deferred { reason: String },
}

/// Delivers queued mutations during replay.
#[async_trait]
pub trait MutationSender: Send + Sync {
    async fn send(&self, mutation: &QueuedMutation) -> SendVerdict;
}

/// Summary of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub delivered: usize,
    pub discarded: usize,
    pub retained: usize,
    /// Whether the pass stopped on a deferred send.
    pub deferred: bool,
    /// Mutations still pending after the pass.
    pub remaining: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persisted_record_layout() {
        let mutation = QueuedMutation {
            id: "m1".into(),
            method: Method::Post,
            url: "https://api.test/chat".into(),
            payload: b"{}".to_vec(),
            enqueued_at: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            retry_count: 0,
        };

        let value = serde_json::to_value(&mutation).unwrap();
        assert_eq!(value["method"], "POST");
        assert_eq!(value["payload"], "7b7d");
        assert_eq!(value["retry_count"], 0);
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_event_serialization() {
        let event = QueueEvent::Discarded {
            id: "m1".into(),
            reason: DiscardReason::Rejected { status: 422 },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"discarded\""));
        assert!(json.contains("\"kind\":\"rejected\""));
    }
}
