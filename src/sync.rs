//! Cross-instance state replication.
//!
//! Sibling instances of the same account (browser tabs in the original
//! deployment) exchange tagged JSON envelopes over a shared bus. Envelopes
//! carry `{type, data, timestamp, source}`; anything without the expected
//! `source` tag is foreign traffic and is silently ignored. Replication is
//! last-write-wins per key with no conflict resolution: each instance
//! replays received effects locally and consistency is eventual.

use crate::types::message::{Message, MessagePatch};
use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::broadcast;

/// Source tag carried by every envelope this engine emits.
pub const ENVELOPE_SOURCE: &str = "privapp";

const BUS_CAPACITY: usize = 256;
const LOG_TARGET: &str = "SyncBus";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to encode envelope: {0}")]
    Encode(String),
    #[error("failed to decode envelope: {0}")]
    Decode(String),
}

/// The replicated state-change effects, one per known envelope type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum SyncPayload {
    MessageAdded {
        message: Message,
    },
    MessageUpdated {
        message_id: String,
        updates: MessagePatch,
    },
    MessageRead {
        message_id: String,
        chat_id: String,
    },
    ChatChanged {
        previous_chat: Option<String>,
        current_chat: Option<String>,
    },
    BadgeUpdated {
        chat_id: String,
        count: u32,
    },
    NotificationsStopped {
        chat_id: String,
    },
}

/// The wire envelope: a payload plus metadata identifying the emitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEnvelope {
    #[serde(flatten)]
    pub payload: SyncPayload,
    /// Milliseconds since the Unix epoch at emit time.
    pub timestamp: i64,
    pub source: String,
}

impl SyncEnvelope {
    pub fn new(payload: SyncPayload) -> Self {
        Self {
            payload,
            timestamp: Utc::now().timestamp_millis(),
            source: ENVELOPE_SOURCE.to_string(),
        }
    }
}

/// Decodes a raw envelope.
///
/// Returns `Ok(None)` for foreign traffic (missing or different `source`
/// tag). Unknown envelope types and malformed JSON are errors; callers log
/// and drop them.
pub fn decode_envelope(raw: &str) -> Result<Option<SyncEnvelope>, SyncError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| SyncError::Decode(e.to_string()))?;
    if value.get("source").and_then(Value::as_str) != Some(ENVELOPE_SOURCE) {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| SyncError::Decode(e.to_string()))
}

#[derive(Debug, Clone)]
struct Frame {
    origin: u64,
    raw: Arc<str>,
}

/// In-process replication bus. Each participating instance opens one
/// [`SyncChannel`]; frames are delivered to every channel except the one
/// that sent them, mirroring browser `BroadcastChannel` semantics.
#[derive(Debug)]
pub struct SyncBus {
    tx: broadcast::Sender<Frame>,
    next_origin: AtomicU64,
}

impl SyncBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            tx,
            next_origin: AtomicU64::new(1),
        }
    }

    pub fn channel(&self) -> SyncChannel {
        SyncChannel {
            origin: self.next_origin.fetch_add(1, Ordering::Relaxed),
            tx: self.tx.clone(),
        }
    }
}

impl Default for SyncBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One instance's handle on the bus.
#[derive(Debug, Clone)]
pub struct SyncChannel {
    origin: u64,
    tx: broadcast::Sender<Frame>,
}

impl SyncChannel {
    /// Wraps the payload in an envelope and publishes it. Having no peers
    /// is not an error.
    pub fn send(&self, payload: SyncPayload) -> Result<(), SyncError> {
        let envelope = SyncEnvelope::new(payload);
        let raw = serde_json::to_string(&envelope).map_err(|e| SyncError::Encode(e.to_string()))?;
        let _ = self.tx.send(Frame {
            origin: self.origin,
            raw: raw.into(),
        });
        Ok(())
    }

    pub fn subscribe(&self) -> SyncSubscription {
        SyncSubscription {
            origin: self.origin,
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving side of a [`SyncChannel`]; skips frames this instance sent.
pub struct SyncSubscription {
    origin: u64,
    rx: broadcast::Receiver<Frame>,
}

impl SyncSubscription {
    /// Next raw envelope from a sibling instance, or `None` when the bus
    /// is gone.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(frame) if frame.origin != self.origin => return Some(frame.raw.to_string()),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(target: LOG_TARGET, "Dropped {n} envelopes, sync state may lag");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_wire_format() {
        let envelope = SyncEnvelope::new(SyncPayload::BadgeUpdated {
            chat_id: "x@c.us".to_string(),
            count: 5,
        });
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["type"], "badge-updated");
        assert_eq!(value["data"]["chatId"], "x@c.us");
        assert_eq!(value["data"]["count"], 5);
        assert_eq!(value["source"], "privapp");
        assert!(value["timestamp"].is_i64());
    }

    #[test]
    fn test_decode_known_envelope() {
        let raw = json!({
            "type": "badge-updated",
            "data": {"chatId": "x@c.us", "count": 5},
            "timestamp": 1_700_000_000_000_i64,
            "source": "privapp",
        })
        .to_string();

        let envelope = decode_envelope(&raw).unwrap().unwrap();
        assert_eq!(
            envelope.payload,
            SyncPayload::BadgeUpdated {
                chat_id: "x@c.us".to_string(),
                count: 5
            }
        );
    }

    #[test]
    fn test_decode_ignores_foreign_source() {
        let raw = json!({
            "type": "badge-updated",
            "data": {"chatId": "x@c.us", "count": 5},
            "timestamp": 0,
            "source": "somebody-else",
        })
        .to_string();
        assert!(decode_envelope(&raw).unwrap().is_none());

        let no_source = json!({"type": "badge-updated", "data": {}}).to_string();
        assert!(decode_envelope(&no_source).unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let raw = json!({
            "type": "mystery-event",
            "data": {},
            "timestamp": 0,
            "source": "privapp",
        })
        .to_string();
        assert!(decode_envelope(&raw).is_err());
    }

    #[tokio::test]
    async fn test_bus_skips_own_frames() {
        let bus = SyncBus::new();
        let a = bus.channel();
        let b = bus.channel();

        let mut sub_a = a.subscribe();
        let mut sub_b = b.subscribe();

        a.send(SyncPayload::NotificationsStopped {
            chat_id: "x@c.us".to_string(),
        })
        .unwrap();

        // b sees a's frame
        let raw = sub_b.recv().await.unwrap();
        let envelope = decode_envelope(&raw).unwrap().unwrap();
        assert!(matches!(
            envelope.payload,
            SyncPayload::NotificationsStopped { .. }
        ));

        // a does not see its own frame
        b.send(SyncPayload::NotificationsStopped {
            chat_id: "y@c.us".to_string(),
        })
        .unwrap();
        let raw = sub_a.recv().await.unwrap();
        let envelope = decode_envelope(&raw).unwrap().unwrap();
        assert_eq!(
            envelope.payload,
            SyncPayload::NotificationsStopped {
                chat_id: "y@c.us".to_string()
            }
        );
    }
}
