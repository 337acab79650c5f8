//! Message and per-chat notification setting structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A reaction on a message (emoji plus who sent it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,
    pub sender: String,
}

/// A chat message as mirrored from the server.
///
/// The engine never creates messages; it holds a read-only mirror keyed by
/// `id`. Insertion order is irrelevant, readers re-sort by timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message ID
    pub id: String,
    /// Sender chat identifier
    pub from: String,
    /// Recipient chat identifier
    pub to: String,
    /// Whether this message was sent by the current user
    pub from_me: bool,
    /// When the message was sent/received
    pub timestamp: DateTime<Utc>,
    /// Message text content
    pub body: String,
    /// Reactions on this message
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    /// Server-side filename of attached media, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_filename: Option<String>,
}

impl Message {
    /// The chat this message belongs to: the counterparty of the current
    /// user, regardless of direction.
    pub fn chat_id(&self) -> &str {
        if self.from_me { &self.to } else { &self.from }
    }

    /// Whether this message belongs to the given chat, in either direction.
    pub fn belongs_to(&self, chat_id: &str) -> bool {
        self.from == chat_id || self.to == chat_id
    }
}

/// A partial update merged into a stored [`Message`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactions: Option<Vec<Reaction>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_filename: Option<String>,
}

impl MessagePatch {
    /// Merge this patch into `message`. Absent fields are left untouched.
    pub fn apply(&self, message: &mut Message) {
        if let Some(body) = &self.body {
            message.body = body.clone();
        }
        if let Some(reactions) = &self.reactions {
            message.reactions = reactions.clone();
        }
        if let Some(filename) = &self.media_filename {
            message.media_filename = Some(filename.clone());
        }
    }
}

/// Read-status record for a single message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadInfo {
    /// When the message was marked read
    pub timestamp: DateTime<Utc>,
    /// The chat the message was read in
    pub chat_id: String,
}

/// Per-chat notification settings, lazily created with defaults on first
/// access and persisted as one serialized collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    /// Suppress all notifications for this chat
    pub disabled: bool,
    /// Notify even while the window is focused
    pub notify_when_focused: bool,
    /// Notify even while the page is hidden
    pub notify_when_hidden: bool,
    /// Repeat the alert until the chat is viewed or muted
    pub continuous_notifications: bool,
    /// Custom sound asset, falls back to the default when absent
    pub custom_sound: Option<String>,
    /// Playback volume, 0.0 to 1.0
    pub volume: f32,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            disabled: false,
            notify_when_focused: true,
            notify_when_hidden: true,
            continuous_notifications: false,
            custom_sound: None,
            volume: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_message(id: &str, from: &str, to: &str, from_me: bool) -> Message {
        Message {
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            from_me,
            timestamp: Utc.timestamp_opt(1_000, 0).unwrap(),
            body: format!("Message {id}"),
            reactions: Vec::new(),
            media_filename: None,
        }
    }

    #[test]
    fn test_chat_id_follows_direction() {
        let incoming = make_message("1", "alice@c.us", "me@c.us", false);
        assert_eq!(incoming.chat_id(), "alice@c.us");

        let outgoing = make_message("2", "me@c.us", "alice@c.us", true);
        assert_eq!(outgoing.chat_id(), "alice@c.us");
    }

    #[test]
    fn test_belongs_to_either_direction() {
        let msg = make_message("1", "alice@c.us", "me@c.us", false);
        assert!(msg.belongs_to("alice@c.us"));
        assert!(msg.belongs_to("me@c.us"));
        assert!(!msg.belongs_to("bob@c.us"));
    }

    #[test]
    fn test_patch_merges_only_present_fields() {
        let mut msg = make_message("1", "alice@c.us", "me@c.us", false);
        msg.media_filename = Some("photo.jpg".to_string());

        let patch = MessagePatch {
            body: Some("edited".to_string()),
            ..Default::default()
        };
        patch.apply(&mut msg);

        assert_eq!(msg.body, "edited");
        assert_eq!(msg.media_filename.as_deref(), Some("photo.jpg"));
        assert!(msg.reactions.is_empty());
    }

    #[test]
    fn test_settings_defaults() {
        let settings = ChatSettings::default();
        assert!(!settings.disabled);
        assert!(settings.notify_when_focused);
        assert!(settings.notify_when_hidden);
        assert!(!settings.continuous_notifications);
        assert_eq!(settings.volume, 1.0);
    }

    #[test]
    fn test_message_serializes_camel_case() {
        let msg = make_message("1", "alice@c.us", "me@c.us", false);
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("fromMe").is_some());
        assert!(value.get("from_me").is_none());
    }
}
