//! In-process events fanned out between the engine components

use std::sync::Arc;
use tokio::sync::broadcast;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

/// A chat was concluded to be genuinely viewed; its messages should be
/// marked read.
#[derive(Debug, Clone)]
pub struct MessagesViewed {
    pub chat_id: String,
}

/// Any pending or repeating alerts for the chat should stop.
#[derive(Debug, Clone)]
pub struct NotificationsStopped {
    pub chat_id: String,
}

/// The unread badge for the chat should be set to `count`.
#[derive(Debug, Clone)]
pub struct BadgesUpdated {
    pub chat_id: String,
    pub count: u32,
}

/// Transient "messages viewed" confirmation indicator shown on mobile.
/// Published with `shown: true` and again with `shown: false` when it
/// self-dismisses.
#[derive(Debug, Clone)]
pub struct ViewIndicator {
    pub chat_id: String,
    pub shown: bool,
}

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus that provides separate broadcast channels for
        /// each event type.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    (messages_viewed, Arc<MessagesViewed>),
    (notifications_stopped, Arc<NotificationsStopped>),
    (badges_updated, Arc<BadgesUpdated>),
    (view_indicator, Arc<ViewIndicator>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
