//! Decides whether a chat is genuinely being viewed right now and fires
//! the "viewed" side effects.
//!
//! "Viewed" is stricter than "selected": on mobile the chat area must be
//! shown, the chat active, the window focused and the page visible, all at
//! once. A successful marking publishes the read/stop/badge events on the
//! bus and is debounced per chat so bursts of viewport signals cannot
//! re-fire it.

use crate::types::events::{
    BadgesUpdated, EventBus, MessagesViewed, NotificationsStopped, ViewIndicator,
};
use crate::viewport::Viewport;
use dashmap::DashMap;
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const LOG_TARGET: &str = "ViewTracker";

/// Minimum fraction of the message list that must be visible for the chat
/// to count as on-screen.
pub const VISIBILITY_THRESHOLD: f64 = 0.5;

pub struct MessageViewTracker {
    viewport: Arc<Viewport>,
    bus: Arc<EventBus>,
    last_view: DashMap<String, Instant>,
    debounce: Duration,
    indicator_duration: Duration,
}

impl MessageViewTracker {
    pub fn new(
        viewport: Arc<Viewport>,
        bus: Arc<EventBus>,
        debounce: Duration,
        indicator_duration: Duration,
    ) -> Self {
        Self {
            viewport,
            bus,
            last_view: DashMap::new(),
            debounce,
            indicator_duration,
        }
    }

    /// Whether the chat is visually open right now.
    ///
    /// Desktop: being the active chat is enough. Mobile: the chat area must
    /// be shown, the chat active, the window focused and the page visible.
    pub fn is_chat_open(&self, chat_id: &str) -> bool {
        let state = self.viewport.snapshot();
        let is_current = state.active_chat.as_deref() == Some(chat_id);

        if !state.layout.is_mobile() {
            return is_current;
        }

        let open = state.chat_area_shown && is_current && state.window_focused && state.page_visible;
        debug!(
            target: LOG_TARGET,
            "Chat open check: {chat_id} shown={} current={is_current} focused={} visible={} -> {open}",
            state.chat_area_shown, state.window_focused, state.page_visible
        );
        open
    }

    /// Concludes the chat was viewed and fires the side effects: messages
    /// marked read, notifications stopped, badge zeroed.
    ///
    /// Unless `force` is set, the call is rejected inside the per-chat
    /// debounce window and when the chat is not visually open. Returns
    /// whether the chat was marked.
    pub fn mark_chat_as_viewed(&self, chat_id: &str, force: bool) -> bool {
        let now = Instant::now();

        if !force {
            if let Some(last) = self.last_view.get(chat_id)
                && now.duration_since(*last) < self.debounce
            {
                debug!(target: LOG_TARGET, "View too recent, ignoring: {chat_id}");
                return false;
            }
            if !self.is_chat_open(chat_id) {
                debug!(target: LOG_TARGET, "Chat not open, not marking viewed: {chat_id}");
                return false;
            }
        }

        debug!(target: LOG_TARGET, "Marking chat as viewed: {chat_id} (force={force})");

        let _ = self.bus.messages_viewed.send(Arc::new(MessagesViewed {
            chat_id: chat_id.to_string(),
        }));
        let _ = self
            .bus
            .notifications_stopped
            .send(Arc::new(NotificationsStopped {
                chat_id: chat_id.to_string(),
            }));
        let _ = self.bus.badges_updated.send(Arc::new(BadgesUpdated {
            chat_id: chat_id.to_string(),
            count: 0,
        }));

        self.last_view.insert(chat_id.to_string(), now);

        if self.viewport.is_mobile() {
            self.show_view_indicator(chat_id);
        }

        true
    }

    /// The active chat switched. The previous chat gets a final viewed
    /// attempt; the new one starts a fresh view session.
    pub fn handle_chat_changed(&self, previous: Option<&str>, current: Option<&str>) {
        if previous == current {
            return;
        }
        if let Some(prev) = previous {
            self.mark_chat_as_viewed(prev, false);
        }
        if let Some(chat_id) = current {
            self.start_tracking(chat_id);
        }
        debug!(target: LOG_TARGET, "Now tracking chat: {current:?}");
    }

    /// The window regained focus.
    pub fn handle_window_focus(&self) {
        if let Some(chat_id) = self.viewport.active_chat() {
            self.mark_chat_as_viewed(&chat_id, false);
        }
    }

    /// The page became visible again.
    pub fn handle_page_visible(&self) {
        if let Some(chat_id) = self.viewport.active_chat() {
            self.mark_chat_as_viewed(&chat_id, false);
        }
    }

    /// The layout crossed the mobile/desktop breakpoint.
    pub fn handle_layout_changed(&self) {
        if self.viewport.is_mobile()
            && let Some(chat_id) = self.viewport.active_chat()
            && self.is_chat_open(&chat_id)
        {
            self.mark_chat_as_viewed(&chat_id, false);
        }
    }

    /// The host reports what fraction of the message list is on screen.
    /// At half or more the chat counts as visible; on mobile that marks it
    /// viewed immediately.
    pub fn handle_chat_visible(&self, visible_ratio: f64) {
        if visible_ratio < VISIBILITY_THRESHOLD {
            return;
        }
        if let Some(chat_id) = self.viewport.active_chat()
            && self.viewport.is_mobile()
        {
            self.mark_chat_as_viewed(&chat_id, false);
        }
    }

    /// The mobile chat-open transition finished; the host calls this once
    /// the chat area is fully shown. Force-marks the chat viewed.
    pub fn on_mobile_chat_opened(&self, chat_id: &str) {
        if !self.viewport.is_mobile() {
            return;
        }
        debug!(target: LOG_TARGET, "Mobile chat opened: {chat_id}");
        self.mark_chat_as_viewed(chat_id, true);
    }

    fn start_tracking(&self, chat_id: &str) {
        // A chat that is already visually open counts as viewed the moment
        // it is selected, on either layout; otherwise just open the view
        // session so the debounce window has a start point.
        if self.is_chat_open(chat_id) && self.mark_chat_as_viewed(chat_id, false) {
            return;
        }
        self.last_view.insert(chat_id.to_string(), Instant::now());
    }

    fn show_view_indicator(&self, chat_id: &str) {
        let _ = self.bus.view_indicator.send(Arc::new(ViewIndicator {
            chat_id: chat_id.to_string(),
            shown: true,
        }));

        let bus = self.bus.clone();
        let chat_id = chat_id.to_string();
        let duration = self.indicator_duration;
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = bus.view_indicator.send(Arc::new(ViewIndicator {
                chat_id,
                shown: false,
            }));
        });
    }
}

impl std::fmt::Debug for MessageViewTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageViewTracker")
            .field("tracked_chats", &self.last_view.len())
            .field("debounce", &self.debounce)
            .finish()
    }
}
