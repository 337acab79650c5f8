//! Notify/suppress gating and the continuous alert loop.
//!
//! Every inbound message is gated through [`NotificationManager::should_notify`]
//! before anything audible happens. A chat that passes the gate may also get
//! a repeating alert: a per-chat timer task that re-evaluates the gate every
//! interval and stops the first time it fails. At most one timer is live per
//! chat.
//!
//! The viewed set never expires within a session; a chat once viewed stays
//! suppressed until [`NotificationManager::clear_viewed_chats`] or a reload.
//! It is intentionally independent from the read status kept by
//! [`crate::AppState`]: "read" and "notify-suppressed" are separate facts.

use crate::store::{KvStore, SETTINGS_KEY};
use crate::types::message::ChatSettings;
use crate::viewport::Viewport;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

const LOG_TARGET: &str = "Notifier";

/// Sound asset used when a chat has no custom sound configured.
pub const DEFAULT_SOUND: &str = "/sounds/notification.mp3";

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("playback failed: {0}")]
    Playback(String),
}

/// Plays audible alerts. Injected so hosts can wire a real audio backend;
/// playback failures are logged by the caller and never propagate.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn play(&self, sound: &str, volume: f32) -> Result<(), AlertError>;
}

/// Sink that only logs. Default when the host provides no audio backend.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl AlertSink for NullSink {
    async fn play(&self, sound: &str, volume: f32) -> Result<(), AlertError> {
        debug!(target: LOG_TARGET, "Alert (no sink): {sound} at volume {volume}");
        Ok(())
    }
}

/// Aggregate notification state for one chat.
#[derive(Debug, Clone)]
pub struct NotificationStatus {
    pub should_notify: bool,
    pub is_viewed: bool,
    pub is_muted: bool,
    pub is_active: bool,
    pub is_mobile_open: bool,
    pub settings: ChatSettings,
}

pub struct NotificationManager {
    viewport: Arc<Viewport>,
    store: Arc<dyn KvStore>,
    sink: Arc<dyn AlertSink>,
    viewed: DashSet<String>,
    muted: DashSet<String>,
    settings: DashMap<String, ChatSettings>,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    alert_interval: Duration,
    confirm_delay: Duration,
}

impl NotificationManager {
    pub async fn new(
        viewport: Arc<Viewport>,
        store: Arc<dyn KvStore>,
        sink: Arc<dyn AlertSink>,
        alert_interval: Duration,
        confirm_delay: Duration,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            viewport,
            store,
            sink,
            viewed: DashSet::new(),
            muted: DashSet::new(),
            settings: DashMap::new(),
            timers: Mutex::new(HashMap::new()),
            alert_interval,
            confirm_delay,
        });
        manager.load_settings().await;
        manager
    }

    /// The notify/suppress gate, evaluated per inbound message.
    ///
    /// Returns false when the chat is muted, already viewed, visually open
    /// (which also marks it viewed), active in the foreground, disabled, or
    /// filtered by the focus/visibility settings. Otherwise true.
    pub async fn should_notify(&self, chat_id: &str) -> bool {
        let state = self.viewport.snapshot();
        debug!(
            target: LOG_TARGET,
            "Notify check: {chat_id} current={:?} mobile={} focused={} visible={}",
            state.active_chat,
            state.layout.is_mobile(),
            state.window_focused,
            state.page_visible
        );

        if self.muted.contains(chat_id) {
            debug!(target: LOG_TARGET, "Suppressed, chat muted: {chat_id}");
            return false;
        }

        if self.viewed.contains(chat_id) {
            debug!(target: LOG_TARGET, "Suppressed, chat already viewed: {chat_id}");
            return false;
        }

        if state.layout.is_mobile() && self.is_mobile_chat_open(chat_id) {
            debug!(target: LOG_TARGET, "Suppressed, mobile chat open: {chat_id}");
            self.mark_chat_as_viewed(chat_id);
            return false;
        }

        if !state.layout.is_mobile() && self.is_chat_active(chat_id) {
            debug!(target: LOG_TARGET, "Suppressed, desktop chat active: {chat_id}");
            return false;
        }

        if state.active_chat.as_deref() == Some(chat_id)
            && state.window_focused
            && state.page_visible
        {
            debug!(target: LOG_TARGET, "Suppressed, current chat in foreground: {chat_id}");
            return false;
        }

        let settings = self.chat_settings(chat_id).await;
        if settings.disabled {
            return false;
        }
        if state.window_focused && !settings.notify_when_focused {
            return false;
        }
        if !state.page_visible && !settings.notify_when_hidden {
            return false;
        }

        debug!(target: LOG_TARGET, "Should notify: {chat_id}");
        true
    }

    /// Active chat, window focused, page visible.
    pub fn is_chat_active(&self, chat_id: &str) -> bool {
        let state = self.viewport.snapshot();
        state.active_chat.as_deref() == Some(chat_id)
            && state.window_focused
            && state.page_visible
    }

    /// Mobile layout with the chat area shown, the chat active, the window
    /// focused and the page visible.
    pub fn is_mobile_chat_open(&self, chat_id: &str) -> bool {
        let state = self.viewport.snapshot();
        state.layout.is_mobile()
            && state.chat_area_shown
            && state.active_chat.as_deref() == Some(chat_id)
            && state.window_focused
            && state.page_visible
    }

    /// The chat's settings, created with defaults and persisted on first
    /// access.
    pub async fn chat_settings(&self, chat_id: &str) -> ChatSettings {
        if let Some(settings) = self.settings.get(chat_id) {
            return settings.value().clone();
        }
        let settings = ChatSettings::default();
        self.settings
            .insert(chat_id.to_string(), settings.clone());
        self.save_settings().await;
        settings
    }

    /// Mutates the chat's settings in place and persists the collection.
    pub async fn update_chat_settings(
        &self,
        chat_id: &str,
        update: impl FnOnce(&mut ChatSettings),
    ) {
        {
            let mut entry = self
                .settings
                .entry(chat_id.to_string())
                .or_default();
            update(entry.value_mut());
        }
        self.save_settings().await;
        debug!(target: LOG_TARGET, "Settings updated for {chat_id}");
    }

    /// Marks the chat viewed and stops any running alert loop. This is the
    /// convergence point the other components funnel into.
    pub fn mark_chat_as_viewed(&self, chat_id: &str) {
        self.stop_notifications(chat_id);
        info!(target: LOG_TARGET, "Chat marked viewed: {chat_id}");
    }

    pub fn stop_notifications(&self, chat_id: &str) {
        self.stop_continuous(chat_id);
        self.viewed.insert(chat_id.to_string());
    }

    /// Resolves the chat's sound and volume and plays it. Failures are
    /// logged and swallowed; a failed playback still counts as attempted.
    pub async fn play_alert(&self, chat_id: &str) {
        let settings = self.chat_settings(chat_id).await;
        if settings.disabled {
            return;
        }
        let sound = settings.custom_sound.as_deref().unwrap_or(DEFAULT_SOUND);
        if let Err(e) = self.sink.play(sound, settings.volume).await {
            warn!(target: LOG_TARGET, "Alert playback failed for {chat_id}: {e}");
        }
    }

    /// Starts the repeating alert loop for the chat, replacing any running
    /// one. Only runs when `continuous_notifications` is enabled; each tick
    /// re-evaluates [`Self::should_notify`] and the loop ends the first
    /// time it fails.
    pub async fn start_continuous(self: &Arc<Self>, chat_id: &str) {
        let settings = self.chat_settings(chat_id).await;
        if !settings.continuous_notifications {
            return;
        }

        self.stop_continuous(chat_id);

        let weak = Arc::downgrade(self);
        let chat = chat_id.to_string();
        let interval = self.alert_interval;
        let handle = tokio::spawn(async move {
            loop {
                let Some(manager) = weak.upgrade() else { return };
                if !manager.should_notify(&chat).await {
                    manager.clear_timer_entry(&chat);
                    return;
                }
                manager.play_alert(&chat).await;
                drop(manager);
                tokio::time::sleep(interval).await;
            }
        });

        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(chat_id.to_string(), handle);
        debug!(target: LOG_TARGET, "Continuous alerts started for {chat_id}");
    }

    pub fn stop_continuous(&self, chat_id: &str) {
        if let Some(handle) = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(chat_id)
        {
            handle.abort();
            debug!(target: LOG_TARGET, "Continuous alerts stopped for {chat_id}");
        }
    }

    pub fn has_active_timer(&self, chat_id: &str) -> bool {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(chat_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn active_timer_count(&self) -> usize {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// The active chat switched. The previous chat is marked viewed; a new
    /// mobile chat that is already visually open is marked viewed too.
    pub fn handle_chat_changed(&self, previous: Option<&str>, current: Option<&str>) {
        if previous == current {
            return;
        }
        if let Some(prev) = previous {
            self.mark_chat_as_viewed(prev);
        }
        if let Some(chat_id) = current
            && self.viewport.is_mobile()
            && self.is_mobile_chat_open(chat_id)
        {
            self.mark_chat_as_viewed(chat_id);
        }
    }

    /// The mobile chat-open transition finished. Marks the chat viewed and
    /// re-confirms shortly after, in case the viewport settled late.
    pub fn on_mobile_chat_opened(self: &Arc<Self>, chat_id: &str) {
        if !self.viewport.is_mobile() {
            return;
        }
        debug!(target: LOG_TARGET, "Mobile chat opened: {chat_id}");
        self.mark_chat_as_viewed(chat_id);

        let weak = Arc::downgrade(self);
        let chat = chat_id.to_string();
        let delay = self.confirm_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(manager) = weak.upgrade()
                && manager.is_mobile_chat_open(&chat)
            {
                manager.mark_chat_as_viewed(&chat);
            }
        });
    }

    /// The layout crossed the mobile/desktop breakpoint.
    pub fn handle_layout_changed(&self) {
        if self.viewport.is_mobile()
            && let Some(chat_id) = self.viewport.active_chat()
            && self.is_mobile_chat_open(&chat_id)
        {
            self.mark_chat_as_viewed(&chat_id);
        }
    }

    /// The window regained focus.
    pub fn handle_window_focus(&self) {
        if let Some(chat_id) = self.viewport.active_chat() {
            self.mark_chat_as_viewed(&chat_id);
        }
    }

    /// The page became visible again.
    pub fn handle_page_visible(&self) {
        if let Some(chat_id) = self.viewport.active_chat() {
            self.mark_chat_as_viewed(&chat_id);
        }
    }

    pub fn mute_chat(&self, chat_id: &str) {
        self.muted.insert(chat_id.to_string());
        self.stop_notifications(chat_id);
        info!(target: LOG_TARGET, "Chat muted: {chat_id}");
    }

    pub fn unmute_chat(&self, chat_id: &str) {
        self.muted.remove(chat_id);
        info!(target: LOG_TARGET, "Chat unmuted: {chat_id}");
    }

    pub fn is_chat_muted(&self, chat_id: &str) -> bool {
        self.muted.contains(chat_id)
    }

    pub fn is_chat_viewed(&self, chat_id: &str) -> bool {
        self.viewed.contains(chat_id)
    }

    /// Resets the viewed set. Not part of the normal flow; chats stay
    /// suppressed for the session once viewed.
    pub fn clear_viewed_chats(&self) {
        self.viewed.clear();
    }

    pub async fn notification_status(&self, chat_id: &str) -> NotificationStatus {
        NotificationStatus {
            should_notify: self.should_notify(chat_id).await,
            is_viewed: self.viewed.contains(chat_id),
            is_muted: self.muted.contains(chat_id),
            is_active: self.is_chat_active(chat_id),
            is_mobile_open: self.is_mobile_chat_open(chat_id),
            settings: self.chat_settings(chat_id).await,
        }
    }

    fn clear_timer_entry(&self, chat_id: &str) {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(chat_id);
    }

    async fn load_settings(&self) {
        match self.store.get(SETTINGS_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<(String, ChatSettings)>>(&raw) {
                Ok(entries) => {
                    for (chat, settings) in entries {
                        self.settings.insert(chat, settings);
                    }
                }
                Err(e) => {
                    warn!(target: LOG_TARGET, "Corrupt notification settings, starting empty: {e}");
                }
            },
            Ok(None) => {}
            Err(e) => warn!(target: LOG_TARGET, "Failed to load notification settings: {e}"),
        }
    }

    async fn save_settings(&self) {
        let entries: Vec<(String, ChatSettings)> = self
            .settings
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        match serde_json::to_string(&entries) {
            Ok(raw) => {
                if let Err(e) = self.store.set(SETTINGS_KEY, &raw).await {
                    warn!(target: LOG_TARGET, "Failed to persist notification settings: {e}");
                }
            }
            Err(e) => warn!(target: LOG_TARGET, "Failed to serialize notification settings: {e}"),
        }
    }
}

impl Drop for NotificationManager {
    fn drop(&mut self) {
        let timers = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect::<Vec<_>>();
        for (_, handle) in timers {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for NotificationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationManager")
            .field("viewed", &self.viewed.len())
            .field("muted", &self.muted.len())
            .field("active_timers", &self.active_timer_count())
            .finish()
    }
}
