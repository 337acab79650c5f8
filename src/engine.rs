//! Explicit construction and wiring of the engine components.
//!
//! [`Engine::builder`] builds one [`Viewport`], one [`EventBus`] and the
//! three components around them, then spawns the dispatch tasks that turn
//! view-tracker events into state mutations. The host talks to the engine
//! only: it feeds messages in, reports every viewport transition, and
//! switches the active chat.

use crate::app_state::AppState;
use crate::notifications::{AlertSink, NotificationManager, NullSink};
use crate::store::{KvStore, MemoryStore};
use crate::sync::SyncChannel;
use crate::types::events::EventBus;
use crate::types::message::Message;
use crate::view_tracker::MessageViewTracker;
use crate::viewport::{Layout, ViewState, Viewport};
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const LOG_TARGET: &str = "Engine";

/// Tunable engine parameters. The defaults match the original deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Widths at or below this are the mobile layout.
    pub mobile_breakpoint: f32,
    /// Per-chat window within which repeated "viewed" markings are ignored.
    pub view_debounce: Duration,
    /// Interval between continuous alert repetitions.
    pub alert_interval: Duration,
    /// Delay before re-confirming a mobile chat open.
    pub mobile_open_confirm_delay: Duration,
    /// How long the mobile view-confirmation indicator stays up.
    pub indicator_duration: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mobile_breakpoint: Layout::MOBILE_MAX,
            view_debounce: Duration::from_millis(2000),
            alert_interval: Duration::from_millis(2000),
            mobile_open_confirm_delay: Duration::from_millis(300),
            indicator_duration: Duration::from_millis(2300),
        }
    }
}

pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn KvStore>>,
    sync: Option<SyncChannel>,
    sink: Option<Arc<dyn AlertSink>>,
    initial_view: ViewState,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Connects this engine to a sync bus. Without a channel the engine
    /// runs in single-instance mode.
    pub fn sync_channel(mut self, channel: SyncChannel) -> Self {
        self.sync = Some(channel);
        self
    }

    pub fn alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn initial_view(mut self, state: ViewState) -> Self {
        self.initial_view = state;
        self
    }

    pub async fn build(self) -> Arc<Engine> {
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let sink = self.sink.unwrap_or_else(|| Arc::new(NullSink));

        let viewport = Arc::new(Viewport::new(
            self.initial_view,
            self.config.mobile_breakpoint,
        ));
        let bus = Arc::new(EventBus::new());

        let app_state = AppState::new(viewport.clone(), store.clone(), self.sync).await;
        let notifier = NotificationManager::new(
            viewport.clone(),
            store,
            sink,
            self.config.alert_interval,
            self.config.mobile_open_confirm_delay,
        )
        .await;
        let tracker = Arc::new(MessageViewTracker::new(
            viewport.clone(),
            bus.clone(),
            self.config.view_debounce,
            self.config.indicator_duration,
        ));

        let engine = Arc::new(Engine {
            viewport,
            bus,
            app_state,
            tracker,
            notifier,
            tasks: Mutex::new(Vec::new()),
        });
        engine.spawn_dispatchers();
        engine
    }
}

pub struct Engine {
    viewport: Arc<Viewport>,
    bus: Arc<EventBus>,
    app_state: Arc<AppState>,
    tracker: Arc<MessageViewTracker>,
    notifier: Arc<NotificationManager>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder {
            config: EngineConfig::default(),
            store: None,
            sync: None,
            sink: None,
            initial_view: ViewState::default(),
        }
    }

    pub fn viewport(&self) -> &Arc<Viewport> {
        &self.viewport
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn app_state(&self) -> &Arc<AppState> {
        &self.app_state
    }

    pub fn tracker(&self) -> &Arc<MessageViewTracker> {
        &self.tracker
    }

    pub fn notifier(&self) -> &Arc<NotificationManager> {
        &self.notifier
    }

    /// Ingests one message from the host (push or poll, possibly
    /// duplicated). Returns whether the message was new. A new incoming
    /// message that passes the notify gate plays an alert, bumps the badge
    /// and, when configured, starts the continuous alert loop.
    pub async fn ingest(&self, message: Message) -> bool {
        let chat_id = message.chat_id().to_string();
        let from_me = message.from_me;

        if !self.app_state.add_message(message) {
            return false;
        }

        if !from_me && self.notifier.should_notify(&chat_id).await {
            self.notifier.play_alert(&chat_id).await;
            let count = self.app_state.get_badge_count(&chat_id) + 1;
            self.app_state.update_badge_count(&chat_id, count).await;
            self.notifier.start_continuous(&chat_id).await;
        }

        true
    }

    /// Full replace of the message mirror (host refresh path).
    pub fn set_messages(&self, messages: Vec<Message>) {
        self.app_state.set_messages(messages);
    }

    /// Switches the active chat and fans the change out to all components.
    pub async fn set_current_chat(&self, chat_id: Option<&str>) {
        let previous = self.app_state.set_current_chat(chat_id).await;
        if previous.as_deref() != chat_id {
            self.tracker.handle_chat_changed(previous.as_deref(), chat_id);
            self.notifier.handle_chat_changed(previous.as_deref(), chat_id);
        }
    }

    pub fn window_focused(&self) {
        self.viewport.set_window_focused(true);
        self.tracker.handle_window_focus();
        self.notifier.handle_window_focus();
    }

    pub fn window_blurred(&self) {
        self.viewport.set_window_focused(false);
    }

    pub fn visibility_changed(&self, visible: bool) {
        self.viewport.set_page_visible(visible);
        if visible {
            self.tracker.handle_page_visible();
            self.notifier.handle_page_visible();
        }
    }

    /// Reports a viewport resize. Components only react when the
    /// mobile/desktop breakpoint is crossed.
    pub fn resized(&self, width: f32) {
        if let Some(layout) = self.viewport.set_width(width) {
            debug!(target: LOG_TARGET, "Layout changed: {layout:?}");
            self.tracker.handle_layout_changed();
            self.notifier.handle_layout_changed();
        }
    }

    /// Reports whether the chat area panel is shown (mobile navigation).
    pub fn chat_area_shown(&self, shown: bool) {
        self.viewport.set_chat_area_shown(shown);
    }

    /// Reports what fraction of the message list is currently on screen.
    pub fn message_list_visible(&self, visible_ratio: f64) {
        self.tracker.handle_chat_visible(visible_ratio);
    }

    /// The mobile chat-open transition animation finished.
    pub fn mobile_chat_opened(&self, chat_id: &str) {
        self.tracker.on_mobile_chat_opened(chat_id);
        self.notifier.on_mobile_chat_opened(chat_id);
    }

    fn spawn_dispatchers(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);

        {
            let app_state = self.app_state.clone();
            let mut rx = self.bus.messages_viewed.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => app_state.mark_chat_as_read(&event.chat_id).await,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }

        {
            let app_state = self.app_state.clone();
            let notifier = self.notifier.clone();
            let mut rx = self.bus.notifications_stopped.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => {
                            notifier.stop_notifications(&event.chat_id);
                            app_state.stop_notifications(&event.chat_id).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }

        {
            let app_state = self.app_state.clone();
            let mut rx = self.bus.badges_updated.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => {
                            app_state.update_badge_count(&event.chat_id, event.count).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let tasks = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("app_state", &self.app_state)
            .field("notifier", &self.notifier)
            .finish()
    }
}
