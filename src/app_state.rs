//! Authoritative in-instance store for messages, read status and unread
//! badges, replicated to sibling instances over the sync bus.
//!
//! Incoming messages arrive on two uncoordinated paths (host push and
//! replication replay) with no ordering guarantee, so every mutator is
//! idempotent per message id. Received envelopes are replayed as local
//! effects without re-broadcasting; the per-id dedup plus last-write-wins
//! badge/read updates make replay convergent.

use crate::store::{BADGE_COUNTS_KEY, KvStore, READ_STATUS_KEY};
use crate::sync::{SyncChannel, SyncPayload, decode_envelope};
use crate::types::message::{Message, MessagePatch, ReadInfo};
use crate::viewport::Viewport;
use chrono::Utc;
use dashmap::DashMap;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

const LOG_TARGET: &str = "AppState";

pub struct AppState {
    messages: DashMap<String, Message>,
    read_status: DashMap<String, ReadInfo>,
    badges: DashMap<String, u32>,
    viewport: Arc<Viewport>,
    store: Arc<dyn KvStore>,
    sync: Option<SyncChannel>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl AppState {
    /// Creates the store, loads persisted state and, when a sync channel is
    /// available, starts replaying envelopes from sibling instances. A
    /// missing channel means single-instance operation.
    pub async fn new(
        viewport: Arc<Viewport>,
        store: Arc<dyn KvStore>,
        sync: Option<SyncChannel>,
    ) -> Arc<Self> {
        if sync.is_none() {
            info!(target: LOG_TARGET, "No sync channel, running in single-instance mode");
        }

        let state = Arc::new(Self {
            messages: DashMap::new(),
            read_status: DashMap::new(),
            badges: DashMap::new(),
            viewport,
            store,
            sync,
            listener: Mutex::new(None),
        });

        state.load_persisted().await;

        if let Some(channel) = &state.sync {
            let mut subscription = channel.subscribe();
            let weak = Arc::downgrade(&state);
            let handle = tokio::spawn(async move {
                while let Some(raw) = subscription.recv().await {
                    let Some(state) = weak.upgrade() else { break };
                    state.handle_sync(&raw).await;
                }
            });
            *state
                .listener
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }

        state
    }

    /// Full replace of the message mirror.
    pub fn set_messages(&self, messages: Vec<Message>) {
        self.messages.clear();
        for message in messages {
            self.messages.insert(message.id.clone(), message);
        }
        debug!(target: LOG_TARGET, "Message mirror replaced, {} messages", self.messages.len());
    }

    /// Adds a message if its id is not already present. Returns whether the
    /// message was inserted; duplicates are not re-broadcast.
    pub fn add_message(&self, message: Message) -> bool {
        if !self.insert_message(message.clone()) {
            return false;
        }
        debug!(target: LOG_TARGET, "New message added: {}", message.id);
        self.broadcast(SyncPayload::MessageAdded { message });
        true
    }

    /// Merges a patch into the stored message, if present.
    pub fn update_message(&self, message_id: &str, patch: MessagePatch) {
        if !self.patch_message(message_id, &patch) {
            return;
        }
        debug!(target: LOG_TARGET, "Message updated: {message_id}");
        self.broadcast(SyncPayload::MessageUpdated {
            message_id: message_id.to_string(),
            updates: patch,
        });
    }

    pub async fn mark_message_as_read(&self, message_id: &str, chat_id: &str) {
        self.read_status.insert(
            message_id.to_string(),
            ReadInfo {
                timestamp: Utc::now(),
                chat_id: chat_id.to_string(),
            },
        );
        self.persist().await;
        self.broadcast(SyncPayload::MessageRead {
            message_id: message_id.to_string(),
            chat_id: chat_id.to_string(),
        });
        debug!(target: LOG_TARGET, "Message marked read: {message_id}");
    }

    /// Marks every unread incoming message of the chat as read and zeroes
    /// its badge.
    pub async fn mark_chat_as_read(&self, chat_id: &str) {
        let unread: Vec<String> = self
            .messages
            .iter()
            .filter(|entry| {
                let msg = entry.value();
                msg.belongs_to(chat_id)
                    && !msg.from_me
                    && !self.read_status.contains_key(&msg.id)
            })
            .map(|entry| entry.key().clone())
            .collect();

        let now = Utc::now();
        for message_id in &unread {
            self.read_status.insert(
                message_id.clone(),
                ReadInfo {
                    timestamp: now,
                    chat_id: chat_id.to_string(),
                },
            );
            self.broadcast(SyncPayload::MessageRead {
                message_id: message_id.clone(),
                chat_id: chat_id.to_string(),
            });
        }
        self.persist().await;
        self.update_badge_count(chat_id, 0).await;

        info!(target: LOG_TARGET, "Chat marked read: {chat_id}, {} messages", unread.len());
    }

    /// Switches the active chat. The prior chat is marked read first.
    /// Returns the previous active chat.
    pub async fn set_current_chat(&self, chat_id: Option<&str>) -> Option<String> {
        let previous = self
            .viewport
            .set_active_chat(chat_id.map(str::to_string));

        if previous.as_deref() != chat_id {
            if let Some(prev) = &previous {
                self.mark_chat_as_read(prev).await;
            }
            self.broadcast(SyncPayload::ChatChanged {
                previous_chat: previous.clone(),
                current_chat: chat_id.map(str::to_string),
            });
            info!(target: LOG_TARGET, "Current chat changed: {previous:?} -> {chat_id:?}");
        }

        previous
    }

    /// Sets the badge. Unchanged counts are a no-op, so the overlapping
    /// badge-zero paths converge to a single broadcast per view.
    pub async fn update_badge_count(&self, chat_id: &str, count: u32) {
        if self.get_badge_count(chat_id) == count {
            return;
        }
        self.badges.insert(chat_id.to_string(), count);
        self.persist().await;
        self.broadcast(SyncPayload::BadgeUpdated {
            chat_id: chat_id.to_string(),
            count,
        });
        debug!(target: LOG_TARGET, "Badge updated: {chat_id} -> {count}");
    }

    pub fn get_badge_count(&self, chat_id: &str) -> u32 {
        self.badges.get(chat_id).map(|e| *e.value()).unwrap_or(0)
    }

    /// Zeroes the badge and tells sibling instances notifications stopped.
    pub async fn stop_notifications(&self, chat_id: &str) {
        self.update_badge_count(chat_id, 0).await;
        self.broadcast(SyncPayload::NotificationsStopped {
            chat_id: chat_id.to_string(),
        });
        debug!(target: LOG_TARGET, "Notifications stopped for {chat_id}");
    }

    pub fn is_message_read(&self, message_id: &str) -> bool {
        self.read_status.contains_key(message_id)
    }

    /// Incoming messages of the chat not yet marked read. Linear scan over
    /// the mirror.
    pub fn get_unread_count(&self, chat_id: &str) -> u32 {
        self.messages
            .iter()
            .filter(|entry| {
                let msg = entry.value();
                msg.belongs_to(chat_id)
                    && !msg.from_me
                    && !self.read_status.contains_key(&msg.id)
            })
            .count() as u32
    }

    pub fn get_message(&self, message_id: &str) -> Option<Message> {
        self.messages.get(message_id).map(|e| e.value().clone())
    }

    /// Messages of the chat in chronological order. Equal timestamps fall
    /// back to the id for a stable order.
    pub fn get_chat_messages(&self, chat_id: &str) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .messages
            .iter()
            .filter(|entry| entry.value().belongs_to(chat_id))
            .map(|entry| entry.value().clone())
            .collect();
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        messages
    }

    pub fn get_all_messages(&self) -> Vec<Message> {
        self.messages.iter().map(|e| e.value().clone()).collect()
    }

    pub fn read_status_snapshot(&self) -> Vec<(String, ReadInfo)> {
        self.read_status
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn badge_counts_snapshot(&self) -> Vec<(String, u32)> {
        self.badges
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Drops all in-memory and persisted state.
    pub async fn clear_state(&self) {
        self.messages.clear();
        self.read_status.clear();
        self.badges.clear();
        self.viewport.set_active_chat(None);

        for key in [READ_STATUS_KEY, BADGE_COUNTS_KEY] {
            if let Err(e) = self.store.remove(key).await {
                warn!(target: LOG_TARGET, "Failed to clear persisted key {key}: {e}");
            }
        }
        info!(target: LOG_TARGET, "State cleared");
    }

    /// Replays an envelope received from a sibling instance. Foreign
    /// traffic is ignored; unknown types are logged and dropped. Effects
    /// are applied locally without re-broadcasting.
    pub async fn handle_sync(&self, raw: &str) {
        let envelope = match decode_envelope(raw) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return,
            Err(e) => {
                debug!(target: LOG_TARGET, "Dropping unrecognized envelope: {e}");
                return;
            }
        };

        match envelope.payload {
            SyncPayload::MessageAdded { message } => {
                self.insert_message(message);
            }
            SyncPayload::MessageUpdated {
                message_id,
                updates,
            } => {
                self.patch_message(&message_id, &updates);
            }
            SyncPayload::MessageRead {
                message_id,
                chat_id,
            } => {
                self.read_status.insert(
                    message_id,
                    ReadInfo {
                        timestamp: Utc::now(),
                        chat_id,
                    },
                );
                self.persist().await;
            }
            SyncPayload::ChatChanged { previous_chat, .. } => {
                // The viewport tracks what this instance's user sees and
                // changes only from host-pushed transitions; only the read
                // effect of the sibling's switch replays here.
                if let Some(prev) = previous_chat {
                    self.mark_chat_read_local(&prev).await;
                }
            }
            SyncPayload::BadgeUpdated { chat_id, count } => {
                self.badges.insert(chat_id, count);
                self.persist().await;
            }
            SyncPayload::NotificationsStopped { chat_id } => {
                self.badges.insert(chat_id, 0);
                self.persist().await;
            }
        }
    }

    fn insert_message(&self, message: Message) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.messages.entry(message.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(message);
                true
            }
        }
    }

    fn patch_message(&self, message_id: &str, patch: &MessagePatch) -> bool {
        match self.messages.get_mut(message_id) {
            Some(mut entry) => {
                patch.apply(entry.value_mut());
                true
            }
            None => false,
        }
    }

    /// Replay variant of [`Self::mark_chat_as_read`]: same local effects,
    /// no broadcasts.
    async fn mark_chat_read_local(&self, chat_id: &str) {
        let now = Utc::now();
        for entry in self.messages.iter() {
            let msg = entry.value();
            if msg.belongs_to(chat_id) && !msg.from_me && !self.read_status.contains_key(&msg.id) {
                self.read_status.insert(
                    msg.id.clone(),
                    ReadInfo {
                        timestamp: now,
                        chat_id: chat_id.to_string(),
                    },
                );
            }
        }
        self.badges.insert(chat_id.to_string(), 0);
        self.persist().await;
    }

    fn broadcast(&self, payload: SyncPayload) {
        if let Some(channel) = &self.sync
            && let Err(e) = channel.send(payload)
        {
            warn!(target: LOG_TARGET, "Failed to broadcast state change: {e}");
        }
    }

    async fn load_persisted(&self) {
        match self.store.get(READ_STATUS_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<(String, ReadInfo)>>(&raw) {
                Ok(entries) => {
                    for (id, info) in entries {
                        self.read_status.insert(id, info);
                    }
                }
                Err(e) => {
                    warn!(target: LOG_TARGET, "Corrupt read status, starting empty: {e}");
                }
            },
            Ok(None) => {}
            Err(e) => warn!(target: LOG_TARGET, "Failed to load read status: {e}"),
        }

        match self.store.get(BADGE_COUNTS_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<(String, u32)>>(&raw) {
                Ok(entries) => {
                    for (chat, count) in entries {
                        self.badges.insert(chat, count);
                    }
                }
                Err(e) => {
                    warn!(target: LOG_TARGET, "Corrupt badge counts, starting empty: {e}");
                }
            },
            Ok(None) => {}
            Err(e) => warn!(target: LOG_TARGET, "Failed to load badge counts: {e}"),
        }

        debug!(
            target: LOG_TARGET,
            "Loaded persisted state: {} read entries, {} badges",
            self.read_status.len(),
            self.badges.len()
        );
    }

    async fn persist(&self) {
        let read: Vec<(String, ReadInfo)> = self.read_status_snapshot();
        match serde_json::to_string(&read) {
            Ok(raw) => {
                if let Err(e) = self.store.set(READ_STATUS_KEY, &raw).await {
                    warn!(target: LOG_TARGET, "Failed to persist read status: {e}");
                }
            }
            Err(e) => warn!(target: LOG_TARGET, "Failed to serialize read status: {e}"),
        }

        let badges: Vec<(String, u32)> = self.badge_counts_snapshot();
        match serde_json::to_string(&badges) {
            Ok(raw) => {
                if let Err(e) = self.store.set(BADGE_COUNTS_KEY, &raw).await {
                    warn!(target: LOG_TARGET, "Failed to persist badge counts: {e}");
                }
            }
            Err(e) => warn!(target: LOG_TARGET, "Failed to serialize badge counts: {e}"),
        }
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        if let Some(handle) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("messages", &self.messages.len())
            .field("read_status", &self.read_status.len())
            .field("badges", &self.badges.len())
            .field("sync", &self.sync.is_some())
            .finish()
    }
}
