//! Client-side notification suppression and cross-instance state
//! synchronization for a self-hosted WhatsApp web client.
//!
//! Three cooperating components decide, for every incoming message, whether
//! the user is actually viewing the relevant conversation right now and,
//! based on that, whether to mark messages read, silence notifications, or
//! run a repeating alert loop:
//!
//! - [`AppState`] — source of truth for the message mirror, per-message read
//!   status and per-chat unread badges, replicated to sibling instances over
//!   a [`sync::SyncBus`].
//! - [`MessageViewTracker`] — decides from viewport signals whether a chat
//!   is genuinely being looked at, and fires the "viewed" side effects.
//! - [`NotificationManager`] — gates each inbound message through
//!   [`NotificationManager::should_notify`] and owns the continuous alert
//!   loop.
//!
//! All three share a single [`Viewport`] value and are wired together by
//! [`Engine`], which also exposes the host-facing API.

pub mod app_state;
pub mod engine;
pub mod notifications;
pub mod store;
pub mod sync;
pub mod types;
pub mod view_tracker;
pub mod viewport;

pub use app_state::AppState;
pub use engine::{Engine, EngineBuilder, EngineConfig};
pub use notifications::{AlertError, AlertSink, NotificationManager, NullSink};
pub use store::{FileStore, KvStore, MemoryStore, StoreError};
pub use sync::{SyncBus, SyncChannel, SyncEnvelope, SyncPayload};
pub use types::message::{ChatSettings, Message, MessagePatch, ReadInfo, Reaction};
pub use view_tracker::MessageViewTracker;
pub use viewport::{Layout, ViewState, Viewport};
