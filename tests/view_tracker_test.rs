use privapp_sync::types::events::EventBus;
use privapp_sync::view_tracker::MessageViewTracker;
use privapp_sync::viewport::{Layout, ViewState, Viewport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

const DEBOUNCE: Duration = Duration::from_millis(2000);
const INDICATOR: Duration = Duration::from_millis(2300);

fn desktop_view(active: &str) -> ViewState {
    ViewState {
        active_chat: Some(active.to_string()),
        ..Default::default()
    }
}

fn mobile_view(active: &str) -> ViewState {
    ViewState {
        active_chat: Some(active.to_string()),
        layout: Layout::Mobile,
        chat_area_shown: true,
        window_focused: true,
        page_visible: true,
    }
}

fn make_tracker(state: ViewState) -> (Arc<MessageViewTracker>, Arc<EventBus>, Arc<Viewport>) {
    let viewport = Arc::new(Viewport::new(state, Layout::MOBILE_MAX));
    let bus = Arc::new(EventBus::new());
    let tracker = Arc::new(MessageViewTracker::new(
        viewport.clone(),
        bus.clone(),
        DEBOUNCE,
        INDICATOR,
    ));
    (tracker, bus, viewport)
}

#[tokio::test(start_paused = true)]
async fn test_mark_viewed_fires_read_stop_and_badge_events() {
    let (tracker, bus, _) = make_tracker(desktop_view("a@c.us"));
    let mut viewed_rx = bus.messages_viewed.subscribe();
    let mut stopped_rx = bus.notifications_stopped.subscribe();
    let mut badges_rx = bus.badges_updated.subscribe();

    assert!(tracker.mark_chat_as_viewed("a@c.us", false));

    assert_eq!(viewed_rx.try_recv().unwrap().chat_id, "a@c.us");
    assert_eq!(stopped_rx.try_recv().unwrap().chat_id, "a@c.us");
    let badge = badges_rx.try_recv().unwrap();
    assert_eq!(badge.chat_id, "a@c.us");
    assert_eq!(badge.count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_mark_viewed_debounced_within_window() {
    let (tracker, bus, _) = make_tracker(desktop_view("a@c.us"));
    let mut viewed_rx = bus.messages_viewed.subscribe();

    assert!(tracker.mark_chat_as_viewed("a@c.us", false));
    assert_eq!(viewed_rx.try_recv().unwrap().chat_id, "a@c.us");

    // second call inside the window is a no-op
    assert!(!tracker.mark_chat_as_viewed("a@c.us", false));
    assert!(matches!(viewed_rx.try_recv(), Err(TryRecvError::Empty)));

    // after the window it fires again
    tokio::time::advance(DEBOUNCE).await;
    assert!(tracker.mark_chat_as_viewed("a@c.us", false));
    assert_eq!(viewed_rx.try_recv().unwrap().chat_id, "a@c.us");
}

#[tokio::test(start_paused = true)]
async fn test_force_bypasses_debounce_and_open_check() {
    let (tracker, bus, _) = make_tracker(desktop_view("a@c.us"));
    let mut viewed_rx = bus.messages_viewed.subscribe();

    // not the active chat, normal call is rejected
    assert!(!tracker.mark_chat_as_viewed("b@c.us", false));
    assert!(matches!(viewed_rx.try_recv(), Err(TryRecvError::Empty)));

    assert!(tracker.mark_chat_as_viewed("b@c.us", true));
    assert_eq!(viewed_rx.try_recv().unwrap().chat_id, "b@c.us");

    // force also bypasses the debounce window
    assert!(tracker.mark_chat_as_viewed("b@c.us", true));
}

#[tokio::test(start_paused = true)]
async fn test_desktop_chat_open_only_needs_active_chat() {
    let (tracker, _, viewport) = make_tracker(desktop_view("a@c.us"));

    assert!(tracker.is_chat_open("a@c.us"));
    assert!(!tracker.is_chat_open("b@c.us"));

    // focus and visibility do not matter on desktop
    viewport.set_window_focused(false);
    viewport.set_page_visible(false);
    assert!(tracker.is_chat_open("a@c.us"));
}

#[tokio::test(start_paused = true)]
async fn test_mobile_chat_open_requires_all_four_conditions() {
    let (tracker, _, viewport) = make_tracker(mobile_view("a@c.us"));
    assert!(tracker.is_chat_open("a@c.us"));

    viewport.set_chat_area_shown(false);
    assert!(!tracker.is_chat_open("a@c.us"));
    viewport.set_chat_area_shown(true);

    viewport.set_window_focused(false);
    assert!(!tracker.is_chat_open("a@c.us"));
    viewport.set_window_focused(true);

    viewport.set_page_visible(false);
    assert!(!tracker.is_chat_open("a@c.us"));
    viewport.set_page_visible(true);

    assert!(!tracker.is_chat_open("b@c.us"));
    assert!(tracker.is_chat_open("a@c.us"));
}

#[tokio::test(start_paused = true)]
async fn test_mobile_mark_viewed_shows_then_dismisses_indicator() {
    let (tracker, bus, _) = make_tracker(mobile_view("a@c.us"));
    let mut indicator_rx = bus.view_indicator.subscribe();

    assert!(tracker.mark_chat_as_viewed("a@c.us", false));

    let shown = indicator_rx.recv().await.unwrap();
    assert!(shown.shown);
    assert_eq!(shown.chat_id, "a@c.us");

    // self-dismisses after the indicator duration
    let hidden = indicator_rx.recv().await.unwrap();
    assert!(!hidden.shown);
    assert_eq!(hidden.chat_id, "a@c.us");
}

#[tokio::test(start_paused = true)]
async fn test_chat_switch_marks_newly_open_chat_on_desktop() {
    let (tracker, bus, viewport) = make_tracker(desktop_view("a@c.us"));
    let mut viewed_rx = bus.messages_viewed.subscribe();

    viewport.set_active_chat(Some("b@c.us".to_string()));
    tracker.handle_chat_changed(Some("a@c.us"), Some("b@c.us"));

    // the newly selected chat is open on desktop and gets marked right away;
    // the previous chat is no longer open and does not fire
    assert_eq!(viewed_rx.try_recv().unwrap().chat_id, "b@c.us");
    assert!(matches!(viewed_rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn test_window_focus_marks_active_chat() {
    let (tracker, bus, _) = make_tracker(desktop_view("a@c.us"));
    let mut viewed_rx = bus.messages_viewed.subscribe();

    tracker.handle_window_focus();
    assert_eq!(viewed_rx.try_recv().unwrap().chat_id, "a@c.us");
}

#[tokio::test(start_paused = true)]
async fn test_chat_visible_threshold_on_mobile() {
    let (tracker, bus, _) = make_tracker(mobile_view("a@c.us"));
    let mut viewed_rx = bus.messages_viewed.subscribe();

    tracker.handle_chat_visible(0.3);
    assert!(matches!(viewed_rx.try_recv(), Err(TryRecvError::Empty)));

    tracker.handle_chat_visible(0.7);
    assert_eq!(viewed_rx.try_recv().unwrap().chat_id, "a@c.us");
}

#[tokio::test(start_paused = true)]
async fn test_mobile_chat_opened_force_marks() {
    let (tracker, bus, viewport) = make_tracker(mobile_view("a@c.us"));
    let mut viewed_rx = bus.messages_viewed.subscribe();

    // even with the window unfocused the explicit open hook marks viewed
    viewport.set_window_focused(false);
    tracker.on_mobile_chat_opened("a@c.us");
    assert_eq!(viewed_rx.try_recv().unwrap().chat_id, "a@c.us");
}

#[tokio::test(start_paused = true)]
async fn test_mobile_chat_opened_ignored_on_desktop() {
    let (tracker, bus, _) = make_tracker(desktop_view("a@c.us"));
    let mut viewed_rx = bus.messages_viewed.subscribe();

    tracker.on_mobile_chat_opened("a@c.us");
    assert!(matches!(viewed_rx.try_recv(), Err(TryRecvError::Empty)));
}
