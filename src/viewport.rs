//! Shared viewport state: which chat is active, whether the window is
//! focused and the page visible, and the current layout.
//!
//! The host UI pushes every transition into a single [`Viewport`] instance
//! and all components read from it, so there is exactly one authority for
//! "is this chat being looked at" inputs.

use std::sync::{PoisonError, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Mobile,
    Desktop,
}

impl Layout {
    /// Widths at or below this are treated as the mobile layout.
    pub const MOBILE_MAX: f32 = 768.0;

    pub fn from_width(width: f32, mobile_max: f32) -> Self {
        if width <= mobile_max {
            Self::Mobile
        } else {
            Self::Desktop
        }
    }

    pub fn is_mobile(&self) -> bool {
        matches!(self, Self::Mobile)
    }
}

/// Snapshot of everything the engine needs to know about what the user can
/// currently see.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    /// The selected chat, if any
    pub active_chat: Option<String>,
    /// Whether the window has input focus
    pub window_focused: bool,
    /// Whether the page is visible (not in a background tab)
    pub page_visible: bool,
    /// Current responsive layout
    pub layout: Layout,
    /// Whether the chat area panel is shown (mobile navigation state)
    pub chat_area_shown: bool,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            active_chat: None,
            window_focused: true,
            page_visible: true,
            layout: Layout::Desktop,
            chat_area_shown: false,
        }
    }
}

/// Thread-safe holder for the current [`ViewState`].
#[derive(Debug)]
pub struct Viewport {
    state: RwLock<ViewState>,
    mobile_max: f32,
}

impl Viewport {
    pub fn new(state: ViewState, mobile_max: f32) -> Self {
        Self {
            state: RwLock::new(state),
            mobile_max,
        }
    }

    pub fn snapshot(&self) -> ViewState {
        self.read().clone()
    }

    pub fn active_chat(&self) -> Option<String> {
        self.read().active_chat.clone()
    }

    pub fn is_mobile(&self) -> bool {
        self.read().layout.is_mobile()
    }

    /// Window focused and page visible.
    pub fn is_foreground(&self) -> bool {
        let state = self.read();
        state.window_focused && state.page_visible
    }

    /// Replaces the active chat and returns the previous one.
    pub fn set_active_chat(&self, chat_id: Option<String>) -> Option<String> {
        let mut state = self.write();
        std::mem::replace(&mut state.active_chat, chat_id)
    }

    pub fn set_window_focused(&self, focused: bool) {
        self.write().window_focused = focused;
    }

    pub fn set_page_visible(&self, visible: bool) {
        self.write().page_visible = visible;
    }

    pub fn set_chat_area_shown(&self, shown: bool) {
        self.write().chat_area_shown = shown;
    }

    /// Updates the layout from a viewport width. Returns the new layout if
    /// the breakpoint was crossed, `None` otherwise.
    pub fn set_width(&self, width: f32) -> Option<Layout> {
        let layout = Layout::from_width(width, self.mobile_max);
        let mut state = self.write();
        if state.layout != layout {
            state.layout = layout;
            Some(layout)
        } else {
            None
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ViewState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ViewState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(ViewState::default(), Layout::MOBILE_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_from_width() {
        assert_eq!(Layout::from_width(375.0, Layout::MOBILE_MAX), Layout::Mobile);
        assert_eq!(Layout::from_width(768.0, Layout::MOBILE_MAX), Layout::Mobile);
        assert_eq!(Layout::from_width(769.0, Layout::MOBILE_MAX), Layout::Desktop);
        assert_eq!(
            Layout::from_width(1920.0, Layout::MOBILE_MAX),
            Layout::Desktop
        );
    }

    #[test]
    fn test_set_width_reports_breakpoint_crossing() {
        let viewport = Viewport::default();
        assert_eq!(viewport.set_width(1024.0), None); // already desktop
        assert_eq!(viewport.set_width(400.0), Some(Layout::Mobile));
        assert_eq!(viewport.set_width(500.0), None); // still mobile
        assert_eq!(viewport.set_width(1024.0), Some(Layout::Desktop));
    }

    #[test]
    fn test_set_active_chat_returns_previous() {
        let viewport = Viewport::default();
        assert_eq!(viewport.set_active_chat(Some("a".into())), None);
        assert_eq!(
            viewport.set_active_chat(Some("b".into())),
            Some("a".to_string())
        );
        assert_eq!(viewport.set_active_chat(None), Some("b".to_string()));
    }

    #[test]
    fn test_foreground_requires_focus_and_visibility() {
        let viewport = Viewport::default();
        assert!(viewport.is_foreground());
        viewport.set_window_focused(false);
        assert!(!viewport.is_foreground());
        viewport.set_window_focused(true);
        viewport.set_page_visible(false);
        assert!(!viewport.is_foreground());
    }
}
