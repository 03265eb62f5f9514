//! One-shot user-facing notifications.

use std::fmt;
use std::sync::Arc;

/// Severity of a notification banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Operation completed.
    Success,
    /// Operation failed.
    Error,
    /// Something needs user attention (e.g. a sync conflict).
    Warning,
    /// Informational.
    Info,
}

/// An action button attached to a notification, e.g. "Retry".
#[derive(Clone)]
pub struct NotificationAction {
    /// Button label.
    pub label: String,
    /// Invoked when the user clicks the action.
    pub on_click: Arc<dyn Fn() + Send + Sync>,
}

impl NotificationAction {
    /// Build an action from a label and callback.
    pub fn new(label: impl Into<String>, on_click: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            label: label.into(),
            on_click: Arc::new(on_click),
        }
    }
}

impl fmt::Debug for NotificationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationAction")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// A fire-and-forget message for the toast UI, independent of the state
/// stream.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Severity.
    pub kind: NotificationKind,
    /// Banner text.
    pub message: String,
    /// Optional action button.
    pub action: Option<NotificationAction>,
}

impl Notification {
    /// Build a notification without an action.
    pub fn new(kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            action: None,
        }
    }

    /// Attach an action button.
    pub fn with_action(mut self, action: NotificationAction) -> Self {
        self.action = Some(action);
        self
    }
}
