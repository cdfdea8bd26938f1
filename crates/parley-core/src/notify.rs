//! Passive notifications for incoming messages.
//!
//! The policy decides; a [`Notifier`] carries out the platform side effects.
//! Notifier failures are logged and dropped so a revoked permission or a
//! missing sound device never disturbs the session.

use parley_protocol::ChatMessage;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use crate::error::NotifyError;
use crate::metrics;

/// Longest notification body before it is cut.
const MAX_BODY_CHARS: usize = 120;

/// Inputs to the notification decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyContext {
    /// Whether the chat surface is currently visible to the user.
    pub is_document_visible: bool,
    /// The user this client is signed in as.
    pub current_user: String,
    /// Whether passive OS notifications are allowed.
    pub permission_granted: bool,
}

/// A notification ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Headline.
    pub title: String,
    /// Message preview.
    pub body: String,
}

impl Notification {
    /// Build the notification shown for a message.
    #[must_use]
    pub fn for_message(message: &ChatMessage) -> Self {
        let mut body: String = message.content.chars().take(MAX_BODY_CHARS).collect();
        if message.content_chars() > MAX_BODY_CHARS {
            body.push('…');
        }
        Self {
            title: format!("New message from {}", message.sender),
            body,
        }
    }
}

/// Platform capability for passive alerts.
pub trait Notifier: Send + Sync {
    /// Raise an OS-level notification.
    fn show(&self, notification: &Notification) -> Result<(), NotifyError>;

    /// Play the audio cue.
    fn play_sound(&self) -> Result<(), NotifyError>;
}

/// Notifier that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn show(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Ok(())
    }

    fn play_sound(&self) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Notifier that remembers what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    shown: Mutex<Vec<Notification>>,
    sounds: AtomicUsize,
    failing: AtomicBool,
}

impl RecordingNotifier {
    /// Create a recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`NotifyError::PermissionDenied`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Notifications shown so far.
    #[must_use]
    pub fn shown(&self) -> Vec<Notification> {
        self.shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of sounds played.
    #[must_use]
    pub fn sounds(&self) -> usize {
        self.sounds.load(Ordering::SeqCst)
    }
}

impl Notifier for RecordingNotifier {
    fn show(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::PermissionDenied);
        }
        self.shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification.clone());
        Ok(())
    }

    fn play_sound(&self) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Backend("no audio device".into()));
        }
        self.sounds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Visibility and permission signals fed in by the surrounding UI.
#[derive(Debug)]
pub struct AttentionSignals {
    visible: AtomicBool,
    permission_granted: AtomicBool,
}

impl AttentionSignals {
    /// Create signals with explicit initial values.
    #[must_use]
    pub fn new(visible: bool, permission_granted: bool) -> Self {
        Self {
            visible: AtomicBool::new(visible),
            permission_granted: AtomicBool::new(permission_granted),
        }
    }

    /// Record whether the chat surface is visible.
    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    /// Whether the chat surface is visible.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    /// Record whether OS notifications are allowed.
    pub fn set_permission_granted(&self, granted: bool) {
        self.permission_granted.store(granted, Ordering::SeqCst);
    }

    /// Whether OS notifications are allowed.
    #[must_use]
    pub fn permission_granted(&self) -> bool {
        self.permission_granted.load(Ordering::SeqCst)
    }

    /// Snapshot the signals for a decision about `current_user`'s session.
    #[must_use]
    pub fn context(&self, current_user: &str) -> NotifyContext {
        NotifyContext {
            is_document_visible: self.is_visible(),
            current_user: current_user.to_string(),
            permission_granted: self.permission_granted(),
        }
    }
}

impl Default for AttentionSignals {
    /// Visible, permission not granted.
    fn default() -> Self {
        Self::new(true, false)
    }
}

/// Decides when an incoming message raises a passive alert.
pub struct NotificationPolicy {
    notifier: Arc<dyn Notifier>,
}

impl NotificationPolicy {
    /// Create a policy backed by `notifier`.
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Notify iff someone else wrote it, the surface is hidden and
    /// notifications are allowed.
    #[must_use]
    pub fn should_notify(message: &ChatMessage, context: &NotifyContext) -> bool {
        message.sender != context.current_user
            && !context.is_document_visible
            && context.permission_granted
    }

    /// Apply the policy and, if it says so, raise the alert.
    ///
    /// Returns whether an alert was attempted. Notifier errors are swallowed.
    pub fn handle(&self, message: &ChatMessage, context: &NotifyContext) -> bool {
        if !Self::should_notify(message, context) {
            return false;
        }

        let notification = Notification::for_message(message);
        debug!(sender = %message.sender, "Raising notification");
        metrics::record_notification();

        if let Err(e) = self.notifier.show(&notification) {
            warn!(error = %e, "Notification failed");
        }
        if let Err(e) = self.notifier.play_sound() {
            warn!(error = %e, "Notification sound failed");
        }
        true
    }
}

impl std::fmt::Debug for NotificationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationPolicy").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::Timestamp;

    fn context(visible: bool, permission: bool) -> NotifyContext {
        NotifyContext {
            is_document_visible: visible,
            current_user: "me".into(),
            permission_granted: permission,
        }
    }

    fn from(sender: &str) -> ChatMessage {
        ChatMessage::new(sender, "hello", Timestamp::from_millis(1))
    }

    #[test]
    fn test_own_messages_never_notify() {
        for visible in [true, false] {
            for permission in [true, false] {
                assert!(!NotificationPolicy::should_notify(
                    &from("me"),
                    &context(visible, permission)
                ));
            }
        }
    }

    #[test]
    fn test_visible_surface_never_notifies() {
        for sender in ["me", "other"] {
            for permission in [true, false] {
                assert!(!NotificationPolicy::should_notify(
                    &from(sender),
                    &context(true, permission)
                ));
            }
        }
    }

    #[test]
    fn test_notifies_only_with_permission() {
        assert!(NotificationPolicy::should_notify(&from("other"), &context(false, true)));
        assert!(!NotificationPolicy::should_notify(&from("other"), &context(false, false)));
    }

    #[test]
    fn test_handle_triggers_side_effects() {
        let recorder = Arc::new(RecordingNotifier::new());
        let policy = NotificationPolicy::new(recorder.clone());

        assert!(policy.handle(&from("other"), &context(false, true)));
        assert!(!policy.handle(&from("me"), &context(false, true)));

        assert_eq!(
            recorder.shown(),
            vec![Notification {
                title: "New message from other".into(),
                body: "hello".into(),
            }]
        );
        assert_eq!(recorder.sounds(), 1);
    }

    #[test]
    fn test_notifier_failures_are_swallowed() {
        let recorder = Arc::new(RecordingNotifier::new());
        recorder.set_failing(true);
        let policy = NotificationPolicy::new(recorder.clone());

        assert!(policy.handle(&from("other"), &context(false, true)));
        assert!(recorder.shown().is_empty());
        assert_eq!(recorder.sounds(), 0);
    }

    #[test]
    fn test_long_bodies_are_cut() {
        let long = ChatMessage::new("x", "y".repeat(500), Timestamp::default());
        let notification = Notification::for_message(&long);
        assert_eq!(notification.body.chars().count(), MAX_BODY_CHARS + 1);
        assert!(notification.body.ends_with('…'));
    }

    #[test]
    fn test_attention_signals_snapshot() {
        let signals = AttentionSignals::default();
        assert_eq!(signals.context("me"), context(true, false));

        signals.set_visible(false);
        signals.set_permission_granted(true);
        assert_eq!(signals.context("me"), context(false, true));
    }
}
