//! Engine instrumentation.
//!
//! Uses the `metrics` facade; nothing is recorded unless the host installs a
//! recorder (the CLI can install the Prometheus exporter).

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const FRAMES_RECEIVED: &str = "parley_frames_received_total";
    pub const FRAMES_MALFORMED: &str = "parley_frames_malformed_total";
    pub const RECONNECT_ATTEMPTS: &str = "parley_reconnect_attempts_total";
    pub const MESSAGES_SENT: &str = "parley_messages_sent_total";
    pub const NOTIFICATIONS: &str = "parley_notifications_total";
    pub const LINKS_CONNECTED: &str = "parley_links_connected";
}

/// Register metric descriptions with the installed recorder.
pub fn describe() {
    metrics::describe_counter!(names::FRAMES_RECEIVED, "Frames received on room topics");
    metrics::describe_counter!(
        names::FRAMES_MALFORMED,
        "Frames dropped because they were not a valid message"
    );
    metrics::describe_counter!(names::RECONNECT_ATTEMPTS, "Reconnect attempts after a loss");
    metrics::describe_counter!(names::MESSAGES_SENT, "Messages published by this client");
    metrics::describe_counter!(names::NOTIFICATIONS, "Passive notifications raised");
    metrics::describe_gauge!(names::LINKS_CONNECTED, "Live broker connections");
}

pub(crate) fn record_frame() {
    counter!(names::FRAMES_RECEIVED).increment(1);
}

/// Count a message dropped for failing validation, live or from history.
pub fn record_malformed_frame() {
    counter!(names::FRAMES_MALFORMED).increment(1);
}

pub(crate) fn record_reconnect_attempt() {
    counter!(names::RECONNECT_ATTEMPTS).increment(1);
}

pub(crate) fn record_sent() {
    counter!(names::MESSAGES_SENT).increment(1);
}

pub(crate) fn record_notification() {
    counter!(names::NOTIFICATIONS).increment(1);
}

pub(crate) fn link_up() {
    gauge!(names::LINKS_CONNECTED).increment(1.0);
}

pub(crate) fn link_down() {
    gauge!(names::LINKS_CONNECTED).decrement(1.0);
}
