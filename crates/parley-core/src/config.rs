//! Engine configuration.

use parley_protocol::MAX_CONTENT_CHARS;
use std::time::Duration;

/// Default broker endpoint.
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8080/chat";

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default number of history messages loaded on entry.
pub const DEFAULT_HISTORY_PAGE_SIZE: u32 = 50;

/// Session engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Broker endpoint handed to the transport.
    pub endpoint: String,
    /// Constant delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// History page size requested on entry.
    pub history_page_size: u32,
    /// Outgoing message limit in code points. Never above
    /// [`MAX_CONTENT_CHARS`].
    pub max_message_chars: usize,
}

impl EngineConfig {
    /// Configuration for the given endpoint with default tuning.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Override the reconnect delay.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Override the history page size.
    #[must_use]
    pub fn with_history_page_size(mut self, size: u32) -> Self {
        self.history_page_size = size;
        self
    }

    /// Override the outgoing message limit, clamped to the wire maximum.
    #[must_use]
    pub fn with_max_message_chars(mut self, limit: usize) -> Self {
        self.max_message_chars = limit.min(MAX_CONTENT_CHARS);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
            max_message_chars: MAX_CONTENT_CHARS,
        }
    }
}
