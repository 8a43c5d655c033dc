//! Stream types and configuration

use std::time::Duration;
use thiserror::Error;

/// Configuration for a reconnecting stream
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// WebSocket URL to connect to
    pub url: String,
    /// Name used in log/metric context
    pub name: String,
    /// Delay before the first reconnection attempt
    pub initial_backoff: Duration,
    /// Multiplier applied to the delay after each failed attempt
    pub backoff_multiplier: u32,
    /// Maximum delay between reconnection attempts
    pub max_backoff: Duration,
    /// Buffer size of the event channel handed to the consumer
    pub buffer_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            name: "stream".to_string(),
            initial_backoff: Duration::from_secs(1),
            backoff_multiplier: 2,
            max_backoff: Duration::from_secs(30),
            buffer_size: 1024,
        }
    }
}

impl StreamConfig {
    /// Create a new config with the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the stream name used in logs
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set initial reconnection delay
    pub fn initial_backoff(mut self, d: Duration) -> Self {
        self.initial_backoff = d;
        self
    }

    /// Set backoff multiplier
    pub fn backoff_multiplier(mut self, m: u32) -> Self {
        self.backoff_multiplier = m;
        self
    }

    /// Set maximum reconnection delay
    pub fn max_backoff(mut self, d: Duration) -> Self {
        self.max_backoff = d;
        self
    }

    /// Set the event channel buffer size
    pub fn buffer_size(mut self, n: usize) -> Self {
        self.buffer_size = n;
        self
    }
}

/// Connection state of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No connection attempt made yet
    Disconnected,
    /// First connection attempt in progress
    Connecting,
    /// Connection established, subscriptions applied
    Connected,
    /// Connection lost, retrying with backoff
    Reconnecting,
    /// Stream stopped, will not reconnect
    Closed,
}

/// Events delivered to the stream consumer
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Inbound payload from the venue
    Message(String),
    /// Connection state changed
    State(StreamState),
    /// Inbound frame that could not be parsed; connection stays up
    ProtocolError(String),
}

/// Stream errors surfaced to callers
///
/// Transport failures are never surfaced here; they are absorbed by the
/// reconnect loop and observable only through [`StreamEvent::State`].
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// URL failed to parse or has a non-WebSocket scheme
    #[error("invalid stream url: {0}")]
    InvalidUrl(String),
    /// `send` called while not in the `Connected` state
    #[error("stream is not connected")]
    NotConnected,
    /// Stream was stopped and its loop has exited
    #[error("stream is closed")]
    Closed,
}

/// Venue-specific wire format for subscribe/unsubscribe messages
///
/// Injected into [`super::ReconnectingStream`] so one stream implementation
/// serves every venue. `hello` is sent first on every (re)connect, before
/// topic subscriptions - venues that authenticate over the socket put their
/// auth message here.
pub trait SubscriptionCodec: Send + Sync {
    /// Extra headers for the connection handshake, regenerated per attempt
    ///
    /// Venues that authenticate at the handshake (signed timestamp headers)
    /// provide them here so every reconnect gets a fresh signature.
    fn connect_headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Message sent on every successful connect before any subscription
    fn hello(&self) -> Option<String> {
        None
    }

    /// Subscription message for the given topics, or `None` if the venue
    /// needs no explicit subscribe (e.g. the topic is baked into the URL)
    fn subscribe(&self, topics: &[String]) -> Option<String>;

    /// Unsubscription message for the given topics
    fn unsubscribe(&self, topics: &[String]) -> Option<String>;
}

/// Exponential backoff schedule for reconnection attempts
///
/// Delay for the Nth consecutive failure is
/// `min(initial * multiplier^(N-1), max)`. Reset after every successful
/// connect so a later outage starts over at `initial`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    multiplier: u32,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    /// Create a new backoff schedule
    pub fn new(initial: Duration, multiplier: u32, max: Duration) -> Self {
        Self {
            initial,
            multiplier,
            max,
            attempt: 0,
        }
    }

    /// Delay to wait before the next attempt; advances the schedule
    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.multiplier.checked_pow(self.attempt) {
            Some(factor) => self.initial.saturating_mul(factor).min(self.max),
            None => self.max,
        };
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Reset the schedule after a successful connect
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of consecutive failures so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
