//! Reconnecting stream transport
//!
//! One concrete WebSocket wrapper composed by every feed and session,
//! configured with venue-specific subscription codecs.

mod stream;
mod types;

pub use stream::ReconnectingStream;
pub use types::{
    Backoff, StreamConfig, StreamError, StreamEvent, StreamState, SubscriptionCodec,
};
