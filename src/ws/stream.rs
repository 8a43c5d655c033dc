//! Reconnecting WebSocket stream
//!
//! Keeps one logical connection alive from `start()` to `stop()`,
//! transparently reconnecting with exponential backoff and re-applying the
//! subscription set after every reconnect. Connection state is owned by the
//! background serve loop; callers only enqueue intents and read state.

use super::types::{
    Backoff, StreamConfig, StreamError, StreamEvent, StreamState, SubscriptionCodec,
};
use crate::telemetry;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Intents submitted by callers; applied by the serve loop
enum Command {
    Subscribe(String),
    Unsubscribe(String),
    Send(String),
    Stop,
}

/// How one connection episode ended
enum Episode {
    /// `stop()` was called or the command channel closed
    Stopped,
    /// The event receiver was dropped; nobody is listening
    ConsumerGone,
    /// Transport failure; the serve loop will back off and reconnect
    Failed(String),
}

/// Handle to a stream owned by a background serve loop
///
/// All methods are non-blocking. Dropping the handle without calling
/// [`stop`](Self::stop) lets the loop wind down on its own once it notices
/// the command channel is gone.
pub struct ReconnectingStream {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<StreamState>,
    task: Option<JoinHandle<()>>,
}

impl ReconnectingStream {
    /// Start the connect/serve loop as a background task
    ///
    /// Returns immediately with the handle and the event channel. Fails only
    /// if `url` is malformed; network failures are handled internally and
    /// observable via [`StreamEvent::State`].
    pub fn start(
        config: StreamConfig,
        codec: Arc<dyn SubscriptionCodec>,
    ) -> Result<(Self, mpsc::Receiver<StreamEvent>), StreamError> {
        let uri: Uri = config
            .url
            .parse()
            .map_err(|_| StreamError::InvalidUrl(config.url.clone()))?;
        if !matches!(uri.scheme_str(), Some("ws") | Some("wss")) {
            return Err(StreamError::InvalidUrl(config.url.clone()));
        }

        let (event_tx, event_rx) = mpsc::channel(config.buffer_size);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(StreamState::Disconnected);

        let task = tokio::spawn(serve(config, codec, event_tx, cmd_rx, state_tx));

        Ok((
            Self {
                cmd_tx,
                state_rx,
                task: Some(task),
            },
            event_rx,
        ))
    }

    /// Current connection state
    pub fn state(&self) -> StreamState {
        *self.state_rx.borrow()
    }

    /// Add a topic to the subscription set; idempotent
    ///
    /// Sent immediately when connected, otherwise recorded and applied on the
    /// next successful connect.
    pub fn subscribe(&self, topic: impl Into<String>) -> Result<(), StreamError> {
        self.cmd_tx
            .send(Command::Subscribe(topic.into()))
            .map_err(|_| StreamError::Closed)
    }

    /// Remove a topic from the subscription set; idempotent
    pub fn unsubscribe(&self, topic: impl Into<String>) -> Result<(), StreamError> {
        self.cmd_tx
            .send(Command::Unsubscribe(topic.into()))
            .map_err(|_| StreamError::Closed)
    }

    /// Enqueue a raw payload for transmission
    ///
    /// Fails with [`StreamError::NotConnected`] unless the stream is in the
    /// `Connected` state; callers decide whether to retry later.
    pub fn send(&self, payload: impl Into<String>) -> Result<(), StreamError> {
        if self.state() != StreamState::Connected {
            return Err(StreamError::NotConnected);
        }
        self.cmd_tx
            .send(Command::Send(payload.into()))
            .map_err(|_| StreamError::Closed)
    }

    /// Stop the stream; idempotent
    ///
    /// Cancels an in-progress backoff wait immediately and releases the
    /// transport. The loop transitions to `Closed` and never reconnects.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(Command::Stop);
    }

    /// Wait for the serve loop to finish after `stop()`
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Publishes state transitions to both the watch channel and the consumer
struct StateReporter {
    name: String,
    watch: watch::Sender<StreamState>,
    events: mpsc::Sender<StreamEvent>,
}

impl StateReporter {
    async fn set(&self, next: StreamState) {
        if *self.watch.borrow() == next {
            return;
        }
        let _ = self.watch.send(next);
        tracing::debug!(stream = %self.name, state = ?next, "stream state changed");
        let _ = self.events.send(StreamEvent::State(next)).await;
    }
}

/// The serve loop: sole owner of connection state and the subscription set
async fn serve(
    config: StreamConfig,
    codec: Arc<dyn SubscriptionCodec>,
    events: mpsc::Sender<StreamEvent>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<StreamState>,
) {
    let mut topics: BTreeSet<String> = BTreeSet::new();
    let mut backoff = Backoff::new(
        config.initial_backoff,
        config.backoff_multiplier,
        config.max_backoff,
    );
    let reporter = StateReporter {
        name: config.name.clone(),
        watch: state_tx,
        events: events.clone(),
    };

    reporter.set(StreamState::Connecting).await;

    loop {
        match open_connection(&config, codec.as_ref()).await {
            Ok(socket) => {
                backoff.reset();
                telemetry::record_stream_connected(&config.name);
                tracing::info!(stream = %config.name, url = %config.url, "stream connected");
                reporter.set(StreamState::Connected).await;

                let (write, read) = socket.split();
                match episode(
                    &config,
                    codec.as_ref(),
                    &events,
                    &mut cmd_rx,
                    &mut topics,
                    write,
                    read,
                )
                .await
                {
                    Episode::Stopped | Episode::ConsumerGone => break,
                    Episode::Failed(reason) => {
                        tracing::warn!(stream = %config.name, %reason, "stream connection lost");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(stream = %config.name, error = %e, "stream connect failed");
            }
        }

        if events.is_closed() {
            break;
        }

        let delay = backoff.next_delay();
        telemetry::record_stream_reconnect(&config.name);
        reporter.set(StreamState::Reconnecting).await;
        tracing::info!(
            stream = %config.name,
            attempt = backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            "reconnecting after backoff"
        );

        // The wait is cancellable: a Stop arriving mid-backoff ends the loop
        // without waiting out the delay.
        let stop = tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            stop = drain_while_disconnected(&mut cmd_rx, &mut topics) => stop,
        };
        if stop {
            break;
        }
    }

    reporter.set(StreamState::Closed).await;
    tracing::info!(stream = %config.name, "stream closed");
}

/// One connect attempt, with per-attempt handshake headers from the codec
async fn open_connection(
    config: &StreamConfig,
    codec: &dyn SubscriptionCodec,
) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, String> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| e.to_string())?;

    for (name, value) in codec.connect_headers() {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                request.headers_mut().insert(name, value);
            }
            _ => {
                tracing::warn!(stream = %config.name, header = %name, "skipping invalid header");
            }
        }
    }

    let (socket, _response) = connect_async(request).await.map_err(|e| e.to_string())?;
    Ok(socket)
}

/// One connection episode, from post-connect handshake to disconnect
///
/// The hello and subscription messages go out before the first read, so a
/// consumer never misses a topic across a reconnect.
async fn episode(
    config: &StreamConfig,
    codec: &dyn SubscriptionCodec,
    events: &mpsc::Sender<StreamEvent>,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    topics: &mut BTreeSet<String>,
    mut write: WsSink,
    mut read: WsSource,
) -> Episode {
    if let Some(hello) = codec.hello() {
        if let Err(e) = write.send(Message::Text(hello)).await {
            return Episode::Failed(e.to_string());
        }
    }

    if !topics.is_empty() {
        let all: Vec<String> = topics.iter().cloned().collect();
        if let Some(msg) = codec.subscribe(&all) {
            if let Err(e) = write.send(Message::Text(msg)).await {
                return Episode::Failed(e.to_string());
            }
            tracing::debug!(stream = %config.name, topics = all.len(), "subscriptions re-applied");
        }
    }

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    // Malformed payloads are reported, never fatal
                    if serde_json::from_str::<serde_json::Value>(&text).is_ok() {
                        if events.send(StreamEvent::Message(text)).await.is_err() {
                            return Episode::ConsumerGone;
                        }
                    } else {
                        let preview: String = text.chars().take(120).collect();
                        tracing::warn!(stream = %config.name, %preview, "malformed inbound message");
                        if events.send(StreamEvent::ProtocolError(preview)).await.is_err() {
                            return Episode::ConsumerGone;
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        return Episode::Failed(e.to_string());
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    return Episode::Failed("close frame received".to_string());
                }
                Some(Ok(_)) => {
                    // Binary and pong frames carry nothing for JSON venues
                }
                Some(Err(e)) => return Episode::Failed(e.to_string()),
                None => return Episode::Failed("transport stream ended".to_string()),
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Subscribe(topic)) => {
                    if topics.insert(topic.clone()) {
                        if let Some(msg) = codec.subscribe(std::slice::from_ref(&topic)) {
                            if let Err(e) = write.send(Message::Text(msg)).await {
                                return Episode::Failed(e.to_string());
                            }
                        }
                    }
                }
                Some(Command::Unsubscribe(topic)) => {
                    if topics.remove(&topic) {
                        if let Some(msg) = codec.unsubscribe(std::slice::from_ref(&topic)) {
                            if let Err(e) = write.send(Message::Text(msg)).await {
                                return Episode::Failed(e.to_string());
                            }
                        }
                    }
                }
                Some(Command::Send(payload)) => {
                    if let Err(e) = write.send(Message::Text(payload)).await {
                        return Episode::Failed(e.to_string());
                    }
                }
                Some(Command::Stop) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    return Episode::Stopped;
                }
            },
        }
    }
}

/// Apply subscription intents while disconnected; resolves only on Stop
async fn drain_while_disconnected(
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    topics: &mut BTreeSet<String>,
) -> bool {
    loop {
        match cmd_rx.recv().await {
            Some(Command::Subscribe(topic)) => {
                topics.insert(topic);
            }
            Some(Command::Unsubscribe(topic)) => {
                topics.remove(&topic);
            }
            Some(Command::Send(_)) => {
                tracing::debug!("dropping send queued while disconnected");
            }
            Some(Command::Stop) | None => return true,
        }
    }
}
