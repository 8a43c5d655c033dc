//! Kalshi session
//!
//! Kalshi quotes prices in cents (1-99); conversion to the core's decimal
//! unit happens exactly once, at this boundary. Orderbook data arrives as
//! yes/no ladders over the authenticated WebSocket.

use super::auth::rest_signature;
use super::price::{cents_to_decimal, decimal_to_cents, validate_order_price};
use super::types::{
    BookUpdate, ExchangeError, FillEvent, Order, OrderState, OrderStatus, Outcome, Position,
    PriceLevel, Side, Trade,
};
use super::{Credentials, ExchangeSession};
use crate::telemetry;
use crate::ws::{ReconnectingStream, StreamConfig, StreamEvent, SubscriptionCodec};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Kalshi trade API base
pub const API_BASE: &str = "https://api.elections.kalshi.com/trade-api/v2";
/// Kalshi WebSocket endpoint
pub const WS_URL: &str = "wss://api.elections.kalshi.com/trade-api/ws/v2";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Codec for Kalshi WebSocket channels
///
/// Auth rides on the handshake headers; subscriptions are id-tagged
/// commands. The fill channel needs no tickers, so it goes in `hello`.
struct KalshiCodec {
    api_key_id: String,
    secret: String,
    message_id: AtomicU64,
    /// Channels subscribed per-ticker via the topic set
    ticker_channels: Vec<&'static str>,
    /// Channels subscribed once per connection, without tickers
    connection_channels: Vec<&'static str>,
}

impl KalshiCodec {
    fn orderbook(api_key_id: String, secret: String) -> Self {
        Self {
            api_key_id,
            secret,
            message_id: AtomicU64::new(1),
            ticker_channels: vec!["orderbook_delta"],
            connection_channels: vec![],
        }
    }

    fn fills(api_key_id: String, secret: String) -> Self {
        Self {
            api_key_id,
            secret,
            message_id: AtomicU64::new(1),
            ticker_channels: vec![],
            connection_channels: vec!["fill"],
        }
    }

    fn command(&self, cmd: &str, channels: &[&str], tickers: Option<&[String]>) -> Option<String> {
        let id = self.message_id.fetch_add(1, Ordering::Relaxed);
        let mut params = serde_json::json!({ "channels": channels });
        if let Some(tickers) = tickers {
            params["market_tickers"] = serde_json::json!(tickers);
        }
        serde_json::to_string(&serde_json::json!({
            "id": id,
            "cmd": cmd,
            "params": params,
        }))
        .ok()
    }
}

impl SubscriptionCodec for KalshiCodec {
    fn connect_headers(&self) -> Vec<(String, String)> {
        let timestamp = Utc::now().timestamp_millis();
        match rest_signature(&self.secret, timestamp, "GET", "/trade-api/ws/v2", "") {
            Ok(signature) => vec![
                ("KALSHI-ACCESS-KEY".to_string(), self.api_key_id.clone()),
                ("KALSHI-ACCESS-SIGNATURE".to_string(), signature),
                ("KALSHI-ACCESS-TIMESTAMP".to_string(), timestamp.to_string()),
            ],
            Err(e) => {
                tracing::error!(error = %e, "kalshi ws auth signing failed");
                Vec::new()
            }
        }
    }

    fn hello(&self) -> Option<String> {
        if self.connection_channels.is_empty() {
            return None;
        }
        self.command("subscribe", &self.connection_channels, None)
    }

    fn subscribe(&self, topics: &[String]) -> Option<String> {
        if self.ticker_channels.is_empty() {
            return None;
        }
        self.command("subscribe", &self.ticker_channels, Some(topics))
    }

    fn unsubscribe(&self, topics: &[String]) -> Option<String> {
        if self.ticker_channels.is_empty() {
            return None;
        }
        self.command("unsubscribe", &self.ticker_channels, Some(topics))
    }
}

/// Yes/no price ladders for one market, keyed by cents
#[derive(Debug, Default)]
struct LadderBook {
    yes: BTreeMap<u32, i64>,
    no: BTreeMap<u32, i64>,
}

impl LadderBook {
    fn snapshot(&mut self, yes: &[(u32, i64)], no: &[(u32, i64)]) {
        self.yes = yes.iter().copied().filter(|(_, q)| *q > 0).collect();
        self.no = no.iter().copied().filter(|(_, q)| *q > 0).collect();
    }

    fn delta(&mut self, side: &str, price: u32, delta: i64) {
        let ladder = match side {
            "yes" => &mut self.yes,
            "no" => &mut self.no,
            _ => return,
        };
        let qty = ladder.get(&price).copied().unwrap_or(0) + delta;
        if qty <= 0 {
            ladder.remove(&price);
        } else {
            ladder.insert(price, qty);
        }
    }

    /// Project the yes-side view: bids from the yes ladder, asks derived
    /// from the no ladder at `100 - no_cents`
    fn to_update(&self, ticker: &str) -> BookUpdate {
        let bids = self
            .yes
            .iter()
            .rev()
            .map(|(&cents, &qty)| PriceLevel {
                price: cents_to_decimal(cents),
                size: Decimal::from(qty),
            })
            .collect();

        let mut asks: Vec<PriceLevel> = self
            .no
            .iter()
            .map(|(&cents, &qty)| PriceLevel {
                price: cents_to_decimal(100u32.saturating_sub(cents)),
                size: Decimal::from(qty),
            })
            .collect();
        asks.sort_by(|a, b| a.price.cmp(&b.price));

        BookUpdate {
            instrument_id: ticker.to_string(),
            bids,
            asks,
            timestamp: Utc::now(),
        }
    }
}

/// Orderbook feed shared by every instrument subscription on this session
struct BookFeed {
    stream: ReconnectingStream,
    routes: Arc<Mutex<HashMap<String, mpsc::Sender<BookUpdate>>>>,
}

/// Kalshi session implementing the uniform exchange contract
pub struct KalshiSession {
    credentials: Credentials,
    api_base: String,
    ws_url: String,
    initial_backoff: Duration,
    backoff_multiplier: u32,
    max_backoff: Duration,
    http: Option<reqwest::Client>,
    book_feed: Option<BookFeed>,
    fill_stream: Option<ReconnectingStream>,
}

impl KalshiSession {
    /// Create a session for an account
    pub fn new(credentials: Credentials) -> Self {
        let api_base = credentials
            .endpoint
            .clone()
            .unwrap_or_else(|| API_BASE.to_string());
        Self {
            credentials,
            api_base,
            ws_url: WS_URL.to_string(),
            initial_backoff: Duration::from_secs(1),
            backoff_multiplier: 2,
            max_backoff: Duration::from_secs(30),
            http: None,
            book_feed: None,
            fill_stream: None,
        }
    }

    /// Tune reconnect backoff for this session's streams
    pub fn with_backoff(mut self, initial: Duration, multiplier: u32, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.backoff_multiplier = multiplier;
        self.max_backoff = max;
        self
    }

    fn http(&self) -> Result<&reqwest::Client, ExchangeError> {
        self.http.as_ref().ok_or(ExchangeError::NotConnected)
    }

    fn signed(
        &self,
        request: reqwest::RequestBuilder,
        method: &str,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, ExchangeError> {
        let timestamp = Utc::now().timestamp_millis();
        let signature = rest_signature(&self.credentials.secret, timestamp, method, path, "")?;
        Ok(request
            .header("KALSHI-ACCESS-KEY", &self.credentials.api_key_id)
            .header("KALSHI-ACCESS-SIGNATURE", signature)
            .header("KALSHI-ACCESS-TIMESTAMP", timestamp.to_string()))
    }

    fn stream_config(&self, name: &str) -> StreamConfig {
        StreamConfig::new(&self.ws_url)
            .name(name)
            .initial_backoff(self.initial_backoff)
            .backoff_multiplier(self.backoff_multiplier)
            .max_backoff(self.max_backoff)
    }
}

#[async_trait]
impl ExchangeSession for KalshiSession {
    fn venue(&self) -> &'static str {
        "kalshi"
    }

    async fn connect(&mut self) -> Result<(), ExchangeError> {
        if self.http.is_some() {
            return Ok(());
        }
        if self.credentials.is_anonymous() {
            return Err(ExchangeError::Credentials(
                "kalshi requires API credentials".to_string(),
            ));
        }
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        self.http = Some(client);
        tracing::info!(venue = "kalshi", "session connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ExchangeError> {
        if let Some(feed) = self.book_feed.take() {
            feed.stream.stop();
            feed.stream.join().await;
        }
        if let Some(stream) = self.fill_stream.take() {
            stream.stop();
            stream.join().await;
        }
        if self.http.take().is_some() {
            tracing::info!(venue = "kalshi", "session disconnected");
        }
        Ok(())
    }

    async fn place_limit_order(
        &self,
        instrument_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Result<Order, ExchangeError> {
        validate_order_price(price)?;

        let price_cents = decimal_to_cents(price);
        // BUY takes the yes side, SELL the no side, both as "buy" actions
        let kalshi_side = match side {
            Side::Buy => "yes",
            Side::Sell => "no",
        };

        let mut body = serde_json::json!({
            "ticker": instrument_id,
            "client_order_id": uuid::Uuid::new_v4().to_string(),
            "side": kalshi_side,
            "action": "buy",
            "type": "limit",
            "count": size.trunc().to_i64().unwrap_or(0),
        });
        body[match side {
            Side::Buy => "yes_price",
            Side::Sell => "no_price",
        }] = serde_json::json!(price_cents);

        let path = "/portfolio/orders";
        let url = format!("{}{}", self.api_base, path);
        let request = self.http()?.post(&url).json(&body);
        let response = self.signed(request, "POST", path)?.send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ExchangeError::OrderRejected { reason: text });
        }

        let parsed: OrderEnvelope = serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Decode(format!("order response: {e}")))?;

        telemetry::record_order_placed("kalshi");
        tracing::info!(
            venue = "kalshi",
            order_id = %parsed.order.order_id,
            instrument = %instrument_id,
            %side,
            price_cents,
            "order placed"
        );

        Ok(Order {
            order_id: parsed.order.order_id,
            instrument_id: instrument_id.to_string(),
            side,
            price,
            size,
            status: parse_order_status(&parsed.order.status),
            filled_size: Decimal::from(parsed.order.fill_count),
        })
    }

    async fn place_market_order(
        &self,
        instrument_id: &str,
        side: Side,
        size: Decimal,
    ) -> Result<Order, ExchangeError> {
        // No true market orders on this venue: an aggressive limit fills
        // against the whole book immediately. The price applies to whichever
        // side the order lands on (yes for BUY, no for SELL).
        let price = Decimal::new(99, 2);
        self.place_limit_order(instrument_id, side, price, size)
            .await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError> {
        let path = format!("/portfolio/orders/{order_id}");
        let url = format!("{}{}", self.api_base, path);
        let request = self.http()?.delete(&url);
        let response = self.signed(request, "DELETE", &path)?.send().await?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(ExchangeError::InvalidOrder(order_id.to_string()));
        }
        if !status.is_success() {
            let text = response.text().await?;
            return Err(ExchangeError::Venue {
                status: status.as_u16(),
                body: text,
            });
        }

        tracing::info!(venue = "kalshi", %order_id, "order cancelled");
        Ok(())
    }

    async fn get_order_status(&self, order_id: &str) -> Result<OrderState, ExchangeError> {
        let path = format!("/portfolio/orders/{order_id}");
        let url = format!("{}{}", self.api_base, path);
        let request = self.http()?.get(&url);
        let response = self.signed(request, "GET", &path)?.send().await?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(ExchangeError::InvalidOrder(order_id.to_string()));
        }
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ExchangeError::Venue {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: OrderEnvelope = serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Decode(format!("order status: {e}")))?;
        let filled_size = Decimal::from(parsed.order.fill_count);
        let mut order_status = parse_order_status(&parsed.order.status);
        if order_status == OrderStatus::Open && filled_size > Decimal::ZERO {
            order_status = OrderStatus::PartiallyFilled;
        }
        Ok(OrderState {
            status: order_status,
            filled_size,
        })
    }

    async fn get_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        let path = "/portfolio/positions";
        let url = format!("{}{}", self.api_base, path);
        let request = self.http()?.get(&url);
        let response = self.signed(request, "GET", path)?.send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ExchangeError::Venue {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: PositionsEnvelope = serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Decode(format!("positions: {e}")))?;

        Ok(parsed
            .market_positions
            .into_iter()
            .filter(|p| p.position != 0)
            .map(|p| Position {
                instrument_id: p.ticker.clone(),
                market_id: p.ticker,
                // Positive contract counts are yes exposure, negative no
                outcome: if p.position > 0 {
                    Outcome::Yes
                } else {
                    Outcome::No
                },
                size: Decimal::from(p.position.unsigned_abs()),
                avg_price: Decimal::ZERO,
            })
            .collect())
    }

    async fn get_balance(&self) -> Result<Decimal, ExchangeError> {
        let path = "/portfolio/balance";
        let url = format!("{}{}", self.api_base, path);
        let request = self.http()?.get(&url);
        let response = self.signed(request, "GET", path)?.send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ExchangeError::Venue {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: BalanceEnvelope = serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Decode(format!("balance: {e}")))?;
        // Balance arrives in cents
        Ok(Decimal::from(parsed.balance) / Decimal::ONE_HUNDRED)
    }

    async fn get_trade_history(&self, limit: usize) -> Result<Vec<Trade>, ExchangeError> {
        let path = "/portfolio/fills";
        let url = format!("{}{}", self.api_base, path);
        let request = self
            .http()?
            .get(&url)
            .query(&[("limit", limit.to_string())]);
        let response = self.signed(request, "GET", path)?.send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ExchangeError::Venue {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: FillsEnvelope = serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Decode(format!("fills: {e}")))?;

        let mut trades: Vec<Trade> = parsed
            .fills
            .into_iter()
            .map(|f| Trade {
                trade_id: f.trade_id,
                instrument_id: f.ticker.clone(),
                market_id: f.ticker,
                side: if f.side == "yes" { Side::Buy } else { Side::Sell },
                price: cents_to_decimal(f.price),
                size: Decimal::from(f.count),
                timestamp: f
                    .created_time
                    .as_deref()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now),
            })
            .collect();
        trades.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        trades.truncate(limit);
        Ok(trades)
    }

    async fn subscribe_orderbook(
        &mut self,
        instrument_id: &str,
    ) -> Result<mpsc::Receiver<BookUpdate>, ExchangeError> {
        if self.book_feed.is_none() {
            let codec = KalshiCodec::orderbook(
                self.credentials.api_key_id.clone(),
                self.credentials.secret.clone(),
            );
            let (stream, events) =
                ReconnectingStream::start(self.stream_config("kalshi-book"), Arc::new(codec))?;
            let routes: Arc<Mutex<HashMap<String, mpsc::Sender<BookUpdate>>>> =
                Arc::new(Mutex::new(HashMap::new()));
            tokio::spawn(dispatch_books(events, Arc::clone(&routes)));
            self.book_feed = Some(BookFeed { stream, routes });
        }

        let feed = self.book_feed.as_ref().ok_or(ExchangeError::NotConnected)?;
        let (tx, rx) = mpsc::channel(64);
        feed.routes
            .lock()
            .await
            .insert(instrument_id.to_string(), tx);
        feed.stream.subscribe(instrument_id)?;
        Ok(rx)
    }

    async fn unsubscribe_orderbook(&mut self, instrument_id: &str) -> Result<(), ExchangeError> {
        if let Some(feed) = self.book_feed.as_ref() {
            feed.routes.lock().await.remove(instrument_id);
            feed.stream.unsubscribe(instrument_id)?;
        }
        Ok(())
    }

    async fn subscribe_fills(&mut self) -> Result<mpsc::Receiver<FillEvent>, ExchangeError> {
        if self.credentials.is_anonymous() {
            return Err(ExchangeError::Credentials(
                "fill subscription requires API credentials".to_string(),
            ));
        }

        let codec = KalshiCodec::fills(
            self.credentials.api_key_id.clone(),
            self.credentials.secret.clone(),
        );
        let (stream, events) =
            ReconnectingStream::start(self.stream_config("kalshi-fills"), Arc::new(codec))?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(dispatch_fills(events, tx));
        self.fill_stream = Some(stream);
        Ok(rx)
    }
}

/// Maintain ladders per ticker and route book updates to subscribers
async fn dispatch_books(
    mut events: mpsc::Receiver<StreamEvent>,
    routes: Arc<Mutex<HashMap<String, mpsc::Sender<BookUpdate>>>>,
) {
    let mut books: HashMap<String, LadderBook> = HashMap::new();

    while let Some(event) = events.recv().await {
        let text = match event {
            StreamEvent::Message(text) => text,
            StreamEvent::State(state) => {
                tracing::debug!(venue = "kalshi", state = ?state, "book feed state");
                continue;
            }
            StreamEvent::ProtocolError(_) => continue,
        };

        if let Some(update) = apply_book_message(&text, &mut books) {
            let mut dead = false;
            {
                let guard = routes.lock().await;
                if let Some(tx) = guard.get(&update.instrument_id) {
                    dead = tx.send(update.clone()).await.is_err();
                }
            }
            if dead {
                routes.lock().await.remove(&update.instrument_id);
            }
        }
    }
}

/// Forward fills from the fill channel
async fn dispatch_fills(mut events: mpsc::Receiver<StreamEvent>, tx: mpsc::Sender<FillEvent>) {
    while let Some(event) = events.recv().await {
        let text = match event {
            StreamEvent::Message(text) => text,
            _ => continue,
        };
        if let Some(fill) = parse_fill_message(&text) {
            telemetry::record_fill("kalshi");
            if tx.send(fill).await.is_err() {
                break;
            }
        }
    }
}

fn parse_order_status(status: &str) -> OrderStatus {
    match status.to_lowercase().as_str() {
        "resting" | "open" | "pending" => OrderStatus::Open,
        "executed" | "filled" => OrderStatus::Filled,
        "canceled" | "cancelled" => OrderStatus::Cancelled,
        "rejected" => OrderStatus::Rejected,
        _ => OrderStatus::Open,
    }
}

/// Apply one WebSocket frame to the ladder state; returns the changed book
fn apply_book_message(
    text: &str,
    books: &mut HashMap<String, LadderBook>,
) -> Option<BookUpdate> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let msg_type = value.get("type")?.as_str()?;
    let msg = value.get("msg")?;

    match msg_type {
        "orderbook_snapshot" => {
            let ticker = msg.get("market_ticker")?.as_str()?.to_string();
            let yes = parse_ladder(msg.get("yes"));
            let no = parse_ladder(msg.get("no"));
            let book = books.entry(ticker.clone()).or_default();
            book.snapshot(&yes, &no);
            Some(book.to_update(&ticker))
        }
        "orderbook_delta" => {
            let ticker = msg.get("market_ticker")?.as_str()?.to_string();
            let side = msg.get("side")?.as_str()?;
            let price = msg.get("price")?.as_u64()? as u32;
            let delta = msg.get("delta")?.as_i64()?;
            let book = books.entry(ticker.clone()).or_default();
            book.delta(side, price, delta);
            Some(book.to_update(&ticker))
        }
        _ => None,
    }
}

fn parse_ladder(value: Option<&serde_json::Value>) -> Vec<(u32, i64)> {
    value
        .and_then(|v| v.as_array())
        .map(|levels| {
            levels
                .iter()
                .filter_map(|level| {
                    let pair = level.as_array()?;
                    Some((pair.first()?.as_u64()? as u32, pair.get(1)?.as_i64()?))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse a fill-channel frame
fn parse_fill_message(text: &str) -> Option<FillEvent> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value.get("type")?.as_str()? != "fill" {
        return None;
    }
    let msg = value.get("msg")?;

    let side_is_yes = msg.get("side")?.as_str()? == "yes";
    let price_cents = msg
        .get("yes_price")
        .or_else(|| msg.get("price"))
        .and_then(|v| v.as_u64())? as u32;

    Some(FillEvent {
        order_id: msg
            .get("order_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        instrument_id: msg
            .get("market_ticker")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        side: if side_is_yes { Side::Buy } else { Side::Sell },
        price: cents_to_decimal(price_cents),
        size: Decimal::from(msg.get("count").and_then(|v| v.as_i64()).unwrap_or(0)),
        timestamp: Utc::now(),
    })
}

#[derive(Debug, Deserialize)]
struct OrderEnvelope {
    order: RawKalshiOrder,
}

#[derive(Debug, Deserialize)]
struct RawKalshiOrder {
    #[serde(default)]
    order_id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    fill_count: i64,
}

#[derive(Debug, Deserialize)]
struct PositionsEnvelope {
    #[serde(default)]
    market_positions: Vec<RawKalshiPosition>,
}

#[derive(Debug, Deserialize)]
struct RawKalshiPosition {
    #[serde(default)]
    ticker: String,
    #[serde(default)]
    position: i64,
}

#[derive(Debug, Deserialize)]
struct BalanceEnvelope {
    #[serde(default)]
    balance: i64,
}

#[derive(Debug, Deserialize)]
struct FillsEnvelope {
    #[serde(default)]
    fills: Vec<RawKalshiFill>,
}

#[derive(Debug, Deserialize)]
struct RawKalshiFill {
    #[serde(default)]
    trade_id: String,
    #[serde(default)]
    ticker: String,
    #[serde(default)]
    side: String,
    #[serde(default)]
    count: i64,
    #[serde(default)]
    price: u32,
    #[serde(default)]
    created_time: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_codec_subscribe_message() {
        let codec = KalshiCodec::orderbook("key".into(), "c2VjcmV0".into());
        let msg = codec.subscribe(&["KXBTC15M-1".to_string()]).unwrap();
        assert!(msg.contains("\"cmd\":\"subscribe\""));
        assert!(msg.contains("orderbook_delta"));
        assert!(msg.contains("KXBTC15M-1"));

        // Message ids increase monotonically
        let next = codec.subscribe(&["KXBTC15M-2".to_string()]).unwrap();
        let first_id: serde_json::Value = serde_json::from_str(&msg).unwrap();
        let second_id: serde_json::Value = serde_json::from_str(&next).unwrap();
        assert!(second_id["id"].as_u64() > first_id["id"].as_u64());
    }

    #[test]
    fn test_codec_fill_channel_uses_hello() {
        let codec = KalshiCodec::fills("key".into(), "c2VjcmV0".into());
        let hello = codec.hello().unwrap();
        assert!(hello.contains("\"fill\""));
        assert!(codec.subscribe(&["T".to_string()]).is_none());
    }

    #[test]
    fn test_codec_connect_headers() {
        let codec = KalshiCodec::orderbook("key".into(), "c2VjcmV0".into());
        let headers = codec.connect_headers();
        let names: Vec<&str> = headers.iter().map(|(k, _)| k.as_str()).collect();
        assert!(names.contains(&"KALSHI-ACCESS-KEY"));
        assert!(names.contains(&"KALSHI-ACCESS-SIGNATURE"));
        assert!(names.contains(&"KALSHI-ACCESS-TIMESTAMP"));
    }

    #[test]
    fn test_ladder_book_snapshot_projection() {
        let mut book = LadderBook::default();
        book.snapshot(&[(50, 100), (48, 200)], &[(45, 150), (40, 50)]);

        let update = book.to_update("T");
        // Bids: yes ladder best-first
        assert_eq!(update.best_bid(), Some(dec!(0.50)));
        assert_eq!(update.bids.len(), 2);
        // Asks: derived from no ladder, 100 - 45 = 55 best
        assert_eq!(update.best_ask(), Some(dec!(0.55)));
        assert_eq!(update.asks.len(), 2);
    }

    #[test]
    fn test_ladder_book_delta_removes_empty_levels() {
        let mut book = LadderBook::default();
        book.snapshot(&[(50, 100)], &[]);

        book.delta("yes", 50, -100);
        assert!(book.to_update("T").bids.is_empty());

        book.delta("yes", 52, 30);
        assert_eq!(book.to_update("T").best_bid(), Some(dec!(0.52)));
    }

    #[test]
    fn test_apply_book_message_snapshot_then_delta() {
        let mut books = HashMap::new();

        let snapshot = r#"{
            "type": "orderbook_snapshot",
            "msg": {"market_ticker": "KXBTC15M-1", "yes": [[50, 100]], "no": [[45, 150]]}
        }"#;
        let update = apply_book_message(snapshot, &mut books).unwrap();
        assert_eq!(update.instrument_id, "KXBTC15M-1");
        assert_eq!(update.best_bid(), Some(dec!(0.50)));
        assert_eq!(update.best_ask(), Some(dec!(0.55)));

        let delta = r#"{
            "type": "orderbook_delta",
            "msg": {"market_ticker": "KXBTC15M-1", "side": "yes", "price": 51, "delta": 40}
        }"#;
        let update = apply_book_message(delta, &mut books).unwrap();
        assert_eq!(update.best_bid(), Some(dec!(0.51)));

        let other = r#"{"type": "subscribed", "msg": {}}"#;
        assert!(apply_book_message(other, &mut books).is_none());
    }

    #[test]
    fn test_parse_fill_message() {
        let text = r#"{
            "type": "fill",
            "msg": {
                "trade_id": "t1",
                "order_id": "o1",
                "market_ticker": "KXBTC15M-1",
                "side": "yes",
                "yes_price": 55,
                "count": 10
            }
        }"#;
        let fill = parse_fill_message(text).unwrap();
        assert_eq!(fill.order_id, "o1");
        assert_eq!(fill.instrument_id, "KXBTC15M-1");
        assert_eq!(fill.side, Side::Buy);
        assert_eq!(fill.price, dec!(0.55));
        assert_eq!(fill.size, dec!(10));

        assert!(parse_fill_message(r#"{"type": "subscribed", "msg": {}}"#).is_none());
    }

    #[test]
    fn test_parse_order_status_mapping() {
        assert_eq!(parse_order_status("resting"), OrderStatus::Open);
        assert_eq!(parse_order_status("executed"), OrderStatus::Filled);
        assert_eq!(parse_order_status("canceled"), OrderStatus::Cancelled);
        assert_eq!(parse_order_status("weird"), OrderStatus::Open);
    }

    #[tokio::test]
    async fn test_connect_requires_credentials() {
        let mut session = KalshiSession::new(Credentials::anonymous());
        let result = session.connect().await;
        assert!(matches!(result, Err(ExchangeError::Credentials(_))));
    }

    #[tokio::test]
    async fn test_disconnect_unconnected_is_noop() {
        let mut session = KalshiSession::new(Credentials::new("k", "c2VjcmV0"));
        assert!(session.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_place_limit_order_validates_price() {
        let mut session = KalshiSession::new(Credentials::new("k", "c2VjcmV0"));
        session.connect().await.unwrap();

        let result = session
            .place_limit_order("KXBTC15M-1", Side::Buy, dec!(1.5), dec!(10))
            .await;
        assert!(matches!(result, Err(ExchangeError::OrderRejected { .. })));

        session.disconnect().await.unwrap();
    }
}
