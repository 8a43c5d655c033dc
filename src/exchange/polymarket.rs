//! Polymarket CLOB session
//!
//! REST order/position/balance access plus orderbook and user (fill) feeds
//! over the CLOB WebSocket. Polymarket quotes decimal prices in [0, 1], so
//! prices pass through this boundary unchanged.

use super::auth::{rest_signature, ws_signature};
use super::price::validate_order_price;
use super::types::{
    BookUpdate, ExchangeError, FillEvent, Order, OrderState, OrderStatus, Outcome, Position,
    PriceLevel, Side, Trade,
};
use super::{Credentials, ExchangeSession};
use crate::telemetry;
use crate::ws::{ReconnectingStream, StreamConfig, StreamEvent, SubscriptionCodec};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// CLOB REST host
pub const CLOB_HOST: &str = "https://clob.polymarket.com";
/// Data API host for positions/balance/trades
pub const DATA_API: &str = "https://data-api.polymarket.com";
/// Market-data WebSocket (public)
pub const MARKET_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";
/// User WebSocket (authenticated fills/orders)
pub const USER_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/user";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Subscription message for the market channel
#[derive(Debug, Serialize)]
struct MarketSubscription {
    assets_ids: Vec<String>,
    #[serde(rename = "type")]
    channel: &'static str,
}

/// Codec for the public market channel
struct MarketChannelCodec;

impl SubscriptionCodec for MarketChannelCodec {
    fn subscribe(&self, topics: &[String]) -> Option<String> {
        serde_json::to_string(&MarketSubscription {
            assets_ids: topics.to_vec(),
            channel: "market",
        })
        .ok()
    }

    fn unsubscribe(&self, _topics: &[String]) -> Option<String> {
        // The market channel has no unsubscribe message; removal takes effect
        // on the next reconnect when the remaining set is re-applied.
        None
    }
}

/// Codec for the authenticated user channel
struct UserChannelCodec {
    api_key: String,
    secret: String,
    passphrase: String,
}

impl SubscriptionCodec for UserChannelCodec {
    fn hello(&self) -> Option<String> {
        let timestamp = Utc::now().timestamp();
        let signature = match ws_signature(&self.secret, timestamp, "/ws/user") {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "user channel auth signing failed");
                return None;
            }
        };
        serde_json::to_string(&serde_json::json!({
            "type": "auth",
            "apiKey": self.api_key,
            "secret": self.secret,
            "passphrase": self.passphrase,
            "timestamp": timestamp,
            "signature": signature,
        }))
        .ok()
    }

    fn subscribe(&self, _topics: &[String]) -> Option<String> {
        // Auth alone subscribes the session to all of the account's activity
        None
    }

    fn unsubscribe(&self, _topics: &[String]) -> Option<String> {
        None
    }
}

/// Orderbook feed shared by every instrument subscription on this session
struct BookFeed {
    stream: ReconnectingStream,
    routes: Arc<Mutex<HashMap<String, mpsc::Sender<BookUpdate>>>>,
}

/// Polymarket session implementing the uniform exchange contract
pub struct PolymarketSession {
    credentials: Credentials,
    /// Wallet address used by the data API for positions/balance/trades
    address: String,
    clob_host: String,
    data_api: String,
    market_ws_url: String,
    user_ws_url: String,
    initial_backoff: Duration,
    backoff_multiplier: u32,
    max_backoff: Duration,
    http: Option<reqwest::Client>,
    book_feed: Option<BookFeed>,
    user_stream: Option<ReconnectingStream>,
}

impl PolymarketSession {
    /// Create a session for an account
    pub fn new(credentials: Credentials, address: impl Into<String>) -> Self {
        let clob_host = credentials
            .endpoint
            .clone()
            .unwrap_or_else(|| CLOB_HOST.to_string());
        Self {
            credentials,
            address: address.into(),
            clob_host,
            data_api: DATA_API.to_string(),
            market_ws_url: MARKET_WS_URL.to_string(),
            user_ws_url: USER_WS_URL.to_string(),
            initial_backoff: Duration::from_secs(1),
            backoff_multiplier: 2,
            max_backoff: Duration::from_secs(30),
            http: None,
            book_feed: None,
            user_stream: None,
        }
    }

    /// Create a session limited to public market data
    pub fn public() -> Self {
        Self::new(Credentials::anonymous(), "")
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

    fn stream_config(&self, url: &str, name: &str) -> StreamConfig {
        StreamConfig::new(url)
            .name(name)
            .initial_backoff(self.initial_backoff)
            .backoff_multiplier(self.backoff_multiplier)
            .max_backoff(self.max_backoff)
    }

    fn signed(
        &self,
        request: reqwest::RequestBuilder,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<reqwest::RequestBuilder, ExchangeError> {
        let timestamp = Utc::now().timestamp();
        let signature = rest_signature(&self.credentials.secret, timestamp, method, path, body)?;
        Ok(request
            .header("POLY_API_KEY", &self.credentials.api_key_id)
            .header("POLY_SIGNATURE", signature)
            .header("POLY_TIMESTAMP", timestamp.to_string())
            .header(
                "POLY_PASSPHRASE",
                self.credentials.passphrase.as_deref().unwrap_or(""),
            ))
    }

    async fn post_order(&self, body: serde_json::Value, instrument_id: &str, side: Side, price: Decimal, size: Decimal) -> Result<Order, ExchangeError> {
        let path = "/order";
        let url = format!("{}{}", self.clob_host, path);
        let body_text = body.to_string();

        let request = self.http()?.post(&url).json(&body);
        let response = self.signed(request, "POST", path, &body_text)?.send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ExchangeError::Venue {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: OrderResponse = serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Decode(format!("order response: {e}")))?;

        if !parsed.success || parsed.order_id.is_none() {
            return Err(ExchangeError::OrderRejected {
                reason: parsed
                    .error_msg
                    .unwrap_or_else(|| "venue did not return an order id".to_string()),
            });
        }

        let order_id = parsed.order_id.unwrap_or_default();
        telemetry::record_order_placed("polymarket");
        tracing::info!(
            venue = "polymarket",
            %order_id,
            instrument = %instrument_id,
            %side,
            %price,
            %size,
            "order placed"
        );

        Ok(Order {
            order_id,
            instrument_id: instrument_id.to_string(),
            side,
            price,
            size,
            status: OrderStatus::Open,
            filled_size: Decimal::ZERO,
        })
    }
}

#[async_trait]
impl ExchangeSession for PolymarketSession {
    fn venue(&self) -> &'static str {
        "polymarket"
    }

    async fn connect(&mut self) -> Result<(), ExchangeError> {
        if self.http.is_some() {
            return Ok(());
        }
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        self.http = Some(client);
        tracing::info!(venue = "polymarket", "session connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ExchangeError> {
        if let Some(feed) = self.book_feed.take() {
            feed.stream.stop();
            feed.stream.join().await;
        }
        if let Some(stream) = self.user_stream.take() {
            stream.stop();
            stream.join().await;
        }
        if self.http.take().is_some() {
            tracing::info!(venue = "polymarket", "session disconnected");
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

        let body = serde_json::json!({
            "tokenID": instrument_id,
            "price": price.to_string(),
            "size": size.to_string(),
            "side": side.to_string(),
            "orderType": "GTC",
        });
        self.post_order(body, instrument_id, side, price, size).await
    }

    async fn place_market_order(
        &self,
        instrument_id: &str,
        side: Side,
        size: Decimal,
    ) -> Result<Order, ExchangeError> {
        // Fill-and-kill: takes whatever is on the book, no resting remainder
        let body = serde_json::json!({
            "tokenID": instrument_id,
            "amount": size.to_string(),
            "side": side.to_string(),
            "orderType": "FAK",
        });
        self.post_order(body, instrument_id, side, Decimal::ZERO, size)
            .await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError> {
        let path = "/order";
        let url = format!("{}{}", self.clob_host, path);
        let body = serde_json::json!({ "orderID": order_id });
        let body_text = body.to_string();

        let request = self.http()?.delete(&url).json(&body);
        let response = self
            .signed(request, "DELETE", path, &body_text)?
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if status.as_u16() == 404 {
            return Err(ExchangeError::InvalidOrder(order_id.to_string()));
        }
        if !status.is_success() {
            return Err(ExchangeError::Venue {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: CancelResponse = serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Decode(format!("cancel response: {e}")))?;
        if !parsed.canceled.iter().any(|id| id == order_id) {
            return Err(ExchangeError::InvalidOrder(order_id.to_string()));
        }

        tracing::info!(venue = "polymarket", %order_id, "order cancelled");
        Ok(())
    }

    async fn get_order_status(&self, order_id: &str) -> Result<OrderState, ExchangeError> {
        let path = format!("/data/order/{order_id}");
        let url = format!("{}{}", self.clob_host, path);

        let request = self.http()?.get(&url);
        let response = self.signed(request, "GET", &path, "")?.send().await?;

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

        let raw: RawOrder = serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Decode(format!("order status: {e}")))?;
        Ok(raw.into_state())
    }

    async fn get_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        let url = format!("{}/positions", self.data_api);
        let response = self
            .http()?
            .get(&url)
            .query(&[("user", self.address.as_str()), ("limit", "500")])
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ExchangeError::Venue {
                status: status.as_u16(),
                body: text,
            });
        }

        let raw: Vec<RawPosition> = serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Decode(format!("positions: {e}")))?;

        Ok(raw
            .into_iter()
            .filter(|p| p.size > Decimal::ZERO)
            .map(RawPosition::into_position)
            .collect())
    }

    async fn get_balance(&self) -> Result<Decimal, ExchangeError> {
        let url = format!("{}/balance", self.data_api);
        let response = self
            .http()?
            .get(&url)
            .query(&[("user", self.address.as_str())])
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ExchangeError::Venue {
                status: status.as_u16(),
                body: text,
            });
        }

        parse_balance(&text).ok_or_else(|| ExchangeError::Decode(format!("balance: {text}")))
    }

    async fn get_trade_history(&self, limit: usize) -> Result<Vec<Trade>, ExchangeError> {
        let url = format!("{}/trades", self.data_api);
        let limit_text = limit.to_string();
        let response = self
            .http()?
            .get(&url)
            .query(&[
                ("user", self.address.as_str()),
                ("limit", limit_text.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ExchangeError::Venue {
                status: status.as_u16(),
                body: text,
            });
        }

        let raw: Vec<RawTrade> = serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Decode(format!("trades: {e}")))?;

        let mut trades: Vec<Trade> = raw.into_iter().map(RawTrade::into_trade).collect();
        trades.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        trades.truncate(limit);
        Ok(trades)
    }

    async fn subscribe_orderbook(
        &mut self,
        instrument_id: &str,
    ) -> Result<mpsc::Receiver<BookUpdate>, ExchangeError> {
        if self.book_feed.is_none() {
            let config = self.stream_config(&self.market_ws_url, "polymarket-book");
            let (stream, events) =
                ReconnectingStream::start(config, Arc::new(MarketChannelCodec))?;
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
        // Fail fast on unusable key material instead of inside the serve loop
        ws_signature(&self.credentials.secret, 0, "/ws/user")?;

        let codec = UserChannelCodec {
            api_key: self.credentials.api_key_id.clone(),
            secret: self.credentials.secret.clone(),
            passphrase: self.credentials.passphrase.clone().unwrap_or_default(),
        };
        let config = self.stream_config(&self.user_ws_url, "polymarket-user");
        let (stream, events) = ReconnectingStream::start(config, Arc::new(codec))?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(dispatch_fills(events, tx));
        self.user_stream = Some(stream);
        Ok(rx)
    }
}

/// Route parsed book updates to per-instrument subscribers
async fn dispatch_books(
    mut events: mpsc::Receiver<StreamEvent>,
    routes: Arc<Mutex<HashMap<String, mpsc::Sender<BookUpdate>>>>,
) {
    let mut cache: HashMap<String, BookUpdate> = HashMap::new();

    while let Some(event) = events.recv().await {
        let text = match event {
            StreamEvent::Message(text) => text,
            StreamEvent::State(state) => {
                tracing::debug!(venue = "polymarket", state = ?state, "book feed state");
                continue;
            }
            StreamEvent::ProtocolError(_) => continue,
        };

        for update in parse_market_message(&text, &mut cache) {
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

/// Forward confirmed fills from the user channel
async fn dispatch_fills(mut events: mpsc::Receiver<StreamEvent>, tx: mpsc::Sender<FillEvent>) {
    while let Some(event) = events.recv().await {
        let text = match event {
            StreamEvent::Message(text) => text,
            _ => continue,
        };
        if let Some(fill) = parse_fill_message(&text) {
            telemetry::record_fill("polymarket");
            if tx.send(fill).await.is_err() {
                break;
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "orderID")]
    order_id: Option<String>,
    #[serde(rename = "errorMsg")]
    error_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CancelResponse {
    #[serde(default)]
    canceled: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawOrder {
    #[serde(default)]
    status: String,
    #[serde(default)]
    size_matched: String,
}

impl RawOrder {
    fn into_state(self) -> OrderState {
        let filled_size = Decimal::from_str(&self.size_matched).unwrap_or(Decimal::ZERO);
        let status = match self.status.to_lowercase().as_str() {
            "live" | "open" => {
                if filled_size > Decimal::ZERO {
                    OrderStatus::PartiallyFilled
                } else {
                    OrderStatus::Open
                }
            }
            "matched" | "filled" => OrderStatus::Filled,
            "canceled" | "cancelled" => OrderStatus::Cancelled,
            "rejected" => OrderStatus::Rejected,
            _ => OrderStatus::Open,
        };
        OrderState {
            status,
            filled_size,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    #[serde(default)]
    asset: String,
    #[serde(rename = "conditionId", default)]
    condition_id: String,
    #[serde(default)]
    size: Decimal,
    #[serde(rename = "avgPrice", default)]
    avg_price: Decimal,
    #[serde(default)]
    outcome: String,
}

impl RawPosition {
    fn into_position(self) -> Position {
        // UP maps to the yes side of the binary market
        let outcome = match self.outcome.to_lowercase().as_str() {
            "down" | "no" => Outcome::No,
            _ => Outcome::Yes,
        };
        Position {
            instrument_id: self.asset,
            market_id: self.condition_id,
            outcome,
            size: self.size,
            avg_price: self.avg_price,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTrade {
    #[serde(default)]
    id: String,
    #[serde(default)]
    asset: String,
    #[serde(rename = "conditionId", default)]
    condition_id: String,
    #[serde(default)]
    side: String,
    #[serde(default)]
    price: Decimal,
    #[serde(default)]
    size: Decimal,
    #[serde(default)]
    timestamp: serde_json::Value,
}

impl RawTrade {
    fn into_trade(self) -> Trade {
        Trade {
            trade_id: self.id,
            instrument_id: self.asset,
            market_id: self.condition_id,
            side: if self.side.eq_ignore_ascii_case("sell") {
                Side::Sell
            } else {
                Side::Buy
            },
            price: self.price,
            size: self.size,
            timestamp: parse_timestamp(&self.timestamp),
        }
    }
}

fn parse_timestamp(value: &serde_json::Value) -> DateTime<Utc> {
    if let Some(secs) = value.as_i64() {
        if let Some(ts) = Utc.timestamp_opt(secs, 0).single() {
            return ts;
        }
    }
    if let Some(text) = value.as_str() {
        if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
            return ts.with_timezone(&Utc);
        }
        if let Ok(secs) = text.parse::<i64>() {
            if let Some(ts) = Utc.timestamp_opt(secs, 0).single() {
                return ts;
            }
        }
    }
    Utc::now()
}

fn parse_balance(text: &str) -> Option<Decimal> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    match &value {
        serde_json::Value::Object(map) => match map.get("balance")? {
            serde_json::Value::String(s) => Decimal::from_str(s).ok(),
            serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            _ => None,
        },
        serde_json::Value::String(s) => Decimal::from_str(s).ok(),
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

/// Parse one market-channel frame into zero or more book updates
///
/// Snapshots (`book` events) replace the cached book; `price_change` events
/// merge into it so subscribers always see a coherent ladder.
fn parse_market_message(text: &str, cache: &mut HashMap<String, BookUpdate>) -> Vec<BookUpdate> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    let events: Vec<&serde_json::Value> = match &value {
        serde_json::Value::Array(items) => items.iter().collect(),
        _ => vec![&value],
    };

    let mut updates = Vec::new();
    for event in events {
        match event.get("event_type").and_then(|v| v.as_str()) {
            Some("book") => {
                if let Some(update) = parse_book_event(event) {
                    cache.insert(update.instrument_id.clone(), update.clone());
                    updates.push(update);
                }
            }
            Some("price_change") => {
                updates.extend(apply_price_changes(event, cache));
            }
            _ => {}
        }
    }
    updates
}

#[derive(Debug, Deserialize)]
struct RawBookLevel {
    price: String,
    size: String,
}

fn parse_levels(value: Option<&serde_json::Value>) -> Vec<PriceLevel> {
    let raw: Vec<RawBookLevel> = value
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    raw.iter()
        .filter_map(|l| {
            Some(PriceLevel {
                price: Decimal::from_str(&l.price).ok()?,
                size: Decimal::from_str(&l.size).ok()?,
            })
        })
        .collect()
}

fn parse_book_event(event: &serde_json::Value) -> Option<BookUpdate> {
    let asset_id = event.get("asset_id")?.as_str()?.to_string();

    let mut bids = parse_levels(event.get("bids"));
    let mut asks = parse_levels(event.get("asks"));
    bids.sort_by(|a, b| b.price.cmp(&a.price));
    asks.sort_by(|a, b| a.price.cmp(&b.price));

    let timestamp = event
        .get("timestamp")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
        .unwrap_or_else(Utc::now);

    Some(BookUpdate {
        instrument_id: asset_id,
        bids,
        asks,
        timestamp,
    })
}

#[derive(Debug, Deserialize)]
struct RawPriceChange {
    asset_id: String,
    price: String,
    size: String,
    side: String,
}

fn apply_price_changes(
    event: &serde_json::Value,
    cache: &mut HashMap<String, BookUpdate>,
) -> Vec<BookUpdate> {
    let changes: Vec<RawPriceChange> = event
        .get("price_changes")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    let mut touched: Vec<String> = Vec::new();
    for change in changes {
        let (price, size) = match (
            Decimal::from_str(&change.price),
            Decimal::from_str(&change.size),
        ) {
            (Ok(p), Ok(s)) => (p, s),
            _ => continue,
        };

        let book = cache
            .entry(change.asset_id.clone())
            .or_insert_with(|| BookUpdate {
                instrument_id: change.asset_id.clone(),
                bids: Vec::new(),
                asks: Vec::new(),
                timestamp: Utc::now(),
            });

        let levels = if change.side.eq_ignore_ascii_case("buy") {
            &mut book.bids
        } else {
            &mut book.asks
        };

        match levels.iter().position(|l| l.price == price) {
            Some(idx) if size.is_zero() => {
                levels.remove(idx);
            }
            Some(idx) => levels[idx].size = size,
            None if !size.is_zero() => levels.push(PriceLevel { price, size }),
            None => {}
        }

        book.bids.sort_by(|a, b| b.price.cmp(&a.price));
        book.asks.sort_by(|a, b| a.price.cmp(&b.price));
        book.timestamp = Utc::now();

        if !touched.contains(&change.asset_id) {
            touched.push(change.asset_id.clone());
        }
    }

    touched
        .into_iter()
        .filter_map(|id| cache.get(&id).cloned())
        .collect()
}

/// Parse a user-channel frame into a fill, if it is a confirmed trade
fn parse_fill_message(text: &str) -> Option<FillEvent> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let event = match &value {
        serde_json::Value::Array(items) => items.first()?,
        _ => &value,
    };

    if event.get("event_type")?.as_str()? != "trade" {
        return None;
    }
    let status = event.get("status")?.as_str()?.to_uppercase();
    if !matches!(status.as_str(), "MATCHED" | "MINED" | "CONFIRMED") {
        return None;
    }

    let price = Decimal::from_str(event.get("price")?.as_str()?).ok()?;
    let size = Decimal::from_str(event.get("size")?.as_str()?).ok()?;
    let side = if event
        .get("side")
        .and_then(|v| v.as_str())
        .map(|s| s.eq_ignore_ascii_case("sell"))
        .unwrap_or(false)
    {
        Side::Sell
    } else {
        Side::Buy
    };

    Some(FillEvent {
        order_id: event
            .get("taker_order_id")
            .or_else(|| event.get("order_id"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        instrument_id: event
            .get("asset_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        side,
        price,
        size,
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_market_subscription_codec() {
        let codec = MarketChannelCodec;
        let msg = codec
            .subscribe(&["tok1".to_string(), "tok2".to_string()])
            .unwrap();
        assert!(msg.contains("\"assets_ids\""));
        assert!(msg.contains("\"type\":\"market\""));
        assert!(msg.contains("tok1"));

        assert!(codec.unsubscribe(&["tok1".to_string()]).is_none());
    }

    #[test]
    fn test_user_codec_hello_contains_auth() {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine;

        let codec = UserChannelCodec {
            api_key: "key".to_string(),
            secret: BASE64.encode(b"secret"),
            passphrase: "phrase".to_string(),
        };
        let hello = codec.hello().unwrap();
        assert!(hello.contains("\"type\":\"auth\""));
        assert!(hello.contains("\"apiKey\":\"key\""));
        assert!(hello.contains("\"signature\""));
    }

    #[test]
    fn test_parse_book_event_snapshot() {
        let mut cache = HashMap::new();
        let text = r#"{
            "event_type": "book",
            "asset_id": "123",
            "bids": [{"price": "0.49", "size": "200"}, {"price": "0.50", "size": "100"}],
            "asks": [{"price": "0.53", "size": "250"}, {"price": "0.52", "size": "150"}],
            "timestamp": "1704067200000"
        }"#;

        let updates = parse_market_message(text, &mut cache);
        assert_eq!(updates.len(), 1);

        let book = &updates[0];
        assert_eq!(book.instrument_id, "123");
        // Bids sorted best-first (descending), asks ascending
        assert_eq!(book.best_bid(), Some(dec!(0.50)));
        assert_eq!(book.best_ask(), Some(dec!(0.52)));
        assert!(cache.contains_key("123"));
    }

    #[test]
    fn test_price_change_merges_into_cached_book() {
        let mut cache = HashMap::new();
        let snapshot = r#"{
            "event_type": "book",
            "asset_id": "123",
            "bids": [{"price": "0.50", "size": "100"}],
            "asks": [{"price": "0.52", "size": "150"}]
        }"#;
        parse_market_message(snapshot, &mut cache);

        let change = r#"{
            "event_type": "price_change",
            "price_changes": [
                {"asset_id": "123", "price": "0.51", "size": "80", "side": "BUY"},
                {"asset_id": "123", "price": "0.52", "size": "0", "side": "SELL"}
            ]
        }"#;
        let updates = parse_market_message(change, &mut cache);
        assert_eq!(updates.len(), 1);

        let book = &updates[0];
        assert_eq!(book.best_bid(), Some(dec!(0.51)));
        assert_eq!(book.best_ask(), None);
    }

    #[test]
    fn test_parse_event_array() {
        let mut cache = HashMap::new();
        let text = r#"[{
            "event_type": "book",
            "asset_id": "111",
            "bids": [{"price": "0.40", "size": "100"}],
            "asks": [{"price": "0.60", "size": "100"}]
        }]"#;

        let updates = parse_market_message(text, &mut cache);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].instrument_id, "111");
    }

    #[test]
    fn test_parse_market_message_ignores_other_events() {
        let mut cache = HashMap::new();
        let text = r#"{"event_type": "last_trade_price", "asset_id": "1", "price": "0.5"}"#;
        assert!(parse_market_message(text, &mut cache).is_empty());
        assert!(parse_market_message("not json", &mut cache).is_empty());
    }

    #[test]
    fn test_parse_fill_message_confirmed_only() {
        let matched = r#"{
            "event_type": "trade",
            "status": "MATCHED",
            "side": "BUY",
            "price": "0.55",
            "size": "10",
            "asset_id": "tok-1",
            "taker_order_id": "ord-9"
        }"#;
        let fill = parse_fill_message(matched).unwrap();
        assert_eq!(fill.order_id, "ord-9");
        assert_eq!(fill.instrument_id, "tok-1");
        assert_eq!(fill.side, Side::Buy);
        assert_eq!(fill.price, dec!(0.55));
        assert_eq!(fill.size, dec!(10));

        let pending = r#"{"event_type": "trade", "status": "RETRYING", "price": "0.5", "size": "1"}"#;
        assert!(parse_fill_message(pending).is_none());

        let order_event = r#"{"event_type": "order", "status": "MATCHED", "price": "0.5", "size": "1"}"#;
        assert!(parse_fill_message(order_event).is_none());
    }

    #[test]
    fn test_raw_order_into_state() {
        let live = RawOrder {
            status: "LIVE".to_string(),
            size_matched: "0".to_string(),
        };
        assert_eq!(
            live.into_state(),
            OrderState {
                status: OrderStatus::Open,
                filled_size: dec!(0)
            }
        );

        let partial = RawOrder {
            status: "live".to_string(),
            size_matched: "3.5".to_string(),
        }
        .into_state();
        assert_eq!(partial.status, OrderStatus::PartiallyFilled);
        assert_eq!(partial.filled_size, dec!(3.5));

        let matched = RawOrder {
            status: "matched".to_string(),
            size_matched: "10".to_string(),
        };
        assert_eq!(matched.into_state().status, OrderStatus::Filled);
    }

    #[test]
    fn test_parse_balance_shapes() {
        assert_eq!(parse_balance(r#"{"balance": "123.45"}"#), Some(dec!(123.45)));
        assert_eq!(parse_balance(r#"{"balance": 67.8}"#), Some(dec!(67.8)));
        assert_eq!(parse_balance(r#""12.5""#), Some(dec!(12.5)));
        assert_eq!(parse_balance("250"), Some(dec!(250)));
        assert_eq!(parse_balance(r#"{"other": 1}"#), None);
    }

    #[test]
    fn test_raw_position_outcome_mapping() {
        let up = RawPosition {
            asset: "tok".to_string(),
            condition_id: "0xc".to_string(),
            size: dec!(5),
            avg_price: dec!(0.45),
            outcome: "Up".to_string(),
        };
        assert_eq!(up.into_position().outcome, Outcome::Yes);

        let down = RawPosition {
            asset: "tok".to_string(),
            condition_id: "0xc".to_string(),
            size: dec!(5),
            avg_price: dec!(0.45),
            outcome: "Down".to_string(),
        };
        assert_eq!(down.into_position().outcome, Outcome::No);
    }

    #[tokio::test]
    async fn test_operations_require_connect() {
        let session = PolymarketSession::public();
        let result = session.get_balance().await;
        assert!(matches!(result, Err(ExchangeError::NotConnected)));
    }

    #[tokio::test]
    async fn test_place_limit_order_validates_price() {
        let mut session = PolymarketSession::public();
        session.connect().await.unwrap();

        let result = session
            .place_limit_order("tok", Side::Buy, dec!(1.5), dec!(10))
            .await;
        assert!(matches!(
            result,
            Err(ExchangeError::OrderRejected { .. })
        ));

        session.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_unconnected_is_noop() {
        let mut session = PolymarketSession::public();
        assert!(session.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_subscribe_fills_requires_credentials() {
        let mut session = PolymarketSession::public();
        let result = session.subscribe_fills().await;
        assert!(matches!(result, Err(ExchangeError::Credentials(_))));
    }
}
