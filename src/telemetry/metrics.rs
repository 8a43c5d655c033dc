//! Prometheus metrics

/// Count a successful stream connect
pub fn record_stream_connected(stream: &str) {
    metrics::counter!("pmkit_stream_connects_total", "stream" => stream.to_string()).increment(1);
}

/// Count a reconnect attempt
pub fn record_stream_reconnect(stream: &str) {
    metrics::counter!("pmkit_stream_reconnects_total", "stream" => stream.to_string()).increment(1);
}

/// Count a runtime tick
pub fn record_tick() {
    metrics::counter!("pmkit_ticks_total").increment(1);
}

/// Count a window rollover
pub fn record_rollover() {
    metrics::counter!("pmkit_rollovers_total").increment(1);
}

/// Count an accepted order placement
pub fn record_order_placed(venue: &str) {
    metrics::counter!("pmkit_orders_placed_total", "venue" => venue.to_string()).increment(1);
}

/// Count an observed fill
pub fn record_fill(venue: &str) {
    metrics::counter!("pmkit_fills_total", "venue" => venue.to_string()).increment(1);
}
