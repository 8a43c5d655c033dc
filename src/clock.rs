//! Market window clock
//!
//! Pure arithmetic over fixed-length trading windows plus boundary-crossing
//! detection. Time is injected through [`TimeSource`] so the runtime and
//! tests share one seam.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Source of the current time
pub trait TimeSource: Send + Sync {
    /// Current UTC time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time source used in production
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// One fixed-length trading window, aligned to epoch multiples of its length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Inclusive start of the window
    pub start: DateTime<Utc>,
    /// Exclusive end of the window
    pub end: DateTime<Utc>,
}

impl Window {
    /// Window length
    pub fn length(&self) -> Duration {
        (self.end - self.start).to_std().unwrap_or(Duration::ZERO)
    }
}

fn timestamp(secs: i64, fallback: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or(fallback)
}

/// Window containing `ts`: `start = floor(ts / length) * length`
pub fn window_for(ts: DateTime<Utc>, length: Duration) -> Window {
    let len = length.as_secs().max(1) as i64;
    let start = ts.timestamp().div_euclid(len) * len;
    Window {
        start: timestamp(start, ts),
        end: timestamp(start + len, ts),
    }
}

/// True iff `ts` has reached or passed the end of `window`
pub fn has_crossed(window: &Window, ts: DateTime<Utc>) -> bool {
    ts >= window.end
}

/// Time left in `window` at `ts`, clamped at zero
pub fn seconds_remaining(window: &Window, ts: DateTime<Utc>) -> Duration {
    (window.end - ts).to_std().unwrap_or(Duration::ZERO)
}

/// Which window a market finder should target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSelection {
    /// The window containing the current time
    Current,
    /// The window after the current one
    Next,
}

/// Clock for one window length with a rollover guard threshold
///
/// The guard implements the smart-selection policy: once remaining time in
/// the current window drops below it, selection flips to the next window so
/// strategies stop entering positions seconds before forced rollover.
#[derive(Clone)]
pub struct MarketClock {
    length: Duration,
    guard: Duration,
    time: Arc<dyn TimeSource>,
}

impl MarketClock {
    /// Create a clock over wall-clock time
    pub fn new(length: Duration, guard: Duration) -> Self {
        Self::with_time_source(length, guard, Arc::new(SystemTimeSource))
    }

    /// Create a clock over an injected time source
    pub fn with_time_source(length: Duration, guard: Duration, time: Arc<dyn TimeSource>) -> Self {
        Self {
            length,
            guard,
            time,
        }
    }

    /// Current time from the underlying source
    pub fn now(&self) -> DateTime<Utc> {
        self.time.now()
    }

    /// Configured window length
    pub fn length(&self) -> Duration {
        self.length
    }

    /// Configured rollover guard threshold
    pub fn guard(&self) -> Duration {
        self.guard
    }

    /// Window containing the current time
    pub fn current_window(&self) -> Window {
        window_for(self.now(), self.length)
    }

    /// Window after the current one
    pub fn next_window(&self) -> Window {
        window_for(self.current_window().end, self.length)
    }

    /// True iff the current time has passed the end of `window`
    pub fn has_crossed(&self, window: &Window) -> bool {
        has_crossed(window, self.now())
    }

    /// Time left in `window`, clamped at zero
    pub fn seconds_remaining(&self, window: &Window) -> Duration {
        seconds_remaining(window, self.now())
    }

    /// Guard-aware choice between the current and next window
    pub fn selection(&self) -> WindowSelection {
        if self.seconds_remaining(&self.current_window()) < self.guard {
            WindowSelection::Next
        } else {
            WindowSelection::Current
        }
    }

    /// The window picked by [`selection`](Self::selection)
    pub fn select_window(&self) -> Window {
        match self.selection() {
            WindowSelection::Current => self.current_window(),
            WindowSelection::Next => self.next_window(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    /// Fixed time source for deterministic clock tests
    struct FixedTime(i64);

    impl TimeSource for FixedTime {
        fn now(&self) -> DateTime<Utc> {
            ts(self.0)
        }
    }

    #[test]
    fn test_window_contains_timestamp() {
        // start <= t < end and end - start == L, across lengths and times
        for len_secs in [1u64, 60, 900, 3600] {
            let length = Duration::from_secs(len_secs);
            for t in [0i64, 1, 899, 900, 905, 1800, 86_399, 1_700_000_123] {
                let w = window_for(ts(t), length);
                assert!(w.start <= ts(t), "start > t for t={t} len={len_secs}");
                assert!(ts(t) < w.end, "t >= end for t={t} len={len_secs}");
                assert_eq!(w.length(), length);
            }
        }
    }

    #[test]
    fn test_window_scenario_900s() {
        // 15-minute windows: t=905 lands in [900, 1800)
        let length = Duration::from_secs(900);
        let w = window_for(ts(905), length);
        assert_eq!(w.start, ts(900));
        assert_eq!(w.end, ts(1800));

        assert_eq!(seconds_remaining(&w, ts(905)), Duration::from_secs(895));
        assert!(!has_crossed(&w, ts(905)));
        assert!(!has_crossed(&w, ts(1799)));
        assert!(has_crossed(&w, ts(1800)));
        assert!(has_crossed(&w, ts(1801)));
    }

    #[test]
    fn test_different_windows_imply_crossing() {
        let length = Duration::from_secs(900);
        for (t1, t2) in [(0i64, 900i64), (905, 1801), (10, 2700), (899, 900)] {
            let w1 = window_for(ts(t1), length);
            let w2 = window_for(ts(t2), length);
            assert_ne!(w1, w2);
            assert!(has_crossed(&w1, ts(t2)));
        }
    }

    #[test]
    fn test_seconds_remaining_clamps_at_zero() {
        let w = window_for(ts(905), Duration::from_secs(900));
        assert_eq!(seconds_remaining(&w, ts(5000)), Duration::ZERO);
    }

    #[test]
    fn test_pre_epoch_timestamp_floors_correctly() {
        let w = window_for(ts(-10), Duration::from_secs(900));
        assert_eq!(w.start, ts(-900));
        assert_eq!(w.end, ts(0));
    }

    #[test]
    fn test_clock_selection_respects_guard() {
        let length = Duration::from_secs(900);
        let guard = Duration::from_secs(30);

        // 895s remaining: well clear of the guard
        let clock =
            MarketClock::with_time_source(length, guard, Arc::new(FixedTime(905)));
        assert_eq!(clock.selection(), WindowSelection::Current);
        assert_eq!(clock.select_window(), window_for(ts(905), length));

        // 20s remaining: inside the guard, select the next window
        let clock =
            MarketClock::with_time_source(length, guard, Arc::new(FixedTime(1780)));
        assert_eq!(clock.selection(), WindowSelection::Next);
        let selected = clock.select_window();
        assert_eq!(selected.start, ts(1800));
        assert_eq!(selected.end, ts(2700));
    }

    #[test]
    fn test_next_window_is_adjacent() {
        let clock = MarketClock::with_time_source(
            Duration::from_secs(900),
            Duration::from_secs(30),
            Arc::new(FixedTime(905)),
        );
        let current = clock.current_window();
        let next = clock.next_window();
        assert_eq!(next.start, current.end);
        assert_eq!(next.length(), current.length());
    }
}
