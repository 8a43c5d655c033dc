//! Bot runtime state machine

use super::{BotError, BotHooks, BotPhase};
use crate::clock::{MarketClock, Window};
use crate::exchange::ExchangeSession;
use crate::telemetry;
use crate::ws::ReconnectingStream;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Interval between tick-hook invocations
    pub tick_interval: Duration,
    /// Assets whose window boundaries the runtime tracks
    pub assets: Vec<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            assets: Vec::new(),
        }
    }
}

/// Cloneable handle that requests a graceful shutdown
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Request shutdown; idempotent
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// Drives the bot lifecycle: setup, sequential ticking, rollover on window
/// boundaries, graceful shutdown
///
/// The runtime is the only writer of the bot phase. Ticks never overlap: a
/// slow hook delays the next tick rather than running concurrently with it.
/// Streams and sessions registered with the runtime are closed on every exit
/// path, including hook failures.
pub struct BotRuntime<H: BotHooks> {
    config: BotConfig,
    clock: MarketClock,
    hooks: H,
    phase: BotPhase,
    phase_tx: watch::Sender<BotPhase>,
    windows: HashMap<String, Window>,
    last_tick_at: Option<DateTime<Utc>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    sessions: Vec<Box<dyn ExchangeSession>>,
    streams: Vec<ReconnectingStream>,
}

impl<H: BotHooks> BotRuntime<H> {
    /// Create a runtime; `clock` supplies window length and rollover guard
    pub fn new(config: BotConfig, clock: MarketClock, hooks: H) -> Self {
        let (phase_tx, _) = watch::channel(BotPhase::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            clock,
            hooks,
            phase: BotPhase::Created,
            phase_tx,
            windows: HashMap::new(),
            last_tick_at: None,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            sessions: Vec::new(),
            streams: Vec::new(),
        }
    }

    /// Handle for requesting shutdown from outside the run loop
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> BotPhase {
        self.phase
    }

    /// Watch channel observing phase transitions
    pub fn phase_watch(&self) -> watch::Receiver<BotPhase> {
        self.phase_tx.subscribe()
    }

    /// Time of the most recent tick
    pub fn last_tick_at(&self) -> Option<DateTime<Utc>> {
        self.last_tick_at
    }

    /// Hand a session to the runtime; it is disconnected at shutdown
    pub fn add_session(&mut self, session: Box<dyn ExchangeSession>) {
        self.sessions.push(session);
    }

    /// Hand a stream to the runtime; it is stopped at shutdown
    pub fn add_stream(&mut self, stream: ReconnectingStream) {
        self.streams.push(stream);
    }

    /// Strategy hooks, for callers that need to reach their own state
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    fn set_phase(&mut self, next: BotPhase) {
        tracing::debug!(from = ?self.phase, to = ?next, "bot phase transition");
        self.phase = next;
        let _ = self.phase_tx.send(next);
    }

    /// Assets whose tracked window has been crossed; tracking advances to
    /// the window containing the current time
    fn crossed_assets(&mut self) -> Vec<String> {
        let mut crossed = Vec::new();
        for (asset, window) in self.windows.iter_mut() {
            if self.clock.has_crossed(window) {
                *window = self.clock.current_window();
                crossed.push(asset.clone());
            }
        }
        crossed
    }

    async fn release_resources(&mut self) {
        for stream in self.streams.drain(..) {
            stream.stop();
            stream.join().await;
        }
        for session in self.sessions.iter_mut() {
            if let Err(e) = session.disconnect().await {
                tracing::warn!(venue = session.venue(), error = %e, "session disconnect failed");
            }
        }
        self.sessions.clear();
    }

    /// Run the bot to completion
    ///
    /// Returns when shutdown is requested or a hook fails. Cleanup always
    /// runs and `Stopped` is always reached; a cleanup error is logged, not
    /// returned.
    pub async fn run(&mut self) -> Result<(), BotError> {
        if self.phase != BotPhase::Created {
            return Err(BotError::NotRunnable(self.phase));
        }

        self.set_phase(BotPhase::Setup);
        tracing::info!(assets = ?self.config.assets, "bot starting");

        if let Err(e) = self.hooks.setup().await {
            tracing::error!(error = %e, "setup hook failed, aborting run");
            self.release_resources().await;
            self.set_phase(BotPhase::Stopped);
            return Err(BotError::Setup(e));
        }

        for asset in self.config.assets.clone() {
            self.windows.insert(asset, self.clock.current_window());
        }

        self.set_phase(BotPhase::Running);
        tracing::info!("bot running");

        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            if *self.shutdown_rx.borrow() {
                break Ok(());
            }

            let shutdown = tokio::select! {
                _ = interval.tick() => false,
                _ = self.shutdown_rx.changed() => true,
            };
            if shutdown {
                break Ok(());
            }

            self.last_tick_at = Some(self.clock.now());
            telemetry::record_tick();

            let crossed = self.crossed_assets();
            if !crossed.is_empty() {
                self.set_phase(BotPhase::RollingOver);
                tracing::info!(assets = ?crossed, "window boundary crossed, rolling over");
                telemetry::record_rollover();
                if let Err(error) = self.hooks.on_rollover().await {
                    tracing::error!(error = %error, "rollover hook failed");
                    break Err(BotError::Hook {
                        phase: "rollover",
                        error,
                    });
                }
                self.set_phase(BotPhase::Running);
            } else if let Err(error) = self.hooks.tick().await {
                tracing::error!(error = %error, "tick hook failed");
                break Err(BotError::Hook {
                    phase: "tick",
                    error,
                });
            }
        };

        self.set_phase(BotPhase::Stopping);
        tracing::info!("bot stopping");

        if let Err(e) = self.hooks.cleanup().await {
            tracing::error!(error = %e, "cleanup hook failed");
        }
        self.release_resources().await;

        self.set_phase(BotPhase::Stopped);
        tracing::info!("bot stopped");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TimeSource;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    /// Adjustable time source driven by test code
    struct ManualTime(Arc<AtomicI64>);

    impl TimeSource for ManualTime {
        fn now(&self) -> DateTime<Utc> {
            Utc.timestamp_opt(self.0.load(Ordering::SeqCst), 0)
                .single()
                .unwrap()
        }
    }

    fn manual_clock(start_secs: i64) -> (MarketClock, Arc<AtomicI64>) {
        let time = Arc::new(AtomicI64::new(start_secs));
        let clock = MarketClock::with_time_source(
            Duration::from_secs(900),
            Duration::from_secs(30),
            Arc::new(ManualTime(Arc::clone(&time))),
        );
        (clock, time)
    }

    fn config(assets: &[&str]) -> BotConfig {
        BotConfig {
            tick_interval: Duration::from_millis(10),
            assets: assets.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[derive(Default)]
    struct Counters {
        setups: AtomicUsize,
        ticks: AtomicUsize,
        rollovers: AtomicUsize,
        cleanups: AtomicUsize,
    }

    struct FailingSetupHooks {
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl BotHooks for FailingSetupHooks {
        async fn setup(&mut self) -> anyhow::Result<()> {
            self.counters.setups.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("no credentials")
        }

        async fn tick(&mut self) -> anyhow::Result<()> {
            self.counters.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_setup_failure_stops_before_any_tick() {
        let counters = Arc::new(Counters::default());
        let (clock, _) = manual_clock(905);
        let mut runtime = BotRuntime::new(
            config(&["BTC"]),
            clock,
            FailingSetupHooks {
                counters: Arc::clone(&counters),
            },
        );

        let result = runtime.run().await;
        assert!(matches!(result, Err(BotError::Setup(_))));
        assert_eq!(runtime.phase(), BotPhase::Stopped);
        assert_eq!(counters.setups.load(Ordering::SeqCst), 1);
        assert_eq!(counters.ticks.load(Ordering::SeqCst), 0);
    }

    struct CountingHooks {
        counters: Arc<Counters>,
        stop_after: usize,
        shutdown: Option<ShutdownHandle>,
    }

    #[async_trait]
    impl BotHooks for CountingHooks {
        async fn tick(&mut self) -> anyhow::Result<()> {
            let ticks = self.counters.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            if ticks >= self.stop_after {
                if let Some(handle) = &self.shutdown {
                    handle.shutdown();
                }
            }
            Ok(())
        }

        async fn cleanup(&mut self) -> anyhow::Result<()> {
            self.counters.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_shutdown_reaches_stopped_after_cleanup() {
        let counters = Arc::new(Counters::default());
        let (clock, _) = manual_clock(905);
        let mut runtime = BotRuntime::new(
            config(&["BTC"]),
            clock,
            CountingHooks {
                counters: Arc::clone(&counters),
                stop_after: 3,
                shutdown: None,
            },
        );
        let handle = runtime.shutdown_handle();
        runtime.hooks.shutdown = Some(handle);

        let result = runtime.run().await;
        assert!(result.is_ok());
        assert_eq!(runtime.phase(), BotPhase::Stopped);
        assert!(counters.ticks.load(Ordering::SeqCst) >= 3);
        assert_eq!(counters.cleanups.load(Ordering::SeqCst), 1);
        assert!(runtime.last_tick_at().is_some());

        // Terminal: run() is not re-enterable
        let again = runtime.run().await;
        assert!(matches!(again, Err(BotError::NotRunnable(BotPhase::Stopped))));
    }

    struct RolloverHooks {
        counters: Arc<Counters>,
        time: Arc<AtomicI64>,
        shutdown: Option<ShutdownHandle>,
    }

    #[async_trait]
    impl BotHooks for RolloverHooks {
        async fn tick(&mut self) -> anyhow::Result<()> {
            let ticks = self.counters.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            if ticks == 3 {
                // Cross the 1800s boundary; the next cycle must roll over
                self.time.store(1801, Ordering::SeqCst);
            }
            if ticks >= 6 {
                if let Some(handle) = &self.shutdown {
                    handle.shutdown();
                }
            }
            Ok(())
        }

        async fn on_rollover(&mut self) -> anyhow::Result<()> {
            self.counters.rollovers.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_boundary_crossing_triggers_exactly_one_rollover() {
        let counters = Arc::new(Counters::default());
        let (clock, time) = manual_clock(905);
        let mut runtime = BotRuntime::new(
            config(&["BTC"]),
            clock,
            RolloverHooks {
                counters: Arc::clone(&counters),
                time,
                shutdown: None,
            },
        );
        let handle = runtime.shutdown_handle();
        runtime.hooks.shutdown = Some(handle);

        let result = runtime.run().await;
        assert!(result.is_ok());
        assert_eq!(runtime.phase(), BotPhase::Stopped);
        // One crossing, one rollover, and ticks resumed afterwards
        assert_eq!(counters.rollovers.load(Ordering::SeqCst), 1);
        assert!(counters.ticks.load(Ordering::SeqCst) >= 6);
    }

    struct FailingTickHooks {
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl BotHooks for FailingTickHooks {
        async fn tick(&mut self) -> anyhow::Result<()> {
            self.counters.ticks.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("strategy state corrupted")
        }

        async fn cleanup(&mut self) -> anyhow::Result<()> {
            self.counters.cleanups.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("cleanup also failed")
        }
    }

    #[tokio::test]
    async fn test_tick_failure_shuts_down_and_cleanup_error_is_swallowed() {
        let counters = Arc::new(Counters::default());
        let (clock, _) = manual_clock(905);
        let mut runtime = BotRuntime::new(
            config(&["BTC"]),
            clock,
            FailingTickHooks {
                counters: Arc::clone(&counters),
            },
        );

        let result = runtime.run().await;
        match result {
            Err(BotError::Hook { phase, .. }) => assert_eq!(phase, "tick"),
            other => panic!("expected hook failure, got {other:?}"),
        }
        // Cleanup ran and its error did not block reaching Stopped
        assert_eq!(runtime.phase(), BotPhase::Stopped);
        assert_eq!(counters.cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(counters.ticks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_phase_watch_observes_transitions() {
        let counters = Arc::new(Counters::default());
        let (clock, _) = manual_clock(905);
        let mut runtime = BotRuntime::new(
            config(&[]),
            clock,
            FailingTickHooks {
                counters: Arc::clone(&counters),
            },
        );
        let phases = runtime.phase_watch();
        assert_eq!(*phases.borrow(), BotPhase::Created);

        let _ = runtime.run().await;
        assert_eq!(*phases.borrow(), BotPhase::Stopped);
    }
}
