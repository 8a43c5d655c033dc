//! Bot lifecycle
//!
//! The runtime drives `Created -> Setup -> Running <-> RollingOver ->
//! Stopping -> Stopped`, with strategy behavior supplied through the
//! [`BotHooks`] trait.

mod runtime;

pub use runtime::{BotConfig, BotRuntime, ShutdownHandle};

use async_trait::async_trait;
use thiserror::Error;

/// Lifecycle phase of a bot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotPhase {
    /// Constructed, `run()` not called yet
    Created,
    /// Setup hook in flight
    Setup,
    /// Tick loop active
    Running,
    /// Rollover hook in flight, entered synchronously within a tick
    RollingOver,
    /// Cleanup and resource release in flight
    Stopping,
    /// Terminal; `run()` is not re-enterable
    Stopped,
}

/// Strategy hooks invoked by the runtime
///
/// Hooks take no arguments beyond the strategy's own context. `tick` is the
/// only required method; the rest default to no-ops.
#[async_trait]
pub trait BotHooks: Send {
    /// Open sessions, start feeds. Any error aborts the run before the
    /// first tick.
    async fn setup(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Main loop body, called once per tick interval
    async fn tick(&mut self) -> anyhow::Result<()>;

    /// Called when a window boundary is crossed, instead of that cycle's
    /// tick. Expected to refetch market windows and resubscribe per-window
    /// stream topics.
    async fn on_rollover(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once during shutdown; errors are logged, never re-raised
    async fn cleanup(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Lifecycle errors surfaced by [`BotRuntime::run`]
#[derive(Debug, Error)]
pub enum BotError {
    /// Setup hook failed; the run aborted before any tick
    #[error("setup hook failed: {0}")]
    Setup(anyhow::Error),
    /// A tick or rollover hook failed; the runtime shut down
    #[error("{phase} hook failed: {error}")]
    Hook {
        phase: &'static str,
        error: anyhow::Error,
    },
    /// `run()` called on an instance that is not freshly created
    #[error("bot cannot run from phase {0:?}")]
    NotRunnable(BotPhase),
}
