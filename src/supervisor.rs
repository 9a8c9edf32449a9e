//! Task lifecycle and cooperative shutdown.
//!
//! The embedder wires concrete hardware and spawns one task per component in
//! the startup order below; this module supplies the shared shutdown signal
//! and the `run_until_shutdown` helper every long-running task loop is
//! wrapped in, so a single signal cancels all of them at their next
//! suspension point.
//!
//! Startup order: force the LED expander and relay bank to a known safe byte
//! first, then the event bus, then subscriber tasks (gate controllers,
//! collector, AQM policy), then publisher tasks (ADC watcher, AQM reader).
//! Shutdown walks this list in reverse: publishers are cancelled first so no
//! new events arrive mid-teardown, then subscribers run their own cleanup
//! (unconditional relay de-energize, LED release), and finally the bus and
//! drivers are dropped.

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;

/// Shared cooperative-cancellation flag. `M` should be a cross-task mutex
/// kind (`CriticalSectionRawMutex` on a real target).
pub struct Supervisor<M: RawMutex> {
    shutdown: Signal<M, ()>,
}

impl<M: RawMutex> Supervisor<M> {
    pub const fn new() -> Self {
        Self {
            shutdown: Signal::new(),
        }
    }

    /// Request shutdown. Idempotent: signaling an already-signaled flag is a
    /// no-op observed the same way by every waiter.
    pub fn request_shutdown(&self) {
        self.shutdown.signal(());
    }

    /// Run `task` until it completes on its own or a shutdown is requested,
    /// whichever comes first. On shutdown the task future is dropped at its
    /// current suspension point; callers relying on unconditional cleanup
    /// (gate motion, collector outputs) must implement that cleanup inside
    /// the task itself via `Drop`-equivalent finally-blocks or an explicit
    /// `cleanup()` the embedder calls after this returns `Err`.
    pub async fn run_until_shutdown<F, T>(&self, task: F) -> Result<T, ShutdownRequested>
    where
        F: core::future::Future<Output = T>,
    {
        match select(task, self.shutdown.wait()).await {
            Either::First(value) => Ok(value),
            Either::Second(()) => Err(ShutdownRequested),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[error("shutdown requested")]
pub struct ShutdownRequested;
