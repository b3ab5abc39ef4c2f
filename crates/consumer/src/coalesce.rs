//! Per-key rate-limited coalescing.
//!
//! The first [`Coalescer::schedule`] for a key runs the task at once and
//! opens a window. Any further schedules inside the window collapse into a
//! single follow-up run when the window closes, which opens the next window.
//! A window that closes with nothing pending releases the key.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;

use crate::config::ConsumerConfig;

/// What [`Coalescer::schedule`] did with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    /// No window was open; the task started now.
    Immediate,
    /// A window is open; the task will run once it closes.
    Deferred,
    /// A follow-up run is already pending; nothing new was scheduled.
    AlreadyPending,
}

/// Collapses bursts of work for the same key.
#[derive(Debug, Clone)]
pub struct Coalescer {
    window: Duration,
    // key -> follow-up requested in the current window
    windows: Arc<DashMap<String, bool>>,
    tracker: TaskTracker,
}

impl Coalescer {
    /// Coalescer with the given window length.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            windows: Arc::new(DashMap::new()),
            tracker: TaskTracker::new(),
        }
    }

    /// Coalescer using [`ConsumerConfig::coalesce_window`].
    pub fn from_config(config: &ConsumerConfig) -> Self {
        Self::new(config.coalesce_window)
    }

    /// Window length.
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Keys with an open window.
    pub fn open_windows(&self) -> usize {
        self.windows.len()
    }

    /// Schedule `task` for `key`.
    ///
    /// Must be called from within a Tokio runtime. `task` is called once per
    /// run, so it must be able to produce a fresh future each time.
    pub fn schedule<F, Fut>(&self, key: impl Into<String>, task: F) -> Scheduled
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        match self.windows.entry(key.clone()) {
            Entry::Occupied(mut open) => {
                let pending = open.get_mut();
                if *pending {
                    Scheduled::AlreadyPending
                } else {
                    *pending = true;
                    tracing::trace!(key = %key, "coalesced into follow-up run");
                    Scheduled::Deferred
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(false);
                let windows = Arc::clone(&self.windows);
                let window = self.window;
                self.tracker.spawn(drive(windows, key, window, task));
                Scheduled::Immediate
            }
        }
    }

    /// Wait for every open window to close.
    pub async fn close(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

async fn drive<F, Fut>(windows: Arc<DashMap<String, bool>>, key: String, window: Duration, task: F)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let task = Arc::new(task);
    loop {
        let closes_at = Instant::now() + window;
        // A panicking run still counts as a run; the window must close.
        let run = Arc::clone(&task);
        if let Err(e) = tokio::spawn(async move { run().await }).await {
            tracing::error!(key = %key, error = %e, "coalesced task failed");
        }
        tokio::time::sleep_until(closes_at).await;

        match windows.entry(key.clone()) {
            Entry::Occupied(mut open) if *open.get() => {
                *open.get_mut() = false;
            }
            Entry::Occupied(open) => {
                open.remove();
                break;
            }
            Entry::Vacant(_) => break,
        }
    }
    tracing::trace!(key = %key, "coalescing window released");
}
