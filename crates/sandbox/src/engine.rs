//! Shared wasmtime engine and its epoch ticker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use wasmtime::{Config, Engine};

use crate::error::SandboxError;

/// Default interval between epoch ticks.
pub const DEFAULT_EPOCH_TICK: Duration = Duration::from_millis(10);

/// A wasmtime engine configured for async calls with epoch interruption.
///
/// A background thread bumps the epoch every tick; running guests yield to
/// the async runtime at each tick, which is what lets deadlines fire.
pub struct SandboxEngine {
    engine: Engine,
    tick: Duration,
    stop: Arc<AtomicBool>,
    ticker: Option<JoinHandle<()>>,
}

impl SandboxEngine {
    /// Engine with the default tick.
    pub fn new() -> Result<Arc<Self>, SandboxError> {
        Self::with_tick(DEFAULT_EPOCH_TICK)
    }

    /// Engine with a custom tick.
    pub fn with_tick(tick: Duration) -> Result<Arc<Self>, SandboxError> {
        let mut config = Config::new();
        config.async_support(true);
        config.epoch_interruption(true);

        let engine = Engine::new(&config).map_err(|e| SandboxError::Engine(e.to_string()))?;
        let stop = Arc::new(AtomicBool::new(false));

        let ticker = {
            let engine = engine.clone();
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("rotor-epoch".to_owned())
                .spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        std::thread::sleep(tick);
                        engine.increment_epoch();
                    }
                })
                .map_err(|e| SandboxError::Engine(format!("cannot start epoch ticker: {e}")))?
        };

        tracing::debug!(tick_ms = tick.as_millis() as u64, "sandbox engine started");
        Ok(Arc::new(Self {
            engine,
            tick,
            stop,
            ticker: Some(ticker),
        }))
    }

    /// The wasmtime engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Epoch tick interval.
    pub fn tick(&self) -> Duration {
        self.tick
    }
}

impl std::fmt::Debug for SandboxEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxEngine")
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}

impl Drop for SandboxEngine {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.ticker.take() {
            let _ = handle.join();
        }
    }
}
