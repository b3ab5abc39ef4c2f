//! Memory ceiling enforcement.

use wasmtime::ResourceLimiter;

/// Denies memory growth past the ceiling and remembers that it did.
///
/// Denial traps the guest; the sandbox then checks
/// [`exhausted`](Self::exhausted) to tell an out-of-memory trap from any
/// other.
#[derive(Debug)]
pub(crate) struct MemoryLimiter {
    max_bytes: usize,
    peak_bytes: usize,
    exhausted: bool,
}

impl MemoryLimiter {
    pub(crate) fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            peak_bytes: 0,
            exhausted: false,
        }
    }

    pub(crate) fn exhausted(&self) -> bool {
        self.exhausted
    }

    pub(crate) fn peak_bytes(&self) -> usize {
        self.peak_bytes
    }
}

impl ResourceLimiter for MemoryLimiter {
    fn memory_growing(
        &mut self,
        current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        if desired > self.max_bytes {
            self.exhausted = true;
            tracing::debug!(current, desired, max = self.max_bytes, "memory growth denied");
            anyhow::bail!("memory limit of {} bytes exceeded", self.max_bytes);
        }
        self.peak_bytes = self.peak_bytes.max(desired);
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        Ok(desired <= 100_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_past_ceiling_sets_flag() {
        let mut limiter = MemoryLimiter::new(1024);
        assert!(limiter.memory_growing(0, 512, None).unwrap());
        assert!(!limiter.exhausted());
        assert!(limiter.memory_growing(512, 2048, None).is_err());
        assert!(limiter.exhausted());
        assert_eq!(limiter.peak_bytes(), 512);
    }
}
