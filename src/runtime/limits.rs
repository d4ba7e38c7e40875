//! Per-run resource limits for the wasm guest.

use wasmtime::{ResourceLimiter, Store};
use wasmtime_wasi::preview1::WasiP1Ctx;

/// Table growth allowed to the guest, in elements.
const MAX_TABLE_ELEMENTS: usize = 10_000;

/// Which limit the guest ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitViolation {
    /// Linear memory growth was refused.
    Memory {
        /// Bytes the guest asked for.
        requested: usize,
        /// Configured ceiling.
        limit: u64,
    },
    /// Table growth was refused.
    Table {
        /// Elements the guest asked for.
        requested: usize,
    },
}

impl std::fmt::Display for LimitViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitViolation::Memory { requested, limit } => write!(
                f,
                "memory limit exceeded: requested {requested} bytes, limit is {limit} bytes"
            ),
            LimitViolation::Table { requested } => write!(
                f,
                "table limit exceeded: requested {requested} elements, limit is {MAX_TABLE_ELEMENTS}"
            ),
        }
    }
}

/// Resource limiter that enforces memory and table size limits.
#[derive(Debug)]
pub struct GuestLimiter {
    max_memory: u64,
    peak_memory: u64,
    violation: Option<LimitViolation>,
}

impl GuestLimiter {
    /// Create a limiter with the given memory ceiling in bytes.
    pub fn new(max_memory: u64) -> Self {
        Self {
            max_memory,
            peak_memory: 0,
            violation: None,
        }
    }

    /// The first limit the guest hit, if any.
    pub fn violation(&self) -> Option<LimitViolation> {
        self.violation
    }

    /// Highest memory size granted so far.
    pub fn peak_memory(&self) -> u64 {
        self.peak_memory
    }
}

impl ResourceLimiter for GuestLimiter {
    fn memory_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        if desired as u64 > self.max_memory {
            self.violation.get_or_insert(LimitViolation::Memory {
                requested: desired,
                limit: self.max_memory,
            });
            return Ok(false);
        }
        self.peak_memory = self.peak_memory.max(desired as u64);
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        if desired > MAX_TABLE_ELEMENTS {
            self.violation
                .get_or_insert(LimitViolation::Table { requested: desired });
            return Ok(false);
        }
        Ok(true)
    }
}

/// Host state of one guest run.
pub struct RunState {
    /// The resource limiter.
    pub limiter: GuestLimiter,
    /// WASI Preview 1 context of the run.
    pub wasi: WasiP1Ctx,
}

impl RunState {
    /// Bundle a limiter with the run's WASI context.
    pub fn new(max_memory: u64, wasi: WasiP1Ctx) -> Self {
        Self {
            limiter: GuestLimiter::new(max_memory),
            wasi,
        }
    }
}

/// Extension trait for Store to configure resource limiting.
pub trait StoreLimiterExt {
    /// Route the store's growth requests through the run's limiter.
    fn configure_limiter(&mut self);
}

impl StoreLimiterExt for Store<RunState> {
    fn configure_limiter(&mut self) {
        self.limiter(|state| &mut state.limiter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_allows_within_limit() {
        let mut limiter = GuestLimiter::new(1024 * 1024);

        assert!(limiter.memory_growing(0, 512 * 1024, None).unwrap());
        assert!(limiter.violation().is_none());
        assert_eq!(limiter.peak_memory(), 512 * 1024);
    }

    #[test]
    fn test_limiter_records_first_violation() {
        let mut limiter = GuestLimiter::new(1024 * 1024);

        assert!(!limiter.memory_growing(0, 2 * 1024 * 1024, None).unwrap());
        assert!(!limiter.table_growing(0, MAX_TABLE_ELEMENTS + 1, None).unwrap());
        assert_eq!(
            limiter.violation(),
            Some(LimitViolation::Memory {
                requested: 2 * 1024 * 1024,
                limit: 1024 * 1024,
            })
        );
        assert!(limiter
            .violation()
            .unwrap()
            .to_string()
            .starts_with("memory limit exceeded"));
    }
}
