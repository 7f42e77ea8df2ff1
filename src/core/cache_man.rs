//! Cache budget manager: cost accounting and discontinuity epoch
//!
//! **Why**: The frame cache must never hold more than its configured budget,
//! including frames that are still loading. Accounting lives here so the
//! limit can be checked before a load is admitted.
//! The epoch counts cue/seek discontinuities and is reported in cache dumps.
//!
//! **Used by**: FrameCache (admission, eviction, completion reconciliation)

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use sysinfo::System;

/// Maximum the cache may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Budget {
    /// Aggregate resident bytes
    Bytes(usize),
    /// Number of frame slots, regardless of size
    Entries(usize),
}

/// Errors for unusable session configuration (reported at construction time)
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    ZeroBudget,
    InvalidFraction(f64),
    ZeroWindow,
    ZeroFrameRate,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroBudget => write!(f, "Cache budget must be greater than zero"),
            ConfigError::InvalidFraction(v) => {
                write!(f, "Memory fraction must be in (0, 1], got {}", v)
            }
            ConfigError::ZeroWindow => write!(f, "Prefetch window must hold at least one frame"),
            ConfigError::ZeroFrameRate => write!(f, "Frame rate numerator and denominator must be non-zero"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Budget {
    /// Derive a byte budget from currently available memory
    ///
    /// # Arguments
    ///
    /// * `mem_fraction` - Fraction of available memory (0.0-1.0, e.g. 0.75 = 75%)
    /// * `reserve_gb` - Reserve memory for system (GB, e.g. 2.0 = 2GB)
    pub fn from_memory_fraction(mem_fraction: f64, reserve_gb: f64) -> Result<Self, ConfigError> {
        if !(mem_fraction > 0.0 && mem_fraction <= 1.0) {
            return Err(ConfigError::InvalidFraction(mem_fraction));
        }

        let mut sys = System::new();
        sys.refresh_memory();

        let available = sys.available_memory() as usize;
        let reserve = (reserve_gb.max(0.0) * 1024.0 * 1024.0 * 1024.0) as usize;
        let usable = available.saturating_sub(reserve);
        let max_memory_bytes = (usable as f64 * mem_fraction) as usize;

        info!(
            "Budget from memory: available={} MB, reserve={} MB, limit={} MB ({}%)",
            available / 1024 / 1024,
            reserve / 1024 / 1024,
            max_memory_bytes / 1024 / 1024,
            (mem_fraction * 100.0) as u32
        );

        Budget::Bytes(max_memory_bytes).validated()
    }

    /// Fail fast on a budget that could never hold anything
    pub fn validated(self) -> Result<Self, ConfigError> {
        match self {
            Budget::Bytes(0) | Budget::Entries(0) => Err(ConfigError::ZeroBudget),
            other => Ok(other),
        }
    }

    pub fn limit(&self) -> usize {
        match *self {
            Budget::Bytes(n) | Budget::Entries(n) => n,
        }
    }

    /// Budget units consumed by a resource of `bytes` size
    pub fn cost(&self, bytes: usize) -> usize {
        match self {
            Budget::Bytes(_) => bytes,
            Budget::Entries(_) => 1,
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Budget::Bytes(_) => "bytes",
            Budget::Entries(_) => "entries",
        }
    }
}

impl fmt::Display for Budget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Budget::Bytes(n) => write!(f, "{} MB", n / 1024 / 1024),
            Budget::Entries(n) => write!(f, "{} frames", n),
        }
    }
}

/// Budget accounting shared between the render loop and workers.
///
/// Usage is expressed in budget units (`Budget::cost`).
#[derive(Debug)]
pub struct CacheManager {
    budget: Budget,
    /// Atomically tracked usage (budget units)
    usage: AtomicUsize,
    /// Discontinuity counter, bumped on every cue
    current_epoch: AtomicU64,
}

impl CacheManager {
    /// Create manager, rejecting zero budgets
    pub fn new(budget: Budget) -> Result<Self, ConfigError> {
        let budget = budget.validated()?;
        debug!("CacheManager created: budget={}", budget);
        Ok(Self {
            budget,
            usage: AtomicUsize::new(0),
            current_epoch: AtomicU64::new(0),
        })
    }

    pub fn budget(&self) -> Budget {
        self.budget
    }

    /// Increment epoch and return new value
    pub fn increment_epoch(&self) -> u64 {
        let new_epoch = self.current_epoch.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Epoch incremented: {}", new_epoch);
        new_epoch
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::Relaxed)
    }

    /// Would `cost` more units stay within the limit
    pub fn fits(&self, cost: usize) -> bool {
        self.usage
            .load(Ordering::Relaxed)
            .checked_add(cost)
            .is_some_and(|total| total <= self.budget.limit())
    }

    /// Can a single resource of this cost ever fit
    pub fn can_ever_fit(&self, cost: usize) -> bool {
        cost <= self.budget.limit()
    }

    /// Get usage statistics (usage, limit)
    pub fn mem(&self) -> (usize, usize) {
        (self.usage.load(Ordering::Relaxed), self.budget.limit())
    }

    /// Get usage fraction (0.0-1.0)
    pub fn usage_fraction(&self) -> f64 {
        let (usage, limit) = self.mem();
        usage as f64 / limit as f64
    }

    /// Account units. Callers check `fits` first under the cache lock.
    pub fn charge(&self, cost: usize) {
        self.usage.fetch_add(cost, Ordering::Relaxed);
    }

    /// Release units (saturating subtraction to prevent underflow)
    pub fn release(&self, cost: usize) {
        // Use compare-exchange loop for saturating subtraction
        loop {
            let current = self.usage.load(Ordering::Relaxed);
            let new_val = current.saturating_sub(cost);
            if self
                .usage
                .compare_exchange_weak(current, new_val, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }
}
