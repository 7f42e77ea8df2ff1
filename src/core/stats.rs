//! Diagnostics counters: cache throughput and periodic rate metronomes

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Cache statistics for monitoring performance
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    loaded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

/// Point-in-time copy of `CacheStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub loaded: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_loaded(&self) {
        self.loaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            loaded: self.loaded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [&self.hits, &self.misses, &self.loaded, &self.failed, &self.skipped] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Periodic rate counter (vblank rate, displayed fps, loads per second).
///
/// `tick()` on every event, `compute()` once per reporting interval.
#[derive(Debug, Clone)]
pub struct Metronome {
    name: &'static str,
    count: u64,
    period_start: Instant,
    last_tick: Option<Instant>,
    rate: f64,
}

impl Metronome {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            count: 0,
            period_start: Instant::now(),
            last_tick: None,
            rate: 0.0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Record one event; returns time since the previous one
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = self.last_tick.map(|t| now - t).unwrap_or_default();
        self.last_tick = Some(now);
        self.count += 1;
        elapsed
    }

    /// Record `n` events at once
    pub fn add(&mut self, n: u64) {
        self.count += n;
    }

    /// Close the current period and return events per second over it
    pub fn compute(&mut self) -> f64 {
        let now = Instant::now();
        let secs = (now - self.period_start).as_secs_f64();
        if secs > 0.0 {
            self.rate = self.count as f64 / secs;
        }
        self.count = 0;
        self.period_start = now;
        self.rate
    }

    /// Rate from the last `compute()`
    pub fn rate(&self) -> f64 {
        self.rate
    }
}
