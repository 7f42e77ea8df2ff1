//! Bounded frame cache with asynchronous population
//!
//! Structure: one `Mutex` over `HashMap<FrameReference, CacheEntry>` plus the
//! LRU queue (`IndexSet`, oldest at the front) and the most recent request
//! window (`IndexSet`, request order).
//!
//! Entry lifecycle:
//!
//! ```text
//!   (absent = Empty) --prepare--> Loading --ok--> Ready
//!                                    |   \--err--> Failed
//!                                    \--cancelled--> (absent)
//! ```
//!
//! - `prepare()` admits new references in priority order, charging the
//!   estimated cost up front so `used <= limit` holds while loads are in flight
//! - workers lock only to claim an entry and to commit its result; decoding
//!   runs unlocked
//! - `get()` never waits: it returns the resource if Ready, `None` otherwise
//! - eviction picks Ready/Failed entries outside the current window, least
//!   recently requested first; Loading entries get a cancel request instead

use indexmap::IndexSet;
use log::{debug, trace, warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::cache_man::{Budget, CacheManager, ConfigError};
use crate::core::event_bus::{EventBus, FrameFailedEvent, FrameReadyEvent, RequestSkippedEvent};
use crate::core::stats::{CacheStats, StatsSnapshot};
use crate::core::workers::{TaskHandle, WorkerPool};
use crate::entities::frame::{FrameError, FrameReference};
use crate::entities::traits::{FrameLoader, FrameResource};

/// Observable state of one frame reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntryState {
    /// No entry (never requested, evicted or cancelled)
    Empty,
    Loading,
    Ready,
    Failed,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryState::Empty => "empty",
            EntryState::Loading => "loading",
            EntryState::Ready => "ready",
            EntryState::Failed => "failed",
        };
        f.write_str(s)
    }
}

enum Slot<R> {
    Loading {
        /// Queue handle while not yet claimed by a worker
        task: Option<TaskHandle>,
        cancel_requested: bool,
    },
    Ready(Arc<R>),
    Failed(FrameError),
}

struct CacheEntry<R> {
    slot: Slot<R>,
    /// Budget units charged for this entry
    cost: usize,
    /// Resident bytes (estimate while loading)
    bytes: usize,
    last_touched: u64,
    load_id: u64,
}

impl<R> CacheEntry<R> {
    fn state(&self) -> EntryState {
        match self.slot {
            Slot::Loading { .. } => EntryState::Loading,
            Slot::Ready(_) => EntryState::Ready,
            Slot::Failed(_) => EntryState::Failed,
        }
    }

    fn is_settled(&self) -> bool {
        !matches!(self.slot, Slot::Loading { .. })
    }
}

struct Inner<R> {
    entries: HashMap<FrameReference, CacheEntry<R>>,
    /// LRU queue: touched entries move to the back
    lru: IndexSet<FrameReference>,
    /// Most recent prepare() request list
    window: IndexSet<FrameReference>,
    touch_seq: u64,
    next_load_id: u64,
    /// Oversize references already reported
    reported: HashSet<FrameReference>,
}

impl<R> Inner<R> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            lru: IndexSet::new(),
            window: IndexSet::new(),
            touch_seq: 0,
            next_load_id: 0,
            reported: HashSet::new(),
        }
    }

    fn next_touch(&mut self) -> u64 {
        self.touch_seq += 1;
        self.touch_seq
    }

    fn touch(&mut self, frame: &FrameReference) {
        let seq = self.next_touch();
        if let Some(entry) = self.entries.get_mut(frame) {
            entry.last_touched = seq;
            self.lru.shift_remove(frame);
            self.lru.insert(*frame);
        }
    }

    fn remove(&mut self, frame: &FrameReference, manager: &CacheManager) -> Option<CacheEntry<R>> {
        let entry = self.entries.remove(frame)?;
        self.lru.shift_remove(frame);
        manager.release(entry.cost);
        Some(entry)
    }

    /// Evict settled entries outside the window (oldest touch first) until
    /// `cost` more units fit. `keep` is never evicted.
    fn evict_until_fits(&mut self, cost: usize, keep: Option<&FrameReference>, manager: &CacheManager) -> bool {
        while !manager.fits(cost) {
            let victim = self
                .lru
                .iter()
                .find(|frame| {
                    Some(*frame) != keep
                        && !self.window.contains(*frame)
                        && self.entries.get(*frame).is_some_and(|e| e.is_settled() && e.cost > 0)
                })
                .copied();

            let Some(victim) = victim else {
                return false;
            };
            if let Some(entry) = self.remove(&victim, manager) {
                debug!("Evicted {} ({}, {} bytes)", victim, entry.state(), entry.bytes);
            }
        }
        true
    }

    /// Ask out-of-window loads to stop until their cost covers `needed`.
    /// Returns how many cancel requests were issued.
    fn cancel_outside_window(&mut self, needed: usize, cancel: impl Fn(&FrameReference) -> bool) -> usize {
        let mut pending = 0usize;
        let mut issued = 0;
        let order: Vec<FrameReference> = self.lru.iter().copied().collect();
        for frame in order {
            if pending >= needed {
                break;
            }
            if self.window.contains(&frame) {
                continue;
            }
            let Some(entry) = self.entries.get_mut(&frame) else {
                continue;
            };
            if let Slot::Loading { cancel_requested, .. } = &mut entry.slot {
                pending += entry.cost;
                if !*cancel_requested {
                    *cancel_requested = true;
                    let honored = cancel(&frame);
                    debug!("Cancel requested for {} (loader honored: {})", frame, honored);
                    issued += 1;
                }
            }
        }
        issued
    }
}

/// State shared with worker jobs
struct Shared<R: FrameResource> {
    inner: Mutex<Inner<R>>,
    manager: CacheManager,
    stats: CacheStats,
    loader: Arc<dyn FrameLoader<Resource = R>>,
    events: EventBus,
}

impl<R: FrameResource> Shared<R> {
    fn lock(&self) -> MutexGuard<'_, Inner<R>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Worker side: claim, decode unlocked, commit
    fn run_load(&self, frame: FrameReference, load_id: u64) {
        {
            let mut inner = self.lock();
            let cancelled = match inner.entries.get_mut(&frame) {
                Some(entry) if entry.load_id == load_id => match &mut entry.slot {
                    Slot::Loading { task, cancel_requested } => {
                        *task = None;
                        *cancel_requested
                    }
                    _ => return,
                },
                _ => {
                    trace!("Load {} #{} no longer wanted", frame, load_id);
                    return;
                }
            };
            if cancelled {
                inner.remove(&frame, &self.manager);
                debug!("Dropped cancelled load {} before decode", frame);
                return;
            }
        }

        let result = self.loader.load(&frame);
        self.commit(frame, load_id, result);
    }

    fn commit(&self, frame: FrameReference, load_id: u64, result: Result<R, FrameError>) {
        let budget = self.manager.budget();
        let mut inner = self.lock();

        let (charged, cancelled) = match inner.entries.get(&frame) {
            Some(entry) if entry.load_id == load_id => match &entry.slot {
                Slot::Loading { cancel_requested, .. } => (entry.cost, *cancel_requested),
                _ => return,
            },
            _ => {
                trace!("Discarding stale result for {}", frame);
                return;
            }
        };

        if cancelled {
            inner.remove(&frame, &self.manager);
            debug!("Discarded cancelled result for {}", frame);
            return;
        }

        let outcome = match result {
            Ok(resource) => {
                let bytes = resource.byte_size();
                let actual = budget.cost(bytes);
                let fits = if actual > charged {
                    let extra = actual - charged;
                    inner.evict_until_fits(extra, Some(&frame), &self.manager)
                } else {
                    true
                };
                if fits {
                    if actual > charged {
                        self.manager.charge(actual - charged);
                    } else {
                        self.manager.release(charged - actual);
                    }
                    Ok((Arc::new(resource), actual, bytes))
                } else {
                    Err(FrameError::OverBudget {
                        bytes,
                        limit: budget.limit(),
                    })
                }
            }
            Err(e) => Err(e),
        };

        let Some(entry) = inner.entries.get_mut(&frame) else {
            return;
        };
        match outcome {
            Ok((resource, cost, bytes)) => {
                entry.slot = Slot::Ready(resource);
                entry.cost = cost;
                entry.bytes = bytes;
                drop(inner);

                self.stats.record_loaded();
                trace!("Loaded {} ({} bytes)", frame, bytes);
                self.events.emit(FrameReadyEvent { frame, bytes });
            }
            Err(error) => {
                let failed_cost = budget.cost(0);
                entry.slot = Slot::Failed(error.clone());
                entry.cost = failed_cost;
                entry.bytes = 0;
                drop(inner);

                self.manager.release(charged);
                self.manager.charge(failed_cost);
                self.stats.record_failed();
                warn!("Failed to load {}: {}", frame, error);
                self.events.emit(FrameFailedEvent { frame, error });
            }
        }
    }
}

/// One row of a cache dump
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryInfo {
    pub frame: FrameReference,
    pub state: EntryState,
    pub bytes: usize,
    pub last_touched: u64,
}

/// Occupancy report filled by `FrameCache::dump_state`
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheState {
    pub loading: usize,
    pub ready: usize,
    pub failed: usize,
    /// Budget units in use / allowed
    pub used: usize,
    pub limit: usize,
    pub unit: &'static str,
    pub bytes: usize,
    pub window: usize,
    pub epoch: u64,
    pub counters: StatsSnapshot,
    /// Entries by last touch, oldest first
    pub entries: Vec<EntryInfo>,
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pct = if self.limit == 0 { 0.0 } else { self.used as f64 * 100.0 / self.limit as f64 };
        write!(
            f,
            "ready={} loading={} failed={} | {}/{} {} ({:.0}%), {:.1} MB | hits={} misses={} loaded={} errors={} skipped={} | epoch={}",
            self.ready,
            self.loading,
            self.failed,
            self.used,
            self.limit,
            self.unit,
            pct,
            self.bytes as f64 / 1024.0 / 1024.0,
            self.counters.hits,
            self.counters.misses,
            self.counters.loaded,
            self.counters.failed,
            self.counters.skipped,
            self.epoch
        )
    }
}

/// Bounded cache of loaded frame resources.
///
/// # Example
/// ```ignore
/// let cache = FrameCache::new(Budget::Entries(64), loader, workers, bus)?;
/// cache.prepare(&scheduler.plan(frame, mode, &timeline));
/// if let Some(frame) = cache.get(&reference) {
///     draw(&frame);
/// }
/// ```
pub struct FrameCache<R: FrameResource> {
    shared: Arc<Shared<R>>,
    pool: Arc<dyn WorkerPool>,
}

impl<R: FrameResource> FrameCache<R> {
    pub fn new(
        budget: Budget,
        loader: Arc<dyn FrameLoader<Resource = R>>,
        pool: Arc<dyn WorkerPool>,
        events: EventBus,
    ) -> Result<Self, ConfigError> {
        let manager = CacheManager::new(budget)?;
        debug!("FrameCache created: budget={}", manager.budget());
        Ok(Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::new()),
                manager,
                stats: CacheStats::new(),
                loader,
                events,
            }),
            pool,
        })
    }

    pub fn budget(&self) -> Budget {
        self.shared.manager.budget()
    }

    pub fn manager(&self) -> &CacheManager {
        &self.shared.manager
    }

    pub fn stats(&self) -> &CacheStats {
        &self.shared.stats
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// Make `refs` (priority order, nearest need first) the wanted set.
    ///
    /// Idempotent and non-blocking: references already Loading/Ready/Failed
    /// are only touched; missing ones are admitted while the budget allows.
    pub fn prepare(&self, refs: &[FrameReference]) {
        let missing: Vec<FrameReference> = {
            let inner = self.shared.lock();
            refs.iter().filter(|r| !inner.entries.contains_key(*r)).copied().collect()
        };
        // Estimates may probe files; keep that outside the lock
        let estimates: HashMap<FrameReference, usize> = missing
            .iter()
            .map(|r| (*r, self.shared.loader.estimate_bytes(r)))
            .collect();

        let budget = self.budget();
        let manager = &self.shared.manager;
        let mut skipped = Vec::new();
        let mut inner = self.shared.lock();

        inner.window = refs.iter().copied().collect();
        for frame in refs {
            inner.touch(frame);
        }

        for frame in refs {
            if let Some(entry) = inner.entries.get_mut(frame) {
                if let Slot::Loading { task, cancel_requested } = &mut entry.slot {
                    if *cancel_requested {
                        *cancel_requested = false;
                        debug!("Cancel withdrawn for {}", frame);
                    }
                    if let Some(task) = task {
                        self.pool.promote(task);
                    }
                }
                continue;
            }

            let Some(&estimate) = estimates.get(frame) else {
                // Entry existed at estimate time and was dropped since; next call picks it up
                continue;
            };
            let cost = budget.cost(estimate);

            if !manager.can_ever_fit(cost) {
                if inner.reported.insert(*frame) {
                    warn!(
                        "Skipping {}: needs {} {}, budget is {}",
                        frame,
                        cost,
                        budget.unit(),
                        budget.limit()
                    );
                    self.shared.stats.record_skipped();
                    skipped.push(RequestSkippedEvent {
                        frame: *frame,
                        cost,
                        limit: budget.limit(),
                    });
                }
                continue;
            }

            if !inner.evict_until_fits(cost, None, manager) {
                let deficit = manager.mem().0.saturating_add(cost).saturating_sub(budget.limit());
                let issued = inner.cancel_outside_window(deficit, |f| self.shared.loader.cancel(f));
                debug!(
                    "No room for {} ({} cancel requests issued), skipping this call",
                    frame, issued
                );
                continue;
            }

            inner.next_load_id += 1;
            let load_id = inner.next_load_id;
            let seq = inner.next_touch();
            inner.entries.insert(
                *frame,
                CacheEntry {
                    slot: Slot::Loading {
                        task: None,
                        cancel_requested: false,
                    },
                    cost,
                    bytes: estimate,
                    last_touched: seq,
                    load_id,
                },
            );
            inner.lru.insert(*frame);
            manager.charge(cost);

            // Queued jobs must not keep the cache alive
            let shared = Arc::downgrade(&self.shared);
            let target = *frame;
            let task = self.pool.submit(Box::new(move || {
                if let Some(shared) = shared.upgrade() {
                    shared.run_load(target, load_id);
                }
            }));
            if let Some(CacheEntry {
                slot: Slot::Loading { task: slot_task, .. },
                ..
            }) = inner.entries.get_mut(frame)
            {
                *slot_task = Some(task);
            }
            trace!("Admitted {} (cost {}, load #{})", frame, cost, load_id);
        }
        drop(inner);

        for event in skipped {
            self.shared.events.emit(event);
        }
    }

    /// Resource for `frame` if Ready. Never waits on loads.
    pub fn get(&self, frame: &FrameReference) -> Option<Arc<R>> {
        let inner = self.shared.lock();
        match inner.entries.get(frame).map(|e| &e.slot) {
            Some(Slot::Ready(resource)) => {
                self.shared.stats.record_hit();
                Some(Arc::clone(resource))
            }
            _ => {
                self.shared.stats.record_miss();
                None
            }
        }
    }

    /// Error of a Failed entry
    pub fn error(&self, frame: &FrameReference) -> Option<FrameError> {
        match self.shared.lock().entries.get(frame).map(|e| &e.slot) {
            Some(Slot::Failed(error)) => Some(error.clone()),
            _ => None,
        }
    }

    pub fn status(&self, frame: &FrameReference) -> EntryState {
        self.shared
            .lock()
            .entries
            .get(frame)
            .map(CacheEntry::state)
            .unwrap_or(EntryState::Empty)
    }

    pub fn contains(&self, frame: &FrameReference) -> bool {
        self.shared.lock().entries.contains_key(frame)
    }

    pub fn len(&self) -> usize {
        self.shared.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop Ready/Failed entries (in or out of the window). Returns count removed.
    pub fn invalidate(&self, refs: &[FrameReference]) -> usize {
        let mut inner = self.shared.lock();
        let mut removed = 0;
        for frame in refs {
            if inner.entries.get(frame).is_some_and(CacheEntry::is_settled) {
                inner.remove(frame, &self.shared.manager);
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("Invalidated {} entries", removed);
        }
        removed
    }

    /// Cue discontinuity: queued loads outside `refs` go to the back of the
    /// loader queue, Failed entries outside `refs` are invalidated.
    pub fn deprioritize_outside(&self, refs: &[FrameReference]) {
        let keep: HashSet<&FrameReference> = refs.iter().collect();
        let mut inner = self.shared.lock();

        let mut deferred = 0;
        let mut failed = Vec::new();
        for (frame, entry) in inner.entries.iter() {
            if keep.contains(frame) {
                continue;
            }
            match &entry.slot {
                Slot::Loading { task: Some(task), .. } => {
                    self.pool.defer(task);
                    deferred += 1;
                }
                Slot::Failed(_) => failed.push(*frame),
                _ => {}
            }
        }
        for frame in &failed {
            inner.remove(frame, &self.shared.manager);
        }
        drop(inner);

        let epoch = self.shared.manager.increment_epoch();
        debug!(
            "Discontinuity (epoch {}): deferred {} loads, invalidated {} failed entries",
            epoch,
            deferred,
            failed.len()
        );
    }

    /// Drop every settled entry and ask all loads to stop
    pub fn clear(&self) {
        let mut inner = self.shared.lock();
        let settled: Vec<FrameReference> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_settled())
            .map(|(r, _)| *r)
            .collect();
        for frame in &settled {
            inner.remove(frame, &self.shared.manager);
        }

        let loader = self.shared.loader.as_ref();
        for (frame, entry) in inner.entries.iter_mut() {
            if let Slot::Loading { cancel_requested, .. } = &mut entry.slot {
                if !*cancel_requested {
                    *cancel_requested = true;
                    let honored = loader.cancel(frame);
                    debug!("Cancel requested for {} (loader honored: {})", frame, honored);
                }
            }
        }
        inner.window.clear();
        inner.reported.clear();
        debug!(
            "Cache cleared: {} entries dropped, {} loads cancelling",
            settled.len(),
            inner.entries.len()
        );
    }

    /// Fill `state` with the current occupancy. Read-only.
    pub fn dump_state(&self, state: &mut CacheState) {
        let inner = self.shared.lock();
        let (used, limit) = self.shared.manager.mem();

        state.loading = 0;
        state.ready = 0;
        state.failed = 0;
        state.bytes = 0;
        state.entries.clear();
        for frame in inner.lru.iter() {
            let Some(entry) = inner.entries.get(frame) else {
                continue;
            };
            let entry_state = entry.state();
            match entry_state {
                EntryState::Loading => state.loading += 1,
                EntryState::Ready => state.ready += 1,
                EntryState::Failed => state.failed += 1,
                EntryState::Empty => {}
            }
            state.bytes += entry.bytes;
            state.entries.push(EntryInfo {
                frame: *frame,
                state: entry_state,
                bytes: entry.bytes,
                last_touched: entry.last_touched,
            });
        }

        state.used = used;
        state.limit = limit;
        state.unit = self.budget().unit();
        state.window = inner.window.len();
        state.epoch = self.shared.manager.current_epoch();
        state.counters = self.shared.stats.snapshot();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::workers::Task;
    use crate::entities::frame::StreamId;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Pool that only runs jobs when the test says so
    #[derive(Default)]
    struct ManualPool {
        queue: Mutex<VecDeque<TaskHandle>>,
        deferred: Mutex<VecDeque<TaskHandle>>,
    }

    impl ManualPool {
        fn run_all(&self) -> usize {
            let mut ran = 0;
            loop {
                let next = {
                    let urgent = self.queue.lock().unwrap().pop_front();
                    urgent.or_else(|| self.deferred.lock().unwrap().pop_front())
                };
                match next {
                    Some(task) => {
                        if task.run() {
                            ran += 1;
                        }
                    }
                    None => return ran,
                }
            }
        }

        fn pending(&self) -> usize {
            let queued = self.queue.lock().unwrap().iter().filter(|t| !t.is_started()).count();
            let deferred = self.deferred.lock().unwrap().iter().filter(|t| !t.is_started()).count();
            queued + deferred
        }

        fn deferred_len(&self) -> usize {
            self.deferred.lock().unwrap().len()
        }
    }

    impl WorkerPool for ManualPool {
        fn submit(&self, job: crate::core::workers::Job) -> TaskHandle {
            let task = Task::new(job);
            self.queue.lock().unwrap().push_back(Arc::clone(&task));
            task
        }

        fn defer(&self, task: &TaskHandle) {
            if !task.is_started() && !task.set_deferred(true) {
                self.queue.lock().unwrap().retain(|t| !Arc::ptr_eq(t, task));
                self.deferred.lock().unwrap().push_back(Arc::clone(task));
            }
        }

        fn promote(&self, task: &TaskHandle) {
            if !task.is_started() && task.set_deferred(false) {
                self.deferred.lock().unwrap().retain(|t| !Arc::ptr_eq(t, task));
                self.queue.lock().unwrap().push_back(Arc::clone(task));
            }
        }
    }

    #[derive(Debug)]
    struct Blob(usize);

    impl FrameResource for Blob {
        fn byte_size(&self) -> usize {
            self.0
        }
    }

    /// Loader with per-index sizes and failures
    struct FakeLoader {
        estimate: usize,
        estimates: HashMap<u64, usize>,
        actual: HashMap<u64, usize>,
        failing: HashSet<u64>,
        loads: AtomicUsize,
        cancels: Mutex<Vec<FrameReference>>,
    }

    impl FakeLoader {
        fn new(estimate: usize) -> Self {
            Self {
                estimate,
                estimates: HashMap::new(),
                actual: HashMap::new(),
                failing: HashSet::new(),
                loads: AtomicUsize::new(0),
                cancels: Mutex::new(Vec::new()),
            }
        }
    }

    impl FrameLoader for FakeLoader {
        type Resource = Blob;

        fn estimate_bytes(&self, frame: &FrameReference) -> usize {
            *self.estimates.get(&frame.index).unwrap_or(&self.estimate)
        }

        fn load(&self, frame: &FrameReference) -> Result<Blob, FrameError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(&frame.index) {
                return Err(FrameError::UnsupportedFormat("fake".into()));
            }
            let size = self.actual.get(&frame.index).copied();
            Ok(Blob(size.unwrap_or_else(|| self.estimate_bytes(frame))))
        }

        fn cancel(&self, frame: &FrameReference) -> bool {
            self.cancels.lock().unwrap().push(*frame);
            false
        }
    }

    struct Fixture {
        cache: FrameCache<Blob>,
        pool: Arc<ManualPool>,
        loader: Arc<FakeLoader>,
        stream: StreamId,
    }

    impl Fixture {
        fn new(budget: Budget, loader: FakeLoader) -> Self {
            let pool = Arc::new(ManualPool::default());
            let loader = Arc::new(loader);
            let cache = FrameCache::new(budget, loader.clone(), pool.clone(), EventBus::new()).unwrap();
            Self { cache, pool, loader, stream: StreamId::new() }
        }

        fn refs(&self, indices: &[u64]) -> Vec<FrameReference> {
            indices.iter().map(|i| FrameReference::new(self.stream, *i)).collect()
        }

        fn r(&self, index: u64) -> FrameReference {
            FrameReference::new(self.stream, index)
        }
    }

    #[test]
    fn test_zero_budget_rejected() {
        let pool = Arc::new(ManualPool::default());
        let result = FrameCache::<Blob>::new(
            Budget::Entries(0),
            Arc::new(FakeLoader::new(1)),
            pool,
            EventBus::new(),
        );
        assert!(matches!(result, Err(ConfigError::ZeroBudget)));
    }

    #[test]
    fn test_prepare_then_get() {
        let fx = Fixture::new(Budget::Entries(8), FakeLoader::new(100));
        fx.cache.prepare(&fx.refs(&[1, 2, 3]));

        // Nothing ready yet, and get() does not wait
        assert_eq!(fx.cache.status(&fx.r(1)), EntryState::Loading);
        assert!(fx.cache.get(&fx.r(1)).is_none());
        assert_eq!(fx.cache.status(&fx.r(9)), EntryState::Empty);

        assert_eq!(fx.pool.run_all(), 3);
        assert_eq!(fx.cache.get(&fx.r(2)).map(|b| b.0), Some(100));
        assert_eq!(fx.cache.stats().hits(), 1);
        assert_eq!(fx.cache.stats().misses(), 1);
        assert_eq!(fx.cache.manager().mem(), (3, 8));
    }

    #[test]
    fn test_prepare_is_idempotent() {
        let fx = Fixture::new(Budget::Entries(8), FakeLoader::new(100));
        let window = fx.refs(&[4, 5]);
        fx.cache.prepare(&window);
        fx.cache.prepare(&window);
        assert_eq!(fx.pool.pending(), 2);

        fx.pool.run_all();
        fx.cache.prepare(&window);
        assert_eq!(fx.pool.pending(), 0);
        assert_eq!(fx.loader.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_forward_window_scenario() {
        // Budget 3 slots, W=2, forward from 10
        let fx = Fixture::new(Budget::Entries(3), FakeLoader::new(1));
        fx.cache.prepare(&fx.refs(&[10, 11]));
        fx.pool.run_all();
        assert_eq!(fx.cache.status(&fx.r(10)), EntryState::Ready);
        assert_eq!(fx.cache.status(&fx.r(11)), EntryState::Ready);

        fx.cache.prepare(&fx.refs(&[11, 12]));
        fx.pool.run_all();
        assert_eq!(fx.cache.status(&fx.r(12)), EntryState::Ready);

        fx.cache.prepare(&fx.refs(&[12, 13]));
        assert_eq!(fx.cache.status(&fx.r(10)), EntryState::Empty);
        assert_eq!(fx.cache.status(&fx.r(11)), EntryState::Ready);
        assert_eq!(fx.cache.status(&fx.r(12)), EntryState::Ready);
        assert_eq!(fx.cache.status(&fx.r(13)), EntryState::Loading);
        assert_eq!(fx.cache.manager().mem(), (3, 3));
    }

    #[test]
    fn test_window_entries_never_evicted() {
        let fx = Fixture::new(Budget::Entries(2), FakeLoader::new(1));
        fx.cache.prepare(&fx.refs(&[0, 1, 2, 3]));
        fx.pool.run_all();

        // Only the first two fit; the rest of the window waits
        assert_eq!(fx.cache.status(&fx.r(0)), EntryState::Ready);
        assert_eq!(fx.cache.status(&fx.r(1)), EntryState::Ready);
        assert_eq!(fx.cache.status(&fx.r(2)), EntryState::Empty);

        fx.cache.prepare(&fx.refs(&[0, 1, 2, 3]));
        assert_eq!(fx.cache.len(), 2);
        assert_eq!(fx.pool.pending(), 0);
    }

    #[test]
    fn test_oversize_request_skipped_and_reported_once() {
        let fx = Fixture::new(Budget::Bytes(100), FakeLoader::new(500));
        let skipped = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&skipped);
        fx.cache.events().subscribe::<RequestSkippedEvent, _>(move |e| {
            assert_eq!(e.limit, 100);
            s.fetch_add(1, Ordering::SeqCst);
        });

        fx.cache.prepare(&fx.refs(&[1]));
        fx.cache.prepare(&fx.refs(&[1]));

        assert!(!fx.cache.contains(&fx.r(1)));
        assert_eq!(fx.pool.pending(), 0);
        assert_eq!(skipped.load(Ordering::SeqCst), 1);
        assert_eq!(fx.cache.stats().snapshot().skipped, 1);
    }

    #[test]
    fn test_failed_entries_are_retained() {
        let mut loader = FakeLoader::new(10);
        loader.failing.insert(2);
        let fx = Fixture::new(Budget::Bytes(1000), loader);

        fx.cache.prepare(&fx.refs(&[1, 2]));
        fx.pool.run_all();
        assert_eq!(fx.cache.status(&fx.r(2)), EntryState::Failed);
        assert!(fx.cache.get(&fx.r(2)).is_none());
        assert!(matches!(fx.cache.error(&fx.r(2)), Some(FrameError::UnsupportedFormat(_))));
        // Failed entries hold no bytes
        assert_eq!(fx.cache.manager().mem().0, 10);

        // Not retried automatically
        fx.cache.prepare(&fx.refs(&[1, 2]));
        assert_eq!(fx.pool.pending(), 0);
        assert_eq!(fx.loader.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_loading_outside_window_gets_cancel_request() {
        let fx = Fixture::new(Budget::Entries(2), FakeLoader::new(1));
        fx.cache.prepare(&fx.refs(&[0, 1]));

        // Jump: both slots are in flight, nothing can be evicted
        fx.cache.prepare(&fx.refs(&[50]));
        assert_eq!(fx.cache.status(&fx.r(50)), EntryState::Empty);
        assert_eq!(fx.cache.status(&fx.r(0)), EntryState::Loading);
        assert_eq!(fx.loader.cancels.lock().unwrap().len(), 1);

        // Worker picks the cancelled task up and drops it without decoding
        fx.pool.run_all();
        assert_eq!(fx.loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(fx.cache.len(), 1);

        fx.cache.prepare(&fx.refs(&[50]));
        assert_eq!(fx.cache.status(&fx.r(50)), EntryState::Loading);
    }

    #[test]
    fn test_request_without_room_does_not_block_smaller_ones() {
        let mut loader = FakeLoader::new(0);
        loader.estimates.extend([(0, 50), (1, 60), (2, 30)]);
        let fx = Fixture::new(Budget::Bytes(100), loader);

        fx.cache.prepare(&fx.refs(&[0]));
        fx.cache.prepare(&fx.refs(&[1, 2]));

        // 1 has to wait for 0 to go away, 2 fits next to it
        assert_eq!(fx.cache.status(&fx.r(1)), EntryState::Empty);
        assert_eq!(fx.cache.status(&fx.r(2)), EntryState::Loading);
        assert_eq!(fx.cache.manager().mem(), (80, 100));
        assert_eq!(fx.loader.cancels.lock().unwrap().as_slice(), &[fx.r(0)]);

        fx.pool.run_all();
        assert_eq!(fx.cache.status(&fx.r(0)), EntryState::Empty);
        assert_eq!(fx.cache.manager().mem().0, 30);

        fx.cache.prepare(&fx.refs(&[1, 2]));
        fx.pool.run_all();
        assert_eq!(fx.cache.status(&fx.r(1)), EntryState::Ready);
        assert_eq!(fx.cache.status(&fx.r(2)), EntryState::Ready);
        assert_eq!(fx.cache.manager().mem(), (90, 100));
        assert_eq!(fx.loader.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_rerequest_withdraws_cancel() {
        let fx = Fixture::new(Budget::Entries(1), FakeLoader::new(1));
        fx.cache.prepare(&fx.refs(&[0]));
        fx.cache.prepare(&fx.refs(&[7]));
        assert_eq!(fx.loader.cancels.lock().unwrap().as_slice(), &[fx.r(0)]);

        // Playback came back before the worker got to it
        fx.cache.prepare(&fx.refs(&[0]));
        fx.pool.run_all();
        assert_eq!(fx.cache.status(&fx.r(0)), EntryState::Ready);
    }

    #[test]
    fn test_actual_size_over_budget_fails_entry() {
        let mut loader = FakeLoader::new(10);
        loader.actual.insert(1, 80);
        let fx = Fixture::new(Budget::Bytes(100), loader);

        fx.cache.prepare(&fx.refs(&[0, 1]));
        // Frame 1 is 8x its estimate but still fits
        fx.pool.run_all();
        assert_eq!(fx.cache.status(&fx.r(0)), EntryState::Ready);
        assert_eq!(fx.cache.status(&fx.r(1)), EntryState::Ready);
        assert_eq!(fx.cache.manager().mem().0, 90);

        let mut big = FakeLoader::new(10);
        big.actual.insert(1, 95);
        let fx = Fixture::new(Budget::Bytes(100), big);
        fx.cache.prepare(&fx.refs(&[0, 1]));
        fx.pool.run_all();
        assert!(matches!(
            fx.cache.error(&fx.r(1)),
            Some(FrameError::OverBudget { bytes: 95, limit: 100 })
        ));
        assert_eq!(fx.cache.manager().mem().0, 10);
    }

    #[test]
    fn test_completion_makes_room_outside_window() {
        let mut loader = FakeLoader::new(10);
        loader.actual.insert(9, 70);
        let fx = Fixture::new(Budget::Bytes(100), loader);

        fx.cache.prepare(&fx.refs(&[0, 1, 2, 3]));
        fx.pool.run_all();
        fx.cache.prepare(&fx.refs(&[9]));
        fx.pool.run_all();

        // 40 resident + 10 estimated, then 70 actual: the oldest frame has to go
        assert_eq!(fx.cache.status(&fx.r(9)), EntryState::Ready);
        let (used, limit) = fx.cache.manager().mem();
        assert!(used <= limit);
        assert_eq!(fx.cache.status(&fx.r(0)), EntryState::Empty);
        assert_eq!(fx.cache.status(&fx.r(3)), EntryState::Ready);
    }

    #[test]
    fn test_deprioritize_outside() {
        let mut loader = FakeLoader::new(1);
        loader.failing.insert(3);
        let fx = Fixture::new(Budget::Entries(16), loader);
        fx.cache.prepare(&fx.refs(&[3]));
        fx.pool.run_all();
        assert_eq!(fx.cache.status(&fx.r(3)), EntryState::Failed);

        fx.cache.prepare(&fx.refs(&[10, 11, 12]));
        fx.cache.deprioritize_outside(&fx.refs(&[12]));

        assert_eq!(fx.pool.deferred_len(), 2);
        assert_eq!(fx.cache.status(&fx.r(3)), EntryState::Empty);
        assert_eq!(fx.cache.manager().current_epoch(), 1);

        // Requested again: back to the front
        fx.cache.prepare(&fx.refs(&[10, 11]));
        assert_eq!(fx.pool.deferred_len(), 0);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let fx = Fixture::new(Budget::Entries(8), FakeLoader::new(1));
        fx.cache.prepare(&fx.refs(&[1, 2]));
        fx.pool.run_all();
        fx.cache.prepare(&fx.refs(&[3]));

        // Loading entries are not invalidated
        assert_eq!(fx.cache.invalidate(&fx.refs(&[1, 3])), 1);
        assert_eq!(fx.cache.status(&fx.r(3)), EntryState::Loading);

        fx.cache.clear();
        assert_eq!(fx.cache.len(), 1);
        assert_eq!(fx.loader.cancels.lock().unwrap().as_slice(), &[fx.r(3)]);
        fx.pool.run_all();
        assert!(fx.cache.is_empty());
        assert_eq!(fx.cache.manager().mem().0, 0);
    }

    #[test]
    fn test_dump_state() {
        let mut loader = FakeLoader::new(1024);
        loader.failing.insert(2);
        let fx = Fixture::new(Budget::Bytes(1 << 20), loader);
        fx.cache.prepare(&fx.refs(&[0, 1, 2]));
        fx.pool.run_all();
        fx.cache.prepare(&fx.refs(&[2, 3]));
        fx.cache.get(&fx.r(0));

        let mut state = CacheState::default();
        fx.cache.dump_state(&mut state);
        assert_eq!((state.ready, state.loading, state.failed), (2, 1, 1));
        assert_eq!(state.used, 3 * 1024);
        assert_eq!(state.window, 2);
        assert_eq!(state.counters.hits, 1);
        assert_eq!(state.counters.failed, 1);
        // Oldest touch first; 3 was touched last
        assert_eq!(state.entries.first().map(|e| e.frame), Some(fx.r(0)));
        assert_eq!(state.entries.last().map(|e| e.frame), Some(fx.r(3)));

        let line = state.to_string();
        assert!(line.contains("ready=2 loading=1 failed=1"));
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"Loading\""));

        // Dumping does not change anything
        let mut again = CacheState::default();
        fx.cache.dump_state(&mut again);
        assert_eq!(again.entries, state.entries);
    }

    #[test]
    fn test_ready_event_published() {
        let fx = Fixture::new(Budget::Entries(4), FakeLoader::new(64));
        fx.cache.prepare(&fx.refs(&[5]));
        fx.pool.run_all();
        let events = fx.cache.events().poll();
        assert_eq!(events.len(), 1);
        let ready = crate::core::event_bus::downcast_event::<FrameReadyEvent>(&events[0]);
        assert_eq!(ready.map(|e| (e.frame.index, e.bytes)), Some((5, 64)));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Prepare(Vec<u64>),
        Run,
        Deprioritize(Vec<u64>),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            prop::collection::vec(0u64..40, 0..8).prop_map(Op::Prepare),
            Just(Op::Run),
            prop::collection::vec(0u64..40, 0..4).prop_map(Op::Deprioritize),
        ]
    }

    proptest! {
        #[test]
        fn prop_budget_never_exceeded(
            ops in prop::collection::vec(op_strategy(), 1..40),
            sizes in prop::collection::vec(1usize..60, 40),
            limit in 50usize..200,
        ) {
            let mut loader = FakeLoader::new(20);
            for (i, size) in sizes.iter().enumerate() {
                loader.actual.insert(i as u64, *size);
            }
            loader.failing.insert(7);
            let fx = Fixture::new(Budget::Bytes(limit), loader);
            let mut state = CacheState::default();

            for op in ops {
                match op {
                    Op::Prepare(indices) => fx.cache.prepare(&fx.refs(&indices)),
                    Op::Run => { fx.pool.run_all(); }
                    Op::Deprioritize(indices) => fx.cache.deprioritize_outside(&fx.refs(&indices)),
                }
                fx.cache.dump_state(&mut state);
                prop_assert!(state.used <= state.limit);
                let loading_or_ready: usize = state
                    .entries
                    .iter()
                    .filter(|e| e.state != EntryState::Failed)
                    .map(|e| e.bytes)
                    .sum();
                prop_assert_eq!(loading_or_ready, state.used);
            }

            // Quiescent: nothing is left Loading
            fx.pool.run_all();
            fx.cache.dump_state(&mut state);
            prop_assert_eq!(state.loading, 0);
        }
    }
}
