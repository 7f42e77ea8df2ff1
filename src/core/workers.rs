//! Loader pool: background threads for frame decoding
//!
//! Two global injector queues give a simple priority model:
//! - **urgent** lane: normal submissions, FIFO, always drained first
//! - **deferred** lane: tasks pushed to the back after a seek moved them
//!   out of the prefetch window
//!
//! A `Task` may be referenced from both lanes (defer, then promote again);
//! the job inside runs at most once, whichever handle reaches a worker first.
//! Started tasks are never interrupted.

use crossbeam::deque::Injector;
use log::trace;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// One-shot unit of work with a movable queue position.
pub struct Task {
    job: Mutex<Option<Job>>,
    deferred: AtomicBool,
    started: AtomicBool,
}

pub type TaskHandle = Arc<Task>;

impl Task {
    pub fn new(job: Job) -> TaskHandle {
        Arc::new(Self {
            job: Mutex::new(Some(job)),
            deferred: AtomicBool::new(false),
            started: AtomicBool::new(false),
        })
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred.load(Ordering::Relaxed)
    }

    /// Flip the lane flag, returning the previous value
    pub fn set_deferred(&self, deferred: bool) -> bool {
        self.deferred.swap(deferred, Ordering::Relaxed)
    }

    /// Job was taken by a worker (running or finished)
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Run the job if nobody else did. Returns true if it ran here.
    pub fn run(&self) -> bool {
        let job = self.job.lock().unwrap_or_else(|e| e.into_inner()).take();
        match job {
            Some(job) => {
                self.started.store(true, Ordering::Release);
                job();
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("deferred", &self.is_deferred())
            .field("started", &self.is_started())
            .finish()
    }
}

/// Abstract worker pool interface.
///
/// Lets the cache schedule loads without knowing the concrete pool
/// (tests drive a manual queue instead of threads).
pub trait WorkerPool: Send + Sync {
    /// Queue a job at normal priority, in submission order
    fn submit(&self, job: Job) -> TaskHandle;

    /// Move a queued task behind all normal-priority work
    fn defer(&self, task: &TaskHandle);

    /// Bring a deferred task back to normal priority
    fn promote(&self, task: &TaskHandle);
}

impl<T: WorkerPool + ?Sized> WorkerPool for Arc<T> {
    fn submit(&self, job: Job) -> TaskHandle {
        (**self).submit(job)
    }

    fn defer(&self, task: &TaskHandle) {
        (**self).defer(task)
    }

    fn promote(&self, task: &TaskHandle) {
        (**self).promote(task)
    }
}

/// Fixed pool of named worker threads.
///
/// # Example
/// ```ignore
/// let workers = Workers::new(4);
/// let task = workers.submit(Box::new(move || decode(frame_ref)));
/// // seek happened, frame is no longer near the playhead
/// workers.defer(&task);
/// ```
pub struct Workers {
    urgent: Arc<Injector<TaskHandle>>,
    deferred: Arc<Injector<TaskHandle>>,
    handles: Vec<thread::JoinHandle<()>>, // Thread handles for proper shutdown
    shutdown: Arc<AtomicBool>,
}

impl Workers {
    /// Recommended thread count: 75% of cores, leaving room for the render loop
    pub fn default_threads() -> usize {
        (num_cpus::get() * 3 / 4).max(1)
    }

    /// Create worker pool with `num_threads` threads (at least one)
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let urgent: Arc<Injector<TaskHandle>> = Arc::new(Injector::new());
        let deferred: Arc<Injector<TaskHandle>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(num_threads);

        for worker_id in 0..num_threads {
            let urgent = Arc::clone(&urgent);
            let deferred = Arc::clone(&deferred);
            let shutdown = Arc::clone(&shutdown);

            let spawned = thread::Builder::new()
                .name(format!("flipbook-worker-{}", worker_id))
                .spawn(move || {
                    trace!("Worker {} started", worker_id);

                    loop {
                        // 1. Normal priority first; deferred handles in this lane are stale
                        if let Some(task) = urgent.steal().success() {
                            if !task.is_deferred() {
                                task.run();
                            }
                            continue;
                        }

                        // 2. Deferred lane only when nothing urgent is waiting
                        if let Some(task) = deferred.steal().success() {
                            task.run();
                            continue;
                        }

                        // 3. Check shutdown
                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }

                        // 4. No work - short sleep to avoid CPU spin
                        thread::sleep(Duration::from_millis(1));
                    }

                    trace!("Worker {} stopped", worker_id);
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => log::error!("Failed to spawn worker thread {}: {}", worker_id, e),
            }
        }

        trace!("Workers initialized: {} threads", handles.len());

        Self {
            urgent,
            deferred,
            handles,
            shutdown,
        }
    }

    /// Number of live worker threads
    pub fn threads(&self) -> usize {
        self.handles.len()
    }

    /// Queued handles per lane (urgent, deferred); includes stale handles
    pub fn queued(&self) -> (usize, usize) {
        (self.urgent.len(), self.deferred.len())
    }
}

impl WorkerPool for Workers {
    fn submit(&self, job: Job) -> TaskHandle {
        let task = Task::new(job);
        self.urgent.push(Arc::clone(&task));
        task
    }

    fn defer(&self, task: &TaskHandle) {
        if task.is_started() || task.set_deferred(true) {
            return;
        }
        self.deferred.push(Arc::clone(task));
    }

    fn promote(&self, task: &TaskHandle) {
        if task.is_started() || !task.set_deferred(false) {
            return;
        }
        self.urgent.push(Arc::clone(task));
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        let num_threads = self.handles.len();
        trace!("Workers shutting down ({} threads)...", num_threads);

        // Signal all workers to stop
        self.shutdown.store(true, Ordering::SeqCst);

        // Wait with timeout (500ms total for all threads)
        let deadline = Instant::now() + Duration::from_millis(500);

        let handles = std::mem::take(&mut self.handles);
        for handle in handles {
            // Poll until thread finished or timeout
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, exiting anyway");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }

        trace!("All {} workers stopped gracefully", num_threads);
    }
}
