//! Worker pool, progress reporting and deferred jobs

use crate::types::{GeoError, GeoResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

/// Receives one notification per completed unit of work (layer, tile, ...)
pub trait ProgressReporter: Send + Sync {
    fn start(&self, _description: &str, _total: usize) {}
    fn advance(&self, units: usize);
    fn finish(&self) {}
}

/// Discards progress notifications
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn advance(&self, _units: usize) {}
}

/// Logs progress in 10% steps
#[derive(Debug, Default)]
pub struct LogProgress {
    total: AtomicUsize,
    done: AtomicUsize,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressReporter for LogProgress {
    fn start(&self, description: &str, total: usize) {
        self.total.store(total, Ordering::SeqCst);
        self.done.store(0, Ordering::SeqCst);
        log::info!("{}: {} units", description, total);
    }

    fn advance(&self, units: usize) {
        let total = self.total.load(Ordering::SeqCst).max(1);
        let before = self.done.fetch_add(units, Ordering::SeqCst);
        let after = before + units;
        let step = (total / 10).max(1);
        if before / step != after / step || after >= total {
            log::info!("Progress: {:.1}%", (after.min(total) as f64 / total as f64) * 100.0);
        }
    }

    fn finish(&self) {
        log::info!("✅ Completed {} units", self.done.load(Ordering::SeqCst));
    }
}

/// Shared completed/total counter that forwards to an optional reporter
pub struct ProgressCounter {
    done: AtomicUsize,
    total: usize,
    reporter: Option<Arc<dyn ProgressReporter>>,
}

impl ProgressCounter {
    pub fn new(total: usize, reporter: Option<Arc<dyn ProgressReporter>>) -> Self {
        Self {
            done: AtomicUsize::new(0),
            total,
            reporter,
        }
    }

    /// Record one completed unit
    pub fn tick(&self) {
        self.done.fetch_add(1, Ordering::SeqCst);
        if let Some(reporter) = &self.reporter {
            reporter.advance(1);
        }
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/// Thread pool used for nearest-neighbour queries and per-layer work
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// `None` uses all available cores; builds without the `parallel`
    /// feature always run on a single thread
    pub fn new(num_threads: Option<usize>) -> GeoResult<Self> {
        let threads = if cfg!(feature = "parallel") {
            num_threads.unwrap_or(0)
        } else {
            1
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("sargeo-worker-{}", i))
            .build()
            .map_err(|e| GeoError::Processing(format!("failed to start worker pool: {}", e)))?;
        log::debug!("Worker pool started with {} threads", pool.current_num_threads());
        Ok(Self { pool })
    }

    /// Single worker, deterministic scheduling
    pub fn sequential() -> GeoResult<Self> {
        Self::new(Some(1))
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run a closure inside the pool so nested rayon iterators use its threads
    pub fn install<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(f)
    }

    fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.spawn(f)
    }
}

type Job<T> = Box<dyn FnOnce(&ProgressCounter) -> GeoResult<T> + Send + 'static>;

/// Description of work that only runs when submitted to a pool
pub struct Deferred<T> {
    description: String,
    units: usize,
    job: Job<T>,
}

impl<T: Send + 'static> Deferred<T> {
    pub fn new<F>(description: impl Into<String>, units: usize, job: F) -> Self
    where
        F: FnOnce(&ProgressCounter) -> GeoResult<T> + Send + 'static,
    {
        Self {
            description: description.into(),
            units,
            job: Box::new(job),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Units of work the job reports progress on
    pub fn units(&self) -> usize {
        self.units
    }

    /// Execute on the calling thread
    pub fn run(self, reporter: Option<Arc<dyn ProgressReporter>>) -> GeoResult<T> {
        if let Some(r) = &reporter {
            r.start(&self.description, self.units);
        }
        let counter = ProgressCounter::new(self.units, reporter.clone());
        let result = (self.job)(&counter);
        if let Some(r) = &reporter {
            r.finish();
        }
        result
    }

    /// Hand the job to the pool and return a handle for polling and waiting.
    /// Do not `wait()` on the handle from inside the same pool.
    pub fn submit(self, pool: &WorkerPool, reporter: Option<Arc<dyn ProgressReporter>>) -> JobHandle<T> {
        if let Some(r) = &reporter {
            r.start(&self.description, self.units);
        }
        let counter = Arc::new(ProgressCounter::new(self.units, reporter.clone()));
        let finished = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = mpsc::channel();

        let job = self.job;
        let job_counter = Arc::clone(&counter);
        let job_finished = Arc::clone(&finished);
        pool.spawn(move || {
            let result = job(&job_counter);
            if let Some(r) = &reporter {
                r.finish();
            }
            job_finished.store(true, Ordering::SeqCst);
            // Receiver may already be gone if the handle was dropped
            let _ = sender.send(result);
        });

        JobHandle {
            description: self.description,
            counter,
            finished,
            receiver,
        }
    }
}

/// Handle to a submitted job
pub struct JobHandle<T> {
    description: String,
    counter: Arc<ProgressCounter>,
    finished: Arc<AtomicBool>,
    receiver: mpsc::Receiver<GeoResult<T>>,
}

impl<T> JobHandle<T> {
    pub fn description(&self) -> &str {
        &self.description
    }

    /// (completed, total) units
    pub fn progress(&self) -> (usize, usize) {
        (self.counter.done(), self.counter.total())
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Block until the job completes
    pub fn wait(self) -> GeoResult<T> {
        self.receiver.recv().map_err(|_| {
            GeoError::Processing(format!("job '{}' terminated without a result", self.description))
        })?
    }
}
