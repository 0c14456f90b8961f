//! Thread-pool backend
//!
//! Worker threads share one memory region. Requests never leave the thread
//! that owns the storage; only a plain job description crosses over:
//!
//! ```text
//!   owner thread                           worker threads
//!   ────────────                           ──────────────
//!   handler ──► outstanding[id] = request
//!           └─► job ──── std mpsc ───────► execute against the region
//!                                                 │
//!   drive()/poll()/wait() ◄── tokio mpsc ─────────┘
//!     └─► outstanding.remove(id).complete(result)
//! ```
//!
//! Completions therefore run one at a time on the owner thread, and nothing
//! happens to a request until the owner drives the backend.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::rc::Rc;
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::{Backend, Capabilities, Stats};
use crate::error::{errno, Error, Result};
use crate::request::Request;

pub const DEFAULT_REGION_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Open,
    Close,
    Destroy,
    Read,
    Write,
    Delete,
    Stat,
}

struct Job {
    id: u64,
    op: Op,
    offset: u64,
    size: usize,
    data: Vec<u8>,
}

enum Output {
    Done(usize),
    Bytes(Vec<u8>),
    Length(u64),
}

struct JobDone {
    id: u64,
    result: Result<Output>,
}

// ============================================================================
// Worker side
// ============================================================================

/// Memory shared by the workers. Allocated by the first open, freed by destroy.
#[derive(Debug, Default)]
struct Region {
    memory: Option<Vec<u8>>,
    length: u64,
}

fn span(offset: u64, size: usize, capacity: usize) -> Result<Range<usize>> {
    let start = usize::try_from(offset).map_err(|_| Error::Backend(errno::EINVAL))?;
    let end = start
        .checked_add(size)
        .ok_or(Error::Backend(errno::EINVAL))?;
    if end > capacity {
        return Err(Error::Backend(errno::ENOSPC));
    }
    Ok(start..end)
}

fn execute(region: &Mutex<Region>, capacity: usize, job: Job) -> Result<Output> {
    let mut guard = region.lock();
    let region = &mut *guard;
    if job.op == Op::Open {
        region.memory.get_or_insert_with(|| vec![0; capacity]);
        return Ok(Output::Done(0));
    }
    if job.op == Op::Destroy {
        *region = Region::default();
        return Ok(Output::Done(0));
    }
    let memory = region
        .memory
        .as_mut()
        .ok_or(Error::Backend(errno::EBADF))?;
    match job.op {
        Op::Read => {
            let range = span(job.offset, job.size, capacity)?;
            if range.end as u64 > region.length {
                return Err(Error::Backend(errno::ERANGE));
            }
            Ok(Output::Bytes(memory[range].to_vec()))
        }
        Op::Write => {
            let range = span(job.offset, job.data.len(), capacity)?;
            memory[range.clone()].copy_from_slice(&job.data);
            region.length = region.length.max(range.end as u64);
            Ok(Output::Done(range.len()))
        }
        Op::Delete => {
            let length = usize::try_from(region.length).unwrap_or(usize::MAX);
            let start = usize::try_from(job.offset).unwrap_or(usize::MAX).min(length);
            let end = start.saturating_add(job.size).min(length);
            memory[start..end].fill(0);
            Ok(Output::Done(end - start))
        }
        Op::Stat => Ok(Output::Length(region.length)),
        Op::Close | Op::Open | Op::Destroy => Ok(Output::Done(0)),
    }
}

fn worker_loop(
    index: usize,
    jobs: Arc<Mutex<std_mpsc::Receiver<Job>>>,
    region: Arc<Mutex<Region>>,
    capacity: usize,
    results: mpsc::UnboundedSender<JobDone>,
) {
    loop {
        let job = jobs.lock().recv();
        let Ok(job) = job else {
            break;
        };
        let id = job.id;
        trace!(worker = index, job = id, op = ?job.op, "running job");
        let result = execute(&region, capacity, job);
        if results.send(JobDone { id, result }).is_err() {
            break;
        }
    }
    trace!(worker = index, "worker exiting");
}

// ============================================================================
// Owner side
// ============================================================================

struct Pool {
    jobs: Option<std_mpsc::Sender<Job>>,
    results: tokio::sync::Mutex<mpsc::UnboundedReceiver<JobDone>>,
    outstanding: RefCell<HashMap<u64, Request>>,
    next_job: Cell<u64>,
    workers: Vec<JoinHandle<()>>,
    capacity: usize,
}

impl Drop for Pool {
    fn drop(&mut self) {
        drop(self.jobs.take());
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("thread pool worker panicked");
            }
        }
        self.outstanding.get_mut().clear();
    }
}

/// Storage over a fixed-size memory region served by worker threads.
///
/// Clones share the same pool: hand one to the storage and keep one to
/// drive completions.
#[derive(Clone)]
pub struct ThreadPoolBackend {
    pool: Rc<Pool>,
}

impl ThreadPoolBackend {
    /// # Errors
    ///
    /// `Backend` if a worker thread cannot be spawned.
    pub fn new(workers: usize) -> Result<Self> {
        Self::with_region_size(workers, DEFAULT_REGION_SIZE)
    }

    /// # Errors
    ///
    /// `Backend` if a worker thread cannot be spawned.
    pub fn with_region_size(workers: usize, region_size: usize) -> Result<Self> {
        let (jobs_tx, jobs_rx) = std_mpsc::channel();
        let jobs_rx = Arc::new(Mutex::new(jobs_rx));
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let region = Arc::new(Mutex::new(Region::default()));

        let mut handles = Vec::with_capacity(workers.max(1));
        for index in 0..workers.max(1) {
            let jobs = Arc::clone(&jobs_rx);
            let region = Arc::clone(&region);
            let results = results_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("ras-worker-{index}"))
                .spawn(move || worker_loop(index, jobs, region, region_size, results))?;
            handles.push(handle);
        }
        debug!(workers = handles.len(), region_size, "thread pool started");

        Ok(Self {
            pool: Rc::new(Pool {
                jobs: Some(jobs_tx),
                results: tokio::sync::Mutex::new(results_rx),
                outstanding: RefCell::new(HashMap::new()),
                next_job: Cell::new(1),
                workers: handles,
                capacity: region_size,
            }),
        })
    }

    #[must_use]
    pub fn region_size(&self) -> usize {
        self.pool.capacity
    }

    /// Requests handed to workers and not yet completed.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.pool.outstanding.borrow().len()
    }

    /// Complete requests as their results arrive, until none are outstanding.
    /// Returns how many were completed.
    pub async fn drive(&self) -> usize {
        let mut completed = 0;
        while self.outstanding() > 0 {
            let done = {
                let mut results = self.pool.results.lock().await;
                results.recv().await
            };
            let Some(done) = done else {
                break;
            };
            self.finish(done);
            completed += 1;
        }
        completed
    }

    /// Complete whatever results have already arrived, without waiting.
    pub fn poll(&self) -> usize {
        let mut completed = 0;
        loop {
            let done = match self.pool.results.try_lock() {
                Ok(mut results) => results.try_recv().ok(),
                Err(_) => None,
            };
            let Some(done) = done else {
                break;
            };
            self.finish(done);
            completed += 1;
        }
        completed
    }

    /// Blocking [`drive`](Self::drive). Must not be called from async code.
    pub fn wait(&self) -> usize {
        let mut completed = 0;
        while self.outstanding() > 0 {
            let done = self.pool.results.blocking_lock().blocking_recv();
            let Some(done) = done else {
                break;
            };
            self.finish(done);
            completed += 1;
        }
        completed
    }

    fn submit(&self, op: Op, mut request: Request) {
        let Some(jobs) = &self.pool.jobs else {
            request.complete(Err(Error::Fault));
            return;
        };
        let id = self.pool.next_job.get();
        self.pool.next_job.set(id + 1);
        let data = if op == Op::Write {
            request.take_data()
        } else {
            Vec::new()
        };
        let job = Job {
            id,
            op,
            offset: request.offset(),
            size: request.size(),
            data,
        };
        self.pool.outstanding.borrow_mut().insert(id, request);
        if jobs.send(job).is_err() {
            let request = self.pool.outstanding.borrow_mut().remove(&id);
            if let Some(request) = request {
                request.complete(Err(Error::Fault));
            }
        }
    }

    fn finish(&self, done: JobDone) {
        let request = self.pool.outstanding.borrow_mut().remove(&done.id);
        let Some(mut request) = request else {
            warn!(job = done.id, "result for unknown job");
            return;
        };
        let result = match done.result {
            Ok(Output::Done(size)) => Ok(size),
            Ok(Output::Bytes(bytes)) => {
                let size = bytes.len();
                request.set_data(bytes);
                Ok(size)
            }
            Ok(Output::Length(size)) => {
                if let Some(stats) = request.stats_mut() {
                    *stats = Stats {
                        size,
                        extended: None,
                    };
                }
                Ok(request.size())
            }
            Err(err) => Err(err),
        };
        request.complete(result);
    }
}

impl fmt::Debug for ThreadPoolBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPoolBackend")
            .field("workers", &self.pool.workers.len())
            .field("region_size", &self.pool.capacity)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

impl Backend for ThreadPoolBackend {
    fn capabilities(&self) -> Capabilities {
        Capabilities::read_write()
    }

    fn open(&self, request: Request) {
        self.submit(Op::Open, request);
    }

    fn read(&self, request: Request) {
        self.submit(Op::Read, request);
    }

    fn write(&self, request: Request) {
        self.submit(Op::Write, request);
    }

    fn delete(&self, request: Request) {
        self.submit(Op::Delete, request);
    }

    fn stat(&self, request: Request) {
        self.submit(Op::Stat, request);
    }

    fn close(&self, request: Request) {
        self.submit(Op::Close, request);
    }

    fn destroy(&self, request: Request) {
        self.submit(Op::Destroy, request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(op: Op, offset: u64, size: usize, data: &[u8]) -> Job {
        Job {
            id: 0,
            op,
            offset,
            size,
            data: data.to_vec(),
        }
    }

    #[test]
    fn region_needs_open() {
        let region = Mutex::new(Region::default());
        let err = execute(&region, 16, job(Op::Stat, 0, 0, &[])).err();
        assert_eq!(err, Some(Error::Backend(errno::EBADF)));
    }

    #[test]
    fn writes_beyond_region_are_refused() {
        let region = Mutex::new(Region::default());
        execute(&region, 16, job(Op::Open, 0, 0, &[])).unwrap();
        let err = execute(&region, 16, job(Op::Write, 14, 4, &[1, 2, 3, 4])).err();
        assert_eq!(err, Some(Error::Backend(errno::ENOSPC)));
    }

    #[test]
    fn delete_zeroes_within_length() {
        let region = Mutex::new(Region::default());
        execute(&region, 16, job(Op::Open, 0, 0, &[])).unwrap();
        execute(&region, 16, job(Op::Write, 0, 4, &[1, 2, 3, 4])).unwrap();

        let Ok(Output::Done(n)) = execute(&region, 16, job(Op::Delete, 2, 10, &[])) else {
            panic!("delete failed");
        };
        assert_eq!(n, 2);
        let Ok(Output::Bytes(bytes)) = execute(&region, 16, job(Op::Read, 0, 4, &[])) else {
            panic!("read failed");
        };
        assert_eq!(bytes, vec![1, 2, 0, 0]);
    }
}
