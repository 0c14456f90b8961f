//! Storage context
//!
//! The only object callers talk to. It owns the admission queue, the
//! lifecycle state and the emitter, and dispatches requests to its backend.
//!
//! ```text
//!  read/write/delete/stat ──► data admission ───┐
//!                              (implicit open)  │ queue empty and no
//!                                               │ barrier running?
//!                                               ├── yes ──► run
//!                                               └── no ───► queue ─┐
//!  open/close/destroy ──────► barrier admission ──────────► queue ─┤
//!                                                                  │
//!          drain: pop and run until a barrier is running, or the head ┘
//!                 is a barrier that must wait for in-flight data
//! ```
//!
//! A barrier (open/close/destroy) runs only when nothing else is inside the
//! backend, and nothing queued behind it runs until it completes. Data
//! requests never hold up the drain, so several of them may be in flight
//! at once, whether they were admitted directly or released from the queue.
//!
//! `Storage` is a cheap handle; clones refer to the same context. It is not
//! `Send`: completions must arrive on the thread that owns it.

use std::any::Any;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};

use tracing::{debug, info, trace, warn};

use crate::allocator::{Allocator, AllocatorStats, CountingAllocator, Lease};
use crate::backend::{Backend, Capabilities, Stats};
use crate::config::StorageConfig;
use crate::emitter::{Emitter, Event, EventArgs, EventCallback, ListenerId};
use crate::error::{Error, Result};
use crate::idgen::{IdGen, RequestId};
use crate::request::{self, Done, Observer, Outcome, Request, RequestInfo, RequestKind, Stages};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Unopened,
    Open,
    Closed,
    Destroyed,
}

struct State {
    ready: ReadyState,
    /// Set until an open is dispatched, and again after an open fails.
    needs_open: bool,
    prefer_read_only: bool,
    pending: usize,
    barrier_in_flight: bool,
    open_error: Option<Error>,
    queue: VecDeque<Request>,
    last_request: Option<RequestInfo>,
}

pub(crate) struct Shared {
    state: RefCell<State>,
    backend: RefCell<Option<Rc<dyn Backend>>>,
    capabilities: Capabilities,
    emitter: Emitter,
    allocator: Rc<dyn Allocator>,
    ids: IdGen,
    config: StorageConfig,
    draining: Cell<bool>,
}

#[derive(Clone)]
pub struct Storage {
    shared: Rc<Shared>,
}

// ============================================================================
// Construction
// ============================================================================

pub struct StorageBuilder {
    backend: Rc<dyn Backend>,
    config: StorageConfig,
    allocator: Option<Rc<dyn Allocator>>,
}

impl StorageBuilder {
    #[must_use]
    pub fn config(mut self, config: StorageConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn allocator(mut self, allocator: Rc<dyn Allocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// # Errors
    ///
    /// `InvalidConfig` if the configuration does not validate.
    pub fn build(self) -> Result<Storage> {
        self.config.validate()?;
        let allocator = self
            .allocator
            .unwrap_or_else(|| Rc::new(CountingAllocator::new()));
        Ok(Storage::assemble(self.backend, self.config, allocator))
    }
}

impl Storage {
    /// A storage with the default configuration and a counting allocator.
    pub fn new<B: Backend + 'static>(backend: B) -> Self {
        Self::assemble(
            Rc::new(backend),
            StorageConfig::default(),
            Rc::new(CountingAllocator::new()),
        )
    }

    pub fn builder<B: Backend + 'static>(backend: B) -> StorageBuilder {
        StorageBuilder {
            backend: Rc::new(backend),
            config: StorageConfig::default(),
            allocator: None,
        }
    }

    fn assemble(
        backend: Rc<dyn Backend>,
        config: StorageConfig,
        allocator: Rc<dyn Allocator>,
    ) -> Self {
        let capabilities = backend.capabilities();
        debug!(?capabilities, queue_capacity = config.queue_capacity, "storage created");
        let state = State {
            ready: ReadyState::Unopened,
            needs_open: true,
            prefer_read_only: capabilities.open_read_only,
            pending: 0,
            barrier_in_flight: false,
            open_error: None,
            queue: VecDeque::new(),
            last_request: None,
        };
        Self {
            shared: Rc::new(Shared {
                state: RefCell::new(state),
                backend: RefCell::new(Some(backend)),
                capabilities,
                emitter: Emitter::with_capacity(config.listener_capacity),
                allocator,
                ids: IdGen::new(),
                config,
                draining: Cell::new(false),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Rc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn downgrade(&self) -> Weak<Shared> {
        Rc::downgrade(&self.shared)
    }

    pub(crate) fn shared_ptr(&self) -> *const Shared {
        Rc::as_ptr(&self.shared)
    }
}

// ============================================================================
// Public operations
// ============================================================================

impl Storage {
    /// Open the backend. Calls back immediately if the storage is already
    /// open and nothing is queued.
    ///
    /// # Errors
    ///
    /// `Fault` once destroyed, `CapacityExceeded` if the queue is full.
    pub fn open<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(&Storage, Result<()>) + 'static,
    {
        self.ensure_usable()?;
        if self.open_is_settled() {
            callback(self, Ok(()));
            return Ok(());
        }
        self.submit(RequestKind::Open, 0, 0, None, Some(Done::Unit(Box::new(callback))), None)
    }

    /// `open`, plus an observer that sees the raw outcome and `shared`.
    ///
    /// # Errors
    ///
    /// Same as [`Storage::open`].
    pub fn open_shared<F, H>(&self, callback: F, hook: H, shared: Rc<dyn Any>) -> Result<()>
    where
        F: FnOnce(&Storage, Result<()>) + 'static,
        H: FnOnce(&Outcome<'_>) + 'static,
    {
        let done = Done::Unit(Box::new(callback));
        self.submit(RequestKind::Open, 0, 0, None, Some(done), observe(hook, shared))
    }

    /// Read `size` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// `Fault` once destroyed, `Unsupported` without a read handler,
    /// `CapacityExceeded` if the queue is full.
    pub fn read<F>(&self, offset: u64, size: usize, callback: F) -> Result<()>
    where
        F: FnOnce(&Storage, Result<&[u8]>) + 'static,
    {
        self.submit(RequestKind::Read, offset, size, None, Some(Done::Read(Box::new(callback))), None)
    }

    /// # Errors
    ///
    /// Same as [`Storage::read`].
    pub fn read_shared<F, H>(
        &self,
        offset: u64,
        size: usize,
        callback: F,
        hook: H,
        shared: Rc<dyn Any>,
    ) -> Result<()>
    where
        F: FnOnce(&Storage, Result<&[u8]>) + 'static,
        H: FnOnce(&Outcome<'_>) + 'static,
    {
        let done = Done::Read(Box::new(callback));
        self.submit(RequestKind::Read, offset, size, None, Some(done), observe(hook, shared))
    }

    /// Write `data` at `offset`. The bytes are copied; the caller keeps `data`.
    ///
    /// # Errors
    ///
    /// `Fault` once destroyed, `Unsupported` without a write handler,
    /// `CapacityExceeded` if the queue is full.
    pub fn write<F>(&self, offset: u64, data: &[u8], callback: F) -> Result<()>
    where
        F: FnOnce(&Storage, Result<()>) + 'static,
    {
        let done = Done::Unit(Box::new(callback));
        self.submit(RequestKind::Write, offset, data.len(), Some(data), Some(done), None)
    }

    /// # Errors
    ///
    /// Same as [`Storage::write`].
    pub fn write_shared<F, H>(
        &self,
        offset: u64,
        data: &[u8],
        callback: F,
        hook: H,
        shared: Rc<dyn Any>,
    ) -> Result<()>
    where
        F: FnOnce(&Storage, Result<()>) + 'static,
        H: FnOnce(&Outcome<'_>) + 'static,
    {
        let done = Done::Unit(Box::new(callback));
        let observer = observe(hook, shared);
        self.submit(RequestKind::Write, offset, data.len(), Some(data), Some(done), observer)
    }

    /// Erase `size` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// `Fault` once destroyed, `Unsupported` without a delete handler,
    /// `CapacityExceeded` if the queue is full.
    pub fn delete<F>(&self, offset: u64, size: usize, callback: F) -> Result<()>
    where
        F: FnOnce(&Storage, Result<()>) + 'static,
    {
        self.submit(RequestKind::Delete, offset, size, None, Some(Done::Unit(Box::new(callback))), None)
    }

    /// # Errors
    ///
    /// Same as [`Storage::delete`].
    pub fn delete_shared<F, H>(
        &self,
        offset: u64,
        size: usize,
        callback: F,
        hook: H,
        shared: Rc<dyn Any>,
    ) -> Result<()>
    where
        F: FnOnce(&Storage, Result<()>) + 'static,
        H: FnOnce(&Outcome<'_>) + 'static,
    {
        let done = Done::Unit(Box::new(callback));
        self.submit(RequestKind::Delete, offset, size, None, Some(done), observe(hook, shared))
    }

    /// # Errors
    ///
    /// `Fault` once destroyed, `Unsupported` without a stat handler,
    /// `CapacityExceeded` if the queue is full.
    pub fn stat<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(&Storage, Result<&Stats>) + 'static,
    {
        self.submit(RequestKind::Stat, 0, 0, None, Some(Done::Stat(Box::new(callback))), None)
    }

    /// # Errors
    ///
    /// Same as [`Storage::stat`].
    pub fn stat_shared<F, H>(&self, callback: F, hook: H, shared: Rc<dyn Any>) -> Result<()>
    where
        F: FnOnce(&Storage, Result<&Stats>) + 'static,
        H: FnOnce(&Outcome<'_>) + 'static,
    {
        let done = Done::Stat(Box::new(callback));
        self.submit(RequestKind::Stat, 0, 0, None, Some(done), observe(hook, shared))
    }

    /// # Errors
    ///
    /// `Fault` once destroyed, `CapacityExceeded` if the queue is full.
    pub fn close<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(&Storage, Result<()>) + 'static,
    {
        self.submit(RequestKind::Close, 0, 0, None, Some(Done::Unit(Box::new(callback))), None)
    }

    /// # Errors
    ///
    /// Same as [`Storage::close`].
    pub fn close_shared<F, H>(&self, callback: F, hook: H, shared: Rc<dyn Any>) -> Result<()>
    where
        F: FnOnce(&Storage, Result<()>) + 'static,
        H: FnOnce(&Outcome<'_>) + 'static,
    {
        let done = Done::Unit(Box::new(callback));
        self.submit(RequestKind::Close, 0, 0, None, Some(done), observe(hook, shared))
    }

    /// Close, then destroy the backend. Once the destroy succeeds the storage
    /// is unusable: requests still queued fail with `Fault`, listeners are
    /// dropped and so is the backend.
    ///
    /// # Errors
    ///
    /// `Fault` once destroyed, `CapacityExceeded` if the queue is full.
    pub fn destroy<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(&Storage, Result<()>) + 'static,
    {
        self.submit(RequestKind::Close, 0, 0, None, None, None)?;
        self.submit(RequestKind::Destroy, 0, 0, None, Some(Done::Unit(Box::new(callback))), None)
    }

    /// # Errors
    ///
    /// Same as [`Storage::destroy`].
    pub fn destroy_shared<F, H>(&self, callback: F, hook: H, shared: Rc<dyn Any>) -> Result<()>
    where
        F: FnOnce(&Storage, Result<()>) + 'static,
        H: FnOnce(&Outcome<'_>) + 'static,
    {
        self.submit(RequestKind::Close, 0, 0, None, None, None)?;
        let done = Done::Unit(Box::new(callback));
        self.submit(RequestKind::Destroy, 0, 0, None, Some(done), observe(hook, shared))
    }

    /// A request with no callbacks, for use with [`Storage::queue_push`].
    /// Write requests carry `size` zero bytes.
    ///
    /// # Errors
    ///
    /// `Fault` once destroyed or if the allocator refuses.
    pub fn new_request(&self, kind: RequestKind, offset: u64, size: usize) -> Result<Request> {
        self.ensure_usable()?;
        let zeros;
        let payload = if kind == RequestKind::Write {
            zeros = vec![0; size];
            Some(zeros.as_slice())
        } else {
            None
        };
        Request::new(self, kind, offset, size, payload)
    }

    /// Append to the admission queue and run whatever is now runnable.
    /// Returns the queue length right after the push.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the request belongs to another storage, `Fault`
    /// once destroyed, `CapacityExceeded` if the queue is full.
    pub fn queue_push(&self, request: Request) -> Result<usize> {
        let len = self.enqueue(request)?;
        self.drain();
        Ok(len)
    }

    /// Remove and return the queue head.
    pub fn queue_shift(&self) -> Option<Request> {
        let mut request = self.state_mut().queue.pop_front()?;
        request.mark_created();
        Some(request)
    }
}

fn observe<H>(hook: H, shared: Rc<dyn Any>) -> Option<Observer>
where
    H: FnOnce(&Outcome<'_>) + 'static,
{
    Some(Observer {
        hook: Box::new(hook),
        shared,
    })
}

// ============================================================================
// Events
// ============================================================================

impl Storage {
    #[must_use]
    pub fn emitter(&self) -> &Emitter {
        &self.shared.emitter
    }

    /// # Errors
    ///
    /// `Fault` once destroyed, `CapacityExceeded` if the listener table is full.
    pub fn on<F>(&self, event: Event, callback: F) -> Result<ListenerId>
    where
        F: Fn(&EventArgs) + 'static,
    {
        self.ensure_usable()?;
        self.shared.emitter.on(event, callback)
    }

    /// # Errors
    ///
    /// Same as [`Storage::on`].
    pub fn once<F>(&self, event: Event, callback: F) -> Result<ListenerId>
    where
        F: Fn(&EventArgs) + 'static,
    {
        self.ensure_usable()?;
        self.shared.emitter.once(event, callback)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.shared.emitter.off(id)
    }

    /// See [`Emitter::off_callback`].
    pub fn off_callback(&self, callback: &EventCallback) -> usize {
        self.shared.emitter.off_callback(callback)
    }

    fn announce(&self, event: Event, request: &Request) {
        if self.is_destroyed() {
            return;
        }
        match request.error() {
            None => self.shared.emitter.emit(event, None),
            Some(err) => self.shared.emitter.emit(Event::Error, Some(err.clone())),
        };
    }
}

// ============================================================================
// Queries
// ============================================================================

impl Storage {
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.state().ready
    }

    #[must_use]
    pub fn is_opened(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.ready_state() == ReadyState::Closed
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.ready_state() == ReadyState::Destroyed
    }

    #[must_use]
    pub fn needs_open(&self) -> bool {
        self.state().needs_open
    }

    #[must_use]
    pub fn prefers_read_only(&self) -> bool {
        self.state().prefer_read_only
    }

    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.shared.capabilities
    }

    #[must_use]
    pub fn readable(&self) -> bool {
        self.shared.capabilities.read
    }

    #[must_use]
    pub fn writable(&self) -> bool {
        self.shared.capabilities.write
    }

    #[must_use]
    pub fn statable(&self) -> bool {
        self.shared.capabilities.stat
    }

    #[must_use]
    pub fn deletable(&self) -> bool {
        self.shared.capabilities.delete
    }

    /// Requests waiting in the admission queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.state().queue.len()
    }

    /// Requests currently inside the backend.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state().pending
    }

    /// The most recently dispatched request.
    #[must_use]
    pub fn last_request(&self) -> Option<RequestInfo> {
        self.state().last_request.clone()
    }

    #[must_use]
    pub fn config(&self) -> &StorageConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn allocator_stats(&self) -> AllocatorStats {
        self.shared.allocator.stats()
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Storage")
            .field("ready", &state.ready)
            .field("needs_open", &state.needs_open)
            .field("pending", &state.pending)
            .field("queued", &state.queue.len())
            .field("capabilities", &self.shared.capabilities)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Clears the drain flag even if a callback panics.
struct DrainGuard<'a>(&'a Cell<bool>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Storage {
    fn state(&self) -> Ref<'_, State> {
        self.shared.state.borrow()
    }

    fn state_mut(&self) -> RefMut<'_, State> {
        self.shared.state.borrow_mut()
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::Fault);
        }
        Ok(())
    }

    fn open_is_settled(&self) -> bool {
        let state = self.state();
        state.ready == ReadyState::Open
            && !state.needs_open
            && !state.barrier_in_flight
            && state.queue.is_empty()
    }

    fn submit(
        &self,
        kind: RequestKind,
        offset: u64,
        size: usize,
        payload: Option<&[u8]>,
        done: Option<Done>,
        observer: Option<Observer>,
    ) -> Result<()> {
        self.ensure_usable()?;
        if kind.is_data() && !self.shared.capabilities.supports(kind) {
            return Err(Error::Unsupported(kind));
        }
        let request = Request::new(self, kind, offset, size, payload)?.with_callbacks(done, observer);
        if kind.is_barrier() {
            self.admit_barrier(request)
        } else {
            self.admit_data(request)
        }
    }

    fn enqueue(&self, mut request: Request) -> Result<usize> {
        if !request.belongs_to(self) {
            return Err(Error::InvalidArgument);
        }
        self.ensure_usable()?;
        let capacity = self.shared.config.queue_capacity;
        let mut state = self.state_mut();
        if state.queue.len() >= capacity {
            warn!(request = %request.id(), capacity, "admission queue full");
            return Err(Error::CapacityExceeded {
                resource: "admission queue",
                capacity,
            });
        }
        trace!(request = %request.id(), kind = %request.kind(), "queued");
        request.mark_queued();
        state.queue.push_back(request);
        Ok(state.queue.len())
    }

    fn admit_data(&self, mut request: Request) -> Result<()> {
        let implicit_open = {
            let state = self.state();
            state.needs_open && state.ready != ReadyState::Open
        };
        if implicit_open {
            trace!(request = %request.id(), "implicit open");
            self.submit(RequestKind::Open, 0, 0, None, None, None)?;
            // An open that already failed in place still owes its error to
            // the request that triggered it.
            let state = self.state();
            if !state.barrier_in_flight && state.queue.is_empty() && state.ready != ReadyState::Open {
                if let Some(err) = &state.open_error {
                    request.poison(err.clone());
                }
            }
        }

        let wait = {
            let state = self.state();
            state.barrier_in_flight || !state.queue.is_empty()
        };
        if wait {
            self.enqueue(request)?;
        } else {
            request::run(self, request);
        }
        Ok(())
    }

    fn admit_barrier(&self, request: Request) -> Result<()> {
        self.queue_push(request).map(|_| ())
    }

    /// Run queued requests in order. Stops while a barrier is running, and
    /// before a barrier while data requests are still inside the backend.
    /// Re-entrant calls return at once; the outer loop picks up their work.
    pub(crate) fn drain(&self) {
        if self.shared.draining.replace(true) {
            return;
        }
        let _guard = DrainGuard(&self.shared.draining);
        loop {
            let next = {
                let mut state = self.state_mut();
                let blocked = state.ready == ReadyState::Destroyed
                    || state.barrier_in_flight
                    || state
                        .queue
                        .front()
                        .map_or(true, |head| head.kind().is_barrier() && state.pending > 0);
                if blocked {
                    None
                } else {
                    state.queue.pop_front()
                }
            };
            let Some(request) = next else {
                break;
            };
            trace!(request = %request.id(), kind = %request.kind(), "drain");
            request::run(self, request);
        }
    }

    pub(crate) fn begin(&self, kind: RequestKind) {
        let mut state = self.state_mut();
        state.pending += 1;
        if kind.is_barrier() {
            state.barrier_in_flight = true;
        }
    }

    /// State-transition stage of the completion pipeline. Returns whether
    /// nothing is left inside the backend.
    pub(crate) fn settle(&self, request: &Request, dispatched: bool) -> bool {
        let mut state = self.state_mut();
        let kind = request.kind();
        match request.error() {
            Some(err) if kind == RequestKind::Open => {
                if !state.queue.is_empty() {
                    warn!(error = %err, queued = state.queue.len(), "open failed, failing queued requests");
                }
                for queued in &mut state.queue {
                    queued.poison(err.clone());
                }
                state.needs_open = true;
                state.open_error = Some(err.clone());
            }
            Some(_) => {}
            None => match kind {
                RequestKind::Open if state.ready != ReadyState::Destroyed => {
                    debug!(request = %request.id(), "storage open");
                    state.ready = ReadyState::Open;
                    state.open_error = None;
                }
                RequestKind::Close if state.ready == ReadyState::Open => {
                    debug!(request = %request.id(), "storage closed");
                    state.ready = ReadyState::Closed;
                }
                RequestKind::Destroy => {
                    state.ready = ReadyState::Destroyed;
                }
                _ => {}
            },
        }
        if dispatched {
            state.pending = state.pending.saturating_sub(1);
            if kind.is_barrier() {
                state.barrier_in_flight = false;
            }
        }
        state.pending == 0
    }

    /// Fail everything still queued and let go of listeners and backend.
    fn teardown(&self) {
        let orphans: Vec<Request> = self.state_mut().queue.drain(..).collect();
        if !orphans.is_empty() {
            debug!(count = orphans.len(), "failing requests queued behind destroy");
        }
        for orphan in orphans {
            request::finish(self, orphan, Err(Error::Fault));
        }
        self.shared.emitter.clear();
        let backend = self.shared.backend.borrow_mut().take();
        drop(backend);
        info!("storage destroyed");
    }

    pub(crate) fn record_last(&self, info: RequestInfo) {
        self.state_mut().last_request = Some(info);
    }

    pub(crate) fn set_needs_open(&self, needs_open: bool) {
        self.state_mut().needs_open = needs_open;
    }

    pub(crate) fn backend(&self) -> Option<Rc<dyn Backend>> {
        self.shared.backend.borrow().clone()
    }

    pub(crate) fn next_id(&self) -> RequestId {
        self.shared.ids.get_next()
    }

    pub(crate) fn lease(&self, size: usize) -> Result<Lease> {
        Lease::acquire(&self.shared.allocator, size)
    }
}

// ============================================================================
// Stages
// ============================================================================

pub(crate) fn stages_for(kind: RequestKind) -> Stages {
    match kind {
        RequestKind::Read => Stages {
            before: Some(alloc_read_buffer),
            emit: None,
            after: Some(release_buffer),
        },
        RequestKind::Write => Stages {
            after: Some(release_buffer),
            ..Stages::default()
        },
        RequestKind::Stat => Stages {
            before: Some(alloc_stats),
            emit: None,
            after: Some(release_buffer),
        },
        RequestKind::Open => Stages {
            emit: Some(emit_open),
            ..Stages::default()
        },
        RequestKind::Close => Stages {
            emit: Some(emit_close),
            ..Stages::default()
        },
        RequestKind::Destroy => Stages {
            before: None,
            emit: Some(emit_destroy),
            after: Some(after_destroy),
        },
        RequestKind::Delete | RequestKind::None => Stages::default(),
    }
}

fn alloc_read_buffer(storage: &Storage, request: &mut Request) -> Result<()> {
    let size = request.size();
    let lease = storage.lease(size)?;
    request.attach_buffer(vec![0; size], lease);
    Ok(())
}

fn alloc_stats(storage: &Storage, request: &mut Request) -> Result<()> {
    let lease = storage.lease(mem::size_of::<Stats>())?;
    request.attach_stats(Stats::default(), lease);
    Ok(())
}

fn release_buffer(_storage: &Storage, request: &mut Request) {
    request.release_buffer();
}

fn emit_open(storage: &Storage, request: &Request) {
    storage.announce(Event::Open, request);
}

fn emit_close(storage: &Storage, request: &Request) {
    storage.announce(Event::Close, request);
}

fn emit_destroy(storage: &Storage, request: &Request) {
    storage.announce(Event::Destroy, request);
}

fn after_destroy(storage: &Storage, request: &mut Request) {
    if request.error().is_none() && storage.is_destroyed() {
        storage.teardown();
    }
}
