//! Request lifecycle
//!
//! A [`Request`] is one operation travelling through a storage context:
//!
//! ```text
//!   Created ──► Queued ──► Running ──► Completed
//!      │                      ▲            ▲
//!      └──────────────────────┘            │
//!        (run immediately)     short-circuit: poisoned by a failed open,
//!                              storage not open, no handler
//! ```
//!
//! The request is moved, not shared: the queue owns it while it waits, the
//! backend owns it while it runs, and the completion pipeline owns it until
//! it is freed. [`Request::complete`] consumes the request, so a backend
//! cannot complete it twice; dropping a running request completes it with
//! [`Error::Abandoned`], so it cannot be completed zero times either.
//!
//! # Completion pipeline
//!
//! [`finish`] runs these stages in this order, exactly once per request:
//!
//! 1. record the result (`err`, `size`)
//! 2. `emit` translate lifecycle completions into emitter events
//! 3. state transition: readystate, open-failure fan-out, `pending -= 1`
//! 4. `hook` observer of the `_shared` calls
//! 5. `done` the caller's callback
//! 6. `after` release buffers taken by `before`
//! 7. free the request
//!
//! Queued requests unblocked by step 3 are run after step 7, by the
//! outermost drain loop, so one request's callbacks never interleave with
//! another's.

use std::any::Any;
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};

use tracing::{trace, warn};

use crate::allocator::Lease;
use crate::backend::{Backend, Stats};
use crate::error::{Error, Result};
use crate::idgen::RequestId;
use crate::storage::{stages_for, ReadyState, Shared, Storage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Read,
    Write,
    Delete,
    Stat,
    Open,
    Close,
    Destroy,
    None,
}

impl RequestKind {
    /// Open, close and destroy: nothing queued behind them runs until they finish.
    #[must_use]
    pub fn is_barrier(self) -> bool {
        matches!(
            self,
            RequestKind::Open | RequestKind::Close | RequestKind::Destroy
        )
    }

    #[must_use]
    pub fn is_data(self) -> bool {
        matches!(
            self,
            RequestKind::Read | RequestKind::Write | RequestKind::Delete | RequestKind::Stat
        )
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::Read => "read",
            RequestKind::Write => "write",
            RequestKind::Delete => "delete",
            RequestKind::Stat => "stat",
            RequestKind::Open => "open",
            RequestKind::Close => "close",
            RequestKind::Destroy => "destroy",
            RequestKind::None => "none",
        };
        f.write_str(name)
    }
}

/// Copy of a request without its buffers and callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub id: RequestId,
    pub kind: RequestKind,
    pub offset: u64,
    pub size: usize,
    pub error: Option<Error>,
}

/// What the observer of a `_shared` call sees.
pub struct Outcome<'a> {
    pub id: RequestId,
    pub kind: RequestKind,
    pub error: Option<&'a Error>,
    /// Bytes produced by a read.
    pub value: Option<&'a [u8]>,
    pub size: usize,
    pub shared: Option<&'a dyn Any>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Queued,
    Running,
    Completed,
}

// ============================================================================
// Callback chain
// ============================================================================

pub(crate) type BeforeFn = fn(&Storage, &mut Request) -> Result<()>;
pub(crate) type EmitFn = fn(&Storage, &Request);
pub(crate) type AfterFn = fn(&Storage, &mut Request);

/// Engine-owned stages, chosen by request kind.
#[derive(Clone, Copy, Default)]
pub(crate) struct Stages {
    pub(crate) before: Option<BeforeFn>,
    pub(crate) emit: Option<EmitFn>,
    pub(crate) after: Option<AfterFn>,
}

pub(crate) type Hook = Box<dyn FnOnce(&Outcome<'_>)>;

pub(crate) struct Observer {
    pub(crate) hook: Hook,
    pub(crate) shared: Rc<dyn Any>,
}

/// The caller's callback, typed by operation.
pub(crate) enum Done {
    Unit(Box<dyn FnOnce(&Storage, Result<()>)>),
    Read(Box<dyn FnOnce(&Storage, Result<&[u8]>)>),
    Stat(Box<dyn FnOnce(&Storage, Result<&Stats>)>),
}

impl Done {
    fn call(self, storage: &Storage, request: &Request) {
        let status = match &request.err {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        };
        match self {
            Done::Unit(done) => done(storage, status),
            Done::Read(done) => done(storage, status.map(|()| request.value())),
            Done::Stat(done) => done(
                storage,
                status.and_then(|()| request.stats.as_ref().ok_or(Error::Fault)),
            ),
        }
    }
}

// ============================================================================
// Request
// ============================================================================

pub struct Request {
    id: RequestId,
    kind: RequestKind,
    offset: u64,
    size: usize,
    err: Option<Error>,
    data: Vec<u8>,
    stats: Option<Stats>,
    phase: Phase,
    storage: Weak<Shared>,
    stages: Stages,
    done: Option<Done>,
    observer: Option<Observer>,
    record: Option<Lease>,
    buffer: Option<Lease>,
}

impl Request {
    /// Build a request bound to `storage`. Writes carry a copy of `payload`.
    pub(crate) fn new(
        storage: &Storage,
        kind: RequestKind,
        offset: u64,
        size: usize,
        payload: Option<&[u8]>,
    ) -> Result<Self> {
        let record = storage.lease(mem::size_of::<Request>())?;
        let (data, buffer) = match payload {
            Some(bytes) => (bytes.to_vec(), Some(storage.lease(bytes.len())?)),
            None => (Vec::new(), None),
        };
        Ok(Self {
            id: storage.next_id(),
            kind,
            offset,
            size,
            err: None,
            data,
            stats: None,
            phase: Phase::Created,
            storage: storage.downgrade(),
            stages: stages_for(kind),
            done: None,
            observer: None,
            record: Some(record),
            buffer,
        })
    }

    pub(crate) fn with_callbacks(mut self, done: Option<Done>, observer: Option<Observer>) -> Self {
        self.done = done;
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Byte count of the range. After completion, the size the backend reported.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes to write, or the buffer a read fills.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Move the buffer out, e.g. to hand it to another thread.
    pub fn take_data(&mut self) -> Vec<u8> {
        mem::take(&mut self.data)
    }

    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
    }

    /// The record a stat handler fills in.
    pub fn stats_mut(&mut self) -> Option<&mut Stats> {
        self.stats.as_mut()
    }

    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    /// True from admission until the completion pipeline runs.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self.phase, Phase::Queued | Phase::Running)
    }

    #[must_use]
    pub fn shared(&self) -> Option<&dyn Any> {
        self.observer.as_ref().map(|o| o.shared.as_ref())
    }

    /// The storage this request belongs to, unless it was dropped or destroyed.
    #[must_use]
    pub fn storage(&self) -> Option<Storage> {
        let storage = Storage::from_shared(self.storage.upgrade()?);
        (!storage.is_destroyed()).then_some(storage)
    }

    #[must_use]
    pub fn info(&self) -> RequestInfo {
        RequestInfo {
            id: self.id,
            kind: self.kind,
            offset: self.offset,
            size: self.size,
            error: self.err.clone(),
        }
    }

    /// Hand the result back to the storage and run the completion pipeline.
    ///
    /// `Ok(size)` is the number of bytes the operation produced or consumed.
    pub fn complete(mut self, result: Result<usize>) {
        match self.storage.upgrade() {
            Some(shared) => finish(&Storage::from_shared(shared), self, result),
            None => {
                trace!(request = %self.id, kind = %self.kind, "storage gone, completion dropped");
                self.phase = Phase::Completed;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Engine side
    // ------------------------------------------------------------------------

    pub(crate) fn belongs_to(&self, storage: &Storage) -> bool {
        self.storage.as_ptr() == storage.shared_ptr()
    }

    pub(crate) fn mark_queued(&mut self) {
        self.phase = Phase::Queued;
    }

    pub(crate) fn mark_created(&mut self) {
        self.phase = Phase::Created;
    }

    pub(crate) fn poison(&mut self, err: Error) {
        self.err = Some(err);
    }

    pub(crate) fn attach_buffer(&mut self, data: Vec<u8>, lease: Lease) {
        self.data = data;
        self.buffer = Some(lease);
    }

    pub(crate) fn attach_stats(&mut self, stats: Stats, lease: Lease) {
        self.stats = Some(stats);
        self.size = mem::size_of::<Stats>();
        self.buffer = Some(lease);
    }

    pub(crate) fn release_buffer(&mut self) {
        self.data = Vec::new();
        self.stats = None;
        self.buffer = None;
    }

    fn value(&self) -> &[u8] {
        &self.data[..self.size.min(self.data.len())]
    }

    fn outcome(&self) -> Outcome<'_> {
        Outcome {
            id: self.id,
            kind: self.kind,
            error: self.err.as_ref(),
            value: (self.kind == RequestKind::Read && self.err.is_none()).then(|| self.value()),
            size: self.size,
            shared: self.shared(),
        }
    }

    /// Move everything out, leaving `self` completed and empty.
    fn detach(&mut self) -> Request {
        Request {
            id: self.id,
            kind: self.kind,
            offset: self.offset,
            size: self.size,
            err: self.err.take(),
            data: mem::take(&mut self.data),
            stats: self.stats.take(),
            phase: mem::replace(&mut self.phase, Phase::Completed),
            storage: mem::take(&mut self.storage),
            stages: self.stages,
            done: self.done.take(),
            observer: self.observer.take(),
            record: self.record.take(),
            buffer: self.buffer.take(),
        }
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if self.phase != Phase::Running {
            return;
        }
        let Some(shared) = self.storage.upgrade() else {
            return;
        };
        warn!(request = %self.id, kind = %self.kind, "request dropped without completion");
        let orphan = self.detach();
        finish(&Storage::from_shared(shared), orphan, Err(Error::Abandoned));
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("err", &self.err)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Run
// ============================================================================

enum Route {
    Finish(Result<usize>),
    Backend(Handler),
}

#[derive(Clone, Copy)]
enum Handler {
    OpenReadOnly,
    Open,
    Read,
    Write,
    Delete,
    Stat,
    Close,
    Destroy,
}

impl Handler {
    fn invoke(self, backend: &dyn Backend, request: Request) {
        match self {
            Handler::OpenReadOnly => backend.open_read_only(request),
            Handler::Open => backend.open(request),
            Handler::Read => backend.read(request),
            Handler::Write => backend.write(request),
            Handler::Delete => backend.delete(request),
            Handler::Stat => backend.stat(request),
            Handler::Close => backend.close(request),
            Handler::Destroy => backend.destroy(request),
        }
    }
}

/// Dispatch `request` to the backend, or finish it right away.
pub(crate) fn run(storage: &Storage, mut request: Request) {
    storage.begin(request.kind);
    request.phase = Phase::Running;

    if let Some(err) = request.err.clone() {
        trace!(request = %request.id, kind = %request.kind, error = %err, "short-circuit");
        finish(storage, request, Err(err));
        return;
    }

    if let Some(before) = request.stages.before {
        if let Err(err) = before(storage, &mut request) {
            finish(storage, request, Err(err));
            return;
        }
    }

    storage.record_last(request.info());

    match route(storage, request.kind) {
        Route::Finish(result) => finish(storage, request, result),
        Route::Backend(handler) => match storage.backend() {
            Some(backend) => {
                trace!(
                    request = %request.id,
                    kind = %request.kind,
                    offset = request.offset,
                    size = request.size,
                    "dispatch"
                );
                handler.invoke(backend.as_ref(), request);
            }
            None => finish(storage, request, Err(Error::Fault)),
        },
    }
}

fn route(storage: &Storage, kind: RequestKind) -> Route {
    let state = storage.ready_state();
    let caps = storage.capabilities();
    match kind {
        RequestKind::Read | RequestKind::Write | RequestKind::Delete | RequestKind::Stat => {
            if state != ReadyState::Open {
                return Route::Finish(Err(Error::NotReady));
            }
            if !caps.supports(kind) {
                return Route::Finish(Err(Error::Unsupported(kind)));
            }
            Route::Backend(match kind {
                RequestKind::Read => Handler::Read,
                RequestKind::Write => Handler::Write,
                RequestKind::Delete => Handler::Delete,
                _ => Handler::Stat,
            })
        }
        RequestKind::Open => {
            if state == ReadyState::Open && !storage.needs_open() {
                return Route::Finish(Ok(0));
            }
            storage.set_needs_open(false);
            if storage.prefers_read_only() && caps.open_read_only {
                Route::Backend(Handler::OpenReadOnly)
            } else if caps.open {
                Route::Backend(Handler::Open)
            } else {
                Route::Finish(Ok(0))
            }
        }
        RequestKind::Close if state == ReadyState::Open && caps.close => {
            Route::Backend(Handler::Close)
        }
        RequestKind::Destroy if state != ReadyState::Destroyed && caps.destroy => {
            Route::Backend(Handler::Destroy)
        }
        RequestKind::Close | RequestKind::Destroy => Route::Finish(Ok(0)),
        RequestKind::None => Route::Finish(Err(Error::Unsupported(RequestKind::None))),
    }
}

// ============================================================================
// Completion pipeline
// ============================================================================

pub(crate) fn finish(storage: &Storage, mut request: Request, result: Result<usize>) {
    let dispatched = request.phase == Phase::Running;
    request.phase = Phase::Completed;

    match result {
        Ok(size) => request.size = size,
        Err(err) => request.err = Some(err),
    }
    trace!(request = %request.id, kind = %request.kind, error = ?request.err, size = request.size, "complete");

    if let Some(emit) = request.stages.emit {
        emit(storage, &request);
    }

    let idle = storage.settle(&request, dispatched);

    if let Some(Observer { hook, shared }) = request.observer.take() {
        hook(&Outcome {
            shared: Some(shared.as_ref()),
            ..request.outcome()
        });
    }

    if let Some(done) = request.done.take() {
        done.call(storage, &request);
    }

    if let Some(after) = request.stages.after {
        after(storage, &mut request);
    }

    drop(request);

    if idle {
        storage.drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barrier_and_data_kinds() {
        for kind in [RequestKind::Open, RequestKind::Close, RequestKind::Destroy] {
            assert!(kind.is_barrier());
            assert!(!kind.is_data());
        }
        for kind in [
            RequestKind::Read,
            RequestKind::Write,
            RequestKind::Delete,
            RequestKind::Stat,
        ] {
            assert!(kind.is_data());
            assert!(!kind.is_barrier());
        }
        assert!(!RequestKind::None.is_data());
        assert!(!RequestKind::None.is_barrier());
    }
}
