#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use ras::{Backend, Capabilities, Request, RequestKind, Result};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Held {
    capabilities: Capabilities,
    requests: RefCell<VecDeque<Request>>,
    log: RefCell<Vec<(RequestKind, u64)>>,
}

/// Backend that parks every request until the test completes it.
#[derive(Clone)]
pub struct DeferredBackend {
    inner: Rc<Held>,
}

impl DeferredBackend {
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::read_write())
    }

    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            inner: Rc::new(Held {
                capabilities,
                requests: RefCell::new(VecDeque::new()),
                log: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Requests currently parked.
    pub fn held(&self) -> usize {
        self.inner.requests.borrow().len()
    }

    /// Kinds of every request that reached the backend, in arrival order.
    pub fn kinds(&self) -> Vec<RequestKind> {
        self.inner.log.borrow().iter().map(|(kind, _)| *kind).collect()
    }

    pub fn offsets(&self) -> Vec<u64> {
        self.inner.log.borrow().iter().map(|(_, offset)| *offset).collect()
    }

    pub fn complete_next(&self, result: Result<usize>) -> Option<RequestKind> {
        let request = self.inner.requests.borrow_mut().pop_front()?;
        let kind = request.kind();
        request.complete(result);
        Some(kind)
    }

    /// Complete the oldest parked request after filling its buffer.
    pub fn fill_next(&self, bytes: &[u8]) -> Option<RequestKind> {
        let mut request = self.inner.requests.borrow_mut().pop_front()?;
        let kind = request.kind();
        request.set_data(bytes.to_vec());
        request.complete(Ok(bytes.len()));
        Some(kind)
    }

    /// Complete everything parked, including requests admitted meanwhile.
    pub fn complete_all(&self) -> usize {
        let mut completed = 0;
        loop {
            let request = self.inner.requests.borrow_mut().pop_front();
            let Some(request) = request else {
                break;
            };
            let size = request.size();
            request.complete(Ok(size));
            completed += 1;
        }
        completed
    }

    /// Drop the oldest parked request without completing it.
    pub fn drop_next(&self) -> Option<RequestKind> {
        let request = self.inner.requests.borrow_mut().pop_front()?;
        let kind = request.kind();
        drop(request);
        Some(kind)
    }

    fn park(&self, request: Request) {
        self.inner
            .log
            .borrow_mut()
            .push((request.kind(), request.offset()));
        self.inner.requests.borrow_mut().push_back(request);
    }
}

impl Backend for DeferredBackend {
    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities
    }

    fn open_read_only(&self, request: Request) {
        self.park(request);
    }

    fn open(&self, request: Request) {
        self.park(request);
    }

    fn read(&self, request: Request) {
        self.park(request);
    }

    fn write(&self, request: Request) {
        self.park(request);
    }

    fn delete(&self, request: Request) {
        self.park(request);
    }

    fn stat(&self, request: Request) {
        self.park(request);
    }

    fn close(&self, request: Request) {
        self.park(request);
    }

    fn destroy(&self, request: Request) {
        self.park(request);
    }
}
