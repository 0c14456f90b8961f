//! Backend interface
//!
//! A backend performs raw I/O for exactly one storage context. The storage
//! decides *when* a handler runs; the backend only decides *how*.
//!
//! Every handler receives the [`Request`] by value and must finish it with
//! [`Request::complete`], either before returning or later from the thread
//! that owns the storage. Handlers take `&self` because a synchronous
//! completion can make the storage dispatch the next queued request into the
//! same backend before the first call has returned, so a backend must not
//! hold a `RefCell` borrow across `complete`.
//!
//! Only handlers advertised in [`Capabilities`] are called. The defaults
//! below make an unadvertised `open`/`close`/`destroy` a successful no-op and
//! an unadvertised data handler an `Unsupported` failure.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::error::Error;
use crate::request::{Request, RequestKind};

pub mod memory;
pub mod mmap;
pub mod thread;

pub use memory::MemoryBackend;
pub use mmap::MmapBackend;
pub use thread::ThreadPoolBackend;

/// Which handlers a backend provides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub open_read_only: bool,
    pub open: bool,
    pub read: bool,
    pub write: bool,
    pub delete: bool,
    pub stat: bool,
    pub close: bool,
    pub destroy: bool,
}

impl Capabilities {
    /// Everything except `open_read_only`.
    #[must_use]
    pub const fn read_write() -> Self {
        Self {
            open_read_only: false,
            open: true,
            read: true,
            write: true,
            delete: true,
            stat: true,
            close: true,
            destroy: true,
        }
    }

    /// Whether the handler for a data operation is present.
    #[must_use]
    pub fn supports(&self, kind: RequestKind) -> bool {
        match kind {
            RequestKind::Read => self.read,
            RequestKind::Write => self.write,
            RequestKind::Delete => self.delete,
            RequestKind::Stat => self.stat,
            RequestKind::Open => self.open || self.open_read_only,
            RequestKind::Close => self.close,
            RequestKind::Destroy => self.destroy,
            RequestKind::None => false,
        }
    }
}

/// Result of a stat request.
#[derive(Clone, Default)]
pub struct Stats {
    /// Logical length reported by the backend.
    pub size: u64,
    /// Backend-specific details.
    pub extended: Option<Rc<dyn Any>>,
}

impl fmt::Debug for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stats")
            .field("size", &self.size)
            .field("extended", &self.extended.is_some())
            .finish()
    }
}

pub trait Backend {
    fn capabilities(&self) -> Capabilities;

    fn open_read_only(&self, request: Request) {
        request.complete(Ok(0));
    }

    fn open(&self, request: Request) {
        request.complete(Ok(0));
    }

    fn read(&self, request: Request) {
        request.complete(Err(Error::Unsupported(RequestKind::Read)));
    }

    fn write(&self, request: Request) {
        request.complete(Err(Error::Unsupported(RequestKind::Write)));
    }

    fn delete(&self, request: Request) {
        request.complete(Err(Error::Unsupported(RequestKind::Delete)));
    }

    fn stat(&self, request: Request) {
        request.complete(Err(Error::Unsupported(RequestKind::Stat)));
    }

    fn close(&self, request: Request) {
        request.complete(Ok(0));
    }

    fn destroy(&self, request: Request) {
        request.complete(Ok(0));
    }
}
