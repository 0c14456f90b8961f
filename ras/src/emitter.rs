//! Event Emitter
//!
//! Synchronous listener registry used by a storage context to announce
//! lifecycle transitions.
//!
//! ```text
//!   on(event, cb, ttl) ──► [ listener table, fixed capacity ]
//!                                     │
//!   emit(event) ──► snapshot matching listeners, consume one TTL each
//!                         │
//!                         ├──► call every callback (table not borrowed)
//!                         │
//!                         └──► drop listeners whose TTL reached zero
//! ```
//!
//! Callbacks may register or remove listeners while being called. A listener
//! added during an emit is not called by that emit.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};

/// Default number of listeners a table can hold.
pub const DEFAULT_LISTENER_CAPACITY: usize = 64;

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Event {
    Error = 0xfe,
    Open = 0x103,
    Close = 0x104,
    Destroy = 0x105,
}

impl Event {
    #[must_use]
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Event::Error => "error",
            Event::Open => "open",
            Event::Close => "close",
            Event::Destroy => "destroy",
        };
        f.write_str(name)
    }
}

/// What a listener receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventArgs {
    pub event: Event,
    /// Set for [`Event::Error`].
    pub error: Option<Error>,
}

// ============================================================================
// Listeners
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    Forever,
    Times(u32),
}

impl Ttl {
    fn is_spent(self) -> bool {
        self == Ttl::Times(0)
    }

    fn consume(&mut self) {
        if let Ttl::Times(n) = self {
            *n = n.saturating_sub(1);
        }
    }
}

/// Token returned by [`Emitter::on`], used to remove that exact listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Shared listener callback. Registering the same `Rc` under several events
/// lets [`Emitter::off_callback`] remove all of them at once.
pub type EventCallback = Rc<dyn Fn(&EventArgs)>;

struct Listener {
    id: ListenerId,
    event: Event,
    ttl: Ttl,
    callback: EventCallback,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("event", &self.event)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Emitter
// ============================================================================

#[derive(Debug)]
pub struct Emitter {
    listeners: RefCell<Vec<Listener>>,
    capacity: usize,
    next_id: Cell<u64>,
}

impl Emitter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LISTENER_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            listeners: RefCell::new(Vec::with_capacity(capacity)),
            capacity,
            next_id: Cell::new(1),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a permanent listener.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` when the table is full.
    pub fn on<F>(&self, event: Event, callback: F) -> Result<ListenerId>
    where
        F: Fn(&EventArgs) + 'static,
    {
        self.on_with_ttl(event, Ttl::Forever, callback)
    }

    /// Register a listener that is removed after its first call.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` when the table is full.
    pub fn once<F>(&self, event: Event, callback: F) -> Result<ListenerId>
    where
        F: Fn(&EventArgs) + 'static,
    {
        self.on_with_ttl(event, Ttl::Times(1), callback)
    }

    /// # Errors
    ///
    /// `CapacityExceeded` when the table is full, `InvalidArgument` for
    /// `Ttl::Times(0)`.
    pub fn on_with_ttl<F>(&self, event: Event, ttl: Ttl, callback: F) -> Result<ListenerId>
    where
        F: Fn(&EventArgs) + 'static,
    {
        self.on_callback(event, ttl, Rc::new(callback))
    }

    /// Register a callback the caller keeps a handle to.
    ///
    /// # Errors
    ///
    /// Same as [`Emitter::on_with_ttl`].
    pub fn on_callback(&self, event: Event, ttl: Ttl, callback: EventCallback) -> Result<ListenerId> {
        if ttl.is_spent() {
            return Err(Error::InvalidArgument);
        }
        let mut listeners = self.listeners.borrow_mut();
        if listeners.len() >= self.capacity {
            log::warn!(
                "emitter: cannot add '{event}' listener, table full ({})",
                self.capacity
            );
            return Err(Error::CapacityExceeded {
                resource: "listener table",
                capacity: self.capacity,
            });
        }
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        listeners.push(Listener {
            id,
            event,
            ttl,
            callback,
        });
        Ok(id)
    }

    /// Remove one listener. Returns whether it was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        before != listeners.len()
    }

    /// Remove every listener registered with this callback, whatever the
    /// event. Returns how many were removed.
    pub fn off_callback(&self, callback: &EventCallback) -> usize {
        let target = Rc::as_ptr(callback).cast::<()>();
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|l| Rc::as_ptr(&l.callback).cast::<()>() != target);
        before - listeners.len()
    }

    /// Remove every listener for `event`. Returns how many were removed.
    pub fn off_event(&self, event: Event) -> usize {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|l| l.event != event);
        before - listeners.len()
    }

    pub fn clear(&self) {
        self.listeners.borrow_mut().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.borrow().is_empty()
    }

    /// Number of live listeners for `event`.
    #[must_use]
    pub fn count(&self, event: Event) -> usize {
        self.listeners
            .borrow()
            .iter()
            .filter(|l| l.event == event && !l.ttl.is_spent())
            .count()
    }

    /// Call every live listener for `event`. Returns how many were called.
    pub fn emit(&self, event: Event, error: Option<Error>) -> usize {
        let callbacks: Vec<EventCallback> = {
            let mut listeners = self.listeners.borrow_mut();
            listeners
                .iter_mut()
                .filter(|l| l.event == event && !l.ttl.is_spent())
                .map(|l| {
                    l.ttl.consume();
                    Rc::clone(&l.callback)
                })
                .collect()
        };
        log::debug!("emitter: '{event}' to {} listener(s)", callbacks.len());

        let args = EventArgs { event, error };
        for callback in &callbacks {
            callback(&args);
        }

        self.listeners.borrow_mut().retain(|l| !l.ttl.is_spent());
        callbacks.len()
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_codes() {
        assert_eq!(Event::Error.code(), 0xfe);
        assert_eq!(Event::Open.code(), 0x103);
        assert_eq!(Event::Destroy.code(), 0x105);
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let emitter = Emitter::new();
        let err = emitter
            .on_with_ttl(Event::Open, Ttl::Times(0), |_| {})
            .unwrap_err();
        assert_eq!(err, Error::InvalidArgument);
        assert!(emitter.is_empty());
    }

    #[test]
    fn finite_ttl_counts_down() {
        let emitter = Emitter::new();
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        emitter
            .on_with_ttl(Event::Close, Ttl::Times(2), move |_| h.set(h.get() + 1))
            .unwrap();

        for _ in 0..4 {
            emitter.emit(Event::Close, None);
        }
        assert_eq!(hits.get(), 2);
        assert_eq!(emitter.len(), 0);
    }
}
