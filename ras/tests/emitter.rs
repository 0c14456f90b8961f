use std::cell::Cell;
use std::rc::Rc;

use ras::{Emitter, Error, Event, EventCallback, MemoryBackend, Storage, Ttl};

fn counter() -> (Rc<Cell<u32>>, impl Fn(&ras::EventArgs)) {
    let count = Rc::new(Cell::new(0));
    let c = count.clone();
    (count, move |_: &ras::EventArgs| c.set(c.get() + 1))
}

#[test]
fn once_listener_fires_once() {
    let emitter = Emitter::new();
    let (count, listener) = counter();
    emitter.once(Event::Open, listener).unwrap();

    for _ in 0..3 {
        emitter.emit(Event::Open, None);
    }
    assert_eq!(count.get(), 1);
    assert!(emitter.is_empty());
}

#[test]
fn ttl_counts_down() {
    let emitter = Emitter::new();
    let (count, listener) = counter();
    emitter.on_with_ttl(Event::Close, Ttl::Times(2), listener).unwrap();

    assert_eq!(emitter.emit(Event::Close, None), 1);
    assert_eq!(emitter.count(Event::Close), 1);
    assert_eq!(emitter.emit(Event::Close, None), 1);
    assert_eq!(emitter.emit(Event::Close, None), 0);
    assert_eq!(count.get(), 2);

    assert_eq!(
        emitter.on_with_ttl(Event::Close, Ttl::Times(0), |_| {}),
        Err(Error::InvalidArgument)
    );
}

#[test]
fn only_matching_event_is_delivered() {
    let emitter = Emitter::new();
    let (opens, on_open) = counter();
    let (errors, on_error) = counter();
    emitter.on(Event::Open, on_open).unwrap();
    emitter.on(Event::Error, on_error).unwrap();

    emitter.emit(Event::Error, Some(Error::Backend(5)));
    emitter.emit(Event::Error, Some(Error::Fault));
    assert_eq!(opens.get(), 0);
    assert_eq!(errors.get(), 2);
}

#[test]
fn error_listener_receives_the_error() {
    let emitter = Emitter::new();
    let seen = Rc::new(Cell::new(0));
    let s = seen.clone();
    emitter
        .on(Event::Error, move |args| {
            s.set(args.error.as_ref().map_or(0, Error::code));
        })
        .unwrap();

    emitter.emit(Event::Error, Some(Error::Backend(28)));
    assert_eq!(seen.get(), 28);
}

#[test]
fn full_table_is_refused() {
    let emitter = Emitter::with_capacity(2);
    emitter.on(Event::Open, |_| {}).unwrap();
    emitter.on(Event::Open, |_| {}).unwrap();

    assert_eq!(
        emitter.on(Event::Open, |_| {}),
        Err(Error::CapacityExceeded {
            resource: "listener table",
            capacity: 2,
        })
    );
}

#[test]
fn off_removes_one_listener() {
    let emitter = Emitter::new();
    let (count, listener) = counter();
    let id = emitter.on(Event::Destroy, listener).unwrap();
    emitter.on(Event::Destroy, |_| {}).unwrap();

    assert!(emitter.off(id));
    assert!(!emitter.off(id));
    assert_eq!(emitter.emit(Event::Destroy, None), 1);
    assert_eq!(count.get(), 0);
    assert_eq!(emitter.off_event(Event::Destroy), 1);
    assert!(emitter.is_empty());
}

#[test]
fn off_callback_removes_every_registration() {
    let emitter = Emitter::new();
    let (count, listener) = counter();
    let shared: EventCallback = Rc::new(listener);
    let (other_count, other) = counter();

    emitter.on_callback(Event::Open, Ttl::Forever, shared.clone()).unwrap();
    emitter.on_callback(Event::Close, Ttl::Times(3), shared.clone()).unwrap();
    emitter.on(Event::Open, other).unwrap();

    assert_eq!(emitter.off_callback(&shared), 2);
    assert_eq!(emitter.off_callback(&shared), 0);
    emitter.emit(Event::Open, None);
    emitter.emit(Event::Close, None);
    assert_eq!(count.get(), 0);
    assert_eq!(other_count.get(), 1);
    assert_eq!(emitter.len(), 1);
}

#[test]
fn storage_listener_removed_by_callback() {
    let storage = Storage::new(MemoryBackend::new());
    let (count, listener) = counter();
    let callback: EventCallback = Rc::new(listener);
    storage
        .emitter()
        .on_callback(Event::Open, Ttl::Forever, callback.clone())
        .unwrap();

    assert_eq!(storage.off_callback(&callback), 1);
    storage.open(|_, _| {}).unwrap();
    assert!(storage.is_opened());
    assert_eq!(count.get(), 0);
}

#[test]
fn listener_may_register_another_while_emitting() {
    let emitter = Rc::new(Emitter::new());
    let (count, listener) = counter();
    let listener = Rc::new(listener);

    let e = Rc::downgrade(&emitter);
    emitter
        .once(Event::Open, move |_| {
            if let Some(emitter) = e.upgrade() {
                let l = listener.clone();
                emitter.on(Event::Open, move |args| (*l)(args)).unwrap();
            }
        })
        .unwrap();

    assert_eq!(emitter.emit(Event::Open, None), 1);
    assert_eq!(count.get(), 0);
    assert_eq!(emitter.emit(Event::Open, None), 1);
    assert_eq!(count.get(), 1);
}
