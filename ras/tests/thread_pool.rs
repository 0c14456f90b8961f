use std::cell::RefCell;
use std::rc::Rc;

use ras::error::errno;
use ras::{Error, Storage, ThreadPoolBackend};

#[tokio::test]
async fn round_trip_through_workers() {
    let backend = ThreadPoolBackend::new(2).unwrap();
    let storage = Storage::new(backend.clone());

    let write = storage.write_async(100, b"threaded");
    assert_eq!(backend.drive().await, 2);
    write.await.unwrap();
    assert!(storage.is_opened());

    let read = storage.read_async(100, 8);
    backend.drive().await;
    assert_eq!(read.await.unwrap(), b"threaded");

    let stat = storage.stat_async();
    backend.drive().await;
    assert_eq!(stat.await.unwrap().size, 108);
}

#[tokio::test]
async fn data_requests_overlap_in_the_pool() {
    let backend = ThreadPoolBackend::new(4).unwrap();
    let storage = Storage::new(backend.clone());
    let open = storage.open_async();
    backend.drive().await;
    open.await.unwrap();

    let writes: Vec<_> = (0..4u8)
        .map(|i| storage.write_async(u64::from(i) * 4, &[i; 4]))
        .collect();
    assert_eq!(storage.pending(), 4);
    assert_eq!(backend.outstanding(), 4);

    assert_eq!(backend.drive().await, 4);
    for write in writes {
        write.await.unwrap();
    }

    let read = storage.read_async(0, 16);
    backend.drive().await;
    assert_eq!(
        read.await.unwrap(),
        vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]
    );
}

#[tokio::test]
async fn writes_past_the_region_fail() {
    let backend = ThreadPoolBackend::with_region_size(1, 16).unwrap();
    let storage = Storage::new(backend.clone());

    let write = storage.write_async(14, &[1, 2, 3, 4]);
    backend.drive().await;
    assert_eq!(write.await, Err(Error::Backend(errno::ENOSPC)));
}

#[tokio::test]
async fn destroy_frees_the_region() {
    let backend = ThreadPoolBackend::new(1).unwrap();
    let storage = Storage::new(backend.clone());

    let write = storage.write_async(0, &[7; 8]);
    let destroy = storage.destroy_async();
    backend.drive().await;

    write.await.unwrap();
    destroy.await.unwrap();
    assert!(storage.is_destroyed());
    assert_eq!(backend.outstanding(), 0);
    assert_eq!(storage.read_async(0, 1).await, Err(Error::Fault));
}

#[test]
fn wait_blocks_until_done() {
    let backend = ThreadPoolBackend::new(2).unwrap();
    let storage = Storage::new(backend.clone());
    let seen = Rc::new(RefCell::new(Vec::new()));

    storage.write(0, b"abc", |_, result| assert!(result.is_ok())).unwrap();
    let s = seen.clone();
    storage
        .read(0, 3, move |_, result| s.borrow_mut().extend_from_slice(result.unwrap()))
        .unwrap();

    assert_eq!(backend.wait(), 3);
    assert_eq!(seen.borrow().as_slice(), b"abc");
    assert!(storage.allocator_stats().is_balanced());
}

#[test]
fn poll_picks_up_finished_jobs() {
    let backend = ThreadPoolBackend::new(1).unwrap();
    let storage = Storage::new(backend.clone());
    storage.open(|_, _| {}).unwrap();

    let mut completed = 0;
    for _ in 0..1000 {
        completed += backend.poll();
        if completed > 0 {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    assert_eq!(completed, 1);
    assert!(storage.is_opened());
}
