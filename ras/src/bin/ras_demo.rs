//! Storage CLI Demo
//!
//! Runs a write/read/delete/stat/destroy sequence against the in-memory
//! backend with plain callbacks, then the same round trip through the
//! thread-pool backend with the async wrappers.

use ras::{Event, MemoryBackend, Storage, ThreadPoolBackend};

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ")
}

fn memory_sequence() -> Result<(), Box<dyn std::error::Error>> {
    let storage = Storage::new(MemoryBackend::new());
    storage.on(Event::Open, |_| println!("event: open"))?;
    storage.on(Event::Error, |args| println!("event: error {:?}", args.error))?;

    storage.write(15, &[0xaa, 0xbb, 0xcc, 0xdd], |_, result| {
        println!("write: {result:?}");
    })?;
    storage.read(15, 4, |_, result| match result {
        Ok(bytes) => println!("read: {}", hex(bytes)),
        Err(e) => println!("read failed: {e}"),
    })?;
    storage.delete(16, 2, |storage, result| {
        println!("delete: {result:?}");
        let _ = storage.read(15, 4, |_, result| {
            if let Ok(bytes) = result {
                println!("after delete: {}", hex(bytes));
            }
        });
    })?;
    storage.stat(|_, result| match result {
        Ok(stats) => println!("stat: size {}", stats.size),
        Err(e) => println!("stat failed: {e}"),
    })?;
    storage.destroy(|storage, result| {
        println!("destroy: {result:?}, destroyed: {}", storage.is_destroyed());
    })?;

    println!("allocator: {:?}", storage.allocator_stats());
    Ok(())
}

async fn thread_pool_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let backend = ThreadPoolBackend::new(2)?;
    let storage = Storage::new(backend.clone());

    let write = storage.write_async(0, b"hello from a worker");
    backend.drive().await;
    write.await?;

    let read = storage.read_async(0, 19);
    backend.drive().await;
    println!("thread pool read: {}", String::from_utf8_lossy(&read.await?));

    let destroy = storage.destroy_async();
    backend.drive().await;
    destroy.await?;
    println!("allocator: {:?}", storage.allocator_stats());
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    println!("ras {}", ras::version());

    memory_sequence()?;
    thread_pool_round_trip().await?;
    Ok(())
}
