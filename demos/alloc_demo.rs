//! Small end-to-end walkthrough: build a pool, allocate and free chunks
//! across classes, then force a reclaim by evicting a page's chunks into a
//! scratch buffer. Not part of the library surface, just a worked example
//! in the spirit of `kernel`'s own standalone boot-time smoke checks.

use std::sync::OnceLock;

use tcps::page_source::SystemPageSource;
use tcps::{AllocHint, Evict, EvictResult, Handle, Pool, PoolConfig};

/// Evicts a chunk by simply freeing it back to the pool it guards, as a
/// toy stand-in for a real compressed-swap writeback path. Set up
/// two-phase (`pool` starts unset) only because the pool it evicts *into*
/// and the evictor the pool is built *with* are mutually referential.
struct LoggingEvictor<'a> {
    pool: OnceLock<&'a Pool<'a, 3>>,
}

impl Evict for LoggingEvictor<'_> {
    fn evict(&self, handle: Handle) -> EvictResult {
        println!("evicting chunk at {:#x}", handle.addr());
        self.pool.get().expect("evictor used before pool was attached").free(handle);
        EvictResult::Evicted
    }
}

fn main() {
    let pages = SystemPageSource;
    let config = PoolConfig { class_sizes: [2048, 1024, 256] };

    let pool: Pool<'_, 3> = Pool::new(config, &pages, None);

    let mut handles = Vec::new();
    for _ in 0..20 {
        handles.push(pool.alloc(200, AllocHint::Default).expect("alloc should succeed"));
    }

    println!("pool size after 20 small allocations: {} bytes", pool.size());

    for handle in handles {
        pool.free(handle);
    }

    println!("pool size after freeing all: {} bytes", pool.size());
    pool.destroy();

    let evictor = LoggingEvictor { pool: OnceLock::new() };
    let evicting_pool: Pool<'_, 3> = Pool::new(config, &pages, Some(&evictor));
    evictor.pool.set(&evicting_pool).map_err(|_| ()).expect("set exactly once");

    let _ = evicting_pool.alloc(2000, AllocHint::Default).expect("alloc should succeed");

    match evicting_pool.reclaim_one(tcps::DEFAULT_RETRY_BUDGET) {
        Ok(()) => println!("reclaimed a page"),
        Err(err) => println!("reclaim failed: {err}"),
    }

    // `evicting_pool` is intentionally left for the process to tear down;
    // its evictor holds a borrow of it for as long as both are alive.
}
