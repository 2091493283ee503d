use crate::pool::Handle;

/// User-supplied eviction callback for the reclaim driver.
///
/// On success the callback **must** have called `Pool::free` on `handle`
/// before returning; on failure it must not have touched the chunk at all.
/// The reclaim driver relies on this contract — see `Pool::reclaim_one`.
pub trait Evict: Send + Sync {
    /// Evict the still-live chunk at `handle`, reading it out through
    /// whatever decompression/writeback path the caller owns.
    fn evict(&self, handle: Handle) -> EvictResult;
}

/// Outcome of an eviction attempt. Distinct from [`crate::TcpsError`]
/// because it is caller-defined and carries no internal pool state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictResult {
    Evicted,
    Failed,
}
