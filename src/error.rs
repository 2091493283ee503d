use core::fmt;

/// Recoverable failures surfaced by the pool's public API.
///
/// Programmer errors (double free, unaligned handle, destroying a non-empty
/// pool) are not represented here — those are fatal assertions, per the
/// "silent corruption is worse than a crash" policy this allocator is built
/// under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TcpsError {
    /// Requested size was zero, or the allocation hint was invalid for this pool.
    Invalid,
    /// Requested size exceeds the largest size class.
    NoSpace,
    /// The page-frame allocator refused to hand over a new host page.
    OutOfMemory,
    /// `reclaim_one` was called without an eviction callback, with a zero
    /// retry budget, or with no candidate page in any class.
    NoEvict,
    /// `reclaim_one` used its whole retry budget without freeing a page.
    Exhausted,
}

impl fmt::Display for TcpsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match *self {
            Self::Invalid => "invalid size or allocation hint",
            Self::NoSpace => "requested size exceeds the largest size class",
            Self::OutOfMemory => "page-frame allocator is out of memory",
            Self::NoEvict => "reclaim preconditions not met (no evictor, no retries, or no candidate page)",
            Self::Exhausted => "reclaim retry budget exhausted without freeing a page",
        };

        f.write_str(msg)
    }
}

impl core::error::Error for TcpsError {}
