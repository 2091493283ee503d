//! The pool facade and the alloc/free/map/size/reclaim state machine.
//!
//! Structurally this plays the role `kernel::heap::mod`'s `POOL_256` +
//! `alloc`/`free` free functions play for a single fixed size class,
//! generalized to `C` classes and to the whole-page reclaim protocol the
//! teacher's heap module doesn't need (its `ObjectPool` never gives pages
//! back). The per-class free list is `kernel::heap::pool::ObjectPool`'s
//! intrusive free-object list turned into an ordered set
//! ([`crate::free_set::FreeSet`]); the per-page side table is
//! [`crate::page_record`].

use core::ptr::NonNull;

use crate::arena::Arena;
use crate::error::TcpsError;
use crate::evict::{Evict, EvictResult};
use crate::free_set::{FreeSet, MIN_NODE_SIZE};
use crate::irq_lock::IrqLock;
use crate::page_record::{PageIndex, PageList, PageRecord};
use crate::page_source::{AllocHint, PageSource};
use crate::PAGE_SIZE;

/// Opaque chunk identifier. Numerically equal to the chunk's byte address,
/// wrapped so the API can't be handed a bare, unchecked `usize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Handle(usize);

impl Handle {
    /// The chunk's byte address. Exposed for logging/diagnostics; not
    /// meant to be reconstructed into a `Handle` by hand.
    #[must_use]
    pub fn addr(self) -> usize {
        self.0
    }

    fn page_base(self) -> usize {
        self.0 & !(PAGE_SIZE - 1)
    }
}

/// The fixed size-class table and the configuration asserted at pool
/// construction time. Generic over `C` (the class count) the same way
/// `kernel::heap::pool::ObjectPool` is generic over its object size.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig<const C: usize> {
    /// Strictly decreasing, each dividing [`PAGE_SIZE`], each `>=` the
    /// free-set node size. `class_sizes[0]` is the largest class.
    pub class_sizes: [usize; C],
}

impl<const C: usize> PoolConfig<C> {
    #[allow(clippy::indexing_slicing, reason = "c is a loop index into the same array being enumerated")]
    fn validate(&self) {
        assert!(C > 0, "a pool needs at least one size class");

        for (c, &size) in self.class_sizes.iter().enumerate() {
            assert!(size > 0, "class {c} has a zero size");
            assert!(PAGE_SIZE.is_multiple_of(size), "class {c} size {size} does not divide PAGE_SIZE");
            assert!(
                size >= MIN_NODE_SIZE,
                "class {c} size {size} is smaller than a free-set node ({MIN_NODE_SIZE} bytes)"
            );

            if c > 0 {
                assert!(size < self.class_sizes[c - 1], "class sizes must be strictly decreasing");
            }
        }
    }
}

/// Lock-protected pool state. Everything a concurrent `alloc`/`free`/
/// `reclaim_one` touches lives here, behind [`IrqLock`].
struct PoolState<const C: usize> {
    free: [FreeSet; C],
    page_lists: [PageList; C],
    page_index: PageIndex,
    reclaim: FreeSet,
    bytes: u64,
}

/// A snapshot of pool occupancy, beyond the bare byte count `size()`
/// returns — useful for the shrink loop deciding whether `reclaim_one` is
/// worth calling at all.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats<const C: usize> {
    pub bytes: u64,
    pub free_chunks: [usize; C],
    pub pages: [usize; C],
    pub reclaiming_chunks: usize,
}

pub struct Pool<'a, const C: usize> {
    class_sizes: [usize; C],
    pages: &'a dyn PageSource,
    evict: Option<&'a dyn Evict>,
    state: IrqLock<PoolState<C>>,
    /// Locked independently of `state`: `Arena::alloc` can itself call
    /// `pages.alloc_page` (when its own slots are full), which may block
    /// (§5), so it must never run while `state` is held.
    record_arena: IrqLock<Arena<PageRecord>>,
}

impl<'a, const C: usize> Pool<'a, C> {
    pub fn new(config: PoolConfig<C>, pages: &'a dyn PageSource, evict: Option<&'a dyn Evict>) -> Self {
        config.validate();

        Self {
            class_sizes: config.class_sizes,
            pages,
            evict,
            state: IrqLock::new(PoolState {
                free: core::array::from_fn(|_| FreeSet::new()),
                page_lists: core::array::from_fn(|_| PageList::new()),
                page_index: PageIndex::new(),
                reclaim: FreeSet::new(),
                bytes: 0,
            }),
            record_arena: IrqLock::new(Arena::new()),
        }
    }

    /// Tear down an empty pool, returning every host page to the page
    /// source.
    ///
    /// # Panics
    /// Fatally asserts if the reclaim-set is non-empty or any issued
    /// handle was never freed — both are programmer errors, not recoverable
    /// conditions (§7 of the design: "silent corruption is worse than a crash").
    #[allow(clippy::indexing_slicing, reason = "c is a loop index 0..C into a [_; C] array")]
    pub fn destroy(self) {
        let mut state = self.state.lock();

        assert!(state.reclaim.is_empty(), "Pool::destroy precondition violated: reclaim-set is not empty");

        for c in 0..C {
            let class_size = self.class_sizes[c];
            let chunks_per_page = PAGE_SIZE / class_size;

            while let Some(record) = state.page_lists[c].tail() {
                state.page_lists[c].detach(record);

                // Safety: `record` was just detached, still a live record.
                let page_base = unsafe { record.as_ref().page_base };

                for i in 0..chunks_per_page {
                    let addr = page_base + i * class_size;
                    assert!(
                        state.free[c].contains(addr),
                        "Pool::destroy precondition violated: outstanding handle {addr:#x} was never freed"
                    );
                }

                state.free[c].move_range(None, page_base, page_base + PAGE_SIZE);
                state.page_index.remove(page_base);
                self.record_arena.lock().free(record, self.pages);

                let page_ptr = core::ptr::with_exposed_provenance_mut::<u8>(page_base);
                // Safety: `page_base` is a page this pool obtained from
                // `self.pages` and is returning exactly once.
                self.pages.free_page(NonNull::new(page_ptr).expect("page_base is never null"));

                state.bytes -= PAGE_SIZE as u64;
            }
        }
    }

    /// Tightest-fit class selection: the smallest class whose size is still
    /// `>= size`. Classes are stored largest-first, so this scans from the
    /// smallest class (`C - 1`) up toward the largest (`0`) and returns the
    /// first (i.e. smallest) class that fits — see the "Open question" in
    /// the design notes on why downward/tightest-fit and not first-fit.
    #[allow(clippy::indexing_slicing, reason = "c ranges over 0..C into a [_; C] array")]
    fn select_class(&self, size: usize) -> Option<usize> {
        (0..C).rev().find(|&c| self.class_sizes[c] >= size)
    }

    /// Allocate one chunk of at least `size` bytes.
    ///
    /// # Panics
    /// Fatally asserts if the page-descriptor arena fails to allocate
    /// immediately after a page was obtained from the page source — that
    /// would mean the page source handed back a page without growing the
    /// arena's own backing storage, which never happens for `SystemPageSource`.
    ///
    /// # Errors
    /// Returns [`TcpsError::Invalid`] for a zero-byte request,
    /// [`TcpsError::NoSpace`] if no configured class is large enough, and
    /// [`TcpsError::OutOfMemory`] if the page source can't grow the pool.
    #[allow(clippy::indexing_slicing, reason = "class came from select_class, always < C")]
    pub fn alloc(&self, size: usize, hint: AllocHint) -> Result<Handle, TcpsError> {
        if size == 0 {
            return Err(TcpsError::Invalid);
        }

        let Some(class) = self.select_class(size) else {
            return Err(TcpsError::NoSpace);
        };

        let mut state = self.state.lock();

        if let Some(addr) = state.free[class].take_min() {
            return Ok(Handle(addr));
        }

        // Free-set for this class is empty: grow the pool by one page.
        // Release the lock first, `page_alloc` may block (§5).
        drop(state);

        let Some(page) = self.pages.alloc_page(hint) else {
            return Err(TcpsError::OutOfMemory);
        };

        let page_base = page.as_ptr().addr();
        debug_assert!(page_base % PAGE_SIZE == 0, "PageSource returned a misaligned page");

        let class_size = self.class_sizes[class];
        let chunks_per_page = PAGE_SIZE / class_size;

        // Allocate the page's descriptor before re-taking `state`: the arena
        // may itself call `self.pages.alloc_page` if its own slots are full,
        // which may block (§5), so it must run under its own lock only.
        let class_tag = u8::try_from(class).expect("C never exceeds u8::MAX size classes");
        let record = self
            .record_arena
            .lock()
            .alloc(PageRecord::new(page_base, class_tag), self.pages)
            .expect("page-descriptor arena should not fail right after a page was just obtained");

        let mut state = self.state.lock();

        for i in 0..chunks_per_page {
            let addr = page_base + i * class_size;
            // Safety: `addr` is freshly carved chunk memory, not yet a
            // member of any set.
            unsafe { state.free[class].insert(addr) };
        }

        state.page_index.insert(record);
        state.page_lists[class].push_head(record);
        state.bytes += PAGE_SIZE as u64;

        let addr = state.free[class]
            .take_min()
            .expect("the page we just carved has at least one free chunk");

        Ok(Handle(addr))
    }

    /// Return a chunk obtained from [`Pool::alloc`].
    ///
    /// # Panics
    /// Fatally asserts if `handle` is not aligned to its class's chunk
    /// size, or does not belong to a page this pool owns — both indicate
    /// caller corruption, not a recoverable error.
    #[allow(clippy::indexing_slicing, reason = "class comes from the handle's own PageRecord, always < C")]
    pub fn free(&self, handle: Handle) {
        let mut state = self.state.lock();

        let record = state
            .page_index
            .find(handle.page_base())
            .expect("Pool::free precondition violated: handle does not belong to this pool");

        // Safety: `record` was just looked up and is live.
        let class = usize::from(unsafe { record.as_ref().class_tag });
        // Safety: see above.
        let reclaiming = unsafe { record.as_ref().reclaim_flag };

        assert!(
            handle.0.is_multiple_of(self.class_sizes[class]),
            "Pool::free precondition violated: handle {:#x} is not aligned to class {class}'s chunk size",
            handle.0
        );

        if reclaiming {
            // Safety: `handle.0` was just removed from live state by the
            // caller (it held the only copy of this handle) and is being
            // reinserted into the appropriate set.
            unsafe { state.reclaim.insert(handle.0) };
        } else {
            // Safety: see above.
            unsafe { state.free[class].insert(handle.0) };
        }
    }

    /// A direct pointer to the chunk's bytes. No copy, no extra pinning.
    ///
    /// # Panics
    /// Never in practice: a `Handle`'s address is never null.
    #[must_use]
    pub fn map(&self, handle: Handle) -> NonNull<u8> {
        let ptr = core::ptr::with_exposed_provenance_mut::<u8>(handle.0);
        NonNull::new(ptr).expect("handle address is never null")
    }

    /// No-op; kept only so callers written against the map/unmap
    /// contract compile unchanged.
    pub fn unmap(&self, _handle: Handle) {}

    /// Total host bytes currently carved into chunks across all classes.
    pub fn size(&self) -> u64 {
        self.state.lock().bytes
    }

    /// A point-in-time occupancy snapshot.
    #[must_use]
    #[allow(clippy::indexing_slicing, reason = "c ranges over 0..C, the from_fn callback's own array length")]
    pub fn stats(&self) -> PoolStats<C> {
        let state = self.state.lock();

        PoolStats {
            bytes: state.bytes,
            free_chunks: core::array::from_fn(|c| state.free[c].len()),
            pages: core::array::from_fn(|c| state.page_lists[c].len()),
            reclaiming_chunks: state.reclaim.len(),
        }
    }

    /// Attempt to return exactly one host page to the page source by
    /// evicting its still-live chunks through the registered [`Evict`]
    /// callback, retrying victim selection up to `retries` times.
    ///
    /// See the module-level design notes for the full state machine
    /// (S1-S5); this is the Rust encoding of §4.7 of the design.
    ///
    /// # Panics
    /// Never in practice: the only `expect` here is on a page address the
    /// pool itself obtained from `self.pages`, never null.
    ///
    /// # Errors
    /// Returns [`TcpsError::NoEvict`] if no [`Evict`] callback is
    /// registered, `retries` is zero, or every page list is empty, and
    /// [`TcpsError::Exhausted`] if `retries` victim selections all land on
    /// an already-quarantined page or fail to drain.
    #[allow(clippy::indexing_slicing, reason = "class comes from select_victim, always < C")]
    #[allow(clippy::pattern_type_mismatch, reason = "destructuring PoolState's fields is needed to borrow `free` and `reclaim` disjointly; direct field access (`state.free[class]`, `&mut state.reclaim`) does not borrow-check here")]
    pub fn reclaim_one(&self, mut retries: u8) -> Result<(), TcpsError> {
        let Some(evict) = self.evict else {
            return Err(TcpsError::NoEvict);
        };

        if retries == 0 {
            return Err(TcpsError::NoEvict);
        }

        {
            let state = self.state.lock();
            if (0..C).all(|c| state.page_lists[c].is_empty()) {
                return Err(TcpsError::NoEvict);
            }
        }

        let mut cur_class = 0_usize;

        while retries > 0 {
            // S1: select victim.
            let mut state = self.state.lock();

            let Some((mut record, class)) = Self::select_victim(&mut state, &mut cur_class) else {
                return Err(TcpsError::Exhausted);
            };

            // Safety: `record` was just selected from a live page list.
            let page_base = unsafe { record.as_ref().page_base };
            let class_size = self.class_sizes[class];
            let chunks_per_page = PAGE_SIZE / class_size;

            // S2: quarantine.
            // Safety: `record` is a live record we hold the lock over.
            unsafe { record.as_mut().reclaim_flag = true };
            state.page_lists[class].detach(record);
            let PoolState { free, reclaim, .. } = &mut *state;
            free[class].move_range(Some(reclaim), page_base, page_base + PAGE_SIZE);

            drop(state); // S3 runs with the lock released (evict may block).

            // S3: evict every chunk not already drained by quarantine.
            let mut evict_failed = false;

            for i in 0..chunks_per_page {
                let addr = page_base + i * class_size;

                let already_drained = self.state.lock().reclaim.contains(addr);
                if already_drained {
                    continue;
                }

                match evict.evict(Handle(addr)) {
                    EvictResult::Evicted => {
                        // Contract: `evict` has called `Pool::free`, which
                        // folded `addr` into `reclaim` because the page's
                        // `reclaim_flag` is set.
                    }
                    EvictResult::Failed => {
                        evict_failed = true;
                        break;
                    }
                }
            }

            let mut state = self.state.lock();

            // S4: verify drained.
            let fully_drained = !evict_failed && (0..chunks_per_page).all(|i| state.reclaim.contains(page_base + i * class_size));

            if fully_drained {
                state.reclaim.move_range(None, page_base, page_base + PAGE_SIZE);

                // Safety: `record` is still a live record.
                unsafe { record.as_mut().reclaim_flag = false };

                state.page_index.remove(page_base);
                self.record_arena.lock().free(record, self.pages);
                state.bytes -= PAGE_SIZE as u64;

                drop(state);

                let page_ptr = core::ptr::with_exposed_provenance_mut::<u8>(page_base);
                // Safety: every chunk in this page has been evicted or was
                // already free; no outstanding references remain.
                self.pages.free_page(NonNull::new(page_ptr).expect("page_base is never null"));

                return Ok(());
            }

            // S5: reverse quarantine.
            // Safety: `record` is still a live record.
            unsafe { record.as_mut().reclaim_flag = false };
            let PoolState { free, reclaim, .. } = &mut *state;
            reclaim.move_range(Some(&mut free[class]), page_base, page_base + PAGE_SIZE);
            state.page_lists[class].push_head(record);

            retries -= 1;
        }

        Err(TcpsError::Exhausted)
    }

    /// Walk classes from `*cur_class` toward the smallest, picking the
    /// oldest (tail) candidate of the first non-empty, non-quarantined
    /// class. Rotates the chosen page to the head of its list so a failed
    /// retry doesn't starve the same tail page on the next selection
    /// within this class — a page reattached by S5 is, per the design
    /// notes, "a fresh candidate on the next call" and remains selectable
    /// even if it was also the previous retry's victim.
    #[allow(clippy::indexing_slicing, reason = "cur_class is held < C by the loop's own bounds check")]
    fn select_victim(state: &mut PoolState<C>, cur_class: &mut usize) -> Option<(NonNull<PageRecord>, usize)> {
        loop {
            if *cur_class >= C {
                return None;
            }

            if state.page_lists[*cur_class].is_empty() {
                *cur_class += 1;
                continue;
            }

            let tail = state.page_lists[*cur_class].tail().expect("list is non-empty");

            // Safety: `tail` is a live record from a live page list.
            let flagged = unsafe { tail.as_ref().reclaim_flag };

            if flagged {
                *cur_class += 1;
                continue;
            }

            state.page_lists[*cur_class].move_to_head(tail);

            return Some((tail, *cur_class));
        }
    }
}
