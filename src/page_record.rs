//! Per-host-page side metadata and the two intrusive structures built over
//! it: a pool-wide index from page base address to its record (so
//! `Pool::free` can recover a chunk's class and reclaim state in roughly
//! constant time without reserving any bytes inside the page itself, unlike
//! `kernel::heap::chunk`'s `HeapPageHeader`, which *can* afford to reserve a
//! whole section because its host pages are 2 MiB, not 4 KiB), and a
//! per-class insertion-ordered list used as the reclaim candidate roster.
//!
//! `PageRecord`s themselves are allocated from [`crate::arena::Arena`], not
//! carved out of the chunks they describe — keeping the 4 KiB payload
//! exactly `4096 / CLASS_SIZE[c]` equal chunks, with no header tax, matches
//! the literal byte accounting the scenario tests depend on.

use core::ptr::NonNull;

pub struct PageRecord {
    pub page_base: usize,
    pub class_tag: u8,
    pub reclaim_flag: bool,

    index_left: Option<NonNull<PageRecord>>,
    index_right: Option<NonNull<PageRecord>>,
    index_priority: u32,

    list_prev: Option<NonNull<PageRecord>>,
    list_next: Option<NonNull<PageRecord>>,
}

// Safety: a `PageRecord`'s linkage fields are pointers into other
// `PageRecord`s owned by the same pool's arena; access is mediated
// entirely by the pool's own lock.
unsafe impl Send for PageRecord {}

impl PageRecord {
    #[must_use]
    pub fn new(page_base: usize, class_tag: u8) -> Self {
        Self {
            page_base,
            class_tag,
            reclaim_flag: false,
            index_left: None,
            index_right: None,
            index_priority: priority_of(page_base),
            list_prev: None,
            list_next: None,
        }
    }
}

fn priority_of(key: usize) -> u32 {
    let mut x = key as u64 ^ 0x2545_F491_4F6C_DD1D;
    x ^= x >> 33;
    x = x.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
    x ^= x >> 33;
    (x >> 32) as u32
}

/// Pool-wide treap from `page_base` to its [`PageRecord`], ordered by
/// `page_base` for the same reason [`crate::free_set::FreeSet`] is ordered
/// rather than hashed: pages tend to be allocated in runs of increasing
/// address, so a plain BST would degenerate.
#[derive(Default)]
pub struct PageIndex {
    root: Option<NonNull<PageRecord>>,
}

impl PageIndex {
    #[must_use]
    pub const fn new() -> Self {
        Self { root: None }
    }

    pub fn insert(&mut self, mut record: NonNull<PageRecord>) {
        // Safety: caller hands over a freshly allocated, not-yet-indexed record.
        unsafe { record.as_mut().index_left = None };
        // Safety: see above.
        unsafe { record.as_mut().index_right = None };

        self.root = Some(Self::insert_rec(self.root, record));
    }

    fn insert_rec(root: Option<NonNull<PageRecord>>, new: NonNull<PageRecord>) -> NonNull<PageRecord> {
        let Some(mut root) = root else { return new };

        // Safety: every node in the index was inserted by `insert` and
        // stays live until `remove`; exclusive access is held via `&mut PageIndex`.
        let new_base = unsafe { new.as_ref().page_base };
        // Safety: see above.
        let root_base = unsafe { root.as_ref().page_base };

        if new_base < root_base {
            // Safety: see above.
            let root_left = unsafe { root.as_ref().index_left };
            let new_left = Self::insert_rec(root_left, new);
            // Safety: see above.
            unsafe { root.as_mut().index_left = Some(new_left) };

            // Safety: see above.
            let new_left_priority = unsafe { new_left.as_ref().index_priority };
            // Safety: see above.
            let root_priority = unsafe { root.as_ref().index_priority };
            if new_left_priority > root_priority {
                Self::rotate_right(root)
            } else {
                root
            }
        } else {
            // Safety: see above.
            let root_right = unsafe { root.as_ref().index_right };
            let new_right = Self::insert_rec(root_right, new);
            // Safety: see above.
            unsafe { root.as_mut().index_right = Some(new_right) };

            // Safety: see above.
            let new_right_priority = unsafe { new_right.as_ref().index_priority };
            // Safety: see above.
            let root_priority = unsafe { root.as_ref().index_priority };
            if new_right_priority > root_priority {
                Self::rotate_left(root)
            } else {
                root
            }
        }
    }

    fn rotate_right(mut root: NonNull<PageRecord>) -> NonNull<PageRecord> {
        // Safety: see `insert_rec`.
        let mut new_root = unsafe { root.as_ref().index_left }.expect("rotate_right requires a left child");
        // Safety: see above.
        let new_root_right = unsafe { new_root.as_ref().index_right };
        // Safety: see above.
        unsafe { root.as_mut().index_left = new_root_right };
        // Safety: see above.
        unsafe { new_root.as_mut().index_right = Some(root) };
        new_root
    }

    fn rotate_left(mut root: NonNull<PageRecord>) -> NonNull<PageRecord> {
        // Safety: see `insert_rec`.
        let mut new_root = unsafe { root.as_ref().index_right }.expect("rotate_left requires a right child");
        // Safety: see above.
        let new_root_left = unsafe { new_root.as_ref().index_left };
        // Safety: see above.
        unsafe { root.as_mut().index_right = new_root_left };
        // Safety: see above.
        unsafe { new_root.as_mut().index_left = Some(root) };
        new_root
    }
}

// Safety: a `PageIndex` only ever holds pointers into `PageRecord` storage
// owned by the arena of the pool it belongs to; exclusive access is
// mediated entirely by the pool's own lock.
unsafe impl Send for PageIndex {}

impl PageIndex {
    #[must_use]
    pub fn find(&self, page_base: usize) -> Option<NonNull<PageRecord>> {
        let mut cur = self.root;

        while let Some(node) = cur {
            // Safety: `node` is a live record reachable through `&PageIndex`.
            let node_base = unsafe { node.as_ref().page_base };

            match page_base.cmp(&node_base) {
                core::cmp::Ordering::Equal => return Some(node),
                // Safety: see above.
                core::cmp::Ordering::Less => cur = unsafe { node.as_ref().index_left },
                // Safety: see above.
                core::cmp::Ordering::Greater => cur = unsafe { node.as_ref().index_right },
            }
        }

        None
    }

    /// Remove the record keyed by `page_base`. Precondition: present.
    pub fn remove(&mut self, page_base: usize) {
        self.root = Self::remove_rec(self.root, page_base);
    }

    fn remove_rec(root: Option<NonNull<PageRecord>>, page_base: usize) -> Option<NonNull<PageRecord>> {
        let mut root = root?;

        // Safety: see `insert_rec`.
        let root_base = unsafe { root.as_ref().page_base };

        match page_base.cmp(&root_base) {
            core::cmp::Ordering::Less => {
                // Safety: see `insert_rec`.
                let root_left = unsafe { root.as_ref().index_left };
                let new_left = Self::remove_rec(root_left, page_base);
                // Safety: see above.
                unsafe { root.as_mut().index_left = new_left };
                Some(root)
            }
            core::cmp::Ordering::Greater => {
                // Safety: see `insert_rec`.
                let root_right = unsafe { root.as_ref().index_right };
                let new_right = Self::remove_rec(root_right, page_base);
                // Safety: see above.
                unsafe { root.as_mut().index_right = new_right };
                Some(root)
            }
            core::cmp::Ordering::Equal => {
                // Safety: see `insert_rec`.
                let root_left = unsafe { root.as_ref().index_left };
                // Safety: see above.
                let root_right = unsafe { root.as_ref().index_right };
                Self::merge(root_left, root_right)
            }
        }
    }

    fn merge(left: Option<NonNull<PageRecord>>, right: Option<NonNull<PageRecord>>) -> Option<NonNull<PageRecord>> {
        let (Some(mut l), Some(mut r)) = (left, right) else {
            return left.or(right);
        };

        // Safety: see `insert_rec`.
        let l_priority = unsafe { l.as_ref().index_priority };
        // Safety: see above.
        let r_priority = unsafe { r.as_ref().index_priority };

        if l_priority > r_priority {
            // Safety: see above.
            let l_right = unsafe { l.as_ref().index_right };
            let merged = Self::merge(l_right, Some(r));
            // Safety: see above.
            unsafe { l.as_mut().index_right = merged };
            Some(l)
        } else {
            // Safety: see above.
            let r_left = unsafe { r.as_ref().index_left };
            let merged = Self::merge(Some(l), r_left);
            // Safety: see above.
            unsafe { r.as_mut().index_left = merged };
            Some(r)
        }
    }
}

/// Insertion-ordered roster of the host pages currently carved into one
/// size class, used by the reclaim driver to pick victims (tail = oldest).
#[derive(Default)]
pub struct PageList {
    head: Option<NonNull<PageRecord>>,
    tail: Option<NonNull<PageRecord>>,
    len: usize,
}

// Safety: see `PageIndex`'s `Send` impl above — same ownership shape.
unsafe impl Send for PageList {}

impl PageList {
    #[must_use]
    pub const fn new() -> Self {
        Self { head: None, tail: None, len: 0 }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Insert `record` as the newest candidate (the head).
    pub fn push_head(&mut self, mut record: NonNull<PageRecord>) {
        // Safety: `record` is not currently a member of any list.
        unsafe { record.as_mut().list_prev = None };
        // Safety: see above.
        unsafe { record.as_mut().list_next = self.head };

        if let Some(mut old_head) = self.head {
            // Safety: `old_head` is a live list member.
            unsafe { old_head.as_mut().list_prev = Some(record) };
        } else {
            self.tail = Some(record);
        }

        self.head = Some(record);
        self.len += 1;
    }

    /// The oldest candidate, without removing it.
    #[must_use]
    pub fn tail(&self) -> Option<NonNull<PageRecord>> {
        self.tail
    }

    /// Detach `record` from wherever it currently sits in the list.
    pub fn detach(&mut self, mut record: NonNull<PageRecord>) {
        // Safety: `record` is a current member of this list.
        let prev = unsafe { record.as_ref().list_prev };
        // Safety: see above.
        let next = unsafe { record.as_ref().list_next };

        match prev {
            // Safety: `p` is a live list member.
            Some(mut p) => unsafe { p.as_mut().list_next = next },
            None => self.head = next,
        }

        match next {
            // Safety: `n` is a live list member.
            Some(mut n) => unsafe { n.as_mut().list_prev = prev },
            None => self.tail = prev,
        }

        // Safety: `record` is being removed from the list; clear its stale linkage.
        unsafe { record.as_mut().list_prev = None };
        // Safety: see above.
        unsafe { record.as_mut().list_next = None };

        self.len -= 1;
    }

    /// Move `record` (already a member) to the head, making it the newest candidate.
    pub fn move_to_head(&mut self, record: NonNull<PageRecord>) {
        if self.head == Some(record) {
            return;
        }

        self.detach(record);
        self.push_head(record);
    }
}
