use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, LazyLock};

/// Id 0 means "no node".
pub const NULL_ID: u32 = 0;

/// Ids advance by two: the low bit belongs to the on-disk retain-id flag.
const ID_STEP: u32 = 2;
const FIRST_ID: u32 = 4;

static GLOBAL: LazyLock<Arc<NodeIdAllocator>> =
    LazyLock::new(|| Arc::new(NodeIdAllocator::new()));

/// Hands out node ids: even, non-zero, increasing.
///
/// Allocation is atomic, so trees built on different threads from the same
/// allocator never share an id.
#[derive(Debug)]
pub struct NodeIdAllocator {
    next: AtomicU32,
}

impl NodeIdAllocator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU32::new(FIRST_ID),
        }
    }

    /// Process-wide allocator used by trees that are not given one.
    pub fn global() -> Arc<NodeIdAllocator> {
        Arc::clone(&GLOBAL)
    }

    /// `None` once the id space is used up; the allocator never wraps back
    /// to [`NULL_ID`] or reissues an id.
    pub fn allocate(&self) -> Option<u32> {
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                n.checked_add(ID_STEP)
            })
            .ok()
    }

    /// The id the next `allocate` call would return, unless the space is
    /// exhausted.
    pub fn peek(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }

    /// Makes sure `id` is never handed out again.
    pub fn observe(&self, id: u32) {
        let floor = (id & !1).saturating_add(ID_STEP);
        self.next.fetch_max(floor, Ordering::Relaxed);
    }
}

impl Default for NodeIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
