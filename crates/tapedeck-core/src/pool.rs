//! Pre-allocated object pools.
//!
//! All pools allocate their objects up front; `alloc` never touches the
//! system allocator, it only moves a `Box` out of a free list. An empty
//! pool returns `None` and bumps a drop counter rather than blocking or
//! growing.

use crate::lockfree::AtomicCounter;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use std::sync::Arc;

/// Single-threaded pool: alloc and release happen on the owning thread.
///
/// Used for objects whose whole lifecycle stays on the audio thread,
/// such as transport FSM events.
pub struct Pool<T> {
    name: &'static str,
    free: Vec<Box<T>>,
    capacity: usize,
    drops: AtomicCounter,
}

impl<T> Pool<T> {
    pub fn with_capacity(name: &'static str, capacity: usize, init: impl Fn() -> T) -> Self {
        let mut free = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            free.push(Box::new(init()));
        }
        Self {
            name,
            free,
            capacity,
            drops: AtomicCounter::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Failed allocation count since creation.
    pub fn drop_count(&self) -> u64 {
        self.drops.get()
    }

    #[inline]
    pub fn alloc(&mut self) -> Option<Box<T>> {
        let item = self.free.pop();
        if item.is_none() {
            self.drops.bump();
        }
        item
    }

    /// Return an item to the free list.
    ///
    /// The item must have come from this pool; releasing more items than
    /// `capacity` indicates a foreign pointer and is a caller bug.
    #[inline]
    pub fn release(&mut self, item: Box<T>) {
        debug_assert!(
            self.free.len() < self.capacity,
            "pool {}: released more items than allocated",
            self.name
        );
        if self.free.len() < self.capacity {
            self.free.push(item);
        }
    }
}

/// Pool allowing allocation from any thread with releases funnelled
/// through a single consuming thread.
///
/// Both sides are wait-free channel operations. The release contract is
/// one releasing thread at a time, which in practice is the audio thread
/// freeing events it has finished processing.
pub struct MultiAllocSingleReleasePool<T> {
    name: &'static str,
    free_tx: Sender<Box<T>>,
    free_rx: Receiver<Box<T>>,
    capacity: usize,
    drops: Arc<AtomicCounter>,
}

impl<T> MultiAllocSingleReleasePool<T> {
    pub fn with_capacity(name: &'static str, capacity: usize, init: impl Fn() -> T) -> Self {
        let (free_tx, free_rx) = bounded(capacity);
        for _ in 0..capacity {
            free_tx
                .try_send(Box::new(init()))
                .unwrap_or_else(|_| unreachable!("seeding a fresh pool cannot fail"));
        }
        Self {
            name,
            free_tx,
            free_rx,
            capacity,
            drops: Arc::new(AtomicCounter::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn drop_count(&self) -> u64 {
        self.drops.get()
    }

    #[inline]
    pub fn alloc(&self) -> Option<Box<T>> {
        match self.free_rx.try_recv() {
            Ok(item) => Some(item),
            Err(_) => {
                self.drops.bump();
                None
            }
        }
    }

    #[inline]
    pub fn release(&self, item: Box<T>) {
        match self.free_tx.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug_assert!(false, "pool {}: foreign item released", self.name);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Owner side of a per-thread pool.
///
/// The owning thread allocs and frees locally; other threads hand items
/// back through a [`PoolReturn`]. Returned items are folded into the free
/// list on the next `alloc`.
pub struct CrossThreadPool<T> {
    name: &'static str,
    free: Vec<Box<T>>,
    capacity: usize,
    returns_rx: Receiver<Box<T>>,
    returns_tx: Sender<Box<T>>,
    drops: AtomicCounter,
}

impl<T> CrossThreadPool<T> {
    fn with_capacity(name: &'static str, capacity: usize, init: &dyn Fn() -> T) -> Self {
        let (returns_tx, returns_rx) = bounded(capacity);
        let mut free = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            free.push(Box::new(init()));
        }
        Self {
            name,
            free,
            capacity,
            returns_rx,
            returns_tx,
            drops: AtomicCounter::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn drop_count(&self) -> u64 {
        self.drops.get()
    }

    /// Handle other threads use to push freed items back.
    pub fn handle(&self) -> PoolReturn<T> {
        PoolReturn {
            tx: self.returns_tx.clone(),
        }
    }

    fn drain_returns(&mut self) {
        while let Ok(item) = self.returns_rx.try_recv() {
            if self.free.len() < self.capacity {
                self.free.push(item);
            }
        }
    }

    #[inline]
    pub fn alloc(&mut self) -> Option<Box<T>> {
        if self.free.is_empty() {
            self.drain_returns();
        }
        let item = self.free.pop();
        if item.is_none() {
            self.drops.bump();
        }
        item
    }

    /// Owner-side free.
    #[inline]
    pub fn release(&mut self, item: Box<T>) {
        if self.free.len() < self.capacity {
            self.free.push(item);
        }
    }
}

/// Cross-thread return path for a [`CrossThreadPool`].
#[derive(Clone)]
pub struct PoolReturn<T> {
    tx: Sender<Box<T>>,
}

impl<T> PoolReturn<T> {
    /// Hand a freed item back to the owning pool.
    ///
    /// If the owner is gone or its return ring is full the item is simply
    /// dropped; the memory goes back to the allocator instead of the pool.
    #[inline]
    pub fn push(&self, item: Box<T>) {
        let _ = self.tx.try_send(item);
    }
}

/// Factory for per-thread pools plus a trash channel collecting pools
/// whose owning thread has exited, for deferred teardown.
pub struct PerThreadPool<T> {
    name: &'static str,
    capacity: usize,
    trash_tx: Sender<CrossThreadPool<T>>,
    trash_rx: Receiver<CrossThreadPool<T>>,
}

impl<T> PerThreadPool<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (trash_tx, trash_rx) = unbounded();
        Self {
            name,
            capacity,
            trash_tx,
            trash_rx,
        }
    }

    /// Create a pool for one participating thread. The thread keeps
    /// ownership for its lifetime.
    pub fn create_pool(&self, init: impl Fn() -> T) -> CrossThreadPool<T> {
        CrossThreadPool::with_capacity(self.name, self.capacity, &init)
    }

    /// Park the pool of an exiting thread. Items still in flight through
    /// its return ring stay alive until the trash is drained.
    pub fn add_to_trash(&self, pool: CrossThreadPool<T>) {
        let _ = self.trash_tx.send(pool);
    }

    /// Drop all parked pools. Call from a teardown path.
    pub fn drain_trash(&self) -> usize {
        let mut n = 0;
        while self.trash_rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }
}
