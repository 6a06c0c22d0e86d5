use crossbeam::queue::SegQueue;

/// Lock-free free-list of boxed objects.
///
/// `get` hands out a recycled instance when one is available and a fresh
/// `T::default()` otherwise. Callers reset the instance themselves; the
/// pool never inspects what it stores. At most `capacity` idle instances
/// are kept, the rest are dropped on `put`.
pub struct Pool<T> {
    free: SegQueue<Box<T>>,
    capacity: usize,
}

impl<T: Default> Pool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: SegQueue::new(),
            capacity,
        }
    }

    pub fn get(&self) -> Box<T> {
        self.free.pop().unwrap_or_default()
    }

    pub fn put(&self, item: Box<T>) {
        if self.free.len() < self.capacity {
            self.free.push(item);
        }
    }

    /// Number of idle instances currently held.
    pub fn idle(&self) -> usize {
        self.free.len()
    }
}
