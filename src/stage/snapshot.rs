use parking_lot::RwLock;
use std::sync::Arc;

/// Latest-value cell that readers can load without ever seeing a partial write
///
/// Writers build a complete value and swap the pointer under a short write
/// lock; readers clone the `Arc` under a read lock and keep using it after
/// the lock is released.
pub struct SnapshotCell<T> {
    current: RwLock<Arc<T>>,
}

impl<T> SnapshotCell<T> {
    pub fn new(initial: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn load(&self) -> Arc<T> {
        Arc::clone(&self.current.read())
    }

    pub fn store(&self, value: T) {
        *self.current.write() = Arc::new(value);
    }
}

impl<T: Default> Default for SnapshotCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// A component that publishes an immutable "latest result"
pub trait Snapshottable: Send + Sync {
    type Snapshot: Send + Sync;

    fn snapshot(&self) -> Arc<Self::Snapshot>;
}
