//! `ResourceAcquirer`: the per-request scoped bag that lends buffers and
//! typed objects out of shared `FreeList`s and returns every one of them
//! exactly once when the request exits (spec.md §4.7).
//!
//! Rather than handing ownership of a lent item to the caller (which
//! would let it escape the acquirer's scope and break the
//! return-exactly-once contract), `acquire` returns a typed handle; the
//! item is reached back through the acquirer with `get_mut`. Return
//! happens once, in `Drop`, which is the idiomatic replacement for a
//! runtime "double-return is a programming error" check: ownership rules
//! make a second return impossible to express.

use crate::free_list::FreeList;
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

type Returner = Box<dyn FnOnce(Box<dyn Any + Send>) + Send>;

struct Slot {
    item: Box<dyn Any + Send>,
    returner: Returner,
}

/// Opaque reference to an object lent out by a `ResourceAcquirer`.
pub struct ResourceHandle<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ResourceHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for ResourceHandle<T> {}

pub struct ResourceAcquirer {
    container_pool: Arc<FreeList<Vec<u8>>>,
    container: Vec<u8>,
    slots: Vec<Slot>,
}

impl ResourceAcquirer {
    /// Acquires the untyped container buffer from `container_pool`,
    /// calling `Vec::new` if the pool has nothing idle.
    pub fn new(container_pool: Arc<FreeList<Vec<u8>>>) -> Self {
        let container = container_pool.take_or_else(Vec::new);
        Self {
            container_pool,
            container,
            slots: Vec::new(),
        }
    }

    /// Lends one `T` out of `pool`, running `factory` only if the pool
    /// is empty.
    pub fn acquire<T: Send + 'static>(
        &mut self,
        pool: &Arc<FreeList<T>>,
        factory: impl FnOnce() -> T,
    ) -> ResourceHandle<T> {
        let item = pool.take_or_else(factory);
        let pool = Arc::clone(pool);
        let returner: Returner = Box::new(move |boxed| {
            if let Ok(value) = boxed.downcast::<T>() {
                pool.give_back(*value);
            }
        });
        self.slots.push(Slot {
            item: Box::new(item),
            returner,
        });
        ResourceHandle {
            index: self.slots.len() - 1,
            _marker: PhantomData,
        }
    }

    pub fn get_mut<T: Send + 'static>(&mut self, handle: ResourceHandle<T>) -> &mut T {
        self.slots[handle.index]
            .item
            .downcast_mut::<T>()
            .expect("resource handle type mismatch")
    }

    pub fn container_mut(&mut self) -> &mut Vec<u8> {
        &mut self.container
    }

    pub fn acquired_count(&self) -> usize {
        self.slots.len()
    }
}

impl Drop for ResourceAcquirer {
    fn drop(&mut self) {
        for slot in self.slots.drain(..) {
            (slot.returner)(slot.item);
        }
        let mut container = std::mem::take(&mut self.container);
        container.clear();
        self.container_pool.give_back(container);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_acquired_object_is_returned_on_drop() {
        let pool: Arc<FreeList<u64>> = Arc::new(FreeList::new());
        pool.give_back(1);
        pool.give_back(2);
        let container_pool: Arc<FreeList<Vec<u8>>> = Arc::new(FreeList::new());
        let before = pool.idle_count();

        {
            let mut acquirer = ResourceAcquirer::new(container_pool.clone());
            let a = acquirer.acquire(&pool, || unreachable!("pool had idle items"));
            let b = acquirer.acquire(&pool, || unreachable!("pool had idle items"));
            *acquirer.get_mut(a) += 10;
            *acquirer.get_mut(b) += 20;
            assert_eq!(acquirer.acquired_count(), 2);
        }

        assert_eq!(pool.idle_count(), before);
        assert_eq!(container_pool.idle_count(), 1);
    }

    #[test]
    fn factory_runs_only_when_pool_is_empty() {
        let pool: Arc<FreeList<u64>> = Arc::new(FreeList::new());
        let container_pool: Arc<FreeList<Vec<u8>>> = Arc::new(FreeList::new());
        let mut acquirer = ResourceAcquirer::new(container_pool);
        let mut calls = 0;
        let handle = acquirer.acquire(&pool, || {
            calls += 1;
            7
        });
        assert_eq!(*acquirer.get_mut(handle), 7);
        assert_eq!(calls, 1);
    }
}
