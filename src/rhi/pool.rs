//! Fixed-index storage with generational slots.

use crate::rhi::handle::Handle;
use crate::rhi::rhi_enums::RhiError;

use std::marker::PhantomData;

/// How many slots a pool adds each time its free list runs dry.
const GROW_STEP: usize = 64;

/// Generational slot storage backing one handle type.
///
/// The `Tag` parameter pins the pool to a single handle type, so a buffer handle can't index
/// the image pool even though both are just `u32` pairs underneath.
///
/// Slots are handed out from a LIFO free list, so the most recently released index is the
/// next one reused. Each slot carries a generation counter that is bumped on every insert; a
/// handle is only honored while its generation matches the slot's. Once a slot's generation
/// reaches `u32::MAX` the slot is retired instead of returned to the free list, since one
/// more insert would wrap the counter and resurrect stale handles.
pub struct ResourcePool<Tag, T> {
    slots: Vec<Option<T>>,
    generations: Vec<u32>,
    free_list: Vec<u32>,
    _tag: PhantomData<fn() -> Tag>,
}

impl<Tag, T> ResourcePool<Tag, T> {
    /// Creates an empty pool. No slots are allocated until the first insert.
    pub fn new() -> Self {
        ResourcePool {
            slots: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            _tag: PhantomData,
        }
    }

    /// Stores `value` in a free slot and returns the handle naming it.
    pub fn insert(&mut self, value: T) -> Handle<Tag> {
        if self.free_list.is_empty() {
            self.grow();
        }

        let index = self.free_list.pop().expect("pool grow left the free list empty");
        let slot = index as usize;
        self.generations[slot] += 1;
        self.slots[slot] = Some(value);

        Handle::new(index, self.generations[slot])
    }

    /// Removes the resource named by `handle`, returning it.
    ///
    /// A handle whose generation no longer matches (or whose index is out of range) yields
    /// `InvalidArgument`: the resource it used to name is already gone.
    pub fn remove(&mut self, handle: Handle<Tag>) -> Result<T, RhiError> {
        let slot = self.check(handle)?;

        let value = self.slots[slot].take().ok_or(RhiError::InvalidArgument {
            reason: "handle names an empty slot",
        })?;

        // Retired slots stay off the free list forever.
        if self.generations[slot] < u32::MAX {
            self.free_list.push(handle.index());
        }

        Ok(value)
    }

    /// Looks up the resource named by `handle`. Stale or out-of-range handles return `None`.
    pub fn get(&self, handle: Handle<Tag>) -> Option<&T> {
        let slot = self.check(handle).ok()?;
        self.slots[slot].as_ref()
    }

    /// Mutable variant of [`get`](Self::get).
    pub fn get_mut(&mut self, handle: Handle<Tag>) -> Option<&mut T> {
        let slot = self.check(handle).ok()?;
        self.slots[slot].as_mut()
    }

    /// True if `handle` currently names a live resource.
    pub fn contains(&self, handle: Handle<Tag>) -> bool {
        self.get(handle).is_some()
    }

    /// Number of live resources in the pool.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// True if the pool holds no live resources.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains every live resource out of the pool, visiting each one.
    ///
    /// Used at device teardown, where all driver objects need releasing regardless of what
    /// the engine forgot to destroy.
    pub fn drain<F: FnMut(T)>(&mut self, mut visit: F) {
        for slot in 0..self.slots.len() {
            if let Some(value) = self.slots[slot].take() {
                visit(value);
                if self.generations[slot] < u32::MAX {
                    self.free_list.push(slot as u32);
                }
            }
        }
    }

    fn check(&self, handle: Handle<Tag>) -> Result<usize, RhiError> {
        let slot = handle.index() as usize;
        if slot >= self.slots.len() {
            return Err(RhiError::InvalidArgument {
                reason: "handle index out of range",
            });
        }
        if handle.generation() != self.generations[slot] {
            return Err(RhiError::InvalidArgument {
                reason: "stale handle: generation mismatch",
            });
        }
        Ok(slot)
    }

    fn grow(&mut self) {
        let old_size = self.slots.len();
        let new_size = old_size + GROW_STEP;
        assert!(new_size <= u32::MAX as usize, "pool can't grow above u32::MAX slots");

        self.slots.resize_with(new_size, || None);
        self.generations.resize(new_size, 0);

        // Pushed high-to-low so the lowest fresh index is handed out first.
        for index in (old_size..new_size).rev() {
            self.free_list.push(index as u32);
        }
    }

    #[cfg(test)]
    fn force_generation(&mut self, index: u32, generation: u32) {
        self.generations[index as usize] = generation;
    }
}

impl<Tag, T> Default for ResourcePool<Tag, T> {
    fn default() -> Self {
        ResourcePool::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::handle::BufferTag;

    type TestPool<T> = ResourcePool<BufferTag, T>;
    type TestHandle = Handle<BufferTag>;

    #[test]
    fn generational_reuse() {
        let mut pool = TestPool::new();

        let a = pool.insert("a");
        let b = pool.insert("b");
        let c = pool.insert("c");
        assert_eq!((a.index(), a.generation()), (0, 1));
        assert_eq!((b.index(), b.generation()), (1, 1));
        assert_eq!((c.index(), c.generation()), (2, 1));

        pool.remove(b).unwrap();
        let d = pool.insert("d");
        assert_eq!((d.index(), d.generation()), (1, 2));

        assert_eq!(pool.get(b), None);
        assert_eq!(pool.get(d), Some(&"d"));
    }

    #[test]
    fn create_destroy_restores_occupancy() {
        let mut pool = TestPool::new();
        assert_eq!(pool.len(), 0);

        let mut last_generation = 0;
        for _ in 0..8 {
            let handle = pool.insert(1u32);
            assert_eq!(handle.index(), 0);
            assert!(handle.generation() > last_generation);
            last_generation = handle.generation();

            assert_eq!(pool.len(), 1);
            pool.remove(handle).unwrap();
            assert_eq!(pool.len(), 0);
        }
    }

    #[test]
    fn free_list_is_lifo() {
        let mut pool = TestPool::new();
        let handles: Vec<TestHandle> = (0..4).map(|i| pool.insert(i)).collect();

        pool.remove(handles[1]).unwrap();
        pool.remove(handles[3]).unwrap();

        // Slot 3 was released last, so it comes back first.
        assert_eq!(pool.insert(10).index(), 3);
        assert_eq!(pool.insert(11).index(), 1);
    }

    #[test]
    fn stale_handles_never_hit_reused_slots() {
        let mut pool = TestPool::new();
        let first = pool.insert("first");
        pool.remove(first).unwrap();

        let second = pool.insert("second");
        assert_eq!(second.index(), first.index());

        assert_eq!(pool.get(first), None);
        assert!(pool.remove(first).is_err());
        assert_eq!(pool.get(second), Some(&"second"));
    }

    #[test]
    fn saturated_slots_are_retired() {
        let mut pool = TestPool::new();
        let handle = pool.insert(0u8);
        pool.force_generation(handle.index(), u32::MAX);
        let handle = TestHandle::new(handle.index(), u32::MAX);

        pool.remove(handle).unwrap();

        // Slot 0 must not come back; the next insert claims slot 1.
        assert_eq!(pool.insert(1u8).index(), 1);
    }

    #[test]
    fn out_of_range_lookup_is_rejected() {
        let pool: TestPool<u32> = TestPool::new();
        let bogus = TestHandle::new(1000, 1);
        assert_eq!(pool.get(bogus), None);
    }
}
