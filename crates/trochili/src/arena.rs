//! Fixed-capacity slot tables addressed by generational handles.
//!
//! Every kernel object lives in a [`Slab`]. Freeing a slot bumps its
//! generation, so a handle kept past `delete` no longer resolves and the
//! caller gets an "unready" error instead of touching a recycled object.
//! A slot whose generation is exhausted is retired rather than wrapped, so
//! the table loses one slot of capacity after 65,536 reuses of it.

use alloc::vec::Vec;
use core::marker::PhantomData;

/// Typed handle into a [`Slab`].
pub trait Handle: Copy {
    #[doc(hidden)]
    fn from_parts(index: u16, generation: u16) -> Self;
    #[doc(hidden)]
    fn index(self) -> usize;
    #[doc(hidden)]
    fn generation(self) -> u16;
}

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name {
            index: u16,
            generation: u16,
        }

        impl $crate::arena::Handle for $name {
            fn from_parts(index: u16, generation: u16) -> Self {
                Self { index, generation }
            }

            fn index(self) -> usize {
                self.index as usize
            }

            fn generation(self) -> u16 {
                self.generation
            }
        }

        #[cfg(feature = "defmt")]
        impl defmt::Format for $name {
            fn format(&self, fmt: defmt::Formatter) {
                defmt::write!(fmt, "{}({}#{})", stringify!($name), self.index, self.generation);
            }
        }
    };
}

pub(crate) use handle;

struct Slot<T> {
    generation: u16,
    value: Option<T>,
}

pub(crate) struct Slab<T, H: Handle> {
    slots: Vec<Slot<T>>,
    free: Vec<u16>,
    capacity: usize,
    len: usize,
    _handle: PhantomData<H>,
}

impl<T, H: Handle> Slab<T, H> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(u16::MAX as usize);
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            capacity,
            len: 0,
            _handle: PhantomData,
        }
    }

    /// Stores `value`, returning `None` when the table is full.
    pub(crate) fn insert(&mut self, value: T) -> Option<H> {
        let index = if let Some(index) = self.free.pop() {
            index
        } else if self.slots.len() < self.capacity {
            self.slots.push(Slot {
                generation: 0,
                value: None,
            });
            (self.slots.len() - 1) as u16
        } else {
            return None;
        };

        let slot = &mut self.slots[index as usize];
        slot.value = Some(value);
        self.len += 1;
        Some(H::from_parts(index, slot.generation))
    }

    pub(crate) fn get(&self, handle: H) -> Option<&T> {
        self.slots
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.value.as_ref())
    }

    pub(crate) fn get_mut(&mut self, handle: H) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.value.as_mut())
    }

    pub(crate) fn contains(&self, handle: H) -> bool {
        self.get(handle).is_some()
    }

    pub(crate) fn remove(&mut self, handle: H) -> Option<T> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation() {
            return None;
        }
        let value = slot.value.take()?;
        match slot.generation.checked_add(1) {
            Some(generation) => {
                slot.generation = generation;
                self.free.push(handle.index() as u16);
            }
            None => log::debug!("slot {} retired", handle.index()),
        }
        self.len -= 1;
        Some(value)
    }

    /// Handle of the live object in slot `index`.
    ///
    /// # Panics
    /// Panics if the slot is vacant; queue links only ever name live slots.
    pub(crate) fn handle_at(&self, index: usize) -> H {
        match self.slots.get(index) {
            Some(slot) if slot.value.is_some() => H::from_parts(index as u16, slot.generation),
            _ => panic!("dangling link to vacant slot {index}"),
        }
    }

    /// # Panics
    /// Panics if the slot is vacant.
    pub(crate) fn at(&self, index: usize) -> &T {
        match self.slots.get(index).and_then(|slot| slot.value.as_ref()) {
            Some(value) => value,
            None => panic!("dangling link to vacant slot {index}"),
        }
    }

    /// # Panics
    /// Panics if the slot is vacant.
    pub(crate) fn at_mut(&mut self, index: usize) -> &mut T {
        match self.slots.get_mut(index).and_then(|slot| slot.value.as_mut()) {
            Some(value) => value,
            None => panic!("dangling link to vacant slot {index}"),
        }
    }

    /// Number of slots ever allocated, live or not.
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_live(&self, index: usize) -> bool {
        self.slots
            .get(index)
            .is_some_and(|slot| slot.value.is_some())
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    handle!(TestId);

    #[test]
    fn stale_handle_does_not_resolve() {
        let mut slab: Slab<u32, TestId> = Slab::with_capacity(2);
        let first = slab.insert(10).unwrap();
        assert_eq!(slab.remove(first), Some(10));

        let second = slab.insert(20).unwrap();
        assert_eq!(first.index(), second.index());
        assert_eq!(slab.get(first), None);
        assert_eq!(slab.get(second), Some(&20));
    }

    #[test]
    fn exhausted_slot_is_retired() {
        let mut slab: Slab<u32, TestId> = Slab::with_capacity(1);
        let first = slab.insert(1).unwrap();
        slab.remove(first);
        slab.slots[0].generation = u16::MAX;

        let last = slab.insert(2).unwrap();
        assert_eq!(last.generation(), u16::MAX);
        assert_eq!(slab.remove(last), Some(2));

        assert!(slab.insert(3).is_none());
        assert_eq!(slab.get(last), None);
        assert_eq!(slab.get(first), None);
        assert_eq!(slab.len(), 0);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut slab: Slab<u8, TestId> = Slab::with_capacity(1);
        assert!(slab.insert(1).is_some());
        assert!(slab.insert(2).is_none());
        assert_eq!(slab.len(), 1);
    }
}
