//! Generation-checked slot arena.
//!
//! Entries are addressed by a [`Handle`] of `(index, generation)`. Removing
//! an entry bumps its slot's generation, so a handle kept past removal is
//! recognized as stale instead of silently aliasing whatever reuses the slot.
//! New entries take the lowest vacant slot.

use alloc::vec::Vec;
use core::fmt;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    len: usize,
    capacity: usize,
}

impl<T> Arena<T> {
    /// An empty arena holding at most `capacity` live entries.
    #[must_use]
    pub const fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
            capacity,
        }
    }

    /// Store `value`, or hand it back if the arena is full.
    ///
    /// # Errors
    /// Returns `value` unchanged when `capacity` entries are already live.
    pub fn insert(&mut self, value: T) -> Result<Handle, T> {
        if self.len >= self.capacity {
            return Err(value);
        }
        let index = match self.slots.iter().position(|s| s.value.is_none()) {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                self.slots.len() - 1
            }
        };
        let slot = &mut self.slots[index];
        slot.value = Some(value);
        self.len += 1;
        #[allow(clippy::cast_possible_truncation)]
        let handle = Handle {
            index: index as u32,
            generation: slot.generation,
        };
        Ok(handle)
    }

    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.value.as_ref())
    }

    #[must_use]
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.value.as_mut())
    }

    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// Remove and return the entry; `None` for a stale or unknown handle.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.len -= 1;
        Some(value)
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            #[allow(clippy::cast_possible_truncation)]
            let handle = Handle {
                index: i as u32,
                generation: s.generation,
            };
            s.value.as_ref().map(|v| (handle, v))
        })
    }

    /// Live entries in slot order, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, s)| {
            #[allow(clippy::cast_possible_truncation)]
            let handle = Handle {
                index: i as u32,
                generation: s.generation,
            };
            s.value.as_mut().map(|v| (handle, v))
        })
    }

    /// Handles of all live entries in slot order.
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.iter().map(|(h, _)| h)
    }
}
