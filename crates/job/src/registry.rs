//! Opaque integer handles for values shared with engine code.
//!
//! A handle packs a slot index (low 32 bits) and that slot's generation
//! (high 32 bits). Removing a value bumps the generation, so a stale handle
//! never resolves to whatever reuses the slot. Generations start at 1, which
//! keeps the raw value 0 permanently invalid.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    fn new(index: usize, generation: u32) -> Self {
        Handle((u64::from(generation) << 32) | index as u64)
    }

    pub fn from_raw(raw: u64) -> Self {
        Handle(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }

    fn index(self) -> usize {
        (self.0 & u64::from(u32::MAX)) as usize
    }

    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<usize> },
}

pub struct HandleRegistry<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<usize>,
    len: usize,
}

impl<T> HandleRegistry<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> Handle {
        self.len += 1;
        if let Some(index) = self.free_head {
            if let Slot::Vacant { generation, next_free } = self.slots[index] {
                self.free_head = next_free;
                self.slots[index] = Slot::Occupied { generation, value };
                return Handle::new(index, generation);
            }
        }

        let index = self.slots.len();
        self.slots.push(Slot::Occupied { generation: 1, value });
        Handle::new(index, 1)
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        match self.slots.get(handle.index()) {
            Some(Slot::Occupied { generation, value }) if *generation == handle.generation() => {
                Some(value)
            }
            _ => None,
        }
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// Release `handle`, returning its value. Stale handles return `None`.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let index = handle.index();
        match self.slots.get(index) {
            Some(Slot::Occupied { generation, .. }) if *generation == handle.generation() => {}
            _ => return None,
        }

        let next_generation = handle.generation().wrapping_add(1).max(1);
        let vacant = Slot::Vacant {
            generation: next_generation,
            next_free: self.free_head,
        };
        self.free_head = Some(index);
        self.len -= 1;
        match std::mem::replace(&mut self.slots[index], vacant) {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut registry = HandleRegistry::new();
        let a = registry.insert("a");
        let b = registry.insert("b");

        assert_ne!(a, b);
        assert_eq!(registry.get(a), Some(&"a"));
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.remove(a), Some("a"));
        assert_eq!(registry.remove(a), None);
        assert!(!registry.contains(a));
        assert_eq!(registry.get(b), Some(&"b"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stale_handle_does_not_see_reused_slot() {
        let mut registry = HandleRegistry::new();
        let old = registry.insert(1);
        registry.remove(old);

        let new = registry.insert(2);
        assert_eq!(new.index(), old.index());
        assert_ne!(new, old);
        assert_eq!(registry.get(old), None);
        assert_eq!(registry.get(new), Some(&2));
        assert_eq!(registry.remove(old), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_zero_is_never_valid() {
        let mut registry = HandleRegistry::new();
        let first = registry.insert(());
        assert_ne!(first.as_raw(), 0);
        assert!(!registry.contains(Handle::from_raw(0)));
        assert_eq!(Handle::from_raw(first.as_raw()), first);
    }
}
