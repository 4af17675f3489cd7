//! Entity handles and the identity table behind them.
//!
//! An [`Entity`] is a runtime key: a slot index plus the slot's generation at
//! the time the entity was created. The [`EntityAllocator`] owns the slots and
//! binds each occupied slot to the entity's persistent UUID, the identity that
//! survives snapshots and restores. Freeing a slot bumps its generation, so a
//! handle to a destroyed entity never resolves to whatever reuses the slot.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    index: u32,
    generation: u32,
}

impl Entity {
    #[inline]
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index, dense from zero. Storages key their sparse arrays on it.
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({self})")
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

// ---------------------------------------------------------------------------
// EntityAllocator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u32,
    /// `Some` while the slot is occupied.
    uuid: Option<Uuid>,
}

/// Hands out [`Entity`] handles and maps them to and from UUIDs.
///
/// A UUID names at most one live entity. Freed slots are reused most recent
/// first.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_uuid: HashMap<Uuid, Entity>,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Occupy a slot for an entity known by `uuid`.
    ///
    /// Returns `None` if a live entity already carries `uuid`.
    pub fn allocate(&mut self, uuid: Uuid) -> Option<Entity> {
        if self.by_uuid.contains_key(&uuid) {
            return None;
        }
        let entity = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.uuid = Some(uuid);
                Entity::new(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    uuid: Some(uuid),
                });
                Entity::new(index, 0)
            }
        };
        self.by_uuid.insert(uuid, entity);
        Some(entity)
    }

    /// Release `entity`'s slot and return the UUID it carried.
    ///
    /// Stale or already freed handles return `None` and change nothing.
    pub fn deallocate(&mut self, entity: Entity) -> Option<Uuid> {
        if !self.is_alive(entity) {
            return None;
        }
        let slot = &mut self.slots[entity.index as usize];
        let uuid = slot.uuid.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(entity.index);
        self.by_uuid.remove(&uuid);
        Some(uuid)
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.slots
            .get(entity.index as usize)
            .is_some_and(|s| s.uuid.is_some() && s.generation == entity.generation)
    }

    pub fn uuid(&self, entity: Entity) -> Option<Uuid> {
        if !self.is_alive(entity) {
            return None;
        }
        self.slots[entity.index as usize].uuid
    }

    pub fn find(&self, uuid: Uuid) -> Option<Entity> {
        self.by_uuid.get(&uuid).copied()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_resolves_both_ways_while_alive() {
        let mut alloc = EntityAllocator::new();
        let id = Uuid::new_v4();
        let e = alloc.allocate(id).unwrap();
        assert_eq!(alloc.uuid(e), Some(id));
        assert_eq!(alloc.find(id), Some(e));

        assert_eq!(alloc.deallocate(e), Some(id));
        assert_eq!(alloc.uuid(e), None);
        assert_eq!(alloc.find(id), None);
        assert_eq!(alloc.deallocate(e), None);
    }

    #[test]
    fn live_uuid_cannot_be_claimed_twice() {
        let mut alloc = EntityAllocator::new();
        let id = Uuid::new_v4();
        let first = alloc.allocate(id).unwrap();
        assert!(alloc.allocate(id).is_none());

        alloc.deallocate(first);
        let second = alloc.allocate(id).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn reused_slot_invalidates_old_handle() {
        let mut alloc = EntityAllocator::new();
        let old = alloc.allocate(Uuid::new_v4()).unwrap();
        alloc.deallocate(old);
        let new = alloc.allocate(Uuid::new_v4()).unwrap();
        assert_eq!(new.index(), old.index());
        assert_eq!(new.generation(), old.generation() + 1);
        assert!(!alloc.is_alive(old));
        assert!(alloc.uuid(old).is_none());
        assert!(alloc.is_alive(new));
    }

    #[test]
    fn most_recently_freed_slot_is_reused_first() {
        let mut alloc = EntityAllocator::new();
        let a = alloc.allocate(Uuid::new_v4()).unwrap();
        let b = alloc.allocate(Uuid::new_v4()).unwrap();
        alloc.deallocate(a);
        alloc.deallocate(b);
        assert_eq!(alloc.allocate(Uuid::new_v4()).unwrap().index(), b.index());
        assert_eq!(alloc.allocate(Uuid::new_v4()).unwrap().index(), a.index());
    }
}
