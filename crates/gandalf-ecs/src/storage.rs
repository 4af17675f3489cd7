//! Per-type component storage.
//!
//! Each component type lives in a [`SparseSet`]: values and their owning
//! entities are packed in two parallel dense vectors, and a sparse vector
//! indexed by [`Entity::index`] points into them. Removal swap-removes, so
//! iteration never visits a removed slot, and every lookup checks the stored
//! handle's generation so a stale [`Entity`] can never reach a recycled slot.

use std::any::Any;

use crate::entity::Entity;

// ---------------------------------------------------------------------------
// SparseSet
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SparseSet<T> {
    values: Vec<T>,
    entities: Vec<Entity>,
    /// `entity.index() -> dense slot`.
    sparse: Vec<Option<u32>>,
}

impl<T> Default for SparseSet<T> {
    fn default() -> Self {
        Self {
            values: Vec::new(),
            entities: Vec::new(),
            sparse: Vec::new(),
        }
    }
}

impl<T> SparseSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, entity: Entity) -> Option<usize> {
        let slot = (*self.sparse.get(entity.index() as usize)?)? as usize;
        // The sparse entry may belong to an older generation of this index.
        (self.entities[slot] == entity).then_some(slot)
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.slot(entity).is_some()
    }

    /// Insert `value` for `entity`.
    ///
    /// Returns `false` and drops `value` if the entity already has one; the
    /// existing value is left untouched.
    pub fn insert(&mut self, entity: Entity, value: T) -> bool {
        if self.contains(entity) {
            return false;
        }
        let idx = entity.index() as usize;
        if self.sparse.len() <= idx {
            self.sparse.resize(idx + 1, None);
        }
        self.sparse[idx] = Some(self.values.len() as u32);
        self.values.push(value);
        self.entities.push(entity);
        true
    }

    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.slot(entity).map(|slot| &self.values[slot])
    }

    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        self.slot(entity).map(move |slot| &mut self.values[slot])
    }

    /// Remove and return the value owned by `entity`.
    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        let slot = self.slot(entity)?;
        let last = self.values.len() - 1;
        if slot != last {
            let moved = self.entities[last];
            self.sparse[moved.index() as usize] = Some(slot as u32);
        }
        self.sparse[entity.index() as usize] = None;
        self.entities.swap_remove(slot);
        Some(self.values.swap_remove(slot))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Entities owning a value, in dense order.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.entities.iter().copied().zip(self.values.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &mut T)> {
        self.entities.iter().copied().zip(self.values.iter_mut())
    }
}

// ---------------------------------------------------------------------------
// ErasedStorage -- type-erased access used by the world
// ---------------------------------------------------------------------------

/// Type-erased view over a [`SparseSet`].
pub trait ErasedStorage {
    fn contains(&self, entity: Entity) -> bool;
    /// Remove the entity's value, returning whether one existed.
    fn remove_entity(&mut self, entity: Entity) -> bool;
    fn get_any(&self, entity: Entity) -> Option<&dyn Any>;
    /// Insert a boxed value of the storage's type.
    ///
    /// Returns `false` if the box holds a different type or the entity
    /// already has a value.
    fn insert_any(&mut self, entity: Entity, value: Box<dyn Any>) -> bool;
    fn len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> ErasedStorage for SparseSet<T> {
    fn contains(&self, entity: Entity) -> bool {
        SparseSet::contains(self, entity)
    }

    fn remove_entity(&mut self, entity: Entity) -> bool {
        self.remove(entity).is_some()
    }

    fn get_any(&self, entity: Entity) -> Option<&dyn Any> {
        self.get(entity).map(|v| v as &dyn Any)
    }

    fn insert_any(&mut self, entity: Entity, value: Box<dyn Any>) -> bool {
        match value.downcast::<T>() {
            Ok(typed) => self.insert(entity, *typed),
            Err(_) => false,
        }
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let mut set = SparseSet::new();
        let e = Entity::new(3, 0);
        assert!(set.insert(e, "first"));
        assert!(!set.insert(e, "second"));
        assert_eq!(set.get(e), Some(&"first"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn swap_remove_keeps_other_lookups_valid() {
        let mut set = SparseSet::new();
        let a = Entity::new(0, 0);
        let b = Entity::new(1, 0);
        let c = Entity::new(2, 0);
        set.insert(a, 10);
        set.insert(b, 20);
        set.insert(c, 30);

        assert_eq!(set.remove(a), Some(10));
        assert_eq!(set.get(b), Some(&20));
        assert_eq!(set.get(c), Some(&30));
        assert!(!set.contains(a));
        let seen: Vec<i32> = set.iter().map(|(_, v)| *v).collect();
        assert_eq!(seen.len(), 2);
        assert!(!seen.contains(&10), "removed value must not be iterated");
    }

    #[test]
    fn stale_generation_is_rejected() {
        let mut set = SparseSet::new();
        let old = Entity::new(5, 0);
        let new = Entity::new(5, 1);
        set.insert(new, 1u8);
        assert!(set.get(old).is_none());
        assert!(set.remove(old).is_none());
        assert_eq!(set.get(new), Some(&1));
    }

    #[test]
    fn erased_insert_checks_type() {
        let mut set: SparseSet<u32> = SparseSet::new();
        let e = Entity::new(0, 0);
        assert!(!set.insert_any(e, Box::new("nope")));
        assert!(set.insert_any(e, Box::new(7u32)));
        assert_eq!(
            set.get_any(e).and_then(|v| v.downcast_ref::<u32>()),
            Some(&7)
        );
    }
}
