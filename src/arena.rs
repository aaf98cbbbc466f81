//arena.rs
use crate::nodes::NodeId;
use crate::state::TupleState;
use crate::store::{SlotIndex, StoreLayout, StoreSlot, TupleStore};
use crate::tuple::AnyTuple;
use crate::{ResourceLimits, Result, ScorenetError};
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Generational handle of a tuple. Stale handles never alias a newer tuple.
    pub struct TupleId;
}

/// A tuple together with its session-local bookkeeping.
#[derive(Debug)]
pub struct TupleEntry {
    pub tuple: AnyTuple,
    pub state: TupleState,
    pub store: TupleStore,
    /// Node whose propagation queue owns this tuple.
    pub owner: NodeId,
}

// Helper for likely/unlikely branch hints
#[inline(always)]
#[cold]
fn unlikely<T>(val: T) -> T {
    val
}

/// Session-owned storage for every tuple created by the network.
pub struct TupleArena {
    tuples: SlotMap<TupleId, TupleEntry>,
    layout: StoreLayout,
    limits: ResourceLimits,
    peak: usize,
    created: u64,
}

impl TupleArena {
    pub fn new(layout: StoreLayout, limits: ResourceLimits) -> Self {
        Self {
            tuples: SlotMap::with_key(),
            layout,
            limits,
            peak: 0,
            created: 0,
        }
    }

    /// Stores a new tuple in `Creating` state with a store sized for its lane.
    #[inline]
    pub fn acquire(&mut self, tuple: AnyTuple, owner: NodeId) -> Result<TupleId> {
        let current_count = self.tuples.len();
        if unlikely(current_count >= self.limits.max_tuples) {
            return Err(ScorenetError::resource_limit(
                "max_tuples",
                format!("Current: {}, Limit: {}", current_count, self.limits.max_tuples),
            ));
        }

        let store = TupleStore::with_size(self.layout.size(tuple.tuple_arity()));
        let id = self.tuples.insert(TupleEntry {
            tuple,
            state: TupleState::Creating,
            store,
            owner,
        });
        self.created += 1;
        self.peak = self.peak.max(self.tuples.len());
        Ok(id)
    }

    #[inline]
    pub fn get(&self, id: TupleId) -> Result<&TupleEntry> {
        self.tuples.get(id).ok_or_else(|| Self::missing(id))
    }

    #[inline]
    pub fn get_mut(&mut self, id: TupleId) -> Result<&mut TupleEntry> {
        self.tuples.get_mut(id).ok_or_else(|| Self::missing(id))
    }

    #[inline]
    pub fn contains(&self, id: TupleId) -> bool {
        self.tuples.contains_key(id)
    }

    #[inline]
    pub fn tuple(&self, id: TupleId) -> Result<&AnyTuple> {
        self.get(id).map(|entry| &entry.tuple)
    }

    #[inline]
    pub fn state(&self, id: TupleId) -> Result<TupleState> {
        self.get(id).map(|entry| entry.state)
    }

    #[inline]
    pub fn set_state(&mut self, id: TupleId, state: TupleState) -> Result<()> {
        self.get_mut(id)?.state = state;
        Ok(())
    }

    pub fn slot(&self, id: TupleId, slot: SlotIndex) -> Result<&StoreSlot> {
        self.get(id)?
            .store
            .get(slot)
            .ok_or_else(|| Self::bad_slot(id, slot))
    }

    pub fn slot_mut(&mut self, id: TupleId, slot: SlotIndex) -> Result<&mut StoreSlot> {
        self.get_mut(id)?
            .store
            .get_mut(slot)
            .ok_or_else(|| Self::bad_slot(id, slot))
    }

    pub fn take_slot(&mut self, id: TupleId, slot: SlotIndex) -> Result<StoreSlot> {
        let entry = self.get_mut(id)?;
        if slot >= entry.store.len() {
            return Err(Self::bad_slot(id, slot));
        }
        Ok(entry.store.take(slot))
    }

    pub fn put_slot(&mut self, id: TupleId, slot: SlotIndex, value: StoreSlot) -> Result<()> {
        if self.get_mut(id)?.store.put(slot, value) {
            Ok(())
        } else {
            Err(Self::bad_slot(id, slot))
        }
    }

    /// Removes a dead tuple. With `check_store`, every slot must already be empty.
    pub fn release(&mut self, id: TupleId, check_store: bool) -> Result<()> {
        let entry = self.tuples.remove(id).ok_or_else(|| Self::missing(id))?;
        if entry.state != TupleState::Dead {
            return Err(ScorenetError::invariant(
                format!("{}", entry.owner),
                format!("releasing tuple {:?} in state {:?}", entry.tuple, entry.state),
            ));
        }
        if check_store {
            if let Some((index, slot)) = entry.store.first_occupied() {
                return Err(ScorenetError::invariant(
                    format!("{}", entry.owner),
                    format!(
                        "released tuple {:?} still holds a {} slot at {}",
                        entry.tuple,
                        slot.kind(),
                        index
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.tuples.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TupleId, &TupleEntry)> {
        self.tuples.iter()
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Get statistics about the arena
    pub fn stats(&self) -> ArenaStats {
        let mut live_tuples = 0;
        let mut dirty_tuples = 0;
        for (_, entry) in self.tuples.iter() {
            if entry.state.is_dirty() {
                dirty_tuples += 1;
            } else {
                live_tuples += 1;
            }
        }
        ArenaStats {
            live_tuples,
            dirty_tuples,
            peak_tuples: self.peak,
            created_tuples: self.created,
        }
    }

    fn missing(id: TupleId) -> ScorenetError {
        ScorenetError::invariant("tuple arena", format!("unknown or released tuple {:?}", id))
    }

    fn bad_slot(id: TupleId, slot: SlotIndex) -> ScorenetError {
        ScorenetError::invariant(
            "tuple arena",
            format!("tuple {:?} has no store slot {}", id, slot),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArenaStats {
    pub live_tuples: usize,
    pub dirty_tuples: usize,
    pub peak_tuples: usize,
    pub created_tuples: u64,
}

impl std::fmt::Debug for TupleArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TupleArena")
            .field("tuples", &self.tuples.len())
            .field("lanes", &self.layout.lanes())
            .field("peak", &self.peak)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::Fact;
    use crate::tuple::{TupleArity, UniTuple};
    use std::rc::Rc;

    fn uni(value: i64) -> AnyTuple {
        let fact: Rc<dyn Fact> = Rc::new(value);
        AnyTuple::Uni(UniTuple::new(fact))
    }

    fn arena_with_limit(max_tuples: usize) -> TupleArena {
        let mut layout = StoreLayout::new();
        layout.reserve(TupleArity::One);
        let limits = ResourceLimits { max_tuples, ..ResourceLimits::default() };
        TupleArena::new(layout, limits)
    }

    #[test]
    fn test_acquire_sizes_store_by_lane() {
        let mut arena = arena_with_limit(10);
        let id = arena.acquire(uni(1), NodeId(0)).unwrap();
        let entry = arena.get(id).unwrap();
        assert_eq!(entry.state, TupleState::Creating);
        assert_eq!(entry.store.len(), 1);
    }

    #[test]
    fn test_release_requires_dead_and_empty_store() {
        let mut arena = arena_with_limit(10);
        let id = arena.acquire(uni(1), NodeId(0)).unwrap();
        assert!(arena.release(id, true).is_err());

        let id = arena.acquire(uni(2), NodeId(0)).unwrap();
        arena.put_slot(id, 0, StoreSlot::Filtered { passed: false }).unwrap();
        arena.set_state(id, TupleState::Dead).unwrap();
        assert!(arena.release(id, true).is_err());

        let id = arena.acquire(uni(3), NodeId(0)).unwrap();
        arena.set_state(id, TupleState::Dead).unwrap();
        arena.release(id, true).unwrap();
        assert!(arena.get(id).is_err());
        assert!(arena.release(id, true).is_err());
    }

    #[test]
    fn test_tuple_limit() {
        let mut arena = arena_with_limit(1);
        arena.acquire(uni(1), NodeId(0)).unwrap();
        let err = arena.acquire(uni(2), NodeId(0)).unwrap_err();
        assert!(matches!(err, ScorenetError::ResourceLimit { .. }));
    }

    #[test]
    fn test_slot_bounds() {
        let mut arena = arena_with_limit(10);
        let id = arena.acquire(uni(1), NodeId(0)).unwrap();
        assert!(arena.put_slot(id, 3, StoreSlot::Empty).is_err());
        assert!(arena.take_slot(id, 0).unwrap().is_empty());
    }
}
