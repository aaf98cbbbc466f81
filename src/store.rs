// store.rs - Per-tuple slot storage
//!
//! Every node that needs to remember something about an input tuple reserves a slot
//! index at network-build time. Reservations are counted per arity lane, so a tuple of
//! arity `k` carries exactly as many slots as lane `k` handed out.

use crate::arena::TupleId;
use crate::collectors::Receipt;
use crate::index::IndexEntry;
use crate::nodes::distinct::DistinctId;
use crate::nodes::exists::CounterId;
use crate::nodes::group::GroupId;
use crate::nodes::scorer::ImpactId;
use crate::tuple::{TupleArity, MAX_ARITY};
use smallvec::SmallVec;

pub type SlotIndex = usize;

pub type OutList = SmallVec<[TupleId; 4]>;

/// A counter the right tuple contributed to, with the counter epoch at that time.
pub type Tracker = (CounterId, u32);

/// Reverse operation of a shared-state mutation made on behalf of one tuple.
#[derive(Debug, Clone)]
pub enum UndoHandle {
    /// Subtract the recorded score delta from its constraint bucket.
    Impact(ImpactId),
    /// Reverse collector accumulations and drop one member from the group.
    Accumulate {
        group: GroupId,
        receipts: SmallVec<[Receipt; 2]>,
    },
}

#[derive(Debug, Clone, Default)]
pub enum StoreSlot {
    #[default]
    Empty,
    /// Filter verdict of the last evaluation.
    Filtered { passed: bool },
    /// Single tuple derived from this one (map).
    Out(TupleId),
    /// Tuples derived from this one (join, flat-map).
    OutList(OutList),
    /// Position inside a join or exists index.
    Indexed(IndexEntry),
    /// Join inputs an out tuple was built from.
    Parents { left: TupleId, right: TupleId },
    /// Exists counter of a left tuple and its index position.
    Counter { entry: IndexEntry, counter: CounterId },
    /// Exists counters a right tuple currently counts toward.
    Trackers(Vec<Tracker>),
    /// Distinct entry the tuple counts toward.
    Distinct(DistinctId),
    Undo(UndoHandle),
}

impl StoreSlot {
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, StoreSlot::Empty)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StoreSlot::Empty => "empty",
            StoreSlot::Filtered { .. } => "filtered",
            StoreSlot::Out(_) => "out",
            StoreSlot::OutList(_) => "out-list",
            StoreSlot::Indexed(_) => "indexed",
            StoreSlot::Parents { .. } => "parents",
            StoreSlot::Counter { .. } => "counter",
            StoreSlot::Trackers(_) => "trackers",
            StoreSlot::Distinct(_) => "distinct",
            StoreSlot::Undo(_) => "undo",
        }
    }
}

/// Fixed-size slot array carried by each tuple.
#[derive(Debug, Clone, Default)]
pub struct TupleStore {
    slots: Box<[StoreSlot]>,
}

impl TupleStore {
    pub fn with_size(size: usize) -> Self {
        Self {
            slots: vec![StoreSlot::Empty; size].into_boxed_slice(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn get(&self, index: SlotIndex) -> Option<&StoreSlot> {
        self.slots.get(index)
    }

    #[inline]
    pub fn get_mut(&mut self, index: SlotIndex) -> Option<&mut StoreSlot> {
        self.slots.get_mut(index)
    }

    /// Moves the slot content out, leaving it empty.
    #[inline]
    pub fn take(&mut self, index: SlotIndex) -> StoreSlot {
        self.slots
            .get_mut(index)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// Writes a slot; returns false when the index is outside this store.
    #[inline]
    pub fn put(&mut self, index: SlotIndex, slot: StoreSlot) -> bool {
        match self.slots.get_mut(index) {
            Some(target) => {
                *target = slot;
                true
            }
            None => false,
        }
    }

    /// First occupied slot, used by leak checks.
    pub fn first_occupied(&self) -> Option<(SlotIndex, &StoreSlot)> {
        self.slots.iter().enumerate().find(|(_, s)| !s.is_empty())
    }
}

/// Build-time slot allocator, one counter per arity lane.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreLayout {
    lanes: [usize; MAX_ARITY],
}

impl StoreLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next free slot of the given lane.
    pub fn reserve(&mut self, arity: TupleArity) -> SlotIndex {
        let lane = &mut self.lanes[arity.lane()];
        let index = *lane;
        *lane += 1;
        index
    }

    #[inline]
    pub fn size(&self, arity: TupleArity) -> usize {
        self.lanes[arity.lane()]
    }

    pub fn lanes(&self) -> [usize; MAX_ARITY] {
        self.lanes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_counts_per_lane() {
        let mut layout = StoreLayout::new();
        assert_eq!(layout.reserve(TupleArity::One), 0);
        assert_eq!(layout.reserve(TupleArity::One), 1);
        assert_eq!(layout.reserve(TupleArity::Two), 0);
        assert_eq!(layout.size(TupleArity::One), 2);
        assert_eq!(layout.size(TupleArity::Two), 1);
        assert_eq!(layout.size(TupleArity::Five), 0);
    }

    #[test]
    fn test_take_clears_slot() {
        let mut store = TupleStore::with_size(2);
        assert!(store.put(1, StoreSlot::Filtered { passed: true }));
        assert!(!store.put(2, StoreSlot::Filtered { passed: true }));
        assert_eq!(store.first_occupied().map(|(i, _)| i), Some(1));
        assert!(matches!(store.take(1), StoreSlot::Filtered { passed: true }));
        assert!(store.take(1).is_empty());
        assert!(store.first_occupied().is_none());
    }
}
