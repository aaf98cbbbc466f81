//nodes/join.rs
//! Inner join of two streams.
//!
//! Both sides are indexed by their equality columns. Each input tuple remembers its index
//! position and the out tuples it takes part in; each out tuple remembers its two parents,
//! so retracting either side finds every affected match without scanning.

use crate::arena::TupleId;
use crate::index::{IndexEntry, Indexer};
use crate::joiner::JoinPlan;
use crate::key::IndexKey;
use crate::nodes::{Lifecycle, NodeDef};
use crate::propagation::Propagator;
use crate::score::Score;
use crate::store::{OutList, SlotIndex, StoreSlot};
use crate::tuple::AnyTuple;
use crate::Result;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::fmt;

/// Store slots a join reserves on one input side.
#[derive(Debug, Clone, Copy)]
pub struct JoinSide {
    pub index_slot: SlotIndex,
    pub out_slot: SlotIndex,
}

pub struct JoinNode {
    pub plan: JoinPlan,
    pub left: JoinSide,
    pub right: JoinSide,
    /// Slot on out tuples holding their parents.
    pub parents_slot: SlotIndex,
}

impl fmt::Debug for JoinNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinNode")
            .field("columns", &self.plan.columns())
            .field("residual", &self.plan.residual.len())
            .field("left", &self.left)
            .field("right", &self.right)
            .finish()
    }
}

#[derive(Debug)]
pub struct JoinState {
    pub left_index: Indexer<TupleId>,
    pub right_index: Indexer<TupleId>,
    pub queue: VecDeque<TupleId>,
}

impl JoinState {
    pub fn new(node: &JoinNode) -> Self {
        Self {
            left_index: Indexer::for_columns(node.plan.columns()),
            right_index: Indexer::for_columns(node.plan.columns()),
            queue: VecDeque::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

impl Side {
    fn slots(self, node: &JoinNode) -> (JoinSide, JoinSide) {
        match self {
            Side::Left => (node.left, node.right),
            Side::Right => (node.right, node.left),
        }
    }
}

impl<S: Score> Propagator<S> {
    pub(crate) fn join_left(&mut self, def: &NodeDef, node: &JoinNode, op: Lifecycle, tuple: TupleId) -> Result<()> {
        self.join_side(def, node, Side::Left, op, tuple)
    }

    pub(crate) fn join_right(&mut self, def: &NodeDef, node: &JoinNode, op: Lifecycle, tuple: TupleId) -> Result<()> {
        self.join_side(def, node, Side::Right, op, tuple)
    }

    fn join_state(&mut self, def: &NodeDef) -> Result<&mut JoinState> {
        match &mut self.states[def.id.0] {
            crate::nodes::NodeState::Join(state) => Ok(state),
            _ => Err(def.invariant("join node without join state")),
        }
    }

    fn join_side(&mut self, def: &NodeDef, node: &JoinNode, side: Side, op: Lifecycle, tuple: TupleId) -> Result<()> {
        match op {
            Lifecycle::Insert => self.join_insert(def, node, side, tuple),
            Lifecycle::Update => self.join_update(def, node, side, tuple),
            Lifecycle::Retract => self.join_retract(def, node, side, tuple),
        }
    }

    fn join_key(&self, def: &NodeDef, node: &JoinNode, side: Side, tuple: TupleId) -> Result<IndexKey> {
        let t = self.tuples.tuple(tuple)?;
        let extractor = match side {
            Side::Left => &node.plan.left_key,
            Side::Right => &node.plan.right_key,
        };
        def.evaluate(t, || extractor.extract(t))
    }

    fn join_insert(&mut self, def: &NodeDef, node: &JoinNode, side: Side, tuple: TupleId) -> Result<()> {
        let (own, _) = side.slots(node);
        if !self.tuples.slot(tuple, own.index_slot)?.is_empty() {
            return Err(def.invariant(format!("tuple {:?} inserted twice", tuple)));
        }
        let key = self.join_key(def, node, side, tuple)?;
        let state = self.join_state(def)?;
        let entry = match side {
            Side::Left => state.left_index.put(key.clone(), tuple),
            Side::Right => state.right_index.put(key.clone(), tuple),
        };
        self.tuples.put_slot(tuple, own.index_slot, StoreSlot::Indexed(entry))?;
        self.tuples.put_slot(tuple, own.out_slot, StoreSlot::OutList(OutList::new()))?;
        let others = self.join_partners(def, side, &key)?;
        for other in others {
            self.join_try_create(def, node, side, tuple, other)?;
        }
        Ok(())
    }

    fn join_partners(&mut self, def: &NodeDef, side: Side, key: &IndexKey) -> Result<SmallVec<[TupleId; 8]>> {
        let state = self.join_state(def)?;
        let index = match side {
            Side::Left => &state.right_index,
            Side::Right => &state.left_index,
        };
        Ok(index.elements_sharing_key(key).collect())
    }

    fn ordered(side: Side, own: TupleId, other: TupleId) -> (TupleId, TupleId) {
        match side {
            Side::Left => (own, other),
            Side::Right => (other, own),
        }
    }

    fn join_residual(&self, def: &NodeDef, node: &JoinNode, left: TupleId, right: TupleId) -> Result<bool> {
        if !node.plan.is_filtering() {
            return Ok(true);
        }
        let (l, r) = (self.tuples.tuple(left)?, self.tuples.tuple(right)?);
        def.evaluate_pair(l, r, || node.plan.residual_matches(l, r))
    }

    fn join_combine(&self, def: &NodeDef, left: TupleId, right: TupleId) -> Result<AnyTuple> {
        self.tuples
            .tuple(left)?
            .combine(self.tuples.tuple(right)?)
            .ok_or_else(|| def.invariant("joined tuple exceeds the maximum arity"))
    }

    fn join_try_create(&mut self, def: &NodeDef, node: &JoinNode, side: Side, own: TupleId, other: TupleId) -> Result<()> {
        let (left, right) = Self::ordered(side, own, other);
        if !self.join_residual(def, node, left, right)? {
            return Ok(());
        }
        let combined = self.join_combine(def, left, right)?;
        let out = self.tuples.acquire(combined, def.id)?;
        self.tuples.put_slot(out, node.parents_slot, StoreSlot::Parents { left, right })?;
        self.push_out(def, left, node.left.out_slot, out)?;
        self.push_out(def, right, node.right.out_slot, out)?;
        self.join_state(def)?.queue.push_back(out);
        Ok(())
    }

    fn push_out(&mut self, def: &NodeDef, tuple: TupleId, slot: SlotIndex, out: TupleId) -> Result<()> {
        match self.tuples.slot_mut(tuple, slot)? {
            StoreSlot::OutList(outs) => {
                outs.push(out);
                Ok(())
            }
            other => Err(def.invariant(format!("tuple {:?} has no out list ({})", tuple, other.kind()))),
        }
    }

    fn remove_out(&mut self, def: &NodeDef, tuple: TupleId, slot: SlotIndex, out: TupleId) -> Result<()> {
        match self.tuples.slot_mut(tuple, slot)? {
            StoreSlot::OutList(outs) => {
                outs.retain(|o| *o != out);
                Ok(())
            }
            other => Err(def.invariant(format!("tuple {:?} has no out list ({})", tuple, other.kind()))),
        }
    }

    fn parents_of(&self, def: &NodeDef, node: &JoinNode, out: TupleId) -> Result<(TupleId, TupleId)> {
        match self.tuples.slot(out, node.parents_slot)? {
            StoreSlot::Parents { left, right } => Ok((*left, *right)),
            other => Err(def.invariant(format!("out tuple {:?} lost its parents ({})", out, other.kind()))),
        }
    }

    /// Retracts one match and unlinks it from the input on the other side.
    fn join_kill_out(&mut self, def: &NodeDef, node: &JoinNode, side: Side, out: TupleId) -> Result<()> {
        let (left, right) = match self.tuples.take_slot(out, node.parents_slot)? {
            StoreSlot::Parents { left, right } => (left, right),
            other => return Err(def.invariant(format!("out tuple {:?} lost its parents ({})", out, other.kind()))),
        };
        let (_, other) = side.slots(node);
        let partner = match side {
            Side::Left => right,
            Side::Right => left,
        };
        self.remove_out(def, partner, other.out_slot, out)?;
        self.join_retract_out(def, out)
    }

    fn join_retract_out(&mut self, def: &NodeDef, out: TupleId) -> Result<()> {
        if self.mark_dying(def, out)? {
            self.join_state(def)?.queue.push_back(out);
        }
        Ok(())
    }

    fn join_update_out(&mut self, def: &NodeDef, out: TupleId, left: TupleId, right: TupleId) -> Result<()> {
        let combined = self.join_combine(def, left, right)?;
        self.tuples.get_mut(out)?.tuple = combined;
        if self.mark_updating(def, out)? {
            self.join_state(def)?.queue.push_back(out);
        }
        Ok(())
    }

    fn take_out_list(&mut self, def: &NodeDef, tuple: TupleId, slot: SlotIndex) -> Result<OutList> {
        match self.tuples.take_slot(tuple, slot)? {
            StoreSlot::OutList(outs) => Ok(outs),
            other => Err(def.invariant(format!("tuple {:?} has no out list ({})", tuple, other.kind()))),
        }
    }

    fn join_update(&mut self, def: &NodeDef, node: &JoinNode, side: Side, tuple: TupleId) -> Result<()> {
        let (own, _) = side.slots(node);
        let entry: IndexEntry = match self.tuples.slot(tuple, own.index_slot)? {
            StoreSlot::Indexed(entry) => entry.clone(),
            other => return Err(def.invariant(format!("update of unknown tuple {:?} ({})", tuple, other.kind()))),
        };
        let key = self.join_key(def, node, side, tuple)?;
        if &key != entry.key() {
            // Moved to another bucket: every match is replaced.
            self.join_retract(def, node, side, tuple)?;
            return self.join_insert(def, node, side, tuple);
        }

        let outs = self.take_out_list(def, tuple, own.out_slot)?;
        if !node.plan.is_filtering() {
            for out in &outs {
                let (left, right) = self.parents_of(def, node, *out)?;
                self.join_update_out(def, *out, left, right)?;
            }
            return self.tuples.put_slot(tuple, own.out_slot, StoreSlot::OutList(outs));
        }

        // Residual joiners may flip for any partner in the bucket.
        let mut existing: FxHashMap<TupleId, TupleId> = FxHashMap::default();
        for out in &outs {
            let (left, right) = self.parents_of(def, node, *out)?;
            let partner = if side == Side::Left { right } else { left };
            existing.insert(partner, *out);
        }
        self.tuples.put_slot(tuple, own.out_slot, StoreSlot::OutList(outs))?;
        for other in self.join_partners(def, side, &key)? {
            let (left, right) = Self::ordered(side, tuple, other);
            let passes = self.join_residual(def, node, left, right)?;
            let matched = existing.get(&other).copied();
            match (matched, passes) {
                (Some(out), true) => self.join_update_out(def, out, left, right)?,
                (Some(out), false) => {
                    self.remove_out(def, tuple, own.out_slot, out)?;
                    self.join_kill_out(def, node, side, out)?;
                }
                (None, true) => self.join_try_create(def, node, side, tuple, other)?,
                (None, false) => {}
            }
        }
        Ok(())
    }

    fn join_retract(&mut self, def: &NodeDef, node: &JoinNode, side: Side, tuple: TupleId) -> Result<()> {
        let (own, _) = side.slots(node);
        let entry = match self.tuples.take_slot(tuple, own.index_slot)? {
            StoreSlot::Indexed(entry) => entry,
            other => return Err(def.invariant(format!("retract of unknown tuple {:?} ({})", tuple, other.kind()))),
        };
        let state = self.join_state(def)?;
        match side {
            Side::Left => state.left_index.remove(&entry)?,
            Side::Right => state.right_index.remove(&entry)?,
        };
        for out in self.take_out_list(def, tuple, own.out_slot)? {
            self.join_kill_out(def, node, side, out)?;
        }
        Ok(())
    }
}
