//nodes/exists.rs
//! Semi-join (`if_exists`) and anti-join (`if_not_exists`).
//!
//! Every left tuple gets a counter of matching right tuples. The left tuple is passed to
//! the children while `(count > 0) == should_exist`; the counter carries its own lifecycle
//! state so a flip and a flip back inside one batch cancel out.
//!
//! Without residual joiners a right tuple matches every counter in its bucket. With them,
//! each right tuple tracks the counters it actually incremented, stamped with the counter
//! epoch; recounting a left tuple bumps its epoch and thereby invalidates older trackers.

use crate::arena::TupleId;
use crate::index::{IndexEntry, Indexer};
use crate::joiner::JoinPlan;
use crate::key::IndexKey;
use crate::nodes::{Lifecycle, NodeDef, NodeState};
use crate::propagation::Propagator;
use crate::score::Score;
use crate::state::TupleState;
use crate::store::{SlotIndex, StoreSlot, Tracker};
use crate::Result;
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::fmt;

new_key_type! {
    pub struct CounterId;
}

pub struct ExistsNode {
    pub plan: JoinPlan,
    pub should_exist: bool,
    /// Counter slot on left tuples.
    pub left_slot: SlotIndex,
    pub right_index_slot: SlotIndex,
    /// Tracker slot on right tuples, used only with residual joiners.
    pub right_tracker_slot: SlotIndex,
}

impl fmt::Debug for ExistsNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExistsNode")
            .field("should_exist", &self.should_exist)
            .field("columns", &self.plan.columns())
            .field("residual", &self.plan.residual.len())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ExistsCounter {
    pub left: TupleId,
    pub count: usize,
    pub state: TupleState,
    pub epoch: u32,
    /// The left tuple is gone; drop the counter once its state settles.
    pub orphan: bool,
}

#[derive(Debug)]
pub struct ExistsState {
    pub left_index: Indexer<CounterId>,
    pub right_index: Indexer<TupleId>,
    pub counters: SlotMap<CounterId, ExistsCounter>,
    pub queue: VecDeque<CounterId>,
}

impl ExistsState {
    pub fn new(node: &ExistsNode) -> Self {
        Self {
            left_index: Indexer::for_columns(node.plan.columns()),
            right_index: Indexer::for_columns(node.plan.columns()),
            counters: SlotMap::with_key(),
            queue: VecDeque::new(),
        }
    }

    fn is_live(&self, tracker: &Tracker) -> bool {
        let (id, epoch) = *tracker;
        self.counters
            .get(id)
            .map_or(false, |c| c.epoch == epoch && !c.orphan)
    }

    /// Applies the presence rule after the count of a counter changed.
    fn refresh(&mut self, id: CounterId, should_exist: bool) {
        let Some(counter) = self.counters.get_mut(id) else {
            return;
        };
        let present = (counter.count > 0) == should_exist;
        let (next, enqueue) = match (present, counter.state) {
            (true, TupleState::Ok) => (TupleState::Updating, true),
            (true, TupleState::Dead) => (TupleState::Creating, true),
            (true, TupleState::Dying) => (TupleState::Updating, false),
            (true, TupleState::Aborting) => (TupleState::Creating, false),
            (false, TupleState::Ok) => (TupleState::Dying, true),
            (false, TupleState::Creating) => (TupleState::Aborting, false),
            (false, TupleState::Updating) => (TupleState::Dying, false),
            (_, state) => (state, false),
        };
        counter.state = next;
        if enqueue {
            self.queue.push_back(id);
        }
    }

    /// Left facts changed but presence did not: children still need an update.
    fn touch(&mut self, id: CounterId) {
        if let Some(counter) = self.counters.get_mut(id) {
            if counter.state == TupleState::Ok {
                counter.state = TupleState::Updating;
                self.queue.push_back(id);
            }
        }
    }

    fn increment(&mut self, def: &NodeDef, id: CounterId, should_exist: bool) -> Result<()> {
        let counter = self.live_counter(def, id)?;
        counter.count += 1;
        if counter.count == 1 {
            self.refresh(id, should_exist);
        }
        Ok(())
    }

    fn decrement(&mut self, def: &NodeDef, id: CounterId, should_exist: bool) -> Result<()> {
        let counter = self.live_counter(def, id)?;
        if counter.count == 0 {
            return Err(def.invariant(format!(
                "counter {:?} of left tuple {:?} decremented below zero",
                id, counter.left
            )));
        }
        counter.count -= 1;
        if counter.count == 0 {
            self.refresh(id, should_exist);
        }
        Ok(())
    }

    /// Counters reached through an index or a live tracker always belong to a left tuple.
    fn live_counter(&mut self, def: &NodeDef, id: CounterId) -> Result<&mut ExistsCounter> {
        match self.counters.get_mut(id) {
            Some(counter) if !counter.orphan => Ok(counter),
            Some(counter) => Err(def.invariant(format!(
                "counter {:?} of retracted left tuple {:?} is still matched",
                id, counter.left
            ))),
            None => Err(def.invariant(format!("counter {:?} vanished", id))),
        }
    }

    /// Detaches a counter from its retracted left tuple.
    fn kill(&mut self, id: CounterId) {
        let Some(counter) = self.counters.get_mut(id) else {
            return;
        };
        counter.orphan = true;
        match counter.state {
            TupleState::Creating => counter.state = TupleState::Aborting,
            TupleState::Updating => counter.state = TupleState::Dying,
            TupleState::Ok => {
                counter.state = TupleState::Dying;
                self.queue.push_back(id);
            }
            TupleState::Dead => {
                self.counters.remove(id);
            }
            TupleState::Dying | TupleState::Aborting => {}
        }
    }
}

impl<S: Score> Propagator<S> {
    fn exists_state(&mut self, def: &NodeDef) -> Result<&mut ExistsState> {
        match &mut self.states[def.id.0] {
            NodeState::Exists(state) => Ok(state),
            _ => Err(def.invariant("exists node without exists state")),
        }
    }

    fn exists_key(&self, def: &NodeDef, node: &ExistsNode, left_side: bool, tuple: TupleId) -> Result<IndexKey> {
        let t = self.tuples.tuple(tuple)?;
        let extractor = if left_side { &node.plan.left_key } else { &node.plan.right_key };
        def.evaluate(t, || extractor.extract(t))
    }

    fn exists_residual(&self, def: &NodeDef, node: &ExistsNode, left: TupleId, right: TupleId) -> Result<bool> {
        let (l, r) = (self.tuples.tuple(left)?, self.tuples.tuple(right)?);
        def.evaluate_pair(l, r, || node.plan.residual_matches(l, r))
    }

    /// Counts matching right tuples for a counter from scratch, recording trackers.
    fn exists_recount(&mut self, def: &NodeDef, node: &ExistsNode, id: CounterId, key: &IndexKey) -> Result<()> {
        let state = self.exists_state(def)?;
        if !node.plan.is_filtering() {
            let count = state.right_index.size(key);
            if let Some(counter) = state.counters.get_mut(id) {
                counter.count = count;
            }
            return Ok(());
        }
        let rights: SmallVec<[TupleId; 8]> = state.right_index.elements_sharing_key(key).collect();
        let (left, epoch) = match state.counters.get_mut(id) {
            Some(counter) => {
                counter.epoch = counter.epoch.wrapping_add(1);
                counter.count = 0;
                (counter.left, counter.epoch)
            }
            None => return Err(def.invariant(format!("counter {:?} vanished", id))),
        };
        for right in rights {
            if !self.exists_residual(def, node, left, right)? {
                continue;
            }
            self.exists_track(def, node, right, (id, epoch))?;
            if let Some(counter) = self.exists_state(def)?.counters.get_mut(id) {
                counter.count += 1;
            }
        }
        Ok(())
    }

    /// Adds a tracker to a right tuple, pruning stale ones on the way.
    fn exists_track(&mut self, def: &NodeDef, node: &ExistsNode, right: TupleId, tracker: Tracker) -> Result<()> {
        let mut trackers = match self.tuples.take_slot(right, node.right_tracker_slot)? {
            StoreSlot::Trackers(trackers) => trackers,
            other => return Err(def.invariant(format!("right tuple {:?} has no trackers ({})", right, other.kind()))),
        };
        let state = self.exists_state(def)?;
        trackers.retain(|t| state.is_live(t));
        trackers.push(tracker);
        self.tuples.put_slot(right, node.right_tracker_slot, StoreSlot::Trackers(trackers))
    }

    pub(crate) fn exists_left(&mut self, def: &NodeDef, node: &ExistsNode, op: Lifecycle, tuple: TupleId) -> Result<()> {
        let should_exist = node.should_exist;
        match op {
            Lifecycle::Insert => {
                if !self.tuples.slot(tuple, node.left_slot)?.is_empty() {
                    return Err(def.invariant(format!("tuple {:?} inserted twice", tuple)));
                }
                let key = self.exists_key(def, node, true, tuple)?;
                let state = self.exists_state(def)?;
                let counter = state.counters.insert(ExistsCounter {
                    left: tuple,
                    count: 0,
                    state: TupleState::Dead,
                    epoch: 0,
                    orphan: false,
                });
                let entry = state.left_index.put(key.clone(), counter);
                self.tuples.put_slot(tuple, node.left_slot, StoreSlot::Counter { entry, counter })?;
                self.exists_recount(def, node, counter, &key)?;
                self.exists_state(def)?.refresh(counter, should_exist);
                Ok(())
            }
            Lifecycle::Update => {
                let (entry, counter): (IndexEntry, CounterId) = match self.tuples.slot(tuple, node.left_slot)? {
                    StoreSlot::Counter { entry, counter } => (entry.clone(), *counter),
                    other => {
                        return Err(def.invariant(format!("update of unknown tuple {:?} ({})", tuple, other.kind())))
                    }
                };
                let key = self.exists_key(def, node, true, tuple)?;
                if &key == entry.key() && !node.plan.is_filtering() {
                    self.exists_state(def)?.touch(counter);
                    return Ok(());
                }
                if &key != entry.key() {
                    let state = self.exists_state(def)?;
                    state.left_index.remove(&entry)?;
                    let entry = state.left_index.put(key.clone(), counter);
                    self.tuples.put_slot(tuple, node.left_slot, StoreSlot::Counter { entry, counter })?;
                }
                self.exists_recount(def, node, counter, &key)?;
                let state = self.exists_state(def)?;
                let before = state.counters.get(counter).map(|c| c.state);
                state.refresh(counter, should_exist);
                if state.counters.get(counter).map(|c| c.state) == before {
                    // Presence unchanged; the left facts still changed.
                    state.touch(counter);
                }
                Ok(())
            }
            Lifecycle::Retract => {
                let (entry, counter) = match self.tuples.take_slot(tuple, node.left_slot)? {
                    StoreSlot::Counter { entry, counter } => (entry, counter),
                    other => {
                        return Err(def.invariant(format!("retract of unknown tuple {:?} ({})", tuple, other.kind())))
                    }
                };
                let state = self.exists_state(def)?;
                state.left_index.remove(&entry)?;
                state.kill(counter);
                Ok(())
            }
        }
    }

    pub(crate) fn exists_right(&mut self, def: &NodeDef, node: &ExistsNode, op: Lifecycle, tuple: TupleId) -> Result<()> {
        let filtering = node.plan.is_filtering();
        match op {
            Lifecycle::Insert => {
                if !self.tuples.slot(tuple, node.right_index_slot)?.is_empty() {
                    return Err(def.invariant(format!("tuple {:?} inserted twice", tuple)));
                }
                let key = self.exists_key(def, node, false, tuple)?;
                let entry = self.exists_state(def)?.right_index.put(key.clone(), tuple);
                self.tuples.put_slot(tuple, node.right_index_slot, StoreSlot::Indexed(entry))?;
                self.exists_count_right(def, node, tuple, &key)
            }
            Lifecycle::Update => {
                let entry = match self.tuples.slot(tuple, node.right_index_slot)? {
                    StoreSlot::Indexed(entry) => entry.clone(),
                    other => {
                        return Err(def.invariant(format!("update of unknown tuple {:?} ({})", tuple, other.kind())))
                    }
                };
                let key = self.exists_key(def, node, false, tuple)?;
                if !filtering && &key == entry.key() {
                    // Counts only depend on the key here.
                    return Ok(());
                }
                self.exists_uncount_right(def, node, tuple, entry.key())?;
                if &key != entry.key() {
                    let state = self.exists_state(def)?;
                    state.right_index.remove(&entry)?;
                    let entry = state.right_index.put(key.clone(), tuple);
                    self.tuples.put_slot(tuple, node.right_index_slot, StoreSlot::Indexed(entry))?;
                }
                self.exists_count_right(def, node, tuple, &key)
            }
            Lifecycle::Retract => {
                let entry = match self.tuples.take_slot(tuple, node.right_index_slot)? {
                    StoreSlot::Indexed(entry) => entry,
                    other => {
                        return Err(def.invariant(format!("retract of unknown tuple {:?} ({})", tuple, other.kind())))
                    }
                };
                self.exists_state(def)?.right_index.remove(&entry)?;
                self.exists_uncount_right(def, node, tuple, entry.key())?;
                if filtering {
                    self.tuples.take_slot(tuple, node.right_tracker_slot)?;
                }
                Ok(())
            }
        }
    }

    /// Increments every counter the right tuple matches.
    fn exists_count_right(&mut self, def: &NodeDef, node: &ExistsNode, right: TupleId, key: &IndexKey) -> Result<()> {
        let should_exist = node.should_exist;
        let state = self.exists_state(def)?;
        let counters: SmallVec<[CounterId; 8]> = state.left_index.elements_sharing_key(key).collect();
        if !node.plan.is_filtering() {
            for id in counters {
                state.increment(def, id, should_exist)?;
            }
            return Ok(());
        }
        let mut trackers = Vec::new();
        for id in counters {
            let (left, epoch) = match self.exists_state(def)?.counters.get(id) {
                Some(counter) => (counter.left, counter.epoch),
                None => continue,
            };
            if self.exists_residual(def, node, left, right)? {
                self.exists_state(def)?.increment(def, id, should_exist)?;
                trackers.push((id, epoch));
            }
        }
        self.tuples.put_slot(right, node.right_tracker_slot, StoreSlot::Trackers(trackers))
    }

    /// Reverses [`Self::exists_count_right`] for the key the right tuple was indexed under.
    fn exists_uncount_right(&mut self, def: &NodeDef, node: &ExistsNode, right: TupleId, key: &IndexKey) -> Result<()> {
        let should_exist = node.should_exist;
        if !node.plan.is_filtering() {
            let state = self.exists_state(def)?;
            let counters: SmallVec<[CounterId; 8]> = state.left_index.elements_sharing_key(key).collect();
            for id in counters {
                state.decrement(def, id, should_exist)?;
            }
            return Ok(());
        }
        let trackers = match self.tuples.slot_mut(right, node.right_tracker_slot)? {
            StoreSlot::Trackers(trackers) => std::mem::take(trackers),
            other => return Err(def.invariant(format!("right tuple {:?} has no trackers ({})", right, other.kind()))),
        };
        let state = self.exists_state(def)?;
        for tracker in trackers {
            if state.is_live(&tracker) {
                state.decrement(def, tracker.0, should_exist)?;
            }
        }
        Ok(())
    }

    pub(crate) fn propagate_counters(&mut self, def: &NodeDef) -> Result<()> {
        let queue = std::mem::take(&mut self.exists_state(def)?.queue);
        for id in queue {
            self.count_propagation()?;
            let (left, state, orphan) = match self.exists_state(def)?.counters.get(id) {
                Some(counter) => (counter.left, counter.state, counter.orphan),
                None => return Err(def.invariant(format!("queued counter {:?} vanished", id))),
            };
            let (next, op) = match state {
                TupleState::Creating => (TupleState::Ok, Some(Lifecycle::Insert)),
                TupleState::Updating => (TupleState::Ok, Some(Lifecycle::Update)),
                TupleState::Dying => (TupleState::Dead, Some(Lifecycle::Retract)),
                TupleState::Aborting => (TupleState::Dead, None),
                state => return Err(def.invariant(format!("counter {:?} queued in state {:?}", id, state))),
            };
            let exists = self.exists_state(def)?;
            if next == TupleState::Dead && orphan {
                exists.counters.remove(id);
            } else if let Some(counter) = exists.counters.get_mut(id) {
                counter.state = next;
            }
            if let Some(op) = op {
                self.deliver_children(def, op, left)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{NodeId, NodeKind};
    use crate::tuple::TupleArity;
    use crate::ScorenetError;
    use assert_matches::assert_matches;

    fn exists_def() -> NodeDef {
        NodeDef::new(
            NodeId(2),
            NodeKind::Exists(ExistsNode {
                plan: JoinPlan::default(),
                should_exist: true,
                left_slot: 0,
                right_index_slot: 0,
                right_tracker_slot: 1,
            }),
            TupleArity::One,
            Some("default/Known room".to_string()),
        )
    }

    fn state_with_counter(def: &NodeDef) -> (ExistsState, CounterId) {
        let node = match &def.kind {
            NodeKind::Exists(node) => node,
            _ => unreachable!(),
        };
        let mut state = ExistsState::new(node);
        let id = state.counters.insert(ExistsCounter {
            left: TupleId::default(),
            count: 0,
            state: TupleState::Dead,
            epoch: 0,
            orphan: false,
        });
        (state, id)
    }

    #[test]
    fn test_counter_flips_on_zero_crossings() {
        let def = exists_def();
        let (mut state, id) = state_with_counter(&def);
        state.increment(&def, id, true).unwrap();
        state.increment(&def, id, true).unwrap();
        assert_eq!(state.counters[id].state, TupleState::Creating);
        assert_eq!(state.queue.len(), 1);

        state.decrement(&def, id, true).unwrap();
        assert_eq!(state.counters[id].state, TupleState::Creating);
        state.decrement(&def, id, true).unwrap();
        assert_eq!(state.counters[id].state, TupleState::Aborting);
    }

    #[test]
    fn test_counter_misuse_is_an_invariant_violation() {
        let def = exists_def();
        let (mut state, id) = state_with_counter(&def);
        assert_matches!(state.decrement(&def, id, true), Err(ScorenetError::Invariant { ref node, .. }) if node == "if-exists node#2");
        assert_eq!(state.counters[id].count, 0);

        state.increment(&def, id, true).unwrap();
        state.kill(id);
        assert!(state.counters[id].orphan);
        assert_matches!(state.increment(&def, id, true), Err(ScorenetError::Invariant { .. }));

        let gone = CounterId::default();
        assert_matches!(state.decrement(&def, gone, false), Err(ScorenetError::Invariant { .. }));
    }
}
