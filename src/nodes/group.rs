//nodes/group.rs
use crate::arena::TupleId;
use crate::collectors::{Collector, CollectorSupplier, Receipt};
use crate::fact::Fact;
use crate::key::{IndexKey, KeyExtractor};
use crate::nodes::{Lifecycle, NodeDef, NodeState};
use crate::propagation::Propagator;
use crate::score::Score;
use crate::state::TupleState;
use crate::store::{SlotIndex, StoreSlot, UndoHandle};
use crate::tuple::{AnyTuple, FactList};
use crate::Result;
use rustc_hash::FxHashMap;
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

new_key_type! {
    pub struct GroupId;
}

/// Groups tuples by key and emits `[key columns..., collector results...]` per group.
pub struct GroupNode {
    pub keys: KeyExtractor,
    pub collectors: Vec<CollectorSupplier>,
    /// Undo slot on input tuples.
    pub slot: SlotIndex,
}

impl fmt::Debug for GroupNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupNode")
            .field("keys", &self.keys.column_count())
            .field("collectors", &self.collectors.len())
            .field("slot", &self.slot)
            .finish()
    }
}

pub struct Group {
    pub key: IndexKey,
    pub key_facts: FactList,
    pub collectors: Vec<Box<dyn Collector>>,
    pub out: TupleId,
    pub members: usize,
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("key", &self.key)
            .field("members", &self.members)
            .field("out", &self.out)
            .finish()
    }
}

impl Group {
    fn results(&self) -> FactList {
        let mut facts = self.key_facts.clone();
        facts.extend(self.collectors.iter().map(|c| c.finish()));
        facts
    }
}

#[derive(Debug, Default)]
pub struct GroupState {
    pub groups: SlotMap<GroupId, Group>,
    pub by_key: FxHashMap<IndexKey, GroupId>,
    /// Groups whose out tuple changed, with that tuple.
    pub queue: VecDeque<(GroupId, TupleId)>,
}

impl<S: Score> Propagator<S> {
    fn group_state(&mut self, def: &NodeDef) -> Result<&mut GroupState> {
        match &mut self.states[def.id.0] {
            NodeState::Group(state) => Ok(state),
            _ => Err(def.invariant("group node without group state")),
        }
    }

    fn group_key(&self, def: &NodeDef, node: &GroupNode, tuple: TupleId) -> Result<IndexKey> {
        let t = self.tuples.tuple(tuple)?;
        def.evaluate(t, || node.keys.extract(t))
    }

    pub(crate) fn group(&mut self, def: &NodeDef, node: &GroupNode, op: Lifecycle, tuple: TupleId) -> Result<()> {
        match op {
            Lifecycle::Insert => {
                if !self.tuples.slot(tuple, node.slot)?.is_empty() {
                    return Err(def.invariant(format!("tuple {:?} inserted twice", tuple)));
                }
                let key = self.group_key(def, node, tuple)?;
                self.group_join(def, node, tuple, key)
            }
            Lifecycle::Update => {
                let (group, receipts) = self.take_receipts(def, node, tuple, "update")?;
                let key = self.group_key(def, node, tuple)?;
                let same_group = self
                    .group_state(def)?
                    .groups
                    .get(group)
                    .map_or(false, |g| g.key == key);
                if same_group {
                    self.group_undo(def, group, receipts)?;
                    let receipts = self.group_accumulate(def, group, tuple)?;
                    self.tuples.put_slot(
                        tuple,
                        node.slot,
                        StoreSlot::Undo(UndoHandle::Accumulate { group, receipts }),
                    )?;
                    return self.group_touch(def, group);
                }
                self.group_leave(def, group, receipts)?;
                self.group_join(def, node, tuple, key)
            }
            Lifecycle::Retract => {
                let (group, receipts) = self.take_receipts(def, node, tuple, "retract")?;
                self.group_leave(def, group, receipts)
            }
        }
    }

    fn take_receipts(
        &mut self,
        def: &NodeDef,
        node: &GroupNode,
        tuple: TupleId,
        action: &str,
    ) -> Result<(GroupId, SmallVec<[Receipt; 2]>)> {
        match self.tuples.take_slot(tuple, node.slot)? {
            StoreSlot::Undo(UndoHandle::Accumulate { group, receipts }) => Ok((group, receipts)),
            other => Err(def.invariant(format!("{} of unknown tuple {:?} ({})", action, tuple, other.kind()))),
        }
    }

    /// Adds a tuple to the group for `key`, creating the group when needed.
    fn group_join(&mut self, def: &NodeDef, node: &GroupNode, tuple: TupleId, key: IndexKey) -> Result<()> {
        let existing = self.group_state(def)?.by_key.get(&key).copied();
        let group = match existing {
            Some(group) => {
                self.group_touch(def, group)?;
                group
            }
            None => self.group_create(def, node, tuple, key)?,
        };
        let receipts = self.group_accumulate(def, group, tuple)?;
        self.tuples.put_slot(
            tuple,
            node.slot,
            StoreSlot::Undo(UndoHandle::Accumulate { group, receipts }),
        )
    }

    fn group_create(&mut self, def: &NodeDef, node: &GroupNode, tuple: TupleId, key: IndexKey) -> Result<GroupId> {
        let t = self.tuples.tuple(tuple)?;
        let collectors: Vec<Box<dyn Collector>> =
            def.evaluate(t, || node.collectors.iter().map(|supplier| supplier()).collect())?;
        let key_facts: FactList = key.clone().into_values().into_iter().map(|v| v.into_fact()).collect();
        let mut facts = key_facts.clone();
        facts.extend(def.evaluate(t, || collectors.iter().map(|c| c.finish()).collect::<Vec<Rc<dyn Fact>>>())?);
        let out_tuple = AnyTuple::from_facts(facts).ok_or_else(|| def.invariant("group output outside tuple arity"))?;
        let out = self.tuples.acquire(out_tuple, def.id)?;
        let state = self.group_state(def)?;
        let group = state.groups.insert(Group {
            key: key.clone(),
            key_facts,
            collectors,
            out,
            members: 0,
        });
        state.by_key.insert(key, group);
        state.queue.push_back((group, out));
        Ok(group)
    }

    fn group_accumulate(&mut self, def: &NodeDef, group: GroupId, tuple: TupleId) -> Result<SmallVec<[Receipt; 2]>> {
        let states = &mut self.states;
        let t = self.tuples.tuple(tuple)?;
        let state = match &mut states[def.id.0] {
            NodeState::Group(state) => state,
            _ => return Err(def.invariant("group node without group state")),
        };
        let g = state
            .groups
            .get_mut(group)
            .ok_or_else(|| def.invariant(format!("group {:?} vanished", group)))?;
        let receipts = def.evaluate(t, || g.collectors.iter_mut().map(|c| c.accumulate(t)).collect())?;
        g.members += 1;
        Ok(receipts)
    }

    /// Reverses the accumulations recorded in `receipts` and drops one member.
    fn group_undo(&mut self, def: &NodeDef, group: GroupId, receipts: SmallVec<[Receipt; 2]>) -> Result<usize> {
        let state = self.group_state(def)?;
        let g = state
            .groups
            .get_mut(group)
            .ok_or_else(|| def.invariant(format!("group {:?} vanished", group)))?;
        if receipts.len() != g.collectors.len() {
            return Err(def.invariant(format!(
                "{} receipts for {} collectors",
                receipts.len(),
                g.collectors.len()
            )));
        }
        if g.members == 0 {
            return Err(def.invariant(format!("undo in group {:?} without members", group)));
        }
        for (column, (collector, receipt)) in g.collectors.iter_mut().zip(receipts).enumerate() {
            if !collector.undo(receipt) {
                return Err(def.invariant(format!(
                    "collector {} of group {:?} refused receipt {}",
                    column, group, receipt
                )));
            }
        }
        g.members -= 1;
        Ok(g.members)
    }

    fn group_leave(&mut self, def: &NodeDef, group: GroupId, receipts: SmallVec<[Receipt; 2]>) -> Result<()> {
        if self.group_undo(def, group, receipts)? > 0 {
            return self.group_touch(def, group);
        }
        let state = self.group_state(def)?;
        let removed = state
            .groups
            .remove(group)
            .ok_or_else(|| def.invariant(format!("group {:?} vanished", group)))?;
        state.by_key.remove(&removed.key);
        if self.mark_dying(def, removed.out)? {
            self.group_state(def)?.queue.push_back((group, removed.out));
        }
        Ok(())
    }

    fn group_touch(&mut self, def: &NodeDef, group: GroupId) -> Result<()> {
        let out = match self.group_state(def)?.groups.get(group) {
            Some(g) => g.out,
            None => return Err(def.invariant(format!("group {:?} vanished", group))),
        };
        if self.mark_updating(def, out)? {
            self.group_state(def)?.queue.push_back((group, out));
        }
        Ok(())
    }

    /// Refreshes collector results of changed groups and propagates their out tuples.
    pub(crate) fn propagate_groups(&mut self, def: &NodeDef, _node: &GroupNode) -> Result<()> {
        let queue = std::mem::take(&mut self.group_state(def)?.queue);
        for (group, out) in queue {
            self.count_propagation()?;
            match self.tuples.state(out)? {
                state @ (TupleState::Creating | TupleState::Updating) => {
                    let facts = {
                        let g = match &self.states[def.id.0] {
                            NodeState::Group(s) => s.groups.get(group),
                            _ => None,
                        }
                        .ok_or_else(|| def.invariant(format!("group {:?} vanished", group)))?;
                        let current = self.tuples.tuple(out)?;
                        def.evaluate(current, || g.results())?
                    };
                    let refreshed = AnyTuple::from_facts(facts)
                        .ok_or_else(|| def.invariant("group output outside tuple arity"))?;
                    let entry = self.tuples.get_mut(out)?;
                    let unchanged = state == TupleState::Updating && entry.tuple.same_values(&refreshed);
                    entry.tuple = refreshed;
                    entry.state = TupleState::Ok;
                    if unchanged {
                        continue;
                    }
                    let op = if state == TupleState::Creating { Lifecycle::Insert } else { Lifecycle::Update };
                    self.deliver_children(def, op, out)?;
                }
                TupleState::Dying => {
                    self.deliver_children(def, Lifecycle::Retract, out)?;
                    self.bury(out)?;
                }
                TupleState::Aborting => self.bury(out)?,
                state => return Err(def.invariant(format!("group tuple {:?} queued in state {:?}", out, state))),
            }
        }
        Ok(())
    }
}
