//nodes/distinct.rs
use crate::arena::TupleId;
use crate::key::{IndexKey, KeyValue};
use crate::nodes::{Lifecycle, NodeDef, NodeState};
use crate::propagation::Propagator;
use crate::score::Score;
use crate::store::{SlotIndex, StoreSlot};
use crate::tuple::AnyTuple;
use crate::Result;
use rustc_hash::FxHashMap;
use slotmap::{new_key_type, SlotMap};
use std::collections::VecDeque;

new_key_type! {
    pub struct DistinctId;
}

/// Passes each distinct tuple on once, however many input tuples carry it.
///
/// Plain values (integers, bools, text) compare by value; every other fact compares by
/// identity, see [`KeyValue::of_value`].
#[derive(Debug)]
pub struct DistinctNode {
    /// Entry slot on input tuples.
    pub slot: SlotIndex,
}

#[derive(Debug)]
pub struct DistinctEntry {
    pub key: IndexKey,
    pub out: TupleId,
    pub members: usize,
}

#[derive(Debug, Default)]
pub struct DistinctState {
    pub entries: SlotMap<DistinctId, DistinctEntry>,
    pub by_key: FxHashMap<IndexKey, DistinctId>,
    pub queue: VecDeque<TupleId>,
}

pub(crate) fn distinct_key(tuple: &AnyTuple) -> IndexKey {
    IndexKey::from_values(tuple.facts_vec().iter().map(KeyValue::of_value).collect())
}

fn holds_facts(key: &IndexKey) -> bool {
    (0..key.len()).filter_map(|column| key.get(column)).any(KeyValue::is_fact)
}

impl<S: Score> Propagator<S> {
    fn distinct_state(&mut self, def: &NodeDef) -> Result<&mut DistinctState> {
        match &mut self.states[def.id.0] {
            NodeState::Distinct(state) => Ok(state),
            _ => Err(def.invariant("distinct node without distinct state")),
        }
    }

    pub(crate) fn distinct(&mut self, def: &NodeDef, node: &DistinctNode, op: Lifecycle, tuple: TupleId) -> Result<()> {
        match op {
            Lifecycle::Insert => {
                if !self.tuples.slot(tuple, node.slot)?.is_empty() {
                    return Err(def.invariant(format!("tuple {:?} inserted twice", tuple)));
                }
                let key = distinct_key(self.tuples.tuple(tuple)?);
                self.distinct_join(def, node, tuple, key)
            }
            Lifecycle::Update => {
                let entry = self.take_entry(def, node, tuple, "update")?;
                let key = distinct_key(self.tuples.tuple(tuple)?);
                let out = match self.distinct_state(def)?.entries.get(entry) {
                    Some(e) if e.key == key => Some(e.out),
                    Some(_) => None,
                    None => return Err(def.invariant(format!("distinct entry {:?} vanished", entry))),
                };
                match out {
                    Some(out) => {
                        self.tuples.put_slot(tuple, node.slot, StoreSlot::Distinct(entry))?;
                        // Equal plain values cannot have changed; facts may have.
                        if holds_facts(&key) {
                            self.update_out(def, out)?;
                        }
                        Ok(())
                    }
                    None => {
                        self.distinct_leave(def, entry)?;
                        self.distinct_join(def, node, tuple, key)
                    }
                }
            }
            Lifecycle::Retract => {
                let entry = self.take_entry(def, node, tuple, "retract")?;
                self.distinct_leave(def, entry)
            }
        }
    }

    fn take_entry(&mut self, def: &NodeDef, node: &DistinctNode, tuple: TupleId, action: &str) -> Result<DistinctId> {
        match self.tuples.take_slot(tuple, node.slot)? {
            StoreSlot::Distinct(entry) => Ok(entry),
            other => Err(def.invariant(format!("{} of unknown tuple {:?} ({})", action, tuple, other.kind()))),
        }
    }

    fn distinct_join(&mut self, def: &NodeDef, node: &DistinctNode, tuple: TupleId, key: IndexKey) -> Result<()> {
        let existing = self.distinct_state(def)?.by_key.get(&key).copied();
        let entry = match existing {
            Some(entry) => {
                let e = self
                    .distinct_state(def)?
                    .entries
                    .get_mut(entry)
                    .ok_or_else(|| def.invariant(format!("distinct entry {:?} vanished", entry)))?;
                e.members += 1;
                entry
            }
            None => {
                let copy = self.tuples.tuple(tuple)?.clone();
                let out = self.create_out(def.id, copy)?;
                let state = self.distinct_state(def)?;
                let entry = state.entries.insert(DistinctEntry {
                    key: key.clone(),
                    out,
                    members: 1,
                });
                state.by_key.insert(key, entry);
                entry
            }
        };
        self.tuples.put_slot(tuple, node.slot, StoreSlot::Distinct(entry))
    }

    fn distinct_leave(&mut self, def: &NodeDef, entry: DistinctId) -> Result<()> {
        let state = self.distinct_state(def)?;
        let e = state
            .entries
            .get_mut(entry)
            .ok_or_else(|| def.invariant(format!("distinct entry {:?} vanished", entry)))?;
        if e.members == 0 {
            return Err(def.invariant(format!("distinct entry {:?} without members", entry)));
        }
        e.members -= 1;
        if e.members > 0 {
            return Ok(());
        }
        let out = e.out;
        if let Some(removed) = state.entries.remove(entry) {
            state.by_key.remove(&removed.key);
        }
        self.retract_out(def, out)
    }
}
