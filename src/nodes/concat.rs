//nodes/concat.rs
use crate::arena::TupleId;
use crate::nodes::{Lifecycle, NodeDef};
use crate::propagation::Propagator;
use crate::score::Score;
use crate::store::{SlotIndex, StoreSlot};
use crate::Result;

/// Merges two streams of the same arity. Every input tuple of either side gets its own
/// out tuple, so a tuple present on both sides comes out twice.
#[derive(Debug)]
pub struct ConcatNode {
    pub left_slot: SlotIndex,
    pub right_slot: SlotIndex,
}

impl<S: Score> Propagator<S> {
    pub(crate) fn concat(&mut self, def: &NodeDef, slot: SlotIndex, op: Lifecycle, tuple: TupleId) -> Result<()> {
        match op {
            Lifecycle::Insert => {
                if !self.tuples.slot(tuple, slot)?.is_empty() {
                    return Err(def.invariant(format!("tuple {:?} inserted twice", tuple)));
                }
                let copy = self.tuples.tuple(tuple)?.clone();
                let out = self.create_out(def.id, copy)?;
                self.tuples.put_slot(tuple, slot, StoreSlot::Out(out))
            }
            Lifecycle::Update => {
                let out = match self.tuples.slot(tuple, slot)? {
                    StoreSlot::Out(out) => *out,
                    other => {
                        return Err(def.invariant(format!("update of unknown tuple {:?} ({})", tuple, other.kind())))
                    }
                };
                let fresh = self.tuples.tuple(tuple)?.clone();
                self.tuples.get_mut(out)?.tuple = fresh;
                self.update_out(def, out)
            }
            Lifecycle::Retract => match self.tuples.take_slot(tuple, slot)? {
                StoreSlot::Out(out) => self.retract_out(def, out),
                other => Err(def.invariant(format!("retract of unknown tuple {:?} ({})", tuple, other.kind()))),
            },
        }
    }
}
