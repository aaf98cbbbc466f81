//nodes/filter.rs
use crate::arena::TupleId;
use crate::nodes::{Lifecycle, NodeDef};
use crate::propagation::Propagator;
use crate::score::Score;
use crate::store::{SlotIndex, StoreSlot};
use crate::tuple::AnyTuple;
use crate::Result;
use std::fmt;
use std::rc::Rc;

pub type TuplePredicate = Rc<dyn Fn(&AnyTuple) -> bool>;

/// Passes through the tuples its predicate accepts. Owns no tuples of its own.
pub struct FilterNode {
    pub predicate: TuplePredicate,
    /// Remembers the last verdict, so an update knows what children have seen.
    pub slot: SlotIndex,
}

impl FilterNode {
    pub fn new(predicate: TuplePredicate, slot: SlotIndex) -> Self {
        Self { predicate, slot }
    }
}

impl fmt::Debug for FilterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterNode")
            .field("predicate", &"<function>")
            .field("slot", &self.slot)
            .finish()
    }
}

impl<S: Score> Propagator<S> {
    fn test_filter(&self, def: &NodeDef, node: &FilterNode, tuple: TupleId) -> Result<bool> {
        let t = self.tuples.tuple(tuple)?;
        def.evaluate(t, || (node.predicate)(t))
    }

    pub(crate) fn filter(&mut self, def: &NodeDef, node: &FilterNode, op: Lifecycle, tuple: TupleId) -> Result<()> {
        match op {
            Lifecycle::Insert => {
                if !self.tuples.slot(tuple, node.slot)?.is_empty() {
                    return Err(def.invariant(format!("tuple {:?} inserted twice", tuple)));
                }
                let passed = self.test_filter(def, node, tuple)?;
                self.tuples.put_slot(tuple, node.slot, StoreSlot::Filtered { passed })?;
                if passed {
                    self.deliver_children(def, Lifecycle::Insert, tuple)?;
                }
                Ok(())
            }
            Lifecycle::Update => {
                let was = match self.tuples.slot(tuple, node.slot)? {
                    StoreSlot::Filtered { passed } => *passed,
                    other => {
                        return Err(def.invariant(format!("update of unknown tuple {:?} ({})", tuple, other.kind())))
                    }
                };
                let passed = self.test_filter(def, node, tuple)?;
                self.tuples.put_slot(tuple, node.slot, StoreSlot::Filtered { passed })?;
                match (was, passed) {
                    (true, true) => self.deliver_children(def, Lifecycle::Update, tuple),
                    (true, false) => self.deliver_children(def, Lifecycle::Retract, tuple),
                    (false, true) => self.deliver_children(def, Lifecycle::Insert, tuple),
                    (false, false) => Ok(()),
                }
            }
            Lifecycle::Retract => match self.tuples.take_slot(tuple, node.slot)? {
                StoreSlot::Filtered { passed: true } => self.deliver_children(def, Lifecycle::Retract, tuple),
                StoreSlot::Filtered { passed: false } => Ok(()),
                other => Err(def.invariant(format!("retract of unknown tuple {:?} ({})", tuple, other.kind()))),
            },
        }
    }
}
