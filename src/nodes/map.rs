//nodes/map.rs
use crate::arena::TupleId;
use crate::fact::Fact;
use crate::nodes::{Lifecycle, NodeDef};
use crate::propagation::Propagator;
use crate::score::Score;
use crate::store::{OutList, SlotIndex, StoreSlot};
use crate::tuple::{AnyTuple, FactList, UniTuple};
use crate::Result;
use std::fmt;
use std::rc::Rc;

pub type TupleMapper = Rc<dyn Fn(&AnyTuple) -> Rc<dyn Fact>>;
pub type TupleFlatMapper = Rc<dyn Fn(&AnyTuple) -> Vec<Rc<dyn Fact>>>;

/// Replaces each tuple by one tuple of mapped facts, one mapper per output column.
pub struct MapNode {
    pub mappers: Vec<TupleMapper>,
    pub slot: SlotIndex,
}

impl fmt::Debug for MapNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapNode")
            .field("columns", &self.mappers.len())
            .field("slot", &self.slot)
            .finish()
    }
}

/// Expands each tuple into one single-fact tuple per produced fact.
pub struct FlatMapNode {
    pub mapper: TupleFlatMapper,
    pub slot: SlotIndex,
}

impl fmt::Debug for FlatMapNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlatMapNode").field("slot", &self.slot).finish()
    }
}

impl<S: Score> Propagator<S> {
    fn map_facts(&self, def: &NodeDef, node: &MapNode, tuple: TupleId) -> Result<FactList> {
        let t = self.tuples.tuple(tuple)?;
        def.evaluate(t, || node.mappers.iter().map(|mapper| mapper(t)).collect())
    }

    pub(crate) fn map(&mut self, def: &NodeDef, node: &MapNode, op: Lifecycle, tuple: TupleId) -> Result<()> {
        match op {
            Lifecycle::Insert => {
                if !self.tuples.slot(tuple, node.slot)?.is_empty() {
                    return Err(def.invariant(format!("tuple {:?} inserted twice", tuple)));
                }
                let facts = self.map_facts(def, node, tuple)?;
                let mapped = AnyTuple::from_facts(facts)
                    .ok_or_else(|| def.invariant("mapper count outside tuple arity"))?;
                let out = self.create_out(def.id, mapped)?;
                self.tuples.put_slot(tuple, node.slot, StoreSlot::Out(out))
            }
            Lifecycle::Update => {
                let out = match self.tuples.slot(tuple, node.slot)? {
                    StoreSlot::Out(out) => *out,
                    other => {
                        return Err(def.invariant(format!("update of unknown tuple {:?} ({})", tuple, other.kind())))
                    }
                };
                let facts = self.map_facts(def, node, tuple)?;
                let mapped = AnyTuple::from_facts(facts)
                    .ok_or_else(|| def.invariant("mapper count outside tuple arity"))?;
                if self.tuples.tuple(out)?.same_values(&mapped) {
                    return Ok(());
                }
                self.tuples.get_mut(out)?.tuple = mapped;
                self.update_out(def, out)
            }
            Lifecycle::Retract => match self.tuples.take_slot(tuple, node.slot)? {
                StoreSlot::Out(out) => self.retract_out(def, out),
                other => Err(def.invariant(format!("retract of unknown tuple {:?} ({})", tuple, other.kind()))),
            },
        }
    }

    fn flat_map_facts(&self, def: &NodeDef, node: &FlatMapNode, tuple: TupleId) -> Result<Vec<Rc<dyn Fact>>> {
        let t = self.tuples.tuple(tuple)?;
        def.evaluate(t, || (node.mapper)(t))
    }

    fn flat_map_insert(&mut self, def: &NodeDef, facts: Vec<Rc<dyn Fact>>) -> Result<OutList> {
        let mut outs = OutList::with_capacity(facts.len());
        for fact in facts {
            outs.push(self.create_out(def.id, AnyTuple::Uni(UniTuple::new(fact)))?);
        }
        Ok(outs)
    }

    pub(crate) fn flat_map(&mut self, def: &NodeDef, node: &FlatMapNode, op: Lifecycle, tuple: TupleId) -> Result<()> {
        match op {
            Lifecycle::Insert => {
                if !self.tuples.slot(tuple, node.slot)?.is_empty() {
                    return Err(def.invariant(format!("tuple {:?} inserted twice", tuple)));
                }
                let facts = self.flat_map_facts(def, node, tuple)?;
                let outs = self.flat_map_insert(def, facts)?;
                self.tuples.put_slot(tuple, node.slot, StoreSlot::OutList(outs))
            }
            Lifecycle::Update => {
                let old = match self.tuples.take_slot(tuple, node.slot)? {
                    StoreSlot::OutList(outs) => outs,
                    other => {
                        return Err(def.invariant(format!("update of unknown tuple {:?} ({})", tuple, other.kind())))
                    }
                };
                let facts = self.flat_map_facts(def, node, tuple)?;
                if facts.len() == old.len() {
                    // Same shape: refresh the existing outputs in place.
                    for (out, fact) in old.iter().zip(facts) {
                        let fresh = AnyTuple::Uni(UniTuple::new(fact));
                        if self.tuples.tuple(*out)?.same_values(&fresh) {
                            continue;
                        }
                        self.tuples.get_mut(*out)?.tuple = fresh;
                        self.update_out(def, *out)?;
                    }
                    return self.tuples.put_slot(tuple, node.slot, StoreSlot::OutList(old));
                }
                for out in old {
                    self.retract_out(def, out)?;
                }
                let outs = self.flat_map_insert(def, facts)?;
                self.tuples.put_slot(tuple, node.slot, StoreSlot::OutList(outs))
            }
            Lifecycle::Retract => match self.tuples.take_slot(tuple, node.slot)? {
                StoreSlot::OutList(outs) => {
                    for out in outs {
                        self.retract_out(def, out)?;
                    }
                    Ok(())
                }
                other => Err(def.invariant(format!("retract of unknown tuple {:?} ({})", tuple, other.kind()))),
            },
        }
    }
}
