//nodes/source.rs
use crate::arena::TupleId;
use crate::fact::Fact;
use crate::nodes::{NodeDef, NodeId};
use crate::propagation::Propagator;
use crate::score::Score;
use crate::tuple::{AnyTuple, UniTuple};
use crate::Result;
use std::fmt;
use std::rc::Rc;

/// Entry point of one fact type. Shared by every constraint that reads that type.
pub struct SourceNode {
    pub fact_type: &'static str,
}

impl SourceNode {
    pub fn new(fact_type: &'static str) -> Self {
        Self { fact_type }
    }
}

impl fmt::Debug for SourceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceNode").field("fact_type", &self.fact_type).finish()
    }
}

impl<S: Score> Propagator<S> {
    pub(crate) fn source_insert(&mut self, node: NodeId, fact: Rc<dyn Fact>) -> Result<TupleId> {
        self.create_out(node, AnyTuple::Uni(UniTuple::new(fact)))
    }

    pub(crate) fn source_update(&mut self, node: NodeId, tuple: TupleId) -> Result<()> {
        let net = Rc::clone(&self.network);
        let def: &NodeDef = net.node(node)?;
        self.update_out(def, tuple)
    }

    pub(crate) fn source_retract(&mut self, node: NodeId, tuple: TupleId) -> Result<()> {
        let net = Rc::clone(&self.network);
        let def: &NodeDef = net.node(node)?;
        self.retract_out(def, tuple)
    }
}
