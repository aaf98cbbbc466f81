//network.rs
//! The compiled, immutable node network shared by every session built from it.

use crate::analysis::NetworkStatistics;
use crate::constraint::{ConstraintId, ConstraintInfo, ConstraintRef};
use crate::nodes::{NodeDef, NodeId};
use crate::score::Score;
use crate::session::{Session, SessionConfig};
use crate::store::StoreLayout;
use crate::{Result, ScorenetError};
use rustc_hash::FxHashMap as HashMap;
use std::any::TypeId;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

pub struct Network<S: Score> {
    nodes: Vec<NodeDef>,
    sources: HashMap<TypeId, NodeId>,
    constraints: Vec<ConstraintInfo<S>>,
    by_ref: HashMap<ConstraintRef, ConstraintId>,
    layout: StoreLayout,
}

impl<S: Score> Network<S> {
    pub(crate) fn new(
        nodes: Vec<NodeDef>,
        sources: HashMap<TypeId, NodeId>,
        constraints: Vec<ConstraintInfo<S>>,
        layout: StoreLayout,
    ) -> Self {
        let by_ref = constraints
            .iter()
            .map(|c| (c.constraint_ref.clone(), c.id))
            .collect();
        Self {
            nodes,
            sources,
            constraints,
            by_ref,
            layout,
        }
    }

    /// Nodes in topological order.
    pub fn nodes(&self) -> &[NodeDef] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Result<&NodeDef> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| ScorenetError::invariant(id.to_string(), "node is not part of the network"))
    }

    /// Source node of a fact type, if any constraint reads that type.
    pub fn source_for(&self, fact_type: TypeId) -> Option<NodeId> {
        self.sources.get(&fact_type).copied()
    }

    pub fn constraints(&self) -> &[ConstraintInfo<S>] {
        &self.constraints
    }

    pub fn constraint(&self, constraint_ref: &ConstraintRef) -> Option<&ConstraintInfo<S>> {
        self.by_ref
            .get(constraint_ref)
            .and_then(|id| self.constraints.get(id.0))
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn statistics(&self) -> NetworkStatistics {
        let mut node_type_counts = BTreeMap::new();
        for node in &self.nodes {
            *node_type_counts.entry(node.kind.name()).or_insert(0) += 1;
        }
        NetworkStatistics {
            total_nodes: self.nodes.len(),
            source_types: self.sources.len(),
            constraints: self.constraints.len(),
            node_type_counts,
            store_lanes: self.layout.lanes(),
        }
    }

    /// Opens a new, empty session on this network.
    pub fn session(self: &Rc<Self>, config: SessionConfig) -> Session<S> {
        Session::new(Rc::clone(self), config)
    }
}

impl<S: Score> fmt::Debug for Network<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("nodes", &self.nodes.len())
            .field("sources", &self.sources.len())
            .field("constraints", &self.constraints.len())
            .field("lanes", &self.layout.lanes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[derive(Debug)]
    struct Lesson {
        room: u32,
    }
    crate::impl_fact!(Lesson);

    #[derive(Debug)]
    struct Room {
        id: u32,
    }
    crate::impl_fact!(Room);

    #[test]
    fn test_statistics_count_nodes_per_kind() {
        let builder = ConstraintBuilder::<SimpleScore>::new();
        builder
            .constraint("Room zero", SimpleScore::new(1), || {
                builder.for_each::<Lesson>().filter(|l: &Lesson| l.room == 0).penalize()
            })
            .constraint("Booked room", SimpleScore::new(1), || {
                builder
                    .for_each::<Lesson>()
                    .join_on(builder.for_each::<Room>(), |l: &Lesson| l.room, |r: &Room| r.id)
                    .reward()
            });
        let network = builder.build().unwrap();
        let stats = network.statistics();

        assert_eq!(stats.total_nodes, 6);
        assert_eq!(stats.source_types, 2);
        assert_eq!(stats.constraints, 2);
        assert_eq!(stats.node_type_counts["source"], 2);
        assert_eq!(stats.node_type_counts["scorer"], 2);
        assert_eq!(stats.node_type_counts["join"], 1);
        assert!(!stats.node_type_counts.contains_key("group"));
        assert!(stats.store_lanes[1] > 0);
    }
}
