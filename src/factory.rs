//factory.rs
//! Compiles constraint definitions into a [`Network`].
//!
//! Node ids are handed out in creation order and a node is only created after all of its
//! parents, so id order is a topological order. Source nodes are shared by fact type; every
//! other node belongs to exactly one constraint. A stream value used twice inside the same
//! constraint compiles to one node with two child links.

use crate::constraint::{ConstraintId, ConstraintInfo, ConstraintWeights};
use crate::constraint_builder::ConstraintDefinition;
use crate::joiner::JoinerPlanner;
use crate::key::KeyExtractor;
use crate::network::Network;
use crate::nodes::concat::ConcatNode;
use crate::nodes::distinct::DistinctNode;
use crate::nodes::exists::ExistsNode;
use crate::nodes::group::GroupNode;
use crate::nodes::join::{JoinNode, JoinSide};
use crate::nodes::map::{FlatMapNode, MapNode};
use crate::nodes::{ChildLink, FilterNode, NodeDef, NodeId, NodeKind, Port, ScorerNode, SourceNode};
use crate::score::Score;
use crate::store::StoreLayout;
use crate::stream_def::StreamDefinition;
use crate::tuple::{TupleArity, MAX_ARITY};
use crate::{Result, ScorenetError};
use log::debug;
use rustc_hash::FxHashMap as HashMap;
use std::any::TypeId;
use std::collections::BTreeMap;
use std::rc::Rc;

pub struct ConstraintFactory<S: Score> {
    planner: Rc<dyn JoinerPlanner>,
    weights: ConstraintWeights<S>,
    nodes: Vec<NodeDef>,
    sources: HashMap<TypeId, NodeId>,
    constraints: Vec<ConstraintInfo<S>>,
    layout: StoreLayout,
}

/// Streams already compiled for the constraint being built, keyed by definition address.
type BuiltStreams = HashMap<*const StreamDefinition, (NodeId, TupleArity)>;

impl<S: Score> ConstraintFactory<S> {
    pub fn new(planner: Rc<dyn JoinerPlanner>, weights: ConstraintWeights<S>) -> Self {
        Self {
            planner,
            weights,
            nodes: Vec::new(),
            sources: HashMap::default(),
            constraints: Vec::new(),
            layout: StoreLayout::new(),
        }
    }

    /// Builds the whole network. Any malformed constraint fails the build.
    pub fn build_network(mut self, definitions: &[ConstraintDefinition<S>]) -> Result<Network<S>> {
        for definition in definitions {
            self.build_constraint(definition)?;
        }

        let mut per_kind: BTreeMap<&'static str, usize> = BTreeMap::new();
        for node in &self.nodes {
            *per_kind.entry(node.kind.name()).or_insert(0) += 1;
        }
        debug!(
            "Built network: {} constraints, {} nodes {:?}, store lanes {:?}",
            self.constraints.len(),
            self.nodes.len(),
            per_kind,
            self.layout.lanes()
        );
        Ok(Network::new(self.nodes, self.sources, self.constraints, self.layout))
    }

    fn build_constraint(&mut self, definition: &ConstraintDefinition<S>) -> Result<()> {
        let constraint_ref = &definition.constraint_ref;
        let name = constraint_ref.to_string();
        if self.constraints.iter().any(|c| &c.constraint_ref == constraint_ref) {
            return Err(ScorenetError::configuration(name, "constraint is defined more than once"));
        }

        let mut built = BuiltStreams::default();
        let (tip, arity) = self.build_stream(&definition.recipe.definition, &name, &mut built)?;

        let id = ConstraintId(self.constraints.len());
        let slot = self.layout.reserve(arity);
        let scorer = self.push_node(
            NodeKind::Scorer(ScorerNode {
                constraint: id,
                impact: definition.recipe.impact,
                weigher: definition.recipe.weigher.clone(),
                slot,
            }),
            arity,
            Some(&name),
        );
        self.link(tip, scorer, Port::Main);

        self.constraints.push(ConstraintInfo {
            id,
            constraint_ref: constraint_ref.clone(),
            weight: self.weights.resolve(constraint_ref, definition.weight),
            impact: definition.recipe.impact,
        });
        Ok(())
    }

    fn build_stream(
        &mut self,
        definition: &Rc<StreamDefinition>,
        constraint: &str,
        built: &mut BuiltStreams,
    ) -> Result<(NodeId, TupleArity)> {
        let address = Rc::as_ptr(definition);
        if let Some(existing) = built.get(&address) {
            return Ok(*existing);
        }

        let compiled = match definition.as_ref() {
            StreamDefinition::ForEach { fact_type, type_name } => match self.sources.get(fact_type) {
                Some(node) => (*node, TupleArity::One),
                None => {
                    let node = self.push_node(NodeKind::Source(SourceNode::new(type_name)), TupleArity::One, None);
                    self.sources.insert(*fact_type, node);
                    (node, TupleArity::One)
                }
            },
            StreamDefinition::Filter { source, predicate } => {
                let (parent, arity) = self.build_stream(source, constraint, built)?;
                let slot = self.layout.reserve(arity);
                let node = self.push_node(
                    NodeKind::Filter(FilterNode::new(Rc::clone(predicate), slot)),
                    arity,
                    Some(constraint),
                );
                self.link(parent, node, Port::Main);
                (node, arity)
            }
            StreamDefinition::Map { source, mappers } => {
                let out_arity = Self::checked_arity(constraint, "map", mappers.len())?;
                let (parent, arity) = self.build_stream(source, constraint, built)?;
                let slot = self.layout.reserve(arity);
                let node = self.push_node(
                    NodeKind::Map(MapNode {
                        mappers: mappers.clone(),
                        slot,
                    }),
                    out_arity,
                    Some(constraint),
                );
                self.link(parent, node, Port::Main);
                (node, out_arity)
            }
            StreamDefinition::FlatMap { source, mapper } => {
                let (parent, arity) = self.build_stream(source, constraint, built)?;
                let slot = self.layout.reserve(arity);
                let node = self.push_node(
                    NodeKind::FlatMap(FlatMapNode {
                        mapper: Rc::clone(mapper),
                        slot,
                    }),
                    TupleArity::One,
                    Some(constraint),
                );
                self.link(parent, node, Port::Main);
                (node, TupleArity::One)
            }
            StreamDefinition::Join { left, right, joiners } => {
                let out_arity = Self::checked_arity(constraint, "join", definition.output_arity())?;
                let (left_parent, left_arity) = self.build_stream(left, constraint, built)?;
                let (right_parent, right_arity) = self.build_stream(right, constraint, built)?;
                let left_side = JoinSide {
                    index_slot: self.layout.reserve(left_arity),
                    out_slot: self.layout.reserve(left_arity),
                };
                let right_side = JoinSide {
                    index_slot: self.layout.reserve(right_arity),
                    out_slot: self.layout.reserve(right_arity),
                };
                let parents_slot = self.layout.reserve(out_arity);
                let node = self.push_node(
                    NodeKind::Join(JoinNode {
                        plan: self.planner.plan(joiners),
                        left: left_side,
                        right: right_side,
                        parents_slot,
                    }),
                    out_arity,
                    Some(constraint),
                );
                self.link(left_parent, node, Port::Left);
                self.link(right_parent, node, Port::Right);
                (node, out_arity)
            }
            StreamDefinition::Exists {
                left,
                right,
                joiners,
                should_exist,
            } => {
                let (left_parent, left_arity) = self.build_stream(left, constraint, built)?;
                let (right_parent, right_arity) = self.build_stream(right, constraint, built)?;
                let node = ExistsNode {
                    plan: self.planner.plan(joiners),
                    should_exist: *should_exist,
                    left_slot: self.layout.reserve(left_arity),
                    right_index_slot: self.layout.reserve(right_arity),
                    right_tracker_slot: self.layout.reserve(right_arity),
                };
                let node = self.push_node(NodeKind::Exists(node), left_arity, Some(constraint));
                self.link(left_parent, node, Port::Left);
                self.link(right_parent, node, Port::Right);
                (node, left_arity)
            }
            StreamDefinition::Group {
                source,
                keys,
                collectors,
            } => {
                let out_arity = Self::checked_arity(constraint, "group_by", keys.len() + collectors.len())?;
                let (parent, arity) = self.build_stream(source, constraint, built)?;
                let slot = self.layout.reserve(arity);
                let node = self.push_node(
                    NodeKind::Group(GroupNode {
                        keys: KeyExtractor::new(keys.clone()),
                        collectors: collectors.clone(),
                        slot,
                    }),
                    out_arity,
                    Some(constraint),
                );
                self.link(parent, node, Port::Main);
                (node, out_arity)
            }
            StreamDefinition::Distinct { source } => {
                let (parent, arity) = self.build_stream(source, constraint, built)?;
                let slot = self.layout.reserve(arity);
                let node = self.push_node(NodeKind::Distinct(DistinctNode { slot }), arity, Some(constraint));
                self.link(parent, node, Port::Main);
                (node, arity)
            }
            StreamDefinition::Concat { left, right } => {
                let (left_parent, left_arity) = self.build_stream(left, constraint, built)?;
                let (right_parent, right_arity) = self.build_stream(right, constraint, built)?;
                if left_arity != right_arity {
                    return Err(ScorenetError::configuration(
                        constraint,
                        format!(
                            "concat of streams with {} and {} facts per tuple",
                            left_arity.as_usize(),
                            right_arity.as_usize()
                        ),
                    ));
                }
                let node = ConcatNode {
                    left_slot: self.layout.reserve(left_arity),
                    right_slot: self.layout.reserve(right_arity),
                };
                let node = self.push_node(NodeKind::Concat(node), left_arity, Some(constraint));
                self.link(left_parent, node, Port::Left);
                self.link(right_parent, node, Port::Right);
                (node, left_arity)
            }
        };

        built.insert(address, compiled);
        Ok(compiled)
    }

    fn checked_arity(constraint: &str, operation: &str, arity: usize) -> Result<TupleArity> {
        TupleArity::from_usize(arity).ok_or_else(|| {
            ScorenetError::configuration(
                constraint,
                format!(
                    "{} produces tuples of {} facts, supported are 1 to {}",
                    operation, arity, MAX_ARITY
                ),
            )
        })
    }

    fn push_node(&mut self, kind: NodeKind, output_arity: TupleArity, constraint: Option<&str>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes
            .push(NodeDef::new(id, kind, output_arity, constraint.map(str::to_string)));
        id
    }

    fn link(&mut self, parent: NodeId, child: NodeId, port: Port) {
        if let Some(def) = self.nodes.get_mut(parent.0) {
            def.children.push(ChildLink { node: child, port });
        }
    }
}

impl<S: Score> std::fmt::Debug for ConstraintFactory<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstraintFactory")
            .field("planner", &self.planner)
            .field("nodes", &self.nodes.len())
            .field("constraints", &self.constraints.len())
            .finish()
    }
}
