//nodes/mod.rs
//! Node definitions of a compiled network and the per-session state each node keeps.
//!
//! A [`NodeDef`] is immutable and shared by every session created from the same network.
//! Everything a node mutates while propagating lives in a [`NodeState`] owned by the
//! session, indexed by the node id.

pub mod concat;
pub mod distinct;
pub mod exists;
pub mod filter;
pub mod group;
pub mod join;
pub mod map;
pub mod scorer;
pub mod source;

pub use concat::ConcatNode;
pub use distinct::{DistinctNode, DistinctState};
pub use exists::{ExistsNode, ExistsState};
pub use filter::FilterNode;
pub use group::{GroupNode, GroupState};
pub use join::{JoinNode, JoinState};
pub use map::{FlatMapNode, MapNode};
pub use scorer::{ScoreState, ScorerNode};
pub use source::SourceNode;

use crate::arena::TupleId;
use crate::fact::fact_utils::describe_facts;
use crate::tuple::{AnyTuple, TupleArity};
use crate::{Result, ScorenetError};
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Position of a node in the network. Parents always have smaller ids than children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Input side of a node that a parent delivers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    Main,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildLink {
    pub node: NodeId,
    pub port: Port,
}

/// What happened to a tuple, as seen by the node receiving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Insert,
    Update,
    Retract,
}

pub enum NodeKind {
    Source(SourceNode),
    Filter(FilterNode),
    Map(MapNode),
    FlatMap(FlatMapNode),
    Join(JoinNode),
    Exists(ExistsNode),
    Group(GroupNode),
    Distinct(DistinctNode),
    Concat(ConcatNode),
    Scorer(ScorerNode),
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Source(_) => "source",
            NodeKind::Filter(_) => "filter",
            NodeKind::Map(_) => "map",
            NodeKind::FlatMap(_) => "flat-map",
            NodeKind::Join(_) => "join",
            NodeKind::Exists(node) if node.should_exist => "if-exists",
            NodeKind::Exists(_) => "if-not-exists",
            NodeKind::Group(_) => "group",
            NodeKind::Distinct(_) => "distinct",
            NodeKind::Concat(_) => "concat",
            NodeKind::Scorer(_) => "scorer",
        }
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Source(node) => node.fmt(f),
            NodeKind::Filter(node) => node.fmt(f),
            NodeKind::Map(node) => node.fmt(f),
            NodeKind::FlatMap(node) => node.fmt(f),
            NodeKind::Join(node) => node.fmt(f),
            NodeKind::Exists(node) => node.fmt(f),
            NodeKind::Group(node) => node.fmt(f),
            NodeKind::Distinct(node) => node.fmt(f),
            NodeKind::Concat(node) => node.fmt(f),
            NodeKind::Scorer(node) => node.fmt(f),
        }
    }
}

/// One node of a compiled network.
#[derive(Debug)]
pub struct NodeDef {
    pub id: NodeId,
    pub kind: NodeKind,
    pub children: Vec<ChildLink>,
    pub output_arity: TupleArity,
    /// Constraint this node was built for; `None` for shared source nodes.
    pub constraint: Option<String>,
    pub label: String,
}

impl NodeDef {
    pub fn new(id: NodeId, kind: NodeKind, output_arity: TupleArity, constraint: Option<String>) -> Self {
        let label = format!("{} {}", kind.name(), id);
        Self {
            id,
            kind,
            children: Vec::new(),
            output_arity,
            constraint,
            label,
        }
    }

    pub fn constraint_name(&self) -> &str {
        self.constraint.as_deref().unwrap_or("<shared>")
    }

    pub(crate) fn invariant(&self, details: impl Into<String>) -> ScorenetError {
        ScorenetError::invariant(self.label.clone(), details)
    }

    fn evaluation_error(&self, facts: String, payload: Box<dyn Any + Send>) -> ScorenetError {
        ScorenetError::evaluation(self.constraint_name(), self.label.clone(), facts, panic_message(&*payload))
    }

    /// Evaluation error for `tuple` that did not come from a panic.
    pub(crate) fn evaluation_failure(&self, tuple: &AnyTuple, message: impl Into<String>) -> ScorenetError {
        ScorenetError::evaluation(
            self.constraint_name(),
            self.label.clone(),
            describe_facts(tuple.facts_vec().iter()),
            message,
        )
    }

    /// Runs a user function for `tuple`, turning a panic into an evaluation error.
    pub(crate) fn evaluate<T>(&self, tuple: &AnyTuple, f: impl FnOnce() -> T) -> Result<T> {
        panic::catch_unwind(AssertUnwindSafe(f))
            .map_err(|payload| self.evaluation_error(describe_facts(tuple.facts_vec().iter()), payload))
    }

    /// Like [`NodeDef::evaluate`] for functions over a left and a right tuple.
    pub(crate) fn evaluate_pair<T>(
        &self,
        left: &AnyTuple,
        right: &AnyTuple,
        f: impl FnOnce() -> T,
    ) -> Result<T> {
        panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
            let facts = left.facts_vec().iter().chain(right.facts_vec().iter()).cloned().collect::<Vec<_>>();
            self.evaluation_error(describe_facts(facts.iter()), payload)
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "user function panicked".to_string()
    }
}

/// Mutable per-session state of one node.
#[derive(Debug)]
pub enum NodeState {
    /// Filter and scorer nodes keep everything in tuple stores.
    Stateless,
    /// Source, map, flat-map and concat nodes only queue the tuples they own.
    Queue(VecDeque<TupleId>),
    Join(JoinState),
    Exists(ExistsState),
    Group(GroupState),
    Distinct(DistinctState),
}

impl NodeState {
    pub fn for_node(def: &NodeDef) -> Self {
        match &def.kind {
            NodeKind::Source(_) | NodeKind::Map(_) | NodeKind::FlatMap(_) | NodeKind::Concat(_) => {
                NodeState::Queue(VecDeque::new())
            }
            NodeKind::Join(node) => NodeState::Join(JoinState::new(node)),
            NodeKind::Exists(node) => NodeState::Exists(ExistsState::new(node)),
            NodeKind::Group(_) => NodeState::Group(GroupState::default()),
            NodeKind::Distinct(_) => NodeState::Distinct(DistinctState::default()),
            NodeKind::Filter(_) | NodeKind::Scorer(_) => NodeState::Stateless,
        }
    }

    /// Queue of tuples owned by this node, if it owns any.
    pub fn tuple_queue_mut(&mut self) -> Option<&mut VecDeque<TupleId>> {
        match self {
            NodeState::Queue(queue) => Some(queue),
            NodeState::Join(state) => Some(&mut state.queue),
            NodeState::Distinct(state) => Some(&mut state.queue),
            _ => None,
        }
    }

    /// Number of queued items waiting for the next settle.
    pub fn pending(&self) -> usize {
        match self {
            NodeState::Stateless => 0,
            NodeState::Queue(queue) => queue.len(),
            NodeState::Join(state) => state.queue.len(),
            NodeState::Exists(state) => state.queue.len(),
            NodeState::Group(state) => state.queue.len(),
            NodeState::Distinct(state) => state.queue.len(),
        }
    }
}
