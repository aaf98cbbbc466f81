//propagation.rs
//! Per-session propagation engine.
//!
//! Changes are recorded in tuple states and node queues as they arrive. `settle` walks
//! the nodes in id order, which is a topological order of the network, and drains each
//! node's queue, so every node sees the complete batch of its parents before it
//! propagates its own outputs.

use crate::arena::{ArenaStats, TupleArena, TupleId};
use crate::network::Network;
use crate::nodes::{ChildLink, Lifecycle, NodeDef, NodeId, NodeKind, NodeState, Port, ScoreState};
use crate::score::Score;
use crate::session::SessionConfig;
use crate::state::TupleState;
use crate::tuple::AnyTuple;
use crate::Result;
use log::trace;
use std::rc::Rc;

pub struct Propagator<S: Score> {
    pub(crate) network: Rc<Network<S>>,
    pub(crate) tuples: TupleArena,
    pub(crate) states: Vec<NodeState>,
    pub(crate) scores: ScoreState<S>,
    /// Tuples that died during the current settle. Released once it completes.
    pub(crate) graveyard: Vec<TupleId>,
    pub(crate) config: SessionConfig,
    propagated: usize,
}

impl<S: Score> Propagator<S> {
    pub fn new(network: Rc<Network<S>>, config: SessionConfig) -> Self {
        let states = network.nodes().iter().map(NodeState::for_node).collect();
        let scores = ScoreState::new(network.constraints(), config.track_constraint_matches);
        let tuples = TupleArena::new(network.layout().clone(), config.limits.clone());
        Self {
            network,
            tuples,
            states,
            scores,
            graveyard: Vec::new(),
            config,
            propagated: 0,
        }
    }

    /// Propagates every pending change to the scorers. Returns the number of queue items
    /// processed.
    pub fn settle(&mut self) -> Result<usize> {
        let net = Rc::clone(&self.network);
        self.propagated = 0;
        for def in net.nodes() {
            if self.states[def.id.0].pending() == 0 {
                continue;
            }
            match &def.kind {
                NodeKind::Exists(_) => self.propagate_counters(def)?,
                NodeKind::Group(node) => self.propagate_groups(def, node)?,
                _ => self.propagate_tuples(def)?,
            }
        }
        let released = self.graveyard.len();
        self.release_dead()?;
        trace!(
            "Settled {} queued items, released {} tuples, {} live",
            self.propagated,
            released,
            self.tuples.len()
        );
        Ok(self.propagated)
    }

    /// Items still waiting in node queues.
    pub fn pending(&self) -> usize {
        self.states.iter().map(NodeState::pending).sum()
    }

    pub fn stats(&self) -> ArenaStats {
        self.tuples.stats()
    }

    pub(crate) fn count_propagation(&mut self) -> Result<()> {
        self.propagated += 1;
        self.config.limits.check_propagation_limit(self.propagated)
    }

    fn propagate_tuples(&mut self, def: &NodeDef) -> Result<()> {
        let queue = match self.states[def.id.0].tuple_queue_mut() {
            Some(queue) => std::mem::take(queue),
            None => return Ok(()),
        };
        for id in queue {
            self.count_propagation()?;
            match self.tuples.state(id)? {
                TupleState::Creating => {
                    self.tuples.set_state(id, TupleState::Ok)?;
                    self.deliver_children(def, Lifecycle::Insert, id)?;
                }
                TupleState::Updating => {
                    self.tuples.set_state(id, TupleState::Ok)?;
                    self.deliver_children(def, Lifecycle::Update, id)?;
                }
                TupleState::Dying => {
                    self.deliver_children(def, Lifecycle::Retract, id)?;
                    self.bury(id)?;
                }
                TupleState::Aborting => self.bury(id)?,
                state @ (TupleState::Ok | TupleState::Dead) => {
                    return Err(def.invariant(format!("tuple {:?} queued in state {:?}", id, state)));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn bury(&mut self, id: TupleId) -> Result<()> {
        self.tuples.set_state(id, TupleState::Dead)?;
        self.graveyard.push(id);
        Ok(())
    }

    fn release_dead(&mut self) -> Result<()> {
        let check_store = self.config.strict_assertions;
        for id in std::mem::take(&mut self.graveyard) {
            self.tuples.release(id, check_store)?;
        }
        Ok(())
    }

    pub(crate) fn deliver_children(&mut self, def: &NodeDef, op: Lifecycle, tuple: TupleId) -> Result<()> {
        for link in &def.children {
            self.deliver(*link, op, tuple)?;
        }
        Ok(())
    }

    /// Hands a lifecycle event to one child port.
    pub(crate) fn deliver(&mut self, link: ChildLink, op: Lifecycle, tuple: TupleId) -> Result<()> {
        let net = Rc::clone(&self.network);
        let def = net.node(link.node)?;
        match (&def.kind, link.port) {
            (NodeKind::Filter(node), Port::Main) => self.filter(def, node, op, tuple),
            (NodeKind::Map(node), Port::Main) => self.map(def, node, op, tuple),
            (NodeKind::FlatMap(node), Port::Main) => self.flat_map(def, node, op, tuple),
            (NodeKind::Join(node), Port::Left) => self.join_left(def, node, op, tuple),
            (NodeKind::Join(node), Port::Right) => self.join_right(def, node, op, tuple),
            (NodeKind::Exists(node), Port::Left) => self.exists_left(def, node, op, tuple),
            (NodeKind::Exists(node), Port::Right) => self.exists_right(def, node, op, tuple),
            (NodeKind::Group(node), Port::Main) => self.group(def, node, op, tuple),
            (NodeKind::Distinct(node), Port::Main) => self.distinct(def, node, op, tuple),
            (NodeKind::Concat(node), Port::Left) => self.concat(def, node.left_slot, op, tuple),
            (NodeKind::Concat(node), Port::Right) => self.concat(def, node.right_slot, op, tuple),
            (NodeKind::Scorer(node), Port::Main) => self.score(def, node, op, tuple),
            (kind, port) => Err(def.invariant(format!("{} node has no {:?} input", kind.name(), port))),
        }
    }

    /// Creates a tuple owned by `node` and queues it for insertion.
    pub(crate) fn create_out(&mut self, node: NodeId, tuple: AnyTuple) -> Result<TupleId> {
        let id = self.tuples.acquire(tuple, node)?;
        self.enqueue(node, id)?;
        Ok(id)
    }

    /// Marks an owned tuple as changed. Tuples already queued absorb the change.
    pub(crate) fn update_out(&mut self, def: &NodeDef, out: TupleId) -> Result<()> {
        if self.mark_updating(def, out)? {
            self.enqueue(def.id, out)?;
        }
        Ok(())
    }

    /// Marks an owned tuple for retraction. A tuple children never saw is aborted.
    pub(crate) fn retract_out(&mut self, def: &NodeDef, out: TupleId) -> Result<()> {
        if self.mark_dying(def, out)? {
            self.enqueue(def.id, out)?;
        }
        Ok(())
    }

    /// Returns true when the tuple was idle and must now be queued.
    pub(crate) fn mark_updating(&mut self, def: &NodeDef, out: TupleId) -> Result<bool> {
        match self.tuples.state(out)? {
            TupleState::Ok => {
                self.tuples.set_state(out, TupleState::Updating)?;
                Ok(true)
            }
            TupleState::Creating | TupleState::Updating => Ok(false),
            state => Err(def.invariant(format!("cannot update tuple {:?} in state {:?}", out, state))),
        }
    }

    /// Returns true when the tuple was idle and must now be queued.
    pub(crate) fn mark_dying(&mut self, def: &NodeDef, out: TupleId) -> Result<bool> {
        match self.tuples.state(out)? {
            TupleState::Creating => {
                self.tuples.set_state(out, TupleState::Aborting)?;
                Ok(false)
            }
            TupleState::Updating => {
                self.tuples.set_state(out, TupleState::Dying)?;
                Ok(false)
            }
            TupleState::Ok => {
                self.tuples.set_state(out, TupleState::Dying)?;
                Ok(true)
            }
            state => Err(def.invariant(format!("cannot retract tuple {:?} in state {:?}", out, state))),
        }
    }

    fn enqueue(&mut self, node: NodeId, tuple: TupleId) -> Result<()> {
        match self.states.get_mut(node.0).and_then(NodeState::tuple_queue_mut) {
            Some(queue) => {
                queue.push_back(tuple);
                Ok(())
            }
            None => Err(crate::ScorenetError::invariant(
                node.to_string(),
                "node does not own a tuple queue",
            )),
        }
    }
}

impl<S: Score> std::fmt::Debug for Propagator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Propagator")
            .field("nodes", &self.states.len())
            .field("tuples", &self.tuples.len())
            .field("pending", &self.pending())
            .field("score", &self.scores.total())
            .finish()
    }
}
