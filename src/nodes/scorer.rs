//nodes/scorer.rs
use crate::arena::TupleId;
use crate::constraint::{ConstraintId, ConstraintInfo, ImpactType};
use crate::nodes::{Lifecycle, NodeDef};
use crate::propagation::Propagator;
use crate::score::Score;
use crate::store::{SlotIndex, StoreSlot, UndoHandle};
use crate::tuple::{AnyTuple, FactList};
use crate::Result;
use slotmap::{new_key_type, SlotMap};
use std::fmt;
use std::rc::Rc;

new_key_type! {
    pub struct ImpactId;
}

pub type MatchWeigher = Rc<dyn Fn(&AnyTuple) -> i64>;

/// Terminal node of a constraint: every tuple reaching it is one match.
pub struct ScorerNode {
    pub constraint: ConstraintId,
    pub impact: ImpactType,
    /// Match weight function; every match weighs 1 without one.
    pub weigher: Option<MatchWeigher>,
    pub slot: SlotIndex,
}

impl fmt::Debug for ScorerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScorerNode")
            .field("constraint", &self.constraint)
            .field("impact", &self.impact)
            .field("weighted", &self.weigher.is_some())
            .field("slot", &self.slot)
            .finish()
    }
}

/// Score contribution of one match, kept so it can be subtracted exactly.
#[derive(Debug, Clone)]
pub struct Impact<S: Score> {
    pub constraint: ConstraintId,
    pub match_weight: i64,
    pub delta: S,
    /// Facts of the match; only recorded when match tracking is on.
    pub facts: Option<FactList>,
}

#[derive(Debug, Clone)]
pub struct ConstraintBucket<S: Score> {
    pub weight: S,
    pub impact: ImpactType,
    pub score: S,
    pub match_count: usize,
}

/// Running totals of a session: overall, per constraint and per match.
#[derive(Debug)]
pub struct ScoreState<S: Score> {
    total: S,
    buckets: Vec<ConstraintBucket<S>>,
    impacts: SlotMap<ImpactId, Impact<S>>,
    track_matches: bool,
}

impl<S: Score> ScoreState<S> {
    pub fn new(constraints: &[ConstraintInfo<S>], track_matches: bool) -> Self {
        Self {
            total: S::null_score(),
            buckets: constraints
                .iter()
                .map(|c| ConstraintBucket {
                    weight: c.weight,
                    impact: c.impact,
                    score: S::null_score(),
                    match_count: 0,
                })
                .collect(),
            impacts: SlotMap::with_key(),
            track_matches,
        }
    }

    pub fn total(&self) -> S {
        self.total
    }

    pub fn bucket(&self, constraint: ConstraintId) -> Option<&ConstraintBucket<S>> {
        self.buckets.get(constraint.0)
    }

    pub fn buckets(&self) -> &[ConstraintBucket<S>] {
        &self.buckets
    }

    pub fn impacts(&self) -> impl Iterator<Item = &Impact<S>> {
        self.impacts.values()
    }

    pub fn is_tracking(&self) -> bool {
        self.track_matches
    }

    pub fn add(
        &mut self,
        constraint: ConstraintId,
        match_weight: i64,
        tuple: &AnyTuple,
    ) -> std::result::Result<ImpactId, ImpactError> {
        let bucket = self.buckets.get_mut(constraint.0).ok_or(ImpactError::UnknownConstraint)?;
        // Nothing is written until every sum is known to fit
        let delta = match_weight
            .checked_mul(bucket.impact.sign())
            .and_then(|signed| bucket.weight.multiply(signed))
            .ok_or(ImpactError::Overflow)?;
        let score = bucket.score.checked_add(&delta).ok_or(ImpactError::Overflow)?;
        let total = self.total.checked_add(&delta).ok_or(ImpactError::Overflow)?;
        bucket.score = score;
        bucket.match_count += 1;
        self.total = total;
        let facts = self.track_matches.then(|| tuple.facts_vec());
        Ok(self.impacts.insert(Impact {
            constraint,
            match_weight,
            delta,
            facts,
        }))
    }

    /// Subtracts exactly the delta recorded for the impact.
    pub fn undo(&mut self, id: ImpactId) -> Option<Impact<S>> {
        let impact = self.impacts.remove(id)?;
        let bucket = self.buckets.get_mut(impact.constraint.0)?;
        bucket.score = bucket.score - impact.delta;
        bucket.match_count -= 1;
        self.total = self.total - impact.delta;
        Some(impact)
    }

    /// Replaces a constraint weight and rescales every live match of it.
    /// On overflow nothing changes.
    pub fn set_weight(&mut self, constraint: ConstraintId, weight: S) -> std::result::Result<S, ImpactError> {
        let bucket = self.buckets.get(constraint.0).ok_or(ImpactError::UnknownConstraint)?;
        let sign = bucket.impact.sign();
        let mut rescaled = Vec::with_capacity(bucket.match_count);
        let mut score = S::null_score();
        for (id, impact) in self.impacts.iter().filter(|(_, i)| i.constraint == constraint) {
            let delta = impact
                .match_weight
                .checked_mul(sign)
                .and_then(|signed| weight.multiply(signed))
                .ok_or(ImpactError::Overflow)?;
            score = score.checked_add(&delta).ok_or(ImpactError::Overflow)?;
            rescaled.push((id, delta));
        }
        let total = self
            .buckets
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != constraint.0)
            .try_fold(score, |sum, (_, other)| sum.checked_add(&other.score))
            .ok_or(ImpactError::Overflow)?;

        for (id, delta) in rescaled {
            if let Some(impact) = self.impacts.get_mut(id) {
                impact.delta = delta;
            }
        }
        let bucket = &mut self.buckets[constraint.0];
        let previous = bucket.weight;
        bucket.weight = weight;
        bucket.score = score;
        self.total = total;
        Ok(previous)
    }
}

/// Why a score change could not be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpactError {
    UnknownConstraint,
    /// A component left the `i64` range.
    Overflow,
}

impl<S: Score> Propagator<S> {
    fn apply_impact(&mut self, def: &NodeDef, node: &ScorerNode, tuple: TupleId) -> Result<()> {
        let t = self.tuples.tuple(tuple)?;
        let match_weight = match &node.weigher {
            Some(weigher) => def.evaluate(t, || weigher(t))?,
            None => 1,
        };
        let impact = self.scores.add(node.constraint, match_weight, t).map_err(|err| match err {
            ImpactError::UnknownConstraint => def.invariant(format!("unknown constraint {:?}", node.constraint)),
            ImpactError::Overflow => def.evaluation_failure(
                t,
                format!("score overflow applying match weight {}", match_weight),
            ),
        })?;
        self.tuples.put_slot(tuple, node.slot, StoreSlot::Undo(UndoHandle::Impact(impact)))
    }

    fn undo_impact(&mut self, def: &NodeDef, node: &ScorerNode, tuple: TupleId, action: &str) -> Result<()> {
        let impact = match self.tuples.take_slot(tuple, node.slot)? {
            StoreSlot::Undo(UndoHandle::Impact(impact)) => impact,
            other => return Err(def.invariant(format!("{} of unknown tuple {:?} ({})", action, tuple, other.kind()))),
        };
        self.scores
            .undo(impact)
            .map(|_| ())
            .ok_or_else(|| def.invariant(format!("impact {:?} of tuple {:?} already undone", impact, tuple)))
    }

    pub(crate) fn score(&mut self, def: &NodeDef, node: &ScorerNode, op: Lifecycle, tuple: TupleId) -> Result<()> {
        match op {
            Lifecycle::Insert => {
                if !self.tuples.slot(tuple, node.slot)?.is_empty() {
                    return Err(def.invariant(format!("tuple {:?} inserted twice", tuple)));
                }
                self.apply_impact(def, node, tuple)
            }
            Lifecycle::Update => {
                self.undo_impact(def, node, tuple, "update")?;
                self.apply_impact(def, node, tuple)
            }
            Lifecycle::Retract => self.undo_impact(def, node, tuple, "retract"),
        }
    }
}
