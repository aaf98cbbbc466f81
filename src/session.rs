//session.rs
use crate::analysis::{self, ConstraintMatchTotal, Indictment};
use crate::arena::{ArenaStats, TupleId};
use crate::constraint::{ConstraintId, ConstraintRef};
use crate::fact::{fact_address, Fact, FactRef};
use crate::network::Network;
use crate::nodes::scorer::ImpactError;
use crate::nodes::NodeId;
use crate::propagation::Propagator;
use crate::resource_limits::ResourceLimits;
use crate::score::Score;
use crate::{Result, ScorenetError};
use log::{debug, info, warn};
use rustc_hash::FxHashMap as HashMap;
use std::any::Any;
use std::rc::Rc;

/// Per-session switches.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Record the facts of every match so match totals and indictments can be queried.
    pub track_constraint_matches: bool,
    /// Verify that released tuples left nothing behind in their stores.
    pub strict_assertions: bool,
    pub limits: ResourceLimits,
}

impl SessionConfig {
    pub fn with_match_tracking(mut self) -> Self {
        self.track_constraint_matches = true;
        self
    }

    pub fn with_strict_assertions(mut self) -> Self {
        self.strict_assertions = true;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }
}

#[derive(Debug)]
struct FactRecord {
    fact: Rc<dyn Fact>,
    /// Source tuple; `None` when no constraint reads the fact's type.
    source: Option<(NodeId, TupleId)>,
    sequence: u64,
}

/// Working memory of one scoring run.
///
/// Insert, update and retract only queue work; `settle` (or any read such as
/// `calculate_score`) propagates it. An evaluation or invariant error poisons the session.
#[derive(Debug)]
pub struct Session<S: Score> {
    propagator: Propagator<S>,
    facts: HashMap<usize, FactRecord>,
    next_sequence: u64,
    poisoned: Option<String>,
}

#[inline]
fn address_of<T: Fact + ?Sized>(fact: &Rc<T>) -> usize {
    Rc::as_ptr(fact) as *const () as usize
}

impl<S: Score> Session<S> {
    pub(crate) fn new(network: Rc<Network<S>>, config: SessionConfig) -> Self {
        Self {
            propagator: Propagator::new(network, config),
            facts: HashMap::default(),
            next_sequence: 0,
            poisoned: None,
        }
    }

    pub fn network(&self) -> &Rc<Network<S>> {
        &self.propagator.network
    }

    pub fn config(&self) -> &SessionConfig {
        &self.propagator.config
    }

    fn check_usable(&self) -> Result<()> {
        match &self.poisoned {
            Some(cause) => Err(ScorenetError::SessionPoisoned { cause: cause.clone() }),
            None => Ok(()),
        }
    }

    /// Poisons the session when `result` carries an error that leaves it inconsistent.
    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_fatal() && self.poisoned.is_none() {
                warn!("Session poisoned: {}", err);
                self.poisoned = Some(err.to_string());
            }
        }
        result
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    pub fn insert<T: Fact>(&mut self, fact: Rc<T>) -> Result<()> {
        self.insert_dyn(fact)
    }

    /// Registers a fact. Its identity is the allocation; inserting it twice is an error.
    pub fn insert_dyn(&mut self, fact: Rc<dyn Fact>) -> Result<()> {
        self.check_usable()?;
        let address = fact_address(&fact);
        if self.facts.contains_key(&address) {
            return Err(ScorenetError::duplicate_fact(format!("{:?}", fact)));
        }
        self.propagator.config.limits.check_fact_limit(self.facts.len())?;

        let source = match self.propagator.network.source_for(Any::type_id(fact.as_any())) {
            Some(node) => {
                let result = self.propagator.source_insert(node, Rc::clone(&fact));
                Some((node, self.guard(result)?))
            }
            None => None,
        };
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.facts.insert(address, FactRecord { fact, source, sequence });
        Ok(())
    }

    pub fn update<T: Fact>(&mut self, fact: &Rc<T>) -> Result<()> {
        self.update_address(address_of(fact))
    }

    /// Signals that a registered fact changed in place.
    pub fn update_dyn(&mut self, fact: &Rc<dyn Fact>) -> Result<()> {
        self.update_address(fact_address(fact))
    }

    fn update_address(&mut self, address: usize) -> Result<()> {
        self.check_usable()?;
        let record = self
            .facts
            .get(&address)
            .ok_or_else(|| ScorenetError::fact_not_found(format!("at {:#x}", address)))?;
        if let Some((node, tuple)) = record.source {
            let result = self.propagator.source_update(node, tuple);
            self.guard(result)?;
        }
        Ok(())
    }

    pub fn retract<T: Fact>(&mut self, fact: &Rc<T>) -> Result<()> {
        self.retract_address(address_of(fact))
    }

    pub fn retract_dyn(&mut self, fact: &Rc<dyn Fact>) -> Result<()> {
        self.retract_address(fact_address(fact))
    }

    fn retract_address(&mut self, address: usize) -> Result<()> {
        self.check_usable()?;
        let source = self
            .facts
            .get(&address)
            .ok_or_else(|| ScorenetError::fact_not_found(format!("at {:#x}", address)))?
            .source;
        if let Some((node, tuple)) = source {
            let result = self.propagator.source_retract(node, tuple);
            self.guard(result)?;
        }
        self.facts.remove(&address);
        Ok(())
    }

    /// Propagates all queued changes. Returns the number of queue items processed.
    pub fn settle(&mut self) -> Result<usize> {
        self.check_usable()?;
        let result = self.propagator.settle();
        self.guard(result)
    }

    pub fn calculate_score(&mut self) -> Result<S> {
        self.settle()?;
        Ok(self.propagator.scores.total())
    }

    /// Score of a single constraint.
    pub fn constraint_score(&mut self, constraint_ref: &ConstraintRef) -> Result<S> {
        self.settle()?;
        let info = self
            .propagator
            .network
            .constraint(constraint_ref)
            .ok_or_else(|| ScorenetError::UnknownConstraint(constraint_ref.to_string()))?;
        self.propagator
            .scores
            .bucket(info.id)
            .map(|bucket| bucket.score)
            .ok_or_else(|| ScorenetError::UnknownConstraint(constraint_ref.to_string()))
    }

    fn check_tracking(&self) -> Result<()> {
        if self.propagator.scores.is_tracking() {
            Ok(())
        } else {
            Err(ScorenetError::MatchTrackingDisabled)
        }
    }

    /// Per constraint: weight, score and every live match.
    pub fn constraint_match_totals(&mut self) -> Result<Vec<ConstraintMatchTotal<S>>> {
        self.check_tracking()?;
        self.settle()?;
        Ok(analysis::match_totals(&self.propagator.network, &self.propagator.scores))
    }

    /// Per fact: the summed score of the matches it takes part in.
    pub fn indictments(&mut self) -> Result<HashMap<FactRef, Indictment<S>>> {
        self.check_tracking()?;
        self.settle()?;
        Ok(analysis::indictments(&self.propagator.scores))
    }

    /// Replaces the weight of one constraint and rescales its live matches.
    /// Returns the previous weight.
    pub fn set_constraint_weight(&mut self, constraint_ref: &ConstraintRef, weight: S) -> Result<S> {
        self.check_usable()?;
        let id = self
            .propagator
            .network
            .constraint(constraint_ref)
            .map(|info| info.id)
            .ok_or_else(|| ScorenetError::UnknownConstraint(constraint_ref.to_string()))?;
        let previous = self
            .propagator
            .scores
            .set_weight(id, weight)
            .map_err(|err| match err {
                ImpactError::UnknownConstraint => ScorenetError::UnknownConstraint(constraint_ref.to_string()),
                ImpactError::Overflow => ScorenetError::configuration(
                    constraint_ref.to_string(),
                    format!("weight {} overflows the score of the live matches", weight),
                ),
            })?;
        info!("Constraint {} weight changed from {} to {}", constraint_ref, previous, weight);
        Ok(previous)
    }

    /// Scores the current facts in a fresh session on the same network.
    pub fn score_from_scratch(&mut self) -> Result<S> {
        self.check_usable()?;
        let mut config = self.propagator.config.clone();
        config.track_constraint_matches = false;
        let mut fresh = Session::new(Rc::clone(&self.propagator.network), config);
        // Weights changed on this session carry over
        for (index, bucket) in self.propagator.scores.buckets().iter().enumerate() {
            fresh
                .propagator
                .scores
                .set_weight(ConstraintId(index), bucket.weight)
                .map_err(|_| ScorenetError::invariant("session", "weights differ from the network"))?;
        }
        let mut records: Vec<&FactRecord> = self.facts.values().collect();
        records.sort_by_key(|record| record.sequence);
        for record in records {
            fresh.insert_dyn(Rc::clone(&record.fact))?;
        }
        fresh.calculate_score()
    }

    /// Fails with `ScoreCorruption` when the incremental score drifted from a full recalculation.
    pub fn assert_score_consistent(&mut self) -> Result<S> {
        let incremental = self.calculate_score()?;
        let from_scratch = self.score_from_scratch()?;
        if incremental != from_scratch {
            return Err(ScorenetError::ScoreCorruption {
                incremental: incremental.to_string(),
                from_scratch: from_scratch.to_string(),
            });
        }
        Ok(incremental)
    }

    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    pub fn contains<T: Fact>(&self, fact: &Rc<T>) -> bool {
        self.facts.contains_key(&address_of(fact))
    }

    /// Queue items not yet propagated.
    pub fn pending(&self) -> usize {
        self.propagator.pending()
    }

    pub fn stats(&self) -> ArenaStats {
        self.propagator.stats()
    }

    /// Ends the session, dropping every tuple, index and accumulator.
    pub fn close(self) {
        debug!(
            "Closing session: {} facts, {} tuples, poisoned: {}",
            self.facts.len(),
            self.propagator.tuples.len(),
            self.poisoned.is_some()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint_builder::ConstraintBuilder;
    use crate::score::SimpleScore;
    use assert_matches::assert_matches;
    use std::cell::Cell;

    #[derive(Debug)]
    struct Task {
        hours: Cell<i64>,
    }
    crate::impl_fact!(Task);

    #[derive(Debug)]
    struct Unused;
    crate::impl_fact!(Unused);

    fn task(hours: i64) -> Rc<Task> {
        Rc::new(Task { hours: Cell::new(hours) })
    }

    fn session(config: SessionConfig) -> Session<SimpleScore> {
        let builder = ConstraintBuilder::<SimpleScore>::new();
        builder.constraint("Hours", SimpleScore::new(1), || {
            builder
                .for_each::<Task>()
                .penalize_by(|t| t.get::<Task>(0).map_or(0, |task| task.hours.get()))
        });
        builder.build_session(config).unwrap()
    }

    #[test]
    fn test_insert_update_retract() {
        let mut session = session(SessionConfig::default());
        let a = task(3);
        let b = task(4);
        session.insert(a.clone()).unwrap();
        session.insert(b.clone()).unwrap();
        assert_eq!(session.calculate_score().unwrap(), SimpleScore::new(-7));

        a.hours.set(10);
        session.update(&a).unwrap();
        assert_eq!(session.calculate_score().unwrap(), SimpleScore::new(-14));

        session.retract(&b).unwrap();
        assert_eq!(session.calculate_score().unwrap(), SimpleScore::new(-10));
        assert_eq!(session.fact_count(), 1);
        assert_eq!(session.settle().unwrap(), 0);
    }

    #[test]
    fn test_misuse_does_not_poison() {
        let mut session = session(SessionConfig::default());
        let a = task(1);
        session.insert(a.clone()).unwrap();
        assert_matches!(session.insert(a.clone()), Err(ScorenetError::DuplicateFact(_)));
        assert_matches!(session.retract(&task(1)), Err(ScorenetError::FactNotFound(_)));
        assert_matches!(session.update(&task(1)), Err(ScorenetError::FactNotFound(_)));
        assert!(!session.is_poisoned());
        assert_eq!(session.calculate_score().unwrap(), SimpleScore::new(-1));
    }

    #[test]
    fn test_unused_fact_types_are_tracked() {
        let mut session = session(SessionConfig::default());
        let unused = Rc::new(Unused);
        session.insert(unused.clone()).unwrap();
        assert!(session.contains(&unused));
        assert_eq!(session.pending(), 0);
        session.update(&unused).unwrap();
        session.retract(&unused).unwrap();
        assert_eq!(session.fact_count(), 0);
    }

    #[test]
    fn test_match_tracking_must_be_enabled() {
        let mut session = session(SessionConfig::default());
        assert_matches!(session.constraint_match_totals(), Err(ScorenetError::MatchTrackingDisabled));
        assert_matches!(session.indictments(), Err(ScorenetError::MatchTrackingDisabled));

        let mut tracked = session_with_tracking();
        let a = task(2);
        tracked.insert(a.clone()).unwrap();
        let totals = tracked.constraint_match_totals().unwrap();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].match_count(), 1);
        assert_eq!(totals[0].score, SimpleScore::new(-2));
        let blame = tracked.indictments().unwrap();
        let fact: Rc<dyn Fact> = a;
        assert_eq!(blame[&FactRef::new(fact)].score, SimpleScore::new(-2));
    }

    fn session_with_tracking() -> Session<SimpleScore> {
        session(SessionConfig::default().with_match_tracking())
    }

    #[test]
    fn test_weight_change_rescales_and_survives_undo() {
        let mut session = session(SessionConfig::default());
        let a = task(2);
        session.insert(a.clone()).unwrap();
        session.calculate_score().unwrap();
        let hours = ConstraintRef::from("Hours");
        let previous = session.set_constraint_weight(&hours, SimpleScore::new(3)).unwrap();
        assert_eq!(previous, SimpleScore::new(1));
        assert_eq!(session.calculate_score().unwrap(), SimpleScore::new(-6));
        assert_eq!(session.constraint_score(&hours).unwrap(), SimpleScore::new(-6));
        assert_eq!(session.assert_score_consistent().unwrap(), SimpleScore::new(-6));

        session.retract(&a).unwrap();
        assert_eq!(session.calculate_score().unwrap(), SimpleScore::ZERO);
        assert_matches!(
            session.set_constraint_weight(&ConstraintRef::from("Nope"), SimpleScore::new(1)),
            Err(ScorenetError::UnknownConstraint(_))
        );
    }

    #[test]
    fn test_fact_limit() {
        let limits = ResourceLimits {
            max_facts: 1,
            ..ResourceLimits::default()
        };
        let mut session = session(SessionConfig::default().with_limits(limits));
        session.insert(task(1)).unwrap();
        assert_matches!(session.insert(task(2)), Err(ScorenetError::ResourceLimit { .. }));
        assert!(!session.is_poisoned());
    }
}
