//analysis.rs
use crate::constraint::ConstraintRef;
use crate::error::Result;
use crate::fact::{fact_address, Fact, FactRef};
use crate::network::Network;
use crate::nodes::ScoreState;
use crate::score::Score;
use crate::session::Session;
use crate::tuple::{FactList, MAX_ARITY};
use rustc_hash::FxHashMap as HashMap;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::rc::Rc;

/// One live match of a constraint and what it contributes to the score.
#[derive(Debug, Clone)]
pub struct ConstraintMatch<S: Score> {
    pub facts: FactList,
    pub score: S,
}

#[derive(Debug, Clone)]
pub struct ConstraintMatchTotal<S: Score> {
    pub constraint_ref: ConstraintRef,
    pub weight: S,
    pub score: S,
    pub matches: Vec<ConstraintMatch<S>>,
}

impl<S: Score> ConstraintMatchTotal<S> {
    pub fn match_count(&self) -> usize {
        self.matches.len()
    }
}

/// Everything a single fact is blamed for.
#[derive(Debug, Clone)]
pub struct Indictment<S: Score> {
    pub fact: Rc<dyn Fact>,
    pub score: S,
    pub match_count: usize,
}

/// Groups the recorded impacts by constraint, in constraint declaration order.
pub(crate) fn match_totals<S: Score>(network: &Network<S>, scores: &ScoreState<S>) -> Vec<ConstraintMatchTotal<S>> {
    let mut totals: Vec<ConstraintMatchTotal<S>> = network
        .constraints()
        .iter()
        .zip(scores.buckets())
        .map(|(info, bucket)| ConstraintMatchTotal {
            constraint_ref: info.constraint_ref.clone(),
            weight: bucket.weight,
            score: bucket.score,
            matches: Vec::with_capacity(bucket.match_count),
        })
        .collect();
    for impact in scores.impacts() {
        if let (Some(total), Some(facts)) = (totals.get_mut(impact.constraint.0), &impact.facts) {
            total.matches.push(ConstraintMatch {
                facts: facts.clone(),
                score: impact.delta,
            });
        }
    }
    totals
}

/// Sums impacts per fact. A fact appearing twice in one match is blamed once for it.
pub(crate) fn indictments<S: Score>(scores: &ScoreState<S>) -> HashMap<FactRef, Indictment<S>> {
    let mut result: HashMap<FactRef, Indictment<S>> = HashMap::default();
    for impact in scores.impacts() {
        let facts = match &impact.facts {
            Some(facts) => facts,
            None => continue,
        };
        let mut seen: SmallVec<[usize; 5]> = SmallVec::new();
        for fact in facts {
            let address = fact_address(fact);
            if seen.contains(&address) {
                continue;
            }
            seen.push(address);
            let entry = result.entry(FactRef::new(Rc::clone(fact))).or_insert_with(|| Indictment {
                fact: Rc::clone(fact),
                score: S::null_score(),
                match_count: 0,
            });
            entry.score = entry.score + impact.delta;
            entry.match_count += 1;
        }
    }
    result
}

/// Analysis tools for scoring sessions
pub struct ConstraintAnalysis;

impl ConstraintAnalysis {
    /// Lists every constraint with at least one match, worst first.
    pub fn analyze_violations<S: Score>(session: &mut Session<S>) -> Result<ConstraintViolationReport<S>> {
        let total_score = session.calculate_score()?;
        let mut violations: Vec<ConstraintViolation<S>> = session
            .constraint_match_totals()?
            .into_iter()
            .filter(|total| !total.matches.is_empty())
            .map(|total| ConstraintViolation {
                constraint_ref: total.constraint_ref,
                violation_count: total.matches.len(),
                score: total.score,
                matches: total.matches,
            })
            .collect();
        violations.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));

        Ok(ConstraintViolationReport {
            feasible: total_score.is_feasible(),
            total_score,
            violations,
        })
    }
}

#[derive(Debug)]
pub struct ConstraintViolationReport<S: Score> {
    pub total_score: S,
    pub violations: Vec<ConstraintViolation<S>>,
    pub feasible: bool,
}

#[derive(Debug)]
pub struct ConstraintViolation<S: Score> {
    pub constraint_ref: ConstraintRef,
    pub violation_count: usize,
    pub score: S,
    pub matches: Vec<ConstraintMatch<S>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkStatistics {
    pub total_nodes: usize,
    pub source_types: usize,
    pub constraints: usize,
    pub node_type_counts: BTreeMap<&'static str, usize>,
    /// Store slots per tuple, by arity.
    pub store_lanes: [usize; MAX_ARITY],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::{ConstraintId, ConstraintInfo, ImpactType};
    use crate::score::SimpleScore;
    use crate::tuple::{AnyTuple, BiTuple};

    #[test]
    fn test_indictments_count_shared_fact_once_per_match() {
        let infos = vec![ConstraintInfo {
            id: ConstraintId(0),
            constraint_ref: ConstraintRef::from("Pairs"),
            weight: SimpleScore::new(2),
            impact: ImpactType::Penalty,
        }];
        let mut scores = ScoreState::new(&infos, true);
        let a: Rc<dyn Fact> = Rc::new(1i64);
        let b: Rc<dyn Fact> = Rc::new(2i64);
        scores.add(ConstraintId(0), 1, &AnyTuple::Bi(BiTuple::new(a.clone(), b.clone()))).unwrap();
        scores.add(ConstraintId(0), 1, &AnyTuple::Bi(BiTuple::new(a.clone(), a.clone()))).unwrap();

        let blame = indictments(&scores);
        let for_a = &blame[&FactRef::new(a)];
        assert_eq!(for_a.match_count, 2);
        assert_eq!(for_a.score, SimpleScore::new(-4));
        assert_eq!(blame[&FactRef::new(b)].score, SimpleScore::new(-2));
    }
}
