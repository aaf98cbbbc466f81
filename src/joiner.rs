// joiner.rs - Joiner types and the strategy that turns them into indexes
use crate::key::{KeyExtractor, KeyFn, KeyValue};
use crate::tuple::AnyTuple;
use std::fmt::{self, Debug};
use std::rc::Rc;

/// Comparison a joiner applies between a left key and a right key.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum JoinerType {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl JoinerType {
    #[inline]
    pub fn test(&self, left: &KeyValue, right: &KeyValue) -> bool {
        match self {
            JoinerType::Equal => left == right,
            JoinerType::NotEqual => left != right,
            JoinerType::LessThan => left < right,
            JoinerType::LessThanOrEqual => left <= right,
            JoinerType::GreaterThan => left > right,
            JoinerType::GreaterThanOrEqual => left >= right,
        }
    }
}

pub type PairPredicate = Rc<dyn Fn(&AnyTuple, &AnyTuple) -> bool>;

/// One condition between the left and the right side of a join or exists node.
#[derive(Clone)]
pub enum Joiner {
    Compare {
        joiner_type: JoinerType,
        left: KeyFn,
        right: KeyFn,
    },
    Filtering(PairPredicate),
}

impl Joiner {
    #[inline]
    pub fn test(&self, left: &AnyTuple, right: &AnyTuple) -> bool {
        match self {
            Joiner::Compare { joiner_type, left: lf, right: rf } => {
                joiner_type.test(&lf(left), &rf(right))
            }
            Joiner::Filtering(predicate) => predicate(left, right),
        }
    }
}

impl Debug for Joiner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Joiner::Compare { joiner_type, .. } => write!(f, "Joiner::{:?}", joiner_type),
            Joiner::Filtering(_) => write!(f, "Joiner::Filtering"),
        }
    }
}

/// Constructors for joiners.
///
/// Key functions receive the whole tuple of their side and project the compared column.
pub struct Joiners;

impl Joiners {
    fn compare<L, R, K>(joiner_type: JoinerType, left: L, right: R) -> Joiner
    where
        L: Fn(&AnyTuple) -> K + 'static,
        R: Fn(&AnyTuple) -> K + 'static,
        K: Into<KeyValue>,
    {
        Joiner::Compare {
            joiner_type,
            left: Rc::new(move |t: &AnyTuple| left(t).into()),
            right: Rc::new(move |t: &AnyTuple| right(t).into()),
        }
    }

    pub fn equal<L, R, K>(left: L, right: R) -> Joiner
    where
        L: Fn(&AnyTuple) -> K + 'static,
        R: Fn(&AnyTuple) -> K + 'static,
        K: Into<KeyValue>,
    {
        Self::compare(JoinerType::Equal, left, right)
    }

    pub fn not_equal<L, R, K>(left: L, right: R) -> Joiner
    where
        L: Fn(&AnyTuple) -> K + 'static,
        R: Fn(&AnyTuple) -> K + 'static,
        K: Into<KeyValue>,
    {
        Self::compare(JoinerType::NotEqual, left, right)
    }

    pub fn less_than<L, R, K>(left: L, right: R) -> Joiner
    where
        L: Fn(&AnyTuple) -> K + 'static,
        R: Fn(&AnyTuple) -> K + 'static,
        K: Into<KeyValue>,
    {
        Self::compare(JoinerType::LessThan, left, right)
    }

    pub fn less_than_or_equal<L, R, K>(left: L, right: R) -> Joiner
    where
        L: Fn(&AnyTuple) -> K + 'static,
        R: Fn(&AnyTuple) -> K + 'static,
        K: Into<KeyValue>,
    {
        Self::compare(JoinerType::LessThanOrEqual, left, right)
    }

    pub fn greater_than<L, R, K>(left: L, right: R) -> Joiner
    where
        L: Fn(&AnyTuple) -> K + 'static,
        R: Fn(&AnyTuple) -> K + 'static,
        K: Into<KeyValue>,
    {
        Self::compare(JoinerType::GreaterThan, left, right)
    }

    pub fn greater_than_or_equal<L, R, K>(left: L, right: R) -> Joiner
    where
        L: Fn(&AnyTuple) -> K + 'static,
        R: Fn(&AnyTuple) -> K + 'static,
        K: Into<KeyValue>,
    {
        Self::compare(JoinerType::GreaterThanOrEqual, left, right)
    }

    /// Arbitrary predicate over the left and right tuple, checked after the index lookup.
    pub fn filtering<F>(predicate: F) -> Joiner
    where
        F: Fn(&AnyTuple, &AnyTuple) -> bool + 'static,
    {
        Joiner::Filtering(Rc::new(predicate))
    }
}

/// Index columns and residual checks derived from a list of joiners.
#[derive(Debug, Clone, Default)]
pub struct JoinPlan {
    pub left_key: KeyExtractor,
    pub right_key: KeyExtractor,
    pub residual: Vec<Joiner>,
}

impl JoinPlan {
    pub fn columns(&self) -> usize {
        self.left_key.column_count()
    }

    /// True when matches found by key still need the residual checks.
    pub fn is_filtering(&self) -> bool {
        !self.residual.is_empty()
    }

    #[inline]
    pub fn residual_matches(&self, left: &AnyTuple, right: &AnyTuple) -> bool {
        self.residual.iter().all(|joiner| joiner.test(left, right))
    }
}

/// Strategy deciding which joiners become index columns.
pub trait JoinerPlanner: Debug {
    fn plan(&self, joiners: &[Joiner]) -> JoinPlan;
}

/// Equal joiners become index columns, in declaration order; the rest stay residual.
#[derive(Debug, Default, Clone, Copy)]
pub struct IndexedJoinerPlanner;

impl JoinerPlanner for IndexedJoinerPlanner {
    fn plan(&self, joiners: &[Joiner]) -> JoinPlan {
        let mut left_columns = Vec::new();
        let mut right_columns = Vec::new();
        let mut residual = Vec::new();
        for joiner in joiners {
            match joiner {
                Joiner::Compare { joiner_type: JoinerType::Equal, left, right } => {
                    left_columns.push(Rc::clone(left));
                    right_columns.push(Rc::clone(right));
                }
                other => residual.push(other.clone()),
            }
        }
        JoinPlan {
            left_key: KeyExtractor::new(left_columns),
            right_key: KeyExtractor::new(right_columns),
            residual,
        }
    }
}

/// Every joiner is checked pairwise over a single bucket.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnindexedJoinerPlanner;

impl JoinerPlanner for UnindexedJoinerPlanner {
    fn plan(&self, joiners: &[Joiner]) -> JoinPlan {
        JoinPlan {
            left_key: KeyExtractor::default(),
            right_key: KeyExtractor::default(),
            residual: joiners.to_vec(),
        }
    }
}

#[cfg(test)]
mod joiner_tests {
    use super::*;
    use crate::tuple::UniTuple;

    fn uni(value: i64) -> AnyTuple {
        AnyTuple::Uni(UniTuple::new(Rc::new(value)))
    }

    fn value(t: &AnyTuple) -> i64 {
        t.get::<i64>(0).copied().unwrap_or_default()
    }

    #[test]
    fn test_joiner_type_comparisons() {
        let (a, b) = (KeyValue::Int(1), KeyValue::Int(2));
        assert!(JoinerType::LessThan.test(&a, &b));
        assert!(!JoinerType::GreaterThanOrEqual.test(&a, &b));
        assert!(JoinerType::NotEqual.test(&a, &b));
        assert!(JoinerType::Equal.test(&a, &a.clone()));
        assert!(JoinerType::LessThanOrEqual.test(&b, &b.clone()));
    }

    #[test]
    fn test_indexed_planner_splits_equal_joiners() {
        let joiners = vec![
            Joiners::equal(value, value),
            Joiners::less_than(value, value),
            Joiners::equal(|t: &AnyTuple| value(t) % 2, |t: &AnyTuple| value(t) % 2),
        ];
        let plan = IndexedJoinerPlanner.plan(&joiners);
        assert_eq!(plan.columns(), 2);
        assert_eq!(plan.right_key.column_count(), 2);
        assert_eq!(plan.residual.len(), 1);
        assert!(plan.is_filtering());
    }

    #[test]
    fn test_unindexed_planner_checks_everything_pairwise() {
        let joiners = vec![Joiners::equal(value, value), Joiners::filtering(|l, r| value(l) + value(r) > 3)];
        let plan = UnindexedJoinerPlanner.plan(&joiners);
        assert_eq!(plan.columns(), 0);
        assert!(plan.residual_matches(&uni(2), &uni(2)));
        assert!(!plan.residual_matches(&uni(1), &uni(1)));
        assert!(!plan.residual_matches(&uni(2), &uni(3)));
    }
}
