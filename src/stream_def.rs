// stream_def.rs - Declarative stream definitions and the fluent API building them

use crate::collectors::CollectorSupplier;
use crate::constraint::ImpactType;
use crate::fact::Fact;
use crate::joiner::{Joiner, Joiners};
use crate::key::{key_fn, KeyFn, KeyValue};
use crate::nodes::filter::TuplePredicate;
use crate::nodes::map::{TupleFlatMapper, TupleMapper};
use crate::nodes::scorer::MatchWeigher;
use crate::tuple::{extract_fact, AnyTuple};
use std::any::TypeId;
use std::fmt;
use std::rc::Rc;

/// A node-to-be. Definitions form a tree per constraint; sources of the same fact type
/// are merged when the network is compiled.
pub(crate) enum StreamDefinition {
    ForEach {
        fact_type: TypeId,
        type_name: &'static str,
    },
    Filter {
        source: Rc<StreamDefinition>,
        predicate: TuplePredicate,
    },
    Map {
        source: Rc<StreamDefinition>,
        mappers: Vec<TupleMapper>,
    },
    FlatMap {
        source: Rc<StreamDefinition>,
        mapper: TupleFlatMapper,
    },
    Join {
        left: Rc<StreamDefinition>,
        right: Rc<StreamDefinition>,
        joiners: Vec<Joiner>,
    },
    Exists {
        left: Rc<StreamDefinition>,
        right: Rc<StreamDefinition>,
        joiners: Vec<Joiner>,
        should_exist: bool,
    },
    Group {
        source: Rc<StreamDefinition>,
        keys: Vec<KeyFn>,
        collectors: Vec<CollectorSupplier>,
    },
    Distinct {
        source: Rc<StreamDefinition>,
    },
    Concat {
        left: Rc<StreamDefinition>,
        right: Rc<StreamDefinition>,
    },
}

impl StreamDefinition {
    /// Number of facts per tuple this stream carries. May exceed the supported maximum;
    /// the network compiler rejects such streams.
    pub fn output_arity(&self) -> usize {
        match self {
            StreamDefinition::ForEach { .. } => 1,
            StreamDefinition::Filter { source, .. } => source.output_arity(),
            StreamDefinition::Map { mappers, .. } => mappers.len(),
            StreamDefinition::FlatMap { .. } => 1,
            StreamDefinition::Join { left, right, .. } => left.output_arity() + right.output_arity(),
            StreamDefinition::Exists { left, .. } => left.output_arity(),
            StreamDefinition::Group { keys, collectors, .. } => keys.len() + collectors.len(),
            StreamDefinition::Distinct { source } => source.output_arity(),
            StreamDefinition::Concat { left, .. } => left.output_arity(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StreamDefinition::ForEach { .. } => "for_each",
            StreamDefinition::Filter { .. } => "filter",
            StreamDefinition::Map { .. } => "map",
            StreamDefinition::FlatMap { .. } => "flat_map",
            StreamDefinition::Join { .. } => "join",
            StreamDefinition::Exists { should_exist: true, .. } => "if_exists",
            StreamDefinition::Exists { .. } => "if_not_exists",
            StreamDefinition::Group { .. } => "group_by",
            StreamDefinition::Distinct { .. } => "distinct",
            StreamDefinition::Concat { .. } => "concat",
        }
    }
}

impl fmt::Debug for StreamDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamDefinition::ForEach { type_name, .. } => write!(f, "for_each<{}>", type_name),
            StreamDefinition::Filter { source, .. }
            | StreamDefinition::Map { source, .. }
            | StreamDefinition::FlatMap { source, .. }
            | StreamDefinition::Group { source, .. }
            | StreamDefinition::Distinct { source } => write!(f, "{:?}.{}", source, self.name()),
            StreamDefinition::Join { left, right, .. }
            | StreamDefinition::Exists { left, right, .. }
            | StreamDefinition::Concat { left, right } => {
                write!(f, "{:?}.{}({:?})", left, self.name(), right)
            }
        }
    }
}

/// A stream of tuples inside a constraint definition.
///
/// Streams are cheap handles. Clones share one definition, so a stream used twice in a
/// constraint compiles to a single node feeding both uses.
#[derive(Clone, Debug)]
pub struct Stream {
    pub(crate) definition: Rc<StreamDefinition>,
}

impl Stream {
    pub(crate) fn new(definition: StreamDefinition) -> Self {
        Self {
            definition: Rc::new(definition),
        }
    }

    pub(crate) fn for_each<T: Fact>() -> Self {
        Self::new(StreamDefinition::ForEach {
            fact_type: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        })
    }

    pub fn arity(&self) -> usize {
        self.definition.output_arity()
    }

    pub fn filter_tuple<F>(self, predicate: F) -> Self
    where
        F: Fn(&AnyTuple) -> bool + 'static,
    {
        Self::new(StreamDefinition::Filter {
            source: self.definition,
            predicate: Rc::new(predicate),
        })
    }

    /// Filters on the first fact of each tuple. Tuples whose first fact is not a `T` are dropped.
    pub fn filter<T, F>(self, predicate: F) -> Self
    where
        T: Fact,
        F: Fn(&T) -> bool + 'static,
    {
        self.filter_tuple(move |tuple: &AnyTuple| extract_fact::<T>(tuple, 0).map_or(false, |fact| predicate(fact)))
    }

    pub fn join(self, other: Stream, joiners: Vec<Joiner>) -> Self {
        Self::new(StreamDefinition::Join {
            left: self.definition,
            right: other.definition,
            joiners,
        })
    }

    /// Equi-join on a key of the first fact of each side.
    pub fn join_on<T1, T2, F1, F2, K>(self, other: Stream, left_key_fn: F1, right_key_fn: F2) -> Self
    where
        T1: Fact,
        T2: Fact,
        F1: Fn(&T1) -> K + 'static,
        F2: Fn(&T2) -> K + 'static,
        K: Into<KeyValue>,
    {
        let joiner = Joiners::equal(
            move |t: &AnyTuple| extract_fact::<T1>(t, 0).map(|f| left_key_fn(f).into()),
            move |t: &AnyTuple| extract_fact::<T2>(t, 0).map(|f| right_key_fn(f).into()),
        );
        self.join(other, vec![joiner])
    }

    /// Keeps tuples for which at least one tuple of `other` matches all joiners.
    pub fn if_exists(self, other: Stream, joiners: Vec<Joiner>) -> Self {
        self.conditional(other, joiners, true)
    }

    /// Keeps tuples for which no tuple of `other` matches all joiners.
    pub fn if_not_exists(self, other: Stream, joiners: Vec<Joiner>) -> Self {
        self.conditional(other, joiners, false)
    }

    fn conditional(self, other: Stream, joiners: Vec<Joiner>, should_exist: bool) -> Self {
        Self::new(StreamDefinition::Exists {
            left: self.definition,
            right: other.definition,
            joiners,
            should_exist,
        })
    }

    /// Replaces each tuple by a single fact.
    pub fn map<F>(self, mapper: F) -> Self
    where
        F: Fn(&AnyTuple) -> Rc<dyn Fact> + 'static,
    {
        self.map_columns(vec![Rc::new(mapper)])
    }

    pub fn map_to_pair<F1, F2>(self, first: F1, second: F2) -> Self
    where
        F1: Fn(&AnyTuple) -> Rc<dyn Fact> + 'static,
        F2: Fn(&AnyTuple) -> Rc<dyn Fact> + 'static,
    {
        self.map_columns(vec![Rc::new(first), Rc::new(second)])
    }

    /// One mapper per output column.
    pub fn map_columns(self, mappers: Vec<TupleMapper>) -> Self {
        Self::new(StreamDefinition::Map {
            source: self.definition,
            mappers,
        })
    }

    /// Replaces each tuple by one single-fact tuple per produced fact.
    pub fn flat_map<F>(self, mapper: F) -> Self
    where
        F: Fn(&AnyTuple) -> Vec<Rc<dyn Fact>> + 'static,
    {
        Self::new(StreamDefinition::FlatMap {
            source: self.definition,
            mapper: Rc::new(mapper),
        })
    }

    /// Groups by zero or more key columns and reduces each group with the collectors.
    /// The result carries the keys first, then one column per collector.
    pub fn group_by(self, keys: Vec<KeyFn>, collectors: Vec<CollectorSupplier>) -> Self {
        Self::new(StreamDefinition::Group {
            source: self.definition,
            keys,
            collectors,
        })
    }

    pub fn group_by_key<F, K>(self, key: F, collector: CollectorSupplier) -> Self
    where
        F: Fn(&AnyTuple) -> K + 'static,
        K: Into<KeyValue>,
    {
        self.group_by(vec![key_fn(key)], vec![collector])
    }

    /// Reduces the whole stream into a single tuple.
    pub fn aggregate(self, collector: CollectorSupplier) -> Self {
        self.group_by(Vec::new(), vec![collector])
    }

    /// Drops duplicate tuples. Plain values compare by value, domain facts by identity.
    pub fn distinct(self) -> Self {
        Self::new(StreamDefinition::Distinct {
            source: self.definition,
        })
    }

    /// Tuples of this stream followed by those of `other`, duplicates kept. Both streams
    /// must have the same arity.
    pub fn concat(self, other: Stream) -> Self {
        Self::new(StreamDefinition::Concat {
            left: self.definition,
            right: other.definition,
        })
    }

    pub fn penalize(self) -> ConstraintRecipe {
        ConstraintRecipe::new(self, ImpactType::Penalty, None)
    }

    pub fn penalize_by<F>(self, match_weigher: F) -> ConstraintRecipe
    where
        F: Fn(&AnyTuple) -> i64 + 'static,
    {
        ConstraintRecipe::new(self, ImpactType::Penalty, Some(Rc::new(match_weigher)))
    }

    pub fn reward(self) -> ConstraintRecipe {
        ConstraintRecipe::new(self, ImpactType::Reward, None)
    }

    pub fn reward_by<F>(self, match_weigher: F) -> ConstraintRecipe
    where
        F: Fn(&AnyTuple) -> i64 + 'static,
    {
        ConstraintRecipe::new(self, ImpactType::Reward, Some(Rc::new(match_weigher)))
    }

    /// Impacts the score by the constraint weight, like [`Stream::reward`].
    pub fn impact(self) -> ConstraintRecipe {
        ConstraintRecipe::new(self, ImpactType::Mixed, None)
    }

    /// Impacts the score by the signed match weight: negative weights penalize, positive
    /// ones reward.
    pub fn impact_by<F>(self, match_weigher: F) -> ConstraintRecipe
    where
        F: Fn(&AnyTuple) -> i64 + 'static,
    {
        ConstraintRecipe::new(self, ImpactType::Mixed, Some(Rc::new(match_weigher)))
    }
}

/// A finished stream together with how its matches affect the score.
#[derive(Clone)]
pub struct ConstraintRecipe {
    pub(crate) definition: Rc<StreamDefinition>,
    pub(crate) impact: ImpactType,
    pub(crate) weigher: Option<MatchWeigher>,
}

impl ConstraintRecipe {
    fn new(stream: Stream, impact: ImpactType, weigher: Option<MatchWeigher>) -> Self {
        Self {
            definition: stream.definition,
            impact,
            weigher,
        }
    }

    pub fn impact(&self) -> ImpactType {
        self.impact
    }
}

impl fmt::Debug for ConstraintRecipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstraintRecipe")
            .field("stream", &self.definition)
            .field("impact", &self.impact)
            .field("weighted", &self.weigher.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::Collectors;

    #[derive(Debug)]
    struct Lesson {
        room: u32,
    }
    crate::impl_fact!(Lesson);

    #[derive(Debug)]
    struct Room;
    crate::impl_fact!(Room);

    #[test]
    fn test_arity_follows_operations() {
        let lessons = Stream::for_each::<Lesson>();
        assert_eq!(lessons.arity(), 1);

        let pairs = lessons.clone().join(Stream::for_each::<Lesson>(), vec![]);
        assert_eq!(pairs.arity(), 2);
        assert_eq!(pairs.clone().if_not_exists(Stream::for_each::<Room>(), vec![]).arity(), 2);

        let grouped = lessons
            .clone()
            .group_by_key(|t: &AnyTuple| t.get::<Lesson>(0).map(|l| l.room), Collectors::count());
        assert_eq!(grouped.arity(), 2);
        assert_eq!(lessons.clone().aggregate(Collectors::count()).arity(), 1);

        let wide = pairs.clone().join(pairs.clone(), vec![]).join(pairs, vec![]);
        assert_eq!(wide.arity(), 6);
    }

    #[test]
    fn test_debug_renders_pipeline() {
        let stream = Stream::for_each::<Lesson>()
            .filter(|l: &Lesson| l.room > 1)
            .if_exists(Stream::for_each::<Room>(), vec![]);
        let rendered = format!("{:?}", stream.definition);
        assert!(rendered.contains("filter"));
        assert!(rendered.contains("if_exists"));
        assert!(rendered.contains("Room"));
    }

    #[test]
    fn test_recipes_record_impact() {
        let recipe = Stream::for_each::<Lesson>().penalize();
        assert_eq!(recipe.impact(), ImpactType::Penalty);
        assert!(recipe.weigher.is_none());
        let recipe = Stream::for_each::<Lesson>().reward_by(|_| 3);
        assert_eq!(recipe.impact(), ImpactType::Reward);
        assert!(recipe.weigher.is_some());
        let recipe = Stream::for_each::<Lesson>().impact_by(|_| -2);
        assert_eq!(recipe.impact(), ImpactType::Mixed);
    }

    #[test]
    fn test_distinct_and_concat_keep_arity() {
        let pairs = Stream::for_each::<Lesson>().join(Stream::for_each::<Room>(), vec![]);
        assert_eq!(pairs.clone().distinct().arity(), 2);
        let both = Stream::for_each::<Lesson>().concat(Stream::for_each::<Lesson>());
        assert_eq!(both.arity(), 1);
        let rendered = format!("{:?}", both.distinct().definition);
        assert!(rendered.contains("concat"));
        assert!(rendered.ends_with("distinct"));
    }
}
