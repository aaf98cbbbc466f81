//constraint_builder.rs
use crate::constraint::{ConstraintRef, ConstraintWeights, DEFAULT_CONSTRAINT_PACKAGE};
use crate::fact::{fact_address, Fact};
use crate::factory::ConstraintFactory;
use crate::joiner::{IndexedJoinerPlanner, Joiner, JoinerPlanner, Joiners};
use crate::key::KeyValue;
use crate::network::Network;
use crate::score::Score;
use crate::session::{Session, SessionConfig};
use crate::stream_def::{ConstraintRecipe, Stream};
use crate::tuple::AnyTuple;
use crate::Result;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A named constraint with its declared weight and stream.
pub struct ConstraintDefinition<S: Score> {
    pub constraint_ref: ConstraintRef,
    pub weight: S,
    pub recipe: ConstraintRecipe,
}

impl<S: Score> fmt::Debug for ConstraintDefinition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstraintDefinition")
            .field("constraint_ref", &self.constraint_ref)
            .field("weight", &self.weight)
            .field("recipe", &self.recipe)
            .finish()
    }
}

/// Collects constraint definitions and compiles them into a [`Network`].
///
/// ```ignore
/// let builder = ConstraintBuilder::<HardSoftScore>::new();
/// builder.constraint("Room conflict", HardSoftScore::ONE_HARD, || {
///     builder
///         .for_each_unique_pair::<Lesson>(vec![Joiners::equal(room, room)])
///         .penalize()
/// });
/// let mut session = builder.build_session(SessionConfig::default())?;
/// ```
pub struct ConstraintBuilder<S: Score> {
    package: String,
    planner: Rc<dyn JoinerPlanner>,
    weights: RefCell<ConstraintWeights<S>>,
    definitions: RefCell<Vec<ConstraintDefinition<S>>>,
}

impl<S: Score> ConstraintBuilder<S> {
    pub fn new() -> Self {
        Self {
            package: DEFAULT_CONSTRAINT_PACKAGE.to_string(),
            planner: Rc::new(IndexedJoinerPlanner),
            weights: RefCell::new(ConstraintWeights::new()),
            definitions: RefCell::new(Vec::new()),
        }
    }

    /// Package used for constraint ids that do not name one.
    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = package.into();
        self
    }

    pub fn with_joiner_planner(mut self, planner: Rc<dyn JoinerPlanner>) -> Self {
        self.planner = planner;
        self
    }

    /// Weight overrides replacing the weights declared by `constraint`.
    pub fn with_weights(self, weights: ConstraintWeights<S>) -> Self {
        self.weights.replace(weights);
        self
    }

    pub fn set_weight(&self, constraint_id: &str, weight: S) -> &Self {
        let constraint_ref = ConstraintRef::parse(constraint_id, &self.package);
        self.weights.borrow_mut().set_weight(constraint_ref, weight);
        self
    }

    pub fn for_each<T: Fact>(&self) -> Stream {
        Stream::for_each::<T>()
    }

    /// Pairs of two distinct facts of type `T`, each unordered pair once.
    pub fn for_each_unique_pair<T: Fact>(&self, joiners: Vec<Joiner>) -> Stream {
        let mut joiners = joiners;
        // Orders each pair by fact address so (a, b) and (b, a) never both match
        joiners.push(Joiners::less_than(first_fact_address, first_fact_address));
        self.for_each::<T>().join(self.for_each::<T>(), joiners)
    }

    /// Adds a constraint. `id` is `"package/name"` or a bare name in the builder's package.
    pub fn constraint(&self, id: &str, weight: S, recipe_fn: impl FnOnce() -> ConstraintRecipe) -> &Self {
        let recipe = recipe_fn();
        self.definitions.borrow_mut().push(ConstraintDefinition {
            constraint_ref: ConstraintRef::parse(id, &self.package),
            weight,
            recipe,
        });
        self
    }

    pub fn constraint_count(&self) -> usize {
        self.definitions.borrow().len()
    }

    /// Compiles every constraint added so far.
    pub fn build(&self) -> Result<Rc<Network<S>>> {
        let factory = ConstraintFactory::new(Rc::clone(&self.planner), self.weights.borrow().clone());
        let definitions = self.definitions.borrow();
        factory.build_network(&definitions).map(Rc::new)
    }

    /// Compiles the network and opens a session on it.
    pub fn build_session(&self, config: SessionConfig) -> Result<Session<S>> {
        Ok(self.build()?.session(config))
    }
}

fn first_fact_address(tuple: &AnyTuple) -> KeyValue {
    tuple.fact(0).map_or(KeyValue::Null, |fact| KeyValue::from(fact_address(fact)))
}

impl<S: Score> Default for ConstraintBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Score> fmt::Debug for ConstraintBuilder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstraintBuilder")
            .field("package", &self.package)
            .field("planner", &self.planner)
            .field("constraints", &self.definitions.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::HardSoftScore;

    #[derive(Debug)]
    struct Lesson {
        room: u32,
    }
    crate::impl_fact!(Lesson);

    fn room(t: &AnyTuple) -> Option<u32> {
        t.get::<Lesson>(0).map(|l| l.room)
    }

    #[test]
    fn test_constraint_ids_use_builder_package() {
        let builder = ConstraintBuilder::<HardSoftScore>::new().with_package("timetable");
        builder
            .constraint("Room conflict", HardSoftScore::ONE_HARD, || {
                builder.for_each_unique_pair::<Lesson>(vec![]).penalize()
            })
            .constraint("other/Room use", HardSoftScore::ONE_SOFT, || {
                builder.for_each::<Lesson>().reward()
            });
        let network = builder.build().unwrap();
        assert!(network.constraint(&ConstraintRef::new("timetable", "Room conflict")).is_some());
        assert!(network.constraint(&ConstraintRef::new("other", "Room use")).is_some());
        assert_eq!(builder.constraint_count(), 2);
    }

    #[test]
    fn test_unique_pairs_match_each_pair_once() {
        let builder = ConstraintBuilder::<HardSoftScore>::new();
        builder.constraint("Room conflict", HardSoftScore::ONE_HARD, || {
            builder
                .for_each_unique_pair::<Lesson>(vec![Joiners::equal(room, room)])
                .penalize()
        });
        let mut session = builder.build_session(SessionConfig::default()).unwrap();
        for room in [1, 1, 1, 2] {
            session.insert(Rc::new(Lesson { room })).unwrap();
        }
        // Three lessons in room 1 form three pairs
        assert_eq!(session.calculate_score().unwrap(), HardSoftScore::hard(-3));
    }

    #[test]
    fn test_weight_override_beats_declared_weight() {
        let builder = ConstraintBuilder::<HardSoftScore>::new();
        builder
            .set_weight("Lessons", HardSoftScore::soft(4))
            .constraint("Lessons", HardSoftScore::ONE_SOFT, || builder.for_each::<Lesson>().penalize());
        let mut session = builder.build_session(SessionConfig::default()).unwrap();
        session.insert(Rc::new(Lesson { room: 1 })).unwrap();
        assert_eq!(session.calculate_score().unwrap(), HardSoftScore::soft(-4));
    }

    #[test]
    fn test_pair_order_key_follows_fact_address() {
        use crate::tuple::UniTuple;
        let a: Rc<dyn Fact> = Rc::new(Lesson { room: 1 });
        let b: Rc<dyn Fact> = Rc::new(Lesson { room: 1 });
        let key = |fact: &Rc<dyn Fact>| first_fact_address(&AnyTuple::Uni(UniTuple::new(Rc::clone(fact))));
        assert_eq!(
            key(&a) < key(&b),
            fact_address(&a) < fact_address(&b)
        );
        assert_eq!(key(&a), key(&a));
        assert_ne!(key(&a), KeyValue::Null);
    }
}
