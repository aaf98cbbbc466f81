// lib.rs - Main library file
//!
//! Incremental constraint evaluation network for planning score calculation.
//!
//! Constraints are declared as streams over facts (filter, join, exists, group, map) and
//! compiled into a [`network::Network`] of nodes. A [`Session`] on that network accepts
//! insert, update and retract notifications and keeps the score current by propagating
//! only the changes, undoing each stale contribution exactly.

pub mod analysis;
pub mod arena;
pub mod collectors;
pub mod constraint;
pub mod constraint_builder;
pub mod error;
pub mod fact;
pub mod fact_impls;
pub mod factory;
pub mod index;
pub mod joiner;
pub mod key;
pub mod network;
pub mod nodes;
pub mod propagation;
pub mod resource_limits;
pub mod score;
pub mod session;
pub mod state;
pub mod store;
pub mod stream_def;
pub mod tuple;

// Re-export core types for easier access from outside the crate.
pub use analysis::{
    ConstraintAnalysis, ConstraintMatch, ConstraintMatchTotal, ConstraintViolationReport, Indictment,
    NetworkStatistics,
};
pub use collectors::{Collector, CollectorSupplier, Collectors, Receipt};
pub use constraint::{ConstraintRef, ConstraintWeights, ImpactType};
pub use constraint_builder::ConstraintBuilder;
pub use error::{Result, ScorenetError};
pub use fact::{Fact, FactRef};
pub use joiner::{IndexedJoinerPlanner, Joiner, JoinerPlanner, JoinerType, Joiners, UnindexedJoinerPlanner};
pub use key::{key_fn, KeyFn, KeyValue};
pub use network::Network;
pub use resource_limits::ResourceLimits;
pub use score::{HardMediumSoftScore, HardSoftScore, Score, SimpleScore};
pub use session::{Session, SessionConfig};
pub use state::TupleState;
pub use stream_def::{ConstraintRecipe, Stream};
pub use tuple::{extract_fact, AnyTuple, BiTuple, PentaTuple, QuadTuple, TriTuple, TupleArity, UniTuple};

/// Convenience function to create a new constraint builder.
pub fn builder<S: Score>() -> ConstraintBuilder<S> {
    ConstraintBuilder::new()
}

/// A "prelude" module for easily importing the most commonly used types.
pub mod prelude {
    pub use crate::{
        builder, extract_fact, impl_fact, key_fn, AnyTuple, Collectors, ConstraintBuilder, ConstraintRecipe,
        ConstraintRef, Fact, HardMediumSoftScore, HardSoftScore, Joiners, KeyValue, ResourceLimits, Result, Score,
        ScorenetError, Session, SessionConfig, SimpleScore, Stream,
    };

    pub use std::rc::Rc;
}
