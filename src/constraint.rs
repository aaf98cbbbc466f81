// constraint.rs

use crate::score::Score;
use rustc_hash::FxHashMap as HashMap;
use std::fmt;

pub const DEFAULT_CONSTRAINT_PACKAGE: &str = "default";

/// A cheap-to-copy identifier for a constraint inside one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintId(pub usize);

/// Public identity of a constraint: package plus name.
///
/// Parsed from `"package/name"`; a bare `"name"` lands in the default package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintRef {
    pub package: String,
    pub name: String,
}

impl ConstraintRef {
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            name: name.into(),
        }
    }

    pub fn parse(id: &str, default_package: &str) -> Self {
        match id.rsplit_once('/') {
            Some((package, name)) if !package.is_empty() => Self::new(package, name),
            _ => Self::new(default_package, id.trim_start_matches('/')),
        }
    }
}

impl fmt::Display for ConstraintRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.name)
    }
}

impl From<&str> for ConstraintRef {
    fn from(id: &str) -> Self {
        ConstraintRef::parse(id, DEFAULT_CONSTRAINT_PACKAGE)
    }
}

impl From<String> for ConstraintRef {
    fn from(id: String) -> Self {
        ConstraintRef::parse(&id, DEFAULT_CONSTRAINT_PACKAGE)
    }
}

/// Whether a constraint lowers or raises the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImpactType {
    Penalty,
    Reward,
    /// The match weight carries its own sign.
    Mixed,
}

impl ImpactType {
    #[inline]
    pub fn sign(&self) -> i64 {
        match self {
            ImpactType::Penalty => -1,
            ImpactType::Reward | ImpactType::Mixed => 1,
        }
    }
}

/// Everything the network knows about one constraint.
#[derive(Debug, Clone)]
pub struct ConstraintInfo<S: Score> {
    pub id: ConstraintId,
    pub constraint_ref: ConstraintRef,
    pub weight: S,
    pub impact: ImpactType,
}

/// Weight overrides applied when the network is built.
///
/// Constraints declare a default weight; an override replaces it without touching the
/// constraint definition.
#[derive(Debug, Clone)]
pub struct ConstraintWeights<S: Score> {
    overrides: HashMap<ConstraintRef, S>,
}

impl<S: Score> ConstraintWeights<S> {
    pub fn new() -> Self {
        Self {
            overrides: HashMap::default(),
        }
    }

    /// Sets a weight for a constraint using its id string.
    pub fn set_weight(&mut self, constraint: impl Into<ConstraintRef>, weight: S) {
        self.overrides.insert(constraint.into(), weight);
    }

    pub fn get_weight(&self, constraint: &ConstraintRef) -> Option<S> {
        self.overrides.get(constraint).copied()
    }

    /// The override if present, else the declared weight.
    pub fn resolve(&self, constraint: &ConstraintRef, declared: S) -> S {
        self.get_weight(constraint).unwrap_or(declared)
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConstraintRef, &S)> {
        self.overrides.iter()
    }
}

impl<S: Score> Default for ConstraintWeights<S> {
    fn default() -> Self {
        Self::new()
    }
}
