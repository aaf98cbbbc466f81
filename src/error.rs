//error.rs
//! Error types for the scorenet evaluation network

use thiserror::Error;

/// Result type alias for scorenet operations
pub type Result<T> = std::result::Result<T, ScorenetError>;

/// Main error type for scorenet operations
#[derive(Debug, Error)]
pub enum ScorenetError {
    /// Malformed constraint definition, detected while building the network.
    #[error("Configuration error in constraint '{constraint}': {details}")]
    Configuration { constraint: String, details: String },

    /// A user supplied function panicked while a node evaluated it.
    #[error("Evaluation error in constraint '{constraint}' at {node} on facts {facts}: {message}")]
    Evaluation {
        constraint: String,
        node: String,
        facts: String,
        message: String,
    },

    /// Internal bookkeeping is inconsistent. The session must be discarded.
    #[error("Invariant violated at {node}: {details}")]
    Invariant { node: String, details: String },

    #[error("Fact {0} was already inserted")]
    DuplicateFact(String),

    #[error("Fact {0} is not known to the session")]
    FactNotFound(String),

    #[error("Resource limit exceeded: {limit_type} - {details}")]
    ResourceLimit {
        limit_type: String,
        details: String,
    },

    #[error("Session is unusable after an earlier failure: {cause}")]
    SessionPoisoned { cause: String },

    #[error("Constraint match tracking is disabled for this session")]
    MatchTrackingDisabled,

    #[error("Unknown constraint '{0}'")]
    UnknownConstraint(String),

    #[error("Score mismatch: incremental {incremental}, from scratch {from_scratch}")]
    ScoreCorruption {
        incremental: String,
        from_scratch: String,
    },
}

impl ScorenetError {
    pub fn configuration(constraint: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Configuration {
            constraint: constraint.into(),
            details: details.into(),
        }
    }

    pub fn evaluation(
        constraint: impl Into<String>,
        node: impl Into<String>,
        facts: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Evaluation {
            constraint: constraint.into(),
            node: node.into(),
            facts: facts.into(),
            message: message.into(),
        }
    }

    pub fn invariant(node: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Invariant {
            node: node.into(),
            details: details.into(),
        }
    }

    pub fn duplicate_fact(fact: impl Into<String>) -> Self {
        Self::DuplicateFact(fact.into())
    }

    pub fn fact_not_found(fact: impl Into<String>) -> Self {
        Self::FactNotFound(fact.into())
    }

    pub fn resource_limit(limit_type: impl Into<String>, details: impl Into<String>) -> Self {
        Self::ResourceLimit {
            limit_type: limit_type.into(),
            details: details.into(),
        }
    }

    /// Errors after which the session state can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Evaluation { .. } | Self::Invariant { .. } | Self::ResourceLimit { .. }
        )
    }
}
