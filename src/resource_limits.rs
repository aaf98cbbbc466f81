//resource_limits.rs
//! Resource management and limits for a scoring session

use crate::error::{Result, ScorenetError};

/// Resource limits to prevent unbounded growth of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum number of tuples alive in one session
    pub max_tuples: usize,
    /// Maximum number of facts registered with one session
    pub max_facts: usize,
    /// Maximum queue entries drained by a single settle
    pub max_propagations_per_settle: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_tuples: 10_000_000,
            max_facts: 1_000_000,
            max_propagations_per_settle: 50_000_000,
        }
    }
}

impl ResourceLimits {
    /// Create conservative limits for small systems
    pub fn conservative() -> Self {
        Self {
            max_tuples: 100_000,
            max_facts: 50_000,
            max_propagations_per_settle: 1_000_000,
        }
    }

    /// Create aggressive limits for high-performance systems
    pub fn aggressive() -> Self {
        Self {
            max_tuples: 100_000_000,
            max_facts: 10_000_000,
            max_propagations_per_settle: usize::MAX,
        }
    }

    /// Check if registering one more fact would exceed limits
    pub fn check_fact_limit(&self, current_facts: usize) -> Result<()> {
        if current_facts >= self.max_facts {
            return Err(ScorenetError::resource_limit(
                "max_facts",
                format!("Current: {}, Limit: {}", current_facts, self.max_facts),
            ));
        }
        Ok(())
    }

    /// Check the propagation budget of the running settle
    pub fn check_propagation_limit(&self, propagated: usize) -> Result<()> {
        if propagated > self.max_propagations_per_settle {
            return Err(ScorenetError::resource_limit(
                "propagations_per_settle",
                format!(
                    "Current: {}, Limit: {}",
                    propagated, self.max_propagations_per_settle
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_ordered() {
        let small = ResourceLimits::conservative();
        let normal = ResourceLimits::default();
        let large = ResourceLimits::aggressive();
        assert!(small.max_tuples < normal.max_tuples);
        assert!(normal.max_tuples < large.max_tuples);
    }

    #[test]
    fn test_fact_limit() {
        let limits = ResourceLimits { max_facts: 2, ..ResourceLimits::default() };
        assert!(limits.check_fact_limit(1).is_ok());
        assert!(limits.check_fact_limit(2).is_err());
    }
}
