// state.rs - Tuple state management

/// Lifecycle state of a tuple (or an exists counter) inside one session.
///
/// Creating, Updating and Dying tuples sit in their owner node's propagation
/// queue. Aborting tuples are also queued, but leave it without reaching children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TupleState {
    /// Inserted, waiting to be propagated to children
    Creating,
    /// Propagated and stable
    Ok,
    /// Changed in place, waiting to be re-propagated
    Updating,
    /// Retracted after it was propagated, waiting for the retraction to reach children
    Dying,
    /// Retracted before it was ever propagated
    Aborting,
    /// Gone; the arena releases it at the end of the settle pass
    Dead,
}

impl TupleState {
    /// Returns true if the tuple is in a transitional state that requires processing.
    pub fn is_dirty(&self) -> bool {
        matches!(
            self,
            TupleState::Creating | TupleState::Updating | TupleState::Dying | TupleState::Aborting
        )
    }

    /// Returns true if children have seen (or are about to see) this tuple as live.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TupleState::Creating | TupleState::Ok | TupleState::Updating
        )
    }
}

impl Default for TupleState {
    fn default() -> Self {
        TupleState::Dead
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirty_states() {
        assert!(TupleState::Creating.is_dirty());
        assert!(TupleState::Aborting.is_dirty());
        assert!(!TupleState::Ok.is_dirty());
        assert!(!TupleState::Dead.is_dirty());
        assert_eq!(TupleState::default(), TupleState::Dead);
    }

    #[test]
    fn test_active_states() {
        assert!(TupleState::Updating.is_active());
        assert!(!TupleState::Dying.is_active());
        assert!(!TupleState::Aborting.is_active());
    }
}
