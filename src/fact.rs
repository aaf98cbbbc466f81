// fact.rs - Fact trait and identity handles
use std::any::Any;
use std::cmp::Ordering;
use std::fmt::{self, Debug};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Core trait for everything that flows through the network.
///
/// Facts are shared as `Rc<dyn Fact>`. Two tuples hold the same fact when they hold the
/// same allocation; the network never compares facts structurally to decide identity.
/// Planning variables that change during search are expected to live behind interior
/// mutability (`Cell`, `RefCell`) so the allocation stays stable across updates.
pub trait Fact: Debug + 'static {
    /// Returns the fact as a `&dyn Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Value comparison used to skip updates of derived facts (collector results, mapped
    /// values) whose value did not change.
    ///
    /// Defaults to `false`: a fact with interior mutability may have changed even when it
    /// is the very same allocation, so only types with plain values override this.
    fn eq_fact(&self, _other: &dyn Fact) -> bool {
        false
    }
}

/// Implements [`Fact`] with identity semantics for plain domain types.
#[macro_export]
macro_rules! impl_fact {
    ($($t:ty),+ $(,)?) => {
        $(
            impl $crate::Fact for $t {
                fn as_any(&self) -> &dyn ::std::any::Any {
                    self
                }
            }
        )+
    };
}

/// Address of the allocation behind a fact reference.
#[inline]
pub fn fact_address(fact: &Rc<dyn Fact>) -> usize {
    Rc::as_ptr(fact) as *const () as usize
}

/// A fact reference compared, hashed and ordered by identity.
#[derive(Clone)]
pub struct FactRef(pub Rc<dyn Fact>);

impl FactRef {
    pub fn new(fact: Rc<dyn Fact>) -> Self {
        Self(fact)
    }

    #[inline]
    pub fn address(&self) -> usize {
        fact_address(&self.0)
    }

    pub fn fact(&self) -> &Rc<dyn Fact> {
        &self.0
    }

    pub fn downcast<T: Fact>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }
}

impl PartialEq for FactRef {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl Eq for FactRef {}

impl Hash for FactRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}

impl PartialOrd for FactRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FactRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.address().cmp(&other.address())
    }
}

impl Debug for FactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Helper functions for working with `Fact` trait objects
pub mod fact_utils {
    use super::*;

    /// Downcast a trait object to a concrete type
    pub fn downcast_fact<T: Fact>(fact: &dyn Fact) -> Option<&T> {
        fact.as_any().downcast_ref::<T>()
    }

    /// Renders facts for error messages and match reports.
    pub fn describe_facts<'a>(facts: impl IntoIterator<Item = &'a Rc<dyn Fact>>) -> String {
        let rendered: Vec<String> = facts.into_iter().map(|f| format!("{:?}", f)).collect();
        format!("[{}]", rendered.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug)]
    struct Shift {
        employee: Cell<u32>,
    }

    crate::impl_fact!(Shift);

    #[test]
    fn test_identity_ignores_field_values() {
        let a: Rc<dyn Fact> = Rc::new(Shift { employee: Cell::new(1) });
        let b: Rc<dyn Fact> = Rc::new(Shift { employee: Cell::new(1) });
        assert!(FactRef::new(a.clone()) == FactRef::new(a.clone()));
        assert!(FactRef::new(a.clone()) != FactRef::new(b.clone()));
        assert!(!a.eq_fact(a.as_ref()));
        assert!(!a.eq_fact(b.as_ref()));
    }

    #[test]
    fn test_identity_survives_mutation() {
        let shift = Rc::new(Shift { employee: Cell::new(1) });
        let fact: Rc<dyn Fact> = shift.clone();
        let before = fact_address(&fact);
        shift.employee.set(7);
        assert_eq!(before, fact_address(&fact));
        assert_eq!(FactRef::new(fact).downcast::<Shift>().map(|s| s.employee.get()), Some(7));
    }
}
