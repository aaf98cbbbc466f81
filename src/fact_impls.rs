use crate::fact::Fact;
use std::any::Any;
use std::rc::Rc;

macro_rules! impl_fact_for_primitive {
    ($($T:ty),+) => {
        $(
            impl Fact for $T {
                fn as_any(&self) -> &dyn Any {
                    self
                }

                fn eq_fact(&self, other: &dyn Fact) -> bool {
                    other.as_any().downcast_ref::<$T>().map_or(false, |a| a == self)
                }
            }
        )+
    };
}

impl_fact_for_primitive!(i32, i64, u32, u64, usize, bool, String, char);

impl Fact for f64 {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_fact(&self, other: &dyn Fact) -> bool {
        other
            .as_any()
            .downcast_ref::<f64>()
            .map_or(false, |a| a.to_bits() == self.to_bits())
    }
}

/// Collector results that gather facts compare element-wise by value.
impl Fact for Vec<Rc<dyn Fact>> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_fact(&self, other: &dyn Fact) -> bool {
        other
            .as_any()
            .downcast_ref::<Vec<Rc<dyn Fact>>>()
            .map_or(false, |other| {
                self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a.eq_fact(b.as_ref()))
            })
    }
}

/// Optional results (min/max of an empty selection) compare by inner value.
impl<T: Fact + PartialEq> Fact for Option<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_fact(&self, other: &dyn Fact) -> bool {
        other
            .as_any()
            .downcast_ref::<Option<T>>()
            .map_or(false, |a| a == self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_value_equality() {
        let a: Rc<dyn Fact> = Rc::new(6i64);
        let b: Rc<dyn Fact> = Rc::new(6i64);
        let c: Rc<dyn Fact> = Rc::new(6usize);
        assert!(a.eq_fact(b.as_ref()));
        assert!(!a.eq_fact(c.as_ref()));
    }

    #[test]
    fn test_fact_list_equality_is_by_value() {
        #[derive(Debug)]
        struct Visit;
        crate::impl_fact!(Visit);

        let x: Rc<dyn Fact> = Rc::new(1i64);
        let y: Rc<dyn Fact> = Rc::new(1i64);
        let left: Rc<dyn Fact> = Rc::new(vec![x.clone()]);
        let same: Rc<dyn Fact> = Rc::new(vec![y]);
        let longer: Rc<dyn Fact> = Rc::new(vec![x.clone(), x]);
        assert!(left.eq_fact(same.as_ref()));
        assert!(!left.eq_fact(longer.as_ref()));

        // Domain facts may mutate in place, so lists holding them never compare equal
        let visit: Rc<dyn Fact> = Rc::new(Visit);
        let visits: Rc<dyn Fact> = Rc::new(vec![visit.clone()]);
        let again: Rc<dyn Fact> = Rc::new(vec![visit]);
        assert!(!visits.eq_fact(again.as_ref()));
    }
}
