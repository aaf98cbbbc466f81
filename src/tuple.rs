// tuple.rs
use crate::fact::Fact;
use smallvec::{smallvec, SmallVec};
use std::rc::Rc;

/// Facts of one tuple, inline up to the maximum arity.
pub type FactList = SmallVec<[Rc<dyn Fact>; 5]>;

pub const MAX_ARITY: usize = 5;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum TupleArity {
    One, Two, Three, Four, Five,
}

impl TupleArity {
    #[inline]
    pub fn as_usize(&self) -> usize {
        match self {
            TupleArity::One => 1, TupleArity::Two => 2, TupleArity::Three => 3,
            TupleArity::Four => 4, TupleArity::Five => 5,
        }
    }

    #[inline]
    pub fn from_usize(value: usize) -> Option<Self> {
        match value {
            1 => Some(TupleArity::One), 2 => Some(TupleArity::Two),
            3 => Some(TupleArity::Three), 4 => Some(TupleArity::Four),
            5 => Some(TupleArity::Five), _ => None,
        }
    }

    /// Position of this arity's lane in per-lane tables.
    #[inline]
    pub fn lane(&self) -> usize {
        self.as_usize() - 1
    }
}

/// An ordered combination of fact references, as seen by user functions.
#[derive(Clone, Debug)]
pub enum AnyTuple {
    Uni(UniTuple), Bi(BiTuple), Tri(TriTuple), Quad(QuadTuple), Penta(PentaTuple),
}

impl AnyTuple {
    /// Builds the tuple variant matching the number of facts.
    pub fn from_facts(facts: FactList) -> Option<AnyTuple> {
        let mut it = facts.into_iter();
        let tuple = match it.len() {
            1 => AnyTuple::Uni(UniTuple::new(it.next()?)),
            2 => AnyTuple::Bi(BiTuple::new(it.next()?, it.next()?)),
            3 => AnyTuple::Tri(TriTuple::new(it.next()?, it.next()?, it.next()?)),
            4 => AnyTuple::Quad(QuadTuple::new(it.next()?, it.next()?, it.next()?, it.next()?)),
            5 => AnyTuple::Penta(PentaTuple::new(
                it.next()?, it.next()?, it.next()?, it.next()?, it.next()?,
            )),
            _ => return None,
        };
        Some(tuple)
    }

    /// Concatenates the facts of two tuples, or `None` past the maximum arity.
    pub fn combine(&self, other: &AnyTuple) -> Option<AnyTuple> {
        let mut combined = self.facts_vec();
        combined.extend(other.facts_vec());
        AnyTuple::from_facts(combined)
    }

    #[inline]
    pub fn facts_vec(&self) -> FactList {
        match self {
            AnyTuple::Uni(t) => t.facts(),
            AnyTuple::Bi(t) => t.facts(),
            AnyTuple::Tri(t) => t.facts(),
            AnyTuple::Quad(t) => t.facts(),
            AnyTuple::Penta(t) => t.facts(),
        }
    }

    /// The fact at `index`, counting from zero.
    #[inline]
    pub fn fact(&self, index: usize) -> Option<&Rc<dyn Fact>> {
        match (self, index) {
            (AnyTuple::Uni(t), 0) => Some(&t.fact_a),
            (AnyTuple::Bi(t), 0) => Some(&t.fact_a),
            (AnyTuple::Bi(t), 1) => Some(&t.fact_b),
            (AnyTuple::Tri(t), 0) => Some(&t.fact_a),
            (AnyTuple::Tri(t), 1) => Some(&t.fact_b),
            (AnyTuple::Tri(t), 2) => Some(&t.fact_c),
            (AnyTuple::Quad(t), 0) => Some(&t.fact_a),
            (AnyTuple::Quad(t), 1) => Some(&t.fact_b),
            (AnyTuple::Quad(t), 2) => Some(&t.fact_c),
            (AnyTuple::Quad(t), 3) => Some(&t.fact_d),
            (AnyTuple::Penta(t), 0) => Some(&t.fact_a),
            (AnyTuple::Penta(t), 1) => Some(&t.fact_b),
            (AnyTuple::Penta(t), 2) => Some(&t.fact_c),
            (AnyTuple::Penta(t), 3) => Some(&t.fact_d),
            (AnyTuple::Penta(t), 4) => Some(&t.fact_e),
            _ => None,
        }
    }

    /// Downcasts the fact at `index`.
    #[inline]
    pub fn get<T: Fact>(&self, index: usize) -> Option<&T> {
        self.fact(index).and_then(|f| f.as_any().downcast_ref::<T>())
    }

    #[inline]
    pub fn arity(&self) -> usize {
        match self {
            AnyTuple::Uni(_) => 1, AnyTuple::Bi(_) => 2, AnyTuple::Tri(_) => 3,
            AnyTuple::Quad(_) => 4, AnyTuple::Penta(_) => 5,
        }
    }

    #[inline]
    pub fn tuple_arity(&self) -> TupleArity {
        match self {
            AnyTuple::Uni(_) => TupleArity::One, AnyTuple::Bi(_) => TupleArity::Two,
            AnyTuple::Tri(_) => TupleArity::Three, AnyTuple::Quad(_) => TupleArity::Four,
            AnyTuple::Penta(_) => TupleArity::Five,
        }
    }

    /// True when both tuples hold the very same fact allocations in the same order.
    /// True when both tuples hold equal values column by column, per [`Fact::eq_fact`].
    pub fn same_values(&self, other: &AnyTuple) -> bool {
        self.arity() == other.arity()
            && (0..self.arity()).all(|i| match (self.fact(i), other.fact(i)) {
                (Some(a), Some(b)) => a.eq_fact(b.as_ref()),
                _ => false,
            })
    }
}

/// Downcasts the fact at `index` of a tuple. Convenience for constraint closures.
pub fn extract_fact<T: Fact>(tuple: &AnyTuple, index: usize) -> Option<&T> {
    tuple.get::<T>(index)
}

#[derive(Clone, Debug)]
pub struct UniTuple {
    pub fact_a: Rc<dyn Fact>,
}

impl UniTuple {
    #[inline]
    pub fn new(fact_a: Rc<dyn Fact>) -> Self {
        Self { fact_a }
    }

    pub fn facts(&self) -> FactList {
        smallvec![self.fact_a.clone()]
    }
}

#[derive(Clone, Debug)]
pub struct BiTuple {
    pub fact_a: Rc<dyn Fact>,
    pub fact_b: Rc<dyn Fact>,
}

impl BiTuple {
    #[inline]
    pub fn new(fact_a: Rc<dyn Fact>, fact_b: Rc<dyn Fact>) -> Self {
        Self { fact_a, fact_b }
    }

    pub fn facts(&self) -> FactList {
        smallvec![self.fact_a.clone(), self.fact_b.clone()]
    }
}

#[derive(Clone, Debug)]
pub struct TriTuple {
    pub fact_a: Rc<dyn Fact>,
    pub fact_b: Rc<dyn Fact>,
    pub fact_c: Rc<dyn Fact>,
}

impl TriTuple {
    #[inline]
    pub fn new(fact_a: Rc<dyn Fact>, fact_b: Rc<dyn Fact>, fact_c: Rc<dyn Fact>) -> Self {
        Self { fact_a, fact_b, fact_c }
    }

    pub fn facts(&self) -> FactList {
        smallvec![self.fact_a.clone(), self.fact_b.clone(), self.fact_c.clone()]
    }
}

#[derive(Clone, Debug)]
pub struct QuadTuple {
    pub fact_a: Rc<dyn Fact>,
    pub fact_b: Rc<dyn Fact>,
    pub fact_c: Rc<dyn Fact>,
    pub fact_d: Rc<dyn Fact>,
}

impl QuadTuple {
    #[inline]
    pub fn new(fact_a: Rc<dyn Fact>, fact_b: Rc<dyn Fact>, fact_c: Rc<dyn Fact>, fact_d: Rc<dyn Fact>) -> Self {
        Self { fact_a, fact_b, fact_c, fact_d }
    }

    pub fn facts(&self) -> FactList {
        smallvec![self.fact_a.clone(), self.fact_b.clone(), self.fact_c.clone(), self.fact_d.clone()]
    }
}

#[derive(Clone, Debug)]
pub struct PentaTuple {
    pub fact_a: Rc<dyn Fact>,
    pub fact_b: Rc<dyn Fact>,
    pub fact_c: Rc<dyn Fact>,
    pub fact_d: Rc<dyn Fact>,
    pub fact_e: Rc<dyn Fact>,
}

impl PentaTuple {
    #[inline]
    pub fn new(fact_a: Rc<dyn Fact>, fact_b: Rc<dyn Fact>, fact_c: Rc<dyn Fact>, fact_d: Rc<dyn Fact>, fact_e: Rc<dyn Fact>) -> Self {
        Self { fact_a, fact_b, fact_c, fact_d, fact_e }
    }

    pub fn facts(&self) -> FactList {
        smallvec![self.fact_a.clone(), self.fact_b.clone(), self.fact_c.clone(), self.fact_d.clone(), self.fact_e.clone()]
    }
}
