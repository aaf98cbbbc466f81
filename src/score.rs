use std::fmt::{self, Debug, Display};
use std::ops::{Add, Neg, Sub};

/// Core trait for all multi-level score types.
///
/// Components are integers so that applying a delta and later subtracting it restores
/// the previous value exactly.
pub trait Score:
    Clone
    + Copy
    + Debug
    + Display
    + PartialEq
    + Eq
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Neg<Output = Self>
    + 'static
{
    /// Returns the zero score (the additive identity)
    fn null_score() -> Self;

    /// Returns the names of score fields for this score type
    fn get_fields() -> &'static [&'static str];

    /// Converts the score to its components, most significant first
    fn as_list(&self) -> Vec<i64>;

    /// Creates a score from components, most significant first; missing ones are zero
    fn from_list(values: &[i64]) -> Self;

    /// Multiplies every component by a match weight; `None` on overflow
    fn multiply(&self, match_weight: i64) -> Option<Self>;

    /// Component-wise sum; `None` on overflow
    fn checked_add(&self, other: &Self) -> Option<Self>;

    /// Returns true when no hard-level component is negative
    fn is_feasible(&self) -> bool;

    fn is_zero(&self) -> bool {
        *self == Self::null_score()
    }
}

macro_rules! impl_score_ops {
    ($T:ident { $($field:ident),+ }) => {
        impl Add for $T {
            type Output = Self;
            fn add(self, other: Self) -> Self {
                $T { $($field: self.$field + other.$field),+ }
            }
        }

        impl Sub for $T {
            type Output = Self;
            fn sub(self, other: Self) -> Self {
                $T { $($field: self.$field - other.$field),+ }
            }
        }

        impl Neg for $T {
            type Output = Self;
            fn neg(self) -> Self {
                $T { $($field: -self.$field),+ }
            }
        }

        impl Default for $T {
            fn default() -> Self {
                <$T as Score>::null_score()
            }
        }

        impl $T {
            fn checked_multiply(&self, match_weight: i64) -> Option<Self> {
                Some($T { $($field: self.$field.checked_mul(match_weight)?),+ })
            }

            fn checked_sum(&self, other: &Self) -> Option<Self> {
                Some($T { $($field: self.$field.checked_add(other.$field)?),+ })
            }
        }
    };
}

/// Single-level score
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimpleScore {
    pub simple_value: i64,
}

impl SimpleScore {
    pub const ZERO: SimpleScore = SimpleScore { simple_value: 0 };
    pub const ONE: SimpleScore = SimpleScore { simple_value: 1 };

    pub fn new(simple_value: i64) -> Self {
        Self { simple_value }
    }
}

impl_score_ops!(SimpleScore { simple_value });

impl Score for SimpleScore {
    fn null_score() -> Self {
        Self::ZERO
    }

    fn get_fields() -> &'static [&'static str] {
        &["simple_value"]
    }

    fn as_list(&self) -> Vec<i64> {
        vec![self.simple_value]
    }

    fn from_list(values: &[i64]) -> Self {
        SimpleScore {
            simple_value: values.first().copied().unwrap_or(0),
        }
    }

    fn multiply(&self, match_weight: i64) -> Option<Self> {
        self.checked_multiply(match_weight)
    }

    fn checked_add(&self, other: &Self) -> Option<Self> {
        self.checked_sum(other)
    }

    fn is_feasible(&self) -> bool {
        true
    }
}

impl Display for SimpleScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.simple_value)
    }
}

/// Two-level score: hard constraints dominate soft ones
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HardSoftScore {
    pub hard_score: i64,
    pub soft_score: i64,
}

impl HardSoftScore {
    pub const ZERO: HardSoftScore = HardSoftScore { hard_score: 0, soft_score: 0 };
    pub const ONE_HARD: HardSoftScore = HardSoftScore { hard_score: 1, soft_score: 0 };
    pub const ONE_SOFT: HardSoftScore = HardSoftScore { hard_score: 0, soft_score: 1 };

    pub fn new(hard_score: i64, soft_score: i64) -> Self {
        Self { hard_score, soft_score }
    }

    pub fn hard(hard_score: i64) -> Self {
        Self { hard_score, soft_score: 0 }
    }

    pub fn soft(soft_score: i64) -> Self {
        Self { hard_score: 0, soft_score }
    }
}

impl_score_ops!(HardSoftScore { hard_score, soft_score });

impl Score for HardSoftScore {
    fn null_score() -> Self {
        Self::ZERO
    }

    fn get_fields() -> &'static [&'static str] {
        &["hard_score", "soft_score"]
    }

    fn as_list(&self) -> Vec<i64> {
        vec![self.hard_score, self.soft_score]
    }

    fn from_list(values: &[i64]) -> Self {
        HardSoftScore {
            hard_score: values.first().copied().unwrap_or(0),
            soft_score: values.get(1).copied().unwrap_or(0),
        }
    }

    fn multiply(&self, match_weight: i64) -> Option<Self> {
        self.checked_multiply(match_weight)
    }

    fn checked_add(&self, other: &Self) -> Option<Self> {
        self.checked_sum(other)
    }

    fn is_feasible(&self) -> bool {
        self.hard_score >= 0
    }
}

impl Display for HardSoftScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}hard/{}soft", self.hard_score, self.soft_score)
    }
}

/// Three-level score
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HardMediumSoftScore {
    pub hard_score: i64,
    pub medium_score: i64,
    pub soft_score: i64,
}

impl HardMediumSoftScore {
    pub const ZERO: HardMediumSoftScore =
        HardMediumSoftScore { hard_score: 0, medium_score: 0, soft_score: 0 };
    pub const ONE_HARD: HardMediumSoftScore =
        HardMediumSoftScore { hard_score: 1, medium_score: 0, soft_score: 0 };
    pub const ONE_MEDIUM: HardMediumSoftScore =
        HardMediumSoftScore { hard_score: 0, medium_score: 1, soft_score: 0 };
    pub const ONE_SOFT: HardMediumSoftScore =
        HardMediumSoftScore { hard_score: 0, medium_score: 0, soft_score: 1 };

    pub fn new(hard_score: i64, medium_score: i64, soft_score: i64) -> Self {
        Self { hard_score, medium_score, soft_score }
    }

    pub fn hard(hard_score: i64) -> Self {
        Self { hard_score, ..Self::ZERO }
    }

    pub fn medium(medium_score: i64) -> Self {
        Self { medium_score, ..Self::ZERO }
    }

    pub fn soft(soft_score: i64) -> Self {
        Self { soft_score, ..Self::ZERO }
    }
}

impl_score_ops!(HardMediumSoftScore { hard_score, medium_score, soft_score });

impl Score for HardMediumSoftScore {
    fn null_score() -> Self {
        Self::ZERO
    }

    fn get_fields() -> &'static [&'static str] {
        &["hard_score", "medium_score", "soft_score"]
    }

    fn as_list(&self) -> Vec<i64> {
        vec![self.hard_score, self.medium_score, self.soft_score]
    }

    fn from_list(values: &[i64]) -> Self {
        HardMediumSoftScore {
            hard_score: values.first().copied().unwrap_or(0),
            medium_score: values.get(1).copied().unwrap_or(0),
            soft_score: values.get(2).copied().unwrap_or(0),
        }
    }

    fn multiply(&self, match_weight: i64) -> Option<Self> {
        self.checked_multiply(match_weight)
    }

    fn checked_add(&self, other: &Self) -> Option<Self> {
        self.checked_sum(other)
    }

    fn is_feasible(&self) -> bool {
        self.hard_score >= 0
    }
}

impl Display for HardMediumSoftScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}hard/{}medium/{}soft",
            self.hard_score, self.medium_score, self.soft_score
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_dominates_soft() {
        assert!(HardSoftScore::new(0, -100) > HardSoftScore::new(-1, 0));
        assert!(HardMediumSoftScore::medium(-1) < HardMediumSoftScore::soft(-50));
    }

    #[test]
    fn test_delta_round_trip_is_exact() {
        let start = HardSoftScore::new(-3, 17);
        let delta = HardSoftScore::ONE_SOFT.multiply(-42).unwrap();
        assert_eq!((start + delta) - delta, start);
        assert_eq!(start + -start, HardSoftScore::ZERO);
    }

    #[test]
    fn test_overflow_is_reported_not_wrapped() {
        assert_eq!(SimpleScore::new(2).multiply(i64::MAX), None);
        assert_eq!(HardSoftScore::soft(-1).multiply(i64::MIN), None);
        assert_eq!(HardMediumSoftScore::medium(3).multiply(-2), Some(HardMediumSoftScore::medium(-6)));
        assert_eq!(SimpleScore::new(i64::MAX).checked_add(&SimpleScore::ONE), None);
        assert_eq!(
            HardSoftScore::new(1, 2).checked_add(&HardSoftScore::new(3, 4)),
            Some(HardSoftScore::new(4, 6))
        );
    }

    #[test]
    fn test_list_conversion() {
        let score = HardMediumSoftScore::new(1, 2, 3);
        assert_eq!(score.as_list(), vec![1, 2, 3]);
        assert_eq!(HardMediumSoftScore::from_list(&[1, 2]), HardMediumSoftScore::new(1, 2, 0));
        assert_eq!(SimpleScore::from_list(&[]), SimpleScore::ZERO);
        assert_eq!(HardSoftScore::get_fields().len(), 2);
    }

    #[test]
    fn test_feasibility_and_display() {
        assert!(!HardSoftScore::hard(-1).is_feasible());
        assert!(HardSoftScore::soft(-9).is_feasible());
        assert_eq!(HardSoftScore::new(-2, 5).to_string(), "-2hard/5soft");
        assert!(SimpleScore::default().is_zero());
    }
}
