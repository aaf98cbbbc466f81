// key.rs - Join and group key values
use crate::fact::{Fact, FactRef};
use crate::tuple::AnyTuple;
use smallvec::SmallVec;
use std::any::Any;
use std::rc::Rc;

/// One column of a join or group key.
///
/// Keys are compared by value, except `Fact`, which compares the referenced fact by
/// identity. Key functions should project only the columns the join equates, so facts
/// that differ in other fields still meet in the same bucket.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyValue {
    Null,
    Bool(bool),
    Int(i64),
    /// Unsigned values above `i64::MAX`; smaller ones are `Int`.
    UInt(u64),
    Text(Rc<str>),
    Fact(FactRef),
}

pub type KeyFn = Rc<dyn Fn(&AnyTuple) -> KeyValue>;

/// Wraps a tuple projection as a key column.
pub fn key_fn<F, K>(f: F) -> KeyFn
where
    F: Fn(&AnyTuple) -> K + 'static,
    K: Into<KeyValue>,
{
    Rc::new(move |t: &AnyTuple| f(t).into())
}

impl KeyValue {
    pub fn of_fact(fact: &Rc<dyn Fact>) -> Self {
        KeyValue::Fact(FactRef::new(Rc::clone(fact)))
    }

    /// Key of a fact compared by value when it is a plain value (integer, bool, text or
    /// key), by identity otherwise. `f64` facts compare by identity.
    pub fn of_value(fact: &Rc<dyn Fact>) -> Self {
        let any = fact.as_any();
        if let Some(v) = any.downcast_ref::<KeyValue>() {
            v.clone()
        } else if let Some(v) = any.downcast_ref::<i64>() {
            KeyValue::Int(*v)
        } else if let Some(v) = any.downcast_ref::<i32>() {
            KeyValue::from(*v)
        } else if let Some(v) = any.downcast_ref::<u32>() {
            KeyValue::from(*v)
        } else if let Some(v) = any.downcast_ref::<u64>() {
            KeyValue::from(*v)
        } else if let Some(v) = any.downcast_ref::<usize>() {
            KeyValue::from(*v)
        } else if let Some(v) = any.downcast_ref::<bool>() {
            KeyValue::Bool(*v)
        } else if let Some(v) = any.downcast_ref::<String>() {
            KeyValue::from(v.as_str())
        } else if let Some(v) = any.downcast_ref::<char>() {
            KeyValue::from(*v)
        } else {
            KeyValue::of_fact(fact)
        }
    }

    /// True when the key holds a domain fact, whose fields the key does not capture.
    pub fn is_fact(&self) -> bool {
        matches!(self, KeyValue::Fact(_))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            KeyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Converts a group key component into the fact placed in the group's out tuple.
    /// Primitive keys become primitive facts; fact keys hand back the original fact.
    pub fn into_fact(self) -> Rc<dyn Fact> {
        match self {
            KeyValue::Int(v) => Rc::new(v),
            KeyValue::UInt(v) => Rc::new(v),
            KeyValue::Bool(v) => Rc::new(v),
            KeyValue::Text(v) => Rc::new(v.to_string()),
            KeyValue::Fact(f) => f.0,
            KeyValue::Null => Rc::new(KeyValue::Null),
        }
    }
}

impl Fact for KeyValue {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_fact(&self, other: &dyn Fact) -> bool {
        other.as_any().downcast_ref::<KeyValue>().map_or(false, |o| o == self)
    }
}

macro_rules! key_value_from_int {
    ($($t:ty),+) => {
        $(
            impl From<$t> for KeyValue {
                fn from(value: $t) -> Self {
                    KeyValue::Int(value as i64)
                }
            }
        )+
    };
}

key_value_from_int!(i8, i16, i32, i64, u8, u16, u32, isize);

macro_rules! key_value_from_wide_uint {
    ($($t:ty),+) => {
        $(
            impl From<$t> for KeyValue {
                fn from(value: $t) -> Self {
                    match i64::try_from(value) {
                        Ok(v) => KeyValue::Int(v),
                        Err(_) => KeyValue::UInt(value as u64),
                    }
                }
            }
        )+
    };
}

key_value_from_wide_uint!(u64, usize);

impl From<bool> for KeyValue {
    fn from(value: bool) -> Self {
        KeyValue::Bool(value)
    }
}

impl From<char> for KeyValue {
    fn from(value: char) -> Self {
        KeyValue::Text(Rc::from(value.to_string()))
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::Text(Rc::from(value))
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        KeyValue::Text(Rc::from(value))
    }
}

impl From<Rc<str>> for KeyValue {
    fn from(value: Rc<str>) -> Self {
        KeyValue::Text(value)
    }
}

impl From<FactRef> for KeyValue {
    fn from(value: FactRef) -> Self {
        KeyValue::Fact(value)
    }
}

impl From<Rc<dyn Fact>> for KeyValue {
    fn from(value: Rc<dyn Fact>) -> Self {
        KeyValue::Fact(FactRef::new(value))
    }
}

impl<T: Into<KeyValue>> From<Option<T>> for KeyValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(KeyValue::Null, Into::into)
    }
}

/// Composite key over 0, 1, 2, 3 or N columns.
///
/// The small variants keep their columns inline; only `Many` allocates.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum IndexKey {
    None,
    One(KeyValue),
    Two(KeyValue, KeyValue),
    Three(KeyValue, KeyValue, KeyValue),
    Many(Box<[KeyValue]>),
}

impl IndexKey {
    pub fn from_values(values: SmallVec<[KeyValue; 4]>) -> Self {
        let mut it = values.into_iter();
        match it.len() {
            0 => IndexKey::None,
            1 => it.next().map_or(IndexKey::None, IndexKey::One),
            2 => match (it.next(), it.next()) {
                (Some(a), Some(b)) => IndexKey::Two(a, b),
                _ => IndexKey::None,
            },
            3 => match (it.next(), it.next(), it.next()) {
                (Some(a), Some(b), Some(c)) => IndexKey::Three(a, b, c),
                _ => IndexKey::None,
            },
            _ => IndexKey::Many(it.collect::<Vec<_>>().into_boxed_slice()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            IndexKey::None => 0,
            IndexKey::One(_) => 1,
            IndexKey::Two(..) => 2,
            IndexKey::Three(..) => 3,
            IndexKey::Many(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, column: usize) -> Option<&KeyValue> {
        match (self, column) {
            (IndexKey::One(a), 0) => Some(a),
            (IndexKey::Two(a, _), 0) => Some(a),
            (IndexKey::Two(_, b), 1) => Some(b),
            (IndexKey::Three(a, _, _), 0) => Some(a),
            (IndexKey::Three(_, b, _), 1) => Some(b),
            (IndexKey::Three(_, _, c), 2) => Some(c),
            (IndexKey::Many(values), i) => values.get(i),
            _ => None,
        }
    }

    pub fn into_values(self) -> SmallVec<[KeyValue; 4]> {
        match self {
            IndexKey::None => SmallVec::new(),
            IndexKey::One(a) => smallvec::smallvec![a],
            IndexKey::Two(a, b) => smallvec::smallvec![a, b],
            IndexKey::Three(a, b, c) => smallvec::smallvec![a, b, c],
            IndexKey::Many(values) => values.into_vec().into_iter().collect(),
        }
    }
}

/// Ordered key functions producing an [`IndexKey`] from a tuple.
#[derive(Clone, Default)]
pub struct KeyExtractor {
    columns: Vec<KeyFn>,
}

impl KeyExtractor {
    pub fn new(columns: Vec<KeyFn>) -> Self {
        Self { columns }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn extract(&self, tuple: &AnyTuple) -> IndexKey {
        match self.columns.as_slice() {
            [] => IndexKey::None,
            [a] => IndexKey::One(a(tuple)),
            [a, b] => IndexKey::Two(a(tuple), b(tuple)),
            [a, b, c] => IndexKey::Three(a(tuple), b(tuple), c(tuple)),
            many => IndexKey::Many(many.iter().map(|f| f(tuple)).collect()),
        }
    }
}

impl std::fmt::Debug for KeyExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyExtractor")
            .field("columns", &self.columns.len())
            .finish()
    }
}
