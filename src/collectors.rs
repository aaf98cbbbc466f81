// collectors.rs

use crate::fact::Fact;
use crate::key::KeyValue;
use crate::tuple::AnyTuple;
use rustc_hash::FxHashMap as HashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Token returned by `accumulate` that lets the collector reverse that exact step.
/// Its meaning is private to each collector: an encoded value or an insertion id.
pub type Receipt = u64;

/// Incremental aggregate with an exact undo.
///
/// `undo` never looks at the tuple again: by the time a member is retracted its facts may
/// already hold new values, so everything needed to reverse the step lives in the receipt
/// or in the collector itself.
pub trait Collector: fmt::Debug {
    /// Adds a tuple and returns a receipt for undoing the operation.
    fn accumulate(&mut self, tuple: &AnyTuple) -> Receipt;

    /// Reverses a previous `accumulate`. Returns false for a receipt this collector never
    /// issued or already took back; the collector is left unchanged then.
    fn undo(&mut self, receipt: Receipt) -> bool;

    /// The current aggregate as a fact.
    fn finish(&self) -> Rc<dyn Fact>;

    fn is_empty(&self) -> bool;
}

/// Creates a fresh collector for every new group.
pub type CollectorSupplier = Rc<dyn Fn() -> Box<dyn Collector>>;

type ValueFn<T> = Rc<dyn Fn(&AnyTuple) -> T>;

#[derive(Default, Debug)]
pub struct CountCollector {
    count: usize,
}

impl Collector for CountCollector {
    #[inline]
    fn accumulate(&mut self, _tuple: &AnyTuple) -> Receipt {
        self.count += 1;
        0
    }

    #[inline]
    fn undo(&mut self, _receipt: Receipt) -> bool {
        if self.count == 0 {
            return false;
        }
        self.count -= 1;
        true
    }

    fn finish(&self) -> Rc<dyn Fact> {
        Rc::new(self.count)
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }
}

pub struct SumCollector {
    mapping_function: ValueFn<i64>,
    total: i64,
    count: usize,
}

impl fmt::Debug for SumCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SumCollector")
            .field("mapping_function", &"<closure>")
            .field("total", &self.total)
            .field("count", &self.count)
            .finish()
    }
}

impl Collector for SumCollector {
    #[inline]
    fn accumulate(&mut self, tuple: &AnyTuple) -> Receipt {
        let value = (self.mapping_function)(tuple);
        self.total += value;
        self.count += 1;
        // The receipt carries the added value.
        value as u64
    }

    #[inline]
    fn undo(&mut self, receipt: Receipt) -> bool {
        if self.count == 0 {
            return false;
        }
        self.total -= receipt as i64;
        self.count -= 1;
        true
    }

    fn finish(&self) -> Rc<dyn Fact> {
        Rc::new(self.total)
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }
}

pub struct AverageCollector {
    mapping_function: ValueFn<i64>,
    total: i64,
    count: usize,
}

impl fmt::Debug for AverageCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AverageCollector")
            .field("mapping_function", &"<closure>")
            .field("total", &self.total)
            .field("count", &self.count)
            .finish()
    }
}

impl Collector for AverageCollector {
    fn accumulate(&mut self, tuple: &AnyTuple) -> Receipt {
        let value = (self.mapping_function)(tuple);
        self.total += value;
        self.count += 1;
        value as u64
    }

    fn undo(&mut self, receipt: Receipt) -> bool {
        if self.count == 0 {
            return false;
        }
        self.total -= receipt as i64;
        self.count -= 1;
        true
    }

    fn finish(&self) -> Rc<dyn Fact> {
        if self.count == 0 {
            Rc::new(0.0f64)
        } else {
            Rc::new(self.total as f64 / self.count as f64)
        }
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extreme {
    Min,
    Max,
}

/// Min or max over a key, kept as a multiset so removals are exact.
pub struct ExtremeCollector {
    mapping_function: ValueFn<KeyValue>,
    extreme: Extreme,
    counts: BTreeMap<KeyValue, usize>,
    by_receipt: HashMap<Receipt, KeyValue>,
    next_receipt: Receipt,
}

impl ExtremeCollector {
    fn new(mapping_function: ValueFn<KeyValue>, extreme: Extreme) -> Self {
        Self {
            mapping_function,
            extreme,
            counts: BTreeMap::new(),
            by_receipt: HashMap::default(),
            next_receipt: 0,
        }
    }
}

impl fmt::Debug for ExtremeCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtremeCollector")
            .field("mapping_function", &"<closure>")
            .field("extreme", &self.extreme)
            .field("counts", &self.counts)
            .finish()
    }
}

impl Collector for ExtremeCollector {
    fn accumulate(&mut self, tuple: &AnyTuple) -> Receipt {
        let key = (self.mapping_function)(tuple);
        *self.counts.entry(key.clone()).or_insert(0) += 1;
        let receipt = self.next_receipt;
        self.next_receipt = self.next_receipt.wrapping_add(1);
        self.by_receipt.insert(receipt, key);
        receipt
    }

    fn undo(&mut self, receipt: Receipt) -> bool {
        let Some(key) = self.by_receipt.remove(&receipt) else {
            return false;
        };
        match self.counts.get_mut(&key) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.counts.remove(&key);
            }
            None => return false,
        }
        true
    }

    fn finish(&self) -> Rc<dyn Fact> {
        let key = match self.extreme {
            Extreme::Min => self.counts.keys().next(),
            Extreme::Max => self.counts.keys().next_back(),
        };
        key.cloned().unwrap_or(KeyValue::Null).into_fact()
    }

    fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Number of distinct keys among the members.
pub struct CountDistinctCollector {
    mapping_function: ValueFn<KeyValue>,
    counts: HashMap<KeyValue, usize>,
    by_receipt: HashMap<Receipt, KeyValue>,
    next_receipt: Receipt,
}

impl fmt::Debug for CountDistinctCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountDistinctCollector")
            .field("mapping_function", &"<closure>")
            .field("distinct", &self.counts.len())
            .finish()
    }
}

impl Collector for CountDistinctCollector {
    fn accumulate(&mut self, tuple: &AnyTuple) -> Receipt {
        let key = (self.mapping_function)(tuple);
        *self.counts.entry(key.clone()).or_insert(0) += 1;
        let receipt = self.next_receipt;
        self.next_receipt = self.next_receipt.wrapping_add(1);
        self.by_receipt.insert(receipt, key);
        receipt
    }

    fn undo(&mut self, receipt: Receipt) -> bool {
        let Some(key) = self.by_receipt.remove(&receipt) else {
            return false;
        };
        match self.counts.get_mut(&key) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.counts.remove(&key);
            }
            None => return false,
        }
        true
    }

    fn finish(&self) -> Rc<dyn Fact> {
        Rc::new(self.counts.len())
    }

    fn is_empty(&self) -> bool {
        self.by_receipt.is_empty()
    }
}

/// Facts picked from the members, in insertion order.
pub struct ListCollector {
    mapping_function: ValueFn<Rc<dyn Fact>>,
    items: BTreeMap<Receipt, Rc<dyn Fact>>,
    next_receipt: Receipt,
}

impl fmt::Debug for ListCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListCollector")
            .field("mapping_function", &"<closure>")
            .field("items", &self.items.len())
            .finish()
    }
}

impl Collector for ListCollector {
    fn accumulate(&mut self, tuple: &AnyTuple) -> Receipt {
        let receipt = self.next_receipt;
        self.next_receipt = self.next_receipt.wrapping_add(1);
        self.items.insert(receipt, (self.mapping_function)(tuple));
        receipt
    }

    fn undo(&mut self, receipt: Receipt) -> bool {
        self.items.remove(&receipt).is_some()
    }

    fn finish(&self) -> Rc<dyn Fact> {
        let list: Vec<Rc<dyn Fact>> = self.items.values().cloned().collect();
        Rc::new(list)
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Factory for creating collector suppliers
pub struct Collectors;

impl Collectors {
    pub fn count() -> CollectorSupplier {
        Rc::new(|| Box::new(CountCollector::default()))
    }

    pub fn count_distinct<F, K>(mapping_function: F) -> CollectorSupplier
    where
        F: Fn(&AnyTuple) -> K + 'static,
        K: Into<KeyValue>,
    {
        let mapping: ValueFn<KeyValue> = Rc::new(move |t: &AnyTuple| mapping_function(t).into());
        Rc::new(move || {
            Box::new(CountDistinctCollector {
                mapping_function: Rc::clone(&mapping),
                counts: HashMap::default(),
                by_receipt: HashMap::default(),
                next_receipt: 0,
            })
        })
    }

    pub fn sum<F>(mapping_function: F) -> CollectorSupplier
    where
        F: Fn(&AnyTuple) -> i64 + 'static,
    {
        let mapping: ValueFn<i64> = Rc::new(mapping_function);
        Rc::new(move || {
            Box::new(SumCollector {
                mapping_function: Rc::clone(&mapping),
                total: 0,
                count: 0,
            })
        })
    }

    pub fn average<F>(mapping_function: F) -> CollectorSupplier
    where
        F: Fn(&AnyTuple) -> i64 + 'static,
    {
        let mapping: ValueFn<i64> = Rc::new(mapping_function);
        Rc::new(move || {
            Box::new(AverageCollector {
                mapping_function: Rc::clone(&mapping),
                total: 0,
                count: 0,
            })
        })
    }

    pub fn min<F, K>(mapping_function: F) -> CollectorSupplier
    where
        F: Fn(&AnyTuple) -> K + 'static,
        K: Into<KeyValue>,
    {
        Self::extreme(mapping_function, Extreme::Min)
    }

    pub fn max<F, K>(mapping_function: F) -> CollectorSupplier
    where
        F: Fn(&AnyTuple) -> K + 'static,
        K: Into<KeyValue>,
    {
        Self::extreme(mapping_function, Extreme::Max)
    }

    fn extreme<F, K>(mapping_function: F, extreme: Extreme) -> CollectorSupplier
    where
        F: Fn(&AnyTuple) -> K + 'static,
        K: Into<KeyValue>,
    {
        let mapping: ValueFn<KeyValue> = Rc::new(move |t: &AnyTuple| mapping_function(t).into());
        Rc::new(move || Box::new(ExtremeCollector::new(Rc::clone(&mapping), extreme)))
    }

    /// Collects the first fact of every member.
    pub fn to_list() -> CollectorSupplier {
        Self::to_list_of(|t: &AnyTuple| -> Rc<dyn Fact> {
            match t.fact(0) {
                Some(fact) => Rc::clone(fact),
                None => Rc::new(KeyValue::Null),
            }
        })
    }

    pub fn to_list_of<F>(mapping_function: F) -> CollectorSupplier
    where
        F: Fn(&AnyTuple) -> Rc<dyn Fact> + 'static,
    {
        let mapping: ValueFn<Rc<dyn Fact>> = Rc::new(mapping_function);
        Rc::new(move || {
            Box::new(ListCollector {
                mapping_function: Rc::clone(&mapping),
                items: BTreeMap::new(),
                next_receipt: 0,
            })
        })
    }

    /// Wraps a user collector type.
    pub fn custom<F>(supplier: F) -> CollectorSupplier
    where
        F: Fn() -> Box<dyn Collector> + 'static,
    {
        Rc::new(supplier)
    }
}
