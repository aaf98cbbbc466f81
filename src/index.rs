//index.rs
//! Buckets of live entries keyed by their equality-join columns.
//!
//! Each bucket is a dense slot map, so an entry is removed in O(1) through the handle
//! returned by `put`, which the owning node keeps in the tuple's store slot.

use crate::key::IndexKey;
use crate::{Result, ScorenetError};
use rustc_hash::FxHashMap as HashMap;
use slotmap::{new_key_type, DenseSlotMap};

new_key_type! {
    pub struct EntryKey;
}

type Bucket<T> = DenseSlotMap<EntryKey, T>;

/// Handle to one indexed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    key: IndexKey,
    entry: EntryKey,
}

impl IndexEntry {
    pub fn key(&self) -> &IndexKey {
        &self.key
    }
}

#[derive(Debug)]
pub enum Indexer<T: Copy> {
    /// No equality columns: every entry shares the single bucket.
    Unindexed(Bucket<T>),
    Equal {
        buckets: HashMap<IndexKey, Bucket<T>>,
        columns: usize,
        len: usize,
    },
}

impl<T: Copy> Indexer<T> {
    /// Picks the representation from the number of equality columns.
    pub fn for_columns(columns: usize) -> Self {
        if columns == 0 {
            Indexer::Unindexed(Bucket::with_key())
        } else {
            Indexer::Equal {
                buckets: HashMap::default(),
                columns,
                len: 0,
            }
        }
    }

    pub fn columns(&self) -> usize {
        match self {
            Indexer::Unindexed(_) => 0,
            Indexer::Equal { columns, .. } => *columns,
        }
    }

    pub fn put(&mut self, key: IndexKey, value: T) -> IndexEntry {
        match self {
            Indexer::Unindexed(bucket) => IndexEntry {
                entry: bucket.insert(value),
                key: IndexKey::None,
            },
            Indexer::Equal { buckets, len, .. } => {
                *len += 1;
                let entry = buckets
                    .entry(key.clone())
                    .or_insert_with(Bucket::with_key)
                    .insert(value);
                IndexEntry { key, entry }
            }
        }
    }

    /// Removes the entry behind a handle. A missing entry is an index miss.
    pub fn remove(&mut self, handle: &IndexEntry) -> Result<T> {
        let removed = match self {
            Indexer::Unindexed(bucket) => bucket.remove(handle.entry),
            Indexer::Equal { buckets, len, .. } => {
                let mut removed = None;
                if let Some(bucket) = buckets.get_mut(&handle.key) {
                    removed = bucket.remove(handle.entry);
                    if bucket.is_empty() {
                        buckets.remove(&handle.key);
                    }
                }
                if removed.is_some() {
                    *len -= 1;
                }
                removed
            }
        };
        removed.ok_or_else(|| {
            ScorenetError::invariant(
                "indexer",
                format!("no entry {:?} under key {:?}", handle.entry, handle.key),
            )
        })
    }

    /// Entries whose key equals `key`, lazily.
    pub fn elements_sharing_key<'a>(&'a self, key: &IndexKey) -> impl Iterator<Item = T> + 'a {
        let bucket = match self {
            Indexer::Unindexed(bucket) => Some(bucket),
            Indexer::Equal { buckets, .. } => buckets.get(key),
        };
        bucket.into_iter().flat_map(|b| b.values().copied())
    }

    pub fn size(&self, key: &IndexKey) -> usize {
        match self {
            Indexer::Unindexed(bucket) => bucket.len(),
            Indexer::Equal { buckets, .. } => buckets.get(key).map_or(0, |b| b.len()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Indexer::Unindexed(bucket) => bucket.len(),
            Indexer::Equal { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct keys currently present.
    pub fn key_count(&self) -> usize {
        match self {
            Indexer::Unindexed(bucket) => usize::from(!bucket.is_empty()),
            Indexer::Equal { buckets, .. } => buckets.len(),
        }
    }

    pub fn clear(&mut self) {
        match self {
            Indexer::Unindexed(bucket) => bucket.clear(),
            Indexer::Equal { buckets, len, .. } => {
                buckets.clear();
                *len = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyValue;

    fn key(v: i64) -> IndexKey {
        IndexKey::One(KeyValue::Int(v))
    }

    #[test]
    fn test_put_and_lookup() {
        let mut index: Indexer<u32> = Indexer::for_columns(1);
        index.put(key(1), 10);
        index.put(key(1), 11);
        index.put(key(2), 20);

        let mut ones: Vec<u32> = index.elements_sharing_key(&key(1)).collect();
        ones.sort();
        assert_eq!(ones, vec![10, 11]);
        assert_eq!(index.size(&key(2)), 1);
        assert_eq!(index.size(&key(3)), 0);
        assert_eq!(index.len(), 3);
        assert_eq!(index.key_count(), 2);
    }

    #[test]
    fn test_remove_by_handle() {
        let mut index: Indexer<u32> = Indexer::for_columns(1);
        let a = index.put(key(1), 10);
        let b = index.put(key(1), 11);
        assert_eq!(index.remove(&a).unwrap(), 10);
        assert_eq!(index.elements_sharing_key(&key(1)).collect::<Vec<_>>(), vec![11]);
        assert_eq!(index.remove(&b).unwrap(), 11);
        assert_eq!(index.key_count(), 0);
        assert!(index.is_empty());
    }

    #[test]
    fn test_double_remove_is_an_index_miss() {
        let mut index: Indexer<u32> = Indexer::for_columns(2);
        let handle = index.put(IndexKey::Two(KeyValue::Int(1), KeyValue::from("x")), 1);
        index.remove(&handle).unwrap();
        let err = index.remove(&handle).unwrap_err();
        assert!(matches!(err, ScorenetError::Invariant { .. }));
    }

    #[test]
    fn test_zero_columns_share_one_bucket() {
        let mut index: Indexer<u32> = Indexer::for_columns(0);
        index.put(key(1), 1);
        index.put(key(2), 2);
        assert_eq!(index.columns(), 0);
        assert_eq!(index.elements_sharing_key(&IndexKey::None).count(), 2);
        assert_eq!(index.elements_sharing_key(&key(7)).count(), 2);
    }

    #[test]
    fn test_many_column_keys() {
        let mut index: Indexer<u32> = Indexer::for_columns(4);
        let wide = |n: i64| {
            IndexKey::Many(vec![KeyValue::Int(n); 4].into_boxed_slice())
        };
        index.put(wide(1), 1);
        index.put(wide(2), 2);
        assert_eq!(index.elements_sharing_key(&wide(1)).collect::<Vec<_>>(), vec![1]);
    }
}
