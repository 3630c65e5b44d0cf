use crate::file_id::NeedleKey;
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

/// Entries one section holds before new keys spill into its overflow map
pub(crate) const SECTION_SIZE: usize = 100_000;

/// Location of one needle inside a volume's data file
///
/// `offset` is the byte offset divided by 8 (records are 8-byte
/// aligned, which extends the addressable range to 32 GiB). A `size` of
/// 0 marks a tombstone.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NeedleValue {
    /// Needle key
    pub key: NeedleKey,

    /// Byte offset into the data file, divided by 8
    pub offset: u32,

    /// Total payload size of the needle
    pub size: u32,
}

struct SectionState {
    /// Strictly increasing keys, in insertion order
    values: Vec<NeedleValue>,

    /// Keys inserted out of order or after `values` filled up
    overflow: HashMap<NeedleKey, NeedleValue>,

    /// Largest key ever inserted
    end: NeedleKey,
}

/// One fixed-capacity slice of the keyspace
///
/// Keys that arrive in increasing order land in the sorted `values`
/// array; anything else spills into the overflow map. Lookups check the
/// overflow map first, then binary-search `values`.
pub(crate) struct CompactSection {
    /// Smallest key ever inserted, fixed at creation
    start: NeedleKey,

    state: RwLock<SectionState>,
}

impl CompactSection {
    fn new(start: NeedleKey) -> Self {
        Self {
            start,
            state: RwLock::new(SectionState {
                values: Vec::with_capacity(SECTION_SIZE),
                overflow: HashMap::new(),
                end: 0,
            }),
        }
    }

    fn len(&self) -> usize {
        self.state.read().expect("lock is poisoned").values.len()
    }

    fn end(&self) -> NeedleKey {
        self.state.read().expect("lock is poisoned").end
    }

    /// Returns the previous size of the entry, or 0.
    fn set(&self, key: NeedleKey, offset: u32, size: u32) -> u32 {
        let mut state = self.state.write().expect("lock is poisoned");
        if key > state.end {
            state.end = key;
        }

        if let Ok(i) = state.values.binary_search_by_key(&key, |v| v.key) {
            let old = state.values[i].size;
            state.values[i].offset = offset;
            state.values[i].size = size;
            return old;
        }

        let needs_overflow = state.values.len() >= SECTION_SIZE
            || state.values.last().is_some_and(|last| last.key > key);

        if needs_overflow {
            let old = state.overflow.get(&key).map_or(0, |v| v.size);
            state.overflow.insert(key, NeedleValue { key, offset, size });
            old
        } else {
            state.values.push(NeedleValue { key, offset, size });
            0
        }
    }

    /// Tombstones the entry and returns its previous size, or 0.
    fn delete(&self, key: NeedleKey) -> u32 {
        let mut state = self.state.write().expect("lock is poisoned");
        let mut ret = 0;

        if let Ok(i) = state.values.binary_search_by_key(&key, |v| v.key) {
            if state.values[i].size > 0 {
                ret = state.values[i].size;
                // Keep the slot so the binary search invariant holds
                state.values[i].size = 0;
            }
        }
        if let Some(v) = state.overflow.remove(&key) {
            ret = v.size;
        }
        ret
    }

    fn get(&self, key: NeedleKey) -> Option<NeedleValue> {
        let state = self.state.read().expect("lock is poisoned");
        if let Some(v) = state.overflow.get(&key) {
            return Some(*v);
        }
        state
            .values
            .binary_search_by_key(&key, |v| v.key)
            .ok()
            .map(|i| state.values[i])
    }
}

/// Memory-efficient map from needle key to `(offset, size)`
///
/// Assumes mostly increasing keys, which is what the sequencer hands
/// out: the common insert appends to the tail of the newest section.
/// Replayed or out-of-order keys are absorbed by per-section overflow
/// maps.
pub struct CompactMap {
    /// Sections ordered by their start key
    list: RwLock<Vec<Arc<CompactSection>>>,
}

impl Default for CompactMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CompactMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            list: RwLock::new(Vec::new()),
        }
    }

    /// Inserts or overwrites an entry, returning the previous size or 0.
    pub fn set(&self, key: NeedleKey, offset: u32, size: u32) -> u32 {
        if let Some(section) = self.find_section(key) {
            return section.set(key, offset, size);
        }

        let section = {
            let mut list = self.list.write().expect("lock is poisoned");
            // A racing writer may have created a matching section already
            if let Some(i) = Self::search(&list, key) {
                list[i].clone()
            } else {
                let section = Arc::new(CompactSection::new(key));
                let at = list.partition_point(|s| s.start < key);
                list.insert(at, section.clone());
                section
            }
        };
        section.set(key, offset, size)
    }

    /// Tombstones an entry, returning the previous size or 0.
    pub fn delete(&self, key: NeedleKey) -> u32 {
        self.find_section(key).map_or(0, |s| s.delete(key))
    }

    /// Looks up an entry. Tombstoned entries are returned with `size == 0`.
    #[must_use]
    pub fn get(&self, key: NeedleKey) -> Option<NeedleValue> {
        self.find_section(key).and_then(|s| s.get(key))
    }

    /// Calls `f` for every live (non-tombstoned) entry exactly once,
    /// stopping at the first error.
    ///
    /// # Errors
    ///
    /// Will return the first `Err` produced by `f`.
    pub fn visit<F>(&self, mut f: F) -> crate::Result<()>
    where
        F: FnMut(NeedleValue) -> crate::Result<()>,
    {
        let sections = self.list.read().expect("lock is poisoned").clone();
        for section in sections {
            let state = section.state.read().expect("lock is poisoned");
            for v in state.overflow.values() {
                if v.size > 0 {
                    f(*v)?;
                }
            }
            for v in &state.values {
                if v.size > 0 && !state.overflow.contains_key(&v.key) {
                    f(*v)?;
                }
            }
        }
        Ok(())
    }

    fn find_section(&self, key: NeedleKey) -> Option<Arc<CompactSection>> {
        let list = self.list.read().expect("lock is poisoned");
        Self::search(&list, key).map(|i| list[i].clone())
    }

    /// Finds the section responsible for `key`, or `None` if a new
    /// section has to be created.
    fn search(list: &[Arc<CompactSection>], key: NeedleKey) -> Option<usize> {
        let last = list.len().checked_sub(1)?;
        if list[last].start <= key {
            // The newest section takes any key in range, or any key at
            // all while it still has array capacity
            if list[last].len() < SECTION_SIZE || key <= list[last].end() {
                return Some(last);
            }
            return None;
        }
        match list.partition_point(|s| s.start <= key) {
            0 => None,
            at => Some(at - 1),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use test_log::test;

    #[test]
    fn out_of_order_insert_lands_in_overflow() {
        let m = CompactMap::new();
        assert_eq!(0, m.set(5, 5, 50));
        assert_eq!(0, m.set(10, 10, 100));
        assert_eq!(0, m.set(7, 7, 70));

        assert_eq!(
            Some(NeedleValue {
                key: 7,
                offset: 7,
                size: 70
            }),
            m.get(7)
        );

        let list = m.list.read().unwrap();
        assert_eq!(1, list.len());
        let state = list[0].state.read().unwrap();
        assert!(state.overflow.contains_key(&7));
        assert_eq!(
            vec![5, 10],
            state.values.iter().map(|v| v.key).collect::<Vec<_>>()
        );
    }

    #[test]
    fn set_returns_old_size() {
        let m = CompactMap::new();
        assert_eq!(0, m.set(1, 1, 10));
        assert_eq!(10, m.set(1, 2, 20));
        assert_eq!(20, m.set(1, 3, 30));

        // Out-of-order keys overwrite through the overflow map
        m.set(9, 9, 90);
        m.set(4, 4, 40);
        assert_eq!(40, m.set(4, 5, 50));
    }

    #[test]
    fn delete_tombstones_and_reports_size() {
        let m = CompactMap::new();
        m.set(1, 1, 10);
        m.set(2, 2, 20);
        assert_eq!(20, m.delete(2));
        assert_eq!(0, m.delete(2));
        assert_eq!(0, m.delete(42));

        // The slot is kept for the binary search but reads as a tombstone
        assert_eq!(
            Some(NeedleValue {
                key: 2,
                offset: 2,
                size: 0
            }),
            m.get(2)
        );
    }

    #[test]
    fn keys_below_all_sections_open_a_new_section() {
        let m = CompactMap::new();
        m.set(100, 1, 10);
        m.set(3, 2, 20);

        assert_eq!(Some(20), m.get(3).map(|v| v.size));
        assert_eq!(Some(10), m.get(100).map(|v| v.size));

        let list = m.list.read().unwrap();
        assert_eq!(2, list.len());
        assert!(list[0].start < list[1].start);
    }

    #[test]
    fn visit_sees_live_entries_exactly_once() -> crate::Result<()> {
        let m = CompactMap::new();
        for key in [5, 10, 7, 20, 15] {
            m.set(key, 1, 10);
        }
        m.delete(10);

        let mut seen = Vec::new();
        m.visit(|v| {
            seen.push(v.key);
            Ok(())
        })?;
        seen.sort_unstable();
        assert_eq!(vec![5, 7, 15, 20], seen);
        Ok(())
    }

    #[test]
    fn visit_stops_on_error() {
        let m = CompactMap::new();
        for key in 1..=10 {
            m.set(key, 1, 10);
        }

        let mut calls = 0;
        let result = m.visit(|_| {
            calls += 1;
            Err(crate::Error::NotFound)
        });
        assert!(result.is_err());
        assert_eq!(1, calls);
    }

    #[test]
    fn monotonic_inserts_fill_values_array() {
        let m = CompactMap::new();
        for key in 1..=1_000u64 {
            // NOTE: Truncation is fine, keys are small here
            #[allow(clippy::cast_possible_truncation)]
            m.set(key, key as u32, 8);
        }
        for key in 1..=1_000u64 {
            let v = m.get(key).unwrap();
            assert_eq!(key, u64::from(v.offset));
        }
        let list = m.list.read().unwrap();
        assert_eq!(1, list.len());
        assert!(list[0].state.read().unwrap().overflow.is_empty());
    }
}
