//! Robin-Hood open-addressing hashtable.
//!
//! Keys are hashed to 64 bits (FNV-1a for strings, a splitmix64 finalizer on
//! top of every hash) and the initial slot is selected with a power-of-two
//! mask. Insertion uses Robin-Hood linear probing: an incoming entry that is
//! farther from its ideal slot than the resident evicts it, and the evicted
//! entry continues probing. Lookups stop as soon as they meet a slot whose
//! displacement is smaller than their own probe distance.
//!
//! Deletion leaves a tombstone that remembers the displacement of the entry
//! it replaced. Tombstones count toward the load factor and are dropped when
//! the table is rebuilt.
//!
//! This table backs the symbol table and every environment frame.

use std::borrow::Borrow;
use std::fmt;
use std::mem;
use std::rc::Rc;

use tracing::trace;

const FNV_OFFSET_BASIS: u64 = 1469598103934665603;
const FNV_PRIME: u64 = 1099511628211;

/// Smallest capacity a non-empty table is allocated with
pub const MIN_CAPACITY: usize = 8;

/// Maximum (occupied + tombstones) / capacity, in percent
pub const MAX_LOAD_PERCENT: usize = 80;

/// splitmix64 finalizer, used to avalanche every key hash
pub fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9e3779b97f4a7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

/// FNV-1a over the bytes, then finalized
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    splitmix64(hash)
}

/// Keys usable in a [`HashTable`].
///
/// Borrowed and owned forms of the same key must produce the same hash,
/// e.g. `str` and `Rc<str>`.
pub trait HashKey {
    fn hash_key(&self) -> u64;
}

impl HashKey for str {
    fn hash_key(&self) -> u64 {
        hash_bytes(self.as_bytes())
    }
}

impl HashKey for String {
    fn hash_key(&self) -> u64 {
        self.as_str().hash_key()
    }
}

impl HashKey for Rc<str> {
    fn hash_key(&self) -> u64 {
        (**self).hash_key()
    }
}

impl HashKey for u64 {
    fn hash_key(&self) -> u64 {
        splitmix64(*self)
    }
}

impl HashKey for u32 {
    fn hash_key(&self) -> u64 {
        splitmix64(u64::from(*self))
    }
}

/// Raised when the slot array cannot be allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError {
    pub requested_slots: usize,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hashtable could not allocate {} slots",
            self.requested_slots
        )
    }
}

impl std::error::Error for AllocError {}

impl From<AllocError> for crate::Error {
    fn from(err: AllocError) -> Self {
        crate::Error::AllocationFailure(err.to_string())
    }
}

#[derive(Debug, Clone)]
struct Entry<K, V> {
    key: K,
    value: V,
    hash: u64,
    /// Distance from the ideal slot, starting at 1
    dib: u32,
}

#[derive(Debug, Clone)]
enum Slot<K, V> {
    Empty,
    /// Deleted entry; keeps the displacement it had so lookups can still stop early
    Tombstone { dib: u32 },
    Occupied(Entry<K, V>),
}

/// Open-addressing map with Robin-Hood displacement.
#[derive(Clone)]
pub struct HashTable<K, V> {
    slots: Vec<Slot<K, V>>,
    size: usize,
    tombstones: usize,
}

impl<K, V> Default for HashTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> HashTable<K, V> {
    /// Create an empty table. No slots are allocated until the first insertion.
    pub fn new() -> Self {
        HashTable {
            slots: Vec::new(),
            size: 0,
            tombstones: 0,
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    /// Iterate over every live (key, value) pair exactly once, in slot order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            slots: self.slots.iter(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(key, _)| key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, value)| value)
    }
}

impl<K: HashKey + Eq, V> HashTable<K, V> {
    /// Create a table able to hold at least `capacity` slots, rounded up to a power of two.
    pub fn with_capacity(capacity: usize) -> Result<Self, AllocError> {
        let mut table = Self::new();
        table.rebuild(normalize_capacity(capacity))?;
        Ok(table)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: HashKey + Eq + ?Sized,
    {
        let index = self.find_index(key, key.hash_key())?;
        match &self.slots[index] {
            Slot::Occupied(entry) => Some(&entry.value),
            _ => None,
        }
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: HashKey + Eq + ?Sized,
    {
        let index = self.find_index(key, key.hash_key())?;
        match &mut self.slots[index] {
            Slot::Occupied(entry) => Some(&mut entry.value),
            _ => None,
        }
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: HashKey + Eq + ?Sized,
    {
        self.find_index(key, key.hash_key()).is_some()
    }

    /// Insert or overwrite. Returns the previous value when the key was present;
    /// overwriting never changes [`HashTable::len`].
    pub fn set(&mut self, key: K, value: V) -> Result<Option<V>, AllocError> {
        let hash = key.hash_key();
        if let Some(index) = self.find_index(&key, hash)
            && let Slot::Occupied(entry) = &mut self.slots[index]
        {
            return Ok(Some(mem::replace(&mut entry.value, value)));
        }

        self.reserve_one()?;
        self.insert_fresh(Entry {
            key,
            value,
            hash,
            dib: 1,
        });
        self.size += 1;
        Ok(None)
    }

    /// Remove a key, leaving a tombstone in its slot.
    pub fn erase<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: HashKey + Eq + ?Sized,
    {
        let index = self.find_index(key, key.hash_key())?;
        match mem::replace(&mut self.slots[index], Slot::Empty) {
            Slot::Occupied(entry) => {
                self.slots[index] = Slot::Tombstone { dib: entry.dib };
                self.size -= 1;
                self.tombstones += 1;
                Some(entry.value)
            }
            other => {
                self.slots[index] = other;
                None
            }
        }
    }

    fn find_index<Q>(&self, key: &Q, hash: u64) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: HashKey + Eq + ?Sized,
    {
        if self.slots.is_empty() {
            return None;
        }
        let mask = self.slots.len() - 1;
        let mut index = (hash as usize) & mask;
        let mut distance = 1u32;

        loop {
            match &self.slots[index] {
                Slot::Empty => return None,
                Slot::Tombstone { dib } => {
                    if *dib < distance {
                        return None;
                    }
                }
                Slot::Occupied(entry) => {
                    if entry.dib < distance {
                        return None;
                    }
                    if entry.hash == hash && entry.key.borrow() == key {
                        return Some(index);
                    }
                }
            }
            index = (index + 1) & mask;
            distance += 1;
        }
    }

    /// Place an entry whose key is known to be absent.
    fn insert_fresh(&mut self, mut entry: Entry<K, V>) {
        let mask = self.slots.len() - 1;
        let mut index = (entry.hash as usize) & mask;

        loop {
            let slot = &mut self.slots[index];
            match slot {
                Slot::Empty => {
                    *slot = Slot::Occupied(entry);
                    return;
                }
                Slot::Tombstone { dib } => {
                    if *dib <= entry.dib {
                        *slot = Slot::Occupied(entry);
                        self.tombstones -= 1;
                        return;
                    }
                }
                Slot::Occupied(resident) => {
                    if resident.dib < entry.dib {
                        mem::swap(resident, &mut entry);
                    }
                }
            }
            index = (index + 1) & mask;
            entry.dib += 1;
        }
    }

    /// Make room for one more entry while keeping the load factor at or under the limit.
    fn reserve_one(&mut self) -> Result<(), AllocError> {
        let capacity = self.slots.len();
        if capacity == 0 {
            return self.rebuild(MIN_CAPACITY);
        }
        if (self.size + self.tombstones + 1) * 100 <= capacity * MAX_LOAD_PERCENT {
            return Ok(());
        }

        // Mostly tombstones: a rebuild at the same capacity frees enough room.
        let new_capacity = if (self.size + 1) * 100 * 2 <= capacity * MAX_LOAD_PERCENT {
            capacity
        } else {
            capacity.checked_mul(2).ok_or(AllocError {
                requested_slots: usize::MAX,
            })?
        };
        self.rebuild(new_capacity)
    }

    /// Reinsert every live entry into a fresh slot array; tombstones are dropped.
    fn rebuild(&mut self, new_capacity: usize) -> Result<(), AllocError> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(new_capacity)
            .map_err(|_| AllocError {
                requested_slots: new_capacity,
            })?;
        slots.resize_with(new_capacity, || Slot::Empty);

        let old_slots = mem::replace(&mut self.slots, slots);
        let old_capacity = old_slots.len();
        let dropped_tombstones = self.tombstones;
        self.tombstones = 0;

        for slot in old_slots {
            if let Slot::Occupied(mut entry) = slot {
                entry.dib = 1;
                self.insert_fresh(entry);
            }
        }

        trace!(
            old_capacity,
            new_capacity,
            live = self.size,
            dropped_tombstones,
            "hashtable rebuilt"
        );
        Ok(())
    }
}

fn normalize_capacity(requested: usize) -> usize {
    requested
        .max(MIN_CAPACITY)
        .checked_next_power_of_two()
        .unwrap_or(1 << (usize::BITS - 1))
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for HashTable<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Iterator over the live entries of a [`HashTable`].
pub struct Iter<'a, K, V> {
    slots: std::slice::Iter<'a, Slot<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.slots.by_ref().find_map(|slot| match slot {
            Slot::Occupied(entry) => Some((&entry.key, &entry.value)),
            _ => None,
        })
    }
}

impl<'a, K, V> IntoIterator for &'a HashTable<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// Key whose hash is always the same, forcing every entry into one probe run
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Colliding(u32);

    impl HashKey for Colliding {
        fn hash_key(&self) -> u64 {
            7
        }
    }

    impl<K: HashKey + Eq, V> HashTable<K, V> {
        /// Check slot displacements and the load factor bound
        fn assert_invariants(&self) {
            let capacity = self.slots.len();
            if capacity == 0 {
                return;
            }
            assert!(capacity.is_power_of_two());
            assert!((self.size + self.tombstones) * 100 <= capacity * MAX_LOAD_PERCENT);

            let mask = capacity - 1;
            let mut live = 0;
            let mut dead = 0;
            for (index, slot) in self.slots.iter().enumerate() {
                match slot {
                    Slot::Occupied(entry) => {
                        live += 1;
                        let ideal = (entry.hash as usize) & mask;
                        let expected = ((index + capacity - ideal) & mask) + 1;
                        assert_eq!(entry.dib as usize, expected, "wrong displacement");
                        // every slot between the ideal slot and this one is in use
                        let mut probe = ideal;
                        while probe != index {
                            assert!(!matches!(self.slots[probe], Slot::Empty));
                            probe = (probe + 1) & mask;
                        }
                    }
                    Slot::Tombstone { .. } => dead += 1,
                    Slot::Empty => {}
                }
            }
            assert_eq!(live, self.size);
            assert_eq!(dead, self.tombstones);
        }
    }

    #[test]
    fn test_set_get_overwrite() {
        let mut table: HashTable<String, i32> = HashTable::new();
        assert_eq!(table.get("missing"), None);
        assert_eq!(table.capacity(), 0);

        assert_eq!(table.set("alpha".to_owned(), 1).unwrap(), None);
        assert_eq!(table.set("beta".to_owned(), 2).unwrap(), None);
        assert_eq!(table.len(), 2);
        assert_eq!(table.capacity(), MIN_CAPACITY);

        assert_eq!(table.set("alpha".to_owned(), 10).unwrap(), Some(1));
        assert_eq!(table.len(), 2, "overwrite must not change the count");
        assert_eq!(table.get("alpha"), Some(&10));
        assert_eq!(table.get("beta"), Some(&2));

        *table.get_mut("beta").unwrap() += 5;
        assert_eq!(table.get("beta"), Some(&7));
        table.assert_invariants();
    }

    #[test]
    fn test_erase_leaves_tombstone() {
        let mut table: HashTable<String, i32> = HashTable::new();
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            table.set((*key).to_owned(), i as i32).unwrap();
        }

        assert_eq!(table.erase("b"), Some(1));
        assert_eq!(table.erase("b"), None);
        assert_eq!(table.len(), 2);
        assert_eq!(table.tombstones(), 1);
        assert_eq!(table.get("b"), None);
        assert!(table.contains_key("a"));
        assert!(table.contains_key("c"));

        table.set("b".to_owned(), 42).unwrap();
        assert_eq!(table.get("b"), Some(&42));
        assert_eq!(table.len(), 3);
        table.assert_invariants();
    }

    #[test]
    fn test_growth_from_capacity_four() {
        let mut table = HashTable::with_capacity(4).unwrap();
        assert!(table.capacity().is_power_of_two());

        for i in 0..250 {
            table.set(format!("key-{i}"), i).unwrap();
        }
        // overwrite a subset after the table has grown several times
        for i in (0..250).step_by(3) {
            table.set(format!("key-{i}"), i * 100).unwrap();
        }

        assert_eq!(table.len(), 250);
        for i in 0..250 {
            let expected = if i % 3 == 0 { i * 100 } else { i };
            assert_eq!(table.get(format!("key-{i}").as_str()), Some(&expected));
        }
        table.assert_invariants();
    }

    #[test]
    fn test_unsatisfiable_capacity_is_an_error() {
        let err = match HashTable::<u64, u64>::with_capacity(usize::MAX) {
            Err(err) => err,
            Ok(table) => panic!("allocated {} slots", table.capacity()),
        };
        assert_eq!(err.requested_slots, 1 << (usize::BITS - 1));

        let err = crate::Error::from(err);
        assert!(err.is_fatal());
        assert!(matches!(&err, crate::Error::AllocationFailure(msg) if msg.contains("slots")));
        assert!(err.to_string().starts_with("Allocation failure"));
    }

    #[test]
    fn test_delete_heavy_workload_keeps_capacity_bounded() {
        let mut table: HashTable<u64, u64> = HashTable::with_capacity(16).unwrap();
        for round in 0..2_000u64 {
            table.set(round, round).unwrap();
            if round >= 4 {
                assert_eq!(table.erase(&(round - 4)), Some(round - 4));
            }
            assert!(table.len() <= 5);
        }
        assert_eq!(table.len(), 4);
        assert!(
            table.capacity() <= 16,
            "tombstone churn should rebuild in place, capacity grew to {}",
            table.capacity()
        );
        for key in 1_996..2_000u64 {
            assert_eq!(table.get(&key), Some(&key));
        }
        table.assert_invariants();
    }

    #[test]
    fn test_colliding_keys_with_tombstones() {
        let mut table: HashTable<Colliding, u32> = HashTable::new();
        for i in 0..5 {
            table.set(Colliding(i), i).unwrap();
        }
        // punch holes in the middle of the run and refill
        assert_eq!(table.erase(&Colliding(1)), Some(1));
        assert_eq!(table.erase(&Colliding(3)), Some(3));
        table.set(Colliding(10), 10).unwrap();
        table.set(Colliding(4), 44).unwrap();

        assert_eq!(table.len(), 4);
        assert_eq!(table.get(&Colliding(0)), Some(&0));
        assert_eq!(table.get(&Colliding(2)), Some(&2));
        assert_eq!(table.get(&Colliding(4)), Some(&44));
        assert_eq!(table.get(&Colliding(10)), Some(&10));
        assert_eq!(table.get(&Colliding(1)), None);
        assert_eq!(table.get(&Colliding(3)), None);
        table.assert_invariants();
    }

    #[test]
    fn test_reinsert_after_erase_does_not_duplicate() {
        let mut table: HashTable<Colliding, u32> = HashTable::new();
        for i in 0..4 {
            table.set(Colliding(i), i).unwrap();
        }
        table.erase(&Colliding(0));
        // Colliding(3) lives past the tombstone; overwriting it must find it
        assert_eq!(table.set(Colliding(3), 33).unwrap(), Some(3));
        assert_eq!(table.len(), 3);
        assert_eq!(table.iter().filter(|(k, _)| **k == Colliding(3)).count(), 1);
    }

    #[test]
    fn test_random_operations_match_model() {
        // xorshift keeps the sequence deterministic
        let mut state = 0x2545_f491_4f6c_dd1du64;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        let mut table: HashTable<u64, u64> = HashTable::with_capacity(4).unwrap();
        let mut model = BTreeMap::new();
        for step in 0..5_000u64 {
            let key = next() % 97;
            if next() % 3 == 0 {
                assert_eq!(table.erase(&key), model.remove(&key), "step {step}");
            } else {
                assert_eq!(table.set(key, step).unwrap(), model.insert(key, step));
            }
            assert_eq!(table.len(), model.len());
        }
        table.assert_invariants();

        let mut seen: Vec<(u64, u64)> = table.iter().map(|(k, v)| (*k, *v)).collect();
        seen.sort_unstable();
        let expected: Vec<(u64, u64)> = model.into_iter().collect();
        assert_eq!(seen, expected, "iteration must yield every live pair once");
    }

    #[test]
    fn test_borrowed_lookup_matches_owned_hash() {
        let mut table: HashTable<Rc<str>, usize> = HashTable::new();
        table.set(Rc::from("lambda"), 1).unwrap();
        assert_eq!(table.get("lambda"), Some(&1));
        assert_eq!("lambda".hash_key(), Rc::<str>::from("lambda").hash_key());
        assert_eq!("lambda".hash_key(), String::from("lambda").hash_key());
        assert_ne!("lambda".hash_key(), "lambdb".hash_key());
    }
}
