//! Bit-addressable data container
//!
//! `BitCollection` stores the raw content of a PLC item. Bit `i` lives in byte
//! `i / 8` at bit `i % 8` (least significant bit first), which is the layout
//! PLC memory uses. The byte view is derived from the same storage, so bits and
//! bytes can never disagree.
//!
//! Every mutation produces a set of [`BitChange`] records keyed by bit index.
//! Non-empty change sets are queued while the mutation lock is held and then
//! delivered to subscribers under a separate re-entrant dispatch lock:
//!
//! - delivery order matches enqueue order, even across threads
//! - a subscriber may call back into the collection without deadlocking
//! - a thread never waits for another thread's delivery: if the dispatch
//!   lock is taken elsewhere, its change sets are left in the queue for the
//!   thread currently draining it

use bitvec::prelude::*;
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

type Storage = BitVec<u8, Lsb0>;

/// Errors raised by bit-level access
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BitError {
    #[error("Bit index {index} out of range (length {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Cannot transfer {count} bits at position {start} into fixed collection of {len} bits")]
    TransferOutOfRange {
        start: usize,
        count: usize,
        len: usize,
    },
}

/// Old and new value of a single bit
///
/// `None` means the bit did not exist on that side of the change (added by
/// growth, or removed by truncation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitChange {
    pub old: Option<bool>,
    pub new: Option<bool>,
}

/// Change records of one mutation, keyed by bit index
pub type BitChanges = BTreeMap<usize, BitChange>;

/// Change subscriber
///
/// Receives the collection that changed and the changes of one mutation.
pub type ChangeHandler = Arc<dyn Fn(&BitCollection, &BitChanges) + Send + Sync>;

/// Handle returned by [`BitCollection::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Dispatcher {
    queue: Mutex<VecDeque<BitChanges>>,
    drain: ReentrantMutex<()>,
    handlers: Mutex<Vec<(SubscriptionId, ChangeHandler)>>,
    next_id: AtomicU64,
}

/// Thread-safe, resizable bit buffer
pub struct BitCollection {
    bits: Mutex<Storage>,
    auto_adapt: bool,
    dispatcher: Dispatcher,
}

impl BitCollection {
    fn from_storage(bits: Storage, auto_adapt: bool) -> Self {
        Self {
            bits: Mutex::new(bits),
            auto_adapt,
            dispatcher: Dispatcher::default(),
        }
    }

    /// Create a collection of `len` bits, all `false`
    pub fn new(len: usize, auto_adapt: bool) -> Self {
        Self::from_storage(Storage::repeat(false, len), auto_adapt)
    }

    /// Create a collection holding every bit of `bytes`
    pub fn from_bytes(bytes: &[u8], auto_adapt: bool) -> Self {
        Self::from_storage(Storage::from_slice(bytes), auto_adapt)
    }

    /// Create a collection from individual bits
    pub fn from_bools(values: &[bool], auto_adapt: bool) -> Self {
        Self::from_storage(values.iter().copied().collect(), auto_adapt)
    }

    /// Concatenate the current content of several collections
    pub fn concat(parts: &[&BitCollection], auto_adapt: bool) -> Self {
        let mut bits = Storage::new();
        for part in parts {
            bits.extend_from_bitslice(part.bits.lock().as_bitslice());
        }
        Self::from_storage(bits, auto_adapt)
    }

    /// Length in bits
    pub fn len(&self) -> usize {
        self.bits.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Length in bytes, `ceil(len / 8)`
    pub fn byte_len(&self) -> usize {
        self.len().div_ceil(8)
    }

    /// Whether the length is a whole number of bytes
    pub fn handles_full_bytes(&self) -> bool {
        self.len() % 8 == 0
    }

    /// Whether the length follows incoming data on transfer
    pub fn is_auto_adapt(&self) -> bool {
        self.auto_adapt
    }

    pub fn get(&self, index: usize) -> Option<bool> {
        self.bits.lock().get(index).map(|bit| *bit)
    }

    /// Set a single bit, notifying only if the value actually changed
    pub fn set(&self, index: usize, value: bool) -> Result<(), BitError> {
        self.mutate(|bits, changes| {
            let len = bits.len();
            if index >= len {
                return Err(BitError::IndexOutOfRange { index, len });
            }
            let old = bits.replace(index, value);
            record(changes, index, Some(old), Some(value));
            Ok(())
        })
    }

    /// Grow with `false` bits or truncate to `len`
    pub fn resize(&self, len: usize) -> Result<(), BitError> {
        self.mutate(|bits, changes| {
            resize_recording(bits, len, changes);
            Ok(())
        })
    }

    /// Overwrite bits starting at `start`
    ///
    /// Auto-adapt collections are first resized to `start + values.len()`.
    /// Fixed collections reject transfers that would run past their end.
    pub fn transfer_from_bools(&self, values: &[bool], start: usize) -> Result<(), BitError> {
        self.mutate(|bits, changes| transfer(bits, self.auto_adapt, values, start, changes))
    }

    /// Overwrite bits starting at bit `start` with every bit of `bytes`
    pub fn transfer_from_bytes(&self, bytes: &[u8], start: usize) -> Result<(), BitError> {
        let values: Vec<bool> = bytes.view_bits::<Lsb0>().iter().by_vals().collect();
        self.transfer_from_bools(&values, start)
    }

    /// Overwrite bits starting at `start` with the content of `other`
    pub fn transfer_from(&self, other: &BitCollection, start: usize) -> Result<(), BitError> {
        let values = other.to_bools();
        self.transfer_from_bools(&values, start)
    }

    /// Set every bit to `value`
    pub fn set_all(&self, value: bool) -> Result<(), BitError> {
        self.mutate(|bits, changes| {
            let values = vec![value; bits.len()];
            transfer(bits, self.auto_adapt, &values, 0, changes)
        })
    }

    /// Copy of the byte view
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bits.lock().as_raw_slice().to_vec()
    }

    /// Copy of the bit view
    pub fn to_bools(&self) -> Vec<bool> {
        self.bits.lock().iter().by_vals().collect()
    }

    /// Register a change handler
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&BitCollection, &BitChanges) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.dispatcher.next_id.fetch_add(1, Ordering::Relaxed));
        self.dispatcher
            .handlers
            .lock()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a change handler, returning whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.dispatcher.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    fn mutate<F>(&self, f: F) -> Result<(), BitError>
    where
        F: FnOnce(&mut Storage, &mut BitChanges) -> Result<(), BitError>,
    {
        {
            let mut bits = self.bits.lock();
            let mut changes = BitChanges::new();
            let result = f(&mut bits, &mut changes);
            // Dead bits of the last byte stay zero so the byte view is stable.
            bits.set_uninitialized(false);
            if !changes.is_empty() {
                self.dispatcher.queue.lock().push_back(changes);
            }
            result?;
        }
        self.dispatch();
        Ok(())
    }

    /// Deliver queued change sets
    ///
    /// Handlers may run on another thread if that thread is already draining
    /// the queue; the change sets are then delivered before it lets go.
    fn dispatch(&self) {
        loop {
            let Some(guard) = self.dispatcher.drain.try_lock() else {
                return;
            };
            loop {
                let next = self.dispatcher.queue.lock().pop_front();
                let Some(changes) = next else {
                    break;
                };
                let handlers: Vec<ChangeHandler> = self
                    .dispatcher
                    .handlers
                    .lock()
                    .iter()
                    .map(|(_, handler)| handler.clone())
                    .collect();
                for handler in handlers {
                    handler(self, &changes);
                }
            }
            drop(guard);

            // A change set queued after the last pop but before the unlock
            // found the lock taken and relies on us to deliver it.
            if self.dispatcher.queue.lock().is_empty() {
                return;
            }
        }
    }
}

fn record(changes: &mut BitChanges, index: usize, old: Option<bool>, new: Option<bool>) {
    match changes.entry(index) {
        Entry::Occupied(mut entry) => {
            entry.get_mut().new = new;
            if entry.get().old == entry.get().new {
                entry.remove();
            }
        },
        Entry::Vacant(entry) => {
            if old != new {
                entry.insert(BitChange { old, new });
            }
        },
    }
}

fn resize_recording(bits: &mut Storage, len: usize, changes: &mut BitChanges) {
    let current = bits.len();
    if len > current {
        for index in current..len {
            record(changes, index, None, Some(false));
        }
        bits.resize(len, false);
    } else if len < current {
        for index in len..current {
            record(changes, index, Some(bits[index]), None);
        }
        bits.truncate(len);
    }
}

fn transfer(
    bits: &mut Storage,
    auto_adapt: bool,
    values: &[bool],
    start: usize,
    changes: &mut BitChanges,
) -> Result<(), BitError> {
    let end = start + values.len();
    if auto_adapt {
        resize_recording(bits, end, changes);
    } else if end > bits.len() {
        return Err(BitError::TransferOutOfRange {
            start,
            count: values.len(),
            len: bits.len(),
        });
    }

    for (offset, &value) in values.iter().enumerate() {
        let index = start + offset;
        let old = bits.replace(index, value);
        if old != value || changes.contains_key(&index) {
            record(changes, index, Some(old), Some(value));
        }
    }
    Ok(())
}

impl Clone for BitCollection {
    /// Deep copy of the content; subscribers are not carried over
    fn clone(&self) -> Self {
        Self::from_storage(self.bits.lock().clone(), self.auto_adapt)
    }
}

/// Byte-sequence equality
///
/// Two collections with different bit lengths compare equal when their byte
/// views are identical.
impl PartialEq for BitCollection {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for BitCollection {}

impl fmt::Debug for BitCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bits = self.bits.lock();
        f.debug_struct("BitCollection")
            .field("len", &bits.len())
            .field("auto_adapt", &self.auto_adapt)
            .field("bytes", &format_args!("{:02X?}", bits.as_raw_slice()))
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn capture(collection: &BitCollection) -> Arc<Mutex<Vec<BitChanges>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        collection.subscribe(move |_, changes| sink.lock().push(changes.clone()));
        seen
    }

    #[test]
    fn test_byte_length_follows_bit_length() {
        for len in 0..=33 {
            let collection = BitCollection::new(len, false);
            assert_eq!(collection.byte_len(), len.div_ceil(8));
        }
    }

    #[test]
    fn test_from_bytes_is_lsb_first() {
        let collection = BitCollection::from_bytes(&[0b0000_0101], false);
        assert_eq!(collection.len(), 8);
        assert_eq!(collection.get(0), Some(true));
        assert_eq!(collection.get(1), Some(false));
        assert_eq!(collection.get(2), Some(true));
        assert_eq!(collection.get(8), None);
    }

    #[test]
    fn test_transfer_records_only_changed_bits() {
        let collection = BitCollection::new(10, false);
        let seen = capture(&collection);

        collection.transfer_from_bools(&[true; 5], 0).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        let changes = &seen[0];
        assert_eq!(changes.len(), 5);
        for (index, change) in changes {
            assert!(*index < 5);
            assert_eq!(
                *change,
                BitChange {
                    old: Some(false),
                    new: Some(true)
                }
            );
        }
    }

    #[test]
    fn test_resize_growth_records_new_bits() {
        let collection = BitCollection::new(5, false);
        let seen = capture(&collection);

        collection.resize(10).unwrap();

        assert_eq!(collection.len(), 10);
        let seen = seen.lock();
        let keys: Vec<usize> = seen[0].keys().copied().collect();
        assert_eq!(keys, vec![5, 6, 7, 8, 9]);
        assert!(seen[0].values().all(|c| c.old.is_none() && c.new == Some(false)));
    }

    #[test]
    fn test_resize_truncation_records_removed_bits() {
        let collection = BitCollection::from_bools(&[true, false, true, true], false);
        let seen = capture(&collection);

        collection.resize(2).unwrap();

        assert_eq!(collection.len(), 2);
        let seen = seen.lock();
        assert_eq!(
            seen[0].get(&2),
            Some(&BitChange {
                old: Some(true),
                new: None
            })
        );
        assert_eq!(
            seen[0].get(&3),
            Some(&BitChange {
                old: Some(true),
                new: None
            })
        );
    }

    #[test]
    fn test_resize_to_same_length_is_silent() {
        let collection = BitCollection::new(8, false);
        let seen = capture(&collection);
        collection.resize(8).unwrap();
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_auto_adapt_transfer_matches_incoming_length() {
        let collection = BitCollection::new(3, true);
        collection.transfer_from_bytes(&[0xAA, 0x55], 0).unwrap();
        assert_eq!(collection.len(), 16);
        assert!(collection.handles_full_bytes());
        assert_eq!(collection.to_bytes(), vec![0xAA, 0x55]);

        collection.transfer_from_bools(&[true; 5], 0).unwrap();
        assert_eq!(collection.len(), 5);
        assert!(!collection.handles_full_bytes());
        assert_eq!(collection.to_bytes(), vec![0b0001_1111]);
    }

    #[test]
    fn test_auto_adapt_growth_is_one_change_set() {
        let collection = BitCollection::new(0, true);
        let seen = capture(&collection);

        collection.transfer_from_bools(&[true, false], 0).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0].get(&0),
            Some(&BitChange {
                old: None,
                new: Some(true)
            })
        );
        assert_eq!(
            seen[0].get(&1),
            Some(&BitChange {
                old: None,
                new: Some(false)
            })
        );
    }

    #[test]
    fn test_fixed_transfer_out_of_range() {
        let collection = BitCollection::new(4, false);
        let err = collection.transfer_from_bools(&[true; 3], 2).unwrap_err();
        assert_eq!(
            err,
            BitError::TransferOutOfRange {
                start: 2,
                count: 3,
                len: 4
            }
        );
        assert_eq!(collection.to_bools(), vec![false; 4]);
    }

    #[test]
    fn test_set_unchanged_value_is_silent() {
        let collection = BitCollection::new(4, false);
        let seen = capture(&collection);

        collection.set(1, false).unwrap();
        assert!(seen.lock().is_empty());

        collection.set(1, true).unwrap();
        assert_eq!(seen.lock().len(), 1);
        assert!(matches!(
            collection.set(4, true),
            Err(BitError::IndexOutOfRange { index: 4, len: 4 })
        ));
    }

    #[test]
    fn test_set_all() {
        let collection = BitCollection::from_bools(&[true, false, false], false);
        let seen = capture(&collection);
        collection.set_all(true).unwrap();
        assert_eq!(collection.to_bools(), vec![true; 3]);
        assert_eq!(seen.lock()[0].len(), 2);
    }

    #[test]
    fn test_truncation_clears_dead_bits() {
        let collection = BitCollection::from_bytes(&[0xFF], false);
        collection.resize(3).unwrap();
        assert_eq!(collection.to_bytes(), vec![0b0000_0111]);
        collection.resize(8).unwrap();
        assert_eq!(collection.to_bytes(), vec![0b0000_0111]);
    }

    #[test]
    fn test_clone_is_deep() {
        let original = BitCollection::from_bytes(&[0x0F], true);
        let copy = original.clone();
        copy.set(7, true).unwrap();
        assert_eq!(original.to_bytes(), vec![0x0F]);
        assert_eq!(copy.to_bytes(), vec![0x8F]);
        assert!(copy.is_auto_adapt());
    }

    #[test]
    fn test_equality_is_byte_based() {
        let short = BitCollection::from_bools(&[true, false, true], false);
        let long = BitCollection::from_bytes(&[0b0000_0101], false);
        assert_eq!(short, long);
        assert_ne!(short, BitCollection::from_bytes(&[0x01], false));
    }

    #[test]
    fn test_concat() {
        let a = BitCollection::from_bools(&[true, true], false);
        let b = BitCollection::from_bools(&[false, true], false);
        let joined = BitCollection::concat(&[&a, &b], false);
        assert_eq!(joined.to_bools(), vec![true, true, false, true]);
    }

    #[test]
    fn test_handler_can_reenter() {
        let collection = Arc::new(BitCollection::new(4, false));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        collection.subscribe(move |bits, changes| {
            counter.fetch_add(1, Ordering::SeqCst);
            // Mirror bit 0 into bit 3 from inside the handler.
            if let Some(change) = changes.get(&0) {
                bits.set(3, change.new.unwrap_or(false)).unwrap();
            }
        });

        collection.set(0, true).unwrap();

        assert_eq!(collection.get(3), Some(true));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let collection = BitCollection::new(2, false);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let id = collection.subscribe(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        collection.set(0, true).unwrap();
        assert!(collection.unsubscribe(id));
        assert!(!collection.unsubscribe(id));
        collection.set(1, true).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_notifications_keep_order_across_threads() {
        let collection = Arc::new(BitCollection::new(64, false));
        let order = Arc::new(Mutex::new(Vec::new()));
        let sink = order.clone();
        collection.subscribe(move |_, changes| {
            sink.lock().extend(changes.keys().copied());
        });

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let collection = collection.clone();
                std::thread::spawn(move || {
                    for i in 0..16 {
                        collection.set(t * 16 + i, true).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut seen = order.lock().clone();
        assert_eq!(seen.len(), 64);
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 64);
    }
}
