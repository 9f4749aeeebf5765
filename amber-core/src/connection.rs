//! Bookkeeping of in-flight transactions.
//!
//! The [`ConnectionTable`] is the authoritative map from a transaction's
//! identity to who issued it, where it is going, and how far through the
//! pipeline it has come. It is the single shared resource the pipeline
//! stages hand a transaction through; only the end-response stage may
//! destroy an entry.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Pipeline progress of one in-flight transaction.
///
/// Entries walk the states strictly in order; skipping a state is a fabric
/// bug and trips an assertion in [`ConnectionTable::advance`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TransState {
    /// Waiting for arbitration.
    Pending,
    /// Granted by the arbiter, waiting to enter the address phase.
    Scheduled,
    /// Address phase: the request was forwarded to the slave.
    AddressPhase,
    /// Data phase: the slave has responded.
    DataPhase,
}

impl TransState {
    /// Legal successor check for [`ConnectionTable::advance`].
    fn may_advance_to(self, next: TransState) -> bool {
        matches!(
            (self, next),
            (TransState::Pending, TransState::Scheduled)
                | (TransState::Scheduled, TransState::AddressPhase)
                | (TransState::AddressPhase, TransState::DataPhase)
        )
    }
}

/// Everything the fabric tracks about one in-flight transaction.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ConnectionEntry {
    pub master_id: u32,
    pub slave_id: u32,
    /// Cycle the transaction entered the fabric (for wait-time statistics).
    pub start_time: u64,
    pub state: TransState,
    /// The slave deferred this transfer with a split response; the entry
    /// keeps its address-phase state but the bus has been released.
    pub split_parked: bool,
}

impl ConnectionEntry {
    pub fn new(master_id: u32, slave_id: u32, start_time: u64) -> Self {
        Self {
            master_id,
            slave_id,
            start_time,
            state: TransState::Pending,
            split_parked: false,
        }
    }
}

/// Map from in-flight transaction identity to its [`ConnectionEntry`].
#[derive(Debug, Clone)]
pub struct ConnectionTable<K: Copy + Eq + Hash + Debug> {
    entries: HashMap<K, ConnectionEntry>,
}

impl<K: Copy + Eq + Hash + Debug> Default for ConnectionTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Eq + Hash + Debug> ConnectionTable<K> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Track a newly accepted transaction.
    ///
    /// # Panics
    ///
    /// Panics if `key` is already tracked; a transaction must retire before
    /// its identity can re-enter the fabric.
    pub fn insert(&mut self, key: K, entry: ConnectionEntry) {
        let old = self.entries.insert(key, entry);
        assert!(
            old.is_none(),
            "transaction {:?} entered the fabric while already in flight",
            key
        );
    }

    /// Advance the entry for `key` to `next`.
    ///
    /// # Panics
    ///
    /// Panics if `key` is unknown or if the transition skips a state.
    pub fn advance(&mut self, key: K, next: TransState) {
        let entry = self
            .entries
            .get_mut(&key)
            .unwrap_or_else(|| panic!("transaction {:?} is not in flight", key));
        assert!(
            entry.state.may_advance_to(next),
            "transaction {:?} may not go from {:?} to {:?}",
            key,
            entry.state,
            next
        );
        entry.state = next;
    }

    pub fn get(&self, key: K) -> Option<&ConnectionEntry> {
        self.entries.get(&key)
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut ConnectionEntry> {
        self.entries.get_mut(&key)
    }

    /// Stop tracking `key`, returning its entry. Reserved for the
    /// end-response stage (retirement) and for pre-grant withdrawal.
    pub fn remove(&mut self, key: K) -> Option<ConnectionEntry> {
        self.entries.remove(&key)
    }

    /// `true` if `master_id` has any transaction in flight.
    pub fn has_live_entry(&self, master_id: u32) -> bool {
        self.entries.values().any(|e| e.master_id == master_id)
    }

    /// Key of `master_id`'s entry waiting for arbitration, if any.
    pub fn pending_key(&self, master_id: u32) -> Option<K> {
        self.entries
            .iter()
            .find(|(_, e)| e.master_id == master_id && e.state == TransState::Pending)
            .map(|(&key, _)| key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &ConnectionEntry)> {
        self.entries.iter().map(|(&key, entry)| (key, entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
