//! Master arbitration: picking the next transaction to enter the address
//! phase.

use crate::lock::LockState;
use bitvec::slice::BitSlice;

/// Arbitration policy of the fabric.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Policy {
    /// The lowest requesting master id wins every cycle. A low-id master
    /// with continuous requests starves everyone above it — intentional
    /// AMBA semantics, not a bug.
    FixedPriority,
    /// Rotating grant pointer; no requesting master can be skipped twice in
    /// a row while another is granted twice.
    RoundRobin,
}

/// The arbiter proper.
///
/// [`evaluate`](Self::evaluate) is called once per bus clock edge with the
/// set of masters that have a transaction waiting for arbitration, and
/// yields at most one grant. The lock gate comes first: while the bus is
/// locked, only the lock owner can win, and if the owner is not requesting
/// the bus is held idle for everyone else.
#[derive(Debug, Clone)]
pub struct Arbiter {
    policy: Policy,
    /// The master the bus parks at when nothing is requested; also the
    /// winner of read/IDLE ties in fixed-priority mode.
    default_master: u32,
    /// Round-robin pointer: index of the most recently granted master.
    robin: usize,
}

impl Arbiter {
    pub fn new(policy: Policy, default_master: u32) -> Self {
        Self {
            policy,
            default_master,
            robin: 0,
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// The master the bus parks at while idle.
    pub fn default_master(&self) -> u32 {
        self.default_master
    }

    /// Pick the winner among `requesting` masters (one bit per master id),
    /// or `None` if no grant happens this cycle.
    pub fn evaluate(&mut self, requesting: &BitSlice, lock: &LockState) -> Option<u32> {
        if let Some(owner) = lock.owner() {
            // Only the lock owner may proceed; everyone else waits it out.
            if *requesting.get(owner as usize)? {
                self.robin = owner as usize;
                return Some(owner);
            }
            return None;
        }

        match self.policy {
            Policy::FixedPriority => requesting.first_one().map(|index| index as u32),
            Policy::RoundRobin => {
                let len = requesting.len();
                for step in 1..=len {
                    let index = (self.robin + step) % len;
                    if requesting[index] {
                        // The pointer advances past the winner only, never
                        // past masters skipped while requesting.
                        self.robin = index;
                        return Some(index as u32);
                    }
                }
                None
            }
        }
    }

    /// Reset the rotation state (bus reset).
    pub fn reset(&mut self) {
        self.robin = 0;
    }
}
