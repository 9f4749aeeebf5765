//! Scripted traffic generator: the master-side device of the demo system.

use crate::fabric::{AccessSync, Fabric};
use crate::port::{MasterPort, MasterSync};
use crate::transaction::{Transaction, TransactionId};
use crate::Allocator;
use log::trace;

/// A master that works through a fixed script of transactions, keeping at
/// most one in flight, and records when each retires.
///
/// The same value is handed to the fabric as the master's backward port and
/// kept by the test bench / demo system, which drives issuing from its step
/// loop via [`issue_pending`](Self::issue_pending).
pub struct TrafficGenerator<A: Allocator> {
    state: A::Id<State<TransactionId<A>>>,
}

impl<A: Allocator> std::fmt::Debug for TrafficGenerator<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficGenerator")
            .field("state", &self.state)
            .finish()
    }
}

#[derive(Debug, Clone)]
struct State<K> {
    script: Vec<Transaction>,
    next: usize,
    outstanding: Option<K>,
    /// Retired transactions with their retirement cycle, in order.
    completed: Vec<(K, u64)>,
}

impl<A: Allocator> TrafficGenerator<A> {
    pub fn new(allocator: &mut A, script: Vec<Transaction>) -> Self {
        Self {
            state: allocator.insert(State {
                script,
                next: 0,
                outstanding: None,
                completed: Vec::new(),
            }),
        }
    }

    /// Issue the next scripted transaction if none is in flight. Called once
    /// per cycle by the owning system, before the fabric tick.
    pub fn issue_pending(&self, allocator: &mut A, fabric: &Fabric<A>, master_id: u32) {
        let trans = {
            let state = allocator.get(self.state).unwrap();
            if state.outstanding.is_some() || state.next >= state.script.len() {
                return;
            }
            state.script[state.next].clone()
        };
        let trans = allocator.insert(trans);
        {
            let state = allocator.get_mut(self.state).unwrap();
            state.next += 1;
            state.outstanding = Some(trans);
        }
        trace!("traffic generator {} issues {:?}", master_id, trans);
        if fabric.nb_begin_req(allocator, master_id, trans) == AccessSync::Completed {
            // Completed within the call (decode error or configuration-window
            // access): nothing will be retired through the pipeline.
            let now = fabric.now(allocator);
            let state = allocator.get_mut(self.state).unwrap();
            state.outstanding = None;
            state.completed.push((trans, now));
        }
    }

    /// `true` once the script is exhausted and nothing is in flight.
    pub fn done(&self, allocator: &A) -> bool {
        let state = allocator.get(self.state).unwrap();
        state.outstanding.is_none() && state.next >= state.script.len()
    }

    /// Number of retired transactions.
    pub fn completed_count(&self, allocator: &A) -> usize {
        allocator.get(self.state).unwrap().completed.len()
    }

    /// Retired transactions with their retirement cycles, in order.
    pub fn completed(&self, allocator: &A) -> Vec<(TransactionId<A>, u64)> {
        allocator.get(self.state).unwrap().completed.clone()
    }
}

impl<A: Allocator> Clone for TrafficGenerator<A> {
    fn clone(&self) -> Self {
        Self { state: self.state }
    }
}

impl<A: Allocator> MasterPort<A> for TrafficGenerator<A> {
    fn begin_resp(&self, _allocator: &mut A, _trans: TransactionId<A>, _now: u64) -> MasterSync {
        MasterSync::Completed
    }

    fn retired(&self, allocator: &mut A, trans: TransactionId<A>, now: u64) {
        let state = allocator.get_mut(self.state).unwrap();
        debug_assert_eq!(state.outstanding, Some(trans));
        state.outstanding = None;
        state.completed.push((trans, now));
    }
}
