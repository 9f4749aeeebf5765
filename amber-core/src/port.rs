//! The socket traits at the edges of the fabric.
//!
//! Masters and slaves are external collaborators; the fabric only knows them
//! through these traits. Both calling conventions of the bus are present:
//! the blocking one ([`SlavePort::transport`]) completes a transfer in one
//! call, the phased one ([`SlavePort::begin_req`] and the [`MasterPort`]
//! backward path) mirrors the pipeline stages.

use crate::transaction::TransactionId;
use crate::Allocator;
use std::fmt::Debug;
use std::ops::Deref;

/// A slave's answer to a forwarded request (address phase).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SlaveReply {
    /// The slave services the transfer after `wait_states` extra cycles.
    /// The transaction's data/status have been filled in.
    Ready { wait_states: u64 },
    /// Split response: the slave cannot service the transfer now. The
    /// fabric parks the transaction, frees the bus, and expects the slave
    /// to call back through `split_ready` once it can proceed.
    Split,
}

/// A master's acknowledgement of a delivered response.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MasterSync {
    /// The master consumed the response; the fabric may retire the transfer
    /// immediately.
    Completed,
    /// The master will acknowledge later through `nb_end_resp`.
    Accepted,
}

/// Inbound (slave-side) socket: what the fabric requires from a bus slave.
///
/// Every method receives the transaction by id; the slave reads and updates
/// the payload through the allocator. The id is also the back-reference a
/// splitting slave hands back when it signals readiness, which is what
/// keeps multiple outstanding transfers apart.
pub trait SlavePort<A: Allocator>: Debug {
    /// Blocking transport: service the transfer completely and return the
    /// number of cycles it consumed.
    fn transport(&self, allocator: &mut A, trans: TransactionId<A>) -> u64;

    /// Phased transport, address phase. `now` is the current bus cycle.
    fn begin_req(&self, allocator: &mut A, trans: TransactionId<A>, now: u64) -> SlaveReply;

    /// Debug transport: service the transfer with no timing annotation and
    /// no simulated side effects beyond the data access itself. Returns the
    /// number of bytes transferred.
    fn transport_dbg(&self, allocator: &mut A, trans: TransactionId<A>) -> usize;
}

/// Outbound (master-side) socket: how the fabric calls back into a master.
pub trait MasterPort<A: Allocator>: Debug {
    /// Response delivery (the `BEGIN_RESP` phase).
    fn begin_resp(&self, allocator: &mut A, trans: TransactionId<A>, now: u64) -> MasterSync;

    /// The transfer has been retired; the master may issue its next request.
    fn retired(&self, allocator: &mut A, trans: TransactionId<A>, now: u64);
}

/// Boxed [`MasterPort`], the form the fabric stores per binding.
pub struct DynMasterPort<A: Allocator>(pub Box<dyn MasterPort<A>>);

impl<A: Allocator> Deref for DynMasterPort<A> {
    type Target = dyn MasterPort<A>;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl<A: Allocator> Debug for DynMasterPort<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynMasterPort").finish_non_exhaustive()
    }
}

/// Observer of write traffic entering the address phase, used for data-cache
/// snooping.
pub trait SnoopHook<A: Allocator>: Debug {
    fn snoop(&self, allocator: &mut A, master_id: u32, address: u32, len: usize);
}

/// Boxed [`SnoopHook`].
pub struct DynSnoopHook<A: Allocator>(pub Box<dyn SnoopHook<A>>);

impl<A: Allocator> Deref for DynSnoopHook<A> {
    type Target = dyn SnoopHook<A>;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl<A: Allocator> Debug for DynSnoopHook<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynSnoopHook").finish_non_exhaustive()
    }
}
