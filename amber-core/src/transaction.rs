//! The bus transaction payload and its phase/status vocabulary.

use crate::Allocator;
use std::fmt;

/// Id of a [`Transaction`] stored in an [`Allocator`].
///
/// This id is the *in-flight identity* of a transfer: masters keep it to read
/// the response back after retirement, the fabric keys its connection table
/// by it, and slaves receive it as the back-reference that matches a request
/// to its (possibly deferred) response.
pub type TransactionId<A> = <A as Allocator>::Id<Transaction>;

/// Direction of a transfer, as seen from the issuing master.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Direction::Read => "read",
            Direction::Write => "write",
        })
    }
}

/// Response status of a transfer.
///
/// Decode misses and slave-reported errors travel to the issuing master as an
/// ordinary status value, never as a Rust error: an errored transfer is a
/// legitimate bus outcome, not a simulator failure.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ResponseStatus {
    /// The transfer has not produced a response yet.
    Incomplete,
    /// The transfer completed successfully.
    Okay,
    /// The address matched no decoded region; the fabric synthesized this
    /// response without involving any slave.
    AddressError,
    /// The selected slave reported an error.
    SlaveError,
}

impl ResponseStatus {
    /// Returns `true` for [`ResponseStatus::Okay`].
    pub fn is_ok(self) -> bool {
        matches!(self, ResponseStatus::Okay)
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            ResponseStatus::Incomplete => "incomplete",
            ResponseStatus::Okay => "okay",
            ResponseStatus::AddressError => "address error",
            ResponseStatus::SlaveError => "slave error",
        })
    }
}

/// Protocol phase of the non-blocking (phased) calling convention.
///
/// The forward path carries `BeginReq`/`EndResp`, the backward path
/// `EndReq`/`BeginResp`; the transitions mirror the pipeline stages.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Phase {
    BeginReq,
    EndReq,
    BeginResp,
    EndResp,
}

/// A single bus transaction.
///
/// The issuing master fills in address, direction, payload and the lock and
/// burst markers; the fabric and the selected slave fill in `status` (and,
/// for reads, `data`) as the transfer progresses. The transfer length is
/// `data.len()` in bytes.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Transaction {
    pub address: u32,
    pub direction: Direction,
    pub data: Vec<u8>,
    /// Transfer is part of a locked (atomic) sequence.
    pub lock: bool,
    /// Transfer is a fixed-length burst. Only honored when the fabric is
    /// configured with fixed-burst support; otherwise treated as an ordinary
    /// incrementing transfer.
    pub fixed_burst: bool,
    pub status: ResponseStatus,
}

impl Transaction {
    /// Create a read transfer of `length` bytes starting at `address`.
    pub fn read(address: u32, length: usize) -> Self {
        Self {
            address,
            direction: Direction::Read,
            data: vec![0; length],
            lock: false,
            fixed_burst: false,
            status: ResponseStatus::Incomplete,
        }
    }

    /// Create a write transfer carrying `data`, starting at `address`.
    pub fn write(address: u32, data: Vec<u8>) -> Self {
        Self {
            address,
            direction: Direction::Write,
            data,
            lock: false,
            fixed_burst: false,
            status: ResponseStatus::Incomplete,
        }
    }

    /// Mark this transfer as part of a locked sequence.
    pub fn locked(mut self) -> Self {
        self.lock = true;
        self
    }

    /// Mark this transfer as a fixed-length burst.
    pub fn fixed_burst(mut self) -> Self {
        self.fixed_burst = true;
        self
    }

    /// Transfer length in bytes.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_read(&self) -> bool {
        matches!(self.direction, Direction::Read)
    }

    pub fn is_write(&self) -> bool {
        matches!(self.direction, Direction::Write)
    }
}
