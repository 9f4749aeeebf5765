//! Byte-addressed memory slave with programmable wait states.

use crate::port::{SlavePort, SlaveReply};
use crate::transaction::{Direction, ResponseStatus, TransactionId};
use crate::Allocator;

/// RAM-backed bus slave.
///
/// The memory answers absolute bus addresses: `base` is subtracted from the
/// transaction address, and any access that does not fit entirely inside the
/// backing store is answered with a slave error. The decoded region a memory
/// is reachable through may be larger than its backing store; the gap then
/// reads as errors, like a partially populated memory bank.
pub struct AhbMemory<A: Allocator> {
    state: A::Id<State>,
    base: u32,
    size: u32,
    /// Extra cycles each transfer spends in the data phase.
    wait_states: u64,
}

impl<A: Allocator> std::fmt::Debug for AhbMemory<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AhbMemory")
            .field("state", &self.state)
            .field("base", &self.base)
            .field("size", &self.size)
            .field("wait_states", &self.wait_states)
            .finish()
    }
}

#[derive(Debug, Clone)]
struct State {
    bytes: Vec<u8>,
}

impl<A: Allocator> AhbMemory<A> {
    /// Create a zero-initialized memory of `size` bytes serving bus
    /// addresses starting at `base`.
    ///
    /// `size` must be at least one and `base + size` must not wrap the
    /// 32-bit address space; otherwise `None` is returned and nothing is
    /// allocated.
    pub fn new(allocator: &mut A, base: u32, size: u32, wait_states: u64) -> Option<Self> {
        if size == 0 || base.checked_add(size - 1).is_none() {
            return None;
        }
        const_assert!(usize::BITS >= 32);
        Some(Self {
            state: allocator.insert(State {
                bytes: vec![0; size as usize],
            }),
            base,
            size,
            wait_states,
        })
    }

    /// Size of the backing store in bytes.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.size as usize
    }

    /// First bus address served by this memory.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Force the memory back to its reset state, which is all-zeros.
    pub fn reset(&self, allocator: &mut A) {
        allocator.get_mut(self.state).unwrap().bytes.fill(0);
    }

    /// Preload `data` at `offset` within the backing store (backdoor access,
    /// no bus traffic).
    ///
    /// # Panics
    ///
    /// Panics if the slice does not fit.
    pub fn load(&self, allocator: &mut A, offset: u32, data: &[u8]) {
        let start = offset as usize;
        let bytes = &mut allocator.get_mut(self.state).unwrap().bytes;
        bytes[start..start + data.len()].copy_from_slice(data);
    }

    /// Read `buf.len()` bytes at `offset` within the backing store
    /// (backdoor access, no bus traffic).
    ///
    /// # Panics
    ///
    /// Panics if the range does not fit.
    pub fn read_bytes(&self, allocator: &A, offset: u32, buf: &mut [u8]) {
        let start = offset as usize;
        let bytes = &allocator.get(self.state).unwrap().bytes;
        buf.copy_from_slice(&bytes[start..start + buf.len()]);
    }

    /// Service the data access of `trans`, setting its status. Returns the
    /// number of bytes transferred (zero on error).
    ///
    /// The transaction and the memory bytes live in the same allocator, so
    /// the accesses are sequenced: read the request, touch the store, write
    /// the response back.
    fn access(&self, allocator: &mut A, trans: TransactionId<A>) -> usize {
        let (address, direction, len) = {
            let t = allocator.get(trans).unwrap();
            (t.address, t.direction, t.len())
        };
        let offset = address.wrapping_sub(self.base) as u64;
        if address < self.base || offset + len as u64 > self.size as u64 {
            allocator.get_mut(trans).unwrap().status = ResponseStatus::SlaveError;
            return 0;
        }
        let offset = offset as usize;
        match direction {
            Direction::Read => {
                let window = allocator.get(self.state).unwrap().bytes[offset..offset + len].to_vec();
                let t = allocator.get_mut(trans).unwrap();
                t.data.copy_from_slice(&window);
                t.status = ResponseStatus::Okay;
            }
            Direction::Write => {
                let data = allocator.get(trans).unwrap().data.clone();
                allocator.get_mut(self.state).unwrap().bytes[offset..offset + len]
                    .copy_from_slice(&data);
                allocator.get_mut(trans).unwrap().status = ResponseStatus::Okay;
            }
        }
        len
    }
}

impl<A: Allocator> SlavePort<A> for AhbMemory<A> {
    fn transport(&self, allocator: &mut A, trans: TransactionId<A>) -> u64 {
        self.access(allocator, trans);
        self.wait_states
    }

    fn begin_req(&self, allocator: &mut A, trans: TransactionId<A>, _now: u64) -> SlaveReply {
        self.access(allocator, trans);
        SlaveReply::Ready {
            wait_states: self.wait_states,
        }
    }

    fn transport_dbg(&self, allocator: &mut A, trans: TransactionId<A>) -> usize {
        self.access(allocator, trans)
    }
}
