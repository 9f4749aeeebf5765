//! Discrete-event model of an AMBA AHB bus fabric.
//!
//! The fabric multiplexes any number of bus masters onto any number of bus
//! slaves through address decoding, arbitration and a four-stage transaction
//! pipeline that reproduces the split request/response phases of the
//! protocol. Plug-and-play configuration records are exposed read-only in a
//! dedicated address window so simulated software can discover the bus
//! topology.
//!
//! All simulated state lives behind an [`Allocator`] (see [`timewheel`]);
//! component structs are immutable and freely shareable, and every state
//! mutation goes through the allocator. Simulation is cooperative and
//! single-threaded: [`system::System::step`] advances the bus clock one
//! cycle at a time, and each pipeline stage is an explicit step function
//! re-entered once per cycle.

#[macro_use]
extern crate static_assertions;

pub mod arbiter;
pub mod connection;
pub mod decode;
pub mod fabric;
pub mod lock;
pub mod pnp;
pub mod port;
pub mod resources;
pub mod stats;
pub mod system;
pub mod transaction;

// Re-export the allocator machinery so dependants don't need to include
// timewheel as a dependency.
pub use timewheel::allocator::{Allocator, Arena};

/// Re-export of the transaction vocabulary for convenience.
pub use transaction::{Direction, Phase, ResponseStatus, Transaction, TransactionId};

pub mod unit {
    //! Collection of the units in which memory can be addressed (in bytes).

    /// A _byte_ is 8 bits.
    pub const BYTE: u32 = 1;

    /// A _halfword_ is 16 bits (2 bytes).
    pub const HALFWORD: u32 = 2;

    /// A _word_ is 32 bits (4 bytes). The AHB data bus modeled here is one
    /// word wide, and plug-and-play records are arrays of words.
    pub const WORD: u32 = 4;
}
