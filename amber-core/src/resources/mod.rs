//! Bus-attached device models used by the demo system and the scenario
//! harness.
//!
//! These are deliberately simple collaborators: the interesting behavior
//! lives in the fabric, and these devices exist to drive it. Real peripheral
//! models would plug into the same [`crate::port`] traits.

pub mod mem;
pub mod traffic;

pub use mem::AhbMemory;
pub use traffic::TrafficGenerator;
