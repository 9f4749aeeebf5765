//! A small demo SoC assembled around the fabric: scripted traffic
//! generators as masters, two memory banks as slaves.
//!
//! This is the integration surface used by the command-line runner and the
//! scenario harness. It is intentionally modest — the devices come from
//! [`crate::resources`]; anything with real behavior would be attached the
//! same way.

use crate::arbiter::Policy;
use crate::fabric::{ConfigError, Fabric, FabricConfig};
use crate::pnp::{Bar, DeviceInfo};
use crate::port::DynMasterPort;
use crate::resources::{AhbMemory, TrafficGenerator};
use crate::transaction::Transaction;
use crate::Allocator;
use std::rc::Rc;

/// Bus address of the first memory bank.
pub const RAM0_BASE: u32 = 0x4000_0000;
/// Bus address of the second memory bank.
pub const RAM1_BASE: u32 = 0x5000_0000;
/// Backing-store size of each memory bank in bytes.
pub const RAM_SIZE: u32 = 0x1000;

/// Configuration of a demo [`System`].
#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub policy: Policy,
    /// Wait states of both memory banks.
    pub mem_wait_states: u64,
    pub split_support: bool,
    /// One transaction script per master; the number of scripts determines
    /// the number of bound masters.
    pub scripts: Vec<Vec<Transaction>>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            policy: Policy::RoundRobin,
            mem_wait_states: 1,
            split_support: false,
            scripts: Vec::new(),
        }
    }
}

/// The assembled demo system.
#[derive(Debug)]
pub struct System<A: Allocator> {
    fabric: Fabric<A>,
    generators: Vec<TrafficGenerator<A>>,
    memories: Vec<Rc<AhbMemory<A>>>,
}

impl<A: Allocator> System<A> {
    /// Build and elaborate the system. Fails if the configuration does not
    /// validate (see [`ConfigError`]).
    pub fn new(allocator: &mut A, config: SystemConfig) -> Result<Self, ConfigError> {
        let mut fabric = Fabric::new(
            allocator,
            FabricConfig {
                policy: config.policy,
                split_support: config.split_support,
                ..FabricConfig::default()
            },
        );

        let generators: Vec<_> = config
            .scripts
            .into_iter()
            .map(|script| {
                let generator = TrafficGenerator::new(allocator, script);
                fabric.bind_master(
                    DeviceInfo::new(0x01, 0x003),
                    DynMasterPort(Box::new(generator.clone())),
                );
                generator
            })
            .collect();

        let mut memories = Vec::new();
        for (bar, base) in [
            (Bar::memory(0x400, 0xFF0), RAM0_BASE),
            (Bar::memory(0x500, 0xFF0), RAM1_BASE),
        ] {
            let memory =
                Rc::new(AhbMemory::new(allocator, base, RAM_SIZE, config.mem_wait_states).unwrap());
            fabric.bind_slave(DeviceInfo::new(0x04, 0x00E), vec![bar], memory.clone());
            memories.push(memory);
        }

        fabric.finalize(allocator)?;
        Ok(Self {
            fabric,
            generators,
            memories,
        })
    }

    pub fn fabric(&self) -> &Fabric<A> {
        &self.fabric
    }

    pub fn generators(&self) -> &[TrafficGenerator<A>] {
        &self.generators
    }

    pub fn memories(&self) -> &[Rc<AhbMemory<A>>] {
        &self.memories
    }

    /// Advance the system one bus cycle: give every master a chance to
    /// issue, then tick the fabric.
    pub fn step(&self, allocator: &mut A) {
        for (master_id, generator) in self.generators.iter().enumerate() {
            generator.issue_pending(allocator, &self.fabric, master_id as u32);
        }
        self.fabric.tick(allocator);
    }

    /// `true` once every script is exhausted and the fabric is drained.
    pub fn done(&self, allocator: &A) -> bool {
        self.fabric.in_flight(allocator) == 0
            && self
                .generators
                .iter()
                .all(|generator| generator.done(allocator))
    }

    /// Step until [`done`](Self::done) or until `max_cycles` have elapsed.
    /// Returns the number of cycles consumed, or `None` if the budget ran
    /// out first.
    pub fn run_until_done(&self, allocator: &mut A, max_cycles: u64) -> Option<u64> {
        for cycle in 0..max_cycles {
            if self.done(allocator) {
                return Some(cycle);
            }
            self.step(allocator);
        }
        self.done(allocator).then_some(max_cycles)
    }
}
