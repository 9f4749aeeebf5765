use amber_core::arbiter::Policy;
use amber_core::system::{System, SystemConfig, RAM0_BASE, RAM1_BASE, RAM_SIZE};
use amber_core::transaction::Transaction;
use amber_core::Arena;
use clap::Parser;
use log::info;
use stderrlog::LogLevelNum;

#[derive(Parser, Debug)]
#[command(version, about = "Cycle-based simulator of an AHB bus fabric", long_about = None)]
struct Args {
    /// Number of bus masters driving traffic.
    #[arg(short, long, default_value_t = 3)]
    masters: usize,
    /// Write/read-back pairs each master performs.
    #[arg(short, long, default_value_t = 64)]
    transfers: usize,
    /// Use round-robin arbitration instead of fixed priority.
    #[arg(short, long)]
    round_robin: bool,
    /// Memory wait states.
    #[arg(short, long, default_value_t = 1)]
    wait_states: u64,
    /// Cycle budget for the run.
    #[arg(short, long, default_value_t = 1_000_000)]
    cycles: u64,
    /// Verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();

    stderrlog::new()
        .verbosity(match args.verbose {
            0 => LogLevelNum::Warn,
            1 => LogLevelNum::Info,
            2 => LogLevelNum::Debug,
            _ => LogLevelNum::Trace,
        })
        .modules([module_path!(), "amber_core"])
        .init()
        .unwrap();

    let config = SystemConfig {
        policy: if args.round_robin {
            Policy::RoundRobin
        } else {
            Policy::FixedPriority
        },
        mem_wait_states: args.wait_states,
        split_support: false,
        scripts: (0..args.masters)
            .map(|master| script(master, args.masters, args.transfers))
            .collect(),
    };

    let mut arena = Arena::new();
    let system = match System::new(&mut arena, config) {
        Ok(system) => system,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    info!(
        "running {} masters x {} transfer pairs ({} arbitration, {} wait states)",
        args.masters,
        args.transfers,
        if args.round_robin { "round-robin" } else { "fixed-priority" },
        args.wait_states
    );

    let Some(cycles) = system.run_until_done(&mut arena, args.cycles) else {
        eprintln!("cycle budget of {} exhausted before the traffic drained", args.cycles);
        std::process::exit(2);
    };

    println!("drained after {} cycles", cycles);
    println!("{}", system.fabric().stats(&arena));
    for (master_id, generator) in system.generators().iter().enumerate() {
        println!(
            "master {}: {} transfers retired",
            master_id,
            generator.completed_count(&arena)
        );
    }
}

/// Deterministic per-master traffic: write/read-back pairs alternating over
/// both memory banks.
fn script(master: usize, masters: usize, transfers: usize) -> Vec<Transaction> {
    let mut transactions = Vec::with_capacity(transfers * 2);
    for i in 0..transfers {
        let base = if (master + i) % 2 == 0 { RAM0_BASE } else { RAM1_BASE };
        // Keep each master in its own slice of the bank.
        let slice = (RAM_SIZE / masters as u32).max(8);
        let offset = (master as u32) * slice + (i as u32 * 8) % slice;
        let address = base + offset.min(RAM_SIZE - 8);
        transactions.push(Transaction::write(address, vec![(master + i) as u8; 4]));
        transactions.push(Transaction::read(address, 4));
    }
    transactions
}
