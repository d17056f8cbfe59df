//! Output formatting for demo runs.
//!
//! Human-readable status lines and tables on stdout. Load failures that
//! end a cycle go to stdout too; they are part of the run's report, not
//! process errors.

use std::sync::Arc;

use crate::dispatcher::{DispatchError, Loaded, RegistryStatus, ShowOutcome};
use crate::provider::presets::{PRESET_NAMES, preset_tokens};
use crate::provider::simulated::ProviderStats;

pub fn print_loaded(label: &str, loaded: &Loaded) {
    println!(
        "{label} {:?} loaded from {} at cursor {} ({})",
        loaded.slot,
        loaded.provider,
        loaded.cursor,
        plural(loaded.attempts, "attempt")
    );
}

pub fn print_load_failed(label: &str, error: &DispatchError) {
    println!("{label} not loaded: {error}");
}

pub fn print_show(label: &str, outcome: &ShowOutcome) {
    match outcome {
        ShowOutcome::Showing { provider, .. } => println!("{label} showing via {provider}"),
        ShowOutcome::NotReady { provider } => println!("{label} not ready on {provider}"),
    }
}

pub fn print_finished(label: &str) {
    println!("{label} finished");
}

pub fn print_cycle_header() {
    println!("{:>5} {:<20} {:>8} SHOWN", "CYCLE", "PROVIDER", "ATTEMPTS");
    println!("{}", "-".repeat(44));
}

pub fn print_cycle(cycle: u32, loaded: &Loaded, shown: bool) {
    println!(
        "{:>5} {:<20} {:>8} {}",
        cycle,
        loaded.provider,
        loaded.attempts,
        if shown { "yes" } else { "no" }
    );
}

pub fn print_cycle_failed(cycle: u32, error: &DispatchError) {
    println!("{cycle:>5} {error}");
}

/// Print the registry in priority order with per-provider call counts,
/// marking the current provider.
pub fn print_status(status: &RegistryStatus, stats: &[(usize, Arc<ProviderStats>)]) {
    println!();
    let Some(current) = &status.current else {
        println!("No providers registered");
        return;
    };
    println!("{:<3} {:<20} {:>6} {:>6} {:>9}", "", "PROVIDER", "LOADS", "SHOWS", "DESTROYS");
    for (i, name) in status.providers.iter().enumerate() {
        let marker = if i == status.cursor { "*" } else { " " };
        let counts = stats.iter().find(|(index, _)| *index == i).map(|(_, s)| s);
        match counts {
            Some(s) => println!(
                "{marker}{i:>2} {name:<20} {:>6} {:>6} {:>9}",
                s.loads(),
                s.shows(),
                s.destroys()
            ),
            None => println!("{marker}{i:>2} {name:<20}"),
        }
    }
    println!("current provider: {current}");
    if status.pending_loads > 0 {
        println!("loads still in flight: {}", status.pending_loads);
    }
}

pub fn print_presets() {
    println!("{:<12} {:<18} UNIT", "PRESET", "SLOT");
    println!("{}", "-".repeat(70));
    for name in PRESET_NAMES {
        for (slot, unit) in preset_tokens(name).unwrap_or_default() {
            println!("{name:<12} {slot:<18} {unit}");
        }
    }
}

fn plural(n: u32, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}
