use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::dispatcher::DispatchConfig;
use crate::provider::simulated::LoadBehavior;

#[derive(Parser)]
#[command(name = "masterad", about = "Ad mediation with provider fallback")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the banner + interstitial walkthrough
    Demo {
        /// Load success probability for every simulated network
        #[arg(long, default_value_t = 0.5)]
        success_rate: f64,

        /// Seed for reproducible load outcomes
        #[arg(long)]
        seed: Option<u64>,

        #[command(flatten)]
        dispatch: DispatchArgs,
    },

    /// Run repeated load/show/destroy cycles against a provider chain
    Simulate {
        /// Provider preset with optional behavior: PRESET[=ok|fail|hang|flaky:N|RATE]
        #[arg(long = "provider", required = true)]
        providers: Vec<ProviderArg>,

        /// Ad slot to request
        #[arg(long, default_value = "Full-Screen")]
        slot: String,

        /// Number of cycles
        #[arg(long, default_value_t = 5)]
        loads: u32,

        /// Simulated load latency in milliseconds
        #[arg(long, default_value_t = 0)]
        latency_ms: u64,

        /// Seed for reproducible load outcomes
        #[arg(long)]
        seed: Option<u64>,

        #[command(flatten)]
        dispatch: DispatchArgs,
    },

    /// List provider presets and their slot tables
    Presets,
}

/// Fallback tuning shared by the run commands.
#[derive(Args, Debug, Clone, Copy)]
pub struct DispatchArgs {
    /// Full passes over the provider list before a load gives up (0 = retry forever)
    #[arg(long, default_value_t = 1)]
    pub max_rounds: u32,

    /// Per-attempt load timeout in milliseconds (0 = wait forever)
    #[arg(long, default_value_t = 30_000)]
    pub load_timeout_ms: u64,
}

impl DispatchArgs {
    pub fn config(self) -> DispatchConfig {
        DispatchConfig {
            max_rounds: NonZeroU32::new(self.max_rounds),
            load_timeout: (self.load_timeout_ms > 0)
                .then(|| Duration::from_millis(self.load_timeout_ms)),
        }
    }
}

/// `--provider` value: a preset name and how it answers loads.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderArg {
    pub preset: String,
    pub behavior: LoadBehavior,
}

impl FromStr for ProviderArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (preset, behavior) = match s.split_once('=') {
            Some((preset, behavior)) => (preset, behavior.parse()?),
            None => (s, LoadBehavior::Succeed),
        };
        if preset.is_empty() {
            return Err("provider preset name is empty".to_string());
        }
        Ok(Self {
            preset: preset.to_string(),
            behavior,
        })
    }
}
