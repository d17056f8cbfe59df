//! One-shot CLI runs: the banner/interstitial walkthrough, repeated
//! simulation cycles, and the preset listing.
//!
//! Every run builds its own [`AdService`] instances from presets,
//! drives them to completion, prints the results and returns.

mod format;

use std::sync::Arc;
use std::time::Duration;

use crate::cli::ProviderArg;
use crate::dispatcher::{AdService, DispatchConfig, DispatchError, RegistryStatus, ShowOutcome};
use crate::provider::presets;
use crate::provider::simulated::{LoadBehavior, ProviderStats, SimulatedProvider};
use crate::provider::ShowAbandoned;

/// Slot used by both banner networks in the walkthrough.
const BANNER_SLOT: &str = "Top-Banner-Ad";
/// Slot used by both interstitial networks in the walkthrough.
const INTERSTITIAL_SLOT: &str = "Full-Screen";

/// Demo error type.
#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    #[error("unknown provider preset {0:?}")]
    UnknownPreset(String),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    ShowAbandoned(#[from] ShowAbandoned),
}

/// Walk through the banner and interstitial flow.
///
/// Banner: `unity-ads` then `admob`. Interstitial: `dummy-one` then
/// `dummy-two`. Both are loaded concurrently, the banner is shown, the
/// interstitial is shown and destroyed once it finishes. A slot that
/// exhausts its providers is reported and skipped.
pub async fn walkthrough(
    success_rate: f64,
    seed: Option<u64>,
    config: DispatchConfig,
) -> Result<(), DemoError> {
    let behavior = LoadBehavior::Random { success_rate };

    let banner = AdService::spawn(config);
    let interstitial = AdService::spawn(config);
    for (i, name) in ["unity-ads", "admob"].into_iter().enumerate() {
        banner.add_provider(simulated(name, behavior, seed, i)?).await?;
    }
    for (i, name) in ["dummy-one", "dummy-two"].into_iter().enumerate() {
        let provider = simulated(name, behavior, seed, i + 2)?
            .with_show_duration(Duration::from_millis(250));
        interstitial.add_provider(provider).await?;
    }

    let (banner_load, interstitial_load) = futures::future::join(
        banner.load_ad(BANNER_SLOT),
        interstitial.load_ad(INTERSTITIAL_SLOT),
    )
    .await;

    match banner_load {
        Ok(loaded) => {
            format::print_loaded("Banner", &loaded);
            let outcome = banner.show_ad(BANNER_SLOT).await?;
            format::print_show("Banner", &outcome);
        }
        Err(e) => format::print_load_failed("Banner", &e),
    }

    match interstitial_load {
        Ok(loaded) => {
            format::print_loaded("Interstitial", &loaded);
            let outcome = interstitial.show_ad(INTERSTITIAL_SLOT).await?;
            format::print_show("Interstitial", &outcome);
            if let ShowOutcome::Showing { ticket, .. } = outcome {
                ticket.finished().await?;
                format::print_finished("Interstitial");
                interstitial.destroy_ad(INTERSTITIAL_SLOT).await?;
            }
        }
        Err(e) => format::print_load_failed("Interstitial", &e),
    }

    Ok(())
}

/// Final state of a simulation run.
#[derive(Debug)]
struct Report {
    status: RegistryStatus,
    /// Call counters keyed by registry index. Providers whose `init`
    /// failed have no entry.
    stats: Vec<(usize, Arc<ProviderStats>)>,
}

/// Run `loads` load → show → destroy cycles for one slot.
pub async fn simulate(
    providers: Vec<ProviderArg>,
    slot: String,
    loads: u32,
    latency: Duration,
    seed: Option<u64>,
    config: DispatchConfig,
) -> Result<(), DemoError> {
    let report = run_cycles(providers, slot, loads, latency, seed, config).await?;
    format::print_status(&report.status, &report.stats);
    Ok(())
}

async fn run_cycles(
    providers: Vec<ProviderArg>,
    slot: String,
    loads: u32,
    latency: Duration,
    seed: Option<u64>,
    config: DispatchConfig,
) -> Result<Report, DemoError> {
    let service = AdService::spawn(config);
    let mut stats = Vec::with_capacity(providers.len());
    for (i, arg) in providers.iter().enumerate() {
        let provider = simulated(&arg.preset, arg.behavior, seed, i)?.with_latency(latency);
        let counters = provider.stats();
        match service.add_provider(provider).await {
            Ok(index) => stats.push((index, counters)),
            Err(e) => tracing::warn!(preset = %arg.preset, error = %e, "skipping provider"),
        }
    }

    format::print_cycle_header();
    for cycle in 1..=loads {
        match service.load_ad(&slot).await {
            Ok(loaded) => {
                let shown = match service.show_ad(&slot).await? {
                    ShowOutcome::Showing { ticket, .. } => {
                        ticket.finished().await?;
                        true
                    }
                    ShowOutcome::NotReady { .. } => false,
                };
                if let Err(e) = service.destroy_ad(&slot).await {
                    tracing::warn!(error = %e, "destroy failed");
                }
                format::print_cycle(cycle, &loaded, shown);
            }
            Err(e @ DispatchError::Exhausted { .. }) => format::print_cycle_failed(cycle, &e),
            Err(e) => return Err(e.into()),
        }
    }

    let status = service.status().await?;
    Ok(Report { status, stats })
}

/// Print every preset with its slot table.
pub fn list_presets() {
    format::print_presets();
}

/// Build a preset provider; `seed` is offset by `index` so providers in
/// one chain draw different outcomes.
fn simulated(
    preset: &str,
    behavior: LoadBehavior,
    seed: Option<u64>,
    index: usize,
) -> Result<SimulatedProvider, DemoError> {
    let provider =
        presets::build(preset, behavior).ok_or_else(|| DemoError::UnknownPreset(preset.into()))?;
    Ok(match seed {
        Some(seed) => provider.with_seed(seed.wrapping_add(index as u64)),
        None => provider,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    fn config() -> DispatchConfig {
        DispatchConfig {
            max_rounds: NonZeroU32::new(1),
            load_timeout: Some(Duration::from_secs(1)),
        }
    }

    #[test]
    fn unknown_preset_is_rejected() {
        assert!(matches!(
            simulated("nope", LoadBehavior::Succeed, None, 0),
            Err(DemoError::UnknownPreset(name)) if name == "nope"
        ));
    }

    #[tokio::test]
    async fn walkthrough_completes_when_networks_always_fill() {
        walkthrough(1.0, Some(1), config()).await.unwrap();
    }

    #[tokio::test]
    async fn walkthrough_reports_exhaustion_without_failing() {
        walkthrough(0.0, Some(1), config()).await.unwrap();
    }

    #[tokio::test]
    async fn simulate_runs_every_cycle() {
        let providers = vec![
            "dummy-one=fail".parse().unwrap(),
            "dummy-two=flaky:1".parse().unwrap(),
        ];
        simulate(
            providers,
            "Full-Screen".into(),
            3,
            Duration::ZERO,
            None,
            config(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn repeated_preset_keeps_separate_counters() {
        let providers = vec![
            "dummy-one=fail".parse().unwrap(),
            "dummy-one".parse().unwrap(),
        ];
        let report = run_cycles(
            providers,
            "Full-Screen".into(),
            2,
            Duration::ZERO,
            None,
            config(),
        )
        .await
        .unwrap();

        assert_eq!(report.status.providers, ["dummy-one", "dummy-one"]);
        assert_eq!(report.status.cursor, 1);
        let [(first_index, first), (second_index, second)] = &report.stats[..] else {
            panic!("expected two providers, got {:?}", report.stats);
        };
        assert_eq!((*first_index, *second_index), (0, 1));
        assert_eq!((first.loads(), first.shows(), first.destroys()), (1, 0, 0));
        assert_eq!((second.loads(), second.shows(), second.destroys()), (2, 2, 2));
    }

    #[tokio::test]
    async fn simulate_rejects_unknown_preset() {
        let providers = vec!["mystery".parse().unwrap()];
        let err = simulate(
            providers,
            "Full-Screen".into(),
            1,
            Duration::ZERO,
            None,
            config(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DemoError::UnknownPreset(_)));
    }
}
