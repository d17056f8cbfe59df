//! Simulated ad network.
//!
//! Stands in for a real SDK integration in the walkthrough and in
//! tests. All state is owned by the instance: two simulated providers,
//! or two services using the same preset, never see each other's
//! readiness or completers.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{
    AdProvider, LoadCompleter, LoadFailure, LoadTicket, ProviderError, ShowTicket, TokenTable,
};

/// How a simulated provider answers load requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadBehavior {
    /// Every load succeeds.
    Succeed,
    /// Every load is rejected.
    Fail,
    /// Each load succeeds with the given probability.
    Random { success_rate: f64 },
    /// The first `failures` loads are rejected, later ones succeed.
    Flaky { failures: u32 },
    /// Loads never settle.
    Hang,
}

impl FromStr for LoadBehavior {
    type Err = String;

    /// Accepts `ok`, `fail`, `hang`, `flaky:N`, or a success rate in `[0, 1]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(Self::Succeed),
            "fail" => Ok(Self::Fail),
            "hang" => Ok(Self::Hang),
            _ => {
                if let Some(n) = s.strip_prefix("flaky:") {
                    let failures = n
                        .parse::<u32>()
                        .map_err(|_| format!("invalid flaky failure count: {n:?}"))?;
                    return Ok(Self::Flaky { failures });
                }
                let rate = s
                    .parse::<f64>()
                    .map_err(|_| format!("unknown load behavior: {s:?}"))?;
                if !(0.0..=1.0).contains(&rate) {
                    return Err(format!("success rate out of range: {rate}"));
                }
                Ok(Self::Random { success_rate: rate })
            }
        }
    }
}

/// Call counters for one provider instance.
#[derive(Debug, Default)]
pub struct ProviderStats {
    loads: AtomicU32,
    shows: AtomicU32,
    destroys: AtomicU32,
}

impl ProviderStats {
    pub fn loads(&self) -> u32 {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn shows(&self) -> u32 {
        self.shows.load(Ordering::Relaxed)
    }

    pub fn destroys(&self) -> u32 {
        self.destroys.load(Ordering::Relaxed)
    }
}

/// A loaded (or loading) ad unit for one slot.
///
/// `ready` is set only once a successful load has been delivered to a
/// waiting ticket, so a load still in flight or one the caller gave up
/// on never reads as ready.
#[derive(Debug)]
struct AdUnit {
    unit_id: String,
    ready: Arc<AtomicBool>,
}

impl AdUnit {
    fn new(unit_id: String) -> Self {
        Self {
            unit_id,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// In-process ad network with configurable load behavior.
#[derive(Debug)]
pub struct SimulatedProvider {
    name: String,
    seed_tokens: Vec<(String, String)>,
    /// `None` until `init`.
    tokens: Option<TokenTable>,
    units: HashMap<String, AdUnit>,
    /// Completers held by `Hang` loads. A newer load on the same slot
    /// drops the older completer.
    pending: HashMap<String, LoadCompleter>,
    behavior: LoadBehavior,
    latency: Duration,
    show_duration: Duration,
    rng: StdRng,
    stats: Arc<ProviderStats>,
}

impl SimulatedProvider {
    pub fn new(name: impl Into<String>, behavior: LoadBehavior) -> Self {
        Self {
            name: name.into(),
            seed_tokens: Vec::new(),
            tokens: None,
            units: HashMap::new(),
            pending: HashMap::new(),
            behavior,
            latency: Duration::ZERO,
            show_duration: Duration::ZERO,
            rng: StdRng::from_entropy(),
            stats: Arc::new(ProviderStats::default()),
        }
    }

    /// Slot registered during `init`.
    pub fn with_token(mut self, slot: &str, unit_id: &str) -> Self {
        self.seed_tokens.push((slot.to_string(), unit_id.to_string()));
        self
    }

    /// Delay before a load settles.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Delay between `show` and the finish signal.
    pub fn with_show_duration(mut self, duration: Duration) -> Self {
        self.show_duration = duration;
        self
    }

    /// Deterministic outcomes for `Random` behavior.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Shared handle to this instance's call counters.
    pub fn stats(&self) -> Arc<ProviderStats> {
        Arc::clone(&self.stats)
    }

    fn decide(&mut self, attempt: u32) -> Option<bool> {
        match self.behavior {
            LoadBehavior::Succeed => Some(true),
            LoadBehavior::Fail => Some(false),
            LoadBehavior::Random { success_rate } => {
                Some(self.rng.gen_bool(success_rate.clamp(0.0, 1.0)))
            }
            LoadBehavior::Flaky { failures } => Some(attempt > failures),
            LoadBehavior::Hang => None,
        }
    }
}

impl AdProvider for SimulatedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self) -> Result<(), ProviderError> {
        if self.tokens.is_some() {
            return Err(ProviderError::AlreadyInitialized);
        }
        self.tokens = Some(TokenTable::strict());
        for (slot, unit_id) in self.seed_tokens.clone() {
            if let Err(e) = self.add_token(&slot, &unit_id) {
                self.tokens = None;
                return Err(e);
            }
        }
        let slots = self.tokens.as_ref().map_or(0, TokenTable::len);
        tracing::debug!(provider = %self.name, slots, "provider initialized");
        Ok(())
    }

    fn add_token(&mut self, slot: &str, unit_id: &str) -> Result<(), ProviderError> {
        self.tokens
            .as_mut()
            .ok_or(ProviderError::NotInitialized)?
            .insert(slot, unit_id)
    }

    fn load(&mut self, slot: &str) -> LoadTicket {
        let attempt = self.stats.loads.fetch_add(1, Ordering::Relaxed) + 1;

        let Some(tokens) = self.tokens.as_ref() else {
            return LoadTicket::settled(Err(ProviderError::NotInitialized.into()));
        };
        let Some(unit_id) = tokens.unit(slot).map(str::to_string) else {
            return LoadTicket::settled(Err(ProviderError::UnknownSlot(slot.to_string()).into()));
        };

        tracing::debug!(provider = %self.name, slot, unit_id = %unit_id, "loading");
        let (completer, ticket) = LoadTicket::channel();

        let unit = AdUnit::new(unit_id);
        let ready = Arc::clone(&unit.ready);
        self.units.insert(slot.to_string(), unit);

        let Some(success) = self.decide(attempt) else {
            if self.pending.insert(slot.to_string(), completer).is_some() {
                tracing::debug!(provider = %self.name, slot, "pending load replaced");
            }
            return ticket;
        };

        self.pending.remove(slot);

        if self.latency.is_zero() {
            settle(completer, success, &ready, &self.name);
        } else {
            let latency = self.latency;
            let name = self.name.clone();
            tokio::spawn(async move {
                tokio::time::sleep(latency).await;
                settle(completer, success, &ready, &name);
            });
        }
        ticket
    }

    fn is_ready(&self, slot: &str) -> bool {
        self.units
            .get(slot)
            .is_some_and(|u| u.ready.load(Ordering::Acquire))
    }

    fn show(&mut self, slot: &str) -> ShowTicket {
        self.stats.shows.fetch_add(1, Ordering::Relaxed);
        if let Some(unit) = self.units.get(slot) {
            tracing::debug!(provider = %self.name, slot, unit_id = %unit.unit_id, "showing");
        }

        let (completer, ticket) = ShowTicket::channel();
        if self.show_duration.is_zero() {
            completer.finished();
        } else {
            let duration = self.show_duration;
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                completer.finished();
            });
        }
        ticket
    }

    fn destroy(&mut self, slot: &str) -> Result<(), ProviderError> {
        self.stats.destroys.fetch_add(1, Ordering::Relaxed);
        let tokens = self.tokens.as_ref().ok_or(ProviderError::NotInitialized)?;
        if !tokens.contains(slot) {
            return Err(ProviderError::UnknownSlot(slot.to_string()));
        }
        self.pending.remove(slot);
        if self.units.remove(slot).is_some() {
            tracing::debug!(provider = %self.name, slot, "unit released");
        }
        Ok(())
    }
}

fn settle(completer: LoadCompleter, success: bool, ready: &AtomicBool, provider: &str) {
    if success {
        if completer.loaded() {
            ready.store(true, Ordering::Release);
        } else {
            tracing::debug!(provider, "load finished after the caller stopped waiting");
        }
    } else {
        completer.failed(LoadFailure::Rejected(format!("{provider} has no fill")));
    }
}
