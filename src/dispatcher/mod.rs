//! Ad dispatcher — load, show and destroy against the current provider,
//! with fallback rotation when a load fails.
//!
//! Architecture: channel-based actor. A single dispatcher task owns all
//! mutable state ([`state::DispatcherState`]): the provider registry and
//! the table of in-flight loads. [`AdService`] handles forward commands
//! over an mpsc channel and wait on a oneshot reply.
//!
//! Each load attempt is awaited by its own waiter task, which reports
//! the outcome back to the loop over a settle channel. On failure the
//! loop advances the registry cursor and issues the next attempt, so
//! retrying is a loop over messages rather than recursion, and the
//! dispatcher keeps serving show/destroy requests while loads are out.

pub mod registry;
pub mod state;

use std::num::NonZeroU32;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use registry::RegistryError;
use state::{Attempt, DispatcherState, LoadReply, LoadSettled};

use crate::provider::{AdProvider, LoadFailure, ProviderError, ShowTicket};

/// Dispatcher tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Full passes over the registry before a load gives up.
    /// `None` retries forever.
    pub max_rounds: Option<NonZeroU32>,
    /// Per-attempt limit on waiting for a provider to settle a load.
    pub load_timeout: Option<Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_rounds: NonZeroU32::new(1),
            load_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Dispatcher errors surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("no provider could load {slot:?} after {attempts} attempts (last: {last})")]
    Exhausted {
        slot: String,
        attempts: u32,
        last: LoadFailure,
    },
    #[error("provider {provider} failed to destroy {slot:?}: {source}")]
    Destroy {
        provider: String,
        slot: String,
        source: ProviderError,
    },
    #[error("dispatcher stopped")]
    DispatcherGone,
    #[error("response channel closed")]
    ResponseDropped,
}

/// A successful `load_ad`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded {
    pub slot: String,
    /// Provider that served the ad.
    pub provider: String,
    /// Registry index of that provider.
    pub cursor: usize,
    /// Provider loads issued for this request, including the successful one.
    pub attempts: u32,
}

/// Result of `show_ad`.
#[derive(Debug)]
pub enum ShowOutcome {
    /// The ad is on screen; the ticket resolves when it is dismissed.
    Showing { provider: String, ticket: ShowTicket },
    /// The current provider has nothing ready for the slot. Nothing was
    /// shown and no finish signal will follow.
    NotReady { provider: String },
}

/// Snapshot of the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStatus {
    /// Provider names in priority order.
    pub providers: Vec<String>,
    pub cursor: usize,
    /// Name of the provider at the cursor.
    pub current: Option<String>,
    pub pending_loads: usize,
}

/// Command sent from an [`AdService`] handle to the dispatcher loop.
enum Command {
    AddProvider {
        provider: Box<dyn AdProvider>,
        reply: oneshot::Sender<Result<usize, RegistryError>>,
    },
    Load {
        slot: String,
        reply: LoadReply,
    },
    Show {
        slot: String,
        reply: oneshot::Sender<Result<ShowOutcome, DispatchError>>,
    },
    Destroy {
        slot: String,
        reply: oneshot::Sender<Result<(), DispatchError>>,
    },
    Status {
        reply: oneshot::Sender<RegistryStatus>,
    },
}

/// Handle to a running dispatcher. Cheap to clone.
///
/// The dispatcher task stops once every handle is dropped.
#[derive(Debug, Clone)]
pub struct AdService {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl AdService {
    /// Spawn a dispatcher task on the current tokio runtime.
    pub fn spawn(config: DispatchConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(config, cmd_rx));
        Self { cmd_tx }
    }

    /// Initialize `provider` and append it to the registry.
    ///
    /// Returns the provider's index. A provider whose `init` fails is
    /// not added.
    pub async fn add_provider(
        &self,
        provider: impl AdProvider + 'static,
    ) -> Result<usize, DispatchError> {
        let provider: Box<dyn AdProvider> = Box::new(provider);
        Ok(self
            .request(|reply| Command::AddProvider { provider, reply })
            .await??)
    }

    /// Load an ad for `slot`, rotating through providers on failure.
    ///
    /// # Errors
    ///
    /// `Registry(Empty)` if no provider is registered, `Exhausted` once
    /// the configured number of rounds has failed. With unbounded rounds
    /// this only returns on success.
    pub async fn load_ad(&self, slot: &str) -> Result<Loaded, DispatchError> {
        self.request(|reply| Command::Load {
            slot: slot.to_string(),
            reply,
        })
        .await?
    }

    /// Show the current provider's ad for `slot` if it is ready.
    pub async fn show_ad(&self, slot: &str) -> Result<ShowOutcome, DispatchError> {
        self.request(|reply| Command::Show {
            slot: slot.to_string(),
            reply,
        })
        .await?
    }

    /// Release the current provider's ad unit for `slot`.
    ///
    /// Provider failures come back as `Destroy`; the dispatcher keeps
    /// running.
    pub async fn destroy_ad(&self, slot: &str) -> Result<(), DispatchError> {
        self.request(|reply| Command::Destroy {
            slot: slot.to_string(),
            reply,
        })
        .await?
    }

    pub async fn status(&self) -> Result<RegistryStatus, DispatchError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Send a command to the dispatcher loop and wait for the reply.
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, DispatchError> {
        let (reply, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(command(reply))
            .map_err(|_| DispatchError::DispatcherGone)?;
        reply_rx.await.map_err(|_| DispatchError::ResponseDropped)
    }
}

/// Dispatcher loop. Runs until every [`AdService`] handle is dropped.
async fn run(config: DispatchConfig, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
    let (settle_tx, mut settle_rx) = mpsc::unbounded_channel::<LoadSettled>();
    let load_timeout = config.load_timeout;
    let mut state = DispatcherState::new(config);

    tracing::debug!(?config, "dispatcher started");

    loop {
        tokio::select! {
            // -- Request from a handle --
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                if let Some(attempt) = handle_command(&mut state, cmd) {
                    spawn_waiter(attempt, load_timeout, &settle_tx);
                }
            }

            // -- Load attempt settled --
            Some(settled) = settle_rx.recv() => {
                if let Some(attempt) = state.settle(settled) {
                    spawn_waiter(attempt, load_timeout, &settle_tx);
                }
            }
        }
    }

    tracing::debug!(pending = state.pending_loads(), "dispatcher stopped");
}

fn handle_command(state: &mut DispatcherState, cmd: Command) -> Option<Attempt> {
    match cmd {
        Command::AddProvider { provider, reply } => {
            let _ = reply.send(state.add_provider(provider));
            None
        }
        Command::Load { slot, reply } => state.begin_load(slot, reply),
        Command::Show { slot, reply } => {
            let _ = reply.send(state.show(&slot));
            None
        }
        Command::Destroy { slot, reply } => {
            let _ = reply.send(state.destroy(&slot));
            None
        }
        Command::Status { reply } => {
            let _ = reply.send(state.status());
            None
        }
    }
}

/// Wait on one attempt's ticket, bounded by `load_timeout`, and report
/// the outcome to the loop.
fn spawn_waiter(
    attempt: Attempt,
    load_timeout: Option<Duration>,
    settle_tx: &mpsc::UnboundedSender<LoadSettled>,
) {
    let settle_tx = settle_tx.clone();
    tokio::spawn(async move {
        let Attempt {
            load_id,
            provider_index,
            ticket,
        } = attempt;
        let outcome = match load_timeout {
            Some(limit) => tokio::time::timeout(limit, ticket.outcome())
                .await
                .unwrap_or(Err(LoadFailure::TimedOut)),
            None => ticket.outcome().await,
        };
        // Loop gone means shutdown; nothing left to report to.
        let _ = settle_tx.send(LoadSettled {
            load_id,
            provider_index,
            outcome,
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::presets;
    use crate::provider::simulated::{LoadBehavior, SimulatedProvider};

    const BANNER: &str = "Top-Banner-Ad";

    fn sim(name: &str, behavior: LoadBehavior) -> SimulatedProvider {
        SimulatedProvider::new(name, behavior).with_token(BANNER, "1234567")
    }

    fn bounded(rounds: u32) -> DispatchConfig {
        DispatchConfig {
            max_rounds: NonZeroU32::new(rounds),
            load_timeout: Some(Duration::from_secs(5)),
        }
    }

    #[tokio::test]
    async fn fallback_scenario_x_fails_y_succeeds() {
        let service = AdService::spawn(bounded(1));
        let x = sim("provider-x", LoadBehavior::Fail);
        let y = sim("provider-y", LoadBehavior::Succeed);
        let (x_stats, y_stats) = (x.stats(), y.stats());
        service.add_provider(x).await.unwrap();
        service.add_provider(y).await.unwrap();

        let loaded = service.load_ad(BANNER).await.unwrap();
        assert_eq!(loaded.provider, "provider-y");
        assert_eq!(loaded.cursor, 1);
        assert_eq!(loaded.attempts, 2);
        assert_eq!(x_stats.loads(), 1);
        assert_eq!(y_stats.loads(), 1);

        let status = service.status().await.unwrap();
        assert_eq!(status.cursor, 1);
        assert_eq!(status.pending_loads, 0);

        // Subsequent requests start at provider-y.
        service.load_ad(BANNER).await.unwrap();
        assert_eq!(x_stats.loads(), 1);
        assert_eq!(y_stats.loads(), 2);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_terminal_failure() {
        let service = AdService::spawn(bounded(1));
        service.add_provider(sim("a", LoadBehavior::Fail)).await.unwrap();
        service.add_provider(sim("b", LoadBehavior::Fail)).await.unwrap();

        let err = service.load_ad(BANNER).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Exhausted {
                attempts: 2,
                last: LoadFailure::Rejected(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn hanging_provider_times_out_and_falls_back() {
        let service = AdService::spawn(DispatchConfig {
            max_rounds: NonZeroU32::new(1),
            load_timeout: Some(Duration::from_millis(50)),
        });
        service.add_provider(sim("silent", LoadBehavior::Hang)).await.unwrap();
        service.add_provider(sim("live", LoadBehavior::Succeed)).await.unwrap();

        let loaded = service.load_ad(BANNER).await.unwrap();
        assert_eq!(loaded.provider, "live");
        assert_eq!(loaded.attempts, 2);
    }

    #[tokio::test]
    async fn timeout_counts_as_last_failure() {
        let service = AdService::spawn(DispatchConfig {
            max_rounds: NonZeroU32::new(1),
            load_timeout: Some(Duration::from_millis(20)),
        });
        service.add_provider(sim("silent", LoadBehavior::Hang)).await.unwrap();

        let err = service.load_ad(BANNER).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Exhausted {
                last: LoadFailure::TimedOut,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn instant_failures_do_not_grow_the_stack() {
        let service = AdService::spawn(DispatchConfig {
            max_rounds: None,
            load_timeout: None,
        });
        service.add_provider(sim("a", LoadBehavior::Fail)).await.unwrap();
        service
            .add_provider(sim("b", LoadBehavior::Flaky { failures: 5_000 }))
            .await
            .unwrap();

        let loaded = service.load_ad(BANNER).await.unwrap();
        assert_eq!(loaded.provider, "b");
        assert_eq!(loaded.attempts, 10_002);
    }

    #[tokio::test]
    async fn timed_out_load_is_not_shown() {
        let service = AdService::spawn(DispatchConfig {
            max_rounds: NonZeroU32::new(1),
            load_timeout: Some(Duration::from_millis(50)),
        });
        let slow = sim("slow", LoadBehavior::Succeed).with_latency(Duration::from_millis(200));
        let stats = slow.stats();
        service.add_provider(slow).await.unwrap();

        assert!(matches!(
            service.load_ad(BANNER).await,
            Err(DispatchError::Exhausted {
                last: LoadFailure::TimedOut,
                ..
            })
        ));
        assert!(matches!(
            service.show_ad(BANNER).await.unwrap(),
            ShowOutcome::NotReady { .. }
        ));

        // The late success finds no waiter and leaves the unit unready.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(matches!(
            service.show_ad(BANNER).await.unwrap(),
            ShowOutcome::NotReady { .. }
        ));
        assert_eq!(stats.shows(), 0);
    }

    #[tokio::test]
    async fn empty_registry_rejects_every_operation() {
        let service = AdService::spawn(DispatchConfig::default());
        assert!(matches!(
            service.load_ad(BANNER).await,
            Err(DispatchError::Registry(RegistryError::Empty))
        ));
        assert!(matches!(
            service.show_ad(BANNER).await,
            Err(DispatchError::Registry(RegistryError::Empty))
        ));
        assert!(matches!(
            service.destroy_ad(BANNER).await,
            Err(DispatchError::Registry(RegistryError::Empty))
        ));
    }

    #[tokio::test]
    async fn failed_init_is_reported_and_skipped() {
        let service = AdService::spawn(DispatchConfig::default());
        let dup = sim("dup", LoadBehavior::Succeed).with_token(BANNER, "other");
        assert!(matches!(
            service.add_provider(dup).await,
            Err(DispatchError::Registry(RegistryError::Init { .. }))
        ));
        assert!(service.status().await.unwrap().providers.is_empty());
    }

    #[tokio::test]
    async fn show_not_ready_then_ready() {
        let service = AdService::spawn(bounded(1));
        let p = sim("p", LoadBehavior::Succeed).with_show_duration(Duration::from_millis(10));
        let stats = p.stats();
        service.add_provider(p).await.unwrap();

        assert!(matches!(
            service.show_ad(BANNER).await.unwrap(),
            ShowOutcome::NotReady { .. }
        ));
        assert_eq!(stats.shows(), 0);

        service.load_ad(BANNER).await.unwrap();
        match service.show_ad(BANNER).await.unwrap() {
            ShowOutcome::Showing { provider, ticket } => {
                assert_eq!(provider, "p");
                ticket.finished().await.unwrap();
            }
            other => panic!("expected Showing, got {other:?}"),
        }
        assert_eq!(stats.shows(), 1);
    }

    #[tokio::test]
    async fn destroy_is_idempotent_and_failures_are_non_fatal() {
        let service = AdService::spawn(bounded(1));
        service.add_provider(sim("p", LoadBehavior::Succeed)).await.unwrap();

        service.destroy_ad(BANNER).await.unwrap();
        service.destroy_ad(BANNER).await.unwrap();

        assert!(matches!(
            service.destroy_ad("Full-Screen").await,
            Err(DispatchError::Destroy { .. })
        ));
        // Still serving.
        assert!(service.load_ad(BANNER).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_loads_for_different_slots() {
        let service = AdService::spawn(bounded(1));
        let banner = presets::build("admob", LoadBehavior::Succeed)
            .unwrap()
            .with_latency(Duration::from_millis(20));
        service.add_provider(banner).await.unwrap();

        let results = futures::future::join_all(
            ["Top-Banner-Ad", "Bottom-Banner-Ad"].map(|slot| service.load_ad(slot)),
        )
        .await;
        for r in results {
            assert_eq!(r.unwrap().provider, "admob");
        }
    }

    #[tokio::test]
    async fn shows_are_served_while_a_load_is_pending() {
        let service = AdService::spawn(bounded(1));
        let p = presets::build("unity-ads", LoadBehavior::Succeed)
            .unwrap()
            .with_latency(Duration::from_millis(500));
        service.add_provider(p).await.unwrap();
        service.load_ad("Top-Banner-Ad").await.unwrap();

        let slow = service.clone();
        let pending = tokio::spawn(async move { slow.load_ad("Bottom-Banner-Ad").await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(matches!(
            service.show_ad("Top-Banner-Ad").await.unwrap(),
            ShowOutcome::Showing { .. }
        ));
        assert!(!pending.is_finished());
        assert_eq!(service.status().await.unwrap().pending_loads, 1);
        assert!(pending.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn independent_services_do_not_interfere() {
        let first = AdService::spawn(bounded(1));
        let second = AdService::spawn(bounded(1));
        for service in [&first, &second] {
            service
                .add_provider(presets::build("dummy-one", LoadBehavior::Fail).unwrap())
                .await
                .unwrap();
            service
                .add_provider(presets::build("dummy-two", LoadBehavior::Succeed).unwrap())
                .await
                .unwrap();
        }

        first.load_ad("Full-Screen").await.unwrap();
        assert_eq!(first.status().await.unwrap().cursor, 1);
        assert_eq!(second.status().await.unwrap().cursor, 0);
        assert!(matches!(
            second.show_ad("Full-Screen").await.unwrap(),
            ShowOutcome::NotReady { .. }
        ));
    }
}
