//! Ad provider capability contract.
//!
//! Every ad-network integration implements [`AdProvider`]. Completion is
//! signalled through one-shot tickets instead of stored callbacks:
//! `load` hands back a [`LoadTicket`] that resolves exactly once with the
//! outcome, `show` hands back a [`ShowTicket`] that resolves when the ad
//! is dismissed. The provider side keeps the matching completer, and
//! completers are consumed on use, so a ticket can never fire twice.

pub mod presets;
pub mod simulated;

use std::collections::HashMap;

use tokio::sync::oneshot;

/// Provider-level errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("provider not initialized")]
    NotInitialized,
    #[error("provider already initialized")]
    AlreadyInitialized,
    #[error("slot {0:?} already has a unit")]
    DuplicateToken(String),
    #[error("no unit registered for slot {0:?}")]
    UnknownSlot(String),
}

/// Why a single load attempt did not produce an ad.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadFailure {
    #[error("load rejected: {0}")]
    Rejected(String),
    #[error("load timed out")]
    TimedOut,
    #[error("provider dropped the load ticket")]
    Abandoned,
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Outcome delivered through a [`LoadTicket`].
pub type LoadResult = Result<(), LoadFailure>;

/// The show ticket's completer was dropped before the ad finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("provider dropped the show ticket")]
pub struct ShowAbandoned;

/// Capability set every ad network integration satisfies.
///
/// `init` is called exactly once by the registry before any other
/// operation. Callers must check `is_ready` before `show`.
pub trait AdProvider: Send {
    /// Short name used in logs and status output.
    fn name(&self) -> &str;

    /// Populate the token table and perform SDK setup.
    fn init(&mut self) -> Result<(), ProviderError>;

    /// Register a slot → unit mapping.
    fn add_token(&mut self, slot: &str, unit_id: &str) -> Result<(), ProviderError>;

    /// Start loading the unit mapped to `slot`.
    ///
    /// Never fails synchronously: precondition errors come back as an
    /// already-settled failed ticket.
    fn load(&mut self, slot: &str) -> LoadTicket;

    /// Non-blocking readiness check. Must not have side effects.
    fn is_ready(&self, slot: &str) -> bool;

    /// Display the loaded ad for `slot`.
    fn show(&mut self, slot: &str) -> ShowTicket;

    /// Release the ad unit for `slot`. Safe to call when nothing is loaded.
    fn destroy(&mut self, slot: &str) -> Result<(), ProviderError>;
}

// -- Tickets --

/// Caller side of a load: resolves exactly once.
#[derive(Debug)]
pub struct LoadTicket {
    rx: oneshot::Receiver<LoadResult>,
}

/// Provider side of a load.
#[derive(Debug)]
pub struct LoadCompleter {
    tx: oneshot::Sender<LoadResult>,
}

impl LoadTicket {
    /// Create a linked completer/ticket pair.
    pub fn channel() -> (LoadCompleter, LoadTicket) {
        let (tx, rx) = oneshot::channel();
        (LoadCompleter { tx }, LoadTicket { rx })
    }

    /// A ticket that is already settled with `result`.
    pub fn settled(result: LoadResult) -> Self {
        let (completer, ticket) = Self::channel();
        completer.complete(result);
        ticket
    }

    /// Wait for the outcome. A dropped completer counts as a failure.
    pub async fn outcome(self) -> LoadResult {
        self.rx.await.unwrap_or(Err(LoadFailure::Abandoned))
    }
}

impl LoadCompleter {
    /// Settle as loaded. Returns `false` if nobody is waiting anymore.
    pub fn loaded(self) -> bool {
        self.complete(Ok(()))
    }

    pub fn failed(self, failure: LoadFailure) {
        self.complete(Err(failure));
    }

    /// Deliver `result`. Returns `false` if the ticket was dropped,
    /// e.g. because the dispatcher stopped waiting after a timeout.
    pub fn complete(self, result: LoadResult) -> bool {
        self.tx.send(result).is_ok()
    }
}

/// Caller side of a show: resolves when the ad is dismissed.
#[derive(Debug)]
pub struct ShowTicket {
    rx: oneshot::Receiver<()>,
}

/// Provider side of a show.
#[derive(Debug)]
pub struct ShowCompleter {
    tx: oneshot::Sender<()>,
}

impl ShowTicket {
    pub fn channel() -> (ShowCompleter, ShowTicket) {
        let (tx, rx) = oneshot::channel();
        (ShowCompleter { tx }, ShowTicket { rx })
    }

    /// Wait until the ad is dismissed or completed.
    pub async fn finished(self) -> Result<(), ShowAbandoned> {
        self.rx.await.map_err(|_| ShowAbandoned)
    }
}

impl ShowCompleter {
    pub fn finished(self) {
        let _ = self.tx.send(());
    }
}

// -- Token table --

/// Slot name → provider-specific unit identifier.
///
/// Populated during `init`. In strict mode a slot can be registered
/// once; lenient mode replaces the previous unit.
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    units: HashMap<String, String>,
    lenient: bool,
}

impl TokenTable {
    pub fn strict() -> Self {
        Self::default()
    }

    #[allow(dead_code)]
    pub fn lenient() -> Self {
        Self {
            units: HashMap::new(),
            lenient: true,
        }
    }

    /// Register a slot. Returns `DuplicateToken` in strict mode if the
    /// slot is already mapped.
    pub fn insert(&mut self, slot: &str, unit_id: &str) -> Result<(), ProviderError> {
        if !self.lenient && self.units.contains_key(slot) {
            return Err(ProviderError::DuplicateToken(slot.to_string()));
        }
        self.units.insert(slot.to_string(), unit_id.to_string());
        Ok(())
    }

    pub fn unit(&self, slot: &str) -> Option<&str> {
        self.units.get(slot).map(String::as_str)
    }

    pub fn contains(&self, slot: &str) -> bool {
        self.units.contains_key(slot)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
