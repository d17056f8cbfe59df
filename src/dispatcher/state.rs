//! Dispatcher state — registry, in-flight loads, fallback rotation.
//!
//! All methods are synchronous state transitions. Waiting on load
//! tickets happens in the dispatcher loop; this module decides which
//! provider to try next and when to give up.

use std::collections::HashMap;
use std::fmt;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::provider::{AdProvider, LoadResult, LoadTicket};

use super::registry::{RegistryError, ServiceRegistry};
use super::{DispatchConfig, DispatchError, Loaded, RegistryStatus, ShowOutcome};

/// Identifier for one logical `load_ad` request across all its attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadId(Uuid);

impl LoadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LoadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LoadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Reply channel for a `load_ad` request.
pub type LoadReply = oneshot::Sender<Result<Loaded, DispatchError>>;

/// A load request waiting on its current attempt.
#[derive(Debug)]
struct PendingLoad {
    slot: String,
    reply: LoadReply,
    attempts: u32,
}

/// A provider load the dispatcher loop must wait on.
#[derive(Debug)]
pub struct Attempt {
    pub load_id: LoadId,
    /// Registry index of the provider that issued the ticket.
    pub provider_index: usize,
    pub ticket: LoadTicket,
}

/// Outcome of one attempt, reported back by its waiter task.
#[derive(Debug)]
pub struct LoadSettled {
    pub load_id: LoadId,
    pub provider_index: usize,
    pub outcome: LoadResult,
}

/// Dispatcher state — owned exclusively by the dispatcher loop.
#[derive(Debug)]
pub struct DispatcherState {
    registry: ServiceRegistry,
    pending: HashMap<LoadId, PendingLoad>,
    config: DispatchConfig,
}

impl DispatcherState {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            registry: ServiceRegistry::new(),
            pending: HashMap::new(),
            config,
        }
    }

    pub fn add_provider(&mut self, provider: Box<dyn AdProvider>) -> Result<usize, RegistryError> {
        let name = provider.name().to_string();
        match self.registry.add_provider(provider) {
            Ok(index) => {
                tracing::info!(provider = %name, index, "provider added");
                Ok(index)
            }
            Err(e) => {
                tracing::warn!(provider = %name, error = %e, "provider rejected");
                Err(e)
            }
        }
    }

    /// Start a `load_ad` request against the current provider.
    ///
    /// Replies immediately with `Empty` if no provider is registered.
    pub fn begin_load(&mut self, slot: String, reply: LoadReply) -> Option<Attempt> {
        if self.registry.is_empty() {
            let _ = reply.send(Err(RegistryError::Empty.into()));
            return None;
        }
        let load_id = LoadId::new();
        self.pending.insert(
            load_id,
            PendingLoad {
                slot,
                reply,
                attempts: 0,
            },
        );
        self.start_attempt(load_id)
    }

    /// Apply an attempt outcome.
    ///
    /// Success answers the caller. Failure rotates the registry and
    /// returns the next attempt, or answers `Exhausted` once the attempt
    /// budget is spent.
    pub fn settle(&mut self, settled: LoadSettled) -> Option<Attempt> {
        let LoadSettled {
            load_id,
            provider_index,
            outcome,
        } = settled;
        let provider = self
            .registry
            .name_at(provider_index)
            .unwrap_or_default()
            .to_string();

        let failure = match outcome {
            Ok(()) => {
                let pending = self.pending.remove(&load_id)?;
                tracing::info!(
                    %load_id,
                    slot = %pending.slot,
                    %provider,
                    attempts = pending.attempts,
                    "ad loaded"
                );
                let _ = pending.reply.send(Ok(Loaded {
                    slot: pending.slot,
                    provider,
                    cursor: provider_index,
                    attempts: pending.attempts,
                }));
                return None;
            }
            Err(failure) => failure,
        };

        let cursor = match self.registry.advance_from(provider_index) {
            Ok(cursor) => cursor,
            Err(e) => {
                let pending = self.pending.remove(&load_id)?;
                let _ = pending.reply.send(Err(e.into()));
                return None;
            }
        };

        let pending = self.pending.get(&load_id)?;
        tracing::warn!(
            %load_id,
            slot = %pending.slot,
            %provider,
            attempt = pending.attempts,
            error = %failure,
            next = cursor,
            "load failed, rotating provider"
        );

        if pending.reply.is_closed() {
            tracing::debug!(%load_id, "caller gone, dropping load");
            self.pending.remove(&load_id);
            return None;
        }

        if self
            .attempt_limit()
            .is_some_and(|limit| pending.attempts >= limit)
        {
            let pending = self.pending.remove(&load_id)?;
            tracing::warn!(
                %load_id,
                slot = %pending.slot,
                attempts = pending.attempts,
                "every provider failed to load"
            );
            let _ = pending.reply.send(Err(DispatchError::Exhausted {
                slot: pending.slot,
                attempts: pending.attempts,
                last: failure,
            }));
            return None;
        }

        self.start_attempt(load_id)
    }

    /// Show the current provider's ad for `slot` if it is ready.
    pub fn show(&mut self, slot: &str) -> Result<ShowOutcome, DispatchError> {
        let provider = self.registry.current_mut()?;
        let name = provider.name().to_string();
        if !provider.is_ready(slot) {
            tracing::debug!(slot, provider = %name, "show skipped, ad not ready");
            return Ok(ShowOutcome::NotReady { provider: name });
        }
        tracing::info!(slot, provider = %name, "showing ad");
        let ticket = provider.show(slot);
        Ok(ShowOutcome::Showing {
            provider: name,
            ticket,
        })
    }

    /// Release the current provider's ad unit for `slot`.
    pub fn destroy(&mut self, slot: &str) -> Result<(), DispatchError> {
        let provider = self.registry.current_mut()?;
        let name = provider.name().to_string();
        match provider.destroy(slot) {
            Ok(()) => {
                tracing::debug!(slot, provider = %name, "ad destroyed");
                Ok(())
            }
            Err(source) => {
                tracing::warn!(slot, provider = %name, error = %source, "destroy failed");
                Err(DispatchError::Destroy {
                    provider: name,
                    slot: slot.to_string(),
                    source,
                })
            }
        }
    }

    pub fn status(&self) -> RegistryStatus {
        RegistryStatus {
            providers: self.registry.names(),
            cursor: self.registry.cursor(),
            current: self.registry.current().ok().map(|p| p.name().to_string()),
            pending_loads: self.pending.len(),
        }
    }

    pub fn pending_loads(&self) -> usize {
        self.pending.len()
    }

    /// Issue the next provider load for a pending request.
    fn start_attempt(&mut self, load_id: LoadId) -> Option<Attempt> {
        let pending = self.pending.get_mut(&load_id)?;
        let provider_index = self.registry.cursor();
        let provider = match self.registry.current_mut() {
            Ok(provider) => provider,
            Err(e) => {
                let pending = self.pending.remove(&load_id)?;
                let _ = pending.reply.send(Err(e.into()));
                return None;
            }
        };

        pending.attempts += 1;
        tracing::debug!(
            %load_id,
            slot = %pending.slot,
            provider = provider.name(),
            cursor = provider_index,
            attempt = pending.attempts,
            "load attempt"
        );
        let ticket = provider.load(&pending.slot);
        Some(Attempt {
            load_id,
            provider_index,
            ticket,
        })
    }

    /// Total attempts allowed per request, or `None` for no limit.
    fn attempt_limit(&self) -> Option<u32> {
        let providers = u32::try_from(self.registry.len()).unwrap_or(u32::MAX);
        self.config
            .max_rounds
            .map(|rounds| rounds.get().saturating_mul(providers))
    }
}
