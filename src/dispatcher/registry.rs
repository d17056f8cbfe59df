//! Service registry — ordered provider list with a rotating cursor.
//!
//! Insertion order is priority order. The cursor starts at 0 and only
//! moves on load failure, wrapping modulo the provider count. Providers
//! are never removed once added.

use crate::provider::{AdProvider, ProviderError};

/// Registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no ad providers registered")]
    Empty,
    #[error("provider {name} failed to initialize: {source}")]
    Init {
        name: String,
        source: ProviderError,
    },
}

/// Ordered providers plus the index of the current one.
#[derive(Default)]
pub struct ServiceRegistry {
    providers: Vec<Box<dyn AdProvider>>,
    cursor: usize,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("providers", &self.names())
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize `provider` and append it.
    ///
    /// Returns the provider's index. If `init` fails the provider is
    /// dropped and the registry is unchanged.
    pub fn add_provider(
        &mut self,
        mut provider: Box<dyn AdProvider>,
    ) -> Result<usize, RegistryError> {
        provider.init().map_err(|source| RegistryError::Init {
            name: provider.name().to_string(),
            source,
        })?;
        self.providers.push(provider);
        Ok(self.providers.len() - 1)
    }

    /// The provider at the cursor.
    pub fn current(&self) -> Result<&dyn AdProvider, RegistryError> {
        let provider: &dyn AdProvider =
            &**self.providers.get(self.cursor).ok_or(RegistryError::Empty)?;
        Ok(provider)
    }

    /// Mutable access to the provider at the cursor.
    pub fn current_mut(&mut self) -> Result<&mut dyn AdProvider, RegistryError> {
        let provider: &mut dyn AdProvider =
            &mut **self.providers.get_mut(self.cursor).ok_or(RegistryError::Empty)?;
        Ok(provider)
    }

    /// Move the cursor to the next provider, wrapping to the first.
    ///
    /// Returns the new cursor.
    pub fn advance(&mut self) -> Result<usize, RegistryError> {
        if self.providers.is_empty() {
            return Err(RegistryError::Empty);
        }
        self.cursor = (self.cursor + 1) % self.providers.len();
        Ok(self.cursor)
    }

    /// Advance only if the cursor still points at `index`.
    ///
    /// A failure reported against a provider that is no longer current
    /// (another request already rotated past it) leaves the cursor
    /// alone. Returns the cursor after the call.
    pub fn advance_from(&mut self, index: usize) -> Result<usize, RegistryError> {
        if self.providers.is_empty() {
            return Err(RegistryError::Empty);
        }
        if self.cursor == index {
            self.advance()
        } else {
            Ok(self.cursor)
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Name of the provider at `index`.
    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.providers.get(index).map(|p| p.name())
    }

    /// Provider names in priority order.
    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::simulated::{LoadBehavior, SimulatedProvider};

    fn sim(name: &str) -> Box<dyn AdProvider> {
        Box::new(SimulatedProvider::new(name, LoadBehavior::Succeed).with_token("Full-Screen", "1"))
    }

    fn registry(n: usize) -> ServiceRegistry {
        let mut r = ServiceRegistry::new();
        for i in 0..n {
            r.add_provider(sim(&format!("p{i}"))).unwrap();
        }
        r
    }

    #[test]
    fn add_preserves_insertion_order() {
        let r = registry(3);
        assert_eq!(r.names(), vec!["p0", "p1", "p2"]);
        assert_eq!(r.cursor(), 0);
        assert_eq!(r.current().unwrap().name(), "p0");
    }

    #[test]
    fn add_initializes_provider() {
        let mut r = ServiceRegistry::new();
        r.add_provider(sim("p0")).unwrap();
        // A second init would fail, so the registry must have run the first.
        assert!(r.current_mut().unwrap().add_token("Top-Banner-Ad", "2").is_ok());
    }

    #[test]
    fn failed_init_is_not_added() {
        let mut r = registry(1);
        let bad = SimulatedProvider::new("bad", LoadBehavior::Succeed)
            .with_token("Full-Screen", "1")
            .with_token("Full-Screen", "2");
        let err = r.add_provider(Box::new(bad)).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Init { ref name, source: ProviderError::DuplicateToken(_) } if name == "bad"
        ));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn empty_registry_errors() {
        let mut r = ServiceRegistry::new();
        assert!(r.is_empty());
        assert!(matches!(r.current(), Err(RegistryError::Empty)));
        assert!(matches!(r.current_mut(), Err(RegistryError::Empty)));
        assert!(matches!(r.advance(), Err(RegistryError::Empty)));
        assert!(matches!(r.advance_from(0), Err(RegistryError::Empty)));
    }

    #[test]
    fn default_registry_is_empty_at_cursor_zero() {
        let r = ServiceRegistry::default();
        assert!(r.is_empty());
        assert_eq!(r.cursor(), 0);
    }

    #[test]
    fn advance_wraps() {
        let mut r = registry(3);
        assert_eq!(r.advance().unwrap(), 1);
        assert_eq!(r.advance().unwrap(), 2);
        assert_eq!(r.advance().unwrap(), 0);
        assert_eq!(r.current().unwrap().name(), "p0");
    }

    #[test]
    fn k_advances_land_on_start_plus_k_mod_n() {
        for n in 1..=5 {
            for start in 0..n {
                for k in 0..(3 * n) {
                    let mut r = registry(n);
                    for _ in 0..start {
                        r.advance().unwrap();
                    }
                    for _ in 0..k {
                        r.advance().unwrap();
                    }
                    assert_eq!(r.cursor(), (start + k) % n, "n={n} start={start} k={k}");
                }
            }
        }
    }

    #[test]
    fn single_provider_advance_stays_put() {
        let mut r = registry(1);
        assert_eq!(r.advance().unwrap(), 0);
    }

    #[test]
    fn advance_from_stale_index_is_noop() {
        let mut r = registry(3);
        assert_eq!(r.advance_from(0).unwrap(), 1);
        // Second failure report against p0 arrives late.
        assert_eq!(r.advance_from(0).unwrap(), 1);
        assert_eq!(r.advance_from(1).unwrap(), 2);
    }

    #[test]
    fn name_at_bounds() {
        let r = registry(2);
        assert_eq!(r.name_at(1), Some("p1"));
        assert_eq!(r.name_at(2), None);
    }
}
