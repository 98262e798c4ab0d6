//! Platform seams consumed by the router
//!
//! Everything the router needs from the host system goes through these four
//! traits: which app packages are installed, which processes are alive,
//! where the auth token lives, and where the catalog is persisted. The CLI
//! wires in file- and `/proc`-backed implementations; tests and embedded
//! harnesses use the in-memory ones defined at the bottom of this module.
//!
//! All four traits are synchronous. The queries behind them are point reads
//! (a directory listing, a process table scan, a small file); pushing async
//! through the router for those would buy nothing.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use visor_core::auth::AuthState;
use visor_core::registry::{EdgeApp, InstalledApp};
use visor_core::types::PackageId;
use visor_core::VisorResult;

// ----------------------------------------------------------------------------
// Platform Traits
// ----------------------------------------------------------------------------

/// Enumerates app packages installed on the device
///
/// A package counts as installed only if it carries the edge-app capability
/// marker; ordinary system packages never show up here.
pub trait AppScanner: Send + Sync {
    /// All installed edge-app packages, with their descriptors where the
    /// descriptor query succeeded
    fn installed_apps(&self) -> VisorResult<Vec<InstalledApp>>;

    /// Whether one specific package is installed
    fn is_installed(&self, package: &PackageId) -> VisorResult<bool> {
        Ok(self
            .installed_apps()?
            .iter()
            .any(|app| &app.package == package))
    }
}

/// Reports which app packages currently have a live process
pub trait ProcessInspector: Send + Sync {
    fn running_packages(&self) -> VisorResult<Vec<PackageId>>;
}

/// Persistent home of the auth state
///
/// The whole [`AuthState`] round-trips, not just the token, so verification
/// verdicts survive a restart.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> VisorResult<Option<AuthState>>;
    fn save(&self, state: &AuthState) -> VisorResult<()>;
    fn clear(&self) -> VisorResult<()>;
}

/// Persistent home of the app catalog
///
/// Each save replaces the previous catalog wholesale; there is no
/// incremental update.
pub trait CatalogStore: Send + Sync {
    fn load(&self) -> VisorResult<Vec<EdgeApp>>;
    fn save(&self, apps: &[EdgeApp]) -> VisorResult<()>;
}

// ----------------------------------------------------------------------------
// Service Bundle
// ----------------------------------------------------------------------------

/// The full set of platform services handed to the runtime
#[derive(Clone)]
pub struct PlatformServices {
    pub scanner: Arc<dyn AppScanner>,
    pub inspector: Arc<dyn ProcessInspector>,
    pub token_store: Arc<dyn TokenStore>,
    pub catalog_store: Arc<dyn CatalogStore>,
}

impl PlatformServices {
    pub fn new(
        scanner: Arc<dyn AppScanner>,
        inspector: Arc<dyn ProcessInspector>,
        token_store: Arc<dyn TokenStore>,
        catalog_store: Arc<dyn CatalogStore>,
    ) -> Self {
        Self {
            scanner,
            inspector,
            token_store,
            catalog_store,
        }
    }

    /// All-in-memory services, for tests and throwaway embeddings
    pub fn memory() -> Self {
        Self {
            scanner: Arc::new(MemoryAppScanner::new()),
            inspector: Arc::new(MemoryProcessInspector::new()),
            token_store: Arc::new(MemoryTokenStore::new()),
            catalog_store: Arc::new(MemoryCatalogStore::new()),
        }
    }
}

impl std::fmt::Debug for PlatformServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformServices").finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// In-Memory Implementations
// ----------------------------------------------------------------------------

/// Scanner over a mutable in-memory package list
///
/// Clones share the same underlying list, so a handle kept by the caller
/// can install and remove packages under a running router.
#[derive(Debug, Clone, Default)]
pub struct MemoryAppScanner {
    apps: Arc<Mutex<Vec<InstalledApp>>>,
}

impl MemoryAppScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_apps(apps: Vec<InstalledApp>) -> Self {
        Self {
            apps: Arc::new(Mutex::new(apps)),
        }
    }

    pub fn install(&self, app: InstalledApp) {
        let mut apps = self.apps.lock().unwrap_or_else(PoisonError::into_inner);
        apps.retain(|existing| existing.package != app.package);
        apps.push(app);
    }

    pub fn remove(&self, package: &PackageId) {
        self.apps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|app| &app.package != package);
    }
}

impl AppScanner for MemoryAppScanner {
    fn installed_apps(&self) -> VisorResult<Vec<InstalledApp>> {
        Ok(self
            .apps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

/// Process inspector over a mutable in-memory set of live packages
#[derive(Debug, Clone, Default)]
pub struct MemoryProcessInspector {
    alive: Arc<Mutex<BTreeSet<PackageId>>>,
}

impl MemoryProcessInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_alive(&self, package: PackageId) {
        self.alive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(package);
    }

    pub fn mark_dead(&self, package: &PackageId) {
        self.alive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(package);
    }
}

impl ProcessInspector for MemoryProcessInspector {
    fn running_packages(&self) -> VisorResult<Vec<PackageId>> {
        Ok(self
            .alive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect())
    }
}

/// Token store that lives and dies with the process
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStore {
    state: Arc<Mutex<Option<AuthState>>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an unverified token
    pub fn with_token<S: Into<String>>(token: S) -> Self {
        let mut state = AuthState::new();
        state.set_token(token.into(), None);
        Self::with_state(state)
    }

    pub fn with_state(state: AuthState) -> Self {
        Self {
            state: Arc::new(Mutex::new(Some(state))),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> VisorResult<Option<AuthState>> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, state: &AuthState) -> VisorResult<()> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
        Ok(())
    }

    fn clear(&self) -> VisorResult<()> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Catalog store that lives and dies with the process
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalogStore {
    apps: Arc<Mutex<Vec<EdgeApp>>>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently saved catalog
    pub fn saved(&self) -> Vec<EdgeApp> {
        self.apps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CatalogStore for MemoryCatalogStore {
    fn load(&self) -> VisorResult<Vec<EdgeApp>> {
        Ok(self.saved())
    }

    fn save(&self, apps: &[EdgeApp]) -> VisorResult<()> {
        *self.apps.lock().unwrap_or_else(PoisonError::into_inner) = apps.to_vec();
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use visor_core::registry::AppDescriptor;

    fn installed(package: &str) -> InstalledApp {
        InstalledApp {
            package: PackageId::from(package),
            descriptor: Some(AppDescriptor {
                name: package.to_string(),
                description: String::new(),
                version: "1.0".to_string(),
                settings: serde_json::Value::Null,
            }),
            kind: Default::default(),
            entry_point: None,
        }
    }

    #[test]
    fn test_scanner_point_query_uses_enumeration() {
        let scanner = MemoryAppScanner::with_apps(vec![installed("com.example.weather")]);
        assert!(scanner
            .is_installed(&PackageId::from("com.example.weather"))
            .unwrap());
        assert!(!scanner
            .is_installed(&PackageId::from("com.example.notes"))
            .unwrap());
    }

    #[test]
    fn test_scanner_install_replaces_existing_entry() {
        let scanner = MemoryAppScanner::new();
        scanner.install(installed("com.example.weather"));
        scanner.install(installed("com.example.weather"));
        assert_eq!(scanner.installed_apps().unwrap().len(), 1);
    }

    #[test]
    fn test_inspector_clones_share_state() {
        let inspector = MemoryProcessInspector::new();
        let handle = inspector.clone();
        handle.mark_alive(PackageId::from("com.example.weather"));
        assert_eq!(inspector.running_packages().unwrap().len(), 1);
        handle.mark_dead(&PackageId::from("com.example.weather"));
        assert!(inspector.running_packages().unwrap().is_empty());
    }

    #[test]
    fn test_token_store_round_trip() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.load().unwrap(), None);
        let mut state = AuthState::new();
        state.set_token("tok-1".to_string(), Some("alice@example.com".to_string()));
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_catalog_store_save_replaces() {
        let store = MemoryCatalogStore::new();
        let app = EdgeApp::from_installed(installed("com.example.weather")).unwrap();
        store.save(std::slice::from_ref(&app)).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);
        store.save(&[]).unwrap();
        assert!(store.load().unwrap().is_empty());
    }
}
