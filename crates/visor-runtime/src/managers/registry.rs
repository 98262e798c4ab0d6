//! App catalog and run-state management
//!
//! The registry owns two pieces of state the rest of the runtime treats as
//! authoritative: the catalog of installed edge apps and the set of apps
//! currently believed to be running. Both are only ever touched from the
//! router task, so there is no locking here.
//!
//! The running set is a belief, not a fact: processes die without saying
//! goodbye and stray processes appear without being asked for. The
//! `reconcile` pass compares the belief against the live process list,
//! forgetting the dead in one step and flagging the strays for the caller
//! to stop. It never starts anything.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;
use visor_core::errors::RegistryError;
use visor_core::protocol::manager::AppSummary;
use visor_core::registry::{EdgeApp, InstalledApp};
use visor_core::types::PackageId;

// ----------------------------------------------------------------------------
// App Registry
// ----------------------------------------------------------------------------

/// Catalog of installed apps plus the believed-running set
#[derive(Debug, Default)]
pub struct AppRegistry {
    /// Installed apps, keyed by package for stable listing order
    catalog: BTreeMap<PackageId, EdgeApp>,
    /// Apps believed to be running
    running: BTreeSet<PackageId>,
    /// Statistics
    stats: RegistryStats,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the catalog with a previously persisted snapshot
    pub fn load_catalog(&mut self, apps: Vec<EdgeApp>) {
        self.catalog = apps
            .into_iter()
            .map(|app| (app.package.clone(), app))
            .collect();
    }

    /// Rebuild the catalog from a fresh package enumeration
    ///
    /// The previous catalog is discarded entirely; packages without a
    /// readable descriptor are skipped. Returns the new catalog snapshot.
    pub fn rebuild_catalog(&mut self, installed: Vec<InstalledApp>) -> Vec<EdgeApp> {
        self.catalog.clear();
        for entry in installed {
            let package = entry.package.clone();
            match EdgeApp::from_installed(entry) {
                Some(app) => {
                    self.catalog.insert(package, app);
                }
                None => debug!("Skipping {}: no readable descriptor", package),
            }
        }
        self.stats.discoveries_run += 1;
        self.snapshot()
    }

    /// Insert or replace one catalog entry
    pub fn upsert(&mut self, app: EdgeApp) {
        self.catalog.insert(app.package.clone(), app);
    }

    /// Mark an app as started
    ///
    /// `installed` is the platform's current verdict on the package. A
    /// catalog entry for a package the platform no longer knows is stale;
    /// it is purged here and the start fails.
    pub fn start(
        &mut self,
        package: &PackageId,
        installed: bool,
    ) -> Result<EdgeApp, RegistryError> {
        if self.running.contains(package) {
            return Err(RegistryError::AlreadyRunning {
                package: package.to_string(),
            });
        }
        let app = match self.catalog.get(package) {
            Some(app) => app.clone(),
            None => {
                return Err(RegistryError::UnknownPackage {
                    package: package.to_string(),
                })
            }
        };
        if !installed {
            self.catalog.remove(package);
            return Err(RegistryError::NotInstalled {
                package: package.to_string(),
            });
        }
        self.running.insert(package.clone());
        self.stats.apps_started += 1;
        Ok(app)
    }

    /// Mark an app as stopped
    ///
    /// Safe to call in any state; returns whether the app was believed
    /// running. Callers emit the stop signal regardless, so a stop always
    /// converges even when the belief was wrong.
    pub fn stop(&mut self, package: &PackageId) -> bool {
        let was_running = self.running.remove(package);
        if was_running {
            self.stats.apps_stopped += 1;
        }
        was_running
    }

    /// Remove an app from the catalog
    ///
    /// Returns whether the package was cataloged. Run state is untouched;
    /// callers stop the app first.
    pub fn uninstall(&mut self, package: &PackageId) -> bool {
        self.catalog.remove(package).is_some()
    }

    /// Replace one app's settings payload
    pub fn update_settings(
        &mut self,
        package: &PackageId,
        settings: serde_json::Value,
    ) -> Result<(), RegistryError> {
        match self.catalog.get_mut(package) {
            Some(app) => {
                app.settings = settings;
                Ok(())
            }
            None => Err(RegistryError::UnknownPackage {
                package: package.to_string(),
            }),
        }
    }

    /// Compare the believed-running set against the live process list
    ///
    /// Believed-running apps with no live process are forgotten on the
    /// spot. Cataloged apps with a live process that were never started
    /// are reported as strays for the caller to stop. Forgetting settles
    /// immediately; a stray keeps being reported on every pass until its
    /// process actually exits.
    pub fn reconcile(&mut self, alive: &BTreeSet<PackageId>) -> ReconcileOutcome {
        let forgotten: Vec<PackageId> = self
            .running
            .iter()
            .filter(|package| !alive.contains(*package))
            .cloned()
            .collect();
        for package in &forgotten {
            self.running.remove(package);
        }
        self.stats.dead_forgotten += forgotten.len() as u64;

        let strays: Vec<PackageId> = alive
            .iter()
            .filter(|package| self.catalog.contains_key(*package) && !self.running.contains(*package))
            .cloned()
            .collect();
        self.stats.strays_flagged += strays.len() as u64;

        ReconcileOutcome { forgotten, strays }
    }

    pub fn get(&self, package: &PackageId) -> Option<&EdgeApp> {
        self.catalog.get(package)
    }

    pub fn is_running(&self, package: &PackageId) -> bool {
        self.running.contains(package)
    }

    /// Packages currently believed running, in package order
    pub fn running_packages(&self) -> Vec<PackageId> {
        self.running.iter().cloned().collect()
    }

    pub fn catalog_len(&self) -> usize {
        self.catalog.len()
    }

    /// The catalog as persisted and reported to listeners
    pub fn snapshot(&self) -> Vec<EdgeApp> {
        self.catalog.values().cloned().collect()
    }

    /// Per-app summaries for status reporting
    pub fn summaries(&self) -> Vec<AppSummary> {
        self.catalog
            .values()
            .map(|app| AppSummary {
                package: app.package.clone(),
                name: app.name.clone(),
                description: app.description.clone(),
                version: app.version.clone(),
                is_running: self.running.contains(&app.package),
            })
            .collect()
    }

    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// What one reconciliation pass decided
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Believed running but no live process; already forgotten
    pub forgotten: Vec<PackageId>,
    /// Live process for a cataloged app that was never started
    pub strays: Vec<PackageId>,
}

impl ReconcileOutcome {
    pub fn is_empty(&self) -> bool {
        self.forgotten.is_empty() && self.strays.is_empty()
    }
}

/// Statistics for app lifecycle management
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    /// Number of successful starts
    pub apps_started: u64,
    /// Number of stops of apps believed running
    pub apps_stopped: u64,
    /// Number of catalog rebuilds
    pub discoveries_run: u64,
    /// Dead processes forgotten by reconciliation
    pub dead_forgotten: u64,
    /// Stray processes flagged by reconciliation
    pub strays_flagged: u64,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
