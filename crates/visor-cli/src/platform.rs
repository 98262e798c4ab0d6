//! File-backed platform services
//!
//! The runtime asks the host four questions: what is installed, what is
//! running, where is the auth state, and where did the catalog go. On a
//! Linux host the answers live on disk: apps are directories carrying a
//! `visor-app.json` manifest, running processes leave `*.pid` files under
//! the state directory, and the auth state and catalog are JSON files. All
//! four services stay synchronous; the lifecycle manager calls them from
//! the router task and expects quick answers.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};
use visor_core::auth::AuthState;
use visor_core::errors::{AuthError, RegistryError};
use visor_core::registry::{AppDescriptor, AppKind, EdgeApp, InstalledApp};
use visor_core::{PackageId, VisorResult};
use visor_runtime::{AppScanner, CatalogStore, ProcessInspector, TokenStore};

/// Manifest file that marks a directory as an installed edge app
const MANIFEST_FILE: &str = "visor-app.json";

// ----------------------------------------------------------------------------
// App Scanner
// ----------------------------------------------------------------------------

/// On-disk manifest shape: the descriptor plus host-side launch details
#[derive(Debug, Deserialize)]
struct AppManifest {
    #[serde(flatten)]
    descriptor: AppDescriptor,
    #[serde(default)]
    kind: AppKind,
    #[serde(default)]
    entry_point: Option<String>,
}

/// Scans a directory tree for installed edge apps
///
/// Each immediate subdirectory containing a `visor-app.json` counts as one
/// installed app; the directory name is the package id. A manifest that
/// fails to parse still marks the app as installed, just without metadata,
/// so a broken manifest cannot hide a running process from reconciliation.
pub struct DirectoryAppScanner {
    root: PathBuf,
}

impl DirectoryAppScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AppScanner for DirectoryAppScanner {
    fn installed_apps(&self) -> VisorResult<Vec<InstalledApp>> {
        if !self.root.exists() {
            debug!("App directory {} does not exist", self.root.display());
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.root).map_err(|e| scan_failed(&self.root, e))?;
        let mut apps = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| scan_failed(&self.root, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let manifest_path = path.join(MANIFEST_FILE);
            if !manifest_path.exists() {
                continue;
            }
            let Some(package) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            apps.push(read_app(PackageId::from(package), &manifest_path));
        }

        apps.sort_by(|a, b| a.package.as_str().cmp(b.package.as_str()));
        Ok(apps)
    }
}

fn read_app(package: PackageId, manifest_path: &Path) -> InstalledApp {
    let manifest = fs::read_to_string(manifest_path)
        .map_err(|e| e.to_string())
        .and_then(|raw| serde_json::from_str::<AppManifest>(&raw).map_err(|e| e.to_string()));
    match manifest {
        Ok(manifest) => InstalledApp {
            package,
            descriptor: Some(manifest.descriptor),
            kind: manifest.kind,
            entry_point: manifest.entry_point,
        },
        Err(reason) => {
            warn!(
                "Unreadable manifest {}: {}",
                manifest_path.display(),
                reason
            );
            InstalledApp {
                package,
                descriptor: None,
                kind: AppKind::default(),
                entry_point: None,
            }
        }
    }
}

fn scan_failed(path: &Path, error: io::Error) -> visor_core::VisorError {
    RegistryError::ScanFailed {
        reason: format!("{}: {}", path.display(), error),
    }
    .into()
}

// ----------------------------------------------------------------------------
// Process Inspector
// ----------------------------------------------------------------------------

/// Reads `<package>.pid` files and checks the pids against `/proc`
///
/// App processes drop a pid file when they start and are expected to remove
/// it on exit, but reconciliation never trusts that: a stale file whose pid
/// is gone reports the app as dead.
pub struct PidFileProcessInspector {
    run_dir: PathBuf,
}

impl PidFileProcessInspector {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    fn is_alive(pid: u32) -> bool {
        Path::new("/proc").join(pid.to_string()).exists()
    }
}

impl ProcessInspector for PidFileProcessInspector {
    fn running_packages(&self) -> VisorResult<Vec<PackageId>> {
        if !self.run_dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.run_dir).map_err(|e| scan_failed(&self.run_dir, e))?;
        let mut running = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| scan_failed(&self.run_dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("pid") {
                continue;
            }
            let Some(package) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let pid = fs::read_to_string(&path)
                .ok()
                .and_then(|raw| raw.trim().parse::<u32>().ok());
            match pid {
                Some(pid) if Self::is_alive(pid) => running.push(PackageId::from(package)),
                Some(_) => debug!("Stale pid file {}", path.display()),
                None => warn!("Unparsable pid file {}", path.display()),
            }
        }

        running.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(running)
    }
}

// ----------------------------------------------------------------------------
// Token Store
// ----------------------------------------------------------------------------

/// Keeps the auth state in a single JSON file, readable only by the owner
///
/// The file carries the token itself, so it gets the same 0600 treatment a
/// bare credential would. An unreadable file is an error rather than an
/// empty state; silently dropping a stored token would look like a logout.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> VisorResult<Option<AuthState>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_failed(&self.path, e)),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| store_corrupt(&self.path, e))
    }

    fn save(&self, state: &AuthState) -> VisorResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| store_failed(&self.path, e))?;
        }
        let rendered = serde_json::to_string_pretty(state)?;
        fs::write(&self.path, rendered).map_err(|e| store_failed(&self.path, e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))
                .map_err(|e| store_failed(&self.path, e))?;
        }
        Ok(())
    }

    fn clear(&self) -> VisorResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_failed(&self.path, e)),
        }
    }
}

fn store_failed(path: &Path, error: io::Error) -> visor_core::VisorError {
    AuthError::StoreFailed {
        reason: format!("{}: {}", path.display(), error),
    }
    .into()
}

fn store_corrupt(path: &Path, error: serde_json::Error) -> visor_core::VisorError {
    AuthError::StoreFailed {
        reason: format!("{}: {}", path.display(), error),
    }
    .into()
}

// ----------------------------------------------------------------------------
// Catalog Store
// ----------------------------------------------------------------------------

/// Persists the app catalog as pretty-printed JSON
///
/// The catalog is a cache of the last discovery pass. A corrupt file is
/// logged and treated as empty rather than refused: the next discovery
/// rebuilds it from the scanner anyway.
pub struct FileCatalogStore {
    path: PathBuf,
}

impl FileCatalogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CatalogStore for FileCatalogStore {
    fn load(&self) -> VisorResult<Vec<EdgeApp>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(persist_failed(&self.path, e)),
        };
        match serde_json::from_str(&raw) {
            Ok(apps) => Ok(apps),
            Err(e) => {
                warn!(
                    "Discarding unreadable catalog {}: {}",
                    self.path.display(),
                    e
                );
                Ok(Vec::new())
            }
        }
    }

    fn save(&self, apps: &[EdgeApp]) -> VisorResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| persist_failed(&self.path, e))?;
        }
        let rendered = serde_json::to_string_pretty(apps)?;
        fs::write(&self.path, rendered).map_err(|e| persist_failed(&self.path, e))
    }
}

fn persist_failed(path: &Path, error: io::Error) -> visor_core::VisorError {
    RegistryError::PersistFailed {
        reason: format!("{}: {}", path.display(), error),
    }
    .into()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
