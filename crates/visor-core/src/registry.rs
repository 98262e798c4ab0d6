//! App catalog types
//!
//! The catalog describes every third-party app installed on the device. It
//! is rebuilt from scratch on each discovery pass: packages exposing the
//! capability marker are enumerated, each one's descriptor is read, and the
//! result replaces whatever catalog existed before. Run state is tracked
//! separately; a catalog entry says what an app is, not what it is doing.

use serde::{Deserialize, Serialize};

use crate::types::PackageId;

// ----------------------------------------------------------------------------
// Descriptors
// ----------------------------------------------------------------------------

/// Self-description an app package publishes for discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    /// Settings schema plus current values, opaque to the routing layer
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// What an app does for the wearable experience
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppKind {
    /// Ordinary user-facing app
    Standard,
    /// Always-available glanceable surface
    Dashboard,
    /// Infrastructure app, hidden from user-facing listings
    System,
}

impl Default for AppKind {
    fn default() -> Self {
        AppKind::Standard
    }
}

// ----------------------------------------------------------------------------
// Catalog Entries
// ----------------------------------------------------------------------------

/// A package found on the device, before descriptor validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledApp {
    pub package: PackageId,
    /// Parsed descriptor, or `None` when the provider query failed
    pub descriptor: Option<AppDescriptor>,
    #[serde(default)]
    pub kind: AppKind,
    /// Executable the supervisor launches for this app, if local
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
}

/// One catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeApp {
    pub package: PackageId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: AppKind,
    #[serde(default)]
    pub settings: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
}

impl EdgeApp {
    /// Build a catalog entry from a discovered package
    ///
    /// Packages without a readable descriptor are not cataloged; an app the
    /// user cannot name or configure is not usable.
    pub fn from_installed(installed: InstalledApp) -> Option<Self> {
        let descriptor = installed.descriptor?;
        Some(Self {
            package: installed.package,
            name: descriptor.name,
            description: descriptor.description,
            version: descriptor.version,
            kind: installed.kind,
            settings: descriptor.settings,
            entry_point: installed.entry_point,
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor() -> AppDescriptor {
        AppDescriptor {
            name: "Weather".to_string(),
            description: "Forecasts on your glasses".to_string(),
            version: "1.2.0".to_string(),
            settings: json!({"units": "metric"}),
        }
    }

    #[test]
    fn test_catalog_entry_from_installed() {
        let app = EdgeApp::from_installed(InstalledApp {
            package: PackageId::from("com.example.weather"),
            descriptor: Some(descriptor()),
            kind: AppKind::Standard,
            entry_point: Some("/opt/apps/weather".to_string()),
        })
        .unwrap();
        assert_eq!(app.name, "Weather");
        assert_eq!(app.settings["units"], "metric");
    }

    #[test]
    fn test_descriptorless_package_is_not_cataloged() {
        let result = EdgeApp::from_installed(InstalledApp {
            package: PackageId::from("com.example.broken"),
            descriptor: None,
            kind: AppKind::Standard,
            entry_point: None,
        });
        assert!(result.is_none());
    }

    #[test]
    fn test_descriptor_tolerates_minimal_json() {
        let descriptor: AppDescriptor = serde_json::from_str(r#"{"name":"Tiny"}"#).unwrap();
        assert_eq!(descriptor.name, "Tiny");
        assert_eq!(descriptor.version, "");
        assert!(descriptor.settings.is_null());
    }

    #[test]
    fn test_app_kind_defaults_to_standard() {
        let app: InstalledApp =
            serde_json::from_str(r#"{"package":"com.example.weather","descriptor":null}"#).unwrap();
        assert_eq!(app.kind, AppKind::Standard);
    }
}
