//! Handset manager vocabulary
//!
//! The manager app on the handset drives this device with JSON commands of
//! the form `{"command": "...", "params": {...}}`, and receives typed
//! notices back. The same vocabulary travels over the wireless link or, in
//! loopback mode, over the process bus as `ManagerControl` frames.
//!
//! Commands are parsed through a raw two-field shape so that extra params a
//! newer manager sends never break an older device.

use serde::{Deserialize, Serialize};

use crate::auth::TokenStatus;
use crate::device::DeviceLinkStatus;
use crate::errors::VisorError;
use crate::protocol::cloud::PhoneNotification;
use crate::types::PackageId;

// ----------------------------------------------------------------------------
// Commands (Manager → Core)
// ----------------------------------------------------------------------------

/// Wire shape of a manager command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawManagerCommand {
    pub command: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

/// Commands the handset manager can issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawManagerCommand", into = "RawManagerCommand")]
pub enum ManagerCommand {
    /// Liveness probe
    Ping,
    /// Ask for a full status snapshot
    RequestStatus,
    /// Bring up the wearable device link
    ConnectWearable { target: Option<String> },
    /// Drop the wearable device link
    DisconnectWearable,
    /// Switch the simulated wearable on or off
    EnableVirtualWearable { enabled: bool },
    /// Start an app by package
    StartApp { package: PackageId },
    /// Stop an app by package
    StopApp { package: PackageId },
    /// Remove an app from the catalog (and stop it first if running)
    UninstallApp { package: PackageId },
    /// Forward a phone notification
    PhoneNotification { notification: PhoneNotification },
    /// Store a new auth key, optionally naming the account it belongs to
    SetAuthSecretKey {
        key: String,
        user_id: Option<String>,
    },
    /// Verify the stored auth key against the cloud
    VerifyAuthSecretKey,
    /// Delete the stored auth key
    DeleteAuthSecretKey,
    /// Replace an app's settings
    UpdateAppSettings {
        package: PackageId,
        settings: serde_json::Value,
    },
}

impl ManagerCommand {
    /// Parse a manager command from its wire JSON
    pub fn parse(json: &str) -> Result<Self, VisorError> {
        let raw: RawManagerCommand = serde_json::from_str(json)?;
        Self::try_from(raw)
    }
}

fn param_str(params: &serde_json::Value, key: &str) -> Result<String, VisorError> {
    params
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| VisorError::invalid_command(format!("missing string param '{}'", key)))
}

fn param_bool(params: &serde_json::Value, key: &str) -> Result<bool, VisorError> {
    params
        .get(key)
        .and_then(serde_json::Value::as_bool)
        .ok_or_else(|| VisorError::invalid_command(format!("missing bool param '{}'", key)))
}

impl TryFrom<RawManagerCommand> for ManagerCommand {
    type Error = VisorError;

    fn try_from(raw: RawManagerCommand) -> Result<Self, VisorError> {
        let params = &raw.params;
        let command = match raw.command.as_str() {
            "ping" => ManagerCommand::Ping,
            "request_status" => ManagerCommand::RequestStatus,
            "connect_wearable" => ManagerCommand::ConnectWearable {
                target: params
                    .get("target")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string),
            },
            "disconnect_wearable" => ManagerCommand::DisconnectWearable,
            "enable_virtual_wearable" => ManagerCommand::EnableVirtualWearable {
                enabled: param_bool(params, "enabled")?,
            },
            "start_app" => ManagerCommand::StartApp {
                package: PackageId::new(param_str(params, "target")?),
            },
            "stop_app" => ManagerCommand::StopApp {
                package: PackageId::new(param_str(params, "target")?),
            },
            "uninstall_app" => ManagerCommand::UninstallApp {
                package: PackageId::new(param_str(params, "target")?),
            },
            "phone_notification" => ManagerCommand::PhoneNotification {
                notification: serde_json::from_value(params.clone())?,
            },
            "set_auth_secret_key" => ManagerCommand::SetAuthSecretKey {
                key: param_str(params, "authSecretKey")?,
                user_id: params
                    .get("userId")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string),
            },
            "verify_auth_secret_key" => ManagerCommand::VerifyAuthSecretKey,
            "delete_auth_secret_key" => ManagerCommand::DeleteAuthSecretKey,
            "update_app_settings" => ManagerCommand::UpdateAppSettings {
                package: PackageId::new(param_str(params, "target")?),
                settings: params
                    .get("settings")
                    .cloned()
                    .ok_or_else(|| VisorError::invalid_command("missing param 'settings'"))?,
            },
            other => {
                return Err(VisorError::invalid_command(format!(
                    "unknown command '{}'",
                    other
                )))
            }
        };
        Ok(command)
    }
}

impl From<ManagerCommand> for RawManagerCommand {
    fn from(command: ManagerCommand) -> Self {
        use serde_json::{json, Value};
        let (name, params) = match command {
            ManagerCommand::Ping => ("ping", Value::Null),
            ManagerCommand::RequestStatus => ("request_status", Value::Null),
            ManagerCommand::ConnectWearable { target } => (
                "connect_wearable",
                match target {
                    Some(target) => json!({ "target": target }),
                    None => Value::Null,
                },
            ),
            ManagerCommand::DisconnectWearable => ("disconnect_wearable", Value::Null),
            ManagerCommand::EnableVirtualWearable { enabled } => {
                ("enable_virtual_wearable", json!({ "enabled": enabled }))
            }
            ManagerCommand::StartApp { package } => ("start_app", json!({ "target": package })),
            ManagerCommand::StopApp { package } => ("stop_app", json!({ "target": package })),
            ManagerCommand::UninstallApp { package } => {
                ("uninstall_app", json!({ "target": package }))
            }
            ManagerCommand::PhoneNotification { notification } => (
                "phone_notification",
                serde_json::to_value(notification).unwrap_or(Value::Null),
            ),
            ManagerCommand::SetAuthSecretKey { key, user_id } => {
                let mut params = json!({ "authSecretKey": key });
                if let Some(user) = user_id {
                    params["userId"] = Value::String(user);
                }
                ("set_auth_secret_key", params)
            }
            ManagerCommand::VerifyAuthSecretKey => ("verify_auth_secret_key", Value::Null),
            ManagerCommand::DeleteAuthSecretKey => ("delete_auth_secret_key", Value::Null),
            ManagerCommand::UpdateAppSettings { package, settings } => (
                "update_app_settings",
                json!({ "target": package, "settings": settings }),
            ),
        };
        RawManagerCommand {
            command: name.to_string(),
            params,
        }
    }
}

// ----------------------------------------------------------------------------
// Notices (Core → Manager)
// ----------------------------------------------------------------------------

/// Typed replies and pushes toward the manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManagerNotice {
    /// Reply to a ping
    Pong,

    /// Full status snapshot
    Status { status: CoreStatus },

    /// Catalog listing after discovery
    AppInfo { apps: Vec<AppSummary> },

    /// One app changed run state
    AppStateChanged { package: PackageId, running: bool },

    /// Opaque content a running app addressed to the manager
    AppContent {
        package: PackageId,
        payload: serde_json::Value,
    },

    /// Human-readable notification for the manager UI
    Notify { message: String, level: NotifyLevel },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyLevel {
    Info,
    Error,
}

/// Everything the manager needs to render the device page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreStatus {
    pub cloud_connected: bool,
    pub auth: TokenStatus,
    pub wearable: DeviceLinkStatus,
    pub foreground_active: bool,
    pub apps: Vec<AppSummary>,
}

/// One app as the manager sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSummary {
    pub package: PackageId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    pub is_running: bool,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_ping() {
        let command = ManagerCommand::parse(r#"{"command":"ping"}"#).unwrap();
        assert_eq!(command, ManagerCommand::Ping);
    }

    #[test]
    fn test_parse_ping_tolerates_params() {
        let command = ManagerCommand::parse(r#"{"command":"ping","params":{}}"#).unwrap();
        assert_eq!(command, ManagerCommand::Ping);
    }

    #[test]
    fn test_parse_start_app() {
        let command = ManagerCommand::parse(
            r#"{"command":"start_app","params":{"target":"com.example.weather"}}"#,
        )
        .unwrap();
        assert_eq!(
            command,
            ManagerCommand::StartApp {
                package: PackageId::from("com.example.weather")
            }
        );
    }

    #[test]
    fn test_parse_start_app_without_target_fails() {
        let err = ManagerCommand::parse(r#"{"command":"start_app","params":{}}"#).unwrap_err();
        assert!(err.to_string().contains("target"));
    }

    #[test]
    fn test_parse_enable_virtual_wearable() {
        let command = ManagerCommand::parse(
            r#"{"command":"enable_virtual_wearable","params":{"enabled":true}}"#,
        )
        .unwrap();
        assert_eq!(command, ManagerCommand::EnableVirtualWearable { enabled: true });
    }

    #[test]
    fn test_parse_set_auth_secret_key() {
        let command = ManagerCommand::parse(
            r#"{"command":"set_auth_secret_key","params":{"authSecretKey":"s3cret"}}"#,
        )
        .unwrap();
        assert_eq!(
            command,
            ManagerCommand::SetAuthSecretKey {
                key: "s3cret".to_string(),
                user_id: None,
            }
        );
    }

    #[test]
    fn test_parse_set_auth_secret_key_with_user() {
        let command = ManagerCommand::parse(
            r#"{"command":"set_auth_secret_key","params":{"userId":"alice@example.com","authSecretKey":"s3cret"}}"#,
        )
        .unwrap();
        assert_eq!(
            command,
            ManagerCommand::SetAuthSecretKey {
                key: "s3cret".to_string(),
                user_id: Some("alice@example.com".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_update_app_settings() {
        let command = ManagerCommand::parse(
            r#"{"command":"update_app_settings","params":{"target":"com.example.weather","settings":{"units":"imperial"}}}"#,
        )
        .unwrap();
        match command {
            ManagerCommand::UpdateAppSettings { package, settings } => {
                assert_eq!(package.as_str(), "com.example.weather");
                assert_eq!(settings["units"], "imperial");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_command_fails() {
        let err = ManagerCommand::parse(r#"{"command":"do_magic"}"#).unwrap_err();
        assert!(err.to_string().contains("do_magic"));
    }

    #[test]
    fn test_command_serialization_round_trip() {
        let commands = vec![
            ManagerCommand::Ping,
            ManagerCommand::ConnectWearable { target: None },
            ManagerCommand::StopApp {
                package: PackageId::from("com.example.weather"),
            },
            ManagerCommand::UpdateAppSettings {
                package: PackageId::from("com.example.weather"),
                settings: serde_json::json!({"units": "metric"}),
            },
        ];
        for command in commands {
            let json = serde_json::to_string(&command).unwrap();
            let restored: ManagerCommand = serde_json::from_str(&json).unwrap();
            assert_eq!(restored, command);
        }
    }

    #[test]
    fn test_bare_commands_omit_params_key() {
        let json = serde_json::to_value(&ManagerCommand::Ping).unwrap();
        assert_eq!(json, serde_json::json!({"command": "ping"}));
    }

    #[test]
    fn test_notice_wire_tags() {
        let notice = ManagerNotice::AppStateChanged {
            package: PackageId::from("com.example.weather"),
            running: true,
        };
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["type"], "app_state_changed");
        assert_eq!(json["running"], true);
    }

    #[test]
    fn test_status_snapshot_round_trip() {
        let status = CoreStatus {
            cloud_connected: true,
            auth: TokenStatus::Verified,
            wearable: DeviceLinkStatus::Disconnected,
            foreground_active: false,
            apps: vec![AppSummary {
                package: PackageId::from("com.example.weather"),
                name: "Weather".to_string(),
                description: String::new(),
                version: "1.0".to_string(),
                is_running: true,
            }],
        };
        let notice = ManagerNotice::Status {
            status: status.clone(),
        };
        let json = serde_json::to_string(&notice).unwrap();
        let restored: ManagerNotice = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, ManagerNotice::Status { status });
    }
}
