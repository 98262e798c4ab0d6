//! Interactive line console
//!
//! One verb per line, parsed into router commands. The console exists to
//! exercise the routing core from a terminal: flipping foreground state,
//! simulating the handset, driving app lifecycle. Parsing is deliberately
//! forgiving about whitespace and strict about verbs; an unknown line gets
//! a help hint rather than a guess.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use visor_core::device::{DeviceKind, DeviceLinkStatus};
use visor_core::protocol::PressKind;
use visor_core::{Command, PackageId};

const LINE_BUFFER: usize = 8;

pub const HELP: &str = "\
Commands:
  start <package>      Launch an installed app
  stop <package>       Stop a running app
  discover             Rebuild the app catalog
  status               Print a status report
  token <value>        Store the core auth token
  verify               Check whether a token is stored
  logout               Delete the stored token
  connect              Ask the handset to link the wearable
  disconnect           Ask the handset to unlink the wearable
  wearable on|off      Report the wearable link state
  virtual on|off       Enable or disable the simulated wearable
  foreground on|off    Report companion app foreground state
  speaking on|off      Report voice activity
  button <id> [long]   Simulate a hardware button press
  phone <json>         Write a raw frame on the loopback handset link
  help                 Show this text
  quit                 Shut down and exit";

// ----------------------------------------------------------------------------
// Actions
// ----------------------------------------------------------------------------

/// What one console line asks for
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleAction {
    /// Forward a command to the router
    Send(Command),
    /// Write raw data on the loopback handset link
    Phone(String),
    Help,
    Quit,
}

// ----------------------------------------------------------------------------
// Stdin Reader
// ----------------------------------------------------------------------------

/// Spawn a task reading stdin lines, yielding them over a channel
///
/// The receiver ends when stdin does; a prompt is printed before each read.
pub fn spawn_reader(prompt: String) -> mpsc::Receiver<String> {
    let (line_tx, line_rx) = mpsc::channel(LINE_BUFFER);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print_prompt(&prompt);
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line_tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
    });
    line_rx
}

fn print_prompt(prompt: &str) {
    use std::io::Write;
    let mut out = std::io::stdout();
    let _ = write!(out, "{}", prompt);
    let _ = out.flush();
}

/// Await the next console line, pending forever once the console is gone
pub async fn next_line(lines: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match lines {
        Some(lines) => lines.recv().await,
        None => std::future::pending().await,
    }
}

// ----------------------------------------------------------------------------
// Parsing
// ----------------------------------------------------------------------------

/// Parse one console line; `None` means blank or not understood
pub fn parse_line(line: &str) -> Option<ConsoleAction> {
    let line = line.trim();
    let mut parts = line.split_whitespace();
    let verb = parts.next()?;

    let action = match verb {
        "help" | "?" => ConsoleAction::Help,
        "quit" | "exit" => ConsoleAction::Quit,
        "start" => ConsoleAction::Send(Command::StartApp {
            package: PackageId::from(parts.next()?),
        }),
        "stop" => ConsoleAction::Send(Command::StopApp {
            package: PackageId::from(parts.next()?),
        }),
        "discover" => ConsoleAction::Send(Command::RunDiscovery),
        "status" => ConsoleAction::Send(Command::RequestStatus),
        "token" => ConsoleAction::Send(Command::SetAuthToken {
            token: parts.next()?.to_string(),
        }),
        "verify" => ConsoleAction::Send(Command::VerifyAuthToken),
        "logout" => ConsoleAction::Send(Command::DeleteAuthToken),
        "connect" => ConsoleAction::Send(Command::ConnectWearable),
        "disconnect" => ConsoleAction::Send(Command::DisconnectWearable),
        "wearable" => {
            let status = if parse_switch(parts.next()?)? {
                DeviceLinkStatus::Connected {
                    kind: DeviceKind::DisplayGlasses,
                }
            } else {
                DeviceLinkStatus::Disconnected
            };
            ConsoleAction::Send(Command::SetDeviceLink { status })
        }
        "virtual" => ConsoleAction::Send(Command::EnableVirtualWearable {
            enabled: parse_switch(parts.next()?)?,
        }),
        "foreground" => ConsoleAction::Send(Command::SetForeground {
            active: parse_switch(parts.next()?)?,
        }),
        "speaking" => ConsoleAction::Send(Command::SpeakingStateChanged {
            speaking: parse_switch(parts.next()?)?,
        }),
        "button" => {
            let button = parts.next()?.to_string();
            let press = match parts.next() {
                Some("long") => PressKind::Long,
                _ => PressKind::Short,
            };
            ConsoleAction::Send(Command::ButtonPressed { button, press })
        }
        "phone" => {
            let payload = line.strip_prefix("phone")?.trim();
            if payload.is_empty() {
                return None;
            }
            ConsoleAction::Phone(payload.to_string())
        }
        _ => return None,
    };
    Some(action)
}

fn parse_switch(word: &str) -> Option<bool> {
    match word {
        "on" | "true" => Some(true),
        "off" | "false" => Some(false),
        _ => None,
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_verbs() {
        assert_eq!(
            parse_line("start com.example.captions"),
            Some(ConsoleAction::Send(Command::StartApp {
                package: PackageId::from("com.example.captions"),
            }))
        );
        assert_eq!(
            parse_line("  stop com.example.captions  "),
            Some(ConsoleAction::Send(Command::StopApp {
                package: PackageId::from("com.example.captions"),
            }))
        );
        assert_eq!(
            parse_line("discover"),
            Some(ConsoleAction::Send(Command::RunDiscovery))
        );
        // Missing operand is not a command.
        assert_eq!(parse_line("start"), None);
    }

    #[test]
    fn test_switch_verbs() {
        assert_eq!(
            parse_line("foreground on"),
            Some(ConsoleAction::Send(Command::SetForeground { active: true }))
        );
        assert_eq!(
            parse_line("speaking off"),
            Some(ConsoleAction::Send(Command::SpeakingStateChanged {
                speaking: false,
            }))
        );
        assert_eq!(parse_line("foreground sideways"), None);
    }

    #[test]
    fn test_wearable_switch_maps_to_link_status() {
        assert_eq!(
            parse_line("wearable on"),
            Some(ConsoleAction::Send(Command::SetDeviceLink {
                status: DeviceLinkStatus::Connected {
                    kind: DeviceKind::DisplayGlasses,
                },
            }))
        );
        assert_eq!(
            parse_line("wearable off"),
            Some(ConsoleAction::Send(Command::SetDeviceLink {
                status: DeviceLinkStatus::Disconnected,
            }))
        );
    }

    #[test]
    fn test_button_press_kinds() {
        assert_eq!(
            parse_line("button b1"),
            Some(ConsoleAction::Send(Command::ButtonPressed {
                button: "b1".to_string(),
                press: PressKind::Short,
            }))
        );
        assert_eq!(
            parse_line("button b1 long"),
            Some(ConsoleAction::Send(Command::ButtonPressed {
                button: "b1".to_string(),
                press: PressKind::Long,
            }))
        );
    }

    #[test]
    fn test_phone_payload_keeps_spaces() {
        assert_eq!(
            parse_line(r#"phone {"type": "ping", "body": "hello there"}"#),
            Some(ConsoleAction::Phone(
                r#"{"type": "ping", "body": "hello there"}"#.to_string()
            ))
        );
        assert_eq!(parse_line("phone"), None);
    }

    #[test]
    fn test_blank_and_unknown_lines() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("   "), None);
        assert_eq!(parse_line("frobnicate"), None);
    }

    #[test]
    fn test_quit_and_help() {
        assert_eq!(parse_line("quit"), Some(ConsoleAction::Quit));
        assert_eq!(parse_line("exit"), Some(ConsoleAction::Quit));
        assert_eq!(parse_line("help"), Some(ConsoleAction::Help));
        assert_eq!(parse_line("?"), Some(ConsoleAction::Help));
    }
}
