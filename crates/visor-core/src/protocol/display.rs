//! Display request payloads
//!
//! Apps on the bus and the cloud backend both ask for wearable display
//! output with the same shape; the renderer on the embedding side is the
//! only consumer. The layout body is deliberately opaque JSON: renderers
//! evolve layout vocabularies faster than the routing layer.

use serde::{Deserialize, Serialize};

/// Which logical surface a request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayView {
    /// Glanceable overlay, shown alongside whatever else is up
    Dashboard,
    /// Primary surface, owned by the foreground app
    Main,
}

impl Default for DisplayView {
    fn default() -> Self {
        DisplayView::Main
    }
}

impl std::fmt::Display for DisplayView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisplayView::Dashboard => write!(f, "dashboard"),
            DisplayView::Main => write!(f, "main"),
        }
    }
}

/// One request to put something on the wearable display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayRequest {
    #[serde(default)]
    pub view: DisplayView,
    /// Renderer-specific layout body
    #[serde(default)]
    pub layout: serde_json::Value,
    /// How long to keep the layout up; `None` means until replaced
    #[serde(rename = "durationMs", default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl DisplayRequest {
    /// A main-view request with the given layout body
    pub fn main(layout: serde_json::Value) -> Self {
        Self {
            view: DisplayView::Main,
            layout,
            duration_ms: None,
        }
    }

    /// A transient main-view request
    pub fn transient(layout: serde_json::Value, duration_ms: u64) -> Self {
        Self {
            view: DisplayView::Main,
            layout,
            duration_ms: Some(duration_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_view_defaults_to_main() {
        let request: DisplayRequest =
            serde_json::from_str(r#"{"layout":{"text":"hi"}}"#).unwrap();
        assert_eq!(request.view, DisplayView::Main);
    }

    #[test]
    fn test_duration_round_trip() {
        let request = DisplayRequest::transient(json!({"text": "starting"}), 3000);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["durationMs"], 3000);
        let restored: DisplayRequest = serde_json::from_value(value).unwrap();
        assert_eq!(restored, request);
    }

    #[test]
    fn test_display_view_names() {
        assert_eq!(DisplayView::Dashboard.to_string(), "dashboard");
        assert_eq!(DisplayView::Main.to_string(), "main");
    }
}
