//! Cloud connection policy
//!
//! The cloud session should be warm whenever someone could be looking at
//! the foreground app or a wearable is attached, and released only when
//! both are gone. This module is the pure decision kernel: it tracks the
//! two inputs and reports a directive only when the derived desire actually
//! flips. Unchanged inputs never produce a directive, so the router never
//! issues redundant connect/disconnect churn.
//!
//! The router remains responsible for preconditions the policy cannot see:
//! a `Connect` directive is acted on only when a usable auth token exists
//! and no session is already open.

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Directives
// ----------------------------------------------------------------------------

/// What the router should do about the cloud session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyDirective {
    Connect,
    Disconnect,
}

// ----------------------------------------------------------------------------
// Policy State
// ----------------------------------------------------------------------------

/// Two-input OR policy over foreground visibility and device link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionPolicy {
    foreground_active: bool,
    device_link_active: bool,
}

impl ConnectionPolicy {
    /// Build with the current foreground visibility; the device link always
    /// starts down
    pub fn new(foreground_active: bool) -> Self {
        Self {
            foreground_active,
            device_link_active: false,
        }
    }

    /// Whether the session is currently wanted
    pub fn desired(&self) -> bool {
        self.foreground_active || self.device_link_active
    }

    pub fn foreground_active(&self) -> bool {
        self.foreground_active
    }

    pub fn device_link_active(&self) -> bool {
        self.device_link_active
    }

    /// Update foreground visibility
    pub fn set_foreground(&mut self, active: bool) -> Option<PolicyDirective> {
        self.apply(|state| state.foreground_active = active)
    }

    /// Update device link state
    pub fn set_device_link(&mut self, active: bool) -> Option<PolicyDirective> {
        self.apply(|state| state.device_link_active = active)
    }

    fn apply(&mut self, update: impl FnOnce(&mut Self)) -> Option<PolicyDirective> {
        let before = self.desired();
        update(self);
        let after = self.desired();
        match (before, after) {
            (false, true) => Some(PolicyDirective::Connect),
            (true, false) => Some(PolicyDirective::Disconnect),
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
