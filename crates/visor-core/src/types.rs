//! Core types for the Visor runtime
//!
//! This module defines the fundamental identifier and time types used
//! throughout the runtime, using newtype patterns for semantic validation
//! and type safety.

use core::fmt;
use core::ops::{Add, Sub};
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Package Identifier
// ----------------------------------------------------------------------------

/// Identity of an edge app: its package identifier (reverse-DNS style,
/// e.g. `com.example.weather`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    /// Create a new package identifier
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Get the raw identifier string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PackageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PackageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for PackageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ----------------------------------------------------------------------------
// Central Identifier
// ----------------------------------------------------------------------------

/// Identity of the wireless peer (handset) connected to the advertised
/// service. The underlying value is the platform's address representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CentralId(String);

impl CentralId {
    /// Create a new central identifier
    pub fn new<S: Into<String>>(address: S) -> Self {
        Self(address.into())
    }

    /// Get the raw address string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier used for the in-process loopback link
    pub fn loopback() -> Self {
        Self("loopback".to_string())
    }
}

impl fmt::Display for CentralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: u64) -> Timestamp {
        Timestamp(self.0 + other)
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Get current timestamp from the system clock
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Add seconds to this timestamp
    pub fn add_seconds(&self, seconds: u64) -> Self {
        Self(self.0 + (seconds * 1000))
    }

    /// Get duration since another timestamp
    pub fn duration_since(&self, other: Self) -> core::time::Duration {
        let millis_diff = self.0.saturating_sub(other.0);
        core::time::Duration::from_millis(millis_diff)
    }
}

// ----------------------------------------------------------------------------
// Time Source Trait
// ----------------------------------------------------------------------------

/// Trait for providing timestamps to state that needs the current time
///
/// Managers take a `TimeSource` instead of reading the clock directly so
/// tests can drive them deterministically.
pub trait TimeSource {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// System clock implementation of TimeSource
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_id() {
        let id = PackageId::new("com.example.weather");
        assert_eq!(id.as_str(), "com.example.weather");
        assert_eq!(format!("{}", id), "com.example.weather");

        let from_str: PackageId = "com.example.notes".into();
        assert_eq!(from_str.as_str(), "com.example.notes");
    }

    #[test]
    fn test_package_id_serde_transparent() {
        let id = PackageId::new("com.example.weather");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"com.example.weather\"");
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let t0 = Timestamp::new(1_000);
        let t1 = t0.add_seconds(5);
        assert_eq!(t1.as_millis(), 6_000);
        assert_eq!(t1 - t0, 5_000);
        assert_eq!(t0 - t1, 0); // saturating
        assert_eq!(t1.duration_since(t0).as_millis(), 5_000);
    }
}
