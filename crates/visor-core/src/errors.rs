//! Error types for the Visor runtime
//!
//! This module contains all error types used throughout the core, one enum
//! per subsystem plus the main VisorError type that unifies them all.

// ----------------------------------------------------------------------------
// Wireless Transport Errors
// ----------------------------------------------------------------------------

/// Errors raised by the wireless (peripheral) transport
#[derive(Debug, thiserror::Error)]
pub enum WirelessError {
    #[error("Radio unavailable: {reason}")]
    RadioUnavailable { reason: String },
    #[error("Advertising failed: {reason}")]
    AdvertisingFailed { reason: String },
    #[error("Notify failed: {reason}")]
    NotifyFailed { reason: String },
    #[error("No central connected")]
    NoCentral,
    #[error("Pairing rejected: {kind}")]
    PairingRejected { kind: String },
    #[error("Inbound buffer overflow ({size} bytes, max {max})")]
    BufferOverflow { size: usize, max: usize },
    #[error("Inbound message is not valid UTF-8")]
    InvalidEncoding,
    #[error("Transport shutdown: {reason}")]
    Shutdown { reason: String },
}

// ----------------------------------------------------------------------------
// Chunking Errors
// ----------------------------------------------------------------------------

/// Errors raised while chunking or reassembling wireless messages
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("MTU too small: {mtu} bytes (minimum {min})")]
    MtuTooSmall { mtu: usize, min: usize },
    #[error("Message needs {required} chunks (max {max})")]
    TooManyChunks { required: usize, max: usize },
    #[error("Chunk too short: {len} bytes")]
    ChunkTooShort { len: usize },
    #[error("Chunk sequence {sequence} out of range (total {total})")]
    SequenceOutOfRange { sequence: u8, total: u8 },
    #[error("Chunk declares total {actual}, expected {expected}")]
    TotalMismatch { expected: u8, actual: u8 },
    #[error("Duplicate chunk: sequence {sequence} already received")]
    DuplicateChunk { sequence: u8 },
    #[error("Reassembled message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },
    #[error("Zero-chunk message")]
    EmptyMessage,
}

// ----------------------------------------------------------------------------
// Process Bus Errors
// ----------------------------------------------------------------------------

/// Errors raised by the process bus broker and client
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Bus I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Peer sent no hello frame")]
    MissingHello,
    #[error("Malformed frame: {reason}")]
    MalformedFrame { reason: String },
    #[error("No connected peer for package {package}")]
    UnknownPeer { package: String },
    #[error("Bus closed: {reason}")]
    Closed { reason: String },
}

// ----------------------------------------------------------------------------
// Cloud Link Errors
// ----------------------------------------------------------------------------

/// Errors raised by the cloud session
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("Connect failed: {reason}")]
    ConnectFailed { reason: String },
    #[error("Invalid endpoint URL: {url}")]
    InvalidEndpoint { url: String },
    #[error("Not connected")]
    NotConnected,
    #[error("Send failed: {reason}")]
    SendFailed { reason: String },
    #[error("Session closed: {reason}")]
    Closed { reason: String },
}

// ----------------------------------------------------------------------------
// App Registry Errors
// ----------------------------------------------------------------------------

/// Errors raised by the app registry and lifecycle controller
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("App {package} is already running")]
    AlreadyRunning { package: String },
    #[error("App {package} is not installed")]
    NotInstalled { package: String },
    #[error("App {package} is not in the catalog")]
    UnknownPackage { package: String },
    #[error("Package scan failed: {reason}")]
    ScanFailed { reason: String },
    #[error("Catalog persistence failed: {reason}")]
    PersistFailed { reason: String },
}

// ----------------------------------------------------------------------------
// Auth Errors
// ----------------------------------------------------------------------------

/// Errors raised by auth state handling
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("No auth token is set")]
    NoToken,
    #[error("Token store failed: {reason}")]
    StoreFailed { reason: String },
}

// ----------------------------------------------------------------------------
// Unified Error Type
// ----------------------------------------------------------------------------

/// Core error type for the Visor runtime
#[derive(Debug, thiserror::Error)]
pub enum VisorError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Wireless error: {0}")]
    Wireless(#[from] WirelessError),

    #[error("Chunking error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Channel communication error (internal to the task architecture)
    #[error("Channel error: {message}")]
    Channel { message: String },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// A manager command that does not parse
    #[error("Invalid manager command: {reason}")]
    InvalidCommand { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl VisorError {
    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        VisorError::Channel {
            message: message.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        VisorError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a cloud connect-failed error
    pub fn cloud_connect_failed<R: Into<String>>(reason: R) -> Self {
        VisorError::Cloud(CloudError::ConnectFailed {
            reason: reason.into(),
        })
    }

    /// Create a bus malformed-frame error
    pub fn malformed_frame<R: Into<String>>(reason: R) -> Self {
        VisorError::Bus(BusError::MalformedFrame {
            reason: reason.into(),
        })
    }

    /// Create an invalid-manager-command error
    pub fn invalid_command<R: Into<String>>(reason: R) -> Self {
        VisorError::InvalidCommand {
            reason: reason.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, VisorError>;
pub type VisorResult<T> = Result<T>;
