//! # Hub Error Types
//!
//! Error types for the speaker hub.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Hub Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │    Delivery     │  │      Storage            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  NoActiveStream │  │  SnapshotSaveFailed     │ │
//! │  │  ConfigLoad-    │  │  QueueClosed    │  │  SnapshotLoadFailed     │ │
//! │  │  Failed         │  │  AckTimeout     │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────────────────────────────┐  │
//! │  │   Downstream    │  │              Transport                      │  │
//! │  │                 │  │                                             │  │
//! │  │  ServiceCall-   │  │  BindFailed                                 │  │
//! │  │  Failed         │  │                                             │  │
//! │  │  UnknownEntity  │  │                                             │  │
//! │  └─────────────────┘  └─────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for hub operations.
pub type HubResult<T> = Result<T, HubError>;

/// Hub error type covering all failure modes of the engine.
///
/// ## Design Principles
/// - Persistence errors are best-effort: callers log and continue
/// - Delivery errors surface as boolean failures to collaborators
/// - Protocol rejections use `tonic::Status` at the service boundary,
///   never this type
#[derive(Debug, Error)]
pub enum HubError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid hub configuration.
    #[error("Invalid hub configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Storage Errors (registry snapshot)
    // =========================================================================
    /// Failed to write the registry snapshot.
    #[error("Failed to save registry snapshot: {0}")]
    SnapshotSaveFailed(String),

    /// Failed to read the registry snapshot.
    #[error("Failed to load registry snapshot: {0}")]
    SnapshotLoadFailed(String),

    // =========================================================================
    // Delivery Errors (TTS dispatch)
    // =========================================================================
    /// The speaker has no live TTS stream to deliver onto.
    #[error("No active TTS stream for speaker '{0}'")]
    NoActiveStream(String),

    /// The speaker's TTS queue closed mid-delivery.
    #[error("TTS queue for speaker '{0}' is closed")]
    QueueClosed(String),

    /// The device never acknowledged within the correlation window.
    #[error("No TTS acknowledgement within {0} seconds")]
    AckTimeout(u64),

    // =========================================================================
    // Downstream Errors (state host)
    // =========================================================================
    /// A host service call failed.
    #[error("Host service call failed: {0}")]
    ServiceCallFailed(String),

    /// Entity not known to the state host.
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Failed to bind the gRPC listener.
    #[error("Failed to bind gRPC listener: {0}")]
    BindFailed(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<toml::de::Error> for HubError {
    fn from(err: toml::de::Error) -> Self {
        HubError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl HubError {
    /// True for errors that surface as a boolean `false` to the TTS caller
    /// rather than propagating.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(
            self,
            HubError::NoActiveStream(_) | HubError::QueueClosed(_) | HubError::AckTimeout(_)
        )
    }

    /// True for errors that indicate a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            HubError::InvalidConfig(_) | HubError::ConfigLoadFailed(_)
        )
    }

    /// True for best-effort persistence errors: log and keep running.
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            HubError::SnapshotSaveFailed(_) | HubError::SnapshotLoadFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_failures() {
        assert!(HubError::NoActiveStream("kitchen-1".into()).is_delivery_failure());
        assert!(HubError::AckTimeout(30).is_delivery_failure());
        assert!(!HubError::InvalidConfig("bad".into()).is_delivery_failure());
    }

    #[test]
    fn test_storage_errors_are_not_config_errors() {
        let err = HubError::SnapshotSaveFailed("disk full".into());
        assert!(err.is_storage_error());
        assert!(!err.is_config_error());
    }

    #[test]
    fn test_error_display() {
        let err = HubError::NoActiveStream("kitchen-1".into());
        assert!(err.to_string().contains("kitchen-1"));
    }
}
