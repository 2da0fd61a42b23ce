//! Error types for the orchestration layer

/// Result type alias using the orchestration Error
pub type Result<T> = std::result::Result<T, Error>;

/// Local capture device failure.
///
/// Device errors are never fatal to the session: the caller falls back
/// to audio-only or treats the media session as "not ready" and retries
/// on a later tick.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeviceError {
    /// The user (or platform policy) denied capture permission
    #[error("Device permission denied: {0}")]
    PermissionDenied(String),

    /// No capture device of the requested kind is present
    #[error("No device available: {0}")]
    NotFound(String),

    /// The device exists but is held by another application
    #[error("Device busy: {0}")]
    Busy(String),
}

/// Errors that can occur in call orchestration operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Local capture device failure
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Malformed or out-of-order signaling message
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// Peer not found
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether the next reconciliation tick is expected to recover from
    /// this error without operator intervention.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Device(_)
                | Error::SignalingError(_)
                | Error::PeerConnectionError(_)
                | Error::IceCandidateError(_)
                | Error::SdpError(_)
                | Error::WebSocketError(_)
        )
    }

    /// Check if this error is a local capture device error
    pub fn is_device_error(&self) -> bool {
        matches!(self, Error::Device(_))
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("test".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: test");

        let err = Error::from(DeviceError::Busy("camera".to_string()));
        assert_eq!(err.to_string(), "Device busy: camera");
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(Error::SignalingError("test".to_string()).is_recoverable());
        assert!(Error::Device(DeviceError::NotFound("mic".to_string())).is_recoverable());
        assert!(!Error::InvalidConfig("test".to_string()).is_recoverable());
    }

    #[test]
    fn test_error_is_device_error() {
        assert!(Error::Device(DeviceError::PermissionDenied("cam".to_string())).is_device_error());
        assert!(!Error::SignalingError("test".to_string()).is_device_error());
    }
}
