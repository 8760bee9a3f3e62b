//! Global error types for the parking event stream client.
//!
//! Every failure the client can observe is folded into a single `ParkError`
//! enum with conversions from the underlying library errors.

use thiserror::Error;

/// Convenience type alias for Results using ParkError.
pub type ParkResult<T> = Result<T, ParkError>;

/// Unified error type for the event stream client.
///
/// Cloneable so the same error can be returned to a caller and published to
/// `Error` topic subscribers.
#[derive(Error, Debug, Clone)]
pub enum ParkError {
    // -- Configuration errors --
    /// Failed to load or parse configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    // -- Endpoint discovery --
    /// A probe did not open within its time budget.
    #[error("probe timed out after {timeout_ms}ms: {url}")]
    ProbeTimeout {
        /// Candidate address that was probed.
        url: String,
        /// Time budget of the probe in milliseconds.
        timeout_ms: u64,
    },

    /// A probe was refused or failed before opening.
    #[error("probe refused for {url}: {reason}")]
    ProbeRefused {
        /// Candidate address that was probed.
        url: String,
        /// Transport-level reason.
        reason: String,
    },

    /// Every candidate address failed its probe.
    #[error("no reachable endpoint ({} candidate(s) failed): {}", failures.len(), failures.join("; "))]
    NoReachableEndpoint {
        /// One diagnostic line per failed candidate, in probe order.
        failures: Vec<String>,
    },

    // -- Connection errors --
    /// WebSocket transport error on the live connection.
    #[error("socket error: {0}")]
    Socket(String),

    /// Reconnection budget used up; an explicit connect is required.
    #[error("reconnection abandoned after {attempts} attempt(s)")]
    ReconnectExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// Attempted to send while not connected.
    #[error("send failed: {0}")]
    SendFailure(String),

    // -- Frame errors --
    /// An inbound frame could not be interpreted.
    #[error("frame parse error: {0}")]
    Parse(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ParkError {
    /// Short stable name of the error category, used in logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::MissingConfig(_) => "missing_config",
            Self::ProbeTimeout { .. } => "probe_timeout",
            Self::ProbeRefused { .. } => "probe_refused",
            Self::NoReachableEndpoint { .. } => "no_reachable_endpoint",
            Self::Socket(_) => "socket",
            Self::ReconnectExhausted { .. } => "reconnect_exhausted",
            Self::SendFailure(_) => "send_failure",
            Self::Parse(_) => "parse",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether the error came out of endpoint probing.
    pub fn is_probe_failure(&self) -> bool {
        matches!(
            self,
            Self::ProbeTimeout { .. } | Self::ProbeRefused { .. } | Self::NoReachableEndpoint { .. }
        )
    }
}

impl From<std::io::Error> for ParkError {
    fn from(e: std::io::Error) -> Self {
        ParkError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ParkError {
    fn from(e: serde_json::Error) -> Self {
        ParkError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for ParkError {
    fn from(e: toml::de::Error) -> Self {
        ParkError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_park_error_display() {
        let err = ParkError::Config("bad value".to_string());
        assert_eq!(err.to_string(), "configuration error: bad value");
    }

    #[test]
    fn test_no_reachable_endpoint_lists_failures() {
        let err = ParkError::NoReachableEndpoint {
            failures: vec!["ws://a: refused".into(), "ws://b: timed out".into()],
        };
        let text = err.to_string();
        assert!(text.contains("2 candidate(s)"));
        assert!(text.contains("ws://a: refused; ws://b: timed out"));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ParkError::ProbeTimeout { url: "ws://x".into(), timeout_ms: 5000 }.kind(),
            "probe_timeout"
        );
        assert_eq!(ParkError::SendFailure("offline".into()).kind(), "send_failure");
        assert_eq!(ParkError::ReconnectExhausted { attempts: 5 }.kind(), "reconnect_exhausted");
        assert!(ParkError::ProbeRefused { url: "ws://x".into(), reason: "closed".into() }
            .is_probe_failure());
        assert!(!ParkError::Parse("eof".into()).is_probe_failure());
    }

    #[test]
    fn test_json_error_converts_to_serialization() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ParkError = json_err.into();
        assert_eq!(err.kind(), "serialization");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "config.toml");
        let err: ParkError = io.into();
        assert_eq!(err.kind(), "io");
        assert!(err.to_string().contains("config.toml"));
    }
}
