//! Application-wide constants.

/// Application name.
pub const APP_NAME: &str = "ParkStream";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default backend base URL.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8675";

/// Port the vehicle event service listens on.
pub const SERVICE_PORT: u16 = 8675;

/// Secondary port the service is sometimes deployed on next to the web front end.
pub const ALTERNATE_PORT: u16 = 8673;

/// Path of the vehicle event WebSocket endpoint.
pub const SERVICE_PATH: &str = "/websocket/vehicle";

/// Loopback hosts tried last during endpoint resolution.
pub const LOCAL_FALLBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1"];

/// Default time budget for a single endpoint probe.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;

/// Base interval of the linear reconnect backoff.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 3_000;

/// Maximum number of automatic reconnect attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Capacity of the in-memory record history.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1_000;

/// Plate length (in characters) of a conventional fuel vehicle.
pub const FUEL_PLATE_LEN: usize = 7;

/// Labels used when a vehicle frame omits a field.
pub mod labels {
    pub const UNKNOWN_CHANNEL: &str = "未知通道";
    pub const REGULAR_VIP: &str = "普通用户";
    pub const DEFAULT_YARD_NAME: &str = "智慧停车场";
    pub const DEFAULT_YARD_CODE: &str = "PARK001";
}

/// Environment variables consulted when loading configuration.
pub mod env {
    pub const BACKEND_URL: &str = "PARK_BACKEND_URL";
    pub const WEBSOCKET_HOST: &str = "PARK_WEBSOCKET_HOST";
    pub const LOG_LEVEL: &str = "PARK_LOG_LEVEL";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_path_is_absolute() {
        assert!(SERVICE_PATH.starts_with('/'));
        assert!(!SERVICE_PATH.ends_with('/'));
    }

    #[test]
    fn test_fallback_hosts() {
        assert_eq!(LOCAL_FALLBACK_HOSTS.len(), 2);
        assert!(LOCAL_FALLBACK_HOSTS.contains(&"127.0.0.1"));
    }
}
