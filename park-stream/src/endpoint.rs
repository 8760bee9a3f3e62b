//! Endpoint discovery.
//!
//! Builds the ordered list of candidate WebSocket addresses from the client
//! configuration and probes them until one opens. Candidate construction is
//! a pure function; probing goes through the [`Prober`] trait so callers can
//! substitute their own transport check.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use park_core::config::{AppConfig, ServerConfig};
use park_core::error::{ParkError, ParkResult};

/// A candidate address and what probing learned about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub url: String,
    pub probed: bool,
    pub reachable: bool,
}

/// Result of probing a single address.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeOutcome {
    pub url: String,
    pub success: bool,
    pub duration_ms: u64,
    /// Failure description, including the address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timed_out: bool,
}

impl ProbeOutcome {
    pub fn reachable(url: &str, elapsed: Duration) -> Self {
        Self {
            url: url.to_string(),
            success: true,
            duration_ms: elapsed.as_millis() as u64,
            error: None,
            timed_out: false,
        }
    }

    pub fn failed(url: &str, elapsed: Duration, error: &ParkError) -> Self {
        Self {
            url: url.to_string(),
            success: false,
            duration_ms: elapsed.as_millis() as u64,
            error: Some(error.to_string()),
            timed_out: matches!(error, ParkError::ProbeTimeout { .. }),
        }
    }

    /// One-line description used in aggregated failures.
    pub fn failure_line(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| format!("{}: unknown failure", self.url))
    }
}

/// Checks whether a WebSocket address accepts connections.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Attempt to open `url` within `timeout`. Never panics; failures are
    /// reported in the outcome.
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome;
}

/// Production prober: opens a real WebSocket and closes it again.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsProber;

#[async_trait]
impl Prober for WsProber {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome {
        let started = Instant::now();
        match tokio::time::timeout(timeout, connect_async(url)).await {
            Ok(Ok((mut stream, _response))) => {
                let elapsed = started.elapsed();
                // The probe connection is not reused.
                tokio::spawn(async move {
                    let _ = stream.close(None).await;
                });
                ProbeOutcome::reachable(url, elapsed)
            }
            Ok(Err(e)) => ProbeOutcome::failed(
                url,
                started.elapsed(),
                &ParkError::ProbeRefused {
                    url: url.to_string(),
                    reason: e.to_string(),
                },
            ),
            Err(_) => ProbeOutcome::failed(
                url,
                started.elapsed(),
                &ParkError::ProbeTimeout {
                    url: url.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                },
            ),
        }
    }
}

/// Translate an HTTP(S) or WS(S) base address into a WebSocket base
/// without a trailing slash. Addresses without a scheme get `ws://`.
/// Returns `None` for other schemes.
pub fn to_socket_base(address: &str) -> Option<String> {
    let address = address.trim().trim_end_matches('/');
    if address.is_empty() {
        return None;
    }
    let translated = if let Some(rest) = address.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = address.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if address.starts_with("ws://") || address.starts_with("wss://") {
        address.to_string()
    } else if address.contains("://") {
        return None;
    } else {
        format!("ws://{address}")
    };
    Some(translated)
}

/// Build every candidate address in resolution order, without duplicates.
///
/// Order: the primary derived from `base_url`, the explicit host override,
/// the current host on the service and alternate ports, then the loopback
/// fallbacks on the service port.
pub fn candidate_urls(server: &ServerConfig) -> Vec<String> {
    let path = service_path(&server.service_path);
    let override_host = server
        .websocket_host
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty());

    let mut urls = Vec::new();
    let mut push = |url: String| {
        if !urls.contains(&url) {
            urls.push(url);
        }
    };

    let base = server.base_url.trim();
    let primary = if base.is_empty() || base.starts_with('/') {
        let host = override_host
            .map(str::to_string)
            .unwrap_or_else(|| format!("localhost:{}", server.service_port));
        to_socket_base(&host)
    } else {
        to_socket_base(base)
    };
    match primary {
        Some(primary) => push(format!("{primary}{path}")),
        None => warn!("unsupported scheme in base url: {base}"),
    }

    if let Some(host) = override_host {
        match to_socket_base(host) {
            Some(socket_base) => push(format!("{socket_base}{path}")),
            None => warn!("unsupported scheme in websocket host: {host}"),
        }
    }

    if let Some(host) = server.effective_page_host() {
        push(format!("ws://{host}:{}{path}", server.service_port));
        if let Some(port) = server.alternate_port {
            push(format!("ws://{host}:{port}{path}"));
        }
    }

    for host in &server.fallback_hosts {
        let host = host.trim();
        if !host.is_empty() {
            push(format!("ws://{host}:{}{path}", server.service_port));
        }
    }

    urls
}

fn service_path(path: &str) -> String {
    let path = path.trim();
    if path.is_empty() || path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// A reachable endpoint plus what was learned on the way.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub endpoint: String,
    pub candidates: Vec<Candidate>,
    pub outcomes: Vec<ProbeOutcome>,
}

/// Report of probing every candidate.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<ProbeOutcome>,
    pub recommendations: Vec<String>,
}

impl DiagnosticReport {
    /// First address that opened, in candidate order.
    pub fn recommended(&self) -> Option<&str> {
        self.results
            .iter()
            .find(|r| r.success)
            .map(|r| r.url.as_str())
    }
}

/// Finds a working WebSocket address.
pub struct EndpointResolver {
    server: ServerConfig,
    timeout: Duration,
    prober: Arc<dyn Prober>,
}

impl EndpointResolver {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_prober(config, Arc::new(WsProber))
    }

    pub fn with_prober(config: &AppConfig, prober: Arc<dyn Prober>) -> Self {
        Self {
            server: config.server.clone(),
            timeout: config.probe.timeout(),
            prober,
        }
    }

    pub fn candidates(&self) -> Vec<String> {
        candidate_urls(&self.server)
    }

    pub fn probe_timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe a single address with the configured timeout.
    pub async fn probe(&self, url: &str) -> ProbeOutcome {
        let outcome = self.prober.probe(url, self.timeout).await;
        if outcome.success {
            debug!("probe ok: {} ({}ms)", url, outcome.duration_ms);
        } else {
            warn!("probe failed: {}", outcome.failure_line());
        }
        outcome
    }

    /// Probe candidates in order and return the first that opens.
    pub async fn resolve(&self) -> ParkResult<Resolution> {
        let urls = self.candidates();
        let mut candidates: Vec<Candidate> = urls
            .iter()
            .map(|url| Candidate {
                url: url.clone(),
                probed: false,
                reachable: false,
            })
            .collect();
        let mut outcomes = Vec::with_capacity(urls.len());

        for (index, url) in urls.iter().enumerate() {
            let outcome = self.probe(url).await;
            candidates[index].probed = true;
            candidates[index].reachable = outcome.success;
            let success = outcome.success;
            outcomes.push(outcome);

            if success {
                info!("resolved endpoint {url} ({}/{})", index + 1, urls.len());
                return Ok(Resolution {
                    endpoint: url.clone(),
                    candidates,
                    outcomes,
                });
            }
        }

        Err(ParkError::NoReachableEndpoint {
            failures: outcomes.iter().map(ProbeOutcome::failure_line).collect(),
        })
    }

    /// Probe every candidate, without stopping at the first success.
    pub async fn diagnose(&self) -> DiagnosticReport {
        let mut results = Vec::new();
        for url in self.candidates() {
            results.push(self.probe(&url).await);
        }

        let successful = results.iter().filter(|r| r.success).count();
        let mut recommendations = Vec::new();
        if let Some(first) = results.iter().find(|r| r.success) {
            recommendations.push(format!("use {}", first.url));
        } else {
            recommendations.push("no WebSocket address could be opened".to_string());
            recommendations.push(format!(
                "check that the backend is running on port {}",
                self.server.service_port
            ));
            recommendations.push(format!(
                "check that the endpoint {} is enabled on the backend",
                service_path(&self.server.service_path)
            ));
        }

        DiagnosticReport {
            total: results.len(),
            successful,
            failed: results.len() - successful,
            results,
            recommendations,
        }
    }
}
