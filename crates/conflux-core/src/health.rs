//! Health monitor: periodically probes every enabled entry and writes status
//! back into the registry.
//!
//! The monitor is the sole writer of health state during normal operation.
//! Probe failures are recorded, never propagated: a sweep always completes
//! for every entry regardless of individual probe outcomes.

use crate::registry::entry::{HealthState, HealthUpdate, RegistryEntry};
use crate::registry::ModelRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

/// Probe latency above which a reachable entry is classified `Degraded`.
const DEGRADED_LATENCY_MS: f64 = 5000.0;

/// Configuration for the health monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthMonitorConfig {
    /// Interval between sweeps, in milliseconds.
    pub check_interval_ms: u64,
    /// Per-probe timeout, in milliseconds.
    pub timeout_ms: u64,
    /// Maximum probes in flight at once.
    pub max_concurrent_probes: usize,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self { check_interval_ms: 60_000, timeout_ms: 5_000, max_concurrent_probes: 8 }
    }
}

impl HealthMonitorConfig {
    /// Sweep interval as a Duration.
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Probe timeout as a Duration.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Aggregated health counts across enabled entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OverallHealth {
    /// Entries currently healthy.
    pub healthy: usize,
    /// Entries currently degraded.
    pub degraded: usize,
    /// Entries currently down.
    pub down: usize,
    /// Total enabled entries.
    pub total: usize,
}

/// Periodic prober of registry entries.
pub struct HealthMonitor {
    registry: Arc<ModelRegistry>,
    config: HealthMonitorConfig,
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
    shutdown_tx: Option<mpsc::UnboundedSender<()>>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.config)
            .field("running", &self.shutdown_tx.is_some())
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    /// Creates a monitor over the given registry.
    #[must_use]
    pub fn new(registry: Arc<ModelRegistry>, config: HealthMonitorConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_probes.max(1)));
        Self {
            registry,
            config,
            client: reqwest::Client::new(),
            semaphore,
            shutdown_tx: None,
        }
    }

    /// Starts periodic monitoring: one immediate full sweep, then a
    /// recurring timer.
    ///
    /// # Errors
    /// Returns an error if the monitor is already running.
    pub fn start(&mut self) -> Result<(), String> {
        if self.shutdown_tx.is_some() {
            return Err("Health monitor is already running".to_string());
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel();
        self.shutdown_tx = Some(shutdown_tx);

        let registry = Arc::clone(&self.registry);
        let client = self.client.clone();
        let config = self.config.clone();
        let semaphore = Arc::clone(&self.semaphore);

        tokio::spawn(async move {
            info!("Health monitor started");
            Self::sweep(&registry, &client, &config, &semaphore).await;

            let mut interval = tokio::time::interval(config.check_interval());
            // The first tick completes immediately and the immediate sweep
            // already ran; consume it.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Health monitor shutdown signal received");
                        break;
                    }
                    _ = interval.tick() => {
                        Self::sweep(&registry, &client, &config, &semaphore).await;
                    }
                }
            }

            info!("Health monitor stopped");
        });

        Ok(())
    }

    /// Stops periodic monitoring.
    ///
    /// # Errors
    /// Returns an error if the monitor is not running.
    pub fn stop(&mut self) -> Result<(), String> {
        match self.shutdown_tx.take() {
            Some(shutdown_tx) => {
                let _ = shutdown_tx.send(());
                Ok(())
            }
            None => Err("Health monitor is not running".to_string()),
        }
    }

    /// Whether the recurring timer is armed.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Probes every enabled entry once and writes the results into the
    /// registry. Never fails: per-entry probe errors are recorded as `Down`.
    pub async fn check_all_models(&self) {
        Self::sweep(&self.registry, &self.client, &self.config, &self.semaphore).await;
    }

    async fn sweep(
        registry: &Arc<ModelRegistry>,
        client: &reqwest::Client,
        config: &HealthMonitorConfig,
        semaphore: &Arc<Semaphore>,
    ) {
        let targets: Vec<RegistryEntry> =
            registry.list().into_iter().filter(|entry| entry.enabled).collect();
        debug!(targets = targets.len(), "Health sweep starting");

        let probes = targets.into_iter().map(|entry| {
            let registry = Arc::clone(registry);
            let client = client.clone();
            let timeout = config.probe_timeout();
            let semaphore = Arc::clone(semaphore);
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                let update = Self::probe(&client, &entry, timeout).await;
                if let Err(e) = registry.update_health(&entry.id, update) {
                    // The entry was unregistered mid-sweep.
                    debug!(model_id = %entry.id, error = %e, "Discarding probe result");
                }
            }
        });

        futures::future::join_all(probes).await;
        debug!("Health sweep complete");
    }

    /// Probes one entry. With a declared health-check endpoint this is a
    /// bounded-timeout reachability check; without one the entry is assumed
    /// reachable. All errors are converted into a `Down` update here.
    async fn probe(
        client: &reqwest::Client,
        entry: &RegistryEntry,
        timeout: Duration,
    ) -> HealthUpdate {
        let Some(ref url) = entry.health_check else {
            return HealthUpdate {
                state: Some(HealthState::Healthy),
                latency_ms: None,
                error_rate: Some(0.0),
                uptime: None,
            };
        };

        let started = Instant::now();
        match client.get(url).timeout(timeout).send().await {
            Ok(response) if response.status().is_success() => {
                let latency_ms = started.elapsed().as_millis() as f64;
                HealthUpdate {
                    state: Some(Self::derive_state(latency_ms)),
                    latency_ms: Some(latency_ms),
                    error_rate: Some(0.0),
                    uptime: None,
                }
            }
            Ok(response) => {
                warn!(
                    model_id = %entry.id,
                    status = %response.status(),
                    "Health check returned error status"
                );
                Self::down_update(started)
            }
            Err(e) => {
                warn!(model_id = %entry.id, error = %e, "Health check probe failed");
                Self::down_update(started)
            }
        }
    }

    /// Reachable-entry classification: slow probes degrade, fast probes are
    /// healthy.
    fn derive_state(latency_ms: f64) -> HealthState {
        if latency_ms > DEGRADED_LATENCY_MS {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        }
    }

    fn down_update(started: Instant) -> HealthUpdate {
        HealthUpdate {
            state: Some(HealthState::Down),
            latency_ms: Some(started.elapsed().as_millis() as f64),
            error_rate: Some(1.0),
            uptime: None,
        }
    }

    /// Aggregates health counts across enabled entries.
    #[must_use]
    pub fn overall_health(&self) -> OverallHealth {
        let mut overall = OverallHealth::default();
        for (entry, status) in self.registry.snapshot() {
            if !entry.enabled {
                continue;
            }
            overall.total += 1;
            match status.state {
                HealthState::Healthy => overall.healthy += 1,
                HealthState::Degraded => overall.degraded += 1,
                HealthState::Down => overall.down += 1,
            }
        }
        overall
    }
}
