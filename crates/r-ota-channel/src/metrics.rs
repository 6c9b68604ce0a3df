//! ---
//! ota_section: "02-command-channel"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Prometheus metrics for command traffic."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::time::Duration;

use prometheus::{self, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

use crate::command::Command;

/// Metrics published by the command channel.
#[derive(Clone)]
pub struct ChannelMetrics {
    acknowledged: IntCounterVec,
    failures: IntCounterVec,
    round_trip: HistogramVec,
}

impl ChannelMetrics {
    /// Register all channel metrics with the provided registry.
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let acknowledged = IntCounterVec::new(
            Opts::new(
                "r_ota_commands_acknowledged_total",
                "Total number of commands acknowledged by the OTA master",
            ),
            &["command"],
        )?;
        registry.register(Box::new(acknowledged.clone()))?;

        let failures = IntCounterVec::new(
            Opts::new(
                "r_ota_command_failures_total",
                "Total number of commands that failed, by failure kind",
            ),
            &["command", "kind"],
        )?;
        registry.register(Box::new(failures.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "r_ota_command_round_trip_seconds",
            "Time between sending a command and receiving its status",
        )
        .buckets(prometheus::exponential_buckets(0.01, 4.0, 10)?);
        let round_trip = HistogramVec::new(histogram_opts, &["command"])?;
        registry.register(Box::new(round_trip.clone()))?;

        Ok(Self {
            acknowledged,
            failures,
            round_trip,
        })
    }

    /// Record an acknowledged command and its round-trip time.
    pub fn record_acknowledged(&self, command: Command, elapsed: Duration) {
        let label = command.to_string();
        self.acknowledged.with_label_values(&[&label]).inc();
        self.round_trip
            .with_label_values(&[&label])
            .observe(elapsed.as_secs_f64());
    }

    /// Record a failed command.
    pub fn record_failure(&self, command: Command, kind: &str) {
        self.failures
            .with_label_values(&[&command.to_string(), kind])
            .inc();
    }

    /// Acknowledged count for one command, mostly for diagnostics.
    pub fn acknowledged(&self, command: Command) -> u64 {
        self.acknowledged
            .with_label_values(&[&command.to_string()])
            .get()
    }

    /// Failure count for one command and kind.
    pub fn failures(&self, command: Command, kind: &str) -> u64 {
        self.failures
            .with_label_values(&[&command.to_string(), kind])
            .get()
    }
}

impl std::fmt::Debug for ChannelMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelMetrics").finish_non_exhaustive()
    }
}
