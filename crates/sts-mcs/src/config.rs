//! Configuration structs loaded from TOML (`spec.md` §1 ambient config
//! layer; §4.C, §4.E, §4.G for the field lists themselves).
//!
//! Mirrors the teacher's `SimConfig` pattern: a plain struct with
//! `#[derive(Deserialize)]` and a `Default` impl giving every field a
//! sensible value, loaded with `toml::from_str` and overridable by CLI
//! flags.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StsError;

/// Per-event-class timeouts used by the scheduler while waiting for an
/// expected internal event during replay (`spec.md` §4.C, resolving its
/// Open Question on default wait times).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub control_message_timeout_ms: u64,
    pub controller_state_change_timeout_ms: u64,
    pub default_wait_time_ms: u64,
    /// Interpolated-time epsilon, in microseconds, subtracted from the next
    /// landmark event's timestamp (`spec.md` §4.D).
    pub time_epsilon_micros: i64,
    /// Length of the bootstrap window during which deterministic-value and
    /// state-change requests are passed straight through rather than
    /// matched against the log (`spec.md` §4.D, §4.H).
    pub bootstrap_pass_through_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            control_message_timeout_ms: 2_000,
            controller_state_change_timeout_ms: 5_000,
            default_wait_time_ms: 10_000,
            time_epsilon_micros: 500,
            bootstrap_pass_through_ms: 5_000,
        }
    }
}

impl SchedulerConfig {
    pub fn control_message_timeout(&self) -> Duration {
        Duration::from_millis(self.control_message_timeout_ms)
    }
    pub fn controller_state_change_timeout(&self) -> Duration {
        Duration::from_millis(self.controller_state_change_timeout_ms)
    }
    pub fn default_wait_time(&self) -> Duration {
        Duration::from_millis(self.default_wait_time_ms)
    }
    pub fn bootstrap_pass_through(&self) -> Duration {
        Duration::from_millis(self.bootstrap_pass_through_ms)
    }
}

/// Per-round probabilities and target counts for the fuzzer, matching
/// `original_source/sts/control_flow.py`'s `Fuzzer.__init__` parameter set
/// (`spec.md` §4.E, every rate named in steps 1-8).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzerParams {
    /// Step 1: per dataplane-trace event, probability of delaying delivery.
    pub dataplane_delay_rate: f64,
    /// Step 1: per dataplane-trace event not delayed, probability of
    /// dropping it outright (also applied unconditionally if its link is
    /// down).
    pub dataplane_drop_rate: f64,
    /// Step 2: per unblocked control channel, probability of blocking it.
    pub controlplane_block_rate: f64,
    /// Step 2: per blocked control channel, probability of unblocking it.
    pub controlplane_unblock_rate: f64,
    /// Step 3: per pending controller-bound message, probability of
    /// releasing it this round.
    pub ofp_message_receipt_rate: f64,
    pub switch_failure_rate: f64,
    pub switch_recovery_rate: f64,
    pub link_failure_rate: f64,
    pub link_recovery_rate: f64,
    pub controller_failure_rate: f64,
    pub controller_recovery_rate: f64,
    /// Step 6: per host, probability of synthesizing a packet, used only
    /// when no dataplane trace is configured.
    pub traffic_generation_rate: f64,
    /// Step 8: per access link, probability of migrating its host to a
    /// different live edge switch.
    pub host_migration_rate: f64,
    /// Minimum number of switches/controllers/links that must remain live
    /// at all times; the fuzzer refuses to fail the last one.
    pub min_live_count: u32,
    /// Round interval at which invariants are checked; `None` disables
    /// periodic invariant checking (the driver checks once at the end).
    pub check_interval: Option<u32>,
    /// Round interval at which one dataplane trace event is injected.
    pub trace_interval: u32,
    /// Wall-clock delay slept at the end of every round.
    pub delay_ms: u64,
    /// Total rounds to run; `None` means "until `halt_on_violation` fires".
    pub steps: Option<u64>,
    /// Stop the fuzz loop as soon as the invariant checker reports a
    /// violation, rather than continuing to `steps`.
    pub halt_on_violation: bool,
}

impl Default for FuzzerParams {
    fn default() -> Self {
        Self {
            dataplane_delay_rate: 0.1,
            dataplane_drop_rate: 0.05,
            controlplane_block_rate: 0.01,
            controlplane_unblock_rate: 0.3,
            ofp_message_receipt_rate: 0.9,
            switch_failure_rate: 0.05,
            switch_recovery_rate: 0.3,
            link_failure_rate: 0.05,
            link_recovery_rate: 0.3,
            controller_failure_rate: 0.02,
            controller_recovery_rate: 0.3,
            traffic_generation_rate: 0.3,
            host_migration_rate: 0.01,
            min_live_count: 1,
            check_interval: Some(1),
            trace_interval: 10,
            delay_ms: 0,
            steps: Some(100),
            halt_on_violation: true,
        }
    }
}

/// Delta-debugging driver configuration (`spec.md` §4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaConfig {
    /// Maximum number of consecutive subprocess crashes tolerated before
    /// the driver gives up with [`crate::error::StsError::TooManyCrashes`].
    pub max_consecutive_crashes: u64,
    /// Number of times the initial full-trace reproducibility check is
    /// retried before declaring the bug not reproducible.
    pub reproducibility_retries: u32,
    /// Use the O(n) carryover variant (`EfficientMCSFinder`) instead of the
    /// canonical quadratic-worst-case `ddmin`.
    pub efficient: bool,
    /// Optional directory to dump intermediate MCS traces as they shrink,
    /// for post-hoc inspection.
    pub intermediate_trace_dir: Option<std::path::PathBuf>,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            max_consecutive_crashes: 4,
            reproducibility_retries: 2,
            efficient: false,
            intermediate_trace_dir: None,
        }
    }
}

/// Top-level configuration file shape, loaded once at CLI startup and
/// threaded through to the scheduler, fuzzer, and delta debugger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StsConfig {
    pub scheduler: SchedulerConfig,
    pub fuzzer: FuzzerParams,
    pub delta: DeltaConfig,
    /// RNG seed for fuzzing and any other non-deterministic choice in the
    /// pipeline; a fixed seed makes the whole run reproducible.
    pub seed: u64,
}

impl StsConfig {
    pub fn load(path: &Path) -> Result<Self, StsError> {
        let content = std::fs::read_to_string(path).map_err(StsError::Io)?;
        toml::from_str(&content).map_err(|e| StsError::CorruptTrace {
            path: path.to_path_buf(),
            reason: format!("invalid config: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let config = StsConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: StsConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.seed, config.seed);
        assert_eq!(
            parsed.scheduler.control_message_timeout_ms,
            config.scheduler.control_message_timeout_ms
        );
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let parsed: StsConfig = toml::from_str("seed = 42\n").unwrap();
        assert_eq!(parsed.seed, 42);
        assert_eq!(parsed.scheduler.time_epsilon_micros, 500);
    }
}
