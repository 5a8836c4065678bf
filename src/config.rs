//! Startup configuration for the replication core.
//!
//! Mirrors the teacher's `WriteOperationConfig`: a plain `serde`-derived
//! struct with `#[serde(default = ...)]` per field, loadable from whatever
//! external settings store the embedding application uses (out of scope
//! per spec.md §1 — the core only accepts these values through
//! [`Controller`](crate::controller::Controller)'s constructor and setters).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::snapshot::{MAX_POLL_INTERVAL_MS, MIN_POLL_INTERVAL_MS};
use crate::watch::BASE_TICK_MS;
use crate::controller::{DEFAULT_DRAIN_INTERVAL_MS, DEFAULT_PARALLEL_EVENT_BUDGET};

fn default_destination_root() -> PathBuf {
    PathBuf::new()
}

fn default_stability_threshold_ms() -> u64 {
    5000
}

fn default_parallel_event_budget() -> usize {
    DEFAULT_PARALLEL_EVENT_BUDGET
}

fn default_event_drain_interval_ms() -> u64 {
    DEFAULT_DRAIN_INTERVAL_MS
}

fn default_base_tick_ms() -> u64 {
    BASE_TICK_MS
}

fn default_min_poll_interval_ms() -> u64 {
    MIN_POLL_INTERVAL_MS
}

fn default_max_poll_interval_ms() -> u64 {
    MAX_POLL_INTERVAL_MS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_destination_root")]
    pub destination_root: PathBuf,
    #[serde(default)]
    pub watched_paths: Vec<PathBuf>,
    #[serde(default = "default_stability_threshold_ms")]
    pub stability_threshold_ms: u64,
    #[serde(default = "default_parallel_event_budget")]
    pub parallel_event_budget: usize,
    #[serde(default = "default_event_drain_interval_ms")]
    pub event_drain_interval_ms: u64,
    #[serde(default = "default_base_tick_ms")]
    pub base_tick_ms: u64,
    #[serde(default = "default_min_poll_interval_ms")]
    pub min_poll_interval_ms: u64,
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            destination_root: default_destination_root(),
            watched_paths: Vec::new(),
            stability_threshold_ms: default_stability_threshold_ms(),
            parallel_event_budget: default_parallel_event_budget(),
            event_drain_interval_ms: default_event_drain_interval_ms(),
            base_tick_ms: default_base_tick_ms(),
            min_poll_interval_ms: default_min_poll_interval_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializing_an_empty_object_fills_in_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.stability_threshold_ms, 5000);
        assert_eq!(config.parallel_event_budget, DEFAULT_PARALLEL_EVENT_BUDGET);
    }

    #[test]
    fn deserializing_overrides_only_the_given_fields() {
        let config: Config = serde_json::from_str(r#"{"stability_threshold_ms": 2000}"#).unwrap();
        assert_eq!(config.stability_threshold_ms, 2000);
        assert_eq!(config.base_tick_ms, BASE_TICK_MS);
    }
}
