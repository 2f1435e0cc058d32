use std::time::Duration;

use antixray_shared::config::WorldSettings;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub listen_addr: String,
    /// Worker threads running ray-trace jobs (at least 1)
    pub ray_trace_threads: usize,
    /// Tick cadence in milliseconds (at least 1)
    pub ms_per_ray_trace_tick: u64,
    /// Bound for forward visibility probes (blocks)
    pub max_ray_trace_distance: f64,
    /// Bound for third-person camera pull-back probes (blocks)
    pub max_zoom: f64,
    /// How long teardown waits for running jobs before abandoning them
    pub shutdown_grace_ms: u64,
    /// Collect per-job timings from startup
    pub timings_enabled: bool,
    pub world_settings: WorldSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9002".to_string(),
            ray_trace_threads: 2,
            ms_per_ray_trace_tick: 50,
            max_ray_trace_distance: 64.0,
            max_zoom: 4.0,
            shutdown_grace_ms: 1000,
            timings_enabled: false,
            world_settings: WorldSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, String> {
        serde_json::from_str(json).map_err(|e| format!("config parse error: {}", e))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.listen_addr.is_empty() {
            return Err("listen_addr must not be empty".to_string());
        }
        if !self.max_ray_trace_distance.is_finite() || self.max_ray_trace_distance <= 0.0 {
            return Err("max_ray_trace_distance must be finite and > 0".to_string());
        }
        if !self.max_zoom.is_finite() || self.max_zoom <= 0.0 {
            return Err("max_zoom must be finite and > 0".to_string());
        }
        self.world_settings.validate()
    }

    pub fn worker_count(&self) -> usize {
        self.ray_trace_threads.max(1)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_millis(self.ms_per_ray_trace_tick.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn thread_count_and_cadence_are_clamped() {
        let config = EngineConfig {
            ray_trace_threads: 0,
            ms_per_ray_trace_tick: 0,
            ..Default::default()
        };
        assert_eq!(config.worker_count(), 1);
        assert_eq!(config.tick_duration(), Duration::from_millis(1));
    }

    #[test]
    fn non_positive_zoom_invalid() {
        let config = EngineConfig {
            max_zoom: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_takes_defaults() {
        let config = EngineConfig::from_json(
            r#"{"rayTraceThreads":4,"worldSettings":{"default":{"rayTrace":true},"nether":{"rayTrace":false}}}"#,
        )
        .unwrap();
        assert_eq!(config.ray_trace_threads, 4);
        assert_eq!(config.ms_per_ray_trace_tick, 50);
        assert!(!config.world_settings.policy_for("nether").ray_trace);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn malformed_json_reports_error() {
        assert!(EngineConfig::from_json("{not json").is_err());
    }
}
