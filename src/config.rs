//! Run configuration (spec §6), loaded once from YAML at startup.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaSelection {
    Center,
    Random,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    Berlin,
    Germany,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryProtocol {
    Baseline,
    Vivaldi,
    Meridian,
    Random,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    pub runtime: f64,
    pub area: f64,
    pub area_selection: AreaSelection,
    pub scenario: Scenario,
    pub discovery_protocol: DiscoveryProtocol,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_warmup_secs")]
    pub warmup_secs: f64,
}

fn default_warmup_secs() -> f64 {
    10.0
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MapConfig {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientsConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub max_clients: Option<usize>,
    pub client_ratio: f64,
    #[serde(default = "default_latency_threshold")]
    pub latency_threshold: f64,
    #[serde(default = "default_roundtrip_threshold")]
    pub roundtrip_threshold: f64,
    #[serde(default = "default_timeout_threshold")]
    pub timeout_threshold: f64,
}

fn default_latency_threshold() -> f64 {
    0.005
}
fn default_roundtrip_threshold() -> f64 {
    1.2
}
fn default_timeout_threshold() -> f64 {
    0.1
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodesConfig {
    pub path: PathBuf,
    pub min_nodes: usize,
    #[serde(default)]
    pub max_nodes: Option<usize>,
    pub slot_scaler: f64,
    #[serde(default)]
    pub unlimited_bandwidth: bool,
    #[serde(default = "default_hardware_tier")]
    pub hardware_tier: u32,
    /// Overrides the primary ring capacity `k = ceil(log_1.6(N))` (spec §3).
    #[serde(default)]
    pub meridian_primary_capacity: Option<usize>,
    /// Overrides the secondary ring capacity, default `N - k` (spec §3).
    #[serde(default)]
    pub meridian_secondary_capacity: Option<usize>,
}

fn default_hardware_tier() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub simulation: SimulationConfig,
    pub map: MapConfig,
    pub clients: ClientsConfig,
    pub nodes: NodesConfig,
}

impl Config {
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::InputIo {
            path: path.display().to_string(),
            source,
        })?;
        let cfg: Config = serde_yaml::from_str(&text).map_err(|e| ConfigError::InputParse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.map;
        if !(m.x_min < m.x_max) || !(m.y_min < m.y_max) {
            return Err(ConfigError::DegenerateMap {
                x_min: m.x_min,
                x_max: m.x_max,
                y_min: m.y_min,
                y_max: m.y_max,
            });
        }
        Ok(())
    }
}
