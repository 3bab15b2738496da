use eyre::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::controller::{ControllerConfig, StorePaths, Stores};
use crate::gate::EvaluationGate;
use crate::gate::scoring::DEFAULT_GATES;
use crate::step::ExecutorConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub engine: EngineConfig,
    pub gate: GateConfig,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            engine: EngineConfig::default(),
            gate: GateConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_iterations: u32,
    pub workers: usize,
    pub step_timeout_ms: u64,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            workers: 1,
            step_timeout_ms: 300_000,
            retry_base_ms: 500,
            retry_max_ms: 30_000,
        }
    }
}

impl EngineConfig {
    pub fn to_controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            max_iterations: self.max_iterations,
            workers: self.workers,
            executor: ExecutorConfig {
                default_timeout: Duration::from_millis(self.step_timeout_ms),
                retry_base: Duration::from_millis(self.retry_base_ms),
                retry_max: Duration::from_millis(self.retry_max_ms),
            },
        }
    }
}

/// One expected metric; without a threshold the vector's own is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateMetric {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub metrics: Vec<GateMetric>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            metrics: DEFAULT_GATES
                .iter()
                .map(|(name, threshold)| GateMetric {
                    name: name.to_string(),
                    threshold: Some(*threshold),
                })
                .collect(),
        }
    }
}

impl GateConfig {
    pub fn to_gate(&self) -> EvaluationGate {
        let gate = EvaluationGate::new(self.metrics.iter().map(|m| m.name.clone()));
        self.metrics.iter().fold(gate, |gate, metric| match metric.threshold {
            Some(threshold) => gate.with_threshold(metric.name.clone(), threshold),
            None => gate,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(env!("CARGO_PKG_NAME")),
        }
    }
}

impl StorageConfig {
    pub fn paths(&self) -> StorePaths {
        StorePaths::under(&self.root)
    }

    pub fn open(&self) -> Result<Stores> {
        Stores::open(&self.root).context(format!("Failed to open stores under {}", self.root.display()))
    }
}

impl Config {
    /// Filter handed to env_logger when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");

        // Try local override: ./.<project>.yml
        let local_config = PathBuf::from(format!(".{}.yml", project_name));
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.max_iterations == 0 {
            bail!("engine.max_iterations must be at least 1");
        }
        if self.engine.workers == 0 {
            bail!("engine.workers must be at least 1");
        }
        if self.engine.retry_base_ms > self.engine.retry_max_ms {
            bail!("engine.retry_base_ms exceeds engine.retry_max_ms");
        }
        for metric in &self.gate.metrics {
            if let Some(threshold) = metric.threshold {
                if !(0.0..=1.0).contains(&threshold) {
                    bail!("gate threshold for '{}' must be within [0, 1], got {}", metric.name, threshold);
                }
            }
        }
        Ok(())
    }
}
