use super::logger::{LoggerConfig, ProfilingLogLevel};
use std::path::PathBuf;
use std::sync::Arc;

/// Static mutex holding the global configuration, initialized as `None`.
static TILECAST_GLOBAL_CONFIG: spin::Mutex<Option<Arc<GlobalConfig>>> = spin::Mutex::new(None);

/// The global configuration: fabric limits, pipeline shape, the ground-truth
/// cost table, predictor thresholds, and profiling output.
#[derive(Default, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct GlobalConfig {
    /// Fabric limits and timing.
    #[serde(default)]
    pub fabric: FabricConfig,

    /// Pipeline shape.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Cost table used by the cycle ledger.
    #[serde(default)]
    pub cost: CostConfig,

    /// Performance predictor thresholds and storage.
    #[serde(default)]
    pub predictor: PredictorConfig,

    /// Profiling output configuration.
    #[serde(default)]
    pub profiling: ProfilingConfig,
}

impl GlobalConfig {
    /// Retrieves the current global configuration, loading it from the
    /// current directory if not set.
    ///
    /// If no configuration is set, it attempts to load one from
    /// `tilecast.toml` or `TileCast.toml` in the current directory or its
    /// parents, then applies environment overrides. If no file is found, a
    /// default configuration is used.
    pub fn get() -> Arc<Self> {
        let mut state = TILECAST_GLOBAL_CONFIG.lock();
        if state.as_ref().is_none() {
            let config = Self::from_current_dir().override_from_env();
            *state = Some(Arc::new(config));
        }

        state.as_ref().cloned().unwrap()
    }

    /// Sets the global configuration to the provided value.
    ///
    /// # Panics
    /// Panics if the configuration has already been set or read, as it
    /// cannot be overridden afterwards.
    pub fn set(config: Self) {
        let mut state = TILECAST_GLOBAL_CONFIG.lock();
        if state.is_some() {
            panic!("Cannot set the global configuration multiple times.");
        }
        *state = Some(Arc::new(config));
    }

    /// Save the default configuration to the provided file path.
    pub fn save_default<P: AsRef<std::path::Path>>(path: P) -> std::io::Result<()> {
        use std::io::Write;

        let config = Self::get();
        let content =
            toml::to_string_pretty(config.as_ref()).expect("Default config should be serializable");
        let mut file = std::fs::File::create(path)?;
        file.write_all(content.as_bytes())?;

        Ok(())
    }

    /// Overrides configuration fields based on environment variables.
    pub fn override_from_env(mut self) -> Self {
        if let Ok(val) = std::env::var("TILECAST_DEBUG_LOG") {
            self.profiling.logger.level = ProfilingLogLevel::Full;

            match val.as_str() {
                "stdout" => {
                    self.profiling.logger.stdout = true;
                }
                "stderr" => {
                    self.profiling.logger.stderr = true;
                }
                "1" | "true" => {
                    self.profiling.logger.file = Some("/tmp/tilecast.log".into());
                }
                "0" | "false" => {
                    self.profiling.logger.level = ProfilingLogLevel::Disabled;
                }
                file_path => {
                    self.profiling.logger.file = Some(file_path.into());
                }
            }
        }

        if let Ok(val) = std::env::var("TILECAST_MODEL_DIR") {
            self.predictor.model_dir = Some(val.into());
        }

        self
    }

    // Loads configuration from `tilecast.toml` or `TileCast.toml` in the
    // current directory or its parents.
    //
    // Traverses up the directory tree until a configuration file is found or
    // the root is reached. Returns a default configuration if no file is
    // found.
    fn from_current_dir() -> Self {
        let mut dir = match std::env::current_dir() {
            Ok(dir) => dir,
            Err(_) => return Self::default(),
        };

        loop {
            if let Ok(content) = Self::from_file_path(dir.join("tilecast.toml")) {
                return content;
            }

            if let Ok(content) = Self::from_file_path(dir.join("TileCast.toml")) {
                return content;
            }

            if !dir.pop() {
                break;
            }
        }

        Self::default()
    }

    // Loads configuration from a specified file path.
    fn from_file_path<P: AsRef<std::path::Path>>(path: P) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = match toml::from_str(&content) {
            Ok(val) => val,
            Err(err) => panic!("The file provided doesn't have the right format => {err:?}"),
        };

        Ok(config)
    }
}

/// Fabric limits and timing.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct FabricConfig {
    /// Physical broadcast channels the fabric exposes.
    #[serde(default = "default_max_channels")]
    pub max_channels: usize,

    /// Memory available on one node for tiles, in bytes.
    #[serde(default = "default_node_memory")]
    pub node_memory_bytes: usize,

    /// Wall-clock deadline for one broadcast.
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_ms: u64,

    /// Elements per ingest burst on the host link.
    #[serde(default = "default_ingest_burst")]
    pub ingest_burst: usize,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            max_channels: default_max_channels(),
            node_memory_bytes: default_node_memory(),
            transfer_timeout_ms: default_transfer_timeout(),
            ingest_burst: default_ingest_burst(),
        }
    }
}

fn default_max_channels() -> usize {
    24
}

fn default_node_memory() -> usize {
    48 * 1024
}

fn default_transfer_timeout() -> u64 {
    5000
}

fn default_ingest_burst() -> usize {
    1024
}

/// Pipeline shape.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct PipelineConfig {
    /// Step parity classes. Two classes give classic double buffering.
    #[serde(default = "default_parity_classes")]
    pub parity_classes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parity_classes: default_parity_classes(),
        }
    }
}

fn default_parity_classes() -> usize {
    2
}

/// Affine transfer cost `alpha * words + beta * span + gamma`, in cycles.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TransferCostConfig {
    /// Cycles per word moved.
    pub alpha: f64,
    /// Cycles per node of span crossed.
    pub beta: f64,
    /// Fixed setup cycles.
    pub gamma: f64,
}

/// Compute cost parameters: `setup + kt * nt * (1 + mt) * overhead_factor`
/// cycles per step.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ComputeCostConfig {
    /// Fixed cycles per compute task.
    #[serde(default = "default_compute_setup")]
    pub setup: f64,

    /// Per-FMA-group overhead multiplier.
    #[serde(default = "default_overhead_factor")]
    pub overhead_factor: f64,
}

impl Default for ComputeCostConfig {
    fn default() -> Self {
        Self {
            setup: default_compute_setup(),
            overhead_factor: default_overhead_factor(),
        }
    }
}

fn default_compute_setup() -> f64 {
    120.0
}

fn default_overhead_factor() -> f64 {
    4.0
}

/// The ground-truth cost table of the fabric, per transfer direction.
///
/// The defaults mirror constants measured on the system this runtime
/// models: host ingress sustains 0.868 words per cycle, host egress 0.298,
/// and in-grid broadcasts 0.512.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct CostConfig {
    /// Host to grid streaming.
    #[serde(default = "default_h2d")]
    pub h2d: TransferCostConfig,

    /// Grid to host read back.
    #[serde(default = "default_d2h")]
    pub d2h: TransferCostConfig,

    /// Row and column broadcasts inside the grid.
    #[serde(default = "default_bcast")]
    pub bcast: TransferCostConfig,

    /// Per-step compute cost.
    #[serde(default)]
    pub compute: ComputeCostConfig,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            h2d: default_h2d(),
            d2h: default_d2h(),
            bcast: default_bcast(),
            compute: ComputeCostConfig::default(),
        }
    }
}

fn default_h2d() -> TransferCostConfig {
    TransferCostConfig {
        alpha: 1.0 / 0.868,
        beta: 12.0,
        gamma: 500.0,
    }
}

fn default_d2h() -> TransferCostConfig {
    TransferCostConfig {
        alpha: 1.0 / 0.298,
        beta: 12.0,
        gamma: 1000.0,
    }
}

fn default_bcast() -> TransferCostConfig {
    TransferCostConfig {
        alpha: 1.0 / 0.512,
        beta: 6.0,
        gamma: 20.0,
    }
}

/// Performance predictor thresholds and storage.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct PredictorConfig {
    /// Minimum acceptable coefficient of determination of a fit.
    #[serde(default = "default_r2_floor")]
    pub r2_floor: f64,

    /// Maximum acceptable mean absolute percentage error of a fit.
    #[serde(default = "default_mape_ceiling")]
    pub mape_ceiling: f64,

    /// Directory holding persisted model records. Defaults to
    /// `~/.cache/tilecast/models`.
    #[serde(default)]
    pub model_dir: Option<PathBuf>,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            r2_floor: default_r2_floor(),
            mape_ceiling: default_mape_ceiling(),
            model_dir: None,
        }
    }
}

fn default_r2_floor() -> f64 {
    0.90
}

fn default_mape_ceiling() -> f64 {
    0.15
}

/// Profiling output configuration.
#[derive(Default, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ProfilingConfig {
    /// Where and how to render per-run profiling summaries.
    #[serde(default)]
    pub logger: LoggerConfig<ProfilingLogLevel>,
}
