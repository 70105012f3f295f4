use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::queue::LauncherArgs;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub store: StoreConfig,
    pub worker: WorkerConfig,
    pub queue: QueueConfig,
    pub launcher: LauncherConfig,
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("athena")
                .join("store"),
        }
    }
}

/// Identity of this worker; only work with a matching category is submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub name: String,
    pub category: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "athena".to_string(),
            category: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    #[serde(alias = "PBS")]
    Pbs,
    #[serde(alias = "SLURM", alias = "Slurm")]
    Slurm,
}

/// Default batch-queue settings; work items may override some of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub q_type: QueueKind,
    pub q_name: String,
    pub queue: String,
    pub account: String,
    pub walltime: String,
    pub nnodes: u32,
    pub ppnode: u32,
    pub job_name: String,
    pub logdir: Option<PathBuf>,
    /// Shell lines run before the job command (e.g. `module load ...`)
    pub pre_rocket: Option<String>,
    /// Replaces the generated job body when set
    pub rocket_launch: Option<String>,
    /// Submit executable, defaults to qsub/sbatch
    pub submit_command: Option<String>,
    /// Status executable, defaults to qstat/squeue
    pub status_command: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            q_type: QueueKind::Pbs,
            q_name: "default_queue".to_string(),
            queue: "batch".to_string(),
            account: String::new(),
            walltime: "01:00:00".to_string(),
            nnodes: 0,
            ppnode: 0,
            job_name: "unnamed_job".to_string(),
            logdir: None,
            pre_rocket: None,
            rocket_launch: None,
            submit_command: None,
            status_command: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub launch_dir: PathBuf,
    pub reserve: bool,
    /// Skip submission while the queue holds this many of our jobs (0 = no limit)
    pub max_jobs_queue: usize,
    /// Maximum launches per submission call (0 = no limit)
    pub nlaunches: usize,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            launch_dir: PathBuf::from("out"),
            reserve: true,
            max_jobs_queue: 0,
            nlaunches: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub poll_interval_ms: u64,
    pub daemon_mode: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            daemon_mode: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            store: StoreConfig::default(),
            worker: WorkerConfig::default(),
            queue: QueueConfig::default(),
            launcher: LauncherConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir
                .join(project_name)
                .join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!(
                            "Failed to load config from {}: {}",
                            primary_config.display(),
                            e
                        );
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
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

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.reconcile.poll_interval_ms == 0 {
            eyre::bail!("reconcile.poll_interval_ms must be > 0");
        }
        if self.launcher.launch_dir.as_os_str().is_empty() {
            eyre::bail!("launcher.launch_dir must not be empty");
        }
        Ok(())
    }

    /// Bundle forwarded to every submission call.
    pub fn launcher_args(&self) -> LauncherArgs {
        LauncherArgs {
            worker: self.worker.clone(),
            queue: self.queue.clone(),
            launch_dir: self.launcher.launch_dir.clone(),
            reserve: self.launcher.reserve,
            max_jobs_queue: self.launcher.max_jobs_queue,
            nlaunches: self.launcher.nlaunches,
            log_level: self.log_level.clone().unwrap_or_else(|| "info".to_string()),
        }
    }
}
