//! Engine configuration management.

use anyhow::{Context, Result};
use gantry_artifacts::Compression;
use gantry_release::ReleaseTarget;
use gantry_runner::RunnerConfig;
use gantry_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Everything `gantry run` needs to wire an engine together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(flatten)]
    pub scheduler: SchedulerConfig,
    /// Per-job workspaces are created below this directory.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    #[serde(default)]
    pub keep_workspaces: bool,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub release: ReleaseTarget,
    #[serde(default)]
    pub container: ContainerConfig,
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".gantry/work")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            workspace_root: default_workspace_root(),
            keep_workspaces: false,
            artifacts: ArtifactsConfig::default(),
            release: ReleaseTarget::default(),
            container: ContainerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArtifactsConfig {
    /// Artifacts live for the duration of the process.
    #[default]
    Memory,
    Filesystem {
        root: PathBuf,
        #[serde(default)]
        compression: Compression,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Connect to the local Docker daemon for container jobs.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Pull images before starting containers.
    #[serde(default = "default_true")]
    pub pull: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pull: true,
        }
    }
}

impl EngineConfig {
    /// Load from an explicit file, or from the platform config directory.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match Self::config_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // An empty document is a valid, all-defaults config.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Get the default configuration file path.
    pub fn config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "gantry", "gantry")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig::new(&self.workspace_root).keep_workspaces(self.keep_workspaces)
    }
}
