use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::scoring::TiePolicy;
use crate::tasks::{TaskConfig, TaskKind};

const CONFIG_FILENAME: &str = "config.json";

/// Settings for extraction and scoring runs, read from a JSON file.
/// Command line flags override individual fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig
{
    /// SQLite store. Defaults to the platform data directory.
    #[serde(default)]
    pub database: Option<PathBuf>,
    pub catalogs: Vec<PathBuf>,
    #[serde(default)]
    pub excluded_models: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub tie_policy: TiePolicy,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    pub tasks: Vec<TaskConfig>,
}

fn default_batch_size() -> usize
{
    32
}

fn default_output_dir() -> PathBuf
{
    PathBuf::from("results")
}

impl RunConfig
{
    /// A configuration for the standard layout: catalogs under `<root>/catalogs`,
    /// trial files and stimuli under `<root>/data`.
    pub fn with_root(root: &Path) -> Self
    {
        let catalogs = ["tensorflow_hub", "keras", "pytorch", "timm", "transformers", "pretrainedmodels"]
            .iter()
            .map(|source| root.join("catalogs").join(format!("hubModels_{}.json", source)))
            .collect();

        RunConfig {
            database: None,
            catalogs,
            excluded_models: Vec::new(),
            batch_size: default_batch_size(),
            tie_policy: TiePolicy::default(),
            output_dir: root.join(default_output_dir()),
            tasks: TaskConfig::defaults(&root.join("data")),
        }
    }

    pub fn task(&self, kind: TaskKind) -> Option<&TaskConfig>
    {
        self.tasks.iter().find(|t| t.kind() == kind)
    }
}

impl Default for RunConfig
{
    fn default() -> Self
    {
        Self::with_root(Path::new("."))
    }
}

/// Load a JSON configuration from disk, creating it with the provided initializer if missing.
pub fn load_or_init<T, F>(path: &Path, initializer: F) -> anyhow::Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> T,
{
    if path.exists() {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let value = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;
        Ok(value)
    } else {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let value = initializer();
        let serialized = serde_json::to_string_pretty(&value)?;
        fs::write(path, serialized)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        Ok(value)
    }
}

pub fn default_config_path() -> anyhow::Result<PathBuf>
{
    let dir = dirs::config_dir().ok_or(anyhow::anyhow!("Error getting config directory"))?;
    Ok(dir.join("simtrials").join(CONFIG_FILENAME))
}

#[cfg(test)]
mod tests
{
    use crate::tasks::TrialLayout;
    use super::*;

    #[test]
    fn missing_config_is_written_with_defaults()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILENAME);

        let config: RunConfig = load_or_init(&path, || RunConfig::with_root(dir.path())).unwrap();
        assert!(path.exists());
        assert_eq!(config.tasks.len(), 4);
        assert_eq!(config.batch_size, 32);
        assert!(config.task(TaskKind::ThreeAfc).unwrap().crop.is_some());

        let reloaded: RunConfig = load_or_init(&path, || unreachable!()).unwrap();
        assert_eq!(config, reloaded);
    }

    #[test]
    fn partial_config_fills_defaults()
    {
        let json = r#"{
            "catalogs": ["hubModels_timm.json"],
            "tie_policy": "last_listed",
            "tasks": [
                { "task": "oddball", "answer_column": 1, "image_pattern": "trial{trial}-{slot}.jpg",
                  "trials": "odd.csv", "images": "stimuli" }
            ]
        }"#;
        let config: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.tie_policy, TiePolicy::LastListed);
        assert_eq!(config.output_dir, PathBuf::from("results"));

        let oddball = config.task(TaskKind::Oddball).unwrap();
        assert!(matches!(oddball.layout, TrialLayout::Oddball { .. }));
        assert!(oddball.has_header);
        assert_eq!(oddball.crop, None);
        assert!(config.task(TaskKind::ThreeAfc).is_none());
    }

    #[test]
    fn unparseable_config_reports_path()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        fs::write(&path, "{ not json").unwrap();

        let err = load_or_init::<RunConfig, _>(&path, RunConfig::default).unwrap_err();
        assert!(err.to_string().contains("failed to parse config"));
    }
}
