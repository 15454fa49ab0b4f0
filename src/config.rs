use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::client::DEFAULT_TIMEOUT;
use crate::domain::{Dataset, FileTemplate, RunHour};
use crate::error::MirrorError;
use crate::s3::{ObjectStorage, S3Settings};
use crate::store::{LocalStore, Storage};

pub const DEFAULT_CONFIG_PATH: &str = "./config.yaml";
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_LISTING_SUFFIX: &str = ".grib2.bz2";
pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub datasets: Vec<DatasetEntry>,
    #[serde(default)]
    pub storage: StorageEntry,
    #[serde(default)]
    pub http: HttpEntry,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DatasetEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub file_template: Option<String>,
    #[serde(default)]
    pub grid: Option<String>,
    #[serde(default)]
    pub subgrid: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub runs: Option<Vec<RunEntry>>,
    #[serde(default)]
    pub variables: Option<Vec<String>>,
    #[serde(default)]
    pub forecast_steps: Option<Vec<u32>>,
    #[serde(default)]
    pub listing_suffix: Option<String>,
}

/// Runs may be written as `"06"` or as a bare `6`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RunEntry {
    Hour(u32),
    Label(String),
}

impl RunEntry {
    fn resolve(&self) -> Result<RunHour, MirrorError> {
        match self {
            RunEntry::Hour(hour) => format!("{hour:02}").parse(),
            RunEntry::Label(label) => label.parse(),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StorageEntry {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub decompress: bool,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct HttpEntry {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageSettings {
    Local { data_dir: Utf8PathBuf },
    S3(S3Settings),
}

impl StorageSettings {
    pub fn open(&self) -> Result<Box<dyn Storage>, MirrorError> {
        match self {
            StorageSettings::Local { data_dir } => Ok(Box::new(LocalStore::new(data_dir.clone())?)),
            StorageSettings::S3(settings) => Ok(Box::new(ObjectStorage::connect(settings)?)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub datasets: Vec<Dataset>,
    pub storage: StorageSettings,
    pub decompress: bool,
    pub timeout: Duration,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// `CONFIG_PATH` wins over the explicit path, which wins over the default.
    pub fn config_path(explicit: Option<&str>) -> PathBuf {
        Self::config_path_with(explicit, &env_var)
    }

    pub fn config_path_with(
        explicit: Option<&str>,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> PathBuf {
        if let Some(path) = env("CONFIG_PATH") {
            return PathBuf::from(path);
        }
        PathBuf::from(explicit.unwrap_or(DEFAULT_CONFIG_PATH))
    }

    pub fn resolve(explicit: Option<&str>) -> Result<ResolvedConfig, MirrorError> {
        let path = Self::config_path(explicit);
        info!(path = %path.display(), "loading config");
        let raw = fs::read_to_string(&path).map_err(|_| MirrorError::ConfigRead(path.clone()))?;
        Self::resolve_str(&raw, &env_var)
    }

    pub fn resolve_str(
        raw: &str,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<ResolvedConfig, MirrorError> {
        let expanded = expand_env(raw, env)?;
        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|err| MirrorError::ConfigParse(err.to_string()))?;
        Self::resolve_config(config, env)
    }

    pub fn resolve_config(
        config: Config,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<ResolvedConfig, MirrorError> {
        let decompress = config.storage.decompress;
        let storage = resolve_storage(&config.storage, env)?;
        let datasets = config
            .datasets
            .into_iter()
            .enumerate()
            .map(|(index, entry)| resolve_dataset(index, entry, decompress))
            .collect::<Result<Vec<_>, MirrorError>>()?;
        let timeout = config
            .http
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        Ok(ResolvedConfig {
            datasets,
            storage,
            decompress,
            timeout,
        })
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn first_env(env: &dyn Fn(&str) -> Option<String>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| env(name))
}

/// Shell-style `$NAME` / `${NAME}` substitution; unknown names are left as is.
pub fn expand_env(raw: &str, env: &dyn Fn(&str) -> Option<String>) -> Result<String, MirrorError> {
    let pattern = Regex::new(r"\$(?:\{([^}]+)\}|([A-Za-z0-9_]+))")
        .map_err(|err| MirrorError::ConfigParse(err.to_string()))?;
    let expanded = pattern.replace_all(raw, |caps: &Captures<'_>| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|value| value.as_str())
            .unwrap_or_default();
        env(name).unwrap_or_else(|| caps[0].to_string())
    });
    Ok(expanded.into_owned())
}

fn resolve_storage(
    entry: &StorageEntry,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<StorageSettings, MirrorError> {
    let kind = env("STORAGE_TYPE")
        .or_else(|| entry.kind.clone())
        .unwrap_or_else(|| "fs".to_string());

    match kind.as_str() {
        "fs" => {
            let data_dir = if let Some(dir) = env("DWD_DATA_DIR") {
                info!(data_dir = %dir, "using DWD_DATA_DIR for data storage");
                dir
            } else if let Some(dir) = entry.data_dir.clone() {
                info!(data_dir = %dir, "using configured data directory");
                dir
            } else {
                info!(data_dir = DEFAULT_DATA_DIR, "using default data directory");
                DEFAULT_DATA_DIR.to_string()
            };
            Ok(StorageSettings::Local {
                data_dir: Utf8PathBuf::from(data_dir),
            })
        }
        "s3" => {
            let bucket = first_env(env, &["AWS_BUCKET", "S3_BUCKET"])
                .or_else(|| entry.bucket.clone())
                .ok_or_else(|| {
                    MirrorError::InvalidConfig("storage.bucket is required for s3".to_string())
                })?;
            let endpoint = first_env(env, &["AWS_ENDPOINT_URL", "S3_ENDPOINT_URL"])
                .or_else(|| entry.endpoint_url.clone());
            let region = env("AWS_REGION")
                .or_else(|| entry.region.clone())
                .unwrap_or_else(|| DEFAULT_REGION.to_string());
            Ok(StorageSettings::S3(S3Settings {
                bucket,
                endpoint,
                region,
                access_key_id: first_env(env, &["AWS_ACCESS_KEY_ID", "S3_ACCESS_KEY_ID"]),
                secret_access_key: first_env(
                    env,
                    &["AWS_SECRET_ACCESS_KEY", "S3_SECRET_ACCESS_KEY"],
                ),
            }))
        }
        other => Err(MirrorError::UnknownStorage(other.to_string())),
    }
}

fn resolve_dataset(
    index: usize,
    entry: DatasetEntry,
    decompress: bool,
) -> Result<Dataset, MirrorError> {
    let label = entry
        .name
        .clone()
        .unwrap_or_else(|| format!("datasets[{index}]"));
    let required = |value: Option<String>, field: &str| {
        value
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| MirrorError::InvalidDataset(format!("{label}: missing {field}")))
    };

    let name = required(entry.name, "name")?;
    let base_url = required(entry.base_url, "base_url")?;
    let template: FileTemplate = required(entry.file_template, "file_template")?
        .parse()
        .map_err(|err| MirrorError::InvalidDataset(format!("{label}: {err}")))?;
    let runs = entry
        .runs
        .ok_or_else(|| MirrorError::InvalidDataset(format!("{label}: missing runs")))?
        .iter()
        .map(RunEntry::resolve)
        .collect::<Result<Vec<_>, MirrorError>>()?;
    let variables = entry
        .variables
        .ok_or_else(|| MirrorError::InvalidDataset(format!("{label}: missing variables")))?;
    let forecast_steps = entry
        .forecast_steps
        .ok_or_else(|| MirrorError::InvalidDataset(format!("{label}: missing forecast_steps")))?;

    Ok(Dataset {
        name,
        base_url: base_url.trim_end_matches('/').to_string(),
        template,
        grid: entry.grid.unwrap_or_default(),
        subgrid: entry.subgrid.unwrap_or_default(),
        level: entry.level.unwrap_or_default(),
        runs,
        variables,
        forecast_steps,
        listing_suffix: entry
            .listing_suffix
            .unwrap_or_else(|| DEFAULT_LISTING_SUFFIX.to_string()),
        decompress,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn expands_braced_and_bare_names() {
        let env = |name: &str| (name == "ROOT").then(|| "/srv".to_string());
        let expanded = expand_env("a: $ROOT/x\nb: ${ROOT}/y\nc: $MISSING", &env).unwrap();
        assert_eq!(expanded, "a: /srv/x\nb: /srv/y\nc: $MISSING");
    }

    #[test]
    fn numeric_runs_are_zero_padded() {
        let entry = DatasetEntry {
            name: Some("icon-d2".to_string()),
            base_url: Some("https://example.org/icon-d2/grib".to_string()),
            file_template: Some("{date}{run}_{step:03d}_{var}.grib2.bz2".to_string()),
            runs: Some(vec![RunEntry::Hour(6), RunEntry::Label("12".to_string())]),
            variables: Some(vec!["t_2m".to_string()]),
            forecast_steps: Some(vec![0]),
            ..DatasetEntry::default()
        };
        let dataset = resolve_dataset(0, entry, false).unwrap();
        let labels = dataset.runs.iter().map(|run| run.as_str()).collect::<Vec<_>>();
        assert_eq!(labels, vec!["06", "12"]);
    }

    #[test]
    fn default_storage_is_local_data_dir() {
        let storage = resolve_storage(&StorageEntry::default(), &no_env).unwrap();
        assert_eq!(
            storage,
            StorageSettings::Local {
                data_dir: Utf8PathBuf::from(DEFAULT_DATA_DIR)
            }
        );
    }
}
