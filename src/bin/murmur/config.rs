use super::FanoutModeArg;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub name: String,
    pub database: Option<PathBuf>,
    pub pool_size: Option<usize>,
    pub celebrity_threshold: Option<usize>,
    pub segment_depth: Option<usize>,
    pub max_staleness_secs: Option<u64>,
    pub cache_capacity: Option<usize>,
    pub fanout_mode: Option<FanoutModeArg>,
    pub fanout_target_latency_ms: Option<u64>,
    pub default_page_size: Option<usize>,
    pub max_page_size: Option<usize>,
    pub read_deadline_ms: Option<u64>,
}

#[derive(Debug, Default)]
pub struct CliConfig {
    path: Option<PathBuf>,
    data: RawConfig,
    profiles: BTreeMap<String, Profile>,
}

impl CliConfig {
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit.or_else(default_config_path);
        let data = match path.as_ref() {
            Some(config_path) if config_path.exists() => read_file(config_path)?,
            _ => RawConfig::default(),
        };
        let profiles = parse_profiles(&data)?;
        Ok(Self {
            path,
            data,
            profiles,
        })
    }

    pub fn default_db_path(&self) -> Option<&PathBuf> {
        self.data.database.default_path.as_ref()
    }

    pub fn default_profile_name(&self) -> Option<&str> {
        self.data
            .default_profile
            .as_deref()
            .filter(|name| self.profiles.contains_key(*name))
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    pub fn set_default_profile(&mut self, name: Option<&str>) -> Result<(), ConfigError> {
        match name {
            Some(name) if !self.profiles.contains_key(name) => {
                return Err(ConfigError::ProfileNotFound {
                    name: name.to_string(),
                })
            }
            Some(name) => self.data.default_profile = Some(name.to_string()),
            None => self.data.default_profile = None,
        }
        Ok(())
    }

    pub fn upsert_profile(&mut self, name: &str, update: ProfileUpdate) -> Result<(), ConfigError> {
        let entry = self.data.profiles.entry(name.to_string()).or_default();
        if let Some(db) = update.database {
            entry.database = Some(db);
        }
        if let Some(size) = update.pool_size {
            entry.pool_size = Some(size);
        }
        if let Some(threshold) = update.celebrity_threshold {
            entry.celebrity_threshold = Some(threshold);
        }
        if let Some(depth) = update.segment_depth {
            entry.segment_depth = Some(depth);
        }
        if let Some(secs) = update.max_staleness_secs {
            entry.max_staleness_secs = Some(secs);
        }
        if let Some(capacity) = update.cache_capacity {
            entry.cache_capacity = Some(capacity);
        }
        if let Some(mode) = update.fanout_mode {
            entry.fanout_mode = Some(mode_to_string(mode));
        }
        if let Some(ms) = update.fanout_target_latency_ms {
            entry.fanout_target_latency_ms = Some(ms);
        }
        if let Some(size) = update.default_page_size {
            entry.default_page_size = Some(size);
        }
        if let Some(size) = update.max_page_size {
            entry.max_page_size = Some(size);
        }
        if let Some(ms) = update.read_deadline_ms {
            entry.read_deadline_ms = Some(ms);
        }
        self.profiles = parse_profiles(&self.data)?;
        Ok(())
    }

    pub fn persist(&self) -> Result<PathBuf, ConfigError> {
        let target = match self.path.clone().or_else(default_config_path) {
            Some(path) => path,
            None => return Err(ConfigError::NoConfigPath),
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let serialized = toml::to_string_pretty(&self.data)
            .map_err(|source| ConfigError::Serialize { source })?;
        fs::write(&target, serialized).map_err(|source| ConfigError::Write {
            path: target.clone(),
            source,
        })?;
        Ok(target)
    }

    pub fn delete_profile(&mut self, name: &str) -> Result<(), ConfigError> {
        if self.data.profiles.remove(name).is_none() {
            return Err(ConfigError::ProfileNotFound {
                name: name.to_string(),
            });
        }
        if self.data.default_profile.as_deref() == Some(name) {
            self.data.default_profile = None;
        }
        self.profiles = parse_profiles(&self.data)?;
        Ok(())
    }
}

fn mode_to_string(value: FanoutModeArg) -> String {
    match value {
        FanoutModeArg::Inline => "inline",
        FanoutModeArg::Background => "background",
    }
    .to_string()
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_profiles(data: &RawConfig) -> Result<BTreeMap<String, Profile>, ConfigError> {
    let mut profiles = BTreeMap::new();
    for (name, raw) in &data.profiles {
        profiles.insert(name.clone(), convert_profile(name, raw)?);
    }
    if let Some(default_name) = data.default_profile.as_ref() {
        if !profiles.contains_key(default_name) {
            return Err(ConfigError::ProfileNotFound {
                name: default_name.clone(),
            });
        }
    }
    Ok(profiles)
}

fn convert_profile(name: &str, raw: &RawProfile) -> Result<Profile, ConfigError> {
    let fanout_mode = match raw.fanout_mode.as_deref() {
        Some(value) => Some(FanoutModeArg::from_str(value, true).map_err(|_| {
            ConfigError::InvalidFanoutMode {
                profile: name.to_string(),
                value: value.to_string(),
            }
        })?),
        None => None,
    };
    Ok(Profile {
        name: name.to_string(),
        database: raw.database.clone(),
        pool_size: raw.pool_size,
        celebrity_threshold: raw.celebrity_threshold,
        segment_depth: raw.segment_depth,
        max_staleness_secs: raw.max_staleness_secs,
        cache_capacity: raw.cache_capacity,
        fanout_mode,
        fanout_target_latency_ms: raw.fanout_target_latency_ms,
        default_page_size: raw.default_page_size,
        max_page_size: raw.max_page_size,
        read_deadline_ms: raw.read_deadline_ms,
    })
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawConfig {
    #[serde(default)]
    database: DatabaseSection,
    #[serde(default)]
    profiles: BTreeMap<String, RawProfile>,
    #[serde(default)]
    default_profile: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct DatabaseSection {
    #[serde(rename = "default")]
    default_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawProfile {
    database: Option<PathBuf>,
    pool_size: Option<usize>,
    celebrity_threshold: Option<usize>,
    segment_depth: Option<usize>,
    max_staleness_secs: Option<u64>,
    cache_capacity: Option<usize>,
    fanout_mode: Option<String>,
    fanout_target_latency_ms: Option<u64>,
    default_page_size: Option<usize>,
    max_page_size: Option<usize>,
    read_deadline_ms: Option<u64>,
}

#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub database: Option<PathBuf>,
    pub pool_size: Option<usize>,
    pub celebrity_threshold: Option<usize>,
    pub segment_depth: Option<usize>,
    pub max_staleness_secs: Option<u64>,
    pub cache_capacity: Option<usize>,
    pub fanout_mode: Option<FanoutModeArg>,
    pub fanout_target_latency_ms: Option<u64>,
    pub default_page_size: Option<usize>,
    pub max_page_size: Option<usize>,
    pub read_deadline_ms: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read CLI config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse CLI config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to serialize CLI config: {source}")]
    Serialize { source: toml::ser::Error },
    #[error("failed to write CLI config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create config directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("profile '{name}' not found")]
    ProfileNotFound { name: String },
    #[error("profile '{profile}' fanout_mode '{value}' is invalid (expected inline or background)")]
    InvalidFanoutMode { profile: String, value: String },
    #[error("no config directory found; pass --config or set MURMUR_CONFIG")]
    NoConfigPath,
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("murmur").join("config.toml"))
}
