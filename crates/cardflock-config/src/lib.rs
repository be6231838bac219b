use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "cardflock.toml";
pub const DEFAULT_DB_PATH: &str = "cardflock.sqlite";
pub const DEFAULT_WINDOW_TIMEOUT_SECS: u64 = 86_400;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CardflockConfig {
    #[serde(default)]
    pub detection: DetectionParams,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Tuning knobs for one detection window. Defaults follow the production
/// parameterization for monthly outpatient data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionParams {
    /// Co-visit tolerance in seconds.
    #[serde(default = "default_time_interval")]
    pub time_interval: u32,
    /// Minimum co-visit count per pair, and minimum visits per person.
    #[serde(default = "default_min_count")]
    pub min_count: u32,
    /// Minimum community/cohort size in persons.
    #[serde(default = "default_min_size")]
    pub min_size: u32,
    /// Maximum community size before recursive splitting.
    #[serde(default = "default_max_size")]
    pub max_size: u32,
    /// Minimum distinct institutions per pair and per cohort.
    #[serde(default = "default_min_jg_num")]
    pub min_jg_num: u32,
    #[serde(default = "default_min_person_ratio_in_subgroup")]
    pub min_person_ratio_in_subgroup: f64,
    #[serde(default = "default_min_risk_clinic_ratio_in_group")]
    pub min_risk_clinic_ratio_in_group: f64,
    /// Leiden resolution for the inner (splitting) level; the first pass
    /// over the whole graph runs at twice this value.
    #[serde(default = "default_resolution_parameter")]
    pub resolution_parameter: f64,
    /// Parallelism degree for pair mining and community refinement.
    #[serde(default = "default_n_jobs")]
    pub n_jobs: u32,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            time_interval: default_time_interval(),
            min_count: default_min_count(),
            min_size: default_min_size(),
            max_size: default_max_size(),
            min_jg_num: default_min_jg_num(),
            min_person_ratio_in_subgroup: default_min_person_ratio_in_subgroup(),
            min_risk_clinic_ratio_in_group: default_min_risk_clinic_ratio_in_group(),
            resolution_parameter: default_resolution_parameter(),
            n_jobs: default_n_jobs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Window length in months.
    #[serde(default = "default_window_size")]
    pub window_size: u32,
    /// Step between window starts in months.
    #[serde(default = "default_step_size")]
    pub step_size: u32,
    /// Wall-clock budget per window before cancellation, in seconds.
    #[serde(default = "default_window_timeout_secs")]
    pub window_timeout_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            step_size: default_step_size(),
            window_timeout_secs: default_window_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<CardflockConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(CardflockConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: CardflockConfig = toml::from_str(&raw)?;
    Ok(normalize_config(parsed))
}

pub fn ensure_config(path: impl AsRef<Path>) -> Result<CardflockConfig, ConfigError> {
    let path = path.as_ref();
    if path.exists() {
        return load_config(path);
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let config = CardflockConfig::default();
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;

    Ok(config)
}

/// Human-readable configuration issues; an empty list means the config is
/// usable as-is.
pub fn validate_config(config: &CardflockConfig) -> Vec<String> {
    let mut issues = Vec::new();
    let detection = &config.detection;

    if detection.time_interval == 0 {
        issues.push("detection.time_interval must be positive".to_owned());
    }
    if detection.min_size == 0 {
        issues.push("detection.min_size must be positive".to_owned());
    }
    if detection.max_size < detection.min_size {
        issues.push(format!(
            "detection.max_size ({}) must be >= detection.min_size ({})",
            detection.max_size, detection.min_size
        ));
    }
    for (name, ratio) in [
        (
            "detection.min_person_ratio_in_subgroup",
            detection.min_person_ratio_in_subgroup,
        ),
        (
            "detection.min_risk_clinic_ratio_in_group",
            detection.min_risk_clinic_ratio_in_group,
        ),
    ] {
        if !(0.0..=1.0).contains(&ratio) {
            issues.push(format!("{name} ({ratio}) must be within 0..=1"));
        }
    }
    if detection.resolution_parameter <= 0.0 {
        issues.push("detection.resolution_parameter must be positive".to_owned());
    }
    if detection.n_jobs == 0 {
        issues.push("detection.n_jobs must be at least 1".to_owned());
    }
    if config.schedule.window_size == 0 {
        issues.push("schedule.window_size must be at least 1 month".to_owned());
    }
    if config.schedule.step_size == 0 {
        issues.push("schedule.step_size must be at least 1 month".to_owned());
    }
    if config.storage.db_path.trim().is_empty() {
        issues.push("storage.db_path must not be empty".to_owned());
    }

    issues
}

fn normalize_config(mut config: CardflockConfig) -> CardflockConfig {
    let db_path = config.storage.db_path.trim();
    if db_path.is_empty() {
        config.storage.db_path = default_db_path();
    } else {
        config.storage.db_path = db_path.to_owned();
    }
    config
}

fn default_time_interval() -> u32 {
    600
}

fn default_min_count() -> u32 {
    4
}

fn default_min_size() -> u32 {
    6
}

fn default_max_size() -> u32 {
    100
}

fn default_min_jg_num() -> u32 {
    1
}

fn default_min_person_ratio_in_subgroup() -> f64 {
    0.3
}

fn default_min_risk_clinic_ratio_in_group() -> f64 {
    0.3
}

fn default_resolution_parameter() -> f64 {
    10.0
}

fn default_n_jobs() -> u32 {
    1
}

fn default_window_size() -> u32 {
    1
}

fn default_step_size() -> u32 {
    1
}

fn default_window_timeout_secs() -> u64 {
    DEFAULT_WINDOW_TIMEOUT_SECS
}

fn default_db_path() -> String {
    DEFAULT_DB_PATH.to_owned()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn ensure_config_creates_default_file() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);

        let config = ensure_config(&path).expect("ensure config");

        assert_eq!(config, CardflockConfig::default());
        assert!(path.exists());
        let content = fs::read_to_string(&path).expect("read config file");
        assert!(content.contains("[detection]"));
        assert!(content.contains("time_interval = 600"));
    }

    #[test]
    fn load_config_parses_partial_file_with_defaults() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        let raw = r#"
[detection]
time_interval = 3600
min_count = 3
n_jobs = 4

[schedule]
window_size = 3
step_size = 3
"#;
        fs::write(&path, raw).expect("write config");

        let config = load_config(&path).expect("load config");

        assert_eq!(config.detection.time_interval, 3600);
        assert_eq!(config.detection.min_count, 3);
        assert_eq!(config.detection.n_jobs, 4);
        assert_eq!(config.detection.max_size, 100);
        assert_eq!(config.schedule.window_size, 3);
        assert_eq!(config.storage.db_path, DEFAULT_DB_PATH);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let temp = tempdir().expect("tempdir");
        let config = load_config(temp.path().join("absent.toml")).expect("load config");
        assert_eq!(config, CardflockConfig::default());
    }

    #[test]
    fn validate_config_flags_bad_values() {
        let mut config = CardflockConfig::default();
        config.detection.time_interval = 0;
        config.detection.min_size = 50;
        config.detection.max_size = 10;
        config.detection.min_person_ratio_in_subgroup = 1.5;
        config.schedule.step_size = 0;

        let issues = validate_config(&config);

        assert!(issues.iter().any(|issue| issue.contains("time_interval")));
        assert!(issues.iter().any(|issue| issue.contains("max_size")));
        assert!(
            issues
                .iter()
                .any(|issue| issue.contains("min_person_ratio_in_subgroup"))
        );
        assert!(issues.iter().any(|issue| issue.contains("step_size")));
        assert!(validate_config(&CardflockConfig::default()).is_empty());
    }
}
