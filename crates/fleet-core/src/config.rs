//! Centralized configuration for Fleet Sync.
//!
//! Constants are grouped by concern. Runtime settings for the daemon are
//! loaded from a JSON file into [`Settings`]; every field has a default so a
//! partial file is valid.

use crate::error::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Reconciliation constants.
pub struct SyncConfig;

impl SyncConfig {
    /// Thing type tag that marks a type as an edge (Greengrass core) device type.
    pub const EDGE_TAG_KEY: &'static str = "iotEdge";
    pub const THINGS_JOB: &'static str = "sync-things";
    pub const THING_TYPES_JOB: &'static str = "sync-thing-types";
    pub const EDGE_DEVICES_JOB: &'static str = "sync-edge-devices";
    pub const EDGE_DEPLOYMENTS_JOB: &'static str = "sync-edge-deployments";
}

/// Local store configuration.
pub struct StoreConfig;

impl StoreConfig {
    pub const BUSY_TIMEOUT_MS: u32 = 5_000;
    pub const DATABASE_FILENAME: &'static str = "fleet.sqlite";
    pub const IMAGES_DIR_NAME: &'static str = "model-images";
}

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const USER_AGENT: &'static str = "Fleet-Sync/0.3";
    pub const API_KEY_HEADER: &'static str = "x-api-key";
    pub const MAX_PAGES: u32 = 1_000;
}

/// Scheduler defaults.
pub struct SchedulerConfig;

impl SchedulerConfig {
    pub const THINGS_INTERVAL: Duration = Duration::from_secs(600);
    pub const THING_TYPES_INTERVAL: Duration = Duration::from_secs(3_600);
    pub const EDGE_DEVICES_INTERVAL: Duration = Duration::from_secs(600);
    pub const EDGE_DEPLOYMENTS_INTERVAL: Duration = Duration::from_secs(1_800);
    pub const MIN_INTERVAL: Duration = Duration::from_secs(5);
    pub const RETRY_MAX_ATTEMPTS: u32 = 3;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(60);
}

/// Which registry adapter the daemon talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistrySettings {
    /// REST/JSON registry endpoint.
    Http {
        base_url: String,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    /// Recorded inventory snapshot on disk.
    Snapshot { path: PathBuf },
}

fn default_timeout_secs() -> u64 {
    NetworkConfig::REQUEST_TIMEOUT.as_secs()
}

impl Default for RegistrySettings {
    fn default() -> Self {
        RegistrySettings::Snapshot {
            path: PathBuf::from("inventory.json"),
        }
    }
}

/// Schedule for a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSchedule {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub interval_secs: u64,
}

fn default_enabled() -> bool {
    true
}

impl JobSchedule {
    fn every(interval: Duration) -> Self {
        Self {
            enabled: true,
            interval_secs: interval.as_secs(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Per-job schedules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsSettings {
    pub things: JobSchedule,
    pub thing_types: JobSchedule,
    pub edge_devices: JobSchedule,
    pub edge_deployments: JobSchedule,
}

impl Default for JobsSettings {
    fn default() -> Self {
        Self {
            things: JobSchedule::every(SchedulerConfig::THINGS_INTERVAL),
            thing_types: JobSchedule::every(SchedulerConfig::THING_TYPES_INTERVAL),
            edge_devices: JobSchedule::every(SchedulerConfig::EDGE_DEVICES_INTERVAL),
            edge_deployments: JobSchedule::every(SchedulerConfig::EDGE_DEPLOYMENTS_INTERVAL),
        }
    }
}

/// Retry policy for failed runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: SchedulerConfig::RETRY_MAX_ATTEMPTS,
            base_delay_ms: SchedulerConfig::RETRY_BASE_DELAY.as_millis() as u64,
            max_delay_ms: SchedulerConfig::RETRY_MAX_DELAY.as_millis() as u64,
        }
    }
}

/// Daemon settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite database path. Relative paths resolve against the data directory.
    pub database_path: PathBuf,
    /// Directory holding model images.
    pub image_dir: PathBuf,
    /// Image copied for every newly created model.
    pub default_image: Option<PathBuf>,
    pub registry: RegistrySettings,
    pub jobs: JobsSettings,
    pub retry: RetrySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(StoreConfig::DATABASE_FILENAME),
            image_dir: PathBuf::from(StoreConfig::IMAGES_DIR_NAME),
            default_image: None,
            registry: RegistrySettings::default(),
            jobs: JobsSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file and validate them.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| FleetError::io_with_path(e, path))?;
        let settings: Settings = serde_json::from_str(&contents).map_err(|e| FleetError::Config {
            message: format!("Invalid settings file {}: {}", path.display(), e),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (field, schedule) in [
            ("jobs.things", &self.jobs.things),
            ("jobs.thing_types", &self.jobs.thing_types),
            ("jobs.edge_devices", &self.jobs.edge_devices),
            ("jobs.edge_deployments", &self.jobs.edge_deployments),
        ] {
            if schedule.enabled && schedule.interval() < SchedulerConfig::MIN_INTERVAL {
                return Err(FleetError::Validation {
                    field: field.to_string(),
                    message: format!(
                        "interval must be at least {}s",
                        SchedulerConfig::MIN_INTERVAL.as_secs()
                    ),
                });
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(FleetError::Validation {
                field: "retry.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if let RegistrySettings::Http { base_url, .. } = &self.registry {
            url::Url::parse(base_url).map_err(|e| FleetError::Validation {
                field: "registry.base_url".to_string(),
                message: e.to_string(),
            })?;
        }

        Ok(())
    }

    /// Resolve relative paths (database, images, default image, snapshot)
    /// against a data directory.
    pub fn resolve_paths(mut self, data_dir: &Path) -> Self {
        if self.database_path.is_relative() {
            self.database_path = data_dir.join(&self.database_path);
        }
        if self.image_dir.is_relative() {
            self.image_dir = data_dir.join(&self.image_dir);
        }
        self.default_image = self.default_image.take().map(|image| {
            if image.is_relative() {
                data_dir.join(image)
            } else {
                image
            }
        });
        if let RegistrySettings::Snapshot { path } = &mut self.registry {
            if path.is_relative() {
                *path = data_dir.join(&*path);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_use_defaults() {
        let settings: Settings = serde_json::from_str(
            r#"{ "registry": { "kind": "http", "base_url": "https://iot.example.com/api" } }"#,
        )
        .unwrap();

        assert_eq!(settings.jobs, JobsSettings::default());
        assert_eq!(settings.retry.max_attempts, SchedulerConfig::RETRY_MAX_ATTEMPTS);
        match settings.registry {
            RegistrySettings::Http { timeout_secs, ref api_key, .. } => {
                assert_eq!(timeout_secs, 15);
                assert!(api_key.is_none());
            }
            other => panic!("unexpected registry {:?}", other),
        }
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_rejects_tiny_interval() {
        let mut settings = Settings::default();
        settings.jobs.things.interval_secs = 1;
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, FleetError::Validation { ref field, .. } if field == "jobs.things"));
    }

    #[test]
    fn test_disabled_job_interval_not_checked() {
        let mut settings = Settings::default();
        settings.jobs.edge_deployments = JobSchedule {
            enabled: false,
            interval_secs: 0,
        };
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let settings = Settings {
            registry: RegistrySettings::Http {
                base_url: "not a url".into(),
                api_key: None,
                timeout_secs: 5,
            },
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_resolve_paths() {
        let settings = Settings::default().resolve_paths(Path::new("/var/lib/fleet"));
        assert_eq!(settings.database_path, Path::new("/var/lib/fleet/fleet.sqlite"));
        assert_eq!(settings.image_dir, Path::new("/var/lib/fleet/model-images"));
        assert_eq!(
            settings.registry,
            RegistrySettings::Snapshot {
                path: PathBuf::from("/var/lib/fleet/inventory.json")
            }
        );
    }

    #[test]
    fn test_resolve_paths_keeps_absolute_paths() {
        let settings = Settings {
            default_image: Some(PathBuf::from("images/default.png")),
            registry: RegistrySettings::Snapshot {
                path: PathBuf::from("/srv/inventory.json"),
            },
            ..Settings::default()
        }
        .resolve_paths(Path::new("/var/lib/fleet"));

        assert_eq!(
            settings.default_image.as_deref(),
            Some(Path::new("/var/lib/fleet/images/default.png"))
        );
        assert_eq!(
            settings.registry,
            RegistrySettings::Snapshot {
                path: PathBuf::from("/srv/inventory.json")
            }
        );
    }
}
