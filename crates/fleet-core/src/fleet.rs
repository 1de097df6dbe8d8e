//! Wiring of settings, store, registry and image store into runnable jobs.

use crate::config::{JobSchedule, RegistrySettings, SchedulerConfig, Settings, SyncConfig};
use crate::error::{FleetError, Result};
use crate::images::{FsImageStore, ModelImageStore};
use crate::inventory::{DeploymentRegistry, HttpRegistry, SnapshotRegistry, ThingRegistry};
use crate::scheduler::{JobScheduler, RetryConfig};
use crate::store::FleetStore;
use crate::sync::{
    SyncEdgeDeploymentsJob, SyncEdgeDevicesJob, SyncJob, SyncThingTypesJob, SyncThingsJob,
};
use crate::CancellationToken;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Fully wired sync jobs sharing one store.
pub struct FleetSync {
    settings: Settings,
    store: FleetStore,
    things: Arc<dyn ThingRegistry>,
    deployments: Arc<dyn DeploymentRegistry>,
    images: Arc<dyn ModelImageStore>,
}

impl FleetSync {
    pub fn builder(settings: Settings) -> FleetSyncBuilder {
        FleetSyncBuilder::new(settings)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &FleetStore {
        &self.store
    }

    fn schedule_of(&self, name: &str) -> Option<JobSchedule> {
        let jobs = &self.settings.jobs;
        match name {
            SyncConfig::THINGS_JOB => Some(jobs.things),
            SyncConfig::THING_TYPES_JOB => Some(jobs.thing_types),
            SyncConfig::EDGE_DEVICES_JOB => Some(jobs.edge_devices),
            SyncConfig::EDGE_DEPLOYMENTS_JOB => Some(jobs.edge_deployments),
            _ => None,
        }
    }

    /// Build a job by name.
    pub fn job(&self, name: &str) -> Option<Arc<dyn SyncJob>> {
        let job: Arc<dyn SyncJob> = match name {
            SyncConfig::THINGS_JOB => {
                Arc::new(SyncThingsJob::new(self.things.clone(), self.store.clone()))
            }
            SyncConfig::THING_TYPES_JOB => Arc::new(SyncThingTypesJob::new(
                self.things.clone(),
                self.store.clone(),
                self.images.clone(),
            )),
            SyncConfig::EDGE_DEVICES_JOB => {
                Arc::new(SyncEdgeDevicesJob::new(self.things.clone(), self.store.clone()))
            }
            SyncConfig::EDGE_DEPLOYMENTS_JOB => Arc::new(SyncEdgeDeploymentsJob::new(
                self.deployments.clone(),
                self.store.clone(),
                self.images.clone(),
            )),
            _ => return None,
        };
        Some(job)
    }

    /// Model jobs come first so a one-shot run can create devices of new
    /// models in the same invocation.
    pub fn job_names() -> [&'static str; 4] {
        [
            SyncConfig::THING_TYPES_JOB,
            SyncConfig::EDGE_DEPLOYMENTS_JOB,
            SyncConfig::THINGS_JOB,
            SyncConfig::EDGE_DEVICES_JOB,
        ]
    }

    /// Scheduler with every enabled job, or only `only` when given.
    ///
    /// Naming a job explicitly schedules it even when it is disabled.
    pub fn scheduler(&self, cancel: CancellationToken, only: Option<&str>) -> Result<JobScheduler> {
        if let Some(name) = only {
            if self.schedule_of(name).is_none() {
                return Err(FleetError::Config {
                    message: format!(
                        "Unknown job '{}', expected one of: {}",
                        name,
                        Self::job_names().join(", ")
                    ),
                });
            }
        }

        let retry = RetryConfig::from(&self.settings.retry);
        let mut scheduler = JobScheduler::new(cancel);
        for name in Self::job_names() {
            let Some(schedule) = self.schedule_of(name) else {
                continue;
            };
            let selected = match only {
                Some(only) => only == name,
                None => schedule.enabled,
            };
            if !selected {
                continue;
            }
            if let Some(job) = self.job(name) {
                scheduler.add(job, interval_of(&schedule), retry.clone());
            }
        }
        Ok(scheduler)
    }
}

fn interval_of(schedule: &JobSchedule) -> Duration {
    schedule.interval().max(SchedulerConfig::MIN_INTERVAL)
}

/// Builder for [`FleetSync`].
///
/// Collaborators not set explicitly are created from the settings.
pub struct FleetSyncBuilder {
    settings: Settings,
    registry: Option<(Arc<dyn ThingRegistry>, Arc<dyn DeploymentRegistry>)>,
    images: Option<Arc<dyn ModelImageStore>>,
    in_memory: bool,
}

impl FleetSyncBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            registry: None,
            images: None,
            in_memory: false,
        }
    }

    /// Use a registry serving both things and deployments.
    pub fn with_registry<R>(mut self, registry: Arc<R>) -> Self
    where
        R: ThingRegistry + DeploymentRegistry + 'static,
    {
        let things: Arc<dyn ThingRegistry> = registry.clone();
        let deployments: Arc<dyn DeploymentRegistry> = registry;
        self.registry = Some((things, deployments));
        self
    }

    pub fn with_image_store(mut self, images: Arc<dyn ModelImageStore>) -> Self {
        self.images = Some(images);
        self
    }

    /// Keep the store in memory instead of at `database_path`.
    pub fn in_memory(mut self, enable: bool) -> Self {
        self.in_memory = enable;
        self
    }

    pub fn build(self) -> Result<FleetSync> {
        self.settings.validate()?;

        let store = if self.in_memory {
            FleetStore::open_in_memory()?
        } else {
            FleetStore::open(&self.settings.database_path)?
        };

        let (things, deployments) = match self.registry {
            Some(registry) => registry,
            None => registry_from_settings(&self.settings.registry)?,
        };

        let images: Arc<dyn ModelImageStore> = match self.images {
            Some(images) => images,
            None => Arc::new(FsImageStore::new(
                self.settings.image_dir.clone(),
                self.settings.default_image.clone(),
            )),
        };

        Ok(FleetSync {
            settings: self.settings,
            store,
            things,
            deployments,
            images,
        })
    }
}

fn registry_from_settings(
    settings: &RegistrySettings,
) -> Result<(Arc<dyn ThingRegistry>, Arc<dyn DeploymentRegistry>)> {
    match settings {
        RegistrySettings::Http {
            base_url,
            api_key,
            timeout_secs,
        } => {
            info!("Using registry at {}", base_url);
            let registry = Arc::new(HttpRegistry::with_timeout(
                base_url,
                api_key.clone(),
                Duration::from_secs(*timeout_secs),
            )?);
            let things: Arc<dyn ThingRegistry> = registry.clone();
            let deployments: Arc<dyn DeploymentRegistry> = registry;
            Ok((things, deployments))
        }
        RegistrySettings::Snapshot { path } => {
            info!("Using inventory snapshot {}", path.display());
            let registry = Arc::new(SnapshotRegistry::load(path)?);
            let things: Arc<dyn ThingRegistry> = registry.clone();
            let deployments: Arc<dyn DeploymentRegistry> = registry;
            Ok((things, deployments))
        }
    }
}
