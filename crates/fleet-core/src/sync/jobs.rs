//! The four reconciliation jobs.
//!
//! Every job builds its reconciler per run from the dependencies it was
//! constructed with. A run lists, stages, checks for cancellation one last
//! time and commits once.

use super::{sync_deployments, DeviceReconciler, EffectTargets, ModelResolver, SyncPass, SyncReport};
use crate::cancel::CancellationToken;
use crate::config::SyncConfig;
use crate::error::Result;
use crate::images::ModelImageStore;
use crate::inventory::{DeploymentRegistry, ThingRegistry};
use crate::models::DeviceClass;
use crate::store::FleetStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// Execution context handed to a job run by the scheduler.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub cancel: CancellationToken,
    /// When the scheduler fired this run.
    pub fired_at: DateTime<Utc>,
    /// 1 for the first attempt of a tick.
    pub attempt: u32,
}

impl JobContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            fired_at: Utc::now(),
            attempt: 1,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

impl Default for JobContext {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

/// A reconciliation job the scheduler can run.
#[async_trait]
pub trait SyncJob: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &JobContext) -> Result<SyncReport>;
}

/// Shared body of the two device jobs.
async fn sync_devices(
    name: &str,
    class: DeviceClass,
    registry: &dyn ThingRegistry,
    store: &FleetStore,
    ctx: &JobContext,
) -> Result<SyncReport> {
    let listing = registry.list_things().await?;
    info!(
        "{}: {} things listed (attempt {})",
        name,
        listing.len(),
        ctx.attempt
    );

    let mut pass = SyncPass::new(name);
    DeviceReconciler::new(class, registry, store)
        .reconcile(&listing, ctx, &mut pass)
        .await?;

    ctx.cancel.check()?;
    pass.commit(store, EffectTargets::default()).await
}

/// Syncs flat IoT things.
pub struct SyncThingsJob {
    registry: Arc<dyn ThingRegistry>,
    store: FleetStore,
}

impl SyncThingsJob {
    pub fn new(registry: Arc<dyn ThingRegistry>, store: FleetStore) -> Self {
        Self { registry, store }
    }
}

#[async_trait]
impl SyncJob for SyncThingsJob {
    fn name(&self) -> &str {
        SyncConfig::THINGS_JOB
    }

    async fn execute(&self, ctx: &JobContext) -> Result<SyncReport> {
        sync_devices(
            self.name(),
            DeviceClass::Thing,
            self.registry.as_ref(),
            &self.store,
            ctx,
        )
        .await
    }
}

/// Syncs Greengrass core devices. No shadow check.
pub struct SyncEdgeDevicesJob {
    registry: Arc<dyn ThingRegistry>,
    store: FleetStore,
}

impl SyncEdgeDevicesJob {
    pub fn new(registry: Arc<dyn ThingRegistry>, store: FleetStore) -> Self {
        Self { registry, store }
    }
}

#[async_trait]
impl SyncJob for SyncEdgeDevicesJob {
    fn name(&self) -> &str {
        SyncConfig::EDGE_DEVICES_JOB
    }

    async fn execute(&self, ctx: &JobContext) -> Result<SyncReport> {
        sync_devices(
            self.name(),
            DeviceClass::Edge,
            self.registry.as_ref(),
            &self.store,
            ctx,
        )
        .await
    }
}

/// Syncs thing types into thing models.
pub struct SyncThingTypesJob {
    registry: Arc<dyn ThingRegistry>,
    store: FleetStore,
    images: Arc<dyn ModelImageStore>,
}

impl SyncThingTypesJob {
    pub fn new(
        registry: Arc<dyn ThingRegistry>,
        store: FleetStore,
        images: Arc<dyn ModelImageStore>,
    ) -> Self {
        Self {
            registry,
            store,
            images,
        }
    }
}

#[async_trait]
impl SyncJob for SyncThingTypesJob {
    fn name(&self) -> &str {
        SyncConfig::THING_TYPES_JOB
    }

    async fn execute(&self, ctx: &JobContext) -> Result<SyncReport> {
        let listing = self.registry.list_thing_types().await?;
        info!("{}: {} thing types listed", self.name(), listing.len());

        let mut pass = SyncPass::new(self.name());
        ModelResolver::new(self.registry.as_ref(), &self.store)
            .sync_thing_types(&listing, ctx, &mut pass)
            .await?;

        ctx.cancel.check()?;
        pass.commit(
            &self.store,
            EffectTargets {
                images: Some(self.images.as_ref()),
                things: Some(self.registry.as_ref()),
            },
        )
        .await
    }
}

/// Syncs edge deployments into edge models.
pub struct SyncEdgeDeploymentsJob {
    deployments: Arc<dyn DeploymentRegistry>,
    store: FleetStore,
    images: Arc<dyn ModelImageStore>,
}

impl SyncEdgeDeploymentsJob {
    pub fn new(
        deployments: Arc<dyn DeploymentRegistry>,
        store: FleetStore,
        images: Arc<dyn ModelImageStore>,
    ) -> Self {
        Self {
            deployments,
            store,
            images,
        }
    }
}

#[async_trait]
impl SyncJob for SyncEdgeDeploymentsJob {
    fn name(&self) -> &str {
        SyncConfig::EDGE_DEPLOYMENTS_JOB
    }

    async fn execute(&self, ctx: &JobContext) -> Result<SyncReport> {
        let deployments = self.deployments.list_deployments().await?;
        info!("{}: {} deployments listed", self.name(), deployments.len());

        let mut pass = SyncPass::new(self.name());
        sync_deployments(&self.store, &deployments, ctx, &mut pass)?;

        ctx.cancel.check()?;
        pass.commit(
            &self.store,
            EffectTargets {
                images: Some(self.images.as_ref()),
                things: None,
            },
        )
        .await
    }
}
