//! Reconciliation engine.
//!
//! A run pulls the full inventory, diffs it against the store, stages the
//! minimal set of mutations plus orphan deletions in a [`SyncPass`], and
//! commits once. External side effects are queued on the pass and applied
//! only after the commit succeeded.

mod jobs;
mod orphans;
mod reconciler;
mod report;
mod resolver;

pub use jobs::{
    JobContext, SyncEdgeDeploymentsJob, SyncEdgeDevicesJob, SyncJob, SyncThingTypesJob,
    SyncThingsJob,
};
pub use orphans::OrphanCollector;
pub use reconciler::{decide, Decision, DeviceReconciler};
pub use report::{SkippedItem, SyncCounts, SyncReport};
pub use resolver::{sync_deployments, EdgeClassification, ModelResolver};

use crate::error::{FleetError, Result};
use crate::images::ModelImageStore;
use crate::inventory::ThingRegistry;
use crate::store::{FleetStore, UnitOfWork};
use tracing::{info, warn};

/// External side effect applied after a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostCommitEffect {
    AssignDefaultImage { model_id: String },
    DeleteImages { model_id: String },
    DeleteThingGroup { group_name: String },
}

/// Collaborators that apply [`PostCommitEffect`]s.
#[derive(Clone, Copy, Default)]
pub struct EffectTargets<'a> {
    pub images: Option<&'a dyn ModelImageStore>,
    pub things: Option<&'a dyn ThingRegistry>,
}

impl<'a> EffectTargets<'a> {
    async fn apply(&self, effect: &PostCommitEffect) -> Result<()> {
        match effect {
            PostCommitEffect::AssignDefaultImage { model_id } => match self.images {
                Some(images) => images.assign_default_image(model_id).await,
                None => Err(missing_target("image store")),
            },
            PostCommitEffect::DeleteImages { model_id } => match self.images {
                Some(images) => images.delete_images(model_id).await,
                None => Err(missing_target("image store")),
            },
            PostCommitEffect::DeleteThingGroup { group_name } => match self.things {
                Some(registry) => registry.delete_thing_group(group_name).await,
                None => Err(missing_target("thing registry")),
            },
        }
    }
}

fn missing_target(what: &str) -> FleetError {
    FleetError::Other(format!("no {} configured for post-commit effects", what))
}

/// Everything one run has decided but not yet written.
#[derive(Debug)]
pub struct SyncPass {
    work: UnitOfWork,
    effects: Vec<PostCommitEffect>,
    report: SyncReport,
}

impl SyncPass {
    pub fn new(job: &str) -> Self {
        Self {
            work: UnitOfWork::new(),
            effects: Vec::new(),
            report: SyncReport::new(job),
        }
    }

    pub fn work(&mut self) -> &mut UnitOfWork {
        &mut self.work
    }

    pub fn report(&self) -> &SyncReport {
        &self.report
    }

    pub fn report_mut(&mut self) -> &mut SyncReport {
        &mut self.report
    }

    pub fn effects(&self) -> &[PostCommitEffect] {
        &self.effects
    }

    pub fn after_commit(&mut self, effect: PostCommitEffect) {
        self.effects.push(effect);
    }

    /// Commit the staged writes, then apply the queued effects.
    ///
    /// A commit failure returns the error and applies no effect. Effect
    /// failures are logged and counted in the report.
    pub async fn commit(self, store: &FleetStore, targets: EffectTargets<'_>) -> Result<SyncReport> {
        let SyncPass {
            work,
            effects,
            mut report,
        } = self;

        let writes = work.save(store)?;
        report.finish(writes);

        for effect in &effects {
            if let Err(e) = targets.apply(effect).await {
                warn!("{}: post-commit effect {:?} failed: {}", report.job, effect, e);
                report.failed_effects += 1;
            }
        }

        info!("{}", report);
        Ok(report)
    }
}
