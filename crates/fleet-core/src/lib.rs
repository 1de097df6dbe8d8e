//! Fleet Sync - reconciliation jobs for an IoT device management portal.
//!
//! The jobs pull device and model inventory from an external IoT registry
//! (IoT Core / Greengrass style), diff it against a local SQLite store,
//! stage the minimal set of creates, updates and orphan deletions, and
//! commit each run in a single transaction.
//!
//! # Example
//!
//! ```rust,ignore
//! use fleet_sync::{CancellationToken, FleetSync, Settings};
//!
//! #[tokio::main]
//! async fn main() -> fleet_sync::Result<()> {
//!     let settings = Settings::load("fleet.json")?;
//!     let fleet = FleetSync::builder(settings).build()?;
//!
//!     // One pass over every enabled job
//!     let scheduler = fleet.scheduler(CancellationToken::new(), None)?;
//!     for (job, result) in scheduler.run_all_once().await {
//!         println!("{}: {:?}", job, result.map(|report| report.to_string()));
//!     }
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod images;
pub mod inventory;
pub mod models;
pub mod scheduler;
pub mod store;
pub mod sync;

mod fleet;

// Re-export commonly used types
pub use cancel::{CancellationToken, CancelledError};
pub use config::{RegistrySettings, Settings};
pub use error::{FleetError, Result};
pub use fleet::{FleetSync, FleetSyncBuilder};
pub use images::{FsImageStore, ModelImageStore};
pub use inventory::{
    DeploymentRegistry, Fetch, HttpRegistry, InventorySnapshot, SkipReason, SnapshotRegistry,
    ThingRegistry,
};
pub use models::{Device, DeviceClass, DeviceModel, DeviceTag, Label};
pub use scheduler::{JobRunner, JobScheduler, RetryConfig};
pub use store::{FleetStore, Includes, UnitOfWork};
pub use sync::{JobContext, SyncJob, SyncReport};
