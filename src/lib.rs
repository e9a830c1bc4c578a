pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::PublishConfig;

pub use adapters::{Credentials, FileLayerSource, InMemoryCatalog, PortalClient, ZipTilePackager};
pub use core::{
    batch::{BatchSummary, PublishBatch},
    orchestrator::ReplacementOrchestrator,
};
pub use domain::model::{CycleReport, CycleStage, CycleStatus, PackageSpec, WorkingMap};
pub use utils::error::{PublishError, Result};
