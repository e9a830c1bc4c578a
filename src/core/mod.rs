pub mod batch;
pub mod layer_set;
pub mod orchestrator;
pub mod package;
pub mod projection;
pub mod resolver;

pub use crate::domain::model::{
    CycleReport, CycleStage, CycleStatus, ItemKind, LayerHandle, LocalArtifact, PackageSpec,
    RemoteItem, ResolvedItems, SharingPolicy, SpatialReference, WorkingMap,
};
pub use crate::domain::ports::{LayerSource, RemoteCatalog, TilePackager};
pub use crate::utils::error::Result;
