use crate::domain::model::{
    ItemKind, LayerHandle, LocalArtifact, RemoteItem, SharingPolicy, WorkingMap,
};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// The authoring project: turns layer identifiers into concrete layers.
#[async_trait]
pub trait LayerSource: Send + Sync {
    async fn resolve_layer(&self, id: &str) -> Result<LayerHandle>;

    /// The pre-authored empty layer that puts the map in the tiling spatial reference.
    async fn reference_layer(&self) -> Result<LayerHandle>;
}

/// Builds a tile package from whatever is currently in the map.
#[async_trait]
pub trait TilePackager: Send + Sync {
    async fn build_tile_package(&self, map: &WorkingMap, output_path: &Path) -> Result<LocalArtifact>;
}

/// The cloud portal's content catalog, scoped to the operating account.
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// Account whose content is searched and replaced.
    fn owner(&self) -> &str;

    /// May return near matches; callers filter on exact title.
    async fn find_items_by_title(&self, title: &str, kind: ItemKind) -> Result<Vec<RemoteItem>>;

    /// Deleting an item that no longer exists succeeds.
    async fn delete_item(&self, id: &str) -> Result<()>;

    async fn upload_package(
        &self,
        artifact: &LocalArtifact,
        title: &str,
        description: &str,
    ) -> Result<RemoteItem>;

    async fn publish_hosted_layer(&self, package_item: &RemoteItem) -> Result<RemoteItem>;

    async fn share_item(&self, item: &RemoteItem, policy: &SharingPolicy) -> Result<()>;
}
