use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::error::PublishError;

/// Web Mercator, the only spatial reference the online tiling scheme accepts.
pub const WEB_MERCATOR_WKID: u32 = 3857;

/// Whole milliseconds, saturating at `u64::MAX`.
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpatialReference {
    pub wkid: u32,
}

impl SpatialReference {
    pub const WEB_MERCATOR: SpatialReference = SpatialReference {
        wkid: WEB_MERCATOR_WKID,
    };

    pub fn new(wkid: u32) -> Self {
        Self { wkid }
    }

    pub fn is_tiling_compatible(&self) -> bool {
        self.wkid == WEB_MERCATOR_WKID
    }
}

impl fmt::Display for SpatialReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WKID {}", self.wkid)
    }
}

/// One entry of the package list: the name becomes the remote item title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    name: String,
    description: Option<String>,
    source_layers: Vec<String>,
}

impl PackageSpec {
    pub fn new(name: impl Into<String>, source_layers: Vec<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            source_layers,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_layers(&self) -> &[String] {
        &self.source_layers
    }

    /// Item description shown in the portal.
    pub fn description(&self) -> String {
        self.description.clone().unwrap_or_else(|| {
            format!(
                "VTPK for the {} group layer. This layer is updated weekly.",
                self.name
            )
        })
    }
}

/// A concrete layer, resolved from an identifier by the layer source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerHandle {
    pub id: String,
    pub source: PathBuf,
    pub spatial_reference: Option<SpatialReference>,
    pub visible: bool,
    pub is_group: bool,
}

impl LayerHandle {
    pub fn new(id: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            spatial_reference: None,
            visible: true,
            is_group: false,
        }
    }

    pub fn with_spatial_reference(mut self, spatial_reference: SpatialReference) -> Self {
        self.spatial_reference = Some(spatial_reference);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn group(mut self) -> Self {
        self.is_group = true;
        self
    }
}

/// The authoring session's map: an ordered set of layers whose spatial
/// reference is fixed by the first layer added to it while empty.
///
/// The first layer after a projection guard run is the empty reference layer;
/// everything after it is content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingMap {
    name: String,
    layers: Vec<LayerHandle>,
    spatial_reference: Option<SpatialReference>,
    reference_layer: Option<String>,
}

impl WorkingMap {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layers(&self) -> &[LayerHandle] {
        &self.layers
    }

    pub fn layer_ids(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.id.as_str()).collect()
    }

    /// Layers added after the projection reference layer.
    pub fn content_layers(&self) -> &[LayerHandle] {
        match (&self.reference_layer, self.layers.first()) {
            (Some(reference), Some(first)) if &first.id == reference => &self.layers[1..],
            _ => &self.layers,
        }
    }

    pub fn content_layer_ids(&self) -> Vec<&str> {
        self.content_layers().iter().map(|l| l.id.as_str()).collect()
    }

    pub fn spatial_reference(&self) -> Option<SpatialReference> {
        self.spatial_reference
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn add_layer(&mut self, layer: LayerHandle) {
        if self.layers.is_empty() {
            self.spatial_reference = layer.spatial_reference;
        }
        self.layers.push(layer);
    }

    /// Adds the layer that fixes the map's coordinate system.
    pub fn add_reference_layer(&mut self, layer: LayerHandle) {
        self.reference_layer = Some(layer.id.clone());
        self.add_layer(layer);
    }

    pub fn show_all_layers(&mut self) {
        for layer in &mut self.layers {
            layer.visible = true;
        }
    }

    /// Removes everything except the projection reference layer.
    pub fn clear_content(&mut self) -> Vec<LayerHandle> {
        let keep = usize::from(self.layers.len() > self.content_layers().len());
        let removed = self.layers.split_off(keep);
        if self.layers.is_empty() {
            self.spatial_reference = None;
            self.reference_layer = None;
        }
        removed
    }

    /// Removes every layer, group layers first, and returns them in removal order.
    pub fn clear(&mut self) -> Vec<LayerHandle> {
        let (mut removed, rest): (Vec<_>, Vec<_>) =
            self.layers.drain(..).partition(|layer| layer.is_group);
        removed.extend(rest);
        self.spatial_reference = None;
        self.reference_layer = None;
        removed
    }
}

/// A tile package written to local disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalArtifact {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ItemKind {
    TilePackage,
    HostedTileLayer,
}

impl ItemKind {
    /// The portal's item type string.
    pub fn portal_type(&self) -> &'static str {
        match self {
            ItemKind::TilePackage => "Vector Tile Package",
            ItemKind::HostedTileLayer => "Vector Tile Service",
        }
    }

    pub fn from_portal_type(item_type: &str) -> Option<Self> {
        match item_type {
            "Vector Tile Package" => Some(ItemKind::TilePackage),
            "Vector Tile Service" => Some(ItemKind::HostedTileLayer),
            _ => None,
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.portal_type())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: String,
    pub title: String,
    pub owner: String,
    pub kind: ItemKind,
}

impl fmt::Display for RemoteItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' ({})", self.kind, self.title, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SharingPolicy {
    pub org: bool,
    pub everyone: bool,
    pub groups: BTreeSet<String>,
    /// Also share the backing tile package item, not only the hosted layer.
    pub share_package: bool,
}

/// Stale items found for one title, split by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedItems {
    pub hosted_layers: Vec<RemoteItem>,
    pub tile_packages: Vec<RemoteItem>,
}

impl ResolvedItems {
    pub fn is_empty(&self) -> bool {
        self.hosted_layers.is_empty() && self.tile_packages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hosted_layers.len() + self.tile_packages.len()
    }

    /// Deletion order: hosted layers before the packages that back them.
    pub fn in_deletion_order(&self) -> impl Iterator<Item = &RemoteItem> {
        self.hosted_layers.iter().chain(self.tile_packages.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleStage {
    ProjectionGuard,
    LayerSet,
    PackageBuild,
    Resolve,
    DeleteStale,
    Upload,
    Publish,
    Share,
    ResetMap,
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleStage::ProjectionGuard => "projection_guard",
            CycleStage::LayerSet => "layer_set",
            CycleStage::PackageBuild => "package_build",
            CycleStage::Resolve => "resolve",
            CycleStage::DeleteStale => "delete_stale",
            CycleStage::Upload => "upload",
            CycleStage::Publish => "publish",
            CycleStage::Share => "share",
            CycleStage::ResetMap => "reset_map",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleStatus {
    Succeeded,
    /// Uploaded and published, but sharing was not fully applied.
    PartiallyPublished,
    Failed,
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleStatus::Succeeded => "succeeded",
            CycleStatus::PartiallyPublished => "partially_published",
            CycleStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Everything one package cycle did, including how far it got.
#[derive(Debug)]
pub struct CycleReport {
    pub package: String,
    pub status: CycleStatus,
    pub completed: Vec<CycleStage>,
    pub failed_stage: Option<CycleStage>,
    pub artifact: Option<LocalArtifact>,
    pub deleted: Vec<RemoteItem>,
    pub package_item: Option<RemoteItem>,
    pub service_item: Option<RemoteItem>,
    pub errors: Vec<PublishError>,
    pub duration: Duration,
}

impl CycleReport {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            status: CycleStatus::Failed,
            completed: Vec::new(),
            failed_stage: None,
            artifact: None,
            deleted: Vec::new(),
            package_item: None,
            service_item: None,
            errors: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn has_completed(&self, stage: CycleStage) -> bool {
        self.completed.contains(&stage)
    }

    pub fn is_success(&self) -> bool {
        self.status == CycleStatus::Succeeded
    }

    pub fn duration_ms(&self) -> u64 {
        duration_millis(self.duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(id: &str) -> LayerHandle {
        LayerHandle::new(id, format!("/layers/{}.lyr", id))
    }

    #[test]
    fn test_first_layer_sets_spatial_reference() {
        let mut map = WorkingMap::new("collector_map");
        map.add_reference_layer(layer("sr").with_spatial_reference(SpatialReference::WEB_MERCATOR));
        map.add_layer(layer("Roads").with_spatial_reference(SpatialReference::new(2927)));

        assert_eq!(map.spatial_reference(), Some(SpatialReference::WEB_MERCATOR));
        assert_eq!(map.layer_ids(), vec!["sr", "Roads"]);
        assert_eq!(map.content_layer_ids(), vec!["Roads"]);
    }

    #[test]
    fn test_clear_removes_group_layers_first() {
        let mut map = WorkingMap::new("collector_map");
        map.add_layer(layer("Roads"));
        map.add_layer(layer("Transportation").group());
        map.add_layer(layer("Barriers"));

        let removed: Vec<String> = map.clear().into_iter().map(|l| l.id).collect();

        assert_eq!(removed, vec!["Transportation", "Roads", "Barriers"]);
        assert!(map.is_empty());
        assert_eq!(map.spatial_reference(), None);
    }

    #[test]
    fn test_default_description_uses_name() {
        let spec = PackageSpec::new("Topography", vec!["Topography/Contours".to_string()]);
        assert_eq!(
            spec.description(),
            "VTPK for the Topography group layer. This layer is updated weekly."
        );

        let spec = spec.with_description("Contours");
        assert_eq!(spec.description(), "Contours");
    }

    #[test]
    fn test_duration_ms_saturates() {
        let mut report = CycleReport::new("Topography");
        report.duration = Duration::from_millis(1500);
        assert_eq!(report.duration_ms(), 1500);

        report.duration = Duration::MAX;
        assert_eq!(report.duration_ms(), u64::MAX);
    }

    #[test]
    fn test_resolved_items_deletion_order() {
        let item = |id: &str, kind| RemoteItem {
            id: id.to_string(),
            title: "roads".to_string(),
            owner: "me".to_string(),
            kind,
        };
        let resolved = ResolvedItems {
            hosted_layers: vec![item("svc", ItemKind::HostedTileLayer)],
            tile_packages: vec![item("pkg", ItemKind::TilePackage)],
        };

        let order: Vec<&str> = resolved.in_deletion_order().map(|i| i.id.as_str()).collect();
        assert_eq!(order, vec!["svc", "pkg"]);
        assert_eq!(resolved.len(), 2);
    }
}
