//! The replacement workflow for one package.
//!
//! The portal cannot overwrite a tile package or republish over an existing
//! hosted tile layer, so a cycle deletes what is there and recreates it. The
//! hosted layer is missing between Delete-Stale and Publish; that window is
//! accepted. Nothing completed is rolled back: a later run's Delete-Stale
//! clears whatever an earlier failed cycle left behind.

use crate::core::layer_set::build_layer_set;
use crate::core::package::{artifact_path, build_package};
use crate::core::projection::apply_projection_guard;
use crate::core::resolver::resolve_remote_items;
use crate::domain::model::{
    CycleReport, CycleStage, CycleStatus, LayerHandle, LocalArtifact, PackageSpec, RemoteItem,
    ResolvedItems, SharingPolicy, WorkingMap,
};
use crate::domain::ports::{LayerSource, RemoteCatalog, TilePackager};
use crate::utils::error::{PublishError, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// What a dry run found for one package.
#[derive(Debug)]
pub struct CyclePlan {
    pub package: String,
    pub artifact_path: PathBuf,
    pub layers: Vec<LayerHandle>,
    pub missing_layers: Vec<PublishError>,
    pub stale: Option<ResolvedItems>,
    pub resolve_error: Option<PublishError>,
}

impl CyclePlan {
    pub fn is_ready(&self) -> bool {
        self.missing_layers.is_empty() && self.resolve_error.is_none()
    }
}

/// Deletes stale items: every hosted layer first, then every package.
///
/// Each deletion is attempted even if an earlier one failed. Returns the
/// items that were deleted and the failures; any failure means the caller
/// must not upload.
pub async fn delete_stale<R>(catalog: &R, stale: &ResolvedItems) -> (Vec<RemoteItem>, Vec<PublishError>)
where
    R: RemoteCatalog + ?Sized,
{
    let mut deleted = Vec::new();
    let mut errors = Vec::new();

    if stale.is_empty() {
        tracing::info!("No items to delete from the portal");
        return (deleted, errors);
    }

    for item in stale.in_deletion_order() {
        tracing::info!("Deleting {}", item);
        match catalog.delete_item(&item.id).await {
            Ok(()) => deleted.push(item.clone()),
            Err(e) => {
                let e = match e {
                    PublishError::Delete { item_id, message, .. } => PublishError::Delete {
                        item_id,
                        title: item.title.clone(),
                        message,
                    },
                    other => PublishError::Delete {
                        item_id: item.id.clone(),
                        title: item.title.clone(),
                        message: other.to_string(),
                    },
                };
                tracing::error!("❌ {}", e);
                errors.push(e);
            }
        }
    }

    (deleted, errors)
}

pub struct ReplacementOrchestrator<L, P, R> {
    layers: L,
    packager: P,
    catalog: R,
    output_dir: PathBuf,
    sharing: SharingPolicy,
}

impl<L, P, R> ReplacementOrchestrator<L, P, R>
where
    L: LayerSource,
    P: TilePackager,
    R: RemoteCatalog,
{
    pub fn new(layers: L, packager: P, catalog: R, output_dir: impl Into<PathBuf>, sharing: SharingPolicy) -> Self {
        Self {
            layers,
            packager,
            catalog,
            output_dir: output_dir.into(),
            sharing,
        }
    }

    pub fn catalog(&self) -> &R {
        &self.catalog
    }

    pub fn layers(&self) -> &L {
        &self.layers
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn sharing(&self) -> &SharingPolicy {
        &self.sharing
    }

    /// Runs one full cycle and hands the map back, always empty.
    pub async fn run_cycle(&self, spec: &PackageSpec, mut map: WorkingMap) -> (WorkingMap, CycleReport) {
        let started = Instant::now();
        let mut report = CycleReport::new(spec.name());
        tracing::info!("▶️ Starting cycle for '{}'", spec.name());

        if let Some(artifact) = self.build_local(spec, &mut map, &mut report).await {
            report.artifact = Some(artifact.clone());
            self.replace_remote(spec, &artifact, &mut report).await;
        }

        let removed = map.clear();
        tracing::info!("Removed {} layers from map", removed.len());
        report.completed.push(CycleStage::ResetMap);
        report.duration = started.elapsed();

        match report.status {
            CycleStatus::Succeeded => {
                tracing::info!("✅ '{}' republished in {:?}", spec.name(), report.duration)
            }
            CycleStatus::PartiallyPublished => tracing::warn!(
                "⚠️ '{}' published but not fully shared ({:?})",
                spec.name(),
                report.duration
            ),
            CycleStatus::Failed => tracing::error!(
                "❌ '{}' failed at {} ({:?})",
                spec.name(),
                report
                    .failed_stage
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown stage".to_string()),
                report.duration
            ),
        }

        (map, report)
    }

    /// Projection guard, layer set and package build. `None` means the cycle failed.
    async fn build_local(
        &self,
        spec: &PackageSpec,
        map: &mut WorkingMap,
        report: &mut CycleReport,
    ) -> Option<LocalArtifact> {
        tracing::info!("Creating spatial reference layer for '{}'", spec.name());
        let guarded = apply_projection_guard(map, &self.layers).await;
        record(report, CycleStage::ProjectionGuard, guarded)?;

        let assembled = build_layer_set(map, spec, &self.layers).await;
        record(report, CycleStage::LayerSet, assembled)?;

        let built = build_package(map, spec, &self.packager, &self.output_dir).await;
        record(report, CycleStage::PackageBuild, built)
    }

    async fn replace_remote(&self, spec: &PackageSpec, artifact: &LocalArtifact, report: &mut CycleReport) {
        let title = spec.name();

        tracing::info!("Checking portal for existing '{}' content", title);
        let resolved = resolve_remote_items(&self.catalog, title).await;
        let Some(stale) = record(report, CycleStage::Resolve, resolved) else {
            return;
        };

        let (deleted, delete_errors) = delete_stale(&self.catalog, &stale).await;
        report.deleted = deleted;
        if !delete_errors.is_empty() {
            tracing::error!(
                "Not uploading '{}': {} stale items could not be deleted",
                title,
                delete_errors.len()
            );
            report.failed_stage = Some(CycleStage::DeleteStale);
            report.status = CycleStatus::Failed;
            report.errors.extend(delete_errors);
            return;
        }
        report.completed.push(CycleStage::DeleteStale);

        tracing::info!("Adding {} to the portal", artifact.path.display());
        let uploaded = self
            .catalog
            .upload_package(artifact, title, &spec.description())
            .await;
        let Some(package_item) = record(report, CycleStage::Upload, uploaded) else {
            return;
        };
        report.package_item = Some(package_item.clone());

        tracing::info!("Publishing hosted tile layer from {}", package_item);
        let published = self.catalog.publish_hosted_layer(&package_item).await;
        let Some(service_item) = record(report, CycleStage::Publish, published) else {
            return;
        };
        report.service_item = Some(service_item.clone());

        let share_errors = self.share(&package_item, &service_item).await;
        if share_errors.is_empty() {
            report.completed.push(CycleStage::Share);
            report.status = CycleStatus::Succeeded;
        } else {
            report.failed_stage = Some(CycleStage::Share);
            report.status = CycleStatus::PartiallyPublished;
            report.errors.extend(share_errors);
        }
    }

    /// Shares the hosted layer, and the package too if the policy says so.
    /// Failures are returned, not raised: the content is already live.
    async fn share(&self, package_item: &RemoteItem, service_item: &RemoteItem) -> Vec<PublishError> {
        let mut targets = vec![service_item];
        if self.sharing.share_package {
            targets.push(package_item);
        }

        let mut errors = Vec::new();
        for item in targets {
            tracing::info!(
                "Sharing {} (org: {}, everyone: {}, groups: {})",
                item,
                self.sharing.org,
                self.sharing.everyone,
                self.sharing.groups.len()
            );
            if let Err(e) = self.catalog.share_item(item, &self.sharing).await {
                tracing::warn!("⚠️ {}", e);
                errors.push(e);
            }
        }
        errors
    }

    /// Checks what a run would do without building, deleting or uploading.
    pub async fn plan_cycle(&self, spec: &PackageSpec) -> CyclePlan {
        let mut layers = Vec::new();
        let mut missing_layers = Vec::new();
        for id in spec.source_layers() {
            match self.layers.resolve_layer(id).await {
                Ok(layer) => layers.push(layer),
                Err(e) => missing_layers.push(e),
            }
        }

        let (stale, resolve_error) = match resolve_remote_items(&self.catalog, spec.name()).await {
            Ok(stale) => (Some(stale), None),
            Err(e) => (None, Some(e)),
        };

        CyclePlan {
            package: spec.name().to_string(),
            artifact_path: artifact_path(&self.output_dir, spec.name()),
            layers,
            missing_layers,
            stale,
            resolve_error,
        }
    }
}

/// Marks a stage done, or records it as the failing stage.
fn record<T>(report: &mut CycleReport, stage: CycleStage, outcome: Result<T>) -> Option<T> {
    match outcome {
        Ok(value) => {
            report.completed.push(stage);
            Some(value)
        }
        Err(e) => {
            tracing::error!("❌ {} failed: {}", stage, e);
            report.failed_stage = Some(stage);
            report.status = CycleStatus::Failed;
            report.errors.push(e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{CatalogOp, InMemoryCatalog};
    use crate::domain::model::{ItemKind, SpatialReference};
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    struct Library;

    #[async_trait]
    impl LayerSource for Library {
        async fn resolve_layer(&self, id: &str) -> Result<LayerHandle> {
            if id == "Missing" {
                return Err(PublishError::LayerResolution {
                    layer: id.to_string(),
                    reason: "not found".to_string(),
                });
            }
            Ok(LayerHandle::new(id, format!("/{}.lyr", id)))
        }

        async fn reference_layer(&self) -> Result<LayerHandle> {
            Ok(LayerHandle::new("sr", "/sr.lyr").with_spatial_reference(SpatialReference::WEB_MERCATOR))
        }
    }

    struct FilePackager;

    #[async_trait]
    impl TilePackager for FilePackager {
        async fn build_tile_package(&self, map: &WorkingMap, output_path: &Path) -> Result<LocalArtifact> {
            std::fs::create_dir_all(output_path.parent().unwrap())?;
            std::fs::write(output_path, map.content_layer_ids().join("\n"))?;
            Ok(LocalArtifact {
                name: String::new(),
                path: output_path.to_path_buf(),
                size_bytes: 1,
            })
        }
    }

    fn policy() -> SharingPolicy {
        SharingPolicy {
            org: true,
            everyone: false,
            groups: BTreeSet::from(["4154c84c38204236a0a633665f040976".to_string()]),
            share_package: true,
        }
    }

    fn orchestrator(dir: &TempDir) -> ReplacementOrchestrator<Library, FilePackager, InMemoryCatalog> {
        ReplacementOrchestrator::new(
            Library,
            FilePackager,
            InMemoryCatalog::new("jhth490"),
            dir.path().join("packages"),
            policy(),
        )
    }

    fn roads() -> PackageSpec {
        PackageSpec::new(
            "roads_vtpk",
            vec!["Roads".to_string(), "Intersections".to_string()],
        )
    }

    #[tokio::test]
    async fn test_clean_publish_succeeds() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&dir);

        let (map, report) = orchestrator.run_cycle(&roads(), WorkingMap::new("m")).await;

        assert_eq!(report.status, CycleStatus::Succeeded);
        assert!(report.errors.is_empty());
        assert!(map.is_empty());

        let catalog = orchestrator.catalog();
        let packages = catalog.items_titled("roads_vtpk", ItemKind::TilePackage);
        let services = catalog.items_titled("roads_vtpk", ItemKind::HostedTileLayer);
        assert_eq!(packages.len(), 1);
        assert_eq!(services.len(), 1);
        assert_eq!(catalog.sharing_of(&services[0].id), Some(policy()));
        assert_eq!(catalog.sharing_of(&packages[0].id), Some(policy()));
    }

    #[tokio::test]
    async fn test_stale_service_deleted_before_package() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&dir);
        let (old_package, old_service) = orchestrator.catalog().insert_published_pair("roads_vtpk");

        let (_, report) = orchestrator.run_cycle(&roads(), WorkingMap::new("m")).await;

        assert_eq!(report.status, CycleStatus::Succeeded);
        assert_eq!(report.deleted, vec![old_service.clone(), old_package.clone()]);

        let mutations = orchestrator.catalog().mutations();
        assert_eq!(mutations[0], CatalogOp::Delete { id: old_service.id });
        assert_eq!(mutations[1], CatalogOp::Delete { id: old_package.id });
        assert_eq!(
            mutations[2],
            CatalogOp::Upload {
                title: "roads_vtpk".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_delete_failure_blocks_upload_but_tries_all() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&dir);
        let catalog = orchestrator.catalog();
        let stuck = catalog.insert_item("roads_vtpk", "jhth490", ItemKind::HostedTileLayer);
        let package = catalog.insert_item("roads_vtpk", "jhth490", ItemKind::TilePackage);
        catalog.fail_delete_of(&stuck.id);

        let (map, report) = orchestrator.run_cycle(&roads(), WorkingMap::new("m")).await;

        assert_eq!(report.status, CycleStatus::Failed);
        assert_eq!(report.failed_stage, Some(CycleStage::DeleteStale));
        assert_eq!(report.deleted, vec![package]);
        assert!(matches!(&report.errors[0], PublishError::Delete { item_id, title, .. }
            if *item_id == stuck.id && title == "roads_vtpk"));
        assert!(!catalog
            .mutations()
            .iter()
            .any(|op| matches!(op, CatalogOp::Upload { .. })));
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_local_artifact() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&dir);
        orchestrator.catalog().insert_published_pair("roads_vtpk");
        orchestrator.catalog().fail_upload(true);

        let (map, report) = orchestrator.run_cycle(&roads(), WorkingMap::new("m")).await;

        assert_eq!(report.status, CycleStatus::Failed);
        assert_eq!(report.failed_stage, Some(CycleStage::Upload));
        assert!(orchestrator.catalog().items().is_empty());
        assert!(report.artifact.as_ref().unwrap().path.exists());
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_leaves_uploaded_package() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&dir);
        orchestrator.catalog().fail_publish(true);

        let (_, report) = orchestrator.run_cycle(&roads(), WorkingMap::new("m")).await;

        assert_eq!(report.status, CycleStatus::Failed);
        assert_eq!(report.failed_stage, Some(CycleStage::Publish));
        assert!(report.package_item.is_some());
        assert_eq!(
            orchestrator
                .catalog()
                .items_titled("roads_vtpk", ItemKind::TilePackage)
                .len(),
            1
        );

        // The next run cleans up the orphaned package.
        orchestrator.catalog().fail_publish(false);
        let (_, report) = orchestrator.run_cycle(&roads(), WorkingMap::new("m")).await;
        assert_eq!(report.status, CycleStatus::Succeeded);
        assert_eq!(report.deleted.len(), 1);
        assert_eq!(orchestrator.catalog().items().len(), 2);
    }

    #[tokio::test]
    async fn test_share_failure_is_partial_publish() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&dir);
        orchestrator.catalog().fail_share(true);

        let (_, report) = orchestrator.run_cycle(&roads(), WorkingMap::new("m")).await;

        assert_eq!(report.status, CycleStatus::PartiallyPublished);
        assert_eq!(report.failed_stage, Some(CycleStage::Share));
        assert!(report.service_item.is_some());
        assert!(report.errors.iter().all(|e| !e.is_fatal_for_cycle()));
        assert!(report.has_completed(CycleStage::Publish));
    }

    #[tokio::test]
    async fn test_layer_failure_resets_map_and_skips_remote() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&dir);
        let spec = PackageSpec::new("roads_vtpk", vec!["Roads".to_string(), "Missing".to_string()]);

        let (map, report) = orchestrator.run_cycle(&spec, WorkingMap::new("m")).await;

        assert_eq!(report.failed_stage, Some(CycleStage::LayerSet));
        assert!(report.has_completed(CycleStage::ResetMap));
        assert!(map.is_empty());
        assert!(orchestrator.catalog().operations().is_empty());
    }

    #[tokio::test]
    async fn test_delete_stale_is_idempotent() {
        let catalog = InMemoryCatalog::new("jhth490");
        catalog.insert_published_pair("roads_vtpk");

        let stale = resolve_remote_items(&catalog, "roads_vtpk").await.unwrap();
        let (deleted, errors) = delete_stale(&catalog, &stale).await;
        assert_eq!(deleted.len(), 2);
        assert!(errors.is_empty());

        catalog.clear_operations();
        let stale = resolve_remote_items(&catalog, "roads_vtpk").await.unwrap();
        let (deleted, errors) = delete_stale(&catalog, &stale).await;
        assert!(deleted.is_empty());
        assert!(errors.is_empty());
        assert!(catalog.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_plan_reports_missing_layers_and_stale_items() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&dir);
        orchestrator.catalog().insert_published_pair("roads_vtpk");
        let spec = PackageSpec::new("roads_vtpk", vec!["Roads".to_string(), "Missing".to_string()]);

        let plan = orchestrator.plan_cycle(&spec).await;

        assert!(!plan.is_ready());
        assert_eq!(plan.layers.len(), 1);
        assert_eq!(plan.missing_layers.len(), 1);
        assert_eq!(plan.stale.as_ref().unwrap().len(), 2);
        assert!(orchestrator.catalog().mutations().is_empty());
        assert!(!plan.artifact_path.exists());
    }
}
