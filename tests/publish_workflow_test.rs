use anyhow::Result;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;
use tempfile::TempDir;
use vtpk_publish::adapters::memory::CatalogOp;
use vtpk_publish::core::batch::PublishBatch;
use vtpk_publish::core::ItemKind;
use vtpk_publish::domain::model::SharingPolicy;
use vtpk_publish::{
    CycleStage, CycleStatus, FileLayerSource, InMemoryCatalog, PackageSpec, ReplacementOrchestrator,
    WorkingMap, ZipTilePackager,
};

type TestOrchestrator = ReplacementOrchestrator<FileLayerSource, ZipTilePackager, InMemoryCatalog>;

const GROUP_ID: &str = "4154c84c38204236a0a633665f040976";

/// Layer library with a Web Mercator reference layer and a few layer files.
fn layer_library(root: &Path) -> FileLayerSource {
    let layers = root.join("qdl");
    for (folder, name, body) in [
        ("Transportation", "Roads", "roads"),
        ("Transportation", "Intersections", "intersections"),
        ("Topography", "Contours", "contours"),
    ] {
        std::fs::create_dir_all(layers.join(folder)).unwrap();
        std::fs::write(layers.join(folder).join(format!("{}.lyr", name)), body).unwrap();
    }
    std::fs::write(root.join("fc_set_spatial_reference.lyr"), b"").unwrap();

    FileLayerSource::new(&layers, "lyr", root.join("fc_set_spatial_reference.lyr"), 3857)
}

fn policy() -> SharingPolicy {
    SharingPolicy {
        org: true,
        everyone: false,
        groups: BTreeSet::from([GROUP_ID.to_string()]),
        share_package: true,
    }
}

fn orchestrator(dir: &TempDir) -> TestOrchestrator {
    ReplacementOrchestrator::new(
        layer_library(dir.path()),
        ZipTilePackager::new(),
        InMemoryCatalog::new("jhth490"),
        dir.path().join("vector_tile_packages"),
        policy(),
    )
}

fn roads() -> PackageSpec {
    PackageSpec::new(
        "roads_vtpk",
        vec![
            r"Transportation\Roads".to_string(),
            "Transportation/Intersections".to_string(),
        ],
    )
}

fn packaged_layer_ids(path: &Path) -> Result<Vec<String>> {
    let mut archive = zip::ZipArchive::new(std::fs::File::open(path)?)?;
    let mut manifest = String::new();
    archive.by_name("manifest.json")?.read_to_string(&mut manifest)?;
    let manifest: serde_json::Value = serde_json::from_str(&manifest)?;
    Ok(manifest["layers"]
        .as_array()
        .map(|layers| {
            layers
                .iter()
                .filter_map(|l| l["id"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default())
}

fn assert_single_published_pair(catalog: &InMemoryCatalog, title: &str) {
    let packages = catalog.items_titled(title, ItemKind::TilePackage);
    let services = catalog.items_titled(title, ItemKind::HostedTileLayer);
    assert_eq!(packages.len(), 1, "exactly one tile package for {}", title);
    assert_eq!(services.len(), 1, "exactly one hosted layer for {}", title);
    assert!(packages.iter().chain(services.iter()).all(|i| i.owner == "jhth490"));
    assert_eq!(catalog.sharing_of(&services[0].id), Some(policy()));
}

#[tokio::test]
async fn test_first_publish_succeeds() -> Result<()> {
    let dir = TempDir::new()?;
    let orchestrator = orchestrator(&dir);

    let (map, report) = orchestrator.run_cycle(&roads(), WorkingMap::new("collector_map")).await;

    assert_eq!(report.status, CycleStatus::Succeeded);
    assert!(report.deleted.is_empty());
    assert!(map.is_empty());
    assert_single_published_pair(orchestrator.catalog(), "roads_vtpk");

    let artifact = report.artifact.expect("artifact built");
    assert_eq!(artifact.path, dir.path().join("vector_tile_packages").join("roads_vtpk.vtpk"));
    assert_eq!(
        packaged_layer_ids(&artifact.path)?,
        vec![
            "fc_set_spatial_reference",
            r"Transportation\Roads",
            "Transportation/Intersections"
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_stale_items_replaced() -> Result<()> {
    let dir = TempDir::new()?;
    let orchestrator = orchestrator(&dir);
    let (old_package, old_service) = orchestrator.catalog().insert_published_pair("roads_vtpk");
    // Near misses the portal search would also return.
    orchestrator
        .catalog()
        .insert_item("roads_vtpk_archive", "jhth490", ItemKind::TilePackage);
    orchestrator
        .catalog()
        .insert_item("roads_vtpk", "someone_else", ItemKind::HostedTileLayer);

    let (_, report) = orchestrator.run_cycle(&roads(), WorkingMap::new("collector_map")).await;

    assert_eq!(report.status, CycleStatus::Succeeded);
    assert_eq!(report.deleted, vec![old_service.clone(), old_package.clone()]);

    let mutations = orchestrator.catalog().mutations();
    let service_deleted = mutations
        .iter()
        .position(|op| *op == CatalogOp::Delete { id: old_service.id.clone() })
        .unwrap();
    let package_deleted = mutations
        .iter()
        .position(|op| *op == CatalogOp::Delete { id: old_package.id.clone() })
        .unwrap();
    let uploaded = mutations
        .iter()
        .position(|op| matches!(op, CatalogOp::Upload { .. }))
        .unwrap();
    assert!(service_deleted < package_deleted);
    assert!(package_deleted < uploaded);

    let packages = orchestrator.catalog().items_titled("roads_vtpk", ItemKind::TilePackage);
    assert_eq!(packages.len(), 1);
    assert_ne!(packages[0].id, old_package.id);
    assert_eq!(
        orchestrator
            .catalog()
            .items_titled("roads_vtpk_archive", ItemKind::TilePackage)
            .len(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_upload_failure_leaves_no_remote_items() -> Result<()> {
    let dir = TempDir::new()?;
    let orchestrator = orchestrator(&dir);
    orchestrator.catalog().insert_published_pair("roads_vtpk");
    orchestrator.catalog().fail_upload(true);

    let (map, report) = orchestrator.run_cycle(&roads(), WorkingMap::new("collector_map")).await;

    assert_eq!(report.status, CycleStatus::Failed);
    assert_eq!(report.failed_stage, Some(CycleStage::Upload));
    assert!(orchestrator.catalog().items().is_empty());
    assert!(map.is_empty());

    let artifact = report.artifact.expect("artifact kept for retry");
    assert!(artifact.path.exists());
    Ok(())
}

#[tokio::test]
async fn test_repeated_cycles_keep_single_artifact_and_pair() -> Result<()> {
    let dir = TempDir::new()?;
    let orchestrator = orchestrator(&dir);
    let mut map = WorkingMap::new("collector_map");

    for _ in 0..3 {
        let (returned, report) = orchestrator.run_cycle(&roads(), map).await;
        assert_eq!(report.status, CycleStatus::Succeeded);
        map = returned;
    }

    assert_single_published_pair(orchestrator.catalog(), "roads_vtpk");
    assert_eq!(orchestrator.catalog().items().len(), 2);
    let packages: Vec<_> = std::fs::read_dir(dir.path().join("vector_tile_packages"))?.collect();
    assert_eq!(packages.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_batch_continues_after_failed_package() -> Result<()> {
    let dir = TempDir::new()?;
    let batch = PublishBatch::new(orchestrator(&dir));
    let specs = vec![
        PackageSpec::new("Transportation", vec![r"Transportation\Ferries".to_string()]),
        PackageSpec::new("Topography", vec![r"Topography\Contours".to_string()]),
        roads(),
    ];

    let mut stale_map = WorkingMap::new("collector_map");
    stale_map.add_layer(vtpk_publish::core::LayerHandle::new("Leftover", dir.path().join("x.lyr")));

    let (map, summary) = batch.run(&specs, stale_map).await;

    assert!(map.is_empty());
    let statuses: Vec<CycleStatus> = summary.reports.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![CycleStatus::Failed, CycleStatus::Succeeded, CycleStatus::Succeeded]
    );
    assert_eq!(summary.reports[0].failed_stage, Some(CycleStage::LayerSet));
    assert_eq!(summary.exit_code(), 1);

    // Nothing from the failed or leftover layer sets leaks into later packages.
    let topography = summary.reports[1].artifact.as_ref().unwrap();
    assert_eq!(
        packaged_layer_ids(&topography.path)?,
        vec!["fc_set_spatial_reference", r"Topography\Contours"]
    );

    let catalog = batch.orchestrator().catalog();
    assert!(catalog.items_titled("Transportation", ItemKind::TilePackage).is_empty());
    assert_single_published_pair(catalog, "Topography");
    assert_single_published_pair(catalog, "roads_vtpk");
    Ok(())
}

#[tokio::test]
async fn test_wrong_reference_projection_fails_before_packaging() -> Result<()> {
    let dir = TempDir::new()?;
    let layers = layer_library(dir.path());
    let wrong = FileLayerSource::new(
        layers.layer_root(),
        "lyr",
        dir.path().join("fc_set_spatial_reference.lyr"),
        2927,
    );
    let orchestrator = ReplacementOrchestrator::new(
        wrong,
        ZipTilePackager::new(),
        InMemoryCatalog::new("jhth490"),
        dir.path().join("vector_tile_packages"),
        policy(),
    );

    let (map, report) = orchestrator.run_cycle(&roads(), WorkingMap::new("collector_map")).await;

    assert_eq!(report.failed_stage, Some(CycleStage::ProjectionGuard));
    assert!(report.artifact.is_none());
    assert!(!dir.path().join("vector_tile_packages").join("roads_vtpk.vtpk").exists());
    assert!(orchestrator.catalog().operations().is_empty());
    assert!(map.is_empty());
    Ok(())
}
