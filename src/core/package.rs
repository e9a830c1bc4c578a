use crate::domain::model::{LocalArtifact, PackageSpec, WorkingMap};
use crate::domain::ports::TilePackager;
use crate::utils::error::{PublishError, Result};
use std::path::{Path, PathBuf};

pub const PACKAGE_EXTENSION: &str = "vtpk";

/// Where the package for `name` lives. One file per name, never versioned.
pub fn artifact_path(output_dir: &Path, name: &str) -> PathBuf {
    output_dir.join(format!("{}.{}", name, PACKAGE_EXTENSION))
}

/// Builds the package for `spec` from the map, replacing any earlier build.
pub async fn build_package<P>(
    map: &WorkingMap,
    spec: &PackageSpec,
    packager: &P,
    output_dir: &Path,
) -> Result<LocalArtifact>
where
    P: TilePackager + ?Sized,
{
    let build_error = |reason: String| PublishError::PackageBuild {
        package: spec.name().to_string(),
        reason,
    };

    match map.spatial_reference() {
        Some(sr) if sr.is_tiling_compatible() => {}
        Some(sr) => return Err(build_error(format!("map is in {}, not WKID 3857", sr))),
        None => return Err(build_error("map has no spatial reference; run the projection guard first".to_string())),
    }
    if map.content_layers().is_empty() {
        return Err(build_error("map has no layers to package".to_string()));
    }

    let path = artifact_path(output_dir, spec.name());
    match tokio::fs::remove_file(&path).await {
        Ok(()) => tracing::info!("Removed previous package {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(build_error(format!(
                "could not remove previous package {}: {}",
                path.display(),
                e
            )))
        }
    }

    tracing::info!("Creating vector tile package {}", path.display());
    let artifact = match packager.build_tile_package(map, &path).await {
        Ok(artifact) => artifact,
        Err(e @ PublishError::PackageBuild { .. }) => return Err(e),
        Err(e) => return Err(build_error(e.to_string())),
    };
    tracing::info!("Finished creating {} ({} bytes)", artifact.path.display(), artifact.size_bytes);

    Ok(LocalArtifact {
        name: spec.name().to_string(),
        ..artifact
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{LayerHandle, SpatialReference};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Writes a file whose contents record the build number.
    #[derive(Default)]
    struct CountingPackager {
        builds: AtomicUsize,
    }

    #[async_trait]
    impl TilePackager for CountingPackager {
        async fn build_tile_package(&self, map: &WorkingMap, output_path: &Path) -> Result<LocalArtifact> {
            let build = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
            assert!(!output_path.exists(), "stale package should be removed before building");
            let contents = format!("build {} layers {}", build, map.content_layer_ids().join(","));
            std::fs::write(output_path, &contents)?;
            Ok(LocalArtifact {
                name: "ignored".to_string(),
                path: output_path.to_path_buf(),
                size_bytes: contents.len() as u64,
            })
        }
    }

    fn ready_map() -> WorkingMap {
        let mut map = WorkingMap::new("collector_map");
        map.add_reference_layer(
            LayerHandle::new("sr", "/sr.lyr").with_spatial_reference(SpatialReference::WEB_MERCATOR),
        );
        map.add_layer(LayerHandle::new("Roads", "/roads.lyr"));
        map
    }

    #[tokio::test]
    async fn test_rebuild_overwrites_single_artifact() {
        let dir = TempDir::new().unwrap();
        let spec = PackageSpec::new("roads_vtpk", vec!["Roads".to_string()]);
        let packager = CountingPackager::default();
        let map = ready_map();

        build_package(&map, &spec, &packager, dir.path()).await.unwrap();
        let artifact = build_package(&map, &spec, &packager, dir.path()).await.unwrap();

        assert_eq!(artifact.name, "roads_vtpk");
        assert_eq!(artifact.path, dir.path().join("roads_vtpk.vtpk"));
        assert_eq!(std::fs::read_to_string(&artifact.path).unwrap(), "build 2 layers Roads");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_refuses_map_outside_tiling_reference() {
        let dir = TempDir::new().unwrap();
        let spec = PackageSpec::new("roads_vtpk", vec!["Roads".to_string()]);
        let mut map = WorkingMap::new("collector_map");
        map.add_layer(LayerHandle::new("Roads", "/roads.lyr").with_spatial_reference(SpatialReference::new(2927)));

        let err = build_package(&map, &spec, &CountingPackager::default(), dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::PackageBuild { .. }));
    }

    #[tokio::test]
    async fn test_refuses_empty_layer_set() {
        let dir = TempDir::new().unwrap();
        let spec = PackageSpec::new("roads_vtpk", vec![]);
        let mut map = ready_map();
        map.clear_content();

        let err = build_package(&map, &spec, &CountingPackager::default(), dir.path())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("no layers"));
    }
}
