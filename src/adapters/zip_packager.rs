use crate::domain::model::{LocalArtifact, WorkingMap};
use crate::domain::ports::TilePackager;
use crate::utils::error::{PublishError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Tiling scheme recorded in the package manifest.
pub const ONLINE_TILING_SCHEME: &str = "ONLINE";

#[derive(Debug, Serialize)]
struct PackageManifest<'a> {
    name: &'a str,
    created: String,
    map: &'a str,
    tiling_scheme: &'a str,
    spatial_reference: u32,
    layers: Vec<ManifestLayer<'a>>,
}

#[derive(Debug, Serialize)]
struct ManifestLayer<'a> {
    id: &'a str,
    entry: String,
}

/// Writes a `.vtpk` as a zip archive: a JSON manifest plus the source of every
/// visible layer in map order.
#[derive(Debug, Clone, Default)]
pub struct ZipTilePackager;

impl ZipTilePackager {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TilePackager for ZipTilePackager {
    async fn build_tile_package(&self, map: &WorkingMap, output_path: &Path) -> Result<LocalArtifact> {
        let name = output_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let build_error = |reason: String| PublishError::PackageBuild {
            package: name.clone(),
            reason,
        };

        let spatial_reference = match map.spatial_reference() {
            Some(sr) if sr.is_tiling_compatible() => sr,
            Some(sr) => {
                return Err(build_error(format!(
                    "map is in {}, the {} tiling scheme needs WKID 3857",
                    sr, ONLINE_TILING_SCHEME
                )))
            }
            None => return Err(build_error("map has no spatial reference".to_string())),
        };

        // Read everything first so an unreachable layer leaves no partial file.
        let mut entries = Vec::new();
        for (index, layer) in map.layers().iter().filter(|l| l.visible).enumerate() {
            let data = tokio::fs::read(&layer.source).await.map_err(|e| {
                build_error(format!(
                    "source layer '{}' is unreachable ({}): {}",
                    layer.id,
                    layer.source.display(),
                    e
                ))
            })?;
            let file_name = layer
                .source
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_else(|| layer.id.clone());
            entries.push((layer.id.as_str(), format!("layers/{:02}_{}", index, file_name), data));
        }

        let manifest = PackageManifest {
            name: &name,
            created: chrono::Utc::now().to_rfc3339(),
            map: map.name(),
            tiling_scheme: ONLINE_TILING_SCHEME,
            spatial_reference: spatial_reference.wkid,
            layers: entries
                .iter()
                .map(|(id, entry, _)| ManifestLayer {
                    id: *id,
                    entry: entry.clone(),
                })
                .collect(),
        };
        let manifest_json = serde_json::to_vec_pretty(&manifest)?;

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let file = std::fs::File::create(output_path)?;
        let mut zip = ZipWriter::new(file);

        zip.start_file("manifest.json", options)?;
        zip.write_all(&manifest_json)?;
        for (_, entry, data) in &entries {
            zip.start_file(entry.as_str(), options)?;
            zip.write_all(data)?;
        }
        zip.finish()?;

        let size_bytes = std::fs::metadata(output_path)?.len();
        tracing::debug!(
            "Wrote {} ({} layers, {} bytes)",
            output_path.display(),
            entries.len(),
            size_bytes
        );

        Ok(LocalArtifact {
            name,
            path: output_path.to_path_buf(),
            size_bytes,
        })
    }
}
