use crate::domain::model::{LayerHandle, SpatialReference};
use crate::domain::ports::LayerSource;
use crate::utils::error::{PublishError, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

/// A layer library on disk: identifiers are paths relative to `layer_root`,
/// without the layer file extension.
#[derive(Debug, Clone)]
pub struct FileLayerSource {
    layer_root: PathBuf,
    extension: String,
    reference_layer: PathBuf,
    reference_wkid: u32,
}

impl FileLayerSource {
    pub fn new(
        layer_root: impl Into<PathBuf>,
        extension: impl Into<String>,
        reference_layer: impl Into<PathBuf>,
        reference_wkid: u32,
    ) -> Self {
        Self {
            layer_root: layer_root.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
            reference_layer: reference_layer.into(),
            reference_wkid,
        }
    }

    /// Maps an identifier to its file. Both `/` and `\` separate folders, so
    /// identifiers copied from a Windows share resolve anywhere.
    pub fn layer_path(&self, id: &str) -> Result<PathBuf> {
        let parts: Vec<&str> = id
            .split(['/', '\\'])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();

        let Some((file_stem, folders)) = parts.split_last() else {
            return Err(PublishError::LayerResolution {
                layer: id.to_string(),
                reason: "empty layer identifier".to_string(),
            });
        };

        let mut path = self.layer_root.clone();
        for folder in folders {
            path.push(folder);
        }
        if self.extension.is_empty() {
            path.push(file_stem);
        } else {
            path.push(format!("{}.{}", file_stem, self.extension));
        }

        let relative = path.strip_prefix(&self.layer_root).unwrap_or(&path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(PublishError::LayerResolution {
                layer: id.to_string(),
                reason: "identifier points outside the layer library".to_string(),
            });
        }

        Ok(path)
    }

    pub fn layer_root(&self) -> &Path {
        &self.layer_root
    }
}

async fn ensure_file(id: &str, path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(PublishError::LayerResolution {
            layer: id.to_string(),
            reason: format!("{} is not a file", path.display()),
        }),
        Err(e) => Err(PublishError::LayerResolution {
            layer: id.to_string(),
            reason: format!("{}: {}", path.display(), e),
        }),
    }
}

#[async_trait]
impl LayerSource for FileLayerSource {
    async fn resolve_layer(&self, id: &str) -> Result<LayerHandle> {
        let path = self.layer_path(id)?;
        ensure_file(id, &path).await?;
        tracing::debug!("Resolved layer '{}' to {}", id, path.display());
        Ok(LayerHandle::new(id, path))
    }

    async fn reference_layer(&self) -> Result<LayerHandle> {
        let id = self
            .reference_layer
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "spatial_reference_layer".to_string());
        ensure_file(&id, &self.reference_layer).await?;

        Ok(LayerHandle::new(id, self.reference_layer.clone())
            .with_spatial_reference(SpatialReference::new(self.reference_wkid)))
    }
}
