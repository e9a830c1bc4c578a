use crate::domain::model::{PackageSpec, WorkingMap};
use crate::domain::ports::LayerSource;
use crate::utils::error::Result;

/// Makes the map's content exactly the package's layers, in order.
///
/// Every identifier is resolved before the map is touched, so a missing layer
/// fails the build without leaving a half-assembled map. The projection
/// reference layer, if present, stays first.
pub async fn build_layer_set<L>(map: &mut WorkingMap, spec: &PackageSpec, layers: &L) -> Result<()>
where
    L: LayerSource + ?Sized,
{
    let mut resolved = Vec::with_capacity(spec.source_layers().len());
    for id in spec.source_layers() {
        resolved.push(layers.resolve_layer(id).await?);
    }

    let dropped = map.clear_content();
    if !dropped.is_empty() {
        tracing::debug!("Dropped {} leftover layers before building '{}'", dropped.len(), spec.name());
    }

    for layer in resolved {
        tracing::info!("Adding layer '{}' to map", layer.id);
        map.add_layer(layer);
    }
    // Hidden layers would be left out of the package.
    map.show_all_layers();

    Ok(())
}
