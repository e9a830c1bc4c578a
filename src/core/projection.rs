use crate::domain::model::{SpatialReference, WorkingMap, WEB_MERCATOR_WKID};
use crate::domain::ports::LayerSource;
use crate::utils::error::{PublishError, Result};

/// Empties the map and seeds it with the reference layer so the map takes on
/// the tiling spatial reference.
///
/// Packaging a map in any other frame does not fail, it produces tiles with
/// the wrong boundaries, so this refuses a reference layer that is not in
/// Web Mercator.
pub async fn apply_projection_guard<L>(map: &mut WorkingMap, layers: &L) -> Result<()>
where
    L: LayerSource + ?Sized,
{
    let reference = layers.reference_layer().await?;
    match reference.spatial_reference {
        Some(sr) if sr.is_tiling_compatible() => {}
        other => {
            return Err(PublishError::SpatialReference {
                expected: WEB_MERCATOR_WKID,
                found: other
                    .map(|sr| sr.to_string())
                    .unwrap_or_else(|| "an unknown spatial reference".to_string()),
            })
        }
    }

    for layer in map.clear() {
        tracing::debug!("Removed layer '{}' from map", layer.id);
    }
    tracing::debug!("Adding spatial reference layer '{}'", reference.id);
    map.add_reference_layer(reference);

    debug_assert_eq!(map.len(), 1);
    debug_assert_eq!(map.spatial_reference(), Some(SpatialReference::WEB_MERCATOR));
    Ok(())
}
