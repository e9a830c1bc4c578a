use crate::domain::model::{ItemKind, RemoteItem, ResolvedItems};
use crate::domain::ports::RemoteCatalog;
use crate::utils::error::{PublishError, Result};

/// Finds the operating account's items titled exactly `title`.
///
/// The catalog's search is allowed to be loose; anything that is not a
/// case-sensitive title match owned by the account is dropped here, because
/// whatever this returns gets deleted.
pub async fn resolve_remote_items<R>(catalog: &R, title: &str) -> Result<ResolvedItems>
where
    R: RemoteCatalog + ?Sized,
{
    let owner = catalog.owner();
    let exact = |items: Vec<RemoteItem>, kind: ItemKind| -> Vec<RemoteItem> {
        items
            .into_iter()
            .filter(|item| item.kind == kind && item.title == title && item.owner == owner)
            .collect()
    };

    let mut resolved = ResolvedItems::default();
    for kind in [ItemKind::HostedTileLayer, ItemKind::TilePackage] {
        let found = catalog
            .find_items_by_title(title, kind)
            .await
            .map_err(|e| match e {
                PublishError::Resolve { .. } => e,
                other => PublishError::Resolve {
                    title: title.to_string(),
                    message: other.to_string(),
                },
            })?;
        let candidates = found.len();
        let matches = exact(found, kind);
        if matches.len() < candidates {
            tracing::debug!(
                "Ignoring {} near-miss {} results for '{}'",
                candidates - matches.len(),
                kind,
                title
            );
        }

        match kind {
            ItemKind::HostedTileLayer => resolved.hosted_layers = matches,
            ItemKind::TilePackage => resolved.tile_packages = matches,
        }
    }

    Ok(resolved)
}
