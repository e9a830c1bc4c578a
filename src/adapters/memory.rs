use crate::domain::model::{ItemKind, LocalArtifact, RemoteItem, SharingPolicy};
use crate::domain::ports::RemoteCatalog;
use crate::utils::error::{PublishError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// A call made against the catalog, in the order it was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogOp {
    Search { title: String, kind: ItemKind },
    Delete { id: String },
    Upload { title: String },
    Publish { id: String },
    Share { id: String },
}

#[derive(Debug, Clone)]
struct StoredItem {
    item: RemoteItem,
    /// For hosted layers, the package item they were published from.
    source_item: Option<String>,
    sharing: Option<SharingPolicy>,
}

#[derive(Debug, Default)]
struct Failures {
    search: bool,
    upload: bool,
    publish: bool,
    share: bool,
    delete: HashSet<String>,
}

#[derive(Debug, Default)]
struct Inner {
    items: BTreeMap<String, StoredItem>,
    next_id: u64,
    ops: Vec<CatalogOp>,
    failures: Failures,
}

/// In-process portal catalog. Not durable; used by tests and for exercising
/// the workflow without a portal.
///
/// Search behaves like the portal's: a case-insensitive substring match, so
/// callers must filter on exact titles. Deleting a package that still backs a
/// hosted layer fails, the way the portal refuses to orphan a service.
#[derive(Debug)]
pub struct InMemoryCatalog {
    owner: String,
    inner: Mutex<Inner>,
}

impl InMemoryCatalog {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_id(inner: &mut Inner) -> String {
        inner.next_id += 1;
        format!("item{:04}", inner.next_id)
    }

    /// Seeds an item, e.g. one left over from a previous run.
    pub fn insert_item(&self, title: &str, owner: &str, kind: ItemKind) -> RemoteItem {
        let mut inner = self.lock();
        let item = RemoteItem {
            id: Self::next_id(&mut inner),
            title: title.to_string(),
            owner: owner.to_string(),
            kind,
        };
        inner.items.insert(
            item.id.clone(),
            StoredItem {
                item: item.clone(),
                source_item: None,
                sharing: None,
            },
        );
        item
    }

    /// Seeds a package and the hosted layer published from it.
    pub fn insert_published_pair(&self, title: &str) -> (RemoteItem, RemoteItem) {
        let owner = self.owner.clone();
        let package = self.insert_item(title, &owner, ItemKind::TilePackage);
        let service = self.insert_item(title, &owner, ItemKind::HostedTileLayer);
        if let Some(stored) = self.lock().items.get_mut(&service.id) {
            stored.source_item = Some(package.id.clone());
        }
        (package, service)
    }

    pub fn items(&self) -> Vec<RemoteItem> {
        self.lock().items.values().map(|s| s.item.clone()).collect()
    }

    pub fn items_titled(&self, title: &str, kind: ItemKind) -> Vec<RemoteItem> {
        self.lock()
            .items
            .values()
            .filter(|s| s.item.title == title && s.item.kind == kind)
            .map(|s| s.item.clone())
            .collect()
    }

    pub fn sharing_of(&self, id: &str) -> Option<SharingPolicy> {
        self.lock().items.get(id).and_then(|s| s.sharing.clone())
    }

    pub fn operations(&self) -> Vec<CatalogOp> {
        self.lock().ops.clone()
    }

    /// Operations that change catalog state.
    pub fn mutations(&self) -> Vec<CatalogOp> {
        self.operations()
            .into_iter()
            .filter(|op| !matches!(op, CatalogOp::Search { .. }))
            .collect()
    }

    pub fn clear_operations(&self) {
        self.lock().ops.clear();
    }

    pub fn fail_search(&self, fail: bool) {
        self.lock().failures.search = fail;
    }

    pub fn fail_upload(&self, fail: bool) {
        self.lock().failures.upload = fail;
    }

    pub fn fail_publish(&self, fail: bool) {
        self.lock().failures.publish = fail;
    }

    pub fn fail_share(&self, fail: bool) {
        self.lock().failures.share = fail;
    }

    pub fn fail_delete_of(&self, id: &str) {
        self.lock().failures.delete.insert(id.to_string());
    }
}

#[async_trait]
impl RemoteCatalog for InMemoryCatalog {
    fn owner(&self) -> &str {
        &self.owner
    }

    async fn find_items_by_title(&self, title: &str, kind: ItemKind) -> Result<Vec<RemoteItem>> {
        let mut inner = self.lock();
        inner.ops.push(CatalogOp::Search {
            title: title.to_string(),
            kind,
        });
        if inner.failures.search {
            return Err(PublishError::Resolve {
                title: title.to_string(),
                message: "simulated search failure".to_string(),
            });
        }

        let needle = title.to_lowercase();
        Ok(inner
            .items
            .values()
            .filter(|s| s.item.kind == kind && s.item.title.to_lowercase().contains(&needle))
            .map(|s| s.item.clone())
            .collect())
    }

    async fn delete_item(&self, id: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.ops.push(CatalogOp::Delete { id: id.to_string() });

        let Some(stored) = inner.items.get(id) else {
            return Ok(());
        };
        let title = stored.item.title.clone();

        if inner.failures.delete.contains(id) {
            return Err(PublishError::Delete {
                item_id: id.to_string(),
                title,
                message: "simulated delete failure".to_string(),
            });
        }
        let has_dependents = inner
            .items
            .values()
            .any(|s| s.source_item.as_deref() == Some(id));
        if has_dependents {
            return Err(PublishError::Delete {
                item_id: id.to_string(),
                title,
                message: "item is the source of a hosted service".to_string(),
            });
        }

        inner.items.remove(id);
        Ok(())
    }

    async fn upload_package(
        &self,
        artifact: &LocalArtifact,
        title: &str,
        _description: &str,
    ) -> Result<RemoteItem> {
        let mut inner = self.lock();
        inner.ops.push(CatalogOp::Upload {
            title: title.to_string(),
        });
        if inner.failures.upload {
            return Err(PublishError::Upload {
                title: title.to_string(),
                message: format!("simulated network error uploading {}", artifact.path.display()),
            });
        }

        let item = RemoteItem {
            id: Self::next_id(&mut inner),
            title: title.to_string(),
            owner: self.owner.clone(),
            kind: ItemKind::TilePackage,
        };
        inner.items.insert(
            item.id.clone(),
            StoredItem {
                item: item.clone(),
                source_item: None,
                sharing: None,
            },
        );
        Ok(item)
    }

    async fn publish_hosted_layer(&self, package_item: &RemoteItem) -> Result<RemoteItem> {
        let mut inner = self.lock();
        inner.ops.push(CatalogOp::Publish {
            id: package_item.id.clone(),
        });
        if inner.failures.publish {
            return Err(PublishError::Publish {
                item_id: package_item.id.clone(),
                message: "simulated publish failure".to_string(),
            });
        }
        if !inner.items.contains_key(&package_item.id) {
            return Err(PublishError::Publish {
                item_id: package_item.id.clone(),
                message: "item does not exist".to_string(),
            });
        }

        let item = RemoteItem {
            id: Self::next_id(&mut inner),
            title: package_item.title.clone(),
            owner: self.owner.clone(),
            kind: ItemKind::HostedTileLayer,
        };
        inner.items.insert(
            item.id.clone(),
            StoredItem {
                item: item.clone(),
                source_item: Some(package_item.id.clone()),
                sharing: None,
            },
        );
        Ok(item)
    }

    async fn share_item(&self, item: &RemoteItem, policy: &SharingPolicy) -> Result<()> {
        let mut inner = self.lock();
        inner.ops.push(CatalogOp::Share {
            id: item.id.clone(),
        });
        if inner.failures.share {
            return Err(PublishError::Share {
                item_id: item.id.clone(),
                message: "simulated sharing failure".to_string(),
            });
        }

        match inner.items.get_mut(&item.id) {
            Some(stored) => {
                stored.sharing = Some(policy.clone());
                Ok(())
            }
            None => Err(PublishError::Share {
                item_id: item.id.clone(),
                message: "item does not exist".to_string(),
            }),
        }
    }
}
