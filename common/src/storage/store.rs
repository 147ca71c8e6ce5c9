use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectStore, PutPayload};

use crate::utils::config::{AppConfig, StorageKind};

pub type DynStore = Arc<dyn ObjectStore>;

/// Marker object that records a bucket as created.
const BUCKET_MARKER: &str = ".bucket";

/// Bucket/key object storage over an `object_store` backend.
///
/// Buckets are top level prefixes. A bucket exists once its marker object has been written.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
    backend_kind: StorageKind,
    local_base: Option<PathBuf>,
}

impl StorageManager {
    pub async fn new(cfg: &AppConfig) -> object_store::Result<Self> {
        let backend_kind = cfg.storage.clone();
        let (store, local_base) = create_storage_backend(cfg).await?;

        Ok(Self {
            store,
            backend_kind,
            local_base,
        })
    }

    /// Wraps an already constructed backend, mostly for tests.
    pub fn with_backend(store: DynStore, backend_kind: StorageKind) -> Self {
        Self {
            store,
            backend_kind,
            local_base: None,
        }
    }

    pub async fn bucket_exists(&self, bucket: &str) -> object_store::Result<bool> {
        let marker = object_location(bucket, BUCKET_MARKER)?;
        self.head_exists(&marker).await
    }

    pub async fn make_bucket(&self, bucket: &str) -> object_store::Result<()> {
        let marker = object_location(bucket, BUCKET_MARKER)?;
        self.store
            .put(&marker, PutPayload::from_static(b""))
            .await
            .map(|_| ())
    }

    /// Creates the bucket unless it already exists.
    pub async fn ensure_bucket(&self, bucket: &str) -> object_store::Result<()> {
        if !self.bucket_exists(bucket).await? {
            tracing::info!(bucket = %bucket, "Creating storage bucket");
            self.make_bucket(bucket).await?;
        }
        Ok(())
    }

    pub async fn put(&self, bucket: &str, key: &str, data: Bytes) -> object_store::Result<()> {
        let location = object_location(bucket, key)?;
        let size = data.len();
        self.store
            .put(&location, PutPayload::from_bytes(data))
            .await?;
        tracing::debug!(location = %location, size, "Stored object");
        Ok(())
    }

    pub async fn get_stream(
        &self,
        bucket: &str,
        key: &str,
    ) -> object_store::Result<BoxStream<'static, object_store::Result<Bytes>>> {
        let location = object_location(bucket, key)?;
        let result = self.store.get(&location).await?;
        Ok(result.into_stream())
    }

    /// Removes a single object. Removing a missing object is not an error.
    pub async fn remove(&self, bucket: &str, key: &str) -> object_store::Result<()> {
        let location = object_location(bucket, key)?;
        match self.store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
            Err(err) => return Err(err),
        }

        if matches!(self.backend_kind, StorageKind::Local) {
            if let Some((parent, _)) = key.rsplit_once('/') {
                self.cleanup_empty_dirs(&format!("{bucket}/{parent}")).await;
            }
        }
        Ok(())
    }

    pub async fn exists(&self, bucket: &str, key: &str) -> object_store::Result<bool> {
        let location = object_location(bucket, key)?;
        self.head_exists(&location).await
    }

    async fn head_exists(&self, location: &ObjPath) -> object_store::Result<bool> {
        match self.store.head(location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Walks up from `relative` removing empty directories below the base. Best effort.
    async fn cleanup_empty_dirs(&self, relative: &str) {
        let Some(base) = &self.local_base else {
            return;
        };
        if !is_safe_relative(relative) {
            return;
        }

        let mut current = base.join(relative);
        while current.starts_with(base) && current.as_path() != base.as_path() {
            match tokio::fs::remove_dir(&current).await {
                Ok(()) => {}
                Err(err) => match err.kind() {
                    ErrorKind::NotFound => {}
                    ErrorKind::DirectoryNotEmpty => break,
                    _ => {
                        tracing::debug!(
                            error = %err,
                            path = %current.display(),
                            "Failed to remove directory during cleanup"
                        );
                        break;
                    }
                },
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            }
        }
    }
}

fn is_safe_relative(location: &str) -> bool {
    let path = Path::new(location);
    !path.is_absolute()
        && !path
            .components()
            .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
}

/// Joins bucket and key into an object path, rejecting traversal and empty segments.
pub fn object_location(bucket: &str, key: &str) -> object_store::Result<ObjPath> {
    let joined = format!("{bucket}/{key}");
    if bucket.is_empty() || bucket.contains('/') || key.is_empty() || !is_safe_relative(&joined) {
        return Err(object_store::Error::Generic {
            store: "StorageManager",
            source: format!("invalid object location: {joined}").into(),
        });
    }
    ObjPath::parse(&joined).map_err(|err| object_store::Error::Generic {
        store: "StorageManager",
        source: Box::new(err),
    })
}

async fn create_storage_backend(
    cfg: &AppConfig,
) -> object_store::Result<(DynStore, Option<PathBuf>)> {
    match cfg.storage {
        StorageKind::Local => {
            let base = resolve_base_dir(cfg);
            if !base.exists() {
                tokio::fs::create_dir_all(&base).await.map_err(|e| {
                    object_store::Error::Generic {
                        store: "LocalFileSystem",
                        source: e.into(),
                    }
                })?;
            }
            let store = LocalFileSystem::new_with_prefix(base.clone())?;
            Ok((Arc::new(store), Some(base)))
        }
        StorageKind::Memory => Ok((Arc::new(InMemory::new()), None)),
    }
}

/// Resolves `data_dir` against the working directory when it is relative.
pub fn resolve_base_dir(cfg: &AppConfig) -> PathBuf {
    let configured = PathBuf::from(&cfg.data_dir);
    if configured.is_absolute() {
        configured
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(configured)
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use super::*;

    pub fn test_config_memory() -> AppConfig {
        AppConfig {
            surrealdb_address: "mem://".into(),
            data_dir: "/tmp/unused".into(),
            http_port: 0,
            storage: StorageKind::Memory,
            ..Default::default()
        }
    }

    /// In-memory storage with its own isolated backend.
    pub fn memory_storage() -> StorageManager {
        StorageManager::with_backend(Arc::new(InMemory::new()), StorageKind::Memory)
    }
}
