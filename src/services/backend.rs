//! Durable key/blob storage behind the image store.
//!
//! `ObjectBackend` is the seam the coordinator and resolver are written
//! against: existence check, write, read, delete, each keyed by a storage
//! key string. `FsBackend` is the bundled implementation: payloads on
//! local disk beneath a root directory, with a small JSON sidecar carrying
//! the declared content type and write timestamp.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_STORAGE_KEY_LEN: usize = 1024;
const META_SUFFIX: &str = ".meta";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid storage key")]
    InvalidKey,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("object metadata unreadable: {0}")]
    Metadata(#[from] serde_json::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// A durable object fetched from the backend.
#[derive(Clone, Debug)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: String,
    pub stored_at: Option<DateTime<Utc>>,
}

/// Durable key/blob store contract.
///
/// `get` distinguishes a clean miss (`Ok(None)`) from an I/O fault
/// (`Err`); callers rely on that distinction to decide between fallback
/// and failure.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Lightweight metadata check — does the key hold an object?
    async fn exists(&self, key: &str) -> BackendResult<bool>;

    /// Write bytes under `key` with the declared content type. Writing
    /// identical bytes to the same key is safe to repeat.
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> BackendResult<()>;

    /// Read the object at `key`, or `None` if the slot is empty.
    async fn get(&self, key: &str) -> BackendResult<Option<StoredObject>>;

    /// Remove the object at `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> BackendResult<()>;
}

/// Sidecar record written next to each payload file.
#[derive(Serialize, Deserialize, Debug)]
struct SidecarMeta {
    content_type: String,
    stored_at: DateTime<Utc>,
}

/// Local-disk backend: payload at `root/{key}`, metadata at
/// `root/{key}.meta`.
#[derive(Clone, Debug)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Rejects empty/oversized keys, keys that begin with `/` or contain
    /// `..`, and control or backslash bytes. Keys built by the store are
    /// already safe; this is the backstop for anything else.
    fn ensure_key_safe(key: &str) -> BackendResult<()> {
        if key.is_empty() || key.len() > MAX_STORAGE_KEY_LEN {
            return Err(BackendError::InvalidKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(BackendError::InvalidKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(BackendError::InvalidKey);
        }
        Ok(())
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}{META_SUFFIX}"))
    }

    /// Content type for a key whose sidecar is missing or unreadable,
    /// guessed from the key's extension.
    fn guess_content_type(key: &str) -> String {
        mime_guess::from_path(Path::new(key))
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string()
    }
}

#[async_trait]
impl ObjectBackend for FsBackend {
    async fn exists(&self, key: &str) -> BackendResult<bool> {
        Self::ensure_key_safe(key)?;
        match fs::metadata(self.object_path(key)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(BackendError::Io(err)),
        }
    }

    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> BackendResult<()> {
        Self::ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or(BackendError::InvalidKey)?;
        fs::create_dir_all(&parent).await?;

        // Write through a temp file so readers never observe a partial
        // payload, then rename into place.
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        let write_result = async {
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<_, io::Error>(())
        }
        .await;
        if let Err(err) = write_result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BackendError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(BackendError::Io(err));
            }
        }

        let meta = SidecarMeta {
            content_type: content_type.to_string(),
            stored_at: Utc::now(),
        };
        fs::write(self.meta_path(key), serde_json::to_vec(&meta)?).await?;

        debug!("stored {} ({} bytes, {})", key, bytes.len(), content_type);
        Ok(())
    }

    async fn get(&self, key: &str) -> BackendResult<Option<StoredObject>> {
        Self::ensure_key_safe(key)?;
        let bytes = match fs::read(self.object_path(key)).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(BackendError::Io(err)),
        };

        let (content_type, stored_at) = match fs::read(self.meta_path(key)).await {
            Ok(raw) => {
                let meta: SidecarMeta = serde_json::from_slice(&raw)?;
                (meta.content_type, Some(meta.stored_at))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                (Self::guess_content_type(key), None)
            }
            Err(err) => return Err(BackendError::Io(err)),
        };

        Ok(Some(StoredObject {
            bytes,
            content_type,
            stored_at,
        }))
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        Self::ensure_key_safe(key)?;
        match fs::remove_file(self.object_path(key)).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("delete of absent key {}", key);
            }
            Err(err) => return Err(BackendError::Io(err)),
        }
        match fs::remove_file(self.meta_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BackendError::Io(err)),
        }
    }
}
