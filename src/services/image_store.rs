//! Content-addressed image store: upload coordination and tiered lookup.
//!
//! Uploads are fingerprinted, validated, and written at most once per
//! distinct (owner, content) pair over the life of the backend. Reads
//! resolve through three tiers in fixed order: the owner-scoped key, a
//! cross-owner scan of the in-process dedup index, then the public
//! namespace. Tier fallback happens only on a clean miss; a backend error
//! surfaces immediately instead of being masked by the next tier.

use crate::models::identity::OwnerId;
use crate::services::{
    backend::{BackendError, ObjectBackend, StoredObject},
    dedup::{DedupEntry, DedupIndex},
    keys,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// The four raster image types the store accepts and serves.
pub const ALLOWED_IMAGE_TYPES: [&str; 4] =
    ["image/jpeg", "image/png", "image/gif", "image/webp"];

/// Default payload cap (5 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// Default bound on the dedup index.
pub const DEFAULT_DEDUP_CAPACITY: usize = 4096;

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("no image content provided")]
    MissingContent,
    #[error("unsupported content type `{0}`: only JPG, PNG, GIF and WEBP images are accepted")]
    UnsupportedType(String),
    #[error("image of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("malformed image reference `{0}`")]
    InvalidReference(String),
    #[error("image not found")]
    NotFound,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type StoreResult<T> = Result<T, ImageStoreError>;

/// Tunable store behavior, sourced from `AppConfig`.
#[derive(Clone, Debug)]
pub struct StorePolicy {
    /// Upper bound on an uploaded payload, in bytes.
    pub max_upload_bytes: usize,
    /// Entry bound for the in-process dedup index.
    pub dedup_capacity: usize,
    /// Whether lookup may fall back to the cross-owner index scan.
    /// Disabling restricts reads to the owner tier plus the public
    /// namespace.
    pub cross_owner_lookup: bool,
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            cross_owner_lookup: true,
        }
    }
}

/// Result of an upload: the stable reference plus whether this call
/// performed a durable write (`created`) or reused existing content.
#[derive(Clone, Debug)]
pub struct UploadOutcome {
    pub url: String,
    pub fingerprint: String,
    pub created: bool,
}

/// A successfully resolved image, ready to serve.
#[derive(Clone, Debug)]
pub struct ResolvedImage {
    pub bytes: Bytes,
    pub content_type: String,
    pub stored_at: Option<DateTime<Utc>>,
}

/// The store itself. Cheap to clone; all state lives behind an `Arc` so a
/// process shares one backend handle and one dedup index, and tests can
/// run isolated instances side by side.
#[derive(Clone)]
pub struct ImageStore {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn ObjectBackend>,
    index: DedupIndex,
    policy: StorePolicy,
}

impl ImageStore {
    pub fn new(backend: Arc<dyn ObjectBackend>, policy: StorePolicy) -> Self {
        let index = DedupIndex::new(policy.dedup_capacity);
        Self {
            inner: Arc::new(Inner {
                backend,
                index,
                policy,
            }),
        }
    }

    /// Shared handle on the durable backend, for health probes.
    pub fn backend(&self) -> Arc<dyn ObjectBackend> {
        Arc::clone(&self.inner.backend)
    }

    /// Validate and store an uploaded image, deduplicating against both
    /// the in-process index and the durable backend.
    ///
    /// Validation order is fixed: content present, type whitelisted, size
    /// within the cap. A rejected upload performs no hashing and no
    /// backend I/O.
    pub async fn upload(
        &self,
        owner: &OwnerId,
        bytes: Bytes,
        declared_name: &str,
        declared_type: Option<&str>,
    ) -> StoreResult<UploadOutcome> {
        if bytes.is_empty() {
            return Err(ImageStoreError::MissingContent);
        }

        let content_type = effective_content_type(declared_type, declared_name)
            .unwrap_or_else(|| "unknown".to_string());
        if !is_allowed_type(&content_type) {
            return Err(ImageStoreError::UnsupportedType(content_type));
        }

        let limit = self.inner.policy.max_upload_bytes;
        if bytes.len() > limit {
            return Err(ImageStoreError::PayloadTooLarge {
                size: bytes.len(),
                limit,
            });
        }

        let fingerprint = keys::fingerprint(&bytes);
        let ext = keys::normalize_extension(declared_name)
            .unwrap_or_else(|| canonical_extension(&content_type).to_string());

        // Index hit: this owner already uploaded this content during the
        // current process lifetime. Return the cached reference with no
        // backend round trip at all.
        if let Some(entry) = self.inner.index.get(owner, &fingerprint) {
            debug!("dedup index hit for owner {} fingerprint {}", owner, fingerprint);
            return Ok(UploadOutcome {
                url: entry.url,
                fingerprint,
                created: false,
            });
        }

        let storage_key = keys::owner_key(owner, &fingerprint, &ext);
        let url = keys::view_url(&fingerprint, &ext, Some(owner));

        // The index is volatile and per-process, so its miss proves
        // nothing. The backend existence check is the actual dedup
        // guarantee, surviving restarts and other instances.
        let created = if self.inner.backend.exists(&storage_key).await? {
            debug!("backend already holds {}, skipping write", storage_key);
            false
        } else {
            self.inner
                .backend
                .put(&storage_key, bytes.clone(), &content_type)
                .await?;
            info!(
                "stored {} ({} bytes, {}) for owner {}",
                storage_key,
                bytes.len(),
                content_type,
                owner
            );
            true
        };

        // Only after a confirmed write or existence hit. A failed write
        // must never leave a dangling shortcut behind.
        self.inner.index.insert(
            owner,
            &fingerprint,
            DedupEntry {
                url: url.clone(),
                storage_key,
            },
        );

        Ok(UploadOutcome {
            url,
            fingerprint,
            created,
        })
    }

    /// Resolve a requested reference (`{fingerprint}.{ext}`) to stored
    /// bytes, searching the owner namespace, the cross-owner dedup index,
    /// and the public namespace in that order.
    pub async fn resolve(
        &self,
        requested_name: &str,
        owner_hint: Option<&OwnerId>,
    ) -> StoreResult<ResolvedImage> {
        let (fingerprint, ext) = keys::split_reference(requested_name)
            .ok_or_else(|| ImageStoreError::InvalidReference(requested_name.to_string()))?;

        // Tier 1: the caller's own namespace.
        if let Some(owner) = owner_hint {
            let key = keys::owner_key(owner, fingerprint, ext);
            if let Some(obj) = self.inner.backend.get(&key).await? {
                debug!("resolved {} at owner key {}", requested_name, key);
                return verify_resolved(obj);
            }
        }

        // Tier 2: the reference format does not require the right owner
        // hint, so scan the index across all owners. Every candidate is
        // tried; the scan does not assume a single live match.
        if self.inner.policy.cross_owner_lookup {
            for entry in self.inner.index.matches_fingerprint(fingerprint) {
                if let Some(obj) = self.inner.backend.get(&entry.storage_key).await? {
                    debug!(
                        "resolved {} via cross-owner index at {}",
                        requested_name, entry.storage_key
                    );
                    return verify_resolved(obj);
                }
            }
        }

        // Tier 3: the public namespace.
        let key = keys::public_key(fingerprint, ext);
        if let Some(obj) = self.inner.backend.get(&key).await? {
            debug!("resolved {} at public key {}", requested_name, key);
            return verify_resolved(obj);
        }

        Err(ImageStoreError::NotFound)
    }
}

/// Whitelist check used for both declared upload types and resolved
/// object types.
pub fn is_allowed_type(content_type: &str) -> bool {
    ALLOWED_IMAGE_TYPES.contains(&content_type)
}

/// Declared content type, normalized; falls back to guessing from the
/// declared file name when the client sent none.
fn effective_content_type(declared: Option<&str>, declared_name: &str) -> Option<String> {
    if let Some(raw) = declared {
        let normalized = normalize_content_type(raw);
        if !normalized.is_empty() {
            return Some(normalized);
        }
    }
    mime_guess::from_path(declared_name)
        .first_raw()
        .map(str::to_string)
}

/// Strip media-type parameters and case: `IMAGE/JPEG; q=1` → `image/jpeg`.
fn normalize_content_type(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Extension used when the declared file name carries none.
fn canonical_extension(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

/// A hit from any tier still has to be an image before it is served.
fn verify_resolved(obj: StoredObject) -> StoreResult<ResolvedImage> {
    if !is_allowed_type(&obj.content_type) {
        return Err(ImageStoreError::UnsupportedType(obj.content_type));
    }
    Ok(ResolvedImage {
        bytes: obj.bytes,
        content_type: obj.content_type,
        stored_at: obj.stored_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::backend::BackendResult;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory backend counting durable writes and existence checks.
    #[derive(Default)]
    struct MemoryBackend {
        objects: Mutex<HashMap<String, (Bytes, String)>>,
        puts: AtomicUsize,
        exists_calls: AtomicUsize,
        fail_writes: AtomicBool,
    }

    #[async_trait]
    impl ObjectBackend for MemoryBackend {
        async fn exists(&self, key: &str) -> BackendResult<bool> {
            self.exists_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.objects.lock().contains_key(key))
        }

        async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> BackendResult<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(BackendError::Io(io::Error::other("injected write failure")));
            }
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.objects
                .lock()
                .insert(key.to_string(), (bytes, content_type.to_string()));
            Ok(())
        }

        async fn get(&self, key: &str) -> BackendResult<Option<StoredObject>> {
            Ok(self.objects.lock().get(key).map(|(bytes, ct)| StoredObject {
                bytes: bytes.clone(),
                content_type: ct.clone(),
                stored_at: None,
            }))
        }

        async fn delete(&self, key: &str) -> BackendResult<()> {
            self.objects.lock().remove(key);
            Ok(())
        }
    }

    fn owner(raw: &str) -> OwnerId {
        OwnerId::new(raw).unwrap()
    }

    fn store_over(backend: &Arc<MemoryBackend>, policy: StorePolicy) -> ImageStore {
        ImageStore::new(Arc::clone(backend) as Arc<dyn ObjectBackend>, policy)
    }

    fn jpeg_payload() -> Bytes {
        Bytes::from(vec![0xD8u8; 10 * 1024])
    }

    #[tokio::test]
    async fn reupload_by_same_owner_reuses_reference_with_one_write() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_over(&backend, StorePolicy::default());
        let payload = jpeg_payload();

        let first = store
            .upload(&owner("A"), payload.clone(), "photo.jpg", Some("image/jpeg"))
            .await
            .unwrap();
        assert!(first.created);
        assert_eq!(first.fingerprint, keys::fingerprint(&payload));
        assert_eq!(
            first.url,
            format!("/api/v1/files/view/{}.jpg?uid=A", first.fingerprint)
        );

        let second = store
            .upload(&owner("A"), payload, "photo.jpg", Some("image/jpeg"))
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.url, first.url);
        assert_eq!(second.fingerprint, first.fingerprint);

        assert_eq!(backend.puts.load(Ordering::SeqCst), 1);
        // The second call short-circuited on the index: one existence
        // check total, from the first upload only.
        assert_eq!(backend.exists_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn index_loss_falls_back_to_backend_existence_check() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_over(&backend, StorePolicy::default());
        let payload = jpeg_payload();

        store
            .upload(&owner("A"), payload.clone(), "photo.jpg", Some("image/jpeg"))
            .await
            .unwrap();

        // A fresh store over the same backend models a process restart:
        // the index is gone, the durable state is not.
        let restarted = store_over(&backend, StorePolicy::default());
        let outcome = restarted
            .upload(&owner("A"), payload, "photo.jpg", Some("image/jpeg"))
            .await
            .unwrap();

        assert!(!outcome.created);
        assert_eq!(backend.puts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn same_content_from_two_owners_lands_at_distinct_keys() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_over(&backend, StorePolicy::default());
        let payload = jpeg_payload();
        let fp = keys::fingerprint(&payload);

        store
            .upload(&owner("A"), payload.clone(), "a.jpg", Some("image/jpeg"))
            .await
            .unwrap();
        store
            .upload(&owner("B"), payload, "b.jpg", Some("image/jpeg"))
            .await
            .unwrap();

        assert_eq!(backend.puts.load(Ordering::SeqCst), 2);
        let objects = backend.objects.lock();
        assert!(objects.contains_key(&format!("uploads/A/{fp}.jpg")));
        assert!(objects.contains_key(&format!("uploads/B/{fp}.jpg")));
    }

    #[tokio::test]
    async fn unsupported_type_is_rejected_before_any_backend_io() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_over(&backend, StorePolicy::default());

        let err = store
            .upload(
                &owner("A"),
                Bytes::from_static(b"%PDF-1.4"),
                "report.pdf",
                Some("application/pdf"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ImageStoreError::UnsupportedType(_)));
        assert_eq!(backend.puts.load(Ordering::SeqCst), 0);
        assert_eq!(backend.exists_calls.load(Ordering::SeqCst), 0);
        assert!(store.inner.index.is_empty());
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_over(&backend, StorePolicy::default());

        let six_mib = Bytes::from(vec![1u8; 6 * 1024 * 1024]);
        let err = store
            .upload(&owner("A"), six_mib, "big.png", Some("image/png"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ImageStoreError::PayloadTooLarge {
                size,
                limit: DEFAULT_MAX_UPLOAD_BYTES
            } if size == 6 * 1024 * 1024
        ));
        assert_eq!(backend.puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_payload_is_rejected() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_over(&backend, StorePolicy::default());

        let err = store
            .upload(&owner("A"), Bytes::new(), "empty.png", Some("image/png"))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageStoreError::MissingContent));
    }

    #[tokio::test]
    async fn extensionless_name_falls_back_to_content_type() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_over(&backend, StorePolicy::default());

        let outcome = store
            .upload(&owner("A"), jpeg_payload(), "camera-roll", Some("image/webp"))
            .await
            .unwrap();
        assert!(outcome.url.contains(".webp?uid=A"));
    }

    #[tokio::test]
    async fn unknown_fingerprint_resolves_to_not_found() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_over(&backend, StorePolicy::default());

        let err = store
            .resolve("deadbeef.png", Some(&owner("A")))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageStoreError::NotFound));
    }

    #[tokio::test]
    async fn malformed_reference_is_rejected() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_over(&backend, StorePolicy::default());

        for name in ["noext", "zz-not-hex.png", "abc."] {
            let err = store.resolve(name, None).await.unwrap_err();
            assert!(matches!(err, ImageStoreError::InvalidReference(_)));
        }
    }

    #[tokio::test]
    async fn wrong_owner_hint_still_resolves_through_index_scan() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_over(&backend, StorePolicy::default());
        let payload = jpeg_payload();

        let outcome = store
            .upload(&owner("A"), payload.clone(), "shared.jpg", Some("image/jpeg"))
            .await
            .unwrap();

        let resolved = store
            .resolve(
                &format!("{}.jpg", outcome.fingerprint),
                Some(&owner("not-the-owner")),
            )
            .await
            .unwrap();
        assert_eq!(resolved.bytes, payload);
        assert_eq!(resolved.content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn strict_policy_suppresses_the_cross_owner_tier() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_over(
            &backend,
            StorePolicy {
                cross_owner_lookup: false,
                ..StorePolicy::default()
            },
        );
        let payload = jpeg_payload();

        let outcome = store
            .upload(&owner("A"), payload, "private.jpg", Some("image/jpeg"))
            .await
            .unwrap();
        let reference = format!("{}.jpg", outcome.fingerprint);

        assert!(matches!(
            store.resolve(&reference, Some(&owner("B"))).await,
            Err(ImageStoreError::NotFound)
        ));
        assert!(store.resolve(&reference, Some(&owner("A"))).await.is_ok());
    }

    #[tokio::test]
    async fn public_namespace_serves_unowned_reads() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_over(&backend, StorePolicy::default());

        let payload = Bytes::from_static(b"logo");
        let fp = keys::fingerprint(&payload);
        backend
            .put(&keys::public_key(&fp, "png"), payload.clone(), "image/png")
            .await
            .unwrap();

        let resolved = store.resolve(&format!("{fp}.png"), None).await.unwrap();
        assert_eq!(resolved.bytes, payload);
    }

    #[tokio::test]
    async fn resolved_non_image_content_is_refused() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_over(&backend, StorePolicy::default());

        let payload = Bytes::from_static(b"%PDF-1.4");
        let fp = keys::fingerprint(&payload);
        backend
            .put(&keys::public_key(&fp, "png"), payload, "application/pdf")
            .await
            .unwrap();

        let err = store.resolve(&format!("{fp}.png"), None).await.unwrap_err();
        assert!(matches!(err, ImageStoreError::UnsupportedType(_)));
    }

    #[tokio::test]
    async fn failed_write_leaves_no_index_entry_behind() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_over(&backend, StorePolicy::default());
        backend.fail_writes.store(true, Ordering::SeqCst);

        let payload = jpeg_payload();
        let err = store
            .upload(&owner("A"), payload.clone(), "photo.jpg", Some("image/jpeg"))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageStoreError::Backend(_)));
        assert!(store.inner.index.is_empty());

        // Once the backend recovers, the retry is a genuine first write,
        // not a poisoned index hit.
        backend.fail_writes.store(false, Ordering::SeqCst);
        let outcome = store
            .upload(&owner("A"), payload, "photo.jpg", Some("image/jpeg"))
            .await
            .unwrap();
        assert!(outcome.created);
    }
}
