//! src/services/object_store.rs
//!
//! ObjectStore — put/get/exists/commit/delete over a key-prefixed object
//! root on local disk. Objects live under `base_path/temp/{key}` (ephemeral,
//! orphan-prone) or `base_path/uploads/{key}` (permanent, committed). The
//! store exclusively owns key generation, placement and deletion; callers
//! only ever hold keys.

use bytes::Bytes;
use chrono::Utc;
use std::{
    io::{self, ErrorKind},
    path::PathBuf,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Logical prefix an object lives under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Namespace {
    Temp,
    Uploads,
}

impl Namespace {
    pub fn prefix(self) -> &'static str {
        match self {
            Namespace::Temp => "temp",
            Namespace::Uploads => "uploads",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` not found in temp storage")]
    TempNotFound(String),
    #[error("invalid object key")]
    InvalidKey,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a temp upload; `key` is what callers persist and pass back.
#[derive(Clone, Debug)]
pub struct UploadReceipt {
    pub key: String,
    pub url: String,
    pub etag: String,
    pub size_bytes: i64,
}

/// An object opened for reading, ready to stream out.
pub struct StoredObject {
    pub file: File,
    pub size_bytes: i64,
    pub content_type: String,
    pub namespace: Namespace,
}

/// Disk-backed object store with a temp and a permanent namespace.
#[derive(Clone)]
pub struct ObjectStore {
    /// Root directory; `temp/` and `uploads/` live directly beneath it.
    pub base_path: PathBuf,
}

impl ObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Keys are generated by this store and never contain separators, but
    /// they also arrive back from clients, so reject anything that could
    /// escape the namespace directories.
    fn ensure_key_safe(&self, key: &str) -> StoreResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StoreError::InvalidKey);
        }
        if key.starts_with('/') || key.contains("..") || key.contains('/') {
            return Err(StoreError::InvalidKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StoreError::InvalidKey);
        }
        Ok(())
    }

    fn object_path(&self, namespace: Namespace, key: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(namespace.prefix());
        path.push(key);
        path
    }

    /// Generate a fresh key as `<millis>-<uuid>[.<ext>]`.
    ///
    /// Collision probability is treated as negligible (UUID entropy) and is
    /// not checked. The extension is carried over from the original filename
    /// so content types can be recovered on retrieval.
    fn generate_key(original_name: &str) -> String {
        let timestamp = Utc::now().timestamp_millis();
        let uuid = Uuid::new_v4();
        match original_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
                format!("{timestamp}-{uuid}.{ext}")
            }
            _ => format!("{timestamp}-{uuid}"),
        }
    }

    /// Write `buffer` as a new object in the temp namespace.
    ///
    /// Writes to a hidden tmp file, fsyncs, then renames into place so a
    /// crash never leaves a half-written object under a valid key.
    pub async fn upload_temp(
        &self,
        buffer: Bytes,
        mimetype: &str,
        original_name: &str,
    ) -> StoreResult<UploadReceipt> {
        let key = Self::generate_key(original_name);
        let file_path = self.object_path(Namespace::Temp, &key);
        let parent = file_path
            .parent()
            .map(PathBuf::from)
            .ok_or_else(|| StoreError::Io(ErrorKind::NotFound.into()))?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        if let Err(err) = write_all_durable(&mut file, &buffer).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        let etag = format!("{:x}", md5::compute(&buffer));
        debug!(
            %key,
            mimetype,
            size = buffer.len(),
            %etag,
            "stored temp object"
        );

        Ok(UploadReceipt {
            url: format!("/storage/retrieve/{key}"),
            etag,
            size_bytes: buffer.len() as i64,
            key,
        })
    }

    /// Open an object for reading, checking the permanent namespace first
    /// and falling back to temp.
    ///
    /// Returns `Ok(None)` when the key exists in neither namespace, so
    /// callers can distinguish "not found" from transport failure.
    pub async fn retrieve(&self, key: &str) -> StoreResult<Option<StoredObject>> {
        self.ensure_key_safe(key)?;
        for namespace in [Namespace::Uploads, Namespace::Temp] {
            let path = self.object_path(namespace, key);
            match File::open(&path).await {
                Ok(file) => {
                    let size_bytes = file.metadata().await?.len() as i64;
                    return Ok(Some(StoredObject {
                        file,
                        size_bytes,
                        content_type: content_type_for_key(key),
                        namespace,
                    }));
                }
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(StoreError::Io(err)),
            }
        }
        Ok(None)
    }

    /// Check which namespace, if any, holds the key.
    pub async fn exists(&self, key: &str) -> StoreResult<Option<Namespace>> {
        self.ensure_key_safe(key)?;
        for namespace in [Namespace::Uploads, Namespace::Temp] {
            match fs::metadata(self.object_path(namespace, key)).await {
                Ok(_) => return Ok(Some(namespace)),
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(StoreError::Io(err)),
            }
        }
        Ok(None)
    }

    /// Promote a temp object to the permanent namespace.
    ///
    /// Copy-then-delete: the temp object is copied to `uploads/{key}` and the
    /// original deleted afterwards. A failed delete after a successful copy
    /// is still a success — the permanent copy is authoritative and the stale
    /// temp object is left for later reclamation. Correctness of the
    /// permanent record never depends on cleanup succeeding.
    pub async fn commit(&self, key: &str) -> StoreResult<String> {
        self.ensure_key_safe(key)?;
        let temp_path = self.object_path(Namespace::Temp, key);
        if fs::metadata(&temp_path).await.is_err() {
            return Err(StoreError::TempNotFound(key.to_string()));
        }

        let permanent_path = self.object_path(Namespace::Uploads, key);
        let parent = permanent_path
            .parent()
            .map(PathBuf::from)
            .ok_or_else(|| StoreError::Io(ErrorKind::NotFound.into()))?;
        fs::create_dir_all(&parent).await?;

        // Copy into a tmp name then rename so a partially copied object
        // never becomes visible under the permanent key.
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(err) = fs::copy(&temp_path, &tmp_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &permanent_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        if let Err(err) = fs::remove_file(&temp_path).await {
            warn!(key, %err, "temp object left behind after commit");
        }

        Ok(format!("{}/{key}", Namespace::Uploads.prefix()))
    }

    /// Remove a temp object.
    ///
    /// Best-effort contract: a missing object is fine, and callers must not
    /// treat an `Err` as fatal to the surrounding business operation.
    pub async fn delete_temp(&self, key: &str) -> StoreResult<()> {
        self.ensure_key_safe(key)?;
        let path = self.object_path(Namespace::Temp, key);
        match fs::remove_file(&path).await {
            Ok(_) => {
                debug!(key, "removed temp object");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(key, "temp object already missing");
                Ok(())
            }
            Err(err) => Err(StoreError::Io(err)),
        }
    }
}

async fn write_all_durable(file: &mut File, buffer: &[u8]) -> io::Result<()> {
    file.write_all(buffer).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Recover a content type from the key's extension. Upload keys carry the
/// extension of the original filename, so this is lossy only for uploads
/// that had none.
fn content_type_for_key(key: &str) -> String {
    let ext = key.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn store() -> (tempfile::TempDir, ObjectStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ObjectStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn upload_lands_in_temp_namespace() {
        let (_dir, store) = store();
        let receipt = store
            .upload_temp(Bytes::from_static(b"jpeg bytes"), "image/jpeg", "meal.jpg")
            .await
            .unwrap();

        assert!(receipt.key.ends_with(".jpg"));
        assert_eq!(receipt.size_bytes, 10);
        assert_eq!(
            store.exists(&receipt.key).await.unwrap(),
            Some(Namespace::Temp)
        );
    }

    #[tokio::test]
    async fn retrieve_prefers_uploads_then_temp() {
        let (_dir, store) = store();
        let receipt = store
            .upload_temp(Bytes::from_static(b"contents"), "image/png", "a.png")
            .await
            .unwrap();

        let found = store.retrieve(&receipt.key).await.unwrap().unwrap();
        assert_eq!(found.namespace, Namespace::Temp);
        assert_eq!(found.content_type, "image/png");

        store.commit(&receipt.key).await.unwrap();
        let mut found = store.retrieve(&receipt.key).await.unwrap().unwrap();
        assert_eq!(found.namespace, Namespace::Uploads);
        let mut body = Vec::new();
        found.file.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"contents");
    }

    #[tokio::test]
    async fn retrieve_missing_is_none_not_error() {
        let (_dir, store) = store();
        assert!(store.retrieve("1-abc.jpg").await.unwrap().is_none());
        assert_eq!(store.exists("1-abc.jpg").await.unwrap(), None);
    }

    #[tokio::test]
    async fn commit_moves_object_and_is_not_repeatable() {
        let (_dir, store) = store();
        let receipt = store
            .upload_temp(Bytes::from_static(b"x"), "image/jpeg", "x.jpg")
            .await
            .unwrap();

        let permanent = store.commit(&receipt.key).await.unwrap();
        assert_eq!(permanent, format!("uploads/{}", receipt.key));
        assert_eq!(
            store.exists(&receipt.key).await.unwrap(),
            Some(Namespace::Uploads)
        );

        // The temp original is gone, so a second commit has nothing to copy.
        let second = store.commit(&receipt.key).await;
        assert!(matches!(second, Err(StoreError::TempNotFound(_))));
    }

    #[tokio::test]
    async fn commit_unknown_key_is_not_found() {
        let (_dir, store) = store();
        let err = store.commit("1-missing.jpg").await.unwrap_err();
        assert!(matches!(err, StoreError::TempNotFound(_)));
    }

    #[tokio::test]
    async fn delete_temp_is_idempotent() {
        let (_dir, store) = store();
        let receipt = store
            .upload_temp(Bytes::from_static(b"x"), "image/jpeg", "x.jpg")
            .await
            .unwrap();

        store.delete_temp(&receipt.key).await.unwrap();
        assert_eq!(store.exists(&receipt.key).await.unwrap(), None);
        // Second delete of the same key is a no-op, not an error.
        store.delete_temp(&receipt.key).await.unwrap();
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let (_dir, store) = store();
        for key in ["../etc/passwd", "/abs", "a/b", "", "a\\b"] {
            assert!(matches!(
                store.exists(key).await,
                Err(StoreError::InvalidKey)
            ));
        }
    }
}
