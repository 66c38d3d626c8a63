use std::{
    collections::BTreeSet,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use lockbox_core::{
    object::{NewObject, ObjectId, ObjectMetadata, PlaintextDigest, StoredObject},
    store::{ObjectStore, StoreError},
};
use tempfile::NamedTempFile;
use tracing::{debug, instrument, trace};

const HASH_SUFFIX: &str = ".hash";
const META_SUFFIX: &str = ".meta";
/// Prefix of decrypted staging files left by older deployments.
const STAGING_PREFIX: &str = "temp_";
/// Prefix `tempfile` gives in-flight atomic writes.
const TEMPFILE_PREFIX: &str = ".tmp";

/// Directory-backed object store.
///
/// Each object is three files in `root`: `<id>` (salt | iv | ciphertext),
/// `<id>.hash` (hex SHA-256 of the plaintext) and `<id>.meta` (`key:value`
/// lines). Every file is written to a temporary file and renamed into place
/// in the order meta, hash, blob, so the blob marks a complete object and any
/// listed id already carries its creation time.
pub struct FsObjectStore {
    root: PathBuf,
    ttl: Duration,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            root: root.into(),
            ttl,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blob_path(&self, id: &ObjectId) -> PathBuf {
        self.root.join(id.to_string())
    }

    pub fn hash_path(&self, id: &ObjectId) -> PathBuf {
        self.root.join(format!("{id}{HASH_SUFFIX}"))
    }

    pub fn meta_path(&self, id: &ObjectId) -> PathBuf {
        self.root.join(format!("{id}{META_SUFFIX}"))
    }

    fn write_object(&self, id: &ObjectId, object: &NewObject) -> Result<(), StoreError> {
        // Metadata lands first: a sweep that lists the id mid-write then reads
        // a fresh `created` instead of treating the object as expired.
        let sidecars = [
            (self.meta_path(id), object.metadata.render().into_bytes()),
            (self.hash_path(id), object.digest.to_hex().into_bytes()),
        ];

        let mut written: Vec<&Path> = Vec::with_capacity(sidecars.len());
        let mut result = Ok(());
        for (path, bytes) in &sidecars {
            result = write_atomic(path, bytes);
            if result.is_err() {
                break;
            }
            written.push(path.as_path());
        }
        if result.is_ok() {
            result = write_atomic(&self.blob_path(id), &object.to_blob());
        }

        if result.is_err() {
            for path in written {
                let _ = remove_if_present(path);
            }
        }
        result
    }

    fn read_text(&self, path: &Path, id: &ObjectId) -> Result<String, StoreError> {
        let bytes = read_artifact(path, id)?;
        String::from_utf8(bytes).map_err(|e| corrupt(id, e))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    #[instrument(skip_all, fields(id))]
    async fn put(&self, object: NewObject) -> Result<ObjectId, StoreError> {
        fs::create_dir_all(&self.root).map_err(storage_err)?;

        let id = ObjectId::generate();
        tracing::Span::current().record("id", tracing::field::display(&id));
        self.write_object(&id, &object)?;
        debug!(bytes = object.ciphertext.len(), "object persisted");
        Ok(id)
    }

    #[instrument(skip_all, fields(%id))]
    async fn get(&self, id: &ObjectId) -> Result<StoredObject, StoreError> {
        // Read the blob first: a concurrent delete unlinks it before the
        // sidecars, so any later miss surfaces as NotFound.
        let blob = read_artifact(&self.blob_path(id), id)?;
        let digest_text = self.read_text(&self.hash_path(id), id)?;
        let digest = PlaintextDigest::from_hex(&digest_text).map_err(|e| corrupt(id, e))?;
        let metadata = self.metadata(id).await?;

        StoredObject::from_blob(*id, &blob, digest, metadata).map_err(|e| corrupt(id, e))
    }

    async fn metadata(&self, id: &ObjectId) -> Result<ObjectMetadata, StoreError> {
        let text = self.read_text(&self.meta_path(id), id)?;
        ObjectMetadata::parse(&text).map_err(|e| corrupt(id, e))
    }

    async fn exists(&self, id: &ObjectId) -> Result<bool, StoreError> {
        self.blob_path(id).try_exists().map_err(storage_err)
    }

    async fn is_expired(&self, id: &ObjectId, now: DateTime<Utc>) -> bool {
        match self.metadata(id).await {
            Ok(meta) => meta.is_expired(self.ttl, now),
            Err(err) => {
                debug!(%id, error = %err, "metadata unavailable; treating object as expired");
                true
            }
        }
    }

    #[instrument(skip_all, fields(%id))]
    async fn delete(&self, id: &ObjectId) -> Result<(), StoreError> {
        let mut first_err = None;
        for path in [self.blob_path(id), self.hash_path(id), self.meta_path(id)] {
            if let Err(err) = remove_if_present(&path) {
                first_err.get_or_insert(storage_err(err));
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn list_ids(&self) -> Result<Vec<ObjectId>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(storage_err(err)),
        };

        let mut ids = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(storage_err)?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if is_transient_name(name) {
                trace!(name, "skipping transient file");
                continue;
            }
            let stem = name
                .strip_suffix(HASH_SUFFIX)
                .or_else(|| name.strip_suffix(META_SUFFIX))
                .unwrap_or(name);
            match stem.parse::<ObjectId>() {
                Ok(id) => {
                    ids.insert(id);
                }
                Err(_) => trace!(name, "skipping foreign file"),
            }
        }
        Ok(ids.into_iter().collect())
    }
}

/// Staging and in-flight temporary files are never objects.
pub fn is_transient_name(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX) || name.starts_with(TEMPFILE_PREFIX)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().ok_or_else(|| StoreError::Storage {
        reason: "invalid storage path".to_string(),
    })?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
    tmp.write_all(bytes).map_err(storage_err)?;
    tmp.flush().map_err(storage_err)?;
    tmp.as_file().sync_all().map_err(storage_err)?;
    tmp.persist(path).map_err(|e| storage_err(e.error))?;
    Ok(())
}

fn read_artifact(path: &Path, id: &ObjectId) -> Result<Vec<u8>, StoreError> {
    fs::read(path).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            StoreError::NotFound { id: id.to_string() }
        } else {
            storage_err(err)
        }
    })
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

fn corrupt<E: ToString>(id: &ObjectId, err: E) -> StoreError {
    StoreError::Corrupt {
        id: id.to_string(),
        reason: err.to_string(),
    }
}

fn storage_err<E: ToString>(err: E) -> StoreError {
    StoreError::Storage {
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::SubsecRound;
    use lockbox_core::object::{DIGEST_LEN, IV_LEN, SALT_LEN};

    use super::*;

    fn sample(created_at: DateTime<Utc>) -> NewObject {
        NewObject {
            salt: [0x11; SALT_LEN],
            iv: [0x22; IV_LEN],
            ciphertext: vec![0x33; 32],
            digest: PlaintextDigest::new([0xab; DIGEST_LEN]),
            metadata: ObjectMetadata::new("report.pdf", created_at, 20),
        }
    }

    fn store_in(dir: &Path) -> FsObjectStore {
        FsObjectStore::new(dir.join("uploads"), Duration::hours(24))
    }

    #[tokio::test]
    async fn put_writes_three_artifacts_and_get_reads_them_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        // Metadata keeps microsecond precision.
        let object = sample(Utc::now().trunc_subsecs(6));

        let id = store.put(object.clone()).await.expect("put");

        let blob = fs::read(store.blob_path(&id)).expect("blob");
        assert_eq!(&blob[..16], &[0x11; 16]);
        assert_eq!(&blob[16..32], &[0x22; 16]);
        assert_eq!(&blob[32..], &[0x33; 32][..]);
        assert_eq!(
            fs::read_to_string(store.hash_path(&id)).expect("hash"),
            object.digest.to_hex()
        );
        assert_eq!(
            fs::read_to_string(store.meta_path(&id)).expect("meta"),
            object.metadata.render()
        );

        let stored = store.get(&id).await.expect("get");
        assert_eq!(stored.id, id);
        assert_eq!(stored.salt, object.salt);
        assert_eq!(stored.iv, object.iv);
        assert_eq!(stored.ciphertext, object.ciphertext);
        assert_eq!(stored.digest, object.digest);
        assert_eq!(stored.metadata, object.metadata);
        assert!(store.exists(&id).await.expect("exists"));
    }

    #[tokio::test]
    async fn no_temporary_files_remain_after_put() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        store.put(sample(Utc::now())).await.expect("put");

        let names: Vec<String> = fs::read_dir(store.root())
            .expect("read_dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 3);
        assert!(names.iter().all(|n| !is_transient_name(n)));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        let id = store.put(sample(Utc::now())).await.expect("put");

        store.delete(&id).await.expect("delete");
        store.delete(&id).await.expect("delete again");
        store
            .delete(&ObjectId::generate())
            .await
            .expect("delete unknown");

        assert!(!store.exists(&id).await.expect("exists"));
        let err = store.get(&id).await.expect_err("should be missing");
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(store.list_ids().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn missing_sidecar_reads_as_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        let id = store.put(sample(Utc::now())).await.expect("put");
        fs::remove_file(store.hash_path(&id)).expect("remove hash");

        let err = store.get(&id).await.expect_err("incomplete object");
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn garbled_digest_reads_as_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        let id = store.put(sample(Utc::now())).await.expect("put");
        fs::write(store.hash_path(&id), "not-hex").expect("overwrite hash");

        let err = store.get(&id).await.expect_err("corrupt digest");
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn expiry_uses_metadata_and_fails_safe() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        let now = Utc::now();

        let fresh = store.put(sample(now)).await.expect("put fresh");
        let stale = store
            .put(sample(now - Duration::hours(25)))
            .await
            .expect("put stale");
        let garbled = store.put(sample(now)).await.expect("put garbled");
        fs::write(store.meta_path(&garbled), "original_name:x\n").expect("overwrite meta");
        let no_meta = store.put(sample(now)).await.expect("put no meta");
        fs::remove_file(store.meta_path(&no_meta)).expect("remove meta");

        assert!(!store.is_expired(&fresh, now).await);
        assert!(store.is_expired(&stale, now).await);
        assert!(store.is_expired(&garbled, now).await);
        assert!(store.is_expired(&no_meta, now).await);
        assert!(store.is_expired(&ObjectId::generate(), now).await);
    }

    #[tokio::test]
    async fn list_ids_skips_transient_files_and_sees_orphans() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        let id = store.put(sample(Utc::now())).await.expect("put");

        // Hash-only leftover from an interrupted write.
        let orphan = ObjectId::generate();
        fs::write(store.hash_path(&orphan), "00").expect("orphan hash");
        fs::write(store.root().join("temp_1234"), b"staged").expect("staging");
        fs::write(store.root().join(".tmpAbC123"), b"partial").expect("tempfile");
        fs::write(store.root().join("notes.txt"), b"foreign").expect("foreign");

        let mut listed = store.list_ids().await.expect("list");
        listed.sort();
        let mut expected = vec![id, orphan];
        expected.sort();
        assert_eq!(listed, expected);

        // The orphan is not a complete object, is expired, and deletes cleanly.
        assert!(!store.exists(&orphan).await.expect("exists"));
        assert!(store.is_expired(&orphan, Utc::now()).await);
        store.delete(&orphan).await.expect("delete orphan");
        assert_eq!(store.list_ids().await.expect("list"), vec![id]);
    }

    #[tokio::test]
    async fn list_ids_on_missing_root_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsObjectStore::new(dir.path().join("absent"), Duration::hours(1));
        assert!(store.list_ids().await.expect("list").is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_put_leaves_no_artifacts() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        fs::create_dir_all(store.root()).expect("mkdir");
        fs::set_permissions(store.root(), fs::Permissions::from_mode(0o500)).expect("chmod");

        let result = store.put(sample(Utc::now())).await;
        fs::set_permissions(store.root(), fs::Permissions::from_mode(0o700)).expect("chmod back");

        // Running as root bypasses directory permissions; only assert on failure.
        if result.is_err() {
            assert!(matches!(result, Err(StoreError::Storage { .. })));
            assert!(store.list_ids().await.expect("list").is_empty());
        }
    }
}
