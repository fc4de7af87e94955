//! Filesystem Object Store
//!
//! Maps the object-store model onto a directory tree:
//!
//! ```text
//! <root>/<bucket>/<object path>
//! ```
//!
//! Each top-level directory is a bucket; every regular file below it is an
//! object whose name is its `/`-separated path relative to the bucket. An
//! object's last-modified time is the file's mtime.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::domain::ports::{ObjectDeleteError, ObjectStat, ObjectStore, ObjectTransfer};
use crate::error::{Error, Result};

/// Object store backed by a local directory.
#[derive(Debug, Clone)]
pub struct FilesystemObjectStore {
    root: PathBuf,
}

impl FilesystemObjectStore {
    /// Open a store rooted at an existing directory.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        match tokio::fs::metadata(&root).await {
            Ok(meta) if meta.is_dir() => Ok(Self { root }),
            Ok(_) => Err(Error::ObjectStoreUnavailable(format!(
                "store root {} is not a directory",
                root.display()
            ))),
            Err(e) => Err(Error::ObjectStoreUnavailable(format!(
                "store root {} is not accessible: {}",
                root.display(),
                e
            ))),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_path(&self, bucket: &str) -> Result<PathBuf> {
        validate_bucket_name(bucket)?;
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, object: &str) -> Result<PathBuf> {
        validate_object_name(object)?;
        let mut path = self.bucket_path(bucket)?;
        for part in object.split('/') {
            path.push(part);
        }
        Ok(path)
    }

    async fn require_bucket(&self, bucket: &str) -> Result<PathBuf> {
        let path = self.bucket_path(bucket)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(path),
            Ok(_) => Err(Error::BucketNotFound(bucket.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::BucketNotFound(bucket.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Name Validation
// =============================================================================

fn invalid(name: &str, reason: &str) -> Error {
    Error::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

fn validate_bucket_name(bucket: &str) -> Result<()> {
    if bucket.is_empty() {
        return Err(invalid(bucket, "bucket name must not be empty"));
    }
    if bucket == "." || bucket == ".." {
        return Err(invalid(bucket, "bucket name must not be a relative path"));
    }
    if bucket.contains('/') || bucket.contains('\\') {
        return Err(invalid(bucket, "bucket name must not contain path separators"));
    }
    Ok(())
}

fn validate_object_name(object: &str) -> Result<()> {
    if object.is_empty() {
        return Err(invalid(object, "object name must not be empty"));
    }
    if object.contains('\\') {
        return Err(invalid(object, "object name must not contain backslashes"));
    }
    for part in object.split('/') {
        if part.is_empty() || part == "." || part == ".." {
            return Err(invalid(object, "object name has an empty or relative segment"));
        }
    }
    Ok(())
}

fn not_found_as(err: std::io::Error, bucket: &str, object: &str) -> Error {
    if err.kind() == ErrorKind::NotFound {
        Error::ObjectNotFound {
            bucket: bucket.to_string(),
            object: object.to_string(),
        }
    } else {
        Error::Io(err)
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn list_buckets(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            Error::ObjectStoreUnavailable(format!(
                "cannot read store root {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => warn!("Skipping bucket with non UTF-8 name: {:?}", raw),
            }
        }
        names.sort();
        Ok(names)
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.require_bucket(bucket).await {
            Ok(_) => Ok(true),
            Err(Error::BucketNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn make_bucket(&self, bucket: &str) -> Result<()> {
        let path = self.bucket_path(bucket)?;
        match tokio::fs::create_dir(&path).await {
            Ok(()) => {
                debug!("Created bucket {} at {}", bucket, path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(Error::BucketAlreadyExists(bucket.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_bucket(&self, bucket: &str) -> Result<()> {
        let root = self.require_bucket(bucket).await?;

        // Parents precede their children, so the reverse removes leaves first
        let mut dirs = vec![root];
        let mut idx = 0;
        while idx < dirs.len() {
            let mut entries = match tokio::fs::read_dir(&dirs[idx]).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    idx += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            idx += 1;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    dirs.push(entry.path());
                }
            }
        }

        for dir in dirs.iter().rev() {
            match tokio::fs::remove_dir(dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    if has_entries(dir).await {
                        return Err(Error::BucketNotEmpty(bucket.to_string()));
                    }
                    return Err(e.into());
                }
            }
        }
        debug!("Removed bucket {}", bucket);
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>> {
        let bucket_root = self.require_bucket(bucket).await?;

        let mut names = Vec::new();
        let mut pending = vec![(bucket_root, String::new())];
        while let Some((dir, prefix)) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = match entry.file_name().into_string() {
                    Ok(name) => name,
                    Err(raw) => {
                        warn!("Skipping object with non UTF-8 name in {}: {:?}", bucket, raw);
                        continue;
                    }
                };
                let key = if prefix.is_empty() {
                    name
                } else {
                    format!("{}/{}", prefix, name)
                };
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push((entry.path(), key));
                } else if file_type.is_file() {
                    names.push(key);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn stat_object(&self, bucket: &str, object: &str) -> Result<ObjectStat> {
        let path = self.object_path(bucket, object)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| not_found_as(e, bucket, object))?;
        if !meta.is_file() {
            return Err(Error::ObjectNotFound {
                bucket: bucket.to_string(),
                object: object.to_string(),
            });
        }
        Ok(ObjectStat {
            size: meta.len(),
            last_modified: DateTime::<Utc>::from(meta.modified()?),
        })
    }

    async fn remove_object(&self, bucket: &str, object: &str) -> Result<()> {
        self.require_bucket(bucket).await?;
        let path = self.object_path(bucket, object)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // Removing a missing object is a no-op
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_objects(
        &self,
        bucket: &str,
        objects: &[String],
    ) -> Result<Vec<ObjectDeleteError>> {
        self.require_bucket(bucket).await?;
        let mut errors = Vec::new();
        for object in objects {
            if let Err(e) = self.remove_object(bucket, object).await {
                errors.push(ObjectDeleteError::new(object, e.to_string()));
            }
        }
        Ok(errors)
    }

    async fn get_object(&self, bucket: &str, object: &str) -> Result<ObjectTransfer> {
        let path = self.object_path(bucket, object)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| not_found_as(e, bucket, object))?;
        let label = format!("{}/{}", bucket, object);
        Ok(ObjectTransfer::new(file).with_release(move || {
            trace!("Released transfer handle for {}", label);
        }))
    }

    async fn put_object(&self, bucket: &str, object: &str, src: &Path) -> Result<()> {
        self.require_bucket(bucket).await?;
        let dest = self.object_path(bucket, object)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let copied = tokio::fs::copy(src, &dest).await?;
        debug!("Stored {}/{} ({} bytes)", bucket, object, copied);
        Ok(())
    }
}

async fn has_entries(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    async fn store() -> (tempfile::TempDir, FilesystemObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemObjectStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_open_rejects_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert_matches!(
            FilesystemObjectStore::open(missing).await,
            Err(Error::ObjectStoreUnavailable(_))
        );
    }

    #[tokio::test]
    async fn test_nested_objects_are_listed_with_slashes() {
        let (dir, store) = store().await;
        store.make_bucket("b").await.unwrap();

        let src = dir.path().join("src.txt");
        std::fs::write(&src, b"abc").unwrap();
        store.put_object("b", "a/b/c.txt", &src).await.unwrap();
        store.put_object("b", "top.txt", &src).await.unwrap();

        let objects = store.list_objects("b").await.unwrap();
        assert_eq!(objects, vec!["a/b/c.txt", "top.txt"]);
        assert_eq!(store.stat_object("b", "a/b/c.txt").await.unwrap().size, 3);
    }

    #[tokio::test]
    async fn test_names_cannot_escape_root() {
        let (_dir, store) = store().await;
        assert_matches!(store.make_bucket("..").await, Err(Error::InvalidName { .. }));
        assert_matches!(store.make_bucket("a/b").await, Err(Error::InvalidName { .. }));

        store.make_bucket("b").await.unwrap();
        assert_matches!(
            store.stat_object("b", "../escape").await,
            Err(Error::InvalidName { .. })
        );
        assert_matches!(
            store.stat_object("b", "/abs").await,
            Err(Error::InvalidName { .. })
        );
    }

    #[tokio::test]
    async fn test_remove_bucket_with_only_empty_dirs() {
        let (dir, store) = store().await;
        store.make_bucket("b").await.unwrap();
        let src = dir.path().join("src.txt");
        std::fs::write(&src, b"abc").unwrap();
        store.put_object("b", "deep/obj", &src).await.unwrap();

        assert_matches!(store.remove_bucket("b").await, Err(Error::BucketNotEmpty(_)));

        store.remove_object("b", "deep/obj").await.unwrap();
        store.remove_bucket("b").await.unwrap();
        assert!(!store.bucket_exists("b").await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_remove_bucket_keeps_unlisted_entries() {
        let (dir, store) = store().await;
        store.make_bucket("b").await.unwrap();
        let target = dir.path().join("target.txt");
        std::fs::write(&target, b"x").unwrap();
        let link = dir.path().join("b").join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        assert!(store.list_objects("b").await.unwrap().is_empty());
        assert_matches!(store.remove_bucket("b").await, Err(Error::BucketNotEmpty(_)));
        assert!(link.symlink_metadata().is_ok());
        assert!(store.bucket_exists("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_stat_missing_object() {
        let (_dir, store) = store().await;
        store.make_bucket("b").await.unwrap();
        assert_matches!(
            store.stat_object("b", "missing").await,
            Err(Error::ObjectNotFound { .. })
        );
        // missing objects are a no-op on removal
        store.remove_object("b", "missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_files_at_root_are_not_buckets() {
        let (dir, store) = store().await;
        std::fs::write(dir.path().join("stray.txt"), b"x").unwrap();
        store.make_bucket("real").await.unwrap();

        assert_eq!(store.list_buckets().await.unwrap(), vec!["real"]);
    }
}
