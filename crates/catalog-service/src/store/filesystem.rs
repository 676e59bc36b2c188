//! An object store in a local directory.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use tokio::fs;
use url::Url;

use super::{ObjectRef, ObjectStore, StoreError};

/// Stores objects as files at `<root>/<bucket>/<key>`.
///
/// Versions are not supported; every version of an object resolves to the same file. Signed
/// URLs are plain `file://` URLs.
#[derive(Clone, Debug)]
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    /// Creates a store rooted at `root`.
    ///
    /// The root is made absolute so that it can be turned into URLs.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = std::path::absolute(root.as_ref())?;
        Ok(Self { root })
    }

    /// Returns the path of `object`, rejecting keys that would escape the bucket.
    fn object_path(&self, object: &ObjectRef) -> Result<PathBuf, StoreError> {
        let mut path = self.root.clone();
        for part in [object.bucket.as_str(), object.key.as_str()] {
            for component in Path::new(part).components() {
                match component {
                    Component::Normal(segment) => path.push(segment),
                    _ => {
                        return Err(StoreError::Malformed(format!(
                            "invalid object location: {object}"
                        )));
                    }
                }
            }
        }
        Ok(path)
    }
}

impl ObjectStore for FilesystemStore {
    fn get_object<'a>(&'a self, object: &'a ObjectRef) -> BoxFuture<'a, Result<Bytes, StoreError>> {
        async move {
            let path = self.object_path(object)?;
            tracing::debug!(path = %path.display(), "Reading {object} from filesystem");
            let contents = fs::read(&path).await?;
            Ok(Bytes::from(contents))
        }
        .boxed()
    }

    fn put_object<'a>(
        &'a self,
        object: &'a ObjectRef,
        body: Bytes,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        async move {
            let path = self.object_path(object)?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            tracing::debug!(path = %path.display(), "Writing {object} to filesystem");
            fs::write(&path, &body).await?;
            Ok(())
        }
        .boxed()
    }

    fn sign_url<'a>(
        &'a self,
        object: &'a ObjectRef,
        _expires_in: Duration,
    ) -> BoxFuture<'a, Result<Url, StoreError>> {
        async move {
            let path = self.object_path(object)?;
            Url::from_file_path(&path)
                .map_err(|()| StoreError::Malformed(format!("not a file url: {}", path.display())))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = catalog_test::tempdir();
        let store = FilesystemStore::new(dir.path()).unwrap();
        let object = ObjectRef::new("bucket", "nested/dir/file.json");

        assert_eq!(store.get_object(&object).await, Err(StoreError::NotFound));

        store
            .put_object(&object, Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert_eq!(store.get_object(&object).await.unwrap(), &b"{}"[..]);
        assert!(dir.path().join("bucket/nested/dir/file.json").is_file());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = catalog_test::tempdir();
        let store = FilesystemStore::new(dir.path()).unwrap();

        for key in ["../outside", "/etc/passwd", "a/../../b"] {
            let object = ObjectRef::new("bucket", key);
            let result = store.get_object(&object).await;
            assert!(matches!(result, Err(StoreError::Malformed(_))), "{key}");
        }
    }

    #[tokio::test]
    async fn test_sign_url() {
        let dir = catalog_test::tempdir();
        let store = FilesystemStore::new(dir.path()).unwrap();
        let object = ObjectRef::new("bucket", "file.ipynb");

        let url = store
            .sign_url(&object, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(url.scheme(), "file");
        assert!(url.path().ends_with("/bucket/file.ipynb"));
    }
}
