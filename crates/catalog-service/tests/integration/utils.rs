use std::path::Path;

use catalog_service::config::{Config, FilesystemStoreConfig, StoreConfig};
use catalog_service::preview::FileHandle;
use catalog_service::session::CatalogSession;
use catalog_test as test;

pub use test::{PageServer, TempDir, read_fixture};

/// The bucket holding the settings document in tests.
pub const SERVICE_BUCKET: &str = "service-bucket";

/// Setup tests and create a session backed by a filesystem store.
///
/// This function returns a tuple containing the session to test, and the root of its store.
/// The directory is cleaned up when the [`TempDir`] instance is dropped. Keep it as guard until
/// the test has finished.
///
/// The `update_config` closure can modify any default configuration if needed before the
/// session is created.
pub async fn setup_session(update_config: impl FnOnce(&mut Config)) -> (CatalogSession, TempDir) {
    test::setup();

    let store_dir = test::tempdir();

    let mut config = Config {
        service_bucket: SERVICE_BUCKET.into(),
        store: StoreConfig::Filesystem(FilesystemStoreConfig {
            path: store_dir.path().to_owned(),
        }),
        ..Default::default()
    };
    update_config(&mut config);

    let session = CatalogSession::create(config).await.unwrap();
    (session, store_dir)
}

/// Writes `contents` to `key` in `bucket` of the store rooted at `root`.
pub fn put_object(root: &Path, bucket: &str, key: &str, contents: &[u8]) {
    let path = root.join(bucket).join(key);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// A notebook viewed in a package.
pub fn notebook() -> FileHandle {
    FileHandle {
        version: Some("v1".into()),
        package: Some(catalog_service::preview::PackageHandle {
            bucket: "data-bucket".into(),
            name: "user/pkg".into(),
            hash: "abc123".into(),
        }),
        ..FileHandle::new("data-bucket", "notebooks/report.ipynb")
    }
}
