use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use catalog_service::catalog_cache::Entry;
use catalog_service::config::Config;
use catalog_service::preview::{FileType, IFRAME_SANDBOX_ATTRIBUTES, PreviewData, PreviewError};
use catalog_service::session::CatalogSession;
use catalog_service::store::{ObjectRef, ObjectStore, StoreError};
use futures::future::{BoxFuture, FutureExt};
use reqwest::StatusCode;
use url::Url;

use crate::{PageServer, notebook, setup_session};

#[tokio::test]
async fn test_load_voila() {
    let server = PageServer::new();
    let (session, _store_dir) =
        setup_session(|config| config.registry_url = Some(server.url("/"))).await;
    let voila = session.voila().unwrap();

    let data = voila.load(&notebook()).await.unwrap();
    let PreviewData::Voila {
        src,
        sandbox,
        modes,
    } = &data;
    assert_eq!(src.path(), "/voila/voila/render/");
    let query: Vec<_> = src.query_pairs().map(|(k, _)| k.into_owned()).collect();
    assert_eq!(query, ["url", "pkg_bucket", "pkg_name", "pkg_top_hash"]);
    assert_eq!(*sandbox, IFRAME_SANDBOX_ATTRIBUTES);
    assert_eq!(
        modes,
        &[
            FileType::Jupyter,
            FileType::Json,
            FileType::Voila,
            FileType::Text
        ]
    );
    assert_eq!(server.all_hits(), [("/voila/voila/render/".to_owned(), 1)]);

    // loaded pages are not requested again
    assert_eq!(voila.peek(&notebook()).ready(), Some(data.clone()));
    assert_eq!(voila.load(&notebook()).await.unwrap(), data);
    assert_eq!(server.accesses(), 0);
}

#[tokio::test]
async fn test_concurrent_loads() {
    let server = PageServer::new();
    let (session, _store_dir) =
        setup_session(|config| config.registry_url = Some(server.url("/"))).await;
    let voila = session.voila().unwrap();

    let file = notebook();
    let loads = (0..5).map(|_| voila.load(&file));
    let results = futures::future::join_all(loads).await;

    assert!(results.iter().all(|result| result.is_ok()));
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_peek_starts_load() {
    let server = PageServer::new();
    let (session, _store_dir) =
        setup_session(|config| config.registry_url = Some(server.url("/"))).await;
    let voila = session.voila().unwrap();

    assert!(voila.peek(&notebook()).is_pending());

    // the pending load is shared
    voila.load(&notebook()).await.unwrap();
    assert!(voila.peek(&notebook()).is_ready());
    assert_eq!(server.accesses(), 1);
}

/// A store that signs with a timestamp, so every signed URL is different.
#[derive(Debug, Default)]
struct TimestampSigner {
    signatures: AtomicUsize,
}

impl ObjectStore for TimestampSigner {
    fn get_object<'a>(&'a self, _object: &'a ObjectRef) -> BoxFuture<'a, Result<Bytes, StoreError>> {
        futures::future::ready(Err(StoreError::NotFound)).boxed()
    }

    fn put_object<'a>(
        &'a self,
        _object: &'a ObjectRef,
        _body: Bytes,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        futures::future::ready(Ok(())).boxed()
    }

    fn sign_url<'a>(
        &'a self,
        object: &'a ObjectRef,
        _expires_in: Duration,
    ) -> BoxFuture<'a, Result<Url, StoreError>> {
        let date = self.signatures.fetch_add(1, Ordering::Relaxed);
        let url = format!(
            "https://{}.s3.amazonaws.com/{}?X-Amz-Date={date}",
            object.bucket, object.key
        );
        futures::future::ready(Url::parse(&url).map_err(StoreError::from_std_error)).boxed()
    }
}

#[tokio::test]
async fn test_changing_signatures_share_entry() {
    catalog_test::setup();
    let server = PageServer::new();
    let store = Arc::new(TimestampSigner::default());
    let config = Config {
        registry_url: Some(server.url("/")),
        ..Default::default()
    };
    let session = CatalogSession::from_parts(config, store.clone(), None).unwrap();
    let voila = session.voila().unwrap();

    let first = voila.load(&notebook()).await.unwrap();
    for _ in 0..2 {
        assert_eq!(voila.load(&notebook()).await.unwrap(), first);
    }

    assert_eq!(server.accesses(), 1);
    assert_eq!(session.cache().len(), 1);
    assert_eq!(store.signatures.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_page_timeout() {
    let server = PageServer::new();
    let (session, _store_dir) = setup_session(|config| {
        config.registry_url = Some(server.url("/delay/1s/"));
        config.preview.iframe_load_timeout = Duration::from_millis(100);
    })
    .await;
    let voila = session.voila().unwrap();

    let err = voila.load(&notebook()).await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.cause().to_string(), "page is taking too long to load");

    // the failure is cached
    let err = voila.load(&notebook()).await.unwrap_err();
    assert!(matches!(err, PreviewError::Fetch(_)));
    assert!(err.is_timeout());
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_page_error_and_retry() {
    let server = PageServer::new();
    let (session, _store_dir) = setup_session(|config| {
        config.registry_url = Some(server.url("/respond_statuscode/500/"));
    })
    .await;
    let voila = session.voila().unwrap();

    let err = voila.load(&notebook()).await.unwrap_err();
    assert!(matches!(
        err.cause(),
        PreviewError::Status(StatusCode::INTERNAL_SERVER_ERROR)
    ));
    assert!(voila.peek(&notebook()).is_failed());
    assert_eq!(server.accesses(), 1);

    assert!(matches!(voila.retry(&notebook()), Entry::Pending));
    assert!(voila.load(&notebook()).await.is_err());
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_teardown_reloads() {
    let server = PageServer::new();
    let (session, _store_dir) =
        setup_session(|config| config.registry_url = Some(server.url("/"))).await;
    let voila = session.voila().unwrap();

    voila.load(&notebook()).await.unwrap();
    session.teardown();
    voila.load(&notebook()).await.unwrap();

    assert_eq!(server.accesses(), 2);
}

#[tokio::test]
async fn test_no_registry() {
    let (session, _store_dir) = setup_session(|_| {}).await;
    let err = session.voila().unwrap_err();
    assert!(matches!(err, PreviewError::NoRegistry));
}
