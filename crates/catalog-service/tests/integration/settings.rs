use catalog_service::config::{CatalogMode, DEFAULT_SETTINGS_KEY};
use catalog_service::settings::{CatalogSettings, NavLink, format_settings};
use catalog_service::catalog_cache::Entry;

use crate::{SERVICE_BUCKET, put_object, read_fixture, setup_session};

#[tokio::test]
async fn test_read_settings() {
    let (session, store_dir) = setup_session(|_| {}).await;
    put_object(
        store_dir.path(),
        SERVICE_BUCKET,
        DEFAULT_SETTINGS_KEY,
        &read_fixture("settings.json"),
    );

    let settings = session.settings().get().await.unwrap().unwrap();
    assert_eq!(settings.beta, Some(true));
    assert_eq!(settings.logo.unwrap().url, "https://example.com/logo.png");

    // served from the cache, even though the document is gone
    std::fs::remove_file(store_dir.path().join(SERVICE_BUCKET).join(DEFAULT_SETTINGS_KEY)).unwrap();
    let cached = session.settings().get().await.unwrap();
    assert_eq!(cached.and_then(|s| s.beta), Some(true));
    assert!(session.settings().peek().is_ready());
}

#[tokio::test]
async fn test_settings_in_local_mode() {
    for mode in [CatalogMode::Local, CatalogMode::Marketing] {
        let (session, store_dir) = setup_session(|config| config.mode = mode).await;
        put_object(
            store_dir.path(),
            SERVICE_BUCKET,
            DEFAULT_SETTINGS_KEY,
            &read_fixture("settings.json"),
        );

        assert_eq!(session.settings().get().await.unwrap(), None);
    }
}

#[tokio::test]
async fn test_missing_settings() {
    let (session, _store_dir) = setup_session(|_| {}).await;

    assert_eq!(session.settings().get().await.unwrap(), None);
    assert!(matches!(session.settings().peek(), Entry::Ready(None)));
}

#[tokio::test]
async fn test_malformed_settings() {
    let (session, store_dir) = setup_session(|_| {}).await;
    put_object(
        store_dir.path(),
        SERVICE_BUCKET,
        DEFAULT_SETTINGS_KEY,
        b"{ not json",
    );

    assert_eq!(session.settings().get().await.unwrap(), None);
}

#[tokio::test]
async fn test_custom_settings_key() {
    let (session, store_dir) =
        setup_session(|config| config.settings_key = "config/catalog.json".into()).await;
    put_object(
        store_dir.path(),
        SERVICE_BUCKET,
        "config/catalog.json",
        br#"{"beta": false}"#,
    );

    let settings = session.settings().get().await.unwrap().unwrap();
    assert_eq!(settings.beta, Some(false));
}

fn new_settings() -> CatalogSettings {
    CatalogSettings {
        beta: Some(false),
        custom_nav_link: Some(NavLink {
            url: "https://example.com/help".into(),
            label: "Help".into(),
        }),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_write_patches_cache() {
    let (session, store_dir) = setup_session(|_| {}).await;
    let path = store_dir.path().join(SERVICE_BUCKET).join(DEFAULT_SETTINGS_KEY);
    put_object(
        store_dir.path(),
        SERVICE_BUCKET,
        DEFAULT_SETTINGS_KEY,
        &read_fixture("settings.json"),
    );

    let before = session.settings().get().await.unwrap().unwrap();
    assert_eq!(before.beta, Some(true));

    session.settings().write(new_settings()).await.unwrap();

    let stored = std::fs::read_to_string(&path).unwrap();
    assert_eq!(stored, format_settings(&new_settings()).unwrap());

    // a fetch would fail to parse this, so the read must come from the patched entry
    std::fs::write(&path, "{ not json").unwrap();
    assert_eq!(session.settings().get().await.unwrap(), Some(new_settings()));
}

#[tokio::test]
async fn test_write_before_read() {
    let (session, store_dir) = setup_session(|_| {}).await;

    session.settings().write(new_settings()).await.unwrap();
    assert!(session.cache().is_empty());

    let path = store_dir.path().join(SERVICE_BUCKET).join(DEFAULT_SETTINGS_KEY);
    assert!(path.is_file());
    assert_eq!(session.settings().get().await.unwrap(), Some(new_settings()));
}

#[tokio::test]
async fn test_teardown_refetches() {
    let (session, store_dir) = setup_session(|_| {}).await;
    put_object(
        store_dir.path(),
        SERVICE_BUCKET,
        DEFAULT_SETTINGS_KEY,
        br#"{"beta": true}"#,
    );
    assert!(session.settings().get().await.unwrap().is_some());

    put_object(
        store_dir.path(),
        SERVICE_BUCKET,
        DEFAULT_SETTINGS_KEY,
        br#"{"beta": false}"#,
    );
    session.teardown();
    assert!(session.cache().is_empty());

    let settings = session.settings().get().await.unwrap().unwrap();
    assert_eq!(settings.beta, Some(false));
}
