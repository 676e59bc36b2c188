//! Catalog-wide settings, stored as a JSON document in the service bucket.
//!
//! Settings are read through the session's [`ResourceCache`], so every part of the catalog
//! that asks for them shares a single fetch. Writing settings stores the new document and
//! patches the cached value in place.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use catalog_cache::{FetchError, Handle, Resource, ResourceCache, create_resource};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use crate::config::{CatalogMode, Config};
use crate::store::{ObjectRef, ObjectStoreRef, StoreError};

/// The name of the settings resource, used in logs and metrics.
pub const SETTINGS_RESOURCE_NAME: &str = "CatalogSettings.config";

/// Settings that customize the catalog.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSettings {
    /// Enables features in beta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beta: Option<bool>,
    /// An additional link in the navigation bar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_nav_link: Option<NavLink>,
    /// A custom logo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<Logo>,
    /// Search behavior.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchSettings>,
    /// Theme overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct NavLink {
    pub url: String,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Logo {
    pub url: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SearchSettings {
    /// What the search bar searches by default.
    #[serde(default)]
    pub mode: Option<SearchMode>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Packages,
    Objects,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Theme {
    pub palette: Palette,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Palette {
    pub primary: PrimaryColor,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct PrimaryColor {
    pub main: String,
}

/// Serializes settings the way they are stored: pretty JSON with two-space indentation.
pub fn format_settings(settings: &CatalogSettings) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(settings)
}

/// Fetches the settings document of a catalog.
///
/// There is exactly one settings document per catalog, so all inputs map to the same key.
/// Errors never fail the entry: a catalog without readable settings falls back to defaults.
pub struct SettingsResource {
    mode: CatalogMode,
    location: ObjectRef,
    store: ObjectStoreRef,
}

impl SettingsResource {
    pub fn new(mode: CatalogMode, location: ObjectRef, store: ObjectStoreRef) -> Self {
        Self {
            mode,
            location,
            store,
        }
    }

    /// The location of the settings document.
    pub fn location(&self) -> &ObjectRef {
        &self.location
    }
}

impl fmt::Debug for SettingsResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsResource")
            .field("mode", &self.mode)
            .field("location", &self.location.to_string())
            .finish()
    }
}

impl Resource for SettingsResource {
    type Input = ();
    type Key = ();
    type Output = Option<CatalogSettings>;

    fn name(&self) -> &str {
        SETTINGS_RESOURCE_NAME
    }

    fn key(&self, _input: &()) -> Option<()> {
        Some(())
    }

    fn fetch(&self, _input: ()) -> BoxFuture<'static, Result<Self::Output, FetchError>> {
        if !self.mode.loads_settings() {
            tracing::debug!(mode = ?self.mode, "Catalog mode has no settings");
            return futures::future::ready(Ok(None)).boxed();
        }

        let store = Arc::clone(&self.store);
        let location = self.location.clone();
        async move {
            match load_settings(&*store, &location).await {
                Ok(settings) => Ok(Some(settings)),
                Err(err) => {
                    tracing::warn!(
                        error = &err as &dyn std::error::Error,
                        "Error fetching catalog settings from \"{location}\""
                    );
                    Ok(None)
                }
            }
        }
        .boxed()
    }
}

async fn load_settings(
    store: &dyn crate::store::ObjectStore,
    location: &ObjectRef,
) -> Result<CatalogSettings, StoreError> {
    let body = store.get_object(location).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Reads and writes the catalog settings through a shared cache.
#[derive(Clone, Debug)]
pub struct SettingsService {
    cache: ResourceCache,
    resource: Handle<SettingsResource>,
    store: ObjectStoreRef,
}

impl SettingsService {
    /// Creates the settings service of the catalog described by `config`.
    pub fn new(config: &Config, cache: ResourceCache, store: ObjectStoreRef) -> Self {
        let location = ObjectRef::new(&config.service_bucket, &config.settings_key);
        let resource = create_resource(SettingsResource::new(
            config.mode,
            location,
            Arc::clone(&store),
        ));
        Self {
            cache,
            resource,
            store,
        }
    }

    /// Returns the catalog settings, fetching them on first use.
    ///
    /// `None` means the catalog runs with default settings.
    pub async fn get(&self) -> Result<Option<CatalogSettings>, FetchError> {
        let settings = self.cache.suspend(&self.resource, ()).await?;
        Ok(settings.flatten())
    }

    /// Returns the cached state of the settings without waiting for a fetch.
    pub fn peek(&self) -> catalog_cache::Entry<Option<CatalogSettings>> {
        self.cache.get(&self.resource, ())
    }

    /// Stores new settings and makes subsequent reads return them.
    ///
    /// If the settings were never read, the cache is left alone and the next read fetches the
    /// document that was just written.
    pub async fn write(&self, settings: CatalogSettings) -> Result<(), StoreError> {
        let body = format_settings(&settings)?;
        let location = self.resource.resource().location();
        self.store.put_object(location, Bytes::from(body)).await?;
        tracing::info!("Wrote catalog settings to {location}");

        if !self.cache.patch_ok(&self.resource, &(), move |_| Some(settings)) {
            tracing::debug!("Settings were not cached yet, the next read fetches them");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fixture() {
        let settings: CatalogSettings =
            serde_json::from_slice(&catalog_test::read_fixture("settings.json")).unwrap();

        assert_eq!(settings.beta, Some(true));
        assert_eq!(settings.custom_nav_link.unwrap().label, "Docs");
        assert_eq!(settings.search.unwrap().mode, Some(SearchMode::Packages));
        assert_eq!(settings.theme.unwrap().palette.primary.main, "#282b50");
    }

    #[test]
    fn test_parse_sparse() {
        let settings: CatalogSettings =
            serde_json::from_str(r#"{"search": {"mode": null}, "unknown": 1}"#).unwrap();
        assert_eq!(
            settings,
            CatalogSettings {
                search: Some(SearchSettings { mode: None }),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_format_settings() {
        let settings = CatalogSettings {
            beta: Some(false),
            logo: Some(Logo {
                url: "https://example.com/logo.png".into(),
            }),
            search: Some(SearchSettings {
                mode: Some(SearchMode::Objects),
            }),
            ..Default::default()
        };

        insta::assert_snapshot!(format_settings(&settings).unwrap(), @r#"
        {
          "beta": false,
          "logo": {
            "url": "https://example.com/logo.png"
          },
          "search": {
            "mode": "objects"
          }
        }
        "#);
    }
}
