use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;
use url::Url;

/// The key of the catalog settings object within the service bucket.
pub const DEFAULT_SETTINGS_KEY: &str = "catalog/settings.json";

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the catalog.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "catalog".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// The deployment mode of the catalog.
///
/// Only a `prod` catalog reads its settings from the service bucket.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogMode {
    /// A catalog backed by a stack and its service bucket.
    #[default]
    Prod,
    /// A local development catalog.
    Local,
    /// The marketing site, which has no stack behind it.
    Marketing,
}

impl CatalogMode {
    /// Whether catalog settings are loaded from the service bucket in this mode.
    pub fn loads_settings(self) -> bool {
        matches!(self, Self::Prod)
    }
}

/// Where AWS credentials come from.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum AwsCredentialsConfig {
    /// The default provider chain: environment, profile files, then instance metadata.
    #[default]
    Environment,
    /// The ECS container credentials endpoint.
    Container,
    /// Credentials given in the config file.
    Static {
        /// The AWS access key id.
        access_key: String,
        /// The AWS secret access key.
        secret_key: String,
        /// An optional session token for temporary credentials.
        #[serde(default)]
        session_token: Option<String>,
    },
}

/// Configuration of an S3 object store.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct S3StoreConfig {
    /// The AWS region. Falls back to the region of the environment.
    pub region: Option<String>,
    /// A custom endpoint, for S3-compatible services.
    pub endpoint: Option<String>,
    /// Where credentials come from.
    pub credentials: AwsCredentialsConfig,
    /// Timeout for a single request, including reading the response body.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for S3StoreConfig {
    fn default() -> Self {
        Self {
            region: None,
            endpoint: None,
            credentials: AwsCredentialsConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Configuration of a filesystem object store.
///
/// Objects live at `<path>/<bucket>/<key>`.
#[derive(Clone, Debug, Deserialize)]
pub struct FilesystemStoreConfig {
    /// The root directory of the store.
    pub path: PathBuf,
}

/// Selects the object store backend.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Amazon S3 or a compatible service.
    S3(S3StoreConfig),
    /// A local directory.
    Filesystem(FilesystemStoreConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::S3(S3StoreConfig::default())
    }
}

/// Fine-tuning of file previews.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct PreviewConfig {
    /// How long a preview page may take to load before it is considered failed.
    #[serde(with = "humantime_serde")]
    pub iframe_load_timeout: Duration,
    /// How long signed object URLs stay valid.
    #[serde(with = "humantime_serde")]
    pub sign_expiry: Duration,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            iframe_load_timeout: Duration::from_secs(30),
            sign_expiry: Duration::from_secs(15 * 60),
        }
    }
}

/// The catalog configuration, usually read from a YAML file.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The deployment mode.
    pub mode: CatalogMode,

    /// The bucket holding catalog-wide configuration.
    pub service_bucket: String,

    /// The key of the settings object within the service bucket.
    pub settings_key: String,

    /// The base URL of the registry that renders previews.
    pub registry_url: Option<Url>,

    /// The object store backend.
    pub store: StoreConfig,

    /// Preview tuning.
    pub preview: PreviewConfig,

    /// Logging configuration.
    pub logging: Logging,

    /// Metrics configuration.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mode: CatalogMode::default(),
            service_bucket: String::new(),
            settings_key: DEFAULT_SETTINGS_KEY.to_owned(),
            registry_url: None,
            store: StoreConfig::default(),
            preview: PreviewConfig::default(),
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
        }
    }
}

impl Config {
    /// Loads the config from `path`, or returns the defaults if there is none.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::get(None).unwrap();
        assert_eq!(cfg.mode, CatalogMode::Prod);
        assert_eq!(cfg.settings_key, "catalog/settings.json");
        assert_eq!(cfg.preview.iframe_load_timeout, Duration::from_secs(30));
        assert!(cfg.registry_url.is_none());
        assert!(matches!(cfg.store, StoreConfig::S3(_)));
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
            mode: local
            service_bucket: my-service-bucket
            registry_url: https://registry.example.com
            store:
              type: s3
              region: us-west-2
              credentials:
                provider: static
                access_key: AKID
                secret_key: SECRET
            preview:
              iframe_load_timeout: 5s
            logging:
              level: debug
              format: json
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();

        assert_eq!(cfg.mode, CatalogMode::Local);
        assert!(!cfg.mode.loads_settings());
        assert_eq!(cfg.service_bucket, "my-service-bucket");
        assert_eq!(
            cfg.registry_url.unwrap().as_str(),
            "https://registry.example.com/"
        );
        assert_eq!(cfg.preview.iframe_load_timeout, Duration::from_secs(5));
        assert_eq!(cfg.preview.sign_expiry, PreviewConfig::default().sign_expiry);
        assert_eq!(cfg.logging.level, LevelFilter::DEBUG);
        assert_eq!(cfg.logging.format, LogFormat::Json);

        let StoreConfig::S3(s3) = cfg.store else {
            panic!("expected an s3 store");
        };
        assert_eq!(s3.region.as_deref(), Some("us-west-2"));
        assert_eq!(s3.request_timeout, Duration::from_secs(30));
        assert_eq!(
            s3.credentials,
            AwsCredentialsConfig::Static {
                access_key: "AKID".into(),
                secret_key: "SECRET".into(),
                session_token: None,
            }
        );
    }

    #[test]
    fn test_filesystem_store() {
        let yaml = r#"
            store:
              type: filesystem
              path: /tmp/catalog-store
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        let StoreConfig::Filesystem(fs) = cfg.store else {
            panic!("expected a filesystem store");
        };
        assert_eq!(fs.path, PathBuf::from("/tmp/catalog-store"));
    }

    #[test]
    fn test_unknown_fields() {
        // Unknown fields should not cause failure
        let yaml = r#"
            preview:
              not_a_setting: 1h
        "#;
        let cfg = Config::from_reader(yaml.as_bytes());
        assert!(cfg.is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let yaml = r#"
            logging:
              level: loud
        "#;
        assert!(Config::from_reader(yaml.as_bytes()).is_err());
    }

    #[test]
    fn test_empty_file() {
        // Empty files aren't supported
        let yaml = r#""#;
        let result = Config::from_reader(yaml.as_bytes());
        assert!(result.is_err());
    }
}
