//! Support for objects in S3 buckets.

use std::fmt;
use std::time::Duration;

use aws_config::ecs::EcsCredentialsProvider;
use aws_credential_types::Credentials;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use url::Url;

pub use aws_sdk_s3::Error as S3Error;

use super::{ObjectRef, ObjectStore, StoreError};
use crate::config::{AwsCredentialsConfig, S3StoreConfig};

/// Object store backed by Amazon S3 or a compatible service.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    credentials: Option<SharedCredentialsProvider>,
    timeout: Duration,
}

impl fmt::Debug for S3Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Store")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl S3Store {
    /// Creates a client from the environment and the given config.
    pub async fn new(config: &S3StoreConfig) -> Self {
        tracing::debug!(
            "Using AWS credentials provider: {:?}",
            provider_name(&config.credentials)
        );

        let mut config_loader = aws_config::from_env();
        config_loader = match &config.credentials {
            AwsCredentialsConfig::Environment => config_loader,
            AwsCredentialsConfig::Container => {
                config_loader.credentials_provider(EcsCredentialsProvider::builder().build())
            }
            AwsCredentialsConfig::Static {
                access_key,
                secret_key,
                session_token,
            } => config_loader.credentials_provider(Credentials::from_keys(
                access_key.clone(),
                secret_key.clone(),
                session_token.clone(),
            )),
        };

        if let Some(region) = &config.region {
            config_loader = config_loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(endpoint_url) = &config.endpoint {
            config_loader = config_loader.endpoint_url(endpoint_url);
        }

        let sdk_config = config_loader.load().await;
        let credentials = sdk_config.credentials_provider();

        // S3-compatible services generally don't support virtual-hosted buckets.
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint.is_some())
            .build();

        Self {
            client: Client::from_conf(s3_config),
            credentials,
            timeout: config.request_timeout,
        }
    }

    /// The credentials provider the client signs requests with.
    ///
    /// Previews that load objects on their own need the same credentials.
    pub fn credentials_provider(&self) -> Option<SharedCredentialsProvider> {
        self.credentials.clone()
    }

    async fn fetch_object(&self, object: &ObjectRef) -> Result<Bytes, StoreError> {
        tracing::debug!("Fetching from s3: {object}");

        let request = self
            .client
            .get_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .set_version_id(object.version.clone())
            .send();

        let timeout = self.timeout;
        let response = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| StoreError::Timeout(timeout))?;
        let response = response.map_err(|err| {
            tracing::debug!("Skipping response from {object}: {err}");
            map_sdk_error(err, timeout)
        })?;

        let body = tokio::time::timeout(timeout, response.body.collect())
            .await
            .map_err(|_| StoreError::Timeout(timeout))?
            .map_err(|err| StoreError::RequestFailed(err.to_string()))?;

        Ok(body.into_bytes())
    }

    async fn store_object(&self, object: &ObjectRef, body: Bytes) -> Result<(), StoreError> {
        tracing::debug!(size = body.len(), "Writing to s3: {object}");

        let request = self
            .client
            .put_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .body(ByteStream::from(body))
            .send();

        let timeout = self.timeout;
        tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| StoreError::Timeout(timeout))?
            .map_err(|err| map_sdk_error(err, timeout))?;

        Ok(())
    }

    async fn presign(&self, object: &ObjectRef, expires_in: Duration) -> Result<Url, StoreError> {
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|err| StoreError::Malformed(err.to_string()))?;

        let request = self
            .client
            .get_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .set_version_id(object.version.clone())
            .presigned(presigning)
            .await
            .map_err(|err| map_sdk_error(err, self.timeout))?;

        Url::parse(request.uri()).map_err(StoreError::from_std_error)
    }
}

impl ObjectStore for S3Store {
    fn get_object<'a>(&'a self, object: &'a ObjectRef) -> BoxFuture<'a, Result<Bytes, StoreError>> {
        self.fetch_object(object).boxed()
    }

    fn put_object<'a>(
        &'a self,
        object: &'a ObjectRef,
        body: Bytes,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        self.store_object(object, body).boxed()
    }

    fn sign_url<'a>(
        &'a self,
        object: &'a ObjectRef,
        expires_in: Duration,
    ) -> BoxFuture<'a, Result<Url, StoreError>> {
        self.presign(object, expires_in).boxed()
    }
}

fn provider_name(config: &AwsCredentialsConfig) -> &'static str {
    match config {
        AwsCredentialsConfig::Environment => "environment",
        AwsCredentialsConfig::Container => "container",
        AwsCredentialsConfig::Static { .. } => "static",
    }
}

/// Classifies a failed S3 request.
///
/// `timeout` is the request timeout the SDK was given, reported for timed out requests.
fn map_sdk_error<E>(err: SdkError<E, HttpResponse>, timeout: Duration) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    S3Error: From<SdkError<E, HttpResponse>>,
{
    // we first check for some specific errors variants, and afterwards we cast this to
    // a very generic `S3Error` that internally converts things around.
    match &err {
        SdkError::TimeoutError(_) => {
            tracing::error!(
                error = &err as &dyn std::error::Error,
                "S3 request timed out",
            );
            return StoreError::Timeout(timeout);
        }
        SdkError::ServiceError(service_err) => {
            // The errors and status codes are explained here:
            // <https://docs.aws.amazon.com/AmazonS3/latest/API/ErrorResponses.html#ErrorCodeList>
            let status = service_err.raw().status();
            let code = service_err.err().code();

            // NOTE: empty credentials lead to an `AuthorizationHeaderMalformed` error.
            if matches!(status.as_u16(), 401 | 403) || code == Some("AuthorizationHeaderMalformed") {
                let details = service_err.err().message().unwrap_or_default().to_string();
                return StoreError::PermissionDenied(details);
            }
        }
        _ => {}
    }

    let err = S3Error::from(err);
    match &err {
        S3Error::NoSuchBucket(_) | S3Error::NoSuchKey(_) | S3Error::NotFound(_) => {
            StoreError::NotFound
        }
        // The `From` impl does not classify every error, so match the code as well.
        _ if matches!(err.code(), Some("NoSuchBucket" | "NoSuchKey" | "NotFound")) => {
            StoreError::NotFound
        }
        _ => {
            tracing::debug!(
                error = &err as &dyn std::error::Error,
                "S3 request failed: {:?}",
                err.code(),
            );
            StoreError::RequestFailed(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use aws_sdk_s3::operation::get_object::GetObjectError;

    use super::*;

    #[test]
    fn test_sdk_timeout_reports_request_timeout() {
        let err: SdkError<GetObjectError, HttpResponse> = SdkError::timeout_error("deadline");
        let err = map_sdk_error(err, Duration::from_secs(30));

        assert_eq!(err, StoreError::Timeout(Duration::from_secs(30)));
        assert_eq!(err.to_string(), "request timed out after 30s");
    }
}
