//! Index administration calls against an OpenSearch Serverless collection.

use std::time::{Duration, SystemTime};

use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_sigv4::http_request::{
    sign, PayloadChecksumKind, SignableBody, SignableRequest, SigningSettings,
};
use aws_sigv4::sign::v4;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tracing::debug;

/// OpenSearch Serverless signs under its own service name, not `es`.
pub const SIGNING_SERVICE: &str = "aoss";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchIndexReply {
    pub status: u16,
    pub body: String,
}

impl SearchIndexReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait SearchIndexApi {
    fn put_index(&self, url: &str, body: &[u8]) -> Result<SearchIndexReply, String>;
    fn delete_index(&self, url: &str) -> Result<SearchIndexReply, String>;
}

#[derive(Debug, Error)]
pub enum SearchIndexError {
    #[error("no AWS credentials provider available")]
    NoCredentialsProvider,
    #[error("no AWS region configured")]
    NoRegion,
    #[error("failed to load AWS credentials: {0}")]
    Credentials(String),
    #[error("failed to sign request: {0}")]
    Signing(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// HTTP client that signs every request with SigV4 for `aoss`.
pub struct SigV4SearchIndexClient {
    client: reqwest::Client,
    credentials_provider: SharedCredentialsProvider,
    region: String,
}

impl SigV4SearchIndexClient {
    /// Uses the default chain, which is the execution role inside Lambda.
    pub async fn from_env() -> Result<Self, SearchIndexError> {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let credentials_provider = config
            .credentials_provider()
            .ok_or(SearchIndexError::NoCredentialsProvider)?;
        let region = config
            .region()
            .map(|region| region.as_ref().to_string())
            .ok_or(SearchIndexError::NoRegion)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            credentials_provider,
            region,
        })
    }

    pub async fn send(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Vec<u8>,
    ) -> Result<SearchIndexReply, SearchIndexError> {
        let credentials = self
            .credentials_provider
            .provide_credentials()
            .await
            .map_err(|error| SearchIndexError::Credentials(error.to_string()))?;
        let identity = credentials.into();

        let mut settings = SigningSettings::default();
        settings.payload_checksum_kind = PayloadChecksumKind::XAmzSha256;
        let signing_params = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name(SIGNING_SERVICE)
            .time(SystemTime::now())
            .settings(settings)
            .build()
            .map_err(|error| SearchIndexError::Signing(error.to_string()))?
            .into();

        let headers = [(CONTENT_TYPE.as_str(), "application/json")];
        let signable_request = SignableRequest::new(
            method.as_str(),
            url,
            headers.iter().copied(),
            SignableBody::Bytes(&body),
        )
        .map_err(|error| SearchIndexError::Signing(error.to_string()))?;
        let (instructions, _signature) = sign(signable_request, &signing_params)
            .map_err(|error| SearchIndexError::Signing(error.to_string()))?
            .into_parts();

        let mut request = self
            .client
            .request(method.clone(), url)
            .header(CONTENT_TYPE, "application/json");
        for (name, value) in instructions.headers() {
            request = request.header(name, value);
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(%method, url, status, "search index request completed");

        Ok(SearchIndexReply { status, body })
    }

    fn send_blocking(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Vec<u8>,
    ) -> Result<SearchIndexReply, String> {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.send(method, url, body))
        })
        .map_err(|error| error.to_string())
    }
}

impl SearchIndexApi for SigV4SearchIndexClient {
    fn put_index(&self, url: &str, body: &[u8]) -> Result<SearchIndexReply, String> {
        self.send_blocking(reqwest::Method::PUT, url, body.to_vec())
    }

    fn delete_index(&self, url: &str) -> Result<SearchIndexReply, String> {
        self.send_blocking(reqwest::Method::DELETE, url, Vec::new())
    }
}
