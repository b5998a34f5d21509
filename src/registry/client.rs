//! Registry HTTPS client
//!
//! Fetches the manifest list for an image reference and maps registry
//! status codes onto the webhook's error model. Most failure modes fail
//! open to the default architecture; the distinct errors (403, 404, 400,
//! 429, timeout) are surfaced so the resolver can log them before falling
//! back itself.
//!
//! One client instance is safe for concurrent use. An authenticated
//! variant shares the underlying connection pool and differs only in the
//! per-request authorization header.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::credentials::RegistryCredential;
use crate::error::Error;
use crate::image::ImageReference;
use crate::registry::{manifest, MANIFEST_LIST_MEDIA_TYPE};
use crate::Result;

/// Client-wide request timeout
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Registry client for manifest-list lookups
#[derive(Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    credentials: Option<RegistryCredential>,
    base_url: Option<String>,
    default_arch: String,
}

impl RegistryClient {
    /// Create a client for anonymous registry access
    pub fn anonymous(default_arch: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            credentials: None,
            base_url: None,
            default_arch: default_arch.into(),
        })
    }

    /// Derive a client that authenticates with the given credentials
    ///
    /// Shares the connection pool of `self`.
    pub fn authenticated(&self, credentials: RegistryCredential) -> Self {
        Self {
            http: self.http.clone(),
            credentials: Some(credentials),
            base_url: self.base_url.clone(),
            default_arch: self.default_arch.clone(),
        }
    }

    /// Route all requests to a fixed base URL instead of the registry
    /// derived from the image reference
    ///
    /// Used for registry mirrors and in tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Fetch the architectures supported by `image`
    ///
    /// Unparseable references, unexpected status codes, and non-timeout
    /// transport failures fail open to the default-architecture singleton.
    pub async fn supported_architectures(&self, image: &str) -> Result<Vec<String>> {
        let reference = ImageReference::parse(image);
        if reference.repository.is_empty() {
            warn!(image = %image, "unparseable image reference, using default architecture");
            return Ok(self.fallback());
        }

        let url = self.manifest_url(&reference);
        debug!(image = %image, url = %url, "fetching manifest list");

        let response = match self.send(&url).await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Err(Error::RegistryTimeout {
                    image: image.to_string(),
                })
            }
            Err(e) => {
                warn!(image = %image, error = %e, "registry transport error, using default architecture");
                return Ok(self.fallback());
            }
        };

        match response.status() {
            StatusCode::OK => self.decode(image, response).await,
            StatusCode::UNAUTHORIZED => self.retry_after_auth(image, &url).await,
            StatusCode::FORBIDDEN => Err(Error::AccessDenied {
                image: image.to_string(),
            }),
            StatusCode::NOT_FOUND => Err(Error::ImageNotFound {
                image: image.to_string(),
            }),
            StatusCode::BAD_REQUEST => Err(Error::UnsupportedApiVersion {
                image: image.to_string(),
            }),
            StatusCode::TOO_MANY_REQUESTS => Err(Error::RateLimited {
                image: image.to_string(),
            }),
            status => {
                warn!(image = %image, status = %status, "unexpected registry status, using default architecture");
                Ok(self.fallback())
            }
        }
    }

    async fn send(&self, url: &str) -> std::result::Result<reqwest::Response, reqwest::Error> {
        let mut request = self.http.get(url).header("Accept", MANIFEST_LIST_MEDIA_TYPE);
        if let Some(cred) = &self.credentials {
            request = request.basic_auth(&cred.username, Some(&cred.password));
        }
        request.send().await
    }

    async fn decode(&self, image: &str, response: reqwest::Response) -> Result<Vec<String>> {
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!(image = %image, error = %e, "failed to read manifest body, using default architecture");
                return Ok(self.fallback());
            }
        };

        let architectures = manifest::parse_architectures(&body)?;
        if architectures.is_empty() {
            return Ok(self.fallback());
        }
        Ok(architectures)
    }

    /// One identical retry after a 401, standing in for a token refresh.
    /// Anything short of a clean 200 on the second attempt falls back to
    /// the default architecture.
    async fn retry_after_auth(&self, image: &str, url: &str) -> Result<Vec<String>> {
        debug!(image = %image, "registry returned 401, retrying once");

        let response = match self.send(url).await {
            Ok(response) => response,
            Err(_) => return Ok(self.fallback()),
        };
        if response.status() != StatusCode::OK {
            return Ok(self.fallback());
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(_) => return Ok(self.fallback()),
        };
        match manifest::parse_architectures(&body) {
            Ok(architectures) if !architectures.is_empty() => Ok(architectures),
            _ => Ok(self.fallback()),
        }
    }

    fn manifest_url(&self, reference: &ImageReference) -> String {
        let base = match &self.base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => reference.registry_endpoint(),
        };
        format!("{base}{}", reference.manifest_path())
    }

    fn fallback(&self) -> Vec<String> {
        vec![self.default_arch.clone()]
    }
}
