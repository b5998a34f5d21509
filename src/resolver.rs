//! Architecture resolution
//!
//! Composes the cache, the credential resolver, and the registry client to
//! answer "which architectures does this image run on". This is the only
//! place the configured default architecture is materialized as an answer:
//! any registry error, deadline, or empty result collapses to it, and the
//! default is never written into the cache.

use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, warn};

use crate::cache::{ArchCache, CacheStats};
use crate::credentials::{CredentialResolver, SecretStore, DEFAULT_CREDENTIAL_TTL};
use crate::metrics;
use crate::registry::RegistryClient;
use crate::Result;

/// Deadline for a single registry lookup, independent of the enclosing
/// request's deadline
const DETECT_DEADLINE: Duration = Duration::from_secs(10);

/// Tunables for the resolver
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Architecture returned when detection fails
    pub default_arch: String,
    /// Maximum entries in the architecture cache
    pub cache_capacity: usize,
    /// TTL of architecture cache entries
    pub cache_ttl: Duration,
    /// TTL of resolved credentials
    pub credential_ttl: Duration,
    /// Fixed registry base URL (mirrors, tests); derived from the image
    /// reference when absent
    pub registry_base_url: Option<String>,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            default_arch: crate::DEFAULT_ARCH.to_string(),
            cache_capacity: crate::DEFAULT_CACHE_CAPACITY,
            cache_ttl: Duration::from_secs(300),
            credential_ttl: DEFAULT_CREDENTIAL_TTL,
            registry_base_url: None,
        }
    }
}

/// Resolves the architectures an image supports, with caching and
/// fail-open defaults
pub struct ArchResolver {
    cache: ArchCache,
    credentials: CredentialResolver,
    registry: RegistryClient,
    default_arch: String,
}

impl ArchResolver {
    /// Create a resolver reading pull secrets through `store`
    pub fn new(store: Box<dyn SecretStore>, options: ResolverOptions) -> Result<Self> {
        let mut registry = RegistryClient::anonymous(options.default_arch.clone())?;
        if let Some(base_url) = &options.registry_base_url {
            registry = registry.with_base_url(base_url.clone());
        }

        Ok(Self {
            cache: ArchCache::new(options.cache_capacity, options.cache_ttl),
            credentials: CredentialResolver::with_ttl(store, options.credential_ttl),
            registry,
            default_arch: options.default_arch,
        })
    }

    /// Detect the single architecture to pin `image` to
    ///
    /// Never fails and never returns an empty token; the configured
    /// default stands in for anything the registry could not answer.
    pub async fn detect(&self, pod: &Pod, image: &str) -> String {
        match self.supported(pod, image).await {
            Some(architectures) => architectures
                .first()
                .cloned()
                .unwrap_or_else(|| self.default_arch.clone()),
            None => self.default_arch.clone(),
        }
    }

    /// Resolve the full architecture list for `image`
    ///
    /// Returns `None` when the registry lookup failed or timed out; the
    /// caller decides whether that is fatal. Successful lookups populate
    /// the cache.
    pub async fn supported(&self, pod: &Pod, image: &str) -> Option<Vec<String>> {
        if let Some(architectures) = self.cache.get(image) {
            metrics::record_cache_hit(image);
            debug!(image = %image, architectures = ?architectures, "architecture cache hit");
            return Some(architectures);
        }
        metrics::record_cache_miss(image);

        let client = match self.credentials.resolve(pod, image).await {
            Some(credential) => self.registry.authenticated(credential),
            None => self.registry.clone(),
        };

        let lookup = tokio::time::timeout(DETECT_DEADLINE, client.supported_architectures(image));
        match lookup.await {
            Ok(Ok(architectures)) if !architectures.is_empty() => {
                self.cache.set(image, architectures.clone());
                Some(architectures)
            }
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                warn!(image = %image, error = %e, "architecture lookup failed");
                None
            }
            Err(_) => {
                warn!(image = %image, "architecture lookup deadline exceeded");
                None
            }
        }
    }

    /// The architecture used when detection fails
    pub fn default_arch(&self) -> &str {
        &self.default_arch
    }

    /// Snapshot of architecture cache counters
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
