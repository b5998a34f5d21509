//! Registry credential resolution from pull secrets
//!
//! Given a pod and an image, walks the pull-secret priority chain:
//! the pod's own `imagePullSecrets`, then the service account's, then
//! anonymous. Every failure mode (missing secret, malformed docker config,
//! no matching host) degrades to anonymous access; this resolver never
//! surfaces an error to the mutation path.
//!
//! Secret access goes through the [`SecretStore`] trait so tests can run
//! without a cluster.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k8s_openapi::api::core::v1::{Pod, Secret, ServiceAccount};
use kube::api::Api;
use serde::Deserialize;
use tracing::debug;

use crate::image::{ImageReference, PUBLIC_HUB, PUBLIC_HUB_HOSTS};

/// Key holding a docker config in modern pull secrets
const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

/// Legacy docker config key
const DOCKER_CONFIG_KEY: &str = ".dockercfg";

/// Service account name assumed when a pod does not set one
const DEFAULT_SERVICE_ACCOUNT: &str = "default";

/// Namespace assumed when a pod object carries none
const DEFAULT_NAMESPACE: &str = "default";

/// Default TTL for resolved credentials
pub const DEFAULT_CREDENTIAL_TTL: Duration = Duration::from_secs(300);

/// Registry authentication material for one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryCredential {
    /// Basic-auth username
    pub username: String,
    /// Basic-auth password
    pub password: String,
    /// Registry host the credential applies to
    pub registry: String,
}

/// Read access to pull secrets and service accounts
///
/// Lookups return `None` on any failure; the distinction between "absent"
/// and "errored" does not matter to the anonymous fallback.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch a secret in a namespace
    async fn secret(&self, namespace: &str, name: &str) -> Option<Secret>;

    /// Fetch a service account in a namespace
    async fn service_account(&self, namespace: &str, name: &str) -> Option<ServiceAccount>;
}

/// Secret store backed by the cluster API
pub struct KubeSecretStore {
    client: kube::Client,
}

impl KubeSecretStore {
    /// Create a store reading through the given client
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl SecretStore for KubeSecretStore {
    async fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(secret) => Some(secret),
            Err(e) => {
                debug!(namespace = %namespace, secret = %name, error = %e, "pull secret lookup failed");
                None
            }
        }
    }

    async fn service_account(&self, namespace: &str, name: &str) -> Option<ServiceAccount> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(sa) => Some(sa),
            Err(e) => {
                debug!(namespace = %namespace, service_account = %name, error = %e, "service account lookup failed");
                None
            }
        }
    }
}

/// Wire format of a docker config blob
#[derive(Debug, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, DockerAuth>,
}

#[derive(Debug, Deserialize)]
struct DockerAuth {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    auth: String,
}

struct CachedCredential {
    credential: Option<RegistryCredential>,
    expires_at: Instant,
}

/// Resolves registry credentials for pods, with a TTL cache
///
/// Both positive and negative outcomes are cached under
/// `{namespace}/{pod}/{registry}` so repeated admissions of the same pod
/// spec do not hammer the API server.
pub struct CredentialResolver {
    store: Box<dyn SecretStore>,
    cache: RwLock<HashMap<String, CachedCredential>>,
    ttl: Duration,
}

impl CredentialResolver {
    /// Create a resolver with the default credential TTL
    pub fn new(store: Box<dyn SecretStore>) -> Self {
        Self::with_ttl(store, DEFAULT_CREDENTIAL_TTL)
    }

    /// Create a resolver with a custom credential TTL
    pub fn with_ttl(store: Box<dyn SecretStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Resolve credentials for pulling `image` as `pod` would
    ///
    /// Returns `None` for anonymous access.
    pub async fn resolve(&self, pod: &Pod, image: &str) -> Option<RegistryCredential> {
        let registry = ImageReference::parse(image).registry;
        let namespace = pod
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        let pod_name = pod.metadata.name.as_deref().unwrap_or_default();
        let cache_key = format!("{namespace}/{pod_name}/{registry}");

        {
            let cache = self.cache.read().expect("credential cache lock poisoned");
            if let Some(entry) = cache.get(&cache_key) {
                if Instant::now() < entry.expires_at {
                    return entry.credential.clone();
                }
            }
        }

        let credential = self.resolve_uncached(pod, &namespace, &registry).await;

        let mut cache = self.cache.write().expect("credential cache lock poisoned");
        cache.insert(
            cache_key,
            CachedCredential {
                credential: credential.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );

        credential
    }

    async fn resolve_uncached(
        &self,
        pod: &Pod,
        namespace: &str,
        registry: &str,
    ) -> Option<RegistryCredential> {
        let spec = pod.spec.as_ref()?;

        // 1. The pod's own pull secrets, in declared order
        if let Some(refs) = &spec.image_pull_secrets {
            for secret_ref in refs {
                let name = secret_ref.name.as_str();
                if name.is_empty() {
                    continue;
                }
                if let Some(cred) = self.secret_credential(namespace, name, registry).await {
                    return Some(cred);
                }
            }
        }

        // 2. The service account's pull secrets
        let sa_name = spec
            .service_account_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_SERVICE_ACCOUNT);
        if let Some(sa) = self.store.service_account(namespace, sa_name).await {
            if let Some(refs) = &sa.image_pull_secrets {
                for secret_ref in refs {
                    let name = secret_ref.name.as_str();
                    if name.is_empty() {
                        continue;
                    }
                    if let Some(cred) = self.secret_credential(namespace, name, registry).await {
                        return Some(cred);
                    }
                }
            }
        }

        // 3. Anonymous
        None
    }

    async fn secret_credential(
        &self,
        namespace: &str,
        secret_name: &str,
        registry: &str,
    ) -> Option<RegistryCredential> {
        let secret = self.store.secret(namespace, secret_name).await?;
        let data = secret.data.as_ref()?;

        let blob = data
            .get(DOCKER_CONFIG_JSON_KEY)
            .or_else(|| data.get(DOCKER_CONFIG_KEY))?;

        let config: DockerConfig = match serde_json::from_slice(&blob.0) {
            Ok(config) => config,
            Err(e) => {
                debug!(namespace = %namespace, secret = %secret_name, error = %e, "malformed docker config");
                return None;
            }
        };

        for (host, auth) in &config.auths {
            if !registry_matches(host, registry) {
                continue;
            }
            if !auth.username.is_empty() && !auth.password.is_empty() {
                return Some(RegistryCredential {
                    username: auth.username.clone(),
                    password: auth.password.clone(),
                    registry: registry.to_string(),
                });
            }
            if !auth.auth.is_empty() {
                if let Some(cred) = decode_auth_field(&auth.auth, registry) {
                    return Some(cred);
                }
            }
        }

        None
    }
}

/// Decode a docker config `auth` field (`base64(user:pass)`)
fn decode_auth_field(auth: &str, registry: &str) -> Option<RegistryCredential> {
    let decoded = STANDARD.decode(auth).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some(RegistryCredential {
        username: username.to_string(),
        password: password.to_string(),
        registry: registry.to_string(),
    })
}

/// Whether a docker config host entry covers an image's registry
///
/// Scheme prefixes, trailing slashes, and the legacy `/v1` suffix are
/// stripped. All public-hub spellings match each other; anything else
/// matches on exact string equality.
fn registry_matches(config_host: &str, image_registry: &str) -> bool {
    let host = config_host
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .trim_end_matches("/v1");

    let config_is_hub = PUBLIC_HUB_HOSTS.iter().any(|hub| host.contains(hub));
    let image_is_hub = image_registry == PUBLIC_HUB || image_registry.is_empty();

    if config_is_hub && image_is_hub {
        return true;
    }

    host == image_registry
}
