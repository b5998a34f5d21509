//! Image reference parsing
//!
//! References look like `[registry/]repository[:tag|@digest]`. Parsing is
//! total: any input produces a reference, and downstream code treats an
//! empty repository as the fail-open signal rather than an error.
//!
//! The leading path segment is a registry host iff it contains a `.` or a
//! `:`; otherwise the reference points at the public hub and bare
//! repositories get the implicit `library/` prefix.

/// Hosts that all mean the public Docker Hub
pub const PUBLIC_HUB_HOSTS: &[&str] = &["index.docker.io", "registry-1.docker.io", "docker.io"];

/// Canonical registry host for images without an explicit registry
pub const PUBLIC_HUB: &str = "docker.io";

/// Endpoint that actually serves public-hub manifests
const PUBLIC_HUB_ENDPOINT: &str = "https://registry-1.docker.io";

/// A parsed image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry host, `docker.io` when the reference has no explicit one
    pub registry: String,
    /// Repository path, including the implicit `library/` prefix for
    /// bare public-hub references
    pub repository: String,
    /// Tag or digest; `latest` when absent
    pub reference: String,
}

impl ImageReference {
    /// Parse an image reference
    ///
    /// Never fails; an empty input yields an empty repository, which the
    /// registry client maps to the default-architecture fallback.
    pub fn parse(image: &str) -> Self {
        if image.is_empty() {
            return Self {
                registry: PUBLIC_HUB.to_string(),
                repository: String::new(),
                reference: "latest".to_string(),
            };
        }

        // A digest binds tighter than a tag
        let (remainder, reference) = match image.split_once('@') {
            Some((name, digest)) => (name, digest.to_string()),
            None => match split_tag(image) {
                Some((name, tag)) => (name, tag.to_string()),
                None => (image, "latest".to_string()),
            },
        };

        let (registry, repository) = match remainder.split_once('/') {
            Some((first, rest)) if first.contains('.') || first.contains(':') => {
                (first.to_string(), rest.to_string())
            }
            _ => {
                let repository = if remainder.contains('/') {
                    remainder.to_string()
                } else {
                    format!("library/{remainder}")
                };
                (PUBLIC_HUB.to_string(), repository)
            }
        };

        Self {
            registry,
            repository,
            reference,
        }
    }

    /// Whether this reference points at the public hub
    pub fn is_public_hub(&self) -> bool {
        PUBLIC_HUB_HOSTS.contains(&self.registry.as_str())
    }

    /// Base URL of the registry serving this reference
    pub fn registry_endpoint(&self) -> String {
        if self.is_public_hub() {
            PUBLIC_HUB_ENDPOINT.to_string()
        } else {
            format!("https://{}", self.registry)
        }
    }

    /// Path of the manifest endpoint for this reference, relative to the
    /// registry base URL
    pub fn manifest_path(&self) -> String {
        format!("/v2/{}/manifests/{}", self.repository, self.reference)
    }
}

/// Split a trailing `:tag`, ignoring colons that belong to a registry port
fn split_tag(image: &str) -> Option<(&str, &str)> {
    let colon = image.rfind(':')?;
    // A colon before the last path separator is a port, not a tag
    if image[colon..].contains('/') {
        return None;
    }
    Some((&image[..colon], &image[colon + 1..]))
}
