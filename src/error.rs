//! Error types for the archgate webhook
//!
//! Registry and manifest errors carry the image reference they were raised
//! for so the fail-open paths can log useful context before falling back to
//! the default architecture.

use thiserror::Error;

/// Main error type for archgate operations
#[derive(Debug, Error)]
pub enum Error {
    /// Manifest body was empty or not a decodable manifest list
    #[error("malformed manifest: {message}")]
    MalformedManifest {
        /// Description of what failed to decode
        message: String,
    },

    /// Manifest document was the JSON literal `null`
    #[error("manifest is null")]
    NullManifest,

    /// Manifest carried no schema version
    #[error("missing schema version")]
    MissingSchemaVersion,

    /// Manifest schema version other than 2
    #[error("unsupported schema version: {version}")]
    UnsupportedSchemaVersion {
        /// The version the registry reported
        version: i64,
    },

    /// Manifest list contained no manifests
    #[error("no manifests found")]
    NoManifests,

    /// Every manifest entry lacked a usable platform record
    #[error("no valid platforms found")]
    NoValidPlatforms,

    /// Platform records existed but every architecture field was blank
    #[error("no valid architectures found")]
    NoValidArchitectures,

    /// Registry replied 429
    #[error("rate limit exceeded for {image}")]
    RateLimited {
        /// Image reference the request was for
        image: String,
    },

    /// Registry replied 403
    #[error("access denied to repository for {image}")]
    AccessDenied {
        /// Image reference the request was for
        image: String,
    },

    /// Registry replied 404
    #[error("image not found: {image}")]
    ImageNotFound {
        /// Image reference the request was for
        image: String,
    },

    /// Registry replied 400
    #[error("registry API version not supported for {image}")]
    UnsupportedApiVersion {
        /// Image reference the request was for
        image: String,
    },

    /// Registry request exceeded the client deadline
    #[error("registry request timed out for {image}")]
    RegistryTimeout {
        /// Image reference the request was for
        image: String,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// HTTP transport error talking to a registry
    #[error("registry transport error: {source}")]
    Transport {
        /// The underlying reqwest error
        #[from]
        source: reqwest::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {source}")]
    Serialization {
        /// The underlying serde error
        #[from]
        source: serde_json::Error,
    },

    /// Invalid or missing configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },
}

impl Error {
    /// Create a malformed-manifest error with the given message
    pub fn malformed_manifest(msg: impl Into<String>) -> Self {
        Self::MalformedManifest {
            message: msg.into(),
        }
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Get the image reference if this error is associated with one
    pub fn image(&self) -> Option<&str> {
        match self {
            Error::RateLimited { image }
            | Error::AccessDenied { image }
            | Error::ImageNotFound { image }
            | Error::UnsupportedApiVersion { image }
            | Error::RegistryTimeout { image } => Some(image),
            _ => None,
        }
    }

    /// Whether this error came from decoding a manifest document
    ///
    /// Registry-side and manifest-side failures are logged differently; both
    /// resolve to the default architecture in the resolver.
    pub fn is_manifest(&self) -> bool {
        matches!(
            self,
            Error::MalformedManifest { .. }
                | Error::NullManifest
                | Error::MissingSchemaVersion
                | Error::UnsupportedSchemaVersion { .. }
                | Error::NoManifests
                | Error::NoValidPlatforms
                | Error::NoValidArchitectures
        )
    }
}
