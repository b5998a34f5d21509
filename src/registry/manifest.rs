//! Manifest-list decoding
//!
//! Extracts the architectures a multi-arch image supports from a registry
//! manifest-list document. Only the platform records are read; referenced
//! per-platform manifests are never followed.

use serde::Deserialize;

use crate::error::Error;
use crate::Result;

/// Schema version this decoder understands
const SUPPORTED_SCHEMA_VERSION: i64 = 2;

/// Wire format of a manifest list
///
/// Fields beyond the platform architecture are ignored; documents with tens
/// of thousands of entries decode in one pass without retaining anything
/// but the architecture strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestList {
    #[serde(default)]
    schema_version: i64,
    #[serde(default)]
    manifests: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    #[serde(default)]
    platform: Option<Platform>,
}

#[derive(Debug, Deserialize)]
struct Platform {
    #[serde(default)]
    architecture: String,
}

/// Decode a manifest-list document into its architectures
///
/// The result preserves first-occurrence order and contains no duplicates.
/// Entries with a blank architecture are skipped; a document where every
/// entry is blank is an error rather than an empty list.
pub fn parse_architectures(data: &[u8]) -> Result<Vec<String>> {
    if data.is_empty() {
        return Err(Error::malformed_manifest("manifest data is empty"));
    }

    // The literal `null` decodes into defaults, so check the bytes first
    if data == b"null" {
        return Err(Error::NullManifest);
    }

    let manifest: ManifestList = serde_json::from_slice(data)
        .map_err(|e| Error::malformed_manifest(format!("failed to parse manifest: {e}")))?;

    if manifest.schema_version == 0 {
        return Err(Error::MissingSchemaVersion);
    }
    if manifest.schema_version != SUPPORTED_SCHEMA_VERSION {
        return Err(Error::UnsupportedSchemaVersion {
            version: manifest.schema_version,
        });
    }
    if manifest.manifests.is_empty() {
        return Err(Error::NoManifests);
    }

    let mut architectures: Vec<String> = Vec::new();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut any_platform = false;

    for entry in manifest.manifests {
        let Some(platform) = entry.platform else {
            continue;
        };
        if platform.architecture.is_empty() {
            continue;
        }
        any_platform = true;
        if seen.insert(platform.architecture.clone()) {
            architectures.push(platform.architecture);
        }
    }

    if !any_platform {
        return Err(Error::NoValidPlatforms);
    }
    if architectures.is_empty() {
        return Err(Error::NoValidArchitectures);
    }

    Ok(architectures)
}
