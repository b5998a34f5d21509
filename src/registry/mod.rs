//! Container registry access
//!
//! [`client`] fetches manifest lists over HTTPS with registry status-code
//! semantics; [`manifest`] decodes a manifest-list document into the set of
//! architectures it covers.

pub mod client;
pub mod manifest;

pub use client::RegistryClient;

/// Accept header value requesting a manifest list
pub const MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
