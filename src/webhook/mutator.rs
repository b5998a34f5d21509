//! Pod mutation
//!
//! Decides whether an admission request needs a node-selector patch and
//! builds it. Every internal failure collapses to "no change": the mutator
//! never raises, and only the `intersect-strict` strategy can ask for a
//! denial.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use json_patch::{AddOperation, Patch, PatchOperation};
use jsonptr::PointerBuf;
use k8s_openapi::api::core::v1::Pod;
use kube::core::admission::AdmissionRequest;
use kube::core::DynamicObject;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::Error;
use crate::metrics;
use crate::resolver::ArchResolver;
use crate::ARCH_LABEL;

/// How the mutator selects an architecture when a pod references several
/// images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Pin to the preferred architecture of the first image; always fail
    /// open
    #[default]
    FirstImagePreferred,
    /// Intersect the architecture sets of all images; pin only when the
    /// intersection is a singleton, fail open otherwise
    IntersectLenient,
    /// Like `IntersectLenient`, but deny the admission when the images
    /// share no architecture
    IntersectStrict,
}

impl Strategy {
    /// Configuration token for this strategy
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstImagePreferred => "first-image-preferred",
            Self::IntersectLenient => "intersect-lenient",
            Self::IntersectStrict => "intersect-strict",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first-image-preferred" => Ok(Self::FirstImagePreferred),
            "intersect-lenient" => Ok(Self::IntersectLenient),
            "intersect-strict" => Ok(Self::IntersectStrict),
            other => Err(Error::config(format!(
                "unknown mutation strategy: {other}"
            ))),
        }
    }
}

/// Result of processing one admission request
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// Apply this patch and allow
    Patch(Patch),
    /// Allow without modification
    Unchanged,
    /// Reject the admission (intersect-strict only)
    Deny(String),
}

/// Computes node-selector patches for pod admission requests
pub struct Mutator {
    resolver: ArchResolver,
    strategy: Strategy,
}

impl Mutator {
    /// Create a mutator using `resolver` for architecture lookups
    pub fn new(resolver: ArchResolver, strategy: Strategy) -> Self {
        Self { resolver, strategy }
    }

    /// Process an admission request
    ///
    /// Short-circuits to [`MutationOutcome::Unchanged`] when the object is
    /// not a decodable pod, the pod already pins an architecture, or it
    /// references no images.
    pub async fn mutate(&self, request: &AdmissionRequest<DynamicObject>) -> MutationOutcome {
        let start = Instant::now();

        let Some(object) = &request.object else {
            debug!(uid = %request.uid, "no object in admission request");
            return MutationOutcome::Unchanged;
        };

        let pod: Pod = match serde_json::to_value(object).and_then(serde_json::from_value) {
            Ok(pod) => pod,
            Err(e) => {
                debug!(uid = %request.uid, error = %e, "object is not a decodable pod");
                return MutationOutcome::Unchanged;
            }
        };

        if has_arch_selector(&pod) {
            debug!(uid = %request.uid, "pod already pins an architecture");
            return MutationOutcome::Unchanged;
        }

        let images = collect_images(&pod);
        if images.is_empty() {
            return MutationOutcome::Unchanged;
        }

        match self.strategy {
            Strategy::FirstImagePreferred => {
                let arch = self.resolver.detect(&pod, &images[0]).await;
                let patch = node_selector_patch(&pod, &arch);

                info!(
                    uid = %request.uid,
                    image = %images[0],
                    architecture = %arch,
                    "pinning pod architecture"
                );
                metrics::record_mutation(&images[0], &arch, !patch.0.is_empty(), start.elapsed());
                MutationOutcome::Patch(patch)
            }
            Strategy::IntersectLenient | Strategy::IntersectStrict => {
                self.mutate_by_intersection(&pod, &images, start).await
            }
        }
    }

    /// Intersect architecture sets across every referenced image,
    /// preserving the first image's preference order
    async fn mutate_by_intersection(
        &self,
        pod: &Pod,
        images: &[String],
        start: Instant,
    ) -> MutationOutcome {
        let strict = self.strategy == Strategy::IntersectStrict;
        let mut common: Option<Vec<String>> = None;

        for image in images {
            let Some(architectures) = self.resolver.supported(pod, image).await else {
                return if strict {
                    MutationOutcome::Deny(format!(
                        "failed to resolve architectures for image {image}"
                    ))
                } else {
                    MutationOutcome::Unchanged
                };
            };

            common = Some(match common {
                None => architectures,
                Some(prev) => prev
                    .into_iter()
                    .filter(|arch| architectures.contains(arch))
                    .collect(),
            });
        }

        let common = common.unwrap_or_default();
        match common.as_slice() {
            [] => {
                if strict {
                    MutationOutcome::Deny(
                        "images share no common supported architecture".to_string(),
                    )
                } else {
                    debug!("images share no common architecture, leaving pod unchanged");
                    MutationOutcome::Unchanged
                }
            }
            [arch] => {
                let patch = node_selector_patch(pod, arch);
                metrics::record_mutation(&images[0], arch, true, start.elapsed());
                MutationOutcome::Patch(patch)
            }
            _ => {
                debug!(common = ?common, "multiple common architectures, scheduler decides");
                MutationOutcome::Unchanged
            }
        }
    }
}

/// Whether the pod already carries the architecture node-selector key
fn has_arch_selector(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.node_selector.as_ref())
        .is_some_and(|selector| selector.contains_key(ARCH_LABEL))
}

/// Image references from main containers then init containers, skipping
/// blanks
fn collect_images(pod: &Pod) -> Vec<String> {
    let Some(spec) = &pod.spec else {
        return Vec::new();
    };

    let mut images: Vec<String> = Vec::new();
    for container in &spec.containers {
        if let Some(image) = container.image.as_deref().filter(|i| !i.is_empty()) {
            images.push(image.to_string());
        }
    }
    if let Some(init_containers) = &spec.init_containers {
        for container in init_containers {
            if let Some(image) = container.image.as_deref().filter(|i| !i.is_empty()) {
                images.push(image.to_string());
            }
        }
    }
    images
}

/// Build the patch that pins `pod` to `arch`
///
/// Adds the whole node-selector map when the pod has none, otherwise adds
/// just the architecture key to the existing map. Existing selector pairs
/// are untouched either way.
fn node_selector_patch(pod: &Pod, arch: &str) -> Patch {
    let has_selector = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.node_selector.as_ref())
        .is_some();

    let op = if has_selector {
        PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(["spec", "nodeSelector", ARCH_LABEL]),
            value: Value::String(arch.to_string()),
        })
    } else {
        let mut selector = serde_json::Map::new();
        selector.insert(ARCH_LABEL.to_string(), Value::String(arch.to_string()));
        PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(["spec", "nodeSelector"]),
            value: Value::Object(selector),
        })
    };

    Patch(vec![op])
}
