//! Metrics for mutation and cache observability
//!
//! Provides OpenTelemetry metrics for:
//! - Pod mutations (count and duration, by image and architecture)
//! - Architecture cache hits and misses (by image)
//!
//! Image label values pass through [`sanitize_label`] before recording.
//! The sanitizer bounds per-label cardinality but cannot prevent growth
//! across distinct images; dashboards should aggregate accordingly.

use std::time::Duration;

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

/// Global meter for archgate metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("archgate"));

/// Maximum length of a sanitized label value
const MAX_LABEL_LEN: usize = 100;

/// Counter of pod mutations
///
/// Labels:
/// - `image`: sanitized first image reference
/// - `architecture`: selected architecture
/// - `success`: whether a patch was produced
pub static MUTATIONS_TOTAL: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("archgate_mutations_total")
        .with_description("Total number of pod mutations performed")
        .with_unit("{mutations}")
        .build()
});

/// Histogram of mutation duration
///
/// Labels:
/// - `image`: sanitized first image reference
/// - `architecture`: selected architecture
pub static MUTATION_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("archgate_mutation_duration_seconds")
        .with_description("Duration of pod mutations in seconds")
        .with_unit("s")
        .with_boundaries(vec![0.001, 0.01, 0.1, 1.0, 5.0, 10.0])
        .build()
});

/// Counter of architecture cache hits
///
/// Labels:
/// - `image`: sanitized image reference
pub static CACHE_HITS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("archgate_cache_hits_total")
        .with_description("Total number of architecture cache hits")
        .with_unit("{hits}")
        .build()
});

/// Counter of architecture cache misses
///
/// Labels:
/// - `image`: sanitized image reference
pub static CACHE_MISSES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("archgate_cache_misses_total")
        .with_description("Total number of architecture cache misses")
        .with_unit("{misses}")
        .build()
});

/// Record a pod mutation with its duration
pub fn record_mutation(image: &str, architecture: &str, success: bool, duration: Duration) {
    let image = sanitize_label(image);

    MUTATIONS_TOTAL.add(
        1,
        &[
            KeyValue::new("image", image.clone()),
            KeyValue::new("architecture", architecture.to_string()),
            KeyValue::new("success", success.to_string()),
        ],
    );

    MUTATION_DURATION.record(
        duration.as_secs_f64(),
        &[
            KeyValue::new("image", image),
            KeyValue::new("architecture", architecture.to_string()),
        ],
    );
}

/// Record an architecture cache hit
pub fn record_cache_hit(image: &str) {
    CACHE_HITS.add(1, &[KeyValue::new("image", sanitize_label(image))]);
}

/// Record an architecture cache miss
pub fn record_cache_miss(image: &str) {
    CACHE_MISSES.add(1, &[KeyValue::new("image", sanitize_label(image))]);
}

/// Sanitize a label value for metric recording
///
/// Replaces every character outside `[A-Za-z0-9_]` with `_`, truncates to
/// 100 characters, collapses runs of `_`, trims leading/trailing `_`, and
/// falls back to `unknown` when nothing remains.
pub fn sanitize_label(label: &str) -> String {
    let mut sanitized: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    sanitized.truncate(MAX_LABEL_LEN);

    let mut collapsed = String::with_capacity(sanitized.len());
    let mut last_was_underscore = false;
    for c in sanitized.chars() {
        if c == '_' {
            if !last_was_underscore {
                collapsed.push(c);
            }
            last_was_underscore = true;
        } else {
            collapsed.push(c);
            last_was_underscore = false;
        }
    }

    let trimmed = collapsed.trim_matches('_');
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_invalid_characters() {
        assert_eq!(sanitize_label("nginx:latest"), "nginx_latest");
        assert_eq!(
            sanitize_label("ghcr.io/acme/api:v2"),
            "ghcr_io_acme_api_v2"
        );
    }

    #[test]
    fn test_sanitize_collapses_underscore_runs() {
        assert_eq!(sanitize_label("a//b::c"), "a_b_c");
        assert_eq!(sanitize_label("a___b"), "a_b");
    }

    #[test]
    fn test_sanitize_trims_edge_underscores() {
        assert_eq!(sanitize_label("/nginx/"), "nginx");
        assert_eq!(sanitize_label("__nginx__"), "nginx");
    }

    #[test]
    fn test_sanitize_empty_yields_unknown() {
        assert_eq!(sanitize_label(""), "unknown");
        assert_eq!(sanitize_label("///"), "unknown");
        assert_eq!(sanitize_label("___"), "unknown");
    }

    #[test]
    fn test_sanitize_truncates_to_limit() {
        let long = "a".repeat(500);
        assert_eq!(sanitize_label(&long).len(), 100);
    }

    /// Property check over a grab bag of inputs: output only contains
    /// `[A-Za-z0-9_]`, has no `__` run, no edge underscores, and fits the
    /// length cap.
    #[test]
    fn test_sanitize_output_properties() {
        let inputs = [
            "nginx",
            "nginx:latest",
            "REGISTRY.example.COM:5000/team/app@sha256:deadbeef",
            "::::",
            "",
            "ünïcödé/ïmage",
            &"x:".repeat(300),
        ];

        for input in inputs {
            let out = sanitize_label(input);
            assert!(
                out.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
                "invalid char in {out:?}"
            );
            assert!(!out.contains("__"), "underscore run in {out:?}");
            assert!(!out.starts_with('_') && !out.ends_with('_'));
            assert!(out.len() <= 100);
            assert!(!out.is_empty());
        }
    }

    #[test]
    fn test_record_helpers_do_not_panic() {
        // No SDK is installed in tests; the global meter is a no-op, which
        // is exactly what we want to exercise here.
        record_mutation("nginx:latest", "amd64", true, Duration::from_millis(3));
        record_mutation("", "arm64", false, Duration::from_secs(1));
        record_cache_hit("nginx");
        record_cache_miss("ghcr.io/acme/api");
    }
}
