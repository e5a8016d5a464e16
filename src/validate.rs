// src/validate.rs
// Domain validation beyond schema shape: image references, DNS names, ports.
// All failures are `validation` errors and never reach a tool body.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{KitError, Result};

#[allow(clippy::expect_used)] // static patterns are compile-time known
static IMAGE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    // [registry[:port]/]path/components[:tag][@digest]
    Regex::new(
        r"^(?:[a-z0-9]+(?:[._-][a-z0-9]+)*(?::[0-9]+)?/)?[a-z0-9]+(?:[._-][a-z0-9]+)*(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)*(?::[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127})?(?:@sha256:[a-f0-9]{64})?$",
    )
    .expect("valid regex")
});

#[allow(clippy::expect_used)]
static DNS_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("valid regex"));

/// Validate a container image reference (name, optional registry/tag/digest).
pub fn image_reference(value: &str) -> Result<()> {
    if value.is_empty() || value.len() > 255 || !IMAGE_REFERENCE.is_match(value) {
        return Err(KitError::validation(format!(
            "invalid image reference '{value}'"
        ))
        .with_context("field", "image")
        .with_suggestion("use the form [registry/]name[:tag], lowercase, e.g. ghcr.io/acme/web:1.2.0"));
    }
    Ok(())
}

/// Validate a Kubernetes namespace / app name (DNS-1123 label).
pub fn dns_label(field: &str, value: &str) -> Result<()> {
    if !DNS_LABEL.is_match(value) {
        return Err(KitError::validation(format!(
            "invalid {field} '{value}': must be a lowercase DNS-1123 label"
        ))
        .with_context("field", field));
    }
    Ok(())
}

/// Validate a TCP port list (non-empty values in range, no duplicates).
pub fn ports(values: &[u16]) -> Result<()> {
    for &port in values {
        if port == 0 {
            return Err(KitError::validation("port 0 is not a valid container port")
                .with_context("field", "ports"));
        }
    }
    let mut seen = std::collections::HashSet::new();
    for &port in values {
        if !seen.insert(port) {
            return Err(
                KitError::validation(format!("duplicate port {port}")).with_context("field", "ports")
            );
        }
    }
    Ok(())
}

/// Validate a replica count.
pub fn replicas(value: u32) -> Result<()> {
    if value == 0 || value > 100 {
        return Err(KitError::validation(format!(
            "replicas must be between 1 and 100, got {value}"
        ))
        .with_context("field", "replicas"));
    }
    Ok(())
}
