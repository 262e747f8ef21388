// Copyright 2026 Seatclaim Contributors
// SPDX-License-Identifier: Apache-2.0

//! Resource resolver: map a seat descriptor onto a catalog entity.
//!
//! Seat labels on the platform are inconsistently formatted (a bare `171`
//! in one place, `6-171` in another), so matching is layered:
//!
//! 1. explicit entity id
//! 2. exact normalized label (display name, bare label, prefixed label)
//! 3. `-<label>` suffix
//!
//! First hit wins.

use crate::catalog::Catalog;
use crate::error::{ClaimError, ClaimResult};
use crate::types::{Entity, ResourceDescriptor};
use std::collections::HashSet;

/// Prefix the platform puts in front of bare seat numbers (floor code).
pub const DEFAULT_LABEL_PREFIX: &str = "6-";

fn normalize(label: &str) -> String {
    label.trim().to_lowercase()
}

/// Normalized labels acceptable for `descriptor`.
pub fn acceptable_labels(descriptor: &ResourceDescriptor, prefix: &str) -> HashSet<String> {
    let mut labels = HashSet::new();
    if let Some(name) = descriptor.display_name.as_deref() {
        labels.insert(normalize(name));
    }
    let label = descriptor.label.trim();
    if !label.is_empty() {
        labels.insert(normalize(label));
        labels.insert(normalize(&format!("{prefix}{label}")));
    }
    labels
}

/// Whether the descriptor can be resolved without looking at the catalog.
pub fn needs_catalog(descriptor: &ResourceDescriptor) -> bool {
    descriptor.entity_id.is_none()
}

/// Resolve `descriptor` against `catalog`.
///
/// An explicit entity id is trusted even when absent from the catalog; the
/// booking call itself will reject it if it does not exist.
pub fn resolve(
    catalog: &Catalog,
    descriptor: &ResourceDescriptor,
    prefix: &str,
) -> ClaimResult<Entity> {
    let label = descriptor.label.trim();

    if let Some(id) = descriptor.entity_id {
        if let Some(found) = catalog.get(id) {
            return Ok(found.clone());
        }
        let name = descriptor
            .display_name
            .clone()
            .or_else(|| (!label.is_empty()).then(|| format!("{prefix}{label}")))
            .unwrap_or_else(|| "UNKNOWN".to_string());
        tracing::debug!(id, name = %name, "entity id not in catalog; using it unvalidated");
        return Ok(Entity::new(id, name));
    }

    let wanted = acceptable_labels(descriptor, prefix);
    if let Some(found) = catalog
        .iter()
        .find(|e| wanted.contains(&normalize(&e.display_name)))
    {
        return Ok(found.clone());
    }

    if !label.is_empty() {
        let suffix = format!("-{}", normalize(label));
        if let Some(found) = catalog
            .iter()
            .find(|e| normalize(&e.display_name).ends_with(&suffix))
        {
            return Ok(found.clone());
        }
    }

    Err(ClaimError::Resolution {
        label: descriptor
            .display_name
            .clone()
            .filter(|_| label.is_empty())
            .unwrap_or_else(|| label.to_string()),
        catalog_size: catalog.len(),
    })
}
