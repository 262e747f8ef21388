// Copyright 2026 Seatclaim Contributors
// SPDX-License-Identifier: Apache-2.0

//! Seat catalog and payload extraction.
//!
//! The availability map endpoint returns a third-party payload whose shape
//! is not contractually stable. Entities are taken from the known top-level
//! lists first; when none of those yield anything, a bounded iterative scan
//! of the whole value picks up any object with an integer `id` and a string
//! `displayName`.

use crate::types::{Entity, UserId};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Top-level list fields of the availability map payload, in scan order.
pub const KNOWN_ENTITY_LISTS: &[&str] = &[
    "availableEntities",
    "occupiedEntities",
    "occupiedNotCheckedInEntities",
    "socialDistancedEntities",
    "disabledEntities",
    "blockedEntities",
    "allEntities",
];

/// Maximum number of values visited by the generic scan.
pub const MAX_SCAN_STEPS: usize = 8000;

/// All entities observed during a run, keyed by id. Never shrinks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entities: BTreeMap<i64, Entity>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or overwrite entries by id. Returns how many ids were new.
    pub fn merge<I>(&mut self, snapshot: I) -> usize
    where
        I: IntoIterator<Item = Entity>,
    {
        let mut added = 0;
        for entity in snapshot {
            if self.entities.insert(entity.id, entity).is_none() {
                added += 1;
            }
        }
        added
    }

    pub fn get(&self, id: i64) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Entities in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl FromIterator<Entity> for Catalog {
    fn from_iter<I: IntoIterator<Item = Entity>>(iter: I) -> Self {
        let mut catalog = Catalog::new();
        catalog.merge(iter);
        catalog
    }
}

fn as_entity(value: &Value) -> Option<Entity> {
    let obj = value.as_object()?;
    let id = obj.get("id")?.as_i64()?;
    let name = obj.get("displayName")?.as_str()?;
    Some(Entity::new(id, name))
}

/// Pick the map value out of a response envelope.
///
/// Tries `response.value`, `response`, `value`, then the root itself,
/// skipping nulls.
pub fn unwrap_map_payload(root: &Value) -> &Value {
    fn non_null(v: Option<&Value>) -> Option<&Value> {
        v.filter(|v| !v.is_null())
    }
    let response = non_null(root.get("response"));
    non_null(response.and_then(|r| r.get("value")))
        .or(response)
        .or_else(|| non_null(root.get("value")))
        .unwrap_or(root)
}

/// Extract entities from an availability map value, de-duplicated by id.
pub fn extract_entities(value: &Value) -> Vec<Entity> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut add = |entity: Entity, out: &mut Vec<Entity>| {
        if seen.insert(entity.id) {
            out.push(entity);
        }
    };

    if let Some(obj) = value.as_object() {
        for key in KNOWN_ENTITY_LISTS {
            if let Some(Value::Array(items)) = obj.get(*key) {
                for item in items {
                    if let Some(e) = as_entity(item) {
                        add(e, &mut out);
                    }
                }
            }
        }
    }

    if !out.is_empty() {
        return out;
    }

    // Explicit stack, capped: payloads are untrusted and may be huge.
    let mut stack: Vec<&Value> = vec![value];
    let mut steps = 0;
    while let Some(cur) = stack.pop() {
        if steps >= MAX_SCAN_STEPS {
            tracing::debug!(steps, "entity scan step cap reached");
            break;
        }
        steps += 1;
        match cur {
            Value::Array(items) => stack.extend(items.iter().rev()),
            Value::Object(map) => {
                if let Some(e) = as_entity(cur) {
                    add(e, &mut out);
                } else {
                    let values: Vec<&Value> = map.values().collect();
                    stack.extend(values.into_iter().rev());
                }
            }
            _ => {}
        }
    }

    out
}

/// Extract the numeric user id from a profile response.
///
/// Known shapes: `{ "response": { "userId": 1262, ... } }` and
/// `{ "userId": 1262, ... }`. A zero or missing id counts as absent.
pub fn extract_user_id(root: &Value) -> Option<UserId> {
    let from = |v: Option<&Value>| {
        v.and_then(|u| u.get("userId"))
            .and_then(Value::as_i64)
            .filter(|id| *id != 0)
    };
    from(root.get("response"))
        .or_else(|| from(Some(root)))
        .map(UserId)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_from_known_lists() {
        let payload = json!({
            "availableEntities": [
                {"id": 1, "displayName": "6-171", "status": "AVAILABLE"},
                {"id": 2, "displayName": "6-200"}
            ],
            "occupiedEntities": [
                {"id": 3, "displayName": "6-172"},
                {"id": 1, "displayName": "6-171"}
            ],
            "noise": [{"id": 99, "displayName": "ignored when lists hit"}]
        });
        let ids: Vec<i64> = extract_entities(&payload).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_deep_scan_fallback() {
        let payload = json!({
            "floors": [{
                "zones": [{
                    "seats": [
                        {"id": 10, "displayName": "6-010"},
                        {"id": "11", "displayName": "string id skipped"},
                        {"id": 12, "displayName": 12}
                    ]
                }],
                "meta": {"id": 500, "displayName": "Floor 6"}
            }]
        });
        let entities = extract_entities(&payload);
        let ids: Vec<i64> = entities.iter().map(|e| e.id).collect();
        assert!(ids.contains(&10));
        assert!(ids.contains(&500));
        assert!(!ids.contains(&11));
        assert!(!ids.contains(&12));
    }

    #[test]
    fn test_deep_scan_is_bounded() {
        // A wide payload far beyond the step cap must terminate quickly and
        // only return what was reachable within the cap.
        let seats: Vec<Value> = (0..20_000)
            .map(|i| json!({"wrapper": {"id": i, "displayName": format!("S-{i}")}}))
            .collect();
        let payload = json!({ "rows": seats });
        let found = extract_entities(&payload);
        assert!(!found.is_empty());
        assert!(found.len() < MAX_SCAN_STEPS);
    }

    #[test]
    fn test_unwrap_map_payload_envelopes() {
        let inner = json!({"availableEntities": []});
        assert_eq!(unwrap_map_payload(&json!({"response": {"value": inner}})), &inner);
        assert_eq!(unwrap_map_payload(&json!({"response": inner})), &inner);
        assert_eq!(unwrap_map_payload(&json!({"response": null, "value": inner})), &inner);
        let bare = json!({"allEntities": []});
        assert_eq!(unwrap_map_payload(&bare), &bare);
    }

    #[test]
    fn test_unwrap_map_payload_skips_null_inner_value() {
        let inner = json!({"entityInfos": []});
        let root = json!({"response": {"value": null, "entityInfos": []}});
        assert_eq!(unwrap_map_payload(&root), &root["response"]);
        assert_eq!(unwrap_map_payload(&root)["entityInfos"], inner["entityInfos"]);
        let all_null = json!({"response": null, "value": null});
        assert_eq!(unwrap_map_payload(&all_null), &all_null);
    }

    #[test]
    fn test_catalog_merge_is_idempotent_and_monotonic() {
        let snapshot = vec![Entity::new(1, "6-171"), Entity::new(2, "6-200")];
        let mut once = Catalog::new();
        assert_eq!(once.merge(snapshot.clone()), 2);

        let mut twice = Catalog::new();
        twice.merge(snapshot.clone());
        assert_eq!(twice.merge(snapshot), 0);
        assert_eq!(once, twice);

        // A later, smaller snapshot never removes ids; same id overwrites.
        twice.merge(vec![Entity::new(2, "6-200A")]);
        assert_eq!(twice.len(), 2);
        assert_eq!(twice.get(2).unwrap().display_name, "6-200A");
        assert!(twice.get(1).is_some());
    }

    #[test]
    fn test_extract_user_id_shapes() {
        assert_eq!(
            extract_user_id(&json!({"response": {"userId": 1262, "name": "x"}})),
            Some(UserId(1262))
        );
        assert_eq!(extract_user_id(&json!({"userId": 77})), Some(UserId(77)));
        assert_eq!(extract_user_id(&json!({"response": {"userId": 0}})), None);
        assert_eq!(extract_user_id(&json!({"status": "ok"})), None);
    }
}
