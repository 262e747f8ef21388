// Copyright 2026 Seatclaim Contributors
// SPDX-License-Identifier: Apache-2.0

//! Context harvester: passive observer of a live session's traffic.
//!
//! Accumulates three things while the interactive session runs:
//!
//! - API request headers (auth tokens, tenant ids) from XHR/fetch calls under
//!   the platform's API prefix, minus transport-only headers. Later values
//!   for the same header overwrite earlier ones.
//! - The acting user's id from the profile response. First capture wins.
//! - The seat catalog from availability map responses, merged by id.
//!
//! State is merge-only and never cleared. Readers either take a snapshot or
//! wait (with a timeout) for a value to appear.

use crate::catalog::{extract_entities, extract_user_id, unwrap_map_payload, Catalog};
use crate::error::{ClaimError, ClaimResult};
use crate::events::{event_matches_path, NetworkEvent};
use crate::types::UserId;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Headers that describe the transport or body framing of one particular
/// request and must never be replayed on another.
pub const HEADER_DENYLIST: &[&str] = &[
    "content-length",
    "host",
    "connection",
    "accept-encoding",
    "content-type",
    "accept",
];

/// URL fragments selecting which traffic the harvester looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestFilters {
    /// Requests under this prefix contribute headers.
    pub request_path_prefix: String,
    /// Responses from this endpoint carry the user id.
    pub identity_path: String,
    /// Responses from this endpoint carry the seat catalog.
    pub catalog_path: String,
}

impl Default for HarvestFilters {
    fn default() -> Self {
        Self {
            request_path_prefix: "/amenitybooking/".to_string(),
            identity_path: "/ems/user/myProfile".to_string(),
            catalog_path: "/amenitybooking/entity/availabilityMapViewForListOfDaysOptimized"
                .to_string(),
        }
    }
}

/// Lower-case header names and drop everything on the denylist.
pub fn sanitize_headers<'a, I>(headers: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    headers
        .into_iter()
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.to_string()))
        .filter(|(k, _)| !k.is_empty() && !HEADER_DENYLIST.contains(&k.as_str()))
        .collect()
}

/// Authorization material needed to call the API on the session's behalf.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    headers: BTreeMap<String, String>,
    identity: Option<UserId>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Harvested headers, keyed by lower-case name.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    pub fn identity(&self) -> Option<UserId> {
        self.identity
    }

    /// Sanitize and merge headers, last value wins. Returns how many were kept.
    pub fn merge_headers<'a, I>(&mut self, headers: I) -> usize
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let clean = sanitize_headers(headers);
        let kept = clean.len();
        self.headers.extend(clean);
        kept
    }

    /// Record the user id unless one is already present.
    pub fn set_identity(&mut self, id: UserId) -> bool {
        if self.identity.is_some() {
            return false;
        }
        self.identity = Some(id);
        true
    }

    pub fn with_identity(mut self, id: UserId) -> Self {
        self.set_identity(id);
        self
    }
}

#[derive(Default)]
struct HarvestState {
    context: SessionContext,
    catalog: Catalog,
}

/// Passive observer building a [`SessionContext`] and [`Catalog`] from traffic.
pub struct Harvester {
    filters: HarvestFilters,
    state: Mutex<HarvestState>,
    changed: Notify,
}

impl Harvester {
    pub fn new(filters: HarvestFilters) -> Self {
        Self {
            filters,
            state: Mutex::new(HarvestState::default()),
            changed: Notify::new(),
        }
    }

    pub fn filters(&self) -> &HarvestFilters {
        &self.filters
    }

    fn state(&self) -> MutexGuard<'_, HarvestState> {
        // Merge-only state stays consistent even if an observer panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Feed one observed event.
    pub fn observe(&self, event: &NetworkEvent) {
        match event {
            NetworkEvent::Request {
                url,
                resource_kind,
                headers,
                ..
            } => {
                if !resource_kind.is_api_call()
                    || !event_matches_path(event, &self.filters.request_path_prefix)
                {
                    return;
                }
                let kept = self.merge_headers(headers.iter().map(|(k, v)| (k.as_str(), v.as_str())));
                if kept > 0 {
                    debug!(url = %url, kept, "captured API headers");
                }
            }
            NetworkEvent::Response { url, status, body } => {
                if event_matches_path(event, &self.filters.catalog_path) {
                    self.observe_catalog(url, body);
                }
                if event_matches_path(event, &self.filters.identity_path)
                    && (200..300).contains(status)
                {
                    self.observe_profile(body);
                }
            }
        }
    }

    fn observe_catalog(&self, url: &str, body: &str) {
        let root: serde_json::Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => {
                debug!(url = %url, "ignoring unparseable map payload: {e}");
                return;
            }
        };
        let entities = extract_entities(unwrap_map_payload(&root));
        if entities.is_empty() {
            return;
        }
        let (added, total) = {
            let mut state = self.state();
            let added = state.catalog.merge(entities);
            (added, state.catalog.len())
        };
        debug!(added, total, "map entities captured");
        self.changed.notify_waiters();
    }

    fn observe_profile(&self, body: &str) {
        let Ok(root) = serde_json::from_str::<serde_json::Value>(body) else {
            debug!("ignoring unparseable profile payload");
            return;
        };
        let Some(id) = extract_user_id(&root) else {
            return;
        };
        let stored = self.state().context.set_identity(id);
        if stored {
            info!(user_id = %id, "captured user id from profile response");
            self.changed.notify_waiters();
        }
    }

    /// Merge headers obtained out of band (e.g. the browser's cookie jar).
    pub fn merge_headers<'a, I>(&self, headers: I) -> usize
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let kept = self.state().context.merge_headers(headers);
        if kept > 0 {
            self.changed.notify_waiters();
        }
        kept
    }

    /// Snapshot of the session context as harvested so far.
    pub fn context(&self) -> SessionContext {
        self.state().context.clone()
    }

    /// Snapshot of the catalog as harvested so far.
    pub fn catalog(&self) -> Catalog {
        self.state().catalog.clone()
    }

    pub fn identity(&self) -> Option<UserId> {
        self.state().context.identity()
    }

    /// Wait until a user id has been captured.
    pub async fn await_identity(&self, timeout: Duration) -> ClaimResult<UserId> {
        self.await_value("captured userId from profile response", timeout, |s| {
            s.context.identity()
        })
        .await
    }

    /// Wait until the catalog holds at least one entity.
    pub async fn await_catalog(&self, timeout: Duration) -> ClaimResult<Catalog> {
        self.await_value("map entities from availability data", timeout, |s| {
            (!s.catalog.is_empty()).then(|| s.catalog.clone())
        })
        .await
    }

    async fn await_value<T, F>(&self, what: &str, timeout: Duration, read: F) -> ClaimResult<T>
    where
        F: Fn(&HarvestState) -> Option<T>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register before reading so a change between read and await is not missed.
            notified.as_mut().enable();

            let found = {
                let state = self.state();
                read(&state)
            };
            if let Some(value) = found {
                return Ok(value);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(ClaimError::Timeout {
                    what: what.to_string(),
                    waited_ms: timeout.as_millis() as u64,
                });
            }
        }
    }

    /// Spawn a task feeding every event from `rx` into [`Harvester::observe`].
    ///
    /// The task ends when the bus is dropped.
    pub fn attach(self: &Arc<Self>, mut rx: broadcast::Receiver<NetworkEvent>) -> JoinHandle<()> {
        let harvester = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => harvester.observe(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "harvester lagged behind session traffic");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for Harvester {
    fn default() -> Self {
        Self::new(HarvestFilters::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventBus, ResourceKind};
    use serde_json::json;

    const BASE: &str = "https://tenant.example.com";

    fn api_request(path: &str, kind: ResourceKind, headers: &[(&str, &str)]) -> NetworkEvent {
        NetworkEvent::Request {
            url: format!("{BASE}{path}"),
            method: "GET".to_string(),
            resource_kind: kind,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn response(path: &str, status: u16, body: serde_json::Value) -> NetworkEvent {
        NetworkEvent::Response {
            url: format!("{BASE}{path}"),
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_denylisted_headers_never_captured() {
        let h = Harvester::default();
        h.observe(&api_request(
            "/amenitybooking/booking/list",
            ResourceKind::Xhr,
            &[
                ("Content-Length", "42"),
                ("Host", "tenant.example.com"),
                ("Accept", "*/*"),
                ("Content-Type", "application/json"),
                ("Authorization", "Bearer abc"),
                ("X-Tenant", "jb"),
            ],
        ));
        let ctx = h.context();
        for denied in HEADER_DENYLIST {
            assert!(!ctx.has_header(denied), "{denied} leaked");
        }
        assert_eq!(ctx.header("authorization"), Some("Bearer abc"));
        assert_eq!(ctx.header("X-TENANT"), Some("jb"));
    }

    #[test]
    fn test_headers_last_observed_wins() {
        let h = Harvester::default();
        let path = "/amenitybooking/x";
        h.observe(&api_request(path, ResourceKind::Fetch, &[("authorization", "old")]));
        h.observe(&api_request(path, ResourceKind::Xhr, &[("Authorization", "new")]));
        assert_eq!(h.context().header("authorization"), Some("new"));
    }

    #[test]
    fn test_requests_outside_filter_ignored() {
        let h = Harvester::default();
        h.observe(&api_request("/ems/other", ResourceKind::Xhr, &[("authorization", "a")]));
        h.observe(&api_request(
            "/amenitybooking/logo.png",
            ResourceKind::Image,
            &[("authorization", "b")],
        ));
        assert!(h.context().headers().is_empty());
    }

    #[test]
    fn test_empty_filter_disables_that_capture() {
        let h = Harvester::new(HarvestFilters {
            catalog_path: String::new(),
            ..HarvestFilters::default()
        });
        let snap = json!({"allEntities": [{"id": 1, "displayName": "6-171"}]});
        h.observe(&response("/anything", 200, snap));
        h.observe(&response("/ems/user/myProfile", 200, json!({"userId": 8})));
        assert!(h.catalog().is_empty());
        assert_eq!(h.identity(), Some(UserId(8)));
    }

    #[test]
    fn test_identity_first_wins_across_shapes() {
        let h = Harvester::default();
        h.observe(&response("/ems/user/myProfile", 200, json!({"response": {"userId": 1262}})));
        h.observe(&response("/ems/user/myProfile", 200, json!({"userId": 9999})));
        assert_eq!(h.identity(), Some(UserId(1262)));
    }

    #[test]
    fn test_identity_skips_unparseable_and_failed_responses() {
        let h = Harvester::default();
        h.observe(&NetworkEvent::Response {
            url: format!("{BASE}/ems/user/myProfile"),
            status: 200,
            body: "<html>".to_string(),
        });
        h.observe(&response("/ems/user/myProfile", 401, json!({"userId": 5})));
        assert_eq!(h.identity(), None);
        h.observe(&response("/ems/user/myProfile", 200, json!({"userId": 7})));
        assert_eq!(h.identity(), Some(UserId(7)));
    }

    #[test]
    fn test_catalog_merges_successive_snapshots() {
        let h = Harvester::default();
        let path = "/amenitybooking/entity/availabilityMapViewForListOfDaysOptimized?d=1";
        let snap = json!({"response": {"value": {"availableEntities": [
            {"id": 1, "displayName": "6-171"}
        ]}}});
        h.observe(&response(path, 200, snap.clone()));
        h.observe(&response(path, 200, snap));
        h.observe(&response(
            path,
            200,
            json!({"response": {"occupiedEntities": [{"id": 2, "displayName": "6-200"}]}}),
        ));
        let catalog = h.catalog();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get(1).unwrap().display_name, "6-171");
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_identity_times_out() {
        let h = Harvester::default();
        let err = h.await_identity(Duration::from_secs(30)).await.unwrap_err();
        assert!(matches!(err, ClaimError::Timeout { waited_ms: 30_000, .. }));
    }

    #[tokio::test]
    async fn test_await_catalog_wakes_on_attached_stream() {
        let h = Arc::new(Harvester::default());
        let bus = EventBus::new(16);
        let _task = h.attach(bus.subscribe());

        let sender = bus.sender();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = sender.send(NetworkEvent::Response {
                url: format!(
                    "{BASE}/amenitybooking/entity/availabilityMapViewForListOfDaysOptimized"
                ),
                status: 200,
                body: json!({"allEntities": [{"id": 3, "displayName": "6-003"}]}).to_string(),
            });
        });

        let catalog = h.await_catalog(Duration::from_secs(5)).await.unwrap();
        assert_eq!(catalog.len(), 1);
    }

    #[tokio::test]
    async fn test_await_returns_immediately_when_present() {
        let h = Harvester::default();
        h.observe(&response("/ems/user/myProfile", 200, json!({"userId": 3})));
        let id = h.await_identity(Duration::from_millis(1)).await.unwrap();
        assert_eq!(id, UserId(3));
    }
}
