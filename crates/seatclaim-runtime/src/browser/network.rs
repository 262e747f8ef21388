// Copyright 2026 Seatclaim Contributors
// SPDX-License-Identifier: Apache-2.0

//! Pumps page network traffic onto the event bus as [`NetworkEvent`]s.
//!
//! Every request is forwarded. Response bodies are only fetched for URLs
//! matching one of the watched fragments, after loading has finished.
//! Response, finish and failure events are handled by one task, so their
//! relative order cannot be lost between tasks.

use anyhow::{Context, Result};
use base64::Engine;
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
    GetResponseBodyParams, RequestId, ResourceType, SetBlockedUrLsParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{EventConsoleApiCalled, EventExceptionThrown};
use chromiumoxide::page::Page;
use futures::StreamExt;
use seatclaim::{NetworkEvent, ResourceKind};
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// URL patterns blocked when asset blocking is on.
pub const BLOCKED_ASSET_PATTERNS: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.svg", "*.webp", "*.ico", "*.woff", "*.woff2",
    "*.ttf", "*.otf", "*.mp4", "*google-analytics.com*", "*googletagmanager.com*",
    "*hotjar.com*",
];

pub fn resource_kind(rt: Option<&ResourceType>) -> ResourceKind {
    match rt {
        Some(ResourceType::Document) => ResourceKind::Document,
        Some(ResourceType::Xhr) => ResourceKind::Xhr,
        Some(ResourceType::Fetch) => ResourceKind::Fetch,
        Some(ResourceType::Script) => ResourceKind::Script,
        Some(ResourceType::Stylesheet) => ResourceKind::Stylesheet,
        Some(ResourceType::Image) => ResourceKind::Image,
        Some(ResourceType::Font) => ResourceKind::Font,
        Some(ResourceType::Media) => ResourceKind::Media,
        _ => ResourceKind::Other,
    }
}

/// Flatten a CDP headers object into name/value pairs. Non-string values are skipped.
pub fn header_pairs(headers: &serde_json::Value) -> Vec<(String, String)> {
    headers
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

pub fn decode_body(body: String, base64_encoded: bool) -> String {
    if !base64_encoded {
        return body;
    }
    match base64::engine::general_purpose::STANDARD.decode(body.as_bytes()) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            warn!(error = %e, "undecodable response body");
            String::new()
        }
    }
}

/// Finish events remembered while their response has not been seen yet.
const MAX_EARLY_FINISHED: usize = 512;

/// A watched response whose body is ready to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyFetch<K> {
    pub id: K,
    pub url: String,
    pub status: u16,
}

/// Pairs watched responses with their loading-finished events.
///
/// A body can be fetched once both have been seen, in either order.
/// Failed loads drop their entry. Finish events without a response are
/// kept for a bounded number of requests, since most belong to unwatched
/// traffic.
#[derive(Debug)]
pub struct PendingBodies<K> {
    waiting: HashMap<K, (String, u16)>,
    finished: HashSet<K>,
    finished_order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone> Default for PendingBodies<K> {
    fn default() -> Self {
        Self {
            waiting: HashMap::new(),
            finished: HashSet::new(),
            finished_order: VecDeque::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> PendingBodies<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A watched response arrived.
    pub fn on_response(&mut self, id: K, url: String, status: u16) -> Option<BodyFetch<K>> {
        if self.finished.remove(&id) {
            self.finished_order.retain(|k| k != &id);
            return Some(BodyFetch { id, url, status });
        }
        self.waiting.insert(id, (url, status));
        None
    }

    /// Loading finished for `id`, watched or not.
    pub fn on_finished(&mut self, id: K) -> Option<BodyFetch<K>> {
        if let Some((url, status)) = self.waiting.remove(&id) {
            return Some(BodyFetch { id, url, status });
        }
        if self.finished.insert(id.clone()) {
            self.finished_order.push_back(id);
            if self.finished_order.len() > MAX_EARLY_FINISHED {
                if let Some(oldest) = self.finished_order.pop_front() {
                    self.finished.remove(&oldest);
                }
            }
        }
        None
    }

    /// Loading failed for `id`. Returns whether a watched response was dropped.
    pub fn on_failed(&mut self, id: &K) -> bool {
        if self.finished.remove(id) {
            self.finished_order.retain(|k| k != id);
        }
        self.waiting.remove(id).is_some()
    }

    /// Watched responses still waiting for their body.
    pub fn waiting(&self) -> usize {
        self.waiting.len()
    }
}

/// Block images, fonts and trackers for this page.
pub async fn block_assets(page: &Page) -> Result<()> {
    let patterns = BLOCKED_ASSET_PATTERNS.iter().map(|s| s.to_string()).collect();
    page.execute(SetBlockedUrLsParams::new(patterns))
        .await
        .context("failed to set blocked URLs")?;
    Ok(())
}

/// Handles for the capture tasks. Dropping them does not stop capture; call [`Capture::stop`].
pub struct Capture {
    tasks: Vec<JoinHandle<()>>,
}

impl Capture {
    pub fn stop(self) {
        for t in self.tasks {
            t.abort();
        }
    }
}

/// Start forwarding `page` traffic into `sender`.
///
/// `watch` lists URL fragments whose response bodies are wanted.
pub async fn start_capture(
    page: &Page,
    sender: broadcast::Sender<NetworkEvent>,
    watch: Vec<String>,
) -> Result<Capture> {
    let mut requests = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .context("failed to listen for requests")?;
    let mut responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .context("failed to listen for responses")?;
    let mut finished = page
        .event_listener::<EventLoadingFinished>()
        .await
        .context("failed to listen for loading-finished")?;
    let mut failed = page
        .event_listener::<EventLoadingFailed>()
        .await
        .context("failed to listen for loading-failed")?;
    let mut console = page
        .event_listener::<EventConsoleApiCalled>()
        .await
        .context("failed to listen for console")?;
    let mut exceptions = page
        .event_listener::<EventExceptionThrown>()
        .await
        .context("failed to listen for page errors")?;

    let mut tasks = Vec::new();

    let tx = sender.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(ev) = requests.next().await {
            let event = NetworkEvent::Request {
                url: ev.request.url.clone(),
                method: ev.request.method.clone(),
                resource_kind: resource_kind(ev.r#type.as_ref()),
                headers: header_pairs(ev.request.headers.inner()),
            };
            // No receivers just means nobody is listening yet.
            let _ = tx.send(event);
        }
    }));

    let fetch_page = page.clone();
    let body_tx = sender.clone();
    tasks.push(tokio::spawn(async move {
        let mut pending = PendingBodies::<RequestId>::new();
        loop {
            // Responses first, so a response and its finish queued together pair directly.
            let ready = tokio::select! {
                biased;
                Some(ev) = responses.next() => {
                    let url = &ev.response.url;
                    if watch.iter().any(|w| url.contains(w.as_str())) {
                        let status = u16::try_from(ev.response.status).unwrap_or(0);
                        pending.on_response(ev.request_id.clone(), url.clone(), status)
                    } else {
                        None
                    }
                }
                Some(ev) = finished.next() => pending.on_finished(ev.request_id.clone()),
                Some(ev) = failed.next() => {
                    if pending.on_failed(&ev.request_id) {
                        debug!(error = %ev.error_text, "watched request failed");
                    }
                    None
                }
                else => break,
            };
            if let Some(fetch) = ready {
                tokio::spawn(fetch_body(fetch_page.clone(), body_tx.clone(), fetch));
            }
        }
    }));

    tasks.push(tokio::spawn(async move {
        while let Some(ev) = console.next().await {
            let text: Vec<String> = ev
                .args
                .iter()
                .filter_map(|a| a.value.as_ref())
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            debug!(target: "seatclaim::page", kind = ?ev.r#type, "{}", text.join(" "));
        }
    }));

    tasks.push(tokio::spawn(async move {
        while let Some(ev) = exceptions.next().await {
            let details = &ev.exception_details;
            debug!(
                target: "seatclaim::page",
                line = details.line_number,
                "page error: {}",
                details.text
            );
        }
    }));

    Ok(Capture { tasks })
}

async fn fetch_body(
    page: Page,
    sender: broadcast::Sender<NetworkEvent>,
    fetch: BodyFetch<RequestId>,
) {
    let BodyFetch { id, url, status } = fetch;
    match page.execute(GetResponseBodyParams::new(id)).await {
        Ok(resp) => {
            let body = decode_body(resp.result.body.clone(), resp.result.base64_encoded);
            debug!(url = %url, status, bytes = body.len(), "captured response body");
            let _ = sender.send(NetworkEvent::Response { url, status, body });
        }
        Err(e) => warn!(url = %url, error = %e, "failed to read response body"),
    }
}
