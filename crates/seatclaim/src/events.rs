// Copyright 2026 Seatclaim Contributors
// SPDX-License-Identifier: Apache-2.0

//! Network event bus: the traffic a live session produces.
//!
//! The session driver publishes every request it sends and every response
//! body it receives as a [`NetworkEvent`] on a `tokio::sync::broadcast`
//! channel. The harvester (and anything else interested, such as a debug
//! tap) subscribes independently. When no subscribers exist, events are
//! silently dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default channel capacity. Map payloads arrive in bursts while the
/// calendar is navigated, so keep generous headroom before lagging.
pub const DEFAULT_CAPACITY: usize = 1024;

/// What kind of resource a request was issued for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Document,
    Xhr,
    Fetch,
    Script,
    Stylesheet,
    Image,
    Font,
    Media,
    Other,
}

impl ResourceKind {
    /// XHR and fetch calls are the only ones carrying API auth headers.
    pub fn is_api_call(self) -> bool {
        matches!(self, ResourceKind::Xhr | ResourceKind::Fetch)
    }
}

/// One observed piece of session traffic.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NetworkEvent {
    /// An outgoing request, with the headers it was sent with.
    Request {
        url: String,
        method: String,
        resource_kind: ResourceKind,
        headers: Vec<(String, String)>,
    },
    /// A completed incoming response, with its decoded body text.
    Response {
        url: String,
        status: u16,
        body: String,
    },
}

impl NetworkEvent {
    pub fn url(&self) -> &str {
        match self {
            NetworkEvent::Request { url, .. } | NetworkEvent::Response { url, .. } => url,
        }
    }
}

/// Broadcast channel carrying [`NetworkEvent`]s from a session to observers.
pub struct EventBus {
    sender: broadcast::Sender<NetworkEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers. Silently ignores if no subscribers.
    pub fn emit(&self, event: NetworkEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.sender.subscribe()
    }

    /// A cloneable handle for publishers living in other tasks.
    pub fn sender(&self) -> broadcast::Sender<NetworkEvent> {
        self.sender.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Whether the event's URL contains `fragment`. An empty fragment matches nothing.
///
/// Matching is on the raw URL string; the platform routes by path and the
/// fragments in use are unambiguous.
pub fn event_matches_path(event: &NetworkEvent, fragment: &str) -> bool {
    !fragment.is_empty() && event.url().contains(fragment)
}
