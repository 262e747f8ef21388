// Copyright 2026 Seatclaim Contributors
// SPDX-License-Identifier: Apache-2.0

//! Acquisition executor: replay the booking API call with harvested context.
//!
//! Builds the single-seat booking request, applies the session's headers,
//! sends it, and classifies the response as success, contention (someone
//! else got the seat first) or any other failure.
//!
//! Contention detection is a heuristic: the platform does not return a
//! dedicated error code, only a message. The phrase list is therefore a
//! [`ContentionPolicy`] value the caller can replace.

use crate::error::{ClaimError, ClaimResult};
use crate::harvester::SessionContext;
use crate::types::{AcquisitionWindow, AttemptOutcome, Entity, UserId};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, ORIGIN, REFERER};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Maximum characters of a response body kept in failure reports.
pub const EXCERPT_LIMIT: usize = 1600;

/// Phrases the platform uses when a seat was claimed concurrently.
pub const DEFAULT_CONTENTION_PHRASES: &[&str] = &[
    "already booked",
    "already been booked",
    "already reserved",
    "already occupied",
    "not available",
    "no longer available",
    "booked by another",
    "seat is occupied",
];

/// Generic failure messages that count as contention only on a 5xx.
///
/// The platform has been seen to answer a lost race with a bare server
/// error and one of these, so they are kept apart from the phrases above
/// and never applied to 2xx or 4xx responses.
pub const DEFAULT_SERVER_ERROR_PHRASES: &[&str] = &[
    "failed to create booking",
    "unable to create booking",
    "could not create booking",
    "booking failed",
    "unable to book",
];

/// Fixed fields of the booking request plus where to send it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingPolicy {
    /// Scheme + host of the tenant, e.g. `https://tenant.smartenspaces.com`.
    pub base_url: String,
    pub booking_path: String,
    /// Default `Origin` when none was harvested.
    pub origin: String,
    /// Default `Referer` when none was harvested.
    pub referer: String,
    pub building_id: i64,
    pub building_name: String,
    pub zone_id: i64,
    pub demand_type: String,
    pub demand_id: i64,
    /// Sent as `isWFHRequest`; the platform's recurring/roster request flag.
    pub recurring_request: bool,
}

impl BookingPolicy {
    /// Policy for a tenant at `base_url`, with the platform's default fields.
    pub fn for_tenant(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/').to_string();
        Self {
            origin: base.clone(),
            referer: format!("{base}/spacemanagementV2/"),
            base_url: base,
            booking_path: "/amenitybooking/booking/create/wfh/v3".to_string(),
            building_id: 10,
            building_name: "ONE@CHANGI CITY".to_string(),
            zone_id: 14,
            demand_type: "USER_DEPARTMENT".to_string(),
            demand_id: 1,
            recurring_request: true,
        }
    }
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self::for_tenant("https://juliusbaer.smartenspaces.com")
    }
}

/// Case-insensitive phrase lists that mark a response as contention.
///
/// `phrases` apply to any status. `server_error_phrases` apply only when
/// the status is 5xx.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentionPolicy {
    phrases: Vec<String>,
    server_error_phrases: Vec<String>,
}

fn normalize_phrases<I, S>(phrases: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    phrases
        .into_iter()
        .map(|p| p.as_ref().trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}

impl ContentionPolicy {
    /// Replace the any-status phrase list. Blank phrases are dropped.
    /// The 5xx list keeps its defaults.
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            phrases: normalize_phrases(phrases),
            server_error_phrases: normalize_phrases(DEFAULT_SERVER_ERROR_PHRASES),
        }
    }

    /// Replace the 5xx-only phrase list.
    pub fn with_server_error_phrases<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.server_error_phrases = normalize_phrases(phrases);
        self
    }

    /// Treat every 5xx without a contention phrase as an ordinary failure.
    pub fn without_server_error_phrases(mut self) -> Self {
        self.server_error_phrases.clear();
        self
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    pub fn server_error_phrases(&self) -> &[String] {
        &self.server_error_phrases
    }

    /// Whether `body` carries one of the any-status phrases.
    pub fn matches(&self, body: &str) -> bool {
        let body = body.to_lowercase();
        self.phrases.iter().any(|p| body.contains(p.as_str()))
    }

    /// Whether a response with this status and body is a lost race.
    pub fn matches_response(&self, status: u16, body: &str) -> bool {
        let body = body.to_lowercase();
        self.phrases.iter().any(|p| body.contains(p.as_str()))
            || (status >= 500
                && self
                    .server_error_phrases
                    .iter()
                    .any(|p| body.contains(p.as_str())))
    }
}

impl Default for ContentionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CONTENTION_PHRASES)
    }
}

/// At most `limit` characters of `body`.
pub fn excerpt(body: &str, limit: usize) -> String {
    body.chars().take(limit).collect()
}

/// Classify a booking response.
///
/// A contention phrase wins regardless of status, since the platform has
/// been seen to report a lost race both as a 5xx and inside a 2xx body.
/// Generic failure text counts only on a 5xx.
pub fn classify(status: u16, body: &str, policy: &ContentionPolicy) -> AttemptOutcome {
    if policy.matches_response(status, body) {
        return AttemptOutcome::ContentionFailure {
            status,
            excerpt: excerpt(body, EXCERPT_LIMIT),
        };
    }
    if (200..300).contains(&status) {
        AttemptOutcome::Success {
            status,
            body: body.to_string(),
        }
    } else {
        AttemptOutcome::OtherFailure {
            status,
            excerpt: excerpt(body, EXCERPT_LIMIT),
        }
    }
}

/// The JSON body of a single-seat booking request.
pub fn build_payload(
    policy: &BookingPolicy,
    user: UserId,
    window: &AcquisitionWindow,
    entity: &Entity,
) -> Value {
    json!([{
        "requestDetails": {
            "entityInfos": [{
                "id": entity.id,
                "displayName": entity.display_name,
                "specialRequest": [],
                "serviceRequestEnabled": false,
            }],
            "startTime": window.start_ms(),
            "endTime": window.end_ms(),
            "demandType": policy.demand_type,
            "demandId": policy.demand_id,
            "userId": user.0,
            "rosterId": null,
            "floorId": null,
            "floorName": null,
            "buildingId": policy.building_id,
            "buildingName": policy.building_name,
            "recurringStartTime": window.start.hhmm(),
            "recurringEndTime": window.end.hhmm(),
            "zoneId": policy.zone_id,
            "count": null,
            "featureKey": null,
            "workingDays": null,
            "specialRequests": [],
            "meetingCategoryId": null,
            "srTicketDtoList": [],
        },
        "isWFHRequest": policy.recurring_request,
    }])
}

/// Submits one booking attempt.
#[async_trait]
pub trait Acquirer: Send + Sync {
    /// Submit exactly one entity for `window` using `context`'s credentials.
    async fn submit(
        &self,
        context: &SessionContext,
        window: &AcquisitionWindow,
        entity: &Entity,
    ) -> ClaimResult<AttemptOutcome>;
}

/// [`Acquirer`] that talks to the booking API over HTTP.
#[derive(Clone)]
pub struct HttpAcquirer {
    client: reqwest::Client,
    policy: BookingPolicy,
    contention: ContentionPolicy,
}

impl HttpAcquirer {
    pub fn new(
        policy: BookingPolicy,
        contention: ContentionPolicy,
        timeout: Duration,
    ) -> ClaimResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self {
            client,
            policy,
            contention,
        })
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    /// Booking endpoint URL with the roster flag and user id query.
    pub fn booking_url(&self, user: UserId) -> ClaimResult<Url> {
        let mut url = Url::parse(&self.policy.base_url)
            .and_then(|base| base.join(&self.policy.booking_path))
            .map_err(|e| ClaimError::Parse(format!("bad booking URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("isRosterUpdation", "true")
            .append_pair("userId", &user.to_string());
        Ok(url)
    }

    /// Request headers: JSON framing, then the harvested context, then
    /// Origin/Referer defaults only where nothing was harvested.
    pub fn request_headers(&self, context: &SessionContext) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        for (name, value) in context.headers() {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(n), Ok(v)) => {
                    headers.insert(n, v);
                }
                _ => warn!(header = %name, "skipping harvested header that is not valid HTTP"),
            }
        }

        if !context.has_header("origin") {
            if let Ok(v) = HeaderValue::from_str(&self.policy.origin) {
                headers.insert(ORIGIN, v);
            }
        }
        if !context.has_header("referer") {
            if let Ok(v) = HeaderValue::from_str(&self.policy.referer) {
                headers.insert(REFERER, v);
            }
        }
        headers
    }
}

#[async_trait]
impl Acquirer for HttpAcquirer {
    async fn submit(
        &self,
        context: &SessionContext,
        window: &AcquisitionWindow,
        entity: &Entity,
    ) -> ClaimResult<AttemptOutcome> {
        let user = context.identity().ok_or(ClaimError::MissingIdentity)?;
        if context.headers().is_empty() {
            warn!("no API headers captured; booking may be rejected");
        }

        let url = self.booking_url(user)?;
        let payload = build_payload(&self.policy, user, window, entity);
        let headers = self.request_headers(context);
        debug!(
            headers = ?headers.keys().map(|k| k.as_str()).collect::<Vec<_>>(),
            "booking request headers"
        );
        info!(entity = %entity, date = %window.date, "calling booking API");

        let resp = self
            .client
            .post(url)
            .headers(headers)
            .json(&payload)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;

        let outcome = classify(status, &body, &self.contention);
        debug!(status, kind = ?outcome.kind(), "booking API responded");
        Ok(outcome)
    }
}
