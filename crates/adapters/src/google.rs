//! Google Calendar adapter: REST over HTTPS via the Calendar v3 JSON API.
//!
//! Grounded in `google/{adapter,client,event,retry}.go` of the original
//! implementation, reworked around `reqwest` the way the broader example
//! pack's `calendar/google/api.rs` talks to the same API surface.

use crate::retry::retry;
use async_trait::async_trait;
use calendarsync_core::metadata::{calendar_fingerprint, decode_metadata, encode_metadata, Metadata};
use calendarsync_core::model::{Attendee, Event, Reminder, ReminderAction};
use calendarsync_core::port::{AdapterError, CalendarAdapter, NamedComponent, Sink, Source};
use calendarsync_core::types::EventId;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;

const API_BASE: &str = "https://www.googleapis.com/calendar/v3";
const EXTENSION_PREFIX: &str = "inovex.calendarsync.";
const MAX_CALLS_PER_SECOND: u32 = 10;

/// Google Calendar, reachable as both a source and a sink.
pub struct GoogleAdapter {
    client: reqwest::Client,
    access_token: String,
    calendar_id: String,
    fingerprint: String,
    limiter: Arc<DefaultDirectRateLimiter>,
    api_base: String,
}

impl GoogleAdapter {
    pub fn new(calendar_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        let calendar_id = calendar_id.into();
        let fingerprint = calendar_fingerprint(&[&calendar_id]);
        let quota = Quota::per_second(NonZeroU32::new(MAX_CALLS_PER_SECOND).unwrap());

        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("static reqwest client config is always valid"),
            access_token: access_token.into(),
            calendar_id,
            fingerprint,
            limiter: Arc::new(RateLimiter::direct(quota)),
            api_base: API_BASE.to_string(),
        }
    }

    /// Points this adapter at a non-default API root, for exercising retry
    /// and error-mapping behavior against a mocked HTTP server in tests.
    #[cfg(test)]
    fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn throttle(&self) {
        self.limiter.until_ready().await;
    }

    fn event_body(&self, event: &Event) -> Value {
        let metadata = event
            .metadata
            .clone()
            .unwrap_or_else(|| Metadata::fabricate(event.id.as_str(), &self.fingerprint));

        let mut body = json!({
            "summary": event.title,
            "description": event.description,
            "location": event.location,
            "start": event_date_time(event.all_day, event.start_time),
            "end": event_date_time(event.all_day, event.end_time),
            "extendedProperties": { "private": encode_metadata(EXTENSION_PREFIX, &metadata) },
        });

        if !event.attendees.is_empty() {
            body["attendees"] = json!(event
                .attendees
                .iter()
                .map(|a| json!({ "email": a.email, "displayName": a.display_name }))
                .collect::<Vec<_>>());
        }

        if !event.reminders.is_empty() {
            body["reminders"] = json!({
                "useDefault": false,
                "overrides": event.reminders.iter().map(|r| json!({
                    "method": "popup",
                    "minutes": (event.start_time - r.trigger).num_minutes().max(0),
                })).collect::<Vec<_>>(),
            });
        }

        body
    }

    fn parse_event(&self, data: &Value) -> Result<Event, AdapterError> {
        let id = data["id"]
            .as_str()
            .ok_or_else(|| AdapterError::Transport(anyhow::anyhow!("google event missing id")))?;

        let (start, all_day) = parse_event_time(&data["start"])?;
        let (end, _) = parse_event_time(&data["end"])?;

        let attendees: Vec<Attendee> = data["attendees"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|a| {
                        Some(Attendee {
                            email: a["email"].as_str()?.to_string(),
                            display_name: a["displayName"].as_str().unwrap_or_default().to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let accepted = !data["attendees"].as_array().is_some_and(|arr| {
            arr.iter().any(|a| {
                a["self"].as_bool().unwrap_or(false) && a["responseStatus"].as_str() == Some("declined")
            })
        });

        let reminders: Vec<Reminder> = data["reminders"]["overrides"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter(|r| r["method"].as_str() == Some("popup"))
                    .filter_map(|r| {
                        let minutes = r["minutes"].as_i64()?;
                        Some(Reminder {
                            action: ReminderAction::Display,
                            trigger: start - ChronoDuration::minutes(minutes),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let extensions: BTreeMap<String, String> = data["extendedProperties"]["private"]
            .as_object()
            .map(|m| m.iter().filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string()))).collect())
            .unwrap_or_default();
        let metadata = decode_metadata(EXTENSION_PREFIX, &extensions, id, &self.fingerprint);

        Ok(Event {
            ical_uid: data["iCalUID"].as_str().unwrap_or_default().to_string(),
            id: EventId::new(id),
            title: data["summary"].as_str().unwrap_or("(No title)").to_string(),
            description: data["description"].as_str().unwrap_or_default().to_string(),
            location: data["location"].as_str().unwrap_or_default().to_string(),
            start_time: start,
            end_time: end,
            all_day,
            meeting_link: data["hangoutLink"].as_str().unwrap_or_default().to_string(),
            accepted,
            attendees,
            reminders,
            metadata: Some(metadata),
            html_link: data["htmlLink"].as_str().unwrap_or_default().to_string(),
            visibility: data["visibility"].as_str().unwrap_or_default().to_string(),
        })
    }

    async fn send(&self, response: reqwest::Response) -> Result<Value, AdapterError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AdapterError::NotFound);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status == reqwest::StatusCode::FORBIDDEN {
            let retry_after_secs =
                response.headers().get(reqwest::header::RETRY_AFTER).and_then(|v| v.to_str().ok()?.parse().ok());
            return Err(AdapterError::RateLimited { retry_after_secs });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AdapterError::Auth("google access token rejected".to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Transport(anyhow::anyhow!("google api error {status}: {body}")));
        }
        response.json::<Value>().await.map_err(|e| AdapterError::Transport(anyhow::anyhow!(e)))
    }
}

impl NamedComponent for GoogleAdapter {
    fn name(&self) -> &str {
        "Google Calendar"
    }
}

impl CalendarAdapter for GoogleAdapter {
    fn calendar_fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

#[async_trait]
impl Source for GoogleAdapter {
    async fn events_in_timeframe(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, AdapterError> {
        self.throttle().await;

        let url = format!(
            "{}/calendars/{}/events?timeMin={}&timeMax={}&singleEvents=true&orderBy=startTime&maxResults=250&showDeleted=false",
            self.api_base,
            urlencode(&self.calendar_id),
            urlencode(&start.to_rfc3339()),
            urlencode(&end.to_rfc3339()),
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| AdapterError::Transport(anyhow::anyhow!(e)))?;
        let data = self.send(response).await?;

        let items = data["items"].as_array().cloned().unwrap_or_default();
        let events = items.iter().filter_map(|item| self.parse_event(item).ok()).collect();
        Ok(events)
    }
}

#[async_trait]
impl Sink for GoogleAdapter {
    async fn events_in_timeframe(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, AdapterError> {
        Source::events_in_timeframe(self, start, end).await
    }

    async fn create_event(&self, event: &Event) -> Result<(), AdapterError> {
        let url = format!("{}/calendars/{}/events?sendUpdates=none", self.api_base, urlencode(&self.calendar_id));
        let body = self.event_body(event);

        retry(
            || async {
                self.throttle().await;
                let response = self
                    .client
                    .post(&url)
                    .bearer_auth(&self.access_token)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| AdapterError::Transport(anyhow::anyhow!(e)))?;
                self.send(response).await
            },
            |e: &AdapterError| matches!(e, AdapterError::RateLimited { .. }),
        )
        .await?;

        Ok(())
    }

    async fn update_event(&self, event: &Event) -> Result<(), AdapterError> {
        let url = format!(
            "{}/calendars/{}/events/{}?sendUpdates=none",
            self.api_base,
            urlencode(&self.calendar_id),
            urlencode(event.id.as_str())
        );
        let body = self.event_body(event);

        let result = retry(
            || async {
                self.throttle().await;
                let response = self
                    .client
                    .put(&url)
                    .bearer_auth(&self.access_token)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| AdapterError::Transport(anyhow::anyhow!(e)))?;
                self.send(response).await
            },
            |e: &AdapterError| matches!(e, AdapterError::RateLimited { .. }),
        )
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_idempotent_convergence() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete_event(&self, event: &Event) -> Result<(), AdapterError> {
        let url =
            format!("{}/calendars/{}/events/{}", self.api_base, urlencode(&self.calendar_id), urlencode(event.id.as_str()));

        let result = retry(
            || async {
                self.throttle().await;
                let response = self
                    .client
                    .delete(&url)
                    .bearer_auth(&self.access_token)
                    .send()
                    .await
                    .map_err(|e| AdapterError::Transport(anyhow::anyhow!(e)))?;
                self.send(response).await
            },
            |e: &AdapterError| matches!(e, AdapterError::RateLimited { .. }),
        )
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_idempotent_convergence() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn event_date_time(all_day: bool, t: DateTime<Utc>) -> Value {
    if all_day {
        json!({ "date": t.format("%Y-%m-%d").to_string() })
    } else {
        json!({ "dateTime": t.to_rfc3339() })
    }
}

fn parse_event_time(data: &Value) -> Result<(DateTime<Utc>, bool), AdapterError> {
    if let Some(date_str) = data["date"].as_str() {
        let naive = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
            .map_err(|e| AdapterError::Transport(anyhow::anyhow!(e)))?;
        let datetime = Utc.from_utc_datetime(&naive.and_hms_opt(0, 0, 0).expect("midnight is always valid"));
        return Ok((datetime, true));
    }

    if let Some(datetime_str) = data["dateTime"].as_str() {
        let datetime = DateTime::parse_from_rfc3339(datetime_str)
            .map_err(|e| AdapterError::Transport(anyhow::anyhow!(e)))?
            .with_timezone(&Utc);
        return Ok((datetime, false));
    }

    Err(AdapterError::Transport(anyhow::anyhow!("event has neither date nor dateTime")))
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_event() -> Event {
        Event {
            ical_uid: "uid-1".into(),
            id: EventId::new("evt-1"),
            title: "Standup".into(),
            description: "daily".into(),
            location: "".into(),
            start_time: Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2026, 3, 10, 9, 30, 0).unwrap(),
            all_day: false,
            meeting_link: "".into(),
            accepted: true,
            attendees: vec![],
            reminders: vec![],
            metadata: Some(Metadata::new("evt-1", "https://example.com", "fp")),
            html_link: "".into(),
            visibility: "".into(),
        }
    }

    #[test]
    fn fingerprint_is_derived_from_calendar_id_alone() {
        let a = GoogleAdapter::new("primary", "token");
        let b = GoogleAdapter::new("primary", "different-token");
        assert_eq!(a.calendar_fingerprint(), b.calendar_fingerprint());

        let c = GoogleAdapter::new("other", "token");
        assert_ne!(a.calendar_fingerprint(), c.calendar_fingerprint());
    }

    #[test]
    fn event_body_embeds_encoded_metadata() {
        let adapter = GoogleAdapter::new("primary", "token");
        let body = adapter.event_body(&sample_event());
        let private = body["extendedProperties"]["private"].as_object().unwrap();
        assert!(private.contains_key("inovex.calendarsync.SyncID"));
    }

    #[test]
    fn parse_event_without_recognizable_extensions_fabricates_metadata_stamped_with_this_calendars_fingerprint() {
        let adapter = GoogleAdapter::new("primary", "token");
        let data = json!({
            "id": "evt-untouched",
            "summary": "Untouched",
            "start": { "dateTime": "2026-03-10T09:00:00Z" },
            "end": { "dateTime": "2026-03-10T09:30:00Z" },
        });
        let event = adapter.parse_event(&data).unwrap();
        let metadata = event.metadata.unwrap();
        assert_eq!(metadata.source_id, adapter.calendar_fingerprint());
    }

    #[test]
    fn parse_event_time_recognizes_all_day_dates() {
        let (dt, all_day) = parse_event_time(&json!({ "date": "2026-03-10" })).unwrap();
        assert!(all_day);
        assert_eq!(dt.date_naive().to_string(), "2026-03-10");
    }

    #[test]
    fn parse_event_time_recognizes_timed_events() {
        let (_, all_day) = parse_event_time(&json!({ "dateTime": "2026-03-10T09:00:00Z" })).unwrap();
        assert!(!all_day);
    }

    /// Responds `429` the first time it's hit, then `200` — exercises the
    /// adapter's retry-on-rate-limit path without waiting out the real
    /// `MAX_ATTEMPTS` ceiling.
    struct FlakyThenOk {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl wiremock::Respond for FlakyThenOk {
        fn respond(&self, _request: &wiremock::Request) -> wiremock::ResponseTemplate {
            let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call == 0 {
                wiremock::ResponseTemplate::new(429).insert_header("Retry-After", "0")
            } else {
                wiremock::ResponseTemplate::new(200).set_body_json(json!({ "id": "evt-created" }))
            }
        }
    }

    #[tokio::test]
    async fn create_event_retries_past_a_single_rate_limit_response() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(FlakyThenOk { calls: std::sync::atomic::AtomicUsize::new(0) })
            .expect(2)
            .mount(&server)
            .await;

        let adapter = GoogleAdapter::new("primary", "token").with_api_base(server.uri());
        let result = Sink::create_event(&adapter, &sample_event()).await;
        assert!(result.is_ok(), "{result:?}");
    }

    #[tokio::test]
    async fn delete_event_treats_a_404_as_idempotent_success() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = GoogleAdapter::new("primary", "token").with_api_base(server.uri());
        let result = Sink::delete_event(&adapter, &sample_event()).await;
        assert!(result.is_ok(), "{result:?}");
    }
}
