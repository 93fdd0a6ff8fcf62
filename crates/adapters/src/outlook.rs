//! Outlook (Microsoft Graph) adapter: REST over HTTPS via the `/me/events`
//! surface, tenant-scoped OAuth2.
//!
//! Grounded in `outlook_http/{adapter,client}.go` of the original
//! implementation. Metadata round-trips through a Graph
//! `openTypeExtension` rather than an extended-property bag, since Graph
//! has no exact equivalent of Google's `extendedProperties.private`.

use crate::retry::retry;
use async_trait::async_trait;
use calendarsync_core::metadata::{calendar_fingerprint, decode_metadata, encode_metadata, Metadata};
use calendarsync_core::model::{Attendee, Event, Reminder, ReminderAction};
use calendarsync_core::port::{AdapterError, CalendarAdapter, NamedComponent, Sink, Source};
use calendarsync_core::types::EventId;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;

const API_BASE: &str = "https://graph.microsoft.com/v1.0";
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const EXTENSION_NAME: &str = "inovex.calendarsync.meta";
const MAX_CALLS_PER_SECOND: u32 = 10;

pub struct OutlookAdapter {
    client: reqwest::Client,
    access_token: String,
    calendar_id: String,
    fingerprint: String,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl OutlookAdapter {
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
        }
    }

    async fn throttle(&self) {
        self.limiter.until_ready().await;
    }

    fn event_body(&self, event: &Event) -> Value {
        let metadata = event
            .metadata
            .clone()
            .unwrap_or_else(|| Metadata::fabricate(event.id.as_str(), &self.fingerprint));
        let fields = encode_metadata("", &metadata);

        let mut extension = json!({
            "@odata.type": "microsoft.graph.openTypeExtension",
            "extensionName": EXTENSION_NAME,
        });
        for (key, value) in &fields {
            extension[key] = json!(value);
        }

        let mut body = json!({
            "subject": event.title,
            "location": { "displayName": event.location },
            "start": { "dateTime": event.start_time.format(TIME_FORMAT).to_string(), "timeZone": "UTC" },
            "end": { "dateTime": event.end_time.format(TIME_FORMAT).to_string(), "timeZone": "UTC" },
            "isAllDay": event.all_day,
            "extensions": [extension],
        });

        if !event.description.is_empty() {
            body["body"] = json!({ "contentType": "text", "content": event.description });
        }
        if !event.attendees.is_empty() {
            body["attendees"] = json!(event
                .attendees
                .iter()
                .map(|a| json!({ "emailAddress": { "address": a.email, "name": a.display_name } }))
                .collect::<Vec<_>>());
        }
        if let Some(first) = event.reminders.first() {
            body["isReminderOn"] = json!(true);
            let minutes = (event.start_time - first.trigger).num_minutes().max(0);
            body["reminderMinutesBeforeStart"] = json!(minutes);
        }

        body
    }

    fn parse_event(&self, data: &Value) -> Result<Event, AdapterError> {
        let id = data["id"]
            .as_str()
            .ok_or_else(|| AdapterError::Transport(anyhow::anyhow!("outlook event missing id")))?;

        let start_time = parse_graph_time(data["start"]["dateTime"].as_str().unwrap_or_default())?;
        let end_time = parse_graph_time(data["end"]["dateTime"].as_str().unwrap_or_default())?;

        let attendees: Vec<Attendee> = data["attendees"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|a| {
                        Some(Attendee {
                            email: a["emailAddress"]["address"].as_str()?.to_string(),
                            display_name: a["emailAddress"]["name"].as_str().unwrap_or_default().to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let accepted = data["responseStatus"]["response"].as_str() != Some("declined");

        let reminders = if data["isReminderOn"].as_bool().unwrap_or(false) {
            let minutes = data["reminderMinutesBeforeStart"].as_i64().unwrap_or(0);
            vec![Reminder { action: ReminderAction::Display, trigger: start_time - ChronoDuration::minutes(minutes) }]
        } else {
            Vec::new()
        };

        let fields: BTreeMap<String, String> = data["extensions"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|ext| ext["extensionName"].as_str() == Some(EXTENSION_NAME))
            .and_then(|ext| ext.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        let metadata = decode_metadata("", &fields, id, &self.fingerprint);

        Ok(Event {
            ical_uid: data["iCalUId"].as_str().unwrap_or_default().to_string(),
            id: EventId::new(id),
            title: data["subject"].as_str().unwrap_or("(No title)").to_string(),
            description: data["body"]["content"].as_str().unwrap_or_default().to_string(),
            location: data["location"]["displayName"].as_str().unwrap_or_default().to_string(),
            start_time,
            end_time,
            all_day: data["isAllDay"].as_bool().unwrap_or(false),
            meeting_link: data["onlineMeeting"]["joinUrl"].as_str().unwrap_or_default().to_string(),
            accepted,
            attendees,
            reminders,
            metadata: Some(metadata),
            html_link: data["webLink"].as_str().unwrap_or_default().to_string(),
            visibility: String::new(),
        })
    }

    async fn send(&self, response: reqwest::Response) -> Result<Value, AdapterError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AdapterError::NotFound);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs =
                response.headers().get(reqwest::header::RETRY_AFTER).and_then(|v| v.to_str().ok()?.parse().ok());
            return Err(AdapterError::RateLimited { retry_after_secs });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AdapterError::Auth("outlook access token rejected".to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Transport(anyhow::anyhow!("graph api error {status}: {body}")));
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        response.json::<Value>().await.map_err(|e| AdapterError::Transport(anyhow::anyhow!(e)))
    }
}

impl NamedComponent for OutlookAdapter {
    fn name(&self) -> &str {
        "Outlook"
    }
}

impl CalendarAdapter for OutlookAdapter {
    fn calendar_fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

#[async_trait]
impl Source for OutlookAdapter {
    async fn events_in_timeframe(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, AdapterError> {
        self.throttle().await;

        let url = format!(
            "{API_BASE}/me/calendars/{}/CalendarView?startDateTime={}&endDateTime={}&$expand=extensions($filter=Id%20eq%20'{EXTENSION_NAME}')",
            self.calendar_id,
            start.format(TIME_FORMAT),
            end.format(TIME_FORMAT),
        );

        let mut events = Vec::new();
        let mut next_url = Some(url);

        while let Some(url) = next_url {
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.access_token)
                .header("Prefer", "outlook.timezone=\"UTC\"")
                .send()
                .await
                .map_err(|e| AdapterError::Transport(anyhow::anyhow!(e)))?;
            let data = self.send(response).await?;

            for item in data["value"].as_array().into_iter().flatten() {
                if let Ok(event) = self.parse_event(item) {
                    events.push(event);
                }
            }

            next_url = data["@odata.nextLink"].as_str().map(str::to_string);
        }

        Ok(events)
    }
}

#[async_trait]
impl Sink for OutlookAdapter {
    async fn events_in_timeframe(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, AdapterError> {
        Source::events_in_timeframe(self, start, end).await
    }

    async fn create_event(&self, event: &Event) -> Result<(), AdapterError> {
        let url = format!("{API_BASE}/me/calendars/{}/events", self.calendar_id);
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
        let url = format!("{API_BASE}/me/calendars/{}/events/{}", self.calendar_id, event.id.as_str());
        let body = self.event_body(event);

        let result = retry(
            || async {
                self.throttle().await;
                let response = self
                    .client
                    .patch(&url)
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
        let url = format!("{API_BASE}/me/calendars/{}/events/{}", self.calendar_id, event.id.as_str());

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

fn parse_graph_time(s: &str) -> Result<DateTime<Utc>, AdapterError> {
    let naive = NaiveDateTime::parse_from_str(s, TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| AdapterError::Transport(anyhow::anyhow!("invalid graph datetime '{s}': {e}")))?;
    Ok(naive.and_utc())
}
