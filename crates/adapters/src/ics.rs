//! Static `.ics` feed adapter: reads a single calendar resource over HTTP(S)
//! or from the local filesystem via the `icalendar` crate. Source-only — a
//! flat iCalendar feed has no event-level API to create, update, or delete
//! through, so this type does not implement `Sink`.

use async_trait::async_trait;
use calendarsync_core::metadata::{calendar_fingerprint, Metadata};
use calendarsync_core::model::Event;
use calendarsync_core::port::{AdapterError, CalendarAdapter, NamedComponent, Source};
use calendarsync_core::types::EventId;
use chrono::{DateTime, Utc};
use icalendar::{Calendar, CalendarComponent, Component, DatePerhapsTime};

pub struct IcsAdapter {
    client: reqwest::Client,
    url: String,
    fingerprint: String,
}

impl IcsAdapter {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let fingerprint = calendar_fingerprint(&[&url]);

        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("static reqwest client config is always valid"),
            url,
            fingerprint,
        }
    }

    async fn fetch(&self) -> Result<String, AdapterError> {
        if let Some(path) = self.url.strip_prefix("file://") {
            return std::fs::read_to_string(path)
                .map_err(|e| AdapterError::Transport(anyhow::anyhow!("reading ics file '{path}': {e}")));
        }

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| AdapterError::Transport(anyhow::anyhow!(e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AdapterError::NotFound);
        }
        if !response.status().is_success() {
            return Err(AdapterError::Transport(anyhow::anyhow!("ics feed returned {}", response.status())));
        }

        response.text().await.map_err(|e| AdapterError::Transport(anyhow::anyhow!(e)))
    }
}

impl NamedComponent for IcsAdapter {
    fn name(&self) -> &str {
        "iCalendar feed"
    }
}

impl CalendarAdapter for IcsAdapter {
    fn calendar_fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

#[async_trait]
impl Source for IcsAdapter {
    async fn events_in_timeframe(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, AdapterError> {
        let body = self.fetch().await?;
        let calendar: Calendar = body
            .parse()
            .map_err(|e: String| AdapterError::Transport(anyhow::anyhow!("invalid ics feed: {e}")))?;

        let events = calendar
            .components
            .iter()
            .filter_map(|component| match component {
                CalendarComponent::Event(vevent) => parse_vevent(vevent, &self.fingerprint),
                _ => None,
            })
            .filter(|event| event.start_time < end && event.end_time > start)
            .collect();

        Ok(events)
    }
}

fn parse_vevent(vevent: &icalendar::Event, source_id: &str) -> Option<Event> {
    let uid = vevent.get_uid()?.to_string();
    let start = vevent.get_start()?;
    let end = vevent.get_end().unwrap_or(start.clone());
    let all_day = matches!(start, DatePerhapsTime::Date(_));

    Some(Event {
        ical_uid: uid.clone(),
        id: EventId::new(uid.clone()),
        title: vevent.get_summary().unwrap_or("(No title)").to_string(),
        description: vevent.get_description().unwrap_or_default().to_string(),
        location: vevent.get_location().unwrap_or_default().to_string(),
        start_time: start.with_timezone(&Utc),
        end_time: end.with_timezone(&Utc),
        all_day,
        meeting_link: String::new(),
        accepted: true,
        attendees: Vec::new(),
        reminders: Vec::new(),
        metadata: Some(Metadata::fabricate(&uid, source_id)),
        html_link: String::new(),
        visibility: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_feed() -> String {
        r#"BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//Test//Test//EN
BEGIN:VEVENT
UID:feed-event-1
SUMMARY:Quarterly Planning
DTSTART:20260615T100000Z
DTEND:20260615T110000Z
END:VEVENT
BEGIN:VEVENT
UID:feed-event-2
SUMMARY:Company Holiday
DTSTART;VALUE=DATE:20260704
DTEND;VALUE=DATE:20260705
END:VEVENT
END:VCALENDAR
"#
        .to_string()
    }

    #[test]
    fn fingerprint_is_derived_from_the_feed_url() {
        let a = IcsAdapter::new("https://example.com/a.ics");
        let b = IcsAdapter::new("https://example.com/a.ics");
        let c = IcsAdapter::new("https://example.com/b.ics");
        assert_eq!(a.calendar_fingerprint(), b.calendar_fingerprint());
        assert_ne!(a.calendar_fingerprint(), c.calendar_fingerprint());
    }

    #[test]
    fn parses_timed_and_all_day_events_from_a_feed() {
        let calendar: Calendar = sample_feed().parse().unwrap();
        let events: Vec<Event> =
            calendar.components.iter().filter_map(|c| match c {
                CalendarComponent::Event(v) => parse_vevent(v, "feed-fp"),
                _ => None,
            }).collect();

        assert_eq!(events.len(), 2);
        let timed = events.iter().find(|e| e.id.as_str() == "feed-event-1").unwrap();
        assert!(!timed.all_day);
        assert_eq!(timed.start_time, Utc.with_ymd_and_hms(2026, 6, 15, 10, 0, 0).unwrap());

        let all_day = events.iter().find(|e| e.id.as_str() == "feed-event-2").unwrap();
        assert!(all_day.all_day);
    }

    #[test]
    fn fabricated_metadata_is_stamped_with_the_adapters_own_fingerprint() {
        let calendar: Calendar = sample_feed().parse().unwrap();
        let event = calendar
            .components
            .iter()
            .find_map(|c| match c {
                CalendarComponent::Event(v) => parse_vevent(v, "feed-fp"),
                _ => None,
            })
            .unwrap();
        assert_eq!(event.metadata.unwrap().source_id, "feed-fp");
    }

    #[tokio::test]
    async fn events_in_timeframe_stamps_fabricated_metadata_with_this_feeds_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.ics");
        std::fs::write(&path, sample_feed()).unwrap();
        let adapter = IcsAdapter::new(format!("file://{}", path.display()));

        let events = adapter
            .events_in_timeframe(
                Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap(),
            )
            .await
            .unwrap();

        assert!(!events.is_empty());
        for event in &events {
            assert_eq!(event.metadata.as_ref().unwrap().source_id, adapter.calendar_fingerprint());
        }
    }
}
