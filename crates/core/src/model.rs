//! The `Event` value type and the semantic-equality rule the diff uses to
//! decide whether a sink event needs updating.

use crate::metadata::Metadata;
use crate::types::EventId;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A calendar event, freely copied between the filter, transform, and diff stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// RFC5545 iCal UID, valid across calendaring systems but not stable
    /// enough across providers to use as a correlation key.
    pub ical_uid: String,
    /// Provider-native event id, opaque outside the adapter that issued it.
    pub id: EventId,
    pub title: String,
    pub description: String,
    pub location: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub all_day: bool,
    pub meeting_link: String,
    /// `false` means the invitee declined; candidate for filtering.
    pub accepted: bool,
    pub attendees: Vec<Attendee>,
    pub reminders: Vec<Reminder>,
    /// Absence means "not previously touched by this engine."
    pub metadata: Option<Metadata>,
    /// Provider-hosted web view of the event, e.g. a Google Calendar
    /// `htmlLink`. Used only by `AddOriginalLink`; empty if the provider
    /// doesn't expose one.
    pub html_link: String,
    /// `"default"`, `"public"`, `"private"`, or `"confidential"`; empty
    /// means "use the sink's default."
    pub visibility: String,
}

impl Event {
    /// Derives the minimal scaffold transformers build on top of: just the
    /// identity fields and a placeholder title. Everything else is opted
    /// into by whichever transformers run next.
    pub fn new_sync_event(source: &Event) -> Event {
        Event {
            ical_uid: source.ical_uid.clone(),
            id: source.id.clone(),
            title: "CalendarSync Event".to_string(),
            description: String::new(),
            location: String::new(),
            start_time: source.start_time,
            end_time: source.end_time,
            all_day: source.all_day,
            meeting_link: String::new(),
            accepted: true,
            attendees: Vec::new(),
            reminders: Vec::new(),
            metadata: source.metadata.clone(),
            html_link: String::new(),
            visibility: String::new(),
        }
    }

    /// The `SyncId` correlating this event with its source, if any.
    pub fn sync_id(&self) -> Option<&crate::types::SyncId> {
        self.metadata.as_ref().map(|m| &m.sync_id)
    }

    /// Title capped to 20 characters, with `...` appended when truncated.
    pub fn short_title(&self) -> String {
        const MAX_LEN: usize = 20;
        if self.title.chars().count() > MAX_LEN {
            let truncated: String = self.title.chars().take(MAX_LEN - 1).collect();
            format!("{truncated}...")
        } else {
            self.title.clone()
        }
    }

    /// Overwrites every payload field of `self` with `source`'s, keeping
    /// `self`'s identity (`id`) intact. Used when applying a sink update.
    pub fn overwrite(&mut self, source: &Event) {
        self.title = source.title.clone();
        self.description = source.description.clone();
        self.start_time = source.start_time;
        self.end_time = source.end_time;
        self.all_day = source.all_day;
        self.metadata = source.metadata.clone();
        self.attendees = source.attendees.clone();
        self.location = source.location.clone();
        self.reminders = source.reminders.clone();
        self.meeting_link = source.meeting_link.clone();
        self.html_link = source.html_link.clone();
        self.visibility = source.visibility.clone();
    }
}

/// Two events are semantically equal if every field the operator cares
/// about matches; the diff uses this to decide whether a sink event
/// needs an update at all. Evaluated post-transformation, not against the
/// raw source payload.
pub fn semantically_equal(a: &Event, b: &Event) -> bool {
    if a.title != b.title {
        tracing::debug!(title_a = %a.title, title_b = %b.title, "title changed");
        return false;
    }

    if a.description != b.description {
        tracing::debug!(event = %a.title, "description changed");
        return false;
    }

    if a.location != b.location {
        tracing::debug!(event = %a.title, "location changed");
        return false;
    }

    if a.meeting_link != b.meeting_link {
        tracing::debug!(event = %a.title, "meeting link changed");
        return false;
    }

    if a.all_day != b.all_day {
        tracing::debug!(event = %a.title, "all-day flag changed");
        return false;
    }

    if a.all_day {
        if a.start_time.year() != b.start_time.year()
            || a.start_time.ordinal() != b.start_time.ordinal()
        {
            tracing::debug!(event = %a.title, "all-day start date changed");
            return false;
        }
        if a.end_time.year() != b.end_time.year() || a.end_time.ordinal() != b.end_time.ordinal() {
            tracing::debug!(event = %a.title, "all-day end date changed");
            return false;
        }
    } else {
        if a.start_time != b.start_time {
            tracing::debug!(event = %a.title, "start time changed");
            return false;
        }
        if a.end_time != b.end_time {
            tracing::debug!(event = %a.title, "end time changed");
            return false;
        }
    }

    if !reminders_equal(&a.reminders, &b.reminders) {
        return false;
    }

    if !attendees_equal(&a.attendees, &b.attendees) {
        return false;
    }

    true
}

/// Reminders are sorted by trigger instant and compared pairwise, with one
/// exception: 0 reminders in the source against exactly 1 in the sink is
/// treated as equal, since many sinks inject a default reminder we cannot
/// suppress.
fn reminders_equal(a: &[Reminder], b: &[Reminder]) -> bool {
    if a.len() != b.len() {
        if a.is_empty() && b.len() == 1 {
            tracing::debug!(
                "source has 0 reminders and sink has 1, treating as equal (likely sink default)"
            );
            return true;
        }
        tracing::debug!(source_count = a.len(), sink_count = b.len(), "reminder count changed");
        return false;
    }

    let mut a_sorted = a.to_vec();
    let mut b_sorted = b.to_vec();
    a_sorted.sort_by_key(|r| r.trigger);
    b_sorted.sort_by_key(|r| r.trigger);

    a_sorted.iter().zip(b_sorted.iter()).all(|(ra, rb)| ra.trigger == rb.trigger)
}

fn attendees_equal(a: &[Attendee], b: &[Attendee]) -> bool {
    if a.len() != b.len() {
        tracing::debug!(source_count = a.len(), sink_count = b.len(), "attendee count changed");
        return false;
    }

    let mut a_sorted = a.to_vec();
    let mut b_sorted = b.to_vec();
    a_sorted.sort_by(|x, y| x.email.cmp(&y.email));
    b_sorted.sort_by(|x, y| x.email.cmp(&y.email));

    a_sorted.iter().zip(b_sorted.iter()).all(|(x, y)| x == y)
}

/// An event attendee. Semantically a set keyed by `email`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub email: String,
    pub display_name: String,
}

impl PartialOrd for Attendee {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Attendee {
    fn cmp(&self, other: &Self) -> Ordering {
        self.email.cmp(&other.email)
    }
}

/// A single reminder. Semantically part of a multiset keyed by trigger instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub action: ReminderAction,
    pub trigger: DateTime<Utc>,
}

/// The only reminder action every provider in this engine's scope supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReminderAction {
    Display,
}
