//! Event filters: named predicates that decide whether a source event is
//! even a candidate for sync. The pipeline is conjunctive and deterministic;
//! unknown filter names are logged and skipped rather than fatal, so newer
//! configs stay loadable by older binaries.

use crate::config::Filter as FilterConfig;
use crate::error::ConfigError;
use crate::model::Event;
use regex::Regex;

pub trait Filter: Send + Sync {
    fn name(&self) -> &'static str;
    fn keep(&self, event: &Event) -> bool;
}

/// Drops events the invitee declined.
pub struct DeclinedEvents;

impl Filter for DeclinedEvents {
    fn name(&self) -> &'static str {
        "DeclinedEvents"
    }

    fn keep(&self, event: &Event) -> bool {
        event.accepted
    }
}

/// Drops all-day events.
pub struct AllDayEvents;

impl Filter for AllDayEvents {
    fn name(&self) -> &'static str {
        "AllDayEvents"
    }

    fn keep(&self, event: &Event) -> bool {
        !event.all_day
    }
}

/// Allow-deny-allow on the event title: if neither pattern is configured,
/// keep everything. If only `exclude` is set, keep iff the title does not
/// match it. If both are set, an include match re-allows even titles the
/// exclude pattern matched.
pub struct RegexTitle {
    exclude: Option<Regex>,
    include: Option<Regex>,
}

impl RegexTitle {
    pub fn new(exclude: Option<&str>, include: Option<&str>) -> Result<Self, ConfigError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| ConfigError::InvalidFilterOption {
                filter: "RegexTitle".to_string(),
                reason: e.to_string(),
            })
        };
        Ok(Self {
            exclude: exclude.map(compile).transpose()?,
            include: include.map(compile).transpose()?,
        })
    }
}

impl Filter for RegexTitle {
    fn name(&self) -> &'static str {
        "RegexTitle"
    }

    fn keep(&self, event: &Event) -> bool {
        let excluded = self.exclude.as_ref().is_some_and(|re| re.is_match(&event.title));
        if !excluded {
            return true;
        }
        self.include.as_ref().is_some_and(|re| re.is_match(&event.title))
    }
}

/// Keeps events whose start-hour or end-hour falls in the inclusive band.
/// All-day events bypass this filter entirely.
pub struct TimeFrameEvents {
    pub hour_start: u32,
    pub hour_end: u32,
}

impl Filter for TimeFrameEvents {
    fn name(&self) -> &'static str {
        "TimeFrame"
    }

    fn keep(&self, event: &Event) -> bool {
        if event.all_day {
            return true;
        }
        use chrono::Timelike;
        let start_hour = event.start_time.hour();
        let end_hour = event.end_time.hour();
        (self.hour_start..=self.hour_end).contains(&start_hour)
            || (self.hour_start..=self.hour_end).contains(&end_hour)
    }
}

/// Drops events whose start-hour and end-hour both fall strictly inside
/// the band. All-day events bypass this filter entirely.
pub struct TimeExcludeEvents {
    pub hour_start: u32,
    pub hour_end: u32,
}

impl Filter for TimeExcludeEvents {
    fn name(&self) -> &'static str {
        "TimeExclude"
    }

    fn keep(&self, event: &Event) -> bool {
        if event.all_day {
            return true;
        }
        use chrono::Timelike;
        let start_hour = event.start_time.hour();
        let end_hour = event.end_time.hour();
        !(start_hour >= self.hour_start && end_hour <= self.hour_end)
    }
}

fn option_str<'a>(config: &'a crate::config::CustomMap, key: &str) -> Option<&'a str> {
    config.get(key).and_then(|v| v.as_str())
}

fn option_u32(config: &crate::config::CustomMap, key: &str) -> Option<u32> {
    config.get(key).and_then(serde_yaml::Value::as_u64).and_then(|v| u32::try_from(v).ok())
}

/// Builds the ordered filter pipeline from config. Unknown filter names
/// are logged and skipped; invalid option values for a recognized filter
/// are fatal.
pub fn build_pipeline(configs: &[FilterConfig]) -> Result<Vec<Box<dyn Filter>>, ConfigError> {
    let mut pipeline: Vec<Box<dyn Filter>> = Vec::with_capacity(configs.len());
    for entry in configs {
        match entry.name.as_str() {
            "DeclinedEvents" => pipeline.push(Box::new(DeclinedEvents)),
            "AllDayEvents" => pipeline.push(Box::new(AllDayEvents)),
            "RegexTitle" => {
                let exclude = option_str(&entry.config, "ExcludeRegexp");
                let include = option_str(&entry.config, "IncludeRegexp");
                pipeline.push(Box::new(RegexTitle::new(exclude, include)?));
            }
            "TimeFrame" | "TimeFrameEvents" => {
                let hour_start = option_u32(&entry.config, "HourStart").ok_or_else(|| {
                    ConfigError::InvalidFilterOption {
                        filter: "TimeFrameEvents".to_string(),
                        reason: "HourStart is required".to_string(),
                    }
                })?;
                let hour_end = option_u32(&entry.config, "HourEnd").ok_or_else(|| {
                    ConfigError::InvalidFilterOption {
                        filter: "TimeFrameEvents".to_string(),
                        reason: "HourEnd is required".to_string(),
                    }
                })?;
                pipeline.push(Box::new(TimeFrameEvents { hour_start, hour_end }));
            }
            "TimeExclude" | "TimeExcludeEvents" => {
                let hour_start = option_u32(&entry.config, "HourStart").ok_or_else(|| {
                    ConfigError::InvalidFilterOption {
                        filter: "TimeExcludeEvents".to_string(),
                        reason: "HourStart is required".to_string(),
                    }
                })?;
                let hour_end = option_u32(&entry.config, "HourEnd").ok_or_else(|| {
                    ConfigError::InvalidFilterOption {
                        filter: "TimeExcludeEvents".to_string(),
                        reason: "HourEnd is required".to_string(),
                    }
                })?;
                pipeline.push(Box::new(TimeExcludeEvents { hour_start, hour_end }));
            }
            unknown => {
                tracing::warn!(filter = unknown, "unknown filter name, skipping");
            }
        }
    }
    Ok(pipeline)
}

/// Runs every filter in order; an event survives iff all of them keep it.
pub fn apply_pipeline(pipeline: &[Box<dyn Filter>], events: Vec<Event>) -> Vec<Event> {
    events.into_iter().filter(|event| pipeline.iter().all(|f| f.keep(event))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventId;
    use chrono::{TimeZone, Utc};

    fn event_at(hour_start: u32, hour_end: u32, all_day: bool) -> Event {
        Event {
            ical_uid: "u".into(),
            id: EventId::new("n"),
            title: "Meeting".into(),
            description: String::new(),
            location: String::new(),
            start_time: Utc.with_ymd_and_hms(2026, 5, 1, hour_start, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2026, 5, 1, hour_end, 0, 0).unwrap(),
            all_day,
            meeting_link: String::new(),
            accepted: true,
            attendees: Vec::new(),
            reminders: Vec::new(),
            metadata: None,
            html_link: String::new(),
            visibility: String::new(),
        }
    }

    #[test]
    fn declined_events_drops_unaccepted() {
        let mut e = event_at(9, 10, false);
        e.accepted = false;
        assert!(!DeclinedEvents.keep(&e));
        e.accepted = true;
        assert!(DeclinedEvents.keep(&e));
    }

    #[test]
    fn all_day_events_drops_all_day() {
        assert!(!AllDayEvents.keep(&event_at(0, 0, true)));
        assert!(AllDayEvents.keep(&event_at(9, 10, false)));
    }

    #[test]
    fn regex_title_keeps_everything_when_unconfigured() {
        let f = RegexTitle::new(None, None).unwrap();
        assert!(f.keep(&event_at(9, 10, false)));
    }

    #[test]
    fn regex_title_exclude_only_drops_matches() {
        let f = RegexTitle::new(Some("^Focus"), None).unwrap();
        let mut e = event_at(9, 10, false);
        e.title = "Focus time".into();
        assert!(!f.keep(&e));
        e.title = "Standup".into();
        assert!(f.keep(&e));
    }

    #[test]
    fn regex_title_include_re_allows_excluded_titles() {
        let f = RegexTitle::new(Some("^Focus"), Some("important")).unwrap();
        let mut e = event_at(9, 10, false);
        e.title = "Focus time (important)".into();
        assert!(f.keep(&e));
    }

    #[test]
    fn time_frame_keeps_if_start_or_end_in_band() {
        let f = TimeFrameEvents { hour_start: 9, hour_end: 12 };
        assert!(f.keep(&event_at(8, 10, false))); // end in band
        assert!(f.keep(&event_at(9, 20, false))); // start in band
        assert!(!f.keep(&event_at(13, 20, false))); // neither
        assert!(f.keep(&event_at(0, 0, true))); // all-day bypasses
    }

    #[test]
    fn time_exclude_drops_only_when_fully_inside_band() {
        let f = TimeExcludeEvents { hour_start: 12, hour_end: 13 };
        assert!(!f.keep(&event_at(12, 13, false))); // fully inside -> dropped
        assert!(f.keep(&event_at(11, 13, false))); // start outside -> kept
        assert!(f.keep(&event_at(0, 0, true))); // all-day bypasses
    }

    #[test]
    fn pipeline_is_conjunctive() {
        let pipeline: Vec<Box<dyn Filter>> = vec![Box::new(DeclinedEvents), Box::new(AllDayEvents)];
        let mut accepted_all_day = event_at(0, 0, true);
        accepted_all_day.accepted = true;
        let mut declined_timed = event_at(9, 10, false);
        declined_timed.accepted = false;
        let kept_event = event_at(9, 10, false);

        let survivors = apply_pipeline(&pipeline, vec![accepted_all_day, declined_timed, kept_event.clone()]);
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].id, kept_event.id);
    }

    #[test]
    fn unknown_filter_name_is_skipped_not_fatal() {
        let configs = vec![FilterConfig { name: "TotallyMadeUp".to_string(), config: Default::default() }];
        let pipeline = build_pipeline(&configs).unwrap();
        assert!(pipeline.is_empty());
    }

    #[test]
    fn invalid_regex_option_is_fatal() {
        let mut config = crate::config::CustomMap::new();
        config.insert("ExcludeRegexp".to_string(), serde_yaml::Value::String("(".to_string()));
        let configs = vec![FilterConfig { name: "RegexTitle".to_string(), config }];
        assert!(build_pipeline(&configs).is_err());
    }
}
