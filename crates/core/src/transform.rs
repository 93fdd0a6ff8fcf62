//! Event transformers: named rewrites applied, in a fixed canonical order,
//! to the minimal scaffold derived from each surviving source event.
//! Unlike filters, an unknown transformer name is a fatal config error —
//! a missing transformer can silently leak data the operator meant to strip.

use crate::config::Transformer as TransformerConfig;
use crate::error::{ConfigError, TransformError};
use crate::metadata::fnv1a64;
use crate::model::{Attendee, Event};

pub trait Transformer: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, source: &Event, accumulator: Event) -> Result<Event, TransformError>;
}

/// Copies attendees, replacing every email with an RFC5322-valid dummy
/// derived from an FNV-1a-64 hash so invitations never actually leave.
pub struct KeepAttendees {
    pub use_email_as_display_name: bool,
}

impl Transformer for KeepAttendees {
    fn name(&self) -> &'static str {
        "KeepAttendees"
    }

    fn apply(&self, source: &Event, mut accumulator: Event) -> Result<Event, TransformError> {
        let mut sink_attendees = Vec::with_capacity(source.attendees.len());
        for attendee in &source.attendees {
            let display_name = if self.use_email_as_display_name {
                attendee.email.clone()
            } else {
                attendee.display_name.clone()
            };
            let dummy_email = format!("{}@localhost", fnv1a64(&attendee.email));
            if !looks_like_valid_address(&dummy_email) {
                return Err(TransformError::InvalidAttendeeEmail(dummy_email));
            }
            sink_attendees.push(Attendee { email: dummy_email, display_name });
        }
        accumulator.attendees = sink_attendees;
        Ok(accumulator)
    }
}

/// A minimal RFC5322 local-part/domain shape check; the dummy address is
/// always `<digits>@localhost`, so this only guards against a future bug
/// changing that shape.
fn looks_like_valid_address(address: &str) -> bool {
    match address.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains(' '),
        None => false,
    }
}

pub struct KeepLocation;

impl Transformer for KeepLocation {
    fn name(&self) -> &'static str {
        "KeepLocation"
    }

    fn apply(&self, source: &Event, mut accumulator: Event) -> Result<Event, TransformError> {
        accumulator.location = source.location.clone();
        Ok(accumulator)
    }
}

pub struct KeepReminders;

impl Transformer for KeepReminders {
    fn name(&self) -> &'static str {
        "KeepReminders"
    }

    fn apply(&self, source: &Event, mut accumulator: Event) -> Result<Event, TransformError> {
        accumulator.reminders = source.reminders.clone();
        Ok(accumulator)
    }
}

/// Copies the description, stripping HTML down to a safe subset, collapsing
/// `\r\n`, and truncating to 4000 characters with an ellipsis.
pub struct KeepDescription;

const MAX_DESCRIPTION_LEN: usize = 4000;

impl Transformer for KeepDescription {
    fn name(&self) -> &'static str {
        "KeepDescription"
    }

    fn apply(&self, source: &Event, mut accumulator: Event) -> Result<Event, TransformError> {
        let collapsed = source.description.replace("\r\n", "");
        let sanitized = ammonia::clean(&collapsed);
        let trimmed = sanitized.trim();
        accumulator.description = truncate_with_ellipsis(trimmed, MAX_DESCRIPTION_LEN);
        Ok(accumulator)
    }
}

fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{truncated}...")
}

/// Prepends a provenance banner pointing at the source meeting link, if any.
pub struct KeepMeetingLink;

impl Transformer for KeepMeetingLink {
    fn name(&self) -> &'static str {
        "KeepMeetingLink"
    }

    fn apply(&self, source: &Event, mut accumulator: Event) -> Result<Event, TransformError> {
        if !source.meeting_link.is_empty() {
            accumulator.description = format!(
                "original meeting link: {}\n\n############\n{}",
                source.meeting_link, accumulator.description
            );
        }
        Ok(accumulator)
    }
}

/// Prepends a provenance banner pointing at the provider's web view of the
/// source event, if it exposes one.
pub struct AddOriginalLink;

impl Transformer for AddOriginalLink {
    fn name(&self) -> &'static str {
        "AddOriginalLink"
    }

    fn apply(&self, source: &Event, mut accumulator: Event) -> Result<Event, TransformError> {
        if !source.html_link.is_empty() {
            accumulator.description = format!(
                "original event link: {}\n\n############\n{}",
                source.html_link, accumulator.description
            );
        }
        Ok(accumulator)
    }
}

pub struct KeepTitle;

impl Transformer for KeepTitle {
    fn name(&self) -> &'static str {
        "KeepTitle"
    }

    fn apply(&self, source: &Event, mut accumulator: Event) -> Result<Event, TransformError> {
        accumulator.title = source.title.clone();
        Ok(accumulator)
    }
}

pub struct PrefixTitle {
    pub prefix: String,
}

impl Transformer for PrefixTitle {
    fn name(&self) -> &'static str {
        "PrefixTitle"
    }

    fn apply(&self, _source: &Event, mut accumulator: Event) -> Result<Event, TransformError> {
        accumulator.title = format!("{}{}", self.prefix, accumulator.title);
        Ok(accumulator)
    }
}

pub struct ReplaceTitle {
    pub new_title: String,
}

impl Transformer for ReplaceTitle {
    fn name(&self) -> &'static str {
        "ReplaceTitle"
    }

    fn apply(&self, _source: &Event, mut accumulator: Event) -> Result<Event, TransformError> {
        accumulator.title = self.new_title.clone();
        Ok(accumulator)
    }
}

const VALID_VISIBILITIES: [&str; 4] = ["default", "public", "private", "confidential"];

/// Copies a validated visibility enum onto the scaffold event. Invalid or
/// empty values leave the accumulator's visibility untouched.
pub struct SetVisibility {
    pub visibility: String,
}

impl Transformer for SetVisibility {
    fn name(&self) -> &'static str {
        "SetVisibility"
    }

    fn apply(&self, _source: &Event, mut accumulator: Event) -> Result<Event, TransformError> {
        if VALID_VISIBILITIES.contains(&self.visibility.as_str()) {
            accumulator.visibility = self.visibility.clone();
        }
        Ok(accumulator)
    }
}

fn option_str(config: &crate::config::CustomMap, key: &str) -> Option<String> {
    config.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn option_bool(config: &crate::config::CustomMap, key: &str) -> bool {
    config.get(key).and_then(serde_yaml::Value::as_bool).unwrap_or(false)
}

/// The fixed canonical order every transformer pipeline runs in,
/// regardless of the order transformers appear in the config. Later
/// transformers overwrite fields earlier ones set.
const CANONICAL_ORDER: &[&str] = &[
    "KeepAttendees",
    "KeepLocation",
    "KeepReminders",
    "KeepDescription",
    "KeepMeetingLink",
    "AddOriginalLink",
    "SetVisibility",
    "KeepTitle",
    "PrefixTitle",
    "ReplaceTitle",
];

/// Builds the transformer pipeline from config, re-ordering it into the
/// canonical sequence. An unknown transformer name is a fatal `ConfigError`.
pub fn build_pipeline(
    configs: &[TransformerConfig],
) -> Result<Vec<Box<dyn Transformer>>, ConfigError> {
    for entry in configs {
        if !CANONICAL_ORDER.contains(&entry.name.as_str()) {
            return Err(ConfigError::UnknownTransformer(entry.name.clone()));
        }
    }

    let mut pipeline: Vec<Box<dyn Transformer>> = Vec::new();
    for name in CANONICAL_ORDER {
        let Some(entry) = configs.iter().find(|c| c.name == *name) else {
            continue;
        };
        let transformer: Box<dyn Transformer> = match *name {
            "KeepAttendees" => Box::new(KeepAttendees {
                use_email_as_display_name: option_bool(&entry.config, "UseEmailAsDisplayName"),
            }),
            "KeepLocation" => Box::new(KeepLocation),
            "KeepReminders" => Box::new(KeepReminders),
            "KeepDescription" => Box::new(KeepDescription),
            "KeepMeetingLink" => Box::new(KeepMeetingLink),
            "AddOriginalLink" => Box::new(AddOriginalLink),
            "SetVisibility" => Box::new(SetVisibility {
                visibility: option_str(&entry.config, "Visibility").unwrap_or_default(),
            }),
            "KeepTitle" => Box::new(KeepTitle),
            "PrefixTitle" => Box::new(PrefixTitle {
                prefix: option_str(&entry.config, "Prefix").ok_or_else(|| {
                    ConfigError::InvalidTransformerOption {
                        transformer: "PrefixTitle".to_string(),
                        reason: "Prefix is required".to_string(),
                    }
                })?,
            }),
            "ReplaceTitle" => Box::new(ReplaceTitle {
                new_title: option_str(&entry.config, "NewTitle").ok_or_else(|| {
                    ConfigError::InvalidTransformerOption {
                        transformer: "ReplaceTitle".to_string(),
                        reason: "NewTitle is required".to_string(),
                    }
                })?,
            }),
            unreachable_name => unreachable!("unhandled canonical transformer {unreachable_name}"),
        };
        pipeline.push(transformer);
    }
    Ok(pipeline)
}

/// Runs the scaffold through every transformer in canonical order.
pub fn apply_pipeline(
    pipeline: &[Box<dyn Transformer>],
    source: &Event,
) -> Result<Event, TransformError> {
    let mut accumulator = Event::new_sync_event(source);
    for transformer in pipeline {
        accumulator = transformer.apply(source, accumulator)?;
    }
    Ok(accumulator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;
    use crate::types::EventId;
    use chrono::{TimeZone, Utc};

    fn source_event() -> Event {
        Event {
            ical_uid: "uid".into(),
            id: EventId::new("native-1"),
            title: "Planning".into(),
            description: "line one\r\nline two <b>bold</b>".into(),
            location: "Room 9".into(),
            start_time: Utc.with_ymd_and_hms(2026, 4, 1, 10, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2026, 4, 1, 11, 0, 0).unwrap(),
            all_day: false,
            meeting_link: "https://meet.example/xyz".into(),
            accepted: true,
            attendees: vec![Attendee { email: "a@example.com".into(), display_name: "A".into() }],
            reminders: vec![],
            metadata: Some(Metadata::new("native-1", "https://example.com/e/1", "fp")),
            html_link: "https://calendar.example/view/1".into(),
            visibility: String::new(),
        }
    }

    #[test]
    fn keep_attendees_hashes_emails() {
        let t = KeepAttendees { use_email_as_display_name: false };
        let scaffold = Event::new_sync_event(&source_event());
        let result = t.apply(&source_event(), scaffold).unwrap();
        assert_eq!(result.attendees.len(), 1);
        assert!(result.attendees[0].email.ends_with("@localhost"));
        assert_ne!(result.attendees[0].email, "a@example.com");
        assert_eq!(result.attendees[0].display_name, "A");
    }

    #[test]
    fn keep_attendees_can_use_email_as_display_name() {
        let t = KeepAttendees { use_email_as_display_name: true };
        let scaffold = Event::new_sync_event(&source_event());
        let result = t.apply(&source_event(), scaffold).unwrap();
        assert_eq!(result.attendees[0].display_name, "a@example.com");
    }

    #[test]
    fn keep_description_strips_html_and_collapses_crlf() {
        let t = KeepDescription;
        let scaffold = Event::new_sync_event(&source_event());
        let result = t.apply(&source_event(), scaffold).unwrap();
        assert!(!result.description.contains("<b>"));
        assert!(!result.description.contains('\r'));
    }

    #[test]
    fn keep_description_truncates_long_text() {
        let mut source = source_event();
        source.description = "x".repeat(5000);
        let t = KeepDescription;
        let scaffold = Event::new_sync_event(&source);
        let result = t.apply(&source, scaffold).unwrap();
        assert_eq!(result.description.chars().count(), MAX_DESCRIPTION_LEN);
        assert!(result.description.ends_with("..."));
    }

    #[test]
    fn keep_meeting_link_prepends_banner() {
        let t = KeepMeetingLink;
        let scaffold = Event::new_sync_event(&source_event());
        let result = t.apply(&source_event(), scaffold).unwrap();
        assert!(result.description.starts_with("original meeting link: https://meet.example/xyz"));
    }

    #[test]
    fn add_original_link_prepends_banner() {
        let t = AddOriginalLink;
        let scaffold = Event::new_sync_event(&source_event());
        let result = t.apply(&source_event(), scaffold).unwrap();
        assert!(result.description.starts_with("original event link: https://calendar.example/view/1"));
    }

    #[test]
    fn set_visibility_rejects_invalid_values() {
        let t = SetVisibility { visibility: "nonsense".to_string() };
        let scaffold = Event::new_sync_event(&source_event());
        let result = t.apply(&source_event(), scaffold).unwrap();
        assert_eq!(result.visibility, "");
    }

    #[test]
    fn set_visibility_accepts_valid_values() {
        let t = SetVisibility { visibility: "private".to_string() };
        let scaffold = Event::new_sync_event(&source_event());
        let result = t.apply(&source_event(), scaffold).unwrap();
        assert_eq!(result.visibility, "private");
    }

    #[test]
    fn keep_title_then_replace_title_yields_replacement() {
        let configs = vec![
            TransformerConfig { name: "KeepTitle".to_string(), config: Default::default() },
            TransformerConfig {
                name: "ReplaceTitle".to_string(),
                config: {
                    let mut m = crate::config::CustomMap::new();
                    m.insert("NewTitle".to_string(), serde_yaml::Value::String("Busy".to_string()));
                    m
                },
            },
        ];
        let pipeline = build_pipeline(&configs).unwrap();
        let result = apply_pipeline(&pipeline, &source_event()).unwrap();
        assert_eq!(result.title, "Busy");
    }

    #[test]
    fn unknown_transformer_name_is_fatal() {
        let configs =
            vec![TransformerConfig { name: "NotReal".to_string(), config: Default::default() }];
        assert!(build_pipeline(&configs).is_err());
    }

    #[test]
    fn pipeline_runs_in_canonical_order_regardless_of_config_order() {
        let configs = vec![
            TransformerConfig {
                name: "PrefixTitle".to_string(),
                config: {
                    let mut m = crate::config::CustomMap::new();
                    m.insert("Prefix".to_string(), serde_yaml::Value::String("[copy] ".to_string()));
                    m
                },
            },
            TransformerConfig { name: "KeepTitle".to_string(), config: Default::default() },
        ];
        let pipeline = build_pipeline(&configs).unwrap();
        // KeepTitle must run before PrefixTitle regardless of config order.
        assert_eq!(pipeline[0].name(), "KeepTitle");
        assert_eq!(pipeline[1].name(), "PrefixTitle");
        let result = apply_pipeline(&pipeline, &source_event()).unwrap();
        assert_eq!(result.title, "[copy] Planning");
    }
}
