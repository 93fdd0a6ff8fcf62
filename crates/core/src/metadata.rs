//! Metadata fingerprinting: `SyncId`, `CalendarFingerprint`, and the
//! provider-extension codec used to round-trip `Metadata` through adapters.

use crate::types::SyncId;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;

/// The metadata CalendarSync attaches to every event it has ever written.
///
/// `Metadata == None` on a sink event means "not managed by any run of this
/// engine" — such events are never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Stable correlation key between a source event and its sink copy.
    pub sync_id: SyncId,
    /// Informational link back to the source event.
    pub original_event_uri: String,
    /// Fingerprint of the calendar this event was imported from.
    pub source_id: String,
}

impl Metadata {
    pub fn new(
        source_native_id: &str,
        original_event_uri: impl Into<String>,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            sync_id: sync_id_for(source_native_id),
            original_event_uri: original_event_uri.into(),
            source_id: source_id.into(),
        }
    }

    /// A bare metadata record derived only from the native event id, used
    /// when an adapter cannot find any recognizable extension data — "not
    /// previously touched by this engine" but we still need a `SyncId`.
    /// Stamped with the reading adapter's own `calendar_fingerprint()`, the
    /// same way `ensureMetadata` attributes a freshly-seen source event to
    /// the adapter that produced it.
    pub fn fabricate(native_event_id: &str, source_id: impl Into<String>) -> Self {
        Self {
            sync_id: sync_id_for(native_event_id),
            original_event_uri: String::new(),
            source_id: source_id.into(),
        }
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a-64, chosen for speed and stability; cryptographic strength is not required.
pub fn fnv1a64(input: &str) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// `SyncId(source_event_id) = decimal(FNV1a64(source_event_id))`.
///
/// Stored as a decimal string because several providers impose
/// character-set limits on extension values.
pub fn sync_id_for(source_native_id: &str) -> SyncId {
    SyncId(fnv1a64(source_native_id).to_string())
}

/// `CalendarFingerprint = base64url(SHA1(identifying_tuple))`.
///
/// For API-keyed providers the tuple is just the calendar id; for CalDAV
/// it is `(username, home-set path, calendar id)`. The separator ensures
/// `("ab", "c")` and `("a", "bc")` fingerprint differently.
pub fn calendar_fingerprint(parts: &[&str]) -> String {
    let joined = parts.join("\u{1f}");
    let digest = Sha1::digest(joined.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Maximum length, in characters, of a provider extension key (prefix +
/// field name) — the strictest provider we support caps this at 44.
const MAX_EXTENSION_KEY_LEN: usize = 44;

const SYNC_ID_FIELD: &str = "SyncID";
const ORIGINAL_EVENT_URI_FIELD: &str = "OriginalEventUri";
const SOURCE_ID_FIELD: &str = "SourceID";

/// Serializes `Metadata` into a namespaced extension map, keyed by
/// `"{prefix}{field}"`. Adapters persist this map into whatever
/// provider-specific extension slot they expose.
pub fn encode_metadata(prefix: &str, metadata: &Metadata) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for (field, value) in [
        (SYNC_ID_FIELD, metadata.sync_id.as_str().to_string()),
        (
            ORIGINAL_EVENT_URI_FIELD,
            metadata.original_event_uri.clone(),
        ),
        (SOURCE_ID_FIELD, metadata.source_id.clone()),
    ] {
        let key = format!("{prefix}{field}");
        debug_assert!(
            key.len() <= MAX_EXTENSION_KEY_LEN,
            "metadata extension key '{key}' exceeds the {MAX_EXTENSION_KEY_LEN}-character provider budget"
        );
        map.insert(key, value);
    }
    map
}

/// Decodes `Metadata` from a namespaced extension map. Tries the
/// namespaced prefix first, falls back to the unprefixed legacy form, and
/// otherwise fabricates a fresh record from the native event id, attributed
/// to `fallback_source_id` (the reading adapter's own fingerprint).
pub fn decode_metadata(
    prefix: &str,
    extensions: &BTreeMap<String, String>,
    native_event_id: &str,
    fallback_source_id: &str,
) -> Metadata {
    try_decode(extensions, prefix)
        .or_else(|| try_decode(extensions, ""))
        .unwrap_or_else(|| Metadata::fabricate(native_event_id, fallback_source_id))
}

fn try_decode(extensions: &BTreeMap<String, String>, prefix: &str) -> Option<Metadata> {
    let sync_id = extensions.get(&format!("{prefix}{SYNC_ID_FIELD}"))?.clone();
    let original_event_uri = extensions
        .get(&format!("{prefix}{ORIGINAL_EVENT_URI_FIELD}"))
        .cloned()
        .unwrap_or_default();
    let source_id = extensions
        .get(&format!("{prefix}{SOURCE_ID_FIELD}"))
        .cloned()
        .unwrap_or_default();
    Some(Metadata {
        sync_id: SyncId(sync_id),
        original_event_uri,
        source_id,
    })
}
