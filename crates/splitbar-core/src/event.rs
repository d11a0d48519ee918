//! Interaction events and the rules for admitting them.
//!
//! Events are append-only: once stored, a row is never updated or deleted by
//! this crate. Incoming events arrive as loosely shaped [`RawEvent`]s and are
//! validated one by one, so a single malformed event never sinks its batch.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Default cap on events per batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;

/// Default impression suppression window.
pub const DEFAULT_IMPRESSION_WINDOW_SECS: i64 = 5 * 60;

/// Client labels that are coerced to [`EventType::Click`] when
/// [`EventPolicy::coerce_click_aliases`] is set.
pub const CLICK_ALIASES: [&str; 7] = [
  "cta",
  "cta_click",
  "secondary",
  "secondary_click",
  "submit",
  "button",
  "link",
];

// ─── EventType ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
  Impression,
  Click,
  Conversion,
}

impl EventType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Impression => "impression",
      Self::Click => "click",
      Self::Conversion => "conversion",
    }
  }

  /// Parse a recognised type; with `coerce_click_aliases`, labels in
  /// [`CLICK_ALIASES`] map to `Click`.
  pub fn parse(s: &str, coerce_click_aliases: bool) -> Option<Self> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
      "impression" => Some(Self::Impression),
      "click" => Some(Self::Click),
      "conversion" => Some(Self::Conversion),
      other if coerce_click_aliases && CLICK_ALIASES.contains(&other) => Some(Self::Click),
      _ => None,
    }
  }
}

impl fmt::Display for EventType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

// ─── Event ───────────────────────────────────────────────────────────────────

/// A validated, storable event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
  pub event_id:      Uuid,
  pub experiment_id: String,
  /// Empty for the implicit control arm.
  pub variant_id:    String,
  pub visitor_id:    String,
  pub event_type:    EventType,
  pub value:         Option<f64>,
  pub session_id:    Option<String>,
  /// Server receive time.
  pub recorded_at:   DateTime<Utc>,
}

// ─── RawEvent ────────────────────────────────────────────────────────────────

/// An event as posted by a client. Ids may arrive as strings or integers and
/// in either snake or camel case.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEvent {
  #[serde(default, alias = "experimentId", deserialize_with = "loose_id")]
  pub experiment_id: Option<String>,
  #[serde(default, alias = "variantId", deserialize_with = "loose_id")]
  pub variant_id:    Option<String>,
  #[serde(default, alias = "visitorId", deserialize_with = "loose_id")]
  pub visitor_id:    Option<String>,
  #[serde(default, alias = "eventType", alias = "type")]
  pub event_type:    Option<String>,
  #[serde(default)]
  pub value:         Option<f64>,
  #[serde(default, alias = "sessionId", deserialize_with = "loose_id")]
  pub session_id:    Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseId {
  Text(String),
  Int(i64),
}

/// Serde adapter for ids that may arrive as a string or an integer.
pub fn loose_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(Option::<LooseId>::deserialize(deserializer)?.map(|id| match id {
    LooseId::Text(s) => s,
    LooseId::Int(i) => i.to_string(),
  }))
}

fn non_blank(s: Option<String>) -> Option<String> {
  s.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
}

impl RawEvent {
  /// Validate and stamp this event with `received_at`.
  pub fn validate(self, policy: &EventPolicy, received_at: DateTime<Utc>) -> Result<Event> {
    let experiment_id = non_blank(self.experiment_id)
      .ok_or_else(|| Error::InvalidEvent("missing experiment_id".into()))?;

    let raw_type = non_blank(self.event_type)
      .ok_or_else(|| Error::InvalidEvent("missing event_type".into()))?;
    let event_type = EventType::parse(&raw_type, policy.coerce_click_aliases)
      .ok_or_else(|| Error::InvalidEvent(format!("unrecognised event_type {raw_type:?}")))?;

    if let Some(v) = self.value
      && !v.is_finite()
    {
      return Err(Error::InvalidEvent("value is not a finite number".into()));
    }

    Ok(Event {
      event_id: Uuid::new_v4(),
      experiment_id,
      variant_id: self.variant_id.map(|v| v.trim().to_owned()).unwrap_or_default(),
      visitor_id: self.visitor_id.map(|v| v.trim().to_owned()).unwrap_or_default(),
      event_type,
      value: self.value,
      session_id: non_blank(self.session_id),
      recorded_at: received_at,
    })
  }
}

// ─── Policy & outcome ────────────────────────────────────────────────────────

/// Tunables for the Event Recorder.
#[derive(Debug, Clone)]
pub struct EventPolicy {
  pub max_batch_size:       usize,
  /// A repeat impression of the same `(experiment, variant, visitor)` within
  /// this window is accepted but not stored.
  pub impression_window:    Duration,
  pub coerce_click_aliases: bool,
}

impl Default for EventPolicy {
  fn default() -> Self {
    Self {
      max_batch_size:       DEFAULT_MAX_BATCH_SIZE,
      impression_window:    Duration::seconds(DEFAULT_IMPRESSION_WINDOW_SECS),
      coerce_click_aliases: true,
    }
  }
}

/// What the store did with one validated event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recorded {
  Stored,
  /// A repeat impression inside the window; accepted but not stored.
  Suppressed,
  /// Same experiment, visitor, type and session as a stored event.
  Duplicate,
}

/// Per-batch counts returned by the Event Recorder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
  /// Events counted as successful, including suppressed impressions.
  pub accepted:   usize,
  /// Accepted impressions that were not stored because of the window.
  pub suppressed: usize,
  pub rejected:   usize,
  /// Events dropped by the per-session cap.
  pub duplicates: usize,
}

impl BatchOutcome {
  /// Number of rows actually appended.
  pub fn stored(&self) -> usize { self.accepted - self.suppressed }
}
