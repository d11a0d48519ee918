//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds, `Z`
//! suffix) so that SQL string comparison orders them chronologically. The
//! variant list is stored as compact JSON.

use chrono::{DateTime, SecondsFormat, Utc};
use splitbar_core::{
  assignment::{Assignment, AssignmentKey},
  event::{Event, EventType},
  experiment::{Experiment, Variant},
  identity::VisitorKind,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── DateTime<Utc>
// ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Micros, true) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── VisitorKind
// ──────────────────────────────────────────────────────────────

pub fn encode_visitor_kind(k: VisitorKind) -> &'static str { k.as_str() }

pub fn decode_visitor_kind(s: &str) -> Result<VisitorKind> {
  VisitorKind::parse(s).ok_or_else(|| Error::UnknownEnum {
    column: "visitor_kind",
    value:  s.to_owned(),
  })
}

// ─── EventType ───────────────────────────────────────────────────────────────

pub fn encode_event_type(t: EventType) -> &'static str { t.as_str() }

pub fn decode_event_type(s: &str) -> Result<EventType> {
  EventType::parse(s, false).ok_or_else(|| Error::UnknownEnum {
    column: "event_type",
    value:  s.to_owned(),
  })
}

// ─── Variants ────────────────────────────────────────────────────────────────

pub fn encode_variants(variants: &[Variant]) -> Result<String> {
  Ok(serde_json::to_string(variants)?)
}

pub fn decode_variants(s: &str) -> Result<Vec<Variant>> { Ok(serde_json::from_str(s)?) }

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from an `experiments` row.
pub struct RawExperiment {
  pub experiment_id: String,
  pub enabled:       bool,
  pub variants_json: String,
}

impl RawExperiment {
  pub fn into_experiment(self) -> Result<Experiment> {
    Ok(Experiment {
      experiment_id: self.experiment_id,
      enabled:       self.enabled,
      variants:      decode_variants(&self.variants_json)?,
    })
  }
}

/// Raw values read directly from an `assignments` row.
pub struct RawAssignment {
  pub experiment_id: String,
  pub visitor_id:    String,
  pub visitor_kind:  String,
  pub variant_id:    String,
  pub assigned_at:   String,
  pub last_seen_at:  String,
  pub seen_count:    i64,
}

/// Column list matching [`RawAssignment::from_row`].
pub const ASSIGNMENT_COLUMNS: &str =
  "experiment_id, visitor_id, visitor_kind, variant_id, assigned_at, last_seen_at, seen_count";

impl RawAssignment {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      experiment_id: row.get(0)?,
      visitor_id:    row.get(1)?,
      visitor_kind:  row.get(2)?,
      variant_id:    row.get(3)?,
      assigned_at:   row.get(4)?,
      last_seen_at:  row.get(5)?,
      seen_count:    row.get(6)?,
    })
  }

  pub fn into_assignment(self) -> Result<Assignment> {
    Ok(Assignment {
      key:          AssignmentKey {
        experiment_id: self.experiment_id,
        visitor_id:    self.visitor_id,
        visitor_kind:  decode_visitor_kind(&self.visitor_kind)?,
      },
      variant_id:   self.variant_id,
      assigned_at:  decode_dt(&self.assigned_at)?,
      last_seen_at: decode_dt(&self.last_seen_at)?,
      seen_count:   self.seen_count.max(0) as u64,
    })
  }
}

/// Raw values read directly from an `events` row.
pub struct RawEventRow {
  pub event_id:      String,
  pub experiment_id: String,
  pub variant_id:    String,
  pub visitor_id:    String,
  pub event_type:    String,
  pub value:         Option<f64>,
  pub session_id:    Option<String>,
  pub recorded_at:   String,
}

impl RawEventRow {
  pub fn into_event(self) -> Result<Event> {
    Ok(Event {
      event_id:      Uuid::parse_str(&self.event_id)?,
      experiment_id: self.experiment_id,
      variant_id:    self.variant_id,
      visitor_id:    self.visitor_id,
      event_type:    decode_event_type(&self.event_type)?,
      value:         self.value,
      session_id:    self.session_id,
      recorded_at:   decode_dt(&self.recorded_at)?,
    })
  }
}
