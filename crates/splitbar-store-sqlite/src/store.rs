//! [`SqliteStore`]: the SQLite implementation of [`ExperimentStore`].

use std::{collections::BTreeMap, path::Path};

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior};

use splitbar_core::{
  assignment::{Assignment, AssignmentKey, NewAssignment},
  event::{Event, EventType, Recorded},
  experiment::Experiment,
  stats::{ExperimentTally, VariantTally},
  store::ExperimentStore,
};

use crate::{
  encode::{
    ASSIGNMENT_COLUMNS, RawAssignment, RawEventRow, RawExperiment, decode_event_type, encode_dt,
    encode_event_type, encode_variants, encode_visitor_kind,
  },
  schema::SCHEMA,
  Result,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Splitbar store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted. All
/// statements run on the connection's dedicated thread, so each individual
/// statement (in particular the assignment upsert) is atomic.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Every stored event for an experiment, oldest first.
  pub async fn events_for(&self, experiment_id: &str) -> Result<Vec<Event>> {
    let id = experiment_id.to_owned();

    let raws: Vec<RawEventRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT event_id, experiment_id, variant_id, visitor_id, event_type,
                  value, session_id, recorded_at
           FROM events
           WHERE experiment_id = ?1
           ORDER BY recorded_at, rowid",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id], |row| {
            Ok(RawEventRow {
              event_id:      row.get(0)?,
              experiment_id: row.get(1)?,
              variant_id:    row.get(2)?,
              visitor_id:    row.get(3)?,
              event_type:    row.get(4)?,
              value:         row.get(5)?,
              session_id:    row.get(6)?,
              recorded_at:   row.get(7)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawEventRow::into_event).collect()
  }
}

// ─── ExperimentStore impl ────────────────────────────────────────────────────

impl ExperimentStore for SqliteStore {
  type Error = crate::Error;

  // ── Experiments ───────────────────────────────────────────────────────────

  async fn put_experiment(&self, experiment: Experiment) -> Result<Experiment> {
    let id_str        = experiment.experiment_id.clone();
    let enabled       = experiment.enabled;
    let variants_json = encode_variants(&experiment.variants)?;
    let at_str        = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO experiments (experiment_id, enabled, variants_json, updated_at)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (experiment_id) DO UPDATE SET
             enabled       = excluded.enabled,
             variants_json = excluded.variants_json,
             updated_at    = excluded.updated_at",
          rusqlite::params![id_str, enabled, variants_json, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(experiment)
  }

  async fn get_experiment(&self, experiment_id: &str) -> Result<Option<Experiment>> {
    let id_str = experiment_id.to_owned();

    let raw: Option<RawExperiment> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT experiment_id, enabled, variants_json FROM experiments
             WHERE experiment_id = ?1",
            rusqlite::params![id_str],
            |row| {
              Ok(RawExperiment {
                experiment_id: row.get(0)?,
                enabled:       row.get(1)?,
                variants_json: row.get(2)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawExperiment::into_experiment).transpose()
  }

  async fn list_experiments(&self) -> Result<Vec<Experiment>> {
    let raws: Vec<RawExperiment> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT experiment_id, enabled, variants_json FROM experiments
           ORDER BY experiment_id",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawExperiment {
              experiment_id: row.get(0)?,
              enabled:       row.get(1)?,
              variants_json: row.get(2)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawExperiment::into_experiment).collect()
  }

  // ── Assignments ───────────────────────────────────────────────────────────

  async fn touch_assignment(
    &self,
    key:     &AssignmentKey,
    seen_at: DateTime<Utc>,
  ) -> Result<Option<Assignment>> {
    let exp_str     = key.experiment_id.clone();
    let visitor_str = key.visitor_id.clone();
    let kind_str    = encode_visitor_kind(key.visitor_kind);
    let at_str      = encode_dt(seen_at);

    let raw: Option<RawAssignment> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "UPDATE assignments SET
             last_seen_at = MAX(last_seen_at, ?4),
             seen_count   = seen_count + 1
           WHERE experiment_id = ?1 AND visitor_id = ?2 AND visitor_kind = ?3
           RETURNING {ASSIGNMENT_COLUMNS}"
        );
        Ok(conn
          .query_row(
            &sql,
            rusqlite::params![exp_str, visitor_str, kind_str, at_str],
            RawAssignment::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawAssignment::into_assignment).transpose()
  }

  async fn upsert_assignment(&self, new: NewAssignment) -> Result<Assignment> {
    let exp_str     = new.key.experiment_id;
    let visitor_str = new.key.visitor_id;
    let kind_str    = encode_visitor_kind(new.key.visitor_kind);
    let variant_str = new.variant_id;
    let at_str      = encode_dt(new.at);

    // First writer wins `variant_id` and `assigned_at`; a losing writer only
    // touches the existing row.
    let raw: RawAssignment = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "INSERT INTO assignments (
             experiment_id, visitor_id, visitor_kind, variant_id,
             assigned_at, last_seen_at, seen_count
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?5, 1)
           ON CONFLICT (experiment_id, visitor_id, visitor_kind) DO UPDATE SET
             last_seen_at = MAX(last_seen_at, excluded.last_seen_at),
             seen_count   = seen_count + 1
           RETURNING {ASSIGNMENT_COLUMNS}"
        );
        Ok(conn.query_row(
          &sql,
          rusqlite::params![exp_str, visitor_str, kind_str, variant_str, at_str],
          RawAssignment::from_row,
        )?)
      })
      .await?;

    raw.into_assignment()
  }

  async fn get_assignment(&self, key: &AssignmentKey) -> Result<Option<Assignment>> {
    let exp_str     = key.experiment_id.clone();
    let visitor_str = key.visitor_id.clone();
    let kind_str    = encode_visitor_kind(key.visitor_kind);

    let raw: Option<RawAssignment> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {ASSIGNMENT_COLUMNS} FROM assignments
           WHERE experiment_id = ?1 AND visitor_id = ?2 AND visitor_kind = ?3"
        );
        Ok(conn
          .query_row(
            &sql,
            rusqlite::params![exp_str, visitor_str, kind_str],
            RawAssignment::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawAssignment::into_assignment).transpose()
  }

  // ── Events ────────────────────────────────────────────────────────────────

  async fn append_event(&self, event: Event) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        insert_event(conn, &event)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn record_event(&self, event: Event, impressions_since: DateTime<Utc>) -> Result<Recorded> {
    let since_str = encode_dt(impressions_since);

    let recorded = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if event.event_type == EventType::Impression {
          let reload: bool = tx.query_row(
            "SELECT EXISTS (
               SELECT 1 FROM events
               WHERE visitor_id = ?1 AND experiment_id = ?2
                 AND event_type = 'impression' AND variant_id = ?3
                 AND recorded_at >= ?4
             )",
            rusqlite::params![event.visitor_id, event.experiment_id, event.variant_id, since_str],
            |row| row.get(0),
          )?;
          if reload {
            return Ok(Recorded::Suppressed);
          }
        }

        if let Some(session) = &event.session_id {
          let seen: bool = tx.query_row(
            "SELECT EXISTS (
               SELECT 1 FROM events
               WHERE visitor_id = ?1 AND experiment_id = ?2
                 AND event_type = ?3 AND session_id = ?4
             )",
            rusqlite::params![
              event.visitor_id,
              event.experiment_id,
              encode_event_type(event.event_type),
              session,
            ],
            |row| row.get(0),
          )?;
          if seen {
            return Ok(Recorded::Duplicate);
          }
        }

        insert_event(&tx, &event)?;
        tx.commit()?;
        Ok(Recorded::Stored)
      })
      .await?;
    Ok(recorded)
  }

  // ── Aggregates ────────────────────────────────────────────────────────────

  async fn tally(&self, experiment_id: &str) -> Result<ExperimentTally> {
    let id_str = experiment_id.to_owned();

    let (visitors, events, total) = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT variant_id, COUNT(DISTINCT visitor_kind || ':' || visitor_id)
           FROM assignments WHERE experiment_id = ?1
           GROUP BY variant_id",
        )?;
        let visitors: Vec<(String, i64)> = stmt
          .query_map(rusqlite::params![id_str], |r| Ok((r.get(0)?, r.get(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(
          "SELECT variant_id, event_type, COUNT(*), COALESCE(SUM(value), 0.0)
           FROM events WHERE experiment_id = ?1
           GROUP BY variant_id, event_type",
        )?;
        let events: Vec<(String, String, i64, f64)> = stmt
          .query_map(rusqlite::params![id_str], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let total: i64 = conn.query_row(
          "SELECT COUNT(DISTINCT visitor_kind || ':' || visitor_id) FROM assignments WHERE experiment_id = ?1",
          rusqlite::params![id_str],
          |r| r.get(0),
        )?;

        Ok((visitors, events, total))
      })
      .await?;

    let mut per_variant: BTreeMap<String, VariantTally> = BTreeMap::new();
    for (variant_id, count) in visitors {
      per_variant
        .entry(variant_id.clone())
        .or_insert_with(|| VariantTally { variant_id, ..VariantTally::default() })
        .unique_visitors = count.max(0) as u64;
    }

    for (variant_id, type_str, count, value) in events {
      let t = per_variant
        .entry(variant_id.clone())
        .or_insert_with(|| VariantTally { variant_id, ..VariantTally::default() });
      let count = count.max(0) as u64;
      match decode_event_type(&type_str)? {
        EventType::Impression => t.impressions += count,
        EventType::Click => t.clicks += count,
        EventType::Conversion => {
          t.conversions += count;
          t.conversion_value += value;
        }
      }
    }

    Ok(ExperimentTally {
      variants:       per_variant.into_values().collect(),
      total_visitors: total.max(0) as u64,
    })
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn insert_event(conn: &rusqlite::Connection, event: &Event) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO events (
       event_id, experiment_id, variant_id, visitor_id,
       event_type, value, session_id, recorded_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    rusqlite::params![
      event.event_id.hyphenated().to_string(),
      event.experiment_id,
      event.variant_id,
      event.visitor_id,
      encode_event_type(event.event_type),
      event.value,
      event.session_id,
      encode_dt(event.recorded_at),
    ],
  )?;
  Ok(())
}
