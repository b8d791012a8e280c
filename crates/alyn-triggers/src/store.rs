//! SQLite-backed trigger persistence.

use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::error::{Result, TriggerError};
use crate::rrule::RecurrenceRule;
use crate::types::{parse_timestamp, to_storage_timestamp, TriggerRecord, TriggerStatus};

/// Longest error text persisted in `last_error`.
const MAX_ERROR_LEN: usize = 500;

/// Fields for a new trigger. `start_time` defaults to now; `status`
/// defaults to active.
#[derive(Debug, Clone, Default)]
pub struct NewTrigger {
    pub agent_name: String,
    pub payload: String,
    pub recurrence_rule: Option<String>,
    pub start_time: Option<String>,
    pub timezone: String,
    pub status: Option<String>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct TriggerUpdate {
    pub payload: Option<String>,
    pub recurrence_rule: Option<String>,
    pub start_time: Option<String>,
    pub timezone: Option<String>,
    pub status: Option<String>,
}

/// Thread-safe store for trigger records.
///
/// Wraps a single SQLite connection in a `Mutex`; the scheduler and the
/// trigger tools share one store handle.
pub struct TriggerStore {
    conn: Mutex<Connection>,
}

fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS triggers (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            agent_name      TEXT NOT NULL,
            payload         TEXT NOT NULL,
            recurrence_rule TEXT,
            start_time      TEXT NOT NULL,
            next_fire       TEXT,
            timezone        TEXT NOT NULL,
            status          TEXT NOT NULL,
            last_error      TEXT,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_triggers_due
            ON triggers (status, next_fire);",
    )?;
    Ok(())
}

fn row_to_trigger(row: &rusqlite::Row<'_>) -> rusqlite::Result<TriggerRecord> {
    let status_str: String = row.get(8)?;
    let status = TriggerStatus::from_str(&status_str).unwrap_or(TriggerStatus::Paused);
    Ok(TriggerRecord {
        id: row.get(0)?,
        agent_name: row.get(1)?,
        payload: row.get(2)?,
        recurrence_rule: row.get(3)?,
        start_time: row.get(4)?,
        next_fire: row.get(5)?,
        timezone: row.get(6)?,
        last_error: row.get(7)?,
        status,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

const SELECT_COLUMNS: &str = "id, agent_name, payload, recurrence_rule, start_time, next_fire,
     timezone, last_error, status, created_at, updated_at";

impl TriggerStore {
    /// Wrap an open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        Self::new(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn zone(name: &str) -> Tz {
        name.parse().unwrap_or_else(|_| {
            warn!(timezone = name, "unknown trigger timezone, using UTC");
            Tz::UTC
        })
    }

    /// Initial `next_fire`: a future start wins; otherwise the first
    /// recurrence occurrence after now; otherwise fire immediately.
    fn initial_next_fire(
        start: DateTime<Utc>,
        rule: Option<&RecurrenceRule>,
        tz: Tz,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if start > now {
            return Some(start);
        }
        match rule {
            Some(rule) => rule.next_occurrence(start, now, tz),
            None => Some(now),
        }
    }

    pub fn create(&self, new: NewTrigger) -> Result<TriggerRecord> {
        let now = Utc::now();
        let start = match new.start_time.as_deref() {
            Some(value) => parse_timestamp(value)?,
            None => now,
        };
        let rule = new
            .recurrence_rule
            .as_deref()
            .map(RecurrenceRule::parse)
            .transpose()?;
        let status = match new.status.as_deref() {
            Some(value) => TriggerStatus::from_str(value)
                .map_err(TriggerError::InvalidStatus)?,
            None => TriggerStatus::Active,
        };
        let tz = Self::zone(&new.timezone);

        let next_fire = Self::initial_next_fire(start, rule.as_ref(), tz, now);
        let status = if next_fire.is_none() {
            TriggerStatus::Completed
        } else {
            status
        };

        let now_str = to_storage_timestamp(now);
        let start_str = to_storage_timestamp(start);
        let next_str = next_fire.map(to_storage_timestamp);

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO triggers
             (agent_name, payload, recurrence_rule, start_time, next_fire,
              timezone, status, last_error, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,NULL,?8,?8)",
            rusqlite::params![
                new.agent_name,
                new.payload,
                new.recurrence_rule,
                start_str,
                next_str,
                new.timezone,
                status.to_string(),
                now_str,
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!(trigger_id = id, agent = %new.agent_name, next_fire = ?next_str, "trigger created");

        Ok(TriggerRecord {
            id,
            agent_name: new.agent_name,
            payload: new.payload,
            recurrence_rule: new.recurrence_rule,
            start_time: start_str,
            next_fire: next_str,
            timezone: new.timezone,
            status,
            last_error: None,
            created_at: now_str.clone(),
            updated_at: now_str,
        })
    }

    /// Update a trigger owned by `agent_name`. `next_fire` is recomputed
    /// from the merged schedule fields. Returns `None` when no trigger
    /// with that id belongs to the agent.
    pub fn update(
        &self,
        id: i64,
        agent_name: &str,
        update: TriggerUpdate,
    ) -> Result<Option<TriggerRecord>> {
        let Some(current) = self.get(id)? else {
            return Ok(None);
        };
        if current.agent_name != agent_name {
            return Ok(None);
        }

        let now = Utc::now();
        let payload = update.payload.unwrap_or(current.payload);
        let recurrence_rule = match update.recurrence_rule {
            Some(rule) if rule.trim().is_empty() => None,
            Some(rule) => Some(rule),
            None => current.recurrence_rule,
        };
        let start_str = match update.start_time {
            Some(value) => to_storage_timestamp(parse_timestamp(&value)?),
            None => current.start_time,
        };
        let timezone = update.timezone.unwrap_or(current.timezone);
        let status = match update.status.as_deref() {
            Some(value) => TriggerStatus::from_str(value)
                .map_err(TriggerError::InvalidStatus)?,
            None => current.status,
        };

        let rule = recurrence_rule
            .as_deref()
            .map(RecurrenceRule::parse)
            .transpose()?;
        let start = parse_timestamp(&start_str)?;
        let tz = Self::zone(&timezone);

        let next_fire = match status {
            TriggerStatus::Completed => None,
            _ => Self::initial_next_fire(start, rule.as_ref(), tz, now),
        };
        let status = if next_fire.is_none() {
            TriggerStatus::Completed
        } else {
            status
        };
        let next_str = next_fire.map(to_storage_timestamp);
        let now_str = to_storage_timestamp(now);

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE triggers SET payload=?1, recurrence_rule=?2, start_time=?3,
               next_fire=?4, timezone=?5, status=?6, updated_at=?7
             WHERE id=?8",
            rusqlite::params![
                payload,
                recurrence_rule,
                start_str,
                next_str,
                timezone,
                status.to_string(),
                now_str,
                id,
            ],
        )?;
        drop(conn);
        self.get(id)
    }

    pub fn get(&self, id: i64) -> Result<Option<TriggerRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SELECT_COLUMNS} FROM triggers WHERE id = ?1"
        ))?;
        match stmt.query_row([id], row_to_trigger) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_for_agent(&self, agent_name: &str) -> Result<Vec<TriggerRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SELECT_COLUMNS} FROM triggers WHERE agent_name = ?1 ORDER BY id"
        ))?;
        let records = stmt
            .query_map([agent_name], row_to_trigger)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }

    pub fn list_all(&self) -> Result<Vec<TriggerRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare_cached(&format!("SELECT {SELECT_COLUMNS} FROM triggers ORDER BY id"))?;
        let records = stmt
            .query_map([], row_to_trigger)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }

    /// Active triggers whose `next_fire` falls at or before `bound`.
    pub fn due_before(&self, bound: DateTime<Utc>) -> Result<Vec<TriggerRecord>> {
        let bound_str = to_storage_timestamp(bound);
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SELECT_COLUMNS} FROM triggers
             WHERE status = 'active' AND next_fire IS NOT NULL AND next_fire <= ?1
             ORDER BY next_fire"
        ))?;
        let records = stmt
            .query_map([bound_str], row_to_trigger)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }

    /// Advance a fired trigger: recurring rules re-arm at the first
    /// occurrence strictly after `fired_at`; everything else completes.
    pub fn schedule_next_occurrence(
        &self,
        trigger: &TriggerRecord,
        fired_at: DateTime<Utc>,
    ) -> Result<()> {
        let next = match trigger.recurrence_rule.as_deref() {
            Some(rule_str) => match RecurrenceRule::parse(rule_str) {
                Ok(rule) => {
                    let start = parse_timestamp(&trigger.start_time).unwrap_or(fired_at);
                    rule.next_occurrence(start, fired_at, Self::zone(&trigger.timezone))
                }
                Err(e) => {
                    warn!(trigger_id = trigger.id, error = %e, "stored recurrence rule no longer parses");
                    None
                }
            },
            None => None,
        };

        let now_str = to_storage_timestamp(Utc::now());
        let conn = self.conn.lock().unwrap();
        match next {
            Some(next) => {
                conn.execute(
                    "UPDATE triggers SET next_fire=?1, updated_at=?2 WHERE id=?3",
                    rusqlite::params![to_storage_timestamp(next), now_str, trigger.id],
                )?;
            }
            None => {
                conn.execute(
                    "UPDATE triggers SET next_fire=NULL, status='completed', updated_at=?1
                     WHERE id=?2",
                    rusqlite::params![now_str, trigger.id],
                )?;
            }
        }
        Ok(())
    }

    pub fn record_failure(&self, id: i64, error: &str) -> Result<()> {
        let mut error = error.to_string();
        if error.len() > MAX_ERROR_LEN {
            error.truncate(MAX_ERROR_LEN);
        }
        let now_str = to_storage_timestamp(Utc::now());
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE triggers SET last_error=?1, updated_at=?2 WHERE id=?3",
            rusqlite::params![error, now_str, id],
        )?;
        Ok(())
    }

    /// Drop the pending fire without touching status; used when a
    /// one-shot fails so the record stays inspectable.
    pub fn clear_next_fire(&self, id: i64) -> Result<()> {
        let now_str = to_storage_timestamp(Utc::now());
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE triggers SET next_fire=NULL, updated_at=?1 WHERE id=?2",
            rusqlite::params![now_str, id],
        )?;
        Ok(())
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM triggers WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(TriggerError::NotFound { id });
        }
        info!(trigger_id = id, "trigger deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> TriggerStore {
        TriggerStore::open_in_memory().unwrap()
    }

    fn new_trigger(rule: Option<&str>, start: Option<DateTime<Utc>>) -> NewTrigger {
        NewTrigger {
            agent_name: "Rappels personnels".to_string(),
            payload: "Boire de l'eau".to_string(),
            recurrence_rule: rule.map(str::to_string),
            start_time: start.map(to_storage_timestamp),
            timezone: "UTC".to_string(),
            status: None,
        }
    }

    #[test]
    fn future_start_becomes_next_fire() {
        let store = store();
        let start = Utc::now() + Duration::minutes(10);
        let record = store.create(new_trigger(None, Some(start))).unwrap();
        assert_eq!(record.status, TriggerStatus::Active);
        assert_eq!(record.next_fire, Some(to_storage_timestamp(start)));
        assert!(record.next_fire.as_deref().unwrap() >= record.start_time.as_str());
    }

    #[test]
    fn past_one_shot_fires_immediately() {
        let store = store();
        let start = Utc::now() - Duration::minutes(10);
        let record = store.create(new_trigger(None, Some(start))).unwrap();
        let next = record.next_fire_at().unwrap();
        assert!(next >= start);
        assert!(next <= Utc::now() + Duration::seconds(1));
    }

    #[test]
    fn past_recurring_start_arms_the_next_occurrence() {
        let store = store();
        let start = Utc::now() - Duration::minutes(7);
        let record = store
            .create(new_trigger(Some("FREQ=MINUTELY;INTERVAL=5"), Some(start)))
            .unwrap();
        let next = record.next_fire_at().unwrap();
        assert!(next > Utc::now());
        assert!(next <= Utc::now() + Duration::minutes(5));
    }

    #[test]
    fn invalid_rule_is_rejected_on_create() {
        let store = store();
        assert!(store
            .create(new_trigger(Some("FREQ=SOMETIMES"), None))
            .is_err());
    }

    #[test]
    fn due_before_only_returns_active_due_triggers() {
        let store = store();
        let now = Utc::now();
        let due = store.create(new_trigger(None, Some(now - Duration::seconds(5)))).unwrap();
        let later = store
            .create(new_trigger(None, Some(now + Duration::hours(1))))
            .unwrap();
        let mut paused = new_trigger(None, Some(now - Duration::seconds(5)));
        paused.status = Some("paused".to_string());
        store.create(paused).unwrap();

        let candidates = store.due_before(now + Duration::seconds(15)).unwrap();
        let ids: Vec<i64> = candidates.iter().map(|t| t.id).collect();
        assert!(ids.contains(&due.id));
        assert!(!ids.contains(&later.id));
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn one_shot_completes_after_firing() {
        let store = store();
        let record = store.create(new_trigger(None, None)).unwrap();
        store.schedule_next_occurrence(&record, Utc::now()).unwrap();

        let after = store.get(record.id).unwrap().unwrap();
        assert_eq!(after.status, TriggerStatus::Completed);
        assert!(after.next_fire.is_none());
    }

    #[test]
    fn recurring_advances_and_stays_active() {
        let store = store();
        let record = store
            .create(new_trigger(Some("FREQ=MINUTELY;INTERVAL=5"), None))
            .unwrap();
        let fired_at = Utc::now();
        store.schedule_next_occurrence(&record, fired_at).unwrap();

        let after = store.get(record.id).unwrap().unwrap();
        assert_eq!(after.status, TriggerStatus::Active);
        let next = after.next_fire_at().unwrap();
        assert!(next >= fired_at + Duration::minutes(5) - Duration::seconds(1));
    }

    #[test]
    fn failure_records_error_and_clear_keeps_status() {
        let store = store();
        let record = store.create(new_trigger(None, None)).unwrap();
        store.record_failure(record.id, "boom").unwrap();
        store.clear_next_fire(record.id).unwrap();

        let after = store.get(record.id).unwrap().unwrap();
        assert_eq!(after.last_error.as_deref(), Some("boom"));
        assert_eq!(after.status, TriggerStatus::Active);
        assert!(after.next_fire.is_none());
    }

    #[test]
    fn update_is_scoped_to_the_owning_agent() {
        let store = store();
        let record = store.create(new_trigger(None, None)).unwrap();
        let stolen = store
            .update(record.id, "Someone Else", TriggerUpdate::default())
            .unwrap();
        assert!(stolen.is_none());

        let update = TriggerUpdate {
            payload: Some("Nouveau texte".to_string()),
            status: Some("paused".to_string()),
            ..Default::default()
        };
        let updated = store
            .update(record.id, "Rappels personnels", update)
            .unwrap()
            .unwrap();
        assert_eq!(updated.payload, "Nouveau texte");
        assert_eq!(updated.status, TriggerStatus::Paused);
    }
}
