//! Lessons-learned store.
//!
//! Small SQLite table of mistakes and their fixes, written when the user
//! explicitly asks the assistant to remember something. The most relevant
//! entries are folded into the interaction system prompt.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct Lesson {
    pub id: i64,
    pub category: String,
    pub problem: String,
    pub solution: String,
    pub context: Option<String>,
    pub occurrences: i64,
    pub learned_at: String,
    pub last_seen: String,
}

pub struct LessonStore {
    conn: Mutex<Connection>,
}

fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS lessons_learned (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            category    TEXT NOT NULL,
            problem     TEXT NOT NULL,
            solution    TEXT NOT NULL,
            context     TEXT,
            occurrences INTEGER NOT NULL DEFAULT 1,
            learned_at  TEXT NOT NULL,
            last_seen   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_lessons_category ON lessons_learned (category);",
    )?;
    Ok(())
}

fn row_to_lesson(row: &rusqlite::Row<'_>) -> rusqlite::Result<Lesson> {
    Ok(Lesson {
        id: row.get(0)?,
        category: row.get(1)?,
        problem: row.get(2)?,
        solution: row.get(3)?,
        context: row.get(4)?,
        occurrences: row.get(5)?,
        learned_at: row.get(6)?,
        last_seen: row.get(7)?,
    })
}

const SELECT_COLUMNS: &str =
    "id, category, problem, solution, context, occurrences, learned_at, last_seen";

impl LessonStore {
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

    /// Insert a lesson. An existing lesson with the same category and
    /// problem is bumped instead of duplicated.
    pub fn add_lesson(
        &self,
        category: &str,
        problem: &str,
        solution: &str,
        context: Option<&str>,
    ) -> Result<Lesson> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM lessons_learned WHERE category = ?1 AND problem = ?2",
                rusqlite::params![category, problem],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let id = match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE lessons_learned
                     SET solution = ?1, context = ?2, occurrences = occurrences + 1, last_seen = ?3
                     WHERE id = ?4",
                    rusqlite::params![solution, context, now, id],
                )?;
                id
            }
            None => {
                conn.execute(
                    "INSERT INTO lessons_learned
                     (category, problem, solution, context, occurrences, learned_at, last_seen)
                     VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
                    rusqlite::params![category, problem, solution, context, now],
                )?;
                conn.last_insert_rowid()
            }
        };
        info!(lesson_id = id, category, "lesson recorded");

        let lesson = conn.query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM lessons_learned WHERE id = ?1"),
            [id],
            row_to_lesson,
        )?;
        Ok(lesson)
    }

    pub fn get_lessons(
        &self,
        category: Option<&str>,
        min_occurrences: i64,
    ) -> Result<Vec<Lesson>> {
        let conn = self.conn.lock().unwrap();
        let lessons = match category {
            Some(category) => {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {SELECT_COLUMNS} FROM lessons_learned
                     WHERE category = ?1 AND occurrences >= ?2
                     ORDER BY occurrences DESC, last_seen DESC"
                ))?;
                let result: Vec<Lesson> = stmt
                    .query_map(rusqlite::params![category, min_occurrences], row_to_lesson)?
                    .filter_map(|r| r.ok())
                    .collect();
                result
            }
            None => {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {SELECT_COLUMNS} FROM lessons_learned
                     WHERE occurrences >= ?1
                     ORDER BY occurrences DESC, last_seen DESC"
                ))?;
                let result: Vec<Lesson> = stmt
                    .query_map([min_occurrences], row_to_lesson)?
                    .filter_map(|r| r.ok())
                    .collect();
                result
            }
        };
        Ok(lessons)
    }

    /// Returns whether a lesson was actually removed.
    pub fn delete_lesson(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM lessons_learned WHERE id = ?1", [id])?;
        Ok(n > 0)
    }

    /// Prompt section listing the most-repeated lessons, `None` when the
    /// store is empty.
    pub fn format_for_prompt(&self, max_lessons: usize) -> Result<Option<String>> {
        let lessons = self.get_lessons(None, 1)?;
        if lessons.is_empty() {
            return Ok(None);
        }
        let mut section = String::from(
            "# LESSONS LEARNED\n\nPast mistakes and how to avoid repeating them:\n",
        );
        for lesson in lessons.iter().take(max_lessons) {
            section.push_str(&format!(
                "\n- [{}] {} → {}",
                lesson.category, lesson.problem, lesson.solution
            ));
        }
        Ok(Some(section))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_get_delete_round_trip() {
        let store = LessonStore::open_in_memory().unwrap();
        let lesson = store
            .add_lesson("email", "Sent to wrong address", "Confirm recipient first", None)
            .unwrap();
        assert_eq!(lesson.occurrences, 1);

        let all = store.get_lessons(None, 1).unwrap();
        assert_eq!(all.len(), 1);
        assert!(store.delete_lesson(lesson.id).unwrap());
        assert!(!store.delete_lesson(lesson.id).unwrap());
    }

    #[test]
    fn repeated_lesson_bumps_occurrences() {
        let store = LessonStore::open_in_memory().unwrap();
        store
            .add_lesson("calendar", "Double-booked", "Check availability", None)
            .unwrap();
        let bumped = store
            .add_lesson("calendar", "Double-booked", "Always check availability", None)
            .unwrap();
        assert_eq!(bumped.occurrences, 2);
        assert_eq!(bumped.solution, "Always check availability");
        assert_eq!(store.get_lessons(Some("calendar"), 2).unwrap().len(), 1);
    }

    #[test]
    fn prompt_section_lists_lessons() {
        let store = LessonStore::open_in_memory().unwrap();
        assert!(store.format_for_prompt(5).unwrap().is_none());
        store
            .add_lesson("tone", "Too formal", "Keep replies casual", None)
            .unwrap();
        let section = store.format_for_prompt(5).unwrap().unwrap();
        assert!(section.contains("LESSONS LEARNED"));
        assert!(section.contains("Keep replies casual"));
    }
}
