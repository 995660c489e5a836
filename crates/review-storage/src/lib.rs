use chrono::{DateTime, SecondsFormat, Utc};
use review_core::review_contracts::{
    Acceptance, AssignmentOrigin, CurrentVote, ProposalMessage, ReviewAssignment, ReviewEvent,
    ReviewResult, Vote,
};
use review_core::ProposalId;
use rusqlite::{
    params, Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

pub const REVIEW_SCHEMA_VERSION: i64 = 3;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("reviewer {reviewer_id} already holds an active assignment on proposal {proposal_id}")]
    DuplicateActiveAssignment {
        proposal_id: ProposalId,
        reviewer_id: String,
    },
    #[error("store connection lock poisoned")]
    LockPoisoned,
}

/// SQLite-backed store for review events, current votes, results, messages
/// and assignments.
///
/// All access goes through [`ReviewStore::write`] or [`ReviewStore::read`],
/// which hand out a [`ReviewTx`] bound to a single transaction. Writes take
/// SQLite's reserved lock up front (`BEGIN IMMEDIATE`) so a unit of work either
/// commits as a whole or not at all.
pub struct ReviewStore {
    conn: Mutex<Connection>,
}

impl ReviewStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<(), StorageError> {
        self.lock()?.busy_timeout(timeout)?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        let conn = self.lock()?;
        Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let mut current = self.schema_version()?;
        if current > REVIEW_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: REVIEW_SCHEMA_VERSION,
            });
        }

        let conn = self.lock()?;
        if current < 1 {
            let sql = include_str!("../migrations/0001_review_schema.sql");
            conn.execute_batch(sql)?;
            conn.execute("PRAGMA user_version = 1", []).map(|_| ())?;
            current = 1;
        }

        if current < 2 {
            let sql = include_str!("../migrations/0002_review_assignments.sql");
            conn.execute_batch(sql)?;
            conn.execute("PRAGMA user_version = 2", []).map(|_| ())?;
            current = 2;
        }

        if current < 3 {
            let sql = include_str!("../migrations/0003_nanosecond_timestamps.sql");
            conn.execute_batch(sql)?;
            conn.execute("PRAGMA user_version = 3", []).map(|_| ())?;
        }

        Ok(())
    }

    #[cfg(test)]
    fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let conn = self.lock()?;
        let exists = conn
            .query_row(
                "
                SELECT 1
                FROM sqlite_master
                WHERE type='table' AND name = ?1
                LIMIT 1
                ",
                [table_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    /// Runs `unit` inside an immediate transaction. The transaction commits
    /// only if `unit` returns `Ok`; any error rolls every statement back.
    pub fn write<T, E, F>(&self, unit: F) -> Result<T, E>
    where
        F: FnOnce(&ReviewTx<'_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        self.run(TransactionBehavior::Immediate, unit)
    }

    /// Runs `query` against a consistent snapshot. Nothing is written.
    pub fn read<T, E, F>(&self, query: F) -> Result<T, E>
    where
        F: FnOnce(&ReviewTx<'_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        self.run(TransactionBehavior::Deferred, query)
    }

    fn run<T, E, F>(&self, behavior: TransactionBehavior, unit: F) -> Result<T, E>
    where
        F: FnOnce(&ReviewTx<'_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(behavior)
            .map_err(StorageError::from)?;
        let scope = ReviewTx { tx };
        let value = unit(&scope)?;
        scope.tx.commit().map_err(StorageError::from)?;
        Ok(value)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

/// Row-level access bound to one open transaction.
pub struct ReviewTx<'conn> {
    tx: Transaction<'conn>,
}

impl ReviewTx<'_> {
    pub fn insert_review(
        &self,
        proposal_id: ProposalId,
        reviewer_id: &str,
        vote: Vote,
        comment: Option<&str>,
        submitted_at: DateTime<Utc>,
    ) -> Result<ReviewEvent, StorageError> {
        self.tx.execute(
            "
            INSERT INTO reviews (
                proposal_id,
                reviewer_id,
                vote,
                comment,
                submitted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                proposal_id,
                reviewer_id,
                vote.as_str(),
                comment,
                format_timestamp(submitted_at),
            ],
        )?;

        Ok(ReviewEvent {
            review_id: self.tx.last_insert_rowid(),
            proposal_id,
            reviewer_id: reviewer_id.to_string(),
            vote,
            comment: comment.map(str::to_string),
            submitted_at: normalize_timestamp(submitted_at),
        })
    }

    pub fn review(&self, review_id: i64) -> Result<Option<ReviewEvent>, StorageError> {
        let review = self
            .tx
            .query_row(
                "
                SELECT review_id, proposal_id, reviewer_id, vote, comment, submitted_at
                FROM reviews
                WHERE review_id = ?1
                ",
                [review_id],
                review_from_row,
            )
            .optional()?;
        Ok(review)
    }

    pub fn delete_review(&self, review_id: i64) -> Result<bool, StorageError> {
        let changes = self
            .tx
            .execute("DELETE FROM reviews WHERE review_id = ?1", [review_id])?;
        Ok(changes > 0)
    }

    /// Most recent surviving event for the pair by `(submitted_at, review_id)`.
    pub fn latest_review_for_pair(
        &self,
        proposal_id: ProposalId,
        reviewer_id: &str,
    ) -> Result<Option<ReviewEvent>, StorageError> {
        let review = self
            .tx
            .query_row(
                "
                SELECT review_id, proposal_id, reviewer_id, vote, comment, submitted_at
                FROM reviews
                WHERE proposal_id = ?1 AND reviewer_id = ?2
                ORDER BY submitted_at DESC, review_id DESC
                LIMIT 1
                ",
                params![proposal_id, reviewer_id],
                review_from_row,
            )
            .optional()?;
        Ok(review)
    }

    /// All events on a proposal, newest first.
    pub fn reviews_for_proposal(
        &self,
        proposal_id: ProposalId,
    ) -> Result<Vec<ReviewEvent>, StorageError> {
        let mut statement = self.tx.prepare(
            "
            SELECT review_id, proposal_id, reviewer_id, vote, comment, submitted_at
            FROM reviews
            WHERE proposal_id = ?1
            ORDER BY submitted_at DESC, review_id DESC
            ",
        )?;
        let rows = statement.query_map([proposal_id], review_from_row)?;

        let mut reviews = Vec::new();
        for row in rows {
            reviews.push(row?);
        }
        Ok(reviews)
    }

    pub fn comment_count_for_proposal(&self, proposal_id: ProposalId) -> Result<i64, StorageError> {
        let count = self.tx.query_row(
            "
            SELECT COUNT(*)
            FROM reviews
            WHERE proposal_id = ?1 AND comment IS NOT NULL AND TRIM(comment) <> ''
            ",
            [proposal_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn review_count_for_reviewer(&self, reviewer_id: &str) -> Result<i64, StorageError> {
        let count = self.tx.query_row(
            "SELECT COUNT(*) FROM reviews WHERE reviewer_id = ?1",
            [reviewer_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn upsert_current_vote(&self, current: &CurrentVote) -> Result<(), StorageError> {
        self.tx.execute(
            "
            INSERT INTO latest_votes (
                proposal_id,
                reviewer_id,
                review_id,
                vote,
                submitted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(proposal_id, reviewer_id) DO UPDATE SET
                review_id=excluded.review_id,
                vote=excluded.vote,
                submitted_at=excluded.submitted_at
            ",
            params![
                current.proposal_id,
                current.reviewer_id,
                current.review_id,
                current.vote.as_str(),
                format_timestamp(current.submitted_at),
            ],
        )?;
        Ok(())
    }

    pub fn delete_current_vote(
        &self,
        proposal_id: ProposalId,
        reviewer_id: &str,
    ) -> Result<bool, StorageError> {
        let changes = self.tx.execute(
            "DELETE FROM latest_votes WHERE proposal_id = ?1 AND reviewer_id = ?2",
            params![proposal_id, reviewer_id],
        )?;
        Ok(changes > 0)
    }

    pub fn current_vote(
        &self,
        proposal_id: ProposalId,
        reviewer_id: &str,
    ) -> Result<Option<CurrentVote>, StorageError> {
        let current = self
            .tx
            .query_row(
                "
                SELECT proposal_id, reviewer_id, review_id, vote, submitted_at
                FROM latest_votes
                WHERE proposal_id = ?1 AND reviewer_id = ?2
                ",
                params![proposal_id, reviewer_id],
                current_vote_from_row,
            )
            .optional()?;
        Ok(current)
    }

    pub fn current_votes_for_proposal(
        &self,
        proposal_id: ProposalId,
    ) -> Result<Vec<CurrentVote>, StorageError> {
        let mut statement = self.tx.prepare(
            "
            SELECT proposal_id, reviewer_id, review_id, vote, submitted_at
            FROM latest_votes
            WHERE proposal_id = ?1
            ORDER BY reviewer_id ASC
            ",
        )?;
        let rows = statement.query_map([proposal_id], current_vote_from_row)?;

        let mut votes = Vec::new();
        for row in rows {
            votes.push(row?);
        }
        Ok(votes)
    }

    pub fn current_votes_for_reviewer(
        &self,
        reviewer_id: &str,
    ) -> Result<Vec<CurrentVote>, StorageError> {
        let mut statement = self.tx.prepare(
            "
            SELECT proposal_id, reviewer_id, review_id, vote, submitted_at
            FROM latest_votes
            WHERE reviewer_id = ?1
            ORDER BY proposal_id ASC
            ",
        )?;
        let rows = statement.query_map([reviewer_id], current_vote_from_row)?;

        let mut votes = Vec::new();
        for row in rows {
            votes.push(row?);
        }
        Ok(votes)
    }

    pub fn upsert_result(&self, result: &ReviewResult) -> Result<(), StorageError> {
        self.tx.execute(
            "
            INSERT INTO review_results (
                proposal_id,
                comment_count,
                vote_count,
                plus_one,
                plus_zero,
                minus_zero,
                minus_one,
                score,
                accepted
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(proposal_id) DO UPDATE SET
                comment_count=excluded.comment_count,
                vote_count=excluded.vote_count,
                plus_one=excluded.plus_one,
                plus_zero=excluded.plus_zero,
                minus_zero=excluded.minus_zero,
                minus_one=excluded.minus_one,
                score=excluded.score,
                accepted=excluded.accepted
            ",
            params![
                result.proposal_id,
                result.comment_count,
                result.vote_count,
                result.plus_one,
                result.plus_zero,
                result.minus_zero,
                result.minus_one,
                result.score,
                result.accepted.as_option(),
            ],
        )?;
        Ok(())
    }

    pub fn result(&self, proposal_id: ProposalId) -> Result<Option<ReviewResult>, StorageError> {
        let result = self
            .tx
            .query_row(
                "
                SELECT proposal_id, comment_count, vote_count, plus_one, plus_zero,
                       minus_zero, minus_one, score, accepted
                FROM review_results
                WHERE proposal_id = ?1
                ",
                [proposal_id],
                result_from_row,
            )
            .optional()?;
        Ok(result)
    }

    pub fn results(&self) -> Result<Vec<ReviewResult>, StorageError> {
        let mut statement = self.tx.prepare(
            "
            SELECT proposal_id, comment_count, vote_count, plus_one, plus_zero,
                   minus_zero, minus_one, score, accepted
            FROM review_results
            ORDER BY proposal_id ASC
            ",
        )?;
        let rows = statement.query_map([], result_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Touches only the acceptance column; tally columns are left as they are.
    pub fn set_acceptance(
        &self,
        proposal_id: ProposalId,
        accepted: Acceptance,
    ) -> Result<bool, StorageError> {
        let changes = self.tx.execute(
            "UPDATE review_results SET accepted = ?2 WHERE proposal_id = ?1",
            params![proposal_id, accepted.as_option()],
        )?;
        Ok(changes > 0)
    }

    pub fn insert_message(
        &self,
        proposal_id: ProposalId,
        author_id: &str,
        message: &str,
        submitted_at: DateTime<Utc>,
    ) -> Result<ProposalMessage, StorageError> {
        self.tx.execute(
            "
            INSERT INTO proposal_messages (
                proposal_id,
                author_id,
                message,
                submitted_at
            ) VALUES (?1, ?2, ?3, ?4)
            ",
            params![
                proposal_id,
                author_id,
                message,
                format_timestamp(submitted_at)
            ],
        )?;

        Ok(ProposalMessage {
            message_id: self.tx.last_insert_rowid(),
            proposal_id,
            author_id: author_id.to_string(),
            message: message.to_string(),
            submitted_at: normalize_timestamp(submitted_at),
        })
    }

    /// Messages on a proposal, oldest first.
    pub fn messages_for_proposal(
        &self,
        proposal_id: ProposalId,
    ) -> Result<Vec<ProposalMessage>, StorageError> {
        let mut statement = self.tx.prepare(
            "
            SELECT message_id, proposal_id, author_id, message, submitted_at
            FROM proposal_messages
            WHERE proposal_id = ?1
            ORDER BY submitted_at ASC, message_id ASC
            ",
        )?;
        let rows = statement.query_map([proposal_id], |row| {
            Ok(ProposalMessage {
                message_id: row.get(0)?,
                proposal_id: row.get(1)?,
                author_id: row.get(2)?,
                message: row.get(3)?,
                submitted_at: timestamp_column(row, 4)?,
            })
        })?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Inserts an active assignment. A second active assignment for the same
    /// pair is rejected by the partial unique index and reported as
    /// [`StorageError::DuplicateActiveAssignment`].
    pub fn insert_assignment(
        &self,
        proposal_id: ProposalId,
        reviewer_id: &str,
        origin: AssignmentOrigin,
        assigned_at: DateTime<Utc>,
    ) -> Result<ReviewAssignment, StorageError> {
        let inserted = self.tx.execute(
            "
            INSERT INTO review_assignments (
                proposal_id,
                reviewer_id,
                origin,
                opted_out,
                assigned_at
            ) VALUES (?1, ?2, ?3, 0, ?4)
            ",
            params![
                proposal_id,
                reviewer_id,
                origin.as_str(),
                format_timestamp(assigned_at)
            ],
        );

        match inserted {
            Ok(_) => Ok(ReviewAssignment {
                assignment_id: self.tx.last_insert_rowid(),
                proposal_id,
                reviewer_id: reviewer_id.to_string(),
                origin,
                opted_out: false,
                assigned_at: normalize_timestamp(assigned_at),
            }),
            Err(rusqlite::Error::SqliteFailure(failure, _))
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::DuplicateActiveAssignment {
                    proposal_id,
                    reviewer_id: reviewer_id.to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn assignment(
        &self,
        assignment_id: i64,
    ) -> Result<Option<ReviewAssignment>, StorageError> {
        let assignment = self
            .tx
            .query_row(
                "
                SELECT assignment_id, proposal_id, reviewer_id, origin, opted_out, assigned_at
                FROM review_assignments
                WHERE assignment_id = ?1
                ",
                [assignment_id],
                assignment_from_row,
            )
            .optional()?;
        Ok(assignment)
    }

    /// Every assignment ever made on the proposal, opted-out ones included.
    pub fn assignments_for_proposal(
        &self,
        proposal_id: ProposalId,
    ) -> Result<Vec<ReviewAssignment>, StorageError> {
        let mut statement = self.tx.prepare(
            "
            SELECT assignment_id, proposal_id, reviewer_id, origin, opted_out, assigned_at
            FROM review_assignments
            WHERE proposal_id = ?1
            ORDER BY assignment_id ASC
            ",
        )?;
        let rows = statement.query_map([proposal_id], assignment_from_row)?;

        let mut assignments = Vec::new();
        for row in rows {
            assignments.push(row?);
        }
        Ok(assignments)
    }

    pub fn active_assignments_for_reviewer(
        &self,
        reviewer_id: &str,
    ) -> Result<Vec<ReviewAssignment>, StorageError> {
        let mut statement = self.tx.prepare(
            "
            SELECT assignment_id, proposal_id, reviewer_id, origin, opted_out, assigned_at
            FROM review_assignments
            WHERE reviewer_id = ?1 AND opted_out = 0
            ORDER BY assignment_id ASC
            ",
        )?;
        let rows = statement.query_map([reviewer_id], assignment_from_row)?;

        let mut assignments = Vec::new();
        for row in rows {
            assignments.push(row?);
        }
        Ok(assignments)
    }

    /// Number of active assignments per reviewer, across all proposals.
    pub fn active_assignment_load(&self) -> Result<BTreeMap<String, i64>, StorageError> {
        let mut statement = self.tx.prepare(
            "
            SELECT reviewer_id, COUNT(*)
            FROM review_assignments
            WHERE opted_out = 0
            GROUP BY reviewer_id
            ",
        )?;
        let rows = statement.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut load = BTreeMap::new();
        for row in rows {
            let (reviewer_id, count) = row?;
            load.insert(reviewer_id, count);
        }
        Ok(load)
    }

    /// Flips `opted_out` on an active assignment. Returns `false` when the
    /// assignment was already opted out (or does not exist).
    pub fn mark_opted_out(&self, assignment_id: i64) -> Result<bool, StorageError> {
        let changes = self.tx.execute(
            "UPDATE review_assignments SET opted_out = 1 WHERE assignment_id = ?1 AND opted_out = 0",
            [assignment_id],
        )?;
        Ok(changes > 0)
    }
}

fn review_from_row(row: &Row<'_>) -> rusqlite::Result<ReviewEvent> {
    Ok(ReviewEvent {
        review_id: row.get(0)?,
        proposal_id: row.get(1)?,
        reviewer_id: row.get(2)?,
        vote: parse_column::<Vote>(row, 3)?,
        comment: row.get(4)?,
        submitted_at: timestamp_column(row, 5)?,
    })
}

fn current_vote_from_row(row: &Row<'_>) -> rusqlite::Result<CurrentVote> {
    Ok(CurrentVote {
        proposal_id: row.get(0)?,
        reviewer_id: row.get(1)?,
        review_id: row.get(2)?,
        vote: parse_column::<Vote>(row, 3)?,
        submitted_at: timestamp_column(row, 4)?,
    })
}

fn result_from_row(row: &Row<'_>) -> rusqlite::Result<ReviewResult> {
    Ok(ReviewResult {
        proposal_id: row.get(0)?,
        comment_count: row.get(1)?,
        vote_count: row.get(2)?,
        plus_one: row.get(3)?,
        plus_zero: row.get(4)?,
        minus_zero: row.get(5)?,
        minus_one: row.get(6)?,
        score: row.get(7)?,
        accepted: Acceptance::from_option(row.get::<_, Option<bool>>(8)?),
    })
}

fn assignment_from_row(row: &Row<'_>) -> rusqlite::Result<ReviewAssignment> {
    Ok(ReviewAssignment {
        assignment_id: row.get(0)?,
        proposal_id: row.get(1)?,
        reviewer_id: row.get(2)?,
        origin: parse_column::<AssignmentOrigin>(row, 3)?,
        opted_out: row.get(4)?,
        assigned_at: timestamp_column(row, 5)?,
    })
}

fn parse_column<T>(row: &Row<'_>, index: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value: String = row.get(index)?;
    value.parse::<T>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
    })
}

fn timestamp_column(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let value: String = row.get(index)?;
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                index,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })
}

/// Fixed-width RFC 3339 (nanoseconds, `Z`), so text order is time order.
fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Truncates to the precision that survives a round trip through the store.
fn normalize_timestamp(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&format_timestamp(timestamp))
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or(timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::NamedTempFile;

    fn ts(hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 23, hour, min, sec)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn migration_creates_review_tables() {
        let db = ReviewStore::open_in_memory().expect("open db");

        for table in [
            "reviews",
            "latest_votes",
            "review_results",
            "proposal_messages",
            "review_assignments",
        ] {
            assert!(db.table_exists(table).expect("table check"));
        }

        assert_eq!(
            db.schema_version().expect("schema version"),
            REVIEW_SCHEMA_VERSION
        );
    }

    #[test]
    fn latest_review_breaks_timestamp_ties_by_id() {
        let db = ReviewStore::open_in_memory().expect("open db");

        let latest = db
            .write(|tx| {
                tx.insert_review(1, "ana", Vote::PlusOne, None, ts(12, 0, 0))?;
                let second = tx.insert_review(1, "ana", Vote::MinusZero, None, ts(12, 0, 0))?;
                tx.insert_review(1, "ana", Vote::MinusOne, None, ts(11, 0, 0))?;
                tx.insert_review(1, "bo", Vote::PlusZero, None, ts(13, 0, 0))?;
                let latest = tx.latest_review_for_pair(1, "ana")?;
                Ok::<_, StorageError>((second, latest))
            })
            .expect("write reviews");

        let (second, latest) = latest;
        assert_eq!(latest, Some(second));
    }

    #[test]
    fn sub_microsecond_order_survives_storage() {
        let db = ReviewStore::open_in_memory().expect("open db");
        let later = ts(12, 0, 0) + chrono::Duration::nanoseconds(900);
        let earlier = ts(12, 0, 0) + chrono::Duration::nanoseconds(100);

        let (first, latest) = db
            .write(|tx| {
                let first = tx.insert_review(2, "ana", Vote::PlusOne, None, later)?;
                tx.insert_review(2, "ana", Vote::MinusOne, None, earlier)?;
                let latest = tx.latest_review_for_pair(2, "ana")?;
                Ok::<_, StorageError>((first, latest))
            })
            .expect("write reviews");

        assert_eq!(first.submitted_at, later);
        assert_eq!(latest, Some(first));
    }

    #[test]
    fn migration_widens_microsecond_timestamps() {
        let db = ReviewStore::open_in_memory().expect("open db");
        {
            let conn = db.lock().expect("lock");
            conn.execute(
                "INSERT INTO reviews (proposal_id, reviewer_id, vote, submitted_at)
                 VALUES (9, 'ana', '+1', '2026-02-23T12:00:00.000001Z')",
                [],
            )
            .expect("seed old row");
            conn.execute("PRAGMA user_version = 2", [])
                .expect("rewind version");
        }

        db.migrate().expect("migrate");
        let stored: String = db
            .lock()
            .expect("lock")
            .query_row(
                "SELECT submitted_at FROM reviews WHERE proposal_id = 9",
                [],
                |row| row.get(0),
            )
            .expect("read back");
        assert_eq!(stored, "2026-02-23T12:00:00.000001000Z");
        assert_eq!(db.schema_version().expect("version"), REVIEW_SCHEMA_VERSION);
    }

    #[test]
    fn failed_unit_of_work_rolls_back() {
        let db = ReviewStore::open_in_memory().expect("open db");

        let outcome: Result<(), StorageError> = db.write(|tx| {
            tx.insert_review(3, "ana", Vote::PlusOne, Some("solid"), ts(9, 0, 0))?;
            Err(StorageError::LockPoisoned)
        });
        assert!(outcome.is_err());

        let reviews = db
            .read(|tx| tx.reviews_for_proposal(3))
            .expect("read reviews");
        assert!(reviews.is_empty());
    }

    #[test]
    fn comment_count_ignores_blank_comments() {
        let db = ReviewStore::open_in_memory().expect("open db");

        let count = db
            .write(|tx| {
                tx.insert_review(4, "ana", Vote::PlusOne, Some("great outline"), ts(9, 0, 0))?;
                tx.insert_review(4, "bo", Vote::PlusZero, Some("   "), ts(9, 5, 0))?;
                tx.insert_review(4, "cy", Vote::MinusOne, None, ts(9, 10, 0))?;
                tx.comment_count_for_proposal(4)
            })
            .expect("count comments");
        assert_eq!(count, 1);
    }

    #[test]
    fn active_assignment_pairs_are_unique() {
        let db = ReviewStore::open_in_memory().expect("open db");

        let first = db
            .write(|tx| tx.insert_assignment(5, "ana", AssignmentOrigin::Manual, ts(8, 0, 0)))
            .expect("first assignment");

        let duplicate = db.write(|tx| {
            tx.insert_assignment(5, "ana", AssignmentOrigin::AutoAssigned, ts(8, 1, 0))
        });
        assert!(matches!(
            duplicate,
            Err(StorageError::DuplicateActiveAssignment { proposal_id: 5, .. })
        ));

        let (opted_out, again, replacement) = db
            .write(|tx| {
                let opted_out = tx.mark_opted_out(first.assignment_id)?;
                let again = tx.mark_opted_out(first.assignment_id)?;
                let replacement =
                    tx.insert_assignment(5, "ana", AssignmentOrigin::Manual, ts(8, 2, 0))?;
                Ok::<_, StorageError>((opted_out, again, replacement))
            })
            .expect("opt out and reassign");
        assert!(opted_out);
        assert!(!again);
        assert_ne!(replacement.assignment_id, first.assignment_id);

        let (all, active, load) = db
            .read(|tx| {
                Ok::<_, StorageError>((
                    tx.assignments_for_proposal(5)?,
                    tx.active_assignments_for_reviewer("ana")?,
                    tx.active_assignment_load()?,
                ))
            })
            .expect("read assignments");
        assert_eq!(all.len(), 2);
        assert!(all[0].opted_out);
        assert_eq!(active, vec![replacement]);
        assert_eq!(load.get("ana"), Some(&1));
    }

    #[test]
    fn acceptance_update_leaves_tally_untouched() {
        let db = ReviewStore::open_in_memory().expect("open db");
        let mut result = ReviewResult::empty(6);
        result.plus_one = 2;
        result.vote_count = 2;
        result.score = 4;

        let stored = db
            .write(|tx| {
                tx.upsert_result(&result)?;
                assert!(tx.set_acceptance(6, Acceptance::Rejected)?);
                assert!(!tx.set_acceptance(7, Acceptance::Accepted)?);
                tx.result(6)
            })
            .expect("write result")
            .expect("result present");

        assert_eq!(stored.accepted, Acceptance::Rejected);
        assert_eq!(stored.score, 4);
        assert_eq!(stored.vote_count, 2);
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let db_file = NamedTempFile::new().expect("temp db");
        {
            let store = ReviewStore::open(db_file.path()).expect("open store");
            store
                .write(|tx| {
                    let event = tx.insert_review(8, "ana", Vote::PlusZero, None, ts(10, 0, 0))?;
                    tx.upsert_current_vote(&CurrentVote::from(&event))?;
                    tx.insert_message(8, "ana", "could you share slides?", ts(10, 1, 0))?;
                    Ok::<_, StorageError>(())
                })
                .expect("seed store");
        }

        let store = ReviewStore::open(db_file.path()).expect("reopen store");
        let (current, messages) = store
            .read(|tx| {
                Ok::<_, StorageError>((tx.current_vote(8, "ana")?, tx.messages_for_proposal(8)?))
            })
            .expect("read back");
        let current = current.expect("current vote");
        assert_eq!(current.vote, Vote::PlusZero);
        assert_eq!(current.submitted_at, ts(10, 0, 0));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].author_id, "ana");
    }
}
