use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;

use crate::error::Result;
use crate::model::{
    Collection, Member, MutationLogEntry, MutationOutcome, MutationStats, PresenceStatus,
    Progress, ProgressStatus, RemovedMember,
};

const MEMBER_COLUMNS: &str = "id, access_hash, username, first_name, last_name, photo_id,
    bot, verified, restricted, premium, status, last_online, added_date,
    channel_id, channel_username";

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (no-op for in-memory databases)
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Members (current mirror of each collection)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS members (
            id INTEGER PRIMARY KEY,
            access_hash INTEGER NOT NULL,
            username TEXT,
            first_name TEXT,
            last_name TEXT,
            photo_id INTEGER,
            bot INTEGER NOT NULL DEFAULT 0,
            verified INTEGER NOT NULL DEFAULT 0,
            restricted INTEGER NOT NULL DEFAULT 0,
            premium INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            last_online TEXT,
            added_date TEXT NOT NULL,
            channel_id INTEGER NOT NULL,
            channel_username TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Removed members (write-once copies)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS removed_members (
            id INTEGER PRIMARY KEY,
            access_hash INTEGER NOT NULL,
            username TEXT,
            first_name TEXT,
            last_name TEXT,
            photo_id INTEGER,
            bot INTEGER NOT NULL DEFAULT 0,
            verified INTEGER NOT NULL DEFAULT 0,
            restricted INTEGER NOT NULL DEFAULT 0,
            premium INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            last_online TEXT,
            added_date TEXT NOT NULL,
            channel_id INTEGER NOT NULL,
            channel_username TEXT NOT NULL,
            deletion_reason TEXT NOT NULL,
            found_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Fetch progress (one row per collection)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fetch_progress (
            channel_id INTEGER PRIMARY KEY,
            channel_username TEXT NOT NULL,
            total_members INTEGER NOT NULL DEFAULT 0,
            processed_members INTEGER NOT NULL DEFAULT 0,
            last_user_id INTEGER,
            status TEXT NOT NULL DEFAULT 'in_progress',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Mutation log (append-only audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS mutation_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            username TEXT NOT NULL,
            attempted_at TEXT NOT NULL,
            status TEXT NOT NULL,
            error_message TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    for ddl in [
        "CREATE INDEX IF NOT EXISTS idx_members_channel ON members(channel_id)",
        "CREATE INDEX IF NOT EXISTS idx_members_first_name ON members(first_name)",
        "CREATE INDEX IF NOT EXISTS idx_members_last_name ON members(last_name)",
        "CREATE INDEX IF NOT EXISTS idx_members_username ON members(username)",
        "CREATE INDEX IF NOT EXISTS idx_removed_channel ON removed_members(channel_id)",
        "CREATE INDEX IF NOT EXISTS idx_mutation_log_user ON mutation_log(user_id)",
    ] {
        conn.execute(ddl, [])?;
    }

    Ok(())
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Map the leading `MEMBER_COLUMNS` of a row.
fn member_from_row(row: &Row) -> rusqlite::Result<Member> {
    let status: String = row.get(10)?;
    let last_online: Option<String> = row.get(11)?;
    let added: String = row.get(12)?;

    Ok(Member {
        id: row.get(0)?,
        access_hash: row.get(1)?,
        username: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        photo_id: row.get(5)?,
        bot: row.get(6)?,
        verified: row.get(7)?,
        restricted: row.get(8)?,
        premium: row.get(9)?,
        status: PresenceStatus::parse(&status),
        // A garbled last-seen stamp is not worth failing the row over
        last_online: last_online.and_then(|s| parse_ts(11, &s).ok()),
        added_at: parse_ts(12, &added)?,
        channel_id: row.get(13)?,
        channel_username: row.get(14)?,
    })
}

/// SQLite-backed mirror of collection members, progress and the mutation log.
pub struct MemberStore {
    conn: Connection,
}

impl MemberStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn)?;
        Ok(MemberStore { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // ========================================================================
    // MEMBERS
    // ========================================================================

    /// Insert or overwrite a page of members in one transaction.
    pub fn upsert_members(&self, members: &[Member]) -> Result<usize> {
        if members.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO members (
                    id, access_hash, username, first_name, last_name, photo_id,
                    bot, verified, restricted, premium, status, last_online, added_date,
                    channel_id, channel_username
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )?;

            for m in members {
                stmt.execute(params![
                    m.id,
                    m.access_hash,
                    m.username,
                    m.first_name,
                    m.last_name,
                    m.photo_id,
                    m.bot,
                    m.verified,
                    m.restricted,
                    m.premium,
                    m.status.as_str(),
                    m.last_online.map(|dt| dt.to_rfc3339()),
                    m.added_at.to_rfc3339(),
                    m.channel_id,
                    m.channel_username,
                ])?;
            }
        }
        tx.commit()?;

        Ok(members.len())
    }

    pub fn count_members(&self, channel_id: Option<i64>) -> Result<i64> {
        let count = match channel_id {
            Some(id) => self.conn.query_row(
                "SELECT COUNT(*) FROM members WHERE channel_id = ?1",
                [id],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM members", [], |row| row.get(0))?,
        };
        Ok(count)
    }

    /// All members of a collection, ascending by id.
    pub fn members_for(&self, channel_id: i64) -> Result<Vec<Member>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM members WHERE channel_id = ?1 ORDER BY id",
            MEMBER_COLUMNS
        ))?;

        let members = stmt
            .query_map([channel_id], member_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(members)
    }

    pub fn get_members_by_ids(&self, ids: &[i64]) -> Result<Vec<Member>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(",");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM members WHERE id IN ({}) ORDER BY id",
            MEMBER_COLUMNS, placeholders
        ))?;

        let members = stmt
            .query_map(params_from_iter(ids.iter()), member_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(members)
    }

    // ========================================================================
    // REMOVED MEMBERS
    // ========================================================================

    /// Copy members into `removed_members` (first removal wins) and drop them
    /// from `members`. Returns how many rows left the current set.
    pub fn move_to_removed(&self, ids: &[i64], reason: &str) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; ids.len()].join(",");
        let found_at = Utc::now().to_rfc3339();

        let mut copy_params: Vec<rusqlite::types::Value> = vec![
            reason.to_string().into(),
            found_at.into(),
        ];
        copy_params.extend(ids.iter().map(|id| rusqlite::types::Value::Integer(*id)));

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            &format!(
                "INSERT OR IGNORE INTO removed_members ({cols}, deletion_reason, found_at)
                 SELECT {cols}, ?, ? FROM members WHERE id IN ({placeholders})",
                cols = MEMBER_COLUMNS,
                placeholders = placeholders
            ),
            params_from_iter(copy_params.iter()),
        )?;
        let moved = tx.execute(
            &format!("DELETE FROM members WHERE id IN ({})", placeholders),
            params_from_iter(ids.iter()),
        )?;
        tx.commit()?;

        Ok(moved)
    }

    pub fn removed_members(&self, channel_id: Option<i64>) -> Result<Vec<RemovedMember>> {
        let sql = format!(
            "SELECT {}, deletion_reason, found_at FROM removed_members
             WHERE (?1 IS NULL OR channel_id = ?1) ORDER BY id",
            MEMBER_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let removed = stmt
            .query_map([channel_id], |row| {
                let found_at: String = row.get(16)?;
                Ok(RemovedMember {
                    member: member_from_row(row)?,
                    deletion_reason: row.get(15)?,
                    found_at: parse_ts(16, &found_at)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(removed)
    }

    // ========================================================================
    // PROGRESS
    // ========================================================================

    /// Upsert the progress row. `created_at` survives updates; a `None`
    /// cursor keeps the previously stored one.
    pub fn update_progress(
        &self,
        collection: &Collection,
        processed: u64,
        total: u64,
        last_user_id: Option<i64>,
        status: ProgressStatus,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        self.conn.execute(
            "INSERT OR REPLACE INTO fetch_progress
                (channel_id, channel_username, total_members, processed_members,
                 last_user_id, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4,
                     COALESCE(?5, (SELECT last_user_id FROM fetch_progress WHERE channel_id = ?1)),
                     ?6,
                     COALESCE((SELECT created_at FROM fetch_progress WHERE channel_id = ?1), ?7),
                     ?7)",
            params![
                collection.id,
                collection.handle,
                total as i64,
                processed as i64,
                last_user_id,
                status.as_str(),
                now,
            ],
        )?;

        Ok(())
    }

    pub fn get_progress(&self, channel_id: i64) -> Result<Option<Progress>> {
        let progress = self
            .conn
            .query_row(
                "SELECT channel_id, channel_username, total_members, processed_members,
                        last_user_id, status, created_at, updated_at
                 FROM fetch_progress WHERE channel_id = ?1",
                [channel_id],
                |row| {
                    let status: String = row.get(5)?;
                    let created: String = row.get(6)?;
                    let updated: String = row.get(7)?;
                    Ok(Progress {
                        channel_id: row.get(0)?,
                        channel_username: row.get(1)?,
                        total_members: row.get(2)?,
                        processed_members: row.get(3)?,
                        last_user_id: row.get(4)?,
                        status: ProgressStatus::parse(&status).ok_or_else(|| {
                            rusqlite::Error::FromSqlConversionFailure(
                                5,
                                Type::Text,
                                format!("unknown progress status {}", status).into(),
                            )
                        })?,
                        created_at: parse_ts(6, &created)?,
                        updated_at: parse_ts(7, &updated)?,
                    })
                },
            )
            .optional()?;

        Ok(progress)
    }

    // ========================================================================
    // MUTATION LOG
    // ========================================================================

    pub fn log_mutation(&self, entry: &MutationLogEntry) -> Result<()> {
        self.conn.execute(
            "INSERT INTO mutation_log (user_id, username, attempted_at, status, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.user_id,
                entry.username,
                entry.attempted_at.to_rfc3339(),
                entry.outcome.as_str(),
                entry.error_message,
            ],
        )?;
        Ok(())
    }

    /// Every logged attempt for one member, newest first.
    pub fn mutation_log_for(&self, user_id: i64) -> Result<Vec<MutationLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, username, attempted_at, status, error_message
             FROM mutation_log
             WHERE user_id = ?1
             ORDER BY id DESC",
        )?;

        let entries = stmt
            .query_map([user_id], |row| {
                let attempted: String = row.get(2)?;
                let status: String = row.get(3)?;
                Ok(MutationLogEntry {
                    user_id: row.get(0)?,
                    username: row.get(1)?,
                    attempted_at: parse_ts(2, &attempted)?,
                    outcome: if status == "success" {
                        MutationOutcome::Success
                    } else {
                        MutationOutcome::Error
                    },
                    error_message: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    pub fn mutation_stats(&self) -> Result<MutationStats> {
        let stats = self.conn.query_row(
            "SELECT
                COUNT(*),
                COUNT(CASE WHEN status = 'success' THEN 1 END),
                COUNT(CASE WHEN status = 'error' THEN 1 END),
                COUNT(CASE WHEN error_message IS NOT NULL THEN 1 END)
             FROM mutation_log",
            [],
            |row| {
                Ok(MutationStats {
                    total: row.get(0)?,
                    successful: row.get(1)?,
                    failed: row.get(2)?,
                    with_errors: row.get(3)?,
                })
            },
        )?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection() -> Collection {
        Collection::new(999, "@test_channel")
    }

    /// Helper function to create test members with all required fields
    fn create_test_member(id: i64, username: Option<&str>, first: Option<&str>, last: Option<&str>) -> Member {
        Member {
            id,
            access_hash: id * 11,
            username: username.map(str::to_string),
            first_name: first.map(str::to_string),
            last_name: last.map(str::to_string),
            photo_id: None,
            bot: false,
            verified: false,
            restricted: false,
            premium: false,
            status: PresenceStatus::Recently,
            last_online: None,
            added_at: Utc::now(),
            channel_id: 999,
            channel_username: "@test_channel".to_string(),
        }
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let store = MemberStore::open_in_memory().unwrap();

        let members = vec![
            create_test_member(1, Some("active1"), Some("Active"), Some("User")),
            create_test_member(2, Some("active2"), Some("Active"), Some("User")),
            create_test_member(3, None, Some("Deleted"), Some("Account")),
        ];

        store.upsert_members(&members).unwrap();
        store.upsert_members(&members).unwrap();

        assert_eq!(store.count_members(Some(999)).unwrap(), 3);
        assert_eq!(store.count_members(Some(1)).unwrap(), 0);
        assert_eq!(store.count_members(None).unwrap(), 3);
    }

    #[test]
    fn test_upsert_overwrites_fields() {
        let store = MemberStore::open_in_memory().unwrap();

        store
            .upsert_members(&[create_test_member(1, Some("old"), Some("Old"), None)])
            .unwrap();
        let mut updated = create_test_member(1, Some("new"), Some("New"), None);
        updated.status = PresenceStatus::Online;
        store.upsert_members(&[updated]).unwrap();

        let members = store.members_for(999).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].username.as_deref(), Some("new"));
        assert_eq!(members[0].status, PresenceStatus::Online);
    }

    #[test]
    fn test_get_members_by_ids() {
        let store = MemberStore::open_in_memory().unwrap();
        let members: Vec<Member> = (1..=5).map(|i| create_test_member(i, None, None, None)).collect();
        store.upsert_members(&members).unwrap();

        let found = store.get_members_by_ids(&[2, 4, 42]).unwrap();
        let ids: Vec<i64> = found.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![2, 4]);
        assert!(store.get_members_by_ids(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_move_to_removed() {
        let store = MemberStore::open_in_memory().unwrap();
        let members: Vec<Member> = (1..=5).map(|i| create_test_member(i, None, None, None)).collect();
        store.upsert_members(&members).unwrap();

        let moved = store.move_to_removed(&[3, 4], "Deleted Account").unwrap();
        assert_eq!(moved, 2);
        assert_eq!(store.count_members(Some(999)).unwrap(), 3);

        let removed = store.removed_members(Some(999)).unwrap();
        let ids: Vec<i64> = removed.iter().map(|r| r.member.id).collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(removed[0].deletion_reason, "Deleted Account");
        assert_eq!(removed[0].member.channel_username, "@test_channel");
    }

    #[test]
    fn test_removed_insert_is_write_once() {
        let store = MemberStore::open_in_memory().unwrap();
        store.upsert_members(&[create_test_member(7, None, None, None)]).unwrap();
        store.move_to_removed(&[7], "first").unwrap();

        // Re-ingested and removed again: the original removal record stays.
        store.upsert_members(&[create_test_member(7, None, None, None)]).unwrap();
        store.move_to_removed(&[7], "second").unwrap();

        let removed = store.removed_members(None).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].deletion_reason, "first");
        assert_eq!(store.count_members(None).unwrap(), 0);
    }

    #[test]
    fn test_progress_preserves_created_at_and_cursor() {
        let store = MemberStore::open_in_memory().unwrap();
        assert!(store.get_progress(999).unwrap().is_none());

        store
            .update_progress(&collection(), 100, 500, Some(1100), ProgressStatus::InProgress)
            .unwrap();
        let first = store.get_progress(999).unwrap().unwrap();

        store
            .update_progress(&collection(), 500, 500, None, ProgressStatus::Completed)
            .unwrap();
        let second = store.get_progress(999).unwrap().unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.processed_members, 500);
        assert_eq!(second.last_user_id, Some(1100));
        assert_eq!(second.status, ProgressStatus::Completed);
    }

    #[test]
    fn test_mutation_log_and_stats() {
        let store = MemberStore::open_in_memory().unwrap();

        store.log_mutation(&MutationLogEntry::success(1, "a")).unwrap();
        store.log_mutation(&MutationLogEntry::success(2, "b")).unwrap();
        store
            .log_mutation(&MutationLogEntry::failure(3, "", "USER_ADMIN_INVALID"))
            .unwrap();

        let stats = store.mutation_stats().unwrap();
        assert_eq!(
            stats,
            MutationStats { total: 3, successful: 2, failed: 1, with_errors: 1 }
        );

        let entries = store.mutation_log_for(3).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, MutationOutcome::Error);
        assert_eq!(entries[0].error_message.as_deref(), Some("USER_ADMIN_INVALID"));
    }
}
