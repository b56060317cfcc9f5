//! Persistent best-lap ranking backed by SQLite
//!
//! One row per player uid. The store itself upserts unconditionally; the
//! "only keep a better time" rule is applied by [`RankingStore::advance_if_better`]
//! on top of it.
//!
//! Places are computed as the number of entries whose time is at least as
//! good, so two players with the same time share the worse of the two
//! places.

use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use shared::protocol::{RankingRow, MAX_RANKING_SPAN};
use std::path::Path;
use thiserror::Error;

/// Layout version written to `meta` under the key `version`.
pub const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum RankingError {
    #[error("ranking schema version {found} does not match expected {expected}")]
    SchemaMismatch { found: String, expected: i64 },

    #[error("no matching ranking entry")]
    NotFound,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("ranking storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, RankingError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingEntry {
    pub uid: String,
    pub name: String,
    pub time_ms: i64,
}

impl RankingEntry {
    pub fn new(uid: &str, name: &str, time_ms: i64) -> Self {
        Self {
            uid: uid.to_string(),
            name: name.to_string(),
            time_ms,
        }
    }
}

pub struct RankingStore {
    conn: Connection,
}

impl RankingStore {
    /// Opens (or creates) the ranking database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let store = Self::init(Connection::open(path)?)?;
        info!(
            "Opened ranking store {} ({} entries)",
            path.display(),
            store.count()?
        );
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        let has_meta: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'meta'",
            [],
            |row| row.get(0),
        )?;

        if has_meta == 0 {
            conn.execute_batch(
                "
                BEGIN;
                CREATE TABLE meta (
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    value TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS ranking (
                    id INTEGER PRIMARY KEY,
                    uid TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    time INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS ranking_by_time ON ranking (time, id);
                COMMIT;
                ",
            )?;
            conn.execute(
                "INSERT INTO meta (name, value) VALUES ('version', ?1)",
                params![SCHEMA_VERSION.to_string()],
            )?;
            info!("Created ranking schema version {}", SCHEMA_VERSION);
        } else {
            let found: Option<String> = conn
                .query_row(
                    "SELECT value FROM meta WHERE name = 'version'",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            match found {
                Some(version) if version == SCHEMA_VERSION.to_string() => {}
                other => {
                    return Err(RankingError::SchemaMismatch {
                        found: other.unwrap_or_else(|| "none".to_string()),
                        expected: SCHEMA_VERSION,
                    })
                }
            }
        }

        Ok(Self { conn })
    }

    /// Inserts the entry, or overwrites name and time of the existing row
    /// with the same uid. Returns the row id.
    pub fn advance(&self, entry: &RankingEntry) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO ranking (uid, name, time) VALUES (?1, ?2, ?3)
             ON CONFLICT(uid) DO UPDATE SET name = excluded.name, time = excluded.time",
            params![entry.uid, entry.name, entry.time_ms],
        )?;
        debug!(
            "Ranking advanced: {} ({}) {} ms",
            entry.name, entry.uid, entry.time_ms
        );
        self.find_index(&entry.uid)
    }

    /// Stores the entry only when the uid is new or the time beats the
    /// stored one. Returns whether anything was written.
    pub fn advance_if_better(&self, entry: &RankingEntry) -> Result<bool> {
        match self.find_index(&entry.uid) {
            Ok(id) => {
                if entry.time_ms >= self.entry_by_id(id)?.time_ms {
                    return Ok(false);
                }
            }
            Err(RankingError::NotFound) => {}
            Err(e) => return Err(e),
        }
        self.advance(entry)?;
        Ok(true)
    }

    pub fn find_index(&self, uid: &str) -> Result<i64> {
        self.conn
            .query_row("SELECT id FROM ranking WHERE uid = ?1", params![uid], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or(RankingError::NotFound)
    }

    pub fn entry_by_id(&self, id: i64) -> Result<RankingEntry> {
        self.conn
            .query_row(
                "SELECT uid, name, time FROM ranking WHERE id = ?1",
                params![id],
                |row| {
                    Ok(RankingEntry {
                        uid: row.get(0)?,
                        name: row.get(1)?,
                        time_ms: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or(RankingError::NotFound)
    }

    /// Entry at 1-based `rank` in ascending time order. Equal times are
    /// ordered by insertion.
    pub fn entry_at_position(&self, rank: i64) -> Result<RankingEntry> {
        if rank < 1 {
            return Err(RankingError::InvalidArgument(format!(
                "rank must be positive, got {}",
                rank
            )));
        }
        self.conn
            .query_row(
                "SELECT uid, name, time FROM ranking ORDER BY time, id LIMIT 1 OFFSET ?1",
                params![rank - 1],
                |row| {
                    Ok(RankingEntry {
                        uid: row.get(0)?,
                        name: row.get(1)?,
                        time_ms: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or(RankingError::NotFound)
    }

    /// Number of entries with a time at least as good as row `id`.
    pub fn rank_of(&self, id: i64) -> Result<i64> {
        let time = self.entry_by_id(id)?.time_ms;
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM ranking WHERE time <= ?1",
            params![time],
            |row| row.get(0),
        )?)
    }

    pub fn count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM ranking", [], |row| row.get(0))?)
    }

    /// Rows at places `from..=to`, at most [`MAX_RANKING_SPAN`] of them.
    pub fn entries(&self, from: i64, to: i64) -> Result<Vec<RankingRow>> {
        if from < 1 || from > to {
            return Err(RankingError::InvalidArgument(format!(
                "bad ranking range {}..{}",
                from, to
            )));
        }
        if to - from + 1 > MAX_RANKING_SPAN {
            return Err(RankingError::InvalidArgument(format!(
                "ranking range {}..{} spans more than {} entries",
                from, to, MAX_RANKING_SPAN
            )));
        }

        let mut stmt = self.conn.prepare(
            "SELECT r.uid, r.name, r.time,
                    (SELECT COUNT(*) FROM ranking o WHERE o.time <= r.time)
             FROM ranking r
             ORDER BY r.time, r.id
             LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![to - from + 1, from - 1], |row| {
            Ok(RankingRow {
                uid: row.get(0)?,
                name: row.get(1)?,
                time_ms: row.get(2)?,
                place: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// The entry of `uid` together with its place.
    pub fn find(&self, uid: &str) -> Result<RankingRow> {
        let id = self.find_index(uid)?;
        let entry = self.entry_by_id(id)?;
        Ok(RankingRow {
            uid: entry.uid,
            name: entry.name,
            time_ms: entry.time_ms,
            place: self.rank_of(id)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::path::PathBuf;

    fn temp_db(tag: &str) -> PathBuf {
        let path =
            std::env::temp_dir().join(format!("ranking-{}-{}.db", tag, std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn test_positions_follow_time() {
        let store = RankingStore::open_in_memory().unwrap();
        store.advance(&RankingEntry::new("a", "A", 10)).unwrap();
        store.advance(&RankingEntry::new("b", "B", 5)).unwrap();

        assert_eq!(store.entry_at_position(1).unwrap().uid, "b");
        assert_eq!(store.entry_at_position(2).unwrap().uid, "a");

        store.advance(&RankingEntry::new("a", "A", 3)).unwrap();
        assert_eq!(store.entry_at_position(1).unwrap().uid, "a");
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_position_bounds() {
        let store = RankingStore::open_in_memory().unwrap();
        store.advance(&RankingEntry::new("a", "A", 10)).unwrap();

        assert!(matches!(
            store.entry_at_position(0),
            Err(RankingError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.entry_at_position(2),
            Err(RankingError::NotFound)
        ));
    }

    #[test]
    fn test_equal_times_share_the_worse_place() {
        let store = RankingStore::open_in_memory().unwrap();
        let a = store.advance(&RankingEntry::new("a", "A", 5)).unwrap();
        let b = store.advance(&RankingEntry::new("b", "B", 5)).unwrap();
        let c = store.advance(&RankingEntry::new("c", "C", 7)).unwrap();

        assert_eq!(store.rank_of(a).unwrap(), 2);
        assert_eq!(store.rank_of(b).unwrap(), 2);
        assert_eq!(store.rank_of(c).unwrap(), 3);
    }

    #[test]
    fn test_advance_overwrites_name() {
        let store = RankingStore::open_in_memory().unwrap();
        let id = store.advance(&RankingEntry::new("u", "Old", 50)).unwrap();
        let same = store.advance(&RankingEntry::new("u", "New", 60)).unwrap();

        assert_eq!(id, same);
        let entry = store.entry_by_id(id).unwrap();
        assert_eq!(entry.name, "New");
        assert_eq!(entry.time_ms, 60);
    }

    #[test]
    fn test_advance_if_better() {
        let store = RankingStore::open_in_memory().unwrap();
        assert!(store
            .advance_if_better(&RankingEntry::new("u", "U", 50))
            .unwrap());
        assert!(!store
            .advance_if_better(&RankingEntry::new("u", "U", 70))
            .unwrap());
        assert!(!store
            .advance_if_better(&RankingEntry::new("u", "U", 50))
            .unwrap());
        assert!(store
            .advance_if_better(&RankingEntry::new("u", "U", 40))
            .unwrap());
        assert_eq!(store.find("u").unwrap().time_ms, 40);
    }

    #[test]
    fn test_missing_uid() {
        let store = RankingStore::open_in_memory().unwrap();
        assert!(matches!(store.find_index("x"), Err(RankingError::NotFound)));
        assert!(matches!(store.find("x"), Err(RankingError::NotFound)));
        assert!(matches!(store.rank_of(42), Err(RankingError::NotFound)));
    }

    #[test]
    fn test_entries_range() {
        let store = RankingStore::open_in_memory().unwrap();
        for (i, time) in [30, 10, 20, 10].iter().enumerate() {
            let uid = format!("u{}", i);
            store.advance(&RankingEntry::new(&uid, &uid, *time)).unwrap();
        }

        let rows = store.entries(1, 3).unwrap();
        let uids: Vec<_> = rows.iter().map(|r| r.uid.as_str()).collect();
        assert_eq!(uids, vec!["u1", "u3", "u2"]);
        let places: Vec<_> = rows.iter().map(|r| r.place).collect();
        assert_eq!(places, vec![2, 2, 3]);

        assert_eq!(store.entries(4, 10).unwrap().len(), 1);
        assert!(store.entries(5, 6).unwrap().is_empty());
    }

    #[test]
    fn test_entries_validation() {
        let store = RankingStore::open_in_memory().unwrap();
        for (from, to) in [(0, 5), (5, 4), (1, 21)] {
            assert!(matches!(
                store.entries(from, to),
                Err(RankingError::InvalidArgument(_))
            ));
        }
        assert!(store.entries(1, 20).unwrap().is_empty());
    }

    #[test]
    fn test_reopen_keeps_entries() {
        let path = temp_db("reopen");
        {
            let store = RankingStore::open(&path).unwrap();
            store.advance(&RankingEntry::new("a", "A", 10)).unwrap();
        }
        let store = RankingStore::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        drop(store);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_version_mismatch_refuses_to_open() {
        let path = temp_db("mismatch");
        drop(RankingStore::open(&path).unwrap());
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute("UPDATE meta SET value = '2' WHERE name = 'version'", [])
                .unwrap();
        }

        match RankingStore::open(&path) {
            Err(RankingError::SchemaMismatch { found, expected }) => {
                assert_eq!(found, "2");
                assert_eq!(expected, SCHEMA_VERSION);
            }
            _ => panic!("Wrong open result"),
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_random_times_rank_consistently() {
        let mut rng = StdRng::seed_from_u64(42);
        let store = RankingStore::open_in_memory().unwrap();
        for i in 0..200 {
            let time = rng.gen_range(1..50);
            store
                .advance(&RankingEntry::new(&format!("u{}", i), "p", time))
                .unwrap();
        }

        let mut previous = 0;
        for position in 1..=store.count().unwrap() {
            let entry = store.entry_at_position(position).unwrap();
            assert!(entry.time_ms >= previous);
            previous = entry.time_ms;

            // Rank counts everyone at least as fast, so it never beats the
            // position and ties collapse onto the worst shared place.
            let id = store.find_index(&entry.uid).unwrap();
            let rank = store.rank_of(id).unwrap();
            assert!(rank >= position);
            let ties_after = (position + 1..=store.count().unwrap())
                .take_while(|p| store.entry_at_position(*p).unwrap().time_ms == entry.time_ms)
                .count() as i64;
            assert_eq!(rank, position + ties_after);
        }
    }
}
