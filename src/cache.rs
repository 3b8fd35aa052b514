//! # Response cache
//!
//! Maps a normalized user message (plus a fingerprint of the recent history) to a reply
//! generated earlier, so repeated questions skip the three hosted APIs entirely.
//!
//! ## Keys
//! [`cache_key`] trims and lowercases the message, appends the
//! [`history_signature`](crate::conversation::history_signature) and hashes the result with
//! SHA-256. Identical `(message, history)` pairs therefore always land on the same entry.
//!
//! ## Storage
//! [`SqliteResponseCache`] keeps entries in a local SQLite file through Diesel. One
//! connection sits behind a mutex; writes are `REPLACE INTO`, so concurrent sessions can
//! share a cache and the last write for a key wins. The file also holds lifetime hit/miss
//! counters, which is what `iota cache stats` reports.
//!
//! ## Eviction
//! Past `max_entries`, the least recently used 20% (at least one entry) are dropped.
//!
//! ```no_run
//! use iota_bot::cache::{ResponseCache, SqliteResponseCache};
//!
//! # fn demo() -> iota_bot::error::Result<()> {
//! let cache = SqliteResponseCache::open("responses.db".as_ref(), 1000)?;
//! cache.store("Kya kar rahi hai?", &[], "Kuch nahi, tu bata?")?;
//! assert!(cache.lookup("kya kar rahi hai?", &[])?.is_some());
//! # Ok(()) }
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};
use diesel::{connection::SimpleConnection, prelude::*};
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    conversation::{HistoryMessage, history_signature},
    error::{BotError, Result},
    models::{CacheCounters, CacheEntry},
    schema::{cache_entries, cache_stats},
};

const STATS_ROW: i32 = 1;

const CREATE_TABLES: &str = "
    PRAGMA busy_timeout = 5000;
    PRAGMA journal_mode = WAL;
    CREATE TABLE IF NOT EXISTS cache_entries (
        key TEXT PRIMARY KEY NOT NULL,
        query TEXT NOT NULL,
        value TEXT NOT NULL,
        created_at BIGINT NOT NULL,
        last_accessed BIGINT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS cache_entries_last_accessed ON cache_entries (last_accessed);
    CREATE TABLE IF NOT EXISTS cache_stats (
        id INTEGER PRIMARY KEY NOT NULL,
        hits BIGINT NOT NULL DEFAULT 0,
        misses BIGINT NOT NULL DEFAULT 0
    );
    INSERT OR IGNORE INTO cache_stats (id, hits, misses) VALUES (1, 0, 0);
";

/// Trim and lowercase.
pub fn normalize(query: &str) -> String {
    query.trim().to_lowercase()
}

/// Returns `(normalized_query, key)`.
pub fn cache_key(query: &str, history: &[HistoryMessage]) -> (String, String) {
    let normalized = normalize(query);
    let key = sha256::digest(format!("{}:{}", normalized, history_signature(history)));
    (normalized, key)
}

/// Snapshot of cache usage. Field names match what `cache export` writes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// `hits / (hits + misses)`, 0 with no traffic.
    pub hit_rate: f64,
}

impl CacheStats {
    fn new(total_entries: usize, cache_hits: u64, cache_misses: u64) -> Self {
        let total = cache_hits + cache_misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            cache_hits as f64 / total as f64
        };
        Self {
            total_entries,
            cache_hits,
            cache_misses,
            hit_rate,
        }
    }

    pub fn requests(&self) -> u64 {
        self.cache_hits + self.cache_misses
    }

    pub fn efficiency(&self) -> &'static str {
        if self.hit_rate > 0.7 {
            "Excellent"
        } else if self.hit_rate > 0.4 {
            "Good"
        } else {
            "Poor"
        }
    }
}

#[derive(Serialize)]
struct ExportedStats {
    #[serde(flatten)]
    stats: CacheStats,
    exported_at: String,
}

/// A cached reply as listed by [`SqliteResponseCache::recent`].
#[derive(Debug, Clone, PartialEq)]
pub struct CachedQuery {
    pub query: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

/// Key-value store for generated replies.
pub trait ResponseCache: Send + Sync {
    fn lookup(&self, query: &str, history: &[HistoryMessage]) -> Result<Option<String>>;

    fn store(&self, query: &str, history: &[HistoryMessage], response: &str) -> Result<()>;

    fn clear(&self) -> Result<()>;

    fn stats(&self) -> Result<CacheStats>;

    /// Write [`stats`](Self::stats) plus an `exported_at` timestamp to `path` as JSON.
    fn export_stats(&self, path: &Path) -> Result<CacheStats> {
        let stats = self.stats()?;
        let exported = ExportedStats {
            stats,
            exported_at: Utc::now().to_rfc3339(),
        };
        fs::write(path, serde_json::to_string_pretty(&exported)?)?;
        info!("Cache stats exported to {}", path.display());
        Ok(stats)
    }
}

struct Inner {
    conn: SqliteConnection,
    last_tick: i64,
}

impl Inner {
    /// Strictly increasing microsecond clock, so LRU order never ties.
    fn next_tick(&mut self) -> i64 {
        let now = Utc::now().timestamp_micros();
        self.last_tick = now.max(self.last_tick + 1);
        self.last_tick
    }
}

/// SQLite-backed [`ResponseCache`].
pub struct SqliteResponseCache {
    inner: Mutex<Inner>,
    max_entries: usize,
    path: PathBuf,
}

impl SqliteResponseCache {
    /// Open (creating if needed) the cache file at `path`.
    ///
    /// # Errors
    /// [`BotError::CacheStorage`] if the directory or database cannot be created.
    pub fn open(path: &Path, max_entries: usize) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| BotError::cache(format!("{}: {e}", parent.display())))?;
        }

        let url = path
            .to_str()
            .ok_or_else(|| BotError::cache(format!("non UTF-8 path {}", path.display())))?;
        let mut conn = SqliteConnection::establish(url)?;
        conn.batch_execute(CREATE_TABLES)?;

        let cache = Self {
            inner: Mutex::new(Inner { conn, last_tick: 0 }),
            max_entries: max_entries.max(1),
            path: path.to_path_buf(),
        };
        info!("Opened response cache at {}", path.display());
        Ok(cache)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| BotError::cache("cache connection lock poisoned"))
    }

    /// Most recently used entries, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<CachedQuery>> {
        let mut inner = self.lock()?;
        let rows: Vec<CacheEntry> = cache_entries::table
            .select(CacheEntry::as_select())
            .order(cache_entries::last_accessed.desc())
            .limit(limit as i64)
            .load(&mut inner.conn)?;

        Ok(rows
            .into_iter()
            .map(|row| CachedQuery {
                query: row.query,
                value: row.value,
                created_at: DateTime::from_timestamp_micros(row.created_at).unwrap_or_default(),
            })
            .collect())
    }

    fn evict_if_needed(conn: &mut SqliteConnection, max_entries: usize) -> QueryResult<usize> {
        let count: i64 = cache_entries::table.count().get_result(conn)?;
        if count as usize <= max_entries {
            return Ok(0);
        }

        let remove = (max_entries / 5).max(1);
        let victims: Vec<String> = cache_entries::table
            .select(cache_entries::key)
            .order(cache_entries::last_accessed.asc())
            .limit(remove as i64)
            .load(conn)?;

        diesel::delete(cache_entries::table.filter(cache_entries::key.eq_any(victims))).execute(conn)
    }
}

impl ResponseCache for SqliteResponseCache {
    fn lookup(&self, query: &str, history: &[HistoryMessage]) -> Result<Option<String>> {
        let (_, key) = cache_key(query, history);
        let mut inner = self.lock()?;
        let tick = inner.next_tick();
        let conn = &mut inner.conn;

        let hit: Option<String> = cache_entries::table
            .find(key.as_str())
            .select(cache_entries::value)
            .first(conn)
            .optional()?;

        if hit.is_some() {
            diesel::update(cache_entries::table.find(key.as_str()))
                .set(cache_entries::last_accessed.eq(tick))
                .execute(conn)?;
            diesel::update(cache_stats::table.find(STATS_ROW))
                .set(cache_stats::hits.eq(cache_stats::hits + 1i64))
                .execute(conn)?;
            debug!("Cache hit for key {}", key);
        } else {
            diesel::update(cache_stats::table.find(STATS_ROW))
                .set(cache_stats::misses.eq(cache_stats::misses + 1i64))
                .execute(conn)?;
            debug!("Cache miss for key {}", key);
        }

        Ok(hit)
    }

    fn store(&self, query: &str, history: &[HistoryMessage], response: &str) -> Result<()> {
        let (normalized, key) = cache_key(query, history);
        let max_entries = self.max_entries;
        let mut inner = self.lock()?;
        let tick = inner.next_tick();

        let entry = CacheEntry {
            key,
            query: normalized,
            value: response.to_string(),
            created_at: tick,
            last_accessed: tick,
        };

        let evicted = inner.conn.transaction(|conn| {
            diesel::replace_into(cache_entries::table)
                .values(&entry)
                .execute(conn)?;
            Self::evict_if_needed(conn, max_entries)
        })?;

        if evicted > 0 {
            info!("Cache cleaned: removed {} old entries", evicted);
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut inner = self.lock()?;
        inner.conn.transaction(|conn| {
            diesel::delete(cache_entries::table).execute(conn)?;
            diesel::update(cache_stats::table.find(STATS_ROW))
                .set((cache_stats::hits.eq(0i64), cache_stats::misses.eq(0i64)))
                .execute(conn)
        })?;
        info!("Cache cleared");
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats> {
        let mut inner = self.lock()?;
        let conn = &mut inner.conn;
        let total: i64 = cache_entries::table.count().get_result(conn)?;
        let counters: CacheCounters = cache_stats::table
            .find(STATS_ROW)
            .select(CacheCounters::as_select())
            .first(conn)?;

        Ok(CacheStats::new(
            total as usize,
            counters.hits.max(0) as u64,
            counters.misses.max(0) as u64,
        ))
    }
}
