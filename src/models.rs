//! # Database models
//!
//! Rows of the response cache's SQLite file (see `crate::schema`):
//!
//! - [`CacheEntry`]: one cached reply, keyed by the digest of the normalized query and
//!   history signature.
//! - [`CacheCounters`]: the single row holding lifetime hit/miss counters.
//!
//! Timestamps are Unix microseconds stored as `BIGINT`.
use diesel::prelude::*;

/// One cached reply.
///
/// ### Table
/// - `cache_entries`
///
/// ### Notes
/// - `key` is a SHA-256 hex digest, never the raw text.
/// - `query` is the normalized user message, kept so `iota cache info` can show what is
///   cached.
/// - `last_accessed` drives LRU eviction and is refreshed on every hit.
#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::cache_entries)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CacheEntry {
    pub key: String,
    pub query: String,
    pub value: String,
    pub created_at: i64,
    pub last_accessed: i64,
}

/// Lifetime hit/miss counters; there is only ever the row with `id = 1`.
#[derive(Queryable, Selectable, Debug, Clone, Copy, PartialEq)]
#[diesel(table_name = crate::schema::cache_stats)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CacheCounters {
    pub id: i32,
    pub hits: i64,
    pub misses: i64,
}
