//! The state store: `(kind, open, close) ↔ hash` plus the document format
//! tag, persisted across the extract/inject boundary.
//!
//! Hashes are content-derived (xxh32 over the entry, base64url) so they
//! stay stable for a given document across runs; a collision between
//! distinct entries re-seeds until the hash is unique. Hashes never
//! contain colons or sentinel code points.

use std::collections::HashMap;
use std::path::Path;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rusqlite::{params, Connection, OptionalExtension};
use xxhash_rust::xxh32::xxh32;

use crate::error::Result;

/// Key/value service mapping styles to opaque hash tokens and back.
///
/// Entries are created during extraction the first time a
/// `(kind, open, close)` triple is seen, looked up during injection, and
/// never mutated. Access is serial; `begin`/`commit` bracket bulk
/// insertions.
pub trait StateStore {
    /// Open a transaction bracket, if the backing supports one.
    fn begin(&mut self) -> Result<()>;
    /// Close the transaction bracket.
    fn commit(&mut self) -> Result<()>;
    /// Insert-or-look-up a style, returning its opaque hash token.
    fn style(&mut self, kind: &str, open: &str, close: &str) -> Result<String>;
    /// Reverse lookup; returns an empty pair when the hash is unknown.
    fn lookup(&self, kind: &str, hash: &str) -> Result<(String, String)>;
    /// Record the document format at extraction time.
    fn set_format(&mut self, format: &str) -> Result<()>;
    /// The format tag stored at extraction; empty when never set.
    fn format(&self) -> Result<String>;
}

/// Derive the candidate hash for a style entry.
fn mint(kind: &str, open: &str, close: &str, seed: u32) -> String {
    let mut buf = Vec::with_capacity(kind.len() + open.len() + close.len() + 2);
    buf.extend_from_slice(kind.as_bytes());
    buf.push(0);
    buf.extend_from_slice(open.as_bytes());
    buf.push(0);
    buf.extend_from_slice(close.as_bytes());
    let h = xxh32(&buf, seed);
    URL_SAFE_NO_PAD.encode(h.to_be_bytes())
}

/// In-memory state store for tests and one-shot pipelines.
#[derive(Debug, Default)]
pub struct MemState {
    forward: HashMap<(String, String, String), String>,
    reverse: HashMap<(String, String), (String, String)>,
    format: String,
}

impl StateStore for MemState {
    fn begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    fn style(&mut self, kind: &str, open: &str, close: &str) -> Result<String> {
        let key = (kind.to_string(), open.to_string(), close.to_string());
        if let Some(hash) = self.forward.get(&key) {
            return Ok(hash.clone());
        }
        let mut seed = 0;
        let hash = loop {
            let candidate = mint(kind, open, close, seed);
            if !self.reverse.contains_key(&(kind.to_string(), candidate.clone())) {
                break candidate;
            }
            seed += 1;
        };
        self.reverse.insert(
            (kind.to_string(), hash.clone()),
            (open.to_string(), close.to_string()),
        );
        self.forward.insert(key, hash.clone());
        Ok(hash)
    }

    fn lookup(&self, kind: &str, hash: &str) -> Result<(String, String)> {
        Ok(self
            .reverse
            .get(&(kind.to_string(), hash.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn set_format(&mut self, format: &str) -> Result<()> {
        self.format = format.to_string();
        Ok(())
    }

    fn format(&self) -> Result<String> {
        Ok(self.format.clone())
    }
}

/// State store persisted to `state.sqlite3` in the staging directory.
pub struct SqliteState {
    conn: Connection,
    in_txn: bool,
}

impl SqliteState {
    /// Open (or create) the store inside a staging directory.
    pub fn open(tmpdir: &Path) -> Result<Self> {
        let conn = Connection::open(tmpdir.join("state.sqlite3"))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS styles (\
                 kind TEXT NOT NULL, hash TEXT NOT NULL,\
                 open TEXT NOT NULL, close TEXT NOT NULL,\
                 PRIMARY KEY (kind, hash));\
             CREATE INDEX IF NOT EXISTS styles_fwd ON styles (kind, open, close);\
             CREATE TABLE IF NOT EXISTS meta (\
                 key TEXT PRIMARY KEY, value TEXT NOT NULL);",
        )?;
        Ok(Self {
            conn,
            in_txn: false,
        })
    }
}

impl StateStore for SqliteState {
    fn begin(&mut self) -> Result<()> {
        if !self.in_txn {
            self.conn.execute_batch("BEGIN")?;
            self.in_txn = true;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.in_txn {
            self.conn.execute_batch("COMMIT")?;
            self.in_txn = false;
        }
        Ok(())
    }

    fn style(&mut self, kind: &str, open: &str, close: &str) -> Result<String> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT hash FROM styles WHERE kind = ?1 AND open = ?2 AND close = ?3",
                params![kind, open, close],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(hash) = existing {
            return Ok(hash);
        }

        let mut seed = 0;
        let hash = loop {
            let candidate = mint(kind, open, close, seed);
            let taken: Option<String> = self
                .conn
                .query_row(
                    "SELECT hash FROM styles WHERE kind = ?1 AND hash = ?2",
                    params![kind, candidate],
                    |row| row.get(0),
                )
                .optional()?;
            if taken.is_none() {
                break candidate;
            }
            seed += 1;
        };

        self.conn.execute(
            "INSERT INTO styles (kind, hash, open, close) VALUES (?1, ?2, ?3, ?4)",
            params![kind, hash, open, close],
        )?;
        Ok(hash)
    }

    fn lookup(&self, kind: &str, hash: &str) -> Result<(String, String)> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT open, close FROM styles WHERE kind = ?1 AND hash = ?2",
                params![kind, hash],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.unwrap_or_default())
    }

    fn set_format(&mut self, format: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES ('format', ?1) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![format],
        )?;
        Ok(())
    }

    fn format(&self) -> Result<String> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'format'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(state: &mut dyn StateStore) {
        state.begin().unwrap();
        let h1 = state.style("b", "<b>", "</b>").unwrap();
        let h2 = state.style("i", "<i>", "</i>").unwrap();
        state.commit().unwrap();

        assert_ne!(h1, h2);
        // Stable: the same triple yields the same hash.
        assert_eq!(state.style("b", "<b>", "</b>").unwrap(), h1);
        // Same kind, different tags: different hash.
        let h3 = state.style("b", "<b class=\"x\">", "</b>").unwrap();
        assert_ne!(h1, h3);

        assert_eq!(
            state.lookup("b", &h1).unwrap(),
            ("<b>".to_string(), "</b>".to_string())
        );
        assert_eq!(state.lookup("b", "missing").unwrap(), (String::new(), String::new()));

        assert!(!h1.contains(':'));
        assert!(h1.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));

        state.set_format("docx").unwrap();
        assert_eq!(state.format().unwrap(), "docx");
    }

    #[test]
    fn test_mem_state() {
        let mut state = MemState::default();
        exercise(&mut state);
    }

    #[test]
    fn test_sqlite_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = SqliteState::open(dir.path()).unwrap();
        exercise(&mut state);
    }

    #[test]
    fn test_sqlite_state_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let h1 = {
            let mut state = SqliteState::open(dir.path()).unwrap();
            state.set_format("html").unwrap();
            state.style("a", "<a href=\"x\">", "</a>").unwrap()
        };
        let state = SqliteState::open(dir.path()).unwrap();
        assert_eq!(state.format().unwrap(), "html");
        assert_eq!(
            state.lookup("a", &h1).unwrap(),
            ("<a href=\"x\">".to_string(), "</a>".to_string())
        );
    }

    #[test]
    fn test_empty_open_or_close_entries() {
        // Protection folding stores one-sided styles.
        let mut state = MemState::default();
        let before = state.style("P", "<br/>", "").unwrap();
        let after = state.style("P", "", "<br/>").unwrap();
        assert_ne!(before, after);
        assert_eq!(state.lookup("P", &before).unwrap().0, "<br/>");
        assert_eq!(state.lookup("P", &after).unwrap().1, "<br/>");
    }
}
