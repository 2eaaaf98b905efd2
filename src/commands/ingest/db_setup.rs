use anyhow::{Context, Result};
use rusqlite::{Connection, Statement, params};

use super::node_flush::{NodeRecord, NodeStore};
use crate::util::now_utc_string;

pub(crate) const DB_SCHEMA_VERSION: &str = "0.1.0";

pub(crate) fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

pub(crate) fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS hts_entries (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          run_id TEXT NOT NULL,
          page INTEGER,
          doc_type TEXT NOT NULL,
          ref_id TEXT,
          parent_id INTEGER,
          subtype TEXT,
          marker TEXT NOT NULL,
          seq INTEGER NOT NULL DEFAULT 1,
          text TEXT NOT NULL,
          last_updated TEXT NOT NULL,
          FOREIGN KEY(parent_id) REFERENCES hts_entries(id)
        );

        CREATE INDEX IF NOT EXISTS idx_hts_entries_parent ON hts_entries(parent_id);
        CREATE INDEX IF NOT EXISTS idx_hts_entries_doc_type_marker ON hts_entries(doc_type, marker, seq);
        ",
        )
        .context("failed to create hts_entries schema")?;

    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_updated_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now_utc_string()],
    )?;

    Ok(())
}

pub(crate) fn delete_rows_for_doc_type(connection: &Connection, doc_type: &str) -> Result<usize> {
    connection
        .execute("DELETE FROM hts_entries WHERE doc_type = ?1", [doc_type])
        .with_context(|| format!("failed to delete existing {doc_type} rows"))
}

pub(crate) fn count_rows(connection: &Connection, sql: &str) -> Result<i64> {
    let count = connection.query_row(sql, [], |row| row.get(0))?;
    Ok(count)
}

pub(crate) fn read_metadata(connection: &Connection, key: &str) -> Result<Option<String>> {
    let mut statement = connection.prepare("SELECT value FROM metadata WHERE key = ?1")?;
    let mut rows = statement.query([key])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

/// Writes nodes into `hts_entries`, tagging every row with the run id.
pub(crate) struct SqliteNodeStore<'conn> {
    statement: Statement<'conn>,
    run_id: String,
    inserted: usize,
}

impl<'conn> SqliteNodeStore<'conn> {
    pub(crate) fn new(connection: &'conn Connection, run_id: &str) -> Result<Self> {
        let statement = connection
            .prepare(
                "
            INSERT INTO hts_entries(
              run_id, page, doc_type, ref_id, parent_id, subtype, marker, seq, text, last_updated
            )
            VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ",
            )
            .context("failed to prepare hts_entries insert")?;

        Ok(Self {
            statement,
            run_id: run_id.to_string(),
            inserted: 0,
        })
    }

    pub(crate) fn inserted(&self) -> usize {
        self.inserted
    }
}

impl NodeStore for SqliteNodeStore<'_> {
    fn insert_node(&mut self, record: &NodeRecord) -> Result<i64> {
        let id = self.statement.insert(params![
            &self.run_id,
            record.page,
            &record.doc_type,
            &record.ref_id,
            record.parent_id,
            &record.subtype,
            &record.marker,
            record.seq,
            &record.text,
            now_utc_string()
        ])?;
        self.inserted += 1;
        Ok(id)
    }
}
