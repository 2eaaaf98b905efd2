use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::ingest::{DB_SCHEMA_VERSION, count_rows, read_metadata};

pub fn run(args: StatusArgs) -> Result<()> {
    let manifest_dir = args.cache_root.join("manifests");
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join("htsnotes.sqlite"));

    info!(cache_root = %args.cache_root.display(), "status requested");

    match latest_ingest_manifest(&manifest_dir)? {
        Some(path) => {
            let raw =
                fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
            let manifest: serde_json::Value = serde_json::from_slice(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            let field = |key: &str| {
                manifest
                    .get(key)
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };

            info!(
                path = %path.display(),
                run_id = %field("run_id"),
                status = %field("status"),
                doc_type = %field("doc_type"),
                stop_reason = %field("stop_reason"),
                updated_at = %field("updated_at"),
                "latest ingest manifest"
            );
        }
        None => warn!(path = %manifest_dir.display(), "no ingest manifest found"),
    }

    if !db_path.exists() {
        warn!(path = %db_path.display(), "database file missing");
        return Ok(());
    }

    let connection = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;

    let schema_version = read_metadata(&connection, "db_schema_version")?.unwrap_or_default();
    if schema_version != DB_SCHEMA_VERSION {
        warn!(
            found = %schema_version,
            expected = DB_SCHEMA_VERSION,
            "database schema version differs from this build"
        );
    }

    info!(
        path = %db_path.display(),
        schema_version = %schema_version,
        updated_at = %read_metadata(&connection, "db_updated_at")?.unwrap_or_default(),
        rows = count_rows(&connection, "SELECT COUNT(*) FROM hts_entries").unwrap_or(0),
        "database status"
    );

    for (doc_type, rows, nodes) in rows_per_doc_type(&connection)? {
        info!(doc_type = %doc_type, rows, nodes, "doc-type status");
    }

    Ok(())
}

fn latest_ingest_manifest(manifest_dir: &Path) -> Result<Option<PathBuf>> {
    if !manifest_dir.exists() {
        return Ok(None);
    }

    let mut manifests = fs::read_dir(manifest_dir)
        .with_context(|| format!("failed to list {}", manifest_dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("ingest_run_") && name.ends_with(".json"))
        })
        .collect::<Vec<PathBuf>>();

    // Timestamps in the file names are UTC compact, so lexical order is chronological.
    manifests.sort();
    Ok(manifests.pop())
}

fn rows_per_doc_type(connection: &Connection) -> Result<Vec<(String, i64, i64)>> {
    let mut statement = connection.prepare(
        "
        SELECT doc_type, COUNT(*), SUM(CASE WHEN seq = 1 THEN 1 ELSE 0 END)
        FROM hts_entries
        GROUP BY doc_type
        ORDER BY doc_type
        ",
    )?;
    let rows = statement
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<rusqlite::Result<Vec<(String, i64, i64)>>>()?;
    Ok(rows)
}
