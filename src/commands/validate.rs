use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OpenFlags, params};
use tracing::{info, warn};

use crate::cli::ValidateArgs;
use crate::model::{InvariantCheck, ValidationReport};
use crate::util::{now_utc_string, write_json_pretty};

/// Each query counts offending child rows; `?1` is an optional doc-type filter.
const STRUCTURAL_CHECKS: [(&str, &str); 5] = [
    (
        "dangling_parent_id",
        "
        SELECT COUNT(*)
        FROM hts_entries child
        LEFT JOIN hts_entries parent ON parent.id = child.parent_id
        WHERE child.parent_id IS NOT NULL
          AND parent.id IS NULL
          AND (?1 IS NULL OR child.doc_type = ?1)
        ",
    ),
    (
        "parent_written_after_child",
        "
        SELECT COUNT(*)
        FROM hts_entries child
        WHERE child.parent_id IS NOT NULL
          AND child.parent_id >= child.id
          AND (?1 IS NULL OR child.doc_type = ?1)
        ",
    ),
    (
        "nested_marker_without_parent",
        "
        SELECT COUNT(*)
        FROM hts_entries child
        WHERE child.parent_id IS NULL
          AND instr(child.marker, '-') > 0
          AND (?1 IS NULL OR child.doc_type = ?1)
        ",
    ),
    (
        "continuation_marker_mismatch",
        "
        SELECT COUNT(*)
        FROM hts_entries child
        LEFT JOIN hts_entries parent ON parent.id = child.parent_id
        WHERE child.seq > 1
          AND (parent.id IS NULL OR parent.marker <> child.marker OR parent.seq <> 1)
          AND (?1 IS NULL OR child.doc_type = ?1)
        ",
    ),
    (
        "marker_not_under_parent",
        "
        SELECT COUNT(*)
        FROM hts_entries child
        JOIN hts_entries parent ON parent.id = child.parent_id
        WHERE child.seq = 1
          AND substr(child.marker, 1, length(parent.marker) + 1) <> parent.marker || '-'
          AND (?1 IS NULL OR child.doc_type = ?1)
        ",
    ),
];

pub fn run(args: ValidateArgs) -> Result<()> {
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join("htsnotes.sqlite"));

    let connection = Connection::open_with_flags(
        &db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open database read-only: {}", db_path.display()))?;

    let report = collect_report(
        &connection,
        &db_path.display().to_string(),
        args.doc_type.as_deref(),
    )?;

    for check in &report.checks {
        if check.violations > 0 {
            warn!(check = %check.name, violations = check.violations, "structural check failed");
        } else {
            info!(check = %check.name, "structural check passed");
        }
    }

    if let Some(report_path) = &args.report_path {
        write_json_pretty(report_path, &report)?;
        info!(path = %report_path.display(), "wrote validation report");
    }

    if !report.passed {
        let failed = report
            .checks
            .iter()
            .filter(|check| check.violations > 0)
            .map(|check| format!("{}={}", check.name, check.violations))
            .collect::<Vec<String>>();
        bail!("structural validation failed: {}", failed.join(", "));
    }

    info!(rows = report.rows_checked, "structural validation passed");
    Ok(())
}

fn collect_report(
    connection: &Connection,
    db_path: &str,
    doc_type: Option<&str>,
) -> Result<ValidationReport> {
    let rows_checked = query_violation_count(
        connection,
        "SELECT COUNT(*) FROM hts_entries WHERE ?1 IS NULL OR doc_type = ?1",
        doc_type,
    )?;

    let checks = STRUCTURAL_CHECKS
        .iter()
        .map(|(name, sql)| {
            Ok(InvariantCheck {
                name: (*name).to_string(),
                violations: query_violation_count(connection, sql, doc_type)
                    .with_context(|| format!("structural check {name} failed to run"))?,
            })
        })
        .collect::<Result<Vec<InvariantCheck>>>()?;

    let passed = checks.iter().all(|check| check.violations == 0);

    Ok(ValidationReport {
        manifest_version: 1,
        generated_at: now_utc_string(),
        db_path: db_path.to_string(),
        doc_type: doc_type.map(str::to_string),
        rows_checked,
        checks,
        passed,
    })
}

fn query_violation_count(connection: &Connection, sql: &str, doc_type: Option<&str>) -> Result<i64> {
    let count = connection.query_row(sql, params![doc_type], |row| row.get::<_, i64>(0))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::ingest::ensure_schema;

    fn insert_row(
        connection: &Connection,
        parent_id: Option<i64>,
        marker: &str,
        seq: i64,
    ) -> i64 {
        connection
            .execute(
                "
                INSERT INTO hts_entries(
                  run_id, page, doc_type, ref_id, parent_id, subtype, marker, seq, text, last_updated
                )
                VALUES('run-test', 21, 'General Note', NULL, ?1, NULL, ?2, ?3, 'text', 'now')
                ",
                params![parent_id, marker, seq],
            )
            .expect("insert row");
        connection.last_insert_rowid()
    }

    fn violations(report: &ValidationReport, name: &str) -> i64 {
        report
            .checks
            .iter()
            .find(|check| check.name == name)
            .map(|check| check.violations)
            .expect("check present")
    }

    #[test]
    fn well_formed_tree_passes_every_check() {
        let connection = Connection::open_in_memory().expect("in-memory db");
        ensure_schema(&connection).expect("schema");

        let root = insert_row(&connection, None, "4", 1);
        insert_row(&connection, Some(root), "4", 2);
        let letter = insert_row(&connection, Some(root), "4-b", 1);
        insert_row(&connection, Some(letter), "4-b-i", 1);

        let report = collect_report(&connection, ":memory:", None).expect("report");
        assert!(report.passed, "{:?}", report.checks);
        assert_eq!(report.rows_checked, 4);
    }

    #[test]
    fn detects_broken_linkage() {
        let connection = Connection::open_in_memory().expect("in-memory db");
        ensure_schema(&connection).expect("schema");

        let root = insert_row(&connection, None, "4", 1);
        insert_row(&connection, None, "4-a", 1);
        insert_row(&connection, Some(root), "5-a", 1);
        insert_row(&connection, Some(root), "4-c", 2);

        let report = collect_report(&connection, ":memory:", None).expect("report");
        assert!(!report.passed);
        assert_eq!(violations(&report, "nested_marker_without_parent"), 1);
        assert_eq!(violations(&report, "marker_not_under_parent"), 1);
        assert_eq!(violations(&report, "continuation_marker_mismatch"), 1);
        assert_eq!(violations(&report, "dangling_parent_id"), 0);
    }

    #[test]
    fn doc_type_filter_limits_rows() {
        let connection = Connection::open_in_memory().expect("in-memory db");
        ensure_schema(&connection).expect("schema");
        insert_row(&connection, None, "4-a", 1);

        let report = collect_report(&connection, ":memory:", Some("GRI")).expect("report");
        assert!(report.passed);
        assert_eq!(report.rows_checked, 0);
    }
}
