use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use rusqlite::Connection;
use tracing::{info, warn};

use super::db_setup::{
    DB_SCHEMA_VERSION, SqliteNodeStore, configure_connection, count_rows,
    delete_rows_for_doc_type, ensure_schema,
};
use super::note_headings::NoteHeadings;
use super::page_extract::{SourcePage, extract_pages_with_pdftotext, read_pages_from_text};
use super::pipeline::{HierarchyParser, ParseOutcome, StopReason};
use super::profile::SectionProfile;
use crate::cli::IngestArgs;
use crate::model::{IngestCounts, IngestPaths, IngestRunManifest, SourceEntry, ToolVersions};
use crate::util::{
    ensure_directory, now_utc_string, sha256_file, utc_compact_string, write_json_pretty,
};

pub fn run(args: IngestArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let cache_root = args.cache_root.clone();
    let manifest_dir = cache_root.join("manifests");
    ensure_directory(&manifest_dir)?;

    let ingest_manifest_path = args.ingest_manifest_path.clone().unwrap_or_else(|| {
        manifest_dir.join(format!(
            "ingest_run_{}.json",
            utc_compact_string(started_ts)
        ))
    });
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| cache_root.join("htsnotes.sqlite"));

    info!(
        cache_root = %cache_root.display(),
        run_id = %run_id,
        section = args.section.as_str(),
        dry_run = args.dry_run,
        "starting ingest"
    );

    let profile = SectionProfile::resolve(args.profile_path.as_deref(), args.section)?;
    let headings_path = if profile.requires_headings() {
        let path = args
            .headings_path
            .clone()
            .unwrap_or_else(|| cache_root.join("general_note_headings.json"));
        if !path.exists() {
            bail!(
                "profile {} needs a note heading lookup but {} does not exist",
                profile.doc_type,
                path.display()
            );
        }
        Some(path)
    } else {
        None
    };
    let headings = headings_path
        .as_deref()
        .map(NoteHeadings::load)
        .transpose()?;

    let parser = HierarchyParser::from_profile(&profile, headings)?;

    let (source, pages, pdftotext_version) = load_source(&args, &profile)?;
    let mut warnings = Vec::new();
    if pages.is_empty() {
        warn!(path = %source.path, "source produced no pages");
        warnings.push(format!("source {} produced no pages", source.path));
    }

    let mut connection = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    configure_connection(&connection)?;
    ensure_schema(&connection)?;

    let tx = connection
        .transaction()
        .context("failed to start ingest transaction")?;

    let rows_deleted = if args.keep_existing {
        0
    } else {
        let deleted = delete_rows_for_doc_type(&tx, &profile.doc_type)?;
        info!(doc_type = %profile.doc_type, rows = deleted, "removed rows from previous runs");
        deleted
    };

    let outcome = {
        let mut store = SqliteNodeStore::new(&tx, &run_id)?;
        let outcome = parser.parse(&pages, &mut store)?;
        info!(rows = store.inserted(), "rows written to hts_entries");
        outcome
    };

    if outcome.stop_reason == StopReason::EndOfDocument && profile.end_anchors.is_empty() {
        info!("no terminator configured, section ran to end of document");
    } else if outcome.stop_reason == StopReason::EndOfDocument {
        warn!(doc_type = %profile.doc_type, "section terminator never matched");
        warnings.push(format!(
            "no end anchor of {} matched before the end of the document",
            profile.doc_type
        ));
    }
    if outcome.stats.nodes_flushed == 0 {
        warn!(doc_type = %profile.doc_type, "no nodes were produced");
        warnings.push(format!("no {} nodes were produced", profile.doc_type));
    }

    let rows_total = count_rows(&tx, "SELECT COUNT(*) FROM hts_entries")?;

    let status = if args.dry_run {
        tx.rollback().context("failed to roll back dry-run transaction")?;
        info!("dry run requested, rolled back all changes");
        "dry_run"
    } else {
        tx.commit().context("failed to commit ingest transaction")?;
        "completed"
    };

    let manifest = IngestRunManifest {
        manifest_version: 1,
        run_id: run_id.clone(),
        db_schema_version: DB_SCHEMA_VERSION.to_string(),
        status: status.to_string(),
        started_at,
        updated_at: now_utc_string(),
        command: render_ingest_command(&args),
        section: args.section.as_str().to_string(),
        doc_type: profile.doc_type.clone(),
        stop_reason: outcome.stop_reason.as_str().to_string(),
        dry_run: args.dry_run,
        tool_versions: ToolVersions {
            htsnotes: env!("CARGO_PKG_VERSION").to_string(),
            pdftotext: pdftotext_version,
        },
        paths: IngestPaths {
            cache_root: cache_root.display().to_string(),
            manifest_dir: manifest_dir.display().to_string(),
            db_path: db_path.display().to_string(),
            profile_path: args
                .profile_path
                .as_ref()
                .map(|path| path.display().to_string()),
            headings_path: headings_path.map(|path| path.display().to_string()),
        },
        source,
        counts: ingest_counts(&outcome, pages.len(), rows_deleted, rows_total),
        warnings,
    };

    write_json_pretty(&ingest_manifest_path, &manifest)?;

    info!(path = %ingest_manifest_path.display(), "wrote ingest run manifest");
    info!(
        doc_type = %profile.doc_type,
        nodes = outcome.stats.nodes_flushed,
        rows = outcome.stats.rows_inserted,
        stop_reason = outcome.stop_reason.as_str(),
        "ingest completed"
    );

    Ok(())
}

fn load_source(
    args: &IngestArgs,
    profile: &SectionProfile,
) -> Result<(SourceEntry, Vec<SourcePage>, Option<String>)> {
    let (path, kind, pages, version): (&PathBuf, &str, Vec<SourcePage>, Option<String>) =
        match (&args.pdf_path, &args.text_path) {
            (Some(pdf_path), None) => {
                let version = command_version("pdftotext", &["-v"])?;
                let pages =
                    extract_pages_with_pdftotext(pdf_path, profile.start_page, args.max_pages)?;
                (pdf_path, "pdf", pages, Some(version))
            }
            (None, Some(text_path)) => {
                let pages = read_pages_from_text(text_path, profile.start_page, args.max_pages)?;
                (text_path, "text", pages, None)
            }
            _ => bail!("exactly one of --pdf-path or --text-path is required"),
        };

    let lines = pages.iter().map(SourcePage::line_count).sum::<usize>();
    info!(path = %path.display(), kind, pages = pages.len(), lines, "loaded source pages");

    Ok((source_entry(path, kind)?, pages, version))
}

fn source_entry(path: &Path, kind: &str) -> Result<SourceEntry> {
    Ok(SourceEntry {
        path: path.display().to_string(),
        kind: kind.to_string(),
        sha256: sha256_file(path)?,
    })
}

fn ingest_counts(
    outcome: &ParseOutcome,
    pages_loaded: usize,
    rows_deleted: usize,
    rows_total: i64,
) -> IngestCounts {
    let stats = &outcome.stats;
    IngestCounts {
        pages_loaded,
        pages_scanned: stats.pages_scanned,
        pages_skipped_full: stats.pages_skipped_full,
        pages_truncated: stats.pages_truncated,
        lines_seen: stats.lines_seen,
        lines_normalized: stats.lines_normalized,
        lines_skipped: stats.lines_skipped,
        header_blocks_skipped: stats.header_blocks_skipped,
        header_lines_skipped: stats.header_lines_skipped,
        editorial_lines_skipped: stats.editorial_lines_skipped,
        lines_outside_nodes: stats.lines_outside_nodes,
        root_transitions: stats.root_transitions,
        nested_transitions: stats.nested_transitions,
        candidates_rejected: stats.candidates_rejected,
        nodes_closed_by_anchor: stats.nodes_closed_by_anchor,
        nodes_closed_by_table: stats.nodes_closed_by_table,
        nodes_flushed: stats.nodes_flushed,
        rows_inserted: stats.rows_inserted,
        chunked_nodes: stats.chunked_nodes,
        rows_deleted,
        rows_total,
    }
}

fn command_version(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("failed to run {} {}", program, args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{} {} failed: {}", program, args.join(" "), stderr.trim());
    }

    // pdftotext prints its version banner on stderr.
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let source = if stdout.trim().is_empty() {
        stderr.trim()
    } else {
        stdout.trim()
    };

    let version_line = source
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .unwrap_or("unknown");

    Ok(version_line.to_string())
}

pub(super) fn render_ingest_command(args: &IngestArgs) -> String {
    let mut command = vec![
        "htsnotes".to_string(),
        "ingest".to_string(),
        "--cache-root".to_string(),
        args.cache_root.display().to_string(),
        "--section".to_string(),
        args.section.as_str().to_string(),
    ];

    if let Some(path) = &args.pdf_path {
        command.push("--pdf-path".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &args.text_path {
        command.push("--text-path".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &args.profile_path {
        command.push("--profile-path".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &args.headings_path {
        command.push("--headings-path".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &args.db_path {
        command.push("--db-path".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &args.ingest_manifest_path {
        command.push("--ingest-manifest-path".to_string());
        command.push(path.display().to_string());
    }
    if let Some(max_pages) = args.max_pages {
        command.push("--max-pages".to_string());
        command.push(max_pages.to_string());
    }
    if args.keep_existing {
        command.push("--keep-existing".to_string());
    }
    if args.dry_run {
        command.push("--dry-run".to_string());
    }

    command.join(" ")
}
