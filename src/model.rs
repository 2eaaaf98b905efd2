use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ToolVersions {
    pub htsnotes: String,
    /// Absent when the source was pre-extracted text.
    pub pdftotext: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceEntry {
    pub path: String,
    pub kind: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestPaths {
    pub cache_root: String,
    pub manifest_dir: String,
    pub db_path: String,
    pub profile_path: Option<String>,
    pub headings_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestCounts {
    pub pages_loaded: usize,
    pub pages_scanned: usize,
    pub pages_skipped_full: usize,
    pub pages_truncated: usize,
    pub lines_seen: usize,
    pub lines_normalized: usize,
    pub lines_skipped: usize,
    pub header_blocks_skipped: usize,
    pub header_lines_skipped: usize,
    pub editorial_lines_skipped: usize,
    pub lines_outside_nodes: usize,
    pub root_transitions: usize,
    pub nested_transitions: usize,
    pub candidates_rejected: usize,
    pub nodes_closed_by_anchor: usize,
    pub nodes_closed_by_table: usize,
    pub nodes_flushed: usize,
    pub rows_inserted: usize,
    pub chunked_nodes: usize,
    pub rows_deleted: usize,
    pub rows_total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub db_schema_version: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub section: String,
    pub doc_type: String,
    pub stop_reason: String,
    pub dry_run: bool,
    pub tool_versions: ToolVersions,
    pub paths: IngestPaths,
    pub source: SourceEntry,
    pub counts: IngestCounts,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvariantCheck {
    pub name: String,
    pub violations: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub manifest_version: u32,
    pub generated_at: String,
    pub db_path: String,
    pub doc_type: Option<String>,
    pub rows_checked: i64,
    pub checks: Vec<InvariantCheck>,
    pub passed: bool,
}
