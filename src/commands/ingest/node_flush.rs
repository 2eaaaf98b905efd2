use anyhow::{Context, Result};
use tracing::info;

use super::hierarchy_stack::HierarchyStack;

/// One persisted row. Chunks of a long node share `marker` and carry a
/// 1-based `seq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NodeRecord {
    pub page: Option<i64>,
    pub doc_type: String,
    pub ref_id: Option<String>,
    pub parent_id: Option<i64>,
    pub subtype: Option<String>,
    pub marker: String,
    pub seq: i64,
    pub text: String,
}

/// Persistence collaborator. Returns the identifier assigned to the row.
pub(crate) trait NodeStore {
    fn insert_node(&mut self, record: &NodeRecord) -> Result<i64>;
}

/// Text gathered for the node currently open at the top of the stack.
#[derive(Debug, Default, Clone)]
pub(super) struct NodeBuffer {
    text: String,
    page: Option<i64>,
}

impl NodeBuffer {
    pub(super) fn reset(&mut self, seed: &str, page: i64) {
        self.text = seed.trim().to_string();
        self.page = Some(page);
    }

    pub(super) fn append(&mut self, line: &str, page: i64) {
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(line);
        self.page.get_or_insert(page);
    }

    pub(super) fn clear(&mut self) {
        self.text.clear();
        self.page = None;
    }

    pub(super) fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub(super) fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct FlushOutcome {
    pub main_id: i64,
    pub rows: usize,
}

/// Splits `text` into pieces of at most `chunk_size` characters. Joining the
/// pieces gives back `text`.
pub(super) fn split_into_chunks(text: &str, chunk_size: usize) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }

    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut count = 0usize;
    for (offset, _) in text.char_indices() {
        if count == chunk_size {
            chunks.push(&text[start..offset]);
            start = offset;
            count = 0;
        }
        count += 1;
    }
    chunks.push(&text[start..]);
    chunks
}

/// Persists the buffered node and records its id on the stack so deeper
/// nodes can reference it. No-op when nothing is open or the buffer is blank.
pub(super) fn flush_node(
    store: &mut dyn NodeStore,
    stack: &mut HierarchyStack,
    buffer: &mut NodeBuffer,
    doc_type: &str,
    chunk_size: usize,
) -> Result<Option<FlushOutcome>> {
    if stack.is_empty() || buffer.is_blank() {
        return Ok(None);
    }

    let text = buffer.text().trim();
    let marker_path = stack.marker_path();
    let parent_id = stack.parent_id();
    let ref_id = stack.leaf_symbol().map(str::to_string);
    let subtype = stack.root_symbol().map(str::to_string);
    let chunks = split_into_chunks(text, chunk_size);

    let mut main_id = None;
    for (index, chunk) in chunks.iter().enumerate() {
        let record = NodeRecord {
            page: buffer.page,
            doc_type: doc_type.to_string(),
            ref_id: ref_id.clone(),
            parent_id: main_id.or(parent_id),
            subtype: subtype.clone(),
            marker: marker_path.clone(),
            seq: (index + 1) as i64,
            text: (*chunk).to_string(),
        };
        let id = store.insert_node(&record).with_context(|| {
            format!(
                "failed to persist {doc_type} node {marker_path} (chunk {} of {})",
                index + 1,
                chunks.len()
            )
        })?;
        main_id.get_or_insert(id);
    }

    let Some(main_id) = main_id else {
        return Ok(None);
    };
    // `chunks` borrows the buffer; it must be dead before the buffer is cleared.
    let rows = chunks.len();
    stack.record_id(main_id);
    buffer.clear();

    info!(
        marker = %marker_path,
        id = main_id,
        parent_id = ?parent_id,
        chunks = rows,
        "flushed node"
    );

    Ok(Some(FlushOutcome { main_id, rows }))
}
