use anyhow::Result;
use tracing::info;

use super::marker_recognize::{MarkerCandidate, RootMatch};
use super::node_flush::{FlushOutcome, NodeBuffer, NodeStore, flush_node};

pub(super) const ROOT_LEVEL: u8 = 0;
const MARKER_SEPARATOR: &str = "-";

/// Path from the root note to the active node, held as parallel stacks.
///
/// `ids` always has one more slot than `symbols`: slot 0 stands for "no
/// parent" and slot `k + 1` holds the persisted id of the node at depth `k`
/// once it has been flushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct HierarchyStack {
    symbols: Vec<String>,
    levels: Vec<u8>,
    ids: Vec<Option<i64>>,
}

impl Default for HierarchyStack {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            levels: Vec::new(),
            ids: vec![None],
        }
    }
}

impl HierarchyStack {
    pub(super) fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub(super) fn levels(&self) -> &[u8] {
        &self.levels
    }

    pub(super) fn root_symbol(&self) -> Option<&str> {
        self.symbols.first().map(String::as_str)
    }

    pub(super) fn leaf_symbol(&self) -> Option<&str> {
        self.symbols.last().map(String::as_str)
    }

    pub(super) fn marker_path(&self) -> String {
        self.symbols.join(MARKER_SEPARATOR)
    }

    pub(super) fn clear(&mut self) {
        *self = Self::default();
    }

    pub(super) fn reset_root(&mut self, symbol: &str) {
        self.symbols = vec![symbol.to_string()];
        self.levels = vec![ROOT_LEVEL];
        self.ids = vec![None, None];
    }

    /// Marker already open at `level` on the current path, if any.
    pub(super) fn previous_sibling(&self, level: u8) -> Option<&str> {
        self.levels
            .iter()
            .rposition(|existing| *existing == level)
            .map(|index| self.symbols[index].as_str())
    }

    /// Depth of the nearest entry with a level strictly below `level`. Levels
    /// may be skipped in the numbering, so this scans outward rather than
    /// looking for `level - 1`.
    pub(super) fn parent_index(&self, level: u8) -> Option<usize> {
        self.levels.iter().rposition(|existing| *existing < level)
    }

    /// Trims back to the parent of `level` and opens `symbol` beneath it.
    pub(super) fn push_child(&mut self, symbol: &str, level: u8) -> Option<usize> {
        let parent_index = self.parent_index(level);
        let keep = parent_index.map_or(0, |index| index + 1);
        self.symbols.truncate(keep);
        self.levels.truncate(keep);
        self.ids.truncate(keep + 1);

        self.symbols.push(symbol.to_string());
        self.levels.push(level);
        self.ids.push(None);
        parent_index
    }

    /// Id of the closest flushed ancestor of the top entry. Ancestors that
    /// never received text have no row and are passed over.
    pub(super) fn parent_id(&self) -> Option<i64> {
        let top = self.ids.len().checked_sub(1)?;
        self.ids[..top].iter().rev().find_map(|id| *id)
    }

    pub(super) fn record_id(&mut self, id: i64) {
        if let Some(slot) = self.ids.last_mut() {
            *slot = Some(id);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Transition {
    pub marker_path: String,
    pub flushed: Option<FlushOutcome>,
}

/// Owns the path and the open node's text; every transition flushes the
/// open node before the path changes.
#[derive(Debug)]
pub(super) struct StackMachine {
    stack: HierarchyStack,
    buffer: NodeBuffer,
    doc_type: String,
    chunk_size: usize,
}

impl StackMachine {
    pub(super) fn new(doc_type: &str, chunk_size: usize) -> Self {
        Self {
            stack: HierarchyStack::default(),
            buffer: NodeBuffer::default(),
            doc_type: doc_type.to_string(),
            chunk_size,
        }
    }

    pub(super) fn stack(&self) -> &HierarchyStack {
        &self.stack
    }

    pub(super) fn has_open_node(&self) -> bool {
        !self.stack.is_empty()
    }

    pub(super) fn flush(&mut self, store: &mut dyn NodeStore) -> Result<Option<FlushOutcome>> {
        flush_node(
            store,
            &mut self.stack,
            &mut self.buffer,
            &self.doc_type,
            self.chunk_size,
        )
    }

    pub(super) fn open_root(
        &mut self,
        store: &mut dyn NodeStore,
        root: &RootMatch,
        page: i64,
    ) -> Result<Transition> {
        let flushed = self.flush(store)?;
        self.stack.reset_root(&root.symbol);
        self.buffer.reset(&root.text, page);

        info!(
            doc_type = %self.doc_type,
            marker = %root.symbol,
            level = ROOT_LEVEL,
            page,
            "opened root node"
        );

        Ok(Transition {
            marker_path: self.stack.marker_path(),
            flushed,
        })
    }

    pub(super) fn open_child(
        &mut self,
        store: &mut dyn NodeStore,
        candidate: &MarkerCandidate,
        line: &str,
        page: i64,
    ) -> Result<Transition> {
        let flushed = self.flush(store)?;
        self.stack.push_child(&candidate.symbol, candidate.level);
        let remainder = line.get(candidate.span_end..).unwrap_or("");
        self.buffer.reset(remainder, page);

        let marker_path = self.stack.marker_path();
        info!(
            doc_type = %self.doc_type,
            marker = %marker_path,
            level = candidate.level,
            depth = self.stack.levels().len(),
            page,
            "opened nested node"
        );

        Ok(Transition {
            marker_path,
            flushed,
        })
    }

    /// Body text for the open node; ignored while no node is open.
    pub(super) fn append(&mut self, line: &str, page: i64) -> bool {
        if self.stack.is_empty() {
            return false;
        }
        self.buffer.append(line, page);
        true
    }

    /// Flushes whatever is open and forgets the path.
    pub(super) fn close_all(&mut self, store: &mut dyn NodeStore) -> Result<Option<FlushOutcome>> {
        let flushed = self.flush(store)?;
        self.stack.clear();
        self.buffer.clear();
        Ok(flushed)
    }
}
