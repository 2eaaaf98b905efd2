use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::{debug, info};

use super::hierarchy_stack::{StackMachine, Transition};
use super::line_normalize::{LineFilters, TableSignalMatcher, normalize_line};
use super::marker_recognize::{MarkerRecognizer, Recognition, RootMatch};
use super::node_flush::{FlushOutcome, NodeStore};
use super::note_headings::NoteHeadings;
use super::page_extract::SourcePage;
use super::profile::{RootStrategy, SectionProfile};
use super::skip_regions::{LineDecision, PageRole, SkipController};
use super::succession::accepts_marker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum StopReason {
    Terminator,
    Cancelled,
    EndOfDocument,
}

impl StopReason {
    pub(super) fn as_str(self) -> &'static str {
        match self {
            Self::Terminator => "terminator",
            Self::Cancelled => "cancelled",
            Self::EndOfDocument => "end_of_document",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanPhase {
    /// Waiting for the section's begin anchor.
    Seeking,
    Scanning,
    Stopped(StopReason),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(super) struct ParseStats {
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
}

impl ParseStats {
    fn record_flush(&mut self, outcome: Option<&FlushOutcome>) {
        if let Some(outcome) = outcome {
            self.nodes_flushed += 1;
            self.rows_inserted += outcome.rows;
            if outcome.rows > 1 {
                self.chunked_nodes += 1;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct ParseOutcome {
    pub stop_reason: StopReason,
    pub stats: ParseStats,
}

/// All mutable state of one pass. Owned by the loop in [`HierarchyParser::parse`].
#[derive(Debug)]
struct ParserState {
    machine: StackMachine,
    phase: ScanPhase,
    /// Bare note number waiting to see whether the next line is its title.
    pending_heading: Option<(String, i64)>,
    /// Survives close anchors so numbered roots keep their succession.
    last_root_symbol: Option<String>,
    /// Table signal phrases seen since the current root opened.
    table_signals_seen: HashSet<usize>,
    stats: ParseStats,
}

impl ParserState {
    fn is_stopped(&self) -> bool {
        matches!(self.phase, ScanPhase::Stopped(_))
    }

    /// Turns a held-back note number into ordinary body text.
    fn release_pending(&mut self) {
        if let Some((line, page)) = self.pending_heading.take() {
            if !self.machine.append(&line, page) {
                self.stats.lines_outside_nodes += 1;
            }
        }
    }

    fn close_open_nodes(&mut self, store: &mut dyn NodeStore) -> Result<()> {
        self.release_pending();
        let flushed = self.machine.close_all(store)?;
        self.stats.record_flush(flushed.as_ref());
        Ok(())
    }

    fn record_transition(&mut self, transition: &Transition) {
        self.stats.record_flush(transition.flushed.as_ref());
        debug!(marker = %transition.marker_path, "transition applied");
    }
}

/// Rebuilds the note hierarchy of one section from page text and hands every
/// node to a [`NodeStore`] in document order.
#[derive(Debug)]
pub(super) struct HierarchyParser {
    doc_type: String,
    start_page: u32,
    chunk_size: usize,
    begin_anchor: Option<Regex>,
    end_anchors: Vec<Regex>,
    close_anchors: Vec<Regex>,
    table_signals: Option<TableSignalMatcher>,
    recognizer: MarkerRecognizer,
    skips: SkipController,
    filters: LineFilters,
    cancel: Option<Arc<AtomicBool>>,
}

impl HierarchyParser {
    pub(super) fn from_profile(
        profile: &SectionProfile,
        headings: Option<NoteHeadings>,
    ) -> Result<Self> {
        profile.validate()?;

        let mut recognizer = match (&profile.root, headings) {
            (RootStrategy::Lookup, Some(headings)) => {
                if headings.is_empty() {
                    bail!("note heading lookup is empty");
                }
                MarkerRecognizer::with_lookup(headings)?
            }
            (RootStrategy::Lookup, None) => {
                bail!("profile {} needs a note heading lookup", profile.doc_type)
            }
            (RootStrategy::Numbered { pattern, sequence }, _) => {
                MarkerRecognizer::with_numbered_roots(pattern, *sequence)?
            }
        };
        for level in &profile.levels {
            recognizer.push_level(level.level, &level.pattern, level.sequence)?;
        }

        let begin_anchor = profile
            .begin_anchor
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern)
                    .with_context(|| format!("failed to compile begin anchor regex {pattern:?}"))
            })
            .transpose()?;
        let end_anchors = compile_anchors(&profile.end_anchors, "end")?;
        let close_anchors = compile_anchors(&profile.close_anchors, "close")?;
        let table_signals = profile
            .table_signals
            .as_ref()
            .map(|signals| TableSignalMatcher::new(&signals.phrases, signals.threshold))
            .transpose()?;

        let skips = SkipController::new(
            &profile.skip_regions,
            &profile.skip_triggers,
            &profile.resume_anchors,
        )?;

        Ok(Self {
            doc_type: profile.doc_type.clone(),
            start_page: profile.start_page,
            chunk_size: profile.chunk_size,
            begin_anchor,
            end_anchors,
            close_anchors,
            table_signals,
            recognizer,
            skips,
            filters: LineFilters::new(&profile.running_headers, &profile.editorial_phrases),
            cancel: None,
        })
    }

    /// Checked after every line; once set the pass flushes and stops.
    pub(super) fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub(super) fn parse(
        &self,
        pages: &[SourcePage],
        store: &mut dyn NodeStore,
    ) -> Result<ParseOutcome> {
        let mut state = ParserState {
            machine: StackMachine::new(&self.doc_type, self.chunk_size),
            phase: if self.begin_anchor.is_some() {
                ScanPhase::Seeking
            } else {
                ScanPhase::Scanning
            },
            pending_heading: None,
            last_root_symbol: None,
            table_signals_seen: HashSet::new(),
            stats: ParseStats::default(),
        };

        info!(doc_type = %self.doc_type, pages = pages.len(), start_page = self.start_page, "starting hierarchy pass");

        'pages: for page in pages {
            if state.is_stopped() {
                break;
            }
            if page.number < self.start_page {
                continue;
            }

            let mut cursor = self.skips.begin_page(page.number);
            if cursor.role() == Some(PageRole::Middle) {
                info!(page = page.number, lines = page.line_count(), "skipping full page inside skip region");
                state.stats.pages_skipped_full += 1;
                continue;
            }
            if let Some(role) = cursor.role() {
                debug!(page = page.number, role = role.as_str(), "page inside skip region boundary");
            }
            state.stats.pages_scanned += 1;

            let page_number = i64::from(page.number);
            for block in &page.blocks {
                if self.filters.block_is_running_header(block) {
                    state.stats.header_blocks_skipped += 1;
                    continue;
                }

                for raw_line in block {
                    state.stats.lines_seen += 1;
                    match self.skips.decide(&mut cursor, raw_line) {
                        LineDecision::Process => {}
                        LineDecision::Skip => {
                            state.stats.lines_skipped += 1;
                            continue;
                        }
                        LineDecision::FlushAndSkipRest => {
                            state.release_pending();
                            let flushed = state.machine.flush(store)?;
                            state.stats.record_flush(flushed.as_ref());
                            state.stats.pages_truncated += 1;
                            continue 'pages;
                        }
                    }

                    self.process_line(&mut state, store, raw_line, page_number)?;

                    if !state.is_stopped() && self.cancel_requested() {
                        info!(page = page.number, "cancellation requested, stopping after current line");
                        state.close_open_nodes(store)?;
                        state.phase = ScanPhase::Stopped(StopReason::Cancelled);
                    }
                    if state.is_stopped() {
                        break 'pages;
                    }
                }

                state.release_pending();
            }
        }

        state.close_open_nodes(store)?;

        let stop_reason = match state.phase {
            ScanPhase::Stopped(reason) => reason,
            ScanPhase::Seeking | ScanPhase::Scanning => StopReason::EndOfDocument,
        };

        info!(
            doc_type = %self.doc_type,
            stop_reason = stop_reason.as_str(),
            nodes = state.stats.nodes_flushed,
            rows = state.stats.rows_inserted,
            rejected_candidates = state.stats.candidates_rejected,
            "hierarchy pass finished"
        );

        Ok(ParseOutcome {
            stop_reason,
            stats: state.stats,
        })
    }

    fn cancel_requested(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn is_end_anchor(&self, line: &str) -> bool {
        self.end_anchors.iter().any(|anchor| anchor.is_match(line))
    }

    fn is_close_anchor(&self, line: &str) -> bool {
        self.close_anchors.iter().any(|anchor| anchor.is_match(line))
    }

    /// Records the table signals in `line` and reports whether the open node
    /// has now seen enough of them to be closed.
    fn table_starts(&self, state: &mut ParserState, line: &str) -> bool {
        let Some(signals) = &self.table_signals else {
            return false;
        };
        if !state.machine.has_open_node() {
            return false;
        }

        state.table_signals_seen.extend(signals.matches(line));
        state.table_signals_seen.len() >= signals.threshold()
    }

    fn process_line(
        &self,
        state: &mut ParserState,
        store: &mut dyn NodeStore,
        raw_line: &str,
        page: i64,
    ) -> Result<()> {
        let line = normalize_line(raw_line);
        state.stats.lines_normalized += 1;

        if line.is_empty() {
            state.release_pending();
            return Ok(());
        }

        if self.filters.is_running_header(&line) {
            state.stats.header_lines_skipped += 1;
            return Ok(());
        }

        if state.phase == ScanPhase::Seeking {
            if self
                .begin_anchor
                .as_ref()
                .is_some_and(|anchor| anchor.is_match(&line))
            {
                info!(page, line = %line, "section begin anchor found");
                state.phase = ScanPhase::Scanning;
            }
            return Ok(());
        }

        if self.is_end_anchor(&line) {
            state.close_open_nodes(store)?;
            state.phase = ScanPhase::Stopped(StopReason::Terminator);
            info!(page, line = %line, "section terminator reached");
            return Ok(());
        }

        if self.is_close_anchor(&line) {
            if state.machine.has_open_node() {
                state.stats.nodes_closed_by_anchor += 1;
                info!(page, line = %line, marker = ?state.last_root_symbol, "close anchor reached");
            }
            state.close_open_nodes(store)?;
            return Ok(());
        }

        if self.filters.is_editorial(&line) {
            // A held-back note number never pairs with an editorial line.
            state.release_pending();
            state.stats.editorial_lines_skipped += 1;
            debug!(page, line = %line, "ignored editorial line");
            return Ok(());
        }

        if let Some((number_line, number_page)) = state.pending_heading.take() {
            if let Some(root) = self.recognizer.match_split_root(&number_line, &line) {
                return self.open_root(state, store, &root, number_page);
            }
            state.pending_heading = Some((number_line, number_page));
            state.release_pending();
        }

        if self.table_starts(state, &line) {
            info!(
                page,
                marker = ?state.last_root_symbol,
                signals = state.table_signals_seen.len(),
                "table header detected, closing node"
            );
            state.stats.nodes_closed_by_table += 1;
            return state.close_open_nodes(store);
        }

        match self.recognizer.recognize(&line) {
            Recognition::Root(root) => {
                let in_sequence = self.recognizer.root_sequence().is_none_or(|sequence| {
                    accepts_marker(state.last_root_symbol.as_deref(), &root.symbol, sequence)
                });
                if !in_sequence {
                    debug!(page, marker = %root.symbol, "rejected out-of-sequence root marker");
                    state.stats.candidates_rejected += 1;
                    self.append_body(state, &line, page);
                    return Ok(());
                }
                self.open_root(state, store, &root, page)
            }
            Recognition::RootNumberOnly(number) => {
                debug!(page, number = %number, "holding bare note number");
                state.pending_heading = Some((line, page));
                Ok(())
            }
            Recognition::Nested(candidates) => {
                if !state.machine.has_open_node() {
                    state.stats.lines_outside_nodes += 1;
                    return Ok(());
                }

                for candidate in &candidates {
                    let previous = state.machine.stack().previous_sibling(candidate.level);
                    if accepts_marker(previous, &candidate.symbol, candidate.sequence) {
                        let transition = state.machine.open_child(store, candidate, &line, page)?;
                        state.stats.nested_transitions += 1;
                        state.record_transition(&transition);
                        return Ok(());
                    }

                    debug!(
                        page,
                        level = candidate.level,
                        marker = %candidate.symbol,
                        sequence = candidate.sequence.as_str(),
                        previous = ?previous,
                        "rejected marker candidate"
                    );
                    state.stats.candidates_rejected += 1;
                }

                self.append_body(state, &line, page);
                Ok(())
            }
            Recognition::Body => {
                self.append_body(state, &line, page);
                Ok(())
            }
        }
    }

    fn open_root(
        &self,
        state: &mut ParserState,
        store: &mut dyn NodeStore,
        root: &RootMatch,
        page: i64,
    ) -> Result<()> {
        let transition = state.machine.open_root(store, root, page)?;
        state.last_root_symbol = Some(root.symbol.clone());
        state.table_signals_seen.clear();
        state.stats.root_transitions += 1;
        state.record_transition(&transition);
        Ok(())
    }

    fn append_body(&self, state: &mut ParserState, line: &str, page: i64) {
        if !state.machine.append(line, page) {
            state.stats.lines_outside_nodes += 1;
        }
    }
}

fn compile_anchors(patterns: &[String], kind: &str) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern)
                .with_context(|| format!("failed to compile {kind} anchor regex {pattern:?}"))
        })
        .collect()
}
