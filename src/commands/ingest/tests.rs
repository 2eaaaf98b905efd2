use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::{Result, anyhow};
use rusqlite::Connection;

use super::db_setup::{SqliteNodeStore, count_rows, ensure_schema, read_metadata};
use super::hierarchy_stack::HierarchyStack;
use super::line_normalize::{LineFilters, TableSignalMatcher, normalize_line};
use super::node_flush::{NodeBuffer, NodeRecord, NodeStore, flush_node, split_into_chunks};
use super::note_headings::{NoteHeadingEntry, NoteHeadings};
use super::page_extract::{SourcePage, split_pages, window_pages};
use super::pipeline::{HierarchyParser, ParseOutcome, StopReason};
use super::profile::{LevelPattern, RootStrategy, SectionProfile, TableSignals};
use super::run::render_ingest_command;
use super::skip_regions::{LineDecision, PageRole, SkipController, SkipRegion};
use super::succession::{SymbolSequence, accepts_marker, roman_value};
use crate::cli::{IngestArgs, SectionKind};

#[derive(Default)]
struct MemoryStore {
    rows: Vec<(i64, NodeRecord)>,
}

impl MemoryStore {
    fn markers(&self) -> Vec<&str> {
        self.rows
            .iter()
            .map(|(_, record)| record.marker.as_str())
            .collect()
    }

    fn row(&self, marker: &str) -> &(i64, NodeRecord) {
        self.rows
            .iter()
            .find(|(_, record)| record.marker == marker)
            .unwrap_or_else(|| panic!("no row for marker {marker}"))
    }
}

impl NodeStore for MemoryStore {
    fn insert_node(&mut self, record: &NodeRecord) -> Result<i64> {
        let id = self.rows.len() as i64 + 1;
        self.rows.push((id, record.clone()));
        Ok(id)
    }
}

/// Accepts `remaining` inserts, then fails every call.
struct FailingStore {
    remaining: usize,
}

impl NodeStore for FailingStore {
    fn insert_node(&mut self, _record: &NodeRecord) -> Result<i64> {
        if self.remaining == 0 {
            return Err(anyhow!("disk full"));
        }
        self.remaining -= 1;
        Ok(self.remaining as i64 + 100)
    }
}

fn headings() -> NoteHeadings {
    NoteHeadings::from_entries(vec![
        NoteHeadingEntry {
            number: "3.".to_string(),
            title: "Rates of Duty".to_string(),
        },
        NoteHeadingEntry {
            number: "4".to_string(),
            title: "Products of Insular Possessions".to_string(),
        },
    ])
    .expect("valid headings")
}

fn general_notes_profile() -> SectionProfile {
    let mut profile = SectionProfile::builtin(SectionKind::GeneralNotes);
    profile.start_page = 1;
    profile.skip_regions.clear();
    profile
}

fn page(number: u32, lines: &[&str]) -> SourcePage {
    SourcePage {
        number,
        blocks: vec![lines.iter().map(|line| line.to_string()).collect()],
    }
}

fn parse_with(
    profile: &SectionProfile,
    pages: &[SourcePage],
) -> (MemoryStore, ParseOutcome) {
    let parser = HierarchyParser::from_profile(profile, Some(headings())).expect("parser");
    let mut store = MemoryStore::default();
    let outcome = parser.parse(pages, &mut store).expect("parse");
    (store, outcome)
}

#[test]
fn normalize_line_collapses_whitespace_and_dash_glyphs() {
    let line = "  Product\u{2010}specific \u{200B}rules\t\t(a)  ";
    assert_eq!(normalize_line(line), "Product specific rules (a)");
    assert_eq!(normalize_line(&normalize_line(line)), normalize_line(line));
    assert_eq!(normalize_line(" \u{FEFF} "), "");
}

#[test]
fn line_filters_detect_running_headers_and_editorial_notices() {
    let filters = LineFilters::new(
        &["Harmonized Tariff Schedule of the United States".to_string()],
        &["subdivision deleted".to_string()],
    );

    assert!(filters.is_running_header("Harmonized Tariff Schedule of the United States (2026)"));
    assert!(!filters.is_running_header("See the Harmonized Tariff Schedule of the United States"));
    assert!(filters.is_editorial("(c) Subdivision deleted."));
    assert!(!filters.is_editorial("(c) Goods of Canada"));

    let header_block = vec![
        "   ".to_string(),
        "Harmonized  Tariff Schedule of the United States (2026) Revision 3".to_string(),
        "Annotated for Statistical Reporting Purposes".to_string(),
    ];
    assert!(filters.block_is_running_header(&header_block));
    assert!(!filters.block_is_running_header(&["(a) text".to_string()]));
}

#[test]
fn roman_value_accepts_only_canonical_numerals() {
    assert_eq!(roman_value("i"), Some(1));
    assert_eq!(roman_value("iv"), Some(4));
    assert_eq!(roman_value("xiv"), Some(14));
    assert_eq!(roman_value("XL"), Some(40));
    assert_eq!(roman_value("iiii"), None);
    assert_eq!(roman_value("ic"), None);
    assert_eq!(roman_value("vv"), None);
    assert_eq!(roman_value(""), None);
}

#[test]
fn accepts_marker_requires_first_symbol_then_immediate_successor() {
    assert!(!accepts_marker(None, "b", SymbolSequence::LowerLetter));
    assert!(accepts_marker(None, "a", SymbolSequence::LowerLetter));
    assert!(!accepts_marker(Some("a"), "c", SymbolSequence::LowerLetter));
    assert!(accepts_marker(Some("a"), "b", SymbolSequence::LowerLetter));
    assert!(!accepts_marker(Some("b"), "b", SymbolSequence::LowerLetter));

    assert!(!accepts_marker(None, "ii", SymbolSequence::LowerRoman));
    assert!(accepts_marker(Some("iii"), "iv", SymbolSequence::LowerRoman));
    assert!(!accepts_marker(Some("iv"), "iv", SymbolSequence::LowerRoman));
    assert!(accepts_marker(Some("ix"), "x", SymbolSequence::LowerRoman));

    assert!(accepts_marker(Some("9"), "10", SymbolSequence::Digit));
    assert!(accepts_marker(None, "A", SymbolSequence::UpperLetter));
    assert!(!accepts_marker(None, "a", SymbolSequence::UpperLetter));
    assert!(accepts_marker(Some("I"), "II", SymbolSequence::UpperRoman));
}

#[test]
fn hierarchy_stack_finds_parents_across_level_gaps() {
    let mut stack = HierarchyStack::default();
    stack.reset_root("4");

    assert_eq!(stack.push_child("a", 1), Some(0));
    assert_eq!(stack.push_child("i", 3), Some(1));
    assert_eq!(stack.marker_path(), "4-a-i");
    assert_eq!(stack.push_child("ii", 3), Some(1));
    assert_eq!(stack.marker_path(), "4-a-ii");
    assert_eq!(stack.levels(), &[0, 1, 3]);
    assert_eq!(stack.previous_sibling(3), Some("ii"));

    assert_eq!(stack.push_child("b", 1), Some(0));
    assert_eq!(stack.marker_path(), "4-b");
    assert_eq!(stack.previous_sibling(3), None);
    assert!(stack.levels().windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn flush_splits_long_text_into_chunks_linked_to_the_first() {
    let mut store = MemoryStore::default();
    let mut stack = HierarchyStack::default();
    let mut buffer = NodeBuffer::default();

    stack.reset_root("4");
    buffer.reset("4. Products of Insular Possessions", 21);
    let root = flush_node(&mut store, &mut stack, &mut buffer, "General Note", 100)
        .expect("flush root")
        .expect("root row");

    let long_text = "abcdefg".repeat(50);
    stack.push_child("a", 1);
    buffer.reset(&long_text, 22);
    let outcome = flush_node(&mut store, &mut stack, &mut buffer, "General Note", 100)
        .expect("flush chunked node")
        .expect("chunked rows");

    assert_eq!(outcome.rows, 4);
    let chunks = &store.rows[1..];
    assert_eq!(chunks.len(), 4);
    assert_eq!(chunks[0].1.parent_id, Some(root.main_id));
    assert_eq!(chunks[0].0, outcome.main_id);
    for (index, (_, record)) in chunks.iter().enumerate() {
        assert_eq!(record.seq, index as i64 + 1);
        assert_eq!(record.marker, "4-a");
        assert_eq!(record.page, Some(22));
        if index > 0 {
            assert_eq!(record.parent_id, Some(outcome.main_id));
        }
    }

    let rebuilt = chunks
        .iter()
        .map(|(_, record)| record.text.as_str())
        .collect::<String>();
    assert_eq!(rebuilt, long_text);
    assert!(buffer.is_blank());
}

#[test]
fn split_into_chunks_counts_characters_not_bytes() {
    let text = "é".repeat(7);
    let chunks = split_into_chunks(&text, 3);
    assert_eq!(chunks, vec!["ééé", "ééé", "é"]);
    assert!(split_into_chunks("", 3).is_empty());
}

#[test]
fn flush_without_open_path_or_text_inserts_nothing() {
    let mut store = MemoryStore::default();
    let mut stack = HierarchyStack::default();
    let mut buffer = NodeBuffer::default();

    buffer.reset("orphan text", 1);
    let outcome = flush_node(&mut store, &mut stack, &mut buffer, "General Note", 100)
        .expect("flush");
    assert!(outcome.is_none());

    stack.reset_root("4");
    buffer.reset("   ", 1);
    let outcome = flush_node(&mut store, &mut stack, &mut buffer, "General Note", 100)
        .expect("flush");
    assert!(outcome.is_none());
    assert!(store.rows.is_empty());
}

#[test]
fn parse_builds_marker_paths_and_parent_links() {
    let profile = general_notes_profile();
    let pages = vec![page(
        1,
        &[
            "4. Products of Insular Possessions. Goods imported from insular possessions",
            "(a) Except as provided in additional note 5 of chapter 91,",
            "(b) The following products are exempt",
            "(i) articles of the United States",
            "(c) Subject to the provisions of section 423",
            "of the Tax Reform Act of 1986.",
        ],
    )];

    let (store, outcome) = parse_with(&profile, &pages);

    assert_eq!(outcome.stop_reason, StopReason::EndOfDocument);
    assert_eq!(store.markers(), vec!["4", "4-a", "4-b", "4-b-i", "4-c"]);

    let (root_id, root) = store.row("4");
    assert_eq!(root.parent_id, None);
    assert_eq!(root.subtype.as_deref(), Some("4"));
    assert!(root.text.starts_with("4. Products of Insular Possessions"));

    assert_eq!(store.row("4-a").1.parent_id, Some(*root_id));
    assert_eq!(store.row("4-b").1.parent_id, Some(*root_id));
    let (letter_b_id, _) = store.row("4-b");
    assert_eq!(store.row("4-b-i").1.parent_id, Some(*letter_b_id));
    assert_eq!(store.row("4-b-i").1.ref_id.as_deref(), Some("i"));

    let (_, letter_c) = store.row("4-c");
    assert_eq!(letter_c.parent_id, Some(*root_id));
    assert_eq!(
        letter_c.text,
        "Subject to the provisions of section 423 of the Tax Reform Act of 1986."
    );

    assert_eq!(outcome.stats.root_transitions, 1);
    assert_eq!(outcome.stats.nested_transitions, 4);
    assert_eq!(outcome.stats.nodes_flushed, 5);
    assert_eq!(outcome.stats.rows_inserted, 5);
}

#[test]
fn every_nested_row_points_at_an_earlier_row() {
    let profile = general_notes_profile();
    let pages = vec![
        page(
            1,
            &[
                "3. Rates of Duty. The rates of duty in the column 1 ...",
                "(a) Rate of duty column 1.",
                "(i) general rates apply",
                "(ii) special rates apply",
                "(b) Column 2 rates",
            ],
        ),
        page(
            2,
            &[
                "continued text for column 2",
                "4. Products of Insular Possessions.",
                "(a) Goods of the Virgin Islands",
            ],
        ),
    ];

    let (store, _) = parse_with(&profile, &pages);

    assert_eq!(
        store.markers(),
        vec!["3", "3-a", "3-a-i", "3-a-ii", "3-b", "4", "4-a"]
    );
    for (index, (_, record)) in store.rows.iter().enumerate() {
        if record.marker.contains('-') {
            let parent_id = record.parent_id.expect("nested row has a parent");
            let parent = store.rows[..index]
                .iter()
                .find(|(id, _)| *id == parent_id)
                .expect("parent persisted before child");
            assert!(record.marker.starts_with(&format!("{}-", parent.1.marker)));
        } else {
            assert_eq!(record.parent_id, None);
        }
    }
    assert_eq!(store.row("3-b").1.text, "Column 2 rates continued text for column 2");
    assert_eq!(store.row("4").1.page, Some(2));
}

#[test]
fn out_of_sequence_markers_stay_in_body_text() {
    let profile = general_notes_profile();
    let pages = vec![page(
        1,
        &[
            "4. Products of Insular Possessions",
            "(b) appears first and is not a marker",
            "(a) opens the first subdivision",
            "(c) skips b and stays body",
        ],
    )];

    let (store, outcome) = parse_with(&profile, &pages);

    assert_eq!(store.markers(), vec!["4", "4-a"]);
    assert_eq!(
        store.row("4").1.text,
        "4. Products of Insular Possessions (b) appears first and is not a marker"
    );
    assert_eq!(
        store.row("4-a").1.text,
        "opens the first subdivision (c) skips b and stays body"
    );
    assert_eq!(outcome.stats.candidates_rejected, 2);
}

#[test]
fn roman_is_tried_before_letter_and_lower_levels_catch_rejections() {
    let mut profile = general_notes_profile();
    profile.levels = vec![
        LevelPattern {
            level: 2,
            pattern: r"^\((\w+)\)\s*".to_string(),
            sequence: SymbolSequence::Digit,
        },
        LevelPattern {
            level: 1,
            pattern: r"^\((\w+)\)\s*".to_string(),
            sequence: SymbolSequence::LowerLetter,
        },
    ];
    let pages = vec![page(
        1,
        &[
            "4. Products of Insular Possessions",
            "(a) letter",
            "(1) digit under a",
            "(2) second digit",
            "(b) back to letters",
        ],
    )];

    let (store, outcome) = parse_with(&profile, &pages);

    assert_eq!(store.markers(), vec!["4", "4-a", "4-a-1", "4-a-2", "4-b"]);
    assert_eq!(outcome.stats.candidates_rejected, 2);

    let builtin = general_notes_profile();
    let mut lines = vec!["4. Products of Insular Possessions".to_string()];
    lines.extend(["a", "b", "c", "d", "e", "f", "g", "h"].map(|letter| format!("({letter}) text")));
    lines.push("(i) ambiguous marker".to_string());
    let lines = lines.iter().map(String::as_str).collect::<Vec<&str>>();

    let (store, _) = parse_with(&builtin, &[page(1, &lines)]);
    assert_eq!(store.markers().last(), Some(&"4-h-i"));
}

#[test]
fn split_heading_is_joined_with_its_title_line() {
    let profile = general_notes_profile();
    let pages = vec![page(
        1,
        &[
            "3. Rates of Duty",
            "text of note three",
            "4.",
            "Products of Insular Possessions. Goods imported",
            "(a) first subdivision",
        ],
    )];

    let (store, outcome) = parse_with(&profile, &pages);

    assert_eq!(store.markers(), vec!["3", "4", "4-a"]);
    assert_eq!(store.row("3").1.text, "3. Rates of Duty text of note three");
    assert_eq!(
        store.row("4").1.text,
        "4. Products of Insular Possessions. Goods imported"
    );
    assert_eq!(outcome.stats.root_transitions, 2);
}

#[test]
fn bare_number_without_matching_title_becomes_body_text() {
    let profile = general_notes_profile();
    let pages = vec![page(
        1,
        &["3. Rates of Duty", "4.", "percent ad valorem applies"],
    )];

    let (store, _) = parse_with(&profile, &pages);

    assert_eq!(store.markers(), vec!["3"]);
    assert_eq!(
        store.row("3").1.text,
        "3. Rates of Duty 4. percent ad valorem applies"
    );
}

#[test]
fn editorial_line_releases_a_held_note_number() {
    let profile = general_notes_profile();
    let pages = vec![page(
        1,
        &[
            "3. Rates of Duty",
            "4.",
            "(b) Subdivision deleted.",
            "Products of Insular Possessions",
        ],
    )];

    let (store, outcome) = parse_with(&profile, &pages);

    assert_eq!(store.markers(), vec!["3"]);
    assert_eq!(
        store.row("3").1.text,
        "3. Rates of Duty 4. Products of Insular Possessions"
    );
    assert_eq!(outcome.stats.editorial_lines_skipped, 1);
    assert_eq!(outcome.stats.root_transitions, 1);
}

#[test]
fn terminator_flushes_open_node_and_stops() {
    let profile = general_notes_profile();
    let pages = vec![
        page(1, &["3. Rates of Duty", "(a) last subdivision"]),
        page(
            2,
            &[
                "GENERAL STATISTICAL NOTES",
                "1. Statistical Requirements for Imported Goods",
                "(a) never ingested",
            ],
        ),
    ];

    let (store, outcome) = parse_with(&profile, &pages);

    assert_eq!(outcome.stop_reason, StopReason::Terminator);
    assert_eq!(store.markers(), vec!["3", "3-a"]);
    assert_eq!(store.row("3-a").1.text, "last subdivision");
}

#[test]
fn running_header_blocks_and_editorial_lines_are_dropped() {
    let profile = general_notes_profile();
    let raw = "\
3. Rates of Duty
(a) first

Harmonized Tariff Schedule of the United States (2026)
Annotated for Statistical Reporting Purposes
General Notes
page 4

(b) Subdivision deleted.
(b) second
";
    let pages = split_pages(raw, 1);
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].blocks.len(), 3);

    let (store, outcome) = parse_with(&profile, &pages);

    assert_eq!(store.markers(), vec!["3", "3-a", "3-b"]);
    assert_eq!(store.row("3-a").1.text, "first");
    assert_eq!(store.row("3-b").1.text, "second");
    assert_eq!(outcome.stats.header_blocks_skipped, 1);
    assert_eq!(outcome.stats.editorial_lines_skipped, 1);
}

#[test]
fn skip_region_drops_commentary_pages() {
    let mut profile = general_notes_profile();
    profile.skip_regions = vec![SkipRegion { start: 2, end: 4 }];
    let pages = vec![
        page(1, &["4. Products of Insular Possessions", "(a) alpha"]),
        page(
            2,
            &[
                "more alpha",
                "Product\u{2011}specific rules",
                "(b) dropped after trigger",
            ],
        ),
        page(3, &["(b) dropped middle page"]),
        page(4, &["dropped before anchor", "Chapter 98 provisions", "(b) beta"]),
        page(5, &["(c) gamma"]),
    ];

    let (store, outcome) = parse_with(&profile, &pages);

    assert_eq!(store.markers(), vec!["4", "4-a", "4-a", "4-b", "4-c"]);
    assert_eq!(store.rows[1].1.text, "alpha more alpha");
    assert_eq!(store.rows[2].1.text, "Chapter 98 provisions");
    assert_eq!(store.rows[2].1.page, Some(4));
    assert_eq!(store.row("4-b").1.text, "beta");
    assert!(
        store
            .rows
            .iter()
            .all(|(_, record)| !record.text.contains("dropped"))
    );

    assert_eq!(outcome.stats.pages_skipped_full, 1);
    assert_eq!(outcome.stats.pages_truncated, 1);
    assert_eq!(outcome.stats.pages_scanned, 4);
    assert_eq!(outcome.stats.lines_seen, 8);
    assert_eq!(outcome.stats.lines_skipped, 1);
    assert_eq!(outcome.stats.lines_normalized, 6);
}

#[test]
fn skip_controller_assigns_page_roles_and_resumes_once_per_page() {
    let controller = SkipController::new(
        &[SkipRegion { start: 10, end: 12 }],
        &["Change in tariff classification rules".to_string()],
        &[r"(?i)^Chapter\s+(98|99)\b".to_string()],
    )
    .expect("controller");

    assert_eq!(controller.page_role(9), None);
    assert_eq!(controller.page_role(10), Some(PageRole::Start));
    assert_eq!(controller.page_role(11), Some(PageRole::Middle));
    assert_eq!(controller.page_role(12), Some(PageRole::End));

    let mut cursor = controller.begin_page(12);
    assert_eq!(controller.decide(&mut cursor, "front matter"), LineDecision::Skip);
    assert_eq!(controller.decide(&mut cursor, "Chapter 99"), LineDecision::Process);
    assert_eq!(controller.decide(&mut cursor, "after"), LineDecision::Process);

    let mut next_cursor = controller.begin_page(12);
    assert_eq!(controller.decide(&mut next_cursor, "after"), LineDecision::Skip);

    let mut start = controller.begin_page(10);
    assert_eq!(
        controller.decide(&mut start, "  CHANGE IN TARIFF  CLASSIFICATION RULES "),
        LineDecision::FlushAndSkipRest
    );
    assert_eq!(controller.decide(&mut start, "anything"), LineDecision::Skip);
}

#[test]
fn skip_controller_rejects_bad_regions() {
    let anchors = [r"^Chapter".to_string()];

    let overlapping = SkipController::new(
        &[SkipRegion { start: 5, end: 9 }, SkipRegion { start: 9, end: 12 }],
        &[],
        &anchors,
    );
    assert!(overlapping.is_err());

    let reversed = SkipController::new(&[SkipRegion { start: 9, end: 5 }], &[], &anchors);
    assert!(reversed.is_err());

    let no_anchor = SkipController::new(&[SkipRegion { start: 5, end: 9 }], &[], &[]);
    assert!(no_anchor.is_err());
}

#[test]
fn store_failure_aborts_the_pass() {
    let profile = general_notes_profile();
    let pages = vec![page(
        1,
        &["3. Rates of Duty", "(a) first", "(b) second"],
    )];
    let parser = HierarchyParser::from_profile(&profile, Some(headings())).expect("parser");

    let mut store = FailingStore { remaining: 1 };
    let err = parser
        .parse(&pages, &mut store)
        .expect_err("second insert fails");
    let rendered = format!("{err:#}");
    assert!(rendered.contains("failed to persist General Note node 3-a"));
    assert!(rendered.contains("disk full"));
}

#[test]
fn cancel_flag_stops_after_the_current_line() {
    let profile = general_notes_profile();
    let pages = vec![page(1, &["3. Rates of Duty", "(a) never opened"])];
    let parser = HierarchyParser::from_profile(&profile, Some(headings()))
        .expect("parser")
        .with_cancel_flag(Arc::new(AtomicBool::new(true)));

    let mut store = MemoryStore::default();
    let outcome = parser.parse(&pages, &mut store).expect("parse");

    assert_eq!(outcome.stop_reason, StopReason::Cancelled);
    assert_eq!(store.markers(), vec!["3"]);
}

#[test]
fn numbered_rules_profile_scans_between_anchors() {
    let mut profile = SectionProfile::builtin(SectionKind::Gri);
    profile.start_page = 1;
    let pages = vec![page(
        1,
        &[
            "1. A stray rule number before the section",
            "GENERAL RULES OF INTERPRETATION",
            "Classification shall be governed by the following principles:",
            "1. The titles of sections are for reference only.",
            "2.",
            "(a) Any reference to an article",
            "(b) Any reference to a material",
            "5. percent of the goods",
            "3. When goods are prima facie classifiable",
            "ADDITIONAL U.S. RULES OF INTERPRETATION",
            "1. In the absence of special language",
        ],
    )];

    let parser = HierarchyParser::from_profile(&profile, None).expect("parser");
    let mut store = MemoryStore::default();
    let outcome = parser.parse(&pages, &mut store).expect("parse");

    assert_eq!(outcome.stop_reason, StopReason::Terminator);
    assert_eq!(store.markers(), vec!["1", "2", "2-a", "2-b", "3"]);
    assert_eq!(
        store.row("1").1.text,
        "1. The titles of sections are for reference only."
    );
    assert_eq!(store.row("2-a").1.parent_id, Some(store.row("2").0));
    assert_eq!(
        store.row("2-b").1.text,
        "Any reference to a material 5. percent of the goods"
    );
    assert_eq!(outcome.stats.candidates_rejected, 1);
    assert_eq!(outcome.stats.lines_outside_nodes, 1);
}

#[test]
fn sections_profile_closes_each_section_at_its_first_chapter() {
    let mut profile = SectionProfile::builtin(SectionKind::Sections);
    profile.start_page = 1;
    let pages = vec![
        page(
            1,
            &[
                "SECTION I",
                "LIVE ANIMALS; ANIMAL PRODUCTS",
                "Notes",
                "1. Any reference in this section to a particular genus",
                "CHAPTER 1",
                "LIVE ANIMALS",
                "1. This chapter covers all live animals except:",
            ],
        ),
        page(
            2,
            &[
                "SECTION II",
                "VEGETABLE PRODUCTS",
                "CHAPTER 6",
                "SECTION IV",
                "SECTION III",
                "ANIMAL OR VEGETABLE FATS AND OILS",
            ],
        ),
    ];

    let parser = HierarchyParser::from_profile(&profile, None).expect("parser");
    let mut store = MemoryStore::default();
    let outcome = parser.parse(&pages, &mut store).expect("parse");

    assert_eq!(outcome.stop_reason, StopReason::EndOfDocument);
    assert_eq!(store.markers(), vec!["I", "II", "III"]);
    assert_eq!(
        store.row("I").1.text,
        "SECTION I LIVE ANIMALS; ANIMAL PRODUCTS Notes 1. Any reference in this section to a particular genus"
    );
    assert_eq!(store.row("II").1.text, "SECTION II VEGETABLE PRODUCTS");
    assert_eq!(store.row("II").1.page, Some(2));
    assert!(store.rows.iter().all(|(_, record)| record.parent_id.is_none()));
    assert_eq!(outcome.stats.nodes_closed_by_anchor, 2);
    assert_eq!(outcome.stats.candidates_rejected, 1);
    assert_eq!(outcome.stats.lines_outside_nodes, 3);
}

#[test]
fn chapters_profile_stops_chapter_notes_at_the_tariff_table() {
    let mut profile = SectionProfile::builtin(SectionKind::Chapters);
    profile.start_page = 1;
    let pages = vec![page(
        1,
        &[
            "CHAPTER 1",
            "LIVE ANIMALS",
            "Notes",
            "1. This chapter covers all live animals except:",
            "(a) Fish and crustaceans",
            "Heading/ Subheading",
            "Stat. Suf\u{2010}fix",
            "Article Description",
            "Unit of Quantity",
            "0101 Live horses, asses, mules and hinnies:",
            "CHAPTER 2",
            "MEAT AND EDIBLE MEAT OFFAL",
            "Notes",
            "1. This chapter does not cover:",
        ],
    )];

    let parser = HierarchyParser::from_profile(&profile, None).expect("parser");
    let mut store = MemoryStore::default();
    let outcome = parser.parse(&pages, &mut store).expect("parse");

    assert_eq!(store.markers(), vec!["1", "2"]);
    assert_eq!(
        store.row("1").1.text,
        "CHAPTER 1 LIVE ANIMALS Notes 1. This chapter covers all live animals except: \
         (a) Fish and crustaceans Heading/ Subheading"
    );
    assert_eq!(
        store.row("2").1.text,
        "CHAPTER 2 MEAT AND EDIBLE MEAT OFFAL Notes 1. This chapter does not cover:"
    );
    assert_eq!(outcome.stats.nodes_closed_by_table, 1);
    assert_eq!(outcome.stats.lines_outside_nodes, 3);
    assert_eq!(outcome.stats.root_transitions, 2);
}

#[test]
fn table_signals_match_whole_words_case_insensitively() {
    let phrases = ["RATES OF DUTY", "UNIT", "QUANTITY", "STAT"]
        .iter()
        .map(|phrase| phrase.to_string())
        .collect::<Vec<String>>();
    let matcher = TableSignalMatcher::new(&phrases, 3).expect("matcher");

    assert_eq!(matcher.matches("Unit of Quantity").collect::<Vec<usize>>(), vec![1, 2]);
    assert_eq!(matcher.matches("Rates  of duty").collect::<Vec<usize>>(), vec![0]);
    assert_eq!(matcher.matches("Stat. Suf fix").collect::<Vec<usize>>(), vec![3]);
    assert_eq!(
        matcher
            .matches("statistical reporting units of the United States")
            .count(),
        0
    );
    assert_eq!(matcher.threshold(), 3);
}

#[test]
fn pages_before_start_page_are_ignored() {
    let mut profile = general_notes_profile();
    profile.start_page = 2;
    let pages = vec![
        page(1, &["3. Rates of Duty", "table of contents"]),
        page(2, &["4. Products of Insular Possessions"]),
    ];

    let (store, outcome) = parse_with(&profile, &pages);

    assert_eq!(store.markers(), vec!["4"]);
    assert_eq!(outcome.stats.pages_scanned, 1);
}

#[test]
fn lookup_profile_requires_headings() {
    let profile = general_notes_profile();
    let err = HierarchyParser::from_profile(&profile, None).expect_err("no lookup");
    assert!(err.to_string().contains("needs a note heading lookup"));
}

#[test]
fn profile_validation_rejects_bad_configuration() {
    let mut profile = general_notes_profile();
    profile.chunk_size = 0;
    assert!(profile.validate().is_err());

    let mut profile = general_notes_profile();
    profile.levels.push(LevelPattern {
        level: 0,
        pattern: r"^\(([A-Z])\)".to_string(),
        sequence: SymbolSequence::UpperLetter,
    });
    assert!(profile.validate().is_err());

    let mut profile = general_notes_profile();
    profile.levels.push(profile.levels[0].clone());
    assert!(profile.validate().is_err());

    let mut profile = SectionProfile::builtin(SectionKind::Chapters);
    profile.table_signals = Some(TableSignals {
        phrases: vec!["UNIT".to_string()],
        threshold: 2,
    });
    assert!(profile.validate().is_err());

    let mut profile = general_notes_profile();
    profile.levels[0].pattern = r"^\((unclosed".to_string();
    assert!(HierarchyParser::from_profile(&profile, Some(headings())).is_err());

    for section in [
        SectionKind::GeneralNotes,
        SectionKind::Gri,
        SectionKind::AdditionalRules,
        SectionKind::StatisticalNotes,
        SectionKind::Sections,
        SectionKind::Chapters,
    ] {
        SectionProfile::builtin(section)
            .validate()
            .expect("built-in profile is valid");
    }
}

#[test]
fn profile_json_round_trips_through_serde() {
    let profile = SectionProfile::builtin(SectionKind::GeneralNotes);
    let json = serde_json::to_string(&profile).expect("serialize");
    assert!(json.contains(r#""kind":"lookup""#));
    assert!(json.contains(r#""sequence":"lower_roman""#));

    let minimal = r#"{
        "doc_type": "GRI",
        "start_page": 21,
        "root": { "kind": "numbered", "pattern": "^(\\d+)\\." }
    }"#;
    let parsed: SectionProfile = serde_json::from_str(minimal).expect("deserialize");
    assert_eq!(parsed.chunk_size, 5000);
    assert!(parsed.skip_regions.is_empty());
    assert!(matches!(parsed.root, RootStrategy::Numbered { .. }));
    assert!(!parsed.requires_headings());
}

#[test]
fn note_headings_reject_duplicates_and_non_numeric_numbers() {
    let duplicate = NoteHeadings::from_entries(vec![
        NoteHeadingEntry {
            number: "4.".to_string(),
            title: "Products of Insular Possessions".to_string(),
        },
        NoteHeadingEntry {
            number: " 4 ".to_string(),
            title: "Something Else".to_string(),
        },
    ]);
    assert!(duplicate.is_err());

    let non_numeric = NoteHeadings::from_entries(vec![NoteHeadingEntry {
        number: "4A".to_string(),
        title: "Rates".to_string(),
    }]);
    assert!(non_numeric.is_err());

    let zero_padded = NoteHeadings::from_entries(vec![
        NoteHeadingEntry {
            number: "4".to_string(),
            title: "Products of Insular Possessions".to_string(),
        },
        NoteHeadingEntry {
            number: "04".to_string(),
            title: "Products of Insular Possessions".to_string(),
        },
    ]);
    assert!(zero_padded.is_err());

    let headings = headings();
    assert_eq!(headings.len(), 2);
    assert!(headings.contains("3."));
    assert!(headings.contains("04"));
    assert!(headings.title_matches("04", "Products of Insular Possessions"));
    assert!(headings.title_matches("3", "RATES OF DUTY. The rates"));
    assert!(!headings.title_matches("3", "Rates"));
    assert!(!headings.title_matches("5", "Rates of Duty"));
}

#[test]
fn split_pages_numbers_pages_and_drops_trailing_empty_pages() {
    let raw = "first line\nsecond line\n\n\nnext block\u{000C}page two\u{0000}\u{000C}\n\u{000C}";
    let pages = split_pages(raw, 21);

    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].number, 21);
    assert_eq!(
        pages[0].blocks,
        vec![
            vec!["first line".to_string(), "second line".to_string()],
            vec!["next block".to_string()],
        ]
    );
    assert_eq!(pages[1].number, 22);
    assert_eq!(pages[1].blocks, vec![vec!["page two".to_string()]]);
    assert_eq!(pages[0].line_count(), 3);
}

#[test]
fn text_pages_are_windowed_from_the_start_page() {
    let pages = split_pages("one\u{000C}two\u{000C}three\u{000C}four", 1);

    let numbers = |pages: Vec<SourcePage>| {
        pages.iter().map(|page| page.number).collect::<Vec<u32>>()
    };
    assert_eq!(numbers(window_pages(pages.clone(), 2, Some(2))), vec![2, 3]);
    assert_eq!(numbers(window_pages(pages.clone(), 3, None)), vec![3, 4]);
    assert_eq!(numbers(window_pages(pages.clone(), 0, Some(1))), vec![1]);
    assert!(window_pages(pages, 9, None).is_empty());
}

#[test]
fn sqlite_store_persists_linked_rows() {
    let connection = Connection::open_in_memory().expect("in-memory db");
    ensure_schema(&connection).expect("schema");

    let profile = general_notes_profile();
    let pages = vec![page(
        21,
        &["3. Rates of Duty", "(a) column 1", "(i) general"],
    )];
    let parser = HierarchyParser::from_profile(&profile, Some(headings())).expect("parser");

    let mut store = SqliteNodeStore::new(&connection, "run-test").expect("store");
    let outcome = parser.parse(&pages, &mut store).expect("parse");
    assert_eq!(store.inserted(), 3);
    drop(store);
    assert_eq!(outcome.stats.rows_inserted, 3);

    let linked = count_rows(
        &connection,
        "
        SELECT COUNT(*)
        FROM hts_entries child
        JOIN hts_entries parent ON parent.id = child.parent_id
        WHERE child.marker = parent.marker || '-' || child.ref_id
        ",
    )
    .expect("count");
    assert_eq!(linked, 2);

    let subtype: String = connection
        .query_row(
            "SELECT subtype FROM hts_entries WHERE marker = '3-a-i'",
            [],
            |row| row.get(0),
        )
        .expect("row");
    assert_eq!(subtype, "3");
    assert_eq!(
        read_metadata(&connection, "db_schema_version").expect("metadata"),
        Some(super::db_setup::DB_SCHEMA_VERSION.to_string())
    );
}

#[test]
fn render_ingest_command_includes_source_and_flags() {
    let args = IngestArgs {
        cache_root: ".cache/htsnotes".into(),
        pdf_path: None,
        text_path: Some("hts.txt".into()),
        section: SectionKind::StatisticalNotes,
        profile_path: None,
        headings_path: None,
        db_path: None,
        ingest_manifest_path: None,
        max_pages: Some(40),
        keep_existing: true,
        dry_run: true,
    };

    assert_eq!(
        render_ingest_command(&args),
        "htsnotes ingest --cache-root .cache/htsnotes --section statistical-notes \
         --text-path hts.txt --max-pages 40 --keep-existing --dry-run"
    );
}
