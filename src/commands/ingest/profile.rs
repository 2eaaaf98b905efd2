use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::hierarchy_stack::ROOT_LEVEL;
use super::skip_regions::SkipRegion;
use super::succession::SymbolSequence;
use crate::cli::SectionKind;

pub(crate) const DEFAULT_CHUNK_SIZE: usize = 5000;

const HTS_START_PAGE: u32 = 21;
const HTS_CHAPTERS_START_PAGE: u32 = 801;
const NUMBERED_RULE_PATTERN: &str = r"^(\d+)\.(?:\s+(.*))?$";
const SECTION_HEADING_PATTERN: &str = r"^SECTION\s+([IVXL]+)$";
const CHAPTER_HEADING_PATTERN: &str = r"(?i)^chapter\s+(\d+)$";
const CHAPTER_TABLE_SIGNALS: [&str; 11] = [
    "HEADING",
    "SUBHEADING",
    "RATES OF DUTY",
    "UNIT",
    "QUANTITY",
    "ARTICLE DESCRIPTION",
    "STAT",
    "SUF",
    "FIX",
    "SPECIAL",
    "GENERAL",
];
const CHAPTER_TABLE_SIGNAL_THRESHOLD: usize = 5;
const LOWER_ROMAN_IN_PARENS: &str = r"^\(([ivxl]+)\)\s*";
const LOWER_LETTER_IN_PARENS: &str = r"^\(([a-z])\)\s*";

/// How top-level nodes of a section are recognized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum RootStrategy {
    /// `"<number>. <title>"` where the pair must appear in the note heading lookup.
    Lookup,
    /// A numbered heading such as `"3."` or `"SECTION II"`, accepted in
    /// sequence from the first symbol of `sequence`.
    Numbered {
        pattern: String,
        #[serde(default = "default_root_sequence")]
        sequence: SymbolSequence,
    },
}

fn default_root_sequence() -> SymbolSequence {
    SymbolSequence::Digit
}

/// Closes the open node once `threshold` distinct phrases have been seen in
/// its lines, e.g. the column headers of a tariff table after chapter notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TableSignals {
    pub phrases: Vec<String>,
    pub threshold: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LevelPattern {
    pub level: u8,
    /// Capture group 1 must hold the marker symbol.
    pub pattern: String,
    pub sequence: SymbolSequence,
}

/// Everything one ingestion pass over a section needs to know about the
/// document. Levels are tried in list order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SectionProfile {
    pub doc_type: String,
    pub start_page: u32,
    #[serde(default)]
    pub begin_anchor: Option<String>,
    #[serde(default)]
    pub end_anchors: Vec<String>,
    /// Close the open node but keep scanning for the next root.
    #[serde(default)]
    pub close_anchors: Vec<String>,
    #[serde(default)]
    pub table_signals: Option<TableSignals>,
    pub root: RootStrategy,
    #[serde(default)]
    pub levels: Vec<LevelPattern>,
    #[serde(default)]
    pub skip_regions: Vec<SkipRegion>,
    #[serde(default)]
    pub skip_triggers: Vec<String>,
    #[serde(default)]
    pub resume_anchors: Vec<String>,
    #[serde(default)]
    pub running_headers: Vec<String>,
    #[serde(default)]
    pub editorial_phrases: Vec<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn hts_running_headers() -> Vec<String> {
    vec![
        "Harmonized Tariff Schedule of the United States".to_string(),
        "Annotated for Statistical Reporting Purposes".to_string(),
    ]
}

fn numbered_rules() -> RootStrategy {
    RootStrategy::Numbered {
        pattern: NUMBERED_RULE_PATTERN.to_string(),
        sequence: SymbolSequence::Digit,
    }
}

fn nested_levels(letter_first: bool) -> Vec<LevelPattern> {
    let roman = LevelPattern {
        level: 2,
        pattern: LOWER_ROMAN_IN_PARENS.to_string(),
        sequence: SymbolSequence::LowerRoman,
    };
    let letter = LevelPattern {
        level: 1,
        pattern: LOWER_LETTER_IN_PARENS.to_string(),
        sequence: SymbolSequence::LowerLetter,
    };

    if letter_first {
        vec![letter]
    } else {
        vec![roman, letter]
    }
}

impl SectionProfile {
    pub(crate) fn builtin(section: SectionKind) -> Self {
        match section {
            SectionKind::GeneralNotes => Self {
                doc_type: "General Note".to_string(),
                start_page: HTS_START_PAGE,
                begin_anchor: None,
                end_anchors: vec![r"(?i)^general statistical notes$".to_string()],
                close_anchors: Vec::new(),
                table_signals: None,
                root: RootStrategy::Lookup,
                levels: nested_levels(false),
                skip_regions: [
                    (77, 188),
                    (214, 296),
                    (304, 381),
                    (412, 475),
                    (488, 568),
                    (618, 679),
                    (839, 898),
                ]
                .into_iter()
                .map(|(start, end)| SkipRegion { start, end })
                .collect(),
                skip_triggers: vec![
                    "Change in tariff classification rules".to_string(),
                    "Product-specific rules".to_string(),
                ],
                resume_anchors: vec![r"(?i)^Chapter\s+(98|99)\b".to_string()],
                running_headers: hts_running_headers(),
                editorial_phrases: vec![
                    "subdivision deleted".to_string(),
                    "were transferred and designated as subdivisions".to_string(),
                ],
                chunk_size: DEFAULT_CHUNK_SIZE,
            },
            SectionKind::Gri => Self {
                doc_type: "GRI".to_string(),
                start_page: HTS_START_PAGE,
                begin_anchor: Some(r"(?i)general rules of interpretation".to_string()),
                end_anchors: vec![r"(?i)additional u\.s\. rules of interpretation".to_string()],
                close_anchors: Vec::new(),
                table_signals: None,
                root: numbered_rules(),
                levels: nested_levels(true),
                skip_regions: Vec::new(),
                skip_triggers: Vec::new(),
                resume_anchors: Vec::new(),
                running_headers: hts_running_headers(),
                editorial_phrases: Vec::new(),
                chunk_size: DEFAULT_CHUNK_SIZE,
            },
            SectionKind::AdditionalRules => Self {
                doc_type: "Additional U.S. Rules".to_string(),
                start_page: HTS_START_PAGE,
                begin_anchor: Some(r"(?i)^additional u\.s\. rules of interpretation".to_string()),
                end_anchors: vec![r"(?i)^general notes$".to_string()],
                close_anchors: Vec::new(),
                table_signals: None,
                root: numbered_rules(),
                levels: nested_levels(true),
                skip_regions: Vec::new(),
                skip_triggers: Vec::new(),
                resume_anchors: Vec::new(),
                running_headers: hts_running_headers(),
                editorial_phrases: Vec::new(),
                chunk_size: DEFAULT_CHUNK_SIZE,
            },
            SectionKind::StatisticalNotes => Self {
                doc_type: "Statistical Notes".to_string(),
                start_page: HTS_START_PAGE,
                begin_anchor: Some(r"(?i)^general statistical notes$".to_string()),
                end_anchors: vec![r"(?i)notice to exporters".to_string()],
                close_anchors: Vec::new(),
                table_signals: None,
                root: numbered_rules(),
                levels: nested_levels(false),
                skip_regions: Vec::new(),
                skip_triggers: Vec::new(),
                resume_anchors: Vec::new(),
                running_headers: hts_running_headers(),
                editorial_phrases: Vec::new(),
                chunk_size: DEFAULT_CHUNK_SIZE,
            },
            SectionKind::Sections => Self {
                doc_type: "Sections".to_string(),
                start_page: HTS_CHAPTERS_START_PAGE,
                begin_anchor: None,
                end_anchors: Vec::new(),
                close_anchors: vec![r"(?i)^chapter\b".to_string()],
                table_signals: None,
                root: RootStrategy::Numbered {
                    pattern: SECTION_HEADING_PATTERN.to_string(),
                    sequence: SymbolSequence::UpperRoman,
                },
                levels: Vec::new(),
                skip_regions: Vec::new(),
                skip_triggers: Vec::new(),
                resume_anchors: Vec::new(),
                running_headers: hts_running_headers(),
                editorial_phrases: Vec::new(),
                chunk_size: DEFAULT_CHUNK_SIZE,
            },
            SectionKind::Chapters => Self {
                doc_type: "Chapters".to_string(),
                start_page: HTS_CHAPTERS_START_PAGE,
                begin_anchor: None,
                end_anchors: Vec::new(),
                close_anchors: Vec::new(),
                table_signals: Some(TableSignals {
                    phrases: CHAPTER_TABLE_SIGNALS
                        .iter()
                        .map(|phrase| phrase.to_string())
                        .collect(),
                    threshold: CHAPTER_TABLE_SIGNAL_THRESHOLD,
                }),
                root: RootStrategy::Numbered {
                    pattern: CHAPTER_HEADING_PATTERN.to_string(),
                    sequence: SymbolSequence::Digit,
                },
                levels: Vec::new(),
                skip_regions: Vec::new(),
                skip_triggers: Vec::new(),
                resume_anchors: Vec::new(),
                running_headers: hts_running_headers(),
                editorial_phrases: Vec::new(),
                chunk_size: DEFAULT_CHUNK_SIZE,
            },
        }
    }

    /// Uses the profile file when given, otherwise the built-in profile.
    pub(crate) fn resolve(path: Option<&Path>, section: SectionKind) -> Result<Self> {
        let profile = match path {
            Some(path) => {
                let raw =
                    fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
                let profile: Self = serde_json::from_slice(&raw)
                    .with_context(|| format!("failed to parse {}", path.display()))?;
                info!(path = %path.display(), doc_type = %profile.doc_type, "loaded section profile");
                profile
            }
            None => Self::builtin(section),
        };

        profile.validate()?;
        Ok(profile)
    }

    pub(crate) fn requires_headings(&self) -> bool {
        matches!(self.root, RootStrategy::Lookup)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.doc_type.trim().is_empty() {
            bail!("profile doc_type must not be empty");
        }
        if self.start_page == 0 {
            bail!("profile start_page is 1-based and must not be 0");
        }
        if self.chunk_size == 0 {
            bail!("profile chunk_size must be positive");
        }

        let mut seen_levels = HashSet::new();
        for level in &self.levels {
            if level.level == ROOT_LEVEL {
                bail!("level {ROOT_LEVEL} is reserved for root nodes");
            }
            if !seen_levels.insert(level.level) {
                bail!("level {} is configured more than once", level.level);
            }
            if level.pattern.trim().is_empty() {
                bail!("level {} has an empty pattern", level.level);
            }
        }

        if let Some(signals) = &self.table_signals {
            if signals.phrases.iter().any(|phrase| phrase.trim().is_empty()) {
                bail!("table signal phrases must not be empty");
            }
            if signals.threshold == 0 || signals.threshold > signals.phrases.len() {
                bail!(
                    "table signal threshold {} must be between 1 and {}",
                    signals.threshold,
                    signals.phrases.len()
                );
            }
        }

        for region in &self.skip_regions {
            if region.start > region.end {
                bail!(
                    "skip region start {} is after its end {}",
                    region.start,
                    region.end
                );
            }
        }

        Ok(())
    }
}
