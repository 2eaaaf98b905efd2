use anyhow::{Context, Result, bail};
use regex::Regex;

use super::note_headings::{NoteHeadings, normalize_note_number};
use super::succession::SymbolSequence;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct RootMatch {
    pub symbol: String,
    /// Seed text for the root node's buffer.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct MarkerCandidate {
    pub level: u8,
    pub symbol: String,
    pub sequence: SymbolSequence,
    /// Byte offset in the line where the marker text ends.
    pub span_end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Recognition {
    Root(RootMatch),
    /// A line holding only a known note number; the title may follow on the next line.
    RootNumberOnly(String),
    /// Nested marker candidates in priority order.
    Nested(Vec<MarkerCandidate>),
    Body,
}

#[derive(Debug)]
struct LevelMatcher {
    level: u8,
    pattern: Regex,
    sequence: SymbolSequence,
}

#[derive(Debug)]
enum RootMatcher {
    Lookup {
        headings: NoteHeadings,
        heading_line: Regex,
    },
    Numbered {
        pattern: Regex,
        sequence: SymbolSequence,
    },
}

#[derive(Debug)]
pub(super) struct MarkerRecognizer {
    root: RootMatcher,
    levels: Vec<LevelMatcher>,
}

impl MarkerRecognizer {
    pub(super) fn with_lookup(headings: NoteHeadings) -> Result<Self> {
        Ok(Self {
            root: RootMatcher::Lookup {
                headings,
                heading_line: Regex::new(r"^(\d+)\.?\s+(.*)$")
                    .context("failed to compile note heading regex")?,
            },
            levels: Vec::new(),
        })
    }

    /// `pattern` must capture the heading number in group 1. The whole line
    /// seeds the node's text so a bare `"2."` still produces a row.
    pub(super) fn with_numbered_roots(pattern: &str, sequence: SymbolSequence) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .with_context(|| format!("failed to compile numbered root regex {pattern:?}"))?;
        if pattern.captures_len() < 2 {
            bail!("numbered root regex must capture the rule number: {pattern}");
        }

        Ok(Self {
            root: RootMatcher::Numbered { pattern, sequence },
            levels: Vec::new(),
        })
    }

    /// Adds a nested level; levels are tried in the order they are added.
    pub(super) fn push_level(
        &mut self,
        level: u8,
        pattern: &str,
        sequence: SymbolSequence,
    ) -> Result<()> {
        let pattern = Regex::new(pattern)
            .with_context(|| format!("failed to compile level {level} regex {pattern:?}"))?;
        if pattern.captures_len() < 2 {
            bail!("level {level} regex must capture the marker symbol: {pattern}");
        }

        self.levels.push(LevelMatcher {
            level,
            pattern,
            sequence,
        });
        Ok(())
    }

    /// Sequence that gates numbered roots; lookup roots are trusted.
    pub(super) fn root_sequence(&self) -> Option<SymbolSequence> {
        match &self.root {
            RootMatcher::Numbered { sequence, .. } => Some(*sequence),
            RootMatcher::Lookup { .. } => None,
        }
    }

    pub(super) fn recognize(&self, line: &str) -> Recognition {
        if let Some(root) = self.match_root(line) {
            return Recognition::Root(root);
        }

        if let RootMatcher::Lookup { headings, .. } = &self.root {
            let number = normalize_note_number(line);
            if line.len() <= number.len() + 1 && headings.contains(&number) {
                return Recognition::RootNumberOnly(number);
            }
        }

        let candidates = self.candidates(line);
        if candidates.is_empty() {
            Recognition::Body
        } else {
            Recognition::Nested(candidates)
        }
    }

    fn match_root(&self, line: &str) -> Option<RootMatch> {
        match &self.root {
            RootMatcher::Lookup {
                headings,
                heading_line,
            } => {
                let captures = heading_line.captures(line)?;
                let number = normalize_note_number(captures.get(1)?.as_str());
                let remainder = captures.get(2).map(|m| m.as_str()).unwrap_or("");
                if !headings.title_matches(&number, remainder) {
                    return None;
                }

                Some(RootMatch {
                    symbol: number,
                    text: line.to_string(),
                })
            }
            RootMatcher::Numbered { pattern, .. } => {
                let captures = pattern.captures(line)?;
                let symbol = normalize_note_number(captures.get(1)?.as_str());

                Some(RootMatch {
                    symbol,
                    text: line.to_string(),
                })
            }
        }
    }

    /// Resolves a heading split over two lines: a bare note number followed by
    /// a line starting with that note's title.
    pub(super) fn match_split_root(&self, number_line: &str, title_line: &str) -> Option<RootMatch> {
        let RootMatcher::Lookup { headings, .. } = &self.root else {
            return None;
        };

        let number = normalize_note_number(number_line);
        if !headings.title_matches(&number, title_line) {
            return None;
        }

        Some(RootMatch {
            text: format!("{number}. {title_line}"),
            symbol: number,
        })
    }

    fn candidates(&self, line: &str) -> Vec<MarkerCandidate> {
        self.levels
            .iter()
            .filter_map(|matcher| {
                let captures = matcher.pattern.captures(line)?;
                let whole = captures.get(0)?;
                let symbol = captures.get(1)?.as_str().to_string();
                Some(MarkerCandidate {
                    level: matcher.level,
                    symbol,
                    sequence: matcher.sequence,
                    span_end: whole.end(),
                })
            })
            .collect()
    }
}
