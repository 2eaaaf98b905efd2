use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::line_normalize::normalize_line;

/// Inclusive page interval holding commentary that is not part of the notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SkipRegion {
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PageRole {
    /// Ingest until a trigger phrase, then drop the rest of the page.
    Start,
    /// Drop the whole page.
    Middle,
    /// Drop lines until a resume anchor, then ingest normally.
    End,
}

impl PageRole {
    pub(super) fn as_str(self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Middle => "MIDDLE",
            Self::End => "END",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LineDecision {
    Process,
    Skip,
    /// Trigger phrase seen: flush the open node and drop the rest of the page.
    FlushAndSkipRest,
}

/// Per-page skip state. Created fresh for every page.
#[derive(Debug, Clone, Copy)]
pub(super) struct PageCursor {
    page: u32,
    role: Option<PageRole>,
    skipping_rest: bool,
    resumed: bool,
}

impl PageCursor {
    pub(super) fn role(&self) -> Option<PageRole> {
        self.role
    }
}

#[derive(Debug)]
pub(super) struct SkipController {
    regions: Vec<SkipRegion>,
    triggers: Vec<String>,
    resume_anchors: Vec<Regex>,
}

impl SkipController {
    pub(super) fn new(
        regions: &[SkipRegion],
        triggers: &[String],
        resume_anchors: &[String],
    ) -> Result<Self> {
        let mut sorted = regions.to_vec();
        sorted.sort_by_key(|region| region.start);

        for region in &sorted {
            if region.start == 0 {
                bail!("skip region {}-{} starts at page 0; pages are 1-based", region.start, region.end);
            }
            if region.start > region.end {
                bail!("skip region start {} is after its end {}", region.start, region.end);
            }
        }
        for pair in sorted.windows(2) {
            if pair[1].start <= pair[0].end {
                bail!(
                    "skip regions {}-{} and {}-{} overlap",
                    pair[0].start,
                    pair[0].end,
                    pair[1].start,
                    pair[1].end
                );
            }
        }

        if !sorted.is_empty() && resume_anchors.is_empty() {
            bail!("skip regions are configured but no resume anchor is set");
        }

        let resume_anchors = resume_anchors
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .with_context(|| format!("failed to compile resume anchor regex {pattern:?}"))
            })
            .collect::<Result<Vec<Regex>>>()?;

        Ok(Self {
            regions: sorted,
            triggers: triggers
                .iter()
                .map(|trigger| normalize_line(trigger).to_lowercase())
                .filter(|trigger| !trigger.is_empty())
                .collect(),
            resume_anchors,
        })
    }

    pub(super) fn page_role(&self, page: u32) -> Option<PageRole> {
        self.regions.iter().find_map(|region| {
            if page == region.start {
                Some(PageRole::Start)
            } else if page == region.end {
                Some(PageRole::End)
            } else if region.start < page && page < region.end {
                Some(PageRole::Middle)
            } else {
                None
            }
        })
    }

    pub(super) fn begin_page(&self, page: u32) -> PageCursor {
        PageCursor {
            page,
            role: self.page_role(page),
            skipping_rest: false,
            resumed: false,
        }
    }

    /// Consulted for every raw line of a `START` or `END` page before it is
    /// normalized for the parser.
    pub(super) fn decide(&self, cursor: &mut PageCursor, raw_line: &str) -> LineDecision {
        match cursor.role {
            None => LineDecision::Process,
            Some(PageRole::Middle) => LineDecision::Skip,
            Some(PageRole::Start) => {
                if cursor.skipping_rest {
                    return LineDecision::Skip;
                }
                if self.is_trigger(raw_line) {
                    cursor.skipping_rest = true;
                    info!(page = cursor.page, line = %raw_line.trim(), "start of skip region, dropping rest of page");
                    return LineDecision::FlushAndSkipRest;
                }
                LineDecision::Process
            }
            Some(PageRole::End) => {
                if cursor.resumed {
                    return LineDecision::Process;
                }
                if self.is_resume_anchor(raw_line) {
                    cursor.resumed = true;
                    info!(page = cursor.page, line = %raw_line.trim(), "resume anchor found, leaving skip region");
                    return LineDecision::Process;
                }
                LineDecision::Skip
            }
        }
    }

    fn is_trigger(&self, raw_line: &str) -> bool {
        let line = normalize_line(raw_line).to_lowercase();
        !line.is_empty() && self.triggers.iter().any(|trigger| *trigger == line)
    }

    fn is_resume_anchor(&self, raw_line: &str) -> bool {
        let line = normalize_line(raw_line);
        self.resume_anchors
            .iter()
            .any(|anchor| anchor.is_match(&line))
    }
}
