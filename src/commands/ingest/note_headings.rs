use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::line_normalize::normalize_line;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct NoteHeadingEntry {
    pub number: String,
    pub title: String,
}

#[derive(Debug, Clone)]
struct NoteHeading {
    number: String,
    numeric: u32,
    title: String,
    title_match: String,
}

/// Root-heading lookup: note number to exact title, sorted by numeric value.
#[derive(Debug, Clone, Default)]
pub(super) struct NoteHeadings {
    headings: Vec<NoteHeading>,
    /// Keyed by value so `"4"` and `"04"` name the same note.
    index_by_number: HashMap<u32, usize>,
}

pub(super) fn normalize_note_number(raw: &str) -> String {
    raw.trim().trim_end_matches('.').trim().to_string()
}

impl NoteHeadings {
    pub(super) fn from_entries(entries: Vec<NoteHeadingEntry>) -> Result<Self> {
        let mut headings = Vec::with_capacity(entries.len());
        for entry in entries {
            let number = normalize_note_number(&entry.number);
            let numeric = number.parse::<u32>().with_context(|| {
                format!("note heading number is not numeric: {:?}", entry.number)
            })?;
            let title = entry.title.trim().to_string();
            let title_match = normalize_line(&title).to_lowercase();
            if title_match.is_empty() {
                bail!("note heading {number} has an empty title");
            }

            headings.push(NoteHeading {
                number,
                numeric,
                title,
                title_match,
            });
        }

        headings.sort_by_key(|heading| heading.numeric);

        let mut index_by_number = HashMap::with_capacity(headings.len());
        for (index, heading) in headings.iter().enumerate() {
            if index_by_number.insert(heading.numeric, index).is_some() {
                bail!("duplicate note heading number: {}", heading.number);
            }
        }

        Ok(Self {
            headings,
            index_by_number,
        })
    }

    pub(super) fn load(path: &Path) -> Result<Self> {
        let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let entries: Vec<NoteHeadingEntry> = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        let headings = Self::from_entries(entries)
            .with_context(|| format!("invalid note headings in {}", path.display()))?;

        info!(path = %path.display(), count = headings.len(), "loaded note headings");
        for heading in &headings.headings {
            debug!(number = %heading.number, title = %heading.title, "note heading");
        }

        Ok(headings)
    }

    pub(super) fn len(&self) -> usize {
        self.headings.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.headings.is_empty()
    }

    fn index_of(&self, number: &str) -> Option<usize> {
        let numeric = normalize_note_number(number).parse::<u32>().ok()?;
        self.index_by_number.get(&numeric).copied()
    }

    pub(super) fn contains(&self, number: &str) -> bool {
        self.index_of(number).is_some()
    }

    /// True when `text` (already normalized) begins with the title of `number`,
    /// ignoring case.
    pub(super) fn title_matches(&self, number: &str, text: &str) -> bool {
        let Some(index) = self.index_of(number) else {
            return false;
        };

        text.to_lowercase()
            .starts_with(self.headings[index].title_match.as_str())
    }
}
