use anyhow::{Context, Result};
use regex::Regex;

const ZERO_WIDTH_CHARS: [char; 5] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}'];

fn is_dash_like(character: char) -> bool {
    matches!(
        character,
        '-' | '\u{2010}'..='\u{2015}' | '\u{2212}' | '\u{FE58}' | '\u{FE63}' | '\u{FF0D}'
    )
}

/// Cleans one extracted line: zero-width characters are dropped, dash glyphs
/// become spaces and whitespace runs collapse to a single space.
pub(super) fn normalize_line(input: &str) -> String {
    let cleaned = input
        .chars()
        .filter(|character| !ZERO_WIDTH_CHARS.contains(character))
        .map(|character| {
            if is_dash_like(character) {
                ' '
            } else {
                character
            }
        })
        .collect::<String>();

    cleaned.split_whitespace().collect::<Vec<&str>>().join(" ")
}

#[derive(Debug, Clone)]
pub(super) struct LineFilters {
    running_headers: Vec<String>,
    editorial_phrases: Vec<String>,
}

impl LineFilters {
    pub(super) fn new(running_headers: &[String], editorial_phrases: &[String]) -> Self {
        Self {
            running_headers: running_headers
                .iter()
                .map(|banner| normalize_line(banner))
                .filter(|banner| !banner.is_empty())
                .collect(),
            editorial_phrases: editorial_phrases
                .iter()
                .map(|phrase| normalize_line(phrase).to_lowercase())
                .filter(|phrase| !phrase.is_empty())
                .collect(),
        }
    }

    /// Expects a normalized line.
    pub(super) fn is_running_header(&self, line: &str) -> bool {
        self.running_headers
            .iter()
            .any(|banner| line.starts_with(banner.as_str()))
    }

    /// Administrative deletion/renumbering notices that are not tariff text.
    pub(super) fn is_editorial(&self, line: &str) -> bool {
        let lowered = line.to_lowercase();
        self.editorial_phrases
            .iter()
            .any(|phrase| lowered.contains(phrase.as_str()))
    }

    pub(super) fn block_is_running_header(&self, block: &[String]) -> bool {
        block
            .iter()
            .map(|raw_line| normalize_line(raw_line))
            .find(|line| !line.is_empty())
            .is_some_and(|line| self.is_running_header(&line))
    }
}

/// Whole-word, case-insensitive phrase matcher for column headers that mark
/// the start of a tariff table.
#[derive(Debug, Clone)]
pub(super) struct TableSignalMatcher {
    phrases: Vec<Regex>,
    threshold: usize,
}

impl TableSignalMatcher {
    pub(super) fn new(phrases: &[String], threshold: usize) -> Result<Self> {
        let phrases = phrases
            .iter()
            .map(|phrase| {
                let words = normalize_line(phrase)
                    .split(' ')
                    .map(regex::escape)
                    .collect::<Vec<String>>()
                    .join(r"\s+");
                Regex::new(&format!(r"(?i)\b{words}\b"))
                    .with_context(|| format!("failed to compile table signal {phrase:?}"))
            })
            .collect::<Result<Vec<Regex>>>()?;

        Ok(Self { phrases, threshold })
    }

    pub(super) fn threshold(&self) -> usize {
        self.threshold
    }

    /// Indexes of the phrases present in `line`.
    pub(super) fn matches<'a>(&'a self, line: &'a str) -> impl Iterator<Item = usize> + 'a {
        self.phrases
            .iter()
            .enumerate()
            .filter(move |(_, phrase)| phrase.is_match(line))
            .map(|(index, _)| index)
    }
}
