use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};

/// One page of source text, split into blank-line separated blocks of raw lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct SourcePage {
    pub number: u32,
    pub blocks: Vec<Vec<String>>,
}

impl SourcePage {
    pub(super) fn line_count(&self) -> usize {
        self.blocks.iter().map(Vec::len).sum()
    }
}

pub(super) fn extract_pages_with_pdftotext(
    pdf_path: &Path,
    first_page: u32,
    max_pages: Option<usize>,
) -> Result<Vec<SourcePage>> {
    let first_page = first_page.max(1);
    let mut command = Command::new("pdftotext");
    command
        .arg("-enc")
        .arg("UTF-8")
        .arg("-f")
        .arg(first_page.to_string());
    if let Some(max_pages) = max_pages {
        let last_page = first_page as usize + max_pages.saturating_sub(1);
        command.arg("-l").arg(last_page.to_string());
    }
    command.arg(pdf_path).arg("-");

    let output = command
        .output()
        .with_context(|| format!("failed to execute pdftotext for {}", pdf_path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "pdftotext returned non-zero exit status for {}: {}",
            pdf_path.display(),
            stderr.trim()
        );
    }

    let raw = String::from_utf8_lossy(&output.stdout);
    Ok(split_pages(&raw, first_page))
}

/// Reads text already extracted with page breaks as form feeds. Pages are
/// numbered from 1 and windowed the same way as a `pdftotext` run.
pub(super) fn read_pages_from_text(
    text_path: &Path,
    first_page: u32,
    max_pages: Option<usize>,
) -> Result<Vec<SourcePage>> {
    let raw = fs::read_to_string(text_path)
        .with_context(|| format!("failed to read {}", text_path.display()))?;
    Ok(window_pages(split_pages(&raw, 1), first_page, max_pages))
}

/// Keeps `max_pages` pages starting at `first_page`, matching `pdftotext -f/-l`.
pub(super) fn window_pages(
    pages: Vec<SourcePage>,
    first_page: u32,
    max_pages: Option<usize>,
) -> Vec<SourcePage> {
    let first_page = first_page.max(1);
    pages
        .into_iter()
        .filter(|page| page.number >= first_page)
        .take(max_pages.unwrap_or(usize::MAX))
        .collect()
}

pub(super) fn split_pages(raw: &str, first_page_number: u32) -> Vec<SourcePage> {
    let mut pages = raw
        .split('\u{000C}')
        .enumerate()
        .map(|(index, page)| SourcePage {
            number: first_page_number + index as u32,
            blocks: split_blocks(&page.replace('\u{0000}', "")),
        })
        .collect::<Vec<SourcePage>>();

    while let Some(last_page) = pages.last() {
        if last_page.blocks.is_empty() {
            pages.pop();
            continue;
        }
        break;
    }

    pages
}

fn split_blocks(page: &str) -> Vec<Vec<String>> {
    let mut blocks = Vec::new();
    let mut current = Vec::<String>::new();

    for line in page.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            continue;
        }
        current.push(line.to_string());
    }

    if !current.is_empty() {
        blocks.push(current);
    }

    blocks
}
