//! PDF table extraction: per-page candidate detection, then cross-page
//! continuation stitching.
//!
//! Grounded on the teacher's `AdvancedPDFProcessor::extract_tables` /
//! `parse_table` / `parse_table_content` (line-group heuristics over raw
//! page text), generalized here to walk real PDF bytes via `pdf-extract`
//! for text and `lopdf` for the page count, instead of a toy text format.

use crate::error::Result;
use async_trait::async_trait;
use lopdf::Document as LopdfDocument;
use tracing::{debug, warn};

/// A table as extracted from a single page, with no cross-page knowledge.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    /// Rows of string cells; row 0 is the header if present.
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn column_count(&self) -> usize {
        self.rows.first().map(|r| r.len()).unwrap_or(0)
    }
}

/// Everything extracted from one page.
#[derive(Debug, Clone)]
pub struct PageExtraction {
    pub page_index: usize,
    pub page_text: String,
    pub tables: Vec<RawTable>,
}

/// Asked to decide whether a candidate page-level table continues the
/// in-flight one. Implemented over the LLM schema inferrer call site.
#[async_trait]
pub trait ContinuationOracle: Send + Sync {
    async fn is_continuation(
        &self,
        in_flight: &RawTable,
        candidate: &RawTable,
    ) -> Result<bool>;
}

/// Extract per-page text and page-local candidate tables from raw PDF bytes.
pub fn extract_pages(pdf_bytes: &[u8]) -> Result<Vec<PageExtraction>> {
    let page_count = count_pages(pdf_bytes).unwrap_or(1).max(1);
    let full_text = extract_full_text(pdf_bytes)?;
    let page_texts = split_into_pages(&full_text, page_count);

    let mut pages = Vec::with_capacity(page_texts.len());
    for (index, page_text) in page_texts.into_iter().enumerate() {
        let tables = detect_tables_in_page(&page_text);
        pages.push(PageExtraction {
            page_index: index,
            page_text,
            tables,
        });
    }

    Ok(pages)
}

fn count_pages(pdf_bytes: &[u8]) -> Option<usize> {
    match LopdfDocument::load_mem(pdf_bytes) {
        Ok(doc) => Some(doc.get_pages().len()),
        Err(e) => {
            warn!("lopdf failed to parse page structure: {}", e);
            None
        }
    }
}

fn extract_full_text(pdf_bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(pdf_bytes)
        .map_err(|e| std::io::Error::other(e.to_string()).into())
}

/// `pdf-extract` does not expose page boundaries directly; it separates
/// pages with form-feed characters in most PDFs. Fall back to an even split
/// across the known page count when no form feeds are present.
fn split_into_pages(full_text: &str, page_count: usize) -> Vec<String> {
    let by_form_feed: Vec<&str> = full_text.split('\u{c}').collect();
    if by_form_feed.len() > 1 {
        return by_form_feed.into_iter().map(|s| s.to_string()).collect();
    }

    if page_count <= 1 {
        return vec![full_text.to_string()];
    }

    let lines: Vec<&str> = full_text.lines().collect();
    let chunk_size = (lines.len() / page_count).max(1);
    lines
        .chunks(chunk_size)
        .map(|chunk| chunk.join("\n"))
        .collect()
}

/// Group consecutive lines that look like table rows: pipe-delimited, or
/// whitespace-column-delimited with a consistent cell count across at
/// least two consecutive lines.
fn detect_tables_in_page(page_text: &str) -> Vec<RawTable> {
    let lines: Vec<&str> = page_text.lines().collect();
    let mut tables = Vec::new();
    let mut current_block: Vec<Vec<String>> = Vec::new();
    let mut current_width: Option<usize> = None;

    for line in &lines {
        if let Some(cells) = split_table_row(line) {
            match current_width {
                Some(w) if w == cells.len() => current_block.push(cells),
                Some(_) => {
                    flush_block(&mut current_block, &mut tables);
                    current_width = Some(cells.len());
                    current_block.push(cells);
                }
                None => {
                    current_width = Some(cells.len());
                    current_block.push(cells);
                }
            }
        } else {
            flush_block(&mut current_block, &mut tables);
            current_width = None;
        }
    }
    flush_block(&mut current_block, &mut tables);

    tables
}

fn flush_block(block: &mut Vec<Vec<String>>, tables: &mut Vec<RawTable>) {
    if block.len() >= 2 {
        tables.push(RawTable {
            rows: std::mem::take(block),
        });
    } else {
        block.clear();
    }
}

/// Split a single line into cells if it looks table-shaped, otherwise None.
fn split_table_row(line: &str) -> Option<Vec<String>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.contains('|') {
        let cells: Vec<String> = trimmed
            .trim_matches('|')
            .split('|')
            .map(|c| c.trim().to_string())
            .collect();
        if cells.len() >= 2 {
            return Some(cells);
        }
    }

    let cells: Vec<String> = trimmed
        .split("  ")
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(|c| c.to_string())
        .collect();
    if cells.len() >= 2 {
        return Some(cells);
    }

    None
}

/// Stitch page-local candidate tables into logical, possibly multi-page,
/// tables. See the continuation decision rule in the module-level docs.
pub async fn stitch_continuations(
    pages: &[PageExtraction],
    oracle: &dyn ContinuationOracle,
) -> Result<Vec<RawTable>> {
    let mut finished = Vec::new();
    let mut in_flight: Option<RawTable> = None;

    for page in pages {
        for candidate in &page.tables {
            in_flight = match in_flight.take() {
                None => Some(candidate.clone()),
                Some(current) => {
                    if current.column_count() != candidate.column_count() {
                        push_if_nonempty(&mut finished, current);
                        Some(candidate.clone())
                    } else if oracle.is_continuation(&current, candidate).await? {
                        Some(extend_table(current, candidate))
                    } else {
                        push_if_nonempty(&mut finished, current);
                        Some(candidate.clone())
                    }
                }
            };
        }
    }

    if let Some(last) = in_flight {
        push_if_nonempty(&mut finished, last);
    }

    debug!("stitched {} logical tables from {} pages", finished.len(), pages.len());
    Ok(finished)
}

fn push_if_nonempty(finished: &mut Vec<RawTable>, table: RawTable) {
    if table.rows.len() > 1 {
        finished.push(table);
    }
}

fn extend_table(mut in_flight: RawTable, candidate: &RawTable) -> RawTable {
    let header = in_flight.rows.first().cloned();
    let mut candidate_rows = candidate.rows.clone();

    if let Some(header) = header {
        if let Some(first) = candidate_rows.first() {
            let matches = first.len() == header.len()
                && first
                    .iter()
                    .zip(header.iter())
                    .all(|(a, b)| a.eq_ignore_ascii_case(b));
            if matches {
                candidate_rows.remove(0);
            }
        }
    }

    in_flight.rows.extend(candidate_rows);
    in_flight
}
