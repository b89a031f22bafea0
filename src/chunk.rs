//! Page-bounded, overlapping text chunker.
//!
//! Each [`PageUnit`] is split on its own, so a chunk never spans two pages.
//! Windows are at most `chunk_size` characters. A window is cut at the
//! strongest boundary found in its second half (paragraph, line, sentence,
//! clause, word) and the next window starts `chunk_overlap` characters
//! before the cut. The output is a pure function of the input text and
//! parameters.
//!
//! Chunk ids are UUIDv5 over `(source hash, page, ordinal)`, so indexing
//! the same content twice overwrites instead of duplicating.

use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::{ChunkDraft, PageUnit};

/// Cut candidates, strongest first.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", "; ", " "];

/// Labels recognised by [`section_label`], matched case-insensitively.
const SECTION_KEYWORDS: &[(&str, &str)] = &[
    ("article", "Article"),
    ("section", "Section"),
    ("chapter", "Chapter"),
    ("clause", "Clause"),
    ("статья", "Статья"),
    ("пункт", "Пункт"),
    ("глава", "Глава"),
];

#[derive(Debug, Clone, Copy)]
pub struct ChunkParams {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl From<&ChunkingConfig> for ChunkParams {
    fn from(config: &ChunkingConfig) -> Self {
        ChunkParams {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        }
    }
}

impl Default for ChunkParams {
    fn default() -> Self {
        ChunkParams::from(&ChunkingConfig::default())
    }
}

/// Deterministic chunk id.
pub fn chunk_id(source_hash: &str, page: u32, ordinal: u32) -> String {
    let name = format!("{}:{}:{}", source_hash, page, ordinal);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// Chunk every page in order.
pub fn chunk_pages<I>(pages: I, params: ChunkParams) -> Vec<ChunkDraft>
where
    I: IntoIterator<Item = PageUnit>,
{
    pages
        .into_iter()
        .flat_map(|page| chunk_page(&page, params))
        .collect()
}

/// Split one page. Blank pages produce no chunks; a page that fits in one
/// window produces exactly one chunk holding the trimmed page text.
pub fn chunk_page(page: &PageUnit, params: ChunkParams) -> Vec<ChunkDraft> {
    split_text(&page.text, params)
        .into_iter()
        .enumerate()
        .map(|(ordinal, text)| ChunkDraft {
            page: page.page,
            ordinal: ordinal as u32,
            section: section_label(&text),
            text,
        })
        .collect()
}

fn split_text(text: &str, params: ChunkParams) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let size = params.chunk_size.max(1);
    // Byte offset of each char, plus the end of the string.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let n = bounds.len() - 1;
    if n <= size {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + size).min(n);
        let cut = if end == n {
            n
        } else {
            find_cut(text, &bounds, start + size / 2, end).unwrap_or(end)
        };

        let piece = text[bounds[start]..bounds[cut]].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        if cut >= n {
            break;
        }

        let next = cut.saturating_sub(params.chunk_overlap).max(start + 1);
        start = align_to_word(text, &bounds, next, cut);
    }
    pieces
}

/// Char index just past the strongest separator in `[lo, hi)`.
fn find_cut(text: &str, bounds: &[usize], lo: usize, hi: usize) -> Option<usize> {
    let window = &text[bounds[lo]..bounds[hi]];
    SEPARATORS.iter().find_map(|sep| {
        window.rfind(sep).map(|pos| {
            let byte = bounds[lo] + pos + sep.len();
            bounds.binary_search(&byte).unwrap_or_else(|i| i)
        })
    })
}

/// Move an overlap start forward to the next word start, without passing `limit`.
fn align_to_word(text: &str, bounds: &[usize], from: usize, limit: usize) -> usize {
    if from == 0 || text[bounds[from - 1]..bounds[from]].trim().is_empty() {
        return from;
    }
    let window = &text[bounds[from]..bounds[limit]];
    match window.find(char::is_whitespace) {
        Some(pos) => {
            let byte = bounds[from] + pos;
            let idx = bounds.binary_search(&byte).unwrap_or_else(|i| i);
            (idx + 1).min(limit)
        }
        None => from,
    }
}

/// First article/section marker in `text`, e.g. `Article 5.2`.
pub fn section_label(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let mut best: Option<(usize, String)> = None;
    for (keyword, display) in SECTION_KEYWORDS {
        let mut offset = 0;
        while let Some(pos) = lower[offset..].find(keyword) {
            let at = offset + pos;
            offset = at + keyword.len();
            if best.as_ref().is_some_and(|(b, _)| *b <= at) {
                break;
            }
            if let Some(number) = number_after(&lower[offset..]) {
                best = Some((at, format!("{} {}", display, number)));
                break;
            }
        }
    }
    best.map(|(_, label)| label)
}

fn number_after(rest: &str) -> Option<String> {
    let rest = rest.trim_start_matches([' ', '\u{a0}']);
    let rest = rest.strip_prefix('№').unwrap_or(rest).trim_start();
    let number: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let number = number.trim_end_matches('.');
    if number.starts_with(|c: char| c.is_ascii_digit()) {
        Some(number.to_string())
    } else {
        None
    }
}
