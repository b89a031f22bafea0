//! Page-preserving text extraction.
//!
//! Format dispatch is a capability table: each [`FormatTag`] maps to one
//! extraction function returning the text of every page in order. Formats
//! with no entry fail with [`LoadError::UnsupportedFormat`].
//!
//! | Format | Pages |
//! |--------|-------|
//! | PDF | one per PDF page |
//! | DOCX | split on rendered or explicit page breaks |
//! | PPTX | one per slide |
//! | XLSX | one per worksheet |
//! | TXT / Markdown | single page |

use std::io::Read;
use std::panic::{catch_unwind, AssertUnwindSafe};

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::LoadError;

/// Maximum decompressed bytes read from a single OOXML part (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatTag {
    Pdf,
    Docx,
    Pptx,
    Xlsx,
    Text,
    Markdown,
}

impl FormatTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatTag::Pdf => "pdf",
            FormatTag::Docx => "docx",
            FormatTag::Pptx => "pptx",
            FormatTag::Xlsx => "xlsx",
            FormatTag::Text => "txt",
            FormatTag::Markdown => "md",
        }
    }

    /// Detect the format from a file name's extension (case-insensitive).
    pub fn from_filename(name: &str) -> Option<FormatTag> {
        let ext = extension(name)?;
        match ext.as_str() {
            "pdf" => Some(FormatTag::Pdf),
            "docx" => Some(FormatTag::Docx),
            "pptx" => Some(FormatTag::Pptx),
            "xlsx" => Some(FormatTag::Xlsx),
            "txt" | "text" => Some(FormatTag::Text),
            "md" | "markdown" => Some(FormatTag::Markdown),
            _ => None,
        }
    }
}

pub(crate) fn extension(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

type Extractor = fn(&[u8]) -> Result<Vec<String>, LoadError>;

const EXTRACTORS: &[(FormatTag, Extractor)] = &[
    (FormatTag::Pdf, extract_pdf),
    (FormatTag::Docx, extract_docx),
    (FormatTag::Pptx, extract_pptx),
    (FormatTag::Xlsx, extract_xlsx),
    (FormatTag::Text, extract_plain),
    (FormatTag::Markdown, extract_plain),
];

/// Extract the text of each page, in page order.
///
/// Fails with [`LoadError::NoText`] when every page is blank (for example
/// a scanned PDF with no text layer).
pub fn extract_pages(format: FormatTag, bytes: &[u8]) -> Result<Vec<String>, LoadError> {
    let extract = EXTRACTORS
        .iter()
        .find(|(tag, _)| *tag == format)
        .map(|(_, f)| *f)
        .ok_or_else(|| LoadError::UnsupportedFormat(format.as_str().to_string()))?;

    let pages = extract(bytes)?;
    if pages.iter().all(|p| p.trim().is_empty()) {
        return Err(LoadError::NoText);
    }
    Ok(pages)
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<String>, LoadError> {
    // pdf-extract panics on some malformed inputs instead of returning Err.
    match catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    })) {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(LoadError::corrupt("pdf", e)),
        Err(_) => Err(LoadError::corrupt("pdf", "parser panicked")),
    }
}

fn extract_plain(bytes: &[u8]) -> Result<Vec<String>, LoadError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let text = std::str::from_utf8(bytes).map_err(|e| LoadError::corrupt("text", e))?;
    Ok(vec![text.to_string()])
}

type OoxmlArchive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_ooxml<'a>(bytes: &'a [u8], format: &str) -> Result<OoxmlArchive<'a>, LoadError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| LoadError::corrupt(format, e))
}

fn read_zip_entry_bounded(
    archive: &mut OoxmlArchive<'_>,
    name: &str,
    format: &str,
) -> Result<Vec<u8>, LoadError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| LoadError::corrupt(format, format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| LoadError::corrupt(format, e))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(LoadError::ArchiveTooLarge(format!(
            "{} exceeds {} bytes",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Names matching `{prefix}{n}.xml`, ordered by `n`.
fn numbered_parts(archive: &OoxmlArchive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn is_page_break(e: &quick_xml::events::BytesStart<'_>) -> bool {
    e.attributes().flatten().any(|a| {
        a.key.local_name().as_ref() == b"type" && a.value.as_ref() == b"page"
    })
}

enum DocxPiece {
    Text(String),
    RenderedBreak,
    HardBreak,
}

fn extract_docx(bytes: &[u8]) -> Result<Vec<String>, LoadError> {
    let mut archive = open_ooxml(bytes, "docx")?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", "docx")?;

    let mut pieces = Vec::new();
    let mut reader = Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => pieces.push(DocxPiece::Text("\n".to_string())),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| LoadError::corrupt("docx", e))?;
                pieces.push(DocxPiece::Text(text.into_owned()));
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"lastRenderedPageBreak" => pieces.push(DocxPiece::RenderedBreak),
                b"br" if is_page_break(&e) => pieces.push(DocxPiece::HardBreak),
                b"tab" => pieces.push(DocxPiece::Text("\t".to_string())),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(LoadError::corrupt("docx", e)),
            _ => {}
        }
        buf.clear();
    }

    // Rendered breaks reflect Word's actual layout; explicit breaks are the
    // fallback for documents never opened in a layout engine.
    let use_rendered = pieces
        .iter()
        .any(|p| matches!(p, DocxPiece::RenderedBreak));
    let mut pages = vec![String::new()];
    for piece in pieces {
        match piece {
            DocxPiece::Text(t) => {
                if let Some(page) = pages.last_mut() {
                    page.push_str(&t);
                }
            }
            DocxPiece::RenderedBreak if use_rendered => pages.push(String::new()),
            DocxPiece::HardBreak if !use_rendered => pages.push(String::new()),
            _ => {}
        }
    }
    Ok(pages)
}

/// Concatenate `<a:t>` runs, one line per `<a:p>` paragraph.
fn extract_drawing_text(xml: &[u8]) -> Result<String, LoadError> {
    let mut out = String::new();
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" if !out.is_empty() && !out.ends_with('\n') => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| LoadError::corrupt("pptx", e))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(LoadError::corrupt("pptx", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_pptx(bytes: &[u8]) -> Result<Vec<String>, LoadError> {
    let mut archive = open_ooxml(bytes, "pptx")?;
    let slides = numbered_parts(&archive, "ppt/slides/slide");
    if slides.is_empty() {
        return Err(LoadError::corrupt("pptx", "no slides found"));
    }
    let mut pages = Vec::with_capacity(slides.len());
    for name in slides {
        let xml = read_zip_entry_bounded(&mut archive, &name, "pptx")?;
        pages.push(extract_drawing_text(&xml)?);
    }
    Ok(pages)
}

fn extract_xlsx(bytes: &[u8]) -> Result<Vec<String>, LoadError> {
    let mut archive = open_ooxml(bytes, "xlsx")?;
    let shared = if archive.index_for_name("xl/sharedStrings.xml").is_some() {
        read_shared_strings(&mut archive)?
    } else {
        Vec::new()
    };
    let sheets = numbered_parts(&archive, "xl/worksheets/sheet");
    if sheets.is_empty() {
        return Err(LoadError::corrupt("xlsx", "no worksheets found"));
    }
    let mut pages = Vec::new();
    for name in sheets.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_zip_entry_bounded(&mut archive, &name, "xlsx")?;
        pages.push(extract_sheet_rows(&xml, &shared)?);
    }
    Ok(pages)
}

fn read_shared_strings(archive: &mut OoxmlArchive<'_>) -> Result<Vec<String>, LoadError> {
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", "xlsx")?;
    let mut strings = Vec::new();
    let mut reader = Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                if let Some(s) = current.as_mut() {
                    let text = te.unescape().map_err(|e| LoadError::corrupt("xlsx", e))?;
                    s.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => strings.extend(current.take()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(LoadError::corrupt("xlsx", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// One line per row, cells separated by tabs.
fn extract_sheet_rows(xml: &[u8], shared: &[String]) -> Result<String, LoadError> {
    let mut rows: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_value = false;
    let mut shared_cell = false;
    let mut cells = 0usize;
    loop {
        if cells >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared_cell = e.attributes().flatten().any(|a| {
                        a.key.as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let raw = te.unescape().map_err(|e| LoadError::corrupt("xlsx", e))?;
                let raw = raw.trim();
                if !raw.is_empty() {
                    let value = if shared_cell {
                        raw.parse::<usize>()
                            .ok()
                            .and_then(|i| shared.get(i).cloned())
                    } else {
                        Some(raw.to_string())
                    };
                    if let Some(v) = value {
                        row.push(v);
                        cells += 1;
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => shared_cell = false,
                b"row" if !row.is_empty() => rows.push(std::mem::take(&mut row).join("\t")),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(LoadError::corrupt("xlsx", e)),
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        rows.push(row.join("\t"));
    }
    Ok(rows.join("\n"))
}
