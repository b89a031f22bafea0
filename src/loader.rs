//! Document loader: turns an upload (file, directory or ZIP archive) into
//! [`SourceFile`]s, each of which yields its [`PageUnit`]s on demand.
//!
//! The loader never talks to the embedding or index services. A file that
//! cannot be read, parsed or unpacked becomes a [`SourceFile`] carrying a
//! `defect`, so the pipeline can mark it `failed` while its siblings
//! continue.
//!
//! Container rules:
//! - system entries (`__MACOSX/`, dot-files, `Thumbs.db`) are skipped silently
//! - entries with unsupported extensions and nested archives are skipped and
//!   reported in [`Expansion::skipped`]
//! - an entry path escaping the archive root rejects the whole archive
//! - size and compression-ratio limits reject the whole archive

use std::io::Read;
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::config::IngestConfig;
use crate::error::LoadError;
use crate::extract::{extension, extract_pages, FormatTag};
use crate::models::PageUnit;

/// Archive extensions recognised as containers.
const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "tar", "tgz", "gz", "rar", "7z"];

/// Ratios are only meaningful on archives large enough to do damage.
const RATIO_CHECK_FLOOR: u64 = 1024 * 1024;

/// Limits applied while unpacking archives.
#[derive(Debug, Clone)]
pub struct LoaderLimits {
    pub max_archive_bytes: u64,
    pub max_entry_bytes: u64,
    pub max_compression_ratio: u64,
}

impl From<&IngestConfig> for LoaderLimits {
    fn from(config: &IngestConfig) -> Self {
        LoaderLimits {
            max_archive_bytes: config.max_archive_bytes,
            max_entry_bytes: config.max_entry_bytes,
            max_compression_ratio: config.max_compression_ratio,
        }
    }
}

impl Default for LoaderLimits {
    fn default() -> Self {
        LoaderLimits::from(&IngestConfig::default())
    }
}

/// One candidate document, identified by the SHA-256 of its bytes.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub filename: String,
    pub archive_source: Option<String>,
    pub content_hash: String,
    pub format: Option<FormatTag>,
    pub bytes: Vec<u8>,
    /// Set when the file is known to be unusable before extraction.
    pub defect: Option<LoadError>,
}

impl SourceFile {
    pub fn from_bytes(filename: &str, bytes: Vec<u8>) -> Self {
        SourceFile {
            filename: filename.to_string(),
            archive_source: None,
            content_hash: content_hash(&bytes),
            format: FormatTag::from_filename(filename),
            bytes,
            defect: None,
        }
    }

    fn rejected(filename: &str, bytes: &[u8], err: LoadError) -> Self {
        SourceFile {
            filename: filename.to_string(),
            archive_source: None,
            content_hash: content_hash(bytes),
            format: None,
            bytes: Vec::new(),
            defect: Some(err),
        }
    }

    pub fn format_str(&self) -> &'static str {
        self.format.map(|f| f.as_str()).unwrap_or("")
    }

    /// Extract this file's pages in order.
    ///
    /// Extraction is CPU-bound; call it from a blocking context.
    pub fn pages(&self) -> Result<PageUnits, LoadError> {
        if let Some(err) = &self.defect {
            return Err(err.clone());
        }
        let format = self
            .format
            .ok_or_else(|| LoadError::UnsupportedFormat(self.filename.clone()))?;
        let pages = extract_pages(format, &self.bytes)?;
        Ok(PageUnits {
            source_hash: self.content_hash.clone(),
            pages: pages.into_iter().enumerate(),
        })
    }
}

/// Ordered page sequence of one [`SourceFile`]. Pages are numbered from 1.
pub struct PageUnits {
    source_hash: String,
    pages: std::iter::Enumerate<std::vec::IntoIter<String>>,
}

impl Iterator for PageUnits {
    type Item = PageUnit;

    fn next(&mut self) -> Option<PageUnit> {
        let (idx, text) = self.pages.next()?;
        Some(PageUnit {
            source_hash: self.source_hash.clone(),
            page: idx as u32 + 1,
            text,
        })
    }
}

/// An entry left out of an expansion, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub name: String,
    pub reason: String,
}

/// Result of expanding one upload.
#[derive(Debug, Default)]
pub struct Expansion {
    pub files: Vec<SourceFile>,
    pub skipped: Vec<SkippedEntry>,
}

impl Expansion {
    fn merge(&mut self, other: Expansion) {
        self.files.extend(other.files);
        self.skipped.extend(other.skipped);
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn is_archive(name: &str) -> bool {
    extension(name).is_some_and(|ext| ARCHIVE_EXTENSIONS.contains(&ext.as_str()))
}

/// `__MACOSX/`, dot-files, dot-directories and OS thumbnails.
fn is_system_entry(path: &str) -> bool {
    path.split(['/', '\\'])
        .filter(|c| !c.is_empty())
        .any(|c| c == "__MACOSX" || c.starts_with('.') || c.eq_ignore_ascii_case("Thumbs.db"))
}

#[derive(Debug, Clone, Default)]
pub struct Loader {
    limits: LoaderLimits,
}

impl Loader {
    pub fn new(limits: LoaderLimits) -> Self {
        Loader { limits }
    }

    /// Expand uploaded bytes. A `.zip` is unpacked; anything else is a
    /// single file, failing later if its format is unsupported.
    pub fn expand_bytes(&self, filename: &str, bytes: Vec<u8>) -> Expansion {
        if extension(filename).as_deref() == Some("zip") {
            return self.expand_zip(filename, bytes);
        }
        if is_archive(filename) {
            let err = LoadError::UnsupportedFormat(format!(
                "{} (only ZIP archives are supported)",
                filename
            ));
            return Expansion {
                files: vec![SourceFile::rejected(filename, &bytes, err)],
                skipped: Vec::new(),
            };
        }
        Expansion {
            files: vec![SourceFile::from_bytes(filename, bytes)],
            skipped: Vec::new(),
        }
    }

    /// Expand a path on disk: a file, or a directory walked recursively in
    /// file-name order.
    pub fn expand_path(&self, path: &Path) -> anyhow::Result<Expansion> {
        if path.is_file() {
            let bytes = std::fs::read(path)?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            return Ok(self.expand_bytes(&name, bytes));
        }
        if !path.is_dir() {
            anyhow::bail!("Path does not exist: {}", path.display());
        }

        let mut expansion = Expansion::default();
        let walker = WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0 || !is_system_entry(&e.file_name().to_string_lossy())
            });
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    expansion.skipped.push(SkippedEntry {
                        name: e.path().map(|p| p.display().to_string()).unwrap_or_default(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(path)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");

            if !is_archive(&rel) && FormatTag::from_filename(&rel).is_none() {
                expansion.skipped.push(SkippedEntry {
                    name: rel,
                    reason: "unsupported format".to_string(),
                });
                continue;
            }
            match std::fs::read(entry.path()) {
                Ok(bytes) => expansion.merge(self.expand_bytes(&rel, bytes)),
                Err(e) => expansion.skipped.push(SkippedEntry {
                    name: rel,
                    reason: e.to_string(),
                }),
            }
        }
        Ok(expansion)
    }

    fn expand_zip(&self, archive_name: &str, bytes: Vec<u8>) -> Expansion {
        match self.unpack_zip(archive_name, &bytes) {
            Ok(expansion) => expansion,
            Err(err) => {
                tracing::warn!(archive = %archive_name, error = %err, "archive rejected");
                Expansion {
                    files: vec![SourceFile::rejected(archive_name, &bytes, err)],
                    skipped: Vec::new(),
                }
            }
        }
    }

    fn unpack_zip(&self, archive_name: &str, bytes: &[u8]) -> Result<Expansion, LoadError> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
            .map_err(|e| LoadError::corrupt("zip", e))?;

        // Validate every entry before reading any of them.
        let mut total: u64 = 0;
        let mut total_compressed: u64 = 0;
        for i in 0..archive.len() {
            let entry = archive
                .by_index_raw(i)
                .map_err(|e| LoadError::corrupt("zip", e))?;
            if entry.enclosed_name().is_none() {
                return Err(LoadError::UnsafeArchive(entry.name().to_string()));
            }
            if entry.size() > self.limits.max_entry_bytes {
                return Err(LoadError::ArchiveTooLarge(format!(
                    "{} is {} bytes, limit {}",
                    entry.name(),
                    entry.size(),
                    self.limits.max_entry_bytes
                )));
            }
            total = total.saturating_add(entry.size());
            total_compressed = total_compressed.saturating_add(entry.compressed_size());
        }
        if total > self.limits.max_archive_bytes {
            return Err(LoadError::ArchiveTooLarge(format!(
                "{} bytes uncompressed, limit {}",
                total, self.limits.max_archive_bytes
            )));
        }
        if total >= RATIO_CHECK_FLOOR {
            let ratio = total / total_compressed.max(1);
            if ratio > self.limits.max_compression_ratio {
                return Err(LoadError::ArchiveTooLarge(format!(
                    "compression ratio {} exceeds {} (possible zip bomb)",
                    ratio, self.limits.max_compression_ratio
                )));
            }
        }

        let mut expansion = Expansion::default();
        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| LoadError::corrupt("zip", e))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().replace('\\', "/");
            if is_system_entry(&name) {
                continue;
            }
            if is_archive(&name) {
                expansion.skipped.push(SkippedEntry {
                    name,
                    reason: "nested archive".to_string(),
                });
                continue;
            }
            if FormatTag::from_filename(&name).is_none() {
                expansion.skipped.push(SkippedEntry {
                    name,
                    reason: "unsupported format".to_string(),
                });
                continue;
            }

            // Header sizes can lie; enforce the limit while reading too.
            let mut data = Vec::new();
            (&mut entry)
                .take(self.limits.max_entry_bytes + 1)
                .read_to_end(&mut data)
                .map_err(|e| LoadError::corrupt("zip", e))?;
            if data.len() as u64 > self.limits.max_entry_bytes {
                return Err(LoadError::ArchiveTooLarge(format!(
                    "{} exceeds {} bytes",
                    name, self.limits.max_entry_bytes
                )));
            }

            let mut file = SourceFile::from_bytes(&name, data);
            file.archive_source = Some(archive_name.to_string());
            expansion.files.push(file);
        }
        Ok(expansion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::tests::build_zip;

    #[test]
    fn test_text_file_is_one_page() {
        let file = SourceFile::from_bytes("law.txt", b"Article 1. Scope.".to_vec());
        let pages: Vec<PageUnit> = file.pages().unwrap().collect();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page, 1);
        assert_eq!(pages[0].source_hash, file.content_hash);
        assert_eq!(pages[0].text, "Article 1. Scope.");
    }

    #[test]
    fn test_hash_depends_only_on_bytes() {
        let a = SourceFile::from_bytes("a.txt", b"same".to_vec());
        let b = SourceFile::from_bytes("b.md", b"same".to_vec());
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.content_hash.len(), 64);
    }

    #[test]
    fn test_unsupported_top_level_file_fails_on_pages() {
        let expansion = Loader::default().expand_bytes("memo.doc", b"binary".to_vec());
        assert_eq!(expansion.files.len(), 1);
        let err = expansion.files[0].pages().err().unwrap();
        assert!(matches!(err, LoadError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_zip_members_skip_system_nested_and_unsupported() {
        let zip = build_zip(&[
            ("a.txt", "content"),
            ("docs/b.md", "# Title"),
            ("__MACOSX/._a.txt", "junk"),
            (".DS_Store", "junk"),
            ("inner.zip", "PK\u{3}\u{4}"),
            ("ignored.bin", "x"),
        ]);
        let expansion = Loader::default().expand_bytes("bundle.zip", zip);

        let names: Vec<&str> = expansion.files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "docs/b.md"]);
        assert!(expansion
            .files
            .iter()
            .all(|f| f.archive_source.as_deref() == Some("bundle.zip")));

        let skipped: Vec<&str> = expansion.skipped.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(skipped, vec!["inner.zip", "ignored.bin"]);
    }

    #[test]
    fn test_zip_slip_rejects_archive() {
        let zip = build_zip(&[("../evil.txt", "x"), ("ok.txt", "fine")]);
        let expansion = Loader::default().expand_bytes("bad.zip", zip);
        assert_eq!(expansion.files.len(), 1);
        assert_eq!(expansion.files[0].filename, "bad.zip");
        assert!(matches!(
            expansion.files[0].defect,
            Some(LoadError::UnsafeArchive(_))
        ));
    }

    #[test]
    fn test_zip_bomb_ratio_rejects_archive() {
        let zeros = "0".repeat(2 * 1024 * 1024);
        let zip = build_zip(&[("big.txt", zeros.as_str())]);
        let expansion = Loader::default().expand_bytes("bomb.zip", zip);
        assert_eq!(expansion.files.len(), 1);
        assert!(matches!(
            expansion.files[0].defect,
            Some(LoadError::ArchiveTooLarge(_))
        ));
    }

    #[test]
    fn test_entry_size_limit() {
        let zip = build_zip(&[("a.txt", "0123456789")]);
        let loader = Loader::new(LoaderLimits {
            max_archive_bytes: 1024,
            max_entry_bytes: 4,
            max_compression_ratio: 100,
        });
        let expansion = loader.expand_bytes("small.zip", zip);
        assert!(matches!(
            expansion.files[0].defect,
            Some(LoadError::ArchiveTooLarge(_))
        ));
    }

    #[test]
    fn test_corrupt_zip_is_single_failed_file() {
        let expansion = Loader::default().expand_bytes("broken.zip", b"not a zip".to_vec());
        assert_eq!(expansion.files.len(), 1);
        assert!(matches!(
            expansion.files[0].defect,
            Some(LoadError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_directory_walk_skips_hidden_and_system() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::write(root.join("ok.txt"), "ok").unwrap();
        std::fs::write(root.join(".DS_Store"), "x").unwrap();
        std::fs::write(root.join("notes.bin"), "x").unwrap();
        std::fs::create_dir(root.join("__MACOSX")).unwrap();
        std::fs::write(root.join("__MACOSX").join("inner.txt"), "skip").unwrap();
        std::fs::create_dir(root.join(".hidden")).unwrap();
        std::fs::write(root.join(".hidden").join("a.txt"), "skip").unwrap();
        std::fs::create_dir(root.join("sub")).unwrap();
        std::fs::write(root.join("sub").join("b.md"), "b").unwrap();

        let expansion = Loader::default().expand_path(root).unwrap();
        let names: Vec<&str> = expansion.files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["ok.txt", "sub/b.md"]);
        assert_eq!(expansion.skipped.len(), 1);
        assert_eq!(expansion.skipped[0].name, "notes.bin");
    }

    #[test]
    fn test_missing_path_is_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(Loader::default()
            .expand_path(&tmp.path().join("missing"))
            .is_err());
    }
}
