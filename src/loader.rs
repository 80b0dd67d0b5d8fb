//! Document loading: a file path to page-level text.
//!
//! PDFs are split by page with `pdf-extract`; `.txt` and `.md` files become
//! a single page 0. The document's source identifier is its file name.

use std::path::Path;

use crate::error::LoadError;
use crate::models::{Document, Page};

/// Extensions [`FileLoader`] accepts (lowercase, no dot).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "txt", "md"];

pub trait DocumentLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Document, LoadError>;
}

/// Loader for local PDF and plain-text files.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileLoader;

impl DocumentLoader for FileLoader {
    fn load(&self, path: &Path) -> Result<Document, LoadError> {
        let ext = extension(path).ok_or_else(|| LoadError::Unsupported(path.to_path_buf()))?;
        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let pages = match ext.as_str() {
            "pdf" => pdf_pages(&bytes)?,
            "txt" | "md" => vec![Page {
                number: 0,
                text: String::from_utf8_lossy(&bytes).into_owned(),
            }],
            _ => return Err(LoadError::Unsupported(path.to_path_buf())),
        };

        Ok(Document {
            source: source_name(path),
            pages,
        })
    }
}

fn pdf_pages(bytes: &[u8]) -> Result<Vec<Page>, LoadError> {
    let texts = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| LoadError::Pdf(e.to_string()))?;
    Ok(texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| Page {
            number: i as i64,
            text,
        })
        .collect())
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Whether [`FileLoader`] can read `path`, judged by extension.
pub fn is_supported(path: &Path) -> bool {
    extension(path)
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.as_str()))
        .unwrap_or(false)
}

/// File name used as the chunk source identifier.
pub fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_by_extension() {
        assert!(is_supported(Path::new("a/b.PDF")));
        assert!(is_supported(Path::new("notes.md")));
        assert!(!is_supported(Path::new("image.png")));
        assert!(!is_supported(Path::new("Makefile")));
    }

    #[test]
    fn text_file_is_single_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello pages").unwrap();

        let doc = FileLoader.load(&path).unwrap();
        assert_eq!(doc.source, "notes.txt");
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.pages[0].number, 0);
        assert_eq!(doc.pages[0].text, "hello pages");
    }

    #[test]
    fn unsupported_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("x.png");
        std::fs::write(&png, [0u8; 4]).unwrap();
        assert!(matches!(FileLoader.load(&png), Err(LoadError::Unsupported(_))));
        assert!(matches!(
            FileLoader.load(&dir.path().join("gone.txt")),
            Err(LoadError::Io { .. })
        ));
    }

    #[test]
    fn invalid_pdf_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"not a pdf").unwrap();
        assert!(matches!(FileLoader.load(&path), Err(LoadError::Pdf(_))));
    }
}
