//! Fixed-window character chunker.
//!
//! Splits each page into overlapping windows of `window` characters,
//! advancing `window - overlap` characters at a time. No attempt is made to
//! respect word or paragraph boundaries.
//!
//! Chunk indices restart at 0 whenever `(source, page)` changes, so a
//! [`ChunkId`](crate::models::ChunkId) depends only on a chunk's position and
//! is stable across re-ingestion of an unchanged document.

use crate::models::{Chunk, Document};

/// Split one page into overlapping character windows.
///
/// Counts `char`s, not bytes. Blank text yields no windows. Panics never;
/// an `overlap >= window` is treated as no overlap.
pub fn split_text(text: &str, window: usize, overlap: usize) -> Vec<String> {
    if text.trim().is_empty() || window == 0 {
        return Vec::new();
    }
    let step = if overlap < window { window - overlap } else { window };

    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + window).min(chars.len());
        out.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    out
}

/// Assign `(source, page)`-local indices to a flat sequence of windows.
pub fn index_chunks<I>(pieces: I) -> Vec<Chunk>
where
    I: IntoIterator<Item = (String, i64, String)>,
{
    let mut chunks: Vec<Chunk> = Vec::new();
    for (source, page, text) in pieces {
        let index = match chunks.last() {
            Some(prev) if prev.source == source && prev.page == page => prev.index + 1,
            _ => 0,
        };
        chunks.push(Chunk {
            source,
            page,
            index,
            text,
        });
    }
    chunks
}

/// Chunk every page of `doc` in page order.
pub fn split_document(doc: &Document, window: usize, overlap: usize) -> Vec<Chunk> {
    index_chunks(doc.pages.iter().flat_map(|page| {
        split_text(&page.text, window, overlap)
            .into_iter()
            .map(move |text| (doc.source.clone(), page.number, text))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Page;

    fn doc(pages: &[&str]) -> Document {
        Document {
            source: "f".to_string(),
            pages: pages
                .iter()
                .enumerate()
                .map(|(i, t)| Page {
                    number: i as i64,
                    text: t.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn short_text_single_window() {
        assert_eq!(split_text("hello", 800, 80), vec!["hello".to_string()]);
    }

    #[test]
    fn blank_text_no_windows() {
        assert!(split_text("", 800, 80).is_empty());
        assert!(split_text(" \n\t ", 800, 80).is_empty());
    }

    #[test]
    fn windows_overlap_by_configured_amount() {
        let text: String = (0..2000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let windows = split_text(&text, 800, 80);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].chars().count(), 800);
        assert_eq!(windows[1].chars().count(), 800);
        assert_eq!(windows[2].chars().count(), 560);
        assert_eq!(&windows[0][720..], &windows[1][..80]);
        assert_eq!(&windows[1][720..], &windows[2][..80]);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "文".repeat(10);
        let windows = split_text(&text, 4, 1);
        assert_eq!(windows[0], "文文文文");
        assert!(windows.iter().all(|w| w.chars().count() <= 4));
        assert_eq!(windows.len(), 3);
    }

    #[test]
    fn ids_restart_per_page() {
        let page0 = "x".repeat(2000);
        let chunks = split_document(&doc(&[&page0, "short page"]), 800, 80);
        let ids: Vec<String> = chunks.iter().map(|c| c.id().into_string()).collect();
        assert_eq!(ids, vec!["f:0:0", "f:0:1", "f:0:2", "f:1:0"]);
    }

    #[test]
    fn blank_page_is_skipped_but_numbering_kept() {
        let chunks = split_document(&doc(&["a", "  ", "b"]), 800, 80);
        let ids: Vec<String> = chunks.iter().map(|c| c.id().into_string()).collect();
        assert_eq!(ids, vec!["f:0:0", "f:2:0"]);
    }

    #[test]
    fn index_restarts_when_source_changes() {
        let chunks = index_chunks(vec![
            ("a".to_string(), 0, "1".to_string()),
            ("a".to_string(), 0, "2".to_string()),
            ("b".to_string(), 0, "3".to_string()),
            ("a".to_string(), 0, "4".to_string()),
        ]);
        let idx: Vec<u32> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(idx, vec![0, 1, 0, 0]);
    }

    #[test]
    fn deterministic() {
        let d = doc(&[&"lorem ipsum ".repeat(300)]);
        assert_eq!(split_document(&d, 800, 80), split_document(&d, 800, 80));
    }
}
