//! Retrieval and prompt construction.
//!
//! The query is embedded with the same [`Embedder`] used at ingestion time;
//! vectors from different models are not comparable, so callers must pass
//! the store's own embedder.

use crate::embedding::{embed_query, Embedder};
use crate::error::PipelineError;
use crate::models::ScoredRecord;
use crate::store::VectorStore;

/// Context line used when nothing was retrieved.
pub const NO_CONTEXT: &str = "No relevant context found.";

const SYSTEM_INSTRUCTION: &str = "You are a helpful AI assistant. Use the following context to answer the user's query as accurately as possible.";

/// The `k` records nearest to `query`, ascending by distance.
pub async fn retrieve(
    store: &VectorStore,
    embedder: &dyn Embedder,
    query: &str,
    k: i64,
) -> Result<Vec<ScoredRecord>, PipelineError> {
    if k <= 0 {
        return Ok(Vec::new());
    }
    let vector = embed_query(embedder, query).await?;
    let records = store.query(&vector, k).await?;
    tracing::debug!(hits = records.len(), k, "retrieved context");
    Ok(records)
}

/// Render retrieved records as `Source, Page` blocks, in the given order.
pub fn format_context(records: &[ScoredRecord]) -> String {
    if records.is_empty() {
        return NO_CONTEXT.to_string();
    }
    records
        .iter()
        .map(|r| format!("Source: {}, Page: {}:\n{}", r.source, r.page, r.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Compose the augmented prompt sent to the generation model.
pub fn build_prompt(query: &str, records: &[ScoredRecord]) -> String {
    format!(
        "### System Instruction:\n{}\n\n### Retrieved Context:\n{}\n\n### Current Conversation:\nUser: {}\n\n### Assistant Response:\n",
        SYSTEM_INSTRUCTION,
        format_context(records),
        query
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source: &str, page: i64, text: &str, distance: f32) -> ScoredRecord {
        ScoredRecord {
            id: format!("{}:{}:0", source, page),
            text: text.to_string(),
            source: source.to_string(),
            page,
            distance,
        }
    }

    #[test]
    fn empty_context_uses_fallback() {
        let prompt = build_prompt("what?", &[]);
        assert!(prompt.contains("### Retrieved Context:\nNo relevant context found.\n"));
        assert!(prompt.contains("User: what?"));
        assert!(prompt.ends_with("### Assistant Response:\n"));
    }

    #[test]
    fn blocks_keep_store_order() {
        let records = vec![
            record("b.pdf", 2, "closest", 0.1),
            record("a.pdf", 0, "further", 0.4),
        ];
        let ctx = format_context(&records);
        assert_eq!(
            ctx,
            "Source: b.pdf, Page: 2:\nclosest\n\nSource: a.pdf, Page: 0:\nfurther"
        );
        let prompt = build_prompt("q", &records);
        assert!(prompt.find("closest").unwrap() < prompt.find("further").unwrap());
    }

    #[test]
    fn sections_in_order() {
        let p = build_prompt("q", &[]);
        let idx = |s: &str| p.find(s).unwrap();
        assert!(idx("### System Instruction:") < idx("### Retrieved Context:"));
        assert!(idx("### Retrieved Context:") < idx("### Current Conversation:"));
        assert!(idx("### Current Conversation:") < idx("### Assistant Response:"));
    }
}
