use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    config::Config,
    errors::{AppError, AppResult},
    models::domain::{ContextBlock, DocumentChunk},
    repositories::ChunkRepository,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextLimits {
    /// Most chunks admitted from any single document.
    pub per_document_cap: usize,
    /// Total characters across all admitted blocks.
    pub char_budget: usize,
    /// Each chunk is cut to this many characters before admission.
    pub clip_chars: usize,
}

impl ContextLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            per_document_cap: config.context_per_document_cap,
            char_budget: config.context_char_budget,
            clip_chars: config.context_clip_chars,
        }
    }
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            per_document_cap: 6,
            char_budget: 12_000,
            clip_chars: 700,
        }
    }
}

pub struct ContextBuilder {
    repository: Arc<dyn ChunkRepository>,
    limits: ContextLimits,
}

impl ContextBuilder {
    pub fn new(repository: Arc<dyn ChunkRepository>, limits: ContextLimits) -> Self {
        Self { repository, limits }
    }

    pub fn limits(&self) -> ContextLimits {
        self.limits
    }

    /// Fetches chunks for `doc_ids` and curates them into context blocks.
    /// No usable chunk at all is an error, never an empty context.
    pub async fn build(&self, doc_ids: &[String]) -> AppResult<Vec<ContextBlock>> {
        let chunks = self.repository.fetch_chunks(doc_ids).await?;
        let fetched = chunks.len();

        let blocks = curate_blocks(chunks, &self.limits);
        if blocks.is_empty() {
            return Err(AppError::EmptyContext(format!(
                "no usable chunks for documents [{}] ({} fetched)",
                doc_ids.join(", "),
                fetched
            )));
        }

        log::info!(
            "Curated {} context blocks ({} chars) from {} chunks",
            blocks.len(),
            blocks.iter().map(|b| b.char_len).sum::<usize>(),
            fetched
        );
        Ok(blocks)
    }
}

/// Pure curation step: per-document cap, clip, then global budget. Chunks are
/// expected in document order then chunk order. The same input always yields
/// the same blocks and ids.
pub fn curate_blocks(chunks: Vec<DocumentChunk>, limits: &ContextLimits) -> Vec<ContextBlock> {
    let mut blocks: Vec<ContextBlock> = Vec::new();
    let mut taken_per_document: HashMap<String, usize> = HashMap::new();
    let mut used_chars = 0usize;

    for chunk in chunks {
        let trimmed = chunk.text.trim();
        if trimmed.is_empty() {
            continue;
        }

        let taken = taken_per_document
            .entry(chunk.document_id.clone())
            .or_insert(0);
        if *taken >= limits.per_document_cap {
            continue;
        }

        let text = clip_chars(trimmed, limits.clip_chars);
        let len = text.chars().count();
        if len == 0 {
            continue;
        }
        if used_chars + len > limits.char_budget {
            log::debug!(
                "Context budget of {} chars reached after {} blocks",
                limits.char_budget,
                blocks.len()
            );
            break;
        }

        *taken += 1;
        used_chars += len;
        blocks.push(ContextBlock::new(blocks.len() + 1, &chunk.document_id, text));
    }

    blocks
}

fn clip_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].trim_end().to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::chunk_repository::MockChunkRepository;

    fn limits(per_document_cap: usize, char_budget: usize, clip_chars: usize) -> ContextLimits {
        ContextLimits {
            per_document_cap,
            char_budget,
            clip_chars,
        }
    }

    #[test]
    fn test_curate_assigns_sequential_ids_in_admission_order() {
        let chunks = vec![
            DocumentChunk::new("doc-1", 0, "first"),
            DocumentChunk::new("doc-1", 1, "second"),
            DocumentChunk::new("doc-2", 0, "third"),
        ];

        let blocks = curate_blocks(chunks, &ContextLimits::default());
        let ids: Vec<&str> = blocks.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["c0001", "c0002", "c0003"]);
        assert_eq!(blocks[2].document_id, "doc-2");
    }

    #[test]
    fn test_curate_applies_per_document_cap_without_starving_others() {
        let mut chunks: Vec<DocumentChunk> = (0..5)
            .map(|i| DocumentChunk::new("long-doc", i, &format!("long chunk {}", i)))
            .collect();
        chunks.push(DocumentChunk::new("short-doc", 0, "short chunk"));

        let blocks = curate_blocks(chunks, &limits(2, 10_000, 700));
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].text, "long chunk 0");
        assert_eq!(blocks[1].text, "long chunk 1");
        assert_eq!(blocks[2].document_id, "short-doc");
        assert_eq!(blocks[2].id, "c0003");
    }

    #[test]
    fn test_curate_stops_once_budget_would_be_exceeded() {
        let chunks = vec![
            DocumentChunk::new("doc-1", 0, &"a".repeat(40)),
            DocumentChunk::new("doc-1", 1, &"b".repeat(40)),
            DocumentChunk::new("doc-1", 2, &"c".repeat(10)),
        ];

        let blocks = curate_blocks(chunks, &limits(10, 60, 700));
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].char_len, 40);
    }

    #[test]
    fn test_curate_clips_on_character_boundaries() {
        let text = "é".repeat(10);
        let chunks = vec![DocumentChunk::new("doc-1", 0, &text)];

        let blocks = curate_blocks(chunks, &limits(10, 1_000, 4));
        assert_eq!(blocks[0].text, "éééé");
        assert_eq!(blocks[0].char_len, 4);
    }

    #[test]
    fn test_curate_skips_blank_chunks() {
        let chunks = vec![
            DocumentChunk::new("doc-1", 0, "   \n"),
            DocumentChunk::new("doc-1", 1, "real text"),
        ];

        let blocks = curate_blocks(chunks, &ContextLimits::default());
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].id, "c0001");
    }

    #[test]
    fn test_curate_is_idempotent() {
        let chunks = vec![
            DocumentChunk::new("doc-1", 0, "Photosynthesis converts light energy."),
            DocumentChunk::new("doc-2", 0, "Chlorophyll absorbs red and blue light."),
        ];

        let first = curate_blocks(chunks.clone(), &ContextLimits::default());
        let second = curate_blocks(chunks, &ContextLimits::default());
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn test_build_rejects_empty_chunk_store_response() {
        let mut repository = MockChunkRepository::new();
        repository
            .expect_fetch_chunks()
            .times(1)
            .returning(|_| Ok(Vec::new()));

        let builder = ContextBuilder::new(Arc::new(repository), ContextLimits::default());
        let err = builder
            .build(&["missing-doc".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EmptyContext(msg) if msg.contains("missing-doc")));
    }

    #[tokio::test]
    async fn test_build_passes_requested_ids_to_repository() {
        let mut repository = MockChunkRepository::new();
        repository
            .expect_fetch_chunks()
            .withf(|ids| ids.to_vec() == vec!["doc-1".to_string(), "doc-2".to_string()])
            .times(1)
            .returning(|_| Ok(vec![DocumentChunk::new("doc-1", 0, "Cells divide by mitosis.")]));

        let builder = ContextBuilder::new(Arc::new(repository), ContextLimits::default());
        let blocks = builder
            .build(&["doc-1".to_string(), "doc-2".to_string()])
            .await
            .unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "Cells divide by mitosis.");
    }
}
