use std::collections::HashMap;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{bson::doc, options::FindOptions, Collection};

use crate::{db::Database, errors::AppResult, models::domain::DocumentChunk};

/// Read-only view of the chunk store populated by the indexing service.
///
/// Implementations must return chunks in the caller's document order and, per
/// document, ascending `chunk_index`. Unknown ids simply contribute nothing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    async fn fetch_chunks(&self, doc_ids: &[String]) -> AppResult<Vec<DocumentChunk>>;
}

/// Orders chunks by the position of their document in `doc_ids`, then by
/// chunk index. Chunks of documents not listed are dropped.
pub fn order_chunks(doc_ids: &[String], chunks: Vec<DocumentChunk>) -> Vec<DocumentChunk> {
    let position: HashMap<&str, usize> = doc_ids
        .iter()
        .enumerate()
        .rev()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut ordered: Vec<(usize, DocumentChunk)> = chunks
        .into_iter()
        .filter_map(|chunk| {
            position
                .get(chunk.document_id.as_str())
                .map(|pos| (*pos, chunk))
        })
        .collect();
    ordered.sort_by(|(pa, a), (pb, b)| pa.cmp(pb).then(a.chunk_index.cmp(&b.chunk_index)));
    ordered.into_iter().map(|(_, chunk)| chunk).collect()
}

pub struct MongoChunkRepository {
    collection: Collection<DocumentChunk>,
}

impl MongoChunkRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.chunks(),
        }
    }
}

#[async_trait]
impl ChunkRepository for MongoChunkRepository {
    async fn fetch_chunks(&self, doc_ids: &[String]) -> AppResult<Vec<DocumentChunk>> {
        if doc_ids.is_empty() {
            return Ok(Vec::new());
        }

        let find_options = FindOptions::builder()
            .sort(doc! { "document_id": 1, "chunk_index": 1 })
            .build();

        let cursor = self
            .collection
            .find(doc! { "document_id": { "$in": doc_ids.to_vec() } })
            .with_options(find_options)
            .await?;
        let chunks: Vec<DocumentChunk> = cursor.try_collect().await?;

        log::debug!(
            "Fetched {} chunks for {} documents",
            chunks.len(),
            doc_ids.len()
        );
        Ok(order_chunks(doc_ids, chunks))
    }
}
