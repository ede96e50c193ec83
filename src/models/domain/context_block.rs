use serde::{Deserialize, Serialize};

/// A chunk as stored by the upstream indexer.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct DocumentChunk {
    pub document_id: String,
    pub chunk_index: u32,
    pub text: String,
}

impl DocumentChunk {
    pub fn new(document_id: &str, chunk_index: u32, text: &str) -> Self {
        DocumentChunk {
            document_id: document_id.to_string(),
            chunk_index,
            text: text.to_string(),
        }
    }
}

/// A curated excerpt handed to the model. Ids are only stable within one
/// generation request.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ContextBlock {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub char_len: usize,
}

impl ContextBlock {
    pub fn new(sequence: usize, document_id: &str, text: String) -> Self {
        let char_len = text.chars().count();
        ContextBlock {
            id: Self::block_id(sequence),
            document_id: document_id.to_string(),
            text,
            char_len,
        }
    }

    /// `1 -> "c0001"`. Sequences start at one.
    pub fn block_id(sequence: usize) -> String {
        format!("c{:04}", sequence)
    }
}
