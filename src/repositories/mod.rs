pub mod chunk_repository;

pub use chunk_repository::{ChunkRepository, MongoChunkRepository};
