use std::sync::Arc;

use crate::{
    config::Config,
    db::Database,
    errors::AppResult,
    repositories::{ChunkRepository, MongoChunkRepository},
    services::QuizGenerationService,
};

#[derive(Clone)]
pub struct AppState {
    pub quiz_generation_service: Arc<QuizGenerationService>,
    pub config: Arc<Config>,
}

impl AppState {
    pub async fn new(config: Config) -> AppResult<Self> {
        // Fail on bad provider settings before touching the database.
        config.provider_kind()?;

        let db = Database::connect(&config).await?;

        // The indexing service owns the chunk collection and its indexes.
        let chunk_repository: Arc<dyn ChunkRepository> = Arc::new(MongoChunkRepository::new(&db));

        let quiz_generation_service =
            Arc::new(QuizGenerationService::from_config(&config, chunk_repository)?);

        Ok(Self {
            quiz_generation_service,
            config: Arc::new(config),
        })
    }
}
