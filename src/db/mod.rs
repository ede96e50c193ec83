use std::time::Duration;

use mongodb::{
    bson::doc,
    options::{ClientOptions, ServerApi, ServerApiVersion},
    Client, Collection,
};

use crate::{config::Config, errors::AppResult, models::domain::DocumentChunk};

const APP_NAME: &str = "quizgen";

/// Handle on the chunk store filled by the indexing service. Nothing in this
/// crate writes documents to it.
#[derive(Clone)]
pub struct Database {
    client: Client,
    db_name: String,
    chunks_collection: String,
}

impl Database {
    pub async fn connect(config: &Config) -> AppResult<Self> {
        let mut options = ClientOptions::parse(&config.mongo_conn_string).await?;
        apply_read_settings(&mut options);

        let database = Self {
            client: Client::with_options(options)?,
            db_name: config.mongo_db_name.clone(),
            chunks_collection: config.chunks_collection.clone(),
        };
        database.ping().await?;

        log::info!(
            "Connected to chunk store {}.{}",
            database.db_name,
            database.chunks_collection
        );
        Ok(database)
    }

    pub fn chunks(&self) -> Collection<DocumentChunk> {
        self.client
            .database(&self.db_name)
            .collection(&self.chunks_collection)
    }

    pub async fn ping(&self) -> AppResult<()> {
        self.client
            .database(&self.db_name)
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok(())
    }
}

fn apply_read_settings(options: &mut ClientOptions) {
    options.app_name = Some(APP_NAME.to_string());
    options.server_api = Some(ServerApi::builder().version(ServerApiVersion::V1).build());
    options.retry_reads = Some(true);
    options.max_pool_size = Some(10);
    options.connect_timeout = Some(Duration::from_secs(5));
    options.server_selection_timeout = Some(Duration::from_secs(5));
}
