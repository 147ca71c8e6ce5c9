use common::utils::config::AppConfig;

#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub chunk_size: i64,
    pub chunk_overlap: i64,
    /// Points sent to the vector index per upsert call.
    pub point_batch_size: usize,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            point_batch_size: 256,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestionConfig {
    pub tuning: IngestionTuning,
}

impl IngestionConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            tuning: IngestionTuning {
                chunk_size: config.chunk_size,
                chunk_overlap: config.chunk_overlap,
                ..IngestionTuning::default()
            },
        }
    }
}
