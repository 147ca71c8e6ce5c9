use common::utils::config::AppConfig;

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub search_top_k: usize,
    pub chat_top_k: usize,
    /// Code points kept in a chat document reference preview.
    pub preview_chars: usize,
    pub max_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search_top_k: 5,
            chat_top_k: 5,
            preview_chars: 200,
            max_top_k: 50,
        }
    }
}

impl RetrievalConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            search_top_k: config.search_top_k.max(1),
            chat_top_k: config.chat_top_k.max(1),
            ..Self::default()
        }
    }
}
