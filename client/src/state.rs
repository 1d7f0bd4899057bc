use crate::client::SyncClient;
use crate::config::AppConfig;
use std::sync::Arc;

pub struct AppState {
    config: AppConfig,
    client: SyncClient,
}

impl AppState {
    pub fn new(config: AppConfig, client: SyncClient) -> Arc<Self> {
        Arc::new(Self { config, client })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn client(&self) -> &SyncClient {
        &self.client
    }

    pub fn build_id(&self) -> &str {
        &self.config.build_id
    }
}
