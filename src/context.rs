use std::sync::Arc;

use crate::api::{ApiError, HttpStudioApi, StudioApi};
use crate::config::AppConfig;
use crate::core::tracker::Tracker;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub api: Arc<dyn StudioApi>,
}

impl AppContext {
    /// Context talking to the configured server over HTTP.
    pub fn new(config: AppConfig) -> Result<Self, ApiError> {
        let api = HttpStudioApi::new(&config.server_url, config.request_timeout())?;
        Ok(Self::with_api(config, Arc::new(api)))
    }

    pub fn with_api(config: AppConfig, api: Arc<dyn StudioApi>) -> Self {
        Self {
            config: Arc::new(config),
            api,
        }
    }

    pub fn tracker(&self) -> Tracker {
        Tracker::new(self.api.clone())
    }
}
