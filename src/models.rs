use std::collections::HashMap;

use tracing::warn;

use crate::api::ApiClient;
use crate::types::LlmModel;

/// Configured predictors with a `name -> display_name` lookup.
#[derive(Debug, Clone, Default)]
pub struct ModelDirectory {
    models: Vec<LlmModel>,
    display: HashMap<String, String>,
}

impl ModelDirectory {
    pub fn new(models: Vec<LlmModel>) -> Self {
        let display = models
            .iter()
            .map(|m| (m.name.clone(), m.display_name.clone()))
            .collect();
        Self { models, display }
    }

    /// Load every configured model. On failure the directory is empty and
    /// names fall back to their raw keys.
    pub async fn load(api: &ApiClient) -> Self {
        match api.models(None).await {
            Ok(models) => Self::new(models),
            Err(e) => {
                warn!("Failed to load models: {e}");
                Self::default()
            }
        }
    }

    pub fn models(&self) -> &[LlmModel] {
        &self.models
    }

    pub fn enabled(&self) -> impl Iterator<Item = &LlmModel> {
        self.models.iter().filter(|m| m.enabled)
    }

    /// Display name for a model key, or the key itself if unknown.
    pub fn display_name<'a>(&'a self, model: &'a str) -> &'a str {
        self.display.get(model).map_or(model, String::as_str)
    }
}
