//! Replay provider: serves recorded responses in order.
//!
//! The first call gets the first response (the primary fetch), later calls
//! get the following ones (top-ups). A recorded response is either a JSON
//! value or raw model text; for text, the JSON is pulled out of a fenced
//! code block or the outermost array/object before decoding.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::Path;
use tokio::sync::Mutex;

use super::{ProviderHealth, RecommendationProvider};
use crate::error::{ProviderError, ProviderResult};
use crate::models::Recommendation;

/// Recorded responses, consumed front to back.
#[derive(Debug)]
pub struct ReplayProvider {
    name: String,
    responses: Mutex<VecDeque<Value>>,
}

/// Object-shaped responses: `{"recommendations": [...]}`.
#[derive(Deserialize)]
struct Wrapped {
    recommendations: Vec<Recommendation>,
}

impl ReplayProvider {
    pub fn new(responses: Vec<Value>) -> Self {
        Self {
            name: "replay".to_string(),
            responses: Mutex::new(responses.into()),
        }
    }

    /// Load a JSON array of recorded responses.
    pub async fn from_file(path: &Path) -> ProviderResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ProviderError::RequestFailed(format!("{}: {}", path.display(), e)))?;
        let responses: Vec<Value> = serde_json::from_str(&content)
            .map_err(|e| ProviderError::InvalidResponse(format!("{}: {}", path.display(), e)))?;
        Ok(Self::new(responses))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub async fn remaining(&self) -> usize {
        self.responses.lock().await.len()
    }
}

#[async_trait]
impl RecommendationProvider for ReplayProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_recommendations(&self, _prompt: &str) -> ProviderResult<Vec<Recommendation>> {
        let next = self.responses.lock().await.pop_front();
        match next {
            Some(Value::String(text)) => parse_recommendations(&text),
            Some(value) => decode(value),
            None => Err(ProviderError::Exhausted(format!(
                "{} has no recorded responses left",
                self.name
            ))),
        }
    }

    async fn test_connection(&self) -> ProviderHealth {
        if self.remaining().await > 0 {
            ProviderHealth::healthy()
        } else {
            ProviderHealth::unhealthy("no recorded responses left")
        }
    }
}

/// Decode recommendations from raw model output.
pub fn parse_recommendations(text: &str) -> ProviderResult<Vec<Recommendation>> {
    let json = extract_json(text);
    let value: Value =
        serde_json::from_str(json).map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
    decode(value)
}

fn decode(value: Value) -> ProviderResult<Vec<Recommendation>> {
    let result = if value.is_array() {
        serde_json::from_value::<Vec<Recommendation>>(value)
    } else {
        serde_json::from_value::<Wrapped>(value).map(|w| w.recommendations)
    };
    result.map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

/// Extract JSON from text that may be wrapped in markdown code blocks.
fn extract_json(text: &str) -> &str {
    // Fenced block, with or without a language tag
    if let Some(start) = text.find("```") {
        let after_fence = start + 3;
        let content_start = text[after_fence..]
            .find('\n')
            .map(|i| after_fence + i + 1)
            .unwrap_or(after_fence);
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    // Outermost array or object, whichever opens first
    let open = text.find(['[', '{']);
    if let Some(start) = open {
        let close = if text[start..].starts_with('[') { ']' } else { '}' };
        if let Some(end) = text.rfind(close) {
            if start < end {
                return &text[start..=end];
            }
        }
    }

    text.trim()
}
