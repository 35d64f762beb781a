use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::local_store::KeyValueStore;
use crate::models::PipelineResult;

pub const DRAFT_PREFIX: &str = "content_pipeline_draft_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub results: PipelineResult,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

/// `content_pipeline_draft_` + topic with every non-alphanumeric character replaced by `_`,
/// lowercased.
pub fn draft_key(topic: &str) -> String {
    let sanitized: String = topic
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}{}", DRAFT_PREFIX, sanitized.to_lowercase())
}

/// Local snapshots of in-progress edits, one per topic. Never talks to the post store.
#[derive(Clone)]
pub struct DraftCache {
    kv: Arc<dyn KeyValueStore>,
}

impl DraftCache {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        DraftCache { kv }
    }

    pub fn save(&self, topic: &str, results: &PipelineResult) -> Result<Draft> {
        let draft = Draft {
            results: results.clone(),
            timestamp: Utc::now().timestamp_millis(),
        };
        self.kv.set(&draft_key(topic), &serde_json::to_string(&draft)?)?;
        info!("Saved draft for '{}'", topic);
        Ok(draft)
    }

    /// A stored entry that no longer parses is deleted and reported as no draft.
    pub fn load(&self, topic: &str) -> Result<Option<Draft>> {
        let key = draft_key(topic);
        let Some(raw) = self.kv.get(&key)? else {
            return Ok(None);
        };
        match serde_json::from_str::<Draft>(&raw) {
            Ok(draft) => Ok(Some(draft)),
            Err(e) => {
                warn!("Removing corrupt draft {}: {}", key, e);
                self.kv.remove(&key)?;
                Ok(None)
            }
        }
    }

    pub fn discard(&self, topic: &str) -> Result<()> {
        self.kv.remove(&draft_key(topic))
    }
}
