//! Cross-cutting payment observability
//!
//! Correlation-id generation, cache-backed status-change history, and
//! metadata merging live behind one capability injected into the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::{keys, CacheManager};
use crate::common::{self, Clock};
use crate::payment::validation;
use crate::Result;

const HISTORY_LIMIT: usize = 50;
const HISTORY_TTL: Duration = Duration::from_secs(24 * 3600);

/// One recorded status change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: String,
    pub to: String,
    pub note: String,
    pub changed_at: DateTime<Utc>,
}

/// Observability capability handed to the payment engine
#[derive(Clone)]
pub struct PaymentObservability {
    cache: CacheManager,
    clock: Arc<dyn Clock>,
}

impl PaymentObservability {
    pub fn new(cache: CacheManager, clock: Arc<dyn Clock>) -> Self {
        Self { cache, clock }
    }

    pub fn generate_correlation_id(&self) -> String {
        common::generate_correlation_id()
    }

    /// Record one status change in the rolling per-payment history
    ///
    /// Best-effort: history lives in the cache and losing it is fine.
    pub async fn track_status_change(
        &self,
        payment_id: Uuid,
        from: &str,
        to: &str,
        note: impl Into<String>,
    ) {
        let key = keys::payment_history(payment_id);
        let mut history: Vec<StatusChange> =
            self.cache.get_quiet(&key).await.unwrap_or_default();

        history.push(StatusChange {
            from: from.to_string(),
            to: to.to_string(),
            note: note.into(),
            changed_at: self.clock.now(),
        });

        if history.len() > HISTORY_LIMIT {
            let excess = history.len() - HISTORY_LIMIT;
            history.drain(..excess);
        }

        self.cache.set_quiet(&key, &history, HISTORY_TTL).await;
    }

    /// Rolling status history for a payment, oldest first
    pub async fn status_history(&self, payment_id: Uuid) -> Vec<StatusChange> {
        self.cache
            .get_quiet(&keys::payment_history(payment_id))
            .await
            .unwrap_or_default()
    }

    /// Merge a metadata update into the stored value, enforcing the
    /// serialized-size cap
    pub fn merge_metadata(
        &self,
        existing: &serde_json::Value,
        update: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let mut merged = match existing {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };

        for (key, value) in update {
            if value.is_null() {
                merged.remove(key);
            } else {
                merged.insert(key.clone(), value.clone());
            }
        }

        let merged = serde_json::Value::Object(merged);
        validation::validate_metadata_size(&merged)?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SystemClock;
    use crate::models::MAX_METADATA_BYTES;
    use serde_json::json;

    fn observability() -> PaymentObservability {
        PaymentObservability::new(CacheManager::disabled(), Arc::new(SystemClock))
    }

    #[test]
    fn test_merge_overrides_and_removes() {
        let obs = observability();
        let existing = json!({"order": "123", "note": "first"});
        let mut update = serde_json::Map::new();
        update.insert("note".to_string(), json!("second"));
        update.insert("extra".to_string(), json!(true));
        update.insert("order".to_string(), serde_json::Value::Null);

        let merged = obs.merge_metadata(&existing, &update).unwrap();
        assert_eq!(merged["note"], "second");
        assert_eq!(merged["extra"], true);
        assert!(merged.get("order").is_none());
    }

    #[test]
    fn test_merge_enforces_cap() {
        let obs = observability();
        let existing = json!({});
        let mut update = serde_json::Map::new();
        update.insert(
            "blob".to_string(),
            json!("x".repeat(MAX_METADATA_BYTES + 1)),
        );

        assert!(obs.merge_metadata(&existing, &update).is_err());
    }

    #[test]
    fn test_merge_replaces_non_object_existing() {
        let obs = observability();
        let merged = obs
            .merge_metadata(&json!(null), &serde_json::Map::new())
            .unwrap();
        assert_eq!(merged, json!({}));
    }

    #[tokio::test]
    async fn test_history_is_empty_without_cache() {
        let obs = observability();
        let id = Uuid::new_v4();
        obs.track_status_change(id, "pending", "captured", "charge").await;
        // Disabled cache keeps nothing
        assert!(obs.status_history(id).await.is_empty());
    }
}
