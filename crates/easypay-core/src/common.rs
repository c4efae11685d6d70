//! Shared primitives: time source, identifier generation, canonical JSON

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Time source abstraction
///
/// Anything that makes time-based decisions (card expiry checks, breaker
/// recovery, retry scheduling) takes a `Clock` so tests can pin the moment.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used everywhere outside tests
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed clock for tests
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

fn short_hex(len: usize) -> String {
    let mut hex = Uuid::new_v4().simple().to_string();
    hex.truncate(len);
    hex
}

/// Merchant-facing payment identifier: `pay_` + 12 hex chars
pub fn generate_external_id() -> String {
    format!("pay_{}", short_hex(12))
}

/// Stable per-event identifier for outbound webhooks: `evt_` + 16 hex chars
pub fn generate_event_id() -> String {
    format!("evt_{}", short_hex(16))
}

/// Correlation identifier threaded from request through audit and webhooks
pub fn generate_correlation_id() -> String {
    format!("corr_{}", short_hex(12))
}

/// Serialize a JSON value with recursively sorted object keys
///
/// This is the canonical form signed by the webhook dispatcher and
/// recomputed by receivers; map iteration order must not leak into the
/// signature.
pub fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{}}}", fields)
        }
        serde_json::Value::Array(items) => {
            let rendered = items
                .iter()
                .map(canonical_json)
                .collect::<Vec<_>>()
                .join(",");
            format!("[{}]", rendered)
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_external_id_shape() {
        let id = generate_external_id();
        assert!(id.starts_with("pay_"));
        assert_eq!(id.len(), 16);
        assert!(id[4..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_event_and_correlation_id_shapes() {
        assert!(generate_event_id().starts_with("evt_"));
        assert_eq!(generate_event_id().len(), 20);
        assert!(generate_correlation_id().starts_with("corr_"));
        assert_eq!(generate_correlation_id().len(), 17);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = generate_external_id();
        let b = generate_external_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let value = json!({"b": 1, "a": {"z": true, "y": [1, 2]}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"y":[1,2],"z":true},"b":1}"#
        );
    }

    #[test]
    fn test_canonical_json_is_order_independent() {
        let first = json!({"amount": "10.00", "currency": "USD"});
        let second = json!({"currency": "USD", "amount": "10.00"});
        assert_eq!(canonical_json(&first), canonical_json(&second));
    }

    #[test]
    fn test_fixed_clock() {
        let now = Utc::now();
        let clock = FixedClock(now);
        assert_eq!(clock.now(), now);
    }
}
