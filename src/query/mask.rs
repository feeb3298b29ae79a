//! Observation masking for long result lists.

use super::cache::ResultCache;
use serde_json::{Value, json};

/// Return `items` as a JSON array, or, when there are more than
/// `threshold`, a masked object holding the first `threshold` items, the
/// total and a reference id for the full list.
pub fn mask_list(items: Vec<Value>, threshold: usize, cache: &ResultCache, command: &str) -> Value {
    if items.len() <= threshold {
        return Value::Array(items);
    }
    let total = items.len();
    let sample: Vec<Value> = items.iter().take(threshold).cloned().collect();
    let ref_id = cache.store(items, command);
    json!({
        "masked": true,
        "items": sample,
        "total": total,
        "ref_id": ref_id,
    })
}
