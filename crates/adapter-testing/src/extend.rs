//! Recursive JSON merge used for partial config updates.

use serde_json::Value;

/// Merges `changes` into `target` without discarding unrelated keys.
///
/// Object values merge recursively; any other value in `changes` replaces
/// the value in `target` outright. Keys absent from `changes` are left
/// untouched, so a partial update never loses sibling configuration.
///
/// # Examples
///
/// ```
/// use adapter_testing::extend;
/// use serde_json::json;
///
/// let mut target = json!({"native": {"host": "a", "port": 1}});
/// extend(&mut target, &json!({"native": {"port": 2}}));
/// assert_eq!(target, json!({"native": {"host": "a", "port": 2}}));
/// ```
pub fn extend(target: &mut Value, changes: &Value) {
    match (target, changes) {
        (Value::Object(target_map), Value::Object(changes_map)) => {
            for (key, change) in changes_map {
                match target_map.get_mut(key) {
                    Some(existing) => extend(existing, change),
                    None => {
                        target_map.insert(key.clone(), change.clone());
                    }
                }
            }
        }
        (target, changes) => *target = changes.clone(),
    }
}
