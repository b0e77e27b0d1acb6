//! Key mapping helpers shared by providers and the registry
//!
//! A mapping always goes from the application's key to the provider's key,
//! e.g. `{"email": "mail"}` for an LDAP backend.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

/// Application key -> provider key
pub type Mapping = BTreeMap<String, String>;

/// Opaque provider attributes
pub type AttrMap = BTreeMap<String, Value>;

/// Search criteria, application key -> searched value
pub type Criteria = BTreeMap<String, String>;

/// Translate application keys to provider keys.
///
/// Keys without a mapping are passed through unchanged.
pub fn convert_app_data<V: Clone>(app_data: &BTreeMap<String, V>, mapping: &Mapping) -> BTreeMap<String, V> {
    app_data
        .iter()
        .map(|(key, value)| {
            let key = mapping.get(key).unwrap_or(key);
            (key.clone(), value.clone())
        })
        .collect()
}

/// Translate provider keys back to application keys.
///
/// Mapped sources that are missing in `data` are skipped. When `key_filter`
/// is set only the listed application keys are kept.
pub fn convert_provider_data<V: Clone>(
    data: &BTreeMap<String, V>,
    mapping: &Mapping,
    key_filter: Option<&[String]>,
) -> BTreeMap<String, V> {
    let sources: HashSet<&str> = mapping.values().map(String::as_str).collect();

    let mut converted: BTreeMap<String, V> = data
        .iter()
        .filter(|(key, _)| !sources.contains(key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    for (app_key, provider_key) in mapping {
        if let Some(value) = data.get(provider_key) {
            converted.insert(app_key.clone(), value.clone());
        }
    }

    if let Some(keys) = key_filter {
        converted.retain(|key, _| keys.iter().any(|k| k == key));
    }

    converted
}

/// First string found in a JSON value (a plain string or the head of a list).
pub fn first_str(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s.as_str()),
        Value::Array(items) => items.first().and_then(first_str),
        _ => None,
    }
}
