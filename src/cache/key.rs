//! Cache key derivation.

use serde_json::Value;
use url::form_urlencoded::byte_serialize;

/// Request parameters used to build a cache key.
pub type Params = serde_json::Map<String, Value>;

/// Build the cache key for an operation and its parameters.
///
/// Parameters are sorted by name so that argument order never changes the key.
/// Values are rendered as JSON, which keeps the string `"1"` and the number `1`
/// apart. The operation name, parameter names and values are form encoded, so
/// `?`, `&` and `=` inside them cannot be mistaken for separators.
///
/// ```rust
/// use api_guard::cache::{generate_key, Params};
/// use serde_json::json;
///
/// let mut params = Params::new();
/// params.insert("id".into(), json!(7));
/// params.insert("fields".into(), json!("name"));
///
/// assert_eq!(generate_key("get_user", &params), "get_user?fields=%22name%22&id=7");
/// assert_eq!(generate_key("list_users", &Params::new()), "list_users");
/// ```
pub fn generate_key(operation: &str, params: &Params) -> String {
    let mut pairs: Vec<(&String, &Value)> = params.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let mut key = encode(operation);
    for (i, (name, value)) in pairs.into_iter().enumerate() {
        key.push(if i == 0 { '?' } else { '&' });
        key.push_str(&encode(name));
        key.push('=');
        key.push_str(&encode(&value.to_string()));
    }
    key
}

fn encode(part: &str) -> String {
    byte_serialize(part.as_bytes()).collect()
}
