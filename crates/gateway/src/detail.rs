// Error detail extraction
//
// The gateway answers errors FastAPI-style: `{"detail": "..."}` for
// HTTPException, or `{"detail": [{"msg": ..., ...}]}` for validation errors.

use serde_json::Value;

/// Pull a human-readable detail out of an error body.
///
/// - `{"detail": "text"}` gives `text`
/// - `{"detail": [{"msg": "a"}, {"msg": "b"}]}` gives `a; b`
/// - any other non-empty body is returned as-is
pub fn extract_detail(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) else {
        return Some(body.to_string());
    };

    match map.get("detail") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(items)) => {
            let msgs: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect();
            if msgs.is_empty() {
                Some(body.to_string())
            } else {
                Some(msgs.join("; "))
            }
        }
        Some(Value::Null) | None => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(body.to_string())),
        Some(other) => Some(other.to_string()),
    }
}
