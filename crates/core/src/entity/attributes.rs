use parking_lot::Mutex;
use serde_json::Value;

pub const STATE: &str = "state";

/// Entity attributes as published to the remote.
pub type Attributes = serde_json::Map<String, Value>;

/// Command parameters sent by the remote.
pub type Params = serde_json::Map<String, Value>;

/// Add `key` to `changed` if `value` is set and differs from `original`.
pub fn key_update_helper(key: &str, value: Value, changed: &mut Attributes, original: &Attributes) {
    if value.is_null() {
        return;
    }
    if original.get(key) != Some(&value) {
        changed.insert(key.to_string(), value);
    }
}

/// Last published attributes of one entity.
pub struct AttributeStore {
    inner: Mutex<Attributes>,
}

impl AttributeStore {
    pub fn new(initial: Attributes) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }

    pub fn snapshot(&self) -> Attributes {
        self.inner.lock().clone()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().get(key).cloned()
    }

    pub fn merge(&self, changed: &Attributes) {
        let mut inner = self.inner.lock();
        for (key, value) in changed {
            inner.insert(key.clone(), value.clone());
        }
    }
}

pub fn str_param<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

pub fn f64_param(params: &Params, key: &str) -> Option<f64> {
    match params.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Lenient integer parameter: numbers and numeric strings are truncated.
pub fn int_param(params: &Params, key: &str, default: i64) -> i64 {
    f64_param(params, key)
        .filter(|v| v.is_finite())
        .map(|v| v.trunc() as i64)
        .unwrap_or(default)
}

pub fn bool_param(params: &Params, key: &str, default: bool) -> bool {
    match params.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        _ => default,
    }
}
