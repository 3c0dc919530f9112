//! Construction of the merged parameter bag.
//!
//! Query strings and url-encoded forms are decoded qs-style: repeated keys and
//! bracketed keys (`tags[]=a`, `tags[0]=a`, `tags[x]=a`) collapse into arrays in
//! order of appearance. Sources merge in the order query, body, path parameters
//! (later wins), and the result is stripped of `null` values at every object
//! depth before any pipeline stage sees it.

use serde_json::{Map, Value};

/// Keys whose values are masked in logs.
const REDACTED_KEYS: [&str; 3] = ["password", "currentPassword", "newPassword"];

/// Decode a query string or url-encoded form body.
#[must_use]
pub fn parse_query(query: &str) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let (base, bracketed) = match key.find('[') {
            Some(pos) if pos > 0 && key.ends_with(']') => (&key[..pos], true),
            _ => (key.as_ref(), false),
        };
        let value = Value::String(value.into_owned());

        match out.get_mut(base) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let previous = existing.take();
                *existing = Value::Array(vec![previous, value]);
            }
            None => {
                let value = if bracketed {
                    Value::Array(vec![value])
                } else {
                    value
                };
                out.insert(base.to_string(), value);
            }
        }
    }
    out
}

/// Merge query, body and path parameters, later sources overriding earlier ones.
#[must_use]
pub fn merge_parameters<'a, I>(
    query: Map<String, Value>,
    body: Option<&Value>,
    path_params: I,
) -> Map<String, Value>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut merged = query;
    if let Some(Value::Object(body)) = body {
        for (k, v) in body {
            merged.insert(k.clone(), v.clone());
        }
    }
    for (k, v) in path_params {
        merged.insert(k.to_string(), Value::String(v.to_string()));
    }
    strip_nulls(merged)
}

/// Remove `null` values from an object and every nested object. Arrays are kept verbatim.
#[must_use]
pub fn strip_nulls(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::Object(inner) => Some((key, Value::Object(strip_nulls(inner)))),
            other => Some((key, other)),
        })
        .collect()
}

/// Copy of `value` safe for logging, with credential fields masked.
#[must_use]
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let masked = REDACTED_KEYS.contains(&k.as_str()) && is_truthy(v);
                    let v = if masked {
                        Value::String("******".to_string())
                    } else {
                        redact(v)
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        _ => true,
    }
}
