//! Argument checks against a tool's JSON Schema.
//!
//! Covers the subset tool servers actually publish: `type`, `required`,
//! `properties` (recursively) and `enum`. Unknown keywords are ignored.

use serde_json::Value;

/// Validate arguments against a schema, returning the first violation found.
pub fn validate_arguments(args: &Value, schema: &Value) -> Result<(), String> {
    validate_at("", args, schema)
}

fn validate_at(path: &str, value: &Value, schema: &Value) -> Result<(), String> {
    if let Some(expected) = schema.get("type") {
        if !type_matches(value, expected) {
            return Err(match path {
                "" => format!("expected {} arguments, got {}", describe(expected), json_type_name(value)),
                _ => format!(
                    "field '{path}' expected type '{}', got {}",
                    describe(expected),
                    json_type_name(value)
                ),
            });
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!("field '{path}' must be one of {}", Value::Array(allowed.clone())));
        }
    }

    let Some(object) = value.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(name) {
                return Err(format!("missing required field '{}'", join(path, name)));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, field) in object {
            if let Some(field_schema) = properties.get(key) {
                validate_at(&join(path, key), field, field_schema)?;
            }
        }
    }

    Ok(())
}

fn type_matches(value: &Value, expected: &Value) -> bool {
    match expected {
        Value::String(name) => value_matches_type(value, name),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| value_matches_type(value, name)),
        _ => true,
    }
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn describe(expected: &Value) -> String {
    match expected {
        Value::String(name) => name.clone(),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("|"),
        other => other.to_string(),
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lookup_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": { "type": "string" },
                "limit": { "type": "integer" },
                "mode": { "type": "string", "enum": ["exact", "fuzzy"] },
                "filter": {
                    "type": "object",
                    "properties": { "tag": { "type": "string" } },
                    "required": ["tag"],
                },
            },
            "required": ["key"],
        })
    }

    #[test]
    fn accepts_valid_arguments() {
        let args = json!({ "key": "X", "limit": 3, "mode": "exact", "extra": true });
        assert!(validate_arguments(&args, &lookup_schema()).is_ok());
    }

    #[test]
    fn rejects_non_object_when_object_expected() {
        let err = validate_arguments(&json!("X"), &lookup_schema()).unwrap_err();
        assert!(err.contains("expected object arguments"));
    }

    #[test]
    fn rejects_missing_required_field() {
        let err = validate_arguments(&json!({ "limit": 1 }), &lookup_schema()).unwrap_err();
        assert_eq!(err, "missing required field 'key'");
    }

    #[test]
    fn rejects_wrong_property_type() {
        let err = validate_arguments(&json!({ "key": "X", "limit": 1.5 }), &lookup_schema())
            .unwrap_err();
        assert!(err.contains("field 'limit' expected type 'integer'"));
    }

    #[test]
    fn rejects_value_outside_enum() {
        let err = validate_arguments(&json!({ "key": "X", "mode": "regex" }), &lookup_schema())
            .unwrap_err();
        assert!(err.contains("field 'mode' must be one of"));
    }

    #[test]
    fn reports_nested_paths() {
        let err = validate_arguments(&json!({ "key": "X", "filter": {} }), &lookup_schema())
            .unwrap_err();
        assert_eq!(err, "missing required field 'filter.tag'");
    }

    #[test]
    fn type_unions_accept_any_member() {
        let schema = json!({ "type": "object", "properties": { "v": { "type": ["string", "null"] } } });
        assert!(validate_arguments(&json!({ "v": null }), &schema).is_ok());
        assert!(validate_arguments(&json!({ "v": 1 }), &schema).is_err());
    }

    #[test]
    fn empty_schema_accepts_anything() {
        assert!(validate_arguments(&json!({ "anything": 42 }), &json!({})).is_ok());
        assert!(validate_arguments(&Value::Null, &json!({})).is_ok());
    }
}
