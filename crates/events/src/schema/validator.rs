use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Number, Value as JsonValue};
use thiserror::Error;

use super::registry::SchemaRegistry;

/// One validation failure, located by a JSON-pointer style `instance_path`
/// (`""` for the root, `"/data"` for a nested object).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub instance_path: String,
    pub keyword: String,
    pub message: String,
}

/// Result of validating one payload against one schema version.
///
/// `errors` is non-empty exactly when `valid` is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationOutcome {
    pub fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema '{name}' version {version} is not registered")]
    NotFound { name: String, version: u32 },
}

/// Validates payloads against schemas held by a [`SchemaRegistry`].
///
/// Supports the JSON Schema subset used by message contracts: `type`,
/// `properties`, `required`, `enum`, `minLength`, `maxLength`, `minimum`,
/// `maximum`, `format` (`email`, `uuid`, `date-time`), `items`, `minItems`,
/// `maxItems` and `additionalProperties`. Unknown keywords and formats are
/// ignored.
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    registry: Arc<SchemaRegistry>,
}

impl SchemaValidator {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn validate(
        &self,
        name: &str,
        version: u32,
        payload: &JsonValue,
    ) -> Result<ValidationOutcome, SchemaError> {
        let schema = self
            .registry
            .get_schema(name, version)
            .ok_or_else(|| SchemaError::NotFound {
                name: name.to_string(),
                version,
            })?;
        Ok(validate_against(&schema.definition, payload))
    }
}

/// Validate `payload` against a raw schema definition.
pub fn validate_against(definition: &JsonValue, payload: &JsonValue) -> ValidationOutcome {
    let mut errors = Vec::new();
    check(definition, payload, "", &mut errors);
    ValidationOutcome::from_errors(errors)
}

fn error(path: &str, keyword: &str, message: impl Into<String>) -> ValidationError {
    ValidationError {
        instance_path: path.to_string(),
        keyword: keyword.to_string(),
        message: message.into(),
    }
}

fn check(schema: &JsonValue, value: &JsonValue, path: &str, errors: &mut Vec<ValidationError>) {
    let schema = match schema {
        JsonValue::Bool(true) => return,
        JsonValue::Bool(false) => {
            errors.push(error(path, "false schema", "boolean schema is false"));
            return;
        }
        JsonValue::Object(map) => map,
        _ => return,
    };

    if let Some(expected) = schema.get("type") {
        if !matches_type(expected, value) {
            errors.push(error(path, "type", format!("must be {}", type_label(expected))));
            return;
        }
    }

    if let Some(JsonValue::Array(allowed)) = schema.get("enum") {
        if !allowed.contains(value) {
            errors.push(error(path, "enum", "must be equal to one of the allowed values"));
        }
    }

    match value {
        JsonValue::String(s) => check_string(schema, s, path, errors),
        JsonValue::Number(n) => check_number(schema, n, path, errors),
        JsonValue::Object(obj) => check_object(schema, obj, path, errors),
        JsonValue::Array(items) => check_array(schema, items, path, errors),
        JsonValue::Bool(_) | JsonValue::Null => {}
    }
}

fn matches_type(expected: &JsonValue, value: &JsonValue) -> bool {
    match expected {
        JsonValue::String(name) => matches_type_name(name, value),
        JsonValue::Array(names) => names
            .iter()
            .filter_map(JsonValue::as_str)
            .any(|name| matches_type_name(name, value)),
        _ => true,
    }
}

fn matches_type_name(name: &str, value: &JsonValue) -> bool {
    match name {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => match value {
            JsonValue::Number(n) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            _ => false,
        },
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_label(expected: &JsonValue) -> String {
    match expected {
        JsonValue::String(name) => name.clone(),
        JsonValue::Array(names) => names
            .iter()
            .filter_map(JsonValue::as_str)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

fn check_string(
    schema: &Map<String, JsonValue>,
    s: &str,
    path: &str,
    errors: &mut Vec<ValidationError>,
) {
    let len = s.chars().count() as u64;
    if let Some(min) = schema.get("minLength").and_then(JsonValue::as_u64) {
        if len < min {
            errors.push(error(
                path,
                "minLength",
                format!("must NOT have fewer than {min} characters"),
            ));
        }
    }
    if let Some(max) = schema.get("maxLength").and_then(JsonValue::as_u64) {
        if len > max {
            errors.push(error(
                path,
                "maxLength",
                format!("must NOT have more than {max} characters"),
            ));
        }
    }
    if let Some(format) = schema.get("format").and_then(JsonValue::as_str) {
        let ok = match format {
            "email" => is_email(s),
            "uuid" => is_uuid(s),
            "date-time" => chrono::DateTime::parse_from_rfc3339(s).is_ok(),
            _ => true,
        };
        if !ok {
            errors.push(error(path, "format", format!("must match format \"{format}\"")));
        }
    }
}

fn check_number(
    schema: &Map<String, JsonValue>,
    n: &Number,
    path: &str,
    errors: &mut Vec<ValidationError>,
) {
    let Some(actual) = n.as_f64() else {
        return;
    };
    if let Some(min) = schema.get("minimum") {
        if min.as_f64().is_some_and(|m| actual < m) {
            errors.push(error(path, "minimum", format!("must be >= {min}")));
        }
    }
    if let Some(max) = schema.get("maximum") {
        if max.as_f64().is_some_and(|m| actual > m) {
            errors.push(error(path, "maximum", format!("must be <= {max}")));
        }
    }
}

fn check_object(
    schema: &Map<String, JsonValue>,
    obj: &Map<String, JsonValue>,
    path: &str,
    errors: &mut Vec<ValidationError>,
) {
    if let Some(JsonValue::Array(required)) = schema.get("required") {
        for property in required.iter().filter_map(JsonValue::as_str) {
            if !obj.contains_key(property) {
                errors.push(error(
                    path,
                    "required",
                    format!("must have required property '{property}'"),
                ));
            }
        }
    }

    let properties = schema.get("properties").and_then(JsonValue::as_object);
    if let Some(properties) = properties {
        for (key, sub_schema) in properties {
            if let Some(child) = obj.get(key) {
                check(sub_schema, child, &child_path(path, key), errors);
            }
        }
    }

    match schema.get("additionalProperties") {
        Some(JsonValue::Bool(false)) => {
            let has_extra = obj
                .keys()
                .any(|key| !properties.is_some_and(|p| p.contains_key(key)));
            if has_extra {
                errors.push(error(
                    path,
                    "additionalProperties",
                    "must NOT have additional properties",
                ));
            }
        }
        Some(extra_schema @ JsonValue::Object(_)) => {
            for (key, child) in obj {
                if !properties.is_some_and(|p| p.contains_key(key)) {
                    check(extra_schema, child, &child_path(path, key), errors);
                }
            }
        }
        _ => {}
    }
}

fn check_array(
    schema: &Map<String, JsonValue>,
    items: &[JsonValue],
    path: &str,
    errors: &mut Vec<ValidationError>,
) {
    let len = items.len() as u64;
    if let Some(min) = schema.get("minItems").and_then(JsonValue::as_u64) {
        if len < min {
            errors.push(error(path, "minItems", format!("must NOT have fewer than {min} items")));
        }
    }
    if let Some(max) = schema.get("maxItems").and_then(JsonValue::as_u64) {
        if len > max {
            errors.push(error(path, "maxItems", format!("must NOT have more than {max} items")));
        }
    }
    if let Some(item_schema) = schema.get("items") {
        for (idx, item) in items.iter().enumerate() {
            check(item_schema, item, &format!("{path}/{idx}"), errors);
        }
    }
}

fn child_path(path: &str, key: &str) -> String {
    format!("{path}/{}", key.replace('~', "~0").replace('/', "~1"))
}

fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    let local_ok = !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || ".!#$%&'*+/=?^_`{|}~-".contains(c));
    let domain_ok = !domain.is_empty()
        && domain.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        });
    local_ok && domain_ok
}

fn is_uuid(s: &str) -> bool {
    let s = s.strip_prefix("urn:uuid:").unwrap_or(s);
    s.len() == 36
        && s.char_indices().all(|(idx, c)| match idx {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_registered_v1() -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "aggregateId": { "type": "string", "format": "uuid" },
                "data": {
                    "type": "object",
                    "properties": {
                        "email": { "type": "string", "format": "email" },
                        "role": { "type": "string", "enum": ["customer", "admin"] }
                    },
                    "required": ["email", "role"]
                }
            },
            "required": ["aggregateId", "data"]
        })
    }

    fn valid_payload() -> JsonValue {
        json!({
            "aggregateId": "7c9e6679-7425-40de-944b-e07fc1f90ae7",
            "data": { "email": "test@example.com", "role": "customer" }
        })
    }

    #[test]
    fn valid_payload_has_no_errors() {
        let outcome = validate_against(&user_registered_v1(), &valid_payload());
        assert!(outcome.is_valid());
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn missing_required_property_is_reported_at_parent_path() {
        let payload = json!({
            "aggregateId": "7c9e6679-7425-40de-944b-e07fc1f90ae7",
            "data": { "role": "customer" }
        });
        let outcome = validate_against(&user_registered_v1(), &payload);
        assert!(!outcome.valid);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].message, "must have required property 'email'");
        assert_eq!(outcome.errors[0].instance_path, "/data");
        assert_eq!(outcome.errors[0].keyword, "required");
    }

    #[test]
    fn type_mismatch_stops_checking_that_node() {
        let payload = json!({ "aggregateId": 42, "data": "nope" });
        let outcome = validate_against(&user_registered_v1(), &payload);
        let messages: Vec<_> = outcome.errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["must be string", "must be object"]);
    }

    #[test]
    fn enum_and_format_violations() {
        let payload = json!({
            "aggregateId": "not-a-uuid",
            "data": { "email": "no-at-sign", "role": "root" }
        });
        let outcome = validate_against(&user_registered_v1(), &payload);
        let messages: Vec<_> = outcome.errors.iter().map(|e| e.message.as_str()).collect();
        assert!(messages.contains(&"must match format \"uuid\""));
        assert!(messages.contains(&"must match format \"email\""));
        assert!(messages.contains(&"must be equal to one of the allowed values"));
    }

    #[test]
    fn length_and_range_limits() {
        let schema = json!({
            "type": "object",
            "properties": {
                "password": { "type": "string", "minLength": 8 },
                "age": { "type": "integer", "minimum": 18, "maximum": 130 }
            }
        });
        let outcome = validate_against(&schema, &json!({ "password": "short", "age": 12 }));
        let messages: Vec<_> = outcome.errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["must be >= 18", "must NOT have fewer than 8 characters"]);
    }

    #[test]
    fn closed_objects_reject_unknown_properties() {
        let schema = json!({
            "type": "object",
            "properties": { "a": { "type": "string" } },
            "additionalProperties": false
        });
        assert!(validate_against(&schema, &json!({ "a": "x" })).valid);
        let outcome = validate_against(&schema, &json!({ "a": "x", "b": 1 }));
        assert_eq!(outcome.errors[0].message, "must NOT have additional properties");
    }

    #[test]
    fn array_items_are_validated_with_indexed_paths() {
        let schema = json!({ "type": "array", "items": { "type": "integer" }, "minItems": 1 });
        let outcome = validate_against(&schema, &json!([1, "two"]));
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].instance_path, "/1");
        assert!(!validate_against(&schema, &json!([])).valid);
    }

    #[test]
    fn email_and_uuid_formats() {
        assert!(is_email("user@example.com"));
        assert!(is_email("first.last+tag@sub.example.org"));
        assert!(!is_email("user@"));
        assert!(!is_email("user@@example.com"));
        assert!(!is_email("us er@example.com"));
        assert!(is_uuid("7C9E6679-7425-40DE-944B-E07FC1F90AE7"));
        assert!(!is_uuid("7c9e6679742540de944be07fc1f90ae7"));
    }

    #[test]
    fn additive_optional_field_is_backward_compatible() {
        let registry = Arc::new(SchemaRegistry::new());
        let v1 = user_registered_v1();
        let mut v2 = v1.clone();
        v2["properties"]["data"]["properties"]["displayName"] = json!({ "type": "string" });
        registry.register("UserRegistered", v1);
        registry.register("UserRegistered", v2);

        let validator = SchemaValidator::new(registry);
        let mut payload = valid_payload();
        payload["data"]["displayName"] = json!("New User");

        assert!(validator.validate("UserRegistered", 1, &payload).unwrap().valid);
        assert!(validator.validate("UserRegistered", 2, &payload).unwrap().valid);
        assert!(validator.validate("UserRegistered", 2, &valid_payload()).unwrap().valid);
    }

    #[test]
    fn unknown_schema_is_an_error() {
        let validator = SchemaValidator::new(Arc::new(SchemaRegistry::new()));
        let err = validator.validate("Missing", 1, &json!({})).unwrap_err();
        assert_eq!(err.to_string(), "schema 'Missing' version 1 is not registered");
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 128,
                ..ProptestConfig::default()
            })]

            /// Property: length limits count characters, not bytes.
            #[test]
            fn string_length_limits_count_characters(
                s in "\\PC{0,20}",
                min in 0u64..12,
                extra in 0u64..12
            ) {
                let max = min + extra;
                let schema = json!({ "type": "string", "minLength": min, "maxLength": max });
                let len = s.chars().count() as u64;
                let outcome = validate_against(&schema, &json!(s));
                prop_assert_eq!(outcome.valid, len >= min && len <= max);
            }
        }
    }
}
