//! JSON contract validator (spec.md §4.9): recursively checks a JSON
//! document against a `Field` tree, modeling "any" as `serde_json::Value`
//! passed through unchecked.

use koor_schemas::{Contract, Direction, Endpoint, Field, FieldType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractViolation {
    pub path: String,
    pub message: String,
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn type_matches(ty: FieldType, value: &Value) -> bool {
    match ty {
        FieldType::String => value.is_string(),
        FieldType::Number => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Object => value.is_object(),
        FieldType::Array => value.is_array(),
        FieldType::Unspecified => true,
    }
}

fn type_name(ty: FieldType) -> &'static str {
    match ty {
        FieldType::String => "string",
        FieldType::Number => "number",
        FieldType::Boolean => "boolean",
        FieldType::Object => "object",
        FieldType::Array => "array",
        FieldType::Unspecified => "any",
    }
}

fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Walks one object-shaped `fields` schema against `payload` (spec.md §4.9
/// `ValidatePayload` step list): unexpected keys, missing required keys,
/// null-without-nullable, type mismatch (stops deeper checks on mismatch),
/// enum membership, and recursion into nested objects/array items.
fn validate_object(path: &str, fields: &BTreeMap<String, Field>, payload: &Value, out: &mut Vec<ContractViolation>) {
    let Some(obj) = payload.as_object() else {
        out.push(ContractViolation {
            path: path.to_string(),
            message: format!("expected object, got {}", value_kind(payload)),
        });
        return;
    };

    let mut known: Vec<&str> = fields.keys().map(String::as_str).collect();
    known.sort();
    for key in obj.keys() {
        if !fields.contains_key(key) {
            out.push(ContractViolation {
                path: join(path, key),
                message: format!("unexpected field \"{key}\" (contract defines: {known:?})"),
            });
        }
    }

    for (key, field) in fields {
        let child_path = join(path, key);
        match obj.get(key) {
            None => {
                if field.required {
                    out.push(ContractViolation {
                        path: child_path,
                        message: "required field is missing".to_string(),
                    });
                }
            }
            Some(value) => validate_field(&child_path, field, value, out),
        }
    }
}

fn validate_field(path: &str, field: &Field, value: &Value, out: &mut Vec<ContractViolation>) {
    if value.is_null() {
        if !field.nullable {
            out.push(ContractViolation {
                path: path.to_string(),
                message: "value is null but field is not nullable".to_string(),
            });
        }
        return;
    }

    if field.r#type != FieldType::Unspecified && !type_matches(field.r#type, value) {
        out.push(ContractViolation {
            path: path.to_string(),
            message: format!("expected {}, got {}", type_name(field.r#type), value_kind(value)),
        });
        return;
    }

    if !field.r#enum.is_empty() {
        if let Some(s) = value.as_str() {
            if !field.r#enum.iter().any(|allowed| allowed == s) {
                out.push(ContractViolation {
                    path: path.to_string(),
                    message: format!("value {s:?} is not one of {:?}", field.r#enum),
                });
            }
        }
    }

    if field.r#type == FieldType::Object {
        validate_object(path, &field.fields, value, out);
    }

    if field.r#type == FieldType::Array {
        if let Some(items_field) = &field.items {
            for (i, item) in value.as_array().expect("type_matches confirmed array").iter().enumerate() {
                let item_path = format!("{path}[{i}]");
                if item.is_null() {
                    if !items_field.nullable {
                        out.push(ContractViolation {
                            path: item_path,
                            message: "value is null but field is not nullable".to_string(),
                        });
                    }
                    continue;
                }
                if items_field.r#type != FieldType::Unspecified && !type_matches(items_field.r#type, item) {
                    out.push(ContractViolation {
                        path: item_path,
                        message: format!(
                            "expected {}, got {}",
                            type_name(items_field.r#type),
                            value_kind(item)
                        ),
                    });
                    continue;
                }
                if items_field.r#type == FieldType::Object {
                    validate_object(&item_path, &items_field.fields, item, out);
                }
            }
        }
    }
}

/// Validates a single JSON payload against a named field set (an endpoint's
/// `request`/`response`/`query`/`error` map), treated as an implicit
/// top-level object.
pub fn validate_payload(fields: &BTreeMap<String, Field>, payload: &Value) -> Vec<ContractViolation> {
    let mut out = Vec::new();
    validate_object("", fields, payload, &mut out);
    out
}

/// `ValidateResponseArray`: iterates `payload` (must be an array) and
/// validates each element against `fields` (typically `response_array`).
pub fn validate_response_array(fields: &BTreeMap<String, Field>, payload: &Value) -> Vec<ContractViolation> {
    let Some(items) = payload.as_array() else {
        return vec![ContractViolation {
            path: String::new(),
            message: format!("expected array, got {}", value_kind(payload)),
        }];
    };
    let mut out = Vec::new();
    for (i, item) in items.iter().enumerate() {
        out.extend(validate_payload(fields, item).into_iter().map(|v| ContractViolation {
            path: if v.path.is_empty() {
                format!("[{i}]")
            } else {
                format!("[{i}].{}", v.path)
            },
            message: v.message,
        }));
    }
    out
}

/// `ValidateStatus`: a non-zero declared `response_status` that disagrees
/// with `actual` is one violation; zero means "unconstrained".
pub fn validate_status(expected: i32, actual: i32) -> Vec<ContractViolation> {
    if expected != 0 && expected != actual {
        vec![ContractViolation {
            path: "status".to_string(),
            message: format!("expected status {expected}, got {actual}"),
        }]
    } else {
        Vec::new()
    }
}

/// Validates `payload` against `contract`'s endpoint named `endpoint_name`
/// for `direction`. `Direction::Response` falls back to `response_array`
/// when `response` is empty (spec.md §4.9: "response (fallback to
/// response_array)"). Missing endpoint or empty schema is one violation.
pub fn validate_endpoint(
    contract: &Contract,
    endpoint_name: &str,
    direction: Direction,
    payload: &Value,
) -> Vec<ContractViolation> {
    let Some(endpoint) = contract.endpoints.get(endpoint_name) else {
        return vec![ContractViolation {
            path: String::new(),
            message: format!("no endpoint named {endpoint_name} in contract {}", contract.kind),
        }];
    };

    let fields = match direction {
        Direction::Request => &endpoint.request,
        Direction::Query => &endpoint.query,
        Direction::Error => &endpoint.error,
        Direction::Response => {
            if endpoint.response.is_empty() && !endpoint.response_array.is_empty() {
                return validate_response_array(&endpoint.response_array, payload);
            }
            &endpoint.response
        }
    };

    if fields.is_empty() {
        return vec![ContractViolation {
            path: String::new(),
            message: format!("endpoint {endpoint_name} declares no schema for this direction"),
        }];
    }

    validate_payload(fields, payload)
}

pub fn endpoint_response_status(endpoint: &Endpoint) -> i32 {
    endpoint.response_status
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn string_field(required: bool) -> Field {
        Field {
            r#type: FieldType::String,
            required,
            ..Default::default()
        }
    }

    #[test]
    fn required_field_missing_is_flagged() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), string_field(true));

        let violations = validate_payload(&fields, &json!({}));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "name");
    }

    #[test]
    fn unexpected_field_is_flagged() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), string_field(false));

        let violations = validate_payload(&fields, &json!({"name": "a", "extra": 1}));
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("unexpected field \"extra\""));
    }

    #[test]
    fn nullable_field_accepts_null() {
        let mut fields = BTreeMap::new();
        fields.insert(
            "note".to_string(),
            Field {
                r#type: FieldType::String,
                nullable: true,
                ..Default::default()
            },
        );
        let violations = validate_payload(&fields, &json!({"note": null}));
        assert!(violations.is_empty());
    }

    #[test]
    fn nested_object_recurses() {
        let mut inner = BTreeMap::new();
        inner.insert("id".to_string(), string_field(true));

        let mut fields = BTreeMap::new();
        fields.insert(
            "user".to_string(),
            Field {
                r#type: FieldType::Object,
                required: true,
                fields: inner,
                ..Default::default()
            },
        );

        let violations = validate_payload(&fields, &json!({"user": {}}));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "user.id");
    }

    #[test]
    fn array_items_validated_positionally() {
        let mut fields = BTreeMap::new();
        fields.insert(
            "tags".to_string(),
            Field {
                r#type: FieldType::Array,
                items: Some(Box::new(string_field(true))),
                ..Default::default()
            },
        );

        let violations = validate_payload(&fields, &json!({"tags": ["a", 1]}));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "tags[1]");
    }

    #[test]
    fn unspecified_type_accepts_anything() {
        let mut fields = BTreeMap::new();
        fields.insert("payload".to_string(), Field::default());
        let violations = validate_payload(&fields, &json!({"payload": {"whatever": [1,2,3]}}));
        assert!(violations.is_empty());
    }

    #[test]
    fn enum_rejects_values_outside_the_set() {
        let mut fields = BTreeMap::new();
        fields.insert(
            "status".to_string(),
            Field {
                r#type: FieldType::String,
                r#enum: vec!["open".to_string(), "closed".to_string()],
                ..Default::default()
            },
        );
        let violations = validate_payload(&fields, &json!({"status": "archived"}));
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn response_array_validates_every_element() {
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), string_field(true));
        let violations = validate_response_array(&fields, &json!([{"id": "a"}, {}]));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "[1].id");
    }

    #[test]
    fn response_direction_falls_back_to_response_array() {
        let mut response_array = BTreeMap::new();
        response_array.insert("id".to_string(), string_field(true));

        let mut endpoints = BTreeMap::new();
        endpoints.insert(
            "list_items".to_string(),
            Endpoint {
                response_array,
                ..Default::default()
            },
        );
        let contract = Contract {
            kind: "contract".to_string(),
            version: 1,
            endpoints,
        };

        let violations = validate_endpoint(
            &contract,
            "list_items",
            Direction::Response,
            &json!([{"id": "a"}, {}]),
        );
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn missing_endpoint_is_one_violation() {
        let contract = Contract {
            kind: "contract".to_string(),
            version: 1,
            endpoints: BTreeMap::new(),
        };
        let violations = validate_endpoint(&contract, "nope", Direction::Request, &json!({}));
        assert_eq!(violations.len(), 1);
    }
}
