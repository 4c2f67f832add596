//! Schema node model: a type-and-constraint descriptor used to synthesize
//! request values. Parsed out of the JSON schema document with all local
//! `$ref`s inlined, so the synthesizer never sees an unresolved reference.

use serde_json::{Map, Value};

use crate::error::EngineError;

/// One schema node plus the per-request re-synthesis flag.
///
/// `dynamic` is read from an `x-dynamic: true` extension key and marks this
/// subtree for regeneration on every issued request instead of being served
/// from the cached request template.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    pub kind: SchemaKind,
    pub dynamic: bool,
}

impl SchemaNode {
    pub fn string() -> Self {
        Self {
            kind: SchemaKind::String {
                format: None,
                pattern: None,
            },
            dynamic: false,
        }
    }

    /// True if this node or any node below it is marked dynamic.
    pub fn has_dynamic(&self) -> bool {
        if self.dynamic {
            return true;
        }
        match &self.kind {
            SchemaKind::Array { items, .. } => items.has_dynamic(),
            SchemaKind::Object { properties, .. } => {
                properties.iter().any(|(_, node)| node.has_dynamic())
            }
            _ => false,
        }
    }
}

/// Tagged union over the recognized schema types.
///
/// `Enum` wins over any `type` value, matching generation order: enum values
/// are checked before type-based rules. `Unknown` is kept so that synthesis
/// can fail loudly instead of silently defaulting.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaKind {
    Enum(Vec<Value>),
    String {
        format: Option<StringFormat>,
        pattern: Option<String>,
    },
    Number(NumericBounds),
    Integer(NumericBounds),
    Boolean,
    Array {
        items: Box<SchemaNode>,
        min_items: Option<u64>,
        max_items: Option<u64>,
    },
    Object {
        properties: Vec<(String, SchemaNode)>,
        required: Vec<String>,
    },
    Unknown(Option<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringFormat {
    Email,
    Date,
    DateTime,
    Uuid,
    Uri,
    Hostname,
    Ipv4,
    Ipv6,
}

impl StringFormat {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "email" => Some(Self::Email),
            "date" => Some(Self::Date),
            "date-time" => Some(Self::DateTime),
            "uuid" => Some(Self::Uuid),
            "uri" => Some(Self::Uri),
            "hostname" => Some(Self::Hostname),
            "ipv4" => Some(Self::Ipv4),
            "ipv6" => Some(Self::Ipv6),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NumericBounds {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: bool,
    pub exclusive_maximum: bool,
}

const REF_PREFIX: &str = "#/components/schemas/";

/// Resolves raw schema values into `SchemaNode`s, inlining local
/// `#/components/schemas/...` references. Cyclic or missing references are
/// format errors at parse time.
pub(crate) struct SchemaResolver<'a> {
    components: Option<&'a Map<String, Value>>,
}

impl<'a> SchemaResolver<'a> {
    pub fn new(document: &'a Value) -> Self {
        Self {
            components: document
                .pointer("/components/schemas")
                .and_then(Value::as_object),
        }
    }

    pub fn resolve(&self, schema: &Value) -> Result<SchemaNode, EngineError> {
        self.resolve_inner(schema, &mut Vec::new())
    }

    fn resolve_inner(
        &self,
        schema: &Value,
        seen: &mut Vec<String>,
    ) -> Result<SchemaNode, EngineError> {
        let obj = schema.as_object().ok_or_else(|| {
            EngineError::SchemaFormat("schema node is not a JSON object".into())
        })?;

        if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
            let name = reference.strip_prefix(REF_PREFIX).ok_or_else(|| {
                EngineError::SchemaFormat(format!("unsupported reference `{reference}`"))
            })?;
            if seen.iter().any(|s| s == name) {
                return Err(EngineError::SchemaFormat(format!(
                    "cyclic schema reference `{name}`"
                )));
            }
            let target = self
                .components
                .and_then(|schemas| schemas.get(name))
                .ok_or_else(|| {
                    EngineError::SchemaFormat(format!("unresolved schema reference `{name}`"))
                })?;
            seen.push(name.to_string());
            let node = self.resolve_inner(target, seen);
            seen.pop();
            return node;
        }

        let dynamic = obj
            .get("x-dynamic")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        // enum takes precedence over whatever `type` says
        if let Some(values) = obj.get("enum").and_then(Value::as_array) {
            if !values.is_empty() {
                return Ok(SchemaNode {
                    kind: SchemaKind::Enum(values.clone()),
                    dynamic,
                });
            }
        }

        let kind = match obj.get("type").and_then(Value::as_str) {
            Some("string") => SchemaKind::String {
                format: obj
                    .get("format")
                    .and_then(Value::as_str)
                    .and_then(StringFormat::parse),
                pattern: obj
                    .get("pattern")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
            },
            Some("number") => SchemaKind::Number(numeric_bounds(obj)),
            Some("integer") => SchemaKind::Integer(numeric_bounds(obj)),
            Some("boolean") => SchemaKind::Boolean,
            Some("array") => {
                let items = obj.get("items").ok_or_else(|| {
                    EngineError::SchemaFormat("array schema has no `items`".into())
                })?;
                SchemaKind::Array {
                    items: Box::new(self.resolve_inner(items, seen)?),
                    min_items: obj.get("minItems").and_then(Value::as_u64),
                    max_items: obj.get("maxItems").and_then(Value::as_u64),
                }
            }
            Some("object") => {
                let mut properties = Vec::new();
                if let Some(props) = obj.get("properties").and_then(Value::as_object) {
                    for (name, prop) in props {
                        properties.push((name.clone(), self.resolve_inner(prop, seen)?));
                    }
                }
                let required = obj
                    .get("required")
                    .and_then(Value::as_array)
                    .map(|names| {
                        names
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_owned)
                            .collect()
                    })
                    .unwrap_or_default();
                SchemaKind::Object {
                    properties,
                    required,
                }
            }
            other => SchemaKind::Unknown(other.map(str::to_owned)),
        };

        Ok(SchemaNode { kind, dynamic })
    }
}

fn numeric_bounds(obj: &Map<String, Value>) -> NumericBounds {
    NumericBounds {
        minimum: obj.get("minimum").and_then(Value::as_f64),
        maximum: obj.get("maximum").and_then(Value::as_f64),
        exclusive_minimum: obj
            .get("exclusiveMinimum")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        exclusive_maximum: obj
            .get("exclusiveMaximum")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolve(schema: Value) -> Result<SchemaNode, EngineError> {
        let doc = json!({});
        SchemaResolver::new(&doc).resolve(&schema)
    }

    #[test]
    fn parses_string_with_format() {
        let node = resolve(json!({"type": "string", "format": "email"})).unwrap();
        assert_eq!(
            node.kind,
            SchemaKind::String {
                format: Some(StringFormat::Email),
                pattern: None
            }
        );
        assert!(!node.dynamic);
    }

    #[test]
    fn enum_wins_over_type() {
        let node = resolve(json!({"type": "string", "enum": ["a", "b"]})).unwrap();
        assert_eq!(node.kind, SchemaKind::Enum(vec![json!("a"), json!("b")]));
    }

    #[test]
    fn empty_enum_falls_back_to_type() {
        let node = resolve(json!({"type": "boolean", "enum": []})).unwrap();
        assert_eq!(node.kind, SchemaKind::Boolean);
    }

    #[test]
    fn unknown_type_is_preserved_not_defaulted() {
        let node = resolve(json!({"type": "binary"})).unwrap();
        assert_eq!(node.kind, SchemaKind::Unknown(Some("binary".into())));
    }

    #[test]
    fn x_dynamic_marks_subtree() {
        let node = resolve(json!({
            "type": "object",
            "properties": {
                "id": {"type": "string", "format": "uuid", "x-dynamic": true},
                "name": {"type": "string"}
            }
        }))
        .unwrap();
        assert!(node.has_dynamic());
        assert!(!node.dynamic);
    }

    #[test]
    fn resolves_local_references() {
        let doc = json!({
            "components": {
                "schemas": {
                    "Item": {"type": "object", "properties": {"id": {"type": "integer"}}}
                }
            }
        });
        let resolver = SchemaResolver::new(&doc);
        let node = resolver
            .resolve(&json!({"$ref": "#/components/schemas/Item"}))
            .unwrap();
        match node.kind {
            SchemaKind::Object { properties, .. } => {
                assert_eq!(properties.len(), 1);
                assert_eq!(properties[0].0, "id");
            }
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn cyclic_reference_is_a_format_error() {
        let doc = json!({
            "components": {
                "schemas": {
                    "Node": {
                        "type": "object",
                        "properties": {"next": {"$ref": "#/components/schemas/Node"}}
                    }
                }
            }
        });
        let resolver = SchemaResolver::new(&doc);
        let err = resolver
            .resolve(&json!({"$ref": "#/components/schemas/Node"}))
            .unwrap_err();
        assert!(matches!(err, EngineError::SchemaFormat(_)));
    }

    #[test]
    fn missing_reference_is_a_format_error() {
        let doc = json!({});
        let err = SchemaResolver::new(&doc)
            .resolve(&json!({"$ref": "#/components/schemas/Missing"}))
            .unwrap_err();
        assert!(matches!(err, EngineError::SchemaFormat(_)));
    }

    #[test]
    fn array_without_items_is_a_format_error() {
        let err = resolve(json!({"type": "array"})).unwrap_err();
        assert!(matches!(err, EngineError::SchemaFormat(_)));
    }
}
