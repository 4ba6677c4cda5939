use serde_json::{json, Map, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schema {
    String,
    Integer,
    /// `len` pins the element count when set.
    Array {
        items: Box<Schema>,
        len: Option<usize>,
    },
    Object(Vec<Field>),
}

/// A named, required property of an object schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub description: &'static str,
    pub schema: Schema,
}

impl Field {
    pub fn new(name: &'static str, description: &'static str, schema: Schema) -> Self {
        Self {
            name,
            description,
            schema,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub path: String,
    pub reason: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

impl std::error::Error for SchemaViolation {}

#[derive(Debug, Clone, Copy)]
enum Dialect {
    JsonSchema,
    Gemini,
}

impl Schema {
    pub fn array(items: Schema) -> Self {
        Schema::Array {
            items: Box::new(items),
            len: None,
        }
    }

    pub fn array_of_len(items: Schema, len: usize) -> Self {
        Schema::Array {
            items: Box::new(items),
            len: Some(len),
        }
    }

    /// Checks `value` against the contract. Extra object keys are ignored;
    /// missing keys, nulls and type mismatches are not.
    pub fn validate(&self, value: &Value) -> Result<(), SchemaViolation> {
        self.validate_at(value, "$")
    }

    fn validate_at(&self, value: &Value, path: &str) -> Result<(), SchemaViolation> {
        match self {
            Schema::String => {
                if !value.is_string() {
                    return Err(mismatch(path, "string", value));
                }
            }
            Schema::Integer => {
                if value.is_u64() && !value.is_i64() {
                    return Err(SchemaViolation {
                        path: path.to_string(),
                        reason: format!("integer out of range: {value}"),
                    });
                }
                if !value.is_i64() {
                    return Err(mismatch(path, "integer", value));
                }
            }
            Schema::Array { items, len } => {
                let Some(elements) = value.as_array() else {
                    return Err(mismatch(path, "array", value));
                };
                if let Some(len) = len {
                    if elements.len() != *len {
                        return Err(SchemaViolation {
                            path: path.to_string(),
                            reason: format!("expected {len} items, got {}", elements.len()),
                        });
                    }
                }
                for (i, element) in elements.iter().enumerate() {
                    items.validate_at(element, &format!("{path}[{i}]"))?;
                }
            }
            Schema::Object(fields) => {
                let Some(obj) = value.as_object() else {
                    return Err(mismatch(path, "object", value));
                };
                for field in fields {
                    let field_path = format!("{path}.{}", field.name);
                    let Some(v) = obj.get(field.name) else {
                        return Err(SchemaViolation {
                            path: field_path,
                            reason: "missing required field".to_string(),
                        });
                    };
                    field.schema.validate_at(v, &field_path)?;
                }
            }
        }
        Ok(())
    }

    /// JSON Schema, as accepted by tool `input_schema` definitions.
    pub fn to_json_schema(&self) -> Value {
        self.render(Dialect::JsonSchema)
    }

    /// OpenAPI-subset schema for Gemini `generationConfig.responseSchema`.
    pub fn to_gemini_schema(&self) -> Value {
        self.render(Dialect::Gemini)
    }

    fn render(&self, dialect: Dialect) -> Value {
        let type_name = |lower: &str| match dialect {
            Dialect::JsonSchema => lower.to_string(),
            Dialect::Gemini => lower.to_ascii_uppercase(),
        };

        match self {
            Schema::String => json!({ "type": type_name("string") }),
            Schema::Integer => json!({ "type": type_name("integer") }),
            Schema::Array { items, len } => {
                let mut out = json!({
                    "type": type_name("array"),
                    "items": items.render(dialect),
                });
                if let Some(len) = len {
                    out["minItems"] = json!(len);
                    out["maxItems"] = json!(len);
                }
                out
            }
            Schema::Object(fields) => {
                let mut properties = Map::new();
                for field in fields {
                    let mut prop = field.schema.render(dialect);
                    if let Some(obj) = prop.as_object_mut() {
                        obj.insert("description".to_string(), json!(field.description));
                    }
                    properties.insert(field.name.to_string(), prop);
                }
                let names: Vec<&str> = fields.iter().map(|f| f.name).collect();

                let mut out = json!({
                    "type": type_name("object"),
                    "properties": properties,
                    "required": &names,
                });
                // Gemini rejects `additionalProperties`; `propertyOrdering` keeps generation in declaration order.
                match dialect {
                    Dialect::JsonSchema => out["additionalProperties"] = json!(false),
                    Dialect::Gemini => out["propertyOrdering"] = json!(names),
                }
                out
            }
        }
    }
}

fn mismatch(path: &str, expected: &str, got: &Value) -> SchemaViolation {
    let got = match got {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    SchemaViolation {
        path: path.to_string(),
        reason: format!("expected {expected}, got {got}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::report::StructuredReport;

    fn report_json() -> Value {
        let ten_gods: Vec<Value> = (0..10)
            .map(|i| json!({"name": format!("god-{i}"), "strength": "普通", "score": 5, "description": "d"}))
            .collect();
        json!({
            "day_master": "甲",
            "current_luck_pillar": {"day": "乙巳", "day_influence": 7},
            "ten_gods": ten_gods,
            "notable_interactions": [
                {"type": "冲", "description": "d", "emotional_keywords": ["変化"], "influence_score": 5}
            ],
            "personality": "p",
            "emotional_keywords": ["ワクワク"]
        })
    }

    #[test]
    fn accepts_conforming_report() {
        assert_eq!(StructuredReport::schema().validate(&report_json()), Ok(()));
    }

    #[test]
    fn ignores_unknown_keys() {
        let mut v = report_json();
        v["extra"] = json!("ignored");
        assert!(StructuredReport::schema().validate(&v).is_ok());
    }

    #[test]
    fn reports_path_of_missing_field() {
        let mut v = report_json();
        v["current_luck_pillar"]
            .as_object_mut()
            .unwrap()
            .remove("day_influence");
        let err = StructuredReport::schema().validate(&v).unwrap_err();
        assert_eq!(err.path, "$.current_luck_pillar.day_influence");
        assert_eq!(err.reason, "missing required field");
    }

    #[test]
    fn rejects_fractional_scores() {
        let mut v = report_json();
        v["ten_gods"][0]["score"] = json!(5.5);
        let err = StructuredReport::schema().validate(&v).unwrap_err();
        assert_eq!(err.path, "$.ten_gods[0].score");
        assert_eq!(err.reason, "expected integer, got number");
    }

    #[test]
    fn rejects_integers_beyond_i64() {
        let mut v = report_json();
        v["current_luck_pillar"]["day_influence"] = json!(u64::MAX);
        let err = StructuredReport::schema().validate(&v).unwrap_err();
        assert_eq!(err.path, "$.current_luck_pillar.day_influence");
        assert_eq!(err.reason, format!("integer out of range: {}", u64::MAX));
    }

    #[test]
    fn ten_gods_must_have_exactly_ten_entries() {
        let mut v = report_json();
        v["ten_gods"].as_array_mut().unwrap().pop();
        let err = StructuredReport::schema().validate(&v).unwrap_err();
        assert_eq!(err.path, "$.ten_gods");
        assert_eq!(err.reason, "expected 10 items, got 9");

        v["ten_gods"] = json!([]);
        assert!(StructuredReport::schema().validate(&v).is_err());
    }

    #[test]
    fn rejects_null_for_required_string() {
        let mut v = report_json();
        v["personality"] = Value::Null;
        let err = StructuredReport::schema().validate(&v).unwrap_err();
        assert_eq!(err.to_string(), "$.personality: expected string, got null");
    }

    #[test]
    fn rejects_string_where_array_expected() {
        let mut v = report_json();
        v["notable_interactions"][0]["emotional_keywords"] = json!("変化");
        let err = StructuredReport::schema().validate(&v).unwrap_err();
        assert_eq!(err.path, "$.notable_interactions[0].emotional_keywords");
    }

    #[test]
    fn json_schema_marks_every_field_required() {
        let s = StructuredReport::schema().to_json_schema();
        assert_eq!(s["type"], "object");
        assert_eq!(s["additionalProperties"], false);
        assert_eq!(
            s["required"],
            json!([
                "day_master",
                "current_luck_pillar",
                "ten_gods",
                "notable_interactions",
                "personality",
                "emotional_keywords"
            ])
        );
        let ten_god = &s["properties"]["ten_gods"]["items"];
        assert_eq!(ten_god["properties"]["score"]["type"], "integer");
        assert_eq!(s["properties"]["ten_gods"]["minItems"], 10);
        assert_eq!(s["properties"]["ten_gods"]["maxItems"], 10);
        assert!(s["properties"]["emotional_keywords"].get("minItems").is_none());
        assert_eq!(
            ten_god["required"],
            json!(["name", "strength", "score", "description"])
        );
    }

    #[test]
    fn gemini_schema_uses_uppercase_types_and_ordering() {
        let s = StructuredReport::schema().to_gemini_schema();
        assert_eq!(s["type"], "OBJECT");
        assert!(s.get("additionalProperties").is_none());
        assert_eq!(s["propertyOrdering"][0], "day_master");
        assert_eq!(s["properties"]["ten_gods"]["minItems"], 10);
        assert_eq!(s["properties"]["ten_gods"]["maxItems"], 10);
        assert_eq!(s["properties"]["emotional_keywords"]["type"], "ARRAY");
        assert_eq!(
            s["properties"]["emotional_keywords"]["items"]["type"],
            "STRING"
        );
        assert_eq!(
            s["properties"]["current_luck_pillar"]["properties"]["day_influence"]["type"],
            "INTEGER"
        );
    }
}
