use crate::endpoints::EndpointKind;
use crate::{Error, Result};
use serde_json::Value;
use std::collections::BTreeMap;

/// Type of a task parameter, as declared by its `TaskSpec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskParamType {
    Int,
    Float,
    Bool,
    String,
    /// Id of an entry in the plan's `expr_table`.
    ExprId,
    /// Id of an entry in the plan's `pred_table`.
    PredId,
    /// `node_id` of another plan node, consumed as a side input.
    NodeRef,
    /// `endpoint_id` of an endpoint registry entry.
    EndpointRef,
}

impl TaskParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskParamType::Int => "int",
            TaskParamType::Float => "float",
            TaskParamType::Bool => "bool",
            TaskParamType::String => "string",
            TaskParamType::ExprId => "expr_id",
            TaskParamType::PredId => "pred_id",
            TaskParamType::NodeRef => "node_ref",
            TaskParamType::EndpointRef => "endpoint_ref",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamField {
    pub name: &'static str,
    pub param_type: TaskParamType,
    pub required: bool,
    pub nullable: bool,
    pub default: Option<Value>,
    /// Required endpoint kind, for `EndpointRef` fields.
    pub endpoint_kind: Option<EndpointKind>,
}

impl ParamField {
    pub fn required(name: &'static str, param_type: TaskParamType) -> Self {
        Self {
            name,
            param_type,
            required: true,
            nullable: false,
            default: None,
            endpoint_kind: None,
        }
    }

    pub fn optional(name: &'static str, param_type: TaskParamType) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type)
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn endpoint(name: &'static str, kind: EndpointKind) -> Self {
        Self {
            endpoint_kind: Some(kind),
            ..Self::required(name, TaskParamType::EndpointRef)
        }
    }
}

/// Parameters of one plan node after checking against its task's schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedParams {
    pub int_params: BTreeMap<String, i64>,
    pub float_params: BTreeMap<String, f64>,
    pub bool_params: BTreeMap<String, bool>,
    /// String, ExprId, PredId, and EndpointRef values.
    pub string_params: BTreeMap<String, String>,
    pub node_ref_params: BTreeMap<String, String>,
}

impl ValidatedParams {
    pub fn has_int(&self, name: &str) -> bool {
        self.int_params.contains_key(name)
    }
    pub fn has_float(&self, name: &str) -> bool {
        self.float_params.contains_key(name)
    }
    pub fn has_bool(&self, name: &str) -> bool {
        self.bool_params.contains_key(name)
    }
    pub fn has_string(&self, name: &str) -> bool {
        self.string_params.contains_key(name)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.int_params.get(name).copied()
    }
    pub fn get_float(&self, name: &str) -> Option<f64> {
        self.float_params.get(name).copied()
    }
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.bool_params.get(name).copied()
    }
    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.string_params.get(name).map(String::as_str)
    }
    pub fn get_node_ref(&self, name: &str) -> Option<&str> {
        self.node_ref_params.get(name).map(String::as_str)
    }
}

/// Check `params` against `schema` for operation `op`, applying defaults.
pub fn validate_params(op: &str, schema: &[ParamField], params: &Value) -> Result<ValidatedParams> {
    let invalid = |detail: String| Error::InvalidParams {
        op: op.to_string(),
        detail,
    };

    let empty = serde_json::Map::new();
    let fields = match params {
        Value::Null => &empty,
        Value::Object(fields) => fields,
        _ => return Err(invalid("params must be an object".to_string())),
    };

    if let Some(name) = fields
        .keys()
        .find(|name| !schema.iter().any(|f| f.name == name.as_str()))
    {
        return Err(invalid(format!("unexpected field '{name}'")));
    }

    let mut out = ValidatedParams::default();

    for field in schema {
        let name = field.name;
        let value = match fields.get(name) {
            Some(Value::Null) | None if field.required => {
                return Err(invalid(format!("missing required field '{name}'")));
            }
            None => match &field.default {
                Some(default) => default,
                None => continue,
            },
            Some(value) => value,
        };

        if value.is_null() {
            if !field.nullable {
                return Err(invalid(format!("field '{name}' cannot be null")));
            }
            continue;
        }

        let key = name.to_string();
        match field.param_type {
            TaskParamType::Int => {
                let v = match (value.as_i64(), value.as_f64()) {
                    (Some(v), _) => v,
                    (None, Some(f))
                        if f.is_finite()
                            && f.fract() == 0.0
                            && f >= i64::MIN as f64
                            && f < i64::MAX as f64 =>
                    {
                        f as i64
                    }
                    _ => return Err(invalid(format!("field '{name}' must be int"))),
                };
                out.int_params.insert(key, v);
            }
            TaskParamType::Float => {
                let v = value
                    .as_f64()
                    .ok_or_else(|| invalid(format!("field '{name}' must be number")))?;
                out.float_params.insert(key, v);
            }
            TaskParamType::Bool => {
                let v = value
                    .as_bool()
                    .ok_or_else(|| invalid(format!("field '{name}' must be bool")))?;
                out.bool_params.insert(key, v);
            }
            TaskParamType::String | TaskParamType::ExprId | TaskParamType::PredId => {
                let v = value
                    .as_str()
                    .ok_or_else(|| invalid(format!("field '{name}' must be string")))?;
                out.string_params.insert(key, v.to_string());
            }
            TaskParamType::NodeRef => {
                let v = value
                    .as_str()
                    .ok_or_else(|| invalid(format!("field '{name}' must be string (node_id)")))?;
                out.node_ref_params.insert(key, v.to_string());
            }
            TaskParamType::EndpointRef => {
                let v = value.as_str().ok_or_else(|| {
                    invalid(format!("field '{name}' must be string (endpoint_id)"))
                })?;
                out.string_params.insert(key, v.to_string());
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn schema() -> Vec<ParamField> {
        vec![
            ParamField::required("fanout", TaskParamType::Int),
            ParamField::optional("order", TaskParamType::String).with_default(json!("asc")),
            ParamField::optional("trace", TaskParamType::String).nullable(),
            ParamField::optional("rhs", TaskParamType::NodeRef),
            ParamField::optional("weight", TaskParamType::Float),
            ParamField::optional("enabled", TaskParamType::Bool),
            ParamField::endpoint("endpoint", EndpointKind::Redis),
        ]
    }

    #[test]
    fn test_valid_params_and_defaults() {
        let p = validate_params(
            "op",
            &schema(),
            &json!({"fanout": 10.0, "trace": null, "rhs": "other", "weight": 2, "enabled": true, "endpoint": "ep_0001"}),
        )
        .unwrap();

        assert_eq!(p.get_int("fanout"), Some(10));
        assert_eq!(p.get_string("order"), Some("asc"));
        assert!(!p.has_string("trace"));
        assert_eq!(p.get_node_ref("rhs"), Some("other"));
        assert_eq!(p.get_float("weight"), Some(2.0));
        assert_eq!(p.get_bool("enabled"), Some(true));
        assert_eq!(p.get_string("endpoint"), Some("ep_0001"));
    }

    #[test]
    fn test_param_errors() {
        let cases = [
            (json!(5), "params must be an object"),
            (json!({"endpoint": "ep_1"}), "missing required field 'fanout'"),
            (json!({"fanout": null, "endpoint": "ep_1"}), "missing required field 'fanout'"),
            (json!({"fanout": 1, "endpoint": "ep_1", "bogus": 1}), "unexpected field 'bogus'"),
            (json!({"fanout": 1.5, "endpoint": "ep_1"}), "field 'fanout' must be int"),
            (json!({"fanout": "1", "endpoint": "ep_1"}), "field 'fanout' must be int"),
            (json!({"fanout": 1, "endpoint": "ep_1", "order": null}), "field 'order' cannot be null"),
            (json!({"fanout": 1, "endpoint": "ep_1", "weight": "x"}), "field 'weight' must be number"),
            (json!({"fanout": 1, "endpoint": "ep_1", "enabled": 1}), "field 'enabled' must be bool"),
            (json!({"fanout": 1, "endpoint": "ep_1", "rhs": 3}), "field 'rhs' must be string (node_id)"),
            (json!({"fanout": 1, "endpoint": 7}), "field 'endpoint' must be string (endpoint_id)"),
        ];

        for (params, expect) in cases {
            let err = validate_params("my_op", &schema(), &params).unwrap_err();
            assert_eq!(
                err.to_string(),
                format!("Invalid params for op 'my_op': {expect}"),
            );
        }
    }

    #[test]
    fn test_null_params_is_empty_object() {
        let p = validate_params("op", &[], &Value::Null).unwrap();
        assert_eq!(p, ValidatedParams::default());
    }
}
