use crate::keys::{DefaultValue, Status};
use crate::{Error, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Value type of a runtime-tunable param.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Int,
    Float,
    Bool,
    String,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Bool => "bool",
            ParamType::String => "string",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamMeta {
    pub id: u32,
    pub name: &'static str,
    pub param_type: ParamType,
    pub nullable: bool,
    pub status: Status,
    pub allow_write: bool,
    pub default: Option<DefaultValue>,
}

pub const PARAM_MEDIA_AGE_PENALTY_WEIGHT: u32 = 1;
pub const PARAM_BLOCKLIST_REGEX: u32 = 2;
pub const PARAM_ESR_CUTOFF: u32 = 3;
pub const PARAM_MAX_CANDIDATES: u32 = 4;
pub const PARAM_LEGACY_BOOST: u32 = 5;
pub const PARAM_FROZEN_THRESHOLD: u32 = 6;

/// The param registry, ordered by id.
pub static PARAMS: &[ParamMeta] = &[
    ParamMeta {
        id: PARAM_MEDIA_AGE_PENALTY_WEIGHT,
        name: "media_age_penalty_weight",
        param_type: ParamType::Float,
        nullable: false,
        status: Status::Active,
        allow_write: true,
        default: Some(DefaultValue::Float(0.2)),
    },
    ParamMeta {
        id: PARAM_BLOCKLIST_REGEX,
        name: "blocklist_regex",
        param_type: ParamType::String,
        nullable: true,
        status: Status::Active,
        allow_write: true,
        default: None,
    },
    ParamMeta {
        id: PARAM_ESR_CUTOFF,
        name: "esr_cutoff",
        param_type: ParamType::Float,
        nullable: true,
        status: Status::Active,
        allow_write: true,
        default: None,
    },
    ParamMeta {
        id: PARAM_MAX_CANDIDATES,
        name: "max_candidates",
        param_type: ParamType::Int,
        nullable: false,
        status: Status::Active,
        allow_write: true,
        default: Some(DefaultValue::Int(100)),
    },
    ParamMeta {
        id: PARAM_LEGACY_BOOST,
        name: "legacy_boost",
        param_type: ParamType::Float,
        nullable: true,
        status: Status::Deprecated,
        allow_write: true,
        default: None,
    },
    ParamMeta {
        id: PARAM_FROZEN_THRESHOLD,
        name: "frozen_threshold",
        param_type: ParamType::Float,
        nullable: true,
        status: Status::Active,
        allow_write: false,
        default: None,
    },
];

pub fn find_param_by_id(id: u32) -> Option<&'static ParamMeta> {
    PARAMS
        .binary_search_by_key(&id, |p| p.id)
        .ok()
        .map(|i| &PARAMS[i])
}

pub fn find_param_by_name(name: &str) -> Option<&'static ParamMeta> {
    PARAMS.iter().find(|p| p.name == name)
}

pub fn param_registry_digest() -> String {
    let entries: Vec<Value> = PARAMS
        .iter()
        .map(|p| {
            json!({
                "id": p.id,
                "name": p.name,
                "type": p.param_type.as_str(),
                "nullable": p.nullable,
                "status": p.status.as_str(),
                "allow_write": p.allow_write,
                "default": p.default.map(|d| d.to_json()),
            })
        })
        .collect();
    crate::canonical::digest(&json!({"schema_version": 1, "params": entries}))
}

/// A param bound for one request. Absence from the table means "unset".
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
}

/// Per-request param values, keyed by param id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamTable {
    values: BTreeMap<u32, ParamValue>,
}

impl ParamTable {
    pub fn get(&self, id: u32) -> Option<&ParamValue> {
        self.values.get(&id)
    }

    pub fn has(&self, id: u32) -> bool {
        self.values.contains_key(&id)
    }

    pub fn set(&mut self, id: u32, value: ParamValue) {
        self.values.insert(id, value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Build a table from a request's `param_overrides` object, checking every
    /// entry against the param registry. `null` yields an empty table.
    pub fn from_param_overrides(overrides: &Value) -> Result<Self> {
        let fields = match overrides {
            Value::Null => return Ok(Self::default()),
            Value::Object(fields) => fields,
            _ => return Err(Error::ParamOverride("param_overrides must be an object".into())),
        };

        let mut table = Self::default();
        for (name, value) in fields {
            let meta = find_param_by_name(name)
                .ok_or_else(|| Error::ParamOverride(format!("unknown param '{name}'")))?;

            if !meta.allow_write {
                return Err(Error::ParamOverride(format!("param '{name}' is not writable")));
            }
            if meta.status != Status::Active {
                return Err(Error::ParamOverride(format!(
                    "param '{name}' is {}",
                    meta.status.as_str()
                )));
            }

            let parsed = if value.is_null() {
                if !meta.nullable {
                    return Err(Error::ParamOverride(format!("param '{name}' cannot be null")));
                }
                ParamValue::Null
            } else {
                match meta.param_type {
                    ParamType::Int => ParamValue::Int(validate_int(value, name)?),
                    ParamType::Float => ParamValue::Float(validate_float(value, name)?),
                    ParamType::Bool => ParamValue::Bool(
                        value
                            .as_bool()
                            .ok_or_else(|| type_error(name, "bool"))?,
                    ),
                    ParamType::String => ParamValue::String(
                        value
                            .as_str()
                            .ok_or_else(|| type_error(name, "string"))?
                            .to_string(),
                    ),
                }
            };
            table.set(meta.id, parsed);
        }
        Ok(table)
    }
}

fn type_error(name: &str, expected: &str) -> Error {
    Error::ParamOverride(format!("param '{name}' must be {expected}"))
}

/// Accept an integral JSON number that fits in i64.
pub fn validate_int(value: &Value, name: &str) -> Result<i64> {
    if let Some(v) = value.as_i64() {
        return Ok(v);
    }
    if value.is_u64() {
        return Err(Error::ParamOverride(format!(
            "param '{name}' value out of int64 range"
        )));
    }
    match value.as_f64() {
        Some(f) if !f.is_finite() => Err(Error::ParamOverride(format!(
            "param '{name}' must be finite"
        ))),
        Some(f) if f.fract() != 0.0 => Err(type_error(name, "int")),
        Some(f) if f < i64::MIN as f64 || f >= i64::MAX as f64 => Err(Error::ParamOverride(
            format!("param '{name}' value out of int64 range"),
        )),
        Some(f) => Ok(f as i64),
        None => Err(type_error(name, "int")),
    }
}

pub fn validate_float(value: &Value, name: &str) -> Result<f64> {
    match value.as_f64() {
        Some(f) if f.is_finite() => Ok(f),
        Some(_) => Err(Error::ParamOverride(format!("param '{name}' must be finite"))),
        None => Err(type_error(name, "float")),
    }
}
