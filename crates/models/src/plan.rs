use crate::keys::Status;
use crate::writes_effect::EffectResult;
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Numeric expression tree, evaluated per row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ExprNode {
    ConstNumber { value: f64 },
    ConstNull,
    KeyRef { key_id: u32 },
    ParamRef { param_id: u32 },
    Add { a: Box<ExprNode>, b: Box<ExprNode> },
    Sub { a: Box<ExprNode>, b: Box<ExprNode> },
    Mul { a: Box<ExprNode>, b: Box<ExprNode> },
    Neg { x: Box<ExprNode> },
    Coalesce { a: Box<ExprNode>, b: Box<ExprNode> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum CmpOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

/// Homogeneous literal list of an `in` predicate.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Vec<Value>")]
pub enum InList {
    Numbers(Vec<f64>),
    Strings(Vec<String>),
}

impl TryFrom<Vec<Value>> for InList {
    type Error = String;

    fn try_from(items: Vec<Value>) -> std::result::Result<Self, String> {
        match items.first() {
            None => Ok(InList::Numbers(Vec::new())),
            Some(Value::Number(_)) => items
                .iter()
                .map(|v| {
                    v.as_f64()
                        .ok_or_else(|| "in list contains mixed types (expected all numbers)".to_string())
                })
                .collect::<std::result::Result<_, _>>()
                .map(InList::Numbers),
            Some(Value::String(_)) => items
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s),
                    _ => Err("in list contains mixed types (expected all strings)".to_string()),
                })
                .collect::<std::result::Result<_, _>>()
                .map(InList::Strings),
            Some(_) => Err("in list contains unsupported type (expected numbers or strings)".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegexPattern {
    Literal { value: String },
    Param { param_id: u32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct RegexFlags {
    pub case_insensitive: bool,
}

impl TryFrom<String> for RegexFlags {
    type Error = String;

    fn try_from(flags: String) -> std::result::Result<Self, String> {
        match flags.as_str() {
            "" => Ok(Self::default()),
            "i" => Ok(Self {
                case_insensitive: true,
            }),
            _ => Err("regex 'flags' must be '' or 'i'".to_string()),
        }
    }
}

/// Boolean predicate tree, evaluated per row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PredNode {
    ConstBool {
        value: bool,
    },
    And {
        a: Box<PredNode>,
        b: Box<PredNode>,
    },
    Or {
        a: Box<PredNode>,
        b: Box<PredNode>,
    },
    Not {
        x: Box<PredNode>,
    },
    Cmp {
        cmp: CmpOp,
        a: ExprNode,
        b: ExprNode,
    },
    In {
        lhs: ExprNode,
        list: InList,
    },
    IsNull {
        x: ExprNode,
    },
    NotNull {
        x: ExprNode,
    },
    Regex {
        key_id: u32,
        pattern: RegexPattern,
        #[serde(default)]
        flags: RegexFlags,
    },
}

pub type ExprTable = BTreeMap<String, ExprNode>;
pub type PredTable = BTreeMap<String, PredNode>;

#[derive(Debug, Clone, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub op: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub extensions: BTreeMap<String, Value>,
    /// Writes of this node, evaluated during plan validation.
    #[serde(skip)]
    pub writes_eval: Option<EffectResult>,
}

impl Node {
    pub fn new(node_id: &str, op: &str, inputs: &[&str], params: Value) -> Self {
        Self {
            node_id: node_id.to_string(),
            op: op.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            params,
            extensions: BTreeMap::new(),
            writes_eval: None,
        }
    }
}

/// A compiled plan artifact.
#[derive(Debug, Clone, Deserialize)]
pub struct Plan {
    pub schema_version: u32,
    pub plan_name: String,
    pub nodes: Vec<Node>,
    pub outputs: Vec<String>,
    #[serde(default)]
    pub expr_table: ExprTable,
    #[serde(default)]
    pub pred_table: PredTable,
    #[serde(default)]
    pub capabilities_required: Vec<String>,
    #[serde(default)]
    pub extensions: BTreeMap<String, Value>,
}

impl Plan {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|err| Error::Plan(format!("cannot open plan file {}: {err}", path.display())))?;
        Self::parse(&content)
    }

    /// Parse a plan and check its artifact-level invariants.
    pub fn parse(content: &str) -> Result<Self> {
        let plan: Plan = serde_json::from_str(content)?;
        plan.check_envelope()?;
        Ok(plan)
    }

    fn check_envelope(&self) -> Result<()> {
        if self.schema_version != 1 {
            return Err(Error::Plan(format!(
                "unsupported schema_version {}",
                self.schema_version
            )));
        }

        let caps = &self.capabilities_required;
        if let Some(w) = caps.windows(2).find(|w| w[0] >= w[1]) {
            return Err(Error::Plan(if w[0] == w[1] {
                format!("'capabilities_required' contains duplicate: {}", w[0])
            } else {
                "'capabilities_required' must be sorted lexicographically".to_string()
            }));
        }
        if let Some(cap) = caps.iter().find(|c| !capability_is_supported(c)) {
            return Err(Error::Plan(format!("unsupported capability '{cap}'")));
        }

        for key in self.extensions.keys() {
            if !caps.contains(key) {
                return Err(Error::Plan(format!(
                    "extension key '{key}' not in capabilities_required"
                )));
            }
        }
        for node in &self.nodes {
            for key in node.extensions.keys() {
                if !caps.contains(key) {
                    return Err(Error::Plan(format!(
                        "Node '{}' extension key '{key}' requires plan capability '{key}'",
                        node.node_id
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CapabilityMeta {
    pub id: &'static str,
    pub status: Status,
}

pub static CAPABILITIES: &[CapabilityMeta] = &[
    CapabilityMeta {
        id: "cap.rfc.0001.extensions_capabilities.v1",
        status: Status::Active,
    },
    CapabilityMeta {
        id: "cap.rfc.0005.trace_tags.v1",
        status: Status::Active,
    },
    CapabilityMeta {
        id: "cap.rfc.0009.legacy_rerank.v1",
        status: Status::Blocked,
    },
];

pub fn capability_is_supported(id: &str) -> bool {
    CAPABILITIES
        .iter()
        .any(|c| c.id == id && c.status != Status::Blocked)
}
