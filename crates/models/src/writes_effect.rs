use crate::task_params::ValidatedParams;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Expression computing the set of keys a task instance writes, as a function
/// of its bound parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum WritesEffect {
    /// A literal set of key ids. Serialized sorted and deduplicated.
    Keys {
        #[serde(serialize_with = "serialize_key_set")]
        key_ids: Vec<u32>,
    },
    /// The key id bound to an int parameter.
    FromParam { param: String },
    /// One sub-effect per value of a string parameter.
    SwitchEnum {
        param: String,
        cases: BTreeMap<String, WritesEffect>,
    },
    Union { items: Vec<WritesEffect> },
}

impl WritesEffect {
    pub fn keys(key_ids: impl IntoIterator<Item = u32>) -> Self {
        WritesEffect::Keys {
            key_ids: key_ids.into_iter().collect(),
        }
    }

    pub fn from_param(param: impl Into<String>) -> Self {
        WritesEffect::FromParam {
            param: param.into(),
        }
    }
}

/// Evaluated writes of a task instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectResult {
    /// Exactly these keys are written.
    Exact(Vec<u32>),
    /// At most these keys are written.
    May(Vec<u32>),
    /// Writes cannot be bounded statically.
    Unknown,
}

impl EffectResult {
    pub fn kind(&self) -> &'static str {
        match self {
            EffectResult::Exact(_) => "Exact",
            EffectResult::May(_) => "May",
            EffectResult::Unknown => "Unknown",
        }
    }

    pub fn key_ids(&self) -> &[u32] {
        match self {
            EffectResult::Exact(k) | EffectResult::May(k) => k,
            EffectResult::Unknown => &[],
        }
    }
}

/// A parameter value bound at plan-link time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectValue {
    Key(u32),
    Str(String),
}

pub type EffectEnv = BTreeMap<String, EffectValue>;

/// Bindings of a node's validated params: positive ints that fit a key id, and strings.
pub fn effect_env_from_params(params: &ValidatedParams) -> EffectEnv {
    let mut env = EffectEnv::new();
    for (name, value) in &params.int_params {
        if let Ok(key) = u32::try_from(*value) {
            if key > 0 {
                env.insert(name.clone(), EffectValue::Key(key));
            }
        }
    }
    for (name, value) in &params.string_params {
        env.insert(name.clone(), EffectValue::Str(value.clone()));
    }
    env
}

pub fn eval_writes(effect: &WritesEffect, env: &EffectEnv) -> EffectResult {
    match effect {
        WritesEffect::Keys { key_ids } => EffectResult::Exact(sorted_unique(key_ids.clone())),

        WritesEffect::FromParam { param } => match env.get(param) {
            Some(EffectValue::Key(key)) => EffectResult::Exact(vec![*key]),
            _ => EffectResult::Unknown,
        },

        WritesEffect::SwitchEnum { param, cases } => {
            if let Some(EffectValue::Str(value)) = env.get(param) {
                return match cases.get(value) {
                    Some(case) => eval_writes(case, env),
                    None => EffectResult::Unknown,
                };
            }

            let mut union = Vec::new();
            for case in cases.values() {
                match eval_writes(case, env) {
                    EffectResult::Unknown => return EffectResult::Unknown,
                    EffectResult::Exact(keys) | EffectResult::May(keys) => union.extend(keys),
                }
            }
            if cases.is_empty() {
                EffectResult::Exact(Vec::new())
            } else {
                EffectResult::May(sorted_unique(union))
            }
        }

        WritesEffect::Union { items } => {
            let mut acc = EffectResult::Exact(Vec::new());
            for item in items {
                acc = combine(acc, eval_writes(item, env));
                if acc == EffectResult::Unknown {
                    break;
                }
            }
            acc
        }
    }
}

fn combine(lhs: EffectResult, rhs: EffectResult) -> EffectResult {
    match (lhs, rhs) {
        (EffectResult::Unknown, _) | (_, EffectResult::Unknown) => EffectResult::Unknown,
        (EffectResult::Exact(mut a), EffectResult::Exact(b)) => {
            a.extend(b);
            EffectResult::Exact(sorted_unique(a))
        }
        (EffectResult::Exact(mut a) | EffectResult::May(mut a), EffectResult::Exact(b) | EffectResult::May(b)) => {
            a.extend(b);
            EffectResult::May(sorted_unique(a))
        }
    }
}

fn sorted_unique(mut keys: Vec<u32>) -> Vec<u32> {
    keys.sort_unstable();
    keys.dedup();
    keys
}

fn serialize_key_set<S: serde::Serializer>(key_ids: &[u32], s: S) -> Result<S::Ok, S::Error> {
    sorted_unique(key_ids.to_vec()).serialize(s)
}
