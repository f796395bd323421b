use crate::{tasks, Error, ExecCtx, Result};
use futures::future::BoxFuture;
use models::keys::KEY_ID;
use models::{OutputPattern, ParamField, ValidatedParams, WritesEffect};
use rowset::RowSet;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Blocking entry point of a task.
pub type RunFn = fn(&[RowSet], &ValidatedParams, &ExecCtx<'_>) -> Result<RowSet>;

/// Async entry point of a task, for tasks which wait on I/O or timers.
pub type RunAsyncFn =
    for<'a> fn(&'a [RowSet], &'a ValidatedParams, &'a ExecCtx<'a>) -> BoxFuture<'a, Result<RowSet>>;

/// Static description of an operation.
#[derive(Clone)]
pub struct TaskSpec {
    pub op: &'static str,
    pub params_schema: Vec<ParamField>,
    pub reads: Vec<u32>,
    pub writes: Vec<u32>,
    pub writes_effect: Option<WritesEffect>,
    pub default_budget_ms: u64,
    pub output_pattern: OutputPattern,
    pub is_io: bool,
    pub run: RunFn,
    pub run_async: Option<RunAsyncFn>,
}

impl std::fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSpec")
            .field("op", &self.op)
            .field("params_schema", &self.params_schema)
            .field("writes", &self.writes)
            .field("writes_effect", &self.writes_effect)
            .field("default_budget_ms", &self.default_budget_ms)
            .field("output_pattern", &self.output_pattern)
            .field("is_io", &self.is_io)
            .field("has_run_async", &self.run_async.is_some())
            .finish()
    }
}

/// Combine a spec's static `writes` and its `writes_effect` into one effect.
pub fn compute_effective_writes(spec: &TaskSpec) -> WritesEffect {
    match (&spec.writes[..], &spec.writes_effect) {
        ([], None) => WritesEffect::keys([]),
        (writes, None) => WritesEffect::keys(writes.iter().copied()),
        ([], Some(effect)) => effect.clone(),
        (writes, Some(effect)) => WritesEffect::Union {
            items: vec![WritesEffect::keys(writes.iter().copied()), effect.clone()],
        },
    }
}

/// Registry of TaskSpecs, keyed by op.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    specs: BTreeMap<&'static str, TaskSpec>,
}

lazy_static::lazy_static! {
    static ref GLOBAL: TaskRegistry =
        TaskRegistry::with_builtin_tasks().expect("builtin task specs are valid");
}

impl TaskRegistry {
    /// The registry of every builtin task.
    pub fn global() -> &'static TaskRegistry {
        &GLOBAL
    }

    pub fn with_builtin_tasks() -> Result<Self> {
        let mut registry = Self::default();
        for spec in tasks::builtin_specs() {
            registry.register(spec)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, spec: TaskSpec) -> Result<()> {
        let op = spec.op;

        if self.specs.contains_key(op) {
            return Err(Error::Registry(format!("duplicate op '{op}'")));
        }
        if spec.writes.contains(&KEY_ID) {
            return Err(Error::Registry(format!(
                "op '{op}' must not write the id key ({KEY_ID})"
            )));
        }
        let mut seen = BTreeSet::new();
        for field in &spec.params_schema {
            if !seen.insert(field.name) {
                return Err(Error::Registry(format!(
                    "op '{op}' declares param '{}' more than once",
                    field.name
                )));
            }
        }

        self.specs.insert(op, spec);
        Ok(())
    }

    pub fn get(&self, op: &str) -> Option<&TaskSpec> {
        self.specs.get(op)
    }

    pub fn spec(&self, op: &str) -> Result<&TaskSpec> {
        self.get(op).ok_or_else(|| Error::UnknownOp(op.to_string()))
    }

    pub fn specs(&self) -> impl Iterator<Item = &TaskSpec> {
        self.specs.values()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn validate_params(&self, op: &str, params: &Value) -> Result<ValidatedParams> {
        let spec = self.spec(op)?;
        Ok(models::validate_params(op, &spec.params_schema, params)?)
    }

    /// Canonical JSON description of every registered task.
    pub fn manifest_json(&self) -> Value {
        let tasks: Vec<Value> = self
            .specs
            .values()
            .map(|spec| {
                let params: Vec<Value> = spec
                    .params_schema
                    .iter()
                    .map(|f| {
                        let mut field = json!({
                            "name": f.name,
                            "type": f.param_type.as_str(),
                            "required": f.required,
                            "nullable": f.nullable,
                        });
                        if let Some(default) = &f.default {
                            field["default"] = default.clone();
                        }
                        if let Some(kind) = f.endpoint_kind {
                            field["endpoint_kind"] = json!(kind.as_str());
                        }
                        field
                    })
                    .collect();

                json!({
                    "op": spec.op,
                    "params_schema": params,
                    "reads": spec.reads,
                    "writes": spec.writes,
                    "writes_effect": compute_effective_writes(spec),
                    "default_budget_ms": spec.default_budget_ms,
                    "output_pattern": spec.output_pattern.as_str(),
                    "is_io": spec.is_io,
                    "has_run_async": spec.run_async.is_some(),
                })
            })
            .collect();

        json!({"schema_version": 1, "tasks": tasks})
    }

    pub fn manifest_digest(&self) -> String {
        models::canonical::digest(&self.manifest_json())
    }
}
