//! Registries and artifact types consumed by the engine: keys, params,
//! endpoints, task parameter schemas, write effects, and plans.
pub mod canonical;
pub mod endpoints;
pub mod keys;
pub mod params;
pub mod pattern;
pub mod plan;
pub mod request;
pub mod task_params;
pub mod writes_effect;

pub use endpoints::{EndpointKind, EndpointPolicy, EndpointRegistry, EndpointSpec};
pub use keys::{find_key_by_id, find_key_by_name, KeyMeta, KeyType, Status};
pub use params::{ParamTable, ParamValue};
pub use pattern::OutputPattern;
pub use plan::{ExprNode, ExprTable, Node, Plan, PredNode, PredTable};
pub use request::RequestContext;
pub use task_params::{validate_params, ParamField, TaskParamType, ValidatedParams};
pub use writes_effect::{eval_writes, EffectEnv, EffectResult, WritesEffect};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid params for op '{op}': {detail}")]
    InvalidParams { op: String, detail: String },
    #[error("invalid param_overrides: {0}")]
    ParamOverride(String),
    #[error("endpoint registry: {0}")]
    Endpoints(String),
    #[error("failed to parse plan: {0}")]
    PlanJson(#[from] serde_json::Error),
    #[error("invalid plan: {0}")]
    Plan(String),
    #[error("{0}")]
    Request(String),
}

pub type Result<T> = std::result::Result<T, Error>;
