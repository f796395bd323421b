//! Plan execution: the task registry and task implementations, plan
//! validation, and the sequential and async DAG executors.
mod context;
mod contract;
mod executor;
mod registry;
mod scheduler;
mod schema_delta;
pub mod tasks;
mod validate;

pub use context::ExecCtx;
pub use contract::validate_task_output;
pub use executor::{execute_plan, ExecutionResult};
pub use registry::{compute_effective_writes, RunAsyncFn, RunFn, TaskRegistry, TaskSpec};
pub use scheduler::{execute_plan_async, ExecOptions};
pub use schema_delta::{compute_schema_delta, NodeSchemaDelta, SchemaDelta};
pub use validate::{topo_order, validate_plan};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Models(#[from] models::Error),
    /// A task rejected its inputs or params, or failed while running.
    #[error("{0}")]
    Task(String),
    #[error("{op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: kv::Error,
    },
    #[error("{op}: {source}")]
    Eval {
        op: &'static str,
        #[source]
        source: eval::Error,
    },
    #[error("Unknown op '{0}'")]
    UnknownOp(String),
    #[error("task registry: {0}")]
    Registry(String),
    #[error("{0}")]
    Plan(String),
    #[error("Node '{node_id}': op '{op}' violated output contract: {detail}")]
    Contract {
        node_id: String,
        op: String,
        detail: String,
    },
    #[error("Node '{node_id}' timed out after {budget_ms}ms")]
    Timeout { node_id: String, budget_ms: u64 },
    #[error("Node '{node_id}': execution timeout (deadline exceeded before start)")]
    DeadlineExceeded { node_id: String },
    #[error("Node '{node_id}': {source}")]
    Node {
        node_id: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn task(message: impl Into<String>) -> Self {
        Error::Task(message.into())
    }

    pub(crate) fn in_node(self, node_id: &str) -> Self {
        match self {
            // These already name their node.
            Error::Contract { .. }
            | Error::Timeout { .. }
            | Error::DeadlineExceeded { .. }
            | Error::Node { .. } => self,
            other => Error::Node {
                node_id: node_id.to_string(),
                source: Box::new(other),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
