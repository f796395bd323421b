//! `rankd` reads one ranking request as JSON from stdin, executes a plan
//! against it, and writes the ranked candidates as JSON to stdout.
use anyhow::Context;
use engine::{execute_plan, execute_plan_async, validate_plan, ExecCtx, ExecOptions, TaskRegistry};
use eval::EvalStats;
use kv::{AsyncIoClients, IoClients};
use models::{EndpointRegistry, ParamTable, Plan, RequestContext};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub mod logging;
pub mod plans;
pub mod response;

pub use logging::{init_logging, LogArgs, LogFormat, LogLevel};
use response::{default_candidates, render_candidates, Response};

/// Ranking DAG executor.
#[derive(Debug, clap::Parser)]
#[command(name = "rankd", about, version)]
pub struct Args {
    /// Path of the plan JSON file to execute.
    #[arg(long, env = "RANKD_PLAN", conflicts_with = "plan_name")]
    pub plan: Option<PathBuf>,
    /// Plan store directory.
    #[arg(long, default_value = "artifacts/plans", env = "RANKD_PLAN_DIR")]
    pub plan_dir: PathBuf,
    /// Name of a plan in the plan store, resolved to `<plan-dir>/<name>.plan.json`.
    #[arg(long, env = "RANKD_PLAN_NAME")]
    pub plan_name: Option<String>,
    /// Path of the endpoint registry JSON, required by plans which do I/O.
    #[arg(long, env = "RANKD_ENDPOINTS")]
    pub endpoints: Option<PathBuf>,
    /// Expected `env` of the endpoint registry.
    #[arg(long, env = "RANKD_ENV")]
    pub env: Option<String>,
    /// Execute with the async DAG scheduler rather than sequentially.
    #[arg(long = "async")]
    pub use_async: bool,
    /// Deadline of the whole request in milliseconds, under `--async`.
    #[arg(long, env = "RANKD_REQUEST_BUDGET_MS", requires = "use_async")]
    pub request_budget_ms: Option<u64>,
    /// Budget of every node in milliseconds, in place of each task's default, under `--async`.
    #[arg(long, env = "RANKD_NODE_TIMEOUT_MS", requires = "use_async")]
    pub node_timeout_ms: Option<u64>,
    /// Print registry digests and exit.
    #[arg(long)]
    pub print_registry: bool,
    /// List plans of `--plan-dir/index.json` and exit.
    #[arg(long)]
    pub list_plans: bool,

    #[command(flatten)]
    pub log: LogArgs,
}

/// Outcome of one request.
#[derive(Debug)]
pub enum Reply {
    /// The request was served.
    Ok(Value),
    /// The request itself was malformed. Its body describes why.
    Rejected(Value),
}

impl Reply {
    fn rejected(error: &str, detail: impl ToString) -> Self {
        Reply::Rejected(json!({"error": error, "detail": detail.to_string()}))
    }
}

/// Digests and sizes of every registry this binary was built with.
pub fn registry_summary() -> Value {
    let tasks = TaskRegistry::global();
    json!({
        "key_registry_digest": models::keys::key_registry_digest(),
        "param_registry_digest": models::params::param_registry_digest(),
        "task_manifest_digest": tasks.manifest_digest(),
        "num_keys": models::keys::KEYS.len(),
        "num_params": models::params::PARAMS.len(),
        "num_tasks": tasks.len(),
    })
}

/// Serve the request document `input`.
///
/// Malformed requests are `Reply::Rejected`. Failures to load or execute the
/// plan are errors.
pub fn serve(args: &Args, input: &str) -> anyhow::Result<Reply> {
    let request: Value = match serde_json::from_str(input) {
        Ok(request) => request,
        Err(err) => return Ok(Reply::rejected("Invalid JSON input", err)),
    };

    let request_id = match request.get("request_id").and_then(Value::as_str) {
        Some(id) => id.to_string(),
        None => models::request::generate_request_id(),
    };
    let engine_request_id = models::request::generate_request_id();

    let params = match ParamTable::from_param_overrides(
        request.get("param_overrides").unwrap_or(&Value::Null),
    ) {
        Ok(params) => params,
        Err(err) => return Ok(Reply::rejected("Invalid param_overrides", err)),
    };

    let user_id = match request.get("user_id") {
        None => None,
        Some(value) => match models::request::parse_user_id(value) {
            Ok(user_id) => Some(user_id),
            Err(err) => return Ok(Reply::rejected("Invalid user_id", err)),
        },
    };
    let request_ctx = user_id.map(|user_id| RequestContext {
        request_id: request_id.clone(),
        user_id,
    });

    let plan_path = match (&args.plan, &args.plan_name) {
        (Some(path), _) => Some(path.clone()),
        (None, Some(name)) => Some(plans::plan_path(&args.plan_dir, name)?),
        (None, None) => None,
    };

    let candidates = match plan_path {
        None => default_candidates(),
        Some(path) => {
            tracing::debug!(%request_id, %engine_request_id, plan = %path.display(), "executing plan");
            let outputs = run_plan(args, &path, &params, request_ctx.as_ref())?;
            render_candidates(&outputs)
        }
    };

    let response = Response {
        request_id,
        engine_request_id,
        candidates,
    };
    Ok(Reply::Ok(serde_json::to_value(response)?))
}

fn run_plan(
    args: &Args,
    path: &std::path::Path,
    params: &ParamTable,
    request: Option<&RequestContext>,
) -> anyhow::Result<Vec<rowset::RowSet>> {
    let mut plan = Plan::load(path)?;

    let endpoints = match &args.endpoints {
        Some(path) => Some(Arc::new(
            EndpointRegistry::load(path, args.env.as_deref())
                .context("failed to load endpoint registry")?,
        )),
        None => None,
    };
    validate_plan(&mut plan, endpoints.as_deref())?;

    let stats = EvalStats::default();
    let mut ctx = ExecCtx::new(params, &plan.expr_table, &plan.pred_table);
    ctx.request = request;
    ctx.endpoints = endpoints.as_deref();
    ctx.stats = Some(&stats);

    let result = if args.use_async {
        let mut options = match args.request_budget_ms {
            Some(ms) => ExecOptions::with_request_budget(Duration::from_millis(ms)),
            None => ExecOptions::default(),
        };
        options.node_timeout = args.node_timeout_ms.map(Duration::from_millis);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build runtime")?;

        // Clients live within the runtime which drives their connections.
        runtime.block_on(async {
            let clients = endpoints.clone().map(AsyncIoClients::new);
            let ctx = ExecCtx {
                async_clients: clients.as_ref(),
                ..ctx.clone()
            };
            execute_plan_async(&plan, &ctx, &options).await
        })?
    } else {
        let clients = endpoints.clone().map(IoClients::new);
        let ctx = ExecCtx {
            io_clients: clients.as_ref(),
            ..ctx
        };
        execute_plan(&plan, &ctx)?
    };

    tracing::debug!(
        plan_name = %plan.plan_name,
        outputs = result.outputs.len(),
        regex_evals = stats.regex_evals(),
        schema_deltas = ?result.schema_deltas,
        "plan executed"
    );
    Ok(result.outputs)
}
