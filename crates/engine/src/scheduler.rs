use crate::executor::{collect_outputs, BoundNode};
use crate::validate::{dependencies, topo_order};
use crate::{Error, ExecCtx, ExecutionResult, NodeSchemaDelta, Result, RunAsyncFn, TaskRegistry};
use futures::stream::{FuturesUnordered, StreamExt};
use models::Plan;
use rowset::RowSet;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Options of one async plan execution.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Deadline of the whole request. Every node's budget is capped by it.
    pub deadline: Option<Instant>,
    /// Budget of every node, in place of its task's default budget.
    pub node_timeout: Option<Duration>,
}

impl ExecOptions {
    /// Options with a request deadline `budget` from now.
    pub fn with_request_budget(budget: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + budget),
            ..Default::default()
        }
    }
}

type NodeOutcome = (usize, Result<(RowSet, NodeSchemaDelta)>);

/// Execute `plan` as a DAG, interleaving nodes whose inputs have completed.
///
/// Tasks with an async entry point run concurrently on a FuturesUnordered
/// polled by the caller's task, each under a timer of its budget capped by
/// the request deadline. Other tasks run inline as they become ready. The
/// first failure drops every in-flight node and becomes the plan's error.
pub async fn execute_plan_async(
    plan: &Plan,
    ctx: &ExecCtx<'_>,
    options: &ExecOptions,
) -> Result<ExecutionResult> {
    let registry = TaskRegistry::global();
    let order = topo_order(plan)?;

    let index: BTreeMap<&str, usize> = plan
        .nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (node.node_id.as_str(), i))
        .collect();

    let mut frontier = Frontier {
        plan,
        pending: vec![0; plan.nodes.len()],
        successors: vec![Vec::new(); plan.nodes.len()],
        ready: VecDeque::new(),
        done: BTreeMap::new(),
        deltas: vec![None; plan.nodes.len()],
    };
    for (i, node) in plan.nodes.iter().enumerate() {
        for dep in dependencies(registry, node)? {
            frontier.successors[index[dep]].push(i);
            frontier.pending[i] += 1;
        }
    }
    frontier.ready = (0..plan.nodes.len()).filter(|i| frontier.pending[*i] == 0).collect();

    let mut in_flight = FuturesUnordered::new();

    loop {
        while let Some(i) = frontier.ready.pop_front() {
            let node = &plan.nodes[i];
            let bound =
                BoundNode::bind(node, &frontier.done).map_err(|err| err.in_node(&node.node_id))?;

            let started = Instant::now();
            let deadline = node_deadline(started, bound.spec.default_budget_ms, options);
            if deadline <= started {
                return Err(Error::DeadlineExceeded {
                    node_id: node.node_id.clone(),
                });
            }

            match bound.spec.run_async {
                Some(run_async) => {
                    tracing::debug!(node_id = %node.node_id, op = %node.op, "node launched");
                    in_flight.push(run_node_async(i, bound, ctx, run_async, started, deadline));
                }
                None => {
                    let (output, delta) = run_node_inline(&bound, ctx, started, deadline)?;
                    frontier.complete(i, output, delta);
                }
            }
        }

        let Some((i, outcome)) = in_flight.next().await else {
            break;
        };
        // Returning drops `in_flight`, which cancels every node still running.
        let (output, delta) = outcome?;
        frontier.complete(i, output, delta);
    }

    let schema_deltas = order
        .into_iter()
        .map(|i| {
            frontier.deltas[i].take().ok_or_else(|| {
                Error::Plan(format!("Node '{}' never ran", plan.nodes[i].node_id))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ExecutionResult {
        outputs: collect_outputs(plan, &frontier.done)?,
        schema_deltas,
    })
}

/// Completion state of an async execution.
struct Frontier<'p> {
    plan: &'p Plan,
    /// Count of each node's dependencies which have not completed.
    pending: Vec<usize>,
    successors: Vec<Vec<usize>>,
    ready: VecDeque<usize>,
    done: BTreeMap<&'p str, RowSet>,
    deltas: Vec<Option<NodeSchemaDelta>>,
}

impl<'p> Frontier<'p> {
    fn complete(&mut self, index: usize, output: RowSet, delta: NodeSchemaDelta) {
        let node = &self.plan.nodes[index];
        tracing::debug!(
            node_id = %node.node_id,
            op = %node.op,
            rows = output.logical_size(),
            "node completed"
        );

        self.done.insert(node.node_id.as_str(), output);
        self.deltas[index] = Some(delta);

        for &succ in &self.successors[index] {
            self.pending[succ] -= 1;
            if self.pending[succ] == 0 {
                self.ready.push_back(succ);
            }
        }
    }
}

fn node_deadline(started: Instant, default_budget_ms: u64, options: &ExecOptions) -> Instant {
    let budget = started
        + options
            .node_timeout
            .unwrap_or(Duration::from_millis(default_budget_ms));
    match options.deadline {
        Some(deadline) => budget.min(deadline),
        None => budget,
    }
}

fn timed_out(node_id: &str, started: Instant, deadline: Instant) -> Error {
    Error::Timeout {
        node_id: node_id.to_string(),
        budget_ms: deadline.saturating_duration_since(started).as_millis() as u64,
    }
}

async fn run_node_async<'p>(
    index: usize,
    bound: BoundNode<'p>,
    base: &ExecCtx<'_>,
    run_async: RunAsyncFn,
    started: Instant,
    deadline: Instant,
) -> NodeOutcome {
    let node_id = &bound.node.node_id;
    let ctx = bound.context(base);

    let outcome = match tokio::time::timeout_at(
        deadline,
        run_async(&bound.inputs, &bound.params, &ctx),
    )
    .await
    {
        Ok(Ok(output)) => bound.finish(&output).map(|delta| (output, delta)),
        Ok(Err(err)) => Err(err.in_node(node_id)),
        Err(_elapsed) => {
            tracing::warn!(%node_id, op = %bound.node.op, "node timed out");
            Err(timed_out(node_id, started, deadline))
        }
    };
    (index, outcome)
}

fn run_node_inline(
    bound: &BoundNode<'_>,
    base: &ExecCtx<'_>,
    started: Instant,
    deadline: Instant,
) -> Result<(RowSet, NodeSchemaDelta)> {
    let node_id = &bound.node.node_id;

    let output = (bound.spec.run)(&bound.inputs, &bound.params, &bound.context(base))
        .map_err(|err| err.in_node(node_id))?;

    // Inline nodes can't be preempted, so overruns are caught on completion.
    if Instant::now() > deadline {
        tracing::warn!(%node_id, op = %bound.node.op, "inline node overran its budget");
        return Err(timed_out(node_id, started, deadline));
    }
    let delta = bound.finish(&output)?;
    Ok((output, delta))
}
