use crate::validate::topo_order;
use crate::{
    compute_schema_delta, validate_task_output, Error, ExecCtx, NodeSchemaDelta, Result,
    TaskRegistry, TaskSpec,
};
use models::{Node, Plan, ValidatedParams};
use rowset::RowSet;
use std::collections::BTreeMap;
use std::time::Instant;

/// Outputs of an executed plan, in `plan.outputs` order, and the schema
/// delta of every node in topological order.
#[derive(Debug)]
pub struct ExecutionResult {
    pub outputs: Vec<RowSet>,
    pub schema_deltas: Vec<NodeSchemaDelta>,
}

/// A plan node with its spec, params, and upstream RowSets resolved.
pub(crate) struct BoundNode<'p> {
    pub node: &'p Node,
    pub spec: &'static TaskSpec,
    pub params: ValidatedParams,
    pub inputs: Vec<RowSet>,
    pub node_refs: BTreeMap<String, RowSet>,
}

impl<'p> BoundNode<'p> {
    pub fn bind(node: &'p Node, done: &BTreeMap<&str, RowSet>) -> Result<Self> {
        let registry = TaskRegistry::global();
        let spec = registry.spec(&node.op)?;
        let params = registry.validate_params(&node.op, &node.params)?;

        let upstream = |id: &str| {
            done.get(id)
                .cloned()
                .ok_or_else(|| Error::Plan(format!("input '{id}' has not completed")))
        };

        let inputs = node
            .inputs
            .iter()
            .map(|id| upstream(id))
            .collect::<Result<Vec<_>>>()?;

        let mut node_refs = BTreeMap::new();
        for (name, id) in &params.node_ref_params {
            node_refs.insert(name.clone(), upstream(id)?);
        }

        Ok(Self {
            node,
            spec,
            params,
            inputs,
            node_refs,
        })
    }

    /// `base` with this node's resolved NodeRefs attached.
    pub fn context<'a>(&self, base: &ExecCtx<'a>) -> ExecCtx<'a> {
        let mut ctx = base.clone();
        ctx.node_refs = self.node_refs.clone();
        ctx
    }

    /// Check `output` against the op's output contract, and compute its
    /// schema delta.
    pub fn finish(&self, output: &RowSet) -> Result<NodeSchemaDelta> {
        // NodeRef side inputs follow the plan inputs, so `concat` sees [lhs, rhs].
        let inputs: Vec<RowSet> = self
            .inputs
            .iter()
            .chain(self.node_refs.values())
            .cloned()
            .collect();

        validate_task_output(
            &self.node.node_id,
            &self.node.op,
            self.spec.output_pattern,
            &inputs,
            &self.params,
            output,
        )?;

        Ok(NodeSchemaDelta {
            node_id: self.node.node_id.clone(),
            delta: compute_schema_delta(&inputs, output),
        })
    }
}

/// Gather `plan.outputs` from completed node results.
pub(crate) fn collect_outputs(plan: &Plan, done: &BTreeMap<&str, RowSet>) -> Result<Vec<RowSet>> {
    plan.outputs
        .iter()
        .map(|id| {
            done.get(id.as_str())
                .cloned()
                .ok_or_else(|| Error::Plan(format!("Output references missing node: {id}")))
        })
        .collect()
}

/// Execute `plan` one node at a time in topological order, using the
/// blocking entry point of every task.
pub fn execute_plan(plan: &Plan, ctx: &ExecCtx<'_>) -> Result<ExecutionResult> {
    let order = topo_order(plan)?;

    let mut done: BTreeMap<&str, RowSet> = BTreeMap::new();
    let mut schema_deltas = Vec::with_capacity(order.len());

    for index in order {
        let node = &plan.nodes[index];
        let started = Instant::now();

        let bound = BoundNode::bind(node, &done).map_err(|err| err.in_node(&node.node_id))?;
        let output = (bound.spec.run)(&bound.inputs, &bound.params, &bound.context(ctx))
            .map_err(|err| err.in_node(&node.node_id))?;
        let delta = bound.finish(&output)?;

        tracing::debug!(
            node_id = %node.node_id,
            op = %node.op,
            rows = output.logical_size(),
            new_keys = ?delta.delta.new_keys,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "node completed"
        );

        schema_deltas.push(delta);
        done.insert(node.node_id.as_str(), output);
    }

    Ok(ExecutionResult {
        outputs: collect_outputs(plan, &done)?,
        schema_deltas,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::validate_plan;
    use crate::tasks::test_support::{ids_of, EMPTY_PARAMS};
    use models::keys::{KEY_COUNTRY, KEY_TITLE};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn run(doc: Value) -> Result<ExecutionResult> {
        let mut plan = Plan::parse(&doc.to_string()).unwrap();
        validate_plan(&mut plan, None)?;
        let ctx = ExecCtx::new(&EMPTY_PARAMS, &plan.expr_table, &plan.pred_table);
        execute_plan(&plan, &ctx)
    }

    #[test]
    fn test_source_filter_take() {
        let result = run(json!({
            "schema_version": 1,
            "plan_name": "filter_take",
            "nodes": [
                {"node_id": "src", "op": "fixed_source", "inputs": [], "params": {"row_count": 10}},
                {"node_id": "gt5", "op": "filter", "inputs": ["src"], "params": {"pred_id": "p"}},
                {"node_id": "top", "op": "take", "inputs": ["gt5"], "params": {"count": 3}},
            ],
            "outputs": ["top"],
            "pred_table": {"p": {
                "op": "cmp", "cmp": ">",
                "a": {"op": "key_ref", "key_id": 1},
                "b": {"op": "const_number", "value": 5.0},
            }},
        }))
        .unwrap();

        assert_eq!(result.outputs.len(), 1);
        assert_eq!(ids_of(&result.outputs[0]), vec![6, 7, 8]);
        assert_eq!(
            result
                .schema_deltas
                .iter()
                .map(|d| d.node_id.as_str())
                .collect::<Vec<_>>(),
            vec!["src", "gt5", "top"]
        );
    }

    #[test]
    fn test_concat_and_sort_with_schema_deltas() {
        let result = run(json!({
            "schema_version": 1,
            "plan_name": "merge",
            "nodes": [
                {"node_id": "follow", "op": "viewer.follow", "inputs": [], "params": {"fanout": 3}},
                {"node_id": "cached", "op": "viewer.fetch_cached_recommendation", "inputs": [], "params": {"fanout": 2}},
                {"node_id": "both", "op": "concat", "inputs": ["follow"], "params": {"rhs": "cached"}},
                {"node_id": "score", "op": "vm", "inputs": ["both"], "params": {"out_key": 2001, "expr_id": "neg_id"}},
                {"node_id": "ranked", "op": "sort", "inputs": ["score"], "params": {"by": 2001, "order": "desc"}},
            ],
            "outputs": ["ranked", "cached"],
            "expr_table": {"neg_id": {"op": "neg", "x": {"op": "key_ref", "key_id": 1}}},
        }))
        .unwrap();

        assert_eq!(ids_of(&result.outputs[0]), vec![1, 2, 3, 1001, 1002]);
        assert_eq!(ids_of(&result.outputs[1]), vec![1001, 1002]);

        let deltas: Vec<(&str, &[u32])> = result
            .schema_deltas
            .iter()
            .map(|d| (d.node_id.as_str(), d.delta.new_keys.as_slice()))
            .collect();
        assert_eq!(
            deltas,
            vec![
                ("follow", &[KEY_COUNTRY, KEY_TITLE][..]),
                ("cached", &[KEY_COUNTRY][..]),
                ("both", &[][..]),
                ("score", &[2001][..]),
                ("ranked", &[][..]),
            ]
        );
    }

    #[test]
    fn test_node_errors_name_the_node() {
        let err = run(json!({
            "schema_version": 1,
            "plan_name": "bad_take",
            "nodes": [
                {"node_id": "src", "op": "fixed_source", "inputs": [], "params": {}},
                {"node_id": "top", "op": "take", "inputs": ["src"], "params": {"count": 0}},
            ],
            "outputs": ["top"],
        }))
        .unwrap_err();
        insta::assert_snapshot!(err, @"Node 'top': take: 'count' must be > 0");

        let err = run(json!({
            "schema_version": 1,
            "plan_name": "failing_sleep",
            "nodes": [
                {"node_id": "src", "op": "fixed_source", "inputs": [], "params": {}},
                {"node_id": "nap", "op": "sleep", "inputs": ["src"], "params": {"duration_ms": 0, "fail_after_sleep": true}},
            ],
            "outputs": ["nap"],
        }))
        .unwrap_err();
        insta::assert_snapshot!(err, @"Node 'nap': sleep: intentional failure (fail_after_sleep=true)");
    }
}
