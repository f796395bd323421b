use crate::{compute_effective_writes, Error, Result, TaskRegistry};
use models::writes_effect::effect_env_from_params;
use models::{eval_writes, EndpointRegistry, Node, Plan, TaskParamType};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Node ids `node` depends on: its inputs, then the nodes named by its
/// `NodeRef` params.
pub(crate) fn dependencies<'n>(registry: &TaskRegistry, node: &'n Node) -> Result<Vec<&'n str>> {
    let spec = registry
        .get(&node.op)
        .ok_or_else(|| Error::Plan(format!("Unknown op '{}' in node '{}'", node.op, node.node_id)))?;

    let mut deps: Vec<&str> = node.inputs.iter().map(String::as_str).collect();
    for field in &spec.params_schema {
        if field.param_type != TaskParamType::NodeRef {
            continue;
        }
        if let Some(node_ref) = node.params.get(field.name).and_then(|v| v.as_str()) {
            deps.push(node_ref);
        }
    }
    Ok(deps)
}

/// Indices of `plan.nodes` in a topological order of inputs and `NodeRef`
/// params. Ties are broken by plan order, so the order is deterministic.
pub fn topo_order(plan: &Plan) -> Result<Vec<usize>> {
    let registry = TaskRegistry::global();

    let index: BTreeMap<&str, usize> = plan
        .nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (node.node_id.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; plan.nodes.len()];
    let mut successors = vec![Vec::new(); plan.nodes.len()];

    for (i, node) in plan.nodes.iter().enumerate() {
        for dep in dependencies(registry, node)? {
            let Some(&d) = index.get(dep) else {
                return Err(Error::Plan(format!(
                    "Node '{}' references missing input: {dep}",
                    node.node_id
                )));
            };
            successors[d].push(i);
            in_degree[i] += 1;
        }
    }

    let mut ready: VecDeque<usize> = (0..plan.nodes.len()).filter(|i| in_degree[*i] == 0).collect();
    let mut order = Vec::with_capacity(plan.nodes.len());

    while let Some(i) = ready.pop_front() {
        order.push(i);
        for &succ in &successors[i] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                ready.push_back(succ);
            }
        }
    }

    if order.len() != plan.nodes.len() {
        return Err(Error::Plan("Plan contains a cycle".to_string()));
    }
    Ok(order)
}

/// Check `plan` against the task registry and `endpoints`, and record each
/// node's evaluated writes.
pub fn validate_plan(plan: &mut Plan, endpoints: Option<&EndpointRegistry>) -> Result<()> {
    let registry = TaskRegistry::global();

    let mut node_ids = BTreeSet::new();
    for node in &plan.nodes {
        if !node_ids.insert(node.node_id.clone()) {
            return Err(Error::Plan(format!("Duplicate node_id: {}", node.node_id)));
        }
    }

    for node in plan.nodes.iter_mut() {
        let Some(spec) = registry.get(&node.op) else {
            return Err(Error::Plan(format!(
                "Unknown op '{}' in node '{}'",
                node.op, node.node_id
            )));
        };
        if let Some(input) = node.inputs.iter().find(|i| !node_ids.contains(*i)) {
            return Err(Error::Plan(format!(
                "Node '{}' references missing input: {input}",
                node.node_id
            )));
        }

        let validated = registry
            .validate_params(&node.op, &node.params)
            .map_err(|err| err.in_node(&node.node_id))?;

        let fail = |detail: String| Err(Error::Plan(format!("Node '{}': {detail}", node.node_id)));

        for field in &spec.params_schema {
            let Some(value) = node.params.get(field.name).and_then(|v| v.as_str()) else {
                continue;
            };
            match field.param_type {
                TaskParamType::ExprId if !plan.expr_table.contains_key(value) => {
                    return fail(format!("expr_id '{value}' not found in expr_table"));
                }
                TaskParamType::PredId if !plan.pred_table.contains_key(value) => {
                    return fail(format!("pred_id '{value}' not found in pred_table"));
                }
                TaskParamType::NodeRef if !node_ids.contains(value) => {
                    return fail(format!(
                        "node_ref '{}' references missing node: {value}",
                        field.name
                    ));
                }
                TaskParamType::EndpointRef => {
                    let Some(endpoints) = endpoints else {
                        return fail(format!(
                            "EndpointRef param '{}' requires EndpointRegistry but none provided",
                            field.name
                        ));
                    };
                    let Some(endpoint) = endpoints.by_id(value) else {
                        return fail(format!("endpoint_id '{value}' not found in EndpointRegistry"));
                    };
                    match field.endpoint_kind {
                        Some(kind) if kind != endpoint.kind => {
                            return fail(format!(
                                "endpoint '{value}' has kind '{}' but param requires '{}'",
                                endpoint.kind.as_str(),
                                kind.as_str()
                            ));
                        }
                        _ => (),
                    }
                }
                _ => (),
            }
        }

        let writes = eval_writes(
            &compute_effective_writes(spec),
            &effect_env_from_params(&validated),
        );
        tracing::trace!(node_id = %node.node_id, op = %node.op, ?writes, "validated node");
        node.writes_eval = Some(writes);
    }

    if let Some(output) = plan.outputs.iter().find(|o| !node_ids.contains(*o)) {
        return Err(Error::Plan(format!("Output references missing node: {output}")));
    }

    topo_order(plan)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use models::{EffectResult, EndpointKind, EndpointPolicy, EndpointSpec};
    use serde_json::{json, Value};

    fn plan(doc: Value) -> Plan {
        let mut doc = doc;
        let base = json!({"schema_version": 1, "plan_name": "test", "outputs": []});
        for (k, v) in base.as_object().unwrap() {
            if doc.get(k).is_none() {
                doc[k] = v.clone();
            }
        }
        Plan::parse(&doc.to_string()).unwrap()
    }

    fn endpoints() -> EndpointRegistry {
        let spec = |endpoint_id: &str, kind| EndpointSpec {
            endpoint_id: endpoint_id.to_string(),
            name: format!("{endpoint_id}_name"),
            kind,
            host: "127.0.0.1".to_string(),
            port: 6379,
            policy: EndpointPolicy::default(),
        };
        EndpointRegistry::from_specs(
            "test",
            vec![spec("ep_0001", EndpointKind::Redis), spec("ep_0002", EndpointKind::Http)],
        )
        .unwrap()
    }

    fn validate(doc: Value) -> std::result::Result<Plan, String> {
        let mut plan = plan(doc);
        validate_plan(&mut plan, Some(&endpoints()))
            .map(|()| plan)
            .map_err(|e| e.to_string())
    }

    #[test]
    fn test_valid_plan_records_writes() {
        let plan = validate(json!({
            "nodes": [
                {"node_id": "src", "op": "fixed_source", "inputs": [], "params": {"row_count": 3}},
                {"node_id": "score", "op": "vm", "inputs": ["src"], "params": {"out_key": 2001, "expr_id": "e"}},
                {"node_id": "viewer", "op": "viewer", "inputs": [], "params": {"endpoint": "ep_0001"}},
                {"node_id": "both", "op": "concat", "inputs": ["score"], "params": {"rhs": "viewer"}},
            ],
            "outputs": ["both"],
            "expr_table": {"e": {"op": "const_number", "value": 1.0}},
        }))
        .unwrap();

        let writes: Vec<_> = plan
            .nodes
            .iter()
            .map(|n| (n.node_id.as_str(), n.writes_eval.clone().unwrap()))
            .collect();
        assert_eq!(
            writes,
            vec![
                ("src", EffectResult::Exact(vec![])),
                ("score", EffectResult::Exact(vec![2001])),
                ("viewer", EffectResult::Exact(vec![3001])),
                ("both", EffectResult::Exact(vec![])),
            ]
        );
        assert_eq!(topo_order(&plan).unwrap(), vec![0, 2, 1, 3]);
    }

    #[test]
    fn test_plan_rejections() {
        let src = json!({"node_id": "src", "op": "fixed_source", "inputs": [], "params": {}});
        let cases = [
            json!({"nodes": [src.clone(), src.clone()]}),
            json!({"nodes": [{"node_id": "x", "op": "explode", "inputs": [], "params": {}}]}),
            json!({"nodes": [{"node_id": "t", "op": "take", "inputs": ["nope"], "params": {"count": 1}}]}),
            json!({"nodes": [src.clone(), {"node_id": "t", "op": "take", "inputs": ["src"], "params": {}}]}),
            json!({"nodes": [src.clone(), {"node_id": "v", "op": "vm", "inputs": ["src"], "params": {"out_key": 2001, "expr_id": "e"}}]}),
            json!({"nodes": [src.clone(), {"node_id": "f", "op": "filter", "inputs": ["src"], "params": {"pred_id": "p"}}]}),
            json!({"nodes": [src.clone(), {"node_id": "c", "op": "concat", "inputs": ["src"], "params": {"rhs": "ghost"}}]}),
            json!({"nodes": [{"node_id": "v", "op": "viewer", "inputs": [], "params": {"endpoint": "ep_0009"}}]}),
            json!({"nodes": [{"node_id": "v", "op": "viewer", "inputs": [], "params": {"endpoint": "ep_0002"}}]}),
            json!({"nodes": [src.clone()], "outputs": ["ghost"]}),
            json!({"nodes": [
                {"node_id": "a", "op": "take", "inputs": ["b"], "params": {"count": 1}},
                {"node_id": "b", "op": "take", "inputs": ["a"], "params": {"count": 1}},
            ]}),
            json!({"nodes": [
                src.clone(),
                {"node_id": "c", "op": "concat", "inputs": ["src"], "params": {"rhs": "c"}},
            ]}),
        ];
        let errors: Vec<String> = cases.into_iter().map(|c| validate(c).unwrap_err()).collect();

        insta::assert_debug_snapshot!(errors, @r###"
        [
            "Duplicate node_id: src",
            "Unknown op 'explode' in node 'x'",
            "Node 't' references missing input: nope",
            "Node 't': Invalid params for op 'take': missing required field 'count'",
            "Node 'v': expr_id 'e' not found in expr_table",
            "Node 'f': pred_id 'p' not found in pred_table",
            "Node 'c': node_ref 'rhs' references missing node: ghost",
            "Node 'v': endpoint_id 'ep_0009' not found in EndpointRegistry",
            "Node 'v': endpoint 'ep_0002' has kind 'http' but param requires 'redis'",
            "Output references missing node: ghost",
            "Plan contains a cycle",
            "Plan contains a cycle",
        ]
        "###);
    }

    #[test]
    fn test_endpoint_params_require_a_registry() {
        let mut plan = plan(json!({
            "nodes": [{"node_id": "v", "op": "viewer", "inputs": [], "params": {"endpoint": "ep_0001"}}],
        }));
        insta::assert_snapshot!(
            validate_plan(&mut plan, None).unwrap_err(),
            @"Node 'v': EndpointRef param 'endpoint' requires EndpointRegistry but none provided"
        );
    }
}
