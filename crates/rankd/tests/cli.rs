use clap::Parser;
use kv::fake::FakeRedis;
use models::EndpointPolicy;
use pretty_assertions::assert_eq;
use rankd::{serve, Args, Reply};
use serde_json::{json, Value};

const PLAN_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../artifacts/plans");

fn args(extra: &[&str]) -> Args {
    Args::parse_from(["rankd", "--plan-dir", PLAN_DIR].iter().chain(extra).copied())
}

fn ok(reply: Reply) -> Value {
    match reply {
        Reply::Ok(doc) => doc,
        Reply::Rejected(doc) => panic!("request was rejected: {doc}"),
    }
}

fn rejected(reply: Reply) -> Value {
    match reply {
        Reply::Rejected(doc) => doc,
        Reply::Ok(doc) => panic!("request was served: {doc}"),
    }
}

fn candidate_ids(doc: &Value) -> Vec<i64> {
    doc["candidates"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].as_i64().unwrap())
        .collect()
}

#[test]
fn test_default_candidates_without_a_plan() {
    let doc = ok(serve(&args(&[]), r#"{"request_id": "r-1", "user_id": 7}"#).unwrap());

    assert_eq!(doc["request_id"], "r-1");
    assert_eq!(candidate_ids(&doc), vec![1, 2, 3, 4, 5]);
    assert_eq!(doc["candidates"][0], json!({"id": 1, "fields": {}}));

    // Generated ids are fresh per request.
    let engine_id = doc["engine_request_id"].as_str().unwrap();
    assert!(!engine_id.is_empty());
    assert_ne!(engine_id, "r-1");

    let doc = ok(serve(&args(&[]), "{}").unwrap());
    let request_id = doc["request_id"].as_str().unwrap();
    assert_eq!(request_id.len(), 36, "{request_id}");
}

#[test]
fn test_malformed_requests_are_rejected() {
    let args = args(&["--plan-name", "filter_take"]);

    let doc = rejected(serve(&args, "{not json").unwrap());
    assert_eq!(doc["error"], "Invalid JSON input");

    let doc = rejected(serve(&args, r#"{"param_overrides": {"nope": 1}}"#).unwrap());
    assert_eq!(doc["error"], "Invalid param_overrides");
    assert_eq!(doc["detail"], "invalid param_overrides: unknown param 'nope'");

    let doc = rejected(serve(&args, r#"{"user_id": -3}"#).unwrap());
    insta::assert_json_snapshot!(doc, @r###"
    {
      "detail": "invalid user_id: must be positive integer (got -3)",
      "error": "Invalid user_id"
    }
    "###);

    let doc = rejected(serve(&args, r#"{"user_id": "12ab"}"#).unwrap());
    assert_eq!(
        doc["detail"],
        "invalid user_id: string \"12ab\" is not a valid decimal integer"
    );
}

#[test]
fn test_plan_store_names() {
    let err = serve(&args(&["--plan-name", "../etc/passwd"]), "{}").unwrap_err();
    insta::assert_snapshot!(
        err,
        @"Invalid plan_name '../etc/passwd'. Plan names must match [A-Za-z0-9_]+ only."
    );

    let err = serve(&args(&["--plan-name", "missing_plan"]), "{}").unwrap_err();
    assert!(format!("{err:#}").contains("missing_plan.plan.json"), "{err:#}");
}

#[test]
fn test_filter_take_plan() {
    let doc = ok(serve(&args(&["--plan-name", "filter_take"]), "{}").unwrap());
    assert_eq!(candidate_ids(&doc), vec![6, 7, 8]);
}

#[test]
fn test_reels_plan_in_both_modes() {
    let request = r#"{"request_id": "reels", "user_id": 1}"#;

    let sync = ok(serve(&args(&["--plan-name", "reels_plan_a"]), request).unwrap());
    let not_sync = ok(serve(&args(&["--plan-name", "reels_plan_a", "--async"]), request).unwrap());

    assert_eq!(candidate_ids(&sync), vec![1009, 1007, 1005, 1003, 1001]);
    assert_eq!(sync["candidates"], not_sync["candidates"]);

    // id + 10 * media_age_penalty_weight, which defaults to 0.2.
    assert_eq!(sync["candidates"][0]["fields"]["final_score"], json!(1011.0));

    let overridden = ok(serve(
        &args(&["--plan-name", "reels_plan_a"]),
        r#"{"param_overrides": {"media_age_penalty_weight": 1.5}}"#,
    )
    .unwrap());
    assert_eq!(overridden["candidates"][0]["fields"]["final_score"], json!(1024.0));
}

#[test]
fn test_plan_failures_are_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.plan.json");
    std::fs::write(
        &path,
        json!({
            "schema_version": 1,
            "plan_name": "bad",
            "nodes": [
                {"node_id": "src", "op": "fixed_source", "inputs": [], "params": {}},
                {"node_id": "top", "op": "take", "inputs": ["src"], "params": {"count": -1}},
            ],
            "outputs": ["top"],
        })
        .to_string(),
    )
    .unwrap();

    let args = Args::parse_from(["rankd", "--plan", path.to_str().unwrap()]);
    let err = serve(&args, "{}").unwrap_err();
    insta::assert_snapshot!(err, @"Node 'top': take: 'count' must be > 0");

    // Parse failures carry their cause.
    std::fs::write(&path, r#"{"schema_version": 1, "plan_name": "#).unwrap();
    let err = serve(&args, "{}").unwrap_err().to_string();
    assert!(err.starts_with("failed to parse plan: EOF while parsing"), "{err}");
}

#[test]
fn test_node_timeout_flag() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nap.plan.json");
    std::fs::write(
        &path,
        json!({
            "schema_version": 1,
            "plan_name": "nap",
            "nodes": [
                {"node_id": "src", "op": "fixed_source", "inputs": [], "params": {}},
                {"node_id": "nap", "op": "sleep", "inputs": ["src"], "params": {"duration_ms": 2000}},
            ],
            "outputs": ["nap"],
        })
        .to_string(),
    )
    .unwrap();
    let path = path.to_str().unwrap();

    let args = Args::parse_from(["rankd", "--plan", path, "--async", "--node-timeout-ms", "5"]);
    let err = serve(&args, "{}").unwrap_err();
    insta::assert_snapshot!(err, @"Node 'nap' timed out after 5ms");

    let err = Args::try_parse_from(["rankd", "--plan", path, "--node-timeout-ms", "5"]).unwrap_err();
    assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
}

#[test]
fn test_viewer_fanout_against_redis() {
    let fake = FakeRedis::start_background().unwrap();
    fake.set_hash("user:1", &[("country", "US")]);
    fake.set_list("follow:1", [10, 20]);
    fake.set_list("recommendation:1", [30]);
    fake.set_hash("user:10", &[("country", "CA")]);
    fake.set_hash("user:20", &[("country", "US")]);
    fake.set_list("media:10", [100, 101, 102]);
    fake.set_list("media:30", [300]);

    let dir = tempfile::tempdir().unwrap();
    let endpoints = dir.path().join("endpoints.json");
    let registry = fake.registry("ep_0001", EndpointPolicy::default());
    std::fs::write(&endpoints, registry.to_json().to_string()).unwrap();
    let endpoints = endpoints.to_str().unwrap();

    let base = ["--plan-name", "viewer_fanout", "--endpoints", endpoints, "--env", "test"];
    let request = r#"{"user_id": "1"}"#;

    let sync = ok(serve(&args(&base), request).unwrap());
    let not_sync = ok(serve(&args(&[&base[..], &["--async"][..]].concat()), request).unwrap());

    // Merged followees and recommendations, then their media.
    assert_eq!(candidate_ids(&sync), vec![10, 20, 30, 100, 101, 300]);
    assert_eq!(
        json!(sync["candidates"].as_array().unwrap()[..3]),
        json!([
            {"id": 10, "fields": {"country": "CA"}},
            {"id": 20, "fields": {"country": "US"}},
            {"id": 30, "fields": {}},
        ])
    );
    assert_eq!(sync["candidates"], not_sync["candidates"]);

    // Plans with endpoint params can't run without the registry.
    let err = serve(&args(&["--plan-name", "viewer_fanout"]), request).unwrap_err();
    insta::assert_snapshot!(
        err,
        @"Node 'viewer': EndpointRef param 'endpoint' requires EndpointRegistry but none provided"
    );

    // Nor against a registry of another environment.
    let err = serve(
        &args(&["--plan-name", "viewer_fanout", "--endpoints", endpoints, "--env", "prod"]),
        request,
    )
    .unwrap_err();
    assert_eq!(
        format!("{err:#}"),
        "failed to load endpoint registry: endpoint registry: env mismatch: expected 'prod', got 'test'"
    );
}

#[test]
fn test_registry_summary() {
    let summary = rankd::registry_summary();

    insta::assert_json_snapshot!(summary, {
        ".key_registry_digest" => "[digest]",
        ".param_registry_digest" => "[digest]",
        ".task_manifest_digest" => "[digest]",
        ".num_params" => "[count]",
        ".num_tasks" => "[count]",
    }, @r###"
    {
      "key_registry_digest": "[digest]",
      "num_keys": 11,
      "num_params": "[count]",
      "num_tasks": "[count]",
      "param_registry_digest": "[digest]",
      "task_manifest_digest": "[digest]"
    }
    "###);

    let digest = summary["task_manifest_digest"].as_str().unwrap();
    assert_eq!(digest.len(), 64);
    assert!(digest.bytes().all(|b| b.is_ascii_hexdigit()));
}

#[test]
fn test_flag_conflicts() {
    let err = Args::try_parse_from(["rankd", "--plan", "a.json", "--plan-name", "a"]).unwrap_err();
    assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);

    let err = Args::try_parse_from(["rankd", "--request-budget-ms", "5"]).unwrap_err();
    assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
}
