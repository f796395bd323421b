//! `follow` and `recommendation`: per-user list expansion followed by
//! hydration of each listed user's country.
use super::viewer::country;
use super::{active_ids, expect_one_input, fanout, parse_ids, string_param, trace_field, MAX_FANOUT};
use crate::{Error, ExecCtx, Result, TaskSpec};
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use models::keys::KEY_COUNTRY;
use models::{EndpointKind, OutputPattern, ParamField, TaskParamType, ValidatedParams};
use rowset::{ColumnBatch, RowSet, StringDictBuilder};
use std::collections::BTreeMap;
use std::sync::Arc;

fn spec(op: &'static str, run: crate::RunFn, run_async: crate::RunAsyncFn) -> TaskSpec {
    TaskSpec {
        op,
        params_schema: vec![
            ParamField::endpoint("endpoint", EndpointKind::Redis),
            ParamField::required("fanout", TaskParamType::Int),
            trace_field(),
        ],
        reads: Vec::new(),
        writes: vec![KEY_COUNTRY],
        writes_effect: None,
        default_budget_ms: 100,
        output_pattern: OutputPattern::VariableDense,
        is_io: true,
        run,
        run_async: Some(run_async),
    }
}

pub(super) fn follow_spec() -> TaskSpec {
    spec("follow", run_follow, run_follow_async)
}

pub(super) fn recommendation_spec() -> TaskSpec {
    spec("recommendation", run_recommendation, run_recommendation_async)
}

fn run_follow(inputs: &[RowSet], params: &ValidatedParams, ctx: &ExecCtx<'_>) -> Result<RowSet> {
    expand("follow", inputs, params, ctx)
}

fn run_recommendation(
    inputs: &[RowSet],
    params: &ValidatedParams,
    ctx: &ExecCtx<'_>,
) -> Result<RowSet> {
    expand("recommendation", inputs, params, ctx)
}

fn run_follow_async<'a>(
    inputs: &'a [RowSet],
    params: &'a ValidatedParams,
    ctx: &'a ExecCtx<'a>,
) -> BoxFuture<'a, Result<RowSet>> {
    expand_async("follow", inputs, params, ctx).boxed()
}

fn run_recommendation_async<'a>(
    inputs: &'a [RowSet],
    params: &'a ValidatedParams,
    ctx: &'a ExecCtx<'a>,
) -> BoxFuture<'a, Result<RowSet>> {
    expand_async("recommendation", inputs, params, ctx).boxed()
}

/// Build the output batch from expanded ids and their `user:{id}` hashes,
/// interning countries in first-seen order.
fn hydrated(ids: Vec<i64>, users: &[BTreeMap<String, String>]) -> RowSet {
    let mut countries = StringDictBuilder::with_capacity(ids.len());
    for fields in users {
        countries.push(country(fields));
    }
    let batch = ColumnBatch::from_ids(ids)
        .with_string_column(KEY_COUNTRY, Arc::new(countries.finish()));
    RowSet::new(Arc::new(batch))
}

fn expand(
    op: &'static str,
    inputs: &[RowSet],
    params: &ValidatedParams,
    ctx: &ExecCtx<'_>,
) -> Result<RowSet> {
    let input = expect_one_input(op, inputs)?;
    let fanout = fanout(op, params, MAX_FANOUT)?;
    let endpoint = string_param(op, params, "endpoint")?;

    let io = |source| Error::Io { op, source };
    let redis = ctx.io_clients(op)?.redis(endpoint).map_err(io)?;

    let mut ids = Vec::new();
    for user_id in active_ids(input) {
        let items = redis
            .lrange(&format!("{op}:{user_id}"), 0, fanout as i64 - 1)
            .map_err(io)?;
        ids.extend(parse_ids(&items));
    }

    let users = ids
        .iter()
        .map(|id| redis.hgetall(&format!("user:{id}")))
        .collect::<kv::Result<Vec<_>>>()
        .map_err(io)?;

    tracing::debug!(op, inputs = input.logical_size(), rows = ids.len(), "expanded lists");
    Ok(hydrated(ids, &users))
}

async fn expand_async(
    op: &'static str,
    inputs: &[RowSet],
    params: &ValidatedParams,
    ctx: &ExecCtx<'_>,
) -> Result<RowSet> {
    let input = expect_one_input(op, inputs)?;
    let fanout = fanout(op, params, MAX_FANOUT)?;
    let endpoint = string_param(op, params, "endpoint")?;

    let io = |source| Error::Io { op, source };
    let redis = ctx.async_clients(op)?.redis(endpoint).map_err(io)?;

    let mut ids = Vec::new();
    for user_id in active_ids(input) {
        let items = redis
            .lrange(&format!("{op}:{user_id}"), 0, fanout as i64 - 1)
            .await
            .map_err(io)?;
        ids.extend(parse_ids(&items));
    }

    // Hydration calls run concurrently, bounded by the endpoint's in-flight limit.
    let keys: Vec<String> = ids.iter().map(|id| format!("user:{id}")).collect();
    let users = future::try_join_all(keys.iter().map(|key| redis.hgetall(key)))
        .await
        .map_err(io)?;

    tracing::debug!(op, inputs = input.logical_size(), rows = ids.len(), "expanded lists");
    Ok(hydrated(ids, &users))
}
