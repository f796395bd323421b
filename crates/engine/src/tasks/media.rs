use super::{
    active_ids, expect_one_input, int_param, parse_ids, string_param, trace_field,
    MAX_MEDIA_FANOUT,
};
use crate::{Error, ExecCtx, Result, TaskSpec};
use futures::future::BoxFuture;
use futures::FutureExt;
use models::{EndpointKind, OutputPattern, ParamField, TaskParamType, ValidatedParams};
use rowset::{ColumnBatch, RowSet};
use std::sync::Arc;

pub(super) fn spec() -> TaskSpec {
    TaskSpec {
        op: "media",
        params_schema: vec![
            ParamField::endpoint("endpoint", EndpointKind::Redis),
            ParamField::required("fanout", TaskParamType::Int),
            trace_field(),
        ],
        reads: Vec::new(),
        writes: Vec::new(),
        writes_effect: None,
        default_budget_ms: 100,
        output_pattern: OutputPattern::VariableDense,
        is_io: true,
        run,
        run_async: Some(run_async),
    }
}

fn media_fanout(params: &ValidatedParams) -> Result<i64> {
    let fanout = int_param("media", params, "fanout")?;
    if fanout <= 0 {
        return Err(Error::task("media: 'fanout' must be > 0"));
    }
    if fanout > MAX_MEDIA_FANOUT {
        return Err(Error::task(format!(
            "media: 'fanout' exceeds per-row limit ({MAX_MEDIA_FANOUT})"
        )));
    }
    Ok(fanout)
}

fn run(inputs: &[RowSet], params: &ValidatedParams, ctx: &ExecCtx<'_>) -> Result<RowSet> {
    let input = expect_one_input("media", inputs)?;
    let fanout = media_fanout(params)?;
    let endpoint = string_param("media", params, "endpoint")?;

    let io = |source| Error::Io { op: "media", source };
    let redis = ctx.io_clients("media")?.redis(endpoint).map_err(io)?;

    let mut media_ids = Vec::new();
    for id in active_ids(input) {
        let items = redis
            .lrange(&format!("media:{id}"), 0, fanout - 1)
            .map_err(io)?;
        media_ids.extend(parse_ids(&items));
    }
    Ok(RowSet::new(Arc::new(ColumnBatch::from_ids(media_ids))))
}

fn run_async<'a>(
    inputs: &'a [RowSet],
    params: &'a ValidatedParams,
    ctx: &'a ExecCtx<'a>,
) -> BoxFuture<'a, Result<RowSet>> {
    async move {
        let input = expect_one_input("media", inputs)?;
        let fanout = media_fanout(params)?;
        let endpoint = string_param("media", params, "endpoint")?;

        let io = |source| Error::Io { op: "media", source };
        let redis = ctx.async_clients("media")?.redis(endpoint).map_err(io)?;

        let mut media_ids = Vec::new();
        for id in active_ids(input) {
            let items = redis
                .lrange(&format!("media:{id}"), 0, fanout - 1)
                .await
                .map_err(io)?;
            media_ids.extend(parse_ids(&items));
        }
        Ok(RowSet::new(Arc::new(ColumnBatch::from_ids(media_ids))))
    }
    .boxed()
}
