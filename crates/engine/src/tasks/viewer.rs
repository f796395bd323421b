use super::{expect_no_inputs, string_param, trace_field};
use crate::{Error, ExecCtx, Result, TaskSpec};
use futures::future::BoxFuture;
use futures::FutureExt;
use models::keys::KEY_COUNTRY;
use models::{EndpointKind, OutputPattern, ParamField, ValidatedParams};
use rowset::{ColumnBatch, RowSet, StringDictBuilder};
use std::collections::BTreeMap;
use std::sync::Arc;

pub(super) fn spec() -> TaskSpec {
    TaskSpec {
        op: "viewer",
        params_schema: vec![
            ParamField::endpoint("endpoint", EndpointKind::Redis),
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

/// Country of a `user:{id}` hash. Absent and empty values are null.
pub(super) fn country(fields: &BTreeMap<String, String>) -> Option<&str> {
    fields
        .get("country")
        .map(String::as_str)
        .filter(|c| !c.is_empty())
}

fn viewer_row(user_id: u32, fields: &BTreeMap<String, String>) -> RowSet {
    let mut builder = StringDictBuilder::with_capacity(1);
    builder.push(country(fields));

    let batch = ColumnBatch::from_ids(vec![user_id as i64])
        .with_string_column(KEY_COUNTRY, Arc::new(builder.finish()));
    RowSet::new(Arc::new(batch))
}

fn run(inputs: &[RowSet], params: &ValidatedParams, ctx: &ExecCtx<'_>) -> Result<RowSet> {
    expect_no_inputs("viewer", inputs)?;
    let request = ctx.request("viewer")?;
    let endpoint = string_param("viewer", params, "endpoint")?;

    let io = |source| Error::Io { op: "viewer", source };
    let redis = ctx.io_clients("viewer")?.redis(endpoint).map_err(io)?;
    let fields = redis
        .hgetall(&format!("user:{}", request.user_id))
        .map_err(io)?;

    Ok(viewer_row(request.user_id, &fields))
}

fn run_async<'a>(
    inputs: &'a [RowSet],
    params: &'a ValidatedParams,
    ctx: &'a ExecCtx<'a>,
) -> BoxFuture<'a, Result<RowSet>> {
    async move {
        expect_no_inputs("viewer", inputs)?;
        let request = ctx.request("viewer")?;
        let endpoint = string_param("viewer", params, "endpoint")?;

        let io = |source| Error::Io { op: "viewer", source };
        let redis = ctx.async_clients("viewer")?.redis(endpoint).map_err(io)?;
        let fields = redis
            .hgetall(&format!("user:{}", request.user_id))
            .await
            .map_err(io)?;

        Ok(viewer_row(request.user_id, &fields))
    }
    .boxed()
}
