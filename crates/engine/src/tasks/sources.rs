use super::{expect_no_inputs, fanout, int_param, trace_field, MAX_FANOUT};
use crate::{Error, ExecCtx, Result, TaskSpec};
use models::keys::{KEY_COUNTRY, KEY_TITLE};
use models::{OutputPattern, ParamField, TaskParamType, ValidatedParams};
use rowset::{ColumnBatch, RowSet, StringDictColumn};
use serde_json::json;
use std::sync::Arc;

pub(super) fn fixed_source_spec() -> TaskSpec {
    TaskSpec {
        op: "fixed_source",
        params_schema: vec![
            ParamField::optional("row_count", TaskParamType::Int).with_default(json!(1)),
            trace_field(),
        ],
        reads: Vec::new(),
        writes: Vec::new(),
        writes_effect: None,
        default_budget_ms: 10,
        output_pattern: OutputPattern::VariableDense,
        is_io: false,
        run: run_fixed_source,
        run_async: None,
    }
}

pub(super) fn viewer_follow_spec() -> TaskSpec {
    TaskSpec {
        op: "viewer.follow",
        params_schema: vec![
            ParamField::required("fanout", TaskParamType::Int),
            trace_field(),
        ],
        reads: Vec::new(),
        writes: vec![KEY_COUNTRY, KEY_TITLE],
        writes_effect: None,
        default_budget_ms: 10,
        output_pattern: OutputPattern::SourceFanoutDense,
        is_io: false,
        run: run_viewer_follow,
        run_async: None,
    }
}

pub(super) fn fetch_cached_recommendation_spec() -> TaskSpec {
    TaskSpec {
        op: "viewer.fetch_cached_recommendation",
        params_schema: vec![
            ParamField::required("fanout", TaskParamType::Int),
            trace_field(),
        ],
        reads: Vec::new(),
        writes: vec![KEY_COUNTRY],
        writes_effect: None,
        default_budget_ms: 100,
        output_pattern: OutputPattern::SourceFanoutDense,
        is_io: false,
        run: run_fetch_cached_recommendation,
        run_async: None,
    }
}

fn run_fixed_source(inputs: &[RowSet], params: &ValidatedParams, _: &ExecCtx<'_>) -> Result<RowSet> {
    expect_no_inputs("fixed_source", inputs)?;

    let row_count = int_param("fixed_source", params, "row_count")?;
    if row_count < 0 {
        return Err(Error::task("fixed_source: 'row_count' must be >= 0"));
    }
    if row_count > MAX_FANOUT {
        return Err(Error::task(format!(
            "fixed_source: 'row_count' exceeds maximum limit ({MAX_FANOUT})"
        )));
    }

    let batch = ColumnBatch::from_ids((1..=row_count).collect());
    Ok(RowSet::new(Arc::new(batch)))
}

/// A column cycling through `dict` row by row.
fn alternating(dict: &[&str], n: usize) -> StringDictColumn {
    StringDictColumn::new(
        dict.iter().map(|s| s.to_string()).collect(),
        (0..n).map(|i| (i % dict.len()) as i32).collect(),
        vec![1; n],
    )
}

fn run_viewer_follow(inputs: &[RowSet], params: &ValidatedParams, _: &ExecCtx<'_>) -> Result<RowSet> {
    expect_no_inputs("viewer.follow", inputs)?;
    let n = fanout("viewer.follow", params, MAX_FANOUT)?;

    let title = StringDictColumn::new(
        (1..=n).map(|i| format!("L{i}")).collect(),
        (0..n as i32).collect(),
        vec![1; n],
    );
    let batch = ColumnBatch::from_ids((1..=n as i64).collect())
        .with_string_column(KEY_COUNTRY, Arc::new(alternating(&["US", "CA"], n)))
        .with_string_column(KEY_TITLE, Arc::new(title));

    tracing::trace!(rows = n, "viewer.follow generated rows");
    Ok(RowSet::new(Arc::new(batch)))
}

fn run_fetch_cached_recommendation(
    inputs: &[RowSet],
    params: &ValidatedParams,
    _: &ExecCtx<'_>,
) -> Result<RowSet> {
    const OP: &str = "viewer.fetch_cached_recommendation";
    expect_no_inputs(OP, inputs)?;
    let n = fanout(OP, params, MAX_FANOUT)?;

    let batch = ColumnBatch::from_ids((0..n as i64).map(|i| 1001 + i).collect())
        .with_string_column(KEY_COUNTRY, Arc::new(alternating(&["CA", "FR"], n)));

    Ok(RowSet::new(Arc::new(batch)))
}
