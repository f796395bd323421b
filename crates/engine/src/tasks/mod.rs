//! Builtin task implementations.
use crate::{Error, Result, TaskSpec};
use models::{ParamField, TaskParamType, ValidatedParams};
use rowset::RowSet;

mod concat;
mod filter;
mod follow;
mod media;
mod sleep;
mod sort;
mod sources;
mod take;
mod viewer;
mod vm;

/// Largest fanout a source or per-user expansion accepts.
pub const MAX_FANOUT: i64 = 10_000_000;
/// Largest per-row fanout of `media`.
pub const MAX_MEDIA_FANOUT: i64 = 10_000;

pub(crate) fn builtin_specs() -> Vec<TaskSpec> {
    vec![
        concat::spec(),
        filter::spec(),
        follow::follow_spec(),
        follow::recommendation_spec(),
        media::spec(),
        sleep::sleep_spec(),
        sleep::busy_cpu_spec(),
        sort::spec(),
        sources::fixed_source_spec(),
        sources::viewer_follow_spec(),
        sources::fetch_cached_recommendation_spec(),
        take::spec(),
        viewer::spec(),
        vm::spec(),
    ]
}

/// The optional, nullable `trace` tag every task accepts.
fn trace_field() -> ParamField {
    ParamField::optional("trace", TaskParamType::String).nullable()
}

fn expect_no_inputs(op: &str, inputs: &[RowSet]) -> Result<()> {
    if !inputs.is_empty() {
        return Err(Error::task(format!("{op}: expected 0 inputs")));
    }
    Ok(())
}

fn expect_one_input<'i>(op: &str, inputs: &'i [RowSet]) -> Result<&'i RowSet> {
    match inputs {
        [input] => Ok(input),
        _ => Err(Error::task(format!(
            "{op}: expected exactly 1 input, got {}",
            inputs.len()
        ))),
    }
}

fn int_param(op: &str, params: &ValidatedParams, name: &str) -> Result<i64> {
    params
        .get_int(name)
        .ok_or_else(|| Error::task(format!("{op}: missing '{name}'")))
}

fn string_param<'p>(op: &str, params: &'p ValidatedParams, name: &str) -> Result<&'p str> {
    match params.get_string(name) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::task(format!("{op}: '{name}' must be non-empty"))),
    }
}

/// Read `fanout` and check it's within `1..=max`.
fn fanout(op: &str, params: &ValidatedParams, max: i64) -> Result<usize> {
    let fanout = int_param(op, params, "fanout")?;
    if fanout <= 0 {
        return Err(Error::task(format!("{op}: 'fanout' must be > 0")));
    }
    if fanout > max {
        return Err(Error::task(format!(
            "{op}: 'fanout' exceeds maximum limit ({max})"
        )));
    }
    Ok(fanout as usize)
}

/// Parse ids of a list reply. Entries which aren't decimal i64s are skipped.
fn parse_ids(items: &[String]) -> Vec<i64> {
    items.iter().filter_map(|s| s.parse::<i64>().ok()).collect()
}

/// Ids of the active rows of `input`, in iteration order.
fn active_ids(input: &RowSet) -> Vec<i64> {
    let batch = input.batch();
    input
        .active_rows()
        .iter()
        .map(|row| batch.id(row as usize))
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::ExecCtx;
    use models::{ExprTable, ParamTable, PredTable};
    use rowset::{ColumnBatch, RowSet};
    use std::sync::Arc;

    lazy_static::lazy_static! {
        pub static ref EMPTY_PARAMS: ParamTable = ParamTable::default();
        pub static ref EMPTY_EXPRS: ExprTable = ExprTable::new();
        pub static ref EMPTY_PREDS: PredTable = PredTable::new();
    }

    pub fn ctx() -> ExecCtx<'static> {
        ExecCtx::new(&EMPTY_PARAMS, &EMPTY_EXPRS, &EMPTY_PREDS)
    }

    pub fn ids(ids: &[i64]) -> RowSet {
        RowSet::new(Arc::new(ColumnBatch::from_ids(ids.to_vec())))
    }

    pub fn ids_of(rows: &RowSet) -> Vec<i64> {
        super::active_ids(rows)
    }
}
