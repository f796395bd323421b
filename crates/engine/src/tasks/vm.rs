use super::{expect_one_input, int_param, string_param, trace_field};
use crate::{Error, ExecCtx, Result, TaskSpec};
use models::keys::{find_key_by_id, KEY_ID};
use models::{KeyType, OutputPattern, ParamField, TaskParamType, ValidatedParams, WritesEffect};
use rowset::{FloatColumn, RowSet};
use std::sync::Arc;

pub(super) fn spec() -> TaskSpec {
    TaskSpec {
        op: "vm",
        params_schema: vec![
            ParamField::required("out_key", TaskParamType::Int),
            ParamField::required("expr_id", TaskParamType::ExprId),
            trace_field(),
        ],
        reads: Vec::new(),
        writes: Vec::new(),
        writes_effect: Some(WritesEffect::from_param("out_key")),
        default_budget_ms: 50,
        output_pattern: OutputPattern::UnaryPreserveView,
        is_io: false,
        run,
        run_async: None,
    }
}

fn run(inputs: &[RowSet], params: &ValidatedParams, ctx: &ExecCtx<'_>) -> Result<RowSet> {
    let input = expect_one_input("vm", inputs)?;

    let out_key = int_param("vm", params, "out_key")?;
    if out_key <= 0 {
        return Err(Error::task("vm: 'out_key' must be > 0"));
    }
    let expr_id = string_param("vm", params, "expr_id")?;

    let meta = u32::try_from(out_key)
        .ok()
        .and_then(find_key_by_id)
        .ok_or_else(|| Error::task(format!("vm: out_key {out_key} not in key registry")))?;
    if meta.id == KEY_ID {
        return Err(Error::task("vm: cannot write to Key.id"));
    }
    if !meta.allow_write {
        return Err(Error::task(format!("vm: key '{}' is not writable", meta.name)));
    }
    if meta.key_type != KeyType::Float {
        return Err(Error::task("vm: out_key must be Float type"));
    }

    let expr = ctx
        .expr_table
        .get(expr_id)
        .ok_or_else(|| Error::task(format!("vm: expr_id '{expr_id}' not found in expr_table")))?;

    let batch = input.batch();
    let mut column = FloatColumn::nulls(batch.size());
    let mut has_null = false;

    for row in input.active_rows().iter() {
        let row = row as usize;
        match eval::eval_expr(expr, row, batch, ctx.params) {
            None => has_null = true,
            Some(value) if !value.is_finite() => {
                return Err(Error::task(format!(
                    "vm: expression produced non-finite value at row {row}"
                )));
            }
            value @ Some(_) => column.set(row, value),
        }
    }

    if has_null && !meta.nullable {
        return Err(Error::task(format!(
            "vm: null result for non-nullable key '{}'",
            meta.name
        )));
    }

    let next = batch.with_float_column(meta.id, Arc::new(column));
    Ok(input.with_batch(Arc::new(next)))
}
