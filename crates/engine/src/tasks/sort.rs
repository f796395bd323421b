use super::{expect_one_input, int_param, trace_field};
use crate::{Error, ExecCtx, Result, TaskSpec};
use models::keys::{find_key_by_id, KEY_ID};
use models::{KeyType, OutputPattern, ParamField, Status, TaskParamType, ValidatedParams};
use rowset::RowSet;
use serde_json::json;
use std::cmp::Ordering;

pub(super) fn spec() -> TaskSpec {
    TaskSpec {
        op: "sort",
        params_schema: vec![
            ParamField::required("by", TaskParamType::Int),
            ParamField::optional("order", TaskParamType::String).with_default(json!("asc")),
            trace_field(),
        ],
        reads: Vec::new(),
        writes: Vec::new(),
        writes_effect: None,
        default_budget_ms: 50,
        output_pattern: OutputPattern::PermutationOfInput,
        is_io: false,
        run,
        run_async: None,
    }
}

/// Order non-null values by `cmp`, with nulls after every value regardless
/// of direction.
fn nulls_last<T>(a: Option<T>, b: Option<T>, cmp: impl Fn(T, T) -> Ordering) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => cmp(a, b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn run(inputs: &[RowSet], params: &ValidatedParams, _: &ExecCtx<'_>) -> Result<RowSet> {
    let input = expect_one_input("sort", inputs)?;

    let by = int_param("sort", params, "by")?;
    if by <= 0 {
        return Err(Error::task("sort: 'by' must be > 0"));
    }
    let ascending = match params.get_string("order").unwrap_or("asc") {
        "asc" => true,
        "desc" => false,
        _ => {
            return Err(Error::task(
                "sort: 'order' must be 'asc' or 'desc' if provided",
            ))
        }
    };

    let meta = u32::try_from(by)
        .ok()
        .and_then(find_key_by_id)
        .ok_or_else(|| Error::task(format!("sort: key {by} not in key registry")))?;
    if !meta.allow_read {
        return Err(Error::task(format!("sort: key '{}' is not readable", meta.name)));
    }
    if meta.status == Status::Blocked {
        return Err(Error::task(format!("sort: key '{}' is blocked", meta.name)));
    }

    let directed = |o: Ordering| if ascending { o } else { o.reverse() };
    let missing = || Error::task(format!("sort: column for key '{}' not found", meta.name));

    let batch = input.batch();
    let mut rows = input.materialize_index_view_for_output(input.row_count());

    // `sort_by` is stable, so ties keep their current iteration order.
    match meta.key_type {
        KeyType::Int if meta.id == KEY_ID => {
            let id = |row: u32| {
                let row = row as usize;
                batch.is_id_valid(row).then(|| batch.id(row))
            };
            rows.sort_by(|&a, &b| nulls_last(id(a), id(b), |a, b| directed(a.cmp(&b))));
        }
        KeyType::Int => {
            return Err(Error::task(format!(
                "sort: key '{}' is not sortable (int columns not stored)",
                meta.name
            )));
        }
        KeyType::Float => {
            let column = batch.float_column(meta.id).ok_or_else(missing)?;
            rows.sort_by(|&a, &b| {
                nulls_last(column.get(a as usize), column.get(b as usize), |a, b| {
                    directed(a.partial_cmp(&b).unwrap_or(Ordering::Equal))
                })
            });
        }
        KeyType::String => {
            let column = batch.string_column(meta.id).ok_or_else(missing)?;
            rows.sort_by(|&a, &b| {
                nulls_last(column.get(a as usize), column.get(b as usize), |a, b| {
                    directed(a.cmp(b))
                })
            });
        }
        KeyType::Bool | KeyType::FeatureBundle => {
            return Err(Error::task(format!("sort: key '{}' is not sortable", meta.name)));
        }
    }

    Ok(input.with_order(rows))
}
