use super::trace_field;
use crate::{Error, ExecCtx, Result, TaskSpec};
use models::{OutputPattern, ParamField, TaskParamType, ValidatedParams};
use rowset::{ColumnBatch, FloatColumn, RowSet, StringDictColumn};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

pub(super) fn spec() -> TaskSpec {
    TaskSpec {
        op: "concat",
        params_schema: vec![
            ParamField::required("rhs", TaskParamType::NodeRef),
            trace_field(),
        ],
        reads: Vec::new(),
        writes: Vec::new(),
        writes_effect: None,
        default_budget_ms: 50,
        output_pattern: OutputPattern::ConcatDense,
        is_io: false,
        run,
        run_async: None,
    }
}

fn run(inputs: &[RowSet], _: &ValidatedParams, ctx: &ExecCtx<'_>) -> Result<RowSet> {
    let lhs = match inputs {
        [lhs] => lhs,
        _ => {
            return Err(Error::task(format!(
                "op 'concat' expects exactly 1 input, got {}",
                inputs.len()
            )))
        }
    };
    let rhs = ctx
        .node_refs
        .get("rhs")
        .ok_or_else(|| Error::task("op 'concat' missing resolved 'rhs' NodeRef"))?;

    Ok(concat(lhs, rhs))
}

/// Rows of `lhs` followed by rows of `rhs`, as one dense batch.
fn concat(lhs: &RowSet, rhs: &RowSet) -> RowSet {
    let lhs_rows = lhs.materialize_index_view_for_output(lhs.row_count());
    let rhs_rows = rhs.materialize_index_view_for_output(rhs.row_count());
    let (l, r) = (lhs.batch(), rhs.batch());

    let ids = lhs_rows
        .iter()
        .map(|&row| l.id(row as usize))
        .chain(rhs_rows.iter().map(|&row| r.id(row as usize)))
        .collect();
    let mut batch = ColumnBatch::from_ids(ids);

    let float_keys: BTreeSet<u32> = l.float_key_ids().into_iter().chain(r.float_key_ids()).collect();
    for key_id in float_keys {
        let (lc, rc) = (l.float_column(key_id), r.float_column(key_id));

        let mut column = FloatColumn::nulls(lhs_rows.len() + rhs_rows.len());
        let cells = lhs_rows
            .iter()
            .map(|&row| lc.and_then(|c| c.get(row as usize)))
            .chain(rhs_rows.iter().map(|&row| rc.and_then(|c| c.get(row as usize))));
        for (out, value) in cells.enumerate() {
            column.set(out, value);
        }
        batch = batch.with_float_column(key_id, Arc::new(column));
    }

    let string_keys: BTreeSet<u32> = l.string_key_ids().into_iter().chain(r.string_key_ids()).collect();
    for key_id in string_keys {
        let column = concat_strings(
            l.string_column(key_id).map(Arc::as_ref),
            &lhs_rows,
            r.string_column(key_id).map(Arc::as_ref),
            &rhs_rows,
        );
        batch = batch.with_string_column(key_id, Arc::new(column));
    }

    RowSet::new(Arc::new(batch))
}

/// Concatenate one dictionary column. A side without the column contributes
/// nulls. When both dictionaries match, codes are copied as-is. Otherwise the
/// output dictionary is lhs's followed by rhs entries it lacks, and only rhs
/// codes are remapped.
fn concat_strings(
    lhs: Option<&StringDictColumn>,
    lhs_rows: &[u32],
    rhs: Option<&StringDictColumn>,
    rhs_rows: &[u32],
) -> StringDictColumn {
    let (dict, rhs_remap) = match (lhs, rhs) {
        (Some(l), Some(r)) if Arc::ptr_eq(&l.dict, &r.dict) || l.dict == r.dict => {
            (l.dict.clone(), None)
        }
        (Some(l), Some(r)) => {
            let mut merged: Vec<String> = l.dict.as_ref().clone();
            let mut index: HashMap<&str, i32> = l
                .dict
                .iter()
                .enumerate()
                .map(|(code, s)| (s.as_str(), code as i32))
                .collect();

            let remap: Vec<i32> = r
                .dict
                .iter()
                .map(|s| {
                    *index.entry(s.as_str()).or_insert_with(|| {
                        merged.push(s.clone());
                        merged.len() as i32 - 1
                    })
                })
                .collect();
            (Arc::new(merged), Some(remap))
        }
        (Some(l), None) => (l.dict.clone(), None),
        (None, Some(r)) => (r.dict.clone(), None),
        (None, None) => (Arc::new(Vec::new()), None),
    };

    let n = lhs_rows.len() + rhs_rows.len();
    let mut codes = vec![-1; n];
    let mut valid = vec![0u8; n];

    let lhs_codes = lhs_rows
        .iter()
        .map(|&row| lhs.and_then(|c| c.code(row as usize)));
    let rhs_codes = rhs_rows.iter().map(|&row| {
        rhs.and_then(|c| c.code(row as usize)).map(|code| match &rhs_remap {
            Some(remap) => remap[code] as usize,
            None => code,
        })
    });

    for (out, code) in lhs_codes.chain(rhs_codes).enumerate() {
        if let Some(code) = code {
            codes[out] = code as i32;
            valid[out] = 1;
        }
    }

    StringDictColumn {
        dict,
        codes: Arc::new(codes),
        valid: Arc::new(valid),
    }
}
