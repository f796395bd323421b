use super::{expect_one_input, string_param, trace_field};
use crate::{Error, ExecCtx, Result, TaskSpec};
use eval::PredEvaluator;
use models::{OutputPattern, ParamField, TaskParamType, ValidatedParams};
use rowset::RowSet;

pub(super) fn spec() -> TaskSpec {
    TaskSpec {
        op: "filter",
        params_schema: vec![
            ParamField::required("pred_id", TaskParamType::PredId),
            trace_field(),
        ],
        reads: Vec::new(),
        writes: Vec::new(),
        writes_effect: None,
        default_budget_ms: 50,
        output_pattern: OutputPattern::StableFilter,
        is_io: false,
        run,
        run_async: None,
    }
}

fn run(inputs: &[RowSet], params: &ValidatedParams, ctx: &ExecCtx<'_>) -> Result<RowSet> {
    let input = expect_one_input("filter", inputs)?;
    let pred_id = string_param("filter", params, "pred_id")?;

    let pred = ctx
        .pred_table
        .get(pred_id)
        .ok_or_else(|| Error::task(format!("filter: pred_id '{pred_id}' not found in pred_table")))?;

    let evaluator = PredEvaluator::new(pred, input.batch(), ctx.params, ctx.stats)
        .map_err(|source| Error::Eval { op: "filter", source })?;

    let selection: Vec<u32> = input
        .active_rows()
        .iter()
        .filter(|row| evaluator.eval(*row as usize))
        .collect();

    Ok(input.with_selection_clear_order(selection))
}

#[cfg(test)]
mod test {
    use super::super::test_support::{ids, ids_of, EMPTY_EXPRS};
    use crate::{ExecCtx, TaskRegistry};
    use eval::EvalStats;
    use models::keys::KEY_COUNTRY;
    use models::{ParamTable, PredTable};
    use rowset::{RowSet, StringDictBuilder};
    use serde_json::json;
    use std::sync::Arc;

    fn preds() -> PredTable {
        serde_json::from_value(json!({
            "id_gt_5": {"op": "cmp", "cmp": ">", "a": {"op": "key_ref", "key_id": 1}, "b": {"op": "const_number", "value": 5.0}},
            "us_like": {"op": "regex", "key_id": 3001, "pattern": {"kind": "literal", "value": "^u"}, "flags": "i"},
            "bad_regex": {"op": "regex", "key_id": 3001, "pattern": {"kind": "literal", "value": "("}},
        }))
        .unwrap()
    }

    fn run(ctx: &ExecCtx<'_>, input: RowSet, pred_id: &str) -> crate::Result<RowSet> {
        let registry = TaskRegistry::global();
        let params = registry.validate_params("filter", &json!({ "pred_id": pred_id }))?;
        (registry.spec("filter")?.run)(&[input], &params, ctx)
    }

    #[test]
    fn test_filter_is_a_stable_subsequence() {
        let preds = preds();
        let params = ParamTable::default();
        let ctx = ExecCtx::new(&params, &EMPTY_EXPRS, &preds);

        let input = ids(&[9, 3, 7, 1, 6, 8]);
        let out = run(&ctx, input.clone(), "id_gt_5").unwrap();
        assert!(out.shares_batch(&input));
        assert_eq!(ids_of(&out), vec![9, 7, 6, 8]);

        // Filtering an ordered view keeps the view's order and drops the order itself.
        let ordered = input.with_order(vec![5, 4, 3, 2, 1, 0]);
        let out = run(&ctx, ordered, "id_gt_5").unwrap();
        assert_eq!(out.order(), None);
        assert_eq!(ids_of(&out), vec![8, 6, 7, 9]);

        insta::assert_snapshot!(
            run(&ctx, ids(&[1]), "nope").unwrap_err(),
            @"filter: pred_id 'nope' not found in pred_table"
        );
    }

    #[test]
    fn test_filter_regex_counts_dictionary_evaluations() {
        let preds = preds();
        let params = ParamTable::default();
        let stats = EvalStats::default();
        let mut ctx = ExecCtx::new(&params, &EMPTY_EXPRS, &preds);
        ctx.stats = Some(&stats);

        let mut country = StringDictBuilder::with_capacity(100);
        for i in 0..100 {
            country.push(Some(if i % 2 == 0 { "US" } else { "CA" }));
        }
        let batch = ids(&(1..=100).collect::<Vec<_>>())
            .batch()
            .with_string_column(KEY_COUNTRY, Arc::new(country.finish()));

        let out = run(&ctx, RowSet::new(Arc::new(batch)), "us_like").unwrap();
        assert_eq!(out.logical_size(), 50);
        assert_eq!(stats.regex_evals(), 2);

        let err = run(&ctx, out, "bad_regex").unwrap_err().to_string();
        assert!(
            err.starts_with("filter: invalid regex pattern '(':"),
            "{err}"
        );
    }
}
