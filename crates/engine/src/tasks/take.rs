use super::{expect_one_input, int_param, trace_field};
use crate::{Error, ExecCtx, Result, TaskSpec};
use models::{OutputPattern, ParamField, TaskParamType, ValidatedParams};
use rowset::RowSet;

pub(super) fn spec() -> TaskSpec {
    TaskSpec {
        op: "take",
        params_schema: vec![
            ParamField::required("count", TaskParamType::Int),
            trace_field(),
        ],
        reads: Vec::new(),
        writes: Vec::new(),
        writes_effect: None,
        default_budget_ms: 10,
        output_pattern: OutputPattern::PrefixOfInput,
        is_io: false,
        run,
        run_async: None,
    }
}

fn run(inputs: &[RowSet], params: &ValidatedParams, _: &ExecCtx<'_>) -> Result<RowSet> {
    let input = expect_one_input("take", inputs)?;
    let count = int_param("take", params, "count")?;
    if count <= 0 {
        return Err(Error::task("take: 'count' must be > 0"));
    }
    Ok(input.truncate_to(usize::try_from(count).unwrap_or(usize::MAX)))
}

#[cfg(test)]
mod test {
    use super::super::test_support::{ctx, ids, ids_of};
    use crate::TaskRegistry;
    use rowset::{RowSet, Selection};
    use serde_json::json;

    fn take(input: &RowSet, count: i64) -> crate::Result<RowSet> {
        let registry = TaskRegistry::global();
        let params = registry.validate_params("take", &json!({ "count": count }))?;
        (registry.spec("take")?.run)(&[input.clone()], &params, &ctx())
    }

    #[test]
    fn test_take_shares_the_batch() {
        let input = ids(&[5, 6, 7, 8]);

        let out = take(&input, 2).unwrap();
        assert_eq!(out.batch_ptr(), input.batch_ptr());
        assert_eq!(out.selection(), &Selection::Prefix(2));
        assert_eq!(ids_of(&out), vec![5, 6]);

        let out = take(&input, 100).unwrap();
        assert_eq!(ids_of(&out), vec![5, 6, 7, 8]);

        let ordered = input.with_order(vec![3, 2, 1, 0]);
        let out = take(&ordered, 3).unwrap();
        assert!(out.shares_batch(&input));
        assert_eq!(ids_of(&out), vec![8, 7, 6]);

        insta::assert_snapshot!(take(&input, 0).unwrap_err(), @"take: 'count' must be > 0");
    }
}
