use crate::{Error, Result};
use models::{OutputPattern, ValidatedParams};
use rowset::RowSet;

/// Active rows are exactly `[0, row_count)`, in order.
fn is_dense(rows: &RowSet) -> bool {
    let mut expect = 0u32;
    for row in rows.active_rows().iter() {
        if row != expect {
            return false;
        }
        expect += 1;
    }
    expect as usize == rows.row_count()
}

fn active(rows: &RowSet) -> Vec<u32> {
    rows.materialize_index_view_for_output(rows.row_count())
}

fn is_subsequence(input: &[u32], output: &[u32]) -> bool {
    let mut it = input.iter();
    output.iter().all(|row| it.any(|r| r == row))
}

/// Check `output` of node `node_id` against the output pattern of its op.
///
/// `inputs` are the contract inputs: plan inputs, followed by the resolved
/// `rhs` for `ConcatDense`.
pub fn validate_task_output(
    node_id: &str,
    op: &str,
    pattern: OutputPattern,
    inputs: &[RowSet],
    params: &ValidatedParams,
    output: &RowSet,
) -> Result<()> {
    let violated = |detail: String| Error::Contract {
        node_id: node_id.to_string(),
        op: op.to_string(),
        detail,
    };
    let first_input = || match inputs.first() {
        Some(input) => Ok(input),
        None => Err(violated(format!("{pattern:?} requires at least 1 input"))),
    };
    let same_row_count = |input: &RowSet| {
        if output.row_count() != input.row_count() {
            return Err(violated(format!(
                "expected out.row_count={} ({pattern:?}), got {}",
                input.row_count(),
                output.row_count()
            )));
        }
        Ok(())
    };

    match pattern {
        OutputPattern::SourceFanoutDense => {
            let Some(fanout) = params.get_int("fanout") else {
                return Err(violated("SourceFanoutDense requires 'fanout' param".to_string()));
            };
            if output.row_count() as i64 != fanout {
                return Err(violated(format!(
                    "expected out.row_count={fanout} (SourceFanoutDense), got {}",
                    output.row_count()
                )));
            }
            if !is_dense(output) {
                return Err(violated("SourceFanoutDense requires dense active rows [0..N)".to_string()));
            }
        }
        OutputPattern::UnaryPreserveView => {
            let input = first_input()?;
            same_row_count(input)?;
            if active(input) != active(output) {
                return Err(violated(
                    "UnaryPreserveView requires output active rows to match input[0]".to_string(),
                ));
            }
        }
        OutputPattern::StableFilter => {
            let input = first_input()?;
            same_row_count(input)?;
            if !is_subsequence(&active(input), &active(output)) {
                return Err(violated(
                    "StableFilter requires output active rows to be a subsequence of input[0]"
                        .to_string(),
                ));
            }
        }
        OutputPattern::PrefixOfInput => {
            let input = first_input()?;
            let Some(count) = params.get_int("count") else {
                return Err(violated("PrefixOfInput requires 'count' param".to_string()));
            };
            same_row_count(input)?;

            let input_rows = active(input);
            let k = input_rows.len().min(count.max(0) as usize);
            if active(output) != input_rows[..k] {
                return Err(violated(format!(
                    "PrefixOfInput requires output active rows to be the first {k} of input[0] active rows"
                )));
            }
        }
        OutputPattern::ConcatDense => {
            let [lhs, rhs] = inputs else {
                return Err(violated(format!(
                    "ConcatDense requires exactly 2 inputs, got {}",
                    inputs.len()
                )));
            };
            let expect = lhs.logical_size() + rhs.logical_size();
            if output.row_count() != expect {
                return Err(violated(format!(
                    "expected out.row_count={expect} (ConcatDense), got {}",
                    output.row_count()
                )));
            }
            if !is_dense(output) {
                return Err(violated("ConcatDense requires dense active rows [0..N)".to_string()));
            }
        }
        OutputPattern::VariableDense => {
            if !is_dense(output) {
                return Err(violated("VariableDense requires dense active rows [0..N)".to_string()));
            }
        }
        OutputPattern::PermutationOfInput => {
            let input = first_input()?;
            same_row_count(input)?;

            let (mut want, mut got) = (active(input), active(output));
            want.sort_unstable();
            got.sort_unstable();
            if want != got {
                return Err(violated(
                    "PermutationOfInput requires output active rows to permute input[0]"
                        .to_string(),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use rowset::ColumnBatch;
    use std::sync::Arc;

    fn rows(n: usize) -> RowSet {
        RowSet::new(Arc::new(ColumnBatch::from_ids((0..n as i64).collect())))
    }

    fn params(fields: &[(&str, i64)]) -> ValidatedParams {
        let mut params = ValidatedParams::default();
        for (name, value) in fields {
            params.int_params.insert(name.to_string(), *value);
        }
        params
    }

    fn check(
        pattern: OutputPattern,
        inputs: &[RowSet],
        params: &ValidatedParams,
        output: &RowSet,
    ) -> std::result::Result<(), String> {
        validate_task_output("n1", "op", pattern, inputs, params, output).map_err(|e| e.to_string())
    }

    #[test]
    fn test_conforming_outputs() {
        let input = rows(5).with_selection(vec![0, 2, 3, 4]);
        let none = params(&[]);

        for (pattern, inputs, params, output) in [
            (OutputPattern::SourceFanoutDense, vec![], params(&[("fanout", 3)]), rows(3)),
            (OutputPattern::UnaryPreserveView, vec![input.clone()], none.clone(), input.clone()),
            (
                OutputPattern::StableFilter,
                vec![input.clone()],
                none.clone(),
                input.with_selection_clear_order(vec![0, 4]),
            ),
            (
                OutputPattern::PrefixOfInput,
                vec![input.clone()],
                params(&[("count", 2)]),
                input.truncate_to(2),
            ),
            (
                OutputPattern::PrefixOfInput,
                vec![input.clone()],
                params(&[("count", 10)]),
                input.truncate_to(10),
            ),
            (
                OutputPattern::ConcatDense,
                vec![input.clone(), rows(2)],
                none.clone(),
                rows(6),
            ),
            (OutputPattern::VariableDense, vec![input.clone()], none.clone(), rows(0)),
            (
                OutputPattern::PermutationOfInput,
                vec![input.clone()],
                none.clone(),
                input.with_order(vec![4, 3, 2, 1, 0]),
            ),
        ] {
            assert_eq!(check(pattern, &inputs, &params, &output), Ok(()), "{pattern:?}");
        }
    }

    #[test]
    fn test_violations() {
        let input = rows(5).with_selection(vec![0, 2, 3, 4]);
        let none = params(&[]);

        let errors: Vec<String> = [
            (OutputPattern::SourceFanoutDense, vec![], params(&[("fanout", 4)]), rows(3)),
            (
                OutputPattern::SourceFanoutDense,
                vec![],
                params(&[("fanout", 3)]),
                rows(3).with_selection(vec![0, 1]),
            ),
            (OutputPattern::UnaryPreserveView, vec![], none.clone(), rows(1)),
            (OutputPattern::UnaryPreserveView, vec![input.clone()], none.clone(), rows(5)),
            (OutputPattern::StableFilter, vec![input.clone()], none.clone(), rows(4)),
            (
                OutputPattern::StableFilter,
                vec![input.clone()],
                none.clone(),
                input.with_selection_clear_order(vec![4, 0]),
            ),
            (
                OutputPattern::PrefixOfInput,
                vec![input.clone()],
                params(&[("count", 2)]),
                input.truncate_to(3),
            ),
            (OutputPattern::ConcatDense, vec![input.clone()], none.clone(), rows(4)),
            (
                OutputPattern::ConcatDense,
                vec![input.clone(), rows(2)],
                none.clone(),
                rows(7),
            ),
            (
                OutputPattern::VariableDense,
                vec![],
                none.clone(),
                rows(3).truncate_to(1),
            ),
            (
                OutputPattern::PermutationOfInput,
                vec![input.clone()],
                none.clone(),
                input.with_selection_clear_order(vec![0, 2]),
            ),
        ]
        .into_iter()
        .map(|(pattern, inputs, params, output)| {
            check(pattern, &inputs, &params, &output).unwrap_err()
        })
        .collect();

        insta::assert_debug_snapshot!(errors, @r###"
        [
            "Node 'n1': op 'op' violated output contract: expected out.row_count=4 (SourceFanoutDense), got 3",
            "Node 'n1': op 'op' violated output contract: SourceFanoutDense requires dense active rows [0..N)",
            "Node 'n1': op 'op' violated output contract: UnaryPreserveView requires at least 1 input",
            "Node 'n1': op 'op' violated output contract: UnaryPreserveView requires output active rows to match input[0]",
            "Node 'n1': op 'op' violated output contract: expected out.row_count=5 (StableFilter), got 4",
            "Node 'n1': op 'op' violated output contract: StableFilter requires output active rows to be a subsequence of input[0]",
            "Node 'n1': op 'op' violated output contract: PrefixOfInput requires output active rows to be the first 2 of input[0] active rows",
            "Node 'n1': op 'op' violated output contract: ConcatDense requires exactly 2 inputs, got 1",
            "Node 'n1': op 'op' violated output contract: expected out.row_count=6 (ConcatDense), got 7",
            "Node 'n1': op 'op' violated output contract: VariableDense requires dense active rows [0..N)",
            "Node 'n1': op 'op' violated output contract: PermutationOfInput requires output active rows to permute input[0]",
        ]
        "###);
    }
}
