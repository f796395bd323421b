use models::keys::KEY_ID;
use models::params::find_param_by_id;
use models::{ExprNode, ParamTable, ParamValue};
use rowset::ColumnBatch;

/// Evaluate `node` at `row` of `batch`. `None` is null.
///
/// Nulls propagate through arithmetic, and `coalesce` yields its first
/// non-null operand. Results are not checked for finiteness here.
pub fn eval_expr(
    node: &ExprNode,
    row: usize,
    batch: &ColumnBatch,
    params: &ParamTable,
) -> Option<f64> {
    match node {
        ExprNode::ConstNumber { value } => Some(*value),
        ExprNode::ConstNull => None,
        ExprNode::KeyRef { key_id } if *key_id == KEY_ID => {
            if batch.is_id_valid(row) {
                Some(batch.id(row) as f64)
            } else {
                None
            }
        }
        ExprNode::KeyRef { key_id } => batch.float_column(*key_id).and_then(|c| c.get(row)),
        ExprNode::ParamRef { param_id } => {
            find_param_by_id(*param_id)?;
            match params.get(*param_id)? {
                ParamValue::Int(v) => Some(*v as f64),
                ParamValue::Float(v) => Some(*v),
                _ => None,
            }
        }
        ExprNode::Add { a, b } => {
            Some(eval_expr(a, row, batch, params)? + eval_expr(b, row, batch, params)?)
        }
        ExprNode::Sub { a, b } => {
            Some(eval_expr(a, row, batch, params)? - eval_expr(b, row, batch, params)?)
        }
        ExprNode::Mul { a, b } => {
            Some(eval_expr(a, row, batch, params)? * eval_expr(b, row, batch, params)?)
        }
        ExprNode::Neg { x } => eval_expr(x, row, batch, params).map(|v| -v),
        ExprNode::Coalesce { a, b } => {
            eval_expr(a, row, batch, params).or_else(|| eval_expr(b, row, batch, params))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use models::params::{
        PARAM_BLOCKLIST_REGEX, PARAM_MAX_CANDIDATES, PARAM_MEDIA_AGE_PENALTY_WEIGHT,
    };
    use quickcheck_macros::quickcheck;
    use rowset::FloatColumn;
    use std::sync::Arc;

    fn key(key_id: u32) -> Box<ExprNode> {
        Box::new(ExprNode::KeyRef { key_id })
    }

    fn num(value: f64) -> Box<ExprNode> {
        Box::new(ExprNode::ConstNumber { value })
    }

    fn batch() -> ColumnBatch {
        let mut score = FloatColumn::nulls(3);
        score.set(0, Some(0.5));
        score.set(2, Some(-2.0));
        ColumnBatch::from_ids(vec![10, 20, 30]).with_float_column(1001, Arc::new(score))
    }

    #[test]
    fn test_key_refs_and_arithmetic() {
        let batch = batch();
        let params = ParamTable::default();

        // id * 2 + score_1
        let expr = ExprNode::Add {
            a: Box::new(ExprNode::Mul { a: key(1), b: num(2.0) }),
            b: key(1001),
        };
        let out: Vec<_> = (0..3).map(|r| eval_expr(&expr, r, &batch, &params)).collect();
        assert_eq!(out, vec![Some(20.5), None, Some(58.0)]);

        let neg = ExprNode::Neg { x: key(1001) };
        assert_eq!(eval_expr(&neg, 2, &batch, &params), Some(2.0));

        let sub = ExprNode::Sub { a: key(1), b: num(0.5) };
        assert_eq!(eval_expr(&sub, 1, &batch, &params), Some(19.5));

        // Missing columns read as null.
        assert_eq!(eval_expr(&ExprNode::KeyRef { key_id: 1002 }, 0, &batch, &params), None);
    }

    #[test]
    fn test_coalesce() {
        let batch = batch();
        let params = ParamTable::default();

        let expr = ExprNode::Coalesce { a: key(1001), b: num(7.0) };
        let out: Vec<_> = (0..3).map(|r| eval_expr(&expr, r, &batch, &params)).collect();
        assert_eq!(out, vec![Some(0.5), Some(7.0), Some(-2.0)]);

        let expr = ExprNode::Coalesce {
            a: Box::new(ExprNode::ConstNull),
            b: Box::new(ExprNode::ConstNull),
        };
        assert_eq!(eval_expr(&expr, 0, &batch, &params), None);
    }

    #[test]
    fn test_param_refs() {
        let batch = batch();
        let mut params = ParamTable::default();
        params.set(PARAM_MEDIA_AGE_PENALTY_WEIGHT, ParamValue::Float(0.25));
        params.set(PARAM_MAX_CANDIDATES, ParamValue::Int(40));
        params.set(PARAM_BLOCKLIST_REGEX, ParamValue::String("US".to_string()));

        for (param_id, expect) in [
            (PARAM_MEDIA_AGE_PENALTY_WEIGHT, Some(0.25)),
            (PARAM_MAX_CANDIDATES, Some(40.0)),
            (PARAM_BLOCKLIST_REGEX, None), // Not numeric.
            (3, None),                     // Registered, but unset.
            (999, None),                   // Not registered.
        ] {
            let expr = ExprNode::ParamRef { param_id };
            assert_eq!(eval_expr(&expr, 0, &batch, &params), expect, "{param_id}");
        }

        params.set(3, ParamValue::Null);
        assert_eq!(eval_expr(&ExprNode::ParamRef { param_id: 3 }, 0, &batch, &params), None);
    }

    #[quickcheck]
    fn nulls_propagate_through_arithmetic(a: Option<i32>, b: Option<i32>) -> bool {
        let column = |v: Option<i32>| {
            let mut c = FloatColumn::nulls(1);
            c.set(0, v.map(f64::from));
            Arc::new(c)
        };
        let batch = ColumnBatch::from_ids(vec![1])
            .with_float_column(1001, column(a))
            .with_float_column(1002, column(b));
        let params = ParamTable::default();

        [
            ExprNode::Add { a: key(1001), b: key(1002) },
            ExprNode::Sub { a: key(1001), b: key(1002) },
            ExprNode::Mul { a: key(1001), b: key(1002) },
        ]
        .iter()
        .all(|expr| eval_expr(expr, 0, &batch, &params).is_some() == (a.is_some() && b.is_some()))
    }
}
