use crate::{eval_expr, Error, EvalStats, Result};
use models::plan::{CmpOp, InList, RegexFlags, RegexPattern};
use models::{ExprNode, ParamTable, ParamValue, PredNode};
use rowset::{ColumnBatch, StringDictColumn};

/// A predicate prepared against one batch.
///
/// Preparation resolves everything that depends only on the batch's
/// dictionaries: each `regex` is run once per dictionary entry of its column,
/// and each string `in` becomes a membership mask over dictionary codes. Rows
/// then evaluate by code lookup.
pub struct PredEvaluator<'a> {
    root: Prepared<'a>,
    batch: &'a ColumnBatch,
    params: &'a ParamTable,
}

enum Prepared<'a> {
    Const(bool),
    And(Box<Prepared<'a>>, Box<Prepared<'a>>),
    Or(Box<Prepared<'a>>, Box<Prepared<'a>>),
    Not(Box<Prepared<'a>>),
    Cmp(CmpOp, &'a ExprNode, &'a ExprNode),
    InNumbers(&'a ExprNode, &'a [f64]),
    IsNull(&'a ExprNode),
    NotNull(&'a ExprNode),
    /// True where the row's dictionary code is set in `mask`.
    DictMask {
        column: &'a StringDictColumn,
        mask: Vec<bool>,
    },
}

impl<'a> PredEvaluator<'a> {
    pub fn new(
        pred: &'a PredNode,
        batch: &'a ColumnBatch,
        params: &'a ParamTable,
        stats: Option<&EvalStats>,
    ) -> Result<Self> {
        Ok(Self {
            root: prepare(pred, batch, params, stats)?,
            batch,
            params,
        })
    }

    /// Evaluate at `row`. Comparisons against null are false.
    pub fn eval(&self, row: usize) -> bool {
        self.eval_node(&self.root, row)
    }

    fn eval_node(&self, node: &Prepared<'a>, row: usize) -> bool {
        let expr = |e: &ExprNode| eval_expr(e, row, self.batch, self.params);

        match node {
            Prepared::Const(value) => *value,
            Prepared::And(a, b) => self.eval_node(a, row) && self.eval_node(b, row),
            Prepared::Or(a, b) => self.eval_node(a, row) || self.eval_node(b, row),
            Prepared::Not(x) => !self.eval_node(x, row),
            Prepared::Cmp(cmp, a, b) => match (expr(*a), expr(*b)) {
                (Some(a), Some(b)) => match cmp {
                    CmpOp::Eq => a == b,
                    CmpOp::Ne => a != b,
                    CmpOp::Lt => a < b,
                    CmpOp::Le => a <= b,
                    CmpOp::Gt => a > b,
                    CmpOp::Ge => a >= b,
                },
                _ => false,
            },
            Prepared::InNumbers(lhs, list) => match expr(*lhs) {
                Some(v) => list.contains(&v),
                None => false,
            },
            Prepared::IsNull(x) => expr(*x).is_none(),
            Prepared::NotNull(x) => expr(*x).is_some(),
            Prepared::DictMask { column, mask } => column
                .code(row)
                .and_then(|code| mask.get(code).copied())
                .unwrap_or(false),
        }
    }
}

fn prepare<'a>(
    pred: &'a PredNode,
    batch: &'a ColumnBatch,
    params: &ParamTable,
    stats: Option<&EvalStats>,
) -> Result<Prepared<'a>> {
    let recurse = |p: &'a PredNode| prepare(p, batch, params, stats).map(Box::new);

    Ok(match pred {
        PredNode::ConstBool { value } => Prepared::Const(*value),
        PredNode::And { a, b } => Prepared::And(recurse(a)?, recurse(b)?),
        PredNode::Or { a, b } => Prepared::Or(recurse(a)?, recurse(b)?),
        PredNode::Not { x } => Prepared::Not(recurse(x)?),
        PredNode::Cmp { cmp, a, b } => Prepared::Cmp(*cmp, a, b),
        PredNode::IsNull { x } => Prepared::IsNull(x),
        PredNode::NotNull { x } => Prepared::NotNull(x),
        PredNode::In {
            lhs,
            list: InList::Numbers(list),
        } => Prepared::InNumbers(lhs, list),
        PredNode::In {
            lhs,
            list: InList::Strings(list),
        } => {
            // String membership is only defined over a string column.
            let column = match lhs {
                ExprNode::KeyRef { key_id } => batch.string_column(*key_id),
                _ => None,
            };
            match column {
                Some(column) => Prepared::DictMask {
                    mask: column.dict.iter().map(|s| list.contains(s)).collect(),
                    column,
                },
                None => Prepared::Const(false),
            }
        }
        PredNode::Regex {
            key_id,
            pattern,
            flags,
        } => {
            let pattern = match pattern {
                RegexPattern::Literal { value } => Some(value.as_str()),
                RegexPattern::Param { param_id } => match params.get(*param_id) {
                    Some(ParamValue::String(s)) => Some(s.as_str()),
                    _ => None,
                },
            };
            match (batch.string_column(*key_id), pattern) {
                (Some(column), Some(pattern)) => Prepared::DictMask {
                    mask: match_dictionary(column, pattern, *flags, stats)?,
                    column,
                },
                _ => Prepared::Const(false),
            }
        }
    })
}

fn match_dictionary(
    column: &StringDictColumn,
    pattern: &str,
    flags: RegexFlags,
    stats: Option<&EvalStats>,
) -> Result<Vec<bool>> {
    let re = regex::RegexBuilder::new(pattern)
        .case_insensitive(flags.case_insensitive)
        .build()
        .map_err(|source| Error::Regex {
            pattern: pattern.to_string(),
            source,
        })?;

    if let Some(stats) = stats {
        stats.add_regex_evals(column.dict.len());
    }
    tracing::trace!(%pattern, dict_len = column.dict.len(), "matching regex against dictionary");

    Ok(column.dict.iter().map(|entry| re.is_match(entry)).collect())
}
