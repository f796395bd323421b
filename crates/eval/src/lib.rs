//! Row-wise evaluation of plan expression and predicate trees.
use std::sync::atomic::{AtomicU64, Ordering};

mod expr;
mod pred;

pub use expr::eval_expr;
pub use pred::PredEvaluator;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid regex pattern '{pattern}': {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Counters of work done while evaluating predicates.
#[derive(Debug, Default)]
pub struct EvalStats {
    regex_evals: AtomicU64,
}

impl EvalStats {
    /// Number of regex matches run against dictionary entries.
    pub fn regex_evals(&self) -> u64 {
        self.regex_evals.load(Ordering::Relaxed)
    }

    fn add_regex_evals(&self, n: usize) {
        self.regex_evals.fetch_add(n as u64, Ordering::Relaxed);
    }
}
