/// How a task's output rows relate to its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputPattern {
    /// Source with a fixed-size dense output.
    SourceFanoutDense,
    /// Same rows, same selection; columns may be added or replaced.
    UnaryPreserveView,
    /// Subsequence of input active rows, in input order.
    StableFilter,
    /// The first `count` input active rows.
    PrefixOfInput,
    /// lhs active rows followed by rhs active rows, densely.
    ConcatDense,
    /// Dense output of data-dependent size.
    VariableDense,
    /// Same active rows, reordered.
    PermutationOfInput,
}

impl OutputPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputPattern::SourceFanoutDense => "source_fanout_dense",
            OutputPattern::UnaryPreserveView => "unary_preserve_view",
            OutputPattern::StableFilter => "stable_filter",
            OutputPattern::PrefixOfInput => "prefix_of_input",
            OutputPattern::ConcatDense => "concat_dense",
            OutputPattern::VariableDense => "variable_dense",
            OutputPattern::PermutationOfInput => "permutation_of_input",
        }
    }
}
