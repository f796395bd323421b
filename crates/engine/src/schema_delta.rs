use rowset::{ColumnBatch, RowSet};
use serde::Serialize;
use std::collections::BTreeSet;

/// How one node changed the set of materialized column keys.
/// Every list is sorted and unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaDelta {
    pub in_keys_union: Vec<u32>,
    pub out_keys: Vec<u32>,
    /// `out_keys - in_keys_union`.
    pub new_keys: Vec<u32>,
    /// `in_keys_union - out_keys`.
    pub removed_keys: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSchemaDelta {
    pub node_id: String,
    pub delta: SchemaDelta,
}

fn keys(batch: &ColumnBatch) -> BTreeSet<u32> {
    batch
        .float_key_ids()
        .into_iter()
        .chain(batch.string_key_ids())
        .collect()
}

/// Compute the delta of `output` against the union of `inputs`' keys.
pub fn compute_schema_delta(inputs: &[RowSet], output: &RowSet) -> SchemaDelta {
    // A unary node which returned its input's batch changed no columns.
    if let [input] = inputs {
        if input.shares_batch(output) {
            let keys: Vec<u32> = keys(output.batch()).into_iter().collect();
            return SchemaDelta {
                in_keys_union: keys.clone(),
                out_keys: keys,
                ..Default::default()
            };
        }
    }

    let in_keys: BTreeSet<u32> = inputs.iter().flat_map(|i| keys(i.batch())).collect();
    let out_keys = keys(output.batch());

    SchemaDelta {
        new_keys: out_keys.difference(&in_keys).copied().collect(),
        removed_keys: in_keys.difference(&out_keys).copied().collect(),
        in_keys_union: in_keys.into_iter().collect(),
        out_keys: out_keys.into_iter().collect(),
    }
}
