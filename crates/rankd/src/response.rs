use models::keys::key_name;
use rowset::RowSet;
use serde_json::{Map, Value};

#[derive(Debug, serde::Serialize)]
pub struct Candidate {
    pub id: i64,
    pub fields: Map<String, Value>,
}

#[derive(Debug, serde::Serialize)]
pub struct Response {
    pub request_id: String,
    pub engine_request_id: String,
    pub candidates: Vec<Candidate>,
}

/// Candidates produced when no plan is given.
pub fn default_candidates() -> Vec<Candidate> {
    (1..=5)
        .map(|id| Candidate {
            id,
            fields: Map::new(),
        })
        .collect()
}

/// One candidate per active row of each output, in output order. Fields are
/// the row's non-null float and string cells, named by key.
pub fn render_candidates(outputs: &[RowSet]) -> Vec<Candidate> {
    let mut candidates = Vec::new();

    for rows in outputs {
        let batch = rows.batch();
        let float_keys = batch.float_key_ids();
        let string_keys = batch.string_key_ids();

        for row in rows.materialize_index_view_for_output(batch.size()) {
            let row = row as usize;
            let mut fields = Map::new();

            for key in &float_keys {
                let value = batch.float_column(*key).and_then(|c| c.get(row));
                if let Some(value) = value {
                    fields.insert(key_name(*key), Value::from(value));
                }
            }
            for key in &string_keys {
                let value = batch.string_column(*key).and_then(|c| c.get(row));
                if let Some(value) = value {
                    fields.insert(key_name(*key), Value::from(value));
                }
            }

            candidates.push(Candidate {
                id: batch.id(row),
                fields,
            });
        }
    }
    candidates
}
