use std::collections::BTreeMap;
use std::sync::Arc;

/// Identifier column: one i64 per row, plus a validity byte.
#[derive(Debug, Clone, PartialEq)]
pub struct IdColumn {
    pub values: Vec<i64>,
    pub valid: Vec<u8>,
}

/// Numeric column of `n` f64 values with per-row validity.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatColumn {
    pub values: Vec<f64>,
    pub valid: Vec<u8>,
}

impl FloatColumn {
    /// Build a column of `n` null cells.
    pub fn nulls(n: usize) -> Self {
        Self {
            values: vec![0.0; n],
            valid: vec![0; n],
        }
    }

    pub fn from_values(values: Vec<f64>) -> Self {
        let valid = vec![1; values.len()];
        Self { values, valid }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, row: usize) -> Option<f64> {
        match self.valid.get(row) {
            Some(1) => self.values.get(row).copied(),
            _ => None,
        }
    }

    pub fn set(&mut self, row: usize, value: Option<f64>) {
        match value {
            Some(v) => {
                self.values[row] = v;
                self.valid[row] = 1;
            }
            None => {
                self.values[row] = 0.0;
                self.valid[row] = 0;
            }
        }
    }
}

/// Dictionary-encoded string column.
///
/// `codes[i]` indexes into `dict`, with -1 marking an unset cell. The dictionary,
/// codes, and validity are each independently shared so that a derived column can
/// reuse an unchanged dictionary by pointer.
#[derive(Debug, Clone)]
pub struct StringDictColumn {
    pub dict: Arc<Vec<String>>,
    pub codes: Arc<Vec<i32>>,
    pub valid: Arc<Vec<u8>>,
}

impl StringDictColumn {
    pub fn new(dict: Vec<String>, codes: Vec<i32>, valid: Vec<u8>) -> Self {
        Self {
            dict: Arc::new(dict),
            codes: Arc::new(codes),
            valid: Arc::new(valid),
        }
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Dictionary code of `row`, if the cell is valid and the code is in range.
    pub fn code(&self, row: usize) -> Option<usize> {
        if self.valid.get(row).copied() != Some(1) {
            return None;
        }
        match self.codes.get(row).copied() {
            Some(code) if code >= 0 && (code as usize) < self.dict.len() => Some(code as usize),
            _ => None,
        }
    }

    pub fn get(&self, row: usize) -> Option<&str> {
        self.code(row).map(|code| self.dict[code].as_str())
    }
}

/// Accumulates a dictionary string column, interning values in first-seen order.
#[derive(Debug, Default)]
pub struct StringDictBuilder {
    dict: Vec<String>,
    index: fxhash::FxHashMap<String, i32>,
    codes: Vec<i32>,
    valid: Vec<u8>,
}

impl StringDictBuilder {
    pub fn with_capacity(rows: usize) -> Self {
        Self {
            codes: Vec::with_capacity(rows),
            valid: Vec::with_capacity(rows),
            ..Default::default()
        }
    }

    /// Intern `value` and return its code without appending a row.
    pub fn intern(&mut self, value: &str) -> i32 {
        if let Some(code) = self.index.get(value) {
            return *code;
        }
        let code = self.dict.len() as i32;
        self.dict.push(value.to_string());
        self.index.insert(value.to_string(), code);
        code
    }

    pub fn push(&mut self, value: Option<&str>) {
        match value {
            Some(value) => {
                let code = self.intern(value);
                self.codes.push(code);
                self.valid.push(1);
            }
            None => {
                self.codes.push(-1);
                self.valid.push(0);
            }
        }
    }

    pub fn finish(self) -> StringDictColumn {
        StringDictColumn::new(self.dict, self.codes, self.valid)
    }
}

/// Fixed-row-count columnar store keyed by numeric key id.
///
/// A batch is never mutated once it's shared behind an `Arc`. Derived batches
/// are built with `with_float_column` / `with_string_column`, which clone the
/// column maps and share every untouched column by reference count.
#[derive(Debug, Clone)]
pub struct ColumnBatch {
    size: usize,
    ids: Arc<IdColumn>,
    floats: BTreeMap<u32, Arc<FloatColumn>>,
    strings: BTreeMap<u32, Arc<StringDictColumn>>,
}

impl ColumnBatch {
    /// Build a batch of `n` rows with zeroed, valid ids.
    pub fn new(n: usize) -> Self {
        Self {
            size: n,
            ids: Arc::new(IdColumn {
                values: vec![0; n],
                valid: vec![1; n],
            }),
            floats: BTreeMap::new(),
            strings: BTreeMap::new(),
        }
    }

    pub fn from_ids(ids: Vec<i64>) -> Self {
        let valid = vec![1; ids.len()];
        Self {
            size: ids.len(),
            ids: Arc::new(IdColumn { values: ids, valid }),
            floats: BTreeMap::new(),
            strings: BTreeMap::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Set the id of `row`. Only meaningful while the batch is still being built;
    /// a shared id column is cloned first.
    pub fn set_id(&mut self, row: usize, id: i64) {
        let ids = Arc::make_mut(&mut self.ids);
        ids.values[row] = id;
        ids.valid[row] = 1;
    }

    pub fn id(&self, row: usize) -> i64 {
        self.ids.values[row]
    }

    pub fn is_id_valid(&self, row: usize) -> bool {
        self.ids.valid.get(row).copied() == Some(1)
    }

    pub fn id_column(&self) -> &Arc<IdColumn> {
        &self.ids
    }

    pub fn float_column(&self, key_id: u32) -> Option<&Arc<FloatColumn>> {
        self.floats.get(&key_id)
    }

    pub fn string_column(&self, key_id: u32) -> Option<&Arc<StringDictColumn>> {
        self.strings.get(&key_id)
    }

    pub fn float_key_ids(&self) -> Vec<u32> {
        self.floats.keys().copied().collect()
    }

    pub fn string_key_ids(&self) -> Vec<u32> {
        self.strings.keys().copied().collect()
    }

    /// A new batch with `key_id` bound to `column`, sharing every other column.
    pub fn with_float_column(&self, key_id: u32, column: Arc<FloatColumn>) -> Self {
        debug_assert_eq!(column.len(), self.size);
        let mut next = self.clone();
        next.floats.insert(key_id, column);
        next
    }

    /// A new batch with `key_id` bound to `column`, sharing every other column.
    pub fn with_string_column(&self, key_id: u32, column: Arc<StringDictColumn>) -> Self {
        debug_assert_eq!(column.len(), self.size);
        let mut next = self.clone();
        next.strings.insert(key_id, column);
        next
    }
}
