use crate::ColumnBatch;
use std::sync::Arc;

/// Active-row selection of a RowSet.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Every row of the batch.
    All,
    /// Rows `[0, n)`.
    Prefix(usize),
    /// An explicit, ascending-by-construction list of row indices.
    Indices(Arc<[u32]>),
}

impl Selection {
    fn contains(&self, row: u32, mask: &[bool]) -> bool {
        match self {
            Selection::All => true,
            Selection::Prefix(n) => (row as usize) < *n,
            Selection::Indices(_) => mask.get(row as usize).copied().unwrap_or(false),
        }
    }
}

/// A ColumnBatch plus a view of which rows are active, and in what order.
///
/// Filtering, truncation, and sorting produce new RowSets over the *same*
/// batch. Only tasks that change column content build a new batch.
#[derive(Debug, Clone)]
pub struct RowSet {
    batch: Arc<ColumnBatch>,
    selection: Selection,
    order: Option<Arc<[u32]>>,
}

impl RowSet {
    pub fn new(batch: Arc<ColumnBatch>) -> Self {
        Self {
            batch,
            selection: Selection::All,
            order: None,
        }
    }

    pub fn batch(&self) -> &ColumnBatch {
        &self.batch
    }

    pub fn batch_arc(&self) -> &Arc<ColumnBatch> {
        &self.batch
    }

    /// Identity of the backing batch, for zero-copy checks.
    pub fn batch_ptr(&self) -> *const ColumnBatch {
        Arc::as_ptr(&self.batch)
    }

    pub fn shares_batch(&self, other: &RowSet) -> bool {
        Arc::ptr_eq(&self.batch, &other.batch)
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn order(&self) -> Option<&[u32]> {
        self.order.as_deref()
    }

    /// Number of rows in the backing batch, regardless of selection.
    pub fn row_count(&self) -> usize {
        self.batch.size()
    }

    /// Number of active rows.
    pub fn logical_size(&self) -> usize {
        self.active_rows().len()
    }

    pub fn active_rows(&self) -> ActiveRows<'_> {
        let n = self.batch.size();

        let view = match (&self.order, &self.selection) {
            (None, Selection::All) => View::Range(n as u32),
            (None, Selection::Prefix(k)) => View::Range((*k).min(n) as u32),
            (None, Selection::Indices(idx)) => View::Slice(idx),
            (Some(order), Selection::Indices(idx)) => {
                let mut mask = vec![false; n];
                for &row in idx.iter() {
                    if let Some(m) = mask.get_mut(row as usize) {
                        *m = true;
                    }
                }
                View::Ordered {
                    order,
                    selection: &self.selection,
                    mask,
                }
            }
            (Some(order), selection) => View::Ordered {
                order,
                selection,
                mask: Vec::new(),
            },
        };
        ActiveRows { view }
    }

    /// Active rows as an index list, capped at `limit`.
    pub fn materialize_index_view_for_output(&self, limit: usize) -> Vec<u32> {
        self.active_rows().to_vec(limit)
    }

    /// Replace the batch, keeping selection and order.
    pub fn with_batch(&self, batch: Arc<ColumnBatch>) -> Self {
        Self {
            batch,
            selection: self.selection.clone(),
            order: self.order.clone(),
        }
    }

    /// Replace the selection, keeping the order.
    pub fn with_selection(&self, selection: Vec<u32>) -> Self {
        Self {
            batch: self.batch.clone(),
            selection: Selection::Indices(selection.into()),
            order: self.order.clone(),
        }
    }

    /// Replace the selection with rows in their final iteration order, dropping
    /// any order (the selection already encodes it).
    pub fn with_selection_clear_order(&self, selection: Vec<u32>) -> Self {
        Self {
            batch: self.batch.clone(),
            selection: Selection::Indices(selection.into()),
            order: None,
        }
    }

    pub fn with_order(&self, order: Vec<u32>) -> Self {
        Self {
            batch: self.batch.clone(),
            selection: self.selection.clone(),
            order: Some(order.into()),
        }
    }

    /// Keep the first `limit` active rows. Never copies columns, and for an
    /// unordered dense or prefix view it doesn't allocate either.
    pub fn truncate_to(&self, limit: usize) -> Self {
        let selection = match (&self.order, &self.selection) {
            (None, Selection::All) => Selection::Prefix(limit.min(self.batch.size())),
            (None, Selection::Prefix(k)) => Selection::Prefix(limit.min(*k)),
            (None, Selection::Indices(idx)) if idx.len() <= limit => {
                Selection::Indices(idx.clone())
            }
            (None, Selection::Indices(idx)) => Selection::Indices(idx[..limit].into()),
            (Some(_), _) => Selection::Indices(self.active_rows().to_vec(limit).into()),
        };
        Self {
            batch: self.batch.clone(),
            selection,
            order: None,
        }
    }
}

/// Borrowed view over the active rows of a RowSet.
pub struct ActiveRows<'a> {
    view: View<'a>,
}

enum View<'a> {
    Range(u32),
    Slice(&'a [u32]),
    Ordered {
        order: &'a [u32],
        selection: &'a Selection,
        mask: Vec<bool>,
    },
}

impl<'a> ActiveRows<'a> {
    /// True if active rows are exactly `[0, len)` in order.
    pub fn is_dense(&self) -> bool {
        matches!(self.view, View::Range(_))
    }

    pub fn len(&self) -> usize {
        match &self.view {
            View::Range(n) => *n as usize,
            View::Slice(s) => s.len(),
            View::Ordered {
                order,
                selection: Selection::All,
                ..
            } => order.len(),
            View::Ordered { .. } => self.iter().count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> Iter<'_> {
        match &self.view {
            View::Range(n) => Iter::Range(0..*n),
            View::Slice(s) => Iter::Slice(s.iter()),
            View::Ordered {
                order,
                selection,
                mask,
            } => Iter::Ordered {
                order: order.iter(),
                selection,
                mask,
            },
        }
    }

    pub fn for_each<F: FnMut(u32)>(&self, f: F) {
        self.iter().for_each(f)
    }

    pub fn to_vec(&self, limit: usize) -> Vec<u32> {
        self.iter().take(limit).collect()
    }
}

pub enum Iter<'b> {
    Range(std::ops::Range<u32>),
    Slice(std::slice::Iter<'b, u32>),
    Ordered {
        order: std::slice::Iter<'b, u32>,
        selection: &'b Selection,
        mask: &'b [bool],
    },
}

impl<'b> Iterator for Iter<'b> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        match self {
            Iter::Range(r) => r.next(),
            Iter::Slice(s) => s.next().copied(),
            Iter::Ordered {
                order,
                selection,
                mask,
            } => order.by_ref().copied().find(|row| selection.contains(*row, mask)),
        }
    }
}
