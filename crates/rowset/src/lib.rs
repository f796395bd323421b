//! Columnar row model: immutable, reference-counted `ColumnBatch`es and cheap
//! `RowSet` views over them.
mod batch;
mod rowset;

pub use batch::{ColumnBatch, FloatColumn, IdColumn, StringDictBuilder, StringDictColumn};
pub use rowset::{ActiveRows, Iter, RowSet, Selection};
