/// Contract between the plan builder and the columnar store. The builder only acquires readers,
/// inspects their metadata and resolves symbols; operators use the frame and index accessors at
/// execution time.
use crate::db::{Record, RowId};
use crate::engine::SecurityContext;
use crate::error::Result;
use crate::intervals::IntervalSet;
use crate::metadata::RecordMetadata;
use std::fmt;
use std::rc::Rc;

pub mod mem;

pub use mem::{MemStorage, MemTableBuilder, PartitionBy};

/// Returned by `TableReader::symbol_key` for values absent from the symbol table.
pub const VALUE_NOT_FOUND: i32 = -2;
/// Symbol key of null values.
pub const NULL_SYMBOL_KEY: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Direction {
    Forward,
    Backward,
}

/// Contiguous row range `[row_lo, row_hi)` inside one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFrame {
    pub partition: usize,
    pub row_lo: RowId,
    pub row_hi: RowId,
}

impl DataFrame {
    pub fn rows(&self, direction: Direction) -> Box<dyn Iterator<Item = RowId>> {
        match direction {
            Direction::Forward => Box::new(self.row_lo..self.row_hi),
            Direction::Backward => Box::new((self.row_lo..self.row_hi).rev()),
        }
    }
}

pub trait TableReader: fmt::Debug {
    fn table_name(&self) -> &str;

    fn version(&self) -> u64;

    fn metadata(&self) -> &RecordMetadata;

    /// Partition frames in scan order, narrowed to `intervals` on the designated timestamp.
    fn frames(&self, intervals: Option<&IntervalSet>, direction: Direction) -> Vec<DataFrame>;

    /// Symbol table key of `value` (`None` is null), or `VALUE_NOT_FOUND`.
    fn symbol_key(&self, column: usize, value: Option<&str>) -> i32;

    /// Number of distinct non-null symbols of the column.
    fn symbol_count(&self, column: usize) -> usize;

    /// Rows of `frame` whose indexed `column` holds `key`, in `direction` order.
    fn index_rows(
        &self,
        column: usize,
        key: i32,
        frame: &DataFrame,
        direction: Direction,
    ) -> Vec<RowId>;

    fn record(&self, row: RowId) -> Result<Record>;
}

pub trait Storage {
    /// Acquires a reader. When `version` is given the table must still be at that version.
    fn reader(
        &self,
        security: &SecurityContext,
        table: &str,
        version: Option<u64>,
    ) -> Result<Rc<dyn TableReader>>;
}
