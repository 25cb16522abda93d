/// Heap-resident tables used by tests and the `explain` binary. Rows are kept in designated
/// timestamp order and split into partitions; symbol columns get a symbol table and indexed
/// columns a key → row-id index.
use super::{DataFrame, Direction, Storage, TableReader, NULL_SYMBOL_KEY, VALUE_NOT_FOUND};
use crate::db::{ColumnType, Record, RowId, Value};
use crate::engine::SecurityContext;
use crate::error::{Result, StorageError};
use crate::intervals::IntervalSet;
use crate::metadata::{ColumnMetadata, RecordMetadata};
use crate::utils::MICROS_PER_DAY;
use chrono::{DateTime, Datelike, Utc};
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionBy {
    #[default]
    None,
    Day,
    Month,
    Year,
}

impl PartitionBy {
    fn partition_of(&self, ts: i64) -> i64 {
        let date = || {
            DateTime::<Utc>::from_timestamp(ts.div_euclid(1_000_000), 0).unwrap_or_default()
        };
        match self {
            Self::None => 0,
            Self::Day => ts.div_euclid(MICROS_PER_DAY),
            Self::Month => date().year() as i64 * 12 + date().month0() as i64,
            Self::Year => date().year() as i64,
        }
    }
}

#[derive(Debug, Default)]
struct SymbolTable {
    values: Vec<String>,
    keys: FxHashMap<String, i32>,
}

impl SymbolTable {
    fn key_of(&mut self, value: &Value) -> i32 {
        match value.key_string() {
            None => NULL_SYMBOL_KEY,
            Some(value) => {
                if let Some(&key) = self.keys.get(&value) {
                    key
                } else {
                    let key = self.values.len() as i32;
                    self.values.push(value.clone());
                    self.keys.insert(value, key);
                    key
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct MemTable {
    name: String,
    version: u64,
    metadata: RecordMetadata,
    rows: Vec<Record>,
    /// `[lo, hi)` row ranges, one per partition.
    partitions: Vec<(RowId, RowId)>,
    symbols: Vec<Option<SymbolTable>>,
    indexes: Vec<Option<FxHashMap<i32, Vec<RowId>>>>,
}

impl MemTable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }
}

pub struct MemTableBuilder {
    name: String,
    version: u64,
    columns: Vec<ColumnMetadata>,
    timestamp: Option<String>,
    partition_by: PartitionBy,
    rows: Vec<Record>,
}

impl MemTableBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: 0,
            columns: vec![],
            timestamp: None,
            partition_by: PartitionBy::None,
            rows: vec![],
        }
    }

    pub fn column(mut self, name: &str, column_type: ColumnType) -> Self {
        self.columns.push(ColumnMetadata::new(name, column_type));
        self
    }

    pub fn indexed_column(mut self, name: &str, column_type: ColumnType, capacity: usize) -> Self {
        self.columns
            .push(ColumnMetadata::new(name, column_type).indexed(capacity));
        self
    }

    pub fn timestamp(mut self, name: &str) -> Self {
        self.timestamp = Some(name.to_string());
        self
    }

    pub fn partition_by(mut self, partition_by: PartitionBy) -> Self {
        self.partition_by = partition_by;
        self
    }

    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn row(mut self, row: Record) -> Self {
        self.rows.push(row);
        self
    }

    pub fn rows(mut self, rows: impl IntoIterator<Item = Record>) -> Self {
        self.rows.extend(rows);
        self
    }

    pub fn build(self) -> MemTable {
        let timestamp_index = self.timestamp.as_deref().and_then(|name| {
            self.columns
                .iter()
                .position(|column| column.name.eq_ignore_ascii_case(name))
        });
        let metadata = RecordMetadata::new(self.columns, timestamp_index);
        let mut rows = self.rows;
        if let Some(ts) = timestamp_index {
            rows.sort_by_key(|row| row[ts].as_long().unwrap_or(i64::MIN));
        }

        let mut partitions: Vec<(RowId, RowId)> = vec![];
        let mut current = None;
        for (row_id, row) in rows.iter().enumerate() {
            let partition = match timestamp_index {
                Some(ts) => self
                    .partition_by
                    .partition_of(row[ts].as_long().unwrap_or(i64::MIN)),
                None => 0,
            };
            if current != Some(partition) {
                partitions.push((row_id as RowId, row_id as RowId));
                current = Some(partition);
            }
            if let Some(last) = partitions.last_mut() {
                last.1 = row_id as RowId + 1;
            }
        }

        let mut symbols: Vec<Option<SymbolTable>> = metadata
            .columns()
            .iter()
            .map(|column| {
                (column.column_type == ColumnType::Symbol || column.indexed)
                    .then(SymbolTable::default)
            })
            .collect();
        let mut indexes: Vec<Option<FxHashMap<i32, Vec<RowId>>>> = metadata
            .columns()
            .iter()
            .map(|column| column.indexed.then(FxHashMap::default))
            .collect();
        for (row_id, row) in rows.iter().enumerate() {
            for (column, value) in row.iter().enumerate() {
                if let Some(symbols) = &mut symbols[column] {
                    let key = symbols.key_of(value);
                    if let Some(index) = &mut indexes[column] {
                        index.entry(key).or_default().push(row_id as RowId);
                    }
                }
            }
        }

        MemTable {
            name: self.name,
            version: self.version,
            metadata,
            rows,
            partitions,
            symbols,
            indexes,
        }
    }
}

/// Tables keyed by lower-cased name. Counts the readers currently handed out.
#[derive(Default)]
pub struct MemStorage {
    tables: RefCell<FxHashMap<String, Rc<MemTable>>>,
    revoked: RefCell<FxHashSet<(String, String)>>,
    open_readers: Rc<Cell<usize>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add_table(&self, table: MemTable) -> &Self {
        self.tables
            .borrow_mut()
            .insert(table.name.to_ascii_lowercase(), Rc::new(table));
        self
    }

    /// Denies `principal` readers on `table`.
    pub fn revoke(&self, principal: &str, table: &str) -> &Self {
        self.revoked
            .borrow_mut()
            .insert((principal.to_string(), table.to_ascii_lowercase()));
        self
    }

    pub fn open_readers(&self) -> usize {
        self.open_readers.get()
    }
}

impl Storage for MemStorage {
    fn reader(
        &self,
        security: &SecurityContext,
        table: &str,
        version: Option<u64>,
    ) -> Result<Rc<dyn TableReader>> {
        let key = table.to_ascii_lowercase();
        if self
            .revoked
            .borrow()
            .contains(&(security.principal().to_string(), key.clone()))
        {
            return Err(StorageError::AccessDenied {
                principal: security.principal().to_string(),
                table: table.to_string(),
            }
            .into());
        }
        let table = self
            .tables
            .borrow()
            .get(&key)
            .cloned()
            .ok_or_else(|| StorageError::NoTable(table.to_string()))?;
        if let Some(expected) = version {
            if expected != table.version {
                return Err(StorageError::VersionMismatch {
                    table: table.name.clone(),
                    expected,
                    actual: table.version,
                }
                .into());
            }
        }
        self.open_readers.set(self.open_readers.get() + 1);
        debug!("Opened reader for {}", table.name);
        Ok(Rc::new(MemTableReader {
            table,
            open_readers: self.open_readers.clone(),
        }))
    }
}

pub struct MemTableReader {
    table: Rc<MemTable>,
    open_readers: Rc<Cell<usize>>,
}

impl Drop for MemTableReader {
    fn drop(&mut self) {
        self.open_readers.set(self.open_readers.get() - 1);
    }
}

impl fmt::Debug for MemTableReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemTableReader({})", self.table.name)
    }
}

impl MemTableReader {
    fn timestamp_at(&self, row: RowId) -> i64 {
        self.table
            .metadata
            .timestamp_index()
            .and_then(|ts| self.table.rows[row as usize][ts].as_long())
            .unwrap_or(i64::MIN)
    }

    /// First row in `[lo, hi)` whose timestamp is not below `ts`.
    fn lower_bound(&self, lo: RowId, hi: RowId, ts: i64) -> RowId {
        let (mut lo, mut hi) = (lo, hi);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.timestamp_at(mid) < ts {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }
}

impl TableReader for MemTableReader {
    fn table_name(&self) -> &str {
        &self.table.name
    }

    fn version(&self) -> u64 {
        self.table.version
    }

    fn metadata(&self) -> &RecordMetadata {
        &self.table.metadata
    }

    fn frames(&self, intervals: Option<&IntervalSet>, direction: Direction) -> Vec<DataFrame> {
        let mut frames = vec![];
        for (partition, &(lo, hi)) in self.table.partitions.iter().enumerate() {
            match intervals.filter(|_| self.table.metadata.timestamp_index().is_some()) {
                Some(intervals) => {
                    for interval in intervals.iter() {
                        let row_lo = self.lower_bound(lo, hi, interval.lo);
                        let row_hi = match interval.hi.checked_add(1) {
                            Some(end) => self.lower_bound(lo, hi, end),
                            None => hi,
                        };
                        if row_lo < row_hi {
                            frames.push(DataFrame {
                                partition,
                                row_lo,
                                row_hi,
                            });
                        }
                    }
                }
                None => frames.push(DataFrame {
                    partition,
                    row_lo: lo,
                    row_hi: hi,
                }),
            }
        }
        if direction == Direction::Backward {
            frames.reverse();
        }
        frames
    }

    fn symbol_key(&self, column: usize, value: Option<&str>) -> i32 {
        match (self.table.symbols.get(column), value) {
            (Some(Some(_)), None) => NULL_SYMBOL_KEY,
            (Some(Some(symbols)), Some(value)) => {
                symbols.keys.get(value).copied().unwrap_or(VALUE_NOT_FOUND)
            }
            _ => VALUE_NOT_FOUND,
        }
    }

    fn symbol_count(&self, column: usize) -> usize {
        match self.table.symbols.get(column) {
            Some(Some(symbols)) => symbols.values.len(),
            _ => 0,
        }
    }

    fn index_rows(
        &self,
        column: usize,
        key: i32,
        frame: &DataFrame,
        direction: Direction,
    ) -> Vec<RowId> {
        let rows = match self.table.indexes.get(column) {
            Some(Some(index)) => match index.get(&key) {
                Some(rows) => rows,
                None => return vec![],
            },
            _ => return vec![],
        };
        let lo = rows.partition_point(|&row| row < frame.row_lo);
        let hi = rows.partition_point(|&row| row < frame.row_hi);
        let mut out = rows[lo..hi].to_vec();
        if direction == Direction::Backward {
            out.reverse();
        }
        out
    }

    fn record(&self, row: RowId) -> Result<Record> {
        self.table
            .rows
            .get(row as usize)
            .cloned()
            .ok_or_else(|| StorageError::InvalidRowId(row).into())
    }
}
