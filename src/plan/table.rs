use super::{Operator, OperatorNode};
use crate::cursor::RecordCursor;
use crate::db::{ColumnType, Record, RowId, Value};
use crate::engine::ExecutionContext;
use crate::error::{Result, StorageError};
use crate::funcs::FunctionRef;
use crate::intervals::IntervalSet;
use crate::metadata::{ColumnMetadata, RecordMetadata};
use crate::storage::{DataFrame, Direction, TableReader, NULL_SYMBOL_KEY, VALUE_NOT_FOUND};
use itertools::Itertools;
use rustc_hash::FxHashSet;
use std::fmt;
use std::iter;
use std::rc::Rc;

/// Distinct first-column values of `query`, read when a cursor opens.
fn sub_query_values(query: &Operator, ctx: &ExecutionContext) -> Result<Vec<Option<String>>> {
    let mut cursor = query.cursor(ctx)?;
    let mut values = vec![];
    while let Some(record) = cursor.next()? {
        values.push(record.first().and_then(Value::key_string));
    }
    Ok(values.into_iter().unique().collect())
}

pub enum KeyValues {
    List(Vec<Option<String>>),
    SubQuery(Box<Operator>),
}

impl KeyValues {
    fn resolve(&self, ctx: &ExecutionContext) -> Result<Vec<Option<String>>> {
        match self {
            Self::List(values) => Ok(values.clone()),
            Self::SubQuery(query) => sub_query_values(query, ctx),
        }
    }
}

fn format_values(values: &[Option<String>]) -> String {
    values
        .iter()
        .map(|value| value.as_deref().unwrap_or("null"))
        .join(", ")
}

impl fmt::Display for KeyValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List(values) => write!(f, "[{}]", format_values(values)),
            Self::SubQuery(_) => write!(f, "(sub-query)"),
        }
    }
}

/// Which rows of the selected frames a table scan visits.
pub enum RowSource {
    Frames,
    SymbolIndex {
        column: usize,
        key: i32,
    },
    /// The value was not in the symbol table at compile time; it is looked up again whenever a
    /// cursor opens and yields nothing while still absent.
    DeferredSymbolIndex {
        column: usize,
        value: Option<String>,
    },
    Values {
        column: usize,
        values: KeyValues,
    },
}

/// Rows of `frames` whose `column` holds one of `values`, in `direction` order. Uses the column
/// index when there is one.
fn rows_matching(
    reader: &dyn TableReader,
    column: usize,
    values: &[Option<String>],
    frames: &[DataFrame],
    direction: Direction,
) -> Result<Vec<RowId>> {
    let mut rows = vec![];
    if reader.metadata().is_indexed(column) {
        let keys: Vec<i32> = values
            .iter()
            .map(|value| reader.symbol_key(column, value.as_deref()))
            .filter(|&key| key != VALUE_NOT_FOUND)
            .collect();
        for frame in frames {
            for &key in &keys {
                rows.extend(reader.index_rows(column, key, frame, direction));
            }
        }
    } else {
        for frame in frames {
            for row in frame.rows(direction) {
                if values.contains(&reader.record(row)?[column].key_string()) {
                    rows.push(row);
                }
            }
        }
    }
    match direction {
        Direction::Forward => rows.sort_unstable(),
        Direction::Backward => rows.sort_unstable_by(|a, b| b.cmp(a)),
    }
    Ok(rows)
}

/// Walks a list of row ids, skipping rows rejected by the filter.
struct RowIdCursor<'a> {
    reader: &'a dyn TableReader,
    rows: Vec<RowId>,
    filter: Option<&'a FunctionRef>,
    pos: usize,
    current: Option<RowId>,
}

impl<'a> RowIdCursor<'a> {
    fn new(reader: &'a dyn TableReader, rows: Vec<RowId>, filter: Option<&'a FunctionRef>) -> Self {
        Self {
            reader,
            rows,
            filter,
            pos: 0,
            current: None,
        }
    }
}

impl<'a> RecordCursor for RowIdCursor<'a> {
    fn next(&mut self) -> Result<Option<Record>> {
        while let Some(&row) = self.rows.get(self.pos) {
            self.pos += 1;
            let record = self.reader.record(row)?;
            if self.filter.map_or(true, |filter| filter.get_bool(&record)) {
                self.current = Some(row);
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn current_row_id(&self) -> Option<RowId> {
        self.current
    }

    fn record_at(&self, row: RowId) -> Result<Record> {
        self.reader.record(row)
    }

    fn to_top(&mut self) {
        self.pos = 0;
        self.current = None;
    }
}

/// Forward scan over a table's frames, optionally bounded by intervals on the designated
/// timestamp and narrowed to key values.
pub struct TableScan {
    pub(super) reader: Rc<dyn TableReader>,
    pub(super) metadata: RecordMetadata,
    pub(super) intervals: Option<IntervalSet>,
    pub(super) rows: RowSource,
    pub(super) filter: Option<FunctionRef>,
}

impl TableScan {
    fn row_ids(&self, ctx: &ExecutionContext) -> Result<Vec<RowId>> {
        let reader = self.reader.as_ref();
        let frames = reader.frames(self.intervals.as_ref(), Direction::Forward);
        let indexed = |column: usize, key: i32| -> Vec<RowId> {
            frames
                .iter()
                .flat_map(|frame| reader.index_rows(column, key, frame, Direction::Forward))
                .collect()
        };
        Ok(match &self.rows {
            RowSource::Frames => frames
                .iter()
                .flat_map(|frame| frame.rows(Direction::Forward))
                .collect(),
            RowSource::SymbolIndex { column, key } => indexed(*column, *key),
            RowSource::DeferredSymbolIndex { column, value } => {
                match reader.symbol_key(*column, value.as_deref()) {
                    VALUE_NOT_FOUND => vec![],
                    key => indexed(*column, key),
                }
            }
            RowSource::Values { column, values } => rows_matching(
                reader,
                *column,
                &values.resolve(ctx)?,
                &frames,
                Direction::Forward,
            )?,
        })
    }

    pub fn row_source(&self) -> &RowSource {
        &self.rows
    }

    pub fn intervals(&self) -> Option<&IntervalSet> {
        self.intervals.as_ref()
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }
}

impl OperatorNode for TableScan {
    fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    fn supports_random_access(&self) -> bool {
        true
    }

    fn cursor<'a>(&'a self, ctx: &'a ExecutionContext) -> Result<Box<dyn RecordCursor + 'a>> {
        let rows = self.row_ids(ctx)?;
        Ok(Box::new(RowIdCursor::new(
            self.reader.as_ref(),
            rows,
            self.filter.as_ref(),
        )))
    }

    fn label(&self) -> String {
        let column = |index: usize| self.metadata.column_name(index);
        let rows = match &self.rows {
            RowSource::Frames => String::new(),
            RowSource::SymbolIndex { column: c, key } => format!(" index({}={})", column(*c), key),
            RowSource::DeferredSymbolIndex { column: c, value } => format!(
                " deferred-index({}={})",
                column(*c),
                value.as_deref().unwrap_or("null")
            ),
            RowSource::Values { column: c, values } => {
                format!(" values({} in {})", column(*c), values)
            }
        };
        let intervals = self
            .intervals
            .as_ref()
            .map(|intervals| format!(" intervals={}", intervals))
            .unwrap_or_default();
        let filter = self
            .filter
            .as_ref()
            .map(|filter| format!(" filter={}", filter))
            .unwrap_or_default();
        format!(
            "TableScan({}){}{}{}",
            self.reader.table_name(),
            rows,
            intervals,
            filter
        )
    }

    fn children(&self) -> Vec<&Operator> {
        match &self.rows {
            RowSource::Values {
                values: KeyValues::SubQuery(query),
                ..
            } => vec![query.as_ref()],
            _ => vec![],
        }
    }
}

#[derive(strum_macros::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum LatestByStrategy {
    ValueIndexed {
        column: usize,
        key: i32,
    },
    ValueDeferredIndexed {
        column: usize,
        value: Option<String>,
    },
    ValuesIndexed {
        column: usize,
        values: Vec<Option<String>>,
    },
    /// Literal values of a column without an index, matched by scanning.
    Values {
        column: usize,
        values: Vec<Option<String>>,
    },
    SubQuery {
        column: usize,
        query: Box<Operator>,
    },
    AllIndexed {
        column: usize,
    },
    /// Latest row per distinct tuple of `columns`, optionally restricted to key values of one
    /// column.
    All {
        columns: Vec<usize>,
        key: Option<(usize, KeyValues)>,
    },
}

/// Latest row per key, found by walking frames backwards. The filter is applied before a row can
/// count as the latest. Output is in ascending row order.
pub struct LatestBy {
    pub(super) reader: Rc<dyn TableReader>,
    pub(super) metadata: RecordMetadata,
    pub(super) intervals: Option<IntervalSet>,
    pub(super) strategy: LatestByStrategy,
    pub(super) filter: Option<FunctionRef>,
    pub(super) capacity: usize,
}

impl LatestBy {
    fn accepts(&self, record: &[Value]) -> bool {
        self.filter
            .as_ref()
            .map_or(true, |filter| filter.get_bool(record))
    }

    fn latest_indexed(&self, column: usize, key: i32, frames: &[DataFrame]) -> Result<Option<RowId>> {
        for frame in frames {
            for row in self
                .reader
                .index_rows(column, key, frame, Direction::Backward)
            {
                if self.accepts(&self.reader.record(row)?) {
                    return Ok(Some(row));
                }
            }
        }
        Ok(None)
    }

    fn latest_indexed_values(
        &self,
        column: usize,
        values: &[Option<String>],
        frames: &[DataFrame],
    ) -> Result<Vec<RowId>> {
        let mut found = vec![];
        for value in values {
            match self.reader.symbol_key(column, value.as_deref()) {
                VALUE_NOT_FOUND => {}
                key => found.extend(self.latest_indexed(column, key, frames)?),
            }
        }
        Ok(found)
    }

    fn latest_scanned(
        &self,
        columns: &[usize],
        key: Option<(usize, &[Option<String>])>,
        frames: &[DataFrame],
    ) -> Result<Vec<RowId>> {
        let mut seen: FxHashSet<Vec<Value>> =
            FxHashSet::with_capacity_and_hasher(self.capacity, Default::default());
        let mut found = vec![];
        for frame in frames {
            for row in frame.rows(Direction::Backward) {
                let record = self.reader.record(row)?;
                if let Some((column, values)) = key {
                    if !values.contains(&record[column].key_string()) {
                        continue;
                    }
                }
                let tuple: Vec<Value> = columns.iter().map(|&c| record[c].clone()).collect();
                if !seen.contains(&tuple) && self.accepts(&record) {
                    seen.insert(tuple);
                    found.push(row);
                }
            }
        }
        Ok(found)
    }

    fn row_ids(&self, ctx: &ExecutionContext) -> Result<Vec<RowId>> {
        let frames = self
            .reader
            .frames(self.intervals.as_ref(), Direction::Backward);
        let mut found = match &self.strategy {
            LatestByStrategy::ValueIndexed { column, key } => self
                .latest_indexed(*column, *key, &frames)?
                .into_iter()
                .collect(),
            LatestByStrategy::ValueDeferredIndexed { column, value } => {
                self.latest_indexed_values(*column, std::slice::from_ref(value), &frames)?
            }
            LatestByStrategy::ValuesIndexed { column, values } => {
                self.latest_indexed_values(*column, values, &frames)?
            }
            LatestByStrategy::Values { column, values } => {
                self.latest_scanned(&[*column], Some((*column, values)), &frames)?
            }
            LatestByStrategy::SubQuery { column, query } => {
                let values = sub_query_values(query, ctx)?;
                if self.metadata.is_indexed(*column) {
                    self.latest_indexed_values(*column, &values, &frames)?
                } else {
                    self.latest_scanned(&[*column], Some((*column, &values)), &frames)?
                }
            }
            LatestByStrategy::AllIndexed { column } => {
                let count = self.reader.symbol_count(*column) as i32;
                let mut found = vec![];
                for key in iter::once(NULL_SYMBOL_KEY).chain(0..count) {
                    found.extend(self.latest_indexed(*column, key, &frames)?);
                }
                found
            }
            LatestByStrategy::All { columns, key } => match key {
                Some((column, values)) => {
                    let values = values.resolve(ctx)?;
                    self.latest_scanned(columns, Some((*column, &values)), &frames)?
                }
                None => self.latest_scanned(columns, None, &frames)?,
            },
        };
        found.sort_unstable();
        Ok(found)
    }

    pub fn strategy(&self) -> &LatestByStrategy {
        &self.strategy
    }
}

impl OperatorNode for LatestBy {
    fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    fn supports_random_access(&self) -> bool {
        true
    }

    fn cursor<'a>(&'a self, ctx: &'a ExecutionContext) -> Result<Box<dyn RecordCursor + 'a>> {
        let rows = self.row_ids(ctx)?;
        Ok(Box::new(RowIdCursor::new(self.reader.as_ref(), rows, None)))
    }

    fn label(&self) -> String {
        let detail = match &self.strategy {
            LatestByStrategy::ValueIndexed { key, .. } => format!(" key={}", key),
            LatestByStrategy::ValueDeferredIndexed { value, .. } => {
                format!(" value={}", value.as_deref().unwrap_or("null"))
            }
            LatestByStrategy::ValuesIndexed { values, .. }
            | LatestByStrategy::Values { values, .. } => format!(" values=[{}]", format_values(values)),
            LatestByStrategy::All {
                key: Some((_, values)),
                ..
            } => format!(" values={}", values),
            _ => String::new(),
        };
        let filter = self
            .filter
            .as_ref()
            .map(|filter| format!(" filter={}", filter))
            .unwrap_or_default();
        format!(
            "LatestBy({}) {}{}{}",
            self.reader.table_name(),
            self.strategy,
            detail,
            filter
        )
    }

    fn children(&self) -> Vec<&Operator> {
        match &self.strategy {
            LatestByStrategy::SubQuery { query, .. }
            | LatestByStrategy::All {
                key: Some((_, KeyValues::SubQuery(query))),
                ..
            } => vec![query.as_ref()],
            _ => vec![],
        }
    }
}

/// `x = 1..=count` as a single LONG column.
pub struct LongSequence {
    count: i64,
    metadata: RecordMetadata,
}

impl LongSequence {
    pub fn new(count: i64) -> Self {
        Self {
            count,
            metadata: RecordMetadata::new(vec![ColumnMetadata::new("x", ColumnType::Long)], None),
        }
    }
}

struct LongSequenceCursor {
    count: i64,
    last: i64,
}

impl RecordCursor for LongSequenceCursor {
    fn next(&mut self) -> Result<Option<Record>> {
        if self.last < self.count {
            self.last += 1;
            Ok(Some(vec![Value::Long(self.last)]))
        } else {
            Ok(None)
        }
    }

    fn current_row_id(&self) -> Option<RowId> {
        (self.last > 0).then(|| (self.last - 1) as RowId)
    }

    fn record_at(&self, row: RowId) -> Result<Record> {
        if (row as i64) < self.count {
            Ok(vec![Value::Long(row as i64 + 1)])
        } else {
            Err(StorageError::InvalidRowId(row).into())
        }
    }

    fn to_top(&mut self) {
        self.last = 0;
    }
}

impl OperatorNode for LongSequence {
    fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    fn supports_random_access(&self) -> bool {
        true
    }

    fn cursor<'a>(&'a self, _ctx: &'a ExecutionContext) -> Result<Box<dyn RecordCursor + 'a>> {
        Ok(Box::new(LongSequenceCursor {
            count: self.count,
            last: 0,
        }))
    }

    fn label(&self) -> String {
        format!("LongSequence({})", self.count)
    }
}
