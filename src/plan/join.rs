use super::{Operator, OperatorNode};
use crate::cursor::{MaterializedCursor, RecordCursor};
use crate::db::{ColumnType, Record, RowId, Value};
use crate::engine::ExecutionContext;
use crate::error::Result;
use crate::join_context::JoinKeys;
use crate::metadata::RecordMetadata;
use crate::query::JoinType;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

/// Every way one join edge can be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum JoinAlgorithm {
    Cross,
    /// Slave rows are kept as row ids and fetched again on match.
    HashLight,
    HashOuterLight,
    /// Slave rows are copied into the map.
    Hash,
    HashOuter,
    AsOfLight,
    AsOfNoKey,
    /// Slave values are copied into the map; no rewinding of the slave is needed.
    AsOfFull,
    SpliceLight,
}

impl JoinAlgorithm {
    fn is_outer(&self) -> bool {
        matches!(self, Self::HashOuterLight | Self::HashOuter)
    }

    fn is_light(&self) -> bool {
        matches!(
            self,
            Self::HashLight | Self::HashOuterLight | Self::AsOfLight | Self::SpliceLight
        )
    }
}

/// Picks the variant for one join edge. Returns `None` when no variant can execute the edge, which
/// only happens for splice joins whose inputs cannot be revisited by row id.
pub fn choose_join_algorithm(
    join_type: JoinType,
    has_keys: bool,
    master_random_access: bool,
    slave_random_access: bool,
    full_fat_joins: bool,
) -> Option<JoinAlgorithm> {
    let light = slave_random_access && !full_fat_joins;
    Some(match join_type {
        JoinType::Cross => JoinAlgorithm::Cross,
        JoinType::AsOf if light && has_keys => JoinAlgorithm::AsOfLight,
        JoinType::AsOf if light => JoinAlgorithm::AsOfNoKey,
        JoinType::AsOf => JoinAlgorithm::AsOfFull,
        JoinType::Splice if light && master_random_access => JoinAlgorithm::SpliceLight,
        JoinType::Splice => return None,
        JoinType::Inner if light => JoinAlgorithm::HashLight,
        JoinType::Inner => JoinAlgorithm::Hash,
        JoinType::Outer if light => JoinAlgorithm::HashOuterLight,
        JoinType::Outer => JoinAlgorithm::HashOuter,
    })
}

fn key_of(record: &[Value], columns: &[usize], types: &[ColumnType]) -> Vec<Value> {
    columns
        .iter()
        .zip(types)
        .map(|(&column, &column_type)| record[column].cast(column_type))
        .collect()
}

fn concat(master: &[Value], slave: Record) -> Record {
    let mut out = Vec::with_capacity(master.len() + slave.len());
    out.extend_from_slice(master);
    out.extend(slave);
    out
}

fn nulls(count: usize) -> Record {
    vec![Value::Null; count]
}

fn timestamp_of(record: &[Value], index: usize) -> i64 {
    record[index].as_long().unwrap_or(i64::MIN)
}

/// A slave row held by a join map: its id when the slave can be revisited, else a copy.
enum SlaveRow {
    Id(RowId),
    Row(Record),
}

impl SlaveRow {
    fn of(light: bool, record: Record, row_id: Option<RowId>) -> Self {
        match (light, row_id) {
            (true, Some(id)) => Self::Id(id),
            _ => Self::Row(record),
        }
    }

    fn fetch(&self, cursor: &dyn RecordCursor) -> Result<Record> {
        match self {
            Self::Id(id) => cursor.record_at(*id),
            Self::Row(record) => Ok(record.clone()),
        }
    }
}

pub struct CrossJoin {
    pub(super) master: Box<Operator>,
    pub(super) slave: Box<Operator>,
    pub(super) metadata: RecordMetadata,
}

struct CrossJoinCursor<'a> {
    master: Box<dyn RecordCursor + 'a>,
    slave: Box<dyn RecordCursor + 'a>,
    current: Option<Record>,
}

impl<'a> RecordCursor for CrossJoinCursor<'a> {
    fn next(&mut self) -> Result<Option<Record>> {
        loop {
            if self.current.is_none() {
                match self.master.next()? {
                    Some(master) => {
                        self.current = Some(master);
                        self.slave.to_top();
                    }
                    None => return Ok(None),
                }
            }
            match (&self.current, self.slave.next()?) {
                (Some(master), Some(slave)) => return Ok(Some(concat(master, slave))),
                _ => self.current = None,
            }
        }
    }

    fn to_top(&mut self) {
        self.master.to_top();
        self.current = None;
    }
}

impl OperatorNode for CrossJoin {
    fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    fn supports_random_access(&self) -> bool {
        false
    }

    fn cursor<'a>(&'a self, ctx: &'a ExecutionContext) -> Result<Box<dyn RecordCursor + 'a>> {
        Ok(Box::new(CrossJoinCursor {
            master: self.master.cursor(ctx)?,
            slave: self.slave.cursor(ctx)?,
            current: None,
        }))
    }

    fn label(&self) -> String {
        "CrossJoin".to_string()
    }

    fn children(&self) -> Vec<&Operator> {
        vec![self.master.as_ref(), self.slave.as_ref()]
    }
}

/// Equi-join through a key map built from the slave side.
pub struct HashJoin {
    pub(super) master: Box<Operator>,
    pub(super) slave: Box<Operator>,
    pub(super) metadata: RecordMetadata,
    pub(super) keys: JoinKeys,
    pub(super) algorithm: JoinAlgorithm,
    pub(super) capacity: usize,
}

impl HashJoin {
    pub fn algorithm(&self) -> JoinAlgorithm {
        self.algorithm
    }
}

struct HashJoinCursor<'a> {
    join: &'a HashJoin,
    master: Box<dyn RecordCursor + 'a>,
    slave: Box<dyn RecordCursor + 'a>,
    map: FxHashMap<Vec<Value>, Vec<SlaveRow>>,
    pending: VecDeque<Record>,
    slave_width: usize,
}

impl<'a> RecordCursor for HashJoinCursor<'a> {
    fn next(&mut self) -> Result<Option<Record>> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Ok(Some(record));
            }
            let master = match self.master.next()? {
                Some(master) => master,
                None => return Ok(None),
            };
            let key = key_of(
                &master,
                &self.join.keys.master_columns,
                &self.join.keys.key_types,
            );
            match self.map.get(&key) {
                Some(rows) => {
                    for row in rows {
                        let slave = row.fetch(self.slave.as_ref())?;
                        self.pending.push_back(concat(&master, slave));
                    }
                }
                None if self.join.algorithm.is_outer() => {
                    return Ok(Some(concat(&master, nulls(self.slave_width))));
                }
                None => {}
            }
        }
    }

    fn to_top(&mut self) {
        self.master.to_top();
        self.pending.clear();
    }
}

impl OperatorNode for HashJoin {
    fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    fn supports_random_access(&self) -> bool {
        false
    }

    fn cursor<'a>(&'a self, ctx: &'a ExecutionContext) -> Result<Box<dyn RecordCursor + 'a>> {
        let mut slave = self.slave.cursor(ctx)?;
        let light = self.algorithm.is_light();
        let mut map: FxHashMap<Vec<Value>, Vec<SlaveRow>> =
            FxHashMap::with_capacity_and_hasher(self.capacity, Default::default());
        while let Some(record) = slave.next()? {
            let key = key_of(&record, &self.keys.slave_columns, &self.keys.key_types);
            let row = SlaveRow::of(light, record, slave.current_row_id());
            map.entry(key).or_default().push(row);
        }
        Ok(Box::new(HashJoinCursor {
            join: self,
            master: self.master.cursor(ctx)?,
            slave,
            map,
            pending: VecDeque::new(),
            slave_width: self.slave.metadata().column_count(),
        }))
    }

    fn label(&self) -> String {
        format!("HashJoin({}) on {}", self.algorithm, self.keys)
    }

    fn children(&self) -> Vec<&Operator> {
        vec![self.master.as_ref(), self.slave.as_ref()]
    }
}

/// Pairs every master row with the latest slave row at or before its timestamp, per key.
pub struct AsOfJoin {
    pub(super) master: Box<Operator>,
    pub(super) slave: Box<Operator>,
    pub(super) metadata: RecordMetadata,
    pub(super) keys: JoinKeys,
    pub(super) algorithm: JoinAlgorithm,
    /// Slave columns in output order. The full variant emits non-key columns before keys.
    pub(super) slave_columns: Vec<usize>,
    pub(super) capacity: usize,
}

impl AsOfJoin {
    pub fn algorithm(&self) -> JoinAlgorithm {
        self.algorithm
    }
}

struct AsOfJoinCursor<'a> {
    join: &'a AsOfJoin,
    master: Box<dyn RecordCursor + 'a>,
    slave: Box<dyn RecordCursor + 'a>,
    /// Next slave row, not yet reached by the master timestamp.
    lookahead: Option<(Record, Option<RowId>)>,
    slave_done: bool,
    latest: FxHashMap<Vec<Value>, SlaveRow>,
    master_timestamp: usize,
    slave_timestamp: usize,
}

impl<'a> AsOfJoinCursor<'a> {
    fn remember(&mut self, record: Record, row_id: Option<RowId>) {
        let join = self.join;
        let key = key_of(&record, &join.keys.slave_columns, &join.keys.key_types);
        let row = match join.algorithm {
            JoinAlgorithm::AsOfFull => SlaveRow::Row(
                join.slave_columns
                    .iter()
                    .map(|&i| record[i].clone())
                    .collect(),
            ),
            algorithm => SlaveRow::of(algorithm.is_light(), record, row_id),
        };
        self.latest.insert(key, row);
    }

    /// Consumes slave rows up to and including `ts`.
    fn advance_slave(&mut self, ts: i64) -> Result<()> {
        loop {
            if self.lookahead.is_none() && !self.slave_done {
                match self.slave.next()? {
                    Some(record) => {
                        self.lookahead = Some((record, self.slave.current_row_id()));
                    }
                    None => self.slave_done = true,
                }
            }
            match self.lookahead.take() {
                Some((record, row_id)) if timestamp_of(&record, self.slave_timestamp) <= ts => {
                    self.remember(record, row_id);
                }
                other => {
                    self.lookahead = other;
                    return Ok(());
                }
            }
        }
    }
}

impl<'a> RecordCursor for AsOfJoinCursor<'a> {
    fn next(&mut self) -> Result<Option<Record>> {
        let master = match self.master.next()? {
            Some(master) => master,
            None => return Ok(None),
        };
        self.advance_slave(timestamp_of(&master, self.master_timestamp))?;
        let key = key_of(
            &master,
            &self.join.keys.master_columns,
            &self.join.keys.key_types,
        );
        let slave = match self.latest.get(&key) {
            Some(row) => row.fetch(self.slave.as_ref())?,
            None => nulls(self.join.slave_columns.len()),
        };
        Ok(Some(concat(&master, slave)))
    }

    fn to_top(&mut self) {
        self.master.to_top();
        self.slave.to_top();
        self.lookahead = None;
        self.slave_done = false;
        self.latest.clear();
    }
}

impl OperatorNode for AsOfJoin {
    fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    fn supports_random_access(&self) -> bool {
        false
    }

    fn cursor<'a>(&'a self, ctx: &'a ExecutionContext) -> Result<Box<dyn RecordCursor + 'a>> {
        Ok(Box::new(AsOfJoinCursor {
            join: self,
            master: self.master.cursor(ctx)?,
            slave: self.slave.cursor(ctx)?,
            lookahead: None,
            slave_done: false,
            latest: FxHashMap::with_capacity_and_hasher(self.capacity, Default::default()),
            master_timestamp: self.master.metadata().timestamp_index().unwrap_or(0),
            slave_timestamp: self.slave.metadata().timestamp_index().unwrap_or(0),
        }))
    }

    fn label(&self) -> String {
        format!("AsOfJoin({}) on {}", self.algorithm, self.keys)
    }

    fn children(&self) -> Vec<&Operator> {
        vec![self.master.as_ref(), self.slave.as_ref()]
    }
}

/// Interleaves both sides in timestamp order. Every row of either side is emitted once, paired with
/// the latest row of the other side for the same key. The output has no designated timestamp.
pub struct SpliceJoin {
    pub(super) master: Box<Operator>,
    pub(super) slave: Box<Operator>,
    pub(super) metadata: RecordMetadata,
    pub(super) keys: JoinKeys,
    pub(super) capacity: usize,
}

/// Rows of one side with their timestamps and ids.
fn drain_timed(cursor: &mut dyn RecordCursor, timestamp: usize) -> Result<Vec<(i64, Record, Option<RowId>)>> {
    let mut rows = vec![];
    while let Some(record) = cursor.next()? {
        rows.push((timestamp_of(&record, timestamp), record, cursor.current_row_id()));
    }
    Ok(rows)
}

impl OperatorNode for SpliceJoin {
    fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    fn supports_random_access(&self) -> bool {
        false
    }

    fn cursor<'a>(&'a self, ctx: &'a ExecutionContext) -> Result<Box<dyn RecordCursor + 'a>> {
        let master_meta = self.master.metadata();
        let slave_meta = self.slave.metadata();
        let mut master = self.master.cursor(ctx)?;
        let mut slave = self.slave.cursor(ctx)?;
        let masters = drain_timed(master.as_mut(), master_meta.timestamp_index().unwrap_or(0))?;
        let slaves = drain_timed(slave.as_mut(), slave_meta.timestamp_index().unwrap_or(0))?;

        // Latest row of each side per key.
        let mut latest: FxHashMap<Vec<Value>, (Option<SlaveRow>, Option<SlaveRow>)> =
            FxHashMap::with_capacity_and_hasher(self.capacity, Default::default());
        let mut rows = Vec::with_capacity(masters.len() + slaves.len());
        let (mut m, mut s) = (masters.into_iter().peekable(), slaves.into_iter().peekable());
        loop {
            let take_master = match (m.peek(), s.peek()) {
                (Some(master), Some(slave)) => master.0 <= slave.0,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            if take_master {
                if let Some((_, record, row_id)) = m.next() {
                    let key = key_of(&record, &self.keys.master_columns, &self.keys.key_types);
                    let entry = latest.entry(key).or_insert((None, None));
                    let out = match &entry.1 {
                        Some(row) => concat(&record, row.fetch(slave.as_ref())?),
                        None => concat(&record, nulls(slave_meta.column_count())),
                    };
                    entry.0 = Some(SlaveRow::of(true, record, row_id));
                    rows.push(out);
                }
            } else if let Some((_, record, row_id)) = s.next() {
                let key = key_of(&record, &self.keys.slave_columns, &self.keys.key_types);
                let entry = latest.entry(key).or_insert((None, None));
                let master_part = match &entry.0 {
                    Some(row) => row.fetch(master.as_ref())?,
                    None => nulls(master_meta.column_count()),
                };
                rows.push(concat(&master_part, record.clone()));
                entry.1 = Some(SlaveRow::of(true, record, row_id));
            }
        }
        Ok(Box::new(MaterializedCursor::new(rows)))
    }

    fn label(&self) -> String {
        format!("SpliceJoin({}) on {}", JoinAlgorithm::SpliceLight, self.keys)
    }

    fn children(&self) -> Vec<&Operator> {
        vec![self.master.as_ref(), self.slave.as_ref()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn join_algorithm_selection() {
        let pick = |join_type, keys, master_ra, slave_ra, full_fat| {
            choose_join_algorithm(join_type, keys, master_ra, slave_ra, full_fat)
        };
        assert_eq!(pick(JoinType::Inner, true, false, true, false), Some(JoinAlgorithm::HashLight));
        assert_eq!(pick(JoinType::Inner, true, true, false, false), Some(JoinAlgorithm::Hash));
        assert_eq!(pick(JoinType::Outer, true, true, true, true), Some(JoinAlgorithm::HashOuter));
        assert_eq!(pick(JoinType::AsOf, true, true, true, false), Some(JoinAlgorithm::AsOfLight));
        assert_eq!(pick(JoinType::AsOf, false, true, true, false), Some(JoinAlgorithm::AsOfNoKey));
        assert_eq!(pick(JoinType::AsOf, true, true, false, false), Some(JoinAlgorithm::AsOfFull));
        assert_eq!(pick(JoinType::Splice, true, true, true, false), Some(JoinAlgorithm::SpliceLight));
        assert_eq!(pick(JoinType::Splice, true, false, true, false), None);
        assert_eq!(pick(JoinType::Cross, false, false, false, true), Some(JoinAlgorithm::Cross));
        assert_eq!(JoinAlgorithm::HashOuterLight.to_string(), "hash-outer-light");
    }
}
