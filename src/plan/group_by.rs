use super::{Operator, OperatorNode};
use crate::cursor::{MaterializedCursor, RecordCursor};
use crate::db::{ColumnType, Record, Value};
use crate::engine::ExecutionContext;
use crate::error::Result;
use crate::funcs::{AggState, FunctionRef, GroupByFunction};
use crate::metadata::RecordMetadata;
use crate::sampler::TimestampSampler;
use itertools::Itertools;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::fmt;

/// One output column of an aggregating operator.
#[derive(Clone)]
pub enum AggregateColumn {
    /// Bucket start of a sampled query.
    Timestamp,
    Key(FunctionRef),
    Aggregate(GroupByFunction),
}

impl fmt::Display for AggregateColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timestamp => write!(f, "bucket"),
            Self::Key(function) => write!(f, "{}", function),
            Self::Aggregate(function) => write!(f, "{}", function),
        }
    }
}

fn keys_of(columns: &[AggregateColumn]) -> Vec<&FunctionRef> {
    columns
        .iter()
        .filter_map(|column| match column {
            AggregateColumn::Key(function) => Some(function),
            _ => None,
        })
        .collect()
}

fn aggregates_of(columns: &[AggregateColumn]) -> Vec<&GroupByFunction> {
    columns
        .iter()
        .filter_map(|column| match column {
            AggregateColumn::Aggregate(function) => Some(function),
            _ => None,
        })
        .collect()
}

/// Lays out one output row in column order.
fn assemble(columns: &[AggregateColumn], bucket: i64, key: &[Value], values: &[Value]) -> Record {
    let (mut keys, mut values) = (key.iter(), values.iter());
    columns
        .iter()
        .map(|column| match column {
            AggregateColumn::Timestamp => Value::Timestamp(bucket),
            AggregateColumn::Key(_) => keys.next().cloned().unwrap_or(Value::Null),
            AggregateColumn::Aggregate(_) => values.next().cloned().unwrap_or(Value::Null),
        })
        .collect()
}

fn label_of(name: &str, columns: &[AggregateColumn]) -> String {
    format!("{}({})", name, columns.iter().join(", "))
}

/// Groups rows by key, preserving first-seen key order.
struct Groups<'a> {
    keys: Vec<&'a FunctionRef>,
    aggregates: Vec<&'a GroupByFunction>,
    index: FxHashMap<Vec<Value>, usize>,
    groups: Vec<(Vec<Value>, Vec<AggState>)>,
}

impl<'a> Groups<'a> {
    fn new(columns: &'a [AggregateColumn], capacity: usize) -> Self {
        Self {
            keys: keys_of(columns),
            aggregates: aggregates_of(columns),
            index: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            groups: vec![],
        }
    }

    fn key_of(&self, record: &[Value]) -> Vec<Value> {
        self.keys.iter().map(|key| key.eval(record)).collect()
    }

    fn add_group(&mut self, key: Vec<Value>) -> usize {
        let states = self.aggregates.iter().map(|agg| agg.new_state()).collect();
        self.index.insert(key.clone(), self.groups.len());
        self.groups.push((key, states));
        self.groups.len() - 1
    }

    fn update(&mut self, record: &[Value]) {
        let key = self.key_of(record);
        let group = match self.index.get(&key) {
            Some(&group) => group,
            None => self.add_group(key),
        };
        let states = &mut self.groups[group].1;
        for (agg, state) in self.aggregates.iter().zip(states.iter_mut()) {
            agg.update(state, record);
        }
    }

    fn results(&self, states: &[AggState]) -> Vec<Value> {
        self.aggregates
            .iter()
            .zip(states)
            .map(|(agg, state)| agg.result(state))
            .collect()
    }
}

/// `count()` over the whole input.
pub struct Count {
    pub(super) input: Box<Operator>,
    pub(super) metadata: RecordMetadata,
}

impl OperatorNode for Count {
    fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    fn supports_random_access(&self) -> bool {
        false
    }

    fn cursor<'a>(&'a self, ctx: &'a ExecutionContext) -> Result<Box<dyn RecordCursor + 'a>> {
        let mut input = self.input.cursor(ctx)?;
        let mut count = 0;
        while input.next()?.is_some() {
            count += 1;
        }
        Ok(Box::new(MaterializedCursor::new(vec![vec![Value::Long(count)]])))
    }

    fn label(&self) -> String {
        "Count".to_string()
    }

    fn children(&self) -> Vec<&Operator> {
        vec![self.input.as_ref()]
    }
}

/// Keyed aggregation.
pub struct GroupBy {
    pub(super) input: Box<Operator>,
    pub(super) metadata: RecordMetadata,
    pub(super) columns: Vec<AggregateColumn>,
    pub(super) capacity: usize,
}

impl OperatorNode for GroupBy {
    fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    fn supports_random_access(&self) -> bool {
        false
    }

    fn cursor<'a>(&'a self, ctx: &'a ExecutionContext) -> Result<Box<dyn RecordCursor + 'a>> {
        let mut input = self.input.cursor(ctx)?;
        let mut groups = Groups::new(&self.columns, self.capacity);
        while let Some(record) = input.next()? {
            groups.update(&record);
        }
        // Aggregates without keys always produce exactly one row.
        if groups.keys.is_empty() && groups.groups.is_empty() {
            groups.add_group(vec![]);
        }
        let rows = groups
            .groups
            .iter()
            .map(|(key, states)| assemble(&self.columns, 0, key, &groups.results(states)))
            .collect();
        Ok(Box::new(MaterializedCursor::new(rows)))
    }

    fn label(&self) -> String {
        label_of("GroupBy", &self.columns)
    }

    fn children(&self) -> Vec<&Operator> {
        vec![self.input.as_ref()]
    }
}

/// How buckets without rows are filled for a key.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleByFill {
    /// Empty buckets are skipped.
    None,
    Prev,
    Null,
    Linear,
    /// One constant per aggregate column.
    Values(Vec<Value>),
}

impl fmt::Display for SampleByFill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Prev => write!(f, "prev"),
            Self::Null => write!(f, "null"),
            Self::Linear => write!(f, "linear"),
            Self::Values(values) => write!(f, "{}", values.iter().join(", ")),
        }
    }
}

/// Aggregation per timestamp bucket and key.
pub struct SampleBy {
    pub(super) input: Box<Operator>,
    pub(super) metadata: RecordMetadata,
    pub(super) sampler: TimestampSampler,
    pub(super) columns: Vec<AggregateColumn>,
    pub(super) fill: SampleByFill,
    /// Designated timestamp of the input.
    pub(super) timestamp_index: usize,
}

impl SampleBy {
    pub fn fill(&self) -> &SampleByFill {
        &self.fill
    }

    pub fn sampler(&self) -> TimestampSampler {
        self.sampler
    }

    fn interpolate(
        types: &[ColumnType],
        (b0, v0): (i64, &[Value]),
        (b1, v1): (i64, &[Value]),
        bucket: i64,
    ) -> Vec<Value> {
        let ratio = (bucket - b0) as f64 / (b1 - b0) as f64;
        types
            .iter()
            .zip(v0.iter().zip(v1))
            .map(|(column_type, (x0, x1))| match (x0.as_double(), x1.as_double()) {
                (Some(x0), Some(x1)) => {
                    let x = x0 + (x1 - x0) * ratio;
                    if column_type.is_integral() {
                        Value::Long(x as i64)
                    } else {
                        Value::Double(x)
                    }
                }
                _ => Value::Null,
            })
            .collect()
    }

    /// Fills the empty cells of one key's row of buckets.
    fn fill_key(&self, types: &[ColumnType], buckets: &[i64], cells: &mut [Option<Vec<Value>>]) {
        let nulls = vec![Value::Null; types.len()];
        match &self.fill {
            SampleByFill::None => {}
            SampleByFill::Null => {
                for cell in cells.iter_mut().filter(|cell| cell.is_none()) {
                    *cell = Some(nulls.clone());
                }
            }
            SampleByFill::Values(values) => {
                let values: Vec<Value> = values
                    .iter()
                    .zip(types)
                    .map(|(value, &column_type)| value.cast(column_type))
                    .collect();
                for cell in cells.iter_mut().filter(|cell| cell.is_none()) {
                    *cell = Some(values.clone());
                }
            }
            SampleByFill::Prev => {
                let mut prev = nulls;
                for cell in cells.iter_mut() {
                    match cell {
                        Some(values) => prev = values.clone(),
                        None => *cell = Some(prev.clone()),
                    }
                }
            }
            SampleByFill::Linear => {
                let known: Vec<usize> = (0..cells.len()).filter(|&i| cells[i].is_some()).collect();
                for (&lo, &hi) in known.iter().tuple_windows() {
                    if let (Some(v0), Some(v1)) = (cells[lo].clone(), cells[hi].clone()) {
                        for i in lo + 1..hi {
                            cells[i] = Some(Self::interpolate(
                                types,
                                (buckets[lo], &v0),
                                (buckets[hi], &v1),
                                buckets[i],
                            ));
                        }
                    }
                }
                for cell in cells.iter_mut().filter(|cell| cell.is_none()) {
                    *cell = Some(nulls.clone());
                }
            }
        }
    }
}

impl OperatorNode for SampleBy {
    fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    fn supports_random_access(&self) -> bool {
        false
    }

    fn cursor<'a>(&'a self, ctx: &'a ExecutionContext) -> Result<Box<dyn RecordCursor + 'a>> {
        let mut input = self.input.cursor(ctx)?;
        let mut keys = Groups::new(&self.columns, 0);
        let mut sampled: BTreeMap<i64, FxHashMap<usize, Vec<AggState>>> = BTreeMap::new();
        while let Some(record) = input.next()? {
            let ts = match record[self.timestamp_index].as_long() {
                Some(ts) => ts,
                None => continue,
            };
            let key = keys.key_of(&record);
            let key = match keys.index.get(&key) {
                Some(&key) => key,
                None => keys.add_group(key),
            };
            let states = sampled
                .entry(self.sampler.round(ts))
                .or_default()
                .entry(key)
                .or_insert_with(|| keys.aggregates.iter().map(|agg| agg.new_state()).collect());
            for (agg, state) in keys.aggregates.iter().zip(states.iter_mut()) {
                agg.update(state, &record);
            }
        }

        let buckets: Vec<i64> = match (&self.fill, sampled.keys().next(), sampled.keys().last()) {
            (SampleByFill::None, _, _) | (_, None, _) | (_, _, None) => {
                sampled.keys().copied().collect()
            }
            (_, Some(&first), Some(&last)) => {
                let mut buckets = vec![first];
                let mut bucket = first;
                while bucket < last {
                    bucket = self.sampler.next(bucket);
                    buckets.push(bucket);
                }
                buckets
            }
        };
        let types: Vec<ColumnType> = keys.aggregates.iter().map(|agg| agg.column_type).collect();

        // One row of cells per key, one cell per bucket.
        let mut grid: Vec<Vec<Option<Vec<Value>>>> = (0..keys.groups.len())
            .map(|key| {
                buckets
                    .iter()
                    .map(|bucket| {
                        sampled
                            .get(bucket)
                            .and_then(|states| states.get(&key))
                            .map(|states| keys.results(states))
                    })
                    .collect()
            })
            .collect();
        for cells in grid.iter_mut() {
            self.fill_key(&types, &buckets, cells);
        }

        let mut rows = vec![];
        for (i, &bucket) in buckets.iter().enumerate() {
            for (key, cells) in grid.iter().enumerate() {
                if let Some(values) = &cells[i] {
                    rows.push(assemble(&self.columns, bucket, &keys.groups[key].0, values));
                }
            }
        }
        Ok(Box::new(MaterializedCursor::new(rows)))
    }

    fn label(&self) -> String {
        format!(
            "{} by {} fill({})",
            label_of("SampleBy", &self.columns),
            self.sampler,
            self.fill
        )
    }

    fn children(&self) -> Vec<&Operator> {
        vec![self.input.as_ref()]
    }
}

/// Drops repeated rows, keeping the first occurrence.
pub struct Distinct {
    pub(super) input: Box<Operator>,
}

struct DistinctCursor<'a> {
    input: Box<dyn RecordCursor + 'a>,
    seen: FxHashSet<Record>,
}

impl<'a> RecordCursor for DistinctCursor<'a> {
    fn next(&mut self) -> Result<Option<Record>> {
        while let Some(record) = self.input.next()? {
            if self.seen.insert(record.clone()) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn to_top(&mut self) {
        self.input.to_top();
        self.seen.clear();
    }
}

impl OperatorNode for Distinct {
    fn metadata(&self) -> &RecordMetadata {
        self.input.metadata()
    }

    fn supports_random_access(&self) -> bool {
        false
    }

    fn cursor<'a>(&'a self, ctx: &'a ExecutionContext) -> Result<Box<dyn RecordCursor + 'a>> {
        Ok(Box::new(DistinctCursor {
            input: self.input.cursor(ctx)?,
            seen: Default::default(),
        }))
    }

    fn label(&self) -> String {
        "Distinct".to_string()
    }

    fn children(&self) -> Vec<&Operator> {
        vec![self.input.as_ref()]
    }
}
