use super::{Operator, OperatorNode};
use crate::cursor::{MaterializedCursor, RecordCursor};
use crate::db::{Record, RowId, Value};
use crate::engine::ExecutionContext;
use crate::error::{Result, StorageError};
use crate::funcs::FunctionRef;
use crate::metadata::RecordMetadata;
use crate::query::OrderDirection;
use itertools::Itertools;
use std::cmp::Ordering;

/// First non-equal comparison of the key pairs.
fn compare_by<'v>(pairs: impl Iterator<Item = (OrderDirection, &'v Value, &'v Value)>) -> Ordering {
    pairs
        .map(|(direction, a, b)| match direction {
            OrderDirection::Asc => a.total_cmp(b),
            OrderDirection::Desc => b.total_cmp(a),
        })
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
}

pub struct Sort {
    pub(super) input: Box<Operator>,
    pub(super) metadata: RecordMetadata,
    pub(super) keys: Vec<(usize, OrderDirection)>,
    /// Sorts row ids and fetches rows again from the input instead of copying them.
    pub(super) light: bool,
    pub(super) capacity: usize,
}

impl Sort {
    pub fn is_light(&self) -> bool {
        self.light
    }

    pub fn keys(&self) -> &[(usize, OrderDirection)] {
        &self.keys
    }

    fn compare(&self, a: &[Value], b: &[Value]) -> Ordering {
        compare_by(self.keys.iter().map(|&(i, direction)| (direction, &a[i], &b[i])))
    }

    fn sort_key(&self, record: &[Value]) -> Vec<Value> {
        self.keys.iter().map(|&(i, _)| record[i].clone()).collect()
    }
}

/// Replays sorted row ids through the input cursor.
struct LightSortCursor<'a> {
    input: Box<dyn RecordCursor + 'a>,
    rows: Vec<RowId>,
    pos: usize,
    current: Option<RowId>,
}

impl<'a> RecordCursor for LightSortCursor<'a> {
    fn next(&mut self) -> Result<Option<Record>> {
        match self.rows.get(self.pos) {
            Some(&row) => {
                self.pos += 1;
                self.current = Some(row);
                Ok(Some(self.input.record_at(row)?))
            }
            None => Ok(None),
        }
    }

    fn current_row_id(&self) -> Option<RowId> {
        self.current
    }

    fn record_at(&self, row: RowId) -> Result<Record> {
        self.input.record_at(row)
    }

    fn to_top(&mut self) {
        self.pos = 0;
        self.current = None;
    }
}

impl OperatorNode for Sort {
    fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    fn supports_random_access(&self) -> bool {
        self.light
    }

    fn cursor<'a>(&'a self, ctx: &'a ExecutionContext) -> Result<Box<dyn RecordCursor + 'a>> {
        let mut input = self.input.cursor(ctx)?;
        if !self.light {
            let mut rows = Vec::with_capacity(self.capacity);
            while let Some(record) = input.next()? {
                rows.push(record);
            }
            rows.sort_by(|a, b| self.compare(a, b));
            return Ok(Box::new(MaterializedCursor::new(rows)));
        }

        let mut entries: Vec<(Vec<Value>, RowId)> = Vec::with_capacity(self.capacity);
        while let Some(record) = input.next()? {
            let row = input.current_row_id().ok_or(StorageError::NoRandomAccess)?;
            entries.push((self.sort_key(&record), row));
        }
        entries.sort_by(|(a, _), (b, _)| {
            compare_by(
                self.keys
                    .iter()
                    .zip(a.iter().zip(b))
                    .map(|(&(_, direction), (x, y))| (direction, x, y)),
            )
        });
        Ok(Box::new(LightSortCursor {
            input,
            rows: entries.into_iter().map(|(_, row)| row).collect(),
            pos: 0,
            current: None,
        }))
    }

    fn label(&self) -> String {
        format!(
            "Sort{}({})",
            if self.light { "Light" } else { "" },
            self.keys
                .iter()
                .map(|&(i, direction)| format!(
                    "{} {:?}",
                    self.metadata.column_name(i),
                    direction
                ))
                .join(", ")
        )
    }

    fn children(&self) -> Vec<&Operator> {
        vec![self.input.as_ref()]
    }
}

/// Row window over the input. Bounds are evaluated when a cursor opens.
pub struct Limit {
    pub(super) input: Box<Operator>,
    pub(super) lo: Option<FunctionRef>,
    pub(super) hi: Option<FunctionRef>,
}

fn bound(function: &Option<FunctionRef>) -> Option<i64> {
    function.as_ref().and_then(|function| function.eval(&[]).as_long())
}

struct LimitCursor<'a> {
    input: Box<dyn RecordCursor + 'a>,
    start: u64,
    end: u64,
    pos: u64,
}

impl<'a> RecordCursor for LimitCursor<'a> {
    fn next(&mut self) -> Result<Option<Record>> {
        while self.pos < self.start {
            if self.input.next()?.is_none() {
                return Ok(None);
            }
            self.pos += 1;
        }
        if self.pos >= self.end {
            return Ok(None);
        }
        self.pos += 1;
        self.input.next()
    }

    fn current_row_id(&self) -> Option<RowId> {
        self.input.current_row_id()
    }

    fn record_at(&self, row: RowId) -> Result<Record> {
        self.input.record_at(row)
    }

    fn to_top(&mut self) {
        self.input.to_top();
        self.pos = 0;
    }
}

impl Limit {
    /// Resolves the bounds into a half-open row range. `count` is only called when a bound is
    /// relative to the end of the input.
    fn window(&self, count: impl FnOnce() -> Result<i64>) -> Result<(u64, u64)> {
        let (lo, hi) = (bound(&self.lo), bound(&self.hi));
        // A missing lower bound with an upper one starts at the first row.
        let lo = lo.or(hi.map(|_| 0));
        let (start, end) = match (lo, hi) {
            (None, _) => (0, i64::MAX),
            (Some(lo), None) if lo >= 0 => (0, lo),
            (Some(lo), None) => {
                let count = count()?;
                (count + lo, count)
            }
            (Some(lo), Some(hi)) if lo >= 0 && hi >= 0 => (lo, hi),
            (Some(lo), Some(hi)) => {
                let count = count()?;
                let relative = |x: i64| if x < 0 { count + x } else { x };
                (relative(lo), relative(hi))
            }
        };
        let start = start.max(0) as u64;
        Ok((start, (end.max(0) as u64).max(start)))
    }
}

impl OperatorNode for Limit {
    fn metadata(&self) -> &RecordMetadata {
        self.input.metadata()
    }

    fn supports_random_access(&self) -> bool {
        self.input.supports_random_access()
    }

    fn cursor<'a>(&'a self, ctx: &'a ExecutionContext) -> Result<Box<dyn RecordCursor + 'a>> {
        let mut input = self.input.cursor(ctx)?;
        let (start, end) = self.window(|| {
            let mut count = 0;
            while input.next()?.is_some() {
                count += 1;
            }
            input.to_top();
            Ok(count)
        })?;
        Ok(Box::new(LimitCursor {
            input,
            start,
            end,
            pos: 0,
        }))
    }

    fn label(&self) -> String {
        let show = |function: &Option<FunctionRef>| {
            function
                .as_ref()
                .map_or("-".to_string(), |function| function.to_string())
        };
        format!("Limit({}, {})", show(&self.lo), show(&self.hi))
    }

    fn children(&self) -> Vec<&Operator> {
        vec![self.input.as_ref()]
    }
}
