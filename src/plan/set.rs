use super::{Operator, OperatorNode};
use crate::cursor::{MaterializedCursor, RecordCursor};
use crate::db::Record;
use crate::engine::ExecutionContext;
use crate::error::Result;
use crate::metadata::RecordMetadata;
use crate::query::UnionType;
use rustc_hash::FxHashSet;

/// Combines two inputs of identical shape. Output metadata is the master's.
pub struct SetOperation {
    pub(super) master: Box<Operator>,
    pub(super) slave: Box<Operator>,
    pub(super) kind: UnionType,
}

impl SetOperation {
    pub fn kind(&self) -> UnionType {
        self.kind
    }
}

/// Master rows followed by slave rows.
struct UnionAllCursor<'a> {
    master: Box<dyn RecordCursor + 'a>,
    slave: Box<dyn RecordCursor + 'a>,
    master_done: bool,
}

impl<'a> RecordCursor for UnionAllCursor<'a> {
    fn next(&mut self) -> Result<Option<Record>> {
        if !self.master_done {
            match self.master.next()? {
                Some(record) => return Ok(Some(record)),
                None => self.master_done = true,
            }
        }
        self.slave.next()
    }

    fn to_top(&mut self) {
        self.master.to_top();
        self.slave.to_top();
        self.master_done = false;
    }
}

fn drain(cursor: &mut dyn RecordCursor, into: &mut Vec<Record>) -> Result<()> {
    while let Some(record) = cursor.next()? {
        into.push(record);
    }
    Ok(())
}

impl OperatorNode for SetOperation {
    fn metadata(&self) -> &RecordMetadata {
        self.master.metadata()
    }

    fn supports_random_access(&self) -> bool {
        false
    }

    fn cursor<'a>(&'a self, ctx: &'a ExecutionContext) -> Result<Box<dyn RecordCursor + 'a>> {
        let mut master = self.master.cursor(ctx)?;
        let mut slave = self.slave.cursor(ctx)?;
        if self.kind == UnionType::UnionAll {
            return Ok(Box::new(UnionAllCursor {
                master,
                slave,
                master_done: false,
            }));
        }

        let (mut master_rows, mut slave_rows) = (vec![], vec![]);
        drain(master.as_mut(), &mut master_rows)?;
        drain(slave.as_mut(), &mut slave_rows)?;
        let mut seen = FxHashSet::default();
        let rows = match self.kind {
            UnionType::Intersect | UnionType::Except => {
                let slave_rows: FxHashSet<Record> = slave_rows.into_iter().collect();
                let keep = self.kind == UnionType::Intersect;
                master_rows
                    .into_iter()
                    .filter(|record| slave_rows.contains(record) == keep)
                    .filter(|record| seen.insert(record.clone()))
                    .collect()
            }
            _ => master_rows
                .into_iter()
                .chain(slave_rows)
                .filter(|record| seen.insert(record.clone()))
                .collect(),
        };
        Ok(Box::new(MaterializedCursor::new(rows)))
    }

    fn label(&self) -> String {
        format!("{}", self.kind)
    }

    fn children(&self) -> Vec<&Operator> {
        vec![self.master.as_ref(), self.slave.as_ref()]
    }
}
