use super::{Operator, OperatorNode};
use crate::cursor::RecordCursor;
use crate::db::{Record, RowId};
use crate::engine::ExecutionContext;
use crate::error::Result;
use crate::funcs::FunctionRef;
use crate::metadata::RecordMetadata;
use itertools::Itertools;

/// Streaming row filter.
pub struct Filtered {
    pub(super) input: Box<Operator>,
    pub(super) filter: FunctionRef,
}

struct FilteredCursor<'a> {
    input: Box<dyn RecordCursor + 'a>,
    filter: &'a FunctionRef,
}

impl<'a> RecordCursor for FilteredCursor<'a> {
    fn next(&mut self) -> Result<Option<Record>> {
        while let Some(record) = self.input.next()? {
            if self.filter.get_bool(&record) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn current_row_id(&self) -> Option<RowId> {
        self.input.current_row_id()
    }

    fn record_at(&self, row: RowId) -> Result<Record> {
        self.input.record_at(row)
    }

    fn to_top(&mut self) {
        self.input.to_top();
    }
}

impl OperatorNode for Filtered {
    fn metadata(&self) -> &RecordMetadata {
        self.input.metadata()
    }

    fn supports_random_access(&self) -> bool {
        self.input.supports_random_access()
    }

    fn cursor<'a>(&'a self, ctx: &'a ExecutionContext) -> Result<Box<dyn RecordCursor + 'a>> {
        Ok(Box::new(FilteredCursor {
            input: self.input.cursor(ctx)?,
            filter: &self.filter,
        }))
    }

    fn label(&self) -> String {
        format!("Filter({})", self.filter)
    }

    fn children(&self) -> Vec<&Operator> {
        vec![self.input.as_ref()]
    }
}

/// Column subset and renames over the input.
pub struct Selected {
    pub(super) input: Box<Operator>,
    pub(super) metadata: RecordMetadata,
    /// Input column of every output column.
    pub(super) columns: Vec<usize>,
}

struct SelectedCursor<'a> {
    input: Box<dyn RecordCursor + 'a>,
    columns: &'a [usize],
}

impl<'a> SelectedCursor<'a> {
    fn project(&self, record: Record) -> Record {
        self.columns.iter().map(|&i| record[i].clone()).collect()
    }
}

impl<'a> RecordCursor for SelectedCursor<'a> {
    fn next(&mut self) -> Result<Option<Record>> {
        Ok(self.input.next()?.map(|record| self.project(record)))
    }

    fn current_row_id(&self) -> Option<RowId> {
        self.input.current_row_id()
    }

    fn record_at(&self, row: RowId) -> Result<Record> {
        Ok(self.project(self.input.record_at(row)?))
    }

    fn to_top(&mut self) {
        self.input.to_top();
    }
}

impl OperatorNode for Selected {
    fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    fn supports_random_access(&self) -> bool {
        self.input.supports_random_access()
    }

    fn cursor<'a>(&'a self, ctx: &'a ExecutionContext) -> Result<Box<dyn RecordCursor + 'a>> {
        Ok(Box::new(SelectedCursor {
            input: self.input.cursor(ctx)?,
            columns: &self.columns,
        }))
    }

    fn label(&self) -> String {
        format!(
            "Select({})",
            self.metadata
                .columns()
                .iter()
                .map(|column| column.name.as_str())
                .join(", ")
        )
    }

    fn children(&self) -> Vec<&Operator> {
        vec![self.input.as_ref()]
    }
}

/// Computed columns over the input.
pub struct Virtual {
    pub(super) input: Box<Operator>,
    pub(super) metadata: RecordMetadata,
    pub(super) functions: Vec<FunctionRef>,
}

struct VirtualCursor<'a> {
    input: Box<dyn RecordCursor + 'a>,
    functions: &'a [FunctionRef],
}

impl<'a> VirtualCursor<'a> {
    fn compute(&self, record: Record) -> Record {
        self.functions
            .iter()
            .map(|function| function.eval(&record))
            .collect()
    }
}

impl<'a> RecordCursor for VirtualCursor<'a> {
    fn next(&mut self) -> Result<Option<Record>> {
        Ok(self.input.next()?.map(|record| self.compute(record)))
    }

    fn current_row_id(&self) -> Option<RowId> {
        self.input.current_row_id()
    }

    fn record_at(&self, row: RowId) -> Result<Record> {
        Ok(self.compute(self.input.record_at(row)?))
    }

    fn to_top(&mut self) {
        self.input.to_top();
    }
}

impl OperatorNode for Virtual {
    fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    fn supports_random_access(&self) -> bool {
        self.input.supports_random_access()
    }

    fn cursor<'a>(&'a self, ctx: &'a ExecutionContext) -> Result<Box<dyn RecordCursor + 'a>> {
        Ok(Box::new(VirtualCursor {
            input: self.input.cursor(ctx)?,
            functions: &self.functions,
        }))
    }

    fn label(&self) -> String {
        format!(
            "Virtual({})",
            self.metadata
                .columns()
                .iter()
                .zip(&self.functions)
                .map(|(column, function)| format!("{}: {}", column.name, function))
                .join(", ")
        )
    }

    fn children(&self) -> Vec<&Operator> {
        vec![self.input.as_ref()]
    }
}
