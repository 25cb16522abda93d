use crate::db::{Record, RowId};
use crate::error::{Result, StorageError};

/// Pull-based row iterator produced by an operator.
pub trait RecordCursor {
    fn next(&mut self) -> Result<Option<Record>>;

    /// Id of the row most recently returned by `next`, for cursors over random-access sources.
    fn current_row_id(&self) -> Option<RowId> {
        None
    }

    /// Fetches a row by id. Only meaningful when the owning operator supports random access.
    fn record_at(&self, _row: RowId) -> Result<Record> {
        Err(StorageError::NoRandomAccess.into())
    }

    /// Rewinds to the first row.
    fn to_top(&mut self);
}

pub struct EmptyCursor;

impl RecordCursor for EmptyCursor {
    fn next(&mut self) -> Result<Option<Record>> {
        Ok(None)
    }

    fn to_top(&mut self) {}
}

/// Replays rows that were computed up front.
pub struct MaterializedCursor {
    rows: Vec<Record>,
    pos: usize,
}

impl MaterializedCursor {
    pub fn new(rows: Vec<Record>) -> Self {
        Self { rows, pos: 0 }
    }
}

impl RecordCursor for MaterializedCursor {
    fn next(&mut self) -> Result<Option<Record>> {
        let row = self.rows.get(self.pos).cloned();
        if row.is_some() {
            self.pos += 1;
        }
        Ok(row)
    }

    fn to_top(&mut self) {
        self.pos = 0;
    }
}

/// Drains the cursor from its current position.
pub fn collect_rows(cursor: &mut dyn RecordCursor) -> Result<Vec<Record>> {
    let mut rows = vec![];
    while let Some(row) = cursor.next()? {
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Value;
    use pretty_assertions::assert_eq;

    #[test]
    fn materialized_rewinds() {
        let mut cursor = MaterializedCursor::new(vec![vec![Value::Long(1)], vec![Value::Long(2)]]);
        assert_eq!(collect_rows(&mut cursor).unwrap().len(), 2);
        assert_eq!(cursor.next().unwrap(), None);
        cursor.to_top();
        assert_eq!(cursor.next().unwrap(), Some(vec![Value::Long(1)]));
        assert!(cursor.record_at(0).is_err());
        assert_eq!(EmptyCursor.next().unwrap(), None);
    }
}
