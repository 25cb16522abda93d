/// Utility module useful for testing: in-memory fixtures, expression shorthands and result-set
/// comparison helpers. Functions here favour brevity over speed.
use crate::cursor::collect_rows;
use crate::db::{ColumnType, Record, Value};
use crate::engine::ExecutionContext;
use crate::error::Result;
use crate::expr::{ExprRef, ExpressionNode};
use crate::metadata::RecordMetadata;
use crate::plan::Operator;
use crate::storage::{MemStorage, MemTableBuilder, PartitionBy};
use crate::utils::{MICROS_PER_DAY, MICROS_PER_HOUR, MICROS_PER_MINUTE};
use itertools::Itertools;
use std::cell::Cell;
use std::fmt;

pub const JAN_1_2020: i64 = 1_577_836_800_000_000;

pub fn day(n: i64) -> i64 {
    JAN_1_2020 + n * MICROS_PER_DAY
}

pub fn at(day_n: i64, hours: i64, minutes: i64) -> i64 {
    day(day_n) + hours * MICROS_PER_HOUR + minutes * MICROS_PER_MINUTE
}

thread_local! {
    static NEXT_POSITION: Cell<usize> = Cell::new(1);
}

/// Distinct, increasing token positions so tests can tell which node an error points at.
fn next_position() -> usize {
    NEXT_POSITION.with(|pos| {
        let out = pos.get();
        pos.set(out + 1);
        out
    })
}

pub fn lit(token: &str) -> ExprRef {
    ExpressionNode::literal(token, next_position())
}

pub fn cons(token: &str) -> ExprRef {
    ExpressionNode::constant(token, next_position())
}

pub fn bind(token: &str) -> ExprRef {
    ExpressionNode::bind_variable(token, next_position())
}

pub fn op(token: &str, args: Vec<ExprRef>) -> ExprRef {
    ExpressionNode::operation(token, args, next_position())
}

pub fn func(token: &str, args: Vec<ExprRef>) -> ExprRef {
    ExpressionNode::function(token, args, next_position())
}

pub fn and(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
    op("and", vec![lhs, rhs])
}

fn ts(micros: i64) -> Value {
    Value::Timestamp(micros)
}

/// `trades(ts TIMESTAMP, sym SYMBOL INDEXED, price DOUBLE, qty LONG)`, two daily partitions.
pub fn trades_builder() -> MemTableBuilder {
    MemTableBuilder::new("trades")
        .column("ts", ColumnType::Timestamp)
        .indexed_column("sym", ColumnType::Symbol, 256)
        .column("price", ColumnType::Double)
        .column("qty", ColumnType::Long)
        .timestamp("ts")
        .partition_by(PartitionBy::Day)
        .rows([
            vec![ts(at(0, 1, 0)), "A".into(), 10.0.into(), Value::Long(100)],
            vec![ts(at(0, 2, 0)), "B".into(), 20.0.into(), Value::Long(200)],
            vec![ts(at(0, 3, 0)), "A".into(), 11.0.into(), Value::Long(150)],
            vec![ts(at(0, 4, 0)), "C".into(), 30.0.into(), Value::Long(300)],
            vec![ts(at(1, 0, 0)), "B".into(), 21.0.into(), Value::Long(210)],
            vec![ts(at(1, 1, 0)), "A".into(), 12.0.into(), Value::Long(120)],
            vec![ts(at(1, 2, 0)), "B".into(), 22.0.into(), Value::Long(220)],
            vec![ts(at(1, 5, 0)), "C".into(), 31.0.into(), Value::Long(310)],
        ])
}

/// `quotes(ts TIMESTAMP, sym SYMBOL INDEXED(128), venue SYMBOL INDEXED(512), bid, ask)`.
pub fn quotes_builder() -> MemTableBuilder {
    MemTableBuilder::new("quotes")
        .column("ts", ColumnType::Timestamp)
        .indexed_column("sym", ColumnType::Symbol, 128)
        .indexed_column("venue", ColumnType::Symbol, 512)
        .column("bid", ColumnType::Double)
        .column("ask", ColumnType::Double)
        .timestamp("ts")
        .partition_by(PartitionBy::Day)
        .rows([
            vec![ts(at(0, 0, 30)), "A".into(), "X".into(), 9.5.into(), 10.5.into()],
            vec![ts(at(0, 1, 30)), "B".into(), "Y".into(), 19.5.into(), 20.5.into()],
            vec![ts(at(0, 2, 30)), "A".into(), "X".into(), 10.5.into(), 11.5.into()],
            vec![ts(at(1, 0, 30)), "C".into(), "X".into(), 29.5.into(), 30.5.into()],
        ])
}

/// `notes(id LONG, body STRING, payload BINARY)`, no designated timestamp.
pub fn notes_builder() -> MemTableBuilder {
    MemTableBuilder::new("notes")
        .column("id", ColumnType::Long)
        .column("body", ColumnType::String)
        .column("payload", ColumnType::Binary)
        .rows([
            vec![Value::Long(1), "A".into(), Value::Binary(vec![1])],
            vec![Value::Long(2), "B".into(), Value::Binary(vec![2])],
            vec![Value::Long(3), Value::Null, Value::Binary(vec![3])],
        ])
}

pub fn trades_metadata() -> RecordMetadata {
    trades_builder().build().metadata().clone()
}

pub fn quotes_metadata() -> RecordMetadata {
    quotes_builder().build().metadata().clone()
}

/// Storage holding `trades`, `quotes` and `notes`.
pub fn trades_storage() -> MemStorage {
    let storage = MemStorage::new();
    storage
        .add_table(trades_builder().build())
        .add_table(quotes_builder().build())
        .add_table(notes_builder().build());
    storage
}

pub fn rows_of(operator: &Operator, ctx: &ExecutionContext) -> Result<Vec<Record>> {
    let mut cursor = operator.cursor(ctx)?;
    collect_rows(cursor.as_mut())
}

/// A row-oriented result set compared without regard to row order.
#[derive(PartialEq, Eq, Debug)]
pub struct RowResultSet(Vec<Record>);

impl RowResultSet {
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<Record> for RowResultSet {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = Record>,
    {
        RowResultSet(iter.into_iter().sorted().collect())
    }
}

impl fmt::Display for RowResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.0
                .iter()
                .map(|vals| format!("[{}]", vals.iter().map(|x| x.to_string()).join(", ")))
                .join(", ")
        )
    }
}

#[macro_export]
macro_rules! make_row_result_set {
    {
        $subtypes:tt,
        {$($row:tt),* $(,)?}
    } => {
        $crate::test_utils::RowResultSet::from_iter([$(make_row_result_set! { @make_row $subtypes, $row }),*])
    };

    {
        @make_row ($($subtype:tt),*), ($($val:expr),*)
    } => {
        vec![$(make_row_result_set! { @make_single $subtype, $val}),*]
    };

    {
        @make_single Str, $val:expr
    } => {
        $crate::db::Value::Str($val.to_string())
    };

    {
        @make_single $subtype:tt, $val:expr
    } => {
        $crate::db::Value::$subtype($val)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn make_result_set() {
        assert_eq!(
            make_row_result_set! { @make_row (Long, Double, Bool, Str), (1, 3., true, "a") },
            vec![
                Value::Long(1),
                Value::Double(3.),
                Value::Bool(true),
                Value::Str("a".to_string())
            ]
        );

        assert_eq!(
            make_row_result_set! {
                (Long, Str),
                {
                    (3, "b"),
                    (1, "a"),
                    (1, "a"),
                }
            },
            RowResultSet(vec![
                vec![Value::Long(1), Value::Str("a".to_string())],
                vec![Value::Long(1), Value::Str("a".to_string())],
                vec![Value::Long(3), Value::Str("b".to_string())],
            ])
        );
    }

    #[test]
    fn fixtures_are_consistent() {
        let meta = trades_metadata();
        assert_eq!(meta.timestamp_index(), Some(0));
        assert_eq!(meta.to_string(), "[ts*:TIMESTAMP, sym:SYMBOL, price:DOUBLE, qty:LONG]");
        assert!(quotes_metadata().index_block_capacity(2) > quotes_metadata().index_block_capacity(1));
        assert!(lit("a").position < lit("b").position);
    }
}
