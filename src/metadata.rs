use crate::db::ColumnType;
use crate::error::{Result, SqlError};
use itertools::Itertools;
use std::fmt;

pub const DEFAULT_INDEX_BLOCK_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub name: String,
    /// Alias of the table (or sub-query) the column was copied from, if any. Allows `alias.name`
    /// lookups on join output.
    pub table_alias: Option<String>,
    pub column_type: ColumnType,
    pub indexed: bool,
    pub index_block_capacity: usize,
}

impl ColumnMetadata {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            table_alias: None,
            column_type,
            indexed: false,
            index_block_capacity: DEFAULT_INDEX_BLOCK_CAPACITY,
        }
    }

    pub fn indexed(mut self, index_block_capacity: usize) -> Self {
        self.indexed = true;
        self.index_block_capacity = index_block_capacity;
        self
    }

    fn matches(&self, name: &str) -> bool {
        match name.split_once('.') {
            Some((alias, column)) => {
                self.name.eq_ignore_ascii_case(column)
                    && self
                        .table_alias
                        .as_deref()
                        .map_or(false, |a| a.eq_ignore_ascii_case(alias))
            }
            None => self.name.eq_ignore_ascii_case(name),
        }
    }
}

/// Ordered column descriptions of a row source plus its designated timestamp, if any.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordMetadata {
    columns: Vec<ColumnMetadata>,
    timestamp_index: Option<usize>,
}

impl RecordMetadata {
    pub fn new(columns: Vec<ColumnMetadata>, timestamp_index: Option<usize>) -> Self {
        Self {
            columns,
            timestamp_index,
        }
    }

    pub fn add(&mut self, column: ColumnMetadata) -> &mut Self {
        self.columns.push(column);
        self
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> &ColumnMetadata {
        &self.columns[index]
    }

    pub fn column_type(&self, index: usize) -> ColumnType {
        self.columns[index].column_type
    }

    pub fn column_name(&self, index: usize) -> &str {
        &self.columns[index].name
    }

    pub fn is_indexed(&self, index: usize) -> bool {
        self.columns[index].indexed
    }

    pub fn index_block_capacity(&self, index: usize) -> usize {
        self.columns[index].index_block_capacity
    }

    pub fn timestamp_index(&self) -> Option<usize> {
        self.timestamp_index
    }

    pub fn set_timestamp_index(&mut self, timestamp_index: Option<usize>) -> &mut Self {
        self.timestamp_index = timestamp_index;
        self
    }

    /// Case-insensitive lookup accepting both `name` and `alias.name`.
    pub fn column_index_quiet(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.matches(name))
    }

    pub fn column_index(&self, name: &str, position: usize) -> Result<usize> {
        self.column_index_quiet(name)
            .ok_or_else(|| SqlError::invalid_column(position, name).into())
    }

    /// Same columns, no designated timestamp.
    pub fn without_timestamp(&self) -> Self {
        Self {
            columns: self.columns.clone(),
            timestamp_index: None,
        }
    }

    /// Copy with every column re-labelled under `alias`. A `None` alias keeps existing labels.
    pub fn with_alias(&self, alias: Option<&str>) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|column| ColumnMetadata {
                table_alias: alias.map(str::to_string).or_else(|| column.table_alias.clone()),
                ..column.clone()
            })
            .collect();
        Self {
            columns,
            timestamp_index: self.timestamp_index,
        }
    }

    /// Output shape of a join: all master columns followed by all slave columns.
    pub fn join(
        master_alias: Option<&str>,
        master: &Self,
        slave_alias: Option<&str>,
        slave: &Self,
        timestamp_index: Option<usize>,
    ) -> Self {
        let mut columns = master.with_alias(master_alias).columns;
        columns.extend(slave.with_alias(slave_alias).columns);
        Self {
            columns,
            timestamp_index,
        }
    }

    /// Output shape of a join that stores slave values in a map: master columns, then slave
    /// non-key columns, then slave key columns with symbols widened to strings.
    pub fn join_values_first(
        master_alias: Option<&str>,
        master: &Self,
        slave_alias: Option<&str>,
        slave: &Self,
        slave_keys: &[usize],
    ) -> Self {
        let mut columns = master.with_alias(master_alias).columns;
        let slave = slave.with_alias(slave_alias);
        columns.extend(
            (0..slave.column_count())
                .filter(|i| !slave_keys.contains(i))
                .map(|i| slave.columns[i].clone()),
        );
        columns.extend(slave_keys.iter().map(|&i| ColumnMetadata {
            column_type: slave.columns[i].column_type.normalize_key(),
            indexed: false,
            ..slave.columns[i].clone()
        }));
        Self {
            columns,
            timestamp_index: master.timestamp_index,
        }
    }
}

impl fmt::Display for RecordMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]",
            self.columns
                .iter()
                .enumerate()
                .map(|(i, column)| {
                    let ts = if Some(i) == self.timestamp_index { "*" } else { "" };
                    format!("{}{}:{}", column.name, ts, column.column_type)
                })
                .join(", ")
        )
    }
}
