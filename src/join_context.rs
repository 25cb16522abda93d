use crate::db::ColumnType;
use crate::error::{sql_err, Result, SqlError};
use crate::metadata::RecordMetadata;
use crate::query::JoinContext;
use itertools::Itertools;
use std::fmt;

/// Join keys of one edge, resolved to column positions on each side.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JoinKeys {
    pub master_columns: Vec<usize>,
    pub slave_columns: Vec<usize>,
    /// Key types with symbols widened to strings, since symbol ids are table-local.
    pub key_types: Vec<ColumnType>,
}

impl JoinKeys {
    pub fn is_empty(&self) -> bool {
        self.slave_columns.is_empty()
    }
}

impl fmt::Display for JoinKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]",
            self.master_columns
                .iter()
                .zip(&self.slave_columns)
                .map(|(m, s)| format!("{}={}", m, s))
                .join(", ")
        )
    }
}

/// Resolves a join edge's key names against the two input row shapes.
///
/// When the master is still a plain table (first edge of a chain) its keys are looked up by bare
/// column name. Afterwards the master is a join output and the keys are looked up by the possibly
/// alias-qualified tokens the parser attached.
pub fn resolve(
    vanilla_master: bool,
    context: Option<&JoinContext>,
    master: &RecordMetadata,
    slave: &RecordMetadata,
) -> Result<JoinKeys> {
    let context = match context {
        Some(context) if !context.is_empty() => context,
        _ => return Ok(JoinKeys::default()),
    };
    let mut keys = JoinKeys::default();
    for k in 0..context.len() {
        let a_node = &context.a_nodes[k];
        let b_node = &context.b_nodes[k];
        let slave_index = slave
            .column_index_quiet(&context.a_names[k])
            .ok_or_else(|| SqlError::invalid_column(a_node.position, &a_node.token))?;
        let master_name = if vanilla_master {
            context.b_names[k].as_str()
        } else {
            b_node.token.as_str()
        };
        let master_index = master
            .column_index_quiet(master_name)
            .or_else(|| master.column_index_quiet(&context.b_names[k]))
            .ok_or_else(|| SqlError::invalid_column(b_node.position, &b_node.token))?;

        let slave_type = slave.column_type(slave_index);
        let master_type = master.column_type(master_index);
        if slave_type != master_type {
            return sql_err(
                a_node.position,
                format!(
                    "join column type mismatch [{}:{} at {}, {}:{} at {}]",
                    a_node.token,
                    slave_type,
                    a_node.position,
                    b_node.token,
                    master_type,
                    b_node.position
                ),
            );
        }
        keys.slave_columns.push(slave_index);
        keys.master_columns.push(master_index);
        keys.key_types.push(slave_type.normalize_key());
    }
    Ok(keys)
}
