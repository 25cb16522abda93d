pub mod cursor;
pub mod db;
mod engine;
pub mod error;
pub mod expr;
pub mod funcs;
mod intervals;
mod join_context;
pub mod metadata;
pub mod plan;
mod pred;
pub mod query;
mod sampler;
pub mod storage;
pub mod test_utils;
mod utils;

pub use db::{ColumnType, Record, Value};
pub use engine::{Engine, ExecutionContext, PlannerConfig, SecurityContext};
pub use error::{Error, Result, SqlError, StorageError};
pub use intervals::{Interval, IntervalSet};
pub use join_context::JoinKeys;
pub use plan::Operator;
pub use pred::{IntrinsicModel, IntrinsicValue, WhereClauseAnalyzer};
pub use sampler::TimestampSampler;
