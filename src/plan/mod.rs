/// Operator tree: the executable plan produced by `PlanBuilder`. Every node is a row-cursor
/// factory that exposes its output shape, whether its rows can be fetched again by row id, and a
/// fresh cursor per execution. Nodes own their children and their table readers, so dropping a
/// tree (or a partially built one) releases everything it acquired.
use crate::cursor::{EmptyCursor, RecordCursor};
use crate::engine::ExecutionContext;
use crate::error::Result;
use crate::metadata::RecordMetadata;
use std::fmt;

mod builder;
mod group_by;
mod join;
mod select;
mod set;
mod sort;
mod table;
#[cfg(test)]
mod tests;

pub use builder::PlanBuilder;
pub use group_by::{AggregateColumn, Count, Distinct, GroupBy, SampleBy, SampleByFill};
pub use join::{choose_join_algorithm, AsOfJoin, CrossJoin, HashJoin, JoinAlgorithm, SpliceJoin};
pub use select::{Filtered, Selected, Virtual};
pub use set::SetOperation;
pub use sort::{Limit, Sort};
pub use table::{KeyValues, LatestBy, LatestByStrategy, LongSequence, RowSource, TableScan};

/// Behaviour shared by all operator nodes.
trait OperatorNode {
    fn metadata(&self) -> &RecordMetadata;

    fn supports_random_access(&self) -> bool;

    fn cursor<'a>(&'a self, ctx: &'a ExecutionContext) -> Result<Box<dyn RecordCursor + 'a>>;

    /// One-line description used by the plan tree display.
    fn label(&self) -> String;

    fn children(&self) -> Vec<&Operator> {
        vec![]
    }
}

/// Produces no rows but keeps the shape of the plan it replaces.
pub struct EmptyTable {
    metadata: RecordMetadata,
}

impl OperatorNode for EmptyTable {
    fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    fn supports_random_access(&self) -> bool {
        true
    }

    fn cursor<'a>(&'a self, _ctx: &'a ExecutionContext) -> Result<Box<dyn RecordCursor + 'a>> {
        Ok(Box::new(EmptyCursor))
    }

    fn label(&self) -> String {
        "Empty".to_string()
    }
}

pub enum Operator {
    Empty(EmptyTable),
    TableScan(TableScan),
    LatestBy(LatestBy),
    LongSequence(LongSequence),
    Filtered(Filtered),
    Selected(Selected),
    Virtual(Virtual),
    CrossJoin(CrossJoin),
    HashJoin(HashJoin),
    AsOfJoin(AsOfJoin),
    SpliceJoin(SpliceJoin),
    Count(Count),
    GroupBy(GroupBy),
    SampleBy(SampleBy),
    Distinct(Distinct),
    Sort(Sort),
    Limit(Limit),
    Set(SetOperation),
}

impl Operator {
    pub fn empty(metadata: RecordMetadata) -> Self {
        Self::Empty(EmptyTable { metadata })
    }

    fn node(&self) -> &dyn OperatorNode {
        match self {
            Self::Empty(node) => node,
            Self::TableScan(node) => node,
            Self::LatestBy(node) => node,
            Self::LongSequence(node) => node,
            Self::Filtered(node) => node,
            Self::Selected(node) => node,
            Self::Virtual(node) => node,
            Self::CrossJoin(node) => node,
            Self::HashJoin(node) => node,
            Self::AsOfJoin(node) => node,
            Self::SpliceJoin(node) => node,
            Self::Count(node) => node,
            Self::GroupBy(node) => node,
            Self::SampleBy(node) => node,
            Self::Distinct(node) => node,
            Self::Sort(node) => node,
            Self::Limit(node) => node,
            Self::Set(node) => node,
        }
    }

    pub fn metadata(&self) -> &RecordMetadata {
        self.node().metadata()
    }

    /// Whether cursors of this operator report row ids and can fetch rows by id.
    pub fn supports_random_access(&self) -> bool {
        self.node().supports_random_access()
    }

    pub fn cursor<'a>(&'a self, ctx: &'a ExecutionContext) -> Result<Box<dyn RecordCursor + 'a>> {
        self.node().cursor(ctx)
    }

    pub fn is_empty_table(&self) -> bool {
        matches!(self, Self::Empty(_))
    }
}

impl From<&Operator> for termtree::Tree<String> {
    fn from(operator: &Operator) -> Self {
        let node = operator.node();
        Self::new(node.label()).with_leaves(node.children().into_iter().map(termtree::Tree::<String>::from))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", termtree::Tree::<String>::from(self))
    }
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", termtree::Tree::<String>::from(self))
    }
}
