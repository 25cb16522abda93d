use crate::expr::{ExprRef, NodeKind};
use rustc_hash::FxHashMap;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum JoinType {
    #[default]
    Inner,
    Outer,
    Cross,
    AsOf,
    Splice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SelectModelType {
    /// Plain source: table, function, sub-query or join.
    #[default]
    None,
    /// Column subset and renames.
    Choose,
    /// Computed columns.
    Virtual,
    GroupBy,
    Distinct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum UnionType {
    #[default]
    Union,
    UnionAll,
    Intersect,
    Except,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::Display)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

/// Maps a column name as written in the query to the name the row source knows it by.
pub trait AliasTranslator {
    fn translate_alias<'a>(&'a self, name: &'a str) -> &'a str;
}

/// Identity translation.
pub struct NoAliases;

impl AliasTranslator for NoAliases {
    fn translate_alias<'a>(&'a self, name: &'a str) -> &'a str {
        name
    }
}

#[derive(Debug, Clone)]
pub struct QueryColumn {
    pub ast: ExprRef,
    pub alias: Option<String>,
}

impl QueryColumn {
    pub fn new(ast: ExprRef) -> Self {
        Self { ast, alias: None }
    }

    pub fn aliased(ast: ExprRef, alias: &str) -> Self {
        Self {
            ast,
            alias: Some(alias.to_string()),
        }
    }

    /// Output name: the alias, or the token for plain column references.
    pub fn name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.ast.token)
    }
}

/// Equi-join keys of one join edge. `a` is the joined (slave) side, `b` the side joined onto.
#[derive(Debug, Clone, Default)]
pub struct JoinContext {
    pub a_names: Vec<String>,
    pub b_names: Vec<String>,
    pub a_nodes: Vec<ExprRef>,
    pub b_nodes: Vec<ExprRef>,
}

impl JoinContext {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_key(mut self, a: ExprRef, b: ExprRef) -> Self {
        self.a_names.push(unqualified(&a.token).to_string());
        self.b_names.push(unqualified(&b.token).to_string());
        self.a_nodes.push(a);
        self.b_nodes.push(b);
        self
    }

    pub fn len(&self) -> usize {
        self.a_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.a_names.is_empty()
    }
}

fn unqualified(token: &str) -> &str {
    token.rsplit_once('.').map_or(token, |(_, name)| name)
}

/// Resolved shape of one query block. Built by the parser, read-only during plan building.
#[derive(Debug, Clone, Default)]
pub struct QueryModel {
    pub select_model_type: SelectModelType,
    pub columns: Vec<QueryColumn>,
    /// Table name (literal) or cursor function (function node).
    pub table_name: Option<ExprRef>,
    pub table_version: Option<u64>,
    pub alias: Option<String>,
    pub nested_model: Option<Rc<QueryModel>>,
    pub where_clause: Option<ExprRef>,
    /// Applied after this model is joined onto the models preceding it.
    pub post_join_where_clause: Option<ExprRef>,
    /// Column-free part of the WHERE clause, evaluated once at compile time.
    pub const_where_clause: Option<ExprRef>,
    /// Join participants, the first entry is the leftmost source.
    pub join_models: Vec<Rc<QueryModel>>,
    /// Order in which `join_models` are folded; empty means declaration order.
    pub ordered_join_models: Vec<usize>,
    pub join_type: JoinType,
    pub join_keyword_position: usize,
    pub context: Option<JoinContext>,
    pub latest_by: Vec<ExprRef>,
    /// Overrides the designated timestamp of the source.
    pub timestamp: Option<ExprRef>,
    pub sample_by: Option<ExprRef>,
    pub sample_by_fill: Vec<ExprRef>,
    pub order_by: Vec<(ExprRef, OrderDirection)>,
    pub limit_lo: Option<ExprRef>,
    pub limit_hi: Option<ExprRef>,
    pub union_model: Option<Rc<QueryModel>>,
    pub union_model_type: UnionType,
    pub model_position: usize,
    pub column_aliases: FxHashMap<String, String>,
}

impl QueryModel {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_table(name: &str, position: usize) -> Self {
        Self {
            table_name: Some(crate::expr::ExpressionNode::literal(name, position)),
            ..Default::default()
        }
    }

    pub fn from_function(function: ExprRef) -> Self {
        Self {
            table_name: Some(function),
            ..Default::default()
        }
    }

    pub fn from_nested(nested: QueryModel) -> Self {
        Self {
            nested_model: Some(Rc::new(nested)),
            ..Default::default()
        }
    }

    /// Name used to qualify this model's columns in join output.
    pub fn name(&self) -> Option<&str> {
        self.alias.as_deref().or_else(|| {
            self.table_name
                .as_ref()
                .filter(|node| node.kind == NodeKind::Literal)
                .map(|node| node.token.as_str())
        })
    }

    pub fn with_select(mut self, select_model_type: SelectModelType, columns: Vec<QueryColumn>) -> Self {
        self.select_model_type = select_model_type;
        self.columns = columns;
        self
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    pub fn with_where(mut self, where_clause: ExprRef) -> Self {
        self.where_clause = Some(where_clause);
        self
    }

    pub fn with_post_join_where(mut self, where_clause: ExprRef) -> Self {
        self.post_join_where_clause = Some(where_clause);
        self
    }

    pub fn with_const_where(mut self, where_clause: ExprRef) -> Self {
        self.const_where_clause = Some(where_clause);
        self
    }

    pub fn with_join(
        mut self,
        mut model: QueryModel,
        join_type: JoinType,
        keyword_position: usize,
        context: Option<JoinContext>,
    ) -> Self {
        model.join_type = join_type;
        model.join_keyword_position = keyword_position;
        model.context = context;
        self.join_models.push(Rc::new(model));
        self
    }

    pub fn with_join_order(mut self, order: Vec<usize>) -> Self {
        self.ordered_join_models = order;
        self
    }

    pub fn with_latest_by(mut self, columns: Vec<ExprRef>) -> Self {
        self.latest_by = columns;
        self
    }

    pub fn with_timestamp(mut self, timestamp: ExprRef) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_sample_by(mut self, interval: ExprRef, fill: Vec<ExprRef>) -> Self {
        self.sample_by = Some(interval);
        self.sample_by_fill = fill;
        self
    }

    pub fn with_order_by(mut self, column: ExprRef, direction: OrderDirection) -> Self {
        self.order_by.push((column, direction));
        self
    }

    pub fn with_limit(mut self, lo: Option<ExprRef>, hi: Option<ExprRef>) -> Self {
        self.limit_lo = lo;
        self.limit_hi = hi;
        self
    }

    pub fn with_union(mut self, mut model: QueryModel, union_type: UnionType, position: usize) -> Self {
        model.model_position = position;
        self.union_model = Some(Rc::new(model));
        self.union_model_type = union_type;
        self
    }

    pub fn with_column_alias(mut self, alias: &str, column: &str) -> Self {
        self.column_aliases
            .insert(alias.to_ascii_lowercase(), column.to_string());
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.table_version = Some(version);
        self
    }

    pub fn with_position(mut self, position: usize) -> Self {
        self.model_position = position;
        self
    }
}

impl AliasTranslator for QueryModel {
    fn translate_alias<'a>(&'a self, name: &'a str) -> &'a str {
        self.column_aliases
            .get(&name.to_ascii_lowercase())
            .map_or(name, String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ExpressionNode;
    use pretty_assertions::assert_eq;

    #[test]
    fn model_name_and_aliases() {
        let model = QueryModel::from_table("trades", 14).with_column_alias("p", "price");
        assert_eq!(model.name(), Some("trades"));
        assert_eq!(model.translate_alias("P"), "price");
        assert_eq!(model.translate_alias("qty"), "qty");
        assert_eq!(model.clone().with_alias("t").name(), Some("t"));

        let ctx = JoinContext::new().with_key(
            ExpressionNode::literal("q.sym", 40),
            ExpressionNode::literal("t.sym", 48),
        );
        assert_eq!(ctx.a_names, vec!["sym".to_string()]);
        assert_eq!(ctx.len(), 1);
    }
}
