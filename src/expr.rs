/// Expression trees as handed over by the parser. Nodes are immutable once built and shared by
/// `Rc`, so analysis passes never mutate them. Each node carries a process-unique id that analysis
/// passes use to attach side information (see `pred::WhereClauseAnalyzer`).
use crate::query::QueryModel;
use itertools::Itertools;
use snowflake::ProcessUniqueId;
use std::fmt;
use std::rc::Rc;

pub type NodeId = ProcessUniqueId;
pub type ExprRef = Rc<ExpressionNode>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum NodeKind {
    /// Column reference.
    Literal,
    Constant,
    BindVariable,
    Operation,
    Function,
    /// Sub-query, the model is attached to the node.
    Query,
}

#[derive(Debug)]
pub struct ExpressionNode {
    id: NodeId,
    pub kind: NodeKind,
    pub token: String,
    /// Character offset of the token in the query text.
    pub position: usize,
    /// Operands in source order: `a = b` has `[a, b]`, `x in (1, 2)` has `[x, 1, 2]`.
    pub args: Vec<ExprRef>,
    pub query: Option<Rc<QueryModel>>,
}

impl ExpressionNode {
    fn new(kind: NodeKind, token: &str, position: usize, args: Vec<ExprRef>) -> ExprRef {
        Rc::new(Self {
            id: NodeId::new(),
            kind,
            token: token.to_string(),
            position,
            args,
            query: None,
        })
    }

    pub fn literal(token: &str, position: usize) -> ExprRef {
        Self::new(NodeKind::Literal, token, position, vec![])
    }

    pub fn constant(token: &str, position: usize) -> ExprRef {
        Self::new(NodeKind::Constant, token, position, vec![])
    }

    pub fn bind_variable(token: &str, position: usize) -> ExprRef {
        Self::new(NodeKind::BindVariable, token, position, vec![])
    }

    pub fn operation(token: &str, args: Vec<ExprRef>, position: usize) -> ExprRef {
        Self::new(NodeKind::Operation, token, position, args)
    }

    pub fn function(token: &str, args: Vec<ExprRef>, position: usize) -> ExprRef {
        Self::new(NodeKind::Function, token, position, args)
    }

    pub fn query(model: QueryModel, position: usize) -> ExprRef {
        Rc::new(Self {
            id: NodeId::new(),
            kind: NodeKind::Query,
            token: String::new(),
            position,
            args: vec![],
            query: Some(Rc::new(model)),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn lhs(&self) -> Option<&ExprRef> {
        self.args.first()
    }

    pub fn rhs(&self) -> Option<&ExprRef> {
        self.args.get(1)
    }

    pub fn is_operator(&self, op: &str) -> bool {
        matches!(self.kind, NodeKind::Operation | NodeKind::Function)
            && self.token.eq_ignore_ascii_case(op)
    }

    pub fn is_and(&self) -> bool {
        self.is_operator("and") && self.args.len() == 2
    }

    pub fn is_null_constant(&self) -> bool {
        self.kind == NodeKind::Constant && self.token.eq_ignore_ascii_case("null")
    }

    /// Two leaf nodes with the same token denote the same column or constant.
    pub fn same_token(&self, other: &Self) -> bool {
        self.args.is_empty()
            && other.args.is_empty()
            && self.kind != NodeKind::Query
            && self.token == other.token
    }
}

impl fmt::Display for ExpressionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            NodeKind::Literal | NodeKind::Constant | NodeKind::BindVariable => {
                write!(f, "{}", self.token)
            }
            NodeKind::Query => write!(f, "(select-model)"),
            _ if self.token.eq_ignore_ascii_case("in") && !self.args.is_empty() => write!(
                f,
                "{} in ({})",
                self.args[0],
                self.args[1..].iter().join(", ")
            ),
            _ if self.token.eq_ignore_ascii_case("between") && self.args.len() == 3 => write!(
                f,
                "{} between {} and {}",
                self.args[0], self.args[1], self.args[2]
            ),
            NodeKind::Operation if self.args.len() == 2 => {
                write!(f, "({} {} {})", self.args[0], self.token, self.args[1])
            }
            _ => write!(f, "{}({})", self.token, self.args.iter().join(", ")),
        }
    }
}
