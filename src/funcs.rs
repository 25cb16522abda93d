/// Function collaborator: turns expression nodes into typed, evaluable functions over a row shape.
/// The plan builder only asks for a function given a node and the input metadata; everything
/// about individual functions lives here.
use crate::db::{ColumnType, Value};
use crate::engine::ExecutionContext;
use crate::error::{sql_err, Result, SqlError};
use crate::expr::{ExprRef, NodeKind};
use crate::metadata::RecordMetadata;
use crate::plan::{LongSequence, Operator};
use crate::utils;
use itertools::Itertools;
use phf::phf_map;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

pub type FunctionRef = Rc<dyn Function>;

pub trait Function: fmt::Display {
    fn column_type(&self) -> ColumnType;

    /// True when the value does not depend on the record.
    fn is_constant(&self) -> bool {
        false
    }

    fn eval(&self, record: &[Value]) -> Value;

    fn get_bool(&self, record: &[Value]) -> bool {
        self.eval(record).as_bool().unwrap_or(false)
    }

    /// Row source of a CURSOR-typed function.
    fn record_cursor_factory(&self) -> Option<Operator> {
        None
    }
}

pub trait FunctionParser {
    fn parse_function(
        &self,
        node: &ExprRef,
        metadata: &RecordMetadata,
        ctx: &ExecutionContext,
    ) -> Result<FunctionRef>;

    /// `Some` when `node` is an aggregate call.
    fn parse_group_by_function(
        &self,
        node: &ExprRef,
        metadata: &RecordMetadata,
        ctx: &ExecutionContext,
    ) -> Result<Option<GroupByFunction>>;
}

struct ColumnFunction {
    index: usize,
    name: String,
    column_type: ColumnType,
}

impl Function for ColumnFunction {
    fn column_type(&self) -> ColumnType {
        self.column_type
    }

    fn eval(&self, record: &[Value]) -> Value {
        record.get(self.index).cloned().unwrap_or(Value::Null)
    }
}

impl fmt::Display for ColumnFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

struct ConstantFunction {
    value: Value,
    column_type: ColumnType,
}

impl Function for ConstantFunction {
    fn column_type(&self) -> ColumnType {
        self.column_type
    }

    fn is_constant(&self) -> bool {
        true
    }

    fn eval(&self, _record: &[Value]) -> Value {
        self.value.clone()
    }
}

impl fmt::Display for ConstantFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Value::Str(s) => write!(f, "'{}'", s),
            value => write!(f, "{}", value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
enum CompareOp {
    #[strum(serialize = "=")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
}

struct CompareFunction {
    op: CompareOp,
    lhs: FunctionRef,
    rhs: FunctionRef,
}

impl Function for CompareFunction {
    fn column_type(&self) -> ColumnType {
        ColumnType::Boolean
    }

    fn is_constant(&self) -> bool {
        self.lhs.is_constant() && self.rhs.is_constant()
    }

    fn eval(&self, record: &[Value]) -> Value {
        let (lhs, rhs) = (self.lhs.eval(record), self.rhs.eval(record));
        // Null equals null, which lets `sym = null` select null keys.
        let result = match (self.op, lhs.sql_cmp(&rhs)) {
            (CompareOp::Eq, None) => lhs.is_null() && rhs.is_null(),
            (CompareOp::Ne, None) => lhs.is_null() != rhs.is_null(),
            (_, None) => false,
            (CompareOp::Eq, Some(ord)) => ord == Ordering::Equal,
            (CompareOp::Ne, Some(ord)) => ord != Ordering::Equal,
            (CompareOp::Lt, Some(ord)) => ord == Ordering::Less,
            (CompareOp::Le, Some(ord)) => ord != Ordering::Greater,
            (CompareOp::Gt, Some(ord)) => ord == Ordering::Greater,
            (CompareOp::Ge, Some(ord)) => ord != Ordering::Less,
        };
        Value::Bool(result)
    }
}

impl fmt::Display for CompareFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op, self.rhs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
enum LogicalOp {
    And,
    Or,
    Not,
}

struct LogicalFunction {
    op: LogicalOp,
    args: Vec<FunctionRef>,
}

impl Function for LogicalFunction {
    fn column_type(&self) -> ColumnType {
        ColumnType::Boolean
    }

    fn is_constant(&self) -> bool {
        self.args.iter().all(|arg| arg.is_constant())
    }

    fn eval(&self, record: &[Value]) -> Value {
        Value::Bool(match self.op {
            LogicalOp::And => self.args.iter().all(|arg| arg.get_bool(record)),
            LogicalOp::Or => self.args.iter().any(|arg| arg.get_bool(record)),
            LogicalOp::Not => !self.args[0].get_bool(record),
        })
    }
}

impl fmt::Display for LogicalFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            LogicalOp::Not => write!(f, "not({})", self.args[0]),
            op => write!(f, "({})", self.args.iter().join(&format!(" {} ", op))),
        }
    }
}

struct ArithmeticFunction {
    op: char,
    args: Vec<FunctionRef>,
    column_type: ColumnType,
}

impl Function for ArithmeticFunction {
    fn column_type(&self) -> ColumnType {
        self.column_type
    }

    fn is_constant(&self) -> bool {
        self.args.iter().all(|arg| arg.is_constant())
    }

    fn eval(&self, record: &[Value]) -> Value {
        let values: Vec<_> = self.args.iter().map(|arg| arg.eval(record)).collect();
        if values.iter().any(Value::is_null) {
            return Value::Null;
        }
        if values.len() == 1 {
            return match &values[0] {
                Value::Double(x) => Value::Double(-x),
                value => value.as_long().map_or(Value::Null, |x| Value::Long(x.wrapping_neg())),
            };
        }
        let (lhs, rhs) = (&values[0], &values[1]);
        match self.column_type {
            ColumnType::Double => {
                let (x, y) = (lhs.as_double().unwrap_or(0.), rhs.as_double().unwrap_or(0.));
                Value::Double(match self.op {
                    '+' => x + y,
                    '-' => x - y,
                    '*' => x * y,
                    _ => x / y,
                })
            }
            column_type => {
                let (x, y) = (lhs.as_long().unwrap_or(0), rhs.as_long().unwrap_or(0));
                let result = match self.op {
                    '+' => Some(x.wrapping_add(y)),
                    '-' => Some(x.wrapping_sub(y)),
                    '*' => Some(x.wrapping_mul(y)),
                    _ => x.checked_div(y),
                };
                match (result, column_type) {
                    (Some(x), ColumnType::Timestamp) => Value::Timestamp(x),
                    (Some(x), _) => Value::Long(x),
                    (None, _) => Value::Null,
                }
            }
        }
    }
}

impl fmt::Display for ArithmeticFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.args.as_slice() {
            [arg] => write!(f, "-{}", arg),
            args => write!(f, "({} {} {})", args[0], self.op, args[1]),
        }
    }
}

struct InFunction {
    arg: FunctionRef,
    values: Vec<FunctionRef>,
}

impl Function for InFunction {
    fn column_type(&self) -> ColumnType {
        ColumnType::Boolean
    }

    fn is_constant(&self) -> bool {
        self.arg.is_constant() && self.values.iter().all(|value| value.is_constant())
    }

    fn eval(&self, record: &[Value]) -> Value {
        let arg = self.arg.eval(record);
        Value::Bool(self.values.iter().any(|value| {
            let value = value.eval(record);
            match arg.sql_cmp(&value) {
                Some(ord) => ord == Ordering::Equal,
                None => arg.is_null() && value.is_null(),
            }
        }))
    }
}

impl fmt::Display for InFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in ({})", self.arg, self.values.iter().join(", "))
    }
}

/// Timestamp equality against a literal: matches every instant of the period the literal names,
/// so `ts = '2020-01-02'` holds for the whole day.
struct TimestampPeriodFunction {
    arg: FunctionRef,
    lo: i64,
    hi: i64,
    negated: bool,
}

impl Function for TimestampPeriodFunction {
    fn column_type(&self) -> ColumnType {
        ColumnType::Boolean
    }

    fn is_constant(&self) -> bool {
        self.arg.is_constant()
    }

    fn eval(&self, record: &[Value]) -> Value {
        let within = self
            .arg
            .eval(record)
            .as_long()
            .map(|ts| self.lo <= ts && ts <= self.hi);
        // Null is outside every period.
        Value::Bool(within.map_or(self.negated, |within| within != self.negated))
    }
}

impl fmt::Display for TimestampPeriodFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = if self.negated { "!=" } else { "=" };
        write!(
            f,
            "{} {} [{}, {}]",
            self.arg,
            op,
            Value::Timestamp(self.lo),
            Value::Timestamp(self.hi)
        )
    }
}

struct BetweenFunction {
    arg: FunctionRef,
    lo: FunctionRef,
    hi: FunctionRef,
}

impl Function for BetweenFunction {
    fn column_type(&self) -> ColumnType {
        ColumnType::Boolean
    }

    fn is_constant(&self) -> bool {
        self.arg.is_constant() && self.lo.is_constant() && self.hi.is_constant()
    }

    fn eval(&self, record: &[Value]) -> Value {
        let arg = self.arg.eval(record);
        let above = arg.sql_cmp(&self.lo.eval(record));
        let below = arg.sql_cmp(&self.hi.eval(record));
        Value::Bool(
            matches!(above, Some(Ordering::Greater | Ordering::Equal))
                && matches!(below, Some(Ordering::Less | Ordering::Equal)),
        )
    }
}

impl fmt::Display for BetweenFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} between {} and {}", self.arg, self.lo, self.hi)
    }
}

/// `long_sequence(n)`: rows `x = 1..=n`.
struct LongSequenceFunction {
    count: i64,
}

impl Function for LongSequenceFunction {
    fn column_type(&self) -> ColumnType {
        ColumnType::Cursor
    }

    fn eval(&self, _record: &[Value]) -> Value {
        Value::Null
    }

    fn record_cursor_factory(&self) -> Option<Operator> {
        Some(Operator::LongSequence(LongSequence::new(self.count)))
    }
}

impl fmt::Display for LongSequenceFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "long_sequence({})", self.count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum AggregateKind {
    Count,
    Sum,
    Min,
    Max,
    Avg,
    First,
    Last,
}

pub static AGGREGATES: phf::Map<&'static str, AggregateKind> = phf_map! {
    "count" => AggregateKind::Count,
    "sum" => AggregateKind::Sum,
    "min" => AggregateKind::Min,
    "max" => AggregateKind::Max,
    "avg" => AggregateKind::Avg,
    "first" => AggregateKind::First,
    "last" => AggregateKind::Last,
};

pub fn is_aggregate(node: &ExprRef) -> bool {
    node.kind == NodeKind::Function && AGGREGATES.contains_key(node.token.to_ascii_lowercase().as_str())
}

/// Running state of one aggregate over one group.
#[derive(Debug, Clone)]
pub struct AggState {
    acc: Value,
    count: i64,
}

impl AggState {
    fn new() -> Self {
        Self {
            acc: Value::Null,
            count: 0,
        }
    }
}

/// Aggregate call bound to its input column.
#[derive(Clone)]
pub struct GroupByFunction {
    pub kind: AggregateKind,
    pub arg: Option<FunctionRef>,
    pub column_type: ColumnType,
}

impl GroupByFunction {
    pub fn new_state(&self) -> AggState {
        AggState::new()
    }

    pub fn update(&self, state: &mut AggState, record: &[Value]) {
        let value = self
            .arg
            .as_ref()
            .map_or(Value::Null, |arg| arg.eval(record));
        match self.kind {
            AggregateKind::Count => {
                if self.arg.is_none() || !value.is_null() {
                    state.count += 1;
                }
            }
            AggregateKind::First => {
                if state.count == 0 {
                    state.acc = value;
                }
                state.count += 1;
            }
            AggregateKind::Last => state.acc = value,
            _ if value.is_null() => {}
            AggregateKind::Sum | AggregateKind::Avg => {
                state.count += 1;
                state.acc = match (&state.acc, &value) {
                    (Value::Null, _) if self.kind == AggregateKind::Avg => {
                        Value::Double(value.as_double().unwrap_or(0.))
                    }
                    (Value::Null, _) => value.cast(self.column_type),
                    (Value::Long(x), _) => Value::Long(x.wrapping_add(value.as_long().unwrap_or(0))),
                    (acc, _) => Value::Double(
                        acc.as_double().unwrap_or(0.) + value.as_double().unwrap_or(0.),
                    ),
                };
            }
            AggregateKind::Min | AggregateKind::Max => {
                let wanted = if self.kind == AggregateKind::Min {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                if state.acc.is_null() || value.sql_cmp(&state.acc) == Some(wanted) {
                    state.acc = value;
                }
            }
        }
    }

    pub fn result(&self, state: &AggState) -> Value {
        match self.kind {
            AggregateKind::Count => Value::Long(state.count),
            AggregateKind::Avg if state.count > 0 => {
                Value::Double(state.acc.as_double().unwrap_or(0.) / state.count as f64)
            }
            AggregateKind::Avg => Value::Null,
            _ => state.acc.clone(),
        }
    }
}

impl fmt::Display for GroupByFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arg {
            Some(arg) => write!(f, "{}({})", self.kind, arg),
            None => write!(f, "{}()", self.kind),
        }
    }
}

/// Parser for the builtin function set.
#[derive(Default)]
pub struct BuiltinFunctionParser;

fn constant(value: Value, column_type: ColumnType) -> FunctionRef {
    Rc::new(ConstantFunction { value, column_type })
}

fn parse_constant(node: &ExprRef) -> Result<FunctionRef> {
    let token = node.token.as_str();
    if utils::is_quoted(token) {
        return Ok(constant(Value::from(utils::unquote(token)), ColumnType::String));
    }
    if token.eq_ignore_ascii_case("null") {
        return Ok(constant(Value::Null, ColumnType::String));
    }
    if let Ok(b) = token.to_ascii_lowercase().parse::<bool>() {
        return Ok(constant(Value::Bool(b), ColumnType::Boolean));
    }
    if let Ok(x) = token.parse::<i64>() {
        return Ok(constant(Value::Long(x), ColumnType::Long));
    }
    if let Ok(x) = token.parse::<f64>() {
        return Ok(constant(Value::Double(x), ColumnType::Double));
    }
    sql_err(node.position, format!("invalid constant: {}", token))
}

fn value_type(value: &Value) -> ColumnType {
    match value {
        Value::Null | Value::Str(_) => ColumnType::String,
        Value::Bool(_) => ColumnType::Boolean,
        Value::Long(_) => ColumnType::Long,
        Value::Double(_) => ColumnType::Double,
        Value::Binary(_) => ColumnType::Binary,
        Value::Timestamp(_) => ColumnType::Timestamp,
    }
}

fn is_stringy(column_type: ColumnType) -> bool {
    matches!(column_type, ColumnType::String | ColumnType::Symbol)
}

impl BuiltinFunctionParser {
    fn expect_args(node: &ExprRef, count: usize) -> Result<()> {
        if node.args.len() == count {
            Ok(())
        } else {
            sql_err(
                node.position,
                format!("'{}' expects {} argument(s)", node.token, count),
            )
        }
    }

    fn expect_boolean(node: &ExprRef, function: FunctionRef) -> Result<FunctionRef> {
        if function.column_type() == ColumnType::Boolean {
            Ok(function)
        } else {
            sql_err(node.position, "boolean expression expected")
        }
    }

    /// Period named by a string constant compared for equality with a timestamp. Integer
    /// literals denote a single microsecond.
    fn timestamp_period(
        arg: &FunctionRef,
        value: &FunctionRef,
        value_node: &ExprRef,
    ) -> Result<Option<(i64, i64)>> {
        if arg.column_type() != ColumnType::Timestamp
            || value.column_type() != ColumnType::String
            || !value.is_constant()
        {
            return Ok(None);
        }
        let literal = match value.eval(&[]).key_string() {
            Some(literal) => literal,
            None => return Ok(None),
        };
        utils::parse_timestamp_interval(&literal)
            .or_else(|| utils::parse_timestamp(&literal).map(|ts| (ts, ts)))
            .map(Some)
            .ok_or_else(|| SqlError::invalid_date(value_node.position).into())
    }

    fn period_function(
        arg: &FunctionRef,
        value: &FunctionRef,
        value_node: &ExprRef,
        negated: bool,
    ) -> Result<Option<FunctionRef>> {
        Ok(Self::timestamp_period(arg, value, value_node)?.map(|(lo, hi)| {
            Rc::new(TimestampPeriodFunction {
                arg: arg.clone(),
                lo,
                hi,
                negated,
            }) as FunctionRef
        }))
    }

    /// Makes `rhs` comparable with `lhs`: string constants compared against timestamps are
    /// parsed as dates.
    fn coerce(
        lhs: &FunctionRef,
        rhs: FunctionRef,
        rhs_node: &ExprRef,
        op_node: &ExprRef,
    ) -> Result<FunctionRef> {
        let (lt, rt) = (lhs.column_type(), rhs.column_type());
        if rhs.is_constant() && rhs.eval(&[]).is_null() {
            return Ok(rhs);
        }
        if lt == ColumnType::Timestamp && rt == ColumnType::String && rhs.is_constant() {
            let literal = rhs.eval(&[]).key_string().unwrap_or_default();
            return match utils::parse_timestamp(&literal) {
                Some(ts) => Ok(constant(Value::Timestamp(ts), ColumnType::Timestamp)),
                None => Err(SqlError::invalid_date(rhs_node.position).into()),
            };
        }
        let compatible = lt == rt
            || (is_stringy(lt) && is_stringy(rt))
            || ((lt.is_numeric() || lt == ColumnType::Timestamp)
                && (rt.is_numeric() || rt == ColumnType::Timestamp));
        if compatible || (lhs.is_constant() && lhs.eval(&[]).is_null()) {
            Ok(rhs)
        } else {
            sql_err(op_node.position, format!("cannot compare {} with {}", lt, rt))
        }
    }

    fn parse_args(
        &self,
        node: &ExprRef,
        metadata: &RecordMetadata,
        ctx: &ExecutionContext,
    ) -> Result<Vec<FunctionRef>> {
        node.args
            .iter()
            .map(|arg| self.parse_function(arg, metadata, ctx))
            .collect()
    }

    fn parse_operation(
        &self,
        node: &ExprRef,
        metadata: &RecordMetadata,
        ctx: &ExecutionContext,
    ) -> Result<FunctionRef> {
        let name = node.token.to_ascii_lowercase();
        match name.as_str() {
            "and" | "or" => {
                Self::expect_args(node, 2)?;
                let args = node
                    .args
                    .iter()
                    .map(|arg| Self::expect_boolean(arg, self.parse_function(arg, metadata, ctx)?))
                    .collect::<Result<_>>()?;
                let op = if name == "and" { LogicalOp::And } else { LogicalOp::Or };
                Ok(Rc::new(LogicalFunction { op, args }))
            }
            "not" => {
                Self::expect_args(node, 1)?;
                let arg = Self::expect_boolean(
                    &node.args[0],
                    self.parse_function(&node.args[0], metadata, ctx)?,
                )?;
                Ok(Rc::new(LogicalFunction {
                    op: LogicalOp::Not,
                    args: vec![arg],
                }))
            }
            "=" | "!=" | "<>" | "<" | "<=" | ">" | ">=" => {
                Self::expect_args(node, 2)?;
                let op = match name.as_str() {
                    "=" => CompareOp::Eq,
                    "!=" | "<>" => CompareOp::Ne,
                    "<" => CompareOp::Lt,
                    "<=" => CompareOp::Le,
                    ">" => CompareOp::Gt,
                    _ => CompareOp::Ge,
                };
                let lhs = self.parse_function(&node.args[0], metadata, ctx)?;
                let rhs = self.parse_function(&node.args[1], metadata, ctx)?;
                if matches!(op, CompareOp::Eq | CompareOp::Ne) {
                    let negated = op == CompareOp::Ne;
                    let period = match Self::period_function(&lhs, &rhs, &node.args[1], negated)? {
                        Some(function) => Some(function),
                        None => Self::period_function(&rhs, &lhs, &node.args[0], negated)?,
                    };
                    if let Some(function) = period {
                        return Ok(function);
                    }
                }
                let rhs = Self::coerce(&lhs, rhs, &node.args[1], node)?;
                let lhs = Self::coerce(&rhs, lhs, &node.args[0], node)?;
                Ok(Rc::new(CompareFunction { op, lhs, rhs }))
            }
            "+" | "-" | "*" | "/" => {
                let args = self.parse_args(node, metadata, ctx)?;
                if args.is_empty() || args.len() > 2 || (args.len() == 1 && name != "-") {
                    return sql_err(node.position, format!("'{}' expects 2 arguments", name));
                }
                for (arg, arg_node) in args.iter().zip(&node.args) {
                    let column_type = arg.column_type();
                    if !column_type.is_numeric() && column_type != ColumnType::Timestamp {
                        return sql_err(
                            arg_node.position,
                            format!("numeric argument expected [actual={}]", column_type),
                        );
                    }
                }
                let types: Vec<_> = args.iter().map(|arg| arg.column_type()).collect();
                let column_type = if types.iter().any(|t| matches!(t, ColumnType::Float | ColumnType::Double)) {
                    ColumnType::Double
                } else if types.contains(&ColumnType::Timestamp) && (name == "+" || name == "-") {
                    ColumnType::Timestamp
                } else {
                    ColumnType::Long
                };
                let op = name.chars().next().unwrap_or('+');
                Ok(Rc::new(ArithmeticFunction {
                    op,
                    args,
                    column_type,
                }))
            }
            "in" => {
                if node.args.len() < 2 {
                    return sql_err(node.position, "Too few arguments for 'in'");
                }
                let arg = self.parse_function(&node.args[0], metadata, ctx)?;
                if let [value_node] = &node.args[1..] {
                    let value = self.parse_function(value_node, metadata, ctx)?;
                    if let Some(function) = Self::period_function(&arg, &value, value_node, false)? {
                        return Ok(function);
                    }
                }
                let values = node.args[1..]
                    .iter()
                    .map(|value| {
                        let function = self.parse_function(value, metadata, ctx)?;
                        Self::coerce(&arg, function, value, node)
                    })
                    .collect::<Result<_>>()?;
                Ok(Rc::new(InFunction { arg, values }))
            }
            "between" => {
                Self::expect_args(node, 3)?;
                let arg = self.parse_function(&node.args[0], metadata, ctx)?;
                let lo = self.parse_function(&node.args[1], metadata, ctx)?;
                let lo = Self::coerce(&arg, lo, &node.args[1], node)?;
                let hi = self.parse_function(&node.args[2], metadata, ctx)?;
                let hi = Self::coerce(&arg, hi, &node.args[2], node)?;
                Ok(Rc::new(BetweenFunction { arg, lo, hi }))
            }
            "long_sequence" => {
                Self::expect_args(node, 1)?;
                let count = self.parse_function(&node.args[0], metadata, ctx)?;
                match (count.is_constant(), count.eval(&[])) {
                    (true, Value::Long(count)) => Ok(Rc::new(LongSequenceFunction { count })),
                    _ => sql_err(node.args[0].position, "integer constant expected"),
                }
            }
            _ if AGGREGATES.contains_key(name.as_str()) => sql_err(
                node.position,
                format!("aggregate function is not allowed here: {}", node.token),
            ),
            _ => sql_err(node.position, format!("unknown function name: {}", node.token)),
        }
    }
}

impl FunctionParser for BuiltinFunctionParser {
    fn parse_function(
        &self,
        node: &ExprRef,
        metadata: &RecordMetadata,
        ctx: &ExecutionContext,
    ) -> Result<FunctionRef> {
        match node.kind {
            NodeKind::Literal => {
                let index = metadata.column_index(&node.token, node.position)?;
                Ok(Rc::new(ColumnFunction {
                    index,
                    name: node.token.clone(),
                    column_type: metadata.column_type(index),
                }))
            }
            NodeKind::Constant => parse_constant(node),
            NodeKind::BindVariable => match ctx.bind_variable(&node.token) {
                Some(value) => Ok(constant(value.clone(), value_type(value))),
                None => sql_err(
                    node.position,
                    format!("undefined bind variable: {}", node.token),
                ),
            },
            NodeKind::Operation | NodeKind::Function => self.parse_operation(node, metadata, ctx),
            NodeKind::Query => sql_err(node.position, "sub-query is not supported here"),
        }
    }

    fn parse_group_by_function(
        &self,
        node: &ExprRef,
        metadata: &RecordMetadata,
        ctx: &ExecutionContext,
    ) -> Result<Option<GroupByFunction>> {
        if !is_aggregate(node) {
            return Ok(None);
        }
        let kind = match AGGREGATES.get(node.token.to_ascii_lowercase().as_str()) {
            Some(kind) => *kind,
            None => return Ok(None),
        };
        let arg = match node.args.as_slice() {
            [] => None,
            [arg] if arg.token == "*" => None,
            [arg] => Some(self.parse_function(arg, metadata, ctx)?),
            _ => return sql_err(node.position, format!("too many arguments for {}", kind)),
        };
        let column_type = match (kind, &arg) {
            (AggregateKind::Count, _) => ColumnType::Long,
            (_, None) => {
                return sql_err(node.position, format!("argument expected for {}", kind));
            }
            (AggregateKind::Avg, Some(arg)) if arg.column_type().is_numeric() => ColumnType::Double,
            (AggregateKind::Sum, Some(arg)) if arg.column_type().is_integral() => ColumnType::Long,
            (AggregateKind::Sum, Some(arg)) if arg.column_type().is_numeric() => ColumnType::Double,
            (AggregateKind::Sum | AggregateKind::Avg, Some(arg)) => {
                return sql_err(
                    node.args[0].position,
                    format!("unsupported type: {}", arg.column_type()),
                );
            }
            (_, Some(arg)) => arg.column_type(),
        };
        Ok(Some(GroupByFunction {
            kind,
            arg,
            column_type,
        }))
    }
}
