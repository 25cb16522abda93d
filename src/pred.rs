/// Intrinsic extraction: splits a WHERE clause into the parts a table scan can serve directly (a
/// key column with its literal values or sub-query, and timestamp intervals) and a residual
/// filter holding everything else.
///
/// Only top-level AND conjuncts are considered. Expression nodes are never mutated; the analyzer
/// records what it consumed in a per-call side table keyed by node id and then rebuilds the
/// residual tree, sharing untouched subtrees with the input.
use crate::db::ColumnType;
use crate::error::{sql_err, Result, SqlError};
use crate::expr::{ExprRef, ExpressionNode, NodeKind};
use crate::intervals::IntervalSet;
use crate::metadata::RecordMetadata;
use crate::query::{AliasTranslator, QueryModel};
use crate::utils;
use itertools::Itertools;
use log::debug;
use rustc_hash::FxHashMap;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum IntrinsicValue {
    Undefined,
    True,
    False,
}

/// Outcome of analyzing one WHERE clause.
#[derive(Debug, Clone)]
pub struct IntrinsicModel {
    /// `False` means the predicate can never hold.
    pub intrinsic_value: IntrinsicValue,
    pub key_column: Option<String>,
    /// Literal key values, `None` standing for null. Distinct, in first-seen order.
    pub key_values: Vec<Option<String>>,
    pub key_value_positions: Vec<usize>,
    pub key_sub_query: Option<Rc<QueryModel>>,
    pub key_sub_query_position: usize,
    /// `None` when the timestamp is unconstrained.
    pub intervals: Option<IntervalSet>,
    pub filter: Option<ExprRef>,
}

impl IntrinsicModel {
    fn new() -> Self {
        Self {
            intrinsic_value: IntrinsicValue::Undefined,
            key_column: None,
            key_values: vec![],
            key_value_positions: vec![],
            key_sub_query: None,
            key_sub_query_position: 0,
            intervals: None,
            filter: None,
        }
    }

    pub fn is_false(&self) -> bool {
        self.intrinsic_value == IntrinsicValue::False
    }

    fn is_key_column(&self, column: &str) -> bool {
        self.key_column
            .as_deref()
            .map_or(false, |key| key.eq_ignore_ascii_case(column))
    }

    fn set_key_values(&mut self, values: Vec<(Option<String>, usize)>) {
        (self.key_values, self.key_value_positions) = values.into_iter().unzip();
    }

    /// Keeps only values present in both sets, preserving the current order.
    fn intersect_key_values(&mut self, values: &[(Option<String>, usize)]) {
        let (kept, positions): (Vec<_>, Vec<_>) = self
            .key_values
            .drain(..)
            .zip(self.key_value_positions.drain(..))
            .filter(|(value, _)| values.iter().any(|(v, _)| v == value))
            .unzip();
        self.key_values = kept;
        self.key_value_positions = positions;
        if self.key_values.is_empty() {
            self.intrinsic_value = IntrinsicValue::False;
        }
    }

    fn exclude_key_value(&mut self, value: &Option<String>) {
        if let Some(i) = self.key_values.iter().position(|v| v == value) {
            self.key_values.remove(i);
            self.key_value_positions.remove(i);
        }
        if self.key_values.is_empty() {
            self.intrinsic_value = IntrinsicValue::False;
        }
    }

    fn intersect_intervals(&mut self, lo: i64, hi: i64) {
        let intervals = self.intervals.get_or_insert_with(IntervalSet::all);
        intervals.intersect(lo, hi);
        if intervals.is_empty() {
            self.intrinsic_value = IntrinsicValue::False;
        }
    }

    fn subtract_intervals(&mut self, lo: i64, hi: i64) {
        let intervals = self.intervals.get_or_insert_with(IntervalSet::all);
        intervals.subtract(lo, hi);
        if intervals.is_empty() {
            self.intrinsic_value = IntrinsicValue::False;
        }
    }
}

impl fmt::Display for IntrinsicModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IntrinsicModel(value={}", self.intrinsic_value)?;
        if let Some(key) = &self.key_column {
            write!(
                f,
                ", key={} [{}]",
                key,
                self.key_values
                    .iter()
                    .map(|v| v.as_deref().unwrap_or("null"))
                    .join(", ")
            )?;
        }
        if self.key_sub_query.is_some() {
            write!(f, ", key_sub_query")?;
        }
        if let Some(intervals) = &self.intervals {
            write!(f, ", intervals={}", intervals)?;
        }
        if let Some(filter) = &self.filter {
            write!(f, ", filter={}", filter)?;
        }
        write!(f, ")")
    }
}

fn key_value(node: &ExprRef) -> Option<String> {
    if node.is_null_constant() {
        None
    } else {
        Some(utils::unquote(&node.token).to_string())
    }
}

fn is_key_type(column_type: ColumnType) -> bool {
    matches!(
        column_type,
        ColumnType::Symbol | ColumnType::String | ColumnType::Long | ColumnType::Int
    )
}

/// Reusable analysis state. All scratch buffers are reset at the start of every extraction.
#[derive(Default)]
pub struct WhereClauseAnalyzer {
    stack: Vec<ExprRef>,
    key_nodes: Vec<ExprRef>,
    key_excl_nodes: Vec<ExprRef>,
    marks: FxHashMap<crate::expr::NodeId, IntrinsicValue>,
    timestamp: Option<String>,
    preferred_key_column: Option<String>,
}

struct Scope<'a> {
    translator: &'a dyn AliasTranslator,
    metadata: &'a RecordMetadata,
}

impl<'a> Scope<'a> {
    fn column<'b>(&'b self, node: &'b ExprRef) -> &'b str {
        self.translator.translate_alias(&node.token)
    }

    fn column_index(&self, node: &ExprRef) -> Result<usize> {
        let column = self.column(node);
        self.metadata
            .column_index_quiet(column)
            .ok_or_else(|| SqlError::invalid_column(node.position, &node.token).into())
    }
}

impl WhereClauseAnalyzer {
    pub fn new() -> Self {
        Default::default()
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.key_nodes.clear();
        self.key_excl_nodes.clear();
        self.marks.clear();
        self.timestamp = None;
        self.preferred_key_column = None;
    }

    /// Analyzes `node` against the row shape `metadata`. `preferred_key_column` restricts key
    /// extraction to that column (used for latest-by); otherwise any indexed column qualifies.
    pub fn extract(
        &mut self,
        translator: &dyn AliasTranslator,
        node: Option<&ExprRef>,
        metadata: &RecordMetadata,
        preferred_key_column: Option<&str>,
        timestamp_index: Option<usize>,
    ) -> Result<IntrinsicModel> {
        self.reset();
        self.timestamp = timestamp_index.map(|i| metadata.column_name(i).to_string());
        self.preferred_key_column = preferred_key_column.map(str::to_string);
        let scope = Scope {
            translator,
            metadata,
        };
        let mut model = IntrinsicModel::new();
        let root = match node {
            Some(node) => node.clone(),
            None => return Ok(model),
        };

        if self.remove_and_intrinsics(&scope, &mut model, &root)? {
            return Ok(model);
        }

        let mut node = Some(root.clone());
        while node.is_some() || !self.stack.is_empty() {
            match node.take() {
                Some(current) if current.is_and() => {
                    let (lhs, rhs) = (current.args[0].clone(), current.args[1].clone());
                    if !self.remove_and_intrinsics(&scope, &mut model, &rhs)? {
                        self.stack.push(rhs);
                    }
                    if !self.remove_and_intrinsics(&scope, &mut model, &lhs)? {
                        node = Some(lhs);
                    }
                }
                _ => node = self.stack.pop(),
            }
        }

        self.apply_key_exclusions(&scope, &mut model);
        model.filter = self.collapse(&root);
        debug!("Extracted {}", model);
        Ok(model)
    }

    fn mark(&mut self, node: &ExprRef, value: IntrinsicValue) {
        self.marks.insert(node.id(), value);
    }

    fn is_consumed(&self, node: &ExprRef) -> bool {
        self.marks.get(&node.id()) == Some(&IntrinsicValue::True)
    }

    /// Nodes consumed for a key column that has just been replaced go back to the filter.
    fn revert_key_nodes(&mut self) {
        for node in self.key_nodes.drain(..) {
            self.marks.insert(node.id(), IntrinsicValue::Undefined);
        }
    }

    fn consume_key_node(&mut self, node: &ExprRef) {
        self.key_nodes.push(node.clone());
        self.mark(node, IntrinsicValue::True);
    }

    fn is_timestamp(&self, scope: &Scope, node: &ExprRef) -> bool {
        node.kind == NodeKind::Literal
            && self
                .timestamp
                .as_deref()
                .map_or(false, |ts| ts.eq_ignore_ascii_case(scope.column(node)))
    }

    /// Key extraction is restricted to the preferred column when there is one, otherwise to
    /// indexed columns.
    fn is_key_eligible(&self, scope: &Scope, column: &str, index: usize) -> bool {
        match &self.preferred_key_column {
            Some(preferred) => preferred.eq_ignore_ascii_case(column),
            None => scope.metadata.is_indexed(index),
        }
    }

    /// A different key column may only replace the current one if its index is more selective.
    fn may_replace_key(&self, scope: &Scope, model: &IntrinsicModel, index: usize) -> bool {
        match model
            .key_column
            .as_deref()
            .and_then(|key| scope.metadata.column_index_quiet(key))
        {
            Some(current) => {
                scope.metadata.index_block_capacity(index)
                    > scope.metadata.index_block_capacity(current)
            }
            None => true,
        }
    }

    fn check_binary(node: &ExprRef) -> Result<()> {
        if node.args.len() == 2 {
            Ok(())
        } else {
            sql_err(node.position, "Argument expected")
        }
    }

    fn remove_and_intrinsics(
        &mut self,
        scope: &Scope,
        model: &mut IntrinsicModel,
        node: &ExprRef,
    ) -> Result<bool> {
        if !matches!(node.kind, NodeKind::Operation | NodeKind::Function) {
            return Ok(false);
        }
        match node.token.to_ascii_lowercase().as_str() {
            "in" => self.analyze_in(scope, model, node),
            "between" => self.analyze_between(scope, model, node),
            ">" => self.analyze_greater(scope, model, node, 1),
            ">=" => self.analyze_greater(scope, model, node, 0),
            "<" => self.analyze_less(scope, model, node, 1),
            "<=" => self.analyze_less(scope, model, node, 0),
            "=" => self.analyze_equals(scope, model, node),
            "!=" | "<>" => self.analyze_not_equals(scope, model, node),
            "not" if node.args.len() == 1 && node.args[0].is_operator("in") => {
                self.analyze_not_in(scope, model, node)
            }
            _ => Ok(false),
        }
    }

    fn analyze_equals(
        &mut self,
        scope: &Scope,
        model: &mut IntrinsicModel,
        node: &ExprRef,
    ) -> Result<bool> {
        Self::check_binary(node)?;
        Ok(self.analyze_equals0(scope, model, node, &node.args[0], &node.args[1])?
            || self.analyze_equals0(scope, model, node, &node.args[1], &node.args[0])?)
    }

    fn analyze_equals0(
        &mut self,
        scope: &Scope,
        model: &mut IntrinsicModel,
        node: &ExprRef,
        a: &ExprRef,
        b: &ExprRef,
    ) -> Result<bool> {
        if a.same_token(b) {
            self.mark(node, IntrinsicValue::True);
            return Ok(true);
        }
        if a.kind != NodeKind::Literal || b.kind != NodeKind::Constant {
            return Ok(false);
        }
        if self.is_timestamp(scope, a) {
            let (lo, hi) = utils::parse_timestamp_interval(&b.token)
                .ok_or_else(|| SqlError::invalid_date(b.position))?;
            model.intersect_intervals(lo, hi);
            self.mark(node, IntrinsicValue::True);
            return Ok(true);
        }

        let index = scope.column_index(a)?;
        let column = scope.column(a);
        if !is_key_type(scope.metadata.column_type(index))
            || !self.is_key_eligible(scope, column, index)
        {
            return Ok(false);
        }
        let value = key_value(b);
        if model.is_key_column(column) {
            if model.key_sub_query.is_some() {
                return sql_err(node.position, "Multiple lambda expressions not supported");
            }
            if model.key_values.contains(&value) {
                model.set_key_values(vec![(value, b.position)]);
            } else {
                model.intrinsic_value = IntrinsicValue::False;
                return Ok(false);
            }
        } else {
            if !self.may_replace_key(scope, model, index) {
                return Ok(false);
            }
            model.key_column = Some(column.to_string());
            model.key_sub_query = None;
            model.set_key_values(vec![(value, b.position)]);
            self.revert_key_nodes();
        }
        self.consume_key_node(node);
        Ok(true)
    }

    fn analyze_not_equals(
        &mut self,
        scope: &Scope,
        model: &mut IntrinsicModel,
        node: &ExprRef,
    ) -> Result<bool> {
        Self::check_binary(node)?;
        Ok(self.analyze_not_equals0(scope, model, node, &node.args[0], &node.args[1])?
            || self.analyze_not_equals0(scope, model, node, &node.args[1], &node.args[0])?)
    }

    fn analyze_not_equals0(
        &mut self,
        scope: &Scope,
        model: &mut IntrinsicModel,
        node: &ExprRef,
        a: &ExprRef,
        b: &ExprRef,
    ) -> Result<bool> {
        if a.same_token(b) {
            model.intrinsic_value = IntrinsicValue::False;
            return Ok(true);
        }
        if a.kind != NodeKind::Literal || b.kind != NodeKind::Constant {
            return Ok(false);
        }
        if self.is_timestamp(scope, a) {
            let (lo, hi) = utils::parse_timestamp_interval(&b.token)
                .ok_or_else(|| SqlError::invalid_date(b.position))?;
            model.subtract_intervals(lo, hi);
            self.mark(node, IntrinsicValue::True);
            return Ok(true);
        }
        let index = scope.column_index(a)?;
        if is_key_type(scope.metadata.column_type(index))
            && self.is_key_eligible(scope, scope.column(a), index)
        {
            // Only meaningful once the key column is known.
            self.key_excl_nodes.push(node.clone());
        }
        Ok(false)
    }

    fn analyze_greater(
        &mut self,
        scope: &Scope,
        model: &mut IntrinsicModel,
        node: &ExprRef,
        increment: i64,
    ) -> Result<bool> {
        Self::check_binary(node)?;
        let (lhs, rhs) = (&node.args[0], &node.args[1]);
        if lhs.same_token(rhs) {
            if increment > 0 {
                model.intrinsic_value = IntrinsicValue::False;
            } else {
                self.mark(node, IntrinsicValue::True);
                return Ok(true);
            }
            return Ok(false);
        }
        if self.timestamp.is_none() {
            return Ok(false);
        }
        if self.is_timestamp(scope, lhs) && rhs.kind == NodeKind::Constant {
            let lo = utils::parse_timestamp(&rhs.token)
                .ok_or_else(|| SqlError::invalid_date(rhs.position))?;
            model.intersect_intervals(lo.saturating_add(increment), i64::MAX);
            self.mark(node, IntrinsicValue::True);
            return Ok(true);
        }
        if self.is_timestamp(scope, rhs) && lhs.kind == NodeKind::Constant {
            let hi = utils::parse_timestamp(&lhs.token)
                .ok_or_else(|| SqlError::invalid_date(lhs.position))?;
            model.intersect_intervals(i64::MIN, hi.saturating_sub(increment));
            self.mark(node, IntrinsicValue::True);
            return Ok(true);
        }
        Ok(false)
    }

    fn analyze_less(
        &mut self,
        scope: &Scope,
        model: &mut IntrinsicModel,
        node: &ExprRef,
        increment: i64,
    ) -> Result<bool> {
        Self::check_binary(node)?;
        let (lhs, rhs) = (&node.args[0], &node.args[1]);
        if lhs.same_token(rhs) {
            if increment > 0 {
                model.intrinsic_value = IntrinsicValue::False;
            } else {
                self.mark(node, IntrinsicValue::True);
                return Ok(true);
            }
            return Ok(false);
        }
        if self.timestamp.is_none() {
            return Ok(false);
        }
        if self.is_timestamp(scope, lhs) && rhs.kind == NodeKind::Constant {
            let hi = utils::parse_timestamp(&rhs.token)
                .ok_or_else(|| SqlError::invalid_date(rhs.position))?;
            model.intersect_intervals(i64::MIN, hi.saturating_sub(increment));
            self.mark(node, IntrinsicValue::True);
            return Ok(true);
        }
        if self.is_timestamp(scope, rhs) && lhs.kind == NodeKind::Constant {
            let lo = utils::parse_timestamp(&lhs.token)
                .ok_or_else(|| SqlError::invalid_date(lhs.position))?;
            model.intersect_intervals(lo.saturating_add(increment), i64::MAX);
            self.mark(node, IntrinsicValue::True);
            return Ok(true);
        }
        Ok(false)
    }

    /// `ts between lo and hi` narrows the intervals like `ts in (lo, hi)`.
    fn analyze_between(
        &mut self,
        scope: &Scope,
        model: &mut IntrinsicModel,
        node: &ExprRef,
    ) -> Result<bool> {
        if node.args.len() != 3 {
            return sql_err(node.position, "Argument expected");
        }
        if !self.is_timestamp(scope, &node.args[0]) {
            return Ok(false);
        }
        match self.interval_bounds(&node.args[1], &node.args[2])? {
            Some((lo, hi)) => {
                model.intersect_intervals(lo, hi);
                self.mark(node, IntrinsicValue::True);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn interval_bounds(&self, lo: &ExprRef, hi: &ExprRef) -> Result<Option<(i64, i64)>> {
        if lo.kind != NodeKind::Constant || hi.kind != NodeKind::Constant {
            return Ok(None);
        }
        let lo = utils::parse_timestamp(&lo.token).ok_or_else(|| SqlError::invalid_date(lo.position))?;
        let hi = utils::parse_timestamp(&hi.token).ok_or_else(|| SqlError::invalid_date(hi.position))?;
        Ok(Some((lo, hi)))
    }

    fn analyze_in(
        &mut self,
        scope: &Scope,
        model: &mut IntrinsicModel,
        node: &ExprRef,
    ) -> Result<bool> {
        if node.args.len() < 2 {
            return sql_err(node.position, "Too few arguments for 'in'");
        }
        let col = &node.args[0];
        if col.kind != NodeKind::Literal {
            return Ok(false);
        }
        scope.column_index(col)?;
        Ok(self.analyze_in_interval(scope, model, col, node, false)?
            || self.analyze_list_of_values(scope, model, col, node)?
            || self.analyze_in_lambda(scope, model, col, node)?)
    }

    /// Timestamp membership: `ts in (lo, hi)` or `ts in 'period'`. With `subtract` the range is
    /// removed instead (NOT IN).
    fn analyze_in_interval(
        &mut self,
        scope: &Scope,
        model: &mut IntrinsicModel,
        col: &ExprRef,
        in_node: &ExprRef,
        subtract: bool,
    ) -> Result<bool> {
        if !self.is_timestamp(scope, col) {
            return Ok(false);
        }
        let (lo, hi) = match &in_node.args[1..] {
            [period] if period.kind == NodeKind::Constant => {
                utils::parse_timestamp_interval(&period.token)
                    .ok_or_else(|| SqlError::invalid_date(period.position))?
            }
            [_] => return sql_err(in_node.position, "Too few args"),
            [lo, hi] => match self.interval_bounds(lo, hi)? {
                Some(bounds) => bounds,
                None => return Ok(false),
            },
            args => return sql_err(args[2].position, "Too many args"),
        };
        if subtract {
            model.subtract_intervals(lo, hi);
        } else {
            model.intersect_intervals(lo, hi);
        }
        self.mark(in_node, IntrinsicValue::True);
        Ok(true)
    }

    fn analyze_list_of_values(
        &mut self,
        scope: &Scope,
        model: &mut IntrinsicModel,
        col: &ExprRef,
        node: &ExprRef,
    ) -> Result<bool> {
        let index = scope.column_index(col)?;
        let column = scope.column(col);
        if !is_key_type(scope.metadata.column_type(index))
            || !self.is_key_eligible(scope, column, index)
        {
            return Ok(false);
        }
        let new_column = !model.is_key_column(column);
        if new_column && !self.may_replace_key(scope, model, index) {
            return Ok(false);
        }
        let mut values: Vec<(Option<String>, usize)> = Vec::with_capacity(node.args.len() - 1);
        for arg in &node.args[1..] {
            if arg.kind != NodeKind::Constant {
                return Ok(false);
            }
            let value = key_value(arg);
            if !values.iter().any(|(v, _)| *v == value) {
                values.push((value, arg.position));
            }
        }

        if new_column {
            model.key_column = Some(column.to_string());
            model.key_sub_query = None;
            model.set_key_values(values);
            self.revert_key_nodes();
        } else if model.key_sub_query.is_some() {
            return sql_err(node.position, "Multiple lambda expressions not supported");
        } else {
            model.intersect_key_values(&values);
        }
        self.consume_key_node(node);
        Ok(true)
    }

    fn analyze_in_lambda(
        &mut self,
        scope: &Scope,
        model: &mut IntrinsicModel,
        col: &ExprRef,
        node: &ExprRef,
    ) -> Result<bool> {
        let index = scope.column_index(col)?;
        let column = scope.column(col);
        if !self.is_key_eligible(scope, column, index) {
            return Ok(false);
        }
        let query = match node.args[1..].iter().find(|arg| arg.kind == NodeKind::Query) {
            Some(query) => query,
            None => return Ok(false),
        };
        if node.args.len() > 2 {
            return sql_err(node.position, "Multiple lambda expressions not supported");
        }
        if model.is_key_column(column) {
            if model.key_sub_query.is_some() || !model.key_values.is_empty() {
                return sql_err(node.position, "Multiple lambda expressions not supported");
            }
        } else if !self.may_replace_key(scope, model, index) {
            return Ok(false);
        }

        model.key_column = Some(column.to_string());
        model.set_key_values(vec![]);
        model.key_sub_query = query.query.clone();
        model.key_sub_query_position = query.position;
        self.revert_key_nodes();
        self.consume_key_node(node);
        Ok(true)
    }

    fn analyze_not_in(
        &mut self,
        scope: &Scope,
        model: &mut IntrinsicModel,
        not_node: &ExprRef,
    ) -> Result<bool> {
        let in_node = &not_node.args[0];
        if in_node.args.len() < 2 {
            return sql_err(in_node.position, "Too few arguments for 'in'");
        }
        let col = &in_node.args[0];
        if col.kind != NodeKind::Literal {
            return sql_err(col.position, "Column name expected");
        }
        let index = scope.column_index(col)?;
        if self.analyze_in_interval(scope, model, col, in_node, true)? {
            self.mark(not_node, IntrinsicValue::True);
            return Ok(true);
        }
        if is_key_type(scope.metadata.column_type(index))
            && self.is_key_eligible(scope, scope.column(col), index)
        {
            self.key_excl_nodes.push(not_node.clone());
        }
        Ok(false)
    }

    /// Removes values named by deferred `!=` and `NOT IN` nodes from the literal key set.
    fn apply_key_exclusions(&mut self, scope: &Scope, model: &mut IntrinsicModel) {
        if model.key_column.is_none() || model.key_sub_query.is_some() {
            return;
        }
        let parents = std::mem::take(&mut self.key_excl_nodes);
        for parent in parents {
            if model.is_false() {
                break;
            }
            let node = if parent.is_operator("not") {
                &parent.args[0]
            } else {
                &parent
            };
            let (col, values): (&ExprRef, &[ExprRef]) = match node.args.as_slice() {
                [a, b] if a.kind == NodeKind::Literal => (a, std::slice::from_ref(b)),
                [a, b] => (b, std::slice::from_ref(a)),
                [col, rest @ ..] => (col, rest),
                [] => continue,
            };
            if col.kind != NodeKind::Literal
                || !model.is_key_column(scope.column(col))
                || values.iter().any(|v| v.kind != NodeKind::Constant)
            {
                continue;
            }
            for value in values {
                model.exclude_key_value(&key_value(value));
                if model.is_false() {
                    break;
                }
            }
            self.mark(&parent, IntrinsicValue::True);
        }
    }

    /// Residual filter: the input tree minus consumed conjuncts. AND nodes with one consumed side
    /// collapse to the other side; untouched subtrees are shared.
    fn collapse(&self, node: &ExprRef) -> Option<ExprRef> {
        if self.is_consumed(node) {
            return None;
        }
        if !node.is_and() {
            return Some(node.clone());
        }
        let lhs = self.collapse(&node.args[0]);
        let rhs = self.collapse(&node.args[1]);
        match (lhs, rhs) {
            (None, None) => None,
            (Some(side), None) | (None, Some(side)) => Some(side),
            (Some(lhs), Some(rhs)) => {
                if Rc::ptr_eq(&lhs, &node.args[0]) && Rc::ptr_eq(&rhs, &node.args[1]) {
                    Some(node.clone())
                } else {
                    Some(ExpressionNode::operation(
                        &node.token,
                        vec![lhs, rhs],
                        node.position,
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::NoAliases;
    use crate::test_utils::{and, cons, day, lit, op, trades_metadata};
    use crate::utils::MICROS_PER_DAY;
    use pretty_assertions::assert_eq;

    fn extract(node: &ExprRef, preferred: Option<&str>) -> Result<IntrinsicModel> {
        WhereClauseAnalyzer::new().extract(&NoAliases, Some(node), &trades_metadata(), preferred, Some(0))
    }

    fn keys(model: &IntrinsicModel) -> Vec<Option<&str>> {
        model.key_values.iter().map(|v| v.as_deref()).collect()
    }

    fn ranges(model: &IntrinsicModel) -> Vec<(i64, i64)> {
        model
            .intervals
            .iter()
            .flat_map(|set| set.iter().map(|i| (i.lo, i.hi)))
            .collect()
    }

    #[test]
    fn key_and_interval_extraction() {
        let node = and(
            op("in", vec![lit("sym"), cons("'A'"), cons("'B'")]),
            op(
                "between",
                vec![lit("ts"), cons("'2020-01-01'"), cons("'2020-01-02'")],
            ),
        );
        let model = extract(&node, None).unwrap();
        assert_eq!(model.key_column.as_deref(), Some("sym"));
        assert_eq!(keys(&model), vec![Some("A"), Some("B")]);
        assert_eq!(ranges(&model), vec![(day(0), day(1))]);
        assert!(model.filter.is_none());
        assert_eq!(model.intrinsic_value, IntrinsicValue::Undefined);
    }

    #[test]
    fn conflicting_equalities_are_false() {
        let node = and(
            op("=", vec![lit("sym"), cons("'A'")]),
            op("=", vec![lit("sym"), cons("'B'")]),
        );
        assert!(extract(&node, None).unwrap().is_false());
    }

    #[test]
    fn exclusions_narrow_key_values() {
        let node = and(
            op("in", vec![lit("sym"), cons("'A'"), cons("'B'"), cons("'C'")]),
            op("!=", vec![lit("sym"), cons("'B'")]),
        );
        let model = extract(&node, None).unwrap();
        assert_eq!(keys(&model), vec![Some("A"), Some("C")]);
        assert!(model.filter.is_none());

        let node = and(
            op("=", vec![lit("sym"), cons("'A'")]),
            op("not", vec![op("in", vec![lit("sym"), cons("'A'")])]),
        );
        assert!(extract(&node, None).unwrap().is_false());
    }

    #[test]
    fn exclusions_without_key_stay_in_filter() {
        let node = op("!=", vec![lit("sym"), cons("'B'")]);
        let model = extract(&node, None).unwrap();
        assert!(model.key_column.is_none());
        assert_eq!(model.filter.unwrap().to_string(), "(sym != 'B')");
    }

    #[test]
    fn timestamp_comparisons_adjust_bounds() {
        let node = and(
            op(">", vec![lit("ts"), cons("'2020-01-01'")]),
            op("<", vec![lit("ts"), cons("'2020-01-02'")]),
        );
        let model = extract(&node, None).unwrap();
        assert_eq!(ranges(&model), vec![(day(0) + 1, day(1) - 1)]);

        let node = and(
            op(">=", vec![lit("ts"), cons("'2020-01-02'")]),
            op("<=", vec![lit("ts"), cons("'2020-01-01'")]),
        );
        assert!(extract(&node, None).unwrap().is_false());

        let node = op("!=", vec![lit("ts"), cons("'2020-01-01'")]);
        let model = extract(&node, None).unwrap();
        assert_eq!(
            ranges(&model),
            vec![(i64::MIN, day(0) - 1), (day(0) + MICROS_PER_DAY, i64::MAX)]
        );
    }

    #[test]
    fn residual_filter_keeps_unconsumed_conjuncts() {
        let price = op(">", vec![lit("price"), cons("10")]);
        let or = op(
            "or",
            vec![
                op("=", vec![lit("sym"), cons("'A'")]),
                op("=", vec![lit("sym"), cons("'B'")]),
            ],
        );
        let node = and(
            and(price.clone(), op("=", vec![lit("sym"), cons("'A'")])),
            or.clone(),
        );
        let model = extract(&node, None).unwrap();
        assert_eq!(keys(&model), vec![Some("A")]);
        let filter = model.filter.unwrap();
        assert_eq!(filter.to_string(), "((price > 10) and ((sym = 'A') or (sym = 'B')))");
        assert!(Rc::ptr_eq(&filter.args[0], &price));
        assert!(Rc::ptr_eq(&filter.args[1], &or));
    }

    #[test]
    fn tautologies_and_contradictions() {
        let model = extract(&op("=", vec![lit("qty"), lit("qty")]), None).unwrap();
        assert!(model.filter.is_none());
        assert_eq!(model.intrinsic_value, IntrinsicValue::Undefined);
        assert!(extract(&op(">", vec![lit("qty"), lit("qty")]), None).unwrap().is_false());
        assert!(extract(&op("!=", vec![lit("qty"), lit("qty")]), None).unwrap().is_false());
    }

    #[test]
    fn preferred_column_restricts_keys() {
        let node = and(
            op("=", vec![lit("sym"), cons("'A'")]),
            op("=", vec![lit("qty"), cons("5")]),
        );
        let model = extract(&node, Some("qty")).unwrap();
        assert_eq!(model.key_column.as_deref(), Some("qty"));
        assert_eq!(keys(&model), vec![Some("5")]);
        assert_eq!(model.filter.unwrap().to_string(), "(sym = 'A')");
    }

    #[test]
    fn key_switch_reverts_consumed_nodes() {
        let meta = crate::test_utils::quotes_metadata();
        let sym = op("=", vec![lit("sym"), cons("'A'")]);
        // Right-hand conjuncts are visited first: `sym` becomes the key, then `venue` with its
        // larger index block replaces it and the `sym` conjunct returns to the filter.
        let node = and(op("=", vec![lit("venue"), cons("'X'")]), sym.clone());
        let model = WhereClauseAnalyzer::new()
            .extract(&NoAliases, Some(&node), &meta, None, Some(0))
            .unwrap();
        assert_eq!(model.key_column.as_deref(), Some("venue"));
        assert!(Rc::ptr_eq(&model.filter.unwrap(), &sym));

        // A less selective column never replaces the current key.
        let node = and(sym.clone(), op("=", vec![lit("venue"), cons("'X'")]));
        let model = WhereClauseAnalyzer::new()
            .extract(&NoAliases, Some(&node), &meta, None, Some(0))
            .unwrap();
        assert_eq!(model.key_column.as_deref(), Some("venue"));
        assert!(Rc::ptr_eq(&model.filter.unwrap(), &sym));
    }

    #[test]
    fn null_key_value() {
        let model = extract(&op("=", vec![lit("sym"), cons("null")]), None).unwrap();
        assert_eq!(keys(&model), vec![None]);
    }

    #[test]
    fn sub_query_keys() {
        let sub = crate::expr::ExpressionNode::query(QueryModel::from_table("quotes", 40), 38);
        let node = op("in", vec![lit("sym"), sub.clone()]);
        let model = extract(&node, None).unwrap();
        assert!(model.key_sub_query.is_some());
        assert_eq!(model.key_sub_query_position, 38);
        assert!(model.key_values.is_empty());

        let node = and(node, op("in", vec![lit("sym"), sub]));
        let err = extract(&node, None).unwrap_err();
        assert_eq!(err.message(), "Multiple lambda expressions not supported");
    }

    #[test]
    fn positioned_errors() {
        let err = extract(&op("=", vec![lit("nope"), cons("1")]), None).unwrap_err();
        assert_eq!(err.message(), "Invalid column: nope");

        let bad_date = cons("'2020-99-01'");
        let pos = bad_date.position;
        let err = extract(&op(">", vec![lit("ts"), bad_date]), None).unwrap_err();
        assert_eq!(err.position(), Some(pos));
        assert_eq!(err.message(), "Invalid date");

        let err = extract(&op("in", vec![lit("sym")]), None).unwrap_err();
        assert_eq!(err.message(), "Too few arguments for 'in'");

        let err = extract(
            &op("in", vec![lit("ts"), cons("'2020'"), cons("'2021'"), cons("'2022'")]),
            None,
        )
        .unwrap_err();
        assert_eq!(err.message(), "Too many args");

        let err = extract(
            &op("not", vec![op("in", vec![cons("1"), cons("2")])]),
            None,
        )
        .unwrap_err();
        assert_eq!(err.message(), "Column name expected");
    }

    #[test]
    fn not_in_timestamp_range() {
        let node = op(
            "not",
            vec![op("in", vec![lit("ts"), cons("'2020-01-01'"), cons("'2020-01-02'")])],
        );
        let model = extract(&node, None).unwrap();
        assert_eq!(ranges(&model), vec![(i64::MIN, day(0) - 1), (day(1) + 1, i64::MAX)]);
        assert!(model.filter.is_none());
    }

    #[test]
    fn in_list_needs_a_key_type() {
        let node = op("in", vec![lit("price"), cons("10"), cons("20")]);
        let model = extract(&node, Some("price")).unwrap();
        assert!(model.key_column.is_none());
        assert!(model.key_values.is_empty());
        assert!(model.filter.is_some());

        // Non-indexed LONG columns still key a latest-by.
        let node = op("in", vec![lit("qty"), cons("100"), cons("200")]);
        let model = extract(&node, Some("qty")).unwrap();
        assert_eq!(model.key_column.as_deref(), Some("qty"));
        assert_eq!(keys(&model), vec![Some("100"), Some("200")]);
        assert!(model.filter.is_none());
    }

    #[test]
    fn no_where_clause() {
        let model = WhereClauseAnalyzer::new()
            .extract(&NoAliases, None, &trades_metadata(), None, Some(0))
            .unwrap();
        assert!(model.filter.is_none());
        assert!(model.intervals.is_none());
        assert!(model.key_column.is_none());
    }
}
