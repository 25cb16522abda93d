use super::{
    choose_join_algorithm, AggregateColumn, AsOfJoin, Count, CrossJoin, Distinct, Filtered, GroupBy,
    HashJoin, JoinAlgorithm, KeyValues, LatestBy, LatestByStrategy, Limit, Operator, RowSource,
    SampleBy, SampleByFill, Selected, SetOperation, Sort, SpliceJoin, TableScan, Virtual,
};
use crate::db::{ColumnType, Value};
use crate::engine::{ExecutionContext, PlannerConfig};
use crate::error::{sql_err, Result, SqlError};
use crate::expr::{ExprRef, NodeKind};
use crate::funcs::{FunctionParser, FunctionRef, GroupByFunction};
use crate::join_context;
use crate::metadata::{ColumnMetadata, RecordMetadata};
use crate::pred::{IntrinsicModel, WhereClauseAnalyzer};
use crate::query::{AliasTranslator, JoinType, OrderDirection, QueryColumn, QueryModel, SelectModelType, UnionType};
use crate::sampler::TimestampSampler;
use crate::storage::{Storage, TableReader, VALUE_NOT_FOUND};
use log::{debug, info};
use std::rc::Rc;

/// What a compiled predicate does to its input.
enum Predicate {
    Always,
    Never,
    Rows(FunctionRef),
}

/// Compiles query models into operator trees.
///
/// Operators own their inputs and readers. Every composition step takes its inputs by value, so an
/// error anywhere drops (and thereby releases) whatever was built up to that point.
pub struct PlanBuilder {
    storage: Rc<dyn Storage>,
    function_parser: Rc<dyn FunctionParser>,
    config: PlannerConfig,
    analyzer: WhereClauseAnalyzer,
}

impl PlanBuilder {
    pub fn new(
        storage: Rc<dyn Storage>,
        function_parser: Rc<dyn FunctionParser>,
        config: PlannerConfig,
    ) -> Self {
        Self {
            storage,
            function_parser,
            config,
            analyzer: WhereClauseAnalyzer::new(),
        }
    }

    pub fn generate(&mut self, model: &QueryModel, ctx: &ExecutionContext) -> Result<Operator> {
        self.generate_query(model, ctx, true)
    }

    fn generate_query(
        &mut self,
        model: &QueryModel,
        ctx: &ExecutionContext,
        process_joins: bool,
    ) -> Result<Operator> {
        let master = self.generate_query0(model, ctx, process_joins)?;
        match &model.union_model {
            Some(union) => self.generate_set(model.union_model_type, master, union, ctx),
            None => Ok(master),
        }
    }

    fn generate_query0(
        &mut self,
        model: &QueryModel,
        ctx: &ExecutionContext,
        process_joins: bool,
    ) -> Result<Operator> {
        let operator = self.generate_select(model, ctx, process_joins)?;
        let operator = self.generate_order_by(operator, model)?;
        self.generate_limit(operator, model, ctx)
    }

    /// Folds a UNION/INTERSECT/EXCEPT chain left to right.
    fn generate_set(
        &mut self,
        kind: UnionType,
        master: Operator,
        union: &QueryModel,
        ctx: &ExecutionContext,
    ) -> Result<Operator> {
        let slave = self.generate_query0(union, ctx, true)?;
        check_set_columns(master.metadata(), slave.metadata(), union.model_position)?;
        debug!("Combining queries with {}", kind);
        let operator = Operator::Set(SetOperation {
            master: Box::new(master),
            slave: Box::new(slave),
            kind,
        });
        match &union.union_model {
            Some(next) => self.generate_set(union.union_model_type, operator, next, ctx),
            None => Ok(operator),
        }
    }

    fn generate_select(
        &mut self,
        model: &QueryModel,
        ctx: &ExecutionContext,
        process_joins: bool,
    ) -> Result<Operator> {
        match model.select_model_type {
            SelectModelType::Choose => self.generate_select_choose(model, ctx),
            SelectModelType::Virtual => self.generate_select_virtual(model, ctx),
            SelectModelType::GroupBy => self.generate_select_group_by(model, ctx),
            SelectModelType::Distinct => Ok(Operator::Distinct(Distinct {
                input: Box::new(self.generate_sub_query(model, ctx)?),
            })),
            SelectModelType::None if model.join_models.len() > 1 && process_joins => {
                self.generate_joins(model, ctx)
            }
            SelectModelType::None => self.generate_no_select(model, ctx),
        }
    }

    fn generate_sub_query(&mut self, model: &QueryModel, ctx: &ExecutionContext) -> Result<Operator> {
        match &model.nested_model {
            Some(nested) => self.generate_query(nested, ctx, true),
            None => sql_err(model.model_position, "nested query expected"),
        }
    }

    fn generate_no_select(&mut self, model: &QueryModel, ctx: &ExecutionContext) -> Result<Operator> {
        match &model.table_name {
            Some(node) if node.kind == NodeKind::Function => {
                self.generate_function_query(model, node, ctx)
            }
            Some(node) => self.generate_table_query(model, node, ctx),
            None => {
                let input = self.generate_sub_query(model, ctx)?;
                self.filter(input, model.where_clause.as_ref(), ctx)
            }
        }
    }

    /// Compiles a row predicate and folds it when it is constant.
    fn predicate(
        &self,
        node: &ExprRef,
        metadata: &RecordMetadata,
        ctx: &ExecutionContext,
    ) -> Result<Predicate> {
        let function = self.function_parser.parse_function(node, metadata, ctx)?;
        if function.column_type() != ColumnType::Boolean {
            return sql_err(node.position, "boolean expression expected");
        }
        if !function.is_constant() {
            return Ok(Predicate::Rows(function));
        }
        if function.get_bool(&[]) {
            debug!("Dropping constant true filter");
            Ok(Predicate::Always)
        } else {
            debug!("Constant false filter, result is empty");
            Ok(Predicate::Never)
        }
    }

    fn filter(
        &self,
        input: Operator,
        node: Option<&ExprRef>,
        ctx: &ExecutionContext,
    ) -> Result<Operator> {
        let node = match node {
            Some(node) => node,
            None => return Ok(input),
        };
        Ok(match self.predicate(node, input.metadata(), ctx)? {
            Predicate::Always => input,
            Predicate::Never => Operator::empty(input.metadata().clone()),
            Predicate::Rows(filter) => Operator::Filtered(Filtered {
                input: Box::new(input),
                filter,
            }),
        })
    }

    fn generate_function_query(
        &mut self,
        model: &QueryModel,
        node: &ExprRef,
        ctx: &ExecutionContext,
    ) -> Result<Operator> {
        let function = self
            .function_parser
            .parse_function(node, &RecordMetadata::default(), ctx)?;
        let source = match function.column_type() {
            ColumnType::Cursor => function.record_cursor_factory(),
            _ => None,
        };
        match source {
            Some(source) => self.filter(source, model.where_clause.as_ref(), ctx),
            None => sql_err(
                node.position,
                format!("function must return CURSOR [actual={}]", function.column_type()),
            ),
        }
    }

    fn generate_table_query(
        &mut self,
        model: &QueryModel,
        table: &ExprRef,
        ctx: &ExecutionContext,
    ) -> Result<Operator> {
        let reader = self
            .storage
            .reader(ctx.security(), &table.token, model.table_version)?;
        let mut metadata = reader.metadata().clone();
        if let Some(timestamp) = &model.timestamp {
            let index = metadata.column_index(&timestamp.token, timestamp.position)?;
            if metadata.column_type(index) != ColumnType::Timestamp {
                return sql_err(
                    timestamp.position,
                    format!("not a TIMESTAMP column: {}", timestamp.token),
                );
            }
            metadata.set_timestamp_index(Some(index));
        }

        let mut latest_by = Vec::with_capacity(model.latest_by.len());
        for node in &model.latest_by {
            match metadata.column_index_quiet(model.translate_alias(&node.token)) {
                Some(index) => latest_by.push(index),
                None => return Err(SqlError::invalid_column(node.position, &node.token).into()),
            }
        }

        let where_clause = match &model.where_clause {
            Some(where_clause) => where_clause,
            None => return Ok(self.unfiltered_table(reader, metadata, &latest_by)),
        };

        // Intervals can only narrow frames on the timestamp the table is partitioned by.
        let designated = reader.metadata().timestamp_index();
        let timestamp_index = metadata.timestamp_index().filter(|&i| Some(i) == designated);
        let preferred = latest_by
            .first()
            .map(|&i| metadata.column_name(i).to_string());
        let intrinsics = self.analyzer.extract(
            model,
            Some(where_clause),
            &metadata,
            preferred.as_deref(),
            timestamp_index,
        )?;
        if intrinsics.is_false() {
            info!("Predicate on {} can never hold", table.token);
            return Ok(Operator::empty(metadata));
        }

        let filter = match &intrinsics.filter {
            Some(node) => match self.predicate(node, &metadata, ctx)? {
                Predicate::Always => None,
                Predicate::Never => return Ok(Operator::empty(metadata)),
                Predicate::Rows(filter) => Some(filter),
            },
            None => None,
        };

        if !latest_by.is_empty() {
            return self.generate_latest_by(reader, metadata, &latest_by, intrinsics, filter, ctx);
        }

        let key_column = intrinsics
            .key_column
            .as_deref()
            .and_then(|name| metadata.column_index_quiet(name));
        let column = match key_column {
            Some(column) => column,
            None => {
                debug!(
                    "Scanning frames of {} [intervals={}]",
                    table.token,
                    intrinsics.intervals.is_some()
                );
                let scan = Operator::TableScan(TableScan {
                    reader,
                    metadata,
                    intervals: intrinsics.intervals,
                    rows: RowSource::Frames,
                    filter: None,
                });
                return Ok(match filter {
                    Some(filter) => Operator::Filtered(Filtered {
                        input: Box::new(scan),
                        filter,
                    }),
                    None => scan,
                });
            }
        };

        let rows = match &intrinsics.key_sub_query {
            Some(sub_query) => RowSource::Values {
                column,
                values: KeyValues::SubQuery(Box::new(
                    self.generate_key_sub_query(sub_query, &intrinsics, ctx)?,
                )),
            },
            None if intrinsics.key_values.len() == 1 => {
                let value = intrinsics.key_values[0].clone();
                match reader.symbol_key(column, value.as_deref()) {
                    VALUE_NOT_FOUND => RowSource::DeferredSymbolIndex { column, value },
                    key => RowSource::SymbolIndex { column, key },
                }
            }
            None => RowSource::Values {
                column,
                values: KeyValues::List(intrinsics.key_values.clone()),
            },
        };
        debug!("Scanning {} by key column {}", table.token, metadata.column_name(column));
        Ok(Operator::TableScan(TableScan {
            reader,
            metadata,
            intervals: intrinsics.intervals,
            rows,
            filter,
        }))
    }

    fn unfiltered_table(
        &self,
        reader: Rc<dyn TableReader>,
        metadata: RecordMetadata,
        latest_by: &[usize],
    ) -> Operator {
        let strategy = match latest_by {
            [] => {
                return Operator::TableScan(TableScan {
                    reader,
                    metadata,
                    intervals: None,
                    rows: RowSource::Frames,
                    filter: None,
                });
            }
            &[column] if metadata.is_indexed(column) => LatestByStrategy::AllIndexed { column },
            columns => LatestByStrategy::All {
                columns: columns.to_vec(),
                key: None,
            },
        };
        info!("Latest by {} on {}", strategy, reader.table_name());
        Operator::LatestBy(LatestBy {
            reader,
            metadata,
            intervals: None,
            strategy,
            filter: None,
            capacity: self.config.latest_by_row_count,
        })
    }

    fn generate_latest_by(
        &mut self,
        reader: Rc<dyn TableReader>,
        metadata: RecordMetadata,
        latest_by: &[usize],
        intrinsics: IntrinsicModel,
        filter: Option<FunctionRef>,
        ctx: &ExecutionContext,
    ) -> Result<Operator> {
        let key_column = intrinsics
            .key_column
            .as_deref()
            .and_then(|name| metadata.column_index_quiet(name));
        let key = match (key_column, &intrinsics.key_sub_query) {
            (Some(column), Some(sub_query)) => Some((
                column,
                KeyValues::SubQuery(Box::new(
                    self.generate_key_sub_query(sub_query, &intrinsics, ctx)?,
                )),
            )),
            (Some(column), None) => Some((column, KeyValues::List(intrinsics.key_values.clone()))),
            (None, _) => None,
        };

        let strategy = match (latest_by, key) {
            (&[column], Some((_, KeyValues::SubQuery(query)))) => {
                LatestByStrategy::SubQuery { column, query }
            }
            (&[column], Some((_, KeyValues::List(values)))) if metadata.is_indexed(column) => {
                if values.len() == 1 {
                    let value = values[0].clone();
                    match reader.symbol_key(column, value.as_deref()) {
                        VALUE_NOT_FOUND => LatestByStrategy::ValueDeferredIndexed { column, value },
                        key => LatestByStrategy::ValueIndexed { column, key },
                    }
                } else {
                    LatestByStrategy::ValuesIndexed { column, values }
                }
            }
            (&[column], Some((_, KeyValues::List(values)))) => {
                LatestByStrategy::Values { column, values }
            }
            (&[column], None) if metadata.is_indexed(column) => {
                LatestByStrategy::AllIndexed { column }
            }
            (columns, key) => LatestByStrategy::All {
                columns: columns.to_vec(),
                key,
            },
        };
        info!("Latest by {} on {}", strategy, reader.table_name());
        Ok(Operator::LatestBy(LatestBy {
            reader,
            metadata,
            intervals: intrinsics.intervals,
            strategy,
            filter,
            capacity: self.config.latest_by_row_count,
        }))
    }

    /// Compiles `sym IN (SELECT ...)`. The sub-query must produce strings or symbols first.
    fn generate_key_sub_query(
        &mut self,
        sub_query: &QueryModel,
        intrinsics: &IntrinsicModel,
        ctx: &ExecutionContext,
    ) -> Result<Operator> {
        let operator = self.generate(sub_query, ctx)?;
        let position = sub_query
            .columns
            .first()
            .map_or(intrinsics.key_sub_query_position, |column| column.ast.position);
        match operator.metadata().columns().first() {
            Some(column) if matches!(column.column_type, ColumnType::String | ColumnType::Symbol) => {}
            Some(column) => {
                return sql_err(
                    position,
                    format!("unsupported column type: {}: {}", column.name, column.column_type),
                );
            }
            None => return sql_err(position, "sub-query returns no columns"),
        }
        Ok(operator)
    }

    fn generate_joins(&mut self, model: &QueryModel, ctx: &ExecutionContext) -> Result<Operator> {
        let order: Vec<usize> = if model.ordered_join_models.is_empty() {
            (0..model.join_models.len()).collect()
        } else {
            model.ordered_join_models.clone()
        };

        let mut master: Option<Operator> = None;
        let mut master_alias: Option<String> = None;
        for (i, &index) in order.iter().enumerate() {
            let slave_model = match model.join_models.get(index) {
                Some(slave_model) => slave_model,
                None => {
                    return sql_err(model.model_position, format!("invalid join index: {}", index));
                }
            };
            let slave = self.generate_query(slave_model, ctx, i > 0)?;
            let joined = match master.take() {
                None => {
                    master_alias = slave_model.name().map(str::to_string);
                    slave
                }
                Some(master) => {
                    let joined = self.join(master, master_alias.as_deref(), slave, slave_model, i == 1)?;
                    master_alias = None;
                    joined
                }
            };
            master = Some(self.filter(joined, slave_model.post_join_where_clause.as_ref(), ctx)?);
        }

        let master = match master {
            Some(master) => master,
            None => return sql_err(model.model_position, "join models expected"),
        };
        if let Some(node) = &model.const_where_clause {
            let function = self
                .function_parser
                .parse_function(node, &RecordMetadata::default(), ctx)?;
            if function.column_type() != ColumnType::Boolean {
                return sql_err(node.position, "boolean expression expected");
            }
            if !function.get_bool(&[]) {
                info!("Constant join condition is false, result is empty");
                return Ok(Operator::empty(master.metadata().clone()));
            }
        }
        Ok(master)
    }

    /// Joins `slave` onto the accumulated `master` for one edge.
    fn join(
        &self,
        master: Operator,
        master_alias: Option<&str>,
        slave: Operator,
        slave_model: &QueryModel,
        vanilla_master: bool,
    ) -> Result<Operator> {
        let join_type = slave_model.join_type;
        let position = slave_model.join_keyword_position;
        let slave_alias = slave_model.name();
        let master_meta = master.metadata();
        let slave_meta = slave.metadata();

        if matches!(join_type, JoinType::AsOf | JoinType::Splice) {
            if master_meta.timestamp_index().is_none() {
                return sql_err(position, "left side of time series join has no timestamp");
            }
            if slave_meta.timestamp_index().is_none() {
                return sql_err(position, "right side of time series join has no timestamp");
            }
        }
        let keys = match join_type {
            JoinType::Cross => Default::default(),
            _ => join_context::resolve(
                vanilla_master,
                slave_model.context.as_ref(),
                master_meta,
                slave_meta,
            )?,
        };
        let algorithm = match choose_join_algorithm(
            join_type,
            !keys.is_empty(),
            master.supports_random_access(),
            slave.supports_random_access(),
            self.config.full_fat_joins,
        ) {
            Some(algorithm) => algorithm,
            None => {
                return sql_err(position, "splice join requires random access on both sides");
            }
        };
        info!(
            "Joining {} using {} on {}",
            slave_alias.unwrap_or("sub-query"),
            algorithm,
            keys
        );

        let joined = |timestamp_index| {
            RecordMetadata::join(master_alias, master_meta, slave_alias, slave_meta, timestamp_index)
        };
        let slave_count = slave_meta.column_count();
        let (metadata, slave_columns) = match algorithm {
            JoinAlgorithm::SpliceLight => (joined(None), vec![]),
            JoinAlgorithm::AsOfFull => {
                let values = (0..slave_count).filter(|i| !keys.slave_columns.contains(i));
                for i in values.clone() {
                    if slave_meta.column_type(i).is_var_size() {
                        return sql_err(
                            position,
                            format!(
                                "right side column '{}' is of unsupported type",
                                slave_meta.column_name(i)
                            ),
                        );
                    }
                }
                (
                    RecordMetadata::join_values_first(
                        master_alias,
                        master_meta,
                        slave_alias,
                        slave_meta,
                        &keys.slave_columns,
                    ),
                    values.chain(keys.slave_columns.iter().copied()).collect(),
                )
            }
            _ => (joined(master_meta.timestamp_index()), (0..slave_count).collect()),
        };

        let (master, slave) = (Box::new(master), Box::new(slave));
        let capacity = self.config.map_key_capacity;
        Ok(match algorithm {
            JoinAlgorithm::Cross => Operator::CrossJoin(CrossJoin {
                master,
                slave,
                metadata,
            }),
            JoinAlgorithm::HashLight
            | JoinAlgorithm::HashOuterLight
            | JoinAlgorithm::Hash
            | JoinAlgorithm::HashOuter => Operator::HashJoin(HashJoin {
                master,
                slave,
                metadata,
                keys,
                algorithm,
                capacity,
            }),
            JoinAlgorithm::AsOfLight | JoinAlgorithm::AsOfNoKey | JoinAlgorithm::AsOfFull => {
                Operator::AsOfJoin(AsOfJoin {
                    master,
                    slave,
                    metadata,
                    keys,
                    algorithm,
                    slave_columns,
                    capacity,
                })
            }
            JoinAlgorithm::SpliceLight => Operator::SpliceJoin(SpliceJoin {
                master,
                slave,
                metadata,
                keys,
                capacity,
            }),
        })
    }

    fn generate_select_choose(&mut self, model: &QueryModel, ctx: &ExecutionContext) -> Result<Operator> {
        let input = self.generate_sub_query(model, ctx)?;
        let metadata = input.metadata();

        // A projection that neither reorders, renames nor retimes is its input.
        let entity = model.timestamp.is_none()
            && metadata.column_count() == model.columns.len()
            && model.columns.iter().enumerate().all(|(i, column)| {
                column.alias.is_none() && metadata.column_name(i) == column.ast.token
            });
        if entity {
            return Ok(input);
        }

        let timestamp_index = match &model.timestamp {
            Some(node) => Some(
                metadata
                    .column_index_quiet(&node.token)
                    .ok_or_else(|| SqlError::invalid_column(node.position, &node.token))?,
            ),
            None => metadata.timestamp_index(),
        };
        let mut selected = RecordMetadata::default();
        let mut columns = Vec::with_capacity(model.columns.len());
        for (i, column) in model.columns.iter().enumerate() {
            let index = metadata.column_index(&column.ast.token, column.ast.position)?;
            selected.add(ColumnMetadata {
                name: column.name().to_string(),
                table_alias: None,
                ..metadata.column(index).clone()
            });
            if Some(index) == timestamp_index {
                selected.set_timestamp_index(Some(i));
            }
            columns.push(index);
        }
        Ok(Operator::Selected(Selected {
            input: Box::new(input),
            metadata: selected,
            columns,
        }))
    }

    fn generate_select_virtual(&mut self, model: &QueryModel, ctx: &ExecutionContext) -> Result<Operator> {
        let input = self.generate_sub_query(model, ctx)?;
        let metadata = input.metadata();
        let timestamp = metadata.timestamp_index().map(|i| metadata.column_name(i));

        let mut computed = RecordMetadata::default();
        let mut functions = Vec::with_capacity(model.columns.len());
        for (i, column) in model.columns.iter().enumerate() {
            let function = self.function_parser.parse_function(&column.ast, metadata, ctx)?;
            computed.add(ColumnMetadata::new(column.name(), function.column_type()));
            if column.ast.kind == NodeKind::Literal && timestamp == Some(column.ast.token.as_str()) {
                computed.set_timestamp_index(Some(i));
            }
            functions.push(function);
        }
        Ok(Operator::Virtual(Virtual {
            input: Box::new(input),
            metadata: computed,
            functions,
        }))
    }

    fn generate_select_group_by(&mut self, model: &QueryModel, ctx: &ExecutionContext) -> Result<Operator> {
        if let Some(sample_by) = &model.sample_by {
            return self.generate_sample_by(model, sample_by, ctx);
        }
        let input = self.generate_sub_query(model, ctx)?;

        if let [column] = model.columns.as_slice() {
            if is_count_all(&column.ast) {
                debug!("Counting rows");
                return Ok(Operator::Count(Count {
                    input: Box::new(input),
                    metadata: RecordMetadata::new(
                        vec![ColumnMetadata::new(column.name(), ColumnType::Long)],
                        None,
                    ),
                }));
            }
        }

        let (metadata, columns) = self.aggregate_columns(model, input.metadata(), None, ctx)?;
        Ok(Operator::GroupBy(GroupBy {
            input: Box::new(input),
            metadata,
            columns,
            capacity: self.config.map_key_capacity,
        }))
    }

    /// Classifies the select list of an aggregating query. A literal naming `timestamp` becomes
    /// the bucket column and the designated timestamp of the output.
    fn aggregate_columns(
        &self,
        model: &QueryModel,
        input: &RecordMetadata,
        timestamp: Option<&str>,
        ctx: &ExecutionContext,
    ) -> Result<(RecordMetadata, Vec<AggregateColumn>)> {
        let mut metadata = RecordMetadata::default();
        let mut columns = Vec::with_capacity(model.columns.len());
        for (i, column) in model.columns.iter().enumerate() {
            let ast = &column.ast;
            let (aggregate, column_type) =
                if ast.kind == NodeKind::Literal && timestamp == Some(ast.token.as_str()) {
                    metadata.set_timestamp_index(Some(i));
                    (AggregateColumn::Timestamp, ColumnType::Timestamp)
                } else if let Some(function) =
                    self.function_parser.parse_group_by_function(ast, input, ctx)?
                {
                    let column_type = function.column_type;
                    (AggregateColumn::Aggregate(function), column_type)
                } else {
                    let function = self.function_parser.parse_function(ast, input, ctx)?;
                    let column_type = function.column_type();
                    (AggregateColumn::Key(function), column_type)
                };
            metadata.add(ColumnMetadata::new(column.name(), column_type));
            columns.push(aggregate);
        }
        Ok((metadata, columns))
    }

    fn generate_sample_by(
        &mut self,
        model: &QueryModel,
        sample_by: &ExprRef,
        ctx: &ExecutionContext,
    ) -> Result<Operator> {
        let input = self.generate_sub_query(model, ctx)?;
        let timestamp_index = match input.metadata().timestamp_index() {
            Some(timestamp_index) => timestamp_index,
            None => {
                return sql_err(
                    sample_by.position,
                    "base query does not provide dedicated TIMESTAMP column",
                );
            }
        };
        let sampler = match TimestampSampler::parse(&sample_by.token) {
            Some(sampler) => sampler,
            None => return sql_err(sample_by.position, "Unsupported interval qualifier"),
        };
        let timestamp = input.metadata().column_name(timestamp_index).to_string();
        let (metadata, columns) =
            self.aggregate_columns(model, input.metadata(), Some(timestamp.as_str()), ctx)?;
        let fill = self.sample_by_fill(model, &columns, ctx)?;
        info!("Sampling by {} with fill {}", sampler, fill);
        Ok(Operator::SampleBy(SampleBy {
            input: Box::new(input),
            metadata,
            sampler,
            columns,
            fill,
            timestamp_index,
        }))
    }

    fn sample_by_fill(
        &self,
        model: &QueryModel,
        columns: &[AggregateColumn],
        ctx: &ExecutionContext,
    ) -> Result<SampleByFill> {
        let aggregates: Vec<(&QueryColumn, &GroupByFunction)> = model
            .columns
            .iter()
            .zip(columns)
            .filter_map(|(query_column, column)| match column {
                AggregateColumn::Aggregate(function) => Some((query_column, function)),
                _ => None,
            })
            .collect();
        let nodes = &model.sample_by_fill;
        let keyword = match nodes.as_slice() {
            [] => Some("none".to_string()),
            [node] => Some(node.token.to_ascii_lowercase()),
            _ => None,
        };
        Ok(match keyword.as_deref() {
            Some("none") => SampleByFill::None,
            Some("prev") => SampleByFill::Prev,
            Some("null") => SampleByFill::Null,
            Some("linear") => {
                for (column, function) in &aggregates {
                    if !function.column_type.is_numeric() {
                        return sql_err(
                            column.ast.position,
                            format!("unsupported interpolation type: {}", function.column_type),
                        );
                    }
                }
                SampleByFill::Linear
            }
            _ => {
                if nodes.len() < aggregates.len() {
                    let position = nodes.last().map_or(0, |node| node.position);
                    return sql_err(position, "insufficient fill values");
                }
                if nodes.len() > aggregates.len() {
                    return sql_err(nodes[aggregates.len()].position, "too many fill values");
                }
                let mut values: Vec<Value> = Vec::with_capacity(nodes.len());
                for node in nodes {
                    let function = self
                        .function_parser
                        .parse_function(node, &RecordMetadata::default(), ctx)?;
                    values.push(function.eval(&[]));
                }
                SampleByFill::Values(values)
            }
        })
    }

    fn generate_order_by(&self, input: Operator, model: &QueryModel) -> Result<Operator> {
        if model.order_by.is_empty() {
            return Ok(input);
        }
        let metadata = input.metadata();
        let mut keys: Vec<(usize, OrderDirection)> = Vec::with_capacity(model.order_by.len());
        for (node, direction) in &model.order_by {
            let index = metadata
                .column_index_quiet(&node.token)
                .ok_or_else(|| SqlError::invalid_column(node.position, &node.token))?;
            if metadata.column_type(index) == ColumnType::Binary {
                return sql_err(node.position, "unsupported column type: BINARY");
            }
            if !keys.iter().any(|&(i, _)| i == index) {
                keys.push((index, *direction));
            }
        }

        let timestamp = metadata.timestamp_index();
        if let [(index, OrderDirection::Asc)] = keys.as_slice() {
            if Some(*index) == timestamp {
                debug!("Input is already ordered by its timestamp");
                return Ok(input);
            }
        }
        let sorted = match keys.first() {
            Some(&(index, OrderDirection::Asc)) if Some(index) == timestamp => metadata.clone(),
            _ => metadata.without_timestamp(),
        };
        let light = input.supports_random_access();
        info!("Sorting {} keys [light={}]", keys.len(), light);
        Ok(Operator::Sort(Sort {
            input: Box::new(input),
            metadata: sorted,
            keys,
            light,
            capacity: self.config.sort_key_capacity,
        }))
    }

    fn generate_limit(
        &self,
        input: Operator,
        model: &QueryModel,
        ctx: &ExecutionContext,
    ) -> Result<Operator> {
        if model.limit_lo.is_none() && model.limit_hi.is_none() {
            return Ok(input);
        }
        let lo = self.limit_bound(model.limit_lo.as_ref(), ctx)?;
        let hi = self.limit_bound(model.limit_hi.as_ref(), ctx)?;
        Ok(Operator::Limit(Limit {
            input: Box::new(input),
            lo,
            hi,
        }))
    }

    fn limit_bound(&self, node: Option<&ExprRef>, ctx: &ExecutionContext) -> Result<Option<FunctionRef>> {
        let node = match node {
            Some(node) => node,
            None => return Ok(None),
        };
        let function = self
            .function_parser
            .parse_function(node, &RecordMetadata::default(), ctx)?;
        match function.column_type() {
            ColumnType::Long | ColumnType::Byte | ColumnType::Short | ColumnType::Int => {
                Ok(Some(function))
            }
            other => sql_err(node.position, format!("invalid type: {}", other)),
        }
    }
}

/// `count()` or `count(*)`.
fn is_count_all(node: &ExprRef) -> bool {
    node.kind == NodeKind::Function
        && node.token.eq_ignore_ascii_case("count")
        && match node.args.as_slice() {
            [] => true,
            [arg] => arg.token == "*",
            _ => false,
        }
}

fn check_set_columns(master: &RecordMetadata, slave: &RecordMetadata, position: usize) -> Result<()> {
    if master.column_count() != slave.column_count() {
        return sql_err(
            position,
            format!(
                "queries have different number of columns [A={}, B={}]",
                master.column_count(),
                slave.column_count()
            ),
        );
    }
    for i in 0..master.column_count() {
        let (a, b) = (master.column_type(i), slave.column_type(i));
        if a != b {
            return sql_err(
                position,
                format!("column type mismatch [index={}, A={}, B={}]", i, a, b),
            );
        }
    }
    Ok(())
}
