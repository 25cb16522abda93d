use super::*;
use crate::db::{ColumnType, Value};
use crate::engine::{Engine, ExecutionContext, PlannerConfig};
use crate::error::Result;
use crate::expr::{ExprRef, ExpressionNode};
use crate::make_row_result_set;
use crate::query::{JoinContext, JoinType, OrderDirection, QueryColumn, QueryModel, SelectModelType, UnionType};
use crate::storage::{MemStorage, MemTableBuilder};
use crate::test_utils::*;
use approx::assert_relative_eq;
use pretty_assertions::assert_eq;
use std::rc::Rc;

fn storage() -> Rc<MemStorage> {
    let storage = trades_storage();
    storage.add_table(
        MemTableBuilder::new("events")
            .column("ts", ColumnType::Timestamp)
            .column("sym", ColumnType::Symbol)
            .column("note", ColumnType::String)
            .timestamp("ts")
            .rows([
                vec![Value::Timestamp(at(0, 0, 10)), "A".into(), "open".into()],
                vec![Value::Timestamp(at(0, 3, 10)), "B".into(), "halt".into()],
            ])
            .build(),
    );
    Rc::new(storage)
}

fn compile_with(storage: &Rc<MemStorage>, config: PlannerConfig, model: &QueryModel) -> Result<Operator> {
    Engine::new(storage.clone())
        .with_config(config)
        .compile(model, &ExecutionContext::default())
}

fn compile(storage: &Rc<MemStorage>, model: &QueryModel) -> Result<Operator> {
    compile_with(storage, Default::default(), model)
}

fn run(operator: &Operator) -> Vec<crate::db::Record> {
    rows_of(operator, &ExecutionContext::default()).unwrap()
}

fn choose(model: QueryModel, columns: &[&str]) -> QueryModel {
    QueryModel::from_nested(model).with_select(
        SelectModelType::Choose,
        columns.iter().map(|name| QueryColumn::new(lit(name))).collect(),
    )
}

fn eq(column: &str, value: &str) -> ExprRef {
    op("=", vec![lit(column), cons(value)])
}

fn trades_join(join_type: JoinType, keyword_position: usize) -> QueryModel {
    QueryModel::new()
        .with_join(QueryModel::from_table("trades", 1).with_alias("t"), JoinType::Inner, 0, None)
        .with_join(
            QueryModel::from_table("quotes", 2).with_alias("q"),
            join_type,
            keyword_position,
            Some(JoinContext::new().with_key(lit("q.sym"), lit("t.sym"))),
        )
}

#[test]
fn indexed_values_with_interval() {
    let storage = storage();
    let model = QueryModel::from_table("trades", 1).with_where(and(
        op("in", vec![lit("sym"), cons("'A'"), cons("'B'")]),
        op("between", vec![lit("ts"), cons("'2020-01-01'"), cons("'2020-01-02'")]),
    ));
    let plan = compile(&storage, &model).unwrap();
    match &plan {
        Operator::TableScan(scan) => {
            assert!(matches!(
                scan.row_source(),
                RowSource::Values { column: 1, values: KeyValues::List(values) }
                    if values == &vec![Some("A".to_string()), Some("B".to_string())]
            ));
            assert!(scan.intervals().is_some());
            assert!(!scan.has_filter());
        }
        other => panic!("unexpected plan {}", other),
    }
    assert_eq!(plan.metadata(), &trades_metadata());
    assert!(plan.supports_random_access());
    assert_eq!(
        run(&plan).into_iter().collect::<RowResultSet>(),
        make_row_result_set! {
            (Timestamp, Str, Double, Long),
            {
                (at(0, 1, 0), "A", 10.0, 100),
                (at(0, 2, 0), "B", 20.0, 200),
                (at(0, 3, 0), "A", 11.0, 150),
                (at(1, 0, 0), "B", 21.0, 210),
            }
        }
    );
}

#[test]
fn single_key_uses_symbol_index() {
    let storage = storage();
    let plan = compile(&storage, &QueryModel::from_table("trades", 1).with_where(eq("sym", "'C'"))).unwrap();
    match &plan {
        Operator::TableScan(scan) => {
            assert!(matches!(scan.row_source(), RowSource::SymbolIndex { column: 1, .. }));
        }
        other => panic!("unexpected plan {}", other),
    }
    assert_eq!(run(&plan).len(), 2);

    // Values missing from the symbol table are looked up again when the scan runs.
    let plan = compile(&storage, &QueryModel::from_table("trades", 1).with_where(eq("sym", "'Z'"))).unwrap();
    match &plan {
        Operator::TableScan(scan) => assert!(matches!(
            scan.row_source(),
            RowSource::DeferredSymbolIndex { value: Some(value), .. } if value == "Z"
        )),
        other => panic!("unexpected plan {}", other),
    }
    assert!(run(&plan).is_empty());
}

#[test]
fn residual_filter_wraps_frame_scan() {
    let storage = storage();
    let model = QueryModel::from_table("trades", 1).with_where(op(">", vec![lit("price"), cons("20")]));
    let plan = compile(&storage, &model).unwrap();
    assert!(matches!(plan, Operator::Filtered(_)));
    assert_eq!(run(&plan).len(), 4);

    let model = QueryModel::from_table("trades", 1).with_where(and(
        eq("sym", "'A'"),
        op(">", vec![lit("price"), cons("10.5")]),
    ));
    let plan = compile(&storage, &model).unwrap();
    match &plan {
        Operator::TableScan(scan) => assert!(scan.has_filter()),
        other => panic!("unexpected plan {}", other),
    }
    assert_eq!(run(&plan).len(), 2);
}

#[test]
fn timestamp_literals_name_periods_at_any_depth() {
    let storage = storage();
    let count = |predicate: ExprRef, nested: bool| {
        let source = if nested {
            QueryModel::from_nested(QueryModel::from_table("trades", 1))
        } else {
            QueryModel::from_table("trades", 1)
        };
        let plan = compile(&storage, &source.with_where(predicate)).unwrap();
        run(&plan).len()
    };
    for nested in [false, true] {
        assert_eq!(count(op("=", vec![lit("ts"), cons("'2020-01-02'")]), nested), 4);
        assert_eq!(count(op("!=", vec![lit("ts"), cons("'2020-01-02'")]), nested), 4);
        assert_eq!(count(op("in", vec![lit("ts"), cons("'2020-01-01T03'")]), nested), 1);
        assert_eq!(count(op("=", vec![lit("ts"), cons("'2020-01'")]), nested), 8);
    }
}

#[test]
fn constant_filters_fold() {
    let storage = storage();
    let always = op("=", vec![cons("1"), cons("1")]);
    let plan = compile(
        &storage,
        &QueryModel::from_table("trades", 1).with_where(op("or", vec![always.clone(), eq("sym", "'A'")])),
    )
    .unwrap();
    assert!(matches!(plan, Operator::Filtered(_)));

    let plan = compile(
        &storage,
        &QueryModel::from_table("notes", 1).with_where(op("=", vec![cons("1"), cons("2")])),
    )
    .unwrap();
    assert!(plan.is_empty_table());
    assert_eq!(plan.metadata().column_count(), 3);

    let plan = compile(&storage, &QueryModel::from_table("notes", 1).with_where(always)).unwrap();
    assert!(matches!(plan, Operator::TableScan(_)));
}

#[test]
fn contradictions_yield_empty_table() {
    let storage = storage();
    let model = QueryModel::from_table("trades", 1)
        .with_where(and(eq("sym", "'A'"), eq("sym", "'B'")));
    let plan = compile(&storage, &model).unwrap();
    assert!(plan.is_empty_table());
    assert_eq!(plan.metadata(), &trades_metadata());
    assert!(run(&plan).is_empty());
}

#[test]
fn non_boolean_filter_is_rejected() {
    let storage = storage();
    let price = lit("price");
    let position = price.position;
    let err = compile(&storage, &QueryModel::from_table("notes", 1).with_where(lit("id")))
        .unwrap_err();
    assert_eq!(err.message(), "boolean expression expected");
    let err = compile(&storage, &QueryModel::from_table("trades", 1).with_where(price)).unwrap_err();
    assert_eq!(err.position(), Some(position));
}

#[test]
fn key_sub_query_drives_values_scan() {
    let storage = storage();
    let sub_query = choose(
        QueryModel::from_table("quotes", 1).with_where(eq("venue", "'X'")),
        &["sym"],
    );
    let model = QueryModel::from_table("trades", 1).with_where(op(
        "in",
        vec![lit("sym"), ExpressionNode::query(sub_query, 30)],
    ));
    let plan = compile(&storage, &model).unwrap();
    match &plan {
        Operator::TableScan(scan) => assert!(matches!(
            scan.row_source(),
            RowSource::Values { values: KeyValues::SubQuery(_), .. }
        )),
        other => panic!("unexpected plan {}", other),
    }
    // Venue X quotes A and C.
    assert_eq!(run(&plan).len(), 5);
    assert_eq!(storage.open_readers(), 2);
    drop(plan);
    assert_eq!(storage.open_readers(), 0);

    let column = lit("bid");
    let position = column.position;
    let sub_query = QueryModel::from_nested(QueryModel::from_table("quotes", 1))
        .with_select(SelectModelType::Choose, vec![QueryColumn::new(column)]);
    let model = QueryModel::from_table("trades", 1).with_where(op(
        "in",
        vec![lit("sym"), ExpressionNode::query(sub_query, 30)],
    ));
    let err = compile(&storage, &model).unwrap_err();
    assert_eq!(err.message(), "unsupported column type: bid: DOUBLE");
    assert_eq!(err.position(), Some(position));
    assert_eq!(storage.open_readers(), 0);
}

#[test]
fn latest_by_strategies() {
    let storage = storage();
    let latest = |where_clause: Option<ExprRef>| {
        let model = QueryModel::from_table("trades", 1).with_latest_by(vec![lit("sym")]);
        match where_clause {
            Some(where_clause) => model.with_where(where_clause),
            None => model,
        }
    };

    let plan = compile(&storage, &latest(None)).unwrap();
    match &plan {
        Operator::LatestBy(latest_by) => {
            assert!(matches!(latest_by.strategy(), LatestByStrategy::AllIndexed { column: 1 }));
        }
        other => panic!("unexpected plan {}", other),
    }
    assert_eq!(
        run(&plan).into_iter().collect::<RowResultSet>(),
        make_row_result_set! {
            (Timestamp, Str, Double, Long),
            {
                (at(1, 1, 0), "A", 12.0, 120),
                (at(1, 2, 0), "B", 22.0, 220),
                (at(1, 5, 0), "C", 31.0, 310),
            }
        }
    );

    let plan = compile(&storage, &latest(Some(eq("sym", "'A'")))).unwrap();
    match &plan {
        Operator::LatestBy(latest_by) => {
            assert!(matches!(latest_by.strategy(), LatestByStrategy::ValueIndexed { column: 1, .. }));
        }
        other => panic!("unexpected plan {}", other),
    }
    assert_eq!(run(&plan), vec![vec![
        Value::Timestamp(at(1, 1, 0)),
        "A".into(),
        Value::Double(12.0),
        Value::Long(120),
    ]]);

    let plan = compile(&storage, &latest(Some(eq("sym", "'Q'")))).unwrap();
    match &plan {
        Operator::LatestBy(latest_by) => {
            assert!(matches!(latest_by.strategy(), LatestByStrategy::ValueDeferredIndexed { .. }));
        }
        other => panic!("unexpected plan {}", other),
    }
    assert!(run(&plan).is_empty());

    let plan = compile(
        &storage,
        &latest(Some(op("in", vec![lit("sym"), cons("'A'"), cons("'C'")]))),
    )
    .unwrap();
    match &plan {
        Operator::LatestBy(latest_by) => {
            assert!(matches!(latest_by.strategy(), LatestByStrategy::ValuesIndexed { .. }));
        }
        other => panic!("unexpected plan {}", other),
    }
    assert_eq!(run(&plan).len(), 2);

    // The filter applies before a row can count as the latest.
    let plan = compile(
        &storage,
        &latest(Some(op("<", vec![lit("qty"), cons("200")]))),
    )
    .unwrap();
    assert_eq!(
        run(&plan).into_iter().collect::<RowResultSet>(),
        make_row_result_set! {
            (Timestamp, Str, Double, Long),
            {
                (at(1, 1, 0), "A", 12.0, 120),
            }
        }
    );
}

#[test]
fn latest_by_unindexed_and_multiple_columns() {
    let storage = storage();
    let model = QueryModel::from_table("events", 1).with_latest_by(vec![lit("sym")]);
    let plan = compile(&storage, &model).unwrap();
    match &plan {
        Operator::LatestBy(latest_by) => {
            assert!(matches!(latest_by.strategy(), LatestByStrategy::All { key: None, .. }));
        }
        other => panic!("unexpected plan {}", other),
    }
    assert_eq!(run(&plan).len(), 2);

    let model = QueryModel::from_table("events", 1)
        .with_latest_by(vec![lit("sym")])
        .with_where(eq("sym", "'B'"));
    let plan = compile(&storage, &model).unwrap();
    match &plan {
        Operator::LatestBy(latest_by) => {
            assert!(matches!(latest_by.strategy(), LatestByStrategy::Values { column: 1, .. }));
        }
        other => panic!("unexpected plan {}", other),
    }
    assert_eq!(run(&plan).len(), 1);

    let model = QueryModel::from_table("quotes", 1)
        .with_latest_by(vec![lit("sym"), lit("venue")])
        .with_where(eq("sym", "'A'"));
    let plan = compile(&storage, &model).unwrap();
    match &plan {
        Operator::LatestBy(latest_by) => assert!(matches!(
            latest_by.strategy(),
            LatestByStrategy::All { key: Some((1, _)), .. }
        )),
        other => panic!("unexpected plan {}", other),
    }
    assert_eq!(
        run(&plan),
        vec![vec![
            Value::Timestamp(at(0, 2, 30)),
            "A".into(),
            "X".into(),
            Value::Double(10.5),
            Value::Double(11.5),
        ]]
    );

    let column = lit("nope");
    let position = column.position;
    let err = compile(&storage, &QueryModel::from_table("trades", 1).with_latest_by(vec![column]))
        .unwrap_err();
    assert_eq!(err.message(), "Invalid column: nope");
    assert_eq!(err.position(), Some(position));
}

#[test]
fn count_is_special_cased() {
    let storage = storage();
    let model = QueryModel::from_nested(QueryModel::from_table("trades", 1))
        .with_select(SelectModelType::GroupBy, vec![QueryColumn::new(func("count", vec![]))]);
    let plan = compile(&storage, &model).unwrap();
    assert!(matches!(plan, Operator::Count(_)));
    assert_eq!(plan.metadata().column_count(), 1);
    assert_eq!(plan.metadata().column_name(0), "count");
    assert_eq!(plan.metadata().column_type(0), ColumnType::Long);
    assert_eq!(run(&plan), vec![vec![Value::Long(8)]]);

    let model = QueryModel::from_nested(QueryModel::from_table("trades", 1)).with_select(
        SelectModelType::GroupBy,
        vec![QueryColumn::aliased(func("count", vec![lit("*")]), "n")],
    );
    let plan = compile(&storage, &model).unwrap();
    assert!(matches!(plan, Operator::Count(_)));
    assert_eq!(plan.metadata().column_name(0), "n");
}

#[test]
fn group_by_keeps_first_seen_order() {
    let storage = storage();
    let model = QueryModel::from_nested(QueryModel::from_table("trades", 1)).with_select(
        SelectModelType::GroupBy,
        vec![
            QueryColumn::new(lit("sym")),
            QueryColumn::aliased(func("sum", vec![lit("qty")]), "total"),
            QueryColumn::aliased(func("avg", vec![lit("price")]), "mean"),
        ],
    );
    let plan = compile(&storage, &model).unwrap();
    assert!(matches!(plan, Operator::GroupBy(_)));
    assert_eq!(plan.metadata().to_string(), "[sym:SYMBOL, total:LONG, mean:DOUBLE]");
    let rows = run(&plan);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0][0], "A".into());
    assert_eq!(rows[0][1], Value::Long(370));
    assert_relative_eq!(rows[0][2].as_double().unwrap(), 11.0);
    assert_eq!(rows[2][0], "C".into());

    // No keys and no rows still gives one row.
    let model = QueryModel::from_nested(
        QueryModel::from_table("trades", 1).with_where(op(">", vec![lit("qty"), cons("1000")])),
    )
    .with_select(
        SelectModelType::GroupBy,
        vec![QueryColumn::aliased(func("max", vec![lit("price")]), "top")],
    );
    let plan = compile(&storage, &model).unwrap();
    assert_eq!(run(&plan), vec![vec![Value::Null]]);
}

fn sample_by(fill: Vec<ExprRef>) -> QueryModel {
    QueryModel::from_nested(QueryModel::from_table("trades", 1))
        .with_select(
            SelectModelType::GroupBy,
            vec![
                QueryColumn::new(lit("ts")),
                QueryColumn::aliased(func("sum", vec![lit("qty")]), "qty"),
            ],
        )
        .with_sample_by(lit("1h"), fill)
}

#[test]
fn sample_by_fill_prev_repeats_buckets() {
    let storage = storage();
    let plan = compile(&storage, &sample_by(vec![lit("prev")])).unwrap();
    match &plan {
        Operator::SampleBy(sample_by) => assert_eq!(sample_by.fill(), &SampleByFill::Prev),
        other => panic!("unexpected plan {}", other),
    }
    assert_eq!(plan.metadata().timestamp_index(), Some(0));

    // One row per hour from 01:00 on the first day to 05:00 on the second.
    let rows = run(&plan);
    assert_eq!(rows.len(), 29);
    assert_eq!(rows[0], vec![Value::Timestamp(at(0, 1, 0)), Value::Long(100)]);
    assert_eq!(rows[3], vec![Value::Timestamp(at(0, 4, 0)), Value::Long(300)]);
    assert_eq!(rows[4], vec![Value::Timestamp(at(0, 5, 0)), Value::Long(300)]);
    assert_eq!(rows[22], vec![Value::Timestamp(at(0, 23, 0)), Value::Long(300)]);
    assert_eq!(rows[26], vec![Value::Timestamp(at(1, 3, 0)), Value::Long(220)]);
    assert_eq!(rows[28], vec![Value::Timestamp(at(1, 5, 0)), Value::Long(310)]);
}

#[test]
fn sample_by_fill_modes() {
    let storage = storage();
    let rows = run(&compile(&storage, &sample_by(vec![])).unwrap());
    assert_eq!(rows.len(), 8);

    let rows = run(&compile(&storage, &sample_by(vec![lit("null")])).unwrap());
    assert_eq!(rows.len(), 29);
    assert_eq!(rows[4][1], Value::Null);

    let rows = run(&compile(&storage, &sample_by(vec![cons("-1")])).unwrap());
    assert_eq!(rows[4][1], Value::Long(-1));

    // 300 at 04:00 and 210 at 00:00 the next day, 20 hours apart.
    let rows = run(&compile(&storage, &sample_by(vec![lit("linear")])).unwrap());
    assert_eq!(rows[4][1], Value::Long(295));
    assert_eq!(rows[26][1], Value::Long(250));
    assert_eq!(rows[27][1], Value::Long(280));

    let err = compile(&storage, &sample_by(vec![cons("1"), cons("2")])).unwrap_err();
    assert_eq!(err.message(), "too many fill values");

    let model = QueryModel::from_nested(QueryModel::from_table("trades", 1))
        .with_select(
            SelectModelType::GroupBy,
            vec![QueryColumn::aliased(func("first", vec![lit("sym")]), "s")],
        )
        .with_sample_by(lit("1h"), vec![lit("linear")]);
    let err = compile(&storage, &model).unwrap_err();
    assert_eq!(err.message(), "unsupported interpolation type: SYMBOL");
}

#[test]
fn sample_by_fills_per_key() {
    let storage = storage();
    let model = QueryModel::from_nested(QueryModel::from_table("trades", 1))
        .with_select(
            SelectModelType::GroupBy,
            vec![
                QueryColumn::new(lit("ts")),
                QueryColumn::new(lit("sym")),
                QueryColumn::aliased(func("max", vec![lit("price")]), "high"),
            ],
        )
        .with_sample_by(lit("1d"), vec![lit("null")]);
    let rows = run(&compile(&storage, &model).unwrap());
    // Both days carry all three symbols, every pair is present.
    assert_eq!(rows.len(), 6);
    assert_eq!(
        rows[0],
        vec![Value::Timestamp(day(0)), "A".into(), Value::Double(11.0)]
    );
    assert_eq!(
        rows[5],
        vec![Value::Timestamp(day(1)), "C".into(), Value::Double(31.0)]
    );
}

#[test]
fn sample_by_errors() {
    let storage = storage();
    let interval = lit("3x");
    let position = interval.position;
    let model = QueryModel::from_nested(QueryModel::from_table("trades", 1))
        .with_select(SelectModelType::GroupBy, vec![QueryColumn::new(func("count", vec![]))])
        .with_sample_by(interval, vec![]);
    let err = compile(&storage, &model).unwrap_err();
    assert_eq!(err.message(), "Unsupported interval qualifier");
    assert_eq!(err.position(), Some(position));

    let model = QueryModel::from_nested(QueryModel::from_table("notes", 1))
        .with_select(SelectModelType::GroupBy, vec![QueryColumn::new(func("count", vec![]))])
        .with_sample_by(lit("1h"), vec![]);
    let err = compile(&storage, &model).unwrap_err();
    assert_eq!(err.message(), "base query does not provide dedicated TIMESTAMP column");
    assert_eq!(storage.open_readers(), 0);
}

#[test]
fn ordering_by_timestamp_is_a_no_op() {
    let storage = storage();
    let model = QueryModel::from_table("trades", 1).with_order_by(lit("ts"), OrderDirection::Asc);
    let plan = compile(&storage, &model).unwrap();
    assert!(matches!(plan, Operator::TableScan(_)));
    assert_eq!(plan.metadata().timestamp_index(), Some(0));
}

#[test]
fn sort_variants_and_timestamp_retention() {
    let storage = storage();
    let model = QueryModel::from_table("trades", 1).with_order_by(lit("price"), OrderDirection::Desc);
    let plan = compile(&storage, &model).unwrap();
    match &plan {
        Operator::Sort(sort) => assert!(sort.is_light()),
        other => panic!("unexpected plan {}", other),
    }
    assert_eq!(plan.metadata().timestamp_index(), None);
    let rows = run(&plan);
    assert_eq!(rows[0][2], Value::Double(31.0));
    assert_eq!(rows[7][2], Value::Double(10.0));

    let model = QueryModel::from_table("trades", 1)
        .with_order_by(lit("ts"), OrderDirection::Asc)
        .with_order_by(lit("sym"), OrderDirection::Asc);
    let plan = compile(&storage, &model).unwrap();
    assert!(matches!(plan, Operator::Sort(_)));
    assert_eq!(plan.metadata().timestamp_index(), Some(0));

    // Grouped rows cannot be fetched by id, so they are copied.
    let grouped = QueryModel::from_nested(QueryModel::from_table("trades", 1))
        .with_select(
            SelectModelType::GroupBy,
            vec![
                QueryColumn::new(lit("sym")),
                QueryColumn::aliased(func("sum", vec![lit("qty")]), "total"),
            ],
        )
        .with_order_by(lit("total"), OrderDirection::Desc);
    let plan = compile(&storage, &grouped).unwrap();
    match &plan {
        Operator::Sort(sort) => assert!(!sort.is_light()),
        other => panic!("unexpected plan {}", other),
    }
    assert_eq!(run(&plan)[0], vec!["B".into(), Value::Long(630)]);

    let column = lit("payload");
    let position = column.position;
    let err = compile(&storage, &QueryModel::from_table("notes", 1).with_order_by(column, OrderDirection::Asc))
        .unwrap_err();
    assert_eq!(err.message(), "unsupported column type: BINARY");
    assert_eq!(err.position(), Some(position));
}

#[test]
fn limit_windows() {
    let storage = storage();
    let limited = |lo: &str, hi: Option<&str>| {
        let model = QueryModel::from_table("trades", 1).with_limit(Some(cons(lo)), hi.map(cons));
        let plan = compile(&storage, &model).unwrap();
        run(&plan)
            .into_iter()
            .map(|row| row[3].as_long().unwrap())
            .collect::<Vec<_>>()
    };
    assert_eq!(limited("3", None), vec![100, 200, 150]);
    assert_eq!(limited("-2", None), vec![220, 310]);
    assert_eq!(limited("2", Some("4")), vec![150, 300]);
    assert_eq!(limited("-3", Some("-1")), vec![120, 220]);
    assert_eq!(limited("0", None), Vec::<i64>::new());

    // Only an upper bound: rows [0, hi).
    let model = QueryModel::from_table("trades", 1).with_limit(None, Some(cons("2")));
    let plan = compile(&storage, &model).unwrap();
    assert_eq!(run(&plan).len(), 2);
    assert_eq!(run(&plan)[1][3], Value::Long(200));
    let model = QueryModel::from_table("trades", 1).with_limit(None, Some(cons("-6")));
    assert_eq!(run(&compile(&storage, &model).unwrap()).len(), 2);

    let bound = cons("'x'");
    let position = bound.position;
    let model = QueryModel::from_table("trades", 1).with_limit(Some(bound), None);
    let err = compile(&storage, &model).unwrap_err();
    assert_eq!(err.message(), "invalid type: STRING");
    assert_eq!(err.position(), Some(position));
}

#[test]
fn limit_accepts_bind_variables() {
    let storage = storage();
    let ctx = ExecutionContext::default().with_bind_variable("n", Value::Long(1));
    let model = QueryModel::from_table("trades", 1).with_limit(Some(bind(":n")), None);
    let plan = Engine::new(storage.clone()).compile(&model, &ctx).unwrap();
    assert_eq!(rows_of(&plan, &ctx).unwrap().len(), 1);
}

#[test]
fn projections() {
    let storage = storage();
    let plan = compile(&storage, &choose(QueryModel::from_table("trades", 1), &["ts", "sym", "price", "qty"])).unwrap();
    assert!(matches!(plan, Operator::TableScan(_)));

    let plan = compile(&storage, &choose(QueryModel::from_table("trades", 1), &["qty", "ts"])).unwrap();
    assert!(matches!(plan, Operator::Selected(_)));
    assert_eq!(plan.metadata().to_string(), "[qty:LONG, ts*:TIMESTAMP]");
    assert_eq!(run(&plan)[0], vec![Value::Long(100), Value::Timestamp(at(0, 1, 0))]);

    let model = QueryModel::from_nested(QueryModel::from_table("trades", 1)).with_select(
        SelectModelType::Virtual,
        vec![
            QueryColumn::new(lit("ts")),
            QueryColumn::aliased(op("*", vec![lit("price"), lit("qty")]), "notional"),
        ],
    );
    let plan = compile(&storage, &model).unwrap();
    assert!(matches!(plan, Operator::Virtual(_)));
    assert_eq!(plan.metadata().to_string(), "[ts*:TIMESTAMP, notional:DOUBLE]");
    assert_eq!(run(&plan)[0][1], Value::Double(1000.0));

    let column = lit("nope");
    let position = column.position;
    let model = QueryModel::from_nested(QueryModel::from_table("trades", 1))
        .with_select(SelectModelType::Choose, vec![QueryColumn::new(column)]);
    assert_eq!(compile(&storage, &model).unwrap_err().position(), Some(position));
}

#[test]
fn distinct_deduplicates() {
    let storage = storage();
    let model = QueryModel::from_nested(choose(QueryModel::from_table("trades", 1), &["sym"]))
        .with_select(SelectModelType::Distinct, vec![]);
    let plan = compile(&storage, &model).unwrap();
    assert!(matches!(plan, Operator::Distinct(_)));
    assert_eq!(run(&plan), vec![vec!["A".into()], vec!["B".into()], vec!["C".into()]]);
}

#[test]
fn function_sources() {
    let storage = storage();
    let model = QueryModel::from_function(func("long_sequence", vec![cons("5")]))
        .with_where(op(">", vec![lit("x"), cons("2")]));
    let plan = compile(&storage, &model).unwrap();
    assert!(matches!(plan, Operator::Filtered(_)));
    assert_eq!(run(&plan), vec![vec![Value::Long(3)], vec![Value::Long(4)], vec![Value::Long(5)]]);

    let node = func("not", vec![cons("true")]);
    let position = node.position;
    let err = compile(&storage, &QueryModel::from_function(node)).unwrap_err();
    assert_eq!(err.message(), "function must return CURSOR [actual=BOOLEAN]");
    assert_eq!(err.position(), Some(position));
}

#[test]
fn hash_join_variants() {
    let storage = storage();
    let plan = compile(&storage, &trades_join(JoinType::Inner, 10)).unwrap();
    match &plan {
        Operator::HashJoin(join) => assert_eq!(join.algorithm(), JoinAlgorithm::HashLight),
        other => panic!("unexpected plan {}", other),
    }
    assert_eq!(plan.metadata().column_count(), 9);
    assert_eq!(plan.metadata().timestamp_index(), Some(0));
    assert_eq!(plan.metadata().column(5).table_alias.as_deref(), Some("q"));
    // Three A trades meet two A quotes, every other trade meets one quote.
    assert_eq!(run(&plan).len(), 11);

    let full_fat = PlannerConfig {
        full_fat_joins: true,
        ..Default::default()
    };
    let plan = compile_with(&storage, full_fat, &trades_join(JoinType::Inner, 10)).unwrap();
    match &plan {
        Operator::HashJoin(join) => assert_eq!(join.algorithm(), JoinAlgorithm::Hash),
        other => panic!("unexpected plan {}", other),
    }
    assert_eq!(run(&plan).len(), 11);

    let model = QueryModel::new()
        .with_join(QueryModel::from_table("trades", 1).with_alias("t"), JoinType::Inner, 0, None)
        .with_join(
            QueryModel::from_table("events", 2).with_alias("e"),
            JoinType::Outer,
            10,
            Some(JoinContext::new().with_key(lit("e.sym"), lit("t.sym"))),
        );
    let plan = compile(&storage, &model).unwrap();
    let rows = run(&plan);
    // C trades have no event and keep null event columns.
    assert_eq!(rows.len(), 8);
    assert_eq!(rows.iter().filter(|row| row[4].is_null()).count(), 2);
}

#[test]
fn later_join_keys_resolve_by_qualified_name() {
    let storage = storage();
    let model = QueryModel::new()
        .with_join(QueryModel::from_table("trades", 1).with_alias("t"), JoinType::Inner, 0, None)
        .with_join(
            QueryModel::from_table("quotes", 2).with_alias("q"),
            JoinType::Inner,
            10,
            Some(JoinContext::new().with_key(lit("q.sym"), lit("t.sym"))),
        )
        .with_join(
            QueryModel::from_table("events", 3).with_alias("e"),
            JoinType::Inner,
            20,
            Some(JoinContext::new().with_key(lit("e.sym"), lit("q.sym"))),
        );
    let plan = compile(&storage, &model).unwrap();
    let text = plan.to_string();
    // The first edge joins two plain tables by bare name; the second finds `q.sym` at column 5
    // of the joined master rather than the first `sym`.
    assert!(text.starts_with("HashJoin(hash-light) on [5=1]"), "{}", text);
    assert!(text.contains("HashJoin(hash-light) on [1=1]"), "{}", text);
    let rows = run(&plan);
    assert!(rows.iter().all(|row| row[5] == row[10]));
    // C has no event.
    assert_eq!(rows.len(), 9);
}

#[test]
fn join_keys_must_share_a_type() {
    let storage = storage();
    let key = lit("e.note");
    let position = key.position;
    let model = QueryModel::new()
        .with_join(QueryModel::from_table("trades", 1).with_alias("t"), JoinType::Inner, 0, None)
        .with_join(
            QueryModel::from_table("events", 2).with_alias("e"),
            JoinType::Inner,
            10,
            Some(JoinContext::new().with_key(key, lit("t.sym"))),
        );
    let err = compile(&storage, &model).unwrap_err();
    assert!(err.message().starts_with("join column type mismatch [e.note:STRING"));
    assert_eq!(err.position(), Some(position));
    assert_eq!(storage.open_readers(), 0);
}

#[test]
fn post_join_and_constant_filters() {
    let storage = storage();
    let model = QueryModel::new()
        .with_join(QueryModel::from_table("trades", 1).with_alias("t"), JoinType::Inner, 0, None)
        .with_join(
            QueryModel::from_table("quotes", 2)
                .with_alias("q")
                .with_post_join_where(op(">", vec![lit("price"), lit("ask")])),
            JoinType::Inner,
            10,
            Some(JoinContext::new().with_key(lit("q.sym"), lit("t.sym"))),
        );
    let plan = compile(&storage, &model).unwrap();
    assert!(matches!(plan, Operator::Filtered(_)));
    assert!(run(&plan).iter().all(|row| row[2].as_double() > row[8].as_double()));
    assert_eq!(storage.open_readers(), 2);
    drop(plan);

    // The join readers are released once the constant filter folds to false.
    let model = trades_join(JoinType::Inner, 10).with_const_where(op("=", vec![cons("1"), cons("2")]));
    let plan = compile(&storage, &model).unwrap();
    assert!(plan.is_empty_table());
    assert_eq!(plan.metadata().column_count(), 9);
    assert_eq!(storage.open_readers(), 0);

    let condition = op("+", vec![cons("1"), cons("2")]);
    let position = condition.position;
    let model = trades_join(JoinType::Inner, 10).with_const_where(condition);
    let err = compile(&storage, &model).unwrap_err();
    assert_eq!(err.message(), "boolean expression expected");
    assert_eq!(err.position(), Some(position));
    assert_eq!(storage.open_readers(), 0);
}

#[test]
fn cross_join_pairs_everything() {
    let storage = storage();
    let model = QueryModel::new()
        .with_join(QueryModel::from_table("notes", 1), JoinType::Inner, 0, None)
        .with_join(QueryModel::from_table("quotes", 2), JoinType::Cross, 10, None);
    let plan = compile(&storage, &model).unwrap();
    assert!(matches!(plan, Operator::CrossJoin(_)));
    assert_eq!(run(&plan).len(), 12);
}

#[test]
fn as_of_join_variants() {
    let storage = storage();
    let plan = compile(&storage, &trades_join(JoinType::AsOf, 10)).unwrap();
    match &plan {
        Operator::AsOfJoin(join) => assert_eq!(join.algorithm(), JoinAlgorithm::AsOfLight),
        other => panic!("unexpected plan {}", other),
    }
    let rows = run(&plan);
    assert_eq!(rows.len(), 8);
    assert_eq!(rows[0][7], Value::Double(9.5));
    assert_eq!(rows[2][7], Value::Double(10.5));
    // No C quote precedes the first C trade.
    assert!(rows[3][4].is_null());
    assert_eq!(rows[7][7], Value::Double(29.5));
    drop(plan);

    let full_fat = PlannerConfig {
        full_fat_joins: true,
        ..Default::default()
    };
    let plan = compile_with(&storage, full_fat.clone(), &trades_join(JoinType::AsOf, 10)).unwrap();
    match &plan {
        Operator::AsOfJoin(join) => assert_eq!(join.algorithm(), JoinAlgorithm::AsOfFull),
        other => panic!("unexpected plan {}", other),
    }
    // Slave values first, keys last.
    assert_eq!(
        plan.metadata().to_string(),
        "[ts*:TIMESTAMP, sym:SYMBOL, price:DOUBLE, qty:LONG, ts:TIMESTAMP, venue:SYMBOL, bid:DOUBLE, ask:DOUBLE, sym:STRING]"
    );
    let rows = run(&plan);
    assert_eq!(rows[0][6], Value::Double(9.5));
    assert_eq!(rows[0][8], "A".into());
    drop(plan);

    let model = QueryModel::new()
        .with_join(QueryModel::from_table("trades", 1), JoinType::Inner, 0, None)
        .with_join(QueryModel::from_table("events", 2), JoinType::AsOf, 10, None);
    let plan = compile(&storage, &model).unwrap();
    match &plan {
        Operator::AsOfJoin(join) => assert_eq!(join.algorithm(), JoinAlgorithm::AsOfNoKey),
        other => panic!("unexpected plan {}", other),
    }
    let rows = run(&plan);
    assert_eq!(rows[0][6], "open".into());
    assert_eq!(rows[3][6], "halt".into());
    drop(plan);
    assert_eq!(storage.open_readers(), 0);

    let err = compile_with(&storage, full_fat, &model).unwrap_err();
    assert_eq!(err.message(), "right side column 'note' is of unsupported type");
    assert_eq!(err.position(), Some(10));
    assert_eq!(storage.open_readers(), 0);
}

#[test]
fn time_series_joins_need_timestamps() {
    let storage = storage();
    let model = QueryModel::new()
        .with_join(QueryModel::from_table("trades", 1), JoinType::Inner, 0, None)
        .with_join(QueryModel::from_table("notes", 2), JoinType::AsOf, 17, None);
    let err = compile(&storage, &model).unwrap_err();
    assert_eq!(err.message(), "right side of time series join has no timestamp");
    assert_eq!(err.position(), Some(17));

    let model = QueryModel::new()
        .with_join(QueryModel::from_table("notes", 1), JoinType::Inner, 0, None)
        .with_join(QueryModel::from_table("trades", 2), JoinType::Splice, 23, None);
    let err = compile(&storage, &model).unwrap_err();
    assert_eq!(err.message(), "left side of time series join has no timestamp");
    assert_eq!(err.position(), Some(23));
    assert_eq!(storage.open_readers(), 0);
}

#[test]
fn splice_join_interleaves_both_sides() {
    let storage = storage();
    let plan = compile(&storage, &trades_join(JoinType::Splice, 10)).unwrap();
    assert!(matches!(plan, Operator::SpliceJoin(_)));
    assert_eq!(plan.metadata().timestamp_index(), None);
    let rows = run(&plan);
    assert_eq!(rows.len(), 12);
    // The first quote precedes every trade.
    assert!(rows[0][0].is_null());
    assert_eq!(rows[0][4], Value::Timestamp(at(0, 0, 30)));
    assert_eq!(rows[1][0], Value::Timestamp(at(0, 1, 0)));
    assert_eq!(rows[1][7], Value::Double(9.5));

    // Grouped rows carry no designated timestamp.
    let grouped = QueryModel::new()
        .with_join(
            QueryModel::from_nested(QueryModel::from_table("trades", 1))
                .with_select(SelectModelType::GroupBy, vec![QueryColumn::new(lit("ts")), QueryColumn::new(lit("sym"))])
                .with_alias("t"),
            JoinType::Inner,
            0,
            None,
        )
        .with_join(QueryModel::from_table("quotes", 2), JoinType::Splice, 19, None);
    let err = compile(&storage, &grouped).unwrap_err();
    assert_eq!(err.message(), "left side of time series join has no timestamp");
    assert_eq!(err.position(), Some(19));
}

#[test]
fn set_operations() {
    let storage = storage();
    let syms = |table: &str| choose(QueryModel::from_table(table, 1), &["sym"]);
    let model = syms("trades").with_union(syms("quotes"), UnionType::UnionAll, 40);
    let plan = compile(&storage, &model).unwrap();
    assert_eq!(run(&plan).len(), 12);

    let model = syms("trades").with_union(syms("quotes"), UnionType::Union, 40);
    assert_eq!(run(&compile(&storage, &model).unwrap()).len(), 3);

    let model = syms("quotes").with_union(syms("events"), UnionType::Intersect, 40);
    assert_eq!(
        run(&compile(&storage, &model).unwrap()),
        vec![vec!["A".into()], vec!["B".into()]]
    );

    let model = syms("trades").with_union(syms("events"), UnionType::Except, 40);
    assert_eq!(run(&compile(&storage, &model).unwrap()), vec![vec!["C".into()]]);

    let chained = syms("trades").with_union(
        syms("quotes").with_union(syms("events"), UnionType::UnionAll, 50),
        UnionType::UnionAll,
        40,
    );
    assert_eq!(run(&compile(&storage, &chained).unwrap()).len(), 14);
}

#[test]
fn set_operation_type_mismatch() {
    let storage = storage();
    let model = choose(QueryModel::from_table("trades", 1), &["sym"]).with_union(
        choose(QueryModel::from_table("notes", 2), &["id"]),
        UnionType::Union,
        42,
    );
    let err = compile(&storage, &model).unwrap_err();
    assert_eq!(err.message(), "column type mismatch [index=0, A=SYMBOL, B=LONG]");
    assert_eq!(err.position(), Some(42));
    assert_eq!(storage.open_readers(), 0);
}

#[test]
fn readers_follow_plan_lifetime() {
    let storage = storage();
    let plan = compile(&storage, &trades_join(JoinType::AsOf, 10)).unwrap();
    assert_eq!(storage.open_readers(), 2);
    drop(plan);
    assert_eq!(storage.open_readers(), 0);

    let err = compile(&storage, &QueryModel::from_table("missing", 1)).unwrap_err();
    assert_eq!(err.message(), "table does not exist [table=missing]");
    assert_eq!(err.position(), None);
}

#[test]
fn plan_renders_as_tree() {
    let storage = storage();
    let plan = compile(&storage, &trades_join(JoinType::AsOf, 10)).unwrap();
    let text = plan.to_string();
    assert!(text.starts_with("AsOfJoin(as-of-light) on [1=1]"));
    assert!(text.contains("TableScan(trades)"));
    assert!(text.contains("TableScan(quotes)"));
}
