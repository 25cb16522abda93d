use clap::Parser;
use itertools::Itertools;
use log::{info, LevelFilter};
use std::rc::Rc;
use std::str::FromStr;
use strum::IntoEnumIterator;
use tsplan::cursor::collect_rows;
use tsplan::query::{
    JoinContext, JoinType, OrderDirection, QueryColumn, QueryModel, SelectModelType, UnionType,
};
use tsplan::test_utils::{and, cons, func, lit, op, trades_storage};
use tsplan::{Engine, ExecutionContext, PlannerConfig};

#[derive(Parser)]
struct Args {
    /// Comma separated demo queries; all of them when omitted.
    #[arg(short, long, value_parser = parse_comma_demo_list)]
    query: Option<std::vec::Vec<DemoQuery>>,

    #[arg(long)]
    full_fat_joins: bool,

    /// Runs each plan and prints its rows.
    #[arg(long)]
    execute: bool,

    #[arg(long)]
    debug: bool,
}

#[derive(Clone, Copy, strum_macros::Display, strum_macros::EnumString, strum_macros::EnumIter)]
#[strum(serialize_all = "snake_case")]
enum DemoQuery {
    KeyedScan,
    LatestBy,
    AsOfJoin,
    SampleBy,
    Union,
    TopPrices,
}

fn parse_comma_demo_list(s: &str) -> Result<Vec<DemoQuery>, strum::ParseError> {
    s.split(',').map(DemoQuery::from_str).collect()
}

impl DemoQuery {
    fn model(&self) -> QueryModel {
        match self {
            Self::KeyedScan => QueryModel::from_table("trades", 14).with_where(and(
                op("in", vec![lit("sym"), cons("'A'"), cons("'B'")]),
                op(">", vec![lit("ts"), cons("'2020-01-01T02'")]),
            )),
            Self::LatestBy => QueryModel::from_table("trades", 14).with_latest_by(vec![lit("sym")]),
            Self::AsOfJoin => QueryModel::new()
                .with_join(QueryModel::from_table("trades", 14).with_alias("t"), JoinType::Inner, 0, None)
                .with_join(
                    QueryModel::from_table("quotes", 31).with_alias("q"),
                    JoinType::AsOf,
                    23,
                    Some(JoinContext::new().with_key(lit("q.sym"), lit("t.sym"))),
                ),
            Self::SampleBy => QueryModel::from_nested(QueryModel::from_table("trades", 40))
                .with_select(
                    SelectModelType::GroupBy,
                    vec![
                        QueryColumn::new(lit("ts")),
                        QueryColumn::new(lit("sym")),
                        QueryColumn::aliased(func("sum", vec![lit("qty")]), "volume"),
                    ],
                )
                .with_sample_by(lit("6h"), vec![lit("prev")]),
            Self::Union => {
                let syms = |table: &str| {
                    QueryModel::from_nested(QueryModel::from_table(table, 20))
                        .with_select(SelectModelType::Choose, vec![QueryColumn::new(lit("sym"))])
                };
                syms("trades").with_union(syms("quotes"), UnionType::Union, 25)
            }
            Self::TopPrices => QueryModel::from_table("trades", 14)
                .with_order_by(lit("price"), OrderDirection::Desc)
                .with_limit(Some(cons("3")), None),
        }
    }
}

fn setup_logger(debug: bool) -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Utc::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(if debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    setup_logger(args.debug)?;

    let storage = Rc::new(trades_storage());
    let engine = Engine::new(storage.clone()).with_config(PlannerConfig {
        full_fat_joins: args.full_fat_joins,
        ..Default::default()
    });
    let ctx = ExecutionContext::default();

    let queries = args
        .query
        .unwrap_or_else(|| DemoQuery::iter().collect());
    for query in queries {
        println!("-- {}", query);
        let plan = match engine.compile(&query.model(), &ctx) {
            Ok(plan) => plan,
            Err(err) => {
                println!("error: {}", err);
                continue;
            }
        };
        print!("{}", plan);
        if args.execute {
            let mut cursor = plan.cursor(&ctx)?;
            for row in collect_rows(cursor.as_mut())? {
                println!("  {}", row.iter().join(", "));
            }
        }
        println!();
    }
    info!("Open readers after run: {}", storage.open_readers());
    Ok(())
}
