mod logging;
mod output;
mod settings;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};
use schemars::schema_for;
use serde_json::Value;
use thiserror::Error;

use mockalchemy_core::{DefinitionSet, Error as CoreError, build_seed_graph_report};
use mockalchemy_store::{Engine, QueryOptions, SortOrder, StoreError};

use logging::{LogOptions, init_logging};
use output::csv::write_collection_csv;
use output::write_json;
use settings::{SettingsOverrides, StorageArg, load_settings};

#[derive(Debug, Error)]
pub enum CliError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("logging error: {0}")]
    Logging(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
}

#[derive(Parser, Debug)]
#[command(name = "mockalchemy", version, about = "Mock data collections with relations")]
struct Cli {
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    /// Emit console logs as JSON.
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,
    /// Append NDJSON logs to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Seed every collection in dependency order.
    Seed(SeedArgs),
    /// List or fetch records of one collection.
    Query(QueryArgs),
    /// Write a collection to a JSON or CSV file.
    Export(ExportArgs),
    /// Print the JSON Schema of the definition file format.
    Schema,
    /// Check a definition file and print its seed order.
    Validate(ValidateArgs),
}

#[derive(Args, Debug)]
struct EngineArgs {
    /// Collection definition file (JSON).
    #[arg(long)]
    definitions: PathBuf,
    /// Settings file (TOML).
    #[arg(long, default_value = "mockalchemy.toml")]
    settings: PathBuf,
    /// Storage backend, overriding the settings file.
    #[arg(long, value_enum)]
    storage: Option<StorageArg>,
    /// Snapshot directory for local storage.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// RNG seed for deterministic generation.
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct SeedArgs {
    #[command(flatten)]
    engine: EngineArgs,
    /// Write the initialization report here.
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OrderArg {
    Asc,
    Desc,
}

impl From<OrderArg> for SortOrder {
    fn from(value: OrderArg) -> Self {
        match value {
            OrderArg::Asc => SortOrder::Asc,
            OrderArg::Desc => SortOrder::Desc,
        }
    }
}

#[derive(Args, Debug)]
struct QueryArgs {
    #[command(flatten)]
    engine: EngineArgs,
    #[arg(long)]
    collection: String,
    /// Fetch a single record instead of listing.
    #[arg(long, conflicts_with_all = ["page", "limit", "sort_by", "filter"])]
    id: Option<String>,
    #[arg(long)]
    page: Option<u32>,
    #[arg(long)]
    limit: Option<u32>,
    #[arg(long)]
    sort_by: Option<String>,
    #[arg(long, value_enum, default_value = "asc")]
    order: OrderArg,
    /// Filter object, e.g. '{"age":{"$gte":18}}'.
    #[arg(long)]
    filter: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Json,
    Csv,
}

#[derive(Args, Debug)]
struct ExportArgs {
    #[command(flatten)]
    engine: EngineArgs,
    #[arg(long)]
    collection: String,
    #[arg(long, value_enum, default_value = "json")]
    format: ExportFormat,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    #[arg(long)]
    definitions: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_logging(&LogOptions {
        level: cli.log_level,
        json: cli.log_json,
        file: cli.log_file,
    })?;

    match cli.command {
        Command::Seed(args) => run_seed(args).await,
        Command::Query(args) => run_query(args).await,
        Command::Export(args) => run_export(args).await,
        Command::Schema => run_schema(),
        Command::Validate(args) => run_validate(args),
    }
}

fn build_engine(args: &EngineArgs) -> Result<Engine, CliError> {
    let overrides = SettingsOverrides {
        storage: args.storage,
        data_dir: args.data_dir.clone(),
        seed: args.seed,
    };
    let config = load_settings(&args.settings, &overrides)?;
    let definitions = DefinitionSet::load(&args.definitions)?;
    tracing::debug!(
        definitions = %args.definitions.display(),
        storage = config.storage.as_str(),
        collections = definitions.collections.len(),
        "loaded definitions"
    );
    Ok(Engine::builder(config).definitions(definitions).build()?)
}

async fn run_seed(args: SeedArgs) -> Result<(), CliError> {
    let timer = Instant::now();
    let engine = build_engine(&args.engine)?;
    let report = engine.initialize_all().await?;

    for seed in &report.collections {
        println!(
            "{:<24} {:>8} records  ({:?}, {} FK repairs)",
            seed.collection, seed.records, seed.source, seed.repaired
        );
    }
    if let Some(path) = &args.report {
        write_json(path, &serde_json::to_value(&report)?)?;
        tracing::info!(path = %path.display(), "report written");
    }

    tracing::info!(
        collections = report.collections.len(),
        records = report.total_records(),
        duration_ms = timer.elapsed().as_millis() as u64,
        "seed finished"
    );
    Ok(())
}

async fn run_query(args: QueryArgs) -> Result<(), CliError> {
    let engine = build_engine(&args.engine)?;
    let collection = engine.collection(&args.collection)?;

    let response = match &args.id {
        Some(id) => collection.get(id).await?,
        None => collection.list(query_options(&args)?).await?,
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn query_options(args: &QueryArgs) -> Result<QueryOptions, CliError> {
    let mut options = QueryOptions {
        page: args.page,
        limit: args.limit,
        ..QueryOptions::default()
    };
    if let Some(field) = &args.sort_by {
        options = options.sort(field.clone(), args.order.into());
    }
    if let Some(raw) = &args.filter {
        match serde_json::from_str(raw)? {
            Value::Object(filter) => options.filter = filter,
            _ => {
                return Err(CliError::InvalidArgs(
                    "--filter must be a JSON object".to_string(),
                ));
            }
        }
    }
    Ok(options)
}

async fn run_export(args: ExportArgs) -> Result<(), CliError> {
    let engine = build_engine(&args.engine)?;
    let collection = engine.collection(&args.collection)?;
    let records = collection.store().to_array().await;

    match args.format {
        ExportFormat::Json => {
            let value = Value::Array(records.iter().cloned().map(Value::Object).collect());
            write_json(&args.out, &value)?;
        }
        ExportFormat::Csv => {
            if let Some(parent) = args.out.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let bytes = write_collection_csv(&args.out, collection.store().schema(), &records)?;
            tracing::debug!(bytes, "csv written");
        }
    }

    tracing::info!(
        collection = %args.collection,
        records = records.len(),
        path = %args.out.display(),
        "export finished"
    );
    Ok(())
}

fn run_schema() -> Result<(), CliError> {
    let schema = schema_for!(DefinitionSet);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

fn run_validate(args: ValidateArgs) -> Result<(), CliError> {
    let definitions = DefinitionSet::load(&args.definitions)?;
    let order = definitions.validate()?;
    let graph = build_seed_graph_report(
        definitions
            .collections
            .iter()
            .map(|definition| (definition.name.as_str(), &definition.relations)),
    );

    println!(
        "{} collections, {} belongsTo edges",
        graph.summary.nodes, graph.summary.edges
    );
    for (position, name) in order.iter().enumerate() {
        let shape = definitions
            .get(name)
            .map(|definition| definition.schema.describe())
            .unwrap_or_default();
        println!("{:>3}. {name} {shape}", position + 1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_flags_parse_into_options() {
        let cli = Cli::try_parse_from([
            "mockalchemy",
            "query",
            "--definitions",
            "defs.json",
            "--collection",
            "users",
            "--page",
            "2",
            "--limit",
            "5",
            "--sort-by",
            "age",
            "--order",
            "desc",
            "--filter",
            r#"{"age":{"$gte":18}}"#,
        ])
        .expect("parse");
        let Command::Query(args) = cli.command else {
            panic!("expected query");
        };

        let options = query_options(&args).expect("options");
        assert_eq!(options.page, Some(2));
        assert_eq!(options.limit, Some(5));
        assert_eq!(options.sort_by.as_deref(), Some("age"));
        assert_eq!(options.sort_order, SortOrder::Desc);
        assert_eq!(options.filter["age"], serde_json::json!({"$gte": 18}));
    }

    #[test]
    fn id_conflicts_with_list_flags() {
        let result = Cli::try_parse_from([
            "mockalchemy",
            "query",
            "--definitions",
            "defs.json",
            "--collection",
            "users",
            "--id",
            "u1",
            "--page",
            "2",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn non_object_filters_are_rejected() {
        let cli = Cli::try_parse_from([
            "mockalchemy",
            "query",
            "--definitions",
            "defs.json",
            "--collection",
            "users",
            "--filter",
            "[1, 2]",
        ])
        .expect("parse");
        let Command::Query(args) = cli.command else {
            panic!("expected query");
        };
        assert!(matches!(query_options(&args), Err(CliError::InvalidArgs(_))));
    }

    #[test]
    fn export_defaults_to_json() {
        let cli = Cli::try_parse_from([
            "mockalchemy",
            "export",
            "--definitions",
            "defs.json",
            "--collection",
            "users",
            "--out",
            "users.json",
        ])
        .expect("parse");
        let Command::Export(args) = cli.command else {
            panic!("expected export");
        };
        assert_eq!(args.format, ExportFormat::Json);
        assert_eq!(args.engine.settings, PathBuf::from("mockalchemy.toml"));
    }

    #[tokio::test]
    async fn demo_definitions_seed_and_shape_responses() {
        let set = DefinitionSet::from_json_str(include_str!("../../../demos/shop.json"))
            .expect("demo definitions");
        assert_eq!(
            set.validate().expect("valid"),
            vec!["users", "categories", "products", "orders"]
        );

        let config = mockalchemy_core::GlobalConfig {
            seed: Some(42),
            ..mockalchemy_core::GlobalConfig::default()
        };
        let engine = Engine::builder(config)
            .storage(mockalchemy_store::StoragePort::memory_only())
            .definitions(set)
            .build()
            .expect("engine");
        let report = engine.initialize_all().await.expect("seed");
        assert_eq!(report.total_records(), 8 + 4 + 20 + 50);

        let orders = engine.collection("orders").expect("orders");
        let response = orders.list(QueryOptions::new()).await.expect("list");
        assert_eq!(response["meta"]["total"], serde_json::json!(50));
        assert_eq!(response["meta"]["totalPages"], serde_json::json!(5));
        let page = response["orders"].as_array().expect("orders");
        assert_eq!(page.len(), 10);
        for order in page {
            assert!(order["customer"].is_string());
            assert!(order["category"].is_string());
        }
    }
}
