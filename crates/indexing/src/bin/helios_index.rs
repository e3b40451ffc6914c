//! Helios index tool.
//!
//! Runs the indexing pipeline on files from the command line:
//!
//! ```text
//! helios-index extract --definitions search-parameters.json patient.json
//! helios-index compile --definitions search-parameters.json --type Patient "name=smi&_count=5"
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use helios_indexing::config::IndexingConfig;
use helios_indexing::init_logging;
use helios_indexing::rows::{
    InMemoryModelIds, ResourceRecord, ResourceWriteOptions, RowBatch, SurrogateIdGenerator,
};
use helios_indexing::search::{
    JsonPathEvaluator, SearchIndexer, SearchOptionsFactory, SearchParameterLoader,
    SearchParameterRegistry, SearchParameterRegistryBuilder, SearchRequest,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "helios-index")]
#[command(about = "Search indexing and query compilation for FHIR resources")]
struct Cli {
    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "HELIOS_INDEX_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Configuration file (JSON).
    #[arg(long, env = "HELIOS_INDEX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Prints the index entries and storage rows for a resource.
    Extract {
        /// SearchParameter resource, array or Bundle.
        #[arg(long)]
        definitions: Option<PathBuf>,

        /// Resource JSON file.
        resource: PathBuf,
    },

    /// Prints the compiled form of a search query.
    Compile {
        /// SearchParameter resource, array or Bundle.
        #[arg(long)]
        definitions: Option<PathBuf>,

        /// Resource type searched; omit for a system-level search.
        #[arg(long = "type")]
        resource_type: Option<String>,

        /// Fail on unsupported parameters instead of warning.
        #[arg(long)]
        strict: bool,

        /// Treat the search as a background operation.
        #[arg(long = "async")]
        is_async: bool,

        /// Query string, e.g. `name=smi&_count=5`.
        query: String,
    },
}

fn load_registry(definitions: Option<&PathBuf>) -> anyhow::Result<SearchParameterRegistry> {
    let mut builder = SearchParameterRegistryBuilder::new().with_core_parameters();
    if let Some(path) = definitions {
        let defs = SearchParameterLoader::new().load_file(path)?;
        let count = builder.register_all(defs)?;
        info!(count, path = %path.display(), "Registered SearchParameters");
    }
    Ok(builder.build())
}

fn record_for(resource: &Value, raw: String) -> anyhow::Result<ResourceRecord> {
    let field = |name: &str| resource.get(name).and_then(Value::as_str);
    let resource_type = field("resourceType").context("resource has no resourceType")?;
    let id = field("id").unwrap_or_default();
    let meta = resource.get("meta");
    let version = meta
        .and_then(|m| m.get("versionId"))
        .and_then(Value::as_str)
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);
    let last_updated = meta
        .and_then(|m| m.get("lastUpdated"))
        .and_then(Value::as_str)
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Ok(ResourceRecord::new(resource_type, id, version, last_updated, raw))
}

fn extract(
    config: &IndexingConfig,
    definitions: Option<&PathBuf>,
    path: &PathBuf,
) -> anyhow::Result<Value> {
    let registry = Arc::new(load_registry(definitions)?);
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let resource: Value = serde_json::from_str(&raw)?;

    let indexer = SearchIndexer::new(registry.clone(), Arc::new(JsonPathEvaluator::new()));
    let entries = indexer.extract(&resource)?;

    let record = record_for(&resource, raw)?;
    let (surrogate_id, _) = SurrogateIdGenerator::new().next(record.last_updated);
    let ids = Arc::new(InMemoryModelIds::from_registry(&registry));
    let mut batch = RowBatch::new(ids, config.limits);
    batch.add_resource(
        &CancellationToken::new(),
        &record,
        surrogate_id,
        ResourceWriteOptions::default(),
        &entries,
    )?;

    Ok(json!({
        "entries": entries,
        "rows": batch.rows(),
    }))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = match &cli.config {
        Some(path) => IndexingConfig::from_json_file(path)?,
        None => IndexingConfig::default(),
    };
    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    let output = match &cli.command {
        Command::Extract {
            definitions,
            resource,
        } => extract(&config, definitions.as_ref(), resource)?,
        Command::Compile {
            definitions,
            resource_type,
            strict,
            is_async,
            query,
        } => {
            let registry = Arc::new(load_registry(definitions.as_ref())?);
            let factory = SearchOptionsFactory::with_defaults(registry, config.search.clone());
            let request = match resource_type {
                Some(rt) => SearchRequest::for_type(rt.as_str()),
                None => SearchRequest::system(),
            }
            .with_query(query)
            .with_strict(*strict)
            .with_async(*is_async);

            let options = factory.create(&request)?;
            let mut output = serde_json::to_value(&options)?;
            if let (Some(map), Some(expr)) = (output.as_object_mut(), &options.expression) {
                map.insert("expression_text".to_string(), Value::String(expr.to_string()));
            }
            output
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
