use crate::cli::commands::{ExplainArgs, OutputFormat, RunArgs};
use crate::commands::output;
use crate::config::Config;
use crate::designer::{QueryDesigner, QueryDocument};
use crate::engine::Backend;
use crate::registry::BackendRegistry;
use crate::schema::Schema;
use anyhow::{Context, Result};
use colored::Colorize;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Execute a query document against the configured backend
pub fn run_command(args: RunArgs, config: &Config) -> Result<()> {
    info!("Running query document: {}", args.path.display());
    let schema = load_schema(args.schema.as_ref(), config)?;
    let document = load_document(&args.path)?;

    let mut settings = config.backend.clone();
    if args.fixtures.is_some() {
        settings.fixtures = args.fixtures.clone();
    }
    let backend = BackendRegistry::with_defaults().activate(&settings, schema)?;

    let explain = args.explain || config.settings.explain;
    execute_document(document, backend, config, args.format, args.pretty, explain)
}

/// Print the composed expression without executing it
pub fn explain_command(args: ExplainArgs, config: &Config) -> Result<()> {
    let schema = load_schema(args.schema.as_ref(), config)?;
    let document = load_document(&args.path)?;
    let backend = BackendRegistry::with_defaults().activate(&config.backend, schema)?;
    let designer = document.build(backend)?;
    println!("{}", designer.explain());
    Ok(())
}

/// Builds, optionally explains, runs and prints one document
pub fn execute_document(
    mut document: QueryDocument,
    backend: Rc<dyn Backend>,
    config: &Config,
    format: OutputFormat,
    pretty: bool,
    explain: bool,
) -> Result<()> {
    if document.take.is_none() {
        debug!(
            "No take in document, applying default limit {}",
            config.settings.default_query_limit
        );
        document.take = Some(config.settings.default_query_limit);
    }

    let designer: QueryDesigner = document.build(backend)?;
    if explain {
        println!("{}", "Query plan:".bright_white().bold());
        println!("{}\n", designer.explain().dimmed());
    }

    let records = designer.records()?;
    info!("Query returned {} record(s)", records.len());
    println!("{}", output::render(&records, format, pretty)?);
    Ok(())
}

fn load_schema(path: Option<&PathBuf>, config: &Config) -> Result<Schema> {
    let path = path.or(config.backend.schema.as_ref()).context(
        "No schema given. Pass --schema or set backend.schema in the config file.",
    )?;
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema file: {}", path.display()))?;
    let schema = Schema::from_toml(&content)
        .with_context(|| format!("Failed to parse schema file: {}", path.display()))?;
    debug!("Loaded schema with {} entities", schema.entities.len());
    Ok(schema)
}

fn load_document(path: &Path) -> Result<QueryDocument> {
    if !path.is_file() {
        anyhow::bail!("Query document does not exist: {}", path.display());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read query document: {}", path.display()))?;
    let document = QueryDocument::from_toml(&content)
        .with_context(|| format!("Failed to parse query document: {}", path.display()))?;
    Ok(document)
}
