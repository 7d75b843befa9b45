use crate::cli::commands::DemoArgs;
use crate::commands::query::execute_document;
use crate::config::Config;
use crate::designer::QueryDocument;
use crate::memory::MemoryBackend;
use crate::schema::Schema;
use anyhow::{Context, Result};
use colored::Colorize;
use include_dir::{Dir, File, include_dir};
use log::info;
use std::rc::Rc;

static DEMOS_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/demos");

const SCHEMA_FILE: &str = "schema.toml";
const DATA_FILE: &str = "data.json";

/// A bundled query document with the dataset it runs against
struct Demo<'a> {
    dataset: &'a str,
    name: &'a str,
    file: &'a File<'a>,
}

/// Run a bundled demo query, or list them when no name is given
pub fn demo_command(args: DemoArgs, config: &Config) -> Result<()> {
    let demos = discover()?;
    let Some(name) = args.name.as_deref() else {
        list(&demos)?;
        return Ok(());
    };

    let demo = demos.iter().find(|d| d.name == name).with_context(|| {
        let names: Vec<&str> = demos.iter().map(|d| d.name).collect();
        format!("Unknown demo '{}'. Available: {}", name, names.join(", "))
    })?;
    info!("Running demo {}/{}", demo.dataset, demo.name);

    let schema = Schema::from_toml(read(demo.dataset, SCHEMA_FILE)?)
        .with_context(|| format!("Invalid schema in demo dataset '{}'", demo.dataset))?;
    let backend = MemoryBackend::from_json(schema, read(demo.dataset, DATA_FILE)?)?;
    let document = QueryDocument::from_toml(utf8(demo.file)?)?;

    if let Some(description) = &document.description {
        println!("{} {}\n", "▶".bright_cyan().bold(), description.bright_white());
    }
    let explain = args.explain || config.settings.explain;
    execute_document(document, Rc::new(backend), config, args.format, args.pretty, explain)
}

fn discover() -> Result<Vec<Demo<'static>>> {
    let mut demos = Vec::new();
    for dataset in DEMOS_DIR.dirs() {
        let dataset_name = dataset
            .path()
            .file_name()
            .and_then(|n| n.to_str())
            .context("Invalid demo directory name")?;
        for file in dataset.files() {
            let path = file.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml")
                || path.file_name().and_then(|n| n.to_str()) == Some(SCHEMA_FILE)
            {
                continue;
            }
            let name = path
                .file_stem()
                .and_then(|n| n.to_str())
                .context("Invalid demo file name")?;
            demos.push(Demo {
                dataset: dataset_name,
                name,
                file,
            });
        }
    }
    demos.sort_by_key(|d| (d.dataset, d.name));
    Ok(demos)
}

fn list(demos: &[Demo<'_>]) -> Result<()> {
    if demos.is_empty() {
        println!("  {}", "⚠️  No demos bundled".bright_yellow().bold());
        return Ok(());
    }
    println!("  {}", "Available demos:".bright_white().bold());
    for demo in demos {
        let document = QueryDocument::from_toml(utf8(demo.file)?)?;
        println!(
            "  {} {} ({}) {}",
            "•".bright_green(),
            demo.name.bright_yellow().bold(),
            demo.dataset,
            document.description.unwrap_or_default().dimmed()
        );
    }
    Ok(())
}

fn read(dataset: &str, file: &str) -> Result<&'static str> {
    let path = format!("{}/{}", dataset, file);
    let file = DEMOS_DIR
        .get_file(&path)
        .with_context(|| format!("Missing {} in demo dataset '{}'", file, dataset))?;
    utf8(file)
}

fn utf8<'a>(file: &'a File<'_>) -> Result<&'a str> {
    file.contents_utf8()
        .with_context(|| format!("{} is not valid UTF-8", file.path().display()))
}
