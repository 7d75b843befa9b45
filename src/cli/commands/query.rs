use clap::{Args, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    #[default]
    Table,
}

#[derive(Args)]
pub struct RunArgs {
    /// Path to the query document
    #[arg(help = "Path to a query document (TOML)")]
    pub path: PathBuf,
    /// Schema file; defaults to backend.schema from the config
    #[arg(long)]
    pub schema: Option<PathBuf>,
    /// Fixture data for the memory backend; defaults to backend.fixtures
    #[arg(long)]
    pub fixtures: Option<PathBuf>,
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
    /// Pretty print JSON output
    #[arg(short, long)]
    pub pretty: bool,
    /// Print the composed expression before the results
    #[arg(long)]
    pub explain: bool,
}

#[derive(Args)]
pub struct ExplainArgs {
    /// Path to the query document
    #[arg(help = "Path to a query document (TOML)")]
    pub path: PathBuf,
    /// Schema file; defaults to backend.schema from the config
    #[arg(long)]
    pub schema: Option<PathBuf>,
}
