use super::commands::{DemoArgs, ExplainArgs, RunArgs};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "query-designer")]
#[command(about = "Compose join-tree queries over a schema and run them against a backend")]
pub struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a query document and print its results
    Run(RunArgs),
    /// Print the composed expression of a query document
    Explain(ExplainArgs),
    /// Run one of the bundled demo queries
    Demo(DemoArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::OutputFormat;

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from([
            "query-designer",
            "run",
            "orders.toml",
            "--schema",
            "schema.toml",
            "--format",
            "json",
            "--pretty",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.path, PathBuf::from("orders.toml"));
        assert_eq!(args.schema, Some(PathBuf::from("schema.toml")));
        assert_eq!(args.format, OutputFormat::Json);
        assert!(args.pretty);
        assert!(!args.explain);
    }

    #[test]
    fn test_demo_name_is_optional() {
        let cli = Cli::parse_from(["query-designer", "demo"]);
        let Commands::Demo(args) = cli.command else {
            panic!("expected demo");
        };
        assert!(args.name.is_none());
        assert_eq!(args.format, OutputFormat::Table);
    }
}
