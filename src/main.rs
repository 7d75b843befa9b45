use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use log::info;
use query_designer::cli::{Cli, Commands};
use query_designer::commands::{demo_command, explain_command, run_command};
use query_designer::config::Config;

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {:#}", "Error:".bright_red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    // Log to file, truncated on each run
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open("query-designer.log")?;
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .init();

    let cli = Cli::parse();
    info!("Starting query-designer");

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Run(args) => run_command(args, &config),
        Commands::Explain(args) => explain_command(args, &config),
        Commands::Demo(args) => demo_command(args, &config),
    }
}
