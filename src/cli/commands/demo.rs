use super::query::OutputFormat;
use clap::Args;

#[derive(Args)]
pub struct DemoArgs {
    /// Demo query to run; lists the demos when omitted
    pub name: Option<String>,
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
