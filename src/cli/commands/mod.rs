pub mod demo;
pub mod query;

pub use demo::DemoArgs;
pub use query::{ExplainArgs, OutputFormat, RunArgs};
