pub mod demo;
pub mod output;
pub mod query;

pub use demo::demo_command;
pub use query::{explain_command, run_command};
