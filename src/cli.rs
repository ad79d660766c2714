//! CLI domain: parse, route, output and presentation for the `tierstore` binary.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::map_error;
pub use parse::{parse_filter, parse_value, Cli, Commands, StrategyArg};
pub use route::RunContext;
