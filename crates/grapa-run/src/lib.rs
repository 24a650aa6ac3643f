//! The `grapa` command-line tool: runs scripts, compiles them to the binary
//! format, dumps token streams and starts the REPL.
mod cli;
mod config;

pub use cli::Cli;
pub use config::Config;
