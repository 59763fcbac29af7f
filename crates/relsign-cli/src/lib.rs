#![forbid(unsafe_code)]

pub mod cli;
pub mod discover;
pub mod telemetry;

pub use cli::{CleanArgs, Cli, Command, SignArgs};
