//! Sqidem library crate
//!
//! This is the library component of sqidem, a test runner for SQL scripts in
//! the `.iq` format. A script mixes SQL statements with `!`-directives that
//! say what to do with each statement; running it rewrites the script with
//! the actual results, so a passing script comes out unchanged. The library
//! provides:
//!
//! - A line reader and parser that turn a script into a command tree
//! - An engine that executes the tree and reconciles expected with actual output
//! - CSV, MySQL, PostgreSQL and Oracle style result formatters
//! - A property stack (`!set`, `!push`, `!pop`) and `!if` conditions over caller variables
//! - A pluggable connection factory and extension command handlers
//! - A built-in in-memory SQL database populated from CSV files
//! - A recorder that captures query results to a fixture file and replays them

pub mod cli;
pub mod command;
pub mod config;
pub mod connection;
pub mod engine;
pub mod env;
pub mod error;
pub mod fixture;
pub mod format;
pub mod handlers;
pub mod memdb;
pub mod parser;
pub mod property;
pub mod reader;
pub mod recorder;
pub mod result_set;
pub mod visitor;
