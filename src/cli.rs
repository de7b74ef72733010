//! CLI argument parsing module for sqidem
//!
//! This module handles parsing command-line arguments using the clap crate.
//! It defines the command-line interface of the script runner and turns the
//! raw arguments into the pieces the engine is built from: database
//! declarations, caller variables and the run configuration.
//!
//! Key features of the CLI:
//! - Script from a file or stdin, rewritten script to a file or stdout
//! - In-memory databases declared with `--db` and populated from CSV with `--load`
//! - Variables for `!if` conditions with `--var a.b=true`
//! - Choice of connection factory and extension command handler

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};

use crate::config::{RunConfig, DEFAULT_STACK_LIMIT};
use crate::env::{Env, EnvValue};
use crate::format::OutputFormat;
use crate::memdb::DatabaseSpec;

/// Which connection factory serves `!use`
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FactoryKind {
    /// Built-in in-memory databases declared with --db / --load
    Memory,
    /// No databases; every `!use` fails
    #[value(name = "none")]
    Unsupported,
}

/// Which extension command handler is installed
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerKind {
    /// Core directives only
    #[value(name = "none")]
    Core,
    /// Adds `!count`
    Count,
}

fn parse_format(name: &str) -> std::result::Result<OutputFormat, String> {
    OutputFormat::from_name(name)
        .ok_or_else(|| format!("unknown output format '{}' (csv, mysql, psql, oracle)", name))
}

/// Command-line arguments for sqidem
///
/// A script is read, executed against the configured databases and written
/// back with actual results in place of expected ones. A script that still
/// passes comes out unchanged.
#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about = "Script-driven SQL test runner for .iq files"
)]
pub struct SqidemArgs {
    /// Script to run (default: stdin)
    #[clap(value_name = "INPUT")]
    pub input: Option<PathBuf>,

    /// Where to write the rewritten script (default: stdout)
    ///
    /// May be the same file as the input; the script is read in full first.
    #[clap(value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Declare an in-memory database
    #[clap(long = "db", value_name = "NAME", help = "Declare an in-memory database")]
    pub databases: Vec<String>,

    /// Populate a database from CSV - format: NAME:[table=]file.csv
    ///
    /// The file's header row names the columns; column types are inferred.
    /// A database named here is declared implicitly.
    #[clap(
        long = "load",
        value_name = "NAME:[TABLE=]FILE",
        help = "Load a CSV file into a database as NAME:[table=]file.csv"
    )]
    pub loads: Vec<String>,

    /// Also serve a reference copy of every database for `!verify`
    #[clap(long, help = "Serve reference connections for !verify")]
    pub reference: bool,

    /// Define a variable for `!if` - format: NAME=VALUE
    ///
    /// Dotted names create nested scopes: `--var db.has_views=true`.
    #[clap(long = "var", value_name = "NAME=VALUE", help = "Define a variable as NAME=VALUE")]
    pub vars: Vec<String>,

    #[clap(long, value_enum, default_value_t = FactoryKind::Memory, help = "Connection factory")]
    pub factory: FactoryKind,

    #[clap(long, value_enum, default_value_t = HandlerKind::Core, help = "Extension command handler")]
    pub handler: HandlerKind,

    /// Output format until a script sets `outputformat`
    #[clap(
        short,
        long,
        default_value = "csv",
        value_parser = parse_format,
        help = "Initial output format (csv, mysql, psql, oracle)"
    )]
    pub format: OutputFormat,

    /// Character budget of error traces written into the output
    #[clap(long, default_value_t = DEFAULT_STACK_LIMIT, help = "Maximum error trace length")]
    pub stack_limit: usize,

    /// Enable verbose diagnostic output
    #[clap(short, long, help = "Enable verbose output")]
    pub verbose: bool,
}

impl SqidemArgs {
    /// Run configuration from the flags
    pub fn run_config(&self) -> RunConfig {
        RunConfig::new(self.verbose, self.stack_limit, self.format)
    }

    /// Database declarations from `--db` and `--load`, in first-mention order
    pub fn database_specs(&self) -> Result<Vec<DatabaseSpec>> {
        let mut specs: Vec<DatabaseSpec> = Vec::new();

        for name in &self.databases {
            if name.is_empty() {
                return Err(anyhow!("--db needs a database name"));
            }
            declare(&mut specs, name, self.reference);
        }
        for load in &self.loads {
            let (name, file_spec) = load
                .split_once(':')
                .filter(|(name, file)| !name.is_empty() && !file.is_empty())
                .ok_or_else(|| anyhow!("invalid --load '{}': expected NAME:[table=]file.csv", load))?;
            declare(&mut specs, name, self.reference).add_table(file_spec);
        }

        Ok(specs)
    }

    /// Variables from `--var`
    pub fn env(&self) -> Result<Env> {
        let mut env = Env::new();
        for var in &self.vars {
            let (name, value) = var
                .split_once('=')
                .filter(|(name, _)| !name.is_empty())
                .ok_or_else(|| anyhow!("invalid --var '{}': expected NAME=VALUE", var))?;
            env.set_path(name, EnvValue::parse_token(value));
        }
        Ok(env)
    }
}

/// Find a declared database, declaring it on first mention
fn declare<'a>(specs: &'a mut Vec<DatabaseSpec>, name: &str, reference: bool) -> &'a mut DatabaseSpec {
    let index = match specs.iter().position(|spec| spec.name() == name) {
        Some(index) => index,
        None => {
            specs.push(DatabaseSpec::new(name).with_reference(reference));
            specs.len() - 1
        }
    };
    &mut specs[index]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> SqidemArgs {
        let mut argv = vec!["sqidem"];
        argv.extend_from_slice(extra);
        SqidemArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let parsed = args(&[]);
        assert!(parsed.input.is_none());
        assert_eq!(parsed.factory, FactoryKind::Memory);
        assert_eq!(parsed.handler, HandlerKind::Core);
        assert_eq!(parsed.format, OutputFormat::Csv);
        assert_eq!(parsed.run_config().stack_limit(), DEFAULT_STACK_LIMIT);
    }

    #[test]
    fn test_database_specs_merge_db_and_load() {
        let parsed = args(&[
            "--db",
            "hr",
            "--load",
            "scott:emp=emp.csv",
            "--load",
            "hr:dept.csv",
            "--reference",
        ]);
        let specs = parsed.database_specs().unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name(), "hr");
        assert_eq!(specs[0].tables(), &["dept.csv".to_string()]);
        assert_eq!(specs[1].name(), "scott");
        assert_eq!(specs[1].tables(), &["emp=emp.csv".to_string()]);
        assert!(specs[1].reference());
    }

    #[test]
    fn test_bad_load_and_var() {
        assert!(args(&["--load", "nodb"]).database_specs().is_err());
        assert!(args(&["--var", "novalue"]).env().is_err());
    }

    #[test]
    fn test_vars_build_nested_env() {
        let env = args(&["--var", "db.views=true", "--var", "flag=false"])
            .env()
            .unwrap();
        assert!(env.resolve("db.views"));
        assert!(!env.resolve("flag"));
    }

    #[test]
    fn test_unknown_values_are_rejected() {
        assert!(SqidemArgs::try_parse_from(["sqidem", "--format", "xml"]).is_err());
        assert!(SqidemArgs::try_parse_from(["sqidem", "--factory", "jdbc"]).is_err());
        let parsed = args(&["--factory", "none", "--handler", "count", "-f", "psql"]);
        assert_eq!(parsed.factory, FactoryKind::Unsupported);
        assert_eq!(parsed.handler, HandlerKind::Count);
        assert_eq!(parsed.format, OutputFormat::Psql);
    }
}
