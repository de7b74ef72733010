//! sqidem - a script-driven SQL test runner
//!
//! Reads a `.iq` script, runs its SQL against the configured databases and
//! writes the script back with the actual results in place of the expected
//! ones. A script whose expectations still hold comes out byte-for-byte
//! unchanged, so `diff` against the input is the test verdict.
//!
//! # Program Flow
//!
//! 1. Parse command-line arguments
//! 2. Set up logging to stderr
//! 3. Build the connection factory and the command handler
//! 4. Read the whole script, then open the output
//! 5. Execute the script, writing the reconciled script to the output

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::process;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use sqidem::cli::{FactoryKind, HandlerKind, SqidemArgs};
use sqidem::connection::{ChainingConnectionFactory, ConnectionFactory, UnsupportedConnectionFactory};
use sqidem::engine::Engine;
use sqidem::handlers::CountCommandHandler;
use sqidem::memdb::MemoryConnectionFactory;

/// Log to stderr; stdout may carry the rewritten script
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn build_factory(args: &SqidemArgs) -> Result<Box<dyn ConnectionFactory>> {
    match args.factory {
        FactoryKind::Memory => {
            let mut memory = MemoryConnectionFactory::new();
            for spec in args.database_specs()? {
                debug!("Declared database '{}' ({} files)", spec.name(), spec.tables().len());
                memory.add_database(spec);
            }
            Ok(Box::new(ChainingConnectionFactory::new(vec![
                Box::new(memory),
                Box::new(UnsupportedConnectionFactory),
            ])))
        }
        FactoryKind::Unsupported => Ok(Box::new(UnsupportedConnectionFactory)),
    }
}

fn main() -> Result<()> {
    // Step 1: Parse command-line arguments
    // Help and version exit 0; any other argument error exits 1
    let args = match SqidemArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            process::exit(code);
        }
    };

    // Step 2: Logging
    let config = args.run_config();
    init_logging(config.verbose());
    debug!("Arguments: {:?}", args);

    // Step 3: Engine with its factory, handler and variables
    let mut engine = Engine::new(config)
        .with_connection_factory(build_factory(&args)?)
        .with_env(args.env()?);
    if args.handler == HandlerKind::Count {
        engine = engine.with_handler(Box::new(CountCommandHandler));
    }

    // Step 4: Read the script in full before the output is created, so the
    // output may be the input file itself
    let script = match &args.input {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read script: {}", path.display()))?,
        None => {
            let mut script = String::new();
            io::stdin()
                .read_to_string(&mut script)
                .context("Failed to read script from stdin")?;
            script
        }
    };

    let output: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            File::create(path)
                .with_context(|| format!("Failed to create output: {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    let mut output = BufWriter::new(output);

    // Step 5: Run the script
    let outcome = engine.execute(script.as_bytes(), &mut output);
    output.flush().context("Failed to flush output")?;
    outcome.context("Script execution failed")?;

    info!("Script finished");
    Ok(())
}
