//! Configuration module for sqidem
//!
//! This module provides the settings of a script run. They are fixed before
//! the run starts and passed down to the engine rather than kept in global
//! state.

use crate::format::OutputFormat;

/// Default character budget of an error trace written into the output
pub const DEFAULT_STACK_LIMIT: usize = 16384;

/// Run configuration
///
/// This struct encapsulates the settings that stay constant for a whole run.
/// It is created at startup and handed to the [`crate::engine::Engine`].
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Whether to show verbose diagnostics
    verbose: bool,

    /// Maximum number of characters of an error trace before it is cut
    stack_limit: usize,

    /// Output format used until a script sets `outputformat`
    default_format: OutputFormat,
}

impl RunConfig {
    /// Create a new run configuration
    ///
    /// # Arguments
    /// * `verbose` - Whether to show verbose diagnostics
    /// * `stack_limit` - Character budget of error traces
    /// * `default_format` - Output format in effect at the start of a script
    pub fn new(verbose: bool, stack_limit: usize, default_format: OutputFormat) -> Self {
        Self {
            verbose,
            stack_limit,
            default_format,
        }
    }

    /// Get the verbose flag
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Get the error trace character budget
    pub fn stack_limit(&self) -> usize {
        self.stack_limit
    }

    /// Get the initial output format
    pub fn default_format(&self) -> OutputFormat {
        self.default_format
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig::new(false, DEFAULT_STACK_LIMIT, OutputFormat::Csv)
    }
}
