//! Binary error types with miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use fieldgate_core::CoreError;

/// Exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const CONFIG: i32 = 3;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("Configuration is invalid")]
    #[diagnostic(
        code(fieldgate::config),
        help(
            "Check the config file ({path}).\n\
             Run: fieldgate check"
        )
    )]
    Config {
        path: String,
        #[source]
        source: fieldgate_config::ConfigError,
    },

    #[error("No controllers configured")]
    #[diagnostic(
        code(fieldgate::empty_fleet),
        help(
            "Add at least one [[controllers]] entry to the config file,\n\
             or start with: fieldgate run --demo"
        )
    )]
    EmptyFleet,

    #[error(transparent)]
    #[diagnostic(code(fieldgate::gateway))]
    Gateway(#[from] CoreError),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } | Self::EmptyFleet => exit_code::CONFIG,
            Self::Gateway(_) => exit_code::GENERAL,
        }
    }
}
