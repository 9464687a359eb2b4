//! CLI error types.

use std::fmt;

use error_stack::Report;
use spotx_adapter::AdapterError;

#[derive(Debug)]
pub enum CliError {
    /// Settings file error
    Config(String),
    /// Fixture file could not be parsed
    Input(String),
    /// Adapter operation failed
    Adapter(String),
    /// IO error
    Io(std::io::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Input(msg) => write!(f, "Input error: {}", msg),
            CliError::Adapter(msg) => write!(f, "Adapter error: {}", msg),
            CliError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io(err)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Input(err.to_string())
    }
}

impl From<Report<AdapterError>> for CliError {
    fn from(report: Report<AdapterError>) -> Self {
        match report.current_context() {
            AdapterError::Configuration { .. } => CliError::Config(format!("{report:?}")),
            _ => CliError::Adapter(format!("{report:?}")),
        }
    }
}
