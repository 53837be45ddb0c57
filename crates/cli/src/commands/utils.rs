use fallback_core::FallbackError;
use std::fmt;

#[derive(Debug)]
pub enum CliError {
    Config(String),
    Io(String),
    Scenario(String),
    Query(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
            Self::Scenario(msg) => write!(f, "Scenario error: {msg}"),
            Self::Query(msg) => write!(f, "Query failed: {msg}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<std::io::Error> for CliError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<toml::de::Error> for CliError {
    fn from(error: toml::de::Error) -> Self {
        Self::Scenario(error.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(error: serde_json::Error) -> Self {
        Self::Query(error.to_string())
    }
}

impl From<FallbackError> for CliError {
    fn from(error: FallbackError) -> Self {
        Self::Query(error.to_string())
    }
}

pub type CliResult<T> = Result<T, CliError>;

pub fn print_success(message: &str) {
    println!("[SUCCESS] {message}");
}

pub fn print_error(message: &str) {
    eprintln!("[ERROR] {message}");
}

pub fn print_info(message: &str) {
    println!("[INFO] {message}");
}
