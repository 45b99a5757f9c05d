
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VartabError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("No such variable '{name}' in {owner}")]
    NoSuchVariable { name: String, owner: String },
    #[error("No such attribute '{name}' on {owner}")]
    NoSuchAttribute { name: String, owner: String },
    #[error("No such category '{name}' in variable {owner}")]
    NoSuchCategory { name: String, owner: String },
    #[error("No such value table '{name}' in {owner}")]
    NoSuchValueTable { name: String, owner: String },
    #[error("No such datasource '{0}'")]
    NoSuchDatasource(String),
    #[error("No such value set for entity {entity} in {table}")]
    NoSuchValueSet { entity: String, table: String },
    #[error("Compile error in script '{script}' at line {line}: {message}\n  {source_line}")]
    Compile { script: String, line: usize, source_line: String, message: String },
    #[error("Circular dependency on variable {reference} (cycle: {})", path.join(" -> "))]
    CircularDependency { reference: String, path: Vec<String> },
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),
    #[error("Cannot parse '{text}' as {value_type}")]
    Parse { text: String, value_type: &'static str },
    #[error("Null values cannot be compared")]
    NullComparison,
    #[error("Invalid join: {0}")]
    InvalidJoin(String),
    #[error("Evaluation error: {0}")]
    Evaluation(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, VartabError>;

// Helper conversions
impl From<config::ConfigError> for VartabError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
impl From<serde_json::Error> for VartabError {
    fn from(e: serde_json::Error) -> Self { Self::Serialization(e.to_string()) }
}
impl<T> From<std::sync::PoisonError<T>> for VartabError {
    fn from(e: std::sync::PoisonError<T>) -> Self { Self::Lock(e.to_string()) }
}
