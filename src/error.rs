use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueryError>;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Unsupported expression: {0}")]
    UnsupportedExpression(String),

    #[error("Ambiguous reference: {0}")]
    AmbiguousReference(String),

    #[error("Table not registered: {0}")]
    UnknownTable(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("IN clause over an empty collection: {0}")]
    EmptyInClause(String),

    #[error("Limit {requested} exceeds the provider maximum of {max}")]
    LimitExceeded { requested: u64, max: u64 },

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Invalid literal: {0}")]
    InvalidLiteral(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Materialize error: {0}")]
    Materialize(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
