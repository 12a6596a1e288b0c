use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("YAML serialization failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Identity error: {0}")]
    Identity(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Page not in cache: {0}")]
    CacheMiss(String),

    #[error("Parse error: {message}")]
    Parse { message: String },
}

pub type Result<T> = std::result::Result<T, ScraperError>;
