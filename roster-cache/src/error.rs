use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Mirror quota exceeded: {needed} bytes needed, limit {limit}")]
    QuotaExceeded { needed: usize, limit: usize },

    #[error("Mirror IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mirror lock poisoned")]
    Poisoned,
}
