use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logger sink error: {0}")]
    Sink(String),
}

pub type Result<T> = std::result::Result<T, Error>;
