use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("mapping resource is not valid yaml: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("settings file is not valid toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
