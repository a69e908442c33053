use std::path::PathBuf;

use maplabel_engine::errors::EngineError;
use maplabel_io::SerializationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error("invalid setting {key}: {value}")]
    InvalidSetting { key: &'static str, value: String },
    #[error("map file {0} not found")]
    MapNotFound(String),
    #[error("failed to prepare output directory {path:?}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
