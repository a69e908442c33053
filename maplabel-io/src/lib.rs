//! 地图对象图的版本化二进制持久化。
//!
//! 读写两侧协议对称：[`Serializer`] 写章节、容器、列表与标量，
//! [`Deserializer`] 以同样的结构读回，并能跳过看不懂的新块。

pub mod deserializer;
pub mod format;
pub mod map_file;
pub mod persist;
pub mod serializer;

use std::path::PathBuf;

use maplabel_core::errors::GeometryError;
use thiserror::Error;

pub use deserializer::{BinaryDeserializer, Deserializer};
pub use format::{
    Bookmark, ComplexType, ComplexTypeHeader, ContainerHeader, ContainerType, FormatVersion,
    ScalarValue,
};
pub use map_file::{
    ClassEliminator, FeatureReadingEliminator, LayerEntry, MapCatalog, MapFile, MapLoader,
    MapSaver, SinkMode, with_map_extension,
};
pub use persist::{FeatureHeader, Persist, ReadContext};
pub use serializer::{BinarySerializer, Serializer};

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("write failed: {source}")]
    Write {
        #[source]
        source: std::io::Error,
    },
    #[error("read failed: {source}")]
    Read {
        #[source]
        source: std::io::Error,
    },
    #[error("serialization failed: {0}")]
    SerializationFailed(String),
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),
    #[error("unsupported format version {0}")]
    VersionInvalid(f32),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("invalid bookmark: {0}")]
    InvalidBookmark(String),
    #[error("unsupported file extension {0:?}")]
    UnsupportedExtension(PathBuf),
    #[error("failed to open file {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

impl SerializationError {
    pub(crate) fn write(source: std::io::Error) -> Self {
        SerializationError::Write { source }
    }

    /// 读到文件尾视为数据截断，其余为底层 I/O 失败。
    pub(crate) fn read(source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::UnexpectedEof {
            SerializationError::DeserializationFailed("unexpected end of file".into())
        } else {
            SerializationError::Read { source }
        }
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        SerializationError::DeserializationFailed(message.into())
    }
}

pub type Result<T, E = SerializationError> = std::result::Result<T, E>;
