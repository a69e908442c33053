use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub labeling: LabelingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub serialization: SerializationConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 自动发现配置文件：优先读取环境变量 `MAPLABEL_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os("MAPLABEL_CONFIG") {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 注记放置与引线避让的阈值。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LabelingConfig {
    /// 线宽超过该值时按描边盒而非中心线检测压盖。
    pub thick_line_threshold: f32,
    pub overlap_buffer: f32,
    pub proximity_buffer: f32,
    pub max_leader_iterations: usize,
    pub tolerance: f32,
}

impl Default for LabelingConfig {
    fn default() -> Self {
        Self {
            thick_line_threshold: 1.0,
            overlap_buffer: 0.0,
            proximity_buffer: 0.0,
            max_leader_iterations: 16,
            tolerance: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// 空间索引实现的标识，如 `grid`、`linear`。
    pub kind: String,
    pub cell_size: f32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            kind: "grid".to_string(),
            cell_size: 16.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Seekable,
    Buffered,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerializationConfig {
    /// 写文件使用的格式版本，如 `"2.3"`。
    pub write_version: String,
    pub sink: SinkKind,
}

impl Default for SerializationConfig {
    fn default() -> Self {
        Self {
            write_version: "2.3".to_string(),
            sink: SinkKind::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceConfig {
    /// 查找相对路径地图文件时依次尝试的目录。
    #[serde(default)]
    pub map_roots: Vec<PathBuf>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}
