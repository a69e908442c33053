pub mod cli;
pub mod errors;
pub mod loader;
pub mod resource_locator;

use maplabel_config::{AppConfig, SinkKind};
use maplabel_engine::session::LabelingSettings;
use maplabel_io::{FormatVersion, MapFile, SinkMode};
use tracing::info;

use cli::{DemoOptions, DemoReport};
use errors::FrontendError;

/// 运行 CLI 演示：加载地图、放置注记并按需写出结果。
pub fn run_cli_demo(config: &AppConfig, options: &DemoOptions) -> Result<DemoReport, FrontendError> {
    info!("启动 CLI 演示前端");
    cli::run_demo(config, options)
}

/// 把配置中的标注与索引参数转换为引擎设置。
pub fn settings_from_config(config: &AppConfig) -> LabelingSettings {
    let labeling = &config.labeling;
    LabelingSettings {
        thick_line_threshold: labeling.thick_line_threshold,
        overlap_buffer: labeling.overlap_buffer,
        proximity_buffer: labeling.proximity_buffer,
        max_leader_iterations: labeling.max_leader_iterations,
        tolerance: labeling.tolerance,
        index_kind: config.index.kind.clone(),
        cell_size: config.index.cell_size,
    }
}

/// 按配置的写出版本与输出方式构建地图文件读写器。
pub fn map_file_from_config(config: &AppConfig) -> Result<MapFile, FrontendError> {
    let text = &config.serialization.write_version;
    let version = FormatVersion::parse(text).map_err(|_| FrontendError::InvalidSetting {
        key: "serialization.write_version",
        value: text.clone(),
    })?;
    if !FormatVersion::SUPPORTED_WRITE.contains(&version) {
        return Err(FrontendError::InvalidSetting {
            key: "serialization.write_version",
            value: text.clone(),
        });
    }
    let sink = match config.serialization.sink {
        SinkKind::Seekable => SinkMode::Seekable,
        SinkKind::Buffered => SinkMode::Buffered,
    };
    Ok(MapFile::new(version).with_sink(sink))
}
