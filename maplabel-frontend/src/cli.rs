use std::fs;
use std::path::{Path, PathBuf};

use maplabel_config::AppConfig;
use maplabel_core::geometry::Point;
use maplabel_core::model::Map;
use maplabel_engine::session::{FrameReport, LabelingSession};
use maplabel_io::{MapCatalog, MapSaver, with_map_extension};
use tracing::{info, warn};

use crate::errors::FrontendError;
use crate::loader::{DemoLabels, MapSource, load_map};
use crate::{map_file_from_config, settings_from_config};

/// 命令行传入的演示参数。
#[derive(Debug, Clone, Default)]
pub struct DemoOptions {
    /// 要加载的地图；为空时依次尝试环境变量与内置示例。
    pub map: Option<PathBuf>,
    /// 放置结果的输出路径，优先于配置中的输出目录。
    pub out: Option<PathBuf>,
}

/// 一次演示运行的结果。
#[derive(Debug, Clone)]
pub struct DemoReport {
    pub source: MapSource,
    pub frame: FrameReport,
    pub saved: Option<PathBuf>,
    /// 重新打开输出文件后目录中列出的图层。
    pub saved_layers: Vec<String>,
}

/// 简易 CLI 演示：加载地图，跑一帧标注，打印冲突与引线情况，并按需写出结果。
pub fn run_demo(config: &AppConfig, options: &DemoOptions) -> Result<DemoReport, FrontendError> {
    let loaded = load_map(config, options.map.as_deref())?;
    let mut session = LabelingSession::new(loaded.map, settings_from_config(config))?;
    let frame = session.place_labels()?;

    println!("地图标注 CLI 演示");
    match &loaded.source {
        MapSource::File(path) => println!("已从文件加载地图：{}", path.display()),
        MapSource::Demo => {
            println!("已构建内置示例地图");
            if let Some(labels) = &loaded.demo_labels {
                print_demo_labels(labels);
            }
        }
    }
    print_map(session.map());
    print_frame(&frame);

    let target = output_path(config, options, session.map())?;
    let (saved, saved_layers) = match target {
        Some(path) => {
            let layers = save_and_catalog(config, session.map(), &path)?;
            println!("已写出 {}，包含图层：{}", path.display(), layers.join(", "));
            (Some(path), layers)
        }
        None => (None, Vec::new()),
    };

    Ok(DemoReport {
        source: loaded.source,
        frame,
        saved,
        saved_layers,
    })
}

fn output_path(
    config: &AppConfig,
    options: &DemoOptions,
    map: &Map,
) -> Result<Option<PathBuf>, FrontendError> {
    if let Some(out) = &options.out {
        return Ok(Some(with_map_extension(out.clone())));
    }
    let Some(dir) = &config.resources.output_dir else {
        return Ok(None);
    };
    fs::create_dir_all(dir).map_err(|source| FrontendError::OutputDir {
        path: dir.clone(),
        source,
    })?;
    Ok(Some(with_map_extension(dir.join(&map.name))))
}

/// 写出地图后用目录重新打开，只读取图层书签以核对写出结果。
fn save_and_catalog(
    config: &AppConfig,
    map: &Map,
    path: &Path,
) -> Result<Vec<String>, FrontendError> {
    let file = map_file_from_config(config)?;
    file.save(map, path)?;
    let catalog = MapCatalog::open_path(path)?;
    if catalog.version() != file.version() {
        warn!(
            written = %file.version(),
            read = %catalog.version(),
            "写出与读回的格式版本不一致"
        );
    }
    let layers: Vec<String> = catalog.layer_names().map(str::to_string).collect();
    info!(path = %path.display(), layers = layers.len(), "输出文件目录检查完成");
    Ok(layers)
}

fn print_demo_labels(labels: &DemoLabels) {
    println!("  - 无冲突注记 ID = {}", labels.clear.0);
    println!("  - 压盖道路的注记 ID = {}", labels.blocked.0);
    println!("  - 带引线的注记 ID = {}", labels.leader.0);
    println!("  - 湖面注记 ID = {}", labels.lake.0);
}

fn print_map(map: &Map) {
    println!("当前地图图层：");
    for layer in map.layers() {
        println!(
            "  - {} (样式: {}, 要素: {}, 可见: {})",
            layer.name,
            layer.style,
            layer.features.len(),
            layer.visible
        );
    }

    println!("当前地图注记：");
    for label in map.labels() {
        let text: Vec<&str> = label.text_parts.iter().map(|part| part.text.as_str()).collect();
        let rule = if label.rule.is_empty() {
            "<默认>"
        } else {
            label.rule.as_str()
        };
        match &label.leader {
            Some(leader) => println!(
                "  - 注记 #{} \"{}\", 规则={}, 引线 {} -> {}",
                label.id.0,
                text.join(" "),
                rule,
                format_point(leader.anchor),
                format_point(leader.end)
            ),
            None => println!("  - 注记 #{} \"{}\", 规则={}", label.id.0, text.join(" "), rule),
        }
    }
}

fn print_frame(frame: &FrameReport) {
    println!(
        "检测注记 {} 个：无冲突 {}，有冲突 {}",
        frame.labels_tested, frame.clear, frame.conflicted
    );
    println!(
        "引线：成功 {}，无解 {}，超出迭代 {}",
        frame.leaders_placed, frame.leaders_impossible, frame.leaders_exhausted
    );
}

fn format_point(point: Point) -> String {
    format!("({:.2}, {:.2})", point.x(), point.y())
}
