use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use maplabel_config::AppConfig;
use maplabel_core::geometry::{Point, Polygon, Polyline, Rectangle, UprightRectangle};
use maplabel_core::model::{
    Color, FeatureStyle, LabelId, Leader, Map, PlacementRule, Shape, StringInterner, Stroke, TextPart,
};
use maplabel_io::{MapFile, MapLoader};
use tracing::{info, warn};

use crate::errors::FrontendError;
use crate::resource_locator::MapLocator;

const SAMPLE_MAP_ENV: &str = "MAPLABEL_SAMPLE_MAP";

/// 地图来源，便于前端呈现加载信息。
#[derive(Debug, Clone, PartialEq)]
pub enum MapSource {
    File(PathBuf),
    Demo,
}

/// 内置示例中值得关注的注记。
#[derive(Debug, Clone, Copy)]
pub struct DemoLabels {
    pub clear: LabelId,
    /// 压在道路上的注记。
    pub blocked: LabelId,
    /// 引线穿过道路、需要避让的注记。
    pub leader: LabelId,
    pub lake: LabelId,
}

#[derive(Debug)]
pub struct LoadedMap {
    pub map: Map,
    pub source: MapSource,
    pub demo_labels: Option<DemoLabels>,
}

/// 加载地图：显式路径优先，其次是环境变量 `MAPLABEL_SAMPLE_MAP`，
/// 都没有时构建内置示例。
///
/// 显式路径找不到或读取失败时返回错误；环境变量指定的地图失败时回退到示例。
pub fn load_map(config: &AppConfig, explicit: Option<&Path>) -> Result<LoadedMap, FrontendError> {
    let locator = MapLocator::from_config(config);
    if let Some(path) = explicit {
        let resolved = locator
            .resolve(path)
            .ok_or_else(|| FrontendError::MapNotFound(path.display().to_string()))?;
        let map = MapFile::default().load(&resolved)?;
        return Ok(LoadedMap {
            map,
            source: MapSource::File(resolved),
            demo_labels: None,
        });
    }

    if let Some(value) = env::var_os(SAMPLE_MAP_ENV) {
        let requested = PathBuf::from(value);
        match locator.resolve(&requested) {
            Some(path) => match MapFile::default().load(&path) {
                Ok(map) => {
                    info!(path = %path.display(), "从地图文件加载成功");
                    return Ok(LoadedMap {
                        map,
                        source: MapSource::File(path),
                        demo_labels: None,
                    });
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "加载地图失败，回退到内置示例");
                }
            },
            None => warn!(path = %requested.display(), "未找到示例地图，回退到内置示例"),
        }
    }

    let (map, demo_labels) = demo_map();
    Ok(LoadedMap {
        map,
        source: MapSource::Demo,
        demo_labels: Some(demo_labels),
    })
}

/// 内置示例：道路、可压盖的河流、不透明湖面、城镇点与若干注记。
pub fn demo_map() -> (Map, DemoLabels) {
    let mut interner = StringInterner::new();
    let mut map = Map::new(
        "demo",
        UprightRectangle::from_coords(-20.0, -20.0, 120.0, 80.0),
    );

    map.styles.insert(
        "roads".into(),
        FeatureStyle::Line {
            stroke: Stroke {
                color: Color::rgb(250, 210, 90),
                width: 2.0,
            },
            casing: Some(Stroke {
                color: Color::rgb(90, 90, 90),
                width: 2.6,
            }),
            dash: Vec::new(),
        },
    );
    map.styles.insert(
        "rivers".into(),
        FeatureStyle::Line {
            stroke: Stroke {
                color: Color::rgb(90, 150, 230),
                width: 0.6,
            },
            casing: None,
            dash: Vec::new(),
        },
    );
    map.styles.insert(
        "towns".into(),
        FeatureStyle::Point {
            symbol: "dot".into(),
            size: 2.0,
            color: Color::BLACK,
            halo: 0.5,
        },
    );
    map.styles.insert(
        "lakes".into(),
        FeatureStyle::Area {
            fill: Color::rgb(150, 190, 240),
            outline: None,
            opaque: true,
        },
    );

    let mut rule = PlacementRule::new("town-names");
    rule.overlap_buffer = 0.25;
    rule.proximity_buffer = 0.5;
    rule.allow_leader = true;
    rule.allowed_crossing_classes.push(interner.intern("river"));
    map.placement_rules.push(rule);

    let road = interner.intern("road");
    map.add_feature(
        "roads",
        Arc::clone(&road),
        "Coast Road",
        polyline(&[(0.0, 0.0), (50.0, 0.0), (100.0, 10.0)]),
    );
    map.add_feature(
        "roads",
        Arc::clone(&road),
        "Hill Road",
        polyline(&[(50.0, 0.0), (55.0, 40.0), (60.0, 70.0)]),
    );
    map.add_feature(
        "roads",
        road,
        "Ridge Lane",
        polyline(&[(15.0, 45.0), (15.0, 55.0)]),
    );
    map.add_feature(
        "rivers",
        interner.intern("river"),
        "Mill Brook",
        polyline(&[(-10.0, 30.0), (20.0, 35.0), (45.0, 30.0)]),
    );
    let lake = Polygon::new(vec![
        Point::new(70.0, 40.0),
        Point::new(70.0, 60.0),
        Point::new(95.0, 60.0),
        Point::new(95.0, 40.0),
    ])
    .ok()
    .map(Shape::Polygon);
    let lake = map.add_feature("lakes", interner.intern("lake"), "Blue Lake", lake);

    let town = interner.intern("town");
    let harbour = map.add_feature(
        "towns",
        Arc::clone(&town),
        "Harbour",
        Some(Shape::Point(Point::new(20.0, 10.0))),
    );
    let crossing = map.add_feature(
        "towns",
        Arc::clone(&town),
        "Crossing",
        Some(Shape::Point(Point::new(50.0, 3.0))),
    );
    let ridge = map.add_feature(
        "towns",
        town,
        "Ridge",
        Some(Shape::Point(Point::new(10.0, 50.0))),
    );

    let clear = map.add_label(
        harbour,
        "town-names",
        vec![text("Harbour", 22.0, 12.0, 16.0, 4.0)],
    );
    // 横跨河流但不压道路。
    let _brook_side = map.add_label(
        harbour,
        "town-names",
        vec![text("Brook", 10.0, 28.0, 14.0, 4.0)],
    );
    let blocked = map.add_label(
        crossing,
        "town-names",
        vec![text("Crossing", 40.0, -2.0, 18.0, 4.0)],
    );
    let leader = map.add_label(
        ridge,
        "town-names",
        vec![text("Ridge", 22.0, 48.0, 14.0, 4.0)],
    );
    if let Some(label) = map.label_mut(leader) {
        label.leader = Some(Leader {
            anchor: Point::new(10.0, 50.0),
            end: Point::new(22.0, 50.0),
            width: 0.4,
        });
    }
    let lake_label = map.add_label(lake, "", vec![text("Blue Lake", 75.0, 48.0, 14.0, 4.0)]);

    (
        map,
        DemoLabels {
            clear,
            blocked,
            leader,
            lake: lake_label,
        },
    )
}

fn polyline(points: &[(f32, f32)]) -> Option<Shape> {
    let vertices = points.iter().map(|&(x, y)| Point::new(x, y)).collect();
    Polyline::new(vertices).ok().map(Shape::Polyline)
}

fn text(content: &str, x: f32, y: f32, width: f32, height: f32) -> TextPart {
    TextPart {
        text: content.to_string(),
        frame: Rectangle::from_upright(&UprightRectangle::from_coords(x, y, x + width, y + height)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_map_has_expected_layers() {
        let (map, labels) = demo_map();
        let names: Vec<_> = map.layers().iter().map(|layer| layer.name.as_str()).collect();
        assert_eq!(names, vec!["roads", "rivers", "lakes", "towns"]);
        assert_eq!(map.labels().len(), 5);
        assert!(map.label(labels.leader).unwrap().leader.is_some());
        assert!(map.label(labels.blocked).is_some());
        assert!(map.style("roads").is_some());
    }

    #[test]
    fn explicit_missing_map_is_an_error() {
        let config = AppConfig::default();
        let err = load_map(&config, Some(Path::new("/definitely/missing/map.bin"))).unwrap_err();
        assert!(matches!(err, FrontendError::MapNotFound(_)));
    }

    #[test]
    fn explicit_map_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.bin");
        let (map, _) = demo_map();
        maplabel_io::MapSaver::save(&MapFile::default(), &map, &path).unwrap();

        let loaded = load_map(&AppConfig::default(), Some(&path)).unwrap();
        assert!(matches!(loaded.source, MapSource::File(_)));
        assert!(loaded.demo_labels.is_none());
        assert_eq!(loaded.map.labels().len(), map.labels().len());
    }
}
