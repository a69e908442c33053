use std::borrow::Cow;

use maplabel_core::geometry::UprightRectangle;
use maplabel_core::model::{Label, LabelId, Leader, Map, PlacementRule};
use tracing::{debug, info};

use crate::errors::EngineError;
use crate::index::{index_map, IndexEntry, IndexOptions, SpatialIndex, SpatialIndexFactory};
use crate::leader::{LeaderRequest, LeaderRoute, LeaderRouter};
use crate::obstacle::{DetectionArgs, ObstacleDetector, ObstacleOverlapSummary};

/// 标注流程的可调参数，通常由应用配置转换而来。
#[derive(Debug, Clone, PartialEq)]
pub struct LabelingSettings {
    pub thick_line_threshold: f32,
    /// 注记未指定放置规则时使用的重叠缓冲。
    pub overlap_buffer: f32,
    pub proximity_buffer: f32,
    pub max_leader_iterations: usize,
    pub tolerance: f32,
    pub index_kind: String,
    pub cell_size: f32,
}

impl Default for LabelingSettings {
    fn default() -> Self {
        Self {
            thick_line_threshold: 1.0,
            overlap_buffer: 0.0,
            proximity_buffer: 0.0,
            max_leader_iterations: 16,
            tolerance: 1e-3,
            index_kind: "grid".to_string(),
            cell_size: 16.0,
        }
    }
}

impl LabelingSettings {
    fn router(&self) -> LeaderRouter {
        LeaderRouter {
            tolerance: self.tolerance,
            max_iterations: self.max_leader_iterations,
            thick_line_threshold: self.thick_line_threshold,
        }
    }

    /// 未命名规则时的默认规则：使用设置中的缓冲并允许引线。
    pub fn default_rule(&self) -> PlacementRule {
        PlacementRule {
            overlap_buffer: self.overlap_buffer,
            proximity_buffer: self.proximity_buffer,
            allow_leader: true,
            ..PlacementRule::new("")
        }
    }
}

fn resolve_rule<'a>(
    map: &'a Map,
    settings: &LabelingSettings,
    name: &str,
) -> Result<Cow<'a, PlacementRule>, EngineError> {
    if name.is_empty() {
        return Ok(Cow::Owned(settings.default_rule()));
    }
    map.rule(name)
        .map(Cow::Borrowed)
        .ok_or_else(|| EngineError::RuleNotFound(name.to_string()))
}

/// 查找注记并确认其要素仍在地图中。
fn attached_label(map: &Map, id: LabelId) -> Result<&Label, EngineError> {
    let label = map.label(id).ok_or(EngineError::LabelNotFound(id.0))?;
    if map.feature(label.feature).is_none() {
        return Err(EngineError::FeatureNotFound(label.feature.0));
    }
    Ok(label)
}

/// 一帧标注的统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub labels_tested: usize,
    pub clear: usize,
    pub conflicted: usize,
    pub leaders_placed: usize,
    pub leaders_impossible: usize,
    pub leaders_exhausted: usize,
}

/// 标注会话：持有地图、当前空间索引与障碍检测器，按帧重建索引并检测注记。
pub struct LabelingSession {
    map: Map,
    factory: SpatialIndexFactory,
    index: Box<dyn SpatialIndex>,
    detector: ObstacleDetector,
    settings: LabelingSettings,
}

impl std::fmt::Debug for LabelingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelingSession")
            .field("map", &self.map.name)
            .field("index", &self.index.identity())
            .field("entries", &self.index.len())
            .field("settings", &self.settings)
            .finish()
    }
}

impl LabelingSession {
    pub fn new(map: Map, settings: LabelingSettings) -> Result<Self, EngineError> {
        Self::with_factory(map, settings, SpatialIndexFactory::new())
    }

    /// 使用自定义索引注册表创建会话。
    pub fn with_factory(
        map: Map,
        settings: LabelingSettings,
        factory: SpatialIndexFactory,
    ) -> Result<Self, EngineError> {
        let index = factory.create(
            &settings.index_kind,
            IndexOptions {
                cell_size: settings.cell_size,
                extent: Some(map.extent),
            },
        )?;
        Ok(Self {
            map,
            factory,
            index,
            detector: ObstacleDetector::new(),
            settings,
        })
    }

    #[inline]
    pub fn map(&self) -> &Map {
        &self.map
    }

    #[inline]
    pub fn map_mut(&mut self) -> &mut Map {
        &mut self.map
    }

    pub fn into_map(self) -> Map {
        self.map
    }

    #[inline]
    pub fn settings(&self) -> &LabelingSettings {
        &self.settings
    }

    #[inline]
    pub fn index(&self) -> &dyn SpatialIndex {
        self.index.as_ref()
    }

    /// 按给定范围重建空间索引（可见图层要素与已放置注记）。
    pub fn rebuild_index(&mut self, extent: UprightRectangle) -> Result<usize, EngineError> {
        self.index = self.factory.create(
            &self.settings.index_kind,
            IndexOptions {
                cell_size: self.settings.cell_size,
                extent: Some(extent),
            },
        )?;
        self.detector.reset();
        index_map(&self.map, self.index.as_mut())
    }

    /// 检测注记各部件（按规则的重叠缓冲外扩）与其他对象的重叠，忽略注记自身及其要素。
    pub fn test_label(&mut self, id: LabelId) -> Result<ObstacleOverlapSummary, EngineError> {
        let label = attached_label(&self.map, id)?;
        let rule = resolve_rule(&self.map, &self.settings, &label.rule)?;
        let frames = label
            .text_parts
            .iter()
            .map(|part| part.frame)
            .chain(label.symbol_components.iter().map(|symbol| symbol.frame));

        let mut summary = ObstacleOverlapSummary::default();
        for frame in frames {
            let args = DetectionArgs {
                query: frame.buffered(rule.overlap_buffer),
                thick_line_threshold: self.settings.thick_line_threshold,
                ignore_label: Some(label.id),
                ignore_feature: Some(label.feature),
                tolerance: self.settings.tolerance,
            };
            summary.merge(self.detector.detect(self.index.as_ref(), &args)?);
        }
        Ok(summary)
    }

    /// 为带引线的注记寻找不冲突的引线方向，成功时写回注记。
    /// 注记没有引线或规则不允许引线时返回 `None`。
    pub fn route_leader(&mut self, id: LabelId) -> Result<Option<LeaderRoute>, EngineError> {
        let label = attached_label(&self.map, id)?;
        let Some(leader) = label.leader else {
            return Ok(None);
        };
        let route = {
            let rule = resolve_rule(&self.map, &self.settings, &label.rule)?;
            if !rule.allow_leader {
                return Ok(None);
            }
            let request = LeaderRequest {
                label: label.id,
                feature: label.feature,
                rule: &rule,
            };
            self.settings.router().route(
                &mut self.detector,
                self.index.as_ref(),
                &request,
                &leader,
            )?
        };
        if let LeaderRoute::Placed { leader: placed, .. } = route {
            if placed != leader {
                if let Some(label) = self.map.label_mut(id) {
                    label.leader = Some(placed);
                }
                self.reindex_leader(id, placed)?;
            }
        }
        Ok(Some(route))
    }

    /// 引线改道后同步索引，同一帧后续注记按新位置检测。
    fn reindex_leader(&mut self, id: LabelId, leader: Leader) -> Result<(), EngineError> {
        let entry = IndexEntry::Leader { label: id, leader };
        match self.index.leader_entry(id) {
            Some(existing) => self.index.replace(existing, entry),
            None => self.index.insert(entry).map(|_| ()),
        }
    }

    /// 重建索引后检测全部注记并为需要的注记布置引线。
    pub fn place_labels(&mut self) -> Result<FrameReport, EngineError> {
        let extent = self.map.extent;
        let entries = self.rebuild_index(extent)?;
        let ids: Vec<LabelId> = self.map.labels().iter().map(|label| label.id).collect();

        let mut report = FrameReport::default();
        for id in ids {
            let summary = self.test_label(id)?;
            report.labels_tested += 1;
            if summary.has_overlaps() {
                report.conflicted += 1;
                debug!(
                    label = id.0,
                    overlaps = summary.len(),
                    fully_obstructed = summary.fully_obstructed,
                    "注记存在冲突"
                );
            } else {
                report.clear += 1;
            }
            match self.route_leader(id)? {
                Some(LeaderRoute::Placed { .. }) => report.leaders_placed += 1,
                Some(LeaderRoute::Impossible) => report.leaders_impossible += 1,
                Some(LeaderRoute::Exhausted) => report.leaders_exhausted += 1,
                None => {}
            }
        }
        info!(
            map = %self.map.name,
            entries,
            tested = report.labels_tested,
            conflicted = report.conflicted,
            leaders = report.leaders_placed,
            "标注帧完成"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use maplabel_core::geometry::{Point, Polyline, Rectangle};
    use maplabel_core::model::{
        Color, FeatureId, FeatureStyle, Leader, PlacementRule, Shape, StringInterner, Stroke,
        TextPart,
    };

    use super::*;

    fn frame(x0: f32, y0: f32, x1: f32, y1: f32) -> Rectangle {
        Rectangle::from_upright(&UprightRectangle::from_coords(x0, y0, x1, y1))
    }

    fn demo_map() -> (Map, LabelId, LabelId) {
        let mut interner = StringInterner::new();
        let mut map = Map::new("session", UprightRectangle::from_coords(-50.0, -50.0, 50.0, 50.0));
        map.styles.insert(
            "roads".into(),
            FeatureStyle::Line {
                stroke: Stroke {
                    color: Color::BLACK,
                    width: 0.3,
                },
                casing: None,
                dash: Vec::new(),
            },
        );
        map.placement_rules.push(PlacementRule {
            overlap_buffer: 0.1,
            allow_leader: true,
            ..PlacementRule::new("callout")
        });
        let road = Polyline::new(vec![Point::new(-20.0, 10.0), Point::new(20.0, 10.0)]).unwrap();
        let road_id = map.add_feature("roads", interner.intern("road"), "main", Some(Shape::Polyline(road)));
        let well = map.add_feature("roads", interner.intern("poi"), "well", None);

        let road_label = map.add_label(
            road_id,
            "callout",
            vec![TextPart {
                text: "Main St".into(),
                frame: frame(-3.0, 10.5, 3.0, 12.0),
            }],
        );
        map.add_label(
            road_id,
            "callout",
            vec![TextPart {
                text: "Bakery".into(),
                frame: frame(2.0, -1.0, 3.0, 1.0),
            }],
        );
        let callout = map.add_label(
            well,
            "callout",
            vec![TextPart {
                text: "Well".into(),
                frame: frame(5.0, -0.5, 8.0, 0.5),
            }],
        );
        if let Some(label) = map.label_mut(callout) {
            label.leader = Some(Leader {
                anchor: Point::new(0.0, 0.0),
                end: Point::new(5.0, 0.0),
                width: 0.2,
            });
        }
        (map, road_label, callout)
    }

    #[test]
    fn label_ignores_its_own_feature() {
        let (map, road_label, _) = demo_map();
        let mut session = LabelingSession::new(map, LabelingSettings::default()).unwrap();
        session.rebuild_index(session.map().extent).unwrap();
        let summary = session.test_label(road_label).unwrap();
        assert!(summary.polylines.is_empty());
        assert!(!summary.has_overlaps());
    }

    #[test]
    fn leader_is_routed_and_written_back() {
        let (map, _, callout) = demo_map();
        let mut session = LabelingSession::new(map, LabelingSettings::default()).unwrap();
        let report = session.place_labels().unwrap();
        assert_eq!(report.labels_tested, 3);
        assert_eq!(report.leaders_placed, 1);
        let leader = session.map().label(callout).unwrap().leader.unwrap();
        assert!(leader.end.y() < 0.0);
        assert!((leader.anchor.distance(leader.end) - 5.0).abs() < 1e-3);
    }

    #[test]
    fn later_labels_see_the_rerouted_leader() {
        let (mut map, _, callout) = demo_map();
        let well = map.label(callout).unwrap().feature;
        // 压在原引线上，引线改道后应不再冲突。
        let marker = map.add_label(
            well,
            "",
            vec![TextPart {
                text: "D".into(),
                frame: frame(3.6, -0.2, 4.0, 0.2),
            }],
        );
        let mut session = LabelingSession::new(map, LabelingSettings::default()).unwrap();
        let report = session.place_labels().unwrap();
        assert_eq!(report.leaders_placed, 1);
        let moved = session.map().label(callout).unwrap().leader.unwrap();
        assert!(moved.end.y() < 0.0);

        let in_frame = session.test_label(marker).unwrap();
        session.rebuild_index(session.map().extent).unwrap();
        let rebuilt = session.test_label(marker).unwrap();
        assert_eq!(in_frame.has_overlaps(), rebuilt.has_overlaps());
        assert!(!in_frame.has_overlaps());
        assert!(in_frame.texts.is_empty());
    }

    #[test]
    fn unnamed_rule_uses_settings_buffers() {
        let (mut map, road_label, _) = demo_map();
        if let Some(label) = map.label_mut(road_label) {
            label.rule.clear();
        }
        let settings = LabelingSettings {
            overlap_buffer: 0.6,
            thick_line_threshold: 0.2,
            ..LabelingSettings::default()
        };
        let mut session = LabelingSession::new(map, settings).unwrap();
        session.rebuild_index(session.map().extent).unwrap();
        // 外扩 0.6 后碰到道路描边，但道路是注记自己的要素。
        assert!(!session.test_label(road_label).unwrap().has_overlaps());
        if let Some(label) = session.map_mut().label_mut(road_label) {
            label.rule = "missing".into();
        }
        assert!(matches!(
            session.test_label(road_label),
            Err(EngineError::RuleNotFound(name)) if name == "missing"
        ));
    }

    #[test]
    fn unknown_labels_and_indexes_are_errors() {
        let (map, _, _) = demo_map();
        let mut session = LabelingSession::new(map.clone(), LabelingSettings::default()).unwrap();
        assert!(matches!(
            session.test_label(LabelId(999)),
            Err(EngineError::LabelNotFound(999))
        ));
        let mut orphaned = map.clone();
        let stray = orphaned.add_label(FeatureId(404), "", Vec::new());
        let mut session = LabelingSession::new(orphaned, LabelingSettings::default()).unwrap();
        assert!(matches!(
            session.test_label(stray),
            Err(EngineError::FeatureNotFound(404))
        ));
        assert!(matches!(
            session.route_leader(stray),
            Err(EngineError::FeatureNotFound(404))
        ));

        let settings = LabelingSettings {
            index_kind: "quadtree".into(),
            ..LabelingSettings::default()
        };
        assert!(matches!(
            LabelingSession::new(map, settings),
            Err(EngineError::UnknownIndex(_))
        ));
    }

    #[test]
    fn linear_index_gives_same_conflicts() {
        let (map, _, _) = demo_map();
        let grid = LabelingSession::new(map.clone(), LabelingSettings::default())
            .unwrap()
            .place_labels()
            .unwrap();
        let linear = LabelingSession::new(
            map,
            LabelingSettings {
                index_kind: "linear".into(),
                ..LabelingSettings::default()
            },
        )
        .unwrap()
        .place_labels()
        .unwrap();
        assert_eq!(grid, linear);
    }
}
