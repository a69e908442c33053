//! 障碍检测：在空间索引中查找与查询矩形重叠的要素与注记，
//! 汇总成 [`ObstacleOverlapSummary`]，并给出让查询矩形脱离重叠所需的平移量。

use std::collections::HashMap;
use std::sync::Arc;

use maplabel_core::geometry::{LineSegment, Point, PolylineView, Rectangle, UprightRectangle};
use maplabel_core::model::{FeatureId, LabelId};
use tracing::trace;

use crate::errors::EngineError;
use crate::index::{clip_ring_to_rectangle, CellItem, EntryId, IndexEntry, SpatialIndex};

/// 单次检测的轮次标记。同一条目部件在多个单元中出现时只处理一次。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisFlag(u32);

impl AnalysisFlag {
    #[inline]
    pub fn value(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct DetectionArgs {
    /// 查询矩形，通常是注记部件按放置规则外扩后的框。
    pub query: Rectangle,
    /// 线宽不小于该值的线按描边盒判定，否则只看中心线。
    pub thick_line_threshold: f32,
    pub ignore_label: Option<LabelId>,
    pub ignore_feature: Option<FeatureId>,
    pub tolerance: f32,
}

impl DetectionArgs {
    pub fn new(query: Rectangle) -> Self {
        Self {
            query,
            thick_line_threshold: 1.0,
            ignore_label: None,
            ignore_feature: None,
            tolerance: 1e-4,
        }
    }

    fn ignores(&self, entry: &IndexEntry) -> bool {
        (self.ignore_feature.is_some() && entry.feature() == self.ignore_feature)
            || (self.ignore_label.is_some() && entry.label() == self.ignore_label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolylineOverlap {
    pub entry: EntryId,
    pub feature: FeatureId,
    pub class: Arc<str>,
    pub segment_index: usize,
    pub segment: LineSegment,
    /// 中心线落在查询矩形内的部分；粗线的中心线可能完全在矩形外。
    pub clipped: Option<LineSegment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolygonOverlap {
    pub entry: EntryId,
    pub feature: FeatureId,
    pub class: Arc<str>,
    /// 面与查询矩形的交集顶点。
    pub vertices: Vec<Point>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOverlapKind {
    Text,
    Leader,
    Symbol,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextOverlap {
    pub entry: EntryId,
    pub label: LabelId,
    pub part: usize,
    pub kind: TextOverlapKind,
    pub corners: [Point; 4],
}

/// 查询矩形沿自身坐标轴四个方向各需平移多少才能避开全部障碍，取各障碍的最大值。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OverlapShifts {
    pub left: f32,
    pub right: f32,
    pub up: f32,
    pub down: f32,
}

impl OverlapShifts {
    fn include(&mut self, other: &OverlapShifts) {
        self.left = self.left.max(other.left);
        self.right = self.right.max(other.right);
        self.up = self.up.max(other.up);
        self.down = self.down.max(other.down);
    }

    /// 最小的非零平移量及方向名。
    pub fn smallest(&self) -> Option<(&'static str, f32)> {
        [
            ("left", self.left),
            ("right", self.right),
            ("up", self.up),
            ("down", self.down),
        ]
        .into_iter()
        .filter(|(_, amount)| *amount > 0.0)
        .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObstacleOverlapSummary {
    pub polylines: Vec<PolylineOverlap>,
    pub polygons: Vec<PolygonOverlap>,
    pub texts: Vec<TextOverlap>,
    pub shifts: OverlapShifts,
    /// 查询矩形与不透明面相交，平移通常无法解决。
    pub fully_obstructed: bool,
}

impl ObstacleOverlapSummary {
    pub fn has_overlaps(&self) -> bool {
        !self.polylines.is_empty() || !self.polygons.is_empty() || !self.texts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.polylines.len() + self.polygons.len() + self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_overlaps()
    }

    pub fn merge(&mut self, other: ObstacleOverlapSummary) {
        self.polylines.extend(other.polylines);
        self.polygons.extend(other.polygons);
        self.texts.extend(other.texts);
        self.shifts.include(&other.shifts);
        self.fully_obstructed |= other.fully_obstructed;
    }

    /// 按查询矩形自身坐标系计算障碍的平移量并累积到汇总中。
    fn calculate_overlap_shifts(&mut self, query: &Rectangle, obstacle: &[Point]) {
        if obstacle.is_empty() {
            return;
        }
        let local = UprightRectangle::from_points(obstacle.iter().map(|p| query.to_local(*p)));
        let (w, h) = (query.width(), query.height());
        let ll = local.lower_left();
        let ur = local.upper_right();
        self.shifts.include(&OverlapShifts {
            left: (w - ll.x()).max(0.0),
            right: ur.x().max(0.0),
            down: (h - ll.y()).max(0.0),
            up: ur.y().max(0.0),
        });
    }

    fn process_label_box(
        &mut self,
        args: &DetectionArgs,
        entry: EntryId,
        label: LabelId,
        part: usize,
        kind: TextOverlapKind,
        frame: &Rectangle,
    ) {
        if !frame.overlaps(&args.query, args.tolerance) {
            return;
        }
        let clipped = clip_ring_to_rectangle(frame.corners(), &args.query);
        self.calculate_overlap_shifts(&args.query, &clipped);
        self.texts.push(TextOverlap {
            entry,
            label,
            part,
            kind,
            corners: *frame.corners(),
        });
    }
}

impl IndexEntry {
    /// 判定条目的一个部件与查询矩形的关系，结果写入 `summary`。
    pub fn process(
        &self,
        id: EntryId,
        part: usize,
        args: &DetectionArgs,
        summary: &mut ObstacleOverlapSummary,
    ) -> Result<(), EngineError> {
        if args.ignores(self) {
            return Ok(());
        }
        let query = &args.query;
        match self {
            IndexEntry::FeaturePolyline {
                feature,
                class,
                geometry,
                stroke_width,
            } => {
                let Some(segment) = geometry.segment(part) else {
                    return Ok(());
                };
                let clipped = if segment.is_zero_length(1e-6) {
                    None
                } else {
                    segment.clip_to_rectangle(query)?
                };
                let (hit, obstacle) = if *stroke_width >= args.thick_line_threshold {
                    let stroke = segment.stroke_box(*stroke_width);
                    if stroke.overlaps(query, args.tolerance) {
                        (true, clip_ring_to_rectangle(stroke.corners(), query))
                    } else {
                        (false, Vec::new())
                    }
                } else {
                    match clipped {
                        Some(piece) if !piece.is_zero_length(args.tolerance) => {
                            (true, vec![piece.start, piece.end])
                        }
                        _ => (false, Vec::new()),
                    }
                };
                if hit {
                    summary.calculate_overlap_shifts(query, &obstacle);
                    summary.polylines.push(PolylineOverlap {
                        entry: id,
                        feature: *feature,
                        class: Arc::clone(class),
                        segment_index: part,
                        segment,
                        clipped,
                    });
                }
            }
            IndexEntry::OpaquePolygon {
                feature,
                class,
                polygon,
            } => {
                if !polygon.bounding_box().intersects(&query.bounding_box()) {
                    return Ok(());
                }
                let vertices = clip_ring_to_rectangle(polygon.boundary().vertices(), query);
                let local =
                    UprightRectangle::from_points(vertices.iter().map(|p| query.to_local(*p)));
                if vertices.len() < 3
                    || local.width() <= args.tolerance
                    || local.height() <= args.tolerance
                {
                    return Ok(());
                }
                summary.calculate_overlap_shifts(query, &vertices);
                summary.fully_obstructed = true;
                summary.polygons.push(PolygonOverlap {
                    entry: id,
                    feature: *feature,
                    class: Arc::clone(class),
                    vertices,
                });
            }
            IndexEntry::TextPart { label, part, frame } => {
                summary.process_label_box(args, id, *label, *part, TextOverlapKind::Text, frame);
            }
            IndexEntry::SymbolComponent { label, part, frame } => {
                summary.process_label_box(args, id, *label, *part, TextOverlapKind::Symbol, frame);
            }
            IndexEntry::Leader { label, leader } => {
                let stroke = leader.segment().stroke_box(leader.width);
                summary.process_label_box(args, id, *label, 0, TextOverlapKind::Leader, &stroke);
            }
        }
        Ok(())
    }
}

/// 障碍检测器。持有去重标记，可在多次检测之间复用以避免重复分配。
#[derive(Debug, Default)]
pub struct ObstacleDetector {
    current: u32,
    marks: HashMap<CellItem, u32>,
}

impl ObstacleDetector {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_flag(&mut self) -> AnalysisFlag {
        if self.current == u32::MAX {
            self.marks.clear();
            self.current = 0;
        }
        self.current += 1;
        AnalysisFlag(self.current)
    }

    /// 索引重建后条目下标会复用，需要丢弃旧标记。
    pub fn reset(&mut self) {
        self.marks.clear();
        self.current = 0;
    }

    pub fn detect(
        &mut self,
        index: &dyn SpatialIndex,
        args: &DetectionArgs,
    ) -> Result<ObstacleOverlapSummary, EngineError> {
        let flag = self.next_flag();
        let mut summary = ObstacleOverlapSummary::default();
        let mut visited = 0usize;
        for cell in index.potential_overlaps(&args.query)? {
            for item in cell.items() {
                let mark = self.marks.entry(*item).or_insert(0);
                if *mark == flag.value() {
                    continue;
                }
                *mark = flag.value();
                visited += 1;
                let entry = index
                    .entry(item.entry)
                    .ok_or(EngineError::EntryNotFound(item.entry.0))?;
                entry.process(item.entry, item.part, args, &mut summary)?;
            }
        }
        trace!(
            flag = flag.value(),
            visited,
            overlaps = summary.len(),
            "障碍检测完成"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use maplabel_core::geometry::{Polygon, Polyline};
    use maplabel_core::model::Leader;

    use super::*;
    use crate::index::{GridSpatialIndex, IndexOptions};

    fn rect(x0: f32, y0: f32, x1: f32, y1: f32) -> Rectangle {
        Rectangle::from_upright(&UprightRectangle::from_coords(x0, y0, x1, y1))
    }

    fn grid() -> GridSpatialIndex {
        GridSpatialIndex::new(IndexOptions {
            cell_size: 2.0,
            extent: None,
        })
    }

    fn road(index: &mut GridSpatialIndex, points: &[(f32, f32)], width: f32) -> EntryId {
        let geometry =
            Polyline::new(points.iter().map(|&(x, y)| Point::new(x, y)).collect()).unwrap();
        index
            .insert(IndexEntry::FeaturePolyline {
                feature: FeatureId(1),
                class: Arc::from("road"),
                geometry,
                stroke_width: width,
            })
            .unwrap()[0]
    }

    #[test]
    fn thin_line_reports_clipped_centerline_once() {
        let mut index = grid();
        road(&mut index, &[(-10.0, 1.0), (10.0, 1.0)], 0.2);
        let mut detector = ObstacleDetector::new();
        let summary = detector
            .detect(&index, &DetectionArgs::new(rect(0.0, 0.0, 4.0, 2.0)))
            .unwrap();
        assert_eq!(summary.polylines.len(), 1);
        let clipped = summary.polylines[0].clipped.unwrap();
        assert!(clipped.start.is_near(Point::new(0.0, 1.0), 1e-4));
        assert!(clipped.end.is_near(Point::new(4.0, 1.0), 1e-4));
        assert!(!summary.fully_obstructed);
    }

    #[test]
    fn thick_line_counts_stroke_outside_query() {
        let mut index = grid();
        road(&mut index, &[(-10.0, -0.5), (10.0, -0.5)], 2.0);
        let mut detector = ObstacleDetector::new();
        let summary = detector
            .detect(&index, &DetectionArgs::new(rect(0.0, 0.0, 4.0, 2.0)))
            .unwrap();
        assert_eq!(summary.polylines.len(), 1);
        assert!(summary.polylines[0].clipped.is_none());
        // 描边覆盖到 y = 0.5，向上平移 0.5 即可脱离。
        assert!((summary.shifts.up - 0.5).abs() < 1e-4);

        let thin = DetectionArgs {
            thick_line_threshold: 5.0,
            ..DetectionArgs::new(rect(0.0, 0.0, 4.0, 2.0))
        };
        assert!(detector.detect(&index, &thin).unwrap().is_empty());
    }

    #[test]
    fn opaque_polygon_obstructs_and_ignores_work() {
        let mut index = grid();
        let lake = Polygon::new(vec![
            Point::new(3.0, -1.0),
            Point::new(8.0, -1.0),
            Point::new(8.0, 4.0),
            Point::new(3.0, 4.0),
        ])
        .unwrap();
        index
            .insert(IndexEntry::OpaquePolygon {
                feature: FeatureId(5),
                class: Arc::from("lake"),
                polygon: lake,
            })
            .unwrap();
        let mut detector = ObstacleDetector::new();
        let args = DetectionArgs::new(rect(0.0, 0.0, 4.0, 2.0));
        let summary = detector.detect(&index, &args).unwrap();
        assert!(summary.fully_obstructed);
        assert_eq!(summary.polygons.len(), 1);
        assert!((summary.shifts.left - 1.0).abs() < 1e-4);
        assert_eq!(summary.shifts.smallest().map(|(side, _)| side), Some("left"));

        let ignoring = DetectionArgs {
            ignore_feature: Some(FeatureId(5)),
            ..args
        };
        assert!(!detector.detect(&index, &ignoring).unwrap().has_overlaps());
    }

    #[test]
    fn label_parts_and_leaders_are_text_overlaps() {
        let mut index = grid();
        index
            .insert(IndexEntry::TextPart {
                label: LabelId(2),
                part: 0,
                frame: rect(3.0, 1.0, 6.0, 3.0),
            })
            .unwrap();
        index
            .insert(IndexEntry::Leader {
                label: LabelId(2),
                leader: Leader {
                    anchor: Point::new(1.0, -3.0),
                    end: Point::new(1.0, 0.5),
                    width: 0.2,
                },
            })
            .unwrap();
        let mut detector = ObstacleDetector::new();
        let summary = detector
            .detect(&index, &DetectionArgs::new(rect(0.0, 0.0, 4.0, 2.0)))
            .unwrap();
        let mut kinds: Vec<_> = summary.texts.iter().map(|t| t.kind).collect();
        kinds.sort_by_key(|kind| *kind as u8);
        assert_eq!(kinds, vec![TextOverlapKind::Text, TextOverlapKind::Leader]);
        assert!((summary.shifts.up - 2.0).abs() < 1e-4);

        let own = DetectionArgs {
            ignore_label: Some(LabelId(2)),
            ..DetectionArgs::new(rect(0.0, 0.0, 4.0, 2.0))
        };
        assert!(detector.detect(&index, &own).unwrap().is_empty());
    }

    #[test]
    fn flag_wraps_without_losing_deduplication() {
        let mut index = grid();
        road(&mut index, &[(0.0, 1.0), (20.0, 1.0)], 0.1);
        let mut detector = ObstacleDetector {
            current: u32::MAX - 1,
            marks: HashMap::new(),
        };
        for _ in 0..3 {
            let summary = detector
                .detect(&index, &DetectionArgs::new(rect(1.0, 0.0, 15.0, 2.0)))
                .unwrap();
            assert_eq!(summary.polylines.len(), 1);
        }
        assert!(detector.current < 3);
    }
}
